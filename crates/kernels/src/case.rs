//! Sweep points and the host data they are fed with.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemSize {
    Elements(usize),
    /// C (m x n) = A (m x k) * B (k x n).
    Matrix { m: usize, n: usize, k: usize },
}

impl ProblemSize {
    pub fn square(n: usize) -> Self {
        ProblemSize::Matrix { m: n, n, k: n }
    }

    /// Element count for vectors; output element count for matrices.
    pub fn elements(&self) -> usize {
        match *self {
            ProblemSize::Elements(n) => n,
            ProblemSize::Matrix { m, n, .. } => m * n,
        }
    }

    /// The value written in the CSV size column.
    pub fn primary(&self) -> usize {
        match *self {
            ProblemSize::Elements(n) => n,
            ProblemSize::Matrix { n, .. } => n,
        }
    }
}

impl fmt::Display for ProblemSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemSize::Elements(n) => write!(f, "{n}"),
            ProblemSize::Matrix { m, n, k } if m == n && n == k => write!(f, "{n}"),
            ProblemSize::Matrix { m, n, k } => write!(f, "{m}x{n}x{k}"),
        }
    }
}

/// One sweep point. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub index: usize,
    pub size: ProblemSize,
    pub iterations: u32,
    pub local_size: usize,
    pub tile: usize,
}

impl BenchmarkCase {
    pub fn label(&self) -> String {
        match self.size {
            ProblemSize::Elements(n) => format!("Elements={n}"),
            ProblemSize::Matrix { .. } => format!("N={}", self.size),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchShape {
    pub global: Vec<usize>,
    pub local: Option<Vec<usize>>,
}

impl LaunchShape {
    pub fn new(global: Vec<usize>, local: Option<Vec<usize>>) -> Self {
        Self { global, local }
    }

    pub fn local_items(&self) -> usize {
        self.local
            .as_ref()
            .map(|local| local.iter().product())
            .unwrap_or(1)
    }
}

/// How host inputs are generated.
///
/// Random fills draw small integers (0..=3) so every suite's arithmetic
/// stays exact in `f32` and verification stays meaningful at any size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFill {
    #[default]
    Constant,
    Random { seed: u64 },
}

impl InputFill {
    /// `len` values: `constant` everywhere, or seeded random integers.
    /// `stream` decorrelates the inputs of one case.
    pub fn generate(&self, len: usize, constant: f32, stream: u64) -> Vec<f32> {
        match *self {
            InputFill::Constant => vec![constant; len],
            InputFill::Random { seed } => {
                let mut rng = fastrand::Rng::with_seed(seed.wrapping_add(stream));
                (0..len).map(|_| rng.u8(0..4) as f32).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_name_the_size_column() {
        let case = BenchmarkCase {
            index: 0,
            size: ProblemSize::square(512),
            iterations: 1,
            local_size: 256,
            tile: 16,
        };
        assert_eq!(case.label(), "N=512");
        assert_eq!(case.size.primary(), 512);
        assert_eq!(case.size.elements(), 512 * 512);
    }

    #[test]
    fn random_fill_is_reproducible_and_integral() {
        let fill = InputFill::Random { seed: 42 };
        let first = fill.generate(64, 1.0, 0);
        assert_eq!(first, fill.generate(64, 1.0, 0));
        assert_ne!(first, fill.generate(64, 1.0, 1));
        assert!(first.iter().all(|v| v.fract() == 0.0 && (0.0..4.0).contains(v)));
    }

    #[test]
    fn local_items_defaults_to_one() {
        let shape = LaunchShape::new(vec![1024], None);
        assert_eq!(shape.local_items(), 1);
        let shape = LaunchShape::new(vec![64, 64], Some(vec![16, 16]));
        assert_eq!(shape.local_items(), 256);
    }
}
