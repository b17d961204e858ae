//! Correctness verification of kernel outputs.

use memwall_device::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Correctness {
    Pass,
    Fail,
    /// No reference was available to compare against.
    Unknown,
}

impl fmt::Display for Correctness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Correctness::Pass => "PASS",
            Correctness::Fail => "FAIL",
            Correctness::Unknown => "n/a",
        };
        f.write_str(text)
    }
}

/// True when every element of `candidate` is within `tolerance` of
/// `reference`. NaN on either side is never within tolerance.
pub fn compare(reference: &[f32], candidate: &[f32], tolerance: f32) -> Result<bool> {
    if reference.len() != candidate.len() {
        return Err(ProbeError::resource(format!(
            "cannot compare {} reference values with {} candidate values",
            reference.len(),
            candidate.len()
        )));
    }
    Ok(reference
        .iter()
        .zip(candidate)
        .all(|(r, c)| (r - c).abs() <= tolerance))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verifier {
    tolerance: f32,
}

impl Default for Verifier {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Verifier {
    pub fn with_tolerance(tolerance: f32) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ProbeError::InvalidConfig(format!(
                "tolerance must be a non-negative number, got {tolerance}"
            )));
        }
        Ok(Self { tolerance })
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn verify(&self, reference: Option<&[f32]>, candidate: &[f32]) -> Result<Correctness> {
        let Some(reference) = reference else {
            return Ok(Correctness::Unknown);
        };
        Ok(if compare(reference, candidate, self.tolerance)? {
            Correctness::Pass
        } else {
            Correctness::Fail
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_max_abs_diff_within_tolerance() {
        let reference = [1.0, 2.0, 3.0];
        assert!(compare(&reference, &[1.0005, 2.0, 2.9995], 1e-3).unwrap());
        assert!(!compare(&reference, &[1.0, 2.0, 3.01], 1e-3).unwrap());
        assert!(compare(&reference, &reference, 0.0).unwrap());
    }

    #[test]
    fn nan_never_passes() {
        assert!(!compare(&[f32::NAN], &[f32::NAN], 1e-3).unwrap());
        assert!(!compare(&[1.0], &[f32::NAN], 1.0).unwrap());
    }

    #[test]
    fn length_mismatch_is_a_resource_error() {
        let err = compare(&[1.0, 2.0], &[1.0], 1e-3).unwrap_err();
        assert_eq!(err.kind(), memwall_device::ErrorKind::Resource);
    }

    #[test]
    fn missing_reference_is_unknown() {
        let verifier = Verifier::default();
        assert_eq!(verifier.verify(None, &[1.0]).unwrap(), Correctness::Unknown);
        assert_eq!(verifier.verify(Some(&[1.0]), &[1.5]).unwrap(), Correctness::Fail);
        assert!(Verifier::with_tolerance(-1.0).is_err());
    }
}
