//! Native implementations of the entry points the host device can run.
//!
//! Each kernel reproduces the work-group structure of its OpenCL C
//! counterpart closely enough that results match bit for bit on integral
//! inputs: the tiled kernels accumulate tile by tile, the reduction folds
//! pairwise inside each group.

use crate::runtime::HostBuffer;
use memwall_device::{ProbeError, Result};
use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::prelude::*;

/// An argument after binding, as the worker thread sees it.
#[derive(Debug, Clone)]
pub enum BoundArg {
    Buffer(HostBuffer),
    Int(i32),
    Uint(u32),
    Float(f32),
    Local(usize),
}

pub struct LaunchContext<'a> {
    pub name: &'a str,
    pub args: &'a [BoundArg],
    pub global: &'a [usize],
    pub local: Option<&'a [usize]>,
}

impl LaunchContext<'_> {
    fn buffer(&self, index: usize) -> Result<&HostBuffer> {
        match self.args.get(index) {
            Some(BoundArg::Buffer(buffer)) => Ok(buffer),
            other => Err(self.bad_arg(index, "a buffer", other)),
        }
    }

    fn int(&self, index: usize) -> Result<usize> {
        match self.args.get(index) {
            Some(BoundArg::Int(value)) if *value >= 0 => Ok(*value as usize),
            Some(BoundArg::Uint(value)) => Ok(*value as usize),
            other => Err(self.bad_arg(index, "a non-negative integer", other)),
        }
    }

    fn local_bytes(&self, index: usize) -> Result<usize> {
        match self.args.get(index) {
            Some(BoundArg::Local(bytes)) => Ok(*bytes),
            other => Err(self.bad_arg(index, "a local-memory reservation", other)),
        }
    }

    fn bad_arg(&self, index: usize, expected: &str, found: Option<&BoundArg>) -> ProbeError {
        ProbeError::device(
            format!("enqueue {}", self.name),
            format!("argument {index} must be {expected}, found {found:?}"),
        )
    }

    fn local_dim(&self, dim: usize) -> usize {
        self.local
            .and_then(|local| local.get(dim).copied())
            .unwrap_or(1)
            .max(1)
    }

    fn global_dim(&self, dim: usize) -> usize {
        self.global.get(dim).copied().unwrap_or(1)
    }
}

pub type HostKernelFn = fn(&LaunchContext<'_>) -> Result<()>;

pub fn lookup(name: &str) -> Option<HostKernelFn> {
    let kernel: HostKernelFn = match name {
        "benchmark_global" | "benchmark_private" => benchmark_tier,
        "benchmark_local" => benchmark_local,
        "naive_matmul" => naive_matmul,
        "matmul" => tiled_matmul,
        "register_matmul" => register_matmul,
        "sum_reduce" => sum_reduce,
        "vec_add" => vec_add,
        _ => return None,
    };
    Some(kernel)
}

/// `n` additions of `x` folded by doubling. Identical to sequential
/// accumulation whenever every partial sum is exactly representable.
pub fn repeated_sum(x: f32, n: u32) -> f32 {
    let mut acc = 0.0f32;
    let mut term = x;
    let mut remaining = n;
    while remaining > 0 {
        if remaining & 1 == 1 {
            acc += term;
        }
        term += term;
        remaining >>= 1;
    }
    acc
}

fn benchmark_tier(ctx: &LaunchContext<'_>) -> Result<()> {
    let iterations = ctx.int(1)? as u32;
    accumulate_in_place(ctx, 0, iterations)
}

fn benchmark_local(ctx: &LaunchContext<'_>) -> Result<()> {
    let scratch = ctx.local_bytes(1)?;
    let needed = ctx.local_dim(0) * std::mem::size_of::<f32>();
    if scratch < needed {
        return Err(ProbeError::device(
            format!("enqueue {}", ctx.name),
            format!("local scratch of {scratch} B is smaller than the {needed} B the work-group stages"),
        ));
    }
    let iterations = ctx.int(2)? as u32;
    accumulate_in_place(ctx, 0, iterations)
}

fn accumulate_in_place(ctx: &LaunchContext<'_>, index: usize, iterations: u32) -> Result<()> {
    let extent = ctx.global_dim(0);
    ctx.buffer(index)?.with_mut(|data| {
        let end = extent.min(data.len());
        data[..end]
            .par_iter_mut()
            .for_each(|value| *value = repeated_sum(*value, iterations));
    })
}

struct MatmulOperands {
    lhs: Array2<f32>,
    rhs: Array2<f32>,
    m: usize,
    n: usize,
    k: usize,
}

fn matmul_operands(ctx: &LaunchContext<'_>) -> Result<MatmulOperands> {
    let (m, n, k) = (ctx.int(3)?, ctx.int(4)?, ctx.int(5)?);
    let shape_error = |what: &str, err: ndarray::ShapeError| {
        ProbeError::device(format!("enqueue {}", ctx.name), format!("{what}: {err}"))
    };
    let lhs = ctx.buffer(0)?.snapshot()?;
    let rhs = ctx.buffer(1)?.snapshot()?;
    let lhs = Array2::from_shape_vec((m, k), truncate(lhs, m * k))
        .map_err(|err| shape_error("lhs", err))?;
    let rhs = Array2::from_shape_vec((k, n), truncate(rhs, k * n))
        .map_err(|err| shape_error("rhs", err))?;
    Ok(MatmulOperands { lhs, rhs, m, n, k })
}

fn truncate(mut data: Vec<f32>, len: usize) -> Vec<f32> {
    data.truncate(len);
    data
}

fn store_matrix(ctx: &LaunchContext<'_>, output: Array2<f32>) -> Result<()> {
    let values = output.into_raw_vec();
    ctx.buffer(2)?.with_mut(|data| {
        let end = values.len().min(data.len());
        data[..end].copy_from_slice(&values[..end]);
    })
}

fn naive_matmul(ctx: &LaunchContext<'_>) -> Result<()> {
    let MatmulOperands { lhs, rhs, m, n, .. } = matmul_operands(ctx)?;
    let mut output = Array2::<f32>::zeros((m, n));

    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(row_idx, mut row)| {
            let lhs_row = lhs.row(row_idx);
            for (col_idx, value) in row.iter_mut().enumerate() {
                let rhs_col = rhs.column(col_idx);
                let mut acc = 0.0f32;
                for (a, b) in lhs_row.iter().zip(rhs_col.iter()) {
                    acc += a * b;
                }
                *value = acc;
            }
        });

    store_matrix(ctx, output)
}

fn tiled_matmul(ctx: &LaunchContext<'_>) -> Result<()> {
    let tile = ctx.local_dim(0);
    let operands = matmul_operands(ctx)?;
    let output = blocked_product(&operands, tile);
    store_matrix(ctx, output)
}

/// Same tiling as the shared kernel; the register kernel only changes which
/// work-item owns which output column, not the accumulation order.
fn register_matmul(ctx: &LaunchContext<'_>) -> Result<()> {
    let tile = ctx.local_dim(1);
    let operands = matmul_operands(ctx)?;
    let output = blocked_product(&operands, tile);
    store_matrix(ctx, output)
}

fn blocked_product(operands: &MatmulOperands, tile: usize) -> Array2<f32> {
    let MatmulOperands { lhs, rhs, m, n, k } = operands;
    let (m, n, k) = (*m, *n, *k);
    let mut output = Array2::<f32>::zeros((m, n));
    let tile = tile.max(1);

    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(row_idx, mut c_row)| {
            let a_row = lhs.row(row_idx);
            for j0 in (0..n).step_by(tile) {
                let j_max = (j0 + tile).min(n);
                for p0 in (0..k).step_by(tile) {
                    let p_max = (p0 + tile).min(k);
                    let a_block = a_row.slice(s![p0..p_max]);
                    let b_block: ArrayView2<'_, f32> = rhs.slice(s![p0..p_max, j0..j_max]);
                    let mut c_block = c_row.slice_mut(s![j0..j_max]);

                    for (col_idx, b_col) in b_block.axis_iter(Axis(1)).enumerate() {
                        let entry = &mut c_block[col_idx];
                        for (a, b) in a_block.iter().zip(b_col.iter()) {
                            *entry += a * b;
                        }
                    }
                }
            }
        });

    output
}

fn sum_reduce(ctx: &LaunchContext<'_>) -> Result<()> {
    let group = ctx.local_dim(0);
    let scratch = ctx.local_bytes(2)?;
    if scratch < group * std::mem::size_of::<f32>() {
        return Err(ProbeError::device(
            format!("enqueue {}", ctx.name),
            format!("local scratch of {scratch} B cannot hold {group} partial values"),
        ));
    }
    let extent = ctx.global_dim(0);
    let input = ctx.buffer(0)?.snapshot()?;
    let end = extent.min(input.len());
    let partials: Vec<f32> = input[..end].par_chunks(group).map(tree_sum).collect();
    ctx.buffer(1)?.with_mut(|data| {
        let len = partials.len().min(data.len());
        data[..len].copy_from_slice(&partials[..len]);
    })
}

/// Pairwise fold with halving stride, as a work-group does it.
fn tree_sum(chunk: &[f32]) -> f32 {
    let mut scratch = chunk.to_vec();
    let mut offset = scratch.len().next_power_of_two() / 2;
    while offset > 0 {
        for lid in 0..offset {
            if lid + offset < scratch.len() {
                scratch[lid] += scratch[lid + offset];
            }
        }
        offset /= 2;
    }
    scratch.first().copied().unwrap_or(0.0)
}

fn vec_add(ctx: &LaunchContext<'_>) -> Result<()> {
    let n = ctx.int(3)?;
    let a = ctx.buffer(0)?.snapshot()?;
    let b = ctx.buffer(1)?.snapshot()?;
    let end = n.min(a.len()).min(b.len()).min(ctx.global_dim(0));
    ctx.buffer(2)?.with_mut(|c| {
        let end = end.min(c.len());
        c[..end]
            .par_iter_mut()
            .zip(a[..end].par_iter().zip(b[..end].par_iter()))
            .for_each(|(out, (x, y))| *out = x + y);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwall_device::BufferAccess;

    fn filled(values: Vec<f32>) -> HostBuffer {
        let buffer = HostBuffer::zeroed(values.len(), BufferAccess::ReadWrite);
        buffer.with_mut(|data| data.copy_from_slice(&values)).unwrap();
        buffer
    }

    #[test]
    fn doubling_fold_matches_sequential_accumulation() {
        for (x, n) in [(1.0f32, 10_000u32), (3.0, 777), (0.5, 1024), (2.0, 0)] {
            let sequential = (0..n).fold(0.0f32, |acc, _| acc + x);
            assert_eq!(repeated_sum(x, n), sequential, "x={x} n={n}");
        }
    }

    #[test]
    fn tree_sum_handles_ragged_groups() {
        assert_eq!(tree_sum(&[1.0; 256]), 256.0);
        assert_eq!(tree_sum(&[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(tree_sum(&[]), 0.0);
    }

    #[test]
    fn tiled_and_naive_products_agree() {
        let (m, n, k) = (32usize, 32usize, 32usize);
        let a = filled((0..m * k).map(|i| (i % 5) as f32).collect());
        let b = filled((0..k * n).map(|i| (i % 3) as f32).collect());
        let naive_out = HostBuffer::zeroed(m * n, BufferAccess::WriteOnly);
        let tiled_out = HostBuffer::zeroed(m * n, BufferAccess::WriteOnly);
        let args = |out: &HostBuffer| {
            vec![
                BoundArg::Buffer(a.clone()),
                BoundArg::Buffer(b.clone()),
                BoundArg::Buffer(out.clone()),
                BoundArg::Int(m as i32),
                BoundArg::Int(n as i32),
                BoundArg::Int(k as i32),
            ]
        };

        let naive_args = args(&naive_out);
        naive_matmul(&LaunchContext {
            name: "naive_matmul",
            args: &naive_args,
            global: &[n, m],
            local: Some(&[8, 8]),
        })
        .unwrap();
        let tiled_args = args(&tiled_out);
        tiled_matmul(&LaunchContext {
            name: "matmul",
            args: &tiled_args,
            global: &[n, m],
            local: Some(&[8, 8]),
        })
        .unwrap();

        assert_eq!(naive_out.snapshot().unwrap(), tiled_out.snapshot().unwrap());
    }

    #[test]
    fn wrong_argument_kind_is_a_device_error() {
        let args = [BoundArg::Int(4), BoundArg::Int(10)];
        let err = benchmark_tier(&LaunchContext {
            name: "benchmark_global",
            args: &args,
            global: &[4],
            local: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("argument 0 must be a buffer"), "{err}");
    }
}
