//! Lanczos (windowed-sinc) projection.
//!
//! The kernel is separable: along each axis, a vertex at coordinate `c` weights the voxel at
//! integer position `i` by `L(c - i)` with `L(d) = sinc(d) * sinc(d / window)` for
//! `|d| < window` and zero elsewhere. The 3D weight is the product of the three axis weights.

use std::f64::consts::PI;

use log::{info, warn};

use crate::error::Result;
use crate::projection::{HemisphereInput, ProjectionKernel};
use crate::sparse::{normalize_row, CsrBuilder, CsrMatrix};
use crate::util::GridShape;


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanczosKernel {
    pub window: f64,
    /// Scale each row so that its weights sum to one.
    pub renorm: bool,
}

impl Default for LanczosKernel {
    fn default() -> LanczosKernel {
        LanczosKernel { window: 3.0, renorm: true }
    }
}

/// The Lanczos window function, exactly 1 at `delta = 0`.
pub fn lanczos(delta: f64, window: f64) -> f64 {
    if delta == 0.0 {
        1.0
    } else if delta.abs() >= window {
        0.0
    } else {
        let px = PI * delta;
        px.sin() * (px / window).sin() * window / (px * px)
    }
}

/// Nonzero (grid position, weight) pairs along one axis of extent `n`.
fn axis_weights(c: f64, n: usize, window: f64) -> Vec<(usize, f64)> {
    if !c.is_finite() || n == 0 {
        return Vec::new();
    }
    let lo = (c - window).ceil().max(0.0);
    let hi = (c + window).floor().min(n as f64 - 1.0);
    if hi < lo {
        return Vec::new();
    }
    let mut weights = Vec::with_capacity((hi - lo) as usize + 1);
    for i in lo as usize..=hi as usize {
        let delta = c - i as f64;
        // The sinc vanishes at nonzero integer offsets.
        if delta.abs() >= window || (delta != 0.0 && delta.fract() == 0.0) {
            continue;
        }
        let w = lanczos(delta, window);
        if w != 0.0 {
            weights.push((i, w));
        }
    }
    weights
}

impl LanczosKernel {

    /// The weights of a single vertex, in (voxel index, weight) pairs.
    pub fn vertex_weights(&self, p: [f64; 3], shape: GridShape) -> Vec<(usize, f64)> {
        let wx = axis_weights(p[0], shape.nx, self.window);
        let wy = axis_weights(p[1], shape.ny, self.window);
        let wz = axis_weights(p[2], shape.nz, self.window);
        if wx.is_empty() || wy.is_empty() || wz.is_empty() {
            return Vec::new();
        }
        let mut entries = Vec::with_capacity(wx.len() * wy.len() * wz.len());
        for &(iz, vz) in &wz {
            for &(iy, vy) in &wy {
                for &(ix, vx) in &wx {
                    entries.push(((iz * shape.ny + iy) * shape.nx + ix, vz * vy * vx));
                }
            }
        }
        entries
    }
}

impl ProjectionKernel for LanczosKernel {
    fn build_operator(&self, input: &HemisphereInput, shape: GridShape) -> Result<CsrMatrix> {
        let num_verts = input.num_vertices();
        let mut builder = CsrBuilder::new(shape.num_voxels());
        for (v, &p) in input.coords.iter().enumerate() {
            if v % 1000 == 0 {
                info!("Lanczos projection: vertex {} of {}", v, num_verts);
            }
            let mut entries = self.vertex_weights(p, shape);
            if self.renorm && !entries.is_empty() && !normalize_row(&mut entries) {
                warn!("Lanczos weights of vertex {} sum to zero, leaving its row empty", v);
            }
            builder.push_row(entries);
        }
        Ok(builder.finish())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn the_window_function_is_one_at_zero_and_vanishes_outside() {
        assert_eq!(1.0, lanczos(0.0, 3.0));
        assert_eq!(0.0, lanczos(3.0, 3.0));
        assert_eq!(0.0, lanczos(-4.2, 3.0));
        assert_abs_diff_eq!(lanczos(0.5, 3.0), lanczos(-0.5, 3.0), epsilon = 1e-15);
        assert!(lanczos(0.5, 3.0) > 0.0);
        assert!(lanczos(1.5, 3.0) < 0.0);
    }

    #[test]
    fn renormalized_rows_sum_to_one() {
        let shape = GridShape::new(12, 12, 12);
        let coords = [[5.3, 6.7, 4.1], [5.5, 5.5, 5.5], [1.2, 10.9, 6.0]];
        let op = LanczosKernel::default().build_operator(&HemisphereInput::fiducial(&coords, &[]), shape).unwrap();
        for sum in op.row_sums() {
            assert_abs_diff_eq!(1.0, sum, epsilon = 1e-12);
        }
        // A 3-wide window covers 6 positions per axis for a non-integer coordinate.
        assert_eq!(216, op.row(1).count());
    }

    #[test]
    fn integer_coordinates_use_a_single_voxel() {
        let shape = GridShape::new(8, 8, 8);
        let kernel = LanczosKernel { window: 3.0, renorm: false };
        let entries = kernel.vertex_weights([4.0, 4.0, 4.0], shape);
        assert_eq!(vec![(shape.ravel(4, 4, 4).unwrap(), 1.0)], entries);
    }

    #[test]
    fn the_window_limits_the_support() {
        let shape = GridShape::new(8, 8, 8);
        let kernel = LanczosKernel { window: 1.0, renorm: false };
        let entries = kernel.vertex_weights([2.5, 3.5, 4.5], shape);
        assert_eq!(8, entries.len());
        let sinc_half = 2.0 / PI;
        for (_, w) in entries {
            assert_abs_diff_eq!(sinc_half.powi(6), w, epsilon = 1e-12);
        }
    }

    #[test]
    fn vertices_far_outside_the_grid_get_empty_rows() {
        let shape = GridShape::new(8, 8, 8);
        let coords = [[-5.0, 4.0, 4.0], [4.0, 4.0, 20.5]];
        let op = LanczosKernel::default().build_operator(&HemisphereInput::fiducial(&coords, &[]), shape).unwrap();
        assert_eq!(0, op.nnz());
        assert_eq!(2, op.nrows());
    }
}
