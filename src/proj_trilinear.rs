//! Trilinear projection: each vertex interpolates between the 8 voxels around it.

use crate::error::Result;
use crate::geometry::Point3;
use crate::projection::{HemisphereInput, ProjectionKernel};
use crate::sparse::{CsrBuilder, CsrMatrix};
use crate::util::GridShape;


#[derive(Debug, Clone, Copy, Default)]
pub struct TrilinearKernel;

/// The 8 (voxel index, weight) pairs interpolating at `p`. The weights sum to one.
///
/// The integer part of each coordinate is truncated towards zero and a negative fractional
/// part is clamped to zero. Corner indices are clipped into the grid, so several corners may
/// share a voxel near the border.
pub fn trilinear_weights(p: Point3, shape: GridShape) -> [(usize, f64); 8] {
    // Bounded to [-1, n] so the corner offsets cannot overflow.
    let floor = |v: f64, n: usize| (v.trunc() as i64).max(-1).min(n as i64);
    let base = [floor(p[0], shape.nx), floor(p[1], shape.ny), floor(p[2], shape.nz)];
    let frac = [
        (p[0] - p[0].trunc()).max(0.0),
        (p[1] - p[1].trunc()).max(0.0),
        (p[2] - p[2].trunc()).max(0.0),
    ];
    let factor = |axis: usize, upper: i64| if upper == 1 { frac[axis] } else { 1.0 - frac[axis] };

    let mut corners = [(0, 0.0); 8];
    for (n, corner) in corners.iter_mut().enumerate() {
        let (dx, dy, dz) = ((n & 1) as i64, ((n >> 1) & 1) as i64, ((n >> 2) & 1) as i64);
        let idx = shape.ravel_clipped(base[0] + dx, base[1] + dy, base[2] + dz);
        *corner = (idx, factor(0, dx) * factor(1, dy) * factor(2, dz));
    }
    corners
}

impl ProjectionKernel for TrilinearKernel {
    fn build_operator(&self, input: &HemisphereInput, shape: GridShape) -> Result<CsrMatrix> {
        let mut builder = CsrBuilder::new(shape.num_voxels());
        for &p in input.coords {
            if p.iter().all(|v| v.is_finite()) {
                builder.push_row(trilinear_weights(p, shape).iter().copied());
            } else {
                builder.push_empty_row();
            }
        }
        Ok(builder.finish())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rows_of_interior_vertices_sum_to_one() {
        let shape = GridShape::new(6, 7, 8);
        let coords = [[2.25, 3.5, 4.75], [0.1, 0.9, 0.5], [6.99, 5.01, 4.2], [7.5, 6.5, 5.5]];
        let op = TrilinearKernel.build_operator(&HemisphereInput::fiducial(&coords, &[]), shape).unwrap();
        for sum in op.row_sums() {
            assert_abs_diff_eq!(1.0, sum, epsilon = 1e-12);
        }
        assert_eq!(8, op.row(0).count());
        assert_abs_diff_eq!(0.75 * 0.5 * 0.25, op.get(0, shape.ravel(2, 3, 4).unwrap()), epsilon = 1e-12);
        assert_abs_diff_eq!(0.25 * 0.5 * 0.75, op.get(0, shape.ravel(3, 4, 5).unwrap()), epsilon = 1e-12);
    }

    #[test]
    fn integer_coordinates_hit_a_single_voxel() {
        let shape = GridShape::new(4, 4, 4);
        let coords = [[1.0, 2.0, 3.0]];
        let op = TrilinearKernel.build_operator(&HemisphereInput::fiducial(&coords, &[]), shape).unwrap();
        assert_eq!(vec![(shape.ravel(1, 2, 3).unwrap(), 1.0)], op.row(0).collect::<Vec<_>>());
    }

    #[test]
    fn huge_coordinates_are_clipped_to_the_border() {
        let shape = GridShape::new(4, 4, 4);
        let coords = [[1e19, 1.0, 1.0], [-1e19, 2.0, 3.0]];
        let op = TrilinearKernel.build_operator(&HemisphereInput::fiducial(&coords, &[]), shape).unwrap();
        assert_eq!(vec![(shape.ravel(3, 1, 1).unwrap(), 1.0)], op.row(0).collect::<Vec<_>>());
        assert_eq!(vec![(shape.ravel(0, 2, 3).unwrap(), 1.0)], op.row(1).collect::<Vec<_>>());
    }

    #[test]
    fn border_corners_are_clipped_and_merged() {
        let shape = GridShape::new(4, 4, 4);
        let coords = [[3.5, 1.0, 1.0], [-0.5, 1.0, 1.0]];
        let op = TrilinearKernel.build_operator(&HemisphereInput::fiducial(&coords, &[]), shape).unwrap();

        // The upper x neighbor of 3.5 is clipped onto x = 3, merging both weights.
        assert_eq!(vec![(shape.ravel(3, 1, 1).unwrap(), 1.0)], op.row(0).collect::<Vec<_>>());
        // Negative fractions are clamped, so -0.5 behaves like 0.
        assert_eq!(vec![(shape.ravel(0, 1, 1).unwrap(), 1.0)], op.row(1).collect::<Vec<_>>());
    }
}
