//! Nearest-neighbor projection: each vertex picks up the single voxel it falls into.

use crate::error::Result;
use crate::geometry::Point3;
use crate::projection::{HemisphereInput, ProjectionKernel};
use crate::sparse::{CsrBuilder, CsrMatrix};
use crate::util::{round_half_up, GridShape};


#[derive(Debug, Clone, Copy, Default)]
pub struct NearestKernel;

/// Ravel index of the voxel nearest to the voxel-space point `p`, or `None` if that voxel
/// lies outside the grid. Exact halves are rounded up.
pub fn nearest_voxel(p: Point3, shape: GridShape) -> Option<usize> {
    if p.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let r = |v: f64| round_half_up(v) as i64;
    shape.ravel(r(p[0]), r(p[1]), r(p[2]))
}

impl ProjectionKernel for NearestKernel {
    fn build_operator(&self, input: &HemisphereInput, shape: GridShape) -> Result<CsrMatrix> {
        let mut builder = CsrBuilder::new(shape.num_voxels());
        for &p in input.coords {
            match nearest_voxel(p, shape) {
                Some(idx) => builder.push_row(Some((idx, 1.0))),
                None => builder.push_empty_row(),
            }
        }
        Ok(builder.finish())
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn a_vertex_on_a_voxel_center_maps_to_that_voxel() {
        let shape = GridShape::new(10, 10, 10);
        let coords = [[2.0, 3.0, 4.0]];
        let op = NearestKernel.build_operator(&HemisphereInput::fiducial(&coords, &[]), shape).unwrap();

        assert_eq!((1, 1000), op.shape());
        assert_eq!(1, op.nnz());
        assert_eq!(1.0, op.get(0, 432));
        assert_eq!(Some(432), shape.ravel(2, 3, 4));
    }

    #[test]
    fn halves_round_up_and_outside_vertices_get_empty_rows() {
        let shape = GridShape::new(4, 4, 4);
        let coords = [[2.5, 0.5, 1.4], [-0.6, 1.0, 1.0], [1.0, 1.0, 3.5], [f64::NAN, 0.0, 0.0]];
        let op = NearestKernel.build_operator(&HemisphereInput::fiducial(&coords, &[]), shape).unwrap();

        assert_eq!(4, op.nrows());
        assert_eq!(vec![(shape.ravel(3, 1, 1).unwrap(), 1.0)], op.row(0).collect::<Vec<_>>());
        assert_eq!(0, op.row(1).count());
        assert_eq!(0, op.row(2).count());
        assert_eq!(0, op.row(3).count());
    }
}
