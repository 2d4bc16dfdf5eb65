//! Thickness-aware projection with exact volume weights.
//!
//! Each vertex owns a polyhedron spanning the cortical ribbon between the pial and white
//! surfaces. A voxel is weighted by the volume it shares with that polyhedron, divided by the
//! polyhedron's total volume. The shared volume is computed by splitting the polyhedron into
//! signed tetrahedra around its centroid and clipping each against the six faces of the
//! voxel's unit cube.

use log::{debug, info, warn};

use crate::error::Result;
use crate::geometry::{ribbon_polyhedra, ConvexCell, Point3, Polyhedron};
use crate::projection::{HemisphereInput, ProjectionKernel};
use crate::sparse::{normalize_row, CsrBuilder, CsrMatrix};
use crate::util::{round_half_up, GridShape};

/// Relative volume below which a voxel is not considered to intersect the polyhedron.
const MIN_WEIGHT: f64 = 1e-12;


#[derive(Debug, Clone, Copy, Default)]
pub struct PolyhedralKernel;

/// Volume shared by the polyhedron, given as signed tetrahedra, and the unit cube centered at `center`.
pub fn intersection_volume(tetrahedra: &[(f64, [Point3; 4])], center: Point3) -> f64 {
    let lo = [center[0] - 0.5, center[1] - 0.5, center[2] - 0.5];
    let hi = [center[0] + 0.5, center[1] + 0.5, center[2] + 0.5];
    let mut total = 0.0;
    for (signed, tet) in tetrahedra {
        if *signed == 0.0 {
            continue;
        }
        let mut tlo = tet[0];
        let mut thi = tet[0];
        for p in &tet[1..] {
            for a in 0..3 {
                tlo[a] = tlo[a].min(p[a]);
                thi[a] = thi[a].max(p[a]);
            }
        }
        if (0..3).any(|a| thi[a] <= lo[a] || tlo[a] >= hi[a]) {
            continue;
        }
        if (0..3).all(|a| tlo[a] >= lo[a] && thi[a] <= hi[a]) {
            total += signed;
            continue;
        }
        let mut cell = ConvexCell::tetrahedron(tet[0], tet[1], tet[2], tet[3]);
        cell.clip_to_box(lo, hi);
        total += signed.signum() * cell.volume();
    }
    total
}

/// The (voxel index, weight) row of a single polyhedron. Voxels outside the grid are skipped,
/// and the remaining weights are renormalized to sum to one.
pub fn polyhedron_weights(poly: &Polyhedron, shape: GridShape) -> Vec<(usize, f64)> {
    let tetrahedra = poly.signed_tetrahedra();
    let total: f64 = tetrahedra.iter().map(|(v, _)| v).sum();
    if total == 0.0 || !total.is_finite() {
        return Vec::new();
    }

    // Candidate voxels span the bounding box, limited to the grid plus a one voxel margin.
    let (lo, hi) = poly.bounds();
    let extent = [shape.nx as i64, shape.ny as i64, shape.nz as i64];
    let limit = |v: f64, axis: usize| (round_half_up(v) as i64).max(-1).min(extent[axis]);
    let bmin: Vec<i64> = (0..3).map(|a| limit(lo[a], a)).collect();
    let bmax: Vec<i64> = (0..3).map(|a| limit(hi[a], a) + 1).collect();

    let mut row = Vec::new();
    for z in bmin[2]..bmax[2] {
        for y in bmin[1]..bmax[1] {
            for x in bmin[0]..bmax[0] {
                let idx = match shape.ravel(x, y, z) {
                    Some(idx) => idx,
                    None => {
                        debug!("Voxel not in volume: ({}, {}, {})", x, y, z);
                        continue;
                    }
                };
                let weight = intersection_volume(&tetrahedra, [x as f64, y as f64, z as f64]) / total;
                if weight > MIN_WEIGHT {
                    row.push((idx, weight));
                }
            }
        }
    }
    if !row.is_empty() && !normalize_row(&mut row) {
        warn!("Polyhedron volume weights sum to zero, leaving its row empty");
    }
    row
}

impl ProjectionKernel for PolyhedralKernel {
    fn build_operator(&self, input: &HemisphereInput, shape: GridShape) -> Result<CsrMatrix> {
        let (pial, white) = input.ribbon_pair()?;
        let mut builder = CsrBuilder::new(shape.num_voxels());
        for (i, poly) in ribbon_polyhedra(pial, white, input.polys).enumerate() {
            if i % 100 == 0 {
                info!("Polyhedral projection: polyhedron {} of {}", i, pial.len());
            }
            if poly.is_empty() {
                builder.push_empty_row();
            } else {
                builder.push_row(polyhedron_weights(&poly, shape));
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
    fn a_cube_matching_a_voxel_has_full_weight() {
        let cube = Polyhedron::cuboid([1.5, 1.5, 1.5], [2.5, 2.5, 2.5]);
        let tets = cube.signed_tetrahedra();
        assert_abs_diff_eq!(1.0, intersection_volume(&tets, [2.0, 2.0, 2.0]), epsilon = 1e-12);
        assert_abs_diff_eq!(0.0, intersection_volume(&tets, [3.0, 2.0, 2.0]), epsilon = 1e-12);

        let shape = GridShape::new(5, 5, 5);
        let row = polyhedron_weights(&cube, shape);
        assert_eq!(1, row.len());
        assert_eq!(shape.ravel(2, 2, 2).unwrap(), row[0].0);
        assert_abs_diff_eq!(1.0, row[0].1, epsilon = 1e-12);
    }

    #[test]
    fn a_cube_straddling_voxels_is_split_evenly() {
        let cube = Polyhedron::cuboid([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let row = polyhedron_weights(&cube, GridShape::new(4, 4, 4));
        assert_eq!(8, row.len());
        for (_, w) in row {
            assert_abs_diff_eq!(0.125, w, epsilon = 1e-12);
        }
    }

    #[test]
    fn an_oblique_tetrahedron_is_partitioned_exactly() {
        let poly = Polyhedron {
            points: vec![[0.2, 0.3, 0.1], [2.7, 0.4, 0.6], [0.5, 2.2, 0.3], [0.9, 1.1, 2.8]],
            faces: vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        };
        let tets = poly.signed_tetrahedra();
        let total = poly.volume();
        let mut summed = 0.0;
        for z in -1..5 {
            for y in -1..5 {
                for x in -1..5 {
                    summed += intersection_volume(&tets, [x as f64, y as f64, z as f64]);
                }
            }
        }
        assert_abs_diff_eq!(total, summed.abs(), epsilon = 1e-9);
    }

    #[test]
    fn voxels_outside_the_grid_are_skipped_and_the_row_renormalized() {
        let cube = Polyhedron::cuboid([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
        let shape = GridShape::new(4, 4, 4);
        let row = polyhedron_weights(&cube, shape);
        assert_eq!(8, row.len());
        let sum: f64 = row.iter().map(|(_, w)| w).sum();
        assert_abs_diff_eq!(1.0, sum, epsilon = 1e-12);

        let inside: f64 = 1.5 * 1.5 * 1.5;
        let center = row.iter().find(|(i, _)| *i == 0).unwrap().1;
        assert_abs_diff_eq!(1.0 / inside, center, epsilon = 1e-12);
        let corner = row.iter().find(|(i, _)| *i == shape.ravel(1, 1, 1).unwrap()).unwrap().1;
        assert_abs_diff_eq!(0.125 / inside, corner, epsilon = 1e-12);
    }

    #[test]
    fn far_away_polyhedra_give_empty_rows() {
        let shape = GridShape::new(4, 4, 4);
        let far = Polyhedron::cuboid([1e19, 1.0, 1.0], [1.5e19, 2.0, 2.0]);
        assert!(polyhedron_weights(&far, shape).is_empty());

        let huge = Polyhedron::cuboid([-1e19, -1e19, -1e19], [1e19, 1e19, 1e19]);
        let row = polyhedron_weights(&huge, shape);
        assert!(row.len() <= shape.num_voxels());
    }

    #[test]
    fn inward_facing_polyhedra_give_the_same_weights() {
        let mut cube = Polyhedron::cuboid([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        for face in cube.faces.iter_mut() {
            face.swap(1, 2);
        }
        assert!(cube.signed_volume() < 0.0);
        let row = polyhedron_weights(&cube, GridShape::new(4, 4, 4));
        assert_eq!(8, row.len());
        assert_abs_diff_eq!(0.125, row[3].1, epsilon = 1e-12);
    }

    #[test]
    fn each_ribbon_vertex_gets_a_normalized_row() {
        let mut pial = vec![[5.0, 5.0, 6.0]];
        let mut white = vec![[5.0, 5.0, 4.0]];
        for i in 0..6 {
            let a = std::f64::consts::PI / 3.0 * i as f64;
            pial.push([5.0 + 2.0 * a.cos(), 5.0 + 2.0 * a.sin(), 6.0]);
            white.push([5.0 + 2.0 * a.cos(), 5.0 + 2.0 * a.sin(), 4.0]);
        }
        let polys: Vec<[usize; 3]> = (0..6).map(|i| [0, 1 + i, 1 + (i + 1) % 6]).collect();

        let shape = GridShape::new(10, 10, 10);
        let op = PolyhedralKernel.build_operator(&HemisphereInput::ribbon(&pial, &white, &polys), shape).unwrap();
        assert_eq!((7, 1000), op.shape());
        let sums = op.row_sums();
        assert_abs_diff_eq!(1.0, sums[0], epsilon = 1e-9);
        assert!(sums[1..].iter().all(|&s| s == 0.0));
        assert!(op.row(0).count() > 1);
    }
}
