//! Thickness-aware projection with Monte-Carlo volume estimates.
//!
//! A fixed set of uniformly distributed points is scaled into the bounding box of each ribbon
//! polyhedron. Points outside the convex hull of the polyhedron are dropped, the retained points
//! are splatted onto the grid, and each voxel is weighted by its share of the retained points.

use std::collections::BTreeMap;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{MapperError, Result};
use crate::geometry::{ribbon_polyhedra, ConvexHull, Point3, Polyhedron};
use crate::proj_nearest::nearest_voxel;
use crate::proj_trilinear::trilinear_weights;
use crate::projection::{HemisphereInput, ProjectionKernel};
use crate::sparse::{CsrBuilder, CsrMatrix};
use crate::util::GridShape;


/// How retained sample points are distributed onto voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvexSampling {
    /// Count the samples falling into each voxel.
    Nearest,
    /// Spread each sample over its 8 surrounding voxels with trilinear weights.
    Trilinear,
    /// Windowed-sinc splatting. Not implemented.
    Lanczos,
}

impl ConvexSampling {

    pub fn kernel_name(&self) -> &'static str {
        match self {
            ConvexSampling::Nearest => "convexnn",
            ConvexSampling::Trilinear => "convextrilin",
            ConvexSampling::Lanczos => "convexlanczos",
        }
    }

    /// The splatting strategy, failing for strategies that are not available.
    pub fn splatter(&self) -> Result<Box<dyn SampleSplat>> {
        match self {
            ConvexSampling::Nearest => Ok(Box::new(NearestSplat)),
            ConvexSampling::Trilinear => Ok(Box::new(TrilinearSplat)),
            ConvexSampling::Lanczos => Err(MapperError::Unimplemented(String::from(self.kernel_name()))),
        }
    }
}


/// Distributes sample points onto voxels. Returns the accumulated sample mass per voxel index;
/// each in-grid sample contributes a total mass of at most one.
pub trait SampleSplat: Sync {
    fn splat(&self, samples: &[Point3], shape: GridShape) -> BTreeMap<usize, f64>;
}

pub struct NearestSplat;

impl SampleSplat for NearestSplat {
    fn splat(&self, samples: &[Point3], shape: GridShape) -> BTreeMap<usize, f64> {
        let mut counts = BTreeMap::new();
        for &p in samples {
            if let Some(idx) = nearest_voxel(p, shape) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }
        counts
    }
}

pub struct TrilinearSplat;

impl SampleSplat for TrilinearSplat {
    fn splat(&self, samples: &[Point3], shape: GridShape) -> BTreeMap<usize, f64> {
        let mut mass = BTreeMap::new();
        for &p in samples {
            for &(idx, w) in trilinear_weights(p, shape).iter() {
                *mass.entry(idx).or_insert(0.0) += w;
            }
        }
        mass
    }
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvexKernel {
    /// Number of sample points per polyhedron.
    pub npts: usize,
    /// Seed of the sample point generator.
    pub seed: u64,
    pub sampling: ConvexSampling,
}

impl Default for ConvexKernel {
    fn default() -> ConvexKernel {
        ConvexKernel { npts: 1024, seed: 0, sampling: ConvexSampling::Nearest }
    }
}

impl ConvexKernel {

    /// Points uniformly distributed in the unit cube, shared by all polyhedra of a build.
    pub fn unit_samples(&self) -> Vec<Point3> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..self.npts).map(|_| [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()]).collect()
    }
}

/// The (voxel index, weight) row of one polyhedron, estimated from the unit samples.
pub fn convex_weights(poly: &Polyhedron, unit: &[Point3], splat: &dyn SampleSplat, shape: GridShape) -> Vec<(usize, f64)> {
    let (lo, hi) = poly.bounds();
    let hull = ConvexHull::new(&poly.points);
    let inside: Vec<Point3> = unit
        .iter()
        .map(|u| [
            lo[0] + u[0] * (hi[0] - lo[0]),
            lo[1] + u[1] * (hi[1] - lo[1]),
            lo[2] + u[2] * (hi[2] - lo[2]),
        ])
        .filter(|&p| hull.contains(p))
        .collect();
    if inside.is_empty() {
        return Vec::new();
    }
    let retained = inside.len() as f64;
    splat.splat(&inside, shape).into_iter().map(|(idx, mass)| (idx, mass / retained)).collect()
}

impl ProjectionKernel for ConvexKernel {
    fn build_operator(&self, input: &HemisphereInput, shape: GridShape) -> Result<CsrMatrix> {
        let splat = self.sampling.splatter()?;
        let (pial, white) = input.ribbon_pair()?;
        let unit = self.unit_samples();
        let mut builder = CsrBuilder::new(shape.num_voxels());
        for (i, poly) in ribbon_polyhedra(pial, white, input.polys).enumerate() {
            if i % 100 == 0 {
                info!("Convex projection: polyhedron {} of {}", i, pial.len());
            }
            if poly.is_empty() {
                builder.push_empty_row();
            } else {
                builder.push_row(convex_weights(&poly, &unit, splat.as_ref(), shape));
            }
        }
        Ok(builder.finish())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ribbon_patch() -> (Vec<Point3>, Vec<Point3>, Vec<[usize; 3]>) {
        let mut pial = vec![[5.0, 5.0, 6.0]];
        let mut white = vec![[5.0, 5.0, 4.0]];
        for i in 0..6 {
            let a = std::f64::consts::PI / 3.0 * i as f64;
            pial.push([5.0 + 2.0 * a.cos(), 5.0 + 2.0 * a.sin(), 6.0]);
            white.push([5.0 + 2.0 * a.cos(), 5.0 + 2.0 * a.sin(), 4.0]);
        }
        let polys = (0..6).map(|i| [0, 1 + i, 1 + (i + 1) % 6]).collect();
        (pial, white, polys)
    }

    #[test]
    fn samples_inside_a_single_voxel_give_full_weight() {
        let cube = Polyhedron::cuboid([1.5, 1.5, 1.5], [2.5, 2.5, 2.5]);
        let shape = GridShape::new(5, 5, 5);
        let unit = ConvexKernel::default().unit_samples();
        assert_eq!(1024, unit.len());

        let row = convex_weights(&cube, &unit, &NearestSplat, shape);
        assert_eq!(vec![(shape.ravel(2, 2, 2).unwrap(), 1.0)], row);
    }

    #[test]
    fn trilinear_splatting_conserves_the_sample_mass() {
        let cube = Polyhedron::cuboid([1.2, 1.7, 2.1], [3.3, 2.9, 3.6]);
        let shape = GridShape::new(6, 6, 6);
        let unit = ConvexKernel { npts: 256, seed: 7, sampling: ConvexSampling::Trilinear }.unit_samples();
        let row = convex_weights(&cube, &unit, &TrilinearSplat, shape);
        let sum: f64 = row.iter().map(|(_, w)| w).sum();
        assert_abs_diff_eq!(1.0, sum, epsilon = 1e-9);
    }

    #[test]
    fn nearest_counts_are_fractions_of_the_retained_samples() {
        let cube = Polyhedron::cuboid([0.6, 0.6, 0.6], [2.4, 2.4, 2.4]);
        let shape = GridShape::new(4, 4, 4);
        let unit = ConvexKernel::default().unit_samples();
        let row = convex_weights(&cube, &unit, &NearestSplat, shape);
        assert_eq!(8, row.len());
        let sum: f64 = row.iter().map(|(_, w)| w).sum();
        assert_abs_diff_eq!(1.0, sum, epsilon = 1e-12);
        for (_, w) in row {
            assert!(w > 0.05 && w < 0.25);
        }
    }

    #[test]
    fn the_same_seed_gives_the_same_operator() {
        let (pial, white, polys) = ribbon_patch();
        let input = HemisphereInput::ribbon(&pial, &white, &polys);
        let shape = GridShape::new(10, 10, 10);
        let kernel = ConvexKernel { npts: 200, seed: 3, sampling: ConvexSampling::Nearest };
        let a = kernel.build_operator(&input, shape).unwrap();
        let b = kernel.build_operator(&input, shape).unwrap();
        assert_eq!(a, b);
        assert_eq!(7, a.nrows());
        assert_abs_diff_eq!(1.0, a.row_sums()[0], epsilon = 1e-12);
        assert_eq!(0, a.row(3).count());
    }

    #[test]
    fn lanczos_sampling_fails_fast() {
        let (pial, white, polys) = ribbon_patch();
        let input = HemisphereInput::ribbon(&pial, &white, &polys);
        let kernel = ConvexKernel { sampling: ConvexSampling::Lanczos, ..ConvexKernel::default() };
        let res = kernel.build_operator(&input, GridShape::new(10, 10, 10));
        assert!(matches!(res, Err(MapperError::Unimplemented(_))));
    }
}
