//! The projection kernels and their common interface.
//!
//! A kernel turns the voxel-space vertex coordinates of one hemisphere into a sparse
//! (vertices x voxels) weight matrix. Kernels are selected through the [`Kernel`] enum, which also
//! provides the identity string used to key the operator cache.

use std::fmt;

use crate::error::{MapperError, Result};
use crate::geometry::Point3;
use crate::proj_convex::{ConvexKernel, ConvexSampling};
use crate::proj_gaussian::GaussianKernel;
use crate::proj_lanczos::LanczosKernel;
use crate::proj_nearest::NearestKernel;
use crate::proj_polyhedral::PolyhedralKernel;
use crate::proj_trilinear::TrilinearKernel;
use crate::sparse::CsrMatrix;
use crate::util::GridShape;


/// The surface data of one hemisphere, transformed into voxel-index space.
#[derive(Debug, Clone, Copy)]
pub struct HemisphereInput<'a> {
    /// Fiducial coordinates, or pial coordinates for thickness-aware kernels.
    pub coords: &'a [Point3],
    /// White matter coordinates, present for thickness-aware kernels.
    pub white: Option<&'a [Point3]>,
    pub polys: &'a [[usize; 3]],
}

impl<'a> HemisphereInput<'a> {

    pub fn fiducial(coords: &'a [Point3], polys: &'a [[usize; 3]]) -> HemisphereInput<'a> {
        HemisphereInput { coords, white: None, polys }
    }

    pub fn ribbon(pial: &'a [Point3], white: &'a [Point3], polys: &'a [[usize; 3]]) -> HemisphereInput<'a> {
        HemisphereInput { coords: pial, white: Some(white), polys }
    }

    pub fn num_vertices(&self) -> usize {
        self.coords.len()
    }

    /// The (pial, white) surface pair required by thickness-aware kernels.
    pub fn ribbon_pair(&self) -> Result<(&'a [Point3], &'a [Point3])> {
        let white = self.white.ok_or_else(|| MapperError::InvalidGeometry(String::from("kernel needs both a pial and a white matter surface")))?;
        if white.len() != self.coords.len() {
            return Err(MapperError::InvalidGeometry(format!("pial surface has {} vertices, white surface has {}", self.coords.len(), white.len())));
        }
        if let Some(&bad) = self.polys.iter().flatten().find(|&&v| v >= self.coords.len()) {
            return Err(MapperError::InvalidGeometry(format!("polygon references vertex {} of a surface with {} vertices", bad, self.coords.len())));
        }
        Ok((self.coords, white))
    }
}


/// Builds the sparse operator of one hemisphere.
pub trait ProjectionKernel: Sync {
    fn build_operator(&self, input: &HemisphereInput, shape: GridShape) -> Result<CsrMatrix>;
}


/// Kernel identifier and parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// Boolean nearest-voxel lookup.
    Nearest,
    /// Trilinear interpolation between the 8 surrounding voxels.
    Trilinear,
    /// Separable windowed-sinc interpolation.
    Lanczos { window: f64, renorm: bool },
    /// Gaussian weighting. Not implemented.
    Gaussian { std: f64 },
    /// Exact volume fractions of the ribbon polyhedron of each vertex.
    Polyhedral,
    /// Monte-Carlo estimate of the volume fractions of the convex hull of each ribbon polyhedron.
    Convex { npts: usize, seed: u64, sampling: ConvexSampling },
}

impl Kernel {

    /// Lanczos kernel with a window of 3 and renormalized rows.
    pub fn lanczos() -> Kernel {
        Kernel::Lanczos { window: 3.0, renorm: true }
    }

    pub fn gaussian() -> Kernel {
        Kernel::Gaussian { std: 2.0 }
    }

    /// Monte-Carlo convex kernel with 1024 samples per polyhedron.
    pub fn convex(sampling: ConvexSampling) -> Kernel {
        Kernel::Convex { npts: 1024, seed: 0, sampling }
    }

    /// Lowercase type name, the first part of the cache key.
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Nearest => "nearest",
            Kernel::Trilinear => "trilinear",
            Kernel::Lanczos { .. } => "lanczos",
            Kernel::Gaussian { .. } => "gaussian",
            Kernel::Polyhedral => "polyhedral",
            Kernel::Convex { sampling, .. } => sampling.kernel_name(),
        }
    }

    /// The kernel parameters as (name, value) pairs, in no particular order.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match *self {
            Kernel::Nearest | Kernel::Trilinear | Kernel::Polyhedral => Vec::new(),
            Kernel::Lanczos { window, renorm } => vec![("window", window.to_string()), ("renorm", renorm.to_string())],
            Kernel::Gaussian { std } => vec![("std", std.to_string())],
            Kernel::Convex { npts, seed, .. } => vec![("npts", npts.to_string()), ("seed", seed.to_string())],
        }
    }

    /// Deterministic identity of the kernel: the type name followed by its parameters sorted by name,
    /// e.g., `lanczos_renormtrue_window3`.
    pub fn cache_key(&self) -> String {
        let mut params = self.params();
        params.sort_by(|a, b| a.0.cmp(b.0));
        let mut key = String::from(self.name());
        for (name, value) in params {
            key.push('_');
            key.push_str(name);
            key.push_str(&value);
        }
        key
    }

    /// Whether the kernel projects through the cortical ribbon between the pial and white
    /// surfaces instead of the fiducial surface.
    pub fn needs_thickness(&self) -> bool {
        matches!(self, Kernel::Polyhedral | Kernel::Convex { .. })
    }
}

impl ProjectionKernel for Kernel {
    fn build_operator(&self, input: &HemisphereInput, shape: GridShape) -> Result<CsrMatrix> {
        match *self {
            Kernel::Nearest => NearestKernel.build_operator(input, shape),
            Kernel::Trilinear => TrilinearKernel.build_operator(input, shape),
            Kernel::Lanczos { window, renorm } => LanczosKernel { window, renorm }.build_operator(input, shape),
            Kernel::Gaussian { std } => GaussianKernel { std }.build_operator(input, shape),
            Kernel::Polyhedral => PolyhedralKernel.build_operator(input, shape),
            Kernel::Convex { npts, seed, sampling } => ConvexKernel { npts, seed, sampling }.build_operator(input, shape),
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Kernel::Nearest => "Nearest",
            Kernel::Trilinear => "Trilinear",
            Kernel::Lanczos { .. } => "Lanczos",
            Kernel::Gaussian { .. } => "Gaussian",
            Kernel::Polyhedral => "Polyhedral",
            Kernel::Convex { sampling: ConvexSampling::Nearest, .. } => "ConvexNN",
            Kernel::Convex { sampling: ConvexSampling::Trilinear, .. } => "ConvexTrilin",
            Kernel::Convex { sampling: ConvexSampling::Lanczos, .. } => "ConvexLanczos",
        };
        write!(f, "{}", name)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_keys_sort_parameters_by_name() {
        assert_eq!("nearest", Kernel::Nearest.cache_key());
        assert_eq!("lanczos_renormtrue_window3", Kernel::lanczos().cache_key());
        assert_eq!("lanczos_renormfalse_window2.5", Kernel::Lanczos { window: 2.5, renorm: false }.cache_key());
        assert_eq!("convexnn_npts1024_seed0", Kernel::convex(ConvexSampling::Nearest).cache_key());
        assert_ne!(Kernel::Trilinear.cache_key(), Kernel::convex(ConvexSampling::Trilinear).cache_key());
    }

    #[test]
    fn only_ribbon_kernels_need_thickness() {
        assert!(Kernel::Polyhedral.needs_thickness());
        assert!(Kernel::convex(ConvexSampling::Nearest).needs_thickness());
        assert!(!Kernel::lanczos().needs_thickness());
        assert!(!Kernel::Nearest.needs_thickness());
    }

    #[test]
    fn ribbon_kernels_reject_fiducial_input() {
        let coords = [[1.0, 1.0, 1.0]];
        let input = HemisphereInput::fiducial(&coords, &[]);
        let res = Kernel::Polyhedral.build_operator(&input, GridShape::new(3, 3, 3));
        assert!(matches!(res, Err(MapperError::InvalidGeometry(_))));
    }

    #[test]
    fn polygons_must_reference_existing_vertices() {
        let coords = [[1.0, 1.0, 1.0], [2.0, 1.0, 1.0], [1.0, 2.0, 1.0]];
        let polys = [[0, 1, 2], [0, 2, 99], [0, 99, 1]];
        let input = HemisphereInput::ribbon(&coords, &coords, &polys);
        assert!(matches!(input.ribbon_pair(), Err(MapperError::InvalidGeometry(_))));
        let shape = GridShape::new(3, 3, 3);
        for kernel in &[Kernel::Polyhedral, Kernel::convex(ConvexSampling::Nearest)] {
            assert!(matches!(kernel.build_operator(&input, shape), Err(MapperError::InvalidGeometry(_))));
        }
    }

    #[test]
    fn unimplemented_kernels_fail_fast() {
        let coords = [[1.0, 1.0, 1.0]];
        let input = HemisphereInput::ribbon(&coords, &coords, &[]);
        let shape = GridShape::new(3, 3, 3);
        assert!(matches!(Kernel::gaussian().build_operator(&input, shape), Err(MapperError::Unimplemented(_))));
        let convex_lanczos = Kernel::convex(ConvexSampling::Lanczos);
        assert!(matches!(convex_lanczos.build_operator(&input, shape), Err(MapperError::Unimplemented(_))));
    }
}
