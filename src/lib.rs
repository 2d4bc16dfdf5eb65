//! Sparse projection operators between volumetric brain data and cortical surface meshes.
//!
//! The focus of this package is on mapping functional volumes onto the vertices of both
//! hemispheres and back, using one sparse (vertices x voxels) operator per hemisphere. Several
//! sampling kernels are available, from nearest-voxel lookups to exact intersection volumes of
//! the cortical ribbon. Operators are cached on disk per subject, transform and kernel.

pub mod util;
pub mod error;
pub mod sparse;
pub mod geometry;
pub mod database;
pub mod projection;
pub mod proj_nearest;
pub mod proj_trilinear;
pub mod proj_lanczos;
pub mod proj_gaussian;
pub mod proj_polyhedral;
pub mod proj_convex;
pub mod cache;
pub mod mapper;

pub use error::{MapperError, Result};
pub use util::GridShape;
pub use sparse::{CsrBuilder, CsrMatrix};
pub use geometry::{Affine, Point3, Polyhedron};
pub use database::{HemiSurface, SubjectFiles, SurfaceDatabase, XfmKind};
pub use projection::{HemisphereInput, Kernel, ProjectionKernel};
pub use proj_convex::{ConvexSampling, SampleSplat};
pub use cache::{load_operators, save_operators, CacheStatus};
pub use mapper::{MapperOptions, OperatorOrigin, SurfaceSet, VertexData, VolumeSurfaceMapper};
