//! The surface/volume database the mapper draws subject data from.
//!
//! Resolving subject paths and reading surfaces, volumes and transforms from disk is left to
//! implementors of [`SurfaceDatabase`]. The mapper only needs the per-subject path templates,
//! the transforms, the hemisphere surfaces and the shape of the reference volume.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::geometry::{Affine, Point3};


/// Which variant of a registration transform to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XfmKind {
    /// The transform as stored, e.g., into scanner space.
    Default,
    /// The transform from surface coordinates into voxel-index coordinates of the reference volume.
    VoxelCoordinate,
}


/// The path templates of a subject.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectFiles {
    /// Projection cache file template, with `{xfmname}` and `{projection}` placeholders.
    pub projcache: String,
    /// Transform file template, with an `{xfmname}` placeholder.
    pub xfms: String,
}

impl SubjectFiles {

    /// Location of the operator cache for a transform and projection identity.
    pub fn cache_path(&self, xfm_name: &str, projection: &str) -> PathBuf {
        PathBuf::from(self.projcache.replace("{xfmname}", xfm_name).replace("{projection}", projection))
    }

    /// Location of the transform file. Its modification time decides cache staleness.
    pub fn xfm_path(&self, xfm_name: &str) -> PathBuf {
        PathBuf::from(self.xfms.replace("{xfmname}", xfm_name))
    }
}


/// The mesh of one hemisphere.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HemiSurface {
    pub points: Vec<Point3>,
    pub polys: Vec<[usize; 3]>,
    pub normals: Option<Vec<Point3>>,
}

impl HemiSurface {

    pub fn new(points: Vec<Point3>, polys: Vec<[usize; 3]>) -> HemiSurface {
        HemiSurface { points, polys, normals: None }
    }

    pub fn num_vertices(&self) -> usize {
        self.points.len()
    }
}


pub trait SurfaceDatabase {

    /// The path templates of the subject.
    fn files(&self, subject: &str) -> Result<SubjectFiles>;

    /// The transform of the given kind and the path of its reference volume.
    fn xfm(&self, subject: &str, xfm_name: &str, kind: XfmKind) -> Result<(Affine, PathBuf)>;

    /// The (left, right) hemisphere meshes of a named surface such as "fiducial", "pia" or
    /// "wm", unmerged and not nudged apart.
    fn surface(&self, subject: &str, name: &str) -> Result<[HemiSurface; 2]>;

    /// Shape of the volume at `path` in its native axis order.
    fn volume_shape(&self, path: &Path) -> Result<Vec<usize>>;
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_templates_are_filled() {
        let files = SubjectFiles {
            projcache: String::from("/db/S1/cache/{xfmname}_{projection}.csr.gz"),
            xfms: String::from("/db/S1/transforms/{xfmname}.xfm"),
        };
        assert_eq!(PathBuf::from("/db/S1/cache/fullhead_nearest.csr.gz"), files.cache_path("fullhead", "nearest"));
        assert_eq!(PathBuf::from("/db/S1/transforms/fullhead.xfm"), files.xfm_path("fullhead"));
    }
}
