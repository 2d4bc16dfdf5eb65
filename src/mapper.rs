//! Projection of data between a functional volume and the cortical surface.
//!
//! A [`VolumeSurfaceMapper`] holds one sparse operator per hemisphere. The operators are loaded
//! from the subject's projection cache if a fresh archive exists, and are otherwise rebuilt with
//! the selected [`Kernel`] and written back to the cache. Once constructed, a mapper never
//! modifies its operators, so it can be shared freely between threads.

use ndarray::{s, Array1, Array2, Array3, ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use ndarray_stats::QuantileExt;
use log::{debug, info};

use std::fmt;
use std::path::{Path, PathBuf};

use crate::cache::{cache_status, load_operators, save_operators, CacheStatus};
use crate::database::{SurfaceDatabase, XfmKind};
use crate::error::{MapperError, Result};
use crate::geometry::{Affine, Point3};
use crate::projection::{HemisphereInput, Kernel, ProjectionKernel};
use crate::sparse::CsrMatrix;
use crate::util::GridShape;


/// Settings for constructing a mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapperOptions {
    /// Rebuild the operators even if a fresh cache archive exists.
    pub force_recache: bool,
    /// Build the two hemisphere operators concurrently.
    pub parallel: bool,
}

impl Default for MapperOptions {
    fn default() -> MapperOptions {
        MapperOptions { force_recache: false, parallel: true }
    }
}


/// Where the operators of a mapper came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorOrigin {
    /// Loaded from a fresh cache archive.
    Cache,
    /// Built by the kernel and written to the cache.
    Rebuilt,
    /// Handed over by the caller.
    Prebuilt,
}


/// The surfaces a kernel projects through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceSet {
    /// The single mid-thickness surface.
    Fiducial,
    /// The pial and white matter surfaces bounding the cortical ribbon.
    Thick,
}

/// One hemisphere's surfaces in voxel-index space.
struct VoxelSpaceHemisphere {
    coords: Vec<Point3>,
    white: Option<Vec<Point3>>,
    polys: Vec<[usize; 3]>,
}

impl VoxelSpaceHemisphere {

    fn input(&self) -> HemisphereInput<'_> {
        match &self.white {
            Some(white) => HemisphereInput::ribbon(&self.coords, white, &self.polys),
            None => HemisphereInput::fiducial(&self.coords, &self.polys),
        }
    }
}

impl SurfaceSet {

    pub fn for_kernel(kernel: &Kernel) -> SurfaceSet {
        if kernel.needs_thickness() { SurfaceSet::Thick } else { SurfaceSet::Fiducial }
    }

    /// Names of the surfaces requested from the database.
    pub fn surface_names(&self) -> &'static [&'static str] {
        match self {
            SurfaceSet::Fiducial => &["fiducial"],
            SurfaceSet::Thick => &["pia", "wm"],
        }
    }

    fn load<D: SurfaceDatabase + ?Sized>(&self, db: &D, subject: &str, coord: &Affine) -> Result<Vec<VoxelSpaceHemisphere>> {
        match self {
            SurfaceSet::Fiducial => {
                let fiducial = db.surface(subject, "fiducial")?;
                Ok(fiducial
                    .iter()
                    .map(|h| VoxelSpaceHemisphere { coords: coord.transform(&h.points), white: None, polys: h.polys.clone() })
                    .collect())
            }
            SurfaceSet::Thick => {
                let pia = db.surface(subject, "pia")?;
                let wm = db.surface(subject, "wm")?;
                let mut hemis = Vec::with_capacity(2);
                for (p, w) in pia.iter().zip(wm.iter()) {
                    if p.num_vertices() != w.num_vertices() {
                        return Err(MapperError::InvalidGeometry(format!("pial surface has {} vertices, white surface has {}", p.num_vertices(), w.num_vertices())));
                    }
                    hemis.push(VoxelSpaceHemisphere {
                        coords: coord.transform(&p.points),
                        white: Some(coord.transform(&w.points)),
                        polys: p.polys.clone(),
                    });
                }
                Ok(hemis)
            }
        }
    }
}


/// Vertex data passed to [`VolumeSurfaceMapper::backward`].
#[derive(Debug, Clone, PartialEq)]
pub enum VertexData {
    /// One value per vertex of both hemispheres, left hemisphere first.
    Values(Array1<f64>),
    /// Per-hemisphere values.
    HemiValues(Array1<f64>, Array1<f64>),
    /// Indices of selected vertices, counting the right hemisphere after the left one.
    Indices(Array1<usize>),
    /// Per-hemisphere indices of selected vertices.
    HemiIndices(Array1<usize>, Array1<usize>),
}


/// Maps data between volume space and the vertices of both hemispheres.
#[derive(Debug, Clone)]
pub struct VolumeSurfaceMapper {
    subject: String,
    xfm_name: String,
    kernel: Kernel,
    shape: GridShape,
    cache_file: Option<PathBuf>,
    operators: [CsrMatrix; 2],
    nverts: usize,
    idxmap: Option<[Vec<usize>; 2]>,
    origin: OperatorOrigin,
}

impl VolumeSurfaceMapper {

    /// Construct a mapper for a subject and transform, reusing the cached operators if they are
    /// not older than the transform.
    pub fn new<D: SurfaceDatabase + ?Sized>(db: &D, subject: &str, xfm_name: &str, kernel: Kernel, options: MapperOptions) -> Result<VolumeSurfaceMapper> {
        let files = db.files(subject)?;
        let cache_file = files.cache_path(xfm_name, &kernel.cache_key());
        let xfm_file = files.xfm_path(xfm_name);

        let (_, reference) = db.xfm(subject, xfm_name, XfmKind::Default)?;
        let shape = GridShape::from_native(&db.volume_shape(&reference)?)?;

        let status = cache_status(&cache_file, &xfm_file, options.force_recache);
        let mut cached = None;
        if status == CacheStatus::Fresh {
            match load_operators(&cache_file) {
                Ok((left, right)) if left.ncols() == shape.num_voxels() => cached = Some((left, right)),
                Ok((left, _)) => info!("Cache {} has {} voxel columns, the volume has {}", cache_file.display(), left.ncols(), shape.num_voxels()),
                Err(err) => info!("Cache {} could not be loaded: {}", cache_file.display(), err),
            }
        }

        let ((left, right), origin) = match cached {
            Some(ops) => {
                debug!("Using cached {} operators for ({}, {})", kernel, subject, xfm_name);
                (ops, OperatorOrigin::Cache)
            }
            None => {
                info!("Building {} operators for ({}, {}), cache status {:?}", kernel, subject, xfm_name, status);
                let (left, right) = build_operators(db, subject, xfm_name, &kernel, shape, options.parallel)?;
                save_operators(&left, &right, &cache_file)?;
                info!("Saved {} operators to {}", kernel, cache_file.display());
                ((left, right), OperatorOrigin::Rebuilt)
            }
        };

        let mut mapper = VolumeSurfaceMapper::assemble(kernel, left, right, shape, origin)?;
        mapper.subject = subject.to_string();
        mapper.xfm_name = xfm_name.to_string();
        mapper.cache_file = Some(cache_file);
        Ok(mapper)
    }

    /// Construct a mapper from prebuilt hemisphere operators, without database or cache.
    pub fn from_operators(kernel: Kernel, left: CsrMatrix, right: CsrMatrix, shape: GridShape) -> Result<VolumeSurfaceMapper> {
        VolumeSurfaceMapper::assemble(kernel, left, right, shape, OperatorOrigin::Prebuilt)
    }

    fn assemble(kernel: Kernel, left: CsrMatrix, right: CsrMatrix, shape: GridShape, origin: OperatorOrigin) -> Result<VolumeSurfaceMapper> {
        for op in &[&left, &right] {
            if op.ncols() != shape.num_voxels() {
                return Err(MapperError::ShapeMismatch(format!("{} voxel columns for grid {}", shape.num_voxels(), shape), vec![op.nrows(), op.ncols()]));
            }
        }
        let nverts = left.nrows() + right.nrows();
        Ok(VolumeSurfaceMapper {
            subject: String::new(),
            xfm_name: String::new(),
            kernel,
            shape,
            cache_file: None,
            operators: [left, right],
            nverts,
            idxmap: None,
            origin,
        })
    }

    /// Total vertex count of both hemispheres.
    pub fn nverts(&self) -> usize {
        self.nverts
    }

    /// Vertex counts of the (left, right) hemispheres.
    pub fn hemisphere_sizes(&self) -> [usize; 2] {
        [self.operators[0].nrows(), self.operators[1].nrows()]
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn operators(&self) -> &[CsrMatrix; 2] {
        &self.operators
    }

    pub fn cache_file(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    pub fn origin(&self) -> OperatorOrigin {
        self.origin
    }

    pub fn idxmap(&self) -> Option<&[Vec<usize>; 2]> {
        self.idxmap.as_ref()
    }

    /// Set per-hemisphere vertex permutations (or subsets) applied to all vertex-space results.
    pub fn set_idxmap(&mut self, idxmap: Option<[Vec<usize>; 2]>) -> Result<()> {
        if let Some(maps) = &idxmap {
            for (map, size) in maps.iter().zip(self.hemisphere_sizes().iter()) {
                if let Some(&bad) = map.iter().find(|&&i| i >= *size) {
                    return Err(MapperError::InvalidVertexIndex(bad, *size));
                }
            }
        }
        self.idxmap = idxmap;
        Ok(())
    }

    /// Voxels touched by any vertex of either hemisphere.
    pub fn mask(&self) -> Array3<bool> {
        let left = self.operators[0].column_occupancy();
        let right = self.operators[1].column_occupancy();
        self.grid_mask(|i| left[i] || right[i])
    }

    /// Number of voxels in [`VolumeSurfaceMapper::mask`].
    pub fn num_masked(&self) -> usize {
        self.mask().iter().filter(|&&m| m).count()
    }

    /// Per-hemisphere voxel masks, computed like [`VolumeSurfaceMapper::mask`].
    pub fn hemimasks(&self) -> [Array3<bool>; 2] {
        let left = self.operators[0].column_occupancy();
        let right = self.operators[1].column_occupancy();
        [self.grid_mask(|i| left[i]), self.grid_mask(|i| right[i])]
    }

    fn grid_mask<F: Fn(usize) -> bool>(&self, occupied: F) -> Array3<bool> {
        let GridShape { ny, nx, .. } = self.shape;
        Array3::from_shape_fn(self.shape.dims(), |(z, y, x)| occupied((z * ny + y) * nx + x))
    }

    /// Project data onto the vertices of both hemispheres.
    ///
    /// If the last axis of `data` has one entry per vertex, the data already lives in vertex space
    /// and is only split into hemispheres. Otherwise it is volume data, given as a 3D volume, a 4D
    /// (frames, Z, Y, X) volume, or masked data of shape (voxels) or (frames, voxels) where the
    /// voxels are those of [`VolumeSurfaceMapper::mask`] in raveled order. Single-frame results
    /// have the frame axis dropped.
    pub fn forward(&self, data: &ArrayD<f64>) -> Result<[ArrayD<f64>; 2]> {
        if data.ndim() > 0 && data.shape()[data.ndim() - 1] == self.nverts {
            let axis = Axis(data.ndim() - 1);
            let llen = self.operators[0].nrows();
            let left = data.slice_axis(axis, Slice::from(..llen)).to_owned();
            let right = data.slice_axis(axis, Slice::from(llen..)).to_owned();
            return Ok(self.reindex([left, right]));
        }

        let view: ArrayViewD<f64> = if data.ndim() == 1 || data.ndim() == 3 {
            data.view().insert_axis(Axis(0))
        } else {
            data.view()
        };
        let frames = self.voxel_frames(view, data.shape())?;

        let left = self.operators[0].apply_frames(frames.view()).into_dyn();
        let right = self.operators[1].apply_frames(frames.view()).into_dyn();
        let [left, right] = self.reindex([left, right]);
        Ok([squeeze(left)?, squeeze(right)?])
    }

    /// Bring volume data into (frames, voxels) layout over the full grid.
    fn voxel_frames(&self, view: ArrayViewD<f64>, original: &[usize]) -> Result<Array2<f64>> {
        let nvox = self.shape.num_voxels();
        let mask = self.mask();
        let nmask = mask.iter().filter(|&&m| m).count();

        if view.ndim() == 2 && view.shape()[1] == nmask {
            let positions: Vec<usize> = mask.iter().enumerate().filter(|(_, &m)| m).map(|(i, _)| i).collect();
            let nframes = view.shape()[0];
            let mut dense = Array2::<f64>::zeros((nframes, nvox));
            for (f, frame) in view.outer_iter().enumerate() {
                for (&pos, &value) in positions.iter().zip(frame.iter()) {
                    dense[[f, pos]] = value;
                }
            }
            return Ok(dense);
        }

        if view.ndim() == 4 && view.shape()[1..].iter().product::<usize>() == nvox {
            let nframes = view.shape()[0];
            return Array2::from_shape_vec((nframes, nvox), view.iter().copied().collect())
                .map_err(|_| MapperError::ShapeMismatch(format!("(frames, {})", self.shape), original.to_vec()));
        }

        Err(MapperError::ShapeMismatch(
            format!("{} vertices, {} masked voxels, or a volume of shape {}", self.nverts, nmask, self.shape),
            original.to_vec(),
        ))
    }

    fn reindex(&self, hemis: [ArrayD<f64>; 2]) -> [ArrayD<f64>; 2] {
        match &self.idxmap {
            Some(maps) => {
                let [left, right] = hemis;
                let last = |a: &ArrayD<f64>| Axis(a.ndim().saturating_sub(1));
                [left.select(last(&left), &maps[0]), right.select(last(&right), &maps[1])]
            }
            None => hemis,
        }
    }

    /// Project vertex data back into the volume, one (Z, Y, X) volume per hemisphere.
    ///
    /// Values are weighted by the operator, so each voxel receives the weighted sum of the
    /// vertices projecting into it. Vertex indices select vertices with a value of one.
    pub fn backward(&self, verts: &VertexData) -> Result<[Array3<f64>; 2]> {
        let [nl, nr] = self.hemisphere_sizes();
        let (left, right) = match verts {
            VertexData::HemiValues(l, r) => {
                if l.len() != nl || r.len() != nr {
                    return Err(MapperError::ShapeMismatch(format!("hemisphere values of lengths ({}, {})", nl, nr), vec![l.len(), r.len()]));
                }
                (l.clone(), r.clone())
            }
            VertexData::HemiIndices(l, r) => (indicator(l, nl)?, indicator(r, nr)?),
            VertexData::Values(v) => {
                if v.len() != self.nverts {
                    return Err(MapperError::ShapeMismatch(format!("{} vertex values", self.nverts), vec![v.len()]));
                }
                (v.slice(s![..nl]).to_owned(), v.slice(s![nl..]).to_owned())
            }
            VertexData::Indices(idx) => {
                check_indices(idx, self.nverts)?;
                let left: Array1<usize> = idx.iter().copied().filter(|&i| i < nl).collect();
                let right: Array1<usize> = idx.iter().copied().filter(|&i| i >= nl).map(|i| i - nl).collect();
                (indicator(&left, nl)?, indicator(&right, nr)?)
            }
        };

        let dims = self.shape.dims();
        let to_grid = |op: &CsrMatrix, values: &Array1<f64>| -> Result<Array3<f64>> {
            op.left_multiply(values.view())
                .into_shape(dims)
                .map_err(|_| MapperError::ShapeMismatch(format!("a volume of shape {}", self.shape), vec![op.ncols()]))
        };
        Ok([to_grid(&self.operators[0], &left)?, to_grid(&self.operators[1], &right)?])
    }
}

impl fmt::Display for VolumeSurfaceMapper {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{} mapper for ({}, {}) with {} vertices>", self.kernel, self.subject, self.xfm_name, self.nverts)
    }
}


fn build_operators<D: SurfaceDatabase + ?Sized>(db: &D, subject: &str, xfm_name: &str, kernel: &Kernel, shape: GridShape, parallel: bool) -> Result<(CsrMatrix, CsrMatrix)> {
    let (coord, _) = db.xfm(subject, xfm_name, XfmKind::VoxelCoordinate)?;
    let hemis = SurfaceSet::for_kernel(kernel).load(db, subject, &coord)?;
    if hemis.len() != 2 {
        return Err(MapperError::Database(format!("expected 2 hemispheres, got {}", hemis.len())));
    }
    let build = |h: &VoxelSpaceHemisphere| kernel.build_operator(&h.input(), shape);
    let (left, right) = if parallel {
        rayon::join(|| build(&hemis[0]), || build(&hemis[1]))
    } else {
        (build(&hemis[0]), build(&hemis[1]))
    };
    Ok((left?, right?))
}

fn check_indices(idx: &Array1<usize>, n: usize) -> Result<()> {
    match idx.max() {
        Ok(&max) if max >= n => Err(MapperError::InvalidVertexIndex(max, n)),
        _ => Ok(()),
    }
}

/// A 0/1 vector of length `n` marking the given indices.
fn indicator(idx: &Array1<usize>, n: usize) -> Result<Array1<f64>> {
    check_indices(idx, n)?;
    let mut out = Array1::<f64>::zeros(n);
    for &i in idx.iter() {
        out[i] = 1.0;
    }
    Ok(out)
}

/// Drop all axes of length one.
fn squeeze(a: ArrayD<f64>) -> Result<ArrayD<f64>> {
    let dims: Vec<usize> = a.shape().iter().copied().filter(|&d| d != 1).collect();
    ArrayD::from_shape_vec(IxDyn(&dims), a.iter().copied().collect()).map_err(|_| MapperError::ShapeMismatch(format!("{:?} without unit axes", dims), a.shape().to_vec()))
}
