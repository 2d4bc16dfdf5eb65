//! Utility functions used in all other cortexmap modules.

use std::fmt;
use std::io::Read;
use std::path::Path;

use byteordered::byteorder::ReadBytesExt;

use crate::error::{MapperError, Result};

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}


/// Read a fixed length byte string of the given length from the input. Embedded '\0' chars are allowed, but not added to the returned String.
pub fn read_fixed_length_string<S>(input: &mut S, len: usize) -> Result<String>
where
    S: Read,
{
    let mut info_line = String::with_capacity(len);
    for _  in 0..len   {
        let cur_char = input.read_u8()? as char;
        if cur_char != '\0'  {
            info_line.push(cur_char);
        }
    }
    Ok(info_line)
}


/// Round to the nearest integer, rounding exact halves up (towards positive infinity).
///
/// This differs from both `f64::round` (halves away from zero) and banker's rounding.
pub fn round_half_up(value: f64) -> f64 {
    let floor = value.floor();
    if value - floor == 0.5 {
        value.ceil()
    } else {
        value.round()
    }
}


/// The shape of a voxel grid in (Z, Y, X) order, i.e., reversed with respect to the
/// native scanner axis order of the volume file.
///
/// Surface coordinates in voxel space are given as (x, y, z), so the ravel index of the
/// voxel at (x, y, z) is `(z * ny + y) * nx + x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridShape {
    pub nz: usize,
    pub ny: usize,
    pub nx: usize,
}

impl GridShape {

    pub fn new(nz: usize, ny: usize, nx: usize) -> GridShape {
        GridShape { nz, ny, nx }
    }

    /// Build a grid shape from the native (X, Y, Z, ...) volume shape. Extra trailing
    /// dimensions, like the frame count of a 4D volume, are ignored.
    pub fn from_native(native: &[usize]) -> Result<GridShape> {
        if native.len() < 3 {
            return Err(MapperError::ShapeMismatch(String::from("a volume with at least 3 dimensions"), native.to_vec()));
        }
        Ok(GridShape::new(native[2], native[1], native[0]))
    }

    /// The shape as a (Z, Y, X) tuple, suitable for `ndarray` constructors.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.nz, self.ny, self.nx)
    }

    /// Total number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.nz * self.ny * self.nx
    }

    /// Ravel index of the voxel at integer coordinates (x, y, z), or `None` if it lies outside the grid.
    pub fn ravel(&self, x: i64, y: i64, z: i64) -> Option<usize> {
        let inside = |v: i64, n: usize| v >= 0 && (v as usize) < n;
        if inside(x, self.nx) && inside(y, self.ny) && inside(z, self.nz) {
            Some((z as usize * self.ny + y as usize) * self.nx + x as usize)
        } else {
            None
        }
    }

    /// Ravel index of (x, y, z) after clipping each coordinate into the grid.
    pub fn ravel_clipped(&self, x: i64, y: i64, z: i64) -> usize {
        let clip = |v: i64, n: usize| v.max(0).min(n as i64 - 1) as usize;
        (clip(z, self.nz) * self.ny + clip(y, self.ny)) * self.nx + clip(x, self.nx)
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.nz, self.ny, self.nx)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn halves_are_rounded_up() {
        assert_eq!(3.0, round_half_up(2.5));
        assert_eq!(4.0, round_half_up(3.5));
        assert_eq!(-1.0, round_half_up(-1.5));
        assert_eq!(2.0, round_half_up(2.49));
        assert_eq!(-2.0, round_half_up(-1.51));
    }

    #[test]
    fn ravel_uses_reversed_axis_order() {
        let shape = GridShape::new(10, 10, 10);
        assert_eq!(Some(4 * 100 + 3 * 10 + 2), shape.ravel(2, 3, 4));
        assert_eq!(None, shape.ravel(10, 0, 0));
        assert_eq!(None, shape.ravel(0, -1, 0));

        let shape = GridShape::new(2, 3, 4);
        assert_eq!(Some(23), shape.ravel(3, 2, 1));
        assert_eq!(24, shape.num_voxels());
    }

    #[test]
    fn ravel_clipped_clamps_into_the_grid() {
        let shape = GridShape::new(2, 3, 4);
        assert_eq!(shape.ravel_clipped(3, 2, 1), shape.ravel_clipped(7, 9, 5));
        assert_eq!(0, shape.ravel_clipped(-3, -1, -8));
    }

    #[test]
    fn native_shape_is_reversed() {
        let shape = GridShape::from_native(&[64, 48, 32, 200]).unwrap();
        assert_eq!((32, 48, 64), shape.dims());
        assert!(GridShape::from_native(&[64, 48]).is_err());
    }

    #[test]
    fn fixed_length_strings_skip_zero_bytes() {
        let mut input: &[u8] = b"left\0_data\0rest";
        assert_eq!("left_data", read_fixed_length_string(&mut input, 11).unwrap());
        assert!(read_fixed_length_string(&mut input, 10).is_err());
    }

    #[test]
    fn gz_files_are_recognized() {
        assert!(is_gz_file("cache/projection.csr.gz"));
        assert!(!is_gz_file("cache/projection.csr"));
    }
}
