//! Persistent storage of hemisphere operator pairs.
//!
//! An archive holds the CSR arrays of the left and right hemisphere operators as 8 named fields
//! (`left_data`, `left_indices`, `left_indptr`, `left_shape` and the same for `right`). All
//! numbers are stored big-endian. Archives whose file name ends with ".gz" are GZip compressed.
//!
//! Concurrent rebuilds of the same archive by independent processes are not coordinated: the
//! last writer wins, and a reader racing a writer may see a truncated archive, which fails to
//! load and triggers a rebuild. Callers that need more must lock externally.

use byteordered::ByteOrdered;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{MapperError, Result};
use crate::sparse::CsrMatrix;
use crate::util::{is_gz_file, read_fixed_length_string};

pub const CACHE_MAGIC: [u8; 4] = *b"CSRA";
pub const CACHE_VERSION: u32 = 1;

const DTYPE_F64: u8 = 0;
const DTYPE_U64: u8 = 1;

const HEMISPHERES: [&str; 2] = ["left", "right"];


/// Whether an existing archive may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Missing,
    /// Older than the transform file.
    Stale,
    Forced,
}

/// Decide whether the archive at `cache_file` can be reused: it must exist, no rebuild must be
/// forced, and it must not be older than the transform file. A transform file whose
/// modification time cannot be read makes the archive stale.
pub fn cache_status(cache_file: &Path, xfm_file: &Path, force_recache: bool) -> CacheStatus {
    let cache_mtime = match fs::metadata(cache_file).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return CacheStatus::Missing,
    };
    if force_recache {
        return CacheStatus::Forced;
    }
    match fs::metadata(xfm_file).and_then(|m| m.modified()) {
        Ok(xfm_mtime) if cache_mtime >= xfm_mtime => CacheStatus::Fresh,
        _ => CacheStatus::Stale,
    }
}


#[derive(Debug, Clone, PartialEq)]
enum Field {
    F64(Vec<f64>),
    U64(Vec<u64>),
}

impl Field {

    fn from_usize(values: &[usize]) -> Field {
        Field::U64(values.iter().map(|&v| v as u64).collect())
    }
}


/// Write a hemisphere operator pair to `path`, replacing an existing archive.
pub fn save_operators<P: AsRef<Path>>(left: &CsrMatrix, right: &CsrMatrix, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let file = BufWriter::new(File::create(path)?);
    if is_gz_file(path) {
        let mut enc = GzEncoder::new(file, Compression::default());
        write_archive(&mut enc, left, right)?;
        enc.finish()?.flush()?;
    } else {
        let mut file = file;
        write_archive(&mut file, left, right)?;
        file.flush()?;
    }
    debug!("Saved operator cache {} ({} + {} nonzeros)", path.display(), left.nnz(), right.nnz());
    Ok(())
}

/// Read a hemisphere operator pair from `path`.
pub fn load_operators<P: AsRef<Path>>(path: P) -> Result<(CsrMatrix, CsrMatrix)> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    let (left, right) = if is_gz_file(path) {
        read_archive(GzDecoder::new(file))?
    } else {
        read_archive(file)?
    };
    debug!("Loaded operator cache {}", path.display());
    Ok((left, right))
}


fn write_archive<W: Write>(output: &mut W, left: &CsrMatrix, right: &CsrMatrix) -> Result<()> {
    {
        let mut out = ByteOrdered::be(&mut *output);
        for &b in CACHE_MAGIC.iter() {
            out.write_u8(b)?;
        }
        out.write_u32(CACHE_VERSION)?;
        out.write_u32(8)?;
    }
    for (prefix, op) in HEMISPHERES.iter().zip([left, right].iter()) {
        let (nrows, ncols) = op.shape();
        write_field(output, &format!("{}_data", prefix), &Field::F64(op.data().to_vec()))?;
        write_field(output, &format!("{}_indices", prefix), &Field::from_usize(op.indices()))?;
        write_field(output, &format!("{}_indptr", prefix), &Field::from_usize(op.indptr()))?;
        write_field(output, &format!("{}_shape", prefix), &Field::from_usize(&[nrows, ncols]))?;
    }
    Ok(())
}

fn write_field<W: Write>(output: &mut W, name: &str, field: &Field) -> Result<()> {
    let mut out = ByteOrdered::be(output);
    out.write_u16(name.len() as u16)?;
    for b in name.bytes() {
        out.write_u8(b)?;
    }
    match field {
        Field::F64(values) => {
            out.write_u8(DTYPE_F64)?;
            out.write_u64(values.len() as u64)?;
            for &v in values {
                out.write_f64(v)?;
            }
        }
        Field::U64(values) => {
            out.write_u8(DTYPE_U64)?;
            out.write_u64(values.len() as u64)?;
            for &v in values {
                out.write_u64(v)?;
            }
        }
    }
    Ok(())
}


fn read_archive<R: Read>(input: R) -> Result<(CsrMatrix, CsrMatrix)> {
    let mut input = ByteOrdered::be(input);

    let mut magic = [0u8; 4];
    for b in magic.iter_mut() {
        *b = input.read_u8()?;
    }
    if magic != CACHE_MAGIC {
        return Err(MapperError::InvalidCacheArchive(String::from("wrong magic bytes")));
    }
    let version = input.read_u32()?;
    if version != CACHE_VERSION {
        return Err(MapperError::InvalidCacheArchive(format!("unsupported format version {}", version)));
    }

    let num_fields = input.read_u32()?;
    let mut fields: HashMap<String, Field> = HashMap::new();
    for _ in 0..num_fields {
        let (name, field) = read_field(&mut input)?;
        fields.insert(name, field);
    }

    let left = operator_from_fields(&mut fields, HEMISPHERES[0])?;
    let right = operator_from_fields(&mut fields, HEMISPHERES[1])?;
    if left.ncols() != right.ncols() {
        return Err(MapperError::InvalidCacheArchive(format!("hemisphere operators have {} and {} columns", left.ncols(), right.ncols())));
    }
    Ok((left, right))
}

fn read_field<R: Read>(input: &mut R) -> Result<(String, Field)> {
    let mut input = ByteOrdered::be(input);
    let name_len = input.read_u16()? as usize;
    let name = read_fixed_length_string(&mut input, name_len)?;
    let dtype = input.read_u8()?;
    let len = input.read_u64()? as usize;
    // The length is untrusted, so do not preallocate all of it.
    let capacity = len.min(1 << 20);
    let field = match dtype {
        DTYPE_F64 => {
            let mut values = Vec::with_capacity(capacity);
            for _ in 0..len {
                values.push(input.read_f64()?);
            }
            Field::F64(values)
        }
        DTYPE_U64 => {
            let mut values = Vec::with_capacity(capacity);
            for _ in 0..len {
                values.push(input.read_u64()?);
            }
            Field::U64(values)
        }
        other => return Err(MapperError::InvalidCacheArchive(format!("field '{}' has unknown dtype {}", name, other))),
    };
    Ok((name, field))
}

fn take_field(fields: &mut HashMap<String, Field>, name: &str) -> Result<Field> {
    fields.remove(name).ok_or_else(|| MapperError::InvalidCacheArchive(format!("missing field '{}'", name)))
}

fn take_f64(fields: &mut HashMap<String, Field>, name: &str) -> Result<Vec<f64>> {
    match take_field(fields, name)? {
        Field::F64(values) => Ok(values),
        Field::U64(_) => Err(MapperError::InvalidCacheArchive(format!("field '{}' must hold floats", name))),
    }
}

fn take_usize(fields: &mut HashMap<String, Field>, name: &str) -> Result<Vec<usize>> {
    match take_field(fields, name)? {
        Field::U64(values) => Ok(values.into_iter().map(|v| v as usize).collect()),
        Field::F64(_) => Err(MapperError::InvalidCacheArchive(format!("field '{}' must hold integers", name))),
    }
}

fn operator_from_fields(fields: &mut HashMap<String, Field>, prefix: &str) -> Result<CsrMatrix> {
    let data = take_f64(fields, &format!("{}_data", prefix))?;
    let indices = take_usize(fields, &format!("{}_indices", prefix))?;
    let indptr = take_usize(fields, &format!("{}_indptr", prefix))?;
    let shape = take_usize(fields, &format!("{}_shape", prefix))?;
    if shape.len() != 2 {
        return Err(MapperError::InvalidCacheArchive(format!("field '{}_shape' has {} entries, expected 2", prefix, shape.len())));
    }
    CsrMatrix::from_parts(data, indices, indptr, (shape[0], shape[1]))
}
