//! A compressed sparse row (CSR) matrix holding the weights of a hemisphere operator.
//!
//! Rows correspond to surface vertices, columns to raveled voxel indices. The layout is the
//! usual one: the entries of row `r` are `data[indptr[r]..indptr[r + 1]]` at the columns in
//! `indices[indptr[r]..indptr[r + 1]]`. Column indices are sorted within each row and no
//! explicit zeros are stored.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{MapperError, Result};


#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    data: Vec<f64>,
    indices: Vec<usize>,
    indptr: Vec<usize>,
    shape: (usize, usize),
}

impl CsrMatrix {

    /// An all-zero matrix of the given shape.
    pub fn zeros(nrows: usize, ncols: usize) -> CsrMatrix {
        CsrMatrix {
            data: Vec::new(),
            indices: Vec::new(),
            indptr: vec![0; nrows + 1],
            shape: (nrows, ncols),
        }
    }

    /// Reassemble a matrix from its raw CSR arrays, checking that they are consistent.
    pub fn from_parts(data: Vec<f64>, indices: Vec<usize>, indptr: Vec<usize>, shape: (usize, usize)) -> Result<CsrMatrix> {
        let (nrows, ncols) = shape;
        let expected = nrows.checked_add(1).ok_or_else(|| MapperError::InvalidCacheArchive(format!("row count {} is out of range", nrows)))?;
        if indptr.len() != expected {
            return Err(MapperError::InvalidCacheArchive(format!("row pointer array has length {}, expected {}", indptr.len(), expected)));
        }
        if data.len() != indices.len() {
            return Err(MapperError::InvalidCacheArchive(format!("{} values but {} column indices", data.len(), indices.len())));
        }
        if indptr[0] != 0 || indptr[nrows] != data.len() || indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(MapperError::InvalidCacheArchive(String::from("row pointers are not monotonic or do not span the values")));
        }
        if let Some(col) = indices.iter().find(|&&c| c >= ncols) {
            return Err(MapperError::InvalidCacheArchive(format!("column index {} out of range for {} columns", col, ncols)));
        }
        Ok(CsrMatrix { data, indices, indptr, shape })
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    /// The shape as (rows, columns), i.e., (vertices, voxels).
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn nrows(&self) -> usize {
        self.shape.0
    }

    pub fn ncols(&self) -> usize {
        self.shape.1
    }

    /// Number of stored (nonzero) entries.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// The (column, value) entries of a row.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.indptr[row]..self.indptr[row + 1];
        self.indices[range.clone()].iter().copied().zip(self.data[range].iter().copied())
    }

    /// The value at (row, col), zero if no entry is stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let range = self.indptr[row]..self.indptr[row + 1];
        match self.indices[range.clone()].binary_search(&col) {
            Ok(pos) => self.data[range.start + pos],
            Err(_) => 0.0,
        }
    }

    /// Sum of each row's weights.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.nrows()).map(|r| self.row(r).map(|(_, v)| v).sum()).collect()
    }

    /// For each column, whether any row stores a nonzero weight in it.
    pub fn column_occupancy(&self) -> Vec<bool> {
        let mut occupied = vec![false; self.ncols()];
        for (&col, &value) in self.indices.iter().zip(self.data.iter()) {
            if value != 0.0 {
                occupied[col] = true;
            }
        }
        occupied
    }

    /// Apply the operator to every frame of voxel data.
    ///
    /// `frames` has shape (frames, columns); the result has shape (frames, rows), i.e., it is
    /// the transpose of `A · framesᵀ`.
    pub fn apply_frames(&self, frames: ArrayView2<f64>) -> Array2<f64> {
        let nframes = frames.nrows();
        let mut out = Array2::<f64>::zeros((nframes, self.nrows()));
        for f in 0..nframes {
            let frame = frames.row(f);
            for r in 0..self.nrows() {
                out[[f, r]] = self.row(r).map(|(c, v)| v * frame[c]).sum();
            }
        }
        out
    }

    /// Left-multiply the operator by a per-row vector: `vᵀ · A`, one value per column.
    pub fn left_multiply(&self, values: ArrayView1<f64>) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.ncols());
        for r in 0..self.nrows() {
            let weight = values[r];
            if weight == 0.0 {
                continue;
            }
            for (c, v) in self.row(r) {
                out[c] += weight * v;
            }
        }
        out
    }
}


/// Builds a [`CsrMatrix`] one row at a time.
///
/// Entries pushed for a row may come in any order and may repeat a column: they are sorted,
/// duplicate columns are summed, and entries that end up zero are dropped.
#[derive(Debug, Clone)]
pub struct CsrBuilder {
    ncols: usize,
    data: Vec<f64>,
    indices: Vec<usize>,
    indptr: Vec<usize>,
}

impl CsrBuilder {

    pub fn new(ncols: usize) -> CsrBuilder {
        CsrBuilder {
            ncols,
            data: Vec::new(),
            indices: Vec::new(),
            indptr: vec![0],
        }
    }

    /// Number of rows pushed so far.
    pub fn nrows(&self) -> usize {
        self.indptr.len() - 1
    }

    /// Append a row without entries.
    pub fn push_empty_row(&mut self) {
        self.indptr.push(self.data.len());
    }

    /// Append a row. Columns must be below the column count of the builder.
    pub fn push_row<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut entries: Vec<(usize, f64)> = entries.into_iter().collect();
        entries.sort_by_key(|&(col, _)| col);

        let mut pending: Option<(usize, f64)> = None;
        for (col, value) in entries {
            debug_assert!(col < self.ncols, "column {} out of range", col);
            pending = match pending {
                Some((pcol, pval)) if pcol == col => Some((pcol, pval + value)),
                Some(done) => {
                    self.push_entry(done);
                    Some((col, value))
                }
                None => Some((col, value)),
            };
        }
        if let Some(done) = pending {
            self.push_entry(done);
        }
        self.indptr.push(self.data.len());
    }

    fn push_entry(&mut self, (col, value): (usize, f64)) {
        if value != 0.0 {
            self.indices.push(col);
            self.data.push(value);
        }
    }

    pub fn finish(self) -> CsrMatrix {
        let nrows = self.indptr.len() - 1;
        CsrMatrix {
            data: self.data,
            indices: self.indices,
            indptr: self.indptr,
            shape: (nrows, self.ncols),
        }
    }
}


/// Scale a row so that its weights sum to one. A row with zero total weight is cleared
/// instead, so no non-finite values are produced.
pub fn normalize_row(entries: &mut Vec<(usize, f64)>) -> bool {
    let total: f64 = entries.iter().map(|&(_, v)| v).sum();
    if total == 0.0 || !total.is_finite() {
        entries.clear();
        return false;
    }
    for entry in entries.iter_mut() {
        entry.1 /= total;
    }
    true
}
