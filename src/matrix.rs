use std::ops::Index;

use crate::{Result, ShortVec, TransformError};

/// Pivots smaller than this, relative to the largest absolute entry,
/// are treated as zero during inversion.
const SINGULAR_EPSILON: f64 = 1e-12;

/// A small dense matrix, used for the linear part of affine transforms
/// and for derivatives.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// Row-major / C-ordered matrix data.
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl AsRef<Matrix> for Matrix {
    fn as_ref(&self) -> &Matrix {
        self
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        self.get(index.0, index.1)
            .expect("index should be in bounds")
    }
}

impl Matrix {
    pub fn builder(row_vecs: bool) -> MatrixBuilder {
        MatrixBuilder::new(row_vecs)
    }

    /// Row-major/ C order data
    pub fn try_new(data: Vec<f64>, ncols: usize) -> Result<Self> {
        if ncols == 0 {
            if data.is_empty() {
                return Ok(Self { data, nrows: 0, ncols: 0 });
            }
            return Err(TransformError::InvalidParameter(
                "Matrix: non-empty data with zero columns".into(),
            ));
        }
        if !data.len().is_multiple_of(ncols) {
            return Err(TransformError::InvalidParameter(format!(
                "Matrix data length {} is not divisible by ncols {}",
                data.len(),
                ncols
            )));
        }
        if data.iter().any(|d| !d.is_finite()) {
            return Err(TransformError::InvalidParameter(
                "Matrix: data must be finite".into(),
            ));
        }
        let nrows = data.len() / ncols;
        Ok(Self { data, nrows, ncols })
    }

    pub fn try_new_colmaj(data: Vec<f64>, nrows: usize) -> Result<Self> {
        if nrows == 0 || !data.len().is_multiple_of(nrows) {
            return Err(TransformError::InvalidParameter(format!(
                "Matrix data length {} is not divisible by nrows {}",
                data.len(),
                nrows
            )));
        }
        // column vectors laid end to end are the rows of the transpose
        Ok(Self::try_new(data, nrows)?.transpose())
    }

    pub fn identity(ndim: usize) -> Self {
        let mut data = vec![0.0; ndim * ndim];
        for idx in 0..ndim {
            data[idx * ndim + idx] = 1.0;
        }
        Self {
            data,
            nrows: ndim,
            ncols: ndim,
        }
    }

    /// Build a square matrix from its rows.
    pub(crate) fn from_rows<const N: usize>(rows: [[f64; N]; N]) -> Self {
        Self {
            data: rows.iter().flatten().copied().collect(),
            nrows: N,
            ncols: N,
        }
    }

    pub fn transpose(&self) -> Matrix {
        let mut data = vec![0.0; self.data.len()];
        for r in 0..self.nrows {
            for c in 0..self.ncols {
                data[c * self.nrows + r] = self[(r, c)];
            }
        }
        Matrix {
            data,
            nrows: self.ncols,
            ncols: self.nrows,
        }
    }

    pub fn matmul(&self, coord: &[f64]) -> ShortVec<f64> {
        let mut result = smallvec::smallvec![f64::NAN; self.nrows];
        self.matmul_into(coord, &mut result);
        result
    }

    pub fn matmul_into(&self, coord: &[f64], buf: &mut [f64]) {
        buf.fill(0.0);
        for (idx, d) in self.data.iter().enumerate() {
            let r = idx / self.ncols;
            let c = idx % self.ncols;
            buf[r] += d * coord[c];
        }
    }

    /// N.B. Coordinate "columns" are the _rows_ of the input and output matrices.
    pub fn matmul_transposed_into(&self, coord_cols: &[&[f64]], buf: &mut [&mut [f64]]) {
        for (out_dim_idx, buf_col) in buf.iter_mut().enumerate() {
            buf_col.fill(0.0);
            let row_start = out_dim_idx * self.ncols;
            let row = &self.data[row_start..(row_start + self.ncols)];
            for (mat_val, coord_col) in row.iter().zip(coord_cols.iter()) {
                // our hottest loop is iterating over long arrays in lock step
                for (c, b) in coord_col.iter().zip(buf_col.iter_mut()) {
                    *b += c * mat_val;
                }
            }
        }
    }

    /// Matrix product `self * other`.
    pub fn dot(&self, other: &Matrix) -> Result<Matrix> {
        if self.ncols != other.nrows {
            return Err(TransformError::DimensionMismatch {
                expected: self.ncols,
                actual: other.nrows,
            });
        }
        let mut data = vec![0.0; self.nrows * other.ncols];
        for r in 0..self.nrows {
            for k in 0..self.ncols {
                let a = self[(r, k)];
                for c in 0..other.ncols {
                    data[r * other.ncols + c] += a * other[(k, c)];
                }
            }
        }
        Ok(Matrix {
            data,
            nrows: self.nrows,
            ncols: other.ncols,
        })
    }

    /// Invert a square matrix by Gauss-Jordan elimination with partial pivoting.
    pub fn try_inverse(&self) -> Result<Matrix> {
        if self.nrows != self.ncols {
            return Err(TransformError::NonInvertible(format!(
                "{}x{} matrix is not square",
                self.nrows, self.ncols
            )));
        }
        let n = self.nrows;
        let max_abs = self.data.iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
        if max_abs == 0.0 {
            return Err(TransformError::NonInvertible("matrix is zero".into()));
        }
        let tolerance = SINGULAR_EPSILON * max_abs;
        let mut work = self.data.clone();
        let mut inv = Matrix::identity(n).data;

        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|a, b| work[a * n + col].abs().total_cmp(&work[b * n + col].abs()))
                .unwrap_or(col);
            let pivot = work[pivot_row * n + col];
            if pivot.abs() < tolerance {
                return Err(TransformError::NonInvertible("matrix is singular".into()));
            }
            if pivot_row != col {
                for c in 0..n {
                    work.swap(pivot_row * n + c, col * n + c);
                    inv.swap(pivot_row * n + c, col * n + c);
                }
            }
            for c in 0..n {
                work[col * n + c] /= pivot;
                inv[col * n + c] /= pivot;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = work[r * n + col];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..n {
                    work[r * n + c] -= factor * work[col * n + c];
                    inv[r * n + c] -= factor * inv[col * n + c];
                }
            }
        }

        Ok(Matrix {
            data: inv,
            nrows: n,
            ncols: n,
        })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&f64> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        self.data.get(row * self.ncols + col)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_identity(&self) -> bool {
        if self.nrows != self.ncols {
            return false;
        }
        self.data.iter().enumerate().all(|(idx, d)| {
            let expected = if idx / self.ncols == idx % self.ncols {
                1.0
            } else {
                0.0
            };
            *d == expected
        })
    }
}

#[derive(Debug, Clone)]
pub struct MatrixBuilder {
    row_vecs: bool,
    dim_len: Option<usize>,
    data: Vec<f64>,
}

impl MatrixBuilder {
    fn new(row_vecs: bool) -> Self {
        Self {
            row_vecs,
            dim_len: None,
            data: Default::default(),
        }
    }

    pub fn add_vec(&mut self, vec: &[f64]) -> Result<&mut Self> {
        if let Some(len) = self.dim_len {
            if len != vec.len() {
                return Err(TransformError::DimensionMismatch {
                    expected: len,
                    actual: vec.len(),
                });
            }
        } else {
            self.dim_len = Some(vec.len());
        }
        self.data.extend_from_slice(vec);
        Ok(self)
    }

    pub fn build(self) -> Result<Matrix> {
        let dim_len = self.dim_len.unwrap_or(0);
        if self.row_vecs {
            Matrix::try_new(self.data, dim_len)
        } else {
            Matrix::try_new_colmaj(self.data, dim_len)
        }
    }
}
