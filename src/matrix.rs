//! Rank-2 dense buffer and the linear algebra the trainers need.
//!
//! Storage is row-major: element `(r, c)` lives at `r * cols + c`. Samples are rows and
//! features are columns throughout the crate.

use std::ops::{Index, IndexMut, Range};

use rand::Rng;
use rand::distributions::Uniform;
use rand_distr::StandardNormal;

use crate::matmul::gemm;
use crate::{DenseBuffer, Error, Real, Result, Vector};

/// Pivots smaller than this (relative to the largest entry) are treated as zero.
const SINGULAR_TOLERANCE: Real = 1e-12;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<Real>,
}

impl Matrix {
    /// A zero matrix of shape `(rows, cols)`.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn filled(rows: usize, cols: usize, value: Real) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub(crate) fn from_vec(rows: usize, cols: usize, data: Vec<Real>) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self { rows, cols, data }
    }

    /// Build a matrix from per-row vectors.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<Real>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::InvalidData(format!(
                    "row {i} has len {}, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn identity(n: usize) -> Self {
        let mut out = Self::new(n, n);
        for i in 0..n {
            out[(i, i)] = 1.0;
        }
        out
    }

    /// Draw every element from `U[low, high)`.
    pub fn random_uniform<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        low: Real,
        high: Real,
        rng: &mut R,
    ) -> Self {
        let dist = Uniform::new(low, high);
        let data = (0..rows * cols).map(|_| rng.sample(dist)).collect();
        Self { rows, cols, data }
    }

    /// Standard-normal noise, used as generator input.
    pub fn gaussian_noise<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Self {
        let data = (0..rows * cols)
            .map(|_| rng.sample::<Real, _>(StandardNormal))
            .collect();
        Self { rows, cols, data }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns the `r`-th row (shape: `(cols,)`).
    ///
    /// Panics if `r >= rows`.
    #[inline]
    pub fn row(&self, r: usize) -> &[Real] {
        let start = r * self.cols;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [Real] {
        let start = r * self.cols;
        &mut self.data[start..start + self.cols]
    }

    pub fn row_vector(&self, r: usize) -> Vector {
        Vector::from(self.row(r))
    }

    pub fn column(&self, c: usize) -> Vector {
        (0..self.rows).map(|r| self[(r, c)]).collect()
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[Real]> + '_ {
        (0..self.rows).map(move |r| self.row(r))
    }

    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::new(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out[(c, r)] = self[(r, c)];
            }
        }
        out
    }

    /// `self · other`.
    pub fn matmul(&self, other: &Matrix) -> Result<Matrix> {
        let mut out = Matrix::default();
        self.matmul_into(other, &mut out)?;
        Ok(out)
    }

    /// `self · other` written into `out`, which is resized when needed.
    pub fn matmul_into(&self, other: &Matrix, out: &mut Matrix) -> Result<()> {
        if self.cols != other.rows {
            return Err(Error::shape("matmul", self.shape(), other.shape()));
        }
        out.resize((self.rows, other.cols));
        out.fill(0.0);
        if self.rows == 0 || other.cols == 0 || self.cols == 0 {
            return Ok(());
        }
        gemm(
            self.rows,
            other.cols,
            self.cols,
            1.0,
            &self.data,
            self.cols,
            1,
            &other.data,
            other.cols,
            1,
            0.0,
            &mut out.data,
            other.cols,
            1,
        );
        Ok(())
    }

    /// `selfᵗ · other` without materializing the transpose.
    pub fn transpose_matmul(&self, other: &Matrix) -> Result<Matrix> {
        if self.rows != other.rows {
            return Err(Error::shape(
                "transpose_matmul",
                self.shape(),
                other.shape(),
            ));
        }
        let mut out = Matrix::new(self.cols, other.cols);
        if self.cols == 0 || other.cols == 0 || self.rows == 0 {
            return Ok(out);
        }
        gemm(
            self.cols,
            other.cols,
            self.rows,
            1.0,
            &self.data,
            1,
            self.cols,
            &other.data,
            other.cols,
            1,
            0.0,
            &mut out.data,
            other.cols,
            1,
        );
        Ok(out)
    }

    /// `self · otherᵗ` without materializing the transpose.
    pub fn matmul_transpose(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.cols {
            return Err(Error::shape(
                "matmul_transpose",
                self.shape(),
                other.shape(),
            ));
        }
        let mut out = Matrix::new(self.rows, other.rows);
        if self.rows == 0 || other.rows == 0 || self.cols == 0 {
            return Ok(out);
        }
        gemm(
            self.rows,
            other.rows,
            self.cols,
            1.0,
            &self.data,
            self.cols,
            1,
            &other.data,
            1,
            other.cols,
            0.0,
            &mut out.data,
            other.rows,
            1,
        );
        Ok(out)
    }

    /// `self · v`, shape `(rows,)`.
    pub fn mat_vec(&self, v: &Vector) -> Result<Vector> {
        if self.cols != v.len() {
            return Err(Error::shape("mat_vec", self.shape(), v.len()));
        }
        Ok(self
            .iter_rows()
            .map(|row| crate::vector::dot(row, v.as_slice()))
            .collect())
    }

    /// `selfᵗ · v`, shape `(cols,)`.
    pub fn transpose_mat_vec(&self, v: &Vector) -> Result<Vector> {
        if self.rows != v.len() {
            return Err(Error::shape("transpose_mat_vec", self.shape(), v.len()));
        }
        let mut out = Vector::new(self.cols);
        for (row, &s) in self.iter_rows().zip(v.iter()) {
            for (o, &x) in out.as_mut_slice().iter_mut().zip(row) {
                *o = x.mul_add(s, *o);
            }
        }
        Ok(out)
    }

    /// Add `v` to every row (bias broadcast).
    pub fn add_row_vector(&mut self, v: &Vector) -> Result<()> {
        if self.cols != v.len() {
            return Err(Error::shape("add_row_vector", self.shape(), v.len()));
        }
        for r in 0..self.rows {
            for (x, &b) in self.row_mut(r).iter_mut().zip(v.iter()) {
                *x += b;
            }
        }
        Ok(())
    }

    /// Subtract `v` from every row.
    pub fn sub_row_vector(&mut self, v: &Vector) -> Result<()> {
        if self.cols != v.len() {
            return Err(Error::shape("sub_row_vector", self.shape(), v.len()));
        }
        for r in 0..self.rows {
            for (x, &b) in self.row_mut(r).iter_mut().zip(v.iter()) {
                *x -= b;
            }
        }
        Ok(())
    }

    pub fn column_sums(&self) -> Vector {
        let mut out = Vector::new(self.cols);
        for row in self.iter_rows() {
            for (o, &x) in out.as_mut_slice().iter_mut().zip(row) {
                *o += x;
            }
        }
        out
    }

    /// Per-column mean; zeros for a matrix without rows.
    pub fn column_means(&self) -> Vector {
        let mut out = self.column_sums();
        if self.rows > 0 {
            out.scalar_multiply(1.0 / self.rows as Real);
        }
        out
    }

    /// Row-wise concatenation: the rows of `self` followed by the rows of `other`.
    pub fn append_rows(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.cols {
            return Err(Error::shape("append_rows", self.shape(), other.shape()));
        }
        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Ok(Self {
            rows: self.rows + other.rows,
            cols: self.cols,
            data,
        })
    }

    /// Copy out the rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &r in indices {
            data.extend_from_slice(self.row(r));
        }
        Self {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }

    /// Copy out a contiguous block of rows.
    pub fn row_range(&self, range: Range<usize>) -> Matrix {
        let data = self.data[range.start * self.cols..range.end * self.cols].to_vec();
        Self {
            rows: range.len(),
            cols: self.cols,
            data,
        }
    }

    /// Determinant by partial-pivot elimination.
    pub fn determinant(&self) -> Result<Real> {
        if self.rows != self.cols {
            return Err(Error::shape("determinant", self.shape(), "square"));
        }
        let n = self.rows;
        let mut a = self.clone();
        let mut det = 1.0;
        for col in 0..n {
            let pivot = (col..n)
                .max_by(|&i, &j| a[(i, col)].abs().total_cmp(&a[(j, col)].abs()))
                .unwrap_or(col);
            if a[(pivot, col)] == 0.0 {
                return Ok(0.0);
            }
            if pivot != col {
                a.swap_rows(pivot, col);
                det = -det;
            }
            let p = a[(col, col)];
            det *= p;
            for r in col + 1..n {
                let factor = a[(r, col)] / p;
                for c in col..n {
                    let v = a[(col, c)];
                    a[(r, c)] -= factor * v;
                }
            }
        }
        Ok(det)
    }

    /// Inverse by Gauss-Jordan elimination with partial pivoting.
    ///
    /// Returns [`Error::SingularMatrix`] when a pivot vanishes.
    pub fn inverse(&self) -> Result<Matrix> {
        if self.rows != self.cols {
            return Err(Error::shape("inverse", self.shape(), "square"));
        }
        let n = self.rows;
        let scale = self
            .data
            .iter()
            .fold(0.0, |m: Real, v| m.max(v.abs()))
            .max(Real::MIN_POSITIVE);
        let mut a = self.clone();
        let mut inv = Matrix::identity(n);

        for col in 0..n {
            let pivot = (col..n)
                .max_by(|&i, &j| a[(i, col)].abs().total_cmp(&a[(j, col)].abs()))
                .unwrap_or(col);
            if a[(pivot, col)].abs() <= SINGULAR_TOLERANCE * scale {
                return Err(Error::SingularMatrix);
            }
            a.swap_rows(pivot, col);
            inv.swap_rows(pivot, col);

            let p = a[(col, col)];
            for c in 0..n {
                a[(col, c)] /= p;
                inv[(col, c)] /= p;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = a[(r, col)];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..n {
                    let av = a[(col, c)];
                    let iv = inv[(col, c)];
                    a[(r, c)] -= factor * av;
                    inv[(r, c)] -= factor * iv;
                }
            }
        }
        Ok(inv)
    }

    fn swap_rows(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        for c in 0..self.cols {
            self.data.swap(i * self.cols + c, j * self.cols + c);
        }
    }
}

impl DenseBuffer for Matrix {
    type Shape = (usize, usize);

    fn zeros((rows, cols): (usize, usize)) -> Self {
        Self::new(rows, cols)
    }

    fn from_flat((rows, cols): (usize, usize), data: Vec<Real>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::shape("from_flat", (rows, cols), data.len()));
        }
        Ok(Self { rows, cols, data })
    }

    #[inline]
    fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    fn as_slice(&self) -> &[Real] {
        &self.data
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [Real] {
        &mut self.data
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = Real;

    #[inline]
    fn index(&self, (r, c): (usize, usize)) -> &Real {
        debug_assert!(c < self.cols);
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline]
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut Real {
        debug_assert!(c < self.cols);
        &mut self.data[r * self.cols + c]
    }
}
