//! Rank-3 dense buffer, indexed `(slice, row, col)`.

use std::ops::{Index, IndexMut};

use crate::{DenseBuffer, Error, Matrix, Real, Result};

/// A stack of equally shaped matrices stored contiguously.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tensor3 {
    depth: usize,
    rows: usize,
    cols: usize,
    data: Vec<Real>,
}

impl Tensor3 {
    pub fn new(depth: usize, rows: usize, cols: usize) -> Self {
        Self {
            depth,
            rows,
            cols,
            data: vec![0.0; depth * rows * cols],
        }
    }

    /// Stack matrices along the first axis. All slices must share one shape.
    pub fn from_slices(slices: &[Matrix]) -> Result<Self> {
        let mut out = match slices.first() {
            Some(first) => Self {
                depth: 0,
                rows: first.rows(),
                cols: first.cols(),
                data: Vec::with_capacity(slices.len() * first.len()),
            },
            None => return Ok(Self::default()),
        };
        for slice in slices {
            out.push_slice(slice)?;
        }
        Ok(out)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    fn slice_len(&self) -> usize {
        self.rows * self.cols
    }

    /// Copy out slice `d` as a matrix.
    ///
    /// Panics if `d >= depth`.
    pub fn slice(&self, d: usize) -> Matrix {
        let start = d * self.slice_len();
        Matrix::from_vec(
            self.rows,
            self.cols,
            self.data[start..start + self.slice_len()].to_vec(),
        )
    }

    pub fn set_slice(&mut self, d: usize, m: &Matrix) -> Result<()> {
        if m.shape() != (self.rows, self.cols) {
            return Err(Error::shape("set_slice", (self.rows, self.cols), m.shape()));
        }
        if d >= self.depth {
            return Err(Error::InvalidData(format!(
                "slice index {d} out of range for depth {}",
                self.depth
            )));
        }
        let len = self.slice_len();
        let start = d * len;
        self.data[start..start + len].copy_from_slice(m.as_slice());
        Ok(())
    }

    /// Append a slice; an empty tensor adopts the slice's shape.
    pub fn push_slice(&mut self, m: &Matrix) -> Result<()> {
        if self.depth == 0 {
            self.rows = m.rows();
            self.cols = m.cols();
        } else if m.shape() != (self.rows, self.cols) {
            return Err(Error::shape(
                "push_slice",
                (self.rows, self.cols),
                m.shape(),
            ));
        }
        self.data.extend_from_slice(m.as_slice());
        self.depth += 1;
        Ok(())
    }

    pub fn iter_slices(&self) -> impl Iterator<Item = Matrix> + '_ {
        (0..self.depth).map(move |d| self.slice(d))
    }
}

impl DenseBuffer for Tensor3 {
    type Shape = (usize, usize, usize);

    fn zeros((depth, rows, cols): (usize, usize, usize)) -> Self {
        Self::new(depth, rows, cols)
    }

    fn from_flat(shape: (usize, usize, usize), data: Vec<Real>) -> Result<Self> {
        let (depth, rows, cols) = shape;
        if data.len() != depth * rows * cols {
            return Err(Error::shape("from_flat", shape, data.len()));
        }
        Ok(Self {
            depth,
            rows,
            cols,
            data,
        })
    }

    #[inline]
    fn shape(&self) -> (usize, usize, usize) {
        (self.depth, self.rows, self.cols)
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

impl Index<(usize, usize, usize)> for Tensor3 {
    type Output = Real;

    #[inline]
    fn index(&self, (d, r, c): (usize, usize, usize)) -> &Real {
        debug_assert!(r < self.rows && c < self.cols);
        &self.data[d * self.slice_len() + r * self.cols + c]
    }
}

impl IndexMut<(usize, usize, usize)> for Tensor3 {
    #[inline]
    fn index_mut(&mut self, (d, r, c): (usize, usize, usize)) -> &mut Real {
        debug_assert!(r < self.rows && c < self.cols);
        let idx = d * self.slice_len() + r * self.cols + c;
        &mut self.data[idx]
    }
}
