//! Rank-1 dense buffer.

use std::ops::{Index, IndexMut};

use rand::Rng;
use rand::distributions::Uniform;

use crate::{DenseBuffer, Error, Matrix, Real, Result};

/// An owned, contiguous vector of [`Real`] values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vector {
    data: Vec<Real>,
}

impl Vector {
    /// A zero vector of length `len`.
    #[inline]
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    #[inline]
    pub fn filled(len: usize, value: Real) -> Self {
        Self {
            data: vec![value; len],
        }
    }

    #[inline]
    pub fn ones(len: usize) -> Self {
        Self::filled(len, 1.0)
    }

    /// Draw every element from `U[low, high)`.
    pub fn random_uniform<R: Rng + ?Sized>(len: usize, low: Real, high: Real, rng: &mut R) -> Self {
        let dist = Uniform::new(low, high);
        Self {
            data: (0..len).map(|_| rng.sample(dist)).collect(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Real> {
        self.data.iter()
    }

    pub fn push(&mut self, value: Real) {
        self.data.push(value);
    }

    pub fn into_vec(self) -> Vec<Real> {
        self.data
    }

    pub fn dot(&self, other: &Vector) -> Result<Real> {
        self.conformable(other, "dot")?;
        Ok(dot(&self.data, &other.data))
    }

    /// `self · otherᵗ`, shape `(self.len(), other.len())`.
    pub fn outer_product(&self, other: &Vector) -> Matrix {
        let mut out = Matrix::new(self.len(), other.len());
        for (i, &a) in self.data.iter().enumerate() {
            for (o, &b) in out.row_mut(i).iter_mut().zip(&other.data) {
                *o = a * b;
            }
        }
        out
    }

    /// Arithmetic mean; `0.0` for an empty vector.
    pub fn mean(&self) -> Real {
        if self.data.is_empty() {
            return 0.0;
        }
        self.sum() / self.data.len() as Real
    }

    pub fn max_value(&self) -> Real {
        self.data
            .iter()
            .copied()
            .fold(Real::NEG_INFINITY, Real::max)
    }

    pub fn min_value(&self) -> Real {
        self.data.iter().copied().fold(Real::INFINITY, Real::min)
    }

    /// Element-wise sign with `sign(0) == 0`.
    pub fn sign(&self) -> Vector {
        self.map(sign)
    }

    pub fn round(&self) -> Vector {
        self.map(Real::round)
    }

    /// Concatenate `other` after `self`.
    pub fn concat(&self, other: &Vector) -> Vector {
        let mut data = Vec::with_capacity(self.len() + other.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Self { data }
    }

    /// View as an `(len, 1)` column matrix.
    pub fn to_column(&self) -> Matrix {
        // Element counts always agree.
        Matrix::from_vec(self.len(), 1, self.data.clone())
    }
}

impl DenseBuffer for Vector {
    type Shape = usize;

    fn zeros(shape: usize) -> Self {
        Self::new(shape)
    }

    fn from_flat(shape: usize, data: Vec<Real>) -> Result<Self> {
        if data.len() != shape {
            return Err(Error::shape("from_flat", shape, data.len()));
        }
        Ok(Self { data })
    }

    #[inline]
    fn shape(&self) -> usize {
        self.data.len()
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

impl From<Vec<Real>> for Vector {
    fn from(data: Vec<Real>) -> Self {
        Self { data }
    }
}

impl From<&[Real]> for Vector {
    fn from(data: &[Real]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }
}

impl FromIterator<Real> for Vector {
    fn from_iter<I: IntoIterator<Item = Real>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

impl Index<usize> for Vector {
    type Output = Real;

    #[inline]
    fn index(&self, idx: usize) -> &Real {
        &self.data[idx]
    }
}

impl IndexMut<usize> for Vector {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut Real {
        &mut self.data[idx]
    }
}

#[inline]
pub(crate) fn dot(a: &[Real], b: &[Real]) -> Real {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).fold(0.0, |acc, (&x, &y)| x.mul_add(y, acc))
}

#[inline]
pub(crate) fn sign(v: Real) -> Real {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}
