//! Element-wise arithmetic shared by [`Vector`], [`Matrix`](crate::Matrix) and
//! [`Tensor3`](crate::Tensor3).
//!
//! Every operation is offered in three calling conventions:
//!
//! - `op(&mut self, ..)` mutates the receiver in place.
//! - `op_new(&self, ..)` returns a fresh buffer and leaves the operands untouched.
//! - `op_into(&self, .., out)` writes into a caller-supplied buffer, resizing it first
//!   when its shape differs.
//!
//! Binary operations require both operands to have the same shape and report
//! [`Error::ShapeMismatch`] otherwise. Nothing is truncated or padded.

use std::fmt::Debug;

use crate::{Error, Real, Result, Vector};

/// A dense, row-major buffer of [`Real`] values with a fixed rank.
pub trait DenseBuffer: Clone + Sized {
    /// Extents along each axis.
    type Shape: Copy + PartialEq + Debug;

    /// A zero-filled buffer of `shape`.
    fn zeros(shape: Self::Shape) -> Self;

    /// Rebuild a buffer from its row-major elements.
    ///
    /// Fails if `data.len()` is not the element count of `shape`.
    fn from_flat(shape: Self::Shape, data: Vec<Real>) -> Result<Self>;

    fn shape(&self) -> Self::Shape;

    fn as_slice(&self) -> &[Real];

    fn as_mut_slice(&mut self) -> &mut [Real];

    #[inline]
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fill(&mut self, value: Real) {
        self.as_mut_slice().fill(value);
    }

    /// Reallocate to `shape`.
    ///
    /// Contents are kept when the shape is unchanged and zeroed otherwise.
    fn resize(&mut self, shape: Self::Shape) {
        if self.shape() != shape {
            *self = Self::zeros(shape);
        }
    }

    /// Row-major linearization. Inverse of [`DenseBuffer::from_flat`].
    fn flatten(&self) -> Vector {
        Vector::from(self.as_slice().to_vec())
    }

    fn sum(&self) -> Real {
        self.as_slice().iter().sum()
    }

    fn map_in_place(&mut self, f: impl Fn(Real) -> Real) {
        for v in self.as_mut_slice() {
            *v = f(*v);
        }
    }

    fn map(&self, f: impl Fn(Real) -> Real) -> Self {
        let mut out = self.clone();
        out.map_in_place(f);
        out
    }

    fn map_into(&self, out: &mut Self, f: impl Fn(Real) -> Real) {
        out.resize(self.shape());
        for (o, &v) in out.as_mut_slice().iter_mut().zip(self.as_slice()) {
            *o = f(v);
        }
    }

    /// Shape check used by every binary operation.
    fn conformable(&self, other: &Self, op: &'static str) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(Error::shape(op, self.shape(), other.shape()));
        }
        Ok(())
    }

    fn zip_in_place(
        &mut self,
        other: &Self,
        op: &'static str,
        f: impl Fn(Real, Real) -> Real,
    ) -> Result<()> {
        self.conformable(other, op)?;
        for (a, &b) in self.as_mut_slice().iter_mut().zip(other.as_slice()) {
            *a = f(*a, b);
        }
        Ok(())
    }

    fn zip_new(
        &self,
        other: &Self,
        op: &'static str,
        f: impl Fn(Real, Real) -> Real,
    ) -> Result<Self> {
        let mut out = self.clone();
        out.zip_in_place(other, op, f)?;
        Ok(out)
    }

    fn zip_into(
        &self,
        other: &Self,
        out: &mut Self,
        op: &'static str,
        f: impl Fn(Real, Real) -> Real,
    ) -> Result<()> {
        self.conformable(other, op)?;
        out.resize(self.shape());
        for ((o, &a), &b) in out
            .as_mut_slice()
            .iter_mut()
            .zip(self.as_slice())
            .zip(other.as_slice())
        {
            *o = f(a, b);
        }
        Ok(())
    }

    fn add(&mut self, other: &Self) -> Result<()> {
        self.zip_in_place(other, "add", |a, b| a + b)
    }

    fn add_new(&self, other: &Self) -> Result<Self> {
        self.zip_new(other, "add", |a, b| a + b)
    }

    fn add_into(&self, other: &Self, out: &mut Self) -> Result<()> {
        self.zip_into(other, out, "add", |a, b| a + b)
    }

    fn sub(&mut self, other: &Self) -> Result<()> {
        self.zip_in_place(other, "sub", |a, b| a - b)
    }

    fn sub_new(&self, other: &Self) -> Result<Self> {
        self.zip_new(other, "sub", |a, b| a - b)
    }

    fn sub_into(&self, other: &Self, out: &mut Self) -> Result<()> {
        self.zip_into(other, out, "sub", |a, b| a - b)
    }

    fn hadamard_product(&mut self, other: &Self) -> Result<()> {
        self.zip_in_place(other, "hadamard_product", |a, b| a * b)
    }

    fn hadamard_product_new(&self, other: &Self) -> Result<Self> {
        self.zip_new(other, "hadamard_product", |a, b| a * b)
    }

    fn hadamard_product_into(&self, other: &Self, out: &mut Self) -> Result<()> {
        self.zip_into(other, out, "hadamard_product", |a, b| a * b)
    }

    fn element_wise_division(&mut self, other: &Self) -> Result<()> {
        self.zip_in_place(other, "element_wise_division", |a, b| a / b)
    }

    fn element_wise_division_new(&self, other: &Self) -> Result<Self> {
        self.zip_new(other, "element_wise_division", |a, b| a / b)
    }

    fn element_wise_division_into(&self, other: &Self, out: &mut Self) -> Result<()> {
        self.zip_into(other, out, "element_wise_division", |a, b| a / b)
    }

    /// Element-wise maximum.
    fn max(&mut self, other: &Self) -> Result<()> {
        self.zip_in_place(other, "max", Real::max)
    }

    fn max_new(&self, other: &Self) -> Result<Self> {
        self.zip_new(other, "max", Real::max)
    }

    fn max_into(&self, other: &Self, out: &mut Self) -> Result<()> {
        self.zip_into(other, out, "max", Real::max)
    }

    fn sqrt(&mut self) {
        self.map_in_place(Real::sqrt);
    }

    fn sqrt_new(&self) -> Self {
        self.map(Real::sqrt)
    }

    fn sqrt_into(&self, out: &mut Self) {
        self.map_into(out, Real::sqrt);
    }

    fn abs(&mut self) {
        self.map_in_place(Real::abs);
    }

    fn abs_new(&self) -> Self {
        self.map(Real::abs)
    }

    fn abs_into(&self, out: &mut Self) {
        self.map_into(out, Real::abs);
    }

    /// Raise every element to the power `p`.
    fn exponentiate(&mut self, p: Real) {
        self.map_in_place(|v| v.powf(p));
    }

    fn exponentiate_new(&self, p: Real) -> Self {
        self.map(|v| v.powf(p))
    }

    fn exponentiate_into(&self, p: Real, out: &mut Self) {
        self.map_into(out, |v| v.powf(p));
    }

    fn scalar_add(&mut self, s: Real) {
        self.map_in_place(|v| v + s);
    }

    fn scalar_add_new(&self, s: Real) -> Self {
        self.map(|v| v + s)
    }

    fn scalar_add_into(&self, s: Real, out: &mut Self) {
        self.map_into(out, |v| v + s);
    }

    fn scalar_multiply(&mut self, s: Real) {
        self.map_in_place(|v| v * s);
    }

    fn scalar_multiply_new(&self, s: Real) -> Self {
        self.map(|v| v * s)
    }

    fn scalar_multiply_into(&self, s: Real, out: &mut Self) {
        self.map_into(out, |v| v * s);
    }

    /// `self -= scale * other`, the update shared by every descent step.
    fn scaled_sub(&mut self, scale: Real, other: &Self) -> Result<()> {
        self.zip_in_place(other, "scaled_sub", |a, b| a - scale * b)
    }
}
