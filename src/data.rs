//! Dataset container and batching.
//!
//! A [`Dataset`] pairs an input matrix (rows = samples, columns = features) with one
//! target per sample. Loading from files is left to callers; this module only validates
//! that the two halves agree.

use std::ops::Range;

use rand::Rng;
use tracing::debug;

use crate::{DenseBuffer, Error, Matrix, Real, Result, Vector};

/// A supervised dataset: inputs (X) and targets (y).
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Matrix,
    targets: Vector,
}

impl Dataset {
    /// Pair `inputs` with `targets`; both must be non-empty with one target per row.
    pub fn new(inputs: Matrix, targets: Vector) -> Result<Self> {
        if inputs.rows() == 0 || inputs.cols() == 0 {
            return Err(Error::InvalidData(
                "inputs must have at least one row and one column".to_owned(),
            ));
        }
        if targets.len() != inputs.rows() {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match input rows {}",
                targets.len(),
                inputs.rows()
            )));
        }
        Ok(Self { inputs, targets })
    }

    /// Build a dataset from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(inputs: &[Vec<Real>], targets: &[Real]) -> Result<Self> {
        Self::new(Matrix::from_rows(inputs)?, Vector::from(targets))
    }

    #[inline]
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.inputs.rows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    /// Returns the per-sample input dimension.
    pub fn input_dim(&self) -> usize {
        self.inputs.cols()
    }

    #[inline]
    pub fn inputs(&self) -> &Matrix {
        &self.inputs
    }

    #[inline]
    pub fn targets(&self) -> &Vector {
        &self.targets
    }

    /// Returns the `idx`-th input row and its target.
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn sample(&self, idx: usize) -> (&[Real], Real) {
        (self.inputs.row(idx), self.targets[idx])
    }

    /// Copy out a contiguous block of samples.
    pub fn slice(&self, range: Range<usize>) -> Dataset {
        Self {
            inputs: self.inputs.row_range(range.clone()),
            targets: Vector::from(&self.targets.as_slice()[range]),
        }
    }

    /// Draw one sample index uniformly from `[0, len)`.
    pub fn random_index<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        rng.gen_range(0..self.len())
    }

    /// Split into contiguous mini-batches; see [`batch_ranges`].
    pub fn mini_batches(&self, batch_size: usize) -> Result<Vec<Dataset>> {
        let ranges = batch_ranges(self.len(), batch_size)?;
        Ok(ranges.into_iter().map(|r| self.slice(r)).collect())
    }
}

/// Partition `0..len` into `floor(len / batch_size)` contiguous blocks.
///
/// Samples left over after the integer division are folded into the final block, so every
/// sample appears exactly once. A `batch_size` larger than `len` yields one block.
pub fn batch_ranges(len: usize, batch_size: usize) -> Result<Vec<Range<usize>>> {
    if batch_size == 0 {
        return Err(Error::InvalidConfig(
            "mini_batch_size must be > 0".to_owned(),
        ));
    }
    if len == 0 {
        return Ok(Vec::new());
    }

    let n_batches = (len / batch_size).max(1);
    let mut ranges: Vec<Range<usize>> = (0..n_batches)
        .map(|b| b * batch_size..(b + 1) * batch_size)
        .collect();
    if let Some(last) = ranges.last_mut() {
        if last.end != len {
            debug!(
                remainder = len - last.end.min(len),
                "folding remainder into the final mini-batch"
            );
        }
        last.end = len;
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_validates_shapes() {
        let ok = Dataset::from_rows(&[vec![0.0, 1.0], vec![2.0, 3.0]], &[0.0, 1.0]);
        assert!(ok.is_ok());

        let err = Dataset::from_rows(&[vec![0.0, 1.0], vec![2.0]], &[0.0, 1.0]);
        assert!(err.is_err());

        let err = Dataset::from_rows(&[vec![0.0, 1.0]], &[0.0, 1.0]);
        assert!(err.is_err());
    }

    #[test]
    fn remainder_is_folded_into_last_batch() {
        let ranges = batch_ranges(10, 3).unwrap();
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);

        let ranges = batch_ranges(9, 3).unwrap();
        assert_eq!(ranges, vec![0..3, 3..6, 6..9]);

        assert_eq!(batch_ranges(2, 5).unwrap(), vec![0..2]);
        assert!(batch_ranges(4, 0).is_err());
    }

    #[test]
    fn mini_batches_cover_every_sample_once() {
        let xs: Vec<Vec<Real>> = (0..7).map(|i| vec![i as Real]).collect();
        let ys: Vec<Real> = (0..7).map(|i| i as Real).collect();
        let data = Dataset::from_rows(&xs, &ys).unwrap();

        let batches = data.mini_batches(2).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 3);
        let seen: Vec<Real> = batches
            .iter()
            .flat_map(|b| b.targets().iter().copied().collect::<Vec<_>>())
            .collect();
        assert_eq!(seen, ys);
    }
}
