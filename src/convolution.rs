//! 2-D convolution and pooling over [`Matrix`] and [`Tensor3`] buffers.
//!
//! A `(rows, cols)` input convolved with an `(fr, fc)` filter at stride `s` and zero
//! padding `p` gives a map of `((rows - fr + 2p) / s + 1, (cols - fc + 2p) / s + 1)`,
//! rounded down. Windows start at `(i * s, j * s)` of the padded input.

use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{DenseBuffer, Error, Matrix, Real, Result, Tensor3, Vector};

/// Reduction applied to each pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Pooling {
    #[default]
    Max,
    Min,
    Average,
}

impl Pooling {
    fn reduce(self, window: impl Iterator<Item = Real>) -> Real {
        match self {
            Pooling::Max => window.fold(Real::NEG_INFINITY, Real::max),
            Pooling::Min => window.fold(Real::INFINITY, Real::min),
            Pooling::Average => {
                let (sum, n) = window.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if n == 0 { 0.0 } else { sum / n as Real }
            }
        }
    }
}

impl FromStr for Pooling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Pooling::Max),
            "min" => Ok(Pooling::Min),
            "average" | "avg" | "mean" => Ok(Pooling::Average),
            _ => Err(Error::unknown("pooling", s)),
        }
    }
}

fn map_len(n: usize, f: usize, stride: usize, padding: usize, op: &'static str) -> Result<usize> {
    if stride == 0 {
        return Err(Error::InvalidConfig(format!("{op} stride must be > 0")));
    }
    if f == 0 || f > n + 2 * padding {
        return Err(Error::shape(op, n + 2 * padding, f));
    }
    Ok((n + 2 * padding - f) / stride + 1)
}

/// Zero-pad `input` by `padding` on every side.
pub fn pad(input: &Matrix, padding: usize) -> Matrix {
    if padding == 0 {
        return input.clone();
    }
    let mut out = Matrix::new(input.rows() + 2 * padding, input.cols() + 2 * padding);
    for r in 0..input.rows() {
        out.row_mut(r + padding)[padding..padding + input.cols()].copy_from_slice(input.row(r));
    }
    out
}

/// Cross-correlate `input` with `filter` (the usual CNN "convolution").
pub fn convolve(input: &Matrix, filter: &Matrix, stride: usize, padding: usize) -> Result<Matrix> {
    let out_rows = map_len(input.rows(), filter.rows(), stride, padding, "convolve")?;
    let out_cols = map_len(input.cols(), filter.cols(), stride, padding, "convolve")?;
    let padded = pad(input, padding);

    let mut out = Matrix::new(out_rows, out_cols);
    for i in 0..out_rows {
        for j in 0..out_cols {
            out[(i, j)] = window_dot(&padded, filter, i * stride, j * stride);
        }
    }
    Ok(out)
}

fn window_dot(input: &Matrix, filter: &Matrix, top: usize, left: usize) -> Real {
    (0..filter.rows())
        .map(|k| {
            let row = &input.row(top + k)[left..left + filter.cols()];
            crate::vector::dot(row, filter.row(k))
        })
        .sum()
}

/// Multi-channel convolution: every filter spans all input channels and yields one output
/// slice, so the result has one slice per filter.
pub fn convolve3(
    input: &Tensor3,
    filters: &[Tensor3],
    stride: usize,
    padding: usize,
) -> Result<Tensor3> {
    let channels: Vec<Matrix> = input.iter_slices().map(|m| pad(&m, padding)).collect();
    let mut maps = Vec::with_capacity(filters.len());
    for filter in filters {
        if filter.depth() != input.depth() {
            return Err(Error::shape("convolve3", input.shape(), filter.shape()));
        }
        let mut map: Option<Matrix> = None;
        for (channel, kernel) in channels.iter().zip(filter.iter_slices()) {
            let partial = convolve(channel, &kernel, stride, 0)?;
            match map.as_mut() {
                Some(acc) => acc.add(&partial)?,
                None => map = Some(partial),
            }
        }
        maps.push(map.unwrap_or_default());
    }
    Tensor3::from_slices(&maps)
}

/// Pool `size x size` windows taken every `stride` cells.
pub fn pool(input: &Matrix, size: usize, stride: usize, kind: Pooling) -> Result<Matrix> {
    let out_rows = map_len(input.rows(), size, stride, 0, "pool")?;
    let out_cols = map_len(input.cols(), size, stride, 0, "pool")?;

    let mut out = Matrix::new(out_rows, out_cols);
    for i in 0..out_rows {
        for j in 0..out_cols {
            let (top, left) = (i * stride, j * stride);
            let window =
                (top..top + size).flat_map(|r| input.row(r)[left..left + size].iter().copied());
            out[(i, j)] = kind.reduce(window);
        }
    }
    Ok(out)
}

/// [`pool`] applied to every slice.
pub fn pool3(input: &Tensor3, size: usize, stride: usize, kind: Pooling) -> Result<Tensor3> {
    let slices = input
        .iter_slices()
        .map(|m| pool(&m, size, stride, kind))
        .collect::<Result<Vec<_>>>()?;
    Tensor3::from_slices(&slices)
}

/// Reduce a whole matrix to one value.
pub fn global_pool(input: &Matrix, kind: Pooling) -> Result<Real> {
    if input.is_empty() {
        return Err(Error::InvalidData("cannot pool an empty matrix".to_owned()));
    }
    Ok(kind.reduce(input.as_slice().iter().copied()))
}

/// One pooled value per slice.
pub fn global_pool3(input: &Tensor3, kind: Pooling) -> Result<Vector> {
    input
        .iter_slices()
        .map(|m| global_pool(&m, kind))
        .collect::<Result<Vec<_>>>()
        .map(Vector::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: usize, cols: usize) -> Matrix {
        let data = (0..rows * cols).map(|v| v as Real).collect();
        Matrix::from_flat((rows, cols), data).unwrap()
    }

    #[test]
    fn convolve_valid_and_padded() {
        let input = grid(4, 4);
        let ones = Matrix::filled(2, 2, 1.0);

        let valid = convolve(&input, &ones, 1, 0).unwrap();
        assert_eq!(valid.shape(), (3, 3));
        // 0 + 1 + 4 + 5
        assert_eq!(valid[(0, 0)], 10.0);

        let strided = convolve(&input, &ones, 2, 0).unwrap();
        assert_eq!(strided.shape(), (2, 2));
        // 10 + 11 + 14 + 15
        assert_eq!(strided[(1, 1)], 50.0);

        let padded = convolve(&input, &ones, 1, 1).unwrap();
        assert_eq!(padded.shape(), (5, 5));
        assert_eq!(padded[(0, 0)], 0.0);
        assert_eq!(padded[(4, 4)], 15.0);
    }

    #[test]
    fn convolve_rejects_bad_geometry() {
        let input = grid(2, 2);
        assert!(convolve(&input, &Matrix::filled(3, 3, 1.0), 1, 0).is_err());
        assert!(convolve(&input, &Matrix::filled(1, 1, 1.0), 0, 0).is_err());
    }

    #[test]
    fn multi_channel_convolution_sums_channels() {
        let input = Tensor3::from_slices(&[grid(3, 3), grid(3, 3)]).unwrap();
        let filter =
            Tensor3::from_slices(&[Matrix::filled(2, 2, 1.0), Matrix::filled(2, 2, -1.0)]).unwrap();
        let mut corner = Matrix::new(2, 2);
        corner[(0, 0)] = 1.0;
        let top_left = Tensor3::from_slices(&[corner, Matrix::new(2, 2)]).unwrap();

        let out = convolve3(&input, &[filter, top_left], 1, 0).unwrap();
        assert_eq!(out.shape(), (2, 2, 2));
        assert!(out.slice(0).as_slice().iter().all(|&v| v == 0.0));
        assert_eq!(out[(1, 1, 1)], 4.0);

        let shallow = Tensor3::from_slices(&[Matrix::filled(1, 1, 1.0)]).unwrap();
        assert!(convolve3(&input, &[shallow], 1, 0).is_err());
    }

    #[test]
    fn pooling_kinds() {
        let input = grid(4, 4);
        let max = pool(&input, 2, 2, Pooling::Max).unwrap();
        assert_eq!(max.as_slice(), &[5.0, 7.0, 13.0, 15.0]);
        let min = pool(&input, 2, 2, Pooling::Min).unwrap();
        assert_eq!(min.as_slice(), &[0.0, 2.0, 8.0, 10.0]);
        let avg = pool(&input, 2, 2, Pooling::Average).unwrap();
        assert_eq!(avg.as_slice(), &[2.5, 4.5, 10.5, 12.5]);

        assert_eq!("average".parse::<Pooling>().unwrap(), Pooling::Average);
        assert!("median".parse::<Pooling>().is_err());
    }

    #[test]
    fn global_pooling_per_slice() {
        let t = Tensor3::from_slices(&[grid(2, 2), Matrix::filled(2, 2, -1.0)]).unwrap();
        assert_eq!(
            global_pool3(&t, Pooling::Max).unwrap(),
            Vector::from(vec![3.0, -1.0])
        );
        assert_eq!(
            global_pool3(&t, Pooling::Average).unwrap(),
            Vector::from(vec![1.5, -1.0])
        );
        assert_eq!(pool3(&t, 1, 1, Pooling::Min).unwrap(), t);
        assert!(global_pool(&Matrix::default(), Pooling::Max).is_err());
    }
}
