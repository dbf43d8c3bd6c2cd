//! Descriptive statistics over samples.
//!
//! Every function takes a non-empty slice and returns [`Error::InvalidData`] otherwise.
//! Paired functions require equal lengths. Variance and covariance are sample estimates
//! (divide by `n - 1`).

use crate::{Error, Real, Result};

fn non_empty(x: &[Real], what: &'static str) -> Result<()> {
    if x.is_empty() {
        return Err(Error::InvalidData(format!("{what} of an empty sample")));
    }
    Ok(())
}

fn paired(x: &[Real], y: &[Real], what: &'static str) -> Result<()> {
    non_empty(x, what)?;
    if x.len() != y.len() {
        return Err(Error::shape(what, x.len(), y.len()));
    }
    Ok(())
}

fn at_least_two(x: &[Real], what: &'static str) -> Result<()> {
    if x.len() < 2 {
        return Err(Error::InvalidData(format!(
            "{what} needs at least two observations, got {}",
            x.len()
        )));
    }
    Ok(())
}

pub fn mean(x: &[Real]) -> Result<Real> {
    non_empty(x, "mean")?;
    Ok(x.iter().sum::<Real>() / x.len() as Real)
}

/// Middle value; the mean of the two middle values for even lengths.
pub fn median(x: &[Real]) -> Result<Real> {
    non_empty(x, "median")?;
    let mut sorted = x.to_vec();
    sorted.sort_by(Real::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Ok(sorted[mid])
    }
}

/// Every most frequent value, ascending.
pub fn mode(x: &[Real]) -> Result<Vec<Real>> {
    non_empty(x, "mode")?;
    let mut sorted = x.to_vec();
    sorted.sort_by(Real::total_cmp);

    let mut runs: Vec<(Real, usize)> = Vec::new();
    for v in sorted {
        match runs.last_mut() {
            Some((value, count)) if *value == v => *count += 1,
            _ => runs.push((v, 1)),
        }
    }
    let best = runs.iter().map(|&(_, c)| c).max().unwrap_or(0);
    Ok(runs
        .into_iter()
        .filter(|&(_, c)| c == best)
        .map(|(v, _)| v)
        .collect())
}

/// `max - min`.
pub fn range(x: &[Real]) -> Result<Real> {
    non_empty(x, "range")?;
    let (lo, hi) = bounds(x);
    Ok(hi - lo)
}

/// `(max + min) / 2`.
pub fn midrange(x: &[Real]) -> Result<Real> {
    non_empty(x, "midrange")?;
    let (lo, hi) = bounds(x);
    Ok((hi + lo) / 2.0)
}

fn bounds(x: &[Real]) -> (Real, Real) {
    x.iter()
        .fold((Real::INFINITY, Real::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

pub fn variance(x: &[Real]) -> Result<Real> {
    at_least_two(x, "variance")?;
    let m = mean(x)?;
    Ok(x.iter().map(|v| (v - m) * (v - m)).sum::<Real>() / (x.len() - 1) as Real)
}

pub fn standard_deviation(x: &[Real]) -> Result<Real> {
    Ok(variance(x)?.sqrt())
}

pub fn covariance(x: &[Real], y: &[Real]) -> Result<Real> {
    paired(x, y, "covariance")?;
    at_least_two(x, "covariance")?;
    let (mx, my) = (mean(x)?, mean(y)?);
    let sum: Real = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    Ok(sum / (x.len() - 1) as Real)
}

/// Pearson correlation coefficient.
pub fn correlation(x: &[Real], y: &[Real]) -> Result<Real> {
    let cov = covariance(x, y)?;
    let denom = standard_deviation(x)? * standard_deviation(y)?;
    if denom == 0.0 {
        return Err(Error::InvalidData(
            "correlation of a constant sample is undefined".to_owned(),
        ));
    }
    Ok(cov / denom)
}

/// Coefficient of determination of a linear fit: the squared correlation.
pub fn r2(x: &[Real], y: &[Real]) -> Result<Real> {
    let r = correlation(x, y)?;
    Ok(r * r)
}

/// `1 - 1 / k²`: the minimum share of any distribution within `k` standard deviations.
pub fn chebyshev_inequality(k: Real) -> Real {
    1.0 - 1.0 / (k * k)
}

pub fn weighted_mean(x: &[Real], weights: &[Real]) -> Result<Real> {
    paired(x, weights, "weighted_mean")?;
    let total: Real = weights.iter().sum();
    if total == 0.0 {
        return Err(Error::InvalidData("weights sum to zero".to_owned()));
    }
    Ok(x.iter().zip(weights).map(|(v, w)| v * w).sum::<Real>() / total)
}

/// `(prod x)^(1/n)`, computed through logarithms.
pub fn geometric_mean(x: &[Real]) -> Result<Real> {
    non_empty(x, "geometric_mean")?;
    let log_sum: Real = x.iter().map(|v| v.ln()).sum();
    Ok((log_sum / x.len() as Real).exp())
}

pub fn harmonic_mean(x: &[Real]) -> Result<Real> {
    non_empty(x, "harmonic_mean")?;
    let inv: Real = x.iter().map(|v| 1.0 / v).sum();
    Ok(x.len() as Real / inv)
}

/// `(mean(x^p))^(1/p)`.
pub fn power_mean(x: &[Real], p: Real) -> Result<Real> {
    non_empty(x, "power_mean")?;
    let m = x.iter().map(|v| v.powf(p)).sum::<Real>() / x.len() as Real;
    Ok(m.powf(1.0 / p))
}

/// `sum(x^p) / sum(x^(p-1))`.
pub fn lehmer_mean(x: &[Real], p: Real) -> Result<Real> {
    non_empty(x, "lehmer_mean")?;
    let num: Real = x.iter().map(|v| v.powf(p)).sum();
    let den: Real = x.iter().map(|v| v.powf(p - 1.0)).sum();
    Ok(num / den)
}

pub fn weighted_lehmer_mean(x: &[Real], weights: &[Real], p: Real) -> Result<Real> {
    paired(x, weights, "weighted_lehmer_mean")?;
    let num: Real = x.iter().zip(weights).map(|(v, w)| w * v.powf(p)).sum();
    let den: Real = x
        .iter()
        .zip(weights)
        .map(|(v, w)| w * v.powf(p - 1.0))
        .sum();
    Ok(num / den)
}

/// Lehmer mean with `p = 2`.
pub fn contraharmonic_mean(x: &[Real]) -> Result<Real> {
    lehmer_mean(x, 2.0)
}

/// `(a^x b^(1-x) + a^(1-x) b^x) / 2`.
pub fn heinz_mean(a: Real, b: Real, x: Real) -> Real {
    (a.powf(x) * b.powf(1.0 - x) + a.powf(1.0 - x) * b.powf(x)) / 2.0
}

/// Root mean square.
pub fn rms(x: &[Real]) -> Result<Real> {
    non_empty(x, "rms")?;
    Ok((x.iter().map(|v| v * v).sum::<Real>() / x.len() as Real).sqrt())
}

/// Mean absolute deviation around the mean.
pub fn absolute_average_deviation(x: &[Real]) -> Result<Real> {
    let m = mean(x)?;
    Ok(x.iter().map(|v| (v - m).abs()).sum::<Real>() / x.len() as Real)
}
