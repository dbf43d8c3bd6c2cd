//! Activation functions.
//!
//! A layer computes a pre-activation value `z = x · W + b` and then applies an activation
//! element-wise: `a = activation(z)`.
//!
//! Derivatives are evaluated at the pre-activation `z` and returned with the same shape,
//! ready to be multiplied into the backpropagated error. Softmax is the one activation that
//! couples elements: it normalizes each row, and [`Activation::derivative_matrix`] returns
//! only the diagonal of its Jacobian (`s * (1 - s)`). Use [`softmax_jacobian`] for the
//! full matrix.

use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::str::FromStr;

use crate::{DenseBuffer, Error, Matrix, Real, Result, Vector};

#[derive(Debug, Clone, Copy, PartialEq)]
/// Activation function applied by a layer.
pub enum Activation {
    Linear,
    Sigmoid,
    Swish,
    Softplus,
    Softsign,
    /// Standard normal CDF, the probit link.
    GaussianCdf,
    /// Complementary log-log link.
    CLogLog,
    Tanh,
    ReLU,
    LeakyReLU {
        alpha: Real,
    },
    Elu {
        alpha: Real,
    },
    Gelu,
    /// Row-wise normalized exponential.
    Softmax,
}

impl Activation {
    /// Validate activation parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Activation::LeakyReLU { alpha } | Activation::Elu { alpha } => {
                if !(alpha.is_finite() && alpha >= 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "activation alpha must be finite and >= 0, got {alpha}"
                    )));
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Scalar activation. Softmax of a single element is `1`.
    #[inline]
    pub fn apply(self, z: Real) -> Real {
        match self {
            Activation::Linear => z,
            Activation::Sigmoid => sigmoid(z),
            Activation::Swish => z * sigmoid(z),
            Activation::Softplus => softplus(z),
            Activation::Softsign => z / (1.0 + z.abs()),
            Activation::GaussianCdf => gaussian_cdf(z),
            Activation::CLogLog => 1.0 - (-z.exp()).exp(),
            Activation::Tanh => z.tanh(),
            Activation::ReLU => z.max(0.0),
            Activation::LeakyReLU { alpha } => {
                if z > 0.0 {
                    z
                } else {
                    alpha * z
                }
            }
            Activation::Elu { alpha } => {
                if z > 0.0 {
                    z
                } else {
                    alpha * z.exp_m1()
                }
            }
            Activation::Gelu => z * gaussian_cdf(z),
            Activation::Softmax => 1.0,
        }
    }

    /// Scalar derivative `d activation / dz` evaluated at `z`.
    #[inline]
    pub fn derivative(self, z: Real) -> Real {
        match self {
            Activation::Linear => 1.0,
            Activation::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            Activation::Swish => {
                let s = sigmoid(z);
                s + z * s * (1.0 - s)
            }
            Activation::Softplus => sigmoid(z),
            Activation::Softsign => {
                let d = 1.0 + z.abs();
                1.0 / (d * d)
            }
            Activation::GaussianCdf => gaussian_pdf(z),
            Activation::CLogLog => (z - z.exp()).exp(),
            Activation::Tanh => {
                let t = z.tanh();
                1.0 - t * t
            }
            Activation::ReLU => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyReLU { alpha } => {
                if z > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            Activation::Elu { alpha } => {
                if z > 0.0 {
                    1.0
                } else {
                    alpha * z.exp()
                }
            }
            Activation::Gelu => gaussian_cdf(z) + z * gaussian_pdf(z),
            Activation::Softmax => 0.0,
        }
    }

    /// Apply to a whole vector. Softmax normalizes across the vector.
    pub fn forward_vector(self, z: &Vector) -> Vector {
        match self {
            Activation::Softmax => {
                let mut out = z.clone();
                softmax_in_place(out.as_mut_slice());
                out
            }
            _ => z.map(|v| self.apply(v)),
        }
    }

    pub fn derivative_vector(self, z: &Vector) -> Vector {
        match self {
            Activation::Softmax => self.forward_vector(z).map(|s| s * (1.0 - s)),
            _ => z.map(|v| self.derivative(v)),
        }
    }

    /// Apply to a batch. Softmax normalizes each row independently.
    pub fn forward_matrix(self, z: &Matrix) -> Matrix {
        let mut out = z.clone();
        self.forward_matrix_in_place(&mut out);
        out
    }

    pub fn forward_matrix_in_place(self, z: &mut Matrix) {
        match self {
            Activation::Softmax => {
                for r in 0..z.rows() {
                    softmax_in_place(z.row_mut(r));
                }
            }
            _ => z.map_in_place(|v| self.apply(v)),
        }
    }

    pub fn derivative_matrix(self, z: &Matrix) -> Matrix {
        match self {
            Activation::Softmax => self.forward_matrix(z).map(|s| s * (1.0 - s)),
            _ => z.map(|v| self.derivative(v)),
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    /// Parse an activation name. Parameterized variants get their customary defaults
    /// (`alpha = 0.01` for leaky ReLU, `alpha = 1` for ELU).
    fn from_str(s: &str) -> Result<Self> {
        let act = match s.to_ascii_lowercase().as_str() {
            "linear" | "identity" => Activation::Linear,
            "sigmoid" => Activation::Sigmoid,
            "swish" => Activation::Swish,
            "softplus" => Activation::Softplus,
            "softsign" => Activation::Softsign,
            "gaussiancdf" | "gaussian_cdf" | "probit" => Activation::GaussianCdf,
            "cloglog" => Activation::CLogLog,
            "tanh" => Activation::Tanh,
            "relu" => Activation::ReLU,
            "leakyrelu" | "leaky_relu" => Activation::LeakyReLU { alpha: 0.01 },
            "elu" => Activation::Elu { alpha: 1.0 },
            "gelu" => Activation::Gelu,
            "softmax" => Activation::Softmax,
            _ => return Err(Error::unknown("activation", s)),
        };
        Ok(act)
    }
}

/// Full softmax Jacobian `J[i][j] = s_i * (δ_ij - s_j)` for one sample.
pub fn softmax_jacobian(z: &Vector) -> Matrix {
    let s = Activation::Softmax.forward_vector(z);
    let n = s.len();
    let mut out = Matrix::new(n, n);
    for i in 0..n {
        for j in 0..n {
            let delta = if i == j { 1.0 } else { 0.0 };
            out[(i, j)] = s[i] * (delta - s[j]);
        }
    }
    out
}

#[inline]
pub(crate) fn sigmoid(x: Real) -> Real {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[inline]
fn softplus(x: Real) -> Real {
    // log(1 + e^x) without overflow for large x.
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

#[inline]
pub(crate) fn gaussian_cdf(x: Real) -> Real {
    0.5 * (1.0 + libm::erf(x * FRAC_1_SQRT_2))
}

#[inline]
fn gaussian_pdf(x: Real) -> Real {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

fn softmax_in_place(row: &mut [Real]) {
    let max = row.iter().copied().fold(Real::NEG_INFINITY, Real::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Activation; 12] = [
        Activation::Linear,
        Activation::Sigmoid,
        Activation::Swish,
        Activation::Softplus,
        Activation::Softsign,
        Activation::GaussianCdf,
        Activation::CLogLog,
        Activation::Tanh,
        Activation::LeakyReLU { alpha: 0.1 },
        Activation::Elu { alpha: 1.0 },
        Activation::Gelu,
        Activation::ReLU,
    ];

    #[test]
    fn alpha_must_be_finite_and_non_negative() {
        assert!(
            Activation::LeakyReLU { alpha: Real::NAN }
                .validate()
                .is_err()
        );
        assert!(Activation::Elu { alpha: -0.1 }.validate().is_err());
        assert!(Activation::LeakyReLU { alpha: 0.1 }.validate().is_ok());
    }

    #[test]
    fn derivatives_match_central_differences() {
        let h = 1e-6;
        for act in ALL {
            for &z in &[-1.7, -0.3, 0.4, 2.2] {
                let numeric = (act.apply(z + h) - act.apply(z - h)) / (2.0 * h);
                let analytic = act.derivative(z);
                assert!(
                    (numeric - analytic).abs() < 1e-5,
                    "{act:?} at {z}: numeric {numeric} vs analytic {analytic}"
                );
            }
        }
    }

    #[test]
    fn probit_link_basic_values() {
        assert!((Activation::GaussianCdf.apply(0.0) - 0.5).abs() < 1e-12);
        assert!((Activation::GaussianCdf.apply(1.96) - 0.975).abs() < 1e-3);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let z = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![1000.0, 1000.0, 1000.0]]).unwrap();
        let a = Activation::Softmax.forward_matrix(&z);
        for r in 0..a.rows() {
            let s: Real = a.row(r).iter().sum();
            assert!((s - 1.0).abs() < 1e-12);
        }
        assert!((a[(1, 0)] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn softmax_derivative_is_jacobian_diagonal() {
        let z = Vector::from(vec![0.5, -1.0, 2.0]);
        let diag = Activation::Softmax.derivative_vector(&z);
        let jac = softmax_jacobian(&z);
        for i in 0..3 {
            assert!((diag[i] - jac[(i, i)]).abs() < 1e-12);
        }
        // Off-diagonal entries are negative and each row sums to zero.
        assert!(jac[(0, 1)] < 0.0);
        assert!(jac.row(2).iter().sum::<Real>().abs() < 1e-12);
    }

    #[test]
    fn names_parse_and_unknown_names_fail() {
        assert_eq!("ReLU".parse::<Activation>().unwrap(), Activation::ReLU);
        assert_eq!(
            "probit".parse::<Activation>().unwrap(),
            Activation::GaussianCdf
        );
        let err = "swishy".parse::<Activation>().unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownVariant {
                kind: "activation",
                ..
            }
        ));
    }
}
