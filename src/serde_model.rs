//! Parameter persistence.
//!
//! Trained weights and biases are exported as [`LayerParameters`] records, one per layer,
//! and (with the `serde` feature) stored as a versioned JSON document.
//!
//! Design notes:
//! - Models are not serialized directly; only their parameters, so the file format stays
//!   stable when internal buffers change.
//! - Loading validates the version, every shape and that all values are finite before a
//!   model's parameters are touched.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "serde")]
use std::path::Path;

use crate::{
    DenseBuffer, Error, HiddenLayer, Matrix, MultiOutputLayer, OutputLayer, Real, Result, Vector,
};

pub const PARAMETER_FORMAT_VERSION: u32 = 1;

/// Weights and bias of one layer.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct LayerParameters {
    /// 1-based position of the layer in its model.
    pub index: usize,
    pub rows: usize,
    pub cols: usize,
    /// Row-major `(rows, cols)`.
    pub weights: Vec<Real>,
    pub bias: Vec<Real>,
}

impl LayerParameters {
    pub fn from_hidden(index: usize, layer: &HiddenLayer) -> Self {
        let (rows, cols) = layer.weights().shape();
        Self {
            index,
            rows,
            cols,
            weights: layer.weights().as_slice().to_vec(),
            bias: layer.bias().as_slice().to_vec(),
        }
    }

    pub fn from_multi_output(index: usize, layer: &MultiOutputLayer) -> Self {
        let (rows, cols) = layer.weights().shape();
        Self {
            index,
            rows,
            cols,
            weights: layer.weights().as_slice().to_vec(),
            bias: layer.bias().as_slice().to_vec(),
        }
    }

    pub fn from_output(index: usize, layer: &OutputLayer) -> Self {
        Self::from_vector(index, layer.weights(), layer.bias())
    }

    /// A column of weights with a scalar bias (regression models, output layers).
    pub fn from_vector(index: usize, weights: &Vector, bias: Real) -> Self {
        Self {
            index,
            rows: weights.len(),
            cols: 1,
            weights: weights.as_slice().to_vec(),
            bias: vec![bias],
        }
    }

    pub fn validate(&self) -> Result<()> {
        let expected = self
            .rows
            .checked_mul(self.cols)
            .ok_or_else(|| Error::InvalidData("layer weight shape overflow".to_owned()))?;
        if self.weights.len() != expected {
            return Err(Error::InvalidData(format!(
                "layer {} weights length {} does not match rows * cols ({} * {})",
                self.index,
                self.weights.len(),
                self.rows,
                self.cols
            )));
        }
        if self
            .weights
            .iter()
            .chain(&self.bias)
            .any(|v| !v.is_finite())
        {
            return Err(Error::InvalidData(format!(
                "layer {} parameters must contain only finite values",
                self.index
            )));
        }
        Ok(())
    }

    pub fn weight_matrix(&self) -> Result<Matrix> {
        Matrix::from_flat((self.rows, self.cols), self.weights.clone())
    }

    pub fn bias_vector(&self) -> Vector {
        Vector::from(self.bias.clone())
    }

    /// The weights as a column vector and the scalar bias.
    pub fn column(&self) -> Result<(Vector, Real)> {
        if self.cols != 1 || self.bias.len() != 1 {
            return Err(Error::InvalidData(format!(
                "layer {} is not a single-output layer ({} x {}, {} biases)",
                self.index,
                self.rows,
                self.cols,
                self.bias.len()
            )));
        }
        Ok((Vector::from(self.weights.clone()), self.bias[0]))
    }
}

/// Models whose trained parameters can be exported and restored.
pub trait Parameters {
    /// Snapshot of every layer's weights and bias, in model order.
    fn parameters(&self) -> Vec<LayerParameters>;

    /// Install parameters previously produced by [`Parameters::parameters`].
    fn restore(&mut self, layers: &[LayerParameters]) -> Result<()>;
}

/// Check that `layers` has exactly `expected` entries.
pub(crate) fn expect_layers(layers: &[LayerParameters], expected: usize) -> Result<()> {
    if layers.len() != expected {
        return Err(Error::InvalidData(format!(
            "expected parameters for {expected} layers, got {}",
            layers.len()
        )));
    }
    for layer in layers {
        layer.validate()?;
    }
    Ok(())
}

/// On-disk document: a format version and the stored layers.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterFile {
    pub format_version: u32,
    pub layers: Vec<LayerParameters>,
}

impl ParameterFile {
    pub fn new(layers: Vec<LayerParameters>) -> Self {
        Self {
            format_version: PARAMETER_FORMAT_VERSION,
            layers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.format_version != PARAMETER_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported parameter format_version {}; expected {}",
                self.format_version, PARAMETER_FORMAT_VERSION
            )));
        }
        for layer in &self.layers {
            layer.validate()?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl ParameterFile {
    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidData(format!("failed to serialize parameters: {e}")))
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let file: ParameterFile = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse parameter json: {e}")))?;
        file.validate()?;
        Ok(file)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_string_pretty()?)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// Write one layer's parameters to `path`.
///
/// With `append`, the layer is added after those already stored in the file (a missing
/// file starts empty); otherwise the file is replaced.
#[cfg(feature = "serde")]
pub fn save_layer<P: AsRef<Path>>(path: P, layer: &LayerParameters, append: bool) -> Result<()> {
    let path = path.as_ref();
    let mut file = if append && path.exists() {
        ParameterFile::load_json(path)?
    } else {
        ParameterFile::new(Vec::new())
    };
    file.layers.push(layer.clone());
    file.save_json(path)
}

/// Write every layer of `model` to `path`, replacing the file.
#[cfg(feature = "serde")]
pub fn save<P: AsRef<Path>>(path: P, model: &dyn Parameters) -> Result<()> {
    let path = path.as_ref();
    for (i, layer) in model.parameters().iter().enumerate() {
        save_layer(path, layer, i != 0)?;
    }
    Ok(())
}

/// Restore `model` from a file written by [`save`].
#[cfg(feature = "serde")]
pub fn load<P: AsRef<Path>>(path: P, model: &mut dyn Parameters) -> Result<()> {
    let file = ParameterFile::load_json(path)?;
    model.restore(&file.layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_checks_lengths_and_finiteness() {
        let mut p = LayerParameters {
            index: 1,
            rows: 2,
            cols: 2,
            weights: vec![1.0, 2.0, 3.0, 4.0],
            bias: vec![0.5, 0.5],
        };
        assert!(p.validate().is_ok());
        assert_eq!(p.weight_matrix().unwrap().row(1), &[3.0, 4.0]);

        p.weights.pop();
        assert!(p.validate().is_err());

        p.weights.push(Real::NAN);
        assert!(p.validate().is_err());
    }

    #[test]
    fn column_requires_single_output() {
        let p = LayerParameters::from_vector(1, &Vector::from(vec![1.0, 2.0]), 0.5);
        assert_eq!(p.column().unwrap(), (Vector::from(vec![1.0, 2.0]), 0.5));

        let wide = LayerParameters {
            cols: 2,
            rows: 1,
            ..p
        };
        assert!(wide.column().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn rejects_unknown_version() {
        let bad = r#"{"format_version":999,"layers":[]}"#;
        let err = ParameterFile::from_json_str(bad).unwrap_err();
        assert!(format!("{err}").contains("format_version"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn append_adds_layers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");

        let first = LayerParameters::from_vector(1, &Vector::from(vec![1.0]), 0.0);
        let second = LayerParameters::from_vector(2, &Vector::from(vec![2.0]), 1.0);
        save_layer(&path, &first, false).unwrap();
        save_layer(&path, &second, true).unwrap();

        let file = ParameterFile::load_json(&path).unwrap();
        assert_eq!(file.layers, vec![first.clone(), second]);

        save_layer(&path, &first, false).unwrap();
        assert_eq!(ParameterFile::load_json(&path).unwrap().layers, vec![first]);
    }
}
