use std::fmt::Debug;

/// Errors reported by buffer operations, layers and trainers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two operands are not conformable for `op`.
    #[error("shape mismatch in {op}: {left} vs {right}")]
    ShapeMismatch {
        op: &'static str,
        left: String,
        right: String,
    },
    /// A matrix inverse was requested on a non-invertible matrix.
    #[error("matrix is singular")]
    SingularMatrix,
    /// A name outside one of the closed enumerations.
    #[error("unknown {kind} `{name}`")]
    UnknownVariant { kind: &'static str, name: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(op: &'static str, left: impl Debug, right: impl Debug) -> Self {
        Error::ShapeMismatch {
            op,
            left: format!("{left:?}"),
            right: format!("{right:?}"),
        }
    }

    pub(crate) fn unknown(kind: &'static str, name: &str) -> Self {
        Error::UnknownVariant {
            kind,
            name: name.to_owned(),
        }
    }
}
