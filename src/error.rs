use std::fmt;

/// Result type for graphmarl operations
pub type Result<T> = std::result::Result<T, MarlError>;

/// Main error type for the graphmarl library
#[derive(Debug, Clone)]
pub enum MarlError {
    /// Tensor or vector shapes that do not line up
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid parameter value
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// IO errors (file operations)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),

    /// Numerical computation errors
    NumericalError(String),

    /// Empty pool or batch
    EmptyBuffer(String),

    /// A sampler or trainer was used before its collaborators were bound
    NotInitialized(String),

    /// Failure reported by an environment
    Environment(String),

    /// Failure reported by a policy
    Policy(String),

    /// Training error
    TrainingError(String),
}

impl fmt::Display for MarlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarlError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            MarlError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            MarlError::IoError(msg) => write!(f, "IO error: {}", msg),
            MarlError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            MarlError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
            MarlError::EmptyBuffer(msg) => write!(f, "Empty buffer: {}", msg),
            MarlError::NotInitialized(msg) => write!(f, "Not initialized: {}", msg),
            MarlError::Environment(msg) => write!(f, "Environment error: {}", msg),
            MarlError::Policy(msg) => write!(f, "Policy error: {}", msg),
            MarlError::TrainingError(msg) => write!(f, "Training error: {}", msg),
        }
    }
}

impl std::error::Error for MarlError {}

impl From<std::io::Error> for MarlError {
    fn from(err: std::io::Error) -> Self {
        MarlError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for MarlError {
    fn from(err: bincode::Error) -> Self {
        MarlError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for MarlError {
    fn from(err: serde_json::Error) -> Self {
        MarlError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for MarlError {
    fn from(err: ndarray::ShapeError) -> Self {
        MarlError::DimensionMismatch {
            expected: "compatible shape".to_string(),
            actual: err.to_string(),
        }
    }
}

// Helper functions for common error patterns
impl MarlError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        MarlError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        MarlError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Fails with `DimensionMismatch` unless `actual == expected`.
    pub fn check_len(what: &str, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(MarlError::dimension_mismatch(
                format!("{} of length {}", what, expected),
                format!("length {}", actual),
            ))
        }
    }
}
