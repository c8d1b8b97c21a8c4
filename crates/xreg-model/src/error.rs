//! Error types for model loading and verification.

use xreg_types::Problem;

/// Errors raised while loading or verifying a registry model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The model document is not valid JSON or does not match the model shape.
    #[error("model parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A group, resource or attribute name violates its charset.
    #[error("invalid {what} name {name:?}: {reason}")]
    InvalidName {
        /// What was being named ("group", "attribute", ...).
        what: &'static str,
        name: String,
        reason: String,
    },

    /// The model is structurally inconsistent.
    #[error("invalid model at {path}: {reason}")]
    Invalid {
        /// Location inside the model (`groups.dirs.resources.files`).
        path: String,
        reason: String,
    },
}

impl ModelError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<ModelError> for Problem {
    fn from(err: ModelError) -> Self {
        Problem::model_error(err)
    }
}

/// Convenience alias for model results.
pub type ModelResult<T> = Result<T, ModelError>;
