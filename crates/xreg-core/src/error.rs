use xreg_model::ModelError;
use xreg_store::StoreError;
use xreg_types::Problem;

/// Errors produced by the registry engine.
///
/// [`RegistryError::Problem`] is the caller's fault and carries a structured
/// [`Problem`]. [`RegistryError::Invariant`] is the engine's fault: a
/// programming-contract breach that aborts the request and must never be
/// caught and papered over.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    Problem(#[from] Problem),

    #[error("invariant violated: {reason}")]
    Invariant { reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::Invariant {
            reason: reason.into(),
        }
    }

    /// The structured problem, if this is a user-facing error.
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::Problem(p) => Some(p),
            _ => None,
        }
    }

    /// Returns `true` for programming-contract failures.
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant { .. })
    }
}

impl From<ModelError> for RegistryError {
    fn from(err: ModelError) -> Self {
        Self::Problem(err.into())
    }
}

/// Convenience alias for engine results.
pub type RegistryResult<T> = Result<T, RegistryError>;
