use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Unknown {kind} key '{key}'")]
    UnknownKey { kind: &'static str, key: String },

    #[error("Invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("Regime switch-weight matrix must be {expected}x{expected}, got a row of length {actual}")]
    NonSquareMatrix { expected: usize, actual: usize },

    #[error("Regime configuration needs {expected} entries for '{field}', got {actual}")]
    RegimeCountMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Regime index {index} is out of range for {count} regimes")]
    RegimeOutOfRange { index: usize, count: usize },

    #[error("Field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Phase list must not be empty")]
    NoPhases,
}

impl ConfigError {
    pub fn unknown(kind: &'static str, key: impl Into<String>) -> Self {
        ConfigError::UnknownKey {
            kind,
            key: key.into(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathError {
    #[error("Path {path}: {field} became non-finite on epoch day {day}")]
    NonFinite {
        path: u64,
        field: &'static str,
        day: i64,
    },

    #[error("Path {path} panicked: {message}")]
    Panicked { path: u64, message: String },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Run rejected: {capacity} runs already in flight")]
    Rejected { capacity: usize },

    #[error("Worker pool could not be built: {0}")]
    Pool(String),
}
