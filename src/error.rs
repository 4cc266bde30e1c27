//! Error types for modprog.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressionError {
    /// Learner or module id that the store cannot resolve.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

impl ProgressionError {
    pub fn learner_not_found(id: i64) -> Self {
        ProgressionError::NotFound { entity: "learner", id }
    }

    pub fn module_not_found(id: i64) -> Self {
        ProgressionError::NotFound { entity: "module", id }
    }

    /// Whether the caller should map this to a 404-style response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProgressionError::NotFound { .. })
    }
}

impl From<toml::de::Error> for ProgressionError {
    fn from(err: toml::de::Error) -> Self {
        ProgressionError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ProgressionError {
    fn from(err: toml::ser::Error) -> Self {
        ProgressionError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProgressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = ProgressionError::module_not_found(42);
        assert_eq!(err.to_string(), "module 42 not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_errors_are_not_not_found() {
        let err = ProgressionError::Config("bad".into());
        assert!(!err.is_not_found());
    }
}
