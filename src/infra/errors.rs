// src/infra/errors.rs — Error types for fusionloop

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionLoopError {
    // Generation errors (absorbed by the caller, never abort a run)
    #[error("Strategy '{strategy}' failed: {message}")]
    Strategy { strategy: String, message: String },

    #[error("Statistical model error: {0}")]
    Model(String),

    #[error("Consult client '{client}' error: {message}")]
    Consult { client: String, message: String },

    #[error("Consult call timed out after {timeout_ms}ms")]
    ConsultTimeout { timeout_ms: u64 },

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    // Input errors
    #[error("History line {line}: {message}")]
    History { line: usize, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // Infra
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FusionLoopError {
    /// External-service failures degrade a feature; everything else is local.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            FusionLoopError::Consult { .. }
                | FusionLoopError::ConsultTimeout { .. }
                | FusionLoopError::Model(_)
        )
    }

    pub fn strategy(strategy: &str, message: impl std::fmt::Display) -> Self {
        FusionLoopError::Strategy {
            strategy: strategy.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_classification() {
        assert!(FusionLoopError::ConsultTimeout { timeout_ms: 10 }.is_external());
        assert!(FusionLoopError::Model("no data".into()).is_external());
        assert!(!FusionLoopError::strategy("stride", "boom").is_external());
        assert!(!FusionLoopError::Config("bad".into()).is_external());
    }

    #[test]
    fn test_display_names_strategy() {
        let e = FusionLoopError::strategy("cycle", "index out of range");
        assert_eq!(e.to_string(), "Strategy 'cycle' failed: index out of range");
    }
}
