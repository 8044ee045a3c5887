use thiserror::Error;

/// Failures at the engine's collaborator and input seams.
///
/// None of these escape an evaluation: the engine folds each one into a degraded
/// record or a non-progress recovery attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The code-repair collaborator could not produce new code
    #[error("repair collaborator unavailable: {0}")]
    RepairUnavailable(String),

    /// The executor adapter could not run the code at all
    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),

    /// Dataset schema cannot be used for column alignment
    #[error("malformed schema: {0}")]
    MalformedSchema(String),

    /// The caller-supplied evaluation deadline passed
    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            EngineError::RepairUnavailable("connection refused".to_string()).to_string(),
            "repair collaborator unavailable: connection refused"
        );
        assert_eq!(
            EngineError::DeadlineExceeded.to_string(),
            "evaluation deadline exceeded"
        );
    }
}
