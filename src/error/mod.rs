use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Model gateway error: {0}")]
    Model(#[from] ModelError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Council error: {0}")]
    Council(#[from] CouncilError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Synchronous rejection of an invalid submission, with guidance the
/// caller can surface verbatim.
#[derive(Debug, Error)]
#[error("Invalid proposal: {guidance}")]
pub struct ValidationError {
    /// Echo of what was received (truncated).
    pub input_received: String,
    /// Human-readable guidance on how to fix the submission.
    pub guidance: String,
    /// Example inputs that would be accepted.
    pub examples: Vec<String>,
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Assessment not found: {assessment_id}")]
    AssessmentNotFound { assessment_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Persist failed at {path}: {message}")]
    Persist { path: String, message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Embedding provider errors
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding provider unavailable: {message} (retries: {retries})")]
    Transient { message: String, retries: u32 },

    #[error("Embedding request rejected: {status} - {message}")]
    Permanent { status: u16, message: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// Transient failures are retried by callers; permanent ones surface.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient { .. })
    }
}

/// Model gateway errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model {model} unavailable: {message} (retries: {retries})")]
    Transient {
        model: String,
        message: String,
        retries: u32,
    },

    #[error("Model {model} rejected request: {status} - {message}")]
    Permanent {
        model: String,
        status: u16,
        message: String,
    },

    #[error("Model {model} timed out after {timeout_ms}ms")]
    Timeout { model: String, timeout_ms: u64 },

    #[error("Invalid response from {model}: {message}")]
    InvalidResponse { model: String, message: String },

    #[error("Call to {model} cancelled")]
    Cancelled { model: String },
}

impl ModelError {
    /// Whether the gateway retry loop should try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModelError::Transient { .. } | ModelError::Timeout { .. }
        )
    }

    /// The model identifier the error belongs to.
    pub fn model(&self) -> &str {
        match self {
            ModelError::Transient { model, .. }
            | ModelError::Permanent { model, .. }
            | ModelError::Timeout { model, .. }
            | ModelError::InvalidResponse { model, .. }
            | ModelError::Cancelled { model } => model,
        }
    }
}

/// Retrieval orchestrator errors
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Insufficient context: {hits} hits, mean score {mean_score:.3} after expansion")]
    Insufficient { hits: usize, mean_score: f64 },

    #[error("Retrieval budget of {budget_ms}ms exceeded")]
    BudgetExceeded { budget_ms: u64 },
}

/// Council protocol errors
#[derive(Debug, Error)]
pub enum CouncilError {
    #[error("Insufficient responses: {received} of {expected} council models answered")]
    InsufficientResponses { received: usize, expected: usize },

    #[error("Chairman synthesis failed: {0}")]
    Chairman(#[source] ModelError),

    #[error("Council configuration invalid: {message}")]
    Config { message: String },
}

/// Ranking parse failures. Downgraded to recorded warnings; a dropped
/// iteration degrades metrics but never stops an assessment.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No complete ranking found in evaluator output")]
    MissingRanking,
}

/// Illegal state transitions are programmer errors, surfaced as-is.
#[derive(Debug, Error)]
#[error("Illegal transition {from} -> {to} for assessment {assessment_id}")]
pub struct StateError {
    pub assessment_id: String,
    pub from: String,
    pub to: String,
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Result type alias for model gateway operations
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_transient_classification() {
        let err = ModelError::Timeout {
            model: "m1".to_string(),
            timeout_ms: 60000,
        };
        assert!(err.is_transient());

        let err = ModelError::Transient {
            model: "m1".to_string(),
            message: "503".to_string(),
            retries: 2,
        };
        assert!(err.is_transient());

        let err = ModelError::Permanent {
            model: "m1".to_string(),
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert!(!err.is_transient());

        let err = ModelError::Cancelled {
            model: "m1".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_model_error_display() {
        let err = ModelError::Permanent {
            model: "council/alpha".to_string(),
            status: 400,
            message: "bad request".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Model council/alpha rejected request: 400 - bad request"
        );
        assert_eq!(err.model(), "council/alpha");
    }

    #[test]
    fn test_state_error_display() {
        let err = StateError {
            assessment_id: "a-1".to_string(),
            from: "draft".to_string(),
            to: "completed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Illegal transition draft -> completed for assessment a-1"
        );
    }

    #[test]
    fn test_validation_error_carries_guidance() {
        let err = ValidationError {
            input_received: "too short".to_string(),
            guidance: "Provide at least 50 words".to_string(),
            examples: vec!["Regulation on ...".to_string()],
        };
        let app: AppError = err.into();
        assert!(app.to_string().contains("at least 50 words"));
    }

    #[test]
    fn test_embedding_error_classification() {
        let err = EmbeddingError::Transient {
            message: "overloaded".to_string(),
            retries: 3,
        };
        assert!(err.is_transient());

        let err = EmbeddingError::Permanent {
            status: 403,
            message: "quota".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_council_error_display() {
        let err = CouncilError::InsufficientResponses {
            received: 1,
            expected: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient responses: 1 of 3 council models answered"
        );
    }
}
