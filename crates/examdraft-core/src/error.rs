//! Error types for the attempt engine.
//!
//! Each failure mode has a defined recovery path: validation errors reject the
//! offending call, storage errors degrade durability, grading errors move the
//! attempt to `Failed` so it can be retried.

use thiserror::Error;

use crate::lifecycle::AttemptState;
use crate::model::QuestionType;

/// Invalid input or persisted data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A question index outside `[0, question_count)`.
    #[error("question index {index} out of range (exam has {len} questions)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The answer shape does not match the question type.
    #[error("question {index} expects a {expected} answer, got a {actual}")]
    ShapeMismatch {
        index: usize,
        expected: QuestionType,
        actual: &'static str,
    },

    /// A selected option does not exist on the question.
    #[error("question {index} has {options} options, option {option} does not exist")]
    OptionOutOfRange {
        index: usize,
        option: usize,
        options: usize,
    },

    /// The exam has no questions and cannot be attempted.
    #[error("exam '{0}' has no questions")]
    EmptyExam(String),

    /// A persisted draft could not be interpreted.
    #[error("malformed draft: {0}")]
    MalformedDraft(String),
}

/// Failures of the durable draft store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The draft could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store refused the write for lack of space.
    #[error("storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    /// The backing store failed.
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// Errors reported by the grading collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GradingError {
    /// The collaborator returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The collaborator refused the submission outright.
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// The collaborator returned an error response.
    #[error("grading API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),
}

impl GradingError {
    /// Returns `true` if retrying the same submission cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            GradingError::Rejected(_) => true,
            GradingError::Api { status, .. } => (400..500).contains(status) && *status != 408,
            _ => false,
        }
    }
}

/// Errors returned by attempt operations.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The operation is not allowed in the attempt's current state.
    #[error("cannot {action} while attempt is {state}")]
    InvalidTransition {
        action: &'static str,
        state: AttemptState,
    },

    #[error("exam not found: {0}")]
    ExamNotFound(String),

    /// No resumable draft exists for the attempt.
    #[error("no draft for attempt {attempt_id} of exam {exam_id}")]
    DraftNotFound { exam_id: String, attempt_id: String },
}
