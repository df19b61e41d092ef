//! Core trait definitions for the engine's external collaborators.
//!
//! The durable draft store is implemented by `MemoryStore` here and by
//! `examdraft-store`; the grading collaborator by `examdraft-grading`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GradingError, StorageError};
use crate::model::{AnswerValue, ExamDefinition};
use crate::results::AttemptResult;

// ---------------------------------------------------------------------------
// Durable key-value store
// ---------------------------------------------------------------------------

/// A session-scoped key→bytes store backing attempt drafts.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

// ---------------------------------------------------------------------------
// Grading collaborator
// ---------------------------------------------------------------------------

/// The external component that records submitted attempts and scores them.
#[async_trait]
pub trait GradingCollaborator: Send + Sync {
    /// Human-readable collaborator name (e.g. "http").
    fn name(&self) -> &str;

    /// Record a finished attempt.
    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, GradingError>;

    /// Score an attempt containing externally graded questions.
    async fn grade(&self, submission: &Submission) -> Result<AttemptResult, GradingError>;
}

/// A finished attempt handed to the grading collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub exam_id: String,
    pub attempt_id: String,
    /// One slot per question in authoring order; `None` is unanswered.
    pub answers: Vec<Option<AnswerValue>>,
    /// The exam as it was when the attempt was submitted.
    pub exam: ExamDefinition,
    pub submitted_at: DateTime<Utc>,
    /// The submission was forced by the time limit.
    #[serde(default)]
    pub expired: bool,
}

/// Acknowledgement of a recorded submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    /// Collaborator-side identifier of the stored submission.
    pub submission_id: String,
    pub accepted_at: DateTime<Utc>,
}
