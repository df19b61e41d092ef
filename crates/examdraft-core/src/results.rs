//! Attempt result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The graded outcome of a submitted attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    /// Overall score as a percentage (0–100).
    pub score: f64,
    /// Maximum attainable score.
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    /// One entry per question, in authoring order.
    #[serde(default)]
    pub feedback: Vec<QuestionFeedback>,
    /// When grading completed.
    pub graded_at: DateTime<Utc>,
}

fn default_max_score() -> f64 {
    100.0
}

/// Feedback for a single question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionFeedback {
    /// Question index in authoring order.
    pub index: usize,
    pub outcome: QuestionOutcome,
    /// Fraction of the question's credit earned (0.0–1.0), if known.
    #[serde(default)]
    pub score: Option<f64>,
    /// Free-text feedback, e.g. the question's explanation or a rubric note.
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuestionOutcome {
    Correct,
    Incorrect,
    Unanswered,
    /// Scored only by the grading collaborator.
    PendingExternal,
}

impl AttemptResult {
    pub fn correct_count(&self) -> usize {
        self.feedback
            .iter()
            .filter(|f| f.outcome == QuestionOutcome::Correct)
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.feedback
            .iter()
            .filter(|f| f.outcome == QuestionOutcome::PendingExternal)
            .count()
    }
}
