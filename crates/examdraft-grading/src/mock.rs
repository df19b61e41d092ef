//! Mock grader for testing and offline use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use examdraft_core::error::GradingError;
use examdraft_core::ledger::AnswerLedger;
use examdraft_core::results::AttemptResult;
use examdraft_core::traits::{GradingCollaborator, Submission, SubmissionReceipt};

/// A grading collaborator that needs no network.
///
/// Accepts every submission and scores it with the engine's local rules,
/// unless a fixed result or scripted failures say otherwise.
#[derive(Default)]
pub struct MockGrader {
    /// Returned by `grade` instead of local scoring.
    fixed_result: Option<AttemptResult>,
    /// Errors returned by upcoming `submit` calls, in order.
    submit_failures: Mutex<VecDeque<GradingError>>,
    /// Errors returned by upcoming `grade` calls, in order.
    grade_failures: Mutex<VecDeque<GradingError>>,
    /// Simulated latency per call.
    delay: Duration,
    submit_count: AtomicU32,
    grade_count: AtomicU32,
    last_submission: Mutex<Option<Submission>>,
}

impl MockGrader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always grade with `result`.
    pub fn with_fixed_result(mut self, result: AttemptResult) -> Self {
        self.fixed_result = Some(result);
        self
    }

    /// Wait `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `submit` call with `error`. Calls queue up.
    pub fn fail_next_submit(&self, error: GradingError) {
        lock(&self.submit_failures).push_back(error);
    }

    /// Fail the next `grade` call with `error`. Calls queue up.
    pub fn fail_next_grade(&self, error: GradingError) {
        lock(&self.grade_failures).push_back(error);
    }

    pub fn submit_count(&self) -> u32 {
        self.submit_count.load(Ordering::Relaxed)
    }

    pub fn grade_count(&self) -> u32 {
        self.grade_count.load(Ordering::Relaxed)
    }

    /// The submission most recently passed to either call.
    pub fn last_submission(&self) -> Option<Submission> {
        lock(&self.last_submission).clone()
    }

    async fn record(&self, submission: &Submission) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        *lock(&self.last_submission) = Some(submission.clone());
    }
}

#[async_trait]
impl GradingCollaborator for MockGrader {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, GradingError> {
        let call = self.submit_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.record(submission).await;
        if let Some(error) = lock(&self.submit_failures).pop_front() {
            return Err(error);
        }
        Ok(SubmissionReceipt {
            submission_id: submission_id(&submission.attempt_id, call),
            accepted_at: Utc::now(),
        })
    }

    async fn grade(&self, submission: &Submission) -> Result<AttemptResult, GradingError> {
        self.grade_count.fetch_add(1, Ordering::Relaxed);
        self.record(submission).await;
        if let Some(error) = lock(&self.grade_failures).pop_front() {
            return Err(error);
        }
        if let Some(result) = &self.fixed_result {
            return Ok(result.clone());
        }
        let ledger =
            AnswerLedger::from_draft_answers(Arc::new(submission.exam.clone()), &submission.answers);
        Ok(ledger.score_locally(Utc::now()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Deterministic, so tests can assert on it.
fn submission_id(attempt_id: &str, call: u32) -> String {
    format!("mock-{attempt_id}-{call}")
}
