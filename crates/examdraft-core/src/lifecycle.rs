//! Attempt lifecycle state machine.
//!
//! Coordinates the draft, ledger, timer, and pagination of one attempt, and
//! hands the finished attempt to the grading collaborator.
//!
//! ```text
//! NotStarted → InProgress → Submitting → Submitted → GradingInProgress → Graded
//!                  │             ├──────→ Expired        (time limit)
//!                  │             └──────→ Failed ──→ Submitting (retry)
//!                  └──→ Abandoned ←───────────┘
//! ```
//!
//! State transitions are synchronous under one mutex that is never held
//! across an `.await`. Only collaborator calls and the ticker are async.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::draft::{AttemptDraft, DraftStore, Durability};
use crate::error::{AttemptError, ValidationError};
use crate::ledger::AnswerLedger;
use crate::model::{AnswerValue, AttemptOptions, ExamDefinition};
use crate::order::QuestionOrderPlanner;
use crate::pagination::PaginationController;
use crate::results::AttemptResult;
use crate::scheduler::SaveScheduler;
use crate::timer::{TimerController, TimerGuard, TimerStatus};
use crate::traits::{GradingCollaborator, Submission, SubmissionReceipt};

/// Where an attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptState {
    NotStarted,
    InProgress,
    Submitting,
    Submitted,
    GradingInProgress,
    Graded,
    Expired,
    Failed,
    Abandoned,
}

impl AttemptState {
    /// No further user action can change the attempt.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            AttemptState::Submitted
                | AttemptState::Graded
                | AttemptState::Expired
                | AttemptState::Abandoned
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptState::NotStarted => "not started",
            AttemptState::InProgress => "in progress",
            AttemptState::Submitting => "submitting",
            AttemptState::Submitted => "submitted",
            AttemptState::GradingInProgress => "grading in progress",
            AttemptState::Graded => "graded",
            AttemptState::Expired => "expired",
            AttemptState::Failed => "failed",
            AttemptState::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// Tuning for attempt behaviour.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Questions per page.
    pub page_size: usize,
    /// Quiet period before a draft mutation is written.
    pub save_debounce: Duration,
    /// How often the timer is checked while an attempt is timed.
    pub tick_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            page_size: 5,
            save_debounce: Duration::from_millis(400),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Lifecycle event hooks.
///
/// Called while the attempt is locked; implementations must not call back
/// into the attempt.
pub trait AttemptObserver: Send + Sync {
    fn on_state_change(&self, _attempt_id: &str, _from: AttemptState, _to: AttemptState) {}

    /// The time limit passed and a submission is being forced.
    fn on_expired(&self, _attempt_id: &str) {}

    /// A draft write failed; the attempt now lives only in memory.
    fn on_durability_degraded(&self, _attempt_id: &str) {}
}

/// No-op observer.
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {}

/// Collaborators shared by every attempt.
#[derive(Clone)]
pub struct AttemptServices {
    pub store: Arc<DraftStore>,
    pub grader: Arc<dyn GradingCollaborator>,
    pub clock: Arc<dyn Clock>,
    pub observer: Arc<dyn AttemptObserver>,
    pub config: LifecycleConfig,
}

/// Result of a `submit()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The submission ran and left the attempt in this state.
    Finished(AttemptState),
    /// Another submission for this attempt is still pending; nothing was sent.
    AlreadyInFlight,
}

/// Read-only view of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSnapshot {
    pub exam_id: String,
    pub attempt_id: String,
    pub state: AttemptState,
    pub answers: Vec<Option<AnswerValue>>,
    /// Question indices in the order they are shown.
    pub display_order: Vec<usize>,
    /// Position in `display_order`.
    pub current_question_index: usize,
    pub current_page: usize,
    pub total_pages: usize,
    /// Question indices shown on the current page.
    pub page_questions: Vec<usize>,
    /// `None` when untimed.
    pub remaining_secs: Option<i64>,
    pub answered: usize,
    pub is_complete: bool,
    pub durability: Durability,
    pub result: Option<AttemptResult>,
    pub last_error: Option<String>,
}

/// Live state of a started attempt.
struct Session {
    draft: AttemptDraft,
    ledger: AnswerLedger,
    timer: TimerController,
    pages: PaginationController,
}

struct Inner {
    state: AttemptState,
    session: Option<Session>,
    receipt: Option<SubmissionReceipt>,
    result: Option<AttemptResult>,
    last_error: Option<String>,
    ticker: Option<TimerGuard>,
    /// Last immediate save failed.
    degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    User,
    Expiry,
}

/// Everything a submission needs, captured under the lock.
struct SubmissionPlan {
    submission: Submission,
    trigger: Trigger,
    /// A previous run already recorded the submission; only grading remains.
    grade_only: bool,
    needs_grading: bool,
    local_result: AttemptResult,
}

/// One user's attempt at one exam.
pub struct AttemptLifecycle {
    exam: Arc<ExamDefinition>,
    attempt_id: String,
    options: AttemptOptions,
    store: Arc<DraftStore>,
    saver: SaveScheduler,
    grader: Arc<dyn GradingCollaborator>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn AttemptObserver>,
    config: LifecycleConfig,
    inner: Mutex<Inner>,
}

impl AttemptLifecycle {
    pub fn new(
        exam: Arc<ExamDefinition>,
        attempt_id: impl Into<String>,
        options: AttemptOptions,
        services: AttemptServices,
    ) -> Arc<Self> {
        let attempt_id = attempt_id.into();
        let saver = SaveScheduler::new(
            Arc::clone(&services.store),
            exam.id.clone(),
            attempt_id.clone(),
            services.config.save_debounce,
        );
        Arc::new(Self {
            exam,
            attempt_id,
            options,
            store: services.store,
            saver,
            grader: services.grader,
            clock: services.clock,
            observer: services.observer,
            config: services.config,
            inner: Mutex::new(Inner {
                state: AttemptState::NotStarted,
                session: None,
                receipt: None,
                result: None,
                last_error: None,
                ticker: None,
                degraded: false,
            }),
        })
    }

    pub fn exam(&self) -> &ExamDefinition {
        &self.exam
    }

    pub fn exam_id(&self) -> &str {
        &self.exam.id
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn state(&self) -> AttemptState {
        self.lock().state
    }

    /// Begin the attempt, picking up its stored draft if there is one.
    pub fn start(self: &Arc<Self>) -> Result<(), AttemptError> {
        self.begin(false)
    }

    /// Continue an attempt from its stored draft.
    ///
    /// Fails with `DraftNotFound` when no usable draft exists.
    pub fn resume(self: &Arc<Self>) -> Result<(), AttemptError> {
        self.begin(true)
    }

    fn begin(self: &Arc<Self>, require_draft: bool) -> Result<(), AttemptError> {
        let mut inner = self.lock();
        if inner.state != AttemptState::NotStarted {
            return Err(AttemptError::InvalidTransition {
                action: "start",
                state: inner.state,
            });
        }

        let question_count = self.exam.question_count();
        if question_count == 0 {
            return Err(ValidationError::EmptyExam(self.exam.id.clone()).into());
        }

        let mut draft = match self.store.load(&self.exam.id, &self.attempt_id, question_count) {
            Some(draft) => {
                tracing::info!(
                    exam_id = %self.exam.id,
                    attempt_id = %self.attempt_id,
                    "resuming attempt from draft"
                );
                draft
            }
            None if require_draft => {
                return Err(AttemptError::DraftNotFound {
                    exam_id: self.exam.id.clone(),
                    attempt_id: self.attempt_id.clone(),
                });
            }
            None => AttemptDraft::new(
                self.clock.now(),
                question_count,
                self.options.time_limit_minutes,
                QuestionOrderPlanner::plan(question_count, self.options.shuffle_questions),
            ),
        };

        // A draft that asked for shuffling but never stored its order gets
        // one now; an order that was stored is never replaced.
        if draft.shuffle_questions && draft.shuffled_order.is_none() {
            draft.shuffled_order = QuestionOrderPlanner::plan(question_count, true);
        }

        let ledger = AnswerLedger::from_draft_answers(Arc::clone(&self.exam), &draft.answers);
        draft.answers = ledger.answers().to_vec();
        let timer = TimerController::new(draft.started_at, draft.time_limit_minutes);
        let pages = PaginationController::new(question_count, self.config.page_size);

        let durability = self.saver.flush(&draft);
        self.note_durability(&mut inner, durability);
        let timed = timer.is_timed();
        inner.session = Some(Session {
            draft,
            ledger,
            timer,
            pages,
        });
        self.transition(&mut inner, AttemptState::InProgress);

        if timed {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let task = runtime.spawn(run_ticker(Arc::downgrade(self), self.config.tick_interval));
                inner.ticker = Some(TimerGuard::new(task));
            } else {
                tracing::debug!(
                    attempt_id = %self.attempt_id,
                    "no async runtime, time limit is enforced only through tick()"
                );
            }
        }
        Ok(())
    }

    /// Record an answer for the question at authoring index `index`.
    pub fn set_answer(&self, index: usize, value: AnswerValue) -> Result<(), AttemptError> {
        self.mutate("set an answer", |session| {
            session.ledger.set_answer(index, value)?;
            session.draft.answers[index] = session.ledger.answer(index).cloned();
            Ok(())
        })
    }

    /// Reset the answer at `index` to absent.
    pub fn clear_answer(&self, index: usize) -> Result<(), AttemptError> {
        self.mutate("clear an answer", |session| {
            session.ledger.clear_answer(index)?;
            session.draft.answers[index] = None;
            Ok(())
        })
    }

    /// Move to the next page, returning the new page number.
    pub fn next_page(&self) -> Result<usize, AttemptError> {
        self.navigate("change page", |pages, position| pages.next(position))
    }

    /// Move to the previous page, returning the new page number.
    pub fn prev_page(&self) -> Result<usize, AttemptError> {
        self.navigate("change page", |pages, position| pages.prev(position))
    }

    /// Jump to `page` (clamped), returning the page landed on.
    pub fn go_to_page(&self, page: usize) -> Result<usize, AttemptError> {
        self.navigate("change page", |pages, _| pages.first_index(page))
    }

    fn navigate(
        &self,
        action: &'static str,
        target: impl FnOnce(&PaginationController, usize) -> usize,
    ) -> Result<usize, AttemptError> {
        let mut page = 1;
        self.mutate(action, |session| {
            let position = target(&session.pages, session.draft.current_question_index);
            session.draft.current_question_index = position;
            page = session.pages.page_of(position);
            Ok(())
        })?;
        Ok(page)
    }

    fn mutate(
        &self,
        action: &'static str,
        apply: impl FnOnce(&mut Session) -> Result<(), ValidationError>,
    ) -> Result<(), AttemptError> {
        let mut inner = self.lock();
        let state = inner.state;
        let session = match (state, inner.session.as_mut()) {
            (AttemptState::InProgress, Some(session)) => session,
            _ => return Err(AttemptError::InvalidTransition { action, state }),
        };
        apply(session)?;
        if let Some(durability) = self.saver.schedule(session.draft.clone()) {
            self.note_durability(&mut inner, durability);
        }
        Ok(())
    }

    /// Check the time limit, forcing a submission the first time it passes.
    ///
    /// Returns `None` once the attempt is no longer in progress.
    pub async fn tick(&self) -> Option<TimerStatus> {
        let now = self.clock.now();
        let status = {
            let mut inner = self.lock();
            if inner.state != AttemptState::InProgress {
                return None;
            }
            inner.session.as_mut()?.timer.poll(now)
        };

        if status == TimerStatus::Expired {
            tracing::info!(
                exam_id = %self.exam.id,
                attempt_id = %self.attempt_id,
                "time limit reached, submitting attempt"
            );
            self.observer.on_expired(&self.attempt_id);
            if let Err(e) = self.run_submission(Trigger::Expiry).await {
                tracing::debug!(attempt_id = %self.attempt_id, "expiry submission skipped: {e}");
            }
        }
        Some(status)
    }

    /// Submit the attempt, or retry a failed submission.
    ///
    /// A call made while another submission is pending does nothing.
    pub async fn submit(&self) -> Result<SubmitOutcome, AttemptError> {
        self.run_submission(Trigger::User).await
    }

    /// Give up on the attempt and discard its draft.
    pub fn abandon(&self) -> Result<(), AttemptError> {
        let mut inner = self.lock();
        if !matches!(inner.state, AttemptState::InProgress | AttemptState::Failed) {
            return Err(AttemptError::InvalidTransition {
                action: "abandon",
                state: inner.state,
            });
        }
        inner.ticker = None;
        self.saver.cancel();
        self.store.clear(&self.exam.id, &self.attempt_id);
        self.transition(&mut inner, AttemptState::Abandoned);
        Ok(())
    }

    async fn run_submission(&self, trigger: Trigger) -> Result<SubmitOutcome, AttemptError> {
        let plan = match self.prepare_submission(trigger)? {
            Some(plan) => plan,
            None => return Ok(SubmitOutcome::AlreadyInFlight),
        };
        let expired = plan.trigger == Trigger::Expiry;

        if !plan.grade_only {
            match self.grader.submit(&plan.submission).await {
                Ok(receipt) => {
                    self.saver.cancel();
                    self.store.clear(&self.exam.id, &self.attempt_id);
                    let mut inner = self.lock();
                    tracing::info!(
                        attempt_id = %self.attempt_id,
                        submission_id = %receipt.submission_id,
                        "attempt submitted"
                    );
                    inner.receipt = Some(receipt);
                    inner.last_error = None;
                    if !expired {
                        self.transition(&mut inner, AttemptState::Submitted);
                    }
                    if !plan.needs_grading {
                        inner.result = Some(plan.local_result);
                        let done = if expired {
                            AttemptState::Expired
                        } else {
                            AttemptState::Submitted
                        };
                        self.transition(&mut inner, done);
                        return Ok(SubmitOutcome::Finished(done));
                    }
                    if !expired {
                        self.transition(&mut inner, AttemptState::GradingInProgress);
                    }
                }
                Err(e) => {
                    tracing::error!(attempt_id = %self.attempt_id, "submission failed: {e}");
                    let mut inner = self.lock();
                    inner.last_error = Some(e.to_string());
                    // The draft was flushed before sending and stays in place.
                    let done = if expired {
                        AttemptState::Expired
                    } else {
                        AttemptState::Failed
                    };
                    self.transition(&mut inner, done);
                    return Ok(SubmitOutcome::Finished(done));
                }
            }
        }

        let graded = self.grader.grade(&plan.submission).await;
        let mut inner = self.lock();
        let done = match (graded, expired) {
            (Ok(result), true) => {
                inner.result = Some(result);
                AttemptState::Expired
            }
            (Ok(result), false) => {
                tracing::info!(attempt_id = %self.attempt_id, score = result.score, "attempt graded");
                inner.result = Some(result);
                inner.last_error = None;
                AttemptState::Graded
            }
            (Err(e), true) => {
                tracing::warn!(attempt_id = %self.attempt_id, "grading of expired attempt failed: {e}");
                inner.result = Some(plan.local_result);
                inner.last_error = Some(e.to_string());
                AttemptState::Expired
            }
            (Err(e), false) => {
                tracing::error!(attempt_id = %self.attempt_id, "grading failed: {e}");
                inner.last_error = Some(e.to_string());
                AttemptState::Failed
            }
        };
        self.transition(&mut inner, done);
        Ok(SubmitOutcome::Finished(done))
    }

    /// Move into a submitting state and capture the payload.
    ///
    /// Returns `None` when a submission is already pending.
    fn prepare_submission(&self, trigger: Trigger) -> Result<Option<SubmissionPlan>, AttemptError> {
        let mut inner = self.lock();
        let grade_only = match (inner.state, trigger) {
            (AttemptState::InProgress, _) => false,
            (AttemptState::Failed, Trigger::User) => inner.receipt.is_some(),
            (AttemptState::Submitting | AttemptState::GradingInProgress, _) => {
                tracing::debug!(attempt_id = %self.attempt_id, "submission already in flight");
                return Ok(None);
            }
            (state, _) => {
                return Err(AttemptError::InvalidTransition {
                    action: "submit",
                    state,
                })
            }
        };

        if let Some(ticker) = inner.ticker.take() {
            match trigger {
                // The ticker is running this very call; let it finish.
                Trigger::Expiry => ticker.release(),
                Trigger::User => drop(ticker),
            }
        }

        let now = self.clock.now();
        let Some(session) = inner.session.as_ref() else {
            return Err(AttemptError::InvalidTransition {
                action: "submit",
                state: inner.state,
            });
        };
        let plan = SubmissionPlan {
            submission: Submission {
                exam_id: self.exam.id.clone(),
                attempt_id: self.attempt_id.clone(),
                answers: session.ledger.answers().to_vec(),
                exam: (*self.exam).clone(),
                submitted_at: now,
                expired: trigger == Trigger::Expiry,
            },
            trigger,
            grade_only,
            needs_grading: session.ledger.requires_external_grading(),
            local_result: session.ledger.score_locally(now),
        };
        if !grade_only {
            let durability = self.saver.flush(&session.draft);
            self.note_durability(&mut inner, durability);
        }

        let next = if grade_only {
            AttemptState::GradingInProgress
        } else {
            AttemptState::Submitting
        };
        self.transition(&mut inner, next);
        Ok(Some(plan))
    }

    /// Current view of the attempt.
    pub fn snapshot(&self) -> AttemptSnapshot {
        let now = self.clock.now();
        let inner = self.lock();
        let question_count = self.exam.question_count();

        let (answers, display_order, position, pages, remaining, answered, complete) =
            match &inner.session {
                Some(s) => (
                    s.ledger.answers().to_vec(),
                    s.draft.display_order(),
                    s.draft.current_question_index,
                    s.pages,
                    s.timer.remaining(now),
                    s.ledger.answered_count(),
                    s.ledger.is_complete(),
                ),
                None => (
                    vec![None; question_count],
                    QuestionOrderPlanner::display_order(question_count, None),
                    0,
                    PaginationController::new(question_count, self.config.page_size),
                    None,
                    0,
                    false,
                ),
            };

        let current_page = pages.page_of(position);
        let page_questions = pages
            .page_range(current_page)
            .filter_map(|p| display_order.get(p).copied())
            .collect();

        AttemptSnapshot {
            exam_id: self.exam.id.clone(),
            attempt_id: self.attempt_id.clone(),
            state: inner.state,
            answers,
            display_order,
            current_question_index: position,
            current_page,
            total_pages: pages.total_pages(),
            page_questions,
            remaining_secs: remaining.map(|r| r.num_seconds().max(0)),
            answered,
            is_complete: complete,
            durability: self.saver.durability(),
            result: inner.result.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    #[cfg(test)]
    fn ticker_active(&self) -> bool {
        self.lock().ticker.is_some()
    }

    fn note_durability(&self, inner: &mut Inner, durability: Durability) {
        let degraded = durability == Durability::InMemoryOnly;
        if degraded && !inner.degraded {
            self.observer.on_durability_degraded(&self.attempt_id);
        }
        inner.degraded = degraded;
    }

    fn transition(&self, inner: &mut Inner, to: AttemptState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        tracing::info!(
            exam_id = %self.exam.id,
            attempt_id = %self.attempt_id,
            %from,
            %to,
            "attempt state changed"
        );
        self.observer.on_state_change(&self.attempt_id, from, to);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AttemptLifecycle {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        if matches!(inner.state, AttemptState::InProgress | AttemptState::Failed) {
            if let Some(session) = &inner.session {
                // Write out any save still waiting on its debounce.
                if self.saver.has_pending() {
                    self.saver.flush(&session.draft);
                }
            }
        }
    }
}

async fn run_ticker(attempt: Weak<AttemptLifecycle>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(attempt) = attempt.upgrade() else {
            break;
        };
        match attempt.tick().await {
            Some(TimerStatus::Running { .. }) => {}
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::Notify;

    use crate::clock::ManualClock;
    use crate::error::GradingError;
    use crate::ledger::tests::sample_exam;
    use crate::order::is_permutation;
    use crate::results::{QuestionFeedback, QuestionOutcome};
    use crate::store::tests::GatedStore;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct StubGrader {
        submits: AtomicU32,
        grades: AtomicU32,
        fail_submit: AtomicBool,
        fail_grade: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl GradingCollaborator for StubGrader {
        fn name(&self) -> &str {
            "stub"
        }

        async fn submit(&self, submission: &Submission) -> Result<SubmissionReceipt, GradingError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(GradingError::Network("connection reset".into()));
            }
            Ok(SubmissionReceipt {
                submission_id: format!("sub-{}", submission.attempt_id),
                accepted_at: submission.submitted_at,
            })
        }

        async fn grade(&self, submission: &Submission) -> Result<AttemptResult, GradingError> {
            self.grades.fetch_add(1, Ordering::SeqCst);
            if self.fail_grade.load(Ordering::SeqCst) {
                return Err(GradingError::Timeout(30));
            }
            Ok(AttemptResult {
                score: 75.0,
                max_score: 100.0,
                feedback: (0..submission.answers.len())
                    .map(|index| QuestionFeedback {
                        index,
                        outcome: QuestionOutcome::Correct,
                        score: Some(0.75),
                        feedback: None,
                    })
                    .collect(),
                graded_at: submission.submitted_at,
            })
        }
    }

    struct Harness {
        backend: Arc<MemoryStore>,
        store: Arc<DraftStore>,
        grader: Arc<StubGrader>,
        clock: Arc<ManualClock>,
        config: LifecycleConfig,
    }

    impl Harness {
        fn new(grader: StubGrader) -> Self {
            let backend = Arc::new(MemoryStore::new());
            Self {
                store: Arc::new(DraftStore::new(backend.clone())),
                backend,
                grader: Arc::new(grader),
                clock: Arc::new(ManualClock::new(t0())),
                config: LifecycleConfig {
                    page_size: 2,
                    save_debounce: Duration::ZERO,
                    tick_interval: Duration::from_secs(3600),
                },
            }
        }

        fn services(&self) -> AttemptServices {
            AttemptServices {
                store: Arc::clone(&self.store),
                grader: self.grader.clone(),
                clock: self.clock.clone(),
                observer: Arc::new(NoopObserver),
                config: self.config.clone(),
            }
        }

        fn attempt(&self, exam: &Arc<ExamDefinition>, options: AttemptOptions) -> Arc<AttemptLifecycle> {
            AttemptLifecycle::new(Arc::clone(exam), "attempt-1", options, self.services())
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Exam of unique/multiple/fillInBlank questions only.
    fn local_exam(n: usize) -> Arc<ExamDefinition> {
        let mut exam = sample_exam(n);
        exam.questions.retain(|q| !q.is_externally_graded());
        Arc::new(exam)
    }

    fn timed(minutes: u32) -> AttemptOptions {
        AttemptOptions {
            time_limit_minutes: minutes,
            shuffle_questions: false,
        }
    }

    #[test]
    fn start_creates_shuffled_draft_that_survives_reload() {
        let h = Harness::new(StubGrader::default());
        let exam = Arc::new(sample_exam(5));
        let options = AttemptOptions {
            time_limit_minutes: 10,
            shuffle_questions: true,
        };

        let attempt = h.attempt(&exam, options);
        attempt.start().unwrap();
        assert_eq!(attempt.state(), AttemptState::InProgress);

        let stored = h.store.load("fr-a1", "attempt-1", 5).unwrap();
        let order = stored.shuffled_order.clone().unwrap();
        assert_eq!(order.len(), 5);
        assert!(is_permutation(&order, 5));
        assert_eq!(attempt.snapshot().display_order, order);

        drop(attempt);
        let reloaded = h.attempt(&exam, options);
        reloaded.resume().unwrap();
        assert_eq!(reloaded.snapshot().display_order, order);
        assert_eq!(
            h.store.load("fr-a1", "attempt-1", 5).unwrap().shuffled_order,
            Some(order)
        );
    }

    #[test]
    fn resume_keeps_start_time_and_answers() {
        let h = Harness::new(StubGrader::default());
        let exam = local_exam(6);
        let attempt = h.attempt(&exam, timed(10));
        attempt.start().unwrap();
        attempt.set_answer(0, AnswerValue::Choice(1)).unwrap();
        attempt.next_page().unwrap();
        let before = attempt.snapshot().remaining_secs.unwrap();
        drop(attempt);

        h.clock.advance(chrono::Duration::seconds(45));
        let reloaded = h.attempt(&exam, timed(10));
        reloaded.resume().unwrap();
        let snap = reloaded.snapshot();
        assert_eq!(snap.answers[0], Some(AnswerValue::Choice(1)));
        assert_eq!(snap.current_page, 2);
        assert_eq!(snap.remaining_secs, Some(before - 45));
        assert_eq!(
            h.store.load(&exam.id, "attempt-1", exam.question_count()).unwrap().started_at,
            t0()
        );
    }

    #[test]
    fn resume_without_draft_fails() {
        let h = Harness::new(StubGrader::default());
        let attempt = h.attempt(&local_exam(3), AttemptOptions::default());
        assert!(matches!(
            attempt.resume().unwrap_err(),
            AttemptError::DraftNotFound { .. }
        ));
        assert_eq!(attempt.state(), AttemptState::NotStarted);
    }

    #[test]
    fn empty_exam_cannot_start() {
        let h = Harness::new(StubGrader::default());
        let attempt = h.attempt(&Arc::new(sample_exam(0)), AttemptOptions::default());
        assert!(matches!(
            attempt.start().unwrap_err(),
            AttemptError::Validation(ValidationError::EmptyExam(_))
        ));
    }

    #[test]
    fn invalid_answer_is_rejected_and_state_kept() {
        let h = Harness::new(StubGrader::default());
        let attempt = h.attempt(&local_exam(3), AttemptOptions::default());
        attempt.start().unwrap();
        attempt.set_answer(0, AnswerValue::Choice(2)).unwrap();
        assert!(attempt
            .set_answer(0, AnswerValue::Text("la".into()))
            .is_err());
        assert!(attempt.set_answer(9, AnswerValue::Choice(0)).is_err());
        assert_eq!(attempt.snapshot().answers[0], Some(AnswerValue::Choice(2)));
    }

    #[test]
    fn mutations_require_in_progress() {
        let h = Harness::new(StubGrader::default());
        let attempt = h.attempt(&local_exam(3), AttemptOptions::default());
        assert!(matches!(
            attempt.set_answer(0, AnswerValue::Choice(0)).unwrap_err(),
            AttemptError::InvalidTransition {
                state: AttemptState::NotStarted,
                ..
            }
        ));
        assert!(attempt.next_page().is_err());
    }

    #[test]
    fn pagination_clamps_and_persists_position() {
        let h = Harness::new(StubGrader::default());
        let exam = local_exam(6);
        let attempt = h.attempt(&exam, AttemptOptions::default());
        attempt.start().unwrap();
        assert_eq!(attempt.prev_page().unwrap(), 1);
        assert_eq!(attempt.next_page().unwrap(), 2);
        assert_eq!(attempt.next_page().unwrap(), 3);
        assert_eq!(attempt.next_page().unwrap(), 3);
        assert_eq!(attempt.go_to_page(0).unwrap(), 1);
        assert_eq!(attempt.go_to_page(2).unwrap(), 2);

        let snap = attempt.snapshot();
        assert_eq!(snap.total_pages, 3);
        assert_eq!(snap.page_questions, vec![2, 3]);
        let stored = h
            .store
            .load(&exam.id, "attempt-1", exam.question_count())
            .unwrap();
        assert_eq!(stored.current_question_index, 2);
    }

    #[tokio::test]
    async fn submit_local_exam_clears_draft() {
        let h = Harness::new(StubGrader::default());
        let exam = local_exam(3);
        let attempt = h.attempt(&exam, AttemptOptions::default());
        attempt.start().unwrap();
        attempt.set_answer(0, AnswerValue::Choice(1)).unwrap();

        let outcome = attempt.submit().await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Finished(AttemptState::Submitted));
        assert_eq!(h.store.load(&exam.id, "attempt-1", 3), None);
        assert!(h.store.attempts_for_exam(&exam.id).is_empty());
        assert_eq!(h.grader.grades.load(Ordering::SeqCst), 0);

        let result = attempt.snapshot().result.unwrap();
        assert_eq!(result.correct_count(), 1);
        assert!(attempt.submit().await.is_err());
    }

    #[tokio::test]
    async fn externally_graded_exam_goes_to_graded() {
        let h = Harness::new(StubGrader::default());
        let exam = Arc::new(sample_exam(4));
        let attempt = h.attempt(&exam, AttemptOptions::default());
        attempt.start().unwrap();
        attempt
            .set_answer(3, AnswerValue::Text("The cat sleeps".into()))
            .unwrap();

        let outcome = attempt.submit().await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Finished(AttemptState::Graded));
        assert_eq!(h.grader.grades.load(Ordering::SeqCst), 1);
        assert_eq!(attempt.snapshot().result.unwrap().score, 75.0);
    }

    #[tokio::test]
    async fn second_submit_while_pending_is_noop() {
        let gate = Arc::new(Notify::new());
        let h = Harness::new(StubGrader {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let attempt = h.attempt(&local_exam(3), AttemptOptions::default());
        attempt.start().unwrap();

        let first = {
            let attempt = Arc::clone(&attempt);
            tokio::spawn(async move { attempt.submit().await })
        };
        while attempt.state() != AttemptState::Submitting {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            attempt.submit().await.unwrap(),
            SubmitOutcome::AlreadyInFlight
        );
        gate.notify_one();
        assert_eq!(
            first.await.unwrap().unwrap(),
            SubmitOutcome::Finished(AttemptState::Submitted)
        );
        assert_eq!(h.grader.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_submit_keeps_draft_and_retry_succeeds() {
        let h = Harness::new(StubGrader {
            fail_submit: AtomicBool::new(true),
            ..Default::default()
        });
        let exam = local_exam(3);
        let attempt = h.attempt(&exam, AttemptOptions::default());
        attempt.start().unwrap();
        attempt.set_answer(2, AnswerValue::Text("chat".into())).unwrap();

        assert_eq!(
            attempt.submit().await.unwrap(),
            SubmitOutcome::Finished(AttemptState::Failed)
        );
        let snap = attempt.snapshot();
        assert!(snap.last_error.unwrap().contains("network"));
        let kept = h.store.load(&exam.id, "attempt-1", 3).unwrap();
        assert_eq!(kept.answers[2], Some(AnswerValue::Text("chat".into())));

        h.grader.fail_submit.store(false, Ordering::SeqCst);
        assert_eq!(
            attempt.submit().await.unwrap(),
            SubmitOutcome::Finished(AttemptState::Submitted)
        );
        assert_eq!(h.grader.submits.load(Ordering::SeqCst), 2);
        assert_eq!(h.store.load(&exam.id, "attempt-1", 3), None);
    }

    #[tokio::test]
    async fn failed_grading_retries_grading_only() {
        let h = Harness::new(StubGrader {
            fail_grade: AtomicBool::new(true),
            ..Default::default()
        });
        let attempt = h.attempt(&Arc::new(sample_exam(4)), AttemptOptions::default());
        attempt.start().unwrap();

        assert_eq!(
            attempt.submit().await.unwrap(),
            SubmitOutcome::Finished(AttemptState::Failed)
        );
        h.grader.fail_grade.store(false, Ordering::SeqCst);
        assert_eq!(
            attempt.submit().await.unwrap(),
            SubmitOutcome::Finished(AttemptState::Graded)
        );
        assert_eq!(h.grader.submits.load(Ordering::SeqCst), 1);
        assert_eq!(h.grader.grades.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expiry_submits_exactly_once() {
        let h = Harness::new(StubGrader::default());
        let exam = local_exam(3);
        let attempt = h.attempt(&exam, timed(1));
        attempt.start().unwrap();
        attempt.set_answer(0, AnswerValue::Choice(1)).unwrap();

        assert!(matches!(
            attempt.tick().await,
            Some(TimerStatus::Running { .. })
        ));
        h.clock.advance(chrono::Duration::seconds(61));
        assert_eq!(attempt.tick().await, Some(TimerStatus::Expired));
        for _ in 0..3 {
            assert_eq!(attempt.tick().await, None);
        }

        assert_eq!(attempt.state(), AttemptState::Expired);
        assert_eq!(h.grader.submits.load(Ordering::SeqCst), 1);
        assert!(attempt.submit().await.is_err());
        assert_eq!(h.store.load(&exam.id, "attempt-1", 3), None);
        let snap = attempt.snapshot();
        assert_eq!(snap.answers[0], Some(AnswerValue::Choice(1)));
        assert!(snap.result.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_forces_submission_after_limit() {
        let mut h = Harness::new(StubGrader::default());
        h.config.tick_interval = Duration::from_secs(1);
        let attempt = h.attempt(&local_exam(3), timed(1));
        attempt.start().unwrap();
        assert!(attempt.ticker_active());

        h.clock.advance(chrono::Duration::seconds(75));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(attempt.state(), AttemptState::Expired);
        assert_eq!(h.grader.submits.load(Ordering::SeqCst), 1);
        assert!(!attempt.ticker_active());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_cancels_ticker() {
        let mut h = Harness::new(StubGrader::default());
        h.config.tick_interval = Duration::from_secs(1);
        let attempt = h.attempt(&local_exam(3), timed(1));
        attempt.start().unwrap();
        attempt.submit().await.unwrap();
        assert!(!attempt.ticker_active());

        h.clock.advance(chrono::Duration::seconds(120));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(attempt.state(), AttemptState::Submitted);
        assert_eq!(h.grader.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_submission_failure_is_terminal() {
        let h = Harness::new(StubGrader {
            fail_submit: AtomicBool::new(true),
            ..Default::default()
        });
        let exam = local_exam(3);
        let attempt = h.attempt(&exam, timed(1));
        attempt.start().unwrap();
        h.clock.advance(chrono::Duration::seconds(60));
        attempt.tick().await;

        assert_eq!(attempt.state(), AttemptState::Expired);
        assert!(attempt.snapshot().last_error.is_some());
        assert!(h.store.load(&exam.id, "attempt-1", 3).is_some());
        assert!(attempt.submit().await.is_err());
    }

    #[test]
    fn untimed_attempt_never_expires() {
        let h = Harness::new(StubGrader::default());
        let attempt = h.attempt(&local_exam(3), AttemptOptions::default());
        attempt.start().unwrap();
        h.clock.advance(chrono::Duration::days(2));
        assert_eq!(attempt.snapshot().remaining_secs, None);
        assert_eq!(attempt.state(), AttemptState::InProgress);
    }

    #[test]
    fn abandon_discards_draft() {
        let h = Harness::new(StubGrader::default());
        let exam = local_exam(3);
        let attempt = h.attempt(&exam, AttemptOptions::default());
        attempt.start().unwrap();
        attempt.abandon().unwrap();
        assert_eq!(attempt.state(), AttemptState::Abandoned);
        assert_eq!(h.store.load(&exam.id, "attempt-1", 3), None);
        assert!(attempt.abandon().is_err());
    }

    #[test]
    fn storage_failure_degrades_without_error() {
        let backend = Arc::new(MemoryStore::with_quota(4));
        let mut h = Harness::new(StubGrader::default());
        h.store = Arc::new(DraftStore::new(backend.clone()));
        h.backend = backend;

        let attempt = h.attempt(&local_exam(3), AttemptOptions::default());
        attempt.start().unwrap();
        attempt.set_answer(0, AnswerValue::Choice(0)).unwrap();
        let snap = attempt.snapshot();
        assert_eq!(snap.durability, Durability::InMemoryOnly);
        assert_eq!(snap.answers[0], Some(AnswerValue::Choice(0)));
        assert!(h.backend.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandon_outlasts_a_save_already_writing() {
        let (backend, entered, release) = GatedStore::new();
        let mut h = Harness::new(StubGrader::default());
        h.store = Arc::new(DraftStore::new(backend.clone()));
        h.config.save_debounce = Duration::from_millis(10);
        let exam = local_exam(3);
        let attempt = h.attempt(&exam, AttemptOptions::default());
        attempt.start().unwrap();

        backend.arm();
        attempt.set_answer(0, AnswerValue::Choice(1)).unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let abandoning = {
            let attempt = Arc::clone(&attempt);
            std::thread::spawn(move || attempt.abandon())
        };
        std::thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();
        abandoning.join().unwrap().unwrap();

        assert_eq!(attempt.state(), AttemptState::Abandoned);
        assert_eq!(h.store.load(&exam.id, "attempt-1", 3), None);
        assert!(h.store.attempts_for_exam(&exam.id).is_empty());
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl AttemptObserver for RecordingObserver {
        fn on_state_change(&self, _: &str, from: AttemptState, to: AttemptState) {
            self.events.lock().unwrap().push(format!("{from} -> {to}"));
        }

        fn on_durability_degraded(&self, attempt_id: &str) {
            self.events.lock().unwrap().push(format!("degraded {attempt_id}"));
        }
    }

    #[tokio::test]
    async fn observer_sees_transitions_and_degradation() {
        let mut h = Harness::new(StubGrader::default());
        h.store = Arc::new(DraftStore::new(Arc::new(MemoryStore::with_quota(4))));
        let observer = Arc::new(RecordingObserver::default());
        let services = AttemptServices {
            observer: observer.clone(),
            ..h.services()
        };
        let attempt = AttemptLifecycle::new(local_exam(3), "attempt-1", AttemptOptions::default(), services);
        attempt.start().unwrap();
        attempt.set_answer(0, AnswerValue::Choice(0)).unwrap();
        attempt.submit().await.unwrap();

        assert_eq!(
            *observer.events.lock().unwrap(),
            vec![
                "degraded attempt-1".to_string(),
                "not started -> in progress".to_string(),
                "in progress -> submitting".to_string(),
                "submitting -> submitted".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_attempt_flushes_pending_save() {
        let mut h = Harness::new(StubGrader::default());
        h.config.save_debounce = Duration::from_secs(10);
        let exam = local_exam(3);
        let attempt = h.attempt(&exam, AttemptOptions::default());
        attempt.start().unwrap();
        attempt.set_answer(1, AnswerValue::Choices(vec![0])).unwrap();
        drop(attempt);

        let stored = h.store.load(&exam.id, "attempt-1", 3).unwrap();
        assert_eq!(stored.answers[1], Some(AnswerValue::Choices(vec![0])));
    }
}
