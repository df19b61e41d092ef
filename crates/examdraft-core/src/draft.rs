//! Durable attempt drafts.
//!
//! A draft is the resumable snapshot of an in-progress attempt. It is stored
//! as a JSON document under a key derived from `(exam_id, attempt_id)`, and
//! each exam keeps a secondary index of its attempt ids so every draft of an
//! exam can be removed without scanning the store.
//!
//! Storage failures never reach the caller: `save` reports the resulting
//! [`Durability`] and `load` treats anything unreadable as "no draft".

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, ValidationError};
use crate::model::AnswerValue;
use crate::order::{is_permutation, QuestionOrderPlanner};
use crate::traits::KeyValueStore;

/// Default key namespace.
pub const DEFAULT_KEY_PREFIX: &str = "examdraft";

/// The persisted state of an in-progress attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptDraft {
    /// Set once when the attempt starts; never rewritten on resume.
    pub started_at: DateTime<Utc>,
    /// One slot per question in authoring order.
    pub answers: Vec<Option<AnswerValue>>,
    /// 0 means untimed.
    #[serde(default)]
    pub time_limit_minutes: u32,
    #[serde(default)]
    pub shuffle_questions: bool,
    /// Present only when shuffling was requested; immutable once written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffled_order: Option<Vec<usize>>,
    /// Position in display order.
    #[serde(default)]
    pub current_question_index: usize,
}

impl AttemptDraft {
    pub fn new(
        started_at: DateTime<Utc>,
        question_count: usize,
        time_limit_minutes: u32,
        shuffled_order: Option<Vec<usize>>,
    ) -> Self {
        Self {
            started_at,
            answers: vec![None; question_count],
            time_limit_minutes,
            shuffle_questions: shuffled_order.is_some(),
            shuffled_order,
            current_question_index: 0,
        }
    }

    /// Fit the draft to `question_count` questions.
    ///
    /// Answers are truncated or padded with absent slots, a stored order keeps
    /// its relative arrangement, and the current position is clamped.
    pub fn reconcile(&mut self, question_count: usize) {
        self.answers.resize(question_count, None);
        if let Some(order) = &mut self.shuffled_order {
            if !is_permutation(order, question_count) {
                *order = QuestionOrderPlanner::reconcile(order, question_count);
            }
        }
        self.current_question_index = self
            .current_question_index
            .min(question_count.saturating_sub(1));
    }

    /// Question indices in the order they are shown.
    pub fn display_order(&self) -> Vec<usize> {
        QuestionOrderPlanner::display_order(self.answers.len(), self.shuffled_order.as_deref())
    }

    /// Decode a stored record, tolerating damaged answer slots.
    ///
    /// Fails when the record is not a JSON object, lacks a valid `startedAt`,
    /// or its `answers` is not an array.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::MalformedDraft(e.to_string()))?;
        let Value::Object(record) = value else {
            return Err(ValidationError::MalformedDraft("not an object".into()));
        };

        let started_at = record
            .get("startedAt")
            .cloned()
            .ok_or_else(|| ValidationError::MalformedDraft("missing startedAt".into()))
            .and_then(|v| {
                serde_json::from_value::<DateTime<Utc>>(v)
                    .map_err(|e| ValidationError::MalformedDraft(format!("startedAt: {e}")))
            })?;

        let Some(Value::Array(raw_answers)) = record.get("answers") else {
            return Err(ValidationError::MalformedDraft(
                "answers is not a sequence".into(),
            ));
        };
        let answers = raw_answers
            .iter()
            .map(|slot| serde_json::from_value::<Option<AnswerValue>>(slot.clone()).unwrap_or(None))
            .collect();

        let time_limit_minutes = record
            .get("timeLimitMinutes")
            .and_then(Value::as_u64)
            .and_then(|m| u32::try_from(m).ok())
            .unwrap_or(0);
        let shuffle_questions = record
            .get("shuffleQuestions")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let shuffled_order = record
            .get("shuffledOrder")
            .and_then(|v| serde_json::from_value::<Vec<usize>>(v.clone()).ok());
        let current_question_index = record
            .get("currentQuestionIndex")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(0);

        Ok(Self {
            started_at,
            answers,
            time_limit_minutes,
            shuffle_questions,
            shuffled_order,
            current_question_index,
        })
    }
}

/// How durable the most recent save of a draft is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Durability {
    /// The draft is in the durable store.
    Persisted,
    /// The durable store refused the write; the attempt lives only in memory.
    InMemoryOnly,
}

/// Attempt-scoped access to drafts in a [`KeyValueStore`].
pub struct DraftStore {
    backend: Arc<dyn KeyValueStore>,
    prefix: String,
    /// Serializes read-modify-write cycles on index records.
    index_lock: Mutex<()>,
}

impl DraftStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Key of the draft of one attempt.
    ///
    /// Ids are escaped so `:` inside an id never acts as a separator.
    pub fn draft_key(&self, exam_id: &str, attempt_id: &str) -> String {
        format!(
            "{}:draft:{}:{}",
            self.prefix,
            key_part(exam_id),
            key_part(attempt_id)
        )
    }

    /// Key of the exam's attempt index.
    pub fn index_key(&self, exam_id: &str) -> String {
        format!("{}:index:{}", self.prefix, key_part(exam_id))
    }

    /// Persist a draft. Failures are logged and reported as `InMemoryOnly`.
    pub fn save(&self, exam_id: &str, attempt_id: &str, draft: &AttemptDraft) -> Durability {
        let result = serde_json::to_vec(draft)
            .map_err(StorageError::from)
            .and_then(|bytes| self.backend.set(&self.draft_key(exam_id, attempt_id), &bytes));

        match result {
            Ok(()) => {
                tracing::debug!(exam_id, attempt_id, "draft saved");
                if let Err(e) = self.add_to_index(exam_id, attempt_id) {
                    tracing::warn!(exam_id, attempt_id, error = %e, "failed to update draft index");
                }
                Durability::Persisted
            }
            Err(e) => {
                tracing::warn!(
                    exam_id,
                    attempt_id,
                    error = %e,
                    "draft save failed, continuing with in-memory state only"
                );
                Durability::InMemoryOnly
            }
        }
    }

    /// Load and reconcile a draft, or `None` when there is no usable draft.
    pub fn load(
        &self,
        exam_id: &str,
        attempt_id: &str,
        question_count: usize,
    ) -> Option<AttemptDraft> {
        let bytes = match self.backend.get(&self.draft_key(exam_id, attempt_id)) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(exam_id, attempt_id, error = %e, "draft read failed");
                return None;
            }
        };

        let mut draft = match AttemptDraft::from_json(&bytes) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(exam_id, attempt_id, "ignoring stored draft: {e}");
                return None;
            }
        };

        if draft.answers.len() != question_count {
            tracing::info!(
                exam_id,
                attempt_id,
                stored = draft.answers.len(),
                question_count,
                "exam changed since draft was saved, reconciling"
            );
        }
        draft.reconcile(question_count);
        tracing::debug!(exam_id, attempt_id, "draft loaded");
        Some(draft)
    }

    /// Remove one draft.
    pub fn clear(&self, exam_id: &str, attempt_id: &str) {
        if let Err(e) = self.backend.remove(&self.draft_key(exam_id, attempt_id)) {
            tracing::warn!(exam_id, attempt_id, error = %e, "failed to remove draft");
        }
        if let Err(e) = self.remove_from_index(exam_id, attempt_id) {
            tracing::warn!(exam_id, attempt_id, error = %e, "failed to update draft index");
        }
    }

    /// Remove every draft of an exam. Returns how many attempts were indexed.
    pub fn clear_all_for_exam(&self, exam_id: &str) -> usize {
        let _guard = self.index_lock.lock().unwrap_or_else(|e| e.into_inner());
        let attempts = self.read_index(exam_id);
        for attempt_id in &attempts {
            if let Err(e) = self.backend.remove(&self.draft_key(exam_id, attempt_id)) {
                tracing::warn!(exam_id, attempt_id, error = %e, "failed to remove draft");
            }
        }
        if let Err(e) = self.backend.remove(&self.index_key(exam_id)) {
            tracing::warn!(exam_id, error = %e, "failed to remove draft index");
        }
        tracing::debug!(exam_id, count = attempts.len(), "cleared drafts for exam");
        attempts.len()
    }

    /// Attempt ids with a stored draft for `exam_id`.
    pub fn attempts_for_exam(&self, exam_id: &str) -> Vec<String> {
        let _guard = self.index_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_index(exam_id)
    }

    fn read_index(&self, exam_id: &str) -> Vec<String> {
        match self.backend.get(&self.index_key(exam_id)) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(exam_id, "ignoring unreadable draft index: {e}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(exam_id, error = %e, "draft index read failed");
                Vec::new()
            }
        }
    }

    fn write_index(&self, exam_id: &str, attempts: &[String]) -> Result<(), StorageError> {
        let key = self.index_key(exam_id);
        if attempts.is_empty() {
            return self.backend.remove(&key);
        }
        let bytes = serde_json::to_vec(attempts)?;
        self.backend.set(&key, &bytes)
    }

    fn add_to_index(&self, exam_id: &str, attempt_id: &str) -> Result<(), StorageError> {
        let _guard = self.index_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut attempts = self.read_index(exam_id);
        if attempts.iter().any(|a| a == attempt_id) {
            return Ok(());
        }
        attempts.push(attempt_id.to_string());
        self.write_index(exam_id, &attempts)
    }

    fn remove_from_index(&self, exam_id: &str, attempt_id: &str) -> Result<(), StorageError> {
        let _guard = self.index_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut attempts = self.read_index(exam_id);
        let before = attempts.len();
        attempts.retain(|a| a != attempt_id);
        if attempts.len() == before {
            return Ok(());
        }
        self.write_index(exam_id, &attempts)
    }
}

/// Escape `%` and `:` in one key component.
fn key_part(id: &str) -> Cow<'_, str> {
    if !id.contains(|c: char| c == ':' || c == '%') {
        return Cow::Borrowed(id);
    }
    let mut escaped = String::with_capacity(id.len() + 6);
    for c in id.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}
