//! The attempt engine: exam lookup, attempt creation, and per-exam cleanup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context, Result};
use uuid::Uuid;

use examdraft_core::clock::{Clock, SystemClock};
use examdraft_core::draft::DraftStore;
use examdraft_core::error::AttemptError;
use examdraft_core::lifecycle::{
    AttemptLifecycle, AttemptObserver, AttemptServices, LifecycleConfig, NoopObserver,
};
use examdraft_core::model::{AttemptOptions, ExamDefinition};
use examdraft_core::parser;
use examdraft_core::store::MemoryStore;
use examdraft_core::traits::{GradingCollaborator, KeyValueStore};
use examdraft_grading::create_grader;
use examdraft_store::FileStore;

use crate::config::{ExamdraftConfig, StoreConfig, StoreKind};

/// Supplies exam definitions by id.
pub trait ExamSource: Send + Sync {
    fn exam(&self, exam_id: &str) -> Option<Arc<ExamDefinition>>;
}

/// A fixed set of exams held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticExamSource {
    exams: HashMap<String, Arc<ExamDefinition>>,
}

impl StaticExamSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `.toml` exam under `dir`. Files that fail to parse are skipped.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut source = Self::new();
        for exam in parser::load_exam_dir(dir)? {
            for warning in parser::validate_exam(&exam) {
                tracing::warn!(exam_id = %exam.id, question = ?warning.question, "{}", warning.message);
            }
            source.insert(exam);
        }
        tracing::info!(count = source.len(), dir = %dir.display(), "loaded exams");
        Ok(source)
    }

    /// Add an exam, replacing any with the same id.
    pub fn insert(&mut self, exam: ExamDefinition) {
        self.exams.insert(exam.id.clone(), Arc::new(exam));
    }

    pub fn len(&self) -> usize {
        self.exams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exams.is_empty()
    }

    /// Exam ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.exams.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl ExamSource for StaticExamSource {
    fn exam(&self, exam_id: &str) -> Option<Arc<ExamDefinition>> {
        self.exams.get(exam_id).cloned()
    }
}

/// Creates and resumes attempts against one draft store and grader.
pub struct ExamEngine {
    source: Arc<dyn ExamSource>,
    store: Arc<DraftStore>,
    grader: Arc<dyn GradingCollaborator>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn AttemptObserver>,
    config: LifecycleConfig,
    /// Attempts handed out by this engine, for `delete_exam`.
    live: Mutex<Vec<Weak<AttemptLifecycle>>>,
}

impl ExamEngine {
    pub fn new(
        source: Arc<dyn ExamSource>,
        store: Arc<DraftStore>,
        grader: Arc<dyn GradingCollaborator>,
    ) -> Self {
        Self {
            source,
            store,
            grader,
            clock: Arc::new(SystemClock),
            observer: Arc::new(NoopObserver),
            config: LifecycleConfig::default(),
            live: Mutex::new(Vec::new()),
        }
    }

    /// Build an engine from configuration.
    ///
    /// `grader` overrides the collaborator described by `[grading]`.
    pub fn from_config(
        config: &ExamdraftConfig,
        source: Arc<dyn ExamSource>,
        grader: Option<Arc<dyn GradingCollaborator>>,
    ) -> Result<Self> {
        let backend = open_store(&config.store)?;
        let store = Arc::new(DraftStore::new(backend).with_prefix(config.engine.key_prefix.clone()));
        let grader = match grader {
            Some(grader) => grader,
            None => create_grader(&config.grading)?,
        };
        Ok(Self::new(source, store, grader).with_config(config.engine.lifecycle()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<DraftStore> {
        &self.store
    }

    /// Start a new attempt with a fresh id.
    pub fn start(
        &self,
        exam_id: &str,
        options: AttemptOptions,
    ) -> Result<Arc<AttemptLifecycle>, AttemptError> {
        let exam = self.exam(exam_id)?;
        let attempt_id = Uuid::new_v4().to_string();
        let attempt = AttemptLifecycle::new(exam, attempt_id, options, self.services());
        attempt.start()?;
        tracing::info!(exam_id, attempt_id = %attempt.attempt_id(), "attempt started");
        self.track(&attempt);
        Ok(attempt)
    }

    /// Continue an attempt from its stored draft.
    pub fn resume(
        &self,
        exam_id: &str,
        attempt_id: &str,
    ) -> Result<Arc<AttemptLifecycle>, AttemptError> {
        let exam = self.exam(exam_id)?;
        // The draft carries the options chosen at start.
        let attempt =
            AttemptLifecycle::new(exam, attempt_id, AttemptOptions::default(), self.services());
        attempt.resume()?;
        self.track(&attempt);
        Ok(attempt)
    }

    /// Remove every stored draft of an exam. Returns how many were indexed.
    ///
    /// Live attempts of the exam are abandoned, so a save they still had
    /// pending cannot bring a draft back.
    pub fn delete_exam(&self, exam_id: &str) -> usize {
        let removed = self.store.clear_all_for_exam(exam_id);
        for attempt in self.live_attempts(exam_id) {
            if attempt.abandon().is_ok() {
                tracing::debug!(exam_id, attempt_id = %attempt.attempt_id(), "abandoned live attempt");
            }
        }
        tracing::info!(exam_id, removed, "deleted exam drafts");
        removed
    }

    /// Attempts of `exam_id` that have a stored draft.
    pub fn pending_attempts(&self, exam_id: &str) -> Vec<String> {
        self.store.attempts_for_exam(exam_id)
    }

    fn track(&self, attempt: &Arc<AttemptLifecycle>) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(attempt));
    }

    fn live_attempts(&self, exam_id: &str) -> Vec<Arc<AttemptLifecycle>> {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.retain(|weak| weak.strong_count() > 0);
        live.iter()
            .filter_map(Weak::upgrade)
            .filter(|attempt| attempt.exam_id() == exam_id)
            .collect()
    }

    fn exam(&self, exam_id: &str) -> Result<Arc<ExamDefinition>, AttemptError> {
        self.source
            .exam(exam_id)
            .ok_or_else(|| AttemptError::ExamNotFound(exam_id.to_string()))
    }

    fn services(&self) -> AttemptServices {
        AttemptServices {
            store: Arc::clone(&self.store),
            grader: Arc::clone(&self.grader),
            clock: Arc::clone(&self.clock),
            observer: Arc::clone(&self.observer),
            config: self.config.clone(),
        }
    }
}

fn open_store(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.kind {
        StoreKind::Memory => {
            let store = match config.quota_bytes {
                Some(quota) => MemoryStore::with_quota(
                    usize::try_from(quota).context("quota_bytes does not fit in memory")?,
                ),
                None => MemoryStore::new(),
            };
            Ok(Arc::new(store))
        }
        StoreKind::File => {
            let mut store = match &config.dir {
                Some(root) => FileStore::new_session(root)?,
                None => FileStore::temporary()?,
            };
            if let Some(quota) = config.quota_bytes {
                store = store.with_quota(quota);
            }
            tracing::info!(dir = %store.dir().display(), "storing drafts on disk");
            Ok(Arc::new(store))
        }
    }
}
