//! examdraft — Exam attempts that survive reloads.
//!
//! The facade over the examdraft crates: an [`ExamEngine`] that starts and
//! resumes attempts, the [`ExamSource`] it reads exams from, and the unified
//! TOML configuration that picks a draft store and grading collaborator.
//!
//! ```no_run
//! use std::sync::Arc;
//! use examdraft::{AnswerValue, AttemptOptions, ExamEngine, StaticExamSource};
//!
//! # async fn run() -> anyhow::Result<()> {
//! examdraft::init_tracing();
//! let config = examdraft::load_config()?;
//! let exams = StaticExamSource::from_dir("exams".as_ref())?;
//! let engine = ExamEngine::from_config(&config, Arc::new(exams), None)?;
//!
//! let attempt = engine.start("fr-a2", AttemptOptions::default())?;
//! attempt.set_answer(0, AnswerValue::Choice(1))?;
//! attempt.submit().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;

pub use config::{load_config, load_config_from, ExamdraftConfig};
pub use engine::{ExamEngine, ExamSource, StaticExamSource};

pub use examdraft_core::error::AttemptError;
pub use examdraft_core::lifecycle::{AttemptLifecycle, AttemptSnapshot, AttemptState, SubmitOutcome};
pub use examdraft_core::model::{AnswerValue, AttemptOptions, ExamDefinition};

/// Install a `tracing` subscriber filtered by `RUST_LOG`, defaulting to
/// `examdraft=info`. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("examdraft=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
