//! examdraft-grading — Grading collaborator integrations.
//!
//! Implements the `GradingCollaborator` trait for a remote HTTP grading
//! service, plus a network-free mock that scores attempts locally.

pub mod config;
pub mod http;
pub mod mock;

pub use config::{create_grader, GradingConfig};
pub use examdraft_core::error::GradingError;
pub use http::HttpGrader;
pub use mock::MockGrader;
