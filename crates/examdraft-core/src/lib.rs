//! examdraft-core — Exam attempt lifecycle, answer ledger, and draft persistence.
//!
//! This crate defines the data model, the collaborator traits, and the
//! attempt state machine that the rest of examdraft builds on. Storage
//! backends and grading clients live in their own crates and plug in through
//! [`traits::KeyValueStore`] and [`traits::GradingCollaborator`].

pub mod clock;
pub mod draft;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod order;
pub mod pagination;
pub mod parser;
pub mod results;
pub mod scheduler;
pub mod store;
pub mod timer;
pub mod traits;
