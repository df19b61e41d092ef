//! examdraft-store — Durable session storage for attempt drafts.
//!
//! Provides [`FileStore`], a directory-per-session implementation of
//! [`examdraft_core::traits::KeyValueStore`]. The in-memory store lives in
//! `examdraft-core` because the engine itself falls back on it.

pub mod file;

pub use file::FileStore;
