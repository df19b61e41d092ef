//! Debounced draft saves.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::draft::{AttemptDraft, DraftStore, Durability};

/// Single-slot pending save for one attempt.
///
/// A new request replaces any save that has not been written yet, so rapid
/// mutations collapse into one write of the most recent state. Outside a
/// tokio runtime every request is written immediately.
///
/// Deferred writes run while holding the slot lock and only if no later
/// request has bumped the generation. `cancel` and `flush` take the same
/// lock, so once either returns no older save can land afterwards.
pub struct SaveScheduler {
    store: Arc<DraftStore>,
    exam_id: String,
    attempt_id: String,
    debounce: Duration,
    slot: Arc<Mutex<Slot>>,
    durability: Arc<Mutex<Durability>>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl Slot {
    /// Invalidate whatever is pending and return the new generation.
    fn supersede(&mut self) -> u64 {
        self.generation += 1;
        if let Some(previous) = self.pending.take() {
            previous.abort();
        }
        self.generation
    }
}

impl SaveScheduler {
    pub fn new(
        store: Arc<DraftStore>,
        exam_id: impl Into<String>,
        attempt_id: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            exam_id: exam_id.into(),
            attempt_id: attempt_id.into(),
            debounce,
            slot: Arc::new(Mutex::new(Slot::default())),
            durability: Arc::new(Mutex::new(Durability::Persisted)),
        }
    }

    /// Queue `draft` for saving after the debounce interval.
    ///
    /// Returns `None` when the save was deferred, or the durability of an
    /// immediate save.
    pub fn schedule(&self, draft: AttemptDraft) -> Option<Durability> {
        let mut slot = lock(&self.slot);
        let generation = slot.supersede();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !self.debounce.is_zero() => runtime,
            _ => return Some(self.save_now(&draft)),
        };

        let store = Arc::clone(&self.store);
        let shared = Arc::clone(&self.slot);
        let durability = Arc::clone(&self.durability);
        let exam_id = self.exam_id.clone();
        let attempt_id = self.attempt_id.clone();
        let debounce = self.debounce;
        slot.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            let mut slot = lock(&shared);
            if slot.generation != generation {
                return;
            }
            let outcome = store.save(&exam_id, &attempt_id, &draft);
            *lock(&durability) = outcome;
            slot.pending = None;
        }));
        None
    }

    /// Drop any pending save and write `draft` now.
    pub fn flush(&self, draft: &AttemptDraft) -> Durability {
        let mut slot = lock(&self.slot);
        slot.supersede();
        self.save_now(draft)
    }

    /// Durability of the most recent completed save.
    pub fn durability(&self) -> Durability {
        *lock(&self.durability)
    }

    fn save_now(&self, draft: &AttemptDraft) -> Durability {
        let outcome = self.store.save(&self.exam_id, &self.attempt_id, draft);
        *lock(&self.durability) = outcome;
        outcome
    }

    /// Drop any pending save without writing it.
    ///
    /// Waits for a deferred write that is already running to finish.
    pub fn cancel(&self) {
        lock(&self.slot).supersede();
    }

    /// Whether a deferred save has not completed yet.
    pub fn has_pending(&self) -> bool {
        lock(&self.slot)
            .pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
