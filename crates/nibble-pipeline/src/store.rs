//! Thread-keyed conversation store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::state::{ConversationState, ThreadId};

/// Exclusive access to one thread's state, held for a whole invocation
pub type StateGuard = OwnedMutexGuard<ConversationState>;

struct Slot {
    state: Arc<AsyncMutex<ConversationState>>,
    last_access: Instant,
}

/// Maps thread ids to conversation state.
///
/// Each thread has its own async mutex, so invocations on one thread run
/// one after another while different threads proceed independently. With a
/// TTL, threads idle for longer than it are dropped on the next access.
pub struct StateStore {
    slots: Mutex<HashMap<ThreadId, Slot>>,
    ttl: Option<Duration>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Store that keeps every thread for the life of the process
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Store that evicts threads idle for longer than `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Lock a thread's state, creating it empty on first use
    pub async fn lock(&self, thread: &ThreadId) -> StateGuard {
        let state = {
            let mut slots = self.slots.lock();
            self.evict_locked(&mut slots);
            let slot = slots.entry(*thread).or_insert_with(|| Slot {
                state: Arc::new(AsyncMutex::new(ConversationState::default())),
                last_access: Instant::now(),
            });
            slot.last_access = Instant::now();
            Arc::clone(&slot.state)
        };
        state.lock_owned().await
    }

    /// Snapshot of a thread's state, waiting for any running invocation
    pub async fn get(&self, thread: &ThreadId) -> Option<ConversationState> {
        let state = {
            let slots = self.slots.lock();
            Arc::clone(&slots.get(thread)?.state)
        };
        let guard = state.lock().await;
        Some(guard.clone())
    }

    /// Forget a thread. Returns whether it existed.
    pub fn remove(&self, thread: &ThreadId) -> bool {
        self.slots.lock().remove(thread).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Drop idle threads now. Returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let mut slots = self.slots.lock();
        self.evict_locked(&mut slots)
    }

    fn evict_locked(&self, slots: &mut HashMap<ThreadId, Slot>) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = slots.len();
        // A slot whose mutex Arc is shared is in use by an invocation.
        slots.retain(|_, slot| {
            slot.last_access.elapsed() < ttl || Arc::strong_count(&slot.state) > 1
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle conversation threads");
        }
        evicted
    }
}
