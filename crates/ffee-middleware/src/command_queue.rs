//! Thread-safe FIFO of [`Command`]s between the presentation thread and the
//! command dispatcher thread.
//!
//! Mirrors the classic producer/consumer queue with `task_done`/`join`
//! bookkeeping: every command handed out by [`CommandQueue::get_nowait`] must
//! be acknowledged with [`CommandQueue::task_done`] before [`CommandQueue::join`]
//! returns.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ffee_types::{Command, FeeError};
use tracing::info;

#[derive(Debug, Default)]
struct State {
    items: VecDeque<Command>,
    /// Commands put but not yet acknowledged.
    unfinished: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    all_done: Condvar,
}

/// Cloneable handle; all clones share one queue.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    shared: Arc<Shared>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave `State` half-updated.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `command`.  Never blocks beyond the internal lock.
    pub fn put(&self, command: Command) {
        let mut state = self.lock();
        state.items.push_back(command);
        state.unfinished += 1;
    }

    /// Pop the oldest command, or `None` when the queue is empty.
    pub fn get_nowait(&self) -> Option<Command> {
        self.lock().items.pop_front()
    }

    /// Acknowledge one command previously returned by `get_nowait`.
    ///
    /// # Errors
    ///
    /// [`FeeError::Channel`] when called more times than commands were put.
    pub fn task_done(&self) -> Result<(), FeeError> {
        let mut state = self.lock();
        if state.unfinished == 0 {
            return Err(FeeError::Channel("task_done() called too many times".into()));
        }
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.shared.all_done.notify_all();
        }
        Ok(())
    }

    /// Remove every pending command and return them oldest first.  Drained
    /// commands count as done for [`CommandQueue::join`].
    pub fn clear(&self) -> Vec<Command> {
        let mut state = self.lock();
        let drained: Vec<Command> = state.items.drain(..).collect();
        state.unfinished = state.unfinished.saturating_sub(drained.len());
        if state.unfinished == 0 {
            self.shared.all_done.notify_all();
        }
        drop(state);

        for command in &drained {
            info!(command = %command, "Drained pending command");
        }
        drained
    }

    /// Block until every command put has been acknowledged or drained.
    pub fn join(&self) {
        let mut state = self.lock();
        while state.unfinished > 0 {
            state = self
                .shared
                .all_done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// [`CommandQueue::join`] with an upper bound.  Returns `true` if the
    /// queue became idle in time.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.unfinished > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .all_done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Number of commands waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commands put but not yet acknowledged, including in-flight ones.
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }
}
