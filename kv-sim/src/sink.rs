use std::sync::{Condvar, Mutex};
use std::time::Duration;

use kv_core::controller::CompletionSink;

use crate::error::SimError;

/// Single-slot [`CompletionSink`] for a CLI that submits one command at a
/// time and waits for its completion before exiting.
#[derive(Default)]
pub struct BlockingSink {
    slot: Mutex<Option<Completion>>,
    ready: Condvar,
}

pub struct Completion {
    pub status: u16,
    pub result_word: u32,
    pub data: Option<Vec<u8>>,
}

impl CompletionSink for BlockingSink {
    fn complete(&self, _cmd_handle: u64, status: u16, result_word: u32, data: Option<Vec<u8>>) {
        let mut slot = self.slot.lock().expect("completion slot poisoned");
        *slot = Some(Completion {
            status,
            result_word,
            data,
        });
        self.ready.notify_one();
    }
}

impl BlockingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block (with a generous timeout; `kv-sim` is a diagnostic tool, not a
    /// production client) until the submission this sink is attached to
    /// completes.
    pub fn wait(&self) -> Result<Completion, SimError> {
        let mut slot = self.slot.lock().expect("completion slot poisoned");
        loop {
            if let Some(completion) = slot.take() {
                return Ok(completion);
            }
            let (guard, timeout) = self
                .ready
                .wait_timeout(slot, Duration::from_secs(30))
                .expect("completion slot poisoned");
            slot = guard;
            if timeout.timed_out() && slot.is_none() {
                return Err(SimError::CompletionTimeout);
            }
        }
    }
}
