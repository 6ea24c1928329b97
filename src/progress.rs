// Progress reporting and cooperative cancellation.
//
// The sink and the cancel token are the only concurrency surface the
// orchestrator exposes to callers: erasure runs on a worker, the caller polls
// or subscribes to updates and may request cancellation at any time.
// Cancellation is honored at the next chunk boundary inside the current pass,
// never mid-write, so a pass result is always unambiguous about how many
// bytes actually landed.

use crate::WipeState;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Snapshot of operation progress published after every chunk and phase
/// transition.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub phase: WipeState,
    /// 1-based index of the running pass, 0 outside ERASING.
    pub current_pass: u32,
    pub total_passes: u32,
    pub percent: f64,
    pub bytes_written: u64,
    pub total_bytes: u64,
}

impl ProgressUpdate {
    pub fn phase_only(phase: WipeState) -> Self {
        Self {
            phase,
            current_pass: 0,
            total_passes: 0,
            percent: 0.0,
            bytes_written: 0,
            total_bytes: 0,
        }
    }
}

/// Receives progress updates. Implementations must be cheap and non-blocking;
/// the dispatcher calls this from the write loop.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, update: ProgressUpdate);
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _update: ProgressUpdate) {}
}

/// Pollable sink: keeps the latest update for callers that poll instead of
/// subscribing.
#[derive(Default)]
pub struct SharedProgress {
    latest: Mutex<Option<ProgressUpdate>>,
}

impl SharedProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn latest(&self) -> Option<ProgressUpdate> {
        self.latest.lock().ok().and_then(|g| g.clone())
    }
}

impl ProgressSink for SharedProgress {
    fn publish(&self, update: ProgressUpdate) {
        if let Ok(mut guard) = self.latest.lock() {
            *guard = Some(update);
        }
    }
}

/// Shared cancellation flag. Cloning hands out another handle to the same
/// flag; setting it is sticky for the lifetime of the operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.request_cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn shared_progress_keeps_latest() {
        let sink = SharedProgress::new();
        assert!(sink.latest().is_none());

        sink.publish(ProgressUpdate::phase_only(WipeState::Authorizing));
        sink.publish(ProgressUpdate {
            phase: WipeState::Erasing,
            current_pass: 2,
            total_passes: 3,
            percent: 50.0,
            bytes_written: 512,
            total_bytes: 1024,
        });

        let latest = sink.latest().unwrap();
        assert_eq!(latest.phase, WipeState::Erasing);
        assert_eq!(latest.current_pass, 2);
    }
}
