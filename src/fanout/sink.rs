//! One listener's output

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type ListenerId = Uuid;

/// Sink lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkPhase {
    /// Accepting writes
    Open,
    /// Last write was rejected; waiting to become writable again
    Draining,
    /// Disconnected or evicted; terminal
    Closed,
}

/// Raw result of a non-blocking write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TryWrite {
    Accepted,
    Full,
    Closed,
}

#[derive(Debug)]
struct SinkState {
    phase: SinkPhase,
    consecutive_rejects: u32,
    /// A writable-again watcher is pending
    writable_watch: bool,
    /// The closed watcher has been attached
    closed_watch: bool,
}

/// Bounded byte channel feeding one HTTP response.
///
/// The sink owns its backpressure bookkeeping; the governor only drives it.
pub struct Sink {
    id: ListenerId,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    writable: Notify,
    state: Mutex<SinkState>,
    connected_at: DateTime<Utc>,
    bytes_sent: AtomicU64,
}

impl Sink {
    /// New open sink buffering up to `capacity` chunks
    pub fn channel(capacity: usize) -> (Arc<Sink>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Sink {
            id: Uuid::new_v4(),
            tx,
            cancel: CancellationToken::new(),
            writable: Notify::new(),
            state: Mutex::new(SinkState {
                phase: SinkPhase::Open,
                consecutive_rejects: 0,
                writable_watch: false,
                closed_watch: false,
            }),
            connected_at: Utc::now(),
            bytes_sent: AtomicU64::new(0),
        };
        (Arc::new(sink), rx)
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn phase(&self) -> SinkPhase {
        self.state.lock().phase
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn consecutive_rejects(&self) -> u32 {
        self.state.lock().consecutive_rejects
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Close the sink. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase == SinkPhase::Closed {
                return false;
            }
            state.phase = SinkPhase::Closed;
        }
        self.cancel.cancel();
        true
    }

    /// Resolves once the sink is closed
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves after the sink signalled it can take data again
    pub async fn writable(&self) {
        self.writable.notified().await
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<Bytes> {
        &self.tx
    }

    pub(crate) fn try_write(&self, chunk: Bytes) -> TryWrite {
        if self.is_closed() {
            return TryWrite::Closed;
        }
        let len = chunk.len() as u64;
        match self.tx.try_send(chunk) {
            Ok(()) => {
                let mut state = self.state.lock();
                state.consecutive_rejects = 0;
                if state.phase == SinkPhase::Draining {
                    state.phase = SinkPhase::Open;
                }
                drop(state);
                self.bytes_sent.fetch_add(len, Ordering::Relaxed);
                TryWrite::Accepted
            }
            Err(TrySendError::Full(_)) => TryWrite::Full,
            Err(TrySendError::Closed(_)) => {
                self.close();
                TryWrite::Closed
            }
        }
    }

    /// Count a rejected write; returns the new consecutive count
    pub(crate) fn record_reject(&self) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_rejects = state.consecutive_rejects.saturating_add(1);
        if state.phase == SinkPhase::Open {
            state.phase = SinkPhase::Draining;
        }
        state.consecutive_rejects
    }

    /// Claim the single writable-again watcher slot
    pub(crate) fn claim_writable_watch(&self) -> bool {
        let mut state = self.state.lock();
        if state.writable_watch || state.phase == SinkPhase::Closed {
            return false;
        }
        state.writable_watch = true;
        true
    }

    /// Claim the closed watcher slot; succeeds once per sink
    pub(crate) fn claim_closed_watch(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed_watch || state.phase == SinkPhase::Closed {
            return false;
        }
        state.closed_watch = true;
        true
    }

    /// Writable-again signal: reset the counter and wake a waiting feeder
    pub(crate) fn mark_writable(&self) {
        let mut state = self.state.lock();
        state.writable_watch = false;
        state.consecutive_rejects = 0;
        if state.phase == SinkPhase::Draining {
            state.phase = SinkPhase::Open;
        }
        drop(state);
        self.writable.notify_one();
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("bytes_sent", &self.bytes_sent())
            .finish_non_exhaustive()
    }
}
