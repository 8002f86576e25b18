//! Cancelable request handles.
//!
//! A save can span several sequential network stages. [`SingleHandle`]
//! wraps exactly one in-flight transport call; [`SequenceHandle`] wraps
//! whichever stage is currently active and remembers cancellation across
//! stage boundaries: once cancelled, a stage that has not started yet
//! must never reach the transport.
//!
//! Cancellation is best-effort. A stage already handed to the transport
//! has its future dropped, but side effects the server already observed
//! are not undone, and nothing here retries.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelState {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }
}

/// Handle over exactly one in-flight transport call.
#[derive(Debug, Clone, Default)]
pub struct SingleHandle {
    state: Arc<CancelState>,
}

impl SingleHandle {
    /// Create a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the wrapped call.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Non-blocking cancellation check.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Run one transport call under this handle. Resolves with
    /// [`Error::Cancelled`] as soon as cancellation is requested; the
    /// in-flight future is dropped.
    pub(crate) async fn guard<F, T>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.state.cancelled() => Err(Error::Cancelled),
            result = call => result,
        }
    }
}

/// Handle over a sequence of network stages.
///
/// Cancelling forwards to whichever stage is active; if no stage is
/// active yet, the cancellation is sticky and the next
/// [`begin_stage`](Self::begin_stage) fails without touching the
/// transport.
#[derive(Debug, Clone, Default)]
pub struct SequenceHandle {
    state: Arc<CancelState>,
    active: Arc<Mutex<Option<SingleHandle>>>,
}

impl SequenceHandle {
    /// Create a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the active stage and all future stages.
    pub fn cancel(&self) {
        self.state.cancel();
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stage) = active.as_ref() {
            stage.cancel();
        }
    }

    /// Non-blocking cancellation check.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Open the next stage, making it the cancellation target. Fails with
    /// [`Error::Cancelled`] when the sequence was already cancelled.
    pub(crate) fn begin_stage(&self) -> Result<SingleHandle> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let stage = SingleHandle::new();
        *active = Some(stage.clone());
        Ok(stage)
    }
}
