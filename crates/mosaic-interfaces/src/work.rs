//! One-shot asynchronous result handles
//!
//! A [`Promise`] is the single writer of a result slot and a [`Completion`]
//! is any number of readers. Readers can poll, block with a timeout, or
//! `.await` the same slot. [`Work`] pairs a completion with the operation and
//! device that produced it.

use crate::deadline::deadline_after;
use crate::TensorRef;
use mosaic_types::{DeviceHandle, MosaicError, OpKind, Result};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tracing::warn;

struct SlotState<T> {
    result: Option<Result<T>>,
    wakers: Vec<Waker>,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn settle(&self, result: Result<T>) -> Result<()> {
        let wakers = {
            let mut state = self.state.lock();
            if state.result.is_some() {
                return Err(MosaicError::already_completed(
                    "result slot has already been completed",
                ));
            }
            state.result = Some(result);
            std::mem::take(&mut state.wakers)
        };

        self.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state.lock().result.is_some()
    }
}

/// Create a connected promise/completion pair
pub fn promise<T>() -> (Promise<T>, Completion<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState {
            result: None,
            wakers: Vec::new(),
        }),
        ready: Condvar::new(),
    });
    (
        Promise { slot: slot.clone() },
        Completion { slot },
    )
}

/// Write side of a one-shot result slot
pub struct Promise<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Promise<T> {
    /// Complete the slot. A second completion is rejected.
    pub fn complete(&self, result: Result<T>) -> Result<()> {
        self.slot.settle(result)
    }

    pub fn succeed(&self, value: T) -> Result<()> {
        self.complete(Ok(value))
    }

    pub fn fail(&self, error: MosaicError) -> Result<()> {
        self.complete(Err(error))
    }

    pub fn is_completed(&self) -> bool {
        self.slot.is_completed()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.slot.is_completed() {
            warn!("Promise dropped before completion; failing its waiters");
            let _ = self.slot.settle(Err(MosaicError::internal(
                "promise dropped before completion",
            )));
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Read side of a one-shot result slot
pub struct Completion<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Completion<T> {
    pub fn is_completed(&self) -> bool {
        self.slot.is_completed()
    }

    /// Whether the slot completed successfully; `Indeterminate` while pending
    pub fn is_success(&self) -> Result<bool> {
        match &self.slot.state.lock().result {
            Some(result) => Ok(result.is_ok()),
            None => Err(MosaicError::indeterminate(
                "success queried before completion",
            )),
        }
    }

    /// Block until completion or timeout. Returns whether the slot completed.
    ///
    /// A timeout abandons local waiting only; the operation itself keeps running.
    /// A timeout too large to express as a deadline waits without bound.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.slot.state.lock();
        match timeout.and_then(deadline_after) {
            None => {
                while state.result.is_none() {
                    self.slot.ready.wait(&mut state);
                }
                true
            }
            Some(deadline) => {
                while state.result.is_none() {
                    if self.slot.ready.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                state.result.is_some()
            }
        }
    }
}

impl<T: Clone> Completion<T> {
    /// Terminal result, if the slot has completed
    pub fn result(&self) -> Option<Result<T>> {
        self.slot.state.lock().result.clone()
    }

    /// Block for the terminal result; `Timeout` if it does not arrive in time
    pub fn wait_result(&self, timeout: Option<Duration>) -> Result<T> {
        if !self.wait(timeout) {
            return Err(MosaicError::timeout(format!(
                "result not available after {:?}",
                timeout.unwrap_or_default()
            )));
        }
        self.result()
            .unwrap_or_else(|| Err(MosaicError::internal("completed slot holds no result")))
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.state.lock();
        if let Some(result) = &state.result {
            return Poll::Ready(result.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Handle to an issued collective operation
#[derive(Debug, Clone)]
pub struct Work {
    kind: OpKind,
    device: DeviceHandle,
    completion: Completion<Vec<TensorRef>>,
}

impl Work {
    /// Pending work plus the promise that completes it
    pub fn pending(kind: OpKind, device: DeviceHandle) -> (Promise<Vec<TensorRef>>, Work) {
        let (promise, completion) = promise();
        (
            promise,
            Work {
                kind,
                device,
                completion,
            },
        )
    }

    /// Work that is already in its terminal state
    pub fn completed(kind: OpKind, device: DeviceHandle, result: Result<Vec<TensorRef>>) -> Work {
        let (promise, work) = Self::pending(kind, device);
        let _ = promise.complete(result);
        work
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_completed()
    }

    pub fn is_success(&self) -> Result<bool> {
        self.completion.is_success()
    }

    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.completion.wait(timeout)
    }

    /// Output tensors once the operation has completed
    pub fn result(&self) -> Option<Result<Vec<TensorRef>>> {
        self.completion.result()
    }

    pub fn wait_result(&self, timeout: Option<Duration>) -> Result<Vec<TensorRef>> {
        self.completion.wait_result(timeout)
    }

    /// Awaitable view of the same result
    pub fn future(&self) -> Completion<Vec<TensorRef>> {
        self.completion.clone()
    }
}
