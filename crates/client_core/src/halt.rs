use std::time::Instant;

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::HaltError;

/// Completion of a `CommandQueue::halt` request. Resolves once the queue has
/// drained and the halt was acknowledged, or with the reason it never was.
#[derive(Debug)]
pub struct HaltHandle {
    rx: oneshot::Receiver<Result<(), HaltError>>,
}

impl HaltHandle {
    pub async fn wait(self) -> Result<(), HaltError> {
        self.rx.await.unwrap_or(Err(HaltError::Cancelled))
    }

    /// Non-blocking check for tick-driven callers.
    pub fn try_outcome(&mut self) -> Option<Result<(), HaltError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(HaltError::Cancelled)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct HaltWaiter {
    tx: oneshot::Sender<Result<(), HaltError>>,
    deadline: Instant,
}

impl HaltWaiter {
    pub(crate) fn new(deadline: Instant) -> (Self, HaltHandle) {
        let (tx, rx) = oneshot::channel();
        (Self { tx, deadline }, HaltHandle { rx })
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn resolve(self, outcome: Result<(), HaltError>) {
        let _ = self.tx.send(outcome);
    }
}
