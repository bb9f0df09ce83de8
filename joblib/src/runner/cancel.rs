use std::future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot::{self, error::TryRecvError};

/// What happened to a cancellation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelRequest {
    /// The supervisor has been told to terminate the job.
    Requested,
    /// An earlier request is still being carried out.
    AlreadyRequested,
    /// The job reached a terminal state before the request arrived.
    Finished,
}

#[derive(Debug)]
enum CancelState {
    Armed(oneshot::Sender<()>),
    Requested,
    Finished,
}

/// Requesting side of a job's cancellation channel. Cheap to clone; lives in the registry.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
}

/// Supervising side of a job's cancellation channel.
#[derive(Debug)]
pub struct CancelSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl CancelHandle {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = oneshot::channel();
        let handle = CancelHandle {
            state: Arc::new(Mutex::new(CancelState::Armed(tx))),
        };
        (handle, CancelSignal { rx: Some(rx) })
    }

    /// Ask the supervisor to terminate the job. Never blocks on the process itself.
    pub fn cancel(&self) -> CancelRequest {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, CancelState::Finished) {
            CancelState::Armed(tx) => {
                if tx.send(()).is_ok() {
                    *state = CancelState::Requested;
                    CancelRequest::Requested
                } else {
                    CancelRequest::Finished
                }
            }
            CancelState::Requested => {
                *state = CancelState::Requested;
                CancelRequest::AlreadyRequested
            }
            CancelState::Finished => CancelRequest::Finished,
        }
    }

    pub fn is_requested(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            CancelState::Requested
        )
    }
}

impl CancelSignal {
    /// Non-blocking check, used before anything has been spawned.
    pub fn is_requested(&mut self) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };
        match rx.try_recv() {
            Ok(()) => {
                self.rx = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.rx = None;
                false
            }
        }
    }

    /// Resolves once cancellation is requested. If every handle is dropped without
    /// requesting it, this never resolves.
    pub async fn requested(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            let requested = rx.await.is_ok();
            self.rx = None;
            if requested {
                return;
            }
        }
        future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn request_reaches_signal() {
        let (handle, mut signal) = CancelHandle::pair();
        assert!(!signal.is_requested());
        assert_eq!(handle.cancel(), CancelRequest::Requested);
        assert!(handle.is_requested());
        tokio::time::timeout(Duration::from_secs(1), signal.requested())
            .await
            .expect("signal never fired");
    }

    #[test]
    fn repeated_requests_are_acknowledged_once() {
        let (handle, mut signal) = CancelHandle::pair();
        assert_eq!(handle.clone().cancel(), CancelRequest::Requested);
        assert_eq!(handle.cancel(), CancelRequest::AlreadyRequested);
        assert!(signal.is_requested());
    }

    #[test]
    fn request_after_supervisor_is_gone_reports_finished() {
        let (handle, signal) = CancelHandle::pair();
        drop(signal);
        assert_eq!(handle.cancel(), CancelRequest::Finished);
        assert_eq!(handle.cancel(), CancelRequest::Finished);
        assert!(!handle.is_requested());
    }

    #[tokio::test]
    async fn dropped_handle_does_not_look_like_a_request() {
        let (handle, mut signal) = CancelHandle::pair();
        drop(handle);
        assert!(!signal.is_requested());
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.requested()).await;
        assert!(waited.is_err());
    }
}
