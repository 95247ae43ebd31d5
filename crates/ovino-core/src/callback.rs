//! Completion notifications from the native runtime
//!
//! The runtime reports the end of every asynchronous run on one of its own
//! threads through [`on_complete`]. That thread must neither block nor run user
//! code, so the outcome is posted into a single-slot channel drained by a
//! dispatcher thread that owns the user's callback. The request's run state is
//! updated before the outcome is posted.

use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use libc::{c_char, c_void};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

use crate::error::{Error, NativeError, Result};
use crate::ffi::status;
use crate::infer_request::RunState;

/// Outcome of one asynchronous run as reported natively
pub(crate) type Completion = std::result::Result<(), NativeError>;

/// Completions buffered while the callback is still handling a previous one
const SLOT_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RunStatus {
    pub state: RunState,
    pub completed_runs: u64,
    /// An asynchronous run has been started and not yet waited on
    pub awaiting: bool,
}

/// State shared between a request and the runtime's completion thread
pub(crate) struct RequestShared {
    status: Mutex<RunStatus>,
    completion: Notify,
    slot: Mutex<Option<mpsc::Sender<Completion>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| {
        warn!("request lock poisoned; recovering");
        PoisonError::into_inner(poisoned)
    })
}

impl RequestShared {
    pub(crate) fn new() -> Self {
        Self {
            status: Mutex::new(RunStatus {
                state: RunState::Idle,
                completed_runs: 0,
                awaiting: false,
            }),
            completion: Notify::new(),
            slot: Mutex::new(None),
        }
    }

    pub(crate) fn status(&self) -> RunStatus {
        *lock(&self.status)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RunStatus) -> R) -> R {
        f(&mut lock(&self.status))
    }

    /// Move out of `from` once a run ends. No-op if the state has already
    /// moved on, so the completion thread and `wait` can both report.
    pub(crate) fn settle(&self, from: RunState, succeeded: bool) {
        self.update(|s| {
            if s.state == from {
                if succeeded {
                    s.state = RunState::Completed;
                    s.completed_runs += 1;
                } else {
                    s.state = RunState::Idle;
                }
            }
        });
    }

    pub(crate) fn completion(&self) -> &Notify {
        &self.completion
    }

    fn complete(&self, outcome: Completion) {
        self.settle(RunState::AsyncStarted, outcome.is_ok());
        let sender = lock(&self.slot).clone();
        if let Some(tx) = sender {
            match tx.try_send(outcome) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("callback still busy; completion notification dropped")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("callback retired before completion was delivered")
                }
            }
        }
        self.completion.notify_waiters();
    }

    /// Install `callback` for every subsequent completion, replacing any
    /// previous one.
    pub(crate) fn register<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(Result<()>) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Completion>(SLOT_CAPACITY);
        let spawned = std::thread::Builder::new()
            .name("ovino-callback".to_string())
            .spawn(move || {
                while let Some(outcome) = rx.blocking_recv() {
                    callback(outcome.map_err(|e| Error::inference(e, RunState::AsyncStarted)));
                }
                debug!("callback dispatcher stopped");
            });
        if let Err(e) = spawned {
            return Err(Error::Native(NativeError::new(
                status::GENERAL,
                format!("cannot start callback dispatcher: {}", e),
            )));
        }
        // Dropping the previous sender ends its dispatcher once drained.
        let previous = lock(&self.slot).replace(tx);
        if previous.is_some() {
            debug!("completion callback replaced");
        }
        Ok(())
    }

    pub(crate) fn retire(&self) {
        if lock(&self.slot).take().is_some() {
            debug!("completion callback cleared");
        }
    }
}

impl Default for RequestShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Native completion entry point. `user_data` is the request's
/// `RequestShared`, kept alive until the native request is released.
pub(crate) unsafe extern "C" fn on_complete(
    user_data: *mut c_void,
    code: i32,
    message: *const c_char,
) {
    if user_data.is_null() {
        return;
    }
    let shared = &*(user_data as *const RequestShared);
    let outcome = if code == status::OK {
        Ok(())
    } else {
        let message = if message.is_null() {
            "asynchronous inference failed".to_string()
        } else {
            CStr::from_ptr(message).to_string_lossy().into_owned()
        };
        Err(NativeError::new(code, message))
    };
    if panic::catch_unwind(AssertUnwindSafe(|| shared.complete(outcome))).is_err() {
        error!("completion handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn shared_ptr(shared: &RequestShared) -> *mut c_void {
        shared as *const RequestShared as *mut c_void
    }

    #[test]
    fn test_completion_settles_async_run() {
        let shared = RequestShared::new();
        shared.update(|s| s.state = RunState::AsyncStarted);
        unsafe { on_complete(shared_ptr(&shared), status::OK, std::ptr::null()) };
        let status = shared.status();
        assert_eq!(status.state, RunState::Completed);
        assert_eq!(status.completed_runs, 1);

        // Late report from `wait` must not count the run twice.
        shared.settle(RunState::AsyncStarted, true);
        assert_eq!(shared.status().completed_runs, 1);
    }

    #[test]
    fn test_failed_completion_reaches_callback() {
        let shared = RequestShared::new();
        let (tx, rx) = std_mpsc::channel();
        shared
            .register(move |result| {
                let _ = tx.send(result);
            })
            .unwrap();
        shared.update(|s| s.state = RunState::AsyncStarted);

        let message = CString::new("numerical fault").unwrap();
        unsafe { on_complete(shared_ptr(&shared), status::GENERAL, message.as_ptr()) };

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match result {
            Err(Error::InferenceFailed(e)) => assert_eq!(e.message, "numerical fault"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(shared.status().state, RunState::Idle);
    }

    #[test]
    fn test_replaced_callback_is_silent() {
        let shared = RequestShared::new();
        let (first_tx, first_rx) = std_mpsc::channel();
        let (second_tx, second_rx) = std_mpsc::channel();
        shared
            .register(move |r| {
                let _ = first_tx.send(r.is_ok());
            })
            .unwrap();
        shared
            .register(move |r| {
                let _ = second_tx.send(r.is_ok());
            })
            .unwrap();

        unsafe { on_complete(shared_ptr(&shared), status::OK, std::ptr::null()) };
        assert!(second_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(first_rx.recv_timeout(Duration::from_millis(50)).is_err());

        shared.retire();
        unsafe { on_complete(shared_ptr(&shared), status::OK, std::ptr::null()) };
        assert!(second_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_null_user_data_is_ignored() {
        unsafe { on_complete(std::ptr::null_mut(), status::OK, std::ptr::null()) };
    }
}
