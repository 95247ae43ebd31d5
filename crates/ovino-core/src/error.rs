//! Error Types
//!
//! Every native call reports failure through an `OpenVINOError` out-parameter.
//! [`ErrorSlot`] owns that parameter for the duration of one call and frees the
//! native message on every path; the copied `{code, message}` pair is then
//! classified into [`Error`] by the operation that made the call.

use std::ffi::CStr;
use std::fmt;
use std::ptr;

use thiserror::Error;

use crate::ffi::{self, status, OpenVINOError};
use crate::infer_request::RunState;

/// Raw failure reported by the native runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Native status code (see [`crate::ffi::status`])
    pub code: i32,
    /// Human-readable message copied out of the native buffer
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for NativeError {}

/// Errors surfaced by the binding layer
#[derive(Debug, Error)]
pub enum Error {
    /// Runtime could not be created
    #[error("Engine initialization failed: {0}")]
    EngineInit(NativeError),

    /// Model file missing, unreadable or not a recognized graph format
    #[error("Model load failed: {0}")]
    ModelLoad(NativeError),

    /// Unknown device or graph incompatible with the device/options
    #[error("Model compile failed: {0}")]
    ModelCompile(NativeError),

    /// Port does not exist, or shape/type mismatch at bind time
    #[error("Invalid tensor: {message}")]
    InvalidTensor { message: String, code: Option<i32> },

    /// Host container or element type has no mapping for this operation
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Native execution fault
    #[error("Inference failed: {0}")]
    InferenceFailed(NativeError),

    /// Cooperative deadline observed by a context-aware call
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Cooperative cancellation observed
    #[error("Inference cancelled")]
    Cancelled,

    /// Request state machine precondition violated
    #[error("Cannot {operation} while request is {state}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    /// Operation on a destroyed or never-created handle
    #[error("{0} handle has been released")]
    Released(&'static str),

    /// Argument cannot be carried across the native boundary
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other native status
    #[error(transparent)]
    Native(NativeError),
}

impl Error {
    /// Raw native status code, when the failure originated natively
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::EngineInit(e)
            | Error::ModelLoad(e)
            | Error::ModelCompile(e)
            | Error::InferenceFailed(e)
            | Error::Native(e) => Some(e.code),
            Error::InvalidTensor { code, .. } => *code,
            Error::Cancelled => Some(status::CANCELLED),
            _ => None,
        }
    }

    /// Classify a failure from a port or tensor binding call.
    pub(crate) fn tensor(err: NativeError) -> Self {
        match err.code {
            status::NOT_FOUND | status::PARAMETER_MISMATCH | status::OUT_OF_BOUNDS => {
                Error::InvalidTensor {
                    message: err.message,
                    code: Some(err.code),
                }
            }
            _ => Error::native(err),
        }
    }

    /// Classify a failure from an execution call (infer, start, wait).
    pub(crate) fn inference(err: NativeError, state: RunState) -> Self {
        match err.code {
            status::CANCELLED => Error::Cancelled,
            status::BUSY => Error::InvalidState {
                operation: "start inference",
                state,
            },
            status::NOT_FOUND | status::PARAMETER_MISMATCH | status::OUT_OF_BOUNDS => {
                Error::tensor(err)
            }
            _ => Error::InferenceFailed(err),
        }
    }

    /// Classify a failure that has no operation-specific kind.
    pub(crate) fn native(err: NativeError) -> Self {
        match err.code {
            status::CANCELLED => Error::Cancelled,
            _ => Error::Native(err),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Owns the native error out-parameter of a single call.
pub(crate) struct ErrorSlot {
    raw: OpenVINOError,
}

impl ErrorSlot {
    pub(crate) fn new() -> Self {
        Self {
            raw: OpenVINOError {
                code: status::OK,
                message: ptr::null_mut(),
            },
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut OpenVINOError {
        &mut self.raw
    }

    /// Status-returning calls: 0 is success.
    pub(crate) fn status(&mut self, ret: i32, context: &str) -> std::result::Result<(), NativeError> {
        if ret == status::OK {
            self.release();
            Ok(())
        } else {
            Err(self.take(ret, context))
        }
    }

    /// Handle-returning calls: null is failure.
    pub(crate) fn pointer<T>(
        &mut self,
        ptr: *mut T,
        context: &str,
    ) -> std::result::Result<*mut T, NativeError> {
        if ptr.is_null() {
            Err(self.take(status::GENERAL, context))
        } else {
            self.release();
            Ok(ptr)
        }
    }

    /// Calls whose return value cannot signal failure on its own (lists,
    /// sizes): failure is a populated slot.
    pub(crate) fn checked(&mut self, context: &str) -> std::result::Result<(), NativeError> {
        if self.is_set() {
            Err(self.take(status::GENERAL, context))
        } else {
            Ok(())
        }
    }

    fn is_set(&self) -> bool {
        self.raw.code != status::OK || !self.raw.message.is_null()
    }

    /// Copy the reported failure out and free the native message.
    fn take(&mut self, code_hint: i32, context: &str) -> NativeError {
        let code = match (self.raw.code, code_hint) {
            (status::OK, status::OK) => status::GENERAL,
            (status::OK, hint) => hint,
            (code, _) => code,
        };
        let message = if self.raw.message.is_null() {
            format!("{} failed", context)
        } else {
            // SAFETY: non-null messages are NUL-terminated strings owned by
            // the native side until openvino_error_free.
            unsafe { CStr::from_ptr(self.raw.message) }
                .to_string_lossy()
                .into_owned()
        };
        self.release();
        NativeError::new(code, message)
    }

    fn release(&mut self) {
        if !self.raw.message.is_null() {
            unsafe { ffi::openvino_error_free(&mut self.raw) };
        }
        self.raw.code = status::OK;
        self.raw.message = ptr::null_mut();
    }
}

impl Drop for ErrorSlot {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_error_display() {
        let err = NativeError::new(-2, "port not found");
        assert_eq!(err.to_string(), "engine error -2: port not found");
        assert_eq!(Error::Native(err).to_string(), "engine error -2: port not found");
    }

    #[test]
    fn test_tensor_classification() {
        let err = Error::tensor(NativeError::new(status::NOT_FOUND, "no port x"));
        assert!(matches!(err, Error::InvalidTensor { .. }));
        assert_eq!(err.code(), Some(status::NOT_FOUND));

        let err = Error::tensor(NativeError::new(status::GENERAL, "boom"));
        assert!(matches!(err, Error::Native(_)));
    }

    #[test]
    fn test_inference_classification() {
        let err = Error::inference(NativeError::new(status::CANCELLED, "x"), RunState::AsyncStarted);
        assert!(matches!(err, Error::Cancelled));

        let err = Error::inference(NativeError::new(status::BUSY, "x"), RunState::AsyncStarted);
        assert!(matches!(err, Error::InvalidState { .. }));

        let err = Error::inference(NativeError::new(status::GENERAL, "nan"), RunState::Running);
        assert!(matches!(err, Error::InferenceFailed(_)));
        assert_eq!(err.code(), Some(status::GENERAL));
    }

    #[test]
    fn test_error_slot_conventions() {
        let mut slot = ErrorSlot::new();
        assert!(slot.status(status::OK, "infer").is_ok());
        assert!(slot.checked("get shape").is_ok());

        let err = slot.status(status::BUSY, "start async").unwrap_err();
        assert_eq!(err.code, status::BUSY);
        assert_eq!(err.message, "start async failed");

        let err = slot.pointer(ptr::null_mut::<u8>(), "read model").unwrap_err();
        assert_eq!(err.code, status::GENERAL);
    }
}
