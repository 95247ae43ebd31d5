//! Owning wrapper around native handles
//!
//! Every native object is held by exactly one [`NativeHandle`], released in its
//! `Drop`. A handle keeps the handle it was created from alive, so the native
//! release order always runs children before parents regardless of the order
//! in which the public wrappers are dropped or destroyed.

use std::any::Any;
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::Arc;

use libc::c_void;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ffi;

/// Which native release function a handle needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Engine,
    Model,
    CompiledModel,
    InferRequest,
    Tensor,
    VariableState,
}

impl HandleKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            HandleKind::Engine => "engine",
            HandleKind::Model => "model",
            HandleKind::CompiledModel => "compiled model",
            HandleKind::InferRequest => "infer request",
            HandleKind::Tensor => "tensor",
            HandleKind::VariableState => "variable state",
        }
    }

    unsafe fn release(&self, ptr: *mut c_void) {
        match self {
            HandleKind::Engine => ffi::openvino_core_destroy(ptr),
            HandleKind::Model => ffi::openvino_model_destroy(ptr),
            HandleKind::CompiledModel => ffi::openvino_compiled_model_destroy(ptr),
            HandleKind::InferRequest => ffi::openvino_infer_request_destroy(ptr),
            HandleKind::Tensor => ffi::openvino_tensor_destroy(ptr),
            HandleKind::VariableState => ffi::openvino_variable_state_destroy(ptr),
        }
    }
}

pub(crate) struct NativeHandle {
    ptr: NonNull<c_void>,
    kind: HandleKind,
    // Dropped after the native release in `drop`.
    _parent: Option<Arc<NativeHandle>>,
    _keepalive: Option<Arc<dyn Any + Send + Sync>>,
}

impl NativeHandle {
    /// Take ownership of a native pointer. Returns `None` for null.
    pub(crate) fn new(
        ptr: *mut c_void,
        kind: HandleKind,
        parent: Option<Arc<NativeHandle>>,
    ) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            kind,
            _parent: parent,
            _keepalive: None,
        })
    }

    /// Keep `value` alive until after the native object is released.
    pub(crate) fn with_keepalive(mut self, value: Arc<dyn Any + Send + Sync>) -> Self {
        self._keepalive = Some(value);
        self
    }

    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        debug!(kind = self.kind.name(), "releasing native handle");
        unsafe { self.kind.release(self.ptr.as_ptr()) };
    }
}

// SAFETY: the native runtime's objects are internally synchronized for the
// operations the wrappers expose through shared references; operations that
// are not (request execution) take `&mut` on a `!Sync` wrapper.
unsafe impl Send for NativeHandle {}
unsafe impl Sync for NativeHandle {}

/// Wrap a fresh native pointer in a shared handle.
pub(crate) fn own(
    ptr: *mut c_void,
    kind: HandleKind,
    parent: Option<Arc<NativeHandle>>,
) -> Result<Arc<NativeHandle>> {
    NativeHandle::new(ptr, kind, parent)
        .map(Arc::new)
        .ok_or(Error::Released(kind.name()))
}

/// Raw pointer of a live handle, or `Released` for a destroyed/zero-value one.
pub(crate) fn live(handle: &Option<Arc<NativeHandle>>, kind: HandleKind) -> Result<*mut c_void> {
    handle
        .as_ref()
        .map(|h| h.as_ptr())
        .ok_or(Error::Released(kind.name()))
}

pub(crate) fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::InvalidArgument(format!("{:?} contains a NUL byte", s)))
}

pub(crate) fn native_index(index: usize) -> Result<i32> {
    i32::try_from(index)
        .map_err(|_| Error::InvalidArgument(format!("port index {} exceeds the native range", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorSlot;

    fn tensor_ptr() -> *mut c_void {
        let dims = [1i32, 4];
        let mut slot = ErrorSlot::new();
        unsafe {
            ffi::openvino_tensor_new(
                crate::types::ElementType::F32.code(),
                dims.as_ptr(),
                2,
                slot.as_mut_ptr(),
            )
        }
    }

    #[test]
    fn test_null_is_not_owned() {
        assert!(NativeHandle::new(std::ptr::null_mut(), HandleKind::Tensor, None).is_none());
        assert!(matches!(
            own(std::ptr::null_mut(), HandleKind::Model, None),
            Err(Error::Released("model"))
        ));
    }

    #[test]
    fn test_parent_outlives_child() {
        let parent = own(tensor_ptr(), HandleKind::Tensor, None).unwrap();
        let child = own(tensor_ptr(), HandleKind::Tensor, Some(parent.clone())).unwrap();
        assert_eq!(Arc::strong_count(&parent), 2);
        drop(parent);
        assert_eq!(child.kind, HandleKind::Tensor);
        drop(child);
    }

    #[test]
    fn test_live_and_strings() {
        assert!(matches!(
            live(&None, HandleKind::InferRequest),
            Err(Error::Released("infer request"))
        ));
        assert!(c_string("input").is_ok());
        assert!(matches!(c_string("in\0put"), Err(Error::InvalidArgument(_))));
        assert_eq!(native_index(3).unwrap(), 3);
        assert!(native_index(usize::MAX).is_err());
    }
}
