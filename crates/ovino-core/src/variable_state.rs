//! Variable states of stateful (recurrent) models

use std::ffi::CStr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, ErrorSlot, Result};
use crate::ffi::{self, OpenVINOVariableState};
use crate::handle::{self, HandleKind, NativeHandle};
use crate::tensor::Tensor;

/// One memory cell carried between runs of an [`InferRequest`]. Keeps its
/// request's native object alive.
///
/// [`InferRequest`]: crate::InferRequest
#[derive(Default)]
pub struct VariableState {
    handle: Option<Arc<NativeHandle>>,
}

impl VariableState {
    pub(crate) fn from_raw(ptr: OpenVINOVariableState, parent: Option<Arc<NativeHandle>>) -> Result<Self> {
        Ok(Self {
            handle: Some(handle::own(ptr, HandleKind::VariableState, parent)?),
        })
    }

    fn raw(&self) -> Result<OpenVINOVariableState> {
        handle::live(&self.handle, HandleKind::VariableState)
    }

    pub fn name(&self) -> Result<String> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let name = unsafe { ffi::openvino_variable_state_get_name(raw, err.as_mut_ptr()) };
        let name = err.pointer(name, "get state name").map_err(Error::native)?;
        let owned = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
        unsafe { ffi::openvino_variable_state_free_name(name) };
        Ok(owned)
    }

    /// Copy of the current value
    pub fn state(&self) -> Result<Tensor> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let ptr = unsafe { ffi::openvino_variable_state_get_state(raw, err.as_mut_ptr()) };
        let ptr = err.pointer(ptr, "get state").map_err(Error::native)?;
        Tensor::from_raw(ptr, None)
    }

    /// Overwrite the value. The tensor must hold as many elements as the state.
    pub fn set_state(&mut self, tensor: &Tensor) -> Result<()> {
        let raw = self.raw()?;
        let tensor_raw = tensor.raw()?;
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_variable_state_set_state(raw, tensor_raw, err.as_mut_ptr()) };
        err.status(ret, "set state").map_err(Error::tensor)
    }

    pub fn reset(&mut self) -> Result<()> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_variable_state_reset(raw, err.as_mut_ptr()) };
        err.status(ret, "reset state").map_err(Error::native)
    }

    /// Release the state handle. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.handle.take().is_some() {
            debug!("variable state destroyed");
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl std::fmt::Debug for VariableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("VariableState");
        match self.name() {
            Ok(name) => s.field("name", &name),
            Err(_) => s.field("released", &self.is_released()),
        }
        .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{compile, stateful_manifest};
    use crate::types::ElementType;

    #[test]
    fn test_set_and_reset() {
        let request = compile(stateful_manifest(), []).create_infer_request().unwrap();
        let mut states = request.query_state().unwrap();
        let hidden = &mut states[0];

        let value = Tensor::from_data([1, 4], &[0.5f32, 1.5, 2.5, 3.5]).unwrap();
        hidden.set_state(&value).unwrap();
        assert_eq!(hidden.state().unwrap().data_as_f32().unwrap(), vec![0.5, 1.5, 2.5, 3.5]);

        let wrong = Tensor::new(ElementType::F32, [1, 3]).unwrap();
        assert!(matches!(hidden.set_state(&wrong), Err(Error::InvalidTensor { .. })));

        hidden.reset().unwrap();
        assert_eq!(hidden.state().unwrap().data_as_f32().unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn test_state_outlives_destroyed_request() {
        let mut request = compile(stateful_manifest(), []).create_infer_request().unwrap();
        let mut states = request.query_state().unwrap();
        request.destroy();
        assert_eq!(states[0].name().unwrap(), "hidden");
        states[0].destroy();
        states[0].destroy();
        assert!(matches!(states[0].name(), Err(Error::Released("variable state"))));

        let mut never = VariableState::default();
        never.destroy();
        assert!(never.is_released());
    }
}
