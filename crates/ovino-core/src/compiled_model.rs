//! Device-specific executables

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, ErrorSlot, Result};
use crate::ffi::{self, OpenVINOCompiledModel};
use crate::handle::{self, HandleKind, NativeHandle};
use crate::infer_request::InferRequest;
use crate::options::Properties;

/// A model compiled for one device. Cloning shares the executable.
#[derive(Clone, Default)]
pub struct CompiledModel {
    handle: Option<Arc<NativeHandle>>,
    device: String,
    properties: Properties,
}

impl CompiledModel {
    pub(crate) fn from_handle(handle: Arc<NativeHandle>, device: String, properties: Properties) -> Self {
        Self {
            handle: Some(handle),
            device,
            properties,
        }
    }

    fn raw(&self) -> Result<OpenVINOCompiledModel> {
        handle::live(&self.handle, HandleKind::CompiledModel)
    }

    /// New independent execution context. Requests created from the same
    /// compiled model may run concurrently on different threads.
    pub fn create_infer_request(&self) -> Result<InferRequest> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let ptr = unsafe { ffi::openvino_compiled_model_create_infer_request(raw, err.as_mut_ptr()) };
        let ptr = err.pointer(ptr, "create infer request").map_err(Error::native)?;
        InferRequest::from_raw(ptr, self.handle.clone())
    }

    /// Let the runtime drop transient compilation buffers. Requests can
    /// still be created afterwards.
    pub fn release_memory(&self) -> Result<()> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_compiled_model_release_memory(raw, err.as_mut_ptr()) };
        err.status(ret, "release memory").map_err(Error::native)?;
        debug!(device = %self.device, "compiled model memory released");
        Ok(())
    }

    /// Device the model was compiled for
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Properties passed at compile time
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Release this handle. Safe to call repeatedly; live requests keep the
    /// executable alive.
    pub fn destroy(&mut self) {
        if self.handle.take().is_some() {
            debug!(device = %self.device, "compiled model destroyed");
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl std::fmt::Debug for CompiledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModel")
            .field("device", &self.device)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{compile, slow_manifest};
    use crate::types::ElementType;

    #[test]
    fn test_release_memory_then_create_requests() {
        let compiled = compile(slow_manifest(0), []);
        compiled.release_memory().unwrap();
        let mut first = compiled.create_infer_request().unwrap();
        let mut second = compiled.create_infer_request().unwrap();
        first
            .set_input_tensor("x", &[1.0f32; 4], [1, 4], ElementType::F32)
            .unwrap();
        first.infer().unwrap();
        assert_eq!(second.completed_runs(), 0);
        second.infer().unwrap();
        assert_eq!(first.completed_runs(), 1);
    }

    #[test]
    fn test_requests_outlive_destroyed_compiled_model() {
        let mut compiled = compile(slow_manifest(0), []);
        let mut request = compiled.create_infer_request().unwrap();
        compiled.destroy();
        compiled.destroy();
        assert!(compiled.is_released());
        assert!(matches!(
            compiled.create_infer_request(),
            Err(Error::Released("compiled model"))
        ));
        request.infer().unwrap();

        let mut never = CompiledModel::default();
        never.destroy();
        assert!(matches!(never.release_memory(), Err(Error::Released(_))));
    }
}
