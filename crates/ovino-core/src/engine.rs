//! Runtime instance
//!
//! The runtime is expensive to bring up and unstable under rapid create/destroy
//! cycling, so most callers should use [`Engine::shared`] rather than creating
//! their own.

use std::ffi::CStr;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, info};

use crate::compiled_model::CompiledModel;
use crate::error::{Error, ErrorSlot, Result};
use crate::ffi;
use crate::handle::{self, c_string, HandleKind, NativeHandle};
use crate::model::Model;
use crate::options::{CompileConfig, CompileOption, Properties};

static SHARED: OnceLock<Engine> = OnceLock::new();
// Held while the shared engine is being created so only one is ever built.
static SHARED_INIT: Mutex<()> = Mutex::new(());

/// Handle to one native runtime instance. Cloning shares the instance.
#[derive(Clone, Default)]
pub struct Engine {
    handle: Option<Arc<NativeHandle>>,
}

impl Engine {
    /// Create a runtime instance.
    pub fn new() -> Result<Self> {
        let mut err = ErrorSlot::new();
        let ptr = unsafe { ffi::openvino_core_create(err.as_mut_ptr()) };
        let ptr = err.pointer(ptr, "create engine").map_err(Error::EngineInit)?;
        let handle = handle::own(ptr, HandleKind::Engine, None)?;
        info!("Inference engine created");
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Process-wide engine, created on first use and never released.
    pub fn shared() -> Result<&'static Engine> {
        if let Some(engine) = SHARED.get() {
            return Ok(engine);
        }
        let _creating = SHARED_INIT.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = SHARED.get() {
            return Ok(engine);
        }
        let engine = Engine::new()?;
        Ok(SHARED.get_or_init(|| engine))
    }

    /// Whether a runtime can be brought up in this process.
    pub fn is_available() -> bool {
        Self::shared().is_ok()
    }

    fn raw(&self) -> Result<*mut libc::c_void> {
        handle::live(&self.handle, HandleKind::Engine)
    }

    /// Execution devices the runtime can target (e.g. "CPU", "GPU").
    pub fn available_devices(&self) -> Result<Vec<String>> {
        let raw = self.raw()?;
        let mut count = 0i32;
        let mut err = ErrorSlot::new();
        let list = unsafe { ffi::openvino_core_get_available_devices(raw, &mut count, err.as_mut_ptr()) };
        err.checked("list devices").map_err(Error::native)?;
        if list.is_null() || count <= 0 {
            return Ok(Vec::new());
        }
        let devices = unsafe { std::slice::from_raw_parts(list, count as usize) }
            .iter()
            .filter(|name| !name.is_null())
            .map(|&name| unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
            .collect();
        unsafe { ffi::openvino_core_free_device_list(list, count) };
        Ok(devices)
    }

    /// Read a model file. The format is determined by the runtime.
    pub fn read_model(&self, path: impl AsRef<Path>) -> Result<Model> {
        let raw = self.raw()?;
        let path = path.as_ref();
        let c_path = path
            .to_str()
            .ok_or_else(|| Error::InvalidArgument(format!("model path {:?} is not UTF-8", path)))
            .and_then(c_string)?;
        let mut err = ErrorSlot::new();
        let ptr = unsafe { ffi::openvino_core_read_model(raw, c_path.as_ptr(), err.as_mut_ptr()) };
        let ptr = err.pointer(ptr, "read model").map_err(Error::ModelLoad)?;
        let handle = handle::own(ptr, HandleKind::Model, self.handle.clone())?;
        info!(path = %path.display(), "Model loaded");
        Ok(Model::from_handle(handle))
    }

    /// Compile `model` for `device` with the given options.
    pub fn compile_model<I>(&self, model: &Model, device: &str, options: I) -> Result<CompiledModel>
    where
        I: IntoIterator<Item = CompileOption>,
    {
        self.compile_model_with_properties(model, device, &Properties::from_options(options))
    }

    /// Compile with a raw property map. Unknown keys are passed through.
    pub fn compile_model_with_properties(
        &self,
        model: &Model,
        device: &str,
        properties: &Properties,
    ) -> Result<CompiledModel> {
        let raw = self.raw()?;
        let model_raw = model.raw()?;
        let c_device = c_string(device)?;
        let (keys, values) = properties.to_native()?;
        let key_ptrs: Vec<_> = keys.iter().map(|k| k.as_ptr()).collect();
        let value_ptrs: Vec<_> = values.iter().map(|v| v.as_ptr()).collect();
        let (key_ptr, value_ptr) = if key_ptrs.is_empty() {
            (ptr::null(), ptr::null())
        } else {
            (key_ptrs.as_ptr(), value_ptrs.as_ptr())
        };

        let mut err = ErrorSlot::new();
        let ptr = unsafe {
            ffi::openvino_core_compile_model(
                raw,
                model_raw,
                c_device.as_ptr(),
                key_ptr,
                value_ptr,
                key_ptrs.len() as i32,
                err.as_mut_ptr(),
            )
        };
        let ptr = err.pointer(ptr, "compile model").map_err(Error::ModelCompile)?;
        let handle = handle::own(ptr, HandleKind::CompiledModel, self.handle.clone())?;
        info!(device, properties = properties.len(), "Model compiled");
        for (key, value) in properties.iter() {
            debug!(key, value, "compile property");
        }
        Ok(CompiledModel::from_handle(
            handle,
            device.to_string(),
            properties.clone(),
        ))
    }

    /// Compile using a serializable configuration.
    pub fn compile_with_config(&self, model: &Model, config: &CompileConfig) -> Result<CompiledModel> {
        self.compile_model_with_properties(model, &config.device, &config.to_properties())
    }

    /// Release this handle on the runtime. Safe to call repeatedly; objects
    /// created through the engine keep the runtime alive until they are
    /// released themselves.
    pub fn destroy(&mut self) {
        if self.handle.take().is_some() {
            debug!("engine handle released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Whether a runtime can be brought up in this process.
pub fn is_available() -> bool {
    Engine::is_available()
}
