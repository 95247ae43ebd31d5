//! Loaded, uncompiled models

use std::ffi::CStr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, ErrorSlot, Result};
use crate::ffi::{self, OpenVINOModel, OpenVINOPortInfo};
use crate::handle::{self, HandleKind, NativeHandle};
use crate::types::{ElementType, PartialShape, PortInfo};

/// In-memory computation graph read from a file
#[derive(Default)]
pub struct Model {
    handle: Option<Arc<NativeHandle>>,
}

impl Model {
    pub(crate) fn from_handle(handle: Arc<NativeHandle>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub(crate) fn raw(&self) -> Result<OpenVINOModel> {
        handle::live(&self.handle, HandleKind::Model)
    }

    /// Input ports in graph declaration order
    pub fn inputs(&self) -> Result<Vec<PortInfo>> {
        self.ports(true)
    }

    /// Output ports in graph declaration order
    pub fn outputs(&self) -> Result<Vec<PortInfo>> {
        self.ports(false)
    }

    /// Look up an input port by name.
    pub fn input(&self, name: &str) -> Result<PortInfo> {
        find(self.inputs()?, name)
    }

    /// Look up an output port by name.
    pub fn output(&self, name: &str) -> Result<PortInfo> {
        find(self.outputs()?, name)
    }

    fn ports(&self, inputs: bool) -> Result<Vec<PortInfo>> {
        let raw = self.raw()?;
        let mut count = 0i32;
        let mut err = ErrorSlot::new();
        let list = unsafe {
            if inputs {
                ffi::openvino_model_get_inputs(raw, &mut count, err.as_mut_ptr())
            } else {
                ffi::openvino_model_get_outputs(raw, &mut count, err.as_mut_ptr())
            }
        };
        err.checked("list model ports").map_err(Error::native)?;
        if list.is_null() || count <= 0 {
            return Ok(Vec::new());
        }

        let converted = unsafe { std::slice::from_raw_parts(list, count as usize) }
            .iter()
            .map(|p| unsafe { port_info(p) })
            .collect();
        unsafe { ffi::openvino_model_free_port_info(list, count) };
        converted
    }

    /// Release the model. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.handle.take().is_some() {
            debug!("model destroyed");
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("released", &self.is_released())
            .finish()
    }
}

fn find(ports: Vec<PortInfo>, name: &str) -> Result<PortInfo> {
    ports
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| Error::InvalidTensor {
            message: format!("port '{}' not found", name),
            code: None,
        })
}

unsafe fn port_info(raw: &OpenVINOPortInfo) -> Result<PortInfo> {
    let name = if raw.name.is_null() {
        String::new()
    } else {
        CStr::from_ptr(raw.name).to_string_lossy().into_owned()
    };
    let dims = if raw.shape.is_null() || raw.shape_size <= 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(raw.shape, raw.shape_size as usize)
    };
    let element_type = ElementType::from_code(raw.data_type).ok_or_else(|| {
        Error::UnsupportedType(format!(
            "port '{}' has native element type code {}",
            name, raw.data_type
        ))
    })?;
    Ok(PortInfo {
        name,
        shape: PartialShape::from_native(dims),
        element_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{classifier_manifest, write_manifest};
    use crate::types::Dim;
    use crate::Engine;

    #[test]
    fn test_ports_in_declaration_order() {
        let path = write_manifest(&serde_json::json!({
            "name": "two-heads",
            "inputs": [
                { "name": "pixels", "shape": [1, 3, 8, 8], "element_type": "f32" },
                { "name": "mask", "shape": [1, -1], "element_type": "u8" }
            ],
            "outputs": [
                { "name": "logits", "shape": [1, 10], "element_type": "f32" },
                { "name": "ids", "shape": [-1], "element_type": "i64" }
            ]
        }));
        let engine = Engine::new().unwrap();
        let model = engine.read_model(&path).unwrap();

        let inputs = model.inputs().unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].name, "pixels");
        assert_eq!(inputs[1].name, "mask");
        assert_eq!(inputs[1].element_type, ElementType::U8);
        assert_eq!(inputs[1].shape.dims(), &[Dim::Fixed(1), Dim::Dynamic]);
        assert_eq!(model.inputs().unwrap(), inputs);

        let outputs = model.outputs().unwrap();
        assert_eq!(outputs[0].name, "logits");
        assert_eq!(outputs[1].shape.dims(), &[Dim::Dynamic]);
    }

    #[test]
    fn test_lookup_by_name() {
        let engine = Engine::new().unwrap();
        let model = engine.read_model(classifier_manifest()).unwrap();
        assert_eq!(model.input("input").unwrap().element_type, ElementType::F32);
        assert!(matches!(
            model.output("missing"),
            Err(Error::InvalidTensor { .. })
        ));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut never = Model::default();
        never.destroy();
        never.destroy();

        let engine = Engine::new().unwrap();
        let mut model = engine.read_model(classifier_manifest()).unwrap();
        model.destroy();
        model.destroy();
        assert!(matches!(model.inputs(), Err(Error::Released("model"))));
    }
}
