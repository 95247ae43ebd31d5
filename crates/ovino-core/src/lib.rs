//! OpenVINO Runtime Bindings
//!
//! Safe wrappers over the OpenVINO inference runtime: engine, models,
//! compiled models, inference requests, tensors and variable states, with
//! synchronous, asynchronous and callback-driven inference.
//!
//! ```no_run
//! use ovino_core::{Engine, ElementType};
//!
//! # fn main() -> ovino_core::Result<()> {
//! let engine = Engine::shared()?;
//! let model = engine.read_model("model.xml")?;
//! let compiled = engine.compile_model(&model, "CPU", [])?;
//! let mut request = compiled.create_infer_request()?;
//! request.set_input_tensor("input", &vec![0.0f32; 3 * 224 * 224], [1, 3, 224, 224], ElementType::F32)?;
//! request.infer()?;
//! let logits = request.get_output_tensor(0)?.data_as_f32()?;
//! # Ok(())
//! # }
//! ```
//!
//! Built without the `ffi` feature, the crate runs against an in-process
//! reference runtime that reads JSON graph manifests instead of model files.

mod callback;
mod compiled_model;
mod context;
mod data;
mod engine;
mod error;
mod ffi;
mod handle;
mod infer_request;
mod model;
mod options;
mod profiling;
mod tensor;
mod types;
mod variable_state;

#[cfg(test)]
mod test_support;

pub use compiled_model::CompiledModel;
pub use context::InferContext;
pub use data::{Element, HostData};
pub use engine::{is_available, Engine};
pub use error::{Error, NativeError, Result};
pub use infer_request::{InferRequest, RunState};
pub use model::Model;
pub use options::{
    enable_profiling, inference_num_threads, keys, num_streams, performance_hint, property,
    CompileConfig, CompileOption, PerformanceMode, Properties,
};
pub use profiling::{ProfilingInfo, ProfilingStatus};
pub use tensor::Tensor;
pub use types::{Dim, DynamicDimPolicy, ElementType, PartialShape, PortInfo, PortRef, Shape};
pub use variable_state::VariableState;

/// Native status codes carried by [`NativeError::code`]
pub mod status {
    pub use crate::ffi::status::*;
}
