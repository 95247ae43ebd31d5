//! FFI Bindings for the C++ OpenVINO wrapper
//!
//! The C++ layer (`native/core_wrapper.cpp`) owns every interaction with the
//! OpenVINO C++ runtime and exposes it through the flat C interface declared
//! here. Nothing outside this crate sees these symbols; the safe wrapper types
//! in the rest of the crate are the only callers.
//!
//! Without the `ffi` feature the same function set is provided by [`mock`],
//! an in-process reference runtime used for development and tests.

#![allow(dead_code)]

use libc::{c_char, c_void};

pub type OpenVINOCore = *mut c_void;
pub type OpenVINOModel = *mut c_void;
pub type OpenVINOCompiledModel = *mut c_void;
pub type OpenVINOInferRequest = *mut c_void;
pub type OpenVINOTensor = *mut c_void;
pub type OpenVINOVariableState = *mut c_void;

/// Status codes shared with the C wrapper
pub mod status {
    pub const OK: i32 = 0;
    pub const GENERAL: i32 = -1;
    pub const NOT_FOUND: i32 = -2;
    pub const PARAMETER_MISMATCH: i32 = -3;
    pub const BUSY: i32 = -4;
    pub const CANCELLED: i32 = -5;
    pub const NOT_IMPLEMENTED: i32 = -6;
    pub const OUT_OF_BOUNDS: i32 = -7;
}

/// Results of `openvino_infer_request_wait_for`
pub mod wait_result {
    pub const COMPLETED: i32 = 0;
    pub const TIMED_OUT: i32 = 1;
    pub const FAILED: i32 = -1;
}

/// Error out-parameter (matches core_wrapper.h)
#[repr(C)]
#[derive(Debug)]
pub struct OpenVINOError {
    pub code: i32,
    pub message: *mut c_char,
}

/// Port metadata (matches core_wrapper.h)
#[repr(C)]
#[derive(Debug)]
pub struct OpenVINOPortInfo {
    pub name: *mut c_char,
    pub shape: *mut i32,
    pub shape_size: i32,
    pub data_type: i32,
}

/// One profiling record (matches core_wrapper.h)
#[repr(C)]
#[derive(Debug)]
pub struct OpenVINOProfilingInfo {
    pub status: i32,
    pub real_time_us: i64,
    pub cpu_time_us: i64,
    pub node_name: *mut c_char,
    pub exec_type: *mut c_char,
    pub node_type: *mut c_char,
}

/// Completion notification, invoked on a runtime thread
pub type OpenVINOCallback =
    unsafe extern "C" fn(user_data: *mut c_void, status: i32, message: *const c_char);

// Linked at compile time via build.rs
#[cfg(feature = "ffi")]
extern "C" {
    pub fn openvino_error_free(error: *mut OpenVINOError);

    // Core
    pub fn openvino_core_create(error: *mut OpenVINOError) -> OpenVINOCore;
    pub fn openvino_core_destroy(core: OpenVINOCore);
    pub fn openvino_core_get_available_devices(
        core: OpenVINOCore,
        count: *mut i32,
        error: *mut OpenVINOError,
    ) -> *mut *mut c_char;
    pub fn openvino_core_free_device_list(devices: *mut *mut c_char, count: i32);
    pub fn openvino_core_read_model(
        core: OpenVINOCore,
        model_path: *const c_char,
        error: *mut OpenVINOError,
    ) -> OpenVINOModel;
    pub fn openvino_core_compile_model(
        core: OpenVINOCore,
        model: OpenVINOModel,
        device: *const c_char,
        keys: *const *const c_char,
        values: *const *const c_char,
        property_count: i32,
        error: *mut OpenVINOError,
    ) -> OpenVINOCompiledModel;

    // Model
    pub fn openvino_model_destroy(model: OpenVINOModel);
    pub fn openvino_model_get_inputs(
        model: OpenVINOModel,
        count: *mut i32,
        error: *mut OpenVINOError,
    ) -> *mut OpenVINOPortInfo;
    pub fn openvino_model_get_outputs(
        model: OpenVINOModel,
        count: *mut i32,
        error: *mut OpenVINOError,
    ) -> *mut OpenVINOPortInfo;
    pub fn openvino_model_free_port_info(ports: *mut OpenVINOPortInfo, count: i32);

    // Compiled model
    pub fn openvino_compiled_model_destroy(compiled: OpenVINOCompiledModel);
    pub fn openvino_compiled_model_create_infer_request(
        compiled: OpenVINOCompiledModel,
        error: *mut OpenVINOError,
    ) -> OpenVINOInferRequest;
    pub fn openvino_compiled_model_release_memory(
        compiled: OpenVINOCompiledModel,
        error: *mut OpenVINOError,
    ) -> i32;

    // Infer request
    pub fn openvino_infer_request_destroy(request: OpenVINOInferRequest);
    pub fn openvino_infer_request_set_input_tensor(
        request: OpenVINOInferRequest,
        name: *const c_char,
        data: *const c_void,
        shape: *const i32,
        shape_size: i32,
        data_type: i32,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_set_input_tensor_by_index(
        request: OpenVINOInferRequest,
        index: i32,
        data: *const c_void,
        shape: *const i32,
        shape_size: i32,
        data_type: i32,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_set_input_tensors(
        request: OpenVINOInferRequest,
        name: *const c_char,
        tensors: *const OpenVINOTensor,
        count: i32,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_set_input_tensors_by_index(
        request: OpenVINOInferRequest,
        index: i32,
        tensors: *const OpenVINOTensor,
        count: i32,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_set_output_tensor(
        request: OpenVINOInferRequest,
        name: *const c_char,
        tensor: OpenVINOTensor,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_set_output_tensor_by_index(
        request: OpenVINOInferRequest,
        index: i32,
        tensor: OpenVINOTensor,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_get_input_tensor(
        request: OpenVINOInferRequest,
        name: *const c_char,
        error: *mut OpenVINOError,
    ) -> OpenVINOTensor;
    pub fn openvino_infer_request_get_input_tensor_by_index(
        request: OpenVINOInferRequest,
        index: i32,
        error: *mut OpenVINOError,
    ) -> OpenVINOTensor;
    pub fn openvino_infer_request_get_output_tensor(
        request: OpenVINOInferRequest,
        name: *const c_char,
        error: *mut OpenVINOError,
    ) -> OpenVINOTensor;
    pub fn openvino_infer_request_get_output_tensor_by_index(
        request: OpenVINOInferRequest,
        index: i32,
        error: *mut OpenVINOError,
    ) -> OpenVINOTensor;
    pub fn openvino_infer_request_get_tensor(
        request: OpenVINOInferRequest,
        name: *const c_char,
        error: *mut OpenVINOError,
    ) -> OpenVINOTensor;
    pub fn openvino_infer_request_set_tensor(
        request: OpenVINOInferRequest,
        name: *const c_char,
        tensor: OpenVINOTensor,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_infer(
        request: OpenVINOInferRequest,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_start_async(
        request: OpenVINOInferRequest,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_wait(
        request: OpenVINOInferRequest,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_wait_for(
        request: OpenVINOInferRequest,
        timeout_ms: i64,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_cancel(
        request: OpenVINOInferRequest,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_set_callback(
        request: OpenVINOInferRequest,
        callback: OpenVINOCallback,
        user_data: *mut c_void,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_query_state(
        request: OpenVINOInferRequest,
        states: *mut *mut OpenVINOVariableState,
        count: *mut i32,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_reset_state(
        request: OpenVINOInferRequest,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_infer_request_get_profiling_info(
        request: OpenVINOInferRequest,
        count: *mut i32,
        error: *mut OpenVINOError,
    ) -> *mut OpenVINOProfilingInfo;
    pub fn openvino_profiling_info_free(infos: *mut OpenVINOProfilingInfo, count: i32);

    // Tensor
    pub fn openvino_tensor_new(
        data_type: i32,
        shape: *const i32,
        shape_size: i32,
        error: *mut OpenVINOError,
    ) -> OpenVINOTensor;
    pub fn openvino_tensor_new_with_data(
        data_type: i32,
        shape: *const i32,
        shape_size: i32,
        data: *const c_void,
        error: *mut OpenVINOError,
    ) -> OpenVINOTensor;
    pub fn openvino_tensor_destroy(tensor: OpenVINOTensor);
    pub fn openvino_tensor_get_shape(
        tensor: OpenVINOTensor,
        shape_size: *mut i32,
        error: *mut OpenVINOError,
    ) -> *mut i32;
    pub fn openvino_tensor_free_shape(shape: *mut i32, shape_size: i32);
    pub fn openvino_tensor_set_shape(
        tensor: OpenVINOTensor,
        shape: *const i32,
        shape_size: i32,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_tensor_get_size(tensor: OpenVINOTensor, error: *mut OpenVINOError) -> i64;
    pub fn openvino_tensor_get_byte_size(tensor: OpenVINOTensor, error: *mut OpenVINOError) -> i64;
    pub fn openvino_tensor_get_element_type(
        tensor: OpenVINOTensor,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_tensor_read_data(
        tensor: OpenVINOTensor,
        dst: *mut c_void,
        capacity: i64,
        error: *mut OpenVINOError,
    ) -> i64;

    // Variable state
    pub fn openvino_variable_state_destroy(state: OpenVINOVariableState);
    pub fn openvino_variable_state_free_list(states: *mut OpenVINOVariableState, count: i32);
    pub fn openvino_variable_state_get_name(
        state: OpenVINOVariableState,
        error: *mut OpenVINOError,
    ) -> *mut c_char;
    pub fn openvino_variable_state_free_name(name: *mut c_char);
    pub fn openvino_variable_state_get_state(
        state: OpenVINOVariableState,
        error: *mut OpenVINOError,
    ) -> OpenVINOTensor;
    pub fn openvino_variable_state_set_state(
        state: OpenVINOVariableState,
        tensor: OpenVINOTensor,
        error: *mut OpenVINOError,
    ) -> i32;
    pub fn openvino_variable_state_reset(
        state: OpenVINOVariableState,
        error: *mut OpenVINOError,
    ) -> i32;
}

// Reference runtime for when the native library is not linked
#[cfg(not(feature = "ffi"))]
mod mock;

#[cfg(not(feature = "ffi"))]
pub use mock::*;
