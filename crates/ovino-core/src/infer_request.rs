//! Inference requests
//!
//! An [`InferRequest`] is one reusable execution context of a compiled model.
//! It tracks a small state machine so that misuse (binding inputs while a run
//! is in flight, reading outputs before anything has run) fails with
//! [`Error::InvalidState`] instead of reaching the runtime:
//!
//! ```text
//! Idle -> InputsBound -> Running -----> Completed
//!                     \-> AsyncStarted -> Completed | Idle (failed, cancelled)
//! ```
//!
//! A completed request accepts new bindings and runs again. A failed run
//! returns it to `Idle` with no partial results.
//!
//! The type is `Send` but not `Sync`: one owner drives a request at a time,
//! while sibling requests of the same compiled model run concurrently.

use std::cell::Cell;
use std::ffi::CString;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use libc::c_void;
use tracing::{debug, warn};

use crate::callback::{on_complete, RequestShared};
use crate::context::InferContext;
use crate::data::HostData;
use crate::error::{Error, ErrorSlot, Result};
use crate::ffi::{self, status, wait_result, OpenVINOInferRequest, OpenVINOVariableState};
use crate::handle::{self, c_string, native_index, HandleKind, NativeHandle};
use crate::profiling::ProfilingInfo;
use crate::tensor::Tensor;
use crate::types::{ElementType, PortRef, Shape};
use crate::variable_state::VariableState;

/// Position of a request in its run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    InputsBound,
    Running,
    AsyncStarted,
    Completed,
}

impl RunState {
    /// A run is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, RunState::Running | RunState::AsyncStarted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::InputsBound => "inputs bound",
            RunState::Running => "running",
            RunState::AsyncStarted => "async started",
            RunState::Completed => "completed",
        };
        f.write_str(s)
    }
}

enum NativePort {
    Name(CString),
    Index(i32),
}

impl NativePort {
    fn new(port: &PortRef) -> Result<Self> {
        match port {
            PortRef::Name(name) => Ok(NativePort::Name(c_string(name)?)),
            PortRef::Index(index) => Ok(NativePort::Index(native_index(*index)?)),
        }
    }
}

/// Execution context created by [`CompiledModel::create_infer_request`]
///
/// [`CompiledModel::create_infer_request`]: crate::CompiledModel::create_infer_request
pub struct InferRequest {
    handle: Option<Arc<NativeHandle>>,
    shared: Arc<RequestShared>,
    _not_sync: PhantomData<Cell<()>>,
}

impl Default for InferRequest {
    fn default() -> Self {
        Self {
            handle: None,
            shared: Arc::new(RequestShared::new()),
            _not_sync: PhantomData,
        }
    }
}

impl InferRequest {
    /// Wrap a fresh native request and install the completion trampoline.
    pub(crate) fn from_raw(ptr: OpenVINOInferRequest, parent: Option<Arc<NativeHandle>>) -> Result<Self> {
        let shared = Arc::new(RequestShared::new());
        let handle = NativeHandle::new(ptr, HandleKind::InferRequest, parent)
            .ok_or(Error::Released(HandleKind::InferRequest.name()))?
            .with_keepalive(shared.clone());
        let handle = Arc::new(handle);

        let user_data = Arc::as_ptr(&shared) as *mut c_void;
        let mut err = ErrorSlot::new();
        let ret = unsafe {
            ffi::openvino_infer_request_set_callback(
                handle.as_ptr(),
                on_complete,
                user_data,
                err.as_mut_ptr(),
            )
        };
        err.status(ret, "install completion callback")
            .map_err(Error::native)?;

        debug!("infer request created");
        Ok(Self {
            handle: Some(handle),
            shared,
            _not_sync: PhantomData,
        })
    }

    fn raw(&self) -> Result<OpenVINOInferRequest> {
        handle::live(&self.handle, HandleKind::InferRequest)
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        self.shared.status().state
    }

    /// Number of runs that have completed successfully
    pub fn completed_runs(&self) -> u64 {
        self.shared.status().completed_runs
    }

    fn ensure_not_busy(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state.is_busy() {
            return Err(Error::InvalidState { operation, state });
        }
        Ok(())
    }

    fn mark_bound(&self) {
        self.shared.update(|s| {
            if matches!(s.state, RunState::Idle | RunState::Completed) {
                s.state = RunState::InputsBound;
            }
        });
    }

    fn tensor(&self, ptr: *mut c_void) -> Result<Tensor> {
        Tensor::from_raw(ptr, self.handle.clone())
    }

    // ------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------

    /// Copy a host buffer into an input port.
    ///
    /// Fails with [`Error::InvalidTensor`] when the port does not exist, when
    /// the host container cannot carry `element_type`, or when the shape or
    /// type does not match the port.
    pub fn set_input_tensor<'a>(
        &mut self,
        port: impl Into<PortRef>,
        data: impl Into<HostData<'a>>,
        shape: impl Into<Shape>,
        element_type: ElementType,
    ) -> Result<()> {
        let raw = self.raw()?;
        self.ensure_not_busy("bind inputs")?;
        let port = port.into();
        let data = data.into();
        let shape = shape.into();
        let count = shape.element_count()?;
        data.check(element_type, count)
            .map_err(|e| match e {
                Error::UnsupportedType(message) => Error::InvalidTensor {
                    message,
                    code: None,
                },
                other => other,
            })?;
        let dims = shape.to_native()?;

        let mut err = ErrorSlot::new();
        let ret = match NativePort::new(&port)? {
            NativePort::Name(name) => unsafe {
                ffi::openvino_infer_request_set_input_tensor(
                    raw,
                    name.as_ptr(),
                    data.as_ptr(),
                    dims.as_ptr(),
                    dims.len() as i32,
                    element_type.code(),
                    err.as_mut_ptr(),
                )
            },
            NativePort::Index(index) => unsafe {
                ffi::openvino_infer_request_set_input_tensor_by_index(
                    raw,
                    index,
                    data.as_ptr(),
                    dims.as_ptr(),
                    dims.len() as i32,
                    element_type.code(),
                    err.as_mut_ptr(),
                )
            },
        };
        err.status(ret, "set input tensor").map_err(Error::tensor)?;
        self.mark_bound();
        debug!(port = %port, shape = %shape, "input bound");
        Ok(())
    }

    /// Bind one tensor per batch item to a batched input. The model must
    /// declare a batch dimension; the runtime validates the batch.
    pub fn set_input_tensors(&mut self, port: impl Into<PortRef>, tensors: &[Tensor]) -> Result<()> {
        let raw = self.raw()?;
        self.ensure_not_busy("bind inputs")?;
        let port = port.into();
        let raws = tensors.iter().map(Tensor::raw).collect::<Result<Vec<_>>>()?;
        let count = i32::try_from(raws.len())
            .map_err(|_| Error::InvalidArgument(format!("batch of {} tensors", raws.len())))?;

        let mut err = ErrorSlot::new();
        let ret = match NativePort::new(&port)? {
            NativePort::Name(name) => unsafe {
                ffi::openvino_infer_request_set_input_tensors(
                    raw,
                    name.as_ptr(),
                    raws.as_ptr(),
                    count,
                    err.as_mut_ptr(),
                )
            },
            NativePort::Index(index) => unsafe {
                ffi::openvino_infer_request_set_input_tensors_by_index(
                    raw,
                    index,
                    raws.as_ptr(),
                    count,
                    err.as_mut_ptr(),
                )
            },
        };
        err.status(ret, "set input tensors").map_err(Error::tensor)?;
        self.mark_bound();
        debug!(port = %port, batch = count, "batch bound");
        Ok(())
    }

    /// Pre-bind a caller-allocated output. Subsequent runs write into
    /// `tensor` directly.
    pub fn set_output_tensor(&mut self, port: impl Into<PortRef>, tensor: &Tensor) -> Result<()> {
        let raw = self.raw()?;
        self.ensure_not_busy("bind outputs")?;
        let port = port.into();
        let tensor_raw = tensor.raw()?;

        let mut err = ErrorSlot::new();
        let ret = match NativePort::new(&port)? {
            NativePort::Name(name) => unsafe {
                ffi::openvino_infer_request_set_output_tensor(
                    raw,
                    name.as_ptr(),
                    tensor_raw,
                    err.as_mut_ptr(),
                )
            },
            NativePort::Index(index) => unsafe {
                ffi::openvino_infer_request_set_output_tensor_by_index(
                    raw,
                    index,
                    tensor_raw,
                    err.as_mut_ptr(),
                )
            },
        };
        err.status(ret, "set output tensor").map_err(Error::tensor)?;
        debug!(port = %port, "output bound");
        Ok(())
    }

    /// Tensor currently bound to an input port
    pub fn get_input_tensor(&self, port: impl Into<PortRef>) -> Result<Tensor> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let ptr = match NativePort::new(&port.into())? {
            NativePort::Name(name) => unsafe {
                ffi::openvino_infer_request_get_input_tensor(raw, name.as_ptr(), err.as_mut_ptr())
            },
            NativePort::Index(index) => unsafe {
                ffi::openvino_infer_request_get_input_tensor_by_index(raw, index, err.as_mut_ptr())
            },
        };
        let ptr = err.pointer(ptr, "get input tensor").map_err(Error::tensor)?;
        self.tensor(ptr)
    }

    /// Result tensor of an output port. Requires a completed run and no run
    /// in flight.
    pub fn get_output_tensor(&self, port: impl Into<PortRef>) -> Result<Tensor> {
        let raw = self.raw()?;
        let status = self.shared.status();
        if status.state.is_busy() || status.completed_runs == 0 {
            return Err(Error::InvalidState {
                operation: "read outputs",
                state: status.state,
            });
        }
        let mut err = ErrorSlot::new();
        let ptr = match NativePort::new(&port.into())? {
            NativePort::Name(name) => unsafe {
                ffi::openvino_infer_request_get_output_tensor(raw, name.as_ptr(), err.as_mut_ptr())
            },
            NativePort::Index(index) => unsafe {
                ffi::openvino_infer_request_get_output_tensor_by_index(raw, index, err.as_mut_ptr())
            },
        };
        let ptr = err.pointer(ptr, "get output tensor").map_err(Error::tensor)?;
        self.tensor(ptr)
    }

    /// Tensor bound to any port, input or output
    pub fn get_tensor(&self, name: &str) -> Result<Tensor> {
        let raw = self.raw()?;
        let name = c_string(name)?;
        let mut err = ErrorSlot::new();
        let ptr = unsafe { ffi::openvino_infer_request_get_tensor(raw, name.as_ptr(), err.as_mut_ptr()) };
        let ptr = err.pointer(ptr, "get tensor").map_err(Error::tensor)?;
        self.tensor(ptr)
    }

    /// Bind `tensor` to any port, input or output
    pub fn set_tensor(&mut self, name: &str, tensor: &Tensor) -> Result<()> {
        let raw = self.raw()?;
        self.ensure_not_busy("bind tensors")?;
        let tensor_raw = tensor.raw()?;
        let c_name = c_string(name)?;
        let mut err = ErrorSlot::new();
        let ret = unsafe {
            ffi::openvino_infer_request_set_tensor(raw, c_name.as_ptr(), tensor_raw, err.as_mut_ptr())
        };
        err.status(ret, "set tensor").map_err(Error::tensor)?;
        self.mark_bound();
        debug!(port = name, "tensor bound");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Collect an unwaited asynchronous run whose completion has already
    /// been reported, so the runtime accepts the next run.
    fn reap(&mut self, raw: OpenVINOInferRequest) {
        let status = self.shared.status();
        if !status.awaiting || status.state == RunState::AsyncStarted {
            return;
        }
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_infer_request_wait(raw, err.as_mut_ptr()) };
        if let Err(e) = err.status(ret, "wait") {
            debug!(error = %e, "previous asynchronous run ended with an error");
        }
        self.shared.update(|s| s.awaiting = false);
    }

    /// Run synchronously, blocking until the forward pass finishes.
    pub fn infer(&mut self) -> Result<()> {
        let raw = self.raw()?;
        self.reap(raw);
        self.shared.update(|s| {
            if s.state.is_busy() {
                return Err(Error::InvalidState {
                    operation: "start inference",
                    state: s.state,
                });
            }
            s.state = RunState::Running;
            Ok(())
        })?;

        let started = Instant::now();
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_infer_request_infer(raw, err.as_mut_ptr()) };
        let outcome = err
            .status(ret, "infer")
            .map_err(|e| Error::inference(e, RunState::Running));
        self.shared.settle(RunState::Running, outcome.is_ok());

        metrics::counter!("ovino_infer_total").increment(1);
        match &outcome {
            Ok(()) => {
                metrics::histogram!("ovino_infer_latency_seconds").record(started.elapsed().as_secs_f64());
                debug!(elapsed_us = started.elapsed().as_micros() as u64, "inference completed");
            }
            Err(e) => {
                metrics::counter!("ovino_infer_failures_total").increment(1);
                warn!(error = %e, "inference failed");
            }
        }
        outcome
    }

    /// Synchronous run observing `ctx` immediately before and after the
    /// native call. An in-flight native call is not interrupted.
    pub fn infer_with_context(&mut self, ctx: &InferContext) -> Result<()> {
        ctx.check()?;
        let outcome = self.infer();
        ctx.check()?;
        outcome
    }

    /// Start a run on the runtime's threads and return immediately.
    pub fn start_async(&mut self) -> Result<()> {
        let raw = self.raw()?;
        self.reap(raw);
        self.shared.update(|s| {
            if s.state.is_busy() {
                return Err(Error::InvalidState {
                    operation: "start inference",
                    state: s.state,
                });
            }
            s.state = RunState::AsyncStarted;
            s.awaiting = true;
            Ok(())
        })?;

        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_infer_request_start_async(raw, err.as_mut_ptr()) };
        if let Err(e) = err.status(ret, "start async") {
            self.shared.update(|s| {
                s.state = RunState::Idle;
                s.awaiting = false;
            });
            metrics::counter!("ovino_infer_failures_total").increment(1);
            return Err(Error::inference(e, RunState::AsyncStarted));
        }
        metrics::counter!("ovino_infer_total").increment(1);
        debug!("asynchronous inference started");
        Ok(())
    }

    fn finish_async(&self, succeeded: bool) {
        self.shared.settle(RunState::AsyncStarted, succeeded);
        self.shared.update(|s| s.awaiting = false);
    }

    /// Block until the current asynchronous run ends and return its outcome.
    /// Returns `Ok` immediately when no run is pending.
    pub fn wait(&mut self) -> Result<()> {
        let raw = self.raw()?;
        if !self.shared.status().awaiting {
            return Ok(());
        }
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_infer_request_wait(raw, err.as_mut_ptr()) };
        let outcome = err
            .status(ret, "wait")
            .map_err(|e| Error::inference(e, RunState::AsyncStarted));
        self.finish_async(outcome.is_ok());
        if let Err(e) = &outcome {
            metrics::counter!("ovino_infer_failures_total").increment(1);
            debug!(error = %e, "asynchronous inference ended with an error");
        }
        outcome
    }

    /// Block for at most `timeout`. `Ok(false)` means the run is still in
    /// flight and the request stays `AsyncStarted`.
    pub fn wait_for(&mut self, timeout: Duration) -> Result<bool> {
        let raw = self.raw()?;
        if !self.shared.status().awaiting {
            return Ok(true);
        }
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_infer_request_wait_for(raw, timeout_ms, err.as_mut_ptr()) };
        match ret {
            wait_result::TIMED_OUT => Ok(false),
            wait_result::COMPLETED => {
                self.finish_async(true);
                Ok(true)
            }
            _ => {
                let code = if ret == wait_result::FAILED { status::GENERAL } else { ret };
                let outcome = err
                    .status(code, "wait for")
                    .map_err(|e| Error::inference(e, RunState::AsyncStarted));
                self.finish_async(false);
                outcome.map(|()| false)
            }
        }
    }

    /// Ask the runtime to abandon the in-flight asynchronous run.
    pub fn cancel(&self) -> Result<()> {
        let raw = self.raw()?;
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_infer_request_cancel(raw, err.as_mut_ptr()) };
        err.status(ret, "cancel").map_err(Error::native)?;
        debug!("cancellation requested");
        Ok(())
    }

    /// `start_async` followed by `wait`.
    pub fn infer_async(&mut self) -> Result<()> {
        self.start_async()?;
        self.wait()
    }

    /// Run asynchronously and await completion without blocking the executor
    /// while the run is in flight. If `ctx` is cancelled or expires first, the
    /// run is cancelled natively and the context's error is returned once the
    /// runtime has wound it down.
    pub async fn run_async(&mut self, ctx: &InferContext) -> Result<()> {
        ctx.check()?;
        let shared = self.shared.clone();
        let completed = shared.completion().notified();
        tokio::pin!(completed);
        completed.as_mut().enable();

        self.start_async()?;
        if self.state() == RunState::AsyncStarted {
            tokio::select! {
                _ = &mut completed => {}
                reason = ctx.done() => {
                    debug!(reason = %reason, "context fired during asynchronous inference");
                    if let Err(e) = self.cancel() {
                        warn!(error = %e, "native cancel failed");
                    }
                    if let Err(e) = self.wait() {
                        debug!(error = %e, "cancelled run wound down");
                    }
                    return Err(reason);
                }
            }
        }
        self.wait()
    }

    // ------------------------------------------------------------------
    // Callbacks, state, profiling
    // ------------------------------------------------------------------

    /// Register `callback` to be invoked once per asynchronous run, on a
    /// dispatcher thread, with the run's outcome. Replaces any previous
    /// callback; the replaced one receives nothing further. Register before
    /// `start_async` to observe that run.
    pub fn set_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(Result<()>) + Send + 'static,
    {
        self.raw()?;
        self.shared.register(callback)
    }

    pub fn clear_callback(&mut self) {
        self.shared.retire();
    }

    /// Variable states of a stateful model. Empty for stateless models.
    pub fn query_state(&self) -> Result<Vec<VariableState>> {
        let raw = self.raw()?;
        let mut list: *mut OpenVINOVariableState = ptr::null_mut();
        let mut count = 0i32;
        let mut err = ErrorSlot::new();
        let ret = unsafe {
            ffi::openvino_infer_request_query_state(raw, &mut list, &mut count, err.as_mut_ptr())
        };
        err.status(ret, "query state").map_err(Error::native)?;
        if list.is_null() || count <= 0 {
            return Ok(Vec::new());
        }
        let raws: Vec<OpenVINOVariableState> =
            unsafe { std::slice::from_raw_parts(list, count as usize) }.to_vec();
        unsafe { ffi::openvino_variable_state_free_list(list, count) };
        raws.into_iter()
            .filter(|p| !p.is_null())
            .map(|p| VariableState::from_raw(p, self.handle.clone()))
            .collect()
    }

    /// Reset every variable state to its initial value.
    pub fn reset_state(&mut self) -> Result<()> {
        let raw = self.raw()?;
        self.ensure_not_busy("reset state")?;
        let mut err = ErrorSlot::new();
        let ret = unsafe { ffi::openvino_infer_request_reset_state(raw, err.as_mut_ptr()) };
        err.status(ret, "reset state").map_err(Error::native)?;
        debug!("variable states reset");
        Ok(())
    }

    /// Per-node counters of the last run. Requires a completed run; empty when
    /// the runtime reports nothing (profiling not enabled at compile time).
    pub fn profiling_info(&self) -> Result<Vec<ProfilingInfo>> {
        let raw = self.raw()?;
        let status = self.shared.status();
        if status.state.is_busy() || status.completed_runs == 0 {
            return Err(Error::InvalidState {
                operation: "read profiling info",
                state: status.state,
            });
        }
        let mut count = 0i32;
        let mut err = ErrorSlot::new();
        let list = unsafe {
            ffi::openvino_infer_request_get_profiling_info(raw, &mut count, err.as_mut_ptr())
        };
        err.checked("get profiling info").map_err(Error::native)?;
        if list.is_null() || count <= 0 {
            return Ok(Vec::new());
        }
        let entries = unsafe { std::slice::from_raw_parts(list, count as usize) }
            .iter()
            .map(|raw| unsafe { ProfilingInfo::from_native(raw) })
            .collect();
        unsafe { ffi::openvino_profiling_info_free(list, count) };
        Ok(entries)
    }

    /// Release the request. Safe to call repeatedly. Tensors and variable
    /// states obtained from it keep the native request alive until dropped.
    pub fn destroy(&mut self) {
        self.shared.retire();
        if self.handle.take().is_some() {
            debug!("infer request destroyed");
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl fmt::Debug for InferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.shared.status();
        f.debug_struct("InferRequest")
            .field("state", &status.state)
            .field("completed_runs", &status.completed_runs)
            .field("released", &self.is_released())
            .finish()
    }
}
