//! In-process reference runtime
//!
//! Implements the wrapper's C interface in Rust so the crate can be developed
//! and tested without the native OpenVINO libraries. Models are JSON graph
//! manifests:
//!
//! ```json
//! {
//!   "name": "tiny-classifier",
//!   "inputs":  [{ "name": "input",  "shape": [1, 3, 224, 224], "element_type": "f32" }],
//!   "outputs": [{ "name": "logits", "shape": [1, 1000],        "element_type": "f32" }],
//!   "states":  [{ "name": "hidden", "shape": [1, 4] }],
//!   "latency_ms": 2
//! }
//! ```
//!
//! A dimension of `-1` is dynamic. The forward pass is a fixed affine map of
//! the mean input value, so results are deterministic across runs.

use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use libc::{c_char, c_void};
use serde::Deserialize;

use super::{
    status, wait_result, OpenVINOCallback, OpenVINOCompiledModel, OpenVINOCore, OpenVINOError,
    OpenVINOInferRequest, OpenVINOModel, OpenVINOPortInfo, OpenVINOProfilingInfo, OpenVINOTensor,
    OpenVINOVariableState,
};
use crate::types::ElementType;

const DEVICES: &[&str] = &["CPU"];

/// Compute slice between cancellation checks
const SLICE: Duration = Duration::from_millis(2);

// ---------------------------------------------------------------------------
// Plumbing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Fault {
    code: i32,
    message: String,
}

impl Fault {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn general(message: impl Into<String>) -> Self {
        Self::new(status::GENERAL, message)
    }

    fn mismatch(message: impl Into<String>) -> Self {
        Self::new(status::PARAMETER_MISMATCH, message)
    }
}

type MockResult<T> = Result<T, Fault>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn into_c_string(s: &str) -> *mut c_char {
    CString::new(s.replace('\0', " "))
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

unsafe fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

unsafe fn set_error(error: *mut OpenVINOError, fault: Fault) {
    if let Some(slot) = error.as_mut() {
        free_c_string(slot.message);
        slot.code = fault.code;
        slot.message = into_c_string(&fault.message);
    }
}

unsafe fn finish<T>(error: *mut OpenVINOError, result: MockResult<T>, failed: T) -> T {
    match result {
        Ok(value) => value,
        Err(fault) => {
            set_error(error, fault);
            failed
        }
    }
}

unsafe fn finish_status(error: *mut OpenVINOError, result: MockResult<()>) -> i32 {
    match result {
        Ok(()) => status::OK,
        Err(fault) => {
            let code = fault.code;
            set_error(error, fault);
            code
        }
    }
}

unsafe fn handle<'a, T>(h: *mut c_void, what: &str) -> MockResult<&'a T> {
    (h as *const T)
        .as_ref()
        .ok_or_else(|| Fault::general(format!("null {} handle", what)))
}

fn into_handle<T>(value: T) -> *mut c_void {
    Box::into_raw(Box::new(value)) as *mut c_void
}

unsafe fn destroy_handle<T>(h: *mut c_void) {
    if !h.is_null() {
        drop(Box::from_raw(h as *mut T));
    }
}

unsafe fn c_str<'a>(s: *const c_char, what: &str) -> MockResult<&'a str> {
    if s.is_null() {
        return Err(Fault::general(format!("null {}", what)));
    }
    CStr::from_ptr(s)
        .to_str()
        .map_err(|_| Fault::general(format!("{} is not valid UTF-8", what)))
}

unsafe fn read_shape(shape: *const i32, rank: i32) -> MockResult<Vec<usize>> {
    if rank < 0 {
        return Err(Fault::mismatch(format!("negative rank {}", rank)));
    }
    if rank == 0 {
        return Ok(Vec::new());
    }
    if shape.is_null() {
        return Err(Fault::mismatch("null shape"));
    }
    std::slice::from_raw_parts(shape, rank as usize)
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| Fault::mismatch(format!("negative dimension {}", d)))
        })
        .collect()
}

fn element_type(code: i32) -> MockResult<ElementType> {
    ElementType::from_code(code)
        .ok_or_else(|| Fault::mismatch(format!("unknown element type code {}", code)))
}

fn into_raw_list<T>(items: Vec<T>, count: *mut i32) -> *mut T {
    let n = items.len() as i32;
    unsafe {
        if let Some(c) = count.as_mut() {
            *c = n;
        }
    }
    if items.is_empty() {
        return ptr::null_mut();
    }
    Box::into_raw(items.into_boxed_slice()) as *mut T
}

unsafe fn from_raw_list<T>(items: *mut T, count: i32) -> Option<Box<[T]>> {
    if items.is_null() || count <= 0 {
        return None;
    }
    Some(Box::from_raw(ptr::slice_from_raw_parts_mut(
        items,
        count as usize,
    )))
}

// ---------------------------------------------------------------------------
// Element codecs
// ---------------------------------------------------------------------------

fn bytes<const N: usize>(b: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&b[..N]);
    out
}

fn f16_to_f32(h: u16) -> f32 {
    let sign = ((h >> 15) & 1) as u32;
    let exp = ((h >> 10) & 0x1f) as u32;
    let frac = (h & 0x3ff) as u32;
    let bits = match (exp, frac) {
        (0, 0) => sign << 31,
        (0, _) => {
            let mut e = 113u32;
            let mut f = frac;
            while f & 0x400 == 0 {
                f <<= 1;
                e -= 1;
            }
            (sign << 31) | (e << 23) | ((f & 0x3ff) << 13)
        }
        (0x1f, _) => (sign << 31) | (0xff << 23) | (frac << 13),
        _ => (sign << 31) | ((exp + 112) << 23) | (frac << 13),
    };
    f32::from_bits(bits)
}

fn f32_to_f16(v: f32) -> u16 {
    let x = v.to_bits();
    let sign = ((x >> 16) & 0x8000) as u16;
    let exp = ((x >> 23) & 0xff) as i32;
    let frac = x & 0x7f_ffff;
    if exp == 0xff {
        return sign | 0x7c00 | if frac != 0 { 0x200 } else { 0 };
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = frac | 0x80_0000;
        return sign | (m >> (14 - e) as u32) as u16;
    }
    sign | ((e as u16) << 10) | (frac >> 13) as u16
}

fn load(et: ElementType, data: &[u8], i: usize) -> f64 {
    let s = et.size();
    let b = &data[i * s..(i + 1) * s];
    match et {
        ElementType::F32 => f32::from_ne_bytes(bytes(b)) as f64,
        ElementType::F64 => f64::from_ne_bytes(bytes(b)),
        ElementType::I64 => i64::from_ne_bytes(bytes(b)) as f64,
        ElementType::I32 => i32::from_ne_bytes(bytes(b)) as f64,
        ElementType::I16 => i16::from_ne_bytes(bytes(b)) as f64,
        ElementType::I8 => i8::from_ne_bytes(bytes(b)) as f64,
        ElementType::U64 => u64::from_ne_bytes(bytes(b)) as f64,
        ElementType::U32 => u32::from_ne_bytes(bytes(b)) as f64,
        ElementType::U16 => u16::from_ne_bytes(bytes(b)) as f64,
        ElementType::U8 => b[0] as f64,
        ElementType::F16 => f16_to_f32(u16::from_ne_bytes(bytes(b))) as f64,
        ElementType::BF16 => f32::from_bits((u16::from_ne_bytes(bytes(b)) as u32) << 16) as f64,
    }
}

fn store(et: ElementType, data: &mut [u8], i: usize, v: f64) {
    let s = et.size();
    let dst = &mut data[i * s..(i + 1) * s];
    let r = v.round();
    match et {
        ElementType::F32 => dst.copy_from_slice(&(v as f32).to_ne_bytes()),
        ElementType::F64 => dst.copy_from_slice(&v.to_ne_bytes()),
        ElementType::I64 => dst.copy_from_slice(&(r as i64).to_ne_bytes()),
        ElementType::I32 => dst.copy_from_slice(&(r as i32).to_ne_bytes()),
        ElementType::I16 => dst.copy_from_slice(&(r as i16).to_ne_bytes()),
        ElementType::I8 => dst.copy_from_slice(&(r as i8).to_ne_bytes()),
        ElementType::U64 => dst.copy_from_slice(&(r as u64).to_ne_bytes()),
        ElementType::U32 => dst.copy_from_slice(&(r as u32).to_ne_bytes()),
        ElementType::U16 => dst.copy_from_slice(&(r as u16).to_ne_bytes()),
        ElementType::U8 => dst[0] = r as u8,
        ElementType::F16 => dst.copy_from_slice(&f32_to_f16(v as f32).to_ne_bytes()),
        ElementType::BF16 => dst.copy_from_slice(&(((v as f32).to_bits() >> 16) as u16).to_ne_bytes()),
    }
}

// ---------------------------------------------------------------------------
// Graph manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct PortDecl {
    name: String,
    shape: Vec<i64>,
    element_type: ElementType,
}

impl PortDecl {
    fn element_count(&self) -> Option<usize> {
        self.static_shape().and_then(|shape| shape_elements(&shape).ok())
    }

    fn static_shape(&self) -> Option<Vec<usize>> {
        self.shape.iter().map(|&d| usize::try_from(d).ok()).collect()
    }

    fn accepts(&self, et: ElementType, shape: &[usize]) -> MockResult<()> {
        if et != self.element_type {
            return Err(Fault::mismatch(format!(
                "element type mismatch for port '{}': expected {}, got {}",
                self.name, self.element_type, et
            )));
        }
        let compatible = shape.len() == self.shape.len()
            && self
                .shape
                .iter()
                .zip(shape)
                .all(|(&declared, &actual)| declared < 0 || declared as usize == actual);
        if !compatible {
            return Err(Fault::mismatch(format!(
                "shape {:?} is not compatible with port '{}' {:?}",
                shape, self.name, self.shape
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StateDecl {
    name: String,
    shape: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct Graph {
    #[allow(dead_code)]
    name: String,
    inputs: Vec<PortDecl>,
    outputs: Vec<PortDecl>,
    #[serde(default)]
    states: Vec<StateDecl>,
    #[serde(default)]
    latency_ms: u64,
}

impl Graph {
    fn load(path: &str) -> MockResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Fault::new(status::NOT_FOUND, format!("model file not found: {}", path))
            }
            _ => Fault::general(format!("cannot read model file {}: {}", path, e)),
        })?;
        let graph: Graph = serde_json::from_str(&text)
            .map_err(|e| Fault::general(format!("unrecognized model format: {}", e)))?;
        for port in graph.inputs.iter().chain(&graph.outputs) {
            if port.shape.iter().any(|&d| d < -1) {
                return Err(Fault::general(format!(
                    "invalid dimension in port '{}': {:?}",
                    port.name, port.shape
                )));
            }
            if let Some(shape) = port.static_shape() {
                shape_elements(&shape).map_err(|e| Fault::general(e.message))?;
            }
        }
        for state in &graph.states {
            shape_elements(&state.shape).map_err(|e| Fault::general(e.message))?;
        }
        Ok(graph)
    }

    fn port(ports: &[PortDecl], name: &str, direction: &str) -> MockResult<usize> {
        ports.iter().position(|p| p.name == name).ok_or_else(|| {
            Fault::new(
                status::NOT_FOUND,
                format!("{} port '{}' not found", direction, name),
            )
        })
    }

    fn index(ports: &[PortDecl], index: i32, direction: &str) -> MockResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < ports.len())
            .ok_or_else(|| {
                Fault::new(
                    status::OUT_OF_BOUNDS,
                    format!(
                        "{} port index {} out of range (model has {})",
                        direction,
                        index,
                        ports.len()
                    ),
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TensorBuf {
    element_type: ElementType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

/// Element count of `shape`, rejecting products that overflow `usize`.
fn shape_elements(shape: &[usize]) -> MockResult<usize> {
    if shape.contains(&0) {
        return Ok(0);
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Fault::mismatch(format!("shape {:?} overflows the addressable size", shape)))
}

impl TensorBuf {
    fn zeros(element_type: ElementType, shape: Vec<usize>) -> MockResult<Self> {
        let len = shape_elements(&shape)?
            .checked_mul(element_type.size())
            .ok_or_else(|| Fault::mismatch(format!("shape {:?} overflows the addressable size", shape)))?;
        Ok(Self {
            element_type,
            shape,
            data: vec![0; len],
        })
    }

    fn element_count(&self) -> usize {
        self.data.len() / self.element_type.size()
    }

    fn values(&self) -> Vec<f64> {
        (0..self.element_count())
            .map(|i| load(self.element_type, &self.data, i))
            .collect()
    }
}

type SharedBuf = Arc<Mutex<TensorBuf>>;

struct MockCore;

struct MockModel {
    graph: Arc<Graph>,
}

struct MockCompiled {
    graph: Arc<Graph>,
    profiling: bool,
}

struct MockTensor {
    buf: SharedBuf,
}

struct StateSlot {
    name: String,
    shape: Vec<usize>,
    values: Vec<f32>,
}

type SharedStates = Arc<Mutex<Vec<StateSlot>>>;

struct MockState {
    states: SharedStates,
    index: usize,
}

struct ProfileRecord {
    status: i32,
    real_time_us: i64,
    cpu_time_us: i64,
    node_name: String,
    exec_type: String,
    node_type: String,
}

#[derive(Default)]
struct Bindings {
    inputs: Vec<Option<SharedBuf>>,
    outputs: Vec<Option<SharedBuf>>,
    profile: Vec<ProfileRecord>,
}

#[derive(Default)]
struct RunSlot {
    running: bool,
    outcome: Option<MockResult<()>>,
}

struct RequestCore {
    graph: Arc<Graph>,
    profiling: bool,
    io: Mutex<Bindings>,
    states: SharedStates,
    run: Mutex<RunSlot>,
    done: Condvar,
    cancel: AtomicBool,
    callback: Mutex<Option<(OpenVINOCallback, usize)>>,
}

struct MockRequest {
    core: Arc<RequestCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RequestCore {
    fn new(graph: Arc<Graph>, profiling: bool) -> Self {
        let states = graph
            .states
            .iter()
            .map(|s| StateSlot {
                name: s.name.clone(),
                shape: s.shape.clone(),
                values: vec![0.0; shape_elements(&s.shape).unwrap_or(0)],
            })
            .collect();
        let io = Bindings {
            inputs: vec![None; graph.inputs.len()],
            outputs: vec![None; graph.outputs.len()],
            profile: Vec::new(),
        };
        Self {
            graph,
            profiling,
            io: Mutex::new(io),
            states: Arc::new(Mutex::new(states)),
            run: Mutex::new(RunSlot::default()),
            done: Condvar::new(),
            cancel: AtomicBool::new(false),
            callback: Mutex::new(None),
        }
    }

    fn resolve(
        slots: &mut [Option<SharedBuf>],
        ports: &[PortDecl],
        i: usize,
    ) -> MockResult<SharedBuf> {
        if let Some(buf) = &slots[i] {
            return Ok(buf.clone());
        }
        let port = &ports[i];
        let shape = port.static_shape().ok_or_else(|| {
            Fault::general(format!(
                "port '{}' has a dynamic shape and no tensor bound",
                port.name
            ))
        })?;
        let buf = Arc::new(Mutex::new(TensorBuf::zeros(port.element_type, shape)?));
        slots[i] = Some(buf.clone());
        Ok(buf)
    }

    /// One forward pass. Cancellation is honoured between compute slices,
    /// before any output or state is touched.
    fn execute(&self) -> MockResult<()> {
        let started = Instant::now();

        let (signal, batch, input0_shape) = {
            let mut io = lock(&self.io);
            let mut sum = 0.0;
            let mut count = 0usize;
            let mut input0_shape = Vec::new();
            for i in 0..self.graph.inputs.len() {
                let port = &self.graph.inputs[i];
                let bound = io.inputs[i].clone();
                let buf = match bound {
                    Some(buf) => buf,
                    None if port.element_count().is_some() => {
                        Self::resolve(&mut io.inputs, &self.graph.inputs, i)?
                    }
                    None => {
                        return Err(Fault::general(format!(
                            "input '{}' has a dynamic shape and no tensor bound",
                            port.name
                        )))
                    }
                };
                let buf = lock(&buf);
                let values = buf.values();
                if values.iter().any(|v| v.is_nan()) {
                    return Err(Fault::general(format!(
                        "numerical fault: NaN in input '{}'",
                        port.name
                    )));
                }
                if i == 0 {
                    input0_shape = buf.shape.clone();
                }
                sum += values.iter().sum::<f64>();
                count += values.len();
            }
            let signal = if count == 0 { 0.0 } else { sum / count as f64 };
            let batch = input0_shape.first().copied().unwrap_or(1);
            (signal, batch, input0_shape)
        };

        let deadline = started + Duration::from_millis(self.graph.latency_ms);
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(Fault::new(status::CANCELLED, "inference cancelled"));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }

        let state_mean = {
            let mut states = lock(&self.states);
            let mut total = 0.0f64;
            let mut n = 0usize;
            for slot in states.iter_mut() {
                for v in slot.values.iter_mut() {
                    *v += signal as f32;
                    total += *v as f64;
                    n += 1;
                }
            }
            if n == 0 {
                0.0
            } else {
                total / n as f64
            }
        };

        let mut io = lock(&self.io);
        for (j, port) in self.graph.outputs.iter().enumerate() {
            let shape: Vec<usize> = port
                .shape
                .iter()
                .enumerate()
                .map(|(axis, &d)| match usize::try_from(d) {
                    Ok(d) => d,
                    Err(_) if axis == 0 => batch,
                    Err(_) => input0_shape.get(axis).copied().unwrap_or(1),
                })
                .collect();
            let reuse = io.outputs[j]
                .as_ref()
                .filter(|buf| lock(buf).element_type == port.element_type)
                .cloned();
            let buf = match reuse {
                Some(buf) => buf,
                None => {
                    let buf = Arc::new(Mutex::new(TensorBuf::zeros(port.element_type, shape.clone())?));
                    io.outputs[j] = Some(buf.clone());
                    buf
                }
            };
            let mut out = lock(&buf);
            if out.shape != shape {
                *out = TensorBuf::zeros(port.element_type, shape)?;
            }
            for i in 0..out.element_count() {
                let k = i + j * 1009;
                let v = signal * weight(k) + bias(k) + 0.1 * state_mean;
                let et = out.element_type;
                store(et, &mut out.data, i, v);
            }
        }

        if self.profiling {
            io.profile = self.profile(started.elapsed());
        }
        Ok(())
    }

    fn profile(&self, elapsed: Duration) -> Vec<ProfileRecord> {
        let us = elapsed.as_micros() as i64;
        let mut records: Vec<ProfileRecord> = self
            .graph
            .inputs
            .iter()
            .map(|p| ProfileRecord {
                status: 0,
                real_time_us: 0,
                cpu_time_us: 0,
                node_name: p.name.clone(),
                exec_type: format!("unknown_{}", p.element_type),
                node_type: "Parameter".to_string(),
            })
            .collect();
        records.push(ProfileRecord {
            status: 2,
            real_time_us: us,
            cpu_time_us: us,
            node_name: "forward".to_string(),
            exec_type: "ref_any".to_string(),
            node_type: "FullyConnected".to_string(),
        });
        records.push(ProfileRecord {
            status: 1,
            real_time_us: 0,
            cpu_time_us: 0,
            node_name: "forward/bias".to_string(),
            exec_type: "undef".to_string(),
            node_type: "Add".to_string(),
        });
        records.extend(self.graph.outputs.iter().map(|p| ProfileRecord {
            status: 0,
            real_time_us: 0,
            cpu_time_us: 0,
            node_name: p.name.clone(),
            exec_type: format!("unknown_{}", p.element_type),
            node_type: "Result".to_string(),
        }));
        records
    }
}

fn weight(k: usize) -> f64 {
    (k.wrapping_mul(2_654_435_761) % 1000) as f64 / 1000.0 - 0.5
}

fn bias(k: usize) -> f64 {
    (k.wrapping_mul(40_503) % 997) as f64 / 99_700.0
}

fn validate_property(key: &str, value: &str) -> MockResult<()> {
    let ok = match key {
        "PERFORMANCE_HINT" => matches!(value, "LATENCY" | "THROUGHPUT" | "CUMULATIVE_THROUGHPUT"),
        "NUM_STREAMS" => matches!(value, "AUTO" | "NUMA") || value.parse::<u32>().is_ok(),
        "INFERENCE_NUM_THREADS" => value.parse::<u32>().is_ok(),
        "PERF_COUNT" => matches!(value, "YES" | "NO"),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(Fault::mismatch(format!(
            "invalid value '{}' for property {}",
            value, key
        )))
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

pub unsafe fn openvino_error_free(error: *mut OpenVINOError) {
    if let Some(slot) = error.as_mut() {
        free_c_string(slot.message);
        slot.message = ptr::null_mut();
        slot.code = status::OK;
    }
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

pub unsafe fn openvino_core_create(_error: *mut OpenVINOError) -> OpenVINOCore {
    into_handle(MockCore)
}

pub unsafe fn openvino_core_destroy(core: OpenVINOCore) {
    destroy_handle::<MockCore>(core);
}

pub unsafe fn openvino_core_get_available_devices(
    core: OpenVINOCore,
    count: *mut i32,
    error: *mut OpenVINOError,
) -> *mut *mut c_char {
    let result = handle::<MockCore>(core, "core").map(|_| {
        let names = DEVICES.iter().map(|d| into_c_string(d)).collect();
        into_raw_list(names, count)
    });
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_core_free_device_list(devices: *mut *mut c_char, count: i32) {
    if let Some(list) = from_raw_list(devices, count) {
        for &name in list.iter() {
            free_c_string(name);
        }
    }
}

pub unsafe fn openvino_core_read_model(
    core: OpenVINOCore,
    model_path: *const c_char,
    error: *mut OpenVINOError,
) -> OpenVINOModel {
    let result = (|| -> MockResult<_> {
        handle::<MockCore>(core, "core")?;
        let path = c_str(model_path, "model path")?;
        let graph = Graph::load(path)?;
        Ok(into_handle(MockModel {
            graph: Arc::new(graph),
        }))
    })();
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_core_compile_model(
    core: OpenVINOCore,
    model: OpenVINOModel,
    device: *const c_char,
    keys: *const *const c_char,
    values: *const *const c_char,
    property_count: i32,
    error: *mut OpenVINOError,
) -> OpenVINOCompiledModel {
    let result = (|| -> MockResult<_> {
        handle::<MockCore>(core, "core")?;
        let model = handle::<MockModel>(model, "model")?;
        let device = c_str(device, "device")?;
        if !matches!(device, "CPU" | "AUTO") {
            return Err(Fault::new(
                status::NOT_FOUND,
                format!("device '{}' is not available", device),
            ));
        }
        let mut profiling = false;
        for i in 0..property_count.max(0) as usize {
            let key = c_str(*keys.add(i), "property key")?;
            let value = c_str(*values.add(i), "property value")?;
            validate_property(key, value)?;
            if key == "PERF_COUNT" {
                profiling = value == "YES";
            }
        }
        Ok(into_handle(MockCompiled {
            graph: model.graph.clone(),
            profiling,
        }))
    })();
    finish(error, result, ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

pub unsafe fn openvino_model_destroy(model: OpenVINOModel) {
    destroy_handle::<MockModel>(model);
}

fn port_infos(ports: &[PortDecl], count: *mut i32) -> *mut OpenVINOPortInfo {
    let infos = ports
        .iter()
        .map(|p| {
            let dims: Vec<i32> = p.shape.iter().map(|&d| d as i32).collect();
            let mut shape_size = 0;
            let shape = into_raw_list(dims, &mut shape_size);
            OpenVINOPortInfo {
                name: into_c_string(&p.name),
                shape,
                shape_size,
                data_type: p.element_type.code(),
            }
        })
        .collect();
    into_raw_list(infos, count)
}

pub unsafe fn openvino_model_get_inputs(
    model: OpenVINOModel,
    count: *mut i32,
    error: *mut OpenVINOError,
) -> *mut OpenVINOPortInfo {
    let result = handle::<MockModel>(model, "model").map(|m| port_infos(&m.graph.inputs, count));
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_model_get_outputs(
    model: OpenVINOModel,
    count: *mut i32,
    error: *mut OpenVINOError,
) -> *mut OpenVINOPortInfo {
    let result = handle::<MockModel>(model, "model").map(|m| port_infos(&m.graph.outputs, count));
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_model_free_port_info(ports: *mut OpenVINOPortInfo, count: i32) {
    if let Some(list) = from_raw_list(ports, count) {
        for port in list.iter() {
            free_c_string(port.name);
            drop(from_raw_list(port.shape, port.shape_size));
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled model
// ---------------------------------------------------------------------------

pub unsafe fn openvino_compiled_model_destroy(compiled: OpenVINOCompiledModel) {
    destroy_handle::<MockCompiled>(compiled);
}

pub unsafe fn openvino_compiled_model_create_infer_request(
    compiled: OpenVINOCompiledModel,
    error: *mut OpenVINOError,
) -> OpenVINOInferRequest {
    let result = handle::<MockCompiled>(compiled, "compiled model").map(|c| {
        into_handle(MockRequest {
            core: Arc::new(RequestCore::new(c.graph.clone(), c.profiling)),
            worker: Mutex::new(None),
        })
    });
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_compiled_model_release_memory(
    compiled: OpenVINOCompiledModel,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockCompiled>(compiled, "compiled model").map(|_| ());
    finish_status(error, result)
}

// ---------------------------------------------------------------------------
// Infer request
// ---------------------------------------------------------------------------

pub unsafe fn openvino_infer_request_destroy(request: OpenVINOInferRequest) {
    if request.is_null() {
        return;
    }
    let req = Box::from_raw(request as *mut MockRequest);
    let worker = lock(&req.worker).take();
    if let Some(worker) = worker {
        let _ = worker.join();
    }
}

unsafe fn bind_input(
    request: OpenVINOInferRequest,
    port: impl FnOnce(&Graph) -> MockResult<usize>,
    data: *const c_void,
    shape: *const i32,
    shape_size: i32,
    data_type: i32,
) -> MockResult<()> {
    let req = handle::<MockRequest>(request, "infer request")?;
    let core = &req.core;
    let index = port(core.graph.as_ref())?;
    let et = element_type(data_type)?;
    let shape = read_shape(shape, shape_size)?;
    core.graph.inputs[index].accepts(et, &shape)?;
    let mut buf = TensorBuf::zeros(et, shape)?;
    if !buf.data.is_empty() {
        if data.is_null() {
            return Err(Fault::mismatch("null input data"));
        }
        let src = std::slice::from_raw_parts(data as *const u8, buf.data.len());
        buf.data.copy_from_slice(src);
    }
    lock(&core.io).inputs[index] = Some(Arc::new(Mutex::new(buf)));
    Ok(())
}

pub unsafe fn openvino_infer_request_set_input_tensor(
    request: OpenVINOInferRequest,
    name: *const c_char,
    data: *const c_void,
    shape: *const i32,
    shape_size: i32,
    data_type: i32,
    error: *mut OpenVINOError,
) -> i32 {
    let port = |g: &Graph| Graph::port(&g.inputs, c_str(name, "port name")?, "input");
    let result = bind_input(request, port, data, shape, shape_size, data_type);
    finish_status(error, result)
}

pub unsafe fn openvino_infer_request_set_input_tensor_by_index(
    request: OpenVINOInferRequest,
    index: i32,
    data: *const c_void,
    shape: *const i32,
    shape_size: i32,
    data_type: i32,
    error: *mut OpenVINOError,
) -> i32 {
    let port = |g: &Graph| Graph::index(&g.inputs, index, "input");
    let result = bind_input(request, port, data, shape, shape_size, data_type);
    finish_status(error, result)
}

unsafe fn bind_batch(
    request: OpenVINOInferRequest,
    port: impl FnOnce(&Graph) -> MockResult<usize>,
    tensors: *const OpenVINOTensor,
    count: i32,
) -> MockResult<()> {
    let req = handle::<MockRequest>(request, "infer request")?;
    let core = &req.core;
    let index = port(core.graph.as_ref())?;
    let decl = &core.graph.inputs[index];
    if count <= 0 || tensors.is_null() {
        return Err(Fault::mismatch("empty tensor batch"));
    }
    let count = count as usize;
    match decl.shape.first() {
        Some(&d) if d < 0 || d as usize == count => {}
        _ => {
            return Err(Fault::mismatch(format!(
                "port '{}' {:?} does not declare a batch dimension of {}",
                decl.name, decl.shape, count
            )))
        }
    }

    let mut joined: Option<TensorBuf> = None;
    for &t in std::slice::from_raw_parts(tensors, count) {
        let tensor = handle::<MockTensor>(t, "tensor")?;
        let item = lock(&tensor.buf);
        if item.shape.first() != Some(&1) {
            return Err(Fault::mismatch(format!(
                "batch item shape {:?} must have a leading dimension of 1",
                item.shape
            )));
        }
        if let Some(acc) = joined.as_mut() {
            if acc.element_type != item.element_type || acc.shape[1..] != item.shape[1..] {
                return Err(Fault::mismatch("batch items differ in type or shape"));
            }
            acc.shape[0] += 1;
            acc.data.extend_from_slice(&item.data);
        } else {
            joined = Some(item.clone());
        }
    }
    let joined = joined.ok_or_else(|| Fault::mismatch("empty tensor batch"))?;
    decl.accepts(joined.element_type, &joined.shape)?;
    lock(&core.io).inputs[index] = Some(Arc::new(Mutex::new(joined)));
    Ok(())
}

pub unsafe fn openvino_infer_request_set_input_tensors(
    request: OpenVINOInferRequest,
    name: *const c_char,
    tensors: *const OpenVINOTensor,
    count: i32,
    error: *mut OpenVINOError,
) -> i32 {
    let port = |g: &Graph| Graph::port(&g.inputs, c_str(name, "port name")?, "input");
    finish_status(error, bind_batch(request, port, tensors, count))
}

pub unsafe fn openvino_infer_request_set_input_tensors_by_index(
    request: OpenVINOInferRequest,
    index: i32,
    tensors: *const OpenVINOTensor,
    count: i32,
    error: *mut OpenVINOError,
) -> i32 {
    let port = |g: &Graph| Graph::index(&g.inputs, index, "input");
    finish_status(error, bind_batch(request, port, tensors, count))
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

unsafe fn share_tensor(
    request: OpenVINOInferRequest,
    port: impl FnOnce(&Graph) -> MockResult<(Direction, usize)>,
    tensor: OpenVINOTensor,
) -> MockResult<()> {
    let req = handle::<MockRequest>(request, "infer request")?;
    let tensor = handle::<MockTensor>(tensor, "tensor")?;
    let core = &req.core;
    let (direction, index) = port(core.graph.as_ref())?;
    {
        let buf = lock(&tensor.buf);
        let decl = match direction {
            Direction::Input => &core.graph.inputs[index],
            Direction::Output => &core.graph.outputs[index],
        };
        decl.accepts(buf.element_type, &buf.shape)?;
    }
    let mut io = lock(&core.io);
    let slots = match direction {
        Direction::Input => &mut io.inputs,
        Direction::Output => &mut io.outputs,
    };
    slots[index] = Some(tensor.buf.clone());
    Ok(())
}

unsafe fn fetch_tensor(
    request: OpenVINOInferRequest,
    port: impl FnOnce(&Graph) -> MockResult<(Direction, usize)>,
) -> MockResult<OpenVINOTensor> {
    let req = handle::<MockRequest>(request, "infer request")?;
    let core = &req.core;
    let (direction, index) = port(core.graph.as_ref())?;
    let mut io = lock(&core.io);
    let buf = match direction {
        Direction::Input => RequestCore::resolve(&mut io.inputs, &core.graph.inputs, index)?,
        Direction::Output => RequestCore::resolve(&mut io.outputs, &core.graph.outputs, index)?,
    };
    Ok(into_handle(MockTensor { buf }))
}

unsafe fn any_port(g: &Graph, name: *const c_char) -> MockResult<(Direction, usize)> {
    let name = c_str(name, "port name")?;
    Graph::port(&g.inputs, name, "input")
        .map(|i| (Direction::Input, i))
        .or_else(|_| Graph::port(&g.outputs, name, "output").map(|i| (Direction::Output, i)))
        .map_err(|_| Fault::new(status::NOT_FOUND, format!("port '{}' not found", name)))
}

pub unsafe fn openvino_infer_request_set_output_tensor(
    request: OpenVINOInferRequest,
    name: *const c_char,
    tensor: OpenVINOTensor,
    error: *mut OpenVINOError,
) -> i32 {
    let port = |g: &Graph| {
        Graph::port(&g.outputs, c_str(name, "port name")?, "output").map(|i| (Direction::Output, i))
    };
    finish_status(error, share_tensor(request, port, tensor))
}

pub unsafe fn openvino_infer_request_set_output_tensor_by_index(
    request: OpenVINOInferRequest,
    index: i32,
    tensor: OpenVINOTensor,
    error: *mut OpenVINOError,
) -> i32 {
    let port = |g: &Graph| Graph::index(&g.outputs, index, "output").map(|i| (Direction::Output, i));
    finish_status(error, share_tensor(request, port, tensor))
}

pub unsafe fn openvino_infer_request_get_input_tensor(
    request: OpenVINOInferRequest,
    name: *const c_char,
    error: *mut OpenVINOError,
) -> OpenVINOTensor {
    let port = |g: &Graph| {
        Graph::port(&g.inputs, c_str(name, "port name")?, "input").map(|i| (Direction::Input, i))
    };
    finish(error, fetch_tensor(request, port), ptr::null_mut())
}

pub unsafe fn openvino_infer_request_get_input_tensor_by_index(
    request: OpenVINOInferRequest,
    index: i32,
    error: *mut OpenVINOError,
) -> OpenVINOTensor {
    let port = |g: &Graph| Graph::index(&g.inputs, index, "input").map(|i| (Direction::Input, i));
    finish(error, fetch_tensor(request, port), ptr::null_mut())
}

pub unsafe fn openvino_infer_request_get_output_tensor(
    request: OpenVINOInferRequest,
    name: *const c_char,
    error: *mut OpenVINOError,
) -> OpenVINOTensor {
    let port = |g: &Graph| {
        Graph::port(&g.outputs, c_str(name, "port name")?, "output").map(|i| (Direction::Output, i))
    };
    finish(error, fetch_tensor(request, port), ptr::null_mut())
}

pub unsafe fn openvino_infer_request_get_output_tensor_by_index(
    request: OpenVINOInferRequest,
    index: i32,
    error: *mut OpenVINOError,
) -> OpenVINOTensor {
    let port = |g: &Graph| Graph::index(&g.outputs, index, "output").map(|i| (Direction::Output, i));
    finish(error, fetch_tensor(request, port), ptr::null_mut())
}

pub unsafe fn openvino_infer_request_get_tensor(
    request: OpenVINOInferRequest,
    name: *const c_char,
    error: *mut OpenVINOError,
) -> OpenVINOTensor {
    let port = |g: &Graph| any_port(g, name);
    finish(error, fetch_tensor(request, port), ptr::null_mut())
}

pub unsafe fn openvino_infer_request_set_tensor(
    request: OpenVINOInferRequest,
    name: *const c_char,
    tensor: OpenVINOTensor,
    error: *mut OpenVINOError,
) -> i32 {
    let port = |g: &Graph| any_port(g, name);
    finish_status(error, share_tensor(request, port, tensor))
}

pub unsafe fn openvino_infer_request_infer(
    request: OpenVINOInferRequest,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockRequest>(request, "infer request").and_then(|req| {
        if lock(&req.core.run).running {
            return Err(Fault::new(status::BUSY, "infer request is busy"));
        }
        req.core.cancel.store(false, Ordering::SeqCst);
        req.core.execute()
    });
    finish_status(error, result)
}

pub unsafe fn openvino_infer_request_start_async(
    request: OpenVINOInferRequest,
    error: *mut OpenVINOError,
) -> i32 {
    let result = (|| -> MockResult<_> {
        let req = handle::<MockRequest>(request, "infer request")?;
        {
            let mut run = lock(&req.core.run);
            if run.running {
                return Err(Fault::new(status::BUSY, "infer request is busy"));
            }
            run.running = true;
            run.outcome = None;
            req.core.cancel.store(false, Ordering::SeqCst);
        }

        let mut worker = lock(&req.worker);
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let core = req.core.clone();
        let spawned = std::thread::Builder::new()
            .name("ovino-infer".to_string())
            .spawn(move || {
                let outcome = core.execute();
                let callback = *lock(&core.callback);
                if let Some((callback, user_data)) = callback {
                    let (code, message) = match &outcome {
                        Ok(()) => (status::OK, None),
                        Err(fault) => (fault.code, CString::new(fault.message.replace('\0', " ")).ok()),
                    };
                    let message_ptr = message.as_ref().map_or(ptr::null(), |m| m.as_ptr());
                    unsafe { callback(user_data as *mut c_void, code, message_ptr) };
                }
                let mut run = lock(&core.run);
                run.outcome = Some(outcome);
                run.running = false;
                core.done.notify_all();
            });

        match spawned {
            Ok(join) => {
                *worker = Some(join);
                Ok(())
            }
            Err(e) => {
                lock(&req.core.run).running = false;
                Err(Fault::general(format!("cannot start worker: {}", e)))
            }
        }
    })();
    finish_status(error, result)
}

pub unsafe fn openvino_infer_request_wait(
    request: OpenVINOInferRequest,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockRequest>(request, "infer request").and_then(|req| {
        let run = lock(&req.core.run);
        let run = req
            .core
            .done
            .wait_while(run, |r| r.running)
            .unwrap_or_else(PoisonError::into_inner);
        run.outcome.clone().unwrap_or(Ok(()))
    });
    finish_status(error, result)
}

pub unsafe fn openvino_infer_request_wait_for(
    request: OpenVINOInferRequest,
    timeout_ms: i64,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockRequest>(request, "infer request").and_then(|req| {
        let timeout = Duration::from_millis(timeout_ms.max(0) as u64);
        let run = lock(&req.core.run);
        let (run, _) = req
            .core
            .done
            .wait_timeout_while(run, timeout, |r| r.running)
            .unwrap_or_else(PoisonError::into_inner);
        if run.running {
            return Ok(wait_result::TIMED_OUT);
        }
        run.outcome
            .clone()
            .unwrap_or(Ok(()))
            .map(|()| wait_result::COMPLETED)
    });
    finish(error, result, wait_result::FAILED)
}

pub unsafe fn openvino_infer_request_cancel(
    request: OpenVINOInferRequest,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockRequest>(request, "infer request").map(|req| {
        req.core.cancel.store(true, Ordering::SeqCst);
    });
    finish_status(error, result)
}

pub unsafe fn openvino_infer_request_set_callback(
    request: OpenVINOInferRequest,
    callback: OpenVINOCallback,
    user_data: *mut c_void,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockRequest>(request, "infer request").map(|req| {
        *lock(&req.core.callback) = Some((callback, user_data as usize));
    });
    finish_status(error, result)
}

pub unsafe fn openvino_infer_request_query_state(
    request: OpenVINOInferRequest,
    states: *mut *mut OpenVINOVariableState,
    count: *mut i32,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockRequest>(request, "infer request").map(|req| {
        let n = lock(&req.core.states).len();
        let handles = (0..n)
            .map(|index| {
                into_handle(MockState {
                    states: req.core.states.clone(),
                    index,
                })
            })
            .collect();
        let list = into_raw_list(handles, count);
        if let Some(out) = states.as_mut() {
            *out = list;
        }
    });
    finish_status(error, result)
}

pub unsafe fn openvino_infer_request_reset_state(
    request: OpenVINOInferRequest,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockRequest>(request, "infer request").map(|req| {
        for slot in lock(&req.core.states).iter_mut() {
            slot.values.iter_mut().for_each(|v| *v = 0.0);
        }
    });
    finish_status(error, result)
}

pub unsafe fn openvino_infer_request_get_profiling_info(
    request: OpenVINOInferRequest,
    count: *mut i32,
    error: *mut OpenVINOError,
) -> *mut OpenVINOProfilingInfo {
    let result = handle::<MockRequest>(request, "infer request").map(|req| {
        let io = lock(&req.core.io);
        let infos = io
            .profile
            .iter()
            .map(|r| OpenVINOProfilingInfo {
                status: r.status,
                real_time_us: r.real_time_us,
                cpu_time_us: r.cpu_time_us,
                node_name: into_c_string(&r.node_name),
                exec_type: into_c_string(&r.exec_type),
                node_type: into_c_string(&r.node_type),
            })
            .collect();
        into_raw_list(infos, count)
    });
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_profiling_info_free(infos: *mut OpenVINOProfilingInfo, count: i32) {
    if let Some(list) = from_raw_list(infos, count) {
        for info in list.iter() {
            free_c_string(info.node_name);
            free_c_string(info.exec_type);
            free_c_string(info.node_type);
        }
    }
}

// ---------------------------------------------------------------------------
// Tensor
// ---------------------------------------------------------------------------

pub unsafe fn openvino_tensor_new(
    data_type: i32,
    shape: *const i32,
    shape_size: i32,
    error: *mut OpenVINOError,
) -> OpenVINOTensor {
    openvino_tensor_new_with_data(data_type, shape, shape_size, ptr::null(), error)
}

pub unsafe fn openvino_tensor_new_with_data(
    data_type: i32,
    shape: *const i32,
    shape_size: i32,
    data: *const c_void,
    error: *mut OpenVINOError,
) -> OpenVINOTensor {
    let result = (|| -> MockResult<_> {
        let et = element_type(data_type)?;
        let shape = read_shape(shape, shape_size)?;
        let mut buf = TensorBuf::zeros(et, shape)?;
        if !data.is_null() && !buf.data.is_empty() {
            let src = std::slice::from_raw_parts(data as *const u8, buf.data.len());
            buf.data.copy_from_slice(src);
        }
        Ok(into_handle(MockTensor {
            buf: Arc::new(Mutex::new(buf)),
        }))
    })();
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_tensor_destroy(tensor: OpenVINOTensor) {
    destroy_handle::<MockTensor>(tensor);
}

pub unsafe fn openvino_tensor_get_shape(
    tensor: OpenVINOTensor,
    shape_size: *mut i32,
    error: *mut OpenVINOError,
) -> *mut i32 {
    let result = handle::<MockTensor>(tensor, "tensor").map(|t| {
        let dims = lock(&t.buf).shape.iter().map(|&d| d as i32).collect();
        into_raw_list(dims, shape_size)
    });
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_tensor_free_shape(shape: *mut i32, shape_size: i32) {
    drop(from_raw_list(shape, shape_size));
}

pub unsafe fn openvino_tensor_set_shape(
    tensor: OpenVINOTensor,
    shape: *const i32,
    shape_size: i32,
    error: *mut OpenVINOError,
) -> i32 {
    let result = (|| -> MockResult<_> {
        let t = handle::<MockTensor>(tensor, "tensor")?;
        let shape = read_shape(shape, shape_size)?;
        let mut buf = lock(&t.buf);
        let current = buf.element_count();
        let requested = shape_elements(&shape)?;
        if requested != current {
            return Err(Fault::mismatch(format!(
                "cannot reshape {:?} ({} elements) to {:?} ({} elements)",
                buf.shape, current, shape, requested
            )));
        }
        buf.shape = shape;
        Ok(())
    })();
    finish_status(error, result)
}

pub unsafe fn openvino_tensor_get_size(tensor: OpenVINOTensor, error: *mut OpenVINOError) -> i64 {
    let result = handle::<MockTensor>(tensor, "tensor").map(|t| lock(&t.buf).element_count() as i64);
    finish(error, result, -1)
}

pub unsafe fn openvino_tensor_get_byte_size(
    tensor: OpenVINOTensor,
    error: *mut OpenVINOError,
) -> i64 {
    let result = handle::<MockTensor>(tensor, "tensor").map(|t| lock(&t.buf).data.len() as i64);
    finish(error, result, -1)
}

pub unsafe fn openvino_tensor_get_element_type(
    tensor: OpenVINOTensor,
    error: *mut OpenVINOError,
) -> i32 {
    let result = handle::<MockTensor>(tensor, "tensor").map(|t| lock(&t.buf).element_type.code());
    finish(error, result, -1)
}

pub unsafe fn openvino_tensor_read_data(
    tensor: OpenVINOTensor,
    dst: *mut c_void,
    capacity: i64,
    error: *mut OpenVINOError,
) -> i64 {
    let result = (|| -> MockResult<_> {
        let t = handle::<MockTensor>(tensor, "tensor")?;
        let buf = lock(&t.buf);
        let len = buf.data.len();
        if (capacity.max(0) as usize) < len {
            return Err(Fault::new(
                status::OUT_OF_BOUNDS,
                format!("destination holds {} bytes, tensor has {}", capacity, len),
            ));
        }
        if len > 0 {
            if dst.is_null() {
                return Err(Fault::general("null destination"));
            }
            ptr::copy_nonoverlapping(buf.data.as_ptr(), dst as *mut u8, len);
        }
        Ok(len as i64)
    })();
    finish(error, result, -1)
}

// ---------------------------------------------------------------------------
// Variable state
// ---------------------------------------------------------------------------

pub unsafe fn openvino_variable_state_destroy(state: OpenVINOVariableState) {
    destroy_handle::<MockState>(state);
}

pub unsafe fn openvino_variable_state_free_list(states: *mut OpenVINOVariableState, count: i32) {
    drop(from_raw_list(states, count));
}

fn state_slot<'a>(
    states: &'a mut MutexGuard<'_, Vec<StateSlot>>,
    index: usize,
) -> MockResult<&'a mut StateSlot> {
    states
        .get_mut(index)
        .ok_or_else(|| Fault::new(status::OUT_OF_BOUNDS, "variable state no longer exists"))
}

pub unsafe fn openvino_variable_state_get_name(
    state: OpenVINOVariableState,
    error: *mut OpenVINOError,
) -> *mut c_char {
    let result = (|| -> MockResult<_> {
        let s = handle::<MockState>(state, "variable state")?;
        let mut states = lock(&s.states);
        Ok(into_c_string(&state_slot(&mut states, s.index)?.name))
    })();
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_variable_state_free_name(name: *mut c_char) {
    free_c_string(name);
}

pub unsafe fn openvino_variable_state_get_state(
    state: OpenVINOVariableState,
    error: *mut OpenVINOError,
) -> OpenVINOTensor {
    let result = (|| -> MockResult<_> {
        let s = handle::<MockState>(state, "variable state")?;
        let mut states = lock(&s.states);
        let slot = state_slot(&mut states, s.index)?;
        let mut buf = TensorBuf::zeros(ElementType::F32, slot.shape.clone())?;
        for (i, &v) in slot.values.iter().enumerate() {
            store(ElementType::F32, &mut buf.data, i, v as f64);
        }
        Ok(into_handle(MockTensor {
            buf: Arc::new(Mutex::new(buf)),
        }))
    })();
    finish(error, result, ptr::null_mut())
}

pub unsafe fn openvino_variable_state_set_state(
    state: OpenVINOVariableState,
    tensor: OpenVINOTensor,
    error: *mut OpenVINOError,
) -> i32 {
    let result = (|| -> MockResult<_> {
        let s = handle::<MockState>(state, "variable state")?;
        let t = handle::<MockTensor>(tensor, "tensor")?;
        let values = lock(&t.buf).values();
        let mut states = lock(&s.states);
        let slot = state_slot(&mut states, s.index)?;
        if values.len() != slot.values.len() {
            return Err(Fault::mismatch(format!(
                "state '{}' holds {} elements, tensor has {}",
                slot.name,
                slot.values.len(),
                values.len()
            )));
        }
        for (dst, v) in slot.values.iter_mut().zip(values) {
            *dst = v as f32;
        }
        Ok(())
    })();
    finish_status(error, result)
}

pub unsafe fn openvino_variable_state_reset(
    state: OpenVINOVariableState,
    error: *mut OpenVINOError,
) -> i32 {
    let result = (|| -> MockResult<_> {
        let s = handle::<MockState>(state, "variable state")?;
        let mut states = lock(&s.states);
        state_slot(&mut states, s.index)?
            .values
            .iter_mut()
            .for_each(|v| *v = 0.0);
        Ok(())
    })();
    finish_status(error, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f16_conversion() {
        for v in [0.0f32, 1.0, -2.5, 0.5, 65504.0, 6.103_515_6e-5] {
            assert_eq!(f16_to_f32(f32_to_f16(v)), v);
        }
        assert_eq!(f32_to_f16(1.0), 0x3c00);
        assert!(f16_to_f32(f32_to_f16(f32::INFINITY)).is_infinite());
    }

    #[test]
    fn test_store_load() {
        let mut data = vec![0u8; 8 * 3];
        store(ElementType::I64, &mut data, 1, 41.6);
        assert_eq!(load(ElementType::I64, &data, 1), 42.0);
        store(ElementType::BF16, &mut data, 0, 1.5);
        assert_eq!(load(ElementType::BF16, &data, 0), 1.5);
    }

    #[test]
    fn test_property_validation() {
        assert!(validate_property("PERFORMANCE_HINT", "THROUGHPUT").is_ok());
        assert!(validate_property("PERFORMANCE_HINT", "FAST").is_err());
        assert!(validate_property("NUM_STREAMS", "AUTO").is_ok());
        assert!(validate_property("NUM_STREAMS", "four").is_err());
        assert!(validate_property("INFERENCE_NUM_THREADS", "-1").is_err());
        assert!(validate_property("CACHE_DIR", "/tmp/anything").is_ok());
    }

    #[test]
    fn test_overflowing_shapes_rejected() {
        let fault = shape_elements(&[1 << 32, 1 << 32]).unwrap_err();
        assert_eq!(fault.code, status::PARAMETER_MISMATCH);
        let fault = TensorBuf::zeros(ElementType::F32, vec![usize::MAX / 2]).unwrap_err();
        assert_eq!(fault.code, status::PARAMETER_MISMATCH);
        assert_eq!(shape_elements(&[0, usize::MAX, usize::MAX]).unwrap(), 0);

        let buf = TensorBuf::zeros(ElementType::I64, vec![2, 3]).unwrap();
        assert_eq!(buf.element_count(), 6);
        assert_eq!(buf.data.len(), 48);
    }

    #[test]
    fn test_port_accepts() {
        let port = PortDecl {
            name: "input".to_string(),
            shape: vec![-1, 4],
            element_type: ElementType::F32,
        };
        assert!(port.accepts(ElementType::F32, &[3, 4]).is_ok());
        assert!(port.accepts(ElementType::F32, &[3, 5]).is_err());
        assert!(port.accepts(ElementType::I64, &[3, 4]).is_err());
        assert!(port.accepts(ElementType::F32, &[4]).is_err());
    }
}
