//! Per-node execution counters

use std::ffi::CStr;
use std::time::Duration;

use libc::c_char;
use serde::{Deserialize, Serialize};

use crate::ffi::OpenVINOProfilingInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfilingStatus {
    NotRun,
    OptimizedOut,
    Executed,
}

impl ProfilingStatus {
    fn from_code(code: i32) -> Self {
        match code {
            1 => ProfilingStatus::OptimizedOut,
            2 => ProfilingStatus::Executed,
            _ => ProfilingStatus::NotRun,
        }
    }
}

/// One graph node's counters from the last run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingInfo {
    pub status: ProfilingStatus,
    pub real_time: Duration,
    pub cpu_time: Duration,
    pub node_name: String,
    /// Kernel the runtime picked for the node
    pub exec_type: String,
    pub node_type: String,
}

unsafe fn owned(s: *const c_char) -> String {
    if s.is_null() {
        String::new()
    } else {
        CStr::from_ptr(s).to_string_lossy().into_owned()
    }
}

fn micros(us: i64) -> Duration {
    Duration::from_micros(u64::try_from(us).unwrap_or(0))
}

impl ProfilingInfo {
    pub(crate) unsafe fn from_native(raw: &OpenVINOProfilingInfo) -> Self {
        Self {
            status: ProfilingStatus::from_code(raw.status),
            real_time: micros(raw.real_time_us),
            cpu_time: micros(raw.cpu_time_us),
            node_name: owned(raw.node_name),
            exec_type: owned(raw.exec_type),
            node_type: owned(raw.node_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_from_native() {
        let name = CString::new("conv1").unwrap();
        let exec = CString::new("jit_avx2_FP32").unwrap();
        let raw = OpenVINOProfilingInfo {
            status: 2,
            real_time_us: 1_250,
            cpu_time_us: -1,
            node_name: name.as_ptr() as *mut c_char,
            exec_type: exec.as_ptr() as *mut c_char,
            node_type: std::ptr::null_mut(),
        };
        let info = unsafe { ProfilingInfo::from_native(&raw) };
        assert_eq!(info.status, ProfilingStatus::Executed);
        assert_eq!(info.real_time, Duration::from_micros(1_250));
        assert_eq!(info.cpu_time, Duration::ZERO);
        assert_eq!(info.node_name, "conv1");
        assert_eq!(info.exec_type, "jit_avx2_FP32");
        assert_eq!(info.node_type, "");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ProfilingStatus::from_code(0), ProfilingStatus::NotRun);
        assert_eq!(ProfilingStatus::from_code(1), ProfilingStatus::OptimizedOut);
        assert_eq!(ProfilingStatus::from_code(7), ProfilingStatus::NotRun);
    }
}
