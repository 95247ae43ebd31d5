//! Compile-time configuration
//!
//! Options are composable builders that each write one key into a
//! [`Properties`] map. The map travels to the native compile call as-is; the
//! runtime is authoritative on validation, including for keys this crate has
//! no builder for.

use std::collections::BTreeMap;
use std::ffi::CString;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::handle::c_string;

/// Property keys understood by the runtime
pub mod keys {
    pub const PERFORMANCE_HINT: &str = "PERFORMANCE_HINT";
    pub const NUM_STREAMS: &str = "NUM_STREAMS";
    pub const INFERENCE_NUM_THREADS: &str = "INFERENCE_NUM_THREADS";
    pub const PERF_COUNT: &str = "PERF_COUNT";
}

/// High-level performance target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceMode {
    Latency,
    Throughput,
    CumulativeThroughput,
}

impl PerformanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceMode::Latency => "LATENCY",
            PerformanceMode::Throughput => "THROUGHPUT",
            PerformanceMode::CumulativeThroughput => "CUMULATIVE_THROUGHPUT",
        }
    }
}

/// One compile-time setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOption {
    PerformanceHint(PerformanceMode),
    NumStreams(u32),
    InferenceNumThreads(u32),
    EnableProfiling(bool),
    /// Pass-through key/value
    Property { key: String, value: String },
}

impl CompileOption {
    /// Write this option's key into `properties`, leaving every other key alone.
    pub fn apply(&self, properties: &mut Properties) {
        let (key, value) = match self {
            CompileOption::PerformanceHint(mode) => (keys::PERFORMANCE_HINT, mode.as_str().to_string()),
            CompileOption::NumStreams(n) => (keys::NUM_STREAMS, n.to_string()),
            CompileOption::InferenceNumThreads(n) => (keys::INFERENCE_NUM_THREADS, n.to_string()),
            CompileOption::EnableProfiling(on) => {
                (keys::PERF_COUNT, if *on { "YES" } else { "NO" }.to_string())
            }
            CompileOption::Property { key, value } => (key.as_str(), value.clone()),
        };
        properties.insert(key, value);
    }
}

pub fn performance_hint(mode: PerformanceMode) -> CompileOption {
    CompileOption::PerformanceHint(mode)
}

pub fn num_streams(n: u32) -> CompileOption {
    CompileOption::NumStreams(n)
}

pub fn inference_num_threads(n: u32) -> CompileOption {
    CompileOption::InferenceNumThreads(n)
}

/// Per-node profiling counters (`PERF_COUNT`)
pub fn enable_profiling(on: bool) -> CompileOption {
    CompileOption::EnableProfiling(on)
}

pub fn property(key: impl Into<String>, value: impl Into<String>) -> CompileOption {
    CompileOption::Property {
        key: key.into(),
        value: value.into(),
    }
}

/// Native compile property map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = CompileOption>,
    {
        let mut properties = Self::new();
        for option in options {
            option.apply(&mut properties);
        }
        properties
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parallel key/value arrays for the native compile call
    pub(crate) fn to_native(&self) -> Result<(Vec<CString>, Vec<CString>)> {
        let mut keys = Vec::with_capacity(self.0.len());
        let mut values = Vec::with_capacity(self.0.len());
        for (k, v) in &self.0 {
            keys.push(c_string(k)?);
            values.push(c_string(v)?);
        }
        Ok((keys, values))
    }
}

/// Serializable compile configuration, as found in config files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Target device (e.g. "CPU", "GPU", "AUTO")
    pub device: String,
    pub performance_hint: Option<PerformanceMode>,
    pub num_streams: Option<u32>,
    pub inference_num_threads: Option<u32>,
    pub enable_profiling: bool,
    /// Extra pass-through properties
    pub properties: BTreeMap<String, String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
            performance_hint: None,
            num_streams: None,
            inference_num_threads: None,
            enable_profiling: false,
            properties: BTreeMap::new(),
        }
    }
}

impl CompileConfig {
    /// Single-request, lowest-latency setup
    pub fn latency() -> Self {
        Self {
            performance_hint: Some(PerformanceMode::Latency),
            ..Default::default()
        }
    }

    /// Multi-stream throughput setup
    pub fn throughput(streams: u32) -> Self {
        Self {
            performance_hint: Some(PerformanceMode::Throughput),
            num_streams: Some(streams),
            ..Default::default()
        }
    }

    /// Option list equivalent to this configuration. Free-form properties are
    /// applied first so the typed fields win on conflicting keys.
    pub fn options(&self) -> Vec<CompileOption> {
        let mut options: Vec<CompileOption> = self
            .properties
            .iter()
            .map(|(k, v)| property(k.clone(), v.clone()))
            .collect();
        if let Some(mode) = self.performance_hint {
            options.push(performance_hint(mode));
        }
        if let Some(n) = self.num_streams {
            options.push(num_streams(n));
        }
        if let Some(n) = self.inference_num_threads {
            options.push(inference_num_threads(n));
        }
        if self.enable_profiling {
            options.push(enable_profiling(true));
        }
        options
    }

    pub fn to_properties(&self) -> Properties {
        Properties::from_options(self.options())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_composition() {
        let props = Properties::from_options([
            performance_hint(PerformanceMode::Throughput),
            num_streams(4),
            inference_num_threads(8),
        ]);
        assert_eq!(props.len(), 3);
        assert_eq!(props.get("PERFORMANCE_HINT"), Some("THROUGHPUT"));
        assert_eq!(props.get("NUM_STREAMS"), Some("4"));
        assert_eq!(props.get("INFERENCE_NUM_THREADS"), Some("8"));
    }

    #[test]
    fn test_options_touch_only_their_key() {
        let mut props = Properties::new();
        num_streams(2).apply(&mut props);
        assert_eq!(props.len(), 1);
        performance_hint(PerformanceMode::Latency).apply(&mut props);
        assert_eq!(props.get("NUM_STREAMS"), Some("2"));
        num_streams(6).apply(&mut props);
        assert_eq!(props.get("NUM_STREAMS"), Some("6"));
        assert_eq!(props.get("PERFORMANCE_HINT"), Some("LATENCY"));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn test_pass_through_and_profiling() {
        let props = Properties::from_options([
            property("CACHE_DIR", "/var/cache/ov"),
            enable_profiling(true),
            performance_hint(PerformanceMode::CumulativeThroughput),
        ]);
        assert_eq!(props.get("CACHE_DIR"), Some("/var/cache/ov"));
        assert_eq!(props.get("PERF_COUNT"), Some("YES"));
        assert_eq!(props.get("PERFORMANCE_HINT"), Some("CUMULATIVE_THROUGHPUT"));

        let (keys, values) = props.to_native().unwrap();
        assert_eq!(keys.len(), values.len());

        let bad = Properties::from_options([property("BAD\0KEY", "x")]);
        assert!(bad.to_native().is_err());
    }

    #[test]
    fn test_compile_config() {
        let config: CompileConfig = serde_json::from_str(
            r#"{ "device": "AUTO", "performance_hint": "THROUGHPUT", "num_streams": 2,
                 "properties": { "NUM_STREAMS": "8", "CACHE_DIR": "/tmp/ov" } }"#,
        )
        .unwrap();
        assert_eq!(config.device, "AUTO");
        let props = config.to_properties();
        assert_eq!(props.get("PERFORMANCE_HINT"), Some("THROUGHPUT"));
        assert_eq!(props.get("NUM_STREAMS"), Some("2"));
        assert_eq!(props.get("CACHE_DIR"), Some("/tmp/ov"));
        assert_eq!(props.get("PERF_COUNT"), None);

        assert_eq!(CompileConfig::throughput(4).to_properties().get("NUM_STREAMS"), Some("4"));
        assert_eq!(CompileConfig::default().device, "CPU");
    }
}
