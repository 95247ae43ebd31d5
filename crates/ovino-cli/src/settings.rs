//! CLI settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file (`ovino.toml` in the working directory, or `--config <path>`),
//! then `OVINO__*` environment variables such as
//! `OVINO__COMPILE__NUM_STREAMS=4`.

use std::path::{Path, PathBuf};

use clap::Parser;
use config::{Config, Environment, File};
use ovino_core::{CompileConfig, DynamicDimPolicy};
use serde::Deserialize;

const DEFAULT_FILE: &str = "ovino.toml";

/// How the single inference is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Sync,
    Async,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// tracing level: trace, debug, info, warn, error
    pub log_level: String,
    /// Model file; the first positional argument overrides it
    pub model: Option<PathBuf>,
    pub compile: CompileConfig,
    /// Sizes for dynamic input axes
    pub dims: DynamicDimPolicy,
    /// Value every input element is filled with
    pub fill_value: f32,
    pub top_k: usize,
    pub mode: RunMode,
    /// Deadline for an async run; zero disables it
    pub timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            model: None,
            compile: CompileConfig::default(),
            dims: DynamicDimPolicy::default(),
            fill_value: 0.5,
            top_k: 5,
            mode: RunMode::Sync,
            timeout_ms: 0,
        }
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("OVINO").separator("__"))
            .build()?
            .try_deserialize()
    }
}

/// Run one inference through the OpenVINO runtime.
#[derive(Parser, Debug, Default, PartialEq, Eq)]
#[command(name = "ovino")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Settings file; defaults to ovino.toml in the working directory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Drive the inference asynchronously regardless of the configured mode
    #[arg(long = "async")]
    pub force_async: bool,

    /// Model file (overrides `model` in the settings)
    pub model: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("ovino").chain(list.iter().copied()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--config", "dev.toml", "model.xml", "--async"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("dev.toml")));
        assert_eq!(parsed.model, Some(PathBuf::from("model.xml")));
        assert!(parsed.force_async);

        let short = args(&["-c", "dev.toml"]).unwrap();
        assert_eq!(short.config, Some(PathBuf::from("dev.toml")));
        assert_eq!(short.model, None);

        assert_eq!(args(&[]).unwrap(), Args::default());
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        use clap::error::ErrorKind;

        assert!(args(&["--config"]).is_err());
        assert_eq!(args(&["--verbose"]).unwrap_err().kind(), ErrorKind::UnknownArgument);
        assert_eq!(args(&["a.xml", "b.xml"]).unwrap_err().kind(), ErrorKind::UnknownArgument);
        assert_eq!(args(&["--version"]).unwrap_err().kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ovino-settings-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
log_level = "debug"
model = "models/resnet.xml"
top_k = 3
mode = "async"
timeout_ms = 250

[compile]
device = "AUTO"
performance_hint = "THROUGHPUT"
num_streams = 2

[dims]
batch = 4
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.model, Some(PathBuf::from("models/resnet.xml")));
        assert_eq!(settings.top_k, 3);
        assert_eq!(settings.mode, RunMode::Async);
        assert_eq!(settings.timeout_ms, 250);
        assert_eq!(settings.compile.device, "AUTO");
        assert_eq!(settings.compile.num_streams, Some(2));
        assert_eq!(settings.dims.batch, 4);
        assert_eq!(settings.dims.default_dim, 1);
        assert_eq!(settings.fill_value, 0.5);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let path = std::env::temp_dir().join("ovino-settings-does-not-exist.toml");
        assert!(Settings::load(Some(&path)).is_err());
    }
}
