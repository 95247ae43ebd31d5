//! Graph manifests and helpers shared by the unit tests

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::compiled_model::CompiledModel;
use crate::engine::Engine;
use crate::options::CompileOption;

/// Unique path in the temp directory; the file is not created.
pub(crate) fn temp_path(extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ovino-{}.{}", uuid::Uuid::new_v4(), extension))
}

/// File in the temp directory, removed when dropped.
pub(crate) struct TempFile(PathBuf);

impl TempFile {
    pub(crate) fn with_contents(extension: &str, contents: impl AsRef<[u8]>) -> Self {
        let path = temp_path(extension);
        std::fs::write(&path, contents).unwrap();
        Self(path)
    }
}

impl AsRef<Path> for TempFile {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

pub(crate) fn write_manifest(manifest: &Value) -> TempFile {
    TempFile::with_contents("json", manifest.to_string())
}

/// Image classifier: `input` [1,3,224,224] f32 -> `logits` [1,1000] f32
pub(crate) fn classifier_manifest() -> TempFile {
    write_manifest(&json!({
        "name": "tiny-classifier",
        "inputs": [{ "name": "input", "shape": [1, 3, 224, 224], "element_type": "f32" }],
        "outputs": [{ "name": "logits", "shape": [1, 1000], "element_type": "f32" }]
    }))
}

/// `x` [1,4] -> `y` [1,4], taking at least `latency_ms` per run
pub(crate) fn slow_manifest(latency_ms: u64) -> TempFile {
    write_manifest(&json!({
        "name": "slow",
        "inputs": [{ "name": "x", "shape": [1, 4], "element_type": "f32" }],
        "outputs": [{ "name": "y", "shape": [1, 4], "element_type": "f32" }],
        "latency_ms": latency_ms
    }))
}

/// Recurrent cell with one `hidden` [1,4] state
pub(crate) fn stateful_manifest() -> TempFile {
    write_manifest(&json!({
        "name": "recurrent",
        "inputs": [{ "name": "x", "shape": [1, 4], "element_type": "f32" }],
        "outputs": [{ "name": "y", "shape": [1, 4], "element_type": "f32" }],
        "states": [{ "name": "hidden", "shape": [1, 4] }]
    }))
}

/// `frames` [?,4] -> `scores` [?,2]
pub(crate) fn dynamic_batch_manifest() -> TempFile {
    write_manifest(&json!({
        "name": "batched",
        "inputs": [{ "name": "frames", "shape": [-1, 4], "element_type": "f32" }],
        "outputs": [{ "name": "scores", "shape": [-1, 2], "element_type": "f32" }]
    }))
}

/// Read and compile a manifest on CPU with the shared engine.
pub(crate) fn compile<I>(manifest: TempFile, options: I) -> CompiledModel
where
    I: IntoIterator<Item = CompileOption>,
{
    let engine = Engine::shared().unwrap();
    let model = engine.read_model(&manifest).unwrap();
    engine.compile_model(&model, "CPU", options).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_removed_on_drop() {
        let manifest = classifier_manifest();
        let path = manifest.as_ref().to_path_buf();
        assert!(path.exists());
        drop(manifest);
        assert!(!path.exists());
    }
}
