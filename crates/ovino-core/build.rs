//! Build script for ovino-core
//!
//! With the `ffi` feature, compiles the C++ wrapper around the OpenVINO
//! runtime and links it. Without it nothing native is built and the crate
//! runs against its in-process reference runtime.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=native/");
    println!("cargo:rerun-if-env-changed=OPENVINO_DIR");
    println!("cargo:rerun-if-env-changed=INTEL_OPENVINO_DIR");

    if env::var_os("CARGO_FEATURE_FFI").is_none() {
        return;
    }

    // Explicit override first, then the location setupvars.sh exports.
    let root = env::var_os("OPENVINO_DIR")
        .or_else(|| env::var_os("INTEL_OPENVINO_DIR"))
        .map(PathBuf::from);

    let mut build = cc::Build::new();

    build
        .cpp(true)
        .std("c++17")
        .include("native")
        .file("native/core_wrapper.cpp")
        .warnings(true)
        .extra_warnings(true);

    if let Some(root) = &root {
        build.include(root.join("runtime").join("include"));
        let lib_dir = root.join("runtime").join("lib").join(target_lib_subdir());
        println!("cargo:rustc-link-search=native={}", lib_dir.display());
        if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("linux") {
            println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib_dir.display());
        }
    }

    // Compile
    build.compile("openvino_wrapper");

    println!("cargo:rustc-link-lib=dylib=openvino");
}

fn target_lib_subdir() -> &'static str {
    match env::var("CARGO_CFG_TARGET_ARCH").as_deref() {
        Ok("aarch64") => "aarch64",
        Ok("arm") => "armv7l",
        _ => "intel64",
    }
}
