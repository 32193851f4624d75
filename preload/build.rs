//! Build script compiling the variadic entry points.
//!
//! Stable Rust cannot define C variadic functions, so `printf`, `err`,
//! `error`, `execl` and their relatives are collected in a small C file.
//! Each only gathers its arguments and calls the `va_list` form exported by
//! the Rust side.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=csrc/variadic.c");

    // Trampolines exist for these targets only
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if os != "linux" || !matches!(arch.as_str(), "x86_64" | "aarch64") {
        println!("cargo:warning=variadic entry points not supported on {arch}-{os}");
        return;
    }

    cc::Build::new()
        .file("csrc/variadic.c")
        .define("_GNU_SOURCE", None)
        .flag_if_supported("-fno-builtin")
        .flag_if_supported("-U_FORTIFY_SOURCE")
        .warnings(true)
        .cargo_metadata(false)
        .compile("fdcolor_variadic");

    // Linked by the trampoline module, not by every target of the package
    let out_dir = env::var("OUT_DIR").unwrap_or_default();
    println!("cargo:rustc-link-search=native={out_dir}");
}
