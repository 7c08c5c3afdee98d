//! Build script for `objaddr`.
//!
//! Enables the `_dl_find_object` lookup (`cfg(has_dl_find_object)`) on glibc
//! targets whose libc has it (2.35+). Availability is checked by linking a
//! tiny program against the target's libc, the same way the real crate would
//! be linked.

use std::env;
use std::fs::write;
use std::io::Error;
use std::io::Result;
use std::path::Path;
use std::process::Command;
use std::process::Stdio;

const CHECK_SOURCE: &str = r#"
use std::ffi::{c_int, c_void};

extern "C" {
    fn _dl_find_object(address: *mut c_void, result: *mut c_void) -> c_int;
}

fn main() {
    let mut result = [0u64; 16];
    unsafe { _dl_find_object(main as usize as *mut c_void, result.as_mut_ptr().cast()) };
}
"#;

/// Try to build `CHECK_SOURCE` for the target.
fn links_dl_find_object() -> Result<()> {
    let out_dir = env::var("OUT_DIR").map_err(Error::other)?;
    let rustc = env::var("RUSTC").map_err(Error::other)?;
    let target = env::var("TARGET").map_err(Error::other)?;

    let src = Path::new(&out_dir).join("links_dl_find_object.rs");
    let dst = Path::new(&out_dir).join("links_dl_find_object");
    let () = write(&src, CHECK_SOURCE)?;

    let status = Command::new(&rustc)
        .args(["--edition", "2021", "--crate-type", "bin", "--target"])
        .arg(&target)
        .arg("-o")
        .arg(&dst)
        .arg(&src)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|err| Error::other(format!("failed to run `{rustc}`: {err}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::other(format!("`{rustc}` reported {status}")))
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();
    if os != "linux" || target_env != "gnu" {
        return
    }

    // The feature skips the check, for toolchains where the check can't link
    // but the final build can.
    if env::var_os("CARGO_FEATURE_DL_FIND_OBJECT").is_some() || links_dl_find_object().is_ok() {
        println!("cargo:rustc-cfg=has_dl_find_object");
    }
}
