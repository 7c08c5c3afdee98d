//! `GetModuleHandleExW` maps an address to its `HMODULE`, which is also the
//! runtime start of the image. the path comes from `GetModuleFileNameW`,
//! memoized per handle.

#![allow(non_snake_case, clippy::upper_case_acronyms)]

use core::ffi;
use std::io;
use std::sync::OnceLock;

use super::{Locate, ModuleRecord};
use crate::cache::ModulePathCache;
use crate::stdext::{InlinePath, INLINE_PATH_CAPACITY};
use crate::FramePointer;

type HMODULE = *mut ffi::c_void;
type BOOL = i32;

const GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT: u32 = 0x2;
const GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS: u32 = 0x4;

#[link(name = "kernel32")]
extern "system" {
    fn GetModuleHandleExW(flags: u32, module_name: *const u16, module: *mut HMODULE) -> BOOL;
    fn GetModuleFileNameW(module: HMODULE, filename: *mut u16, size: u32) -> u32;
}

/// Lives until the process exits.
static MODULE_PATHS: OnceLock<ModulePathCache<usize>> = OnceLock::new();

fn module_handle(address: FramePointer) -> Option<HMODULE> {
    let mut handle: HMODULE = core::ptr::null_mut();
    // SAFETY: with `FROM_ADDRESS` the name parameter is an address, not a
    // string. the refcount is left alone, so the handle is only valid while
    // nobody unloads the module.
    let ok = unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT | GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
            address as *const u16,
            &mut handle,
        )
    };
    (ok != 0 && !handle.is_null()).then_some(handle)
}

/// Writes the module's path as UTF-16 into `buf`, returning its length.
fn module_file_name(handle: HMODULE, buf: &mut [u16]) -> Option<usize> {
    let size = u32::try_from(buf.len()).unwrap_or(u32::MAX);
    // SAFETY: `size` never exceeds the buffer.
    let len = unsafe { GetModuleFileNameW(handle, buf.as_mut_ptr(), size) } as usize;
    // A full buffer means the path was truncated.
    (len != 0 && len < buf.len()).then_some(len)
}

fn cached_module_path(handle: HMODULE) -> String {
    MODULE_PATHS
        .get_or_init(ModulePathCache::new)
        .get_or_resolve(handle as usize, |_| {
            let mut buf = vec![0u16; INLINE_PATH_CAPACITY];
            match module_file_name(handle, &mut buf) {
                Some(len) => Ok(String::from_utf16_lossy(&buf[..len])),
                None => Err(io::Error::last_os_error()),
            }
        })
}

pub(crate) struct ModuleHandle;

impl Locate for ModuleHandle {
    // There are no signal handlers to interrupt the loader with. This does
    // take the loader lock, so it must not run from a DLL entry point.
    const CAN_LOCATE_SAFE: bool = true;

    #[instrument(level = "trace")]
    fn locate(address: FramePointer) -> Option<ModuleRecord> {
        let Some(handle) = module_handle(address) else {
            warn!(
                "no module found for {address:#x}: {}",
                io::Error::last_os_error()
            );
            return None;
        };

        Some(ModuleRecord {
            path: cached_module_path(handle),
            runtime_start: handle as FramePointer,
            bias: None,
        })
    }

    fn locate_safe(address: FramePointer, path: &mut InlinePath) -> Option<FramePointer> {
        let Some(handle) = module_handle(address) else {
            path.clear();
            return None;
        };

        let mut wide = [0u16; INLINE_PATH_CAPACITY];
        path.fill_with(|buf| {
            let len = module_file_name(handle, &mut wide)?;
            let mut written = 0;
            for c in char::decode_utf16(wide[..len].iter().copied()) {
                let c = c.unwrap_or(char::REPLACEMENT_CHARACTER);
                let end = written + c.len_utf8();
                if end > buf.len() {
                    return None;
                }
                c.encode_utf8(&mut buf[written..end]);
                written = end;
            }
            Some(written)
        });
        Some(handle as FramePointer)
    }
}
