//! The fast path: glibc's `_dl_find_object`
//! (<https://www.gnu.org/software/libc/manual/html_node/Dynamic-Linker-Introspection.html>).
//!
//! it walks the loader's own lock-free module table and hands back the
//! `link_map`, which already knows the load bias. no symbol table scan, no
//! reading the module from disk.

#![allow(non_camel_case_types)]

use core::ffi;

use super::{link_map, loader_path, loader_path_into, Locate, ModuleRecord};
use crate::stdext::InlinePath;
use crate::FramePointer;

#[allow(dead_code)]
#[repr(C)]
struct dl_find_object {
    dlfo_flags: ffi::c_ulonglong,
    dlfo_map_start: *mut ffi::c_void,
    dlfo_map_end: *mut ffi::c_void,
    dlfo_link_map: *mut link_map,
    /// A pointer to the `PT_GNU_EH_FRAME` segment (the `.eh_frame_hdr`
    /// section).
    dlfo_eh_frame: *mut ffi::c_void,
    __dflo_reserved: [ffi::c_ulonglong; 7],
}

extern "C" {
    fn _dl_find_object(address: *mut ffi::c_void, result: *mut dl_find_object) -> ffi::c_int;
}

fn find(address: FramePointer) -> Option<dl_find_object> {
    // SAFETY: all-zero is a valid `dl_find_object`, and `_dl_find_object` only
    // writes to it.
    unsafe {
        let mut out: dl_find_object = core::mem::zeroed();
        if _dl_find_object(address as *mut ffi::c_void, &mut out) != 0 {
            return None;
        }
        if out.dlfo_link_map.is_null() {
            return None;
        }
        Some(out)
    }
}

pub(crate) struct DlFindObject;

impl Locate for DlFindObject {
    const CAN_LOCATE_SAFE: bool = true;

    #[instrument(level = "trace")]
    fn locate(address: FramePointer) -> Option<ModuleRecord> {
        let Some(found) = find(address) else {
            trace!("_dl_find_object found nothing for {address:#x}");
            return None;
        };

        // SAFETY: the link map stays valid as long as the module is loaded.
        let map = unsafe { &*found.dlfo_link_map };
        trace!(
            "map: ({:p}, {:p}), l_addr: {:#x}",
            found.dlfo_map_start,
            found.dlfo_map_end,
            map.l_addr
        );

        Some(ModuleRecord {
            // SAFETY: `l_name` is a nul-terminated string owned by the loader.
            path: unsafe { loader_path(map.l_name) },
            runtime_start: found.dlfo_map_start as FramePointer,
            bias: Some(map.l_addr),
        })
    }

    fn locate_safe(address: FramePointer, path: &mut InlinePath) -> Option<FramePointer> {
        let Some(found) = find(address) else {
            path.clear();
            return None;
        };
        // SAFETY: see `locate`.
        unsafe { loader_path_into((*found.dlfo_link_map).l_name, path) };
        Some(found.dlfo_map_start as FramePointer)
    }
}
