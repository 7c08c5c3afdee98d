//! The fallback: `dladdr`. it is a symbol lookup at heart, so it is slower,
//! and it only knows where the module starts at runtime, not where it was
//! linked to. undoing the slide needs the image base from the file on disk.
//!
//! reference: <https://github.com/bminor/glibc/blob/91695ee4598b39d181ab8df579b888a8863c4cab/elf/dl-addr.c#L26>
//!
//! both glibc and musl take the loader lock in here. a signal landing while
//! the interrupted thread is in `dlopen` would block (or re-enter the lock and
//! see half-built link maps), so this backend never answers `locate_safe`.

use core::ffi;

use super::{loader_path, Locate, ModuleRecord};
use crate::stdext::InlinePath;
use crate::FramePointer;

struct Found {
    /// Empty for the main executable on glibc.
    name: *const ffi::c_char,
    runtime_start: FramePointer,
}

/// On glibc, `dli_fname` for the main executable is whatever `argv[0]` was,
/// so ask for the `link_map` and use its `l_name` instead.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn find(address: FramePointer) -> Option<Found> {
    use super::link_map;

    const RTLD_DL_LINKMAP: ffi::c_int = 2;

    extern "C" {
        fn dladdr1(
            address: *const ffi::c_void,
            info: *mut libc::Dl_info,
            extra_info: *mut *mut ffi::c_void,
            flags: ffi::c_int,
        ) -> ffi::c_int;
    }

    // SAFETY: `Dl_info` is plain data, and both out pointers are valid.
    unsafe {
        let mut info: libc::Dl_info = core::mem::zeroed();
        let mut map: *mut link_map = core::ptr::null_mut();
        let ret = dladdr1(
            address as *const ffi::c_void,
            &mut info,
            (&mut map as *mut *mut link_map).cast(),
            RTLD_DL_LINKMAP,
        );
        if ret == 0 || map.is_null() {
            return None;
        }
        Some(Found {
            name: (*map).l_name,
            runtime_start: info.dli_fbase as FramePointer,
        })
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn find(address: FramePointer) -> Option<Found> {
    // SAFETY: `Dl_info` is plain data, and the out pointer is valid.
    unsafe {
        let mut info: libc::Dl_info = core::mem::zeroed();
        if libc::dladdr(address as *const ffi::c_void, &mut info) == 0 {
            return None;
        }
        Some(Found {
            name: info.dli_fname,
            runtime_start: info.dli_fbase as FramePointer,
        })
    }
}

/// musl reports `argv[0]` as the main executable's `dli_fname`. The program
/// headers from the aux vector live inside the main executable, so whichever
/// module they belong to is it.
///
/// Elsewhere (the BSDs, macOS) `dli_fname` is taken as is.
#[cfg(all(target_os = "linux", not(target_env = "gnu")))]
fn is_main_executable(runtime_start: FramePointer) -> bool {
    // SAFETY: `getauxval` has no preconditions.
    let phdr = unsafe { libc::getauxval(libc::AT_PHDR) } as FramePointer;
    phdr != 0 && find(phdr).is_some_and(|main| main.runtime_start == runtime_start)
}

#[cfg(not(all(target_os = "linux", not(target_env = "gnu"))))]
fn is_main_executable(_runtime_start: FramePointer) -> bool {
    // glibc names it `""` in the link map, see `find`.
    false
}

pub(crate) struct Dladdr;

impl Locate for Dladdr {
    const CAN_LOCATE_SAFE: bool = false;

    #[instrument(level = "trace")]
    fn locate(address: FramePointer) -> Option<ModuleRecord> {
        let Some(found) = find(address) else {
            trace!("dladdr found nothing for {address:#x}");
            return None;
        };
        trace!("runtime start: {:#x}", found.runtime_start);

        let path = if is_main_executable(found.runtime_start) {
            crate::exe::running_executable_path().to_owned()
        } else {
            // SAFETY: the name is a nul-terminated string owned by the loader.
            unsafe { loader_path(found.name) }
        };

        Some(ModuleRecord {
            path,
            runtime_start: found.runtime_start,
            bias: None,
        })
    }

    fn locate_safe(_address: FramePointer, path: &mut InlinePath) -> Option<FramePointer> {
        path.clear();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() {}

    #[test]
    fn main_executable_path_is_canonical() {
        let module = Dladdr::locate(here as usize).unwrap();
        assert_eq!(module.path, crate::running_executable_path());
    }

    #[test]
    #[cfg(all(target_os = "linux", not(target_env = "gnu")))]
    fn aux_vector_finds_main_executable() {
        let module = find(here as usize).unwrap();
        assert!(is_main_executable(module.runtime_start));
        assert!(!is_main_executable(module.runtime_start.wrapping_add(1)));
    }
}
