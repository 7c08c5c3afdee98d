//! # locate
//!
//! asks the dynamic loader which loaded module an address belongs to.
//!
//! exactly one backend is compiled in, picked by what the target's loader can
//! do:
//! - glibc 2.35+ (detected by the build script, or forced with the
//!   `dl-find-object` feature): `_dl_find_object`, which hands out the load
//!   bias directly. no file I/O needed afterwards, and no loader lock.
//! - other unix: `dladdr1`/`dladdr`, which only gives us the runtime start of
//!   the module. the image base has to be read from disk to undo the slide.
//!   these take the loader lock, so they are never used from `capture_safe`.
//! - windows: `GetModuleHandleExW`, with module paths memoized per handle.
//!
//! all of these are thread safe, but none of them protect against the module
//! being unloaded by another thread while we look at it.

use crate::stdext::InlinePath;
use crate::FramePointer;

#[cfg(has_dl_find_object)]
mod dl_find_object;
#[cfg(all(unix, not(has_dl_find_object)))]
mod dladdr;
#[cfg(windows)]
mod windows;

#[cfg(has_dl_find_object)]
pub(crate) type Platform = dl_find_object::DlFindObject;
#[cfg(all(unix, not(has_dl_find_object)))]
pub(crate) type Platform = dladdr::Dladdr;
#[cfg(windows)]
pub(crate) type Platform = windows::ModuleHandle;
#[cfg(not(any(unix, windows)))]
pub(crate) type Platform = Unsupported;

/// What the loader told us about the module containing an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModuleRecord {
    pub(crate) path: String,
    /// Runtime address of the first byte of the mapped image.
    pub(crate) runtime_start: FramePointer,
    /// Runtime minus link-time addresses, if the loader knows it.
    pub(crate) bias: Option<FramePointer>,
}

pub(crate) trait Locate {
    /// Whether [`Locate::locate_safe`] can find anything at all. Backends
    /// whose only loader query takes a lock can't.
    const CAN_LOCATE_SAFE: bool;

    fn locate(address: FramePointer) -> Option<ModuleRecord>;

    /// Like [`Locate::locate`], but writes the path into `path` and returns
    /// the runtime start of the module. Must not allocate or log, and must
    /// not block on a lock a signal may have interrupted the loader holding.
    fn locate_safe(address: FramePointer, path: &mut InlinePath) -> Option<FramePointer>;
}

#[cfg(not(any(unix, windows)))]
pub(crate) struct Unsupported;

#[cfg(not(any(unix, windows)))]
impl Locate for Unsupported {
    const CAN_LOCATE_SAFE: bool = false;

    fn locate(_address: FramePointer) -> Option<ModuleRecord> {
        None
    }

    fn locate_safe(_address: FramePointer, path: &mut InlinePath) -> Option<FramePointer> {
        path.clear();
        None
    }
}

/// The public prefix of glibc's `struct link_map`, only ever read through
/// pointers handed out by the loader.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[allow(non_camel_case_types)]
#[repr(C)]
pub(crate) struct link_map {
    /// Difference between the link-time and runtime addresses.
    pub(crate) l_addr: usize,
    /// Empty for the main executable.
    pub(crate) l_name: *const core::ffi::c_char,
}

/// Turns a loader-reported module name into a path. The loader names the main
/// executable `""`.
///
/// # Safety
/// `name` must be null or point to a nul-terminated string.
#[cfg(unix)]
unsafe fn loader_path(name: *const core::ffi::c_char) -> String {
    if !name.is_null() {
        let name = core::ffi::CStr::from_ptr(name);
        if !name.is_empty() {
            return name.to_string_lossy().into_owned();
        }
    }
    crate::exe::running_executable_path().to_owned()
}

/// [`loader_path`] without allocating.
///
/// # Safety
/// `name` must be null or point to a nul-terminated string.
#[cfg(has_dl_find_object)]
unsafe fn loader_path_into(name: *const core::ffi::c_char, out: &mut InlinePath) -> bool {
    if !name.is_null() {
        let name = core::ffi::CStr::from_ptr(name);
        if !name.is_empty() {
            return out.set(name.to_bytes());
        }
    }
    crate::exe::running_executable_path_into(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() {}

    #[test]
    fn finds_own_function() {
        let address = here as usize;
        let module = Platform::locate(address).unwrap();
        assert_eq!(module.path, crate::running_executable_path());
        assert!(module.runtime_start <= address);
    }

    #[test]
    fn safe_and_eager_agree() {
        if !Platform::CAN_LOCATE_SAFE {
            return;
        }
        let address = here as usize;
        let module = Platform::locate(address).unwrap();

        let mut path = InlinePath::new();
        let runtime_start = Platform::locate_safe(address, &mut path).unwrap();
        assert_eq!(runtime_start, module.runtime_start);
        assert_eq!(path.to_string_lossy(), module.path);
    }

    #[test]
    fn locking_backends_never_locate_safe() {
        if Platform::CAN_LOCATE_SAFE {
            return;
        }
        assert!(Platform::locate(here as usize).is_some());

        let mut path = InlinePath::new();
        assert!(path.set(b"stale"));
        assert_eq!(Platform::locate_safe(here as usize, &mut path), None);
        assert!(path.is_empty());
    }

    #[test]
    fn null_is_nowhere() {
        assert_eq!(Platform::locate(0), None);
        let mut path = InlinePath::new();
        assert_eq!(Platform::locate_safe(0, &mut path), None);
        assert!(path.is_empty());
    }
}
