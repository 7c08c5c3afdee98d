//! Maps raw instruction addresses to the loaded module containing them, and to
//! the address as it appears in that module's file on disk, with ASLR undone.
//!
//! ```no_run
//! fn here() {}
//!
//! let frame = objaddr::resolve(here as usize);
//! println!("{frame}");
//! ```
//!
//! Resolution never fails as a whole: addresses that belong to no known module
//! come back with an empty path and an `object_address` of 0.
//!
//! For restricted contexts like signal handlers there is a two phase variant:
//! [`capture_safe`] only asks the loader (no allocation, no file I/O, no
//! loader lock), and [`finalize`] later does the expensive part. Only loaders
//! with a lock-free query support this, see [`can_capture_safe`].

#[macro_use]
extern crate tracing;

use core::fmt;
use std::sync::OnceLock;

mod cache;
mod error;
mod exe;
mod image_base;
mod locate;
mod normalize;
mod stdext;

pub use cache::ModulePathCache;
pub use error::{Error, Result};
pub use exe::running_executable_path;
pub use image_base::{ImageBaseReader, ObjectFileReader};
pub use stdext::{InlinePath, INLINE_PATH_CAPACITY};

use locate::{Locate, Platform};

/// A raw runtime instruction address.
pub type FramePointer = usize;

/// A frame resolved to its module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFrame {
    pub raw_address: FramePointer,
    /// The address in the coordinate space of the file on disk, 0 if it could
    /// not be determined.
    pub object_address: FramePointer,
    /// Empty if the module could not be identified.
    pub object_path: String,
}

impl ObjectFrame {
    fn unresolved(raw_address: FramePointer) -> Self {
        Self {
            raw_address,
            ..Self::default()
        }
    }
}

impl fmt::Display for ObjectFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.object_path.is_empty() {
            write!(f, "{:#x} => <unknown>", self.raw_address)
        } else {
            write!(
                f,
                "{:#x} => {}+{:#x}",
                self.raw_address, self.object_path, self.object_address
            )
        }
    }
}

/// A frame whose module and offset into it are known, but whose image base
/// hasn't been read yet. Plain data, so it can leave a signal handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeObjectFrame {
    pub raw_address: FramePointer,
    pub address_relative_to_object_start: FramePointer,
    /// Empty if the module could not be identified.
    pub object_path: InlinePath,
}

impl SafeObjectFrame {
    /// An unresolved frame, usable as the initializer of a `static`.
    pub const fn new() -> Self {
        Self {
            raw_address: 0,
            address_relative_to_object_start: 0,
            object_path: InlinePath::new(),
        }
    }
}

impl Default for SafeObjectFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves addresses, reading image bases through `R`.
#[derive(Debug, Default)]
pub struct Resolver<R = ObjectFileReader> {
    reader: R,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide resolver used by the free functions. Created on first
    /// use, never torn down.
    pub fn global() -> &'static Resolver {
        static RESOLVER: OnceLock<Resolver> = OnceLock::new();
        RESOLVER.get_or_init(Resolver::new)
    }
}

impl<R: ImageBaseReader> Resolver<R> {
    pub fn with_reader(reader: R) -> Self {
        Self { reader }
    }

    pub fn resolve(&self, address: FramePointer) -> ObjectFrame {
        match Platform::locate(address) {
            Some(module) => normalize::normalize(address, module, &self.reader),
            None => ObjectFrame::unresolved(address),
        }
    }

    /// One frame per address, in order. Equal addresses are resolved
    /// independently.
    pub fn resolve_all(&self, addresses: &[FramePointer]) -> Vec<ObjectFrame> {
        addresses
            .iter()
            .map(|&address| self.resolve(address))
            .collect()
    }

    /// Unlike [`Resolver::resolve`] this fails if the image base can't be
    /// read.
    pub fn finalize(&self, frame: &SafeObjectFrame) -> Result<ObjectFrame> {
        normalize::finalize(frame, &self.reader)
    }
}

pub fn resolve(address: FramePointer) -> ObjectFrame {
    Resolver::global().resolve(address)
}

pub fn resolve_all(addresses: &[FramePointer]) -> Vec<ObjectFrame> {
    Resolver::global().resolve_all(addresses)
}

/// Whether [`capture_safe`] can identify modules on this platform.
///
/// glibc before 2.35 and the other unix loaders only have lookups that take
/// the loader lock. There, [`capture_safe`] always returns an unresolved
/// frame instead of risking a deadlock; use [`resolve`] from a normal thread.
pub fn can_capture_safe() -> bool {
    Platform::CAN_LOCATE_SAFE
}

/// Finds the module containing `address` and the offset into it.
///
/// Safe to call from a signal handler: this doesn't allocate, log or touch
/// the file system, and on unix it never takes the loader lock. Without
/// [`can_capture_safe`] the frame is always unresolved.
///
/// The returned frame is over 4 KiB. On a small signal stack, prefer
/// [`capture_safe_into`] with a frame that lives elsewhere.
pub fn capture_safe(address: FramePointer) -> SafeObjectFrame {
    let mut frame = SafeObjectFrame::new();
    capture_safe_into(address, &mut frame);
    frame
}

/// [`capture_safe`], filling in `frame` in place.
pub fn capture_safe_into(address: FramePointer, frame: &mut SafeObjectFrame) {
    frame.raw_address = address;
    frame.address_relative_to_object_start =
        match Platform::locate_safe(address, &mut frame.object_path) {
            Some(runtime_start) => address.wrapping_sub(runtime_start),
            None => 0,
        };
}

pub fn finalize(frame: &SafeObjectFrame) -> Result<ObjectFrame> {
    Resolver::global().finalize(frame)
}
