//! Undoes the load bias, turning runtime addresses into addresses as they
//! appear in the file on disk.
//!
//! There are two entry points with different failure contracts: [`normalize`]
//! degrades to "module known, address unknown" when the image base can't be
//! read, [`finalize`] returns the error.

use std::path::Path;

use crate::error::Result;
use crate::image_base::ImageBaseReader;
use crate::locate::ModuleRecord;
use crate::{FramePointer, ObjectFrame, SafeObjectFrame};

pub(crate) fn normalize<R>(address: FramePointer, module: ModuleRecord, reader: &R) -> ObjectFrame
where
    R: ImageBaseReader + ?Sized,
{
    let object_address = match module.bias {
        Some(bias) => address.wrapping_sub(bias),
        None => match reader.image_base(Path::new(&module.path)) {
            Ok(base) => address
                .wrapping_sub(module.runtime_start)
                .wrapping_add(base),
            Err(err) => {
                debug!(
                    "dropping image base error for {address:#x} in {:?}: {err}",
                    module.path
                );
                0
            }
        },
    };

    ObjectFrame {
        raw_address: address,
        object_address,
        object_path: module.path,
    }
}

pub(crate) fn finalize<R>(frame: &SafeObjectFrame, reader: &R) -> Result<ObjectFrame>
where
    R: ImageBaseReader + ?Sized,
{
    let object_path = frame.object_path.to_string_lossy().into_owned();
    let base = reader.image_base(Path::new(&object_path))?;
    Ok(ObjectFrame {
        raw_address: frame.raw_address,
        object_address: frame.address_relative_to_object_start.wrapping_add(base),
        object_path,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use test_log::test;

    use super::*;
    use crate::error::Error;
    use crate::stdext::InlinePath;

    const LIB: &str = "/usr/lib/libexample.so";

    fn record(bias: Option<FramePointer>) -> ModuleRecord {
        ModuleRecord {
            path: LIB.to_owned(),
            runtime_start: 0x7f00_0000,
            bias,
        }
    }

    fn base_0x1000(_: &Path) -> Result<FramePointer> {
        Ok(0x1000)
    }

    fn unreadable(_: &Path) -> Result<FramePointer> {
        Err(Error::EmptyPath)
    }

    fn safe_frame() -> SafeObjectFrame {
        let mut object_path = InlinePath::new();
        assert!(object_path.set(LIB.as_bytes()));
        SafeObjectFrame {
            raw_address: 0x7f00_0420,
            address_relative_to_object_start: 0x420,
            object_path,
        }
    }

    #[test]
    fn runtime_start_and_image_base() {
        let frame = normalize(0x7f00_0420, record(None), &base_0x1000);
        assert_eq!(
            frame,
            ObjectFrame {
                raw_address: 0x7f00_0420,
                object_address: 0x1420,
                object_path: LIB.to_owned(),
            }
        );
    }

    #[test]
    fn known_bias_skips_the_reader() {
        let calls = AtomicUsize::new(0);
        let reader = |_: &Path| -> Result<FramePointer> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(0x1000)
        };
        let frame = normalize(0x7f00_0420, record(Some(0x7f00_0000)), &reader);
        assert_eq!(frame.object_address, 0x420);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unreadable_base_degrades() {
        let frame = normalize(0x7f00_0420, record(None), &unreadable);
        assert_eq!(frame.object_address, 0);
        assert_eq!(frame.object_path, LIB);
    }

    #[test]
    fn finalize_adds_image_base() {
        let frame = finalize(&safe_frame(), &base_0x1000).unwrap();
        assert_eq!(frame.raw_address, 0x7f00_0420);
        assert_eq!(frame.object_address, 0x1420);
        assert_eq!(frame.object_path, LIB);
    }

    #[test]
    fn finalize_fails_where_normalize_degrades() {
        assert!(matches!(
            finalize(&safe_frame(), &unreadable),
            Err(Error::EmptyPath)
        ));
        assert_eq!(
            normalize(0x7f00_0420, record(None), &unreadable).object_address,
            0
        );
    }

    #[test]
    fn eager_and_deferred_agree() {
        let eager = normalize(0x7f00_0420, record(None), &base_0x1000);
        let deferred = finalize(&safe_frame(), &base_0x1000).unwrap();
        assert_eq!(eager, deferred);
    }
}
