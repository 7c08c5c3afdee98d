//! Reads the link-time image base out of an object file's headers.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use memmap2::Mmap;
use object::{BinaryFormat, Object, ObjectSegment};

use crate::error::{Error, Result};
use crate::FramePointer;

/// Something that knows the static image base of the object file at a path.
///
/// This is the only place resolution touches the file system, so it is never
/// consulted from [`capture_safe`](crate::capture_safe).
pub trait ImageBaseReader: Send + Sync {
    fn image_base(&self, path: &Path) -> Result<FramePointer>;
}

impl<F> ImageBaseReader for F
where
    F: Fn(&Path) -> Result<FramePointer> + Send + Sync,
{
    fn image_base(&self, path: &Path) -> Result<FramePointer> {
        self(path)
    }
}

/// Parses ELF, Mach-O and PE files with `object`, remembering every base it
/// managed to read. Failures are not remembered.
#[derive(Debug, Default)]
pub struct ObjectFileReader {
    bases: Mutex<HashMap<PathBuf, FramePointer>>,
}

impl ObjectFileReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageBaseReader for ObjectFileReader {
    #[instrument(level = "trace", skip(self))]
    fn image_base(&self, path: &Path) -> Result<FramePointer> {
        if path.as_os_str().is_empty() {
            return Err(Error::EmptyPath);
        }

        let mut bases = self.bases.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&base) = bases.get(path) {
            return Ok(base);
        }

        let base = read_image_base(path)?;
        trace!("image base of {}: {base:#x}", path.display());
        bases.insert(path.to_path_buf(), base);
        Ok(base)
    }
}

fn read_image_base(path: &Path) -> Result<FramePointer> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    // SAFETY: the mapping is only read while parsing, modules on disk are not
    // expected to be rewritten underneath a running process.
    let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
    let object = object::File::parse(&*mmap).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let base = match object.format() {
        BinaryFormat::Pe => Some(object.relative_address_base()),
        // The lowest mapped segment starts at the image base. Segments without
        // file contents (`__PAGEZERO`, bss-only) are not part of the image.
        _ => object
            .segments()
            .filter(|segment| segment.file_range().1 != 0)
            .map(|segment| segment.address().wrapping_sub(segment.file_range().0))
            .min(),
    };

    base.map(|base| base as FramePointer)
        .ok_or_else(|| Error::NoLoadSegment {
            path: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_log::test;

    use super::*;

    #[test]
    fn reads_own_executable() {
        let exe = std::env::current_exe().unwrap();
        let reader = ObjectFileReader::new();
        let base = reader.image_base(&exe).unwrap();
        // Read twice, the second one comes out of the cache.
        assert_eq!(reader.image_base(&exe).unwrap(), base);
    }

    #[test]
    fn empty_path() {
        let reader = ObjectFileReader::new();
        assert!(matches!(
            reader.image_base(Path::new("")),
            Err(Error::EmptyPath)
        ));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ObjectFileReader::new();
        assert!(matches!(
            reader.image_base(&dir.path().join("nope.so")),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn not_an_object_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an object file").unwrap();

        let reader = ObjectFileReader::new();
        assert!(matches!(
            reader.image_base(file.path()),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn closures_are_readers() {
        let reader = |_: &Path| -> Result<FramePointer> { Ok(0x40_0000) };
        assert_eq!(reader.image_base(Path::new("/bin/true")).unwrap(), 0x40_0000);
    }
}
