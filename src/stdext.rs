use std::borrow::Cow;
use std::fmt;

/// Capacity of an [`InlinePath`] in bytes, enough for `PATH_MAX` on linux.
pub const INLINE_PATH_CAPACITY: usize = 4096;

/// A path stored inline, without touching the allocator.
///
/// This is what a [`SafeObjectFrame`](crate::SafeObjectFrame) carries, so
/// filling one in is fine inside a signal handler.
#[derive(Clone)]
pub struct InlinePath {
    buf: [u8; INLINE_PATH_CAPACITY],
    len: usize,
}

impl InlinePath {
    pub const fn new() -> Self {
        Self {
            buf: [0; INLINE_PATH_CAPACITY],
            len: 0,
        }
    }

    /// Replaces the contents with `bytes`. Paths that don't fit leave the
    /// buffer empty and return `false`, a truncated path would name a
    /// different file.
    pub fn set(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > INLINE_PATH_CAPACITY {
            self.clear();
            return false;
        }
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        true
    }

    /// Lets `f` write directly into the buffer. `f` returns the number of
    /// bytes it wrote, or `None` on failure (which leaves the path empty).
    #[cfg_attr(not(any(has_dl_find_object, windows)), allow(dead_code))]
    pub(crate) fn fill_with(&mut self, f: impl FnOnce(&mut [u8]) -> Option<usize>) -> bool {
        match f(&mut self.buf) {
            Some(len) if len <= INLINE_PATH_CAPACITY => {
                self.len = len;
                true
            }
            _ => {
                self.clear();
                false
            }
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl Default for InlinePath {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for InlinePath {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for InlinePath {}

impl fmt::Debug for InlinePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_string_lossy(), f)
    }
}

impl fmt::Display for InlinePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_read_back() {
        let mut path = InlinePath::new();
        assert!(path.is_empty());
        assert!(path.set(b"/usr/lib/libc.so.6"));
        assert_eq!(path.as_bytes(), b"/usr/lib/libc.so.6");
        assert_eq!(path.to_string(), "/usr/lib/libc.so.6");
    }

    #[test]
    fn oversized_path_is_rejected_not_truncated() {
        let mut path = InlinePath::new();
        assert!(path.set(b"/bin/true"));

        let long = vec![b'a'; INLINE_PATH_CAPACITY + 1];
        assert!(!path.set(&long));
        assert!(path.is_empty());
    }

    #[test]
    fn failed_fill_clears() {
        let mut path = InlinePath::new();
        assert!(path.set(b"/bin/true"));
        assert!(!path.fill_with(|_| None));
        assert!(path.is_empty());

        assert!(path.fill_with(|buf| {
            buf[..3].copy_from_slice(b"abc");
            Some(3)
        }));
        assert_eq!(path.as_bytes(), b"abc");
    }
}
