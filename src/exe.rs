//! The loader reports an empty name for the main executable, these resolve it
//! to an actual path.

use std::sync::OnceLock;

#[cfg(has_dl_find_object)]
use crate::stdext::InlinePath;

static EXECUTABLE_PATH: OnceLock<String> = OnceLock::new();

/// The path of the running executable, or an empty string if it can't be
/// determined. Looked up once per process.
pub fn running_executable_path() -> &'static str {
    EXECUTABLE_PATH.get_or_init(|| match std::env::current_exe() {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(err) => {
            warn!("failed to resolve the running executable path: {err}");
            String::new()
        }
    })
}

/// Writes the running executable path into `out` without allocating.
#[cfg(has_dl_find_object)]
pub(crate) fn running_executable_path_into(out: &mut InlinePath) -> bool {
    out.fill_with(|buf| {
        // SAFETY: the buffer pointer and length describe writable memory.
        let len = unsafe {
            libc::readlink(
                c"/proc/self/exe".as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        // A full buffer may mean the link was truncated.
        usize::try_from(len).ok().filter(|&len| len < buf.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_current_exe() {
        let expected = std::env::current_exe().unwrap();
        assert_eq!(running_executable_path(), expected.to_string_lossy());
    }

    #[test]
    #[cfg(has_dl_find_object)]
    fn inline_variant_matches() {
        let mut path = InlinePath::new();
        assert!(running_executable_path_into(&mut path));
        assert_eq!(path.to_string_lossy(), running_executable_path());
    }
}
