use std::collections::HashMap;
use std::hash::Hash;
use std::io;
use std::sync::{Mutex, PoisonError};

/// Memoizes module handle → on-disk path lookups.
///
/// Entries are never evicted or updated: a loader handle is treated as a
/// stable identity once observed. Failed lookups are cached as an empty path
/// so the OS is not asked again for a handle it could not name.
///
/// The lock is held across the whole check-resolve-insert sequence, so every
/// handle is resolved at most once no matter how many threads race on it.
#[derive(Debug)]
pub struct ModulePathCache<K> {
    paths: Mutex<HashMap<K, String>>,
}

impl<K: Eq + Hash> ModulePathCache<K> {
    pub fn new() -> Self {
        Self {
            paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_resolve(
        &self,
        handle: K,
        resolve: impl FnOnce(&K) -> io::Result<String>,
    ) -> String {
        // The map is append-only, a panic while holding the lock can't leave
        // it half-updated.
        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(path) = paths.get(&handle) {
            return path.clone();
        }

        let path = match resolve(&handle) {
            Ok(path) => path,
            Err(err) => {
                warn!("failed to resolve module path: {err}");
                String::new()
            }
        };
        paths.insert(handle, path.clone());
        path
    }

    pub fn len(&self) -> usize {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash> Default for ModulePathCache<K> {
    fn default() -> Self {
        Self::new()
    }
}
