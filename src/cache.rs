//! Read-through cache of pipeline results keyed by source identity.
//!
//! A source is identified by its canonical path plus a signature (length and
//! modification time). Looking up a path whose signature changed drops the
//! stale entry and recomputes.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSignature {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub path: PathBuf,
    pub signature: SourceSignature,
}

impl SourceKey {
    pub fn for_path(path: &Path) -> io::Result<Self> {
        let path = path.canonicalize()?;
        let metadata = std::fs::metadata(&path)?;
        Ok(Self {
            signature: SourceSignature {
                len: metadata.len(),
                modified: metadata.modified().ok(),
            },
            path,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct ResultCache<T> {
    entries: HashMap<PathBuf, (SourceSignature, Arc<T>)>,
    stats: CacheStats,
}

impl<T> Default for ResultCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<T> ResultCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, computing it when the path is new
    /// or its signature moved. Failed computations are not cached.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: SourceKey,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some((signature, value)) = self.entries.get(&key.path) {
            if *signature == key.signature {
                self.stats.hits += 1;
                debug!(path = %key.path.display(), "cache hit");
                return Ok(Arc::clone(value));
            }
            debug!(path = %key.path.display(), "source changed, invalidating cache entry");
        }

        self.stats.misses += 1;
        self.entries.remove(&key.path);
        let value = Arc::new(compute()?);
        self.entries
            .insert(key.path, (key.signature, Arc::clone(&value)));
        Ok(value)
    }

    pub fn invalidate(&mut self, path: &Path) -> bool {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.entries.remove(&path).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;

    fn write_source(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("snapshots.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn computes_once_per_unchanged_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "ocid,date\n");
        let calls = Cell::new(0);
        let mut cache: ResultCache<usize> = ResultCache::new();

        for _ in 0..3 {
            let key = SourceKey::for_path(&path).unwrap();
            let value = cache
                .get_or_try_insert_with(key, || {
                    calls.set(calls.get() + 1);
                    Ok::<_, io::Error>(42)
                })
                .unwrap();
            assert_eq!(*value, 42);
        }

        assert_eq!(calls.get(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1 });
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn recomputes_after_source_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "ocid,date\n");
        let mut cache: ResultCache<String> = ResultCache::new();

        let first = cache
            .get_or_try_insert_with(SourceKey::for_path(&path).unwrap(), || {
                Ok::<_, io::Error>("v1".to_string())
            })
            .unwrap();

        write_source(dir.path(), "ocid,date\nE1,2025-01-01\n");
        let second = cache
            .get_or_try_insert_with(SourceKey::for_path(&path).unwrap(), || {
                Ok::<_, io::Error>("v2".to_string())
            })
            .unwrap();

        assert_eq!(first.as_str(), "v1");
        assert_eq!(second.as_str(), "v2");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "ocid,date\n");
        let mut cache: ResultCache<u32> = ResultCache::new();

        let err = cache.get_or_try_insert_with(SourceKey::for_path(&path).unwrap(), || {
            Err(io::Error::new(io::ErrorKind::InvalidData, "bad"))
        });
        assert!(err.is_err());
        assert!(cache.is_empty());

        let value = cache
            .get_or_try_insert_with(SourceKey::for_path(&path).unwrap(), || {
                Ok::<_, io::Error>(7)
            })
            .unwrap();
        assert_eq!(*value, 7);
    }

    #[test]
    fn explicit_invalidation_drops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "ocid,date\n");
        let mut cache: ResultCache<u32> = ResultCache::new();
        cache
            .get_or_try_insert_with(SourceKey::for_path(&path).unwrap(), || {
                Ok::<_, io::Error>(1)
            })
            .unwrap();

        assert!(cache.invalidate(&path));
        assert!(!cache.invalidate(&path));
        assert!(cache.is_empty());

        cache
            .get_or_try_insert_with(SourceKey::for_path(&path).unwrap(), || {
                Ok::<_, io::Error>(1)
            })
            .unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
