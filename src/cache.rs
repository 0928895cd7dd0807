//! Process-wide cache of open archives, keyed by canonical path, so that
//! repeated opens of the same file (common when a classloader or build
//! tool repeatedly consults the same jar) reuse one parsed index instead
//! of re-reading and re-hashing the central directory every time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::archive::Archive;
use crate::errors::{Error, ErrorKind};
use crate::reader_at::FileReader;

/// Platform path length ceiling, checked before canonicalization so an
/// absurdly long path fails fast with a clear error instead of however
/// the OS's own syscall happens to report it.
const PATH_MAX: usize = 4096;

struct CacheSlot {
    archive: Arc<Archive<FileReader>>,
    last_modified: u64,
    refs: u16,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<PathBuf, Vec<CacheSlot>>,
}

/// A process-wide registry of open archives.
///
/// `last_modified` is caller-supplied, not read from the filesystem by
/// this cache: a slot matches a request if its stored value equals the
/// request's, or if the *slot's own* stored value is `0` ("don't care").
/// Passing `0` in a request is not itself a wildcard match against every
/// slot - it only ever hits a slot that was itself cached with `0`.
/// Callers that care about a file changing underneath them should pass
/// its actual modification time and treat a miss as a signal to reopen.
pub struct ArchiveCache {
    registry: Mutex<Registry>,
}

static GLOBAL: OnceLock<ArchiveCache> = OnceLock::new();

impl ArchiveCache {
    /// The shared, process-wide cache instance.
    pub fn global() -> &'static ArchiveCache {
        GLOBAL.get_or_init(|| ArchiveCache {
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Opens `path`, reusing a cached archive if one matching
    /// `last_modified` is already open, and increments its reference
    /// count.
    ///
    /// Pass `0` for `last_modified` to accept whatever is cached
    /// regardless of its recorded modification time.
    pub fn open_generic(
        &self,
        path: impl AsRef<Path>,
        last_modified: u64,
    ) -> Result<ArchiveHandle, Error> {
        let path = path.as_ref();
        if path.as_os_str().len() > PATH_MAX {
            return Err(Error::from(ErrorKind::PathTooLong));
        }
        let canonical = std::fs::canonicalize(path).map_err(Error::io)?;

        let mut registry = self.registry.lock().unwrap();
        if let Some(handle) = Self::reuse_slot(&mut registry, &canonical, last_modified)? {
            return Ok(handle);
        }
        drop(registry);

        log::debug!("opening archive for {}", canonical.display());
        let archive = Arc::new(Archive::open(&canonical)?);

        let mut registry = self.registry.lock().unwrap();
        // Another thread may have opened and inserted a matching slot for
        // this path while the lock above was dropped; re-check before
        // pushing, so two concurrent opens of the same path never produce
        // two distinct archives.
        if let Some(handle) = Self::reuse_slot(&mut registry, &canonical, last_modified)? {
            drop(registry);
            drop(archive);
            return Ok(handle);
        }
        registry
            .slots
            .entry(canonical.clone())
            .or_default()
            .push(CacheSlot {
                archive: Arc::clone(&archive),
                last_modified,
                refs: 1,
            });

        Ok(ArchiveHandle {
            path: canonical,
            archive,
            last_modified,
        })
    }

    /// Looks for a slot at `canonical` matching `last_modified` and, if
    /// found, bumps its reference count and returns a handle to it.
    /// A slot matches if its own stored modtime agrees with the request,
    /// or if the slot itself was cached with `0` ("don't care").
    fn reuse_slot(
        registry: &mut Registry,
        canonical: &Path,
        last_modified: u64,
    ) -> Result<Option<ArchiveHandle>, Error> {
        let Some(slots) = registry.slots.get_mut(canonical) else {
            return Ok(None);
        };
        let Some(slot) = slots
            .iter_mut()
            .find(|s| s.last_modified == last_modified || s.last_modified == 0)
        else {
            return Ok(None);
        };
        if slot.refs == u16::MAX {
            return Err(Error::misuse("archive reference count saturated"));
        }
        slot.refs += 1;
        log::debug!("reusing cached archive for {}", canonical.display());
        Ok(Some(ArchiveHandle {
            path: canonical.to_path_buf(),
            archive: Arc::clone(&slot.archive),
            last_modified: slot.last_modified,
        }))
    }

    /// Opens `path` without a staleness key; equivalent to
    /// `open_generic(path, 0)`.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<ArchiveHandle, Error> {
        self.open_generic(path, 0)
    }

    fn close(&self, handle: &ArchiveHandle) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(slots) = registry.slots.get_mut(&handle.path) {
            if let Some(idx) = slots
                .iter()
                .position(|s| Arc::ptr_eq(&s.archive, &handle.archive))
            {
                slots[idx].refs = slots[idx].refs.saturating_sub(1);
                if slots[idx].refs == 0 {
                    let removed = slots.swap_remove(idx);
                    log::debug!("closing archive for {}", handle.path.display());
                    drop(registry);
                    drop(removed);
                    return;
                }
            }
            if slots.is_empty() {
                registry.slots.remove(&handle.path);
            }
        }
    }
}

/// A reference-counted handle into the process-wide archive cache.
///
/// Dropping the last handle to a given archive removes it from the cache
/// and tears down its underlying file descriptor / mapping.
pub struct ArchiveHandle {
    path: PathBuf,
    archive: Arc<Archive<FileReader>>,
    last_modified: u64,
}

impl ArchiveHandle {
    pub fn archive(&self) -> &Archive<FileReader> {
        &self.archive
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }
}

impl Clone for ArchiveHandle {
    fn clone(&self) -> Self {
        let mut registry = ArchiveCache::global().registry.lock().unwrap();
        if let Some(slots) = registry.slots.get_mut(&self.path) {
            if let Some(slot) = slots.iter_mut().find(|s| Arc::ptr_eq(&s.archive, &self.archive)) {
                slot.refs = slot.refs.saturating_add(1);
            }
        }
        ArchiveHandle {
            path: self.path.clone(),
            archive: Arc::clone(&self.archive),
            last_modified: self.last_modified,
        }
    }
}

impl Drop for ArchiveHandle {
    fn drop(&mut self) {
        ArchiveCache::global().close(self);
    }
}
