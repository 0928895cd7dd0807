//! An archive index and entry-access engine for zip and jar files.
//!
//! This crate is concerned with *finding* and *reading* entries in an
//! already-written archive: locating the end-of-central-directory
//! record (even behind a self-extracting stub or trailing comment),
//! parsing the central directory into a hash-indexed in-memory
//! structure, and reading an entry's data - stored or deflated - once
//! its local header has been resolved. It does not write or modify
//! archives, and does not support Zip64, encryption, or multi-disk
//! archives.
//!
//! [`ArchiveCache`] provides a process-wide, reference-counted cache of
//! open archives keyed by canonical path, mirroring how a long-running
//! process (a JVM repeatedly opening the same jar, say) avoids re-parsing
//! a directory it already has in memory. [`Archive`] can also be used
//! directly, without the cache, for one-off reads.
#![deny(unsafe_code)]

mod archive;
mod cache;
mod crc;
mod directory;
mod entry;
mod errors;
mod index;
mod locator;
mod reader_at;
mod time;
mod utils;

pub use archive::Archive;
pub use cache::{ArchiveCache, ArchiveHandle};
pub use crc::crc32;
pub use entry::MaterializedEntry;
pub use errors::{Error, ErrorKind};
pub use reader_at::{FileReader, MutexReader, ReaderAt};
pub use time::DosDateTime;
