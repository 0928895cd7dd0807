//! The archive handle: lookup engine, MRU entry cache, and entry data
//! reader, built on top of the directory buffer and index.

use std::path::Path;
use std::sync::Mutex;

use crate::directory::DirectoryBuffer;
use crate::entry::{EntryPos, MaterializedEntry};
use crate::errors::{Error, ErrorKind};
use crate::index::{self, Index};
use crate::locator;
use crate::reader_at::{FileReader, ReaderAt};
use crate::utils::le_u16;

const LOC_SIGNATURE: u32 = 0x0403_4b50;
const LOC_HDR: usize = 30;
const LOC_NAM: usize = 26;
const LOC_EXT: usize = 28;

/// Mutable, lock-guarded state of an open archive: the single-slot MRU
/// entry cache. Kept separate from the archive's immutable index so that
/// lookups that hit the cache, and lookups that don't, both only ever
/// hold this lock for O(1) work.
struct ArchiveMut {
    mru: Option<MaterializedEntry>,
}

/// An open zip/jar archive: an immutable index over a directory buffer,
/// plus a small amount of mutable cache state.
///
/// Reads never seek, so a single handle is already safe to share across
/// threads behind an `Arc` without any reader-side synchronization beyond
/// what `R` itself provides.
pub struct Archive<R> {
    reader: R,
    directory: DirectoryBuffer,
    index: Index,
    /// Absolute offset of the first byte of this archive's own data,
    /// i.e. the length of any stub prefix. Offsets recorded in central
    /// directory headers are relative to this, not to byte zero of the
    /// underlying reader.
    base_offset: u64,
    len: u64,
    state: Mutex<ArchiveMut>,
}

impl<R: ReaderAt> Archive<R> {
    /// Builds an archive over any byte source, loading the central
    /// directory into a heap buffer.
    pub fn from_reader(reader: R, len: u64) -> Result<Self, Error> {
        let eocd = locator::locate_end(&reader, len)?;
        let cen_size = eocd.cen_size as u64;
        let cen_start_observed = eocd
            .end_pos
            .checked_sub(cen_size)
            .ok_or_else(|| Error::format("central directory size exceeds end position"))?;
        let base_offset = cen_start_observed
            .checked_sub(eocd.cen_offset as u64)
            .ok_or_else(|| Error::format("central directory offset precedes archive start"))?;

        let directory = DirectoryBuffer::load_heap(&reader, cen_start_observed, cen_size as usize)?;
        let index = index::build(directory.as_bytes(), eocd.total_entries)?;

        Ok(Archive {
            reader,
            directory,
            index,
            base_offset,
            len,
            state: Mutex::new(ArchiveMut { mru: None }),
        })
    }

    /// Number of entries in the archive.
    pub fn len(&self) -> usize {
        self.index.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.entries.is_empty()
    }

    /// Names of entries that case-insensitively begin with `META-INF/`,
    /// in directory order. Populated once, during index build, so
    /// enumerating a jar's manifest-adjacent entries never requires a
    /// full scan of the archive.
    pub fn meta_names(&self) -> impl Iterator<Item = &[u8]> {
        self.index.meta_names.iter().map(|n| n.as_ref())
    }

    /// Looks up an entry by exact name. If the name does not already end
    /// in `/` and the first probe misses, retries once with a trailing
    /// slash appended, so `"a/b"` resolves to a directory entry stored as
    /// `"a/b/"`.
    pub fn get_entry(&self, name: &[u8]) -> Option<MaterializedEntry> {
        if let Some(entry) = self.probe(name) {
            return Some(entry);
        }
        if name.last() == Some(&b'/') {
            return None;
        }
        let mut retry = Vec::with_capacity(name.len() + 1);
        retry.extend_from_slice(name);
        retry.push(b'/');
        self.probe(&retry)
    }

    /// Looks up an entry by exact name with no slash-retry fallback.
    pub fn find_entry(&self, name: &[u8]) -> Option<MaterializedEntry> {
        self.probe(name)
    }

    fn probe(&self, name: &[u8]) -> Option<MaterializedEntry> {
        let hash = index::hash_name(name);
        let tablelen = self.index.table.len();
        let bucket = (hash as usize) % tablelen;
        let mut idx = self.index.table[bucket];

        while idx != index::END_CHAIN {
            let cell = self.index.entries[idx as usize];
            if cell.hash == hash {
                let candidate = index::name(self.directory.as_bytes(), cell.cenpos);
                if candidate == name {
                    return Some(self.materialize(idx as usize));
                }
            }
            idx = cell.next;
        }

        None
    }

    /// Returns the `n`th entry in directory order, the equivalent of
    /// iterating the archive without knowing any names in advance.
    pub fn nth_entry(&self, n: usize) -> Option<MaterializedEntry> {
        if n >= self.index.entries.len() {
            return None;
        }
        Some(self.materialize(n))
    }

    fn materialize(&self, idx: usize) -> MaterializedEntry {
        let cenpos = self.index.entries[idx].cenpos;

        let mut guard = self.state.lock().unwrap();
        if let Some(cached) = &guard.mru {
            if cached.cenpos == cenpos {
                return cached.clone();
            }
        }
        // Build outside the lock is not possible here since `directory`
        // is immutable and borrow-free to read; only the MRU slot itself
        // needs the lock, and it is held for exactly as long as the swap.
        let fresh = MaterializedEntry::from_directory(self.directory.as_bytes(), cenpos);
        let stale = guard.mru.replace(fresh.clone());
        drop(guard);
        drop(stale);
        fresh
    }

    /// Resolves an entry's data offset against its local header, if it
    /// has not already been resolved, and returns the absolute offset.
    fn resolve(&self, entry: &mut MaterializedEntry) -> Result<u64, Error> {
        match entry.pos {
            EntryPos::Resolved(pos) => Ok(pos),
            EntryPos::Unresolved(loc_offset) => {
                let abs_loc = self.base_offset + loc_offset;
                let mut header = [0u8; LOC_HDR];
                self.reader
                    .read_exact_at(&mut header, abs_loc)
                    .map_err(Error::io)?;

                if crate::utils::le_u32(&header) != LOC_SIGNATURE {
                    return Err(Error::format("bad local file header signature"));
                }

                let name_len = le_u16(&header[LOC_NAM..]) as u64;
                let extra_len = le_u16(&header[LOC_EXT..]) as u64;
                let data_pos = abs_loc + LOC_HDR as u64 + name_len + extra_len;

                if data_pos > self.len {
                    return Err(Error::format("entry data starts past end of archive"));
                }

                entry.pos = EntryPos::Resolved(data_pos);
                Ok(data_pos)
            }
        }
    }

    /// Reads raw (still-compressed, if applicable) bytes of an entry's
    /// data at `offset` from the start of that entry's data region.
    /// `offset >= entry`'s data length is a caller error, not an
    /// end-of-data signal: it returns `Err`, not `Ok(0)`.
    pub fn read_entry_at(
        &self,
        entry: &mut MaterializedEntry,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let data_start = self.resolve(entry)?;
        if offset >= entry.data_len() {
            return Err(Error::misuse("specified offset out of range"));
        }
        let remaining = entry.data_len() - offset;
        let want = (buf.len() as u64).min(remaining) as usize;
        self.reader
            .read_at(&mut buf[..want], data_start + offset)
            .map_err(Error::io)
    }

    /// Reads an entry fully into memory, decompressing it if necessary,
    /// and validates the result's length and CRC-32 against the central
    /// directory record.
    pub fn read_entry_fully(&self, entry: &mut MaterializedEntry) -> Result<Vec<u8>, Error> {
        let data = if entry.is_stored() {
            self.read_stored(entry)?
        } else if entry.is_deflated() {
            self.inflate_entry(entry)?
        } else {
            return Err(Error::format("unsupported compression method"));
        };

        if data.len() as u64 != entry.uncompressed_size() {
            return Err(Error::from(ErrorKind::InvalidSize {
                expected: entry.uncompressed_size(),
                actual: data.len() as u64,
            }));
        }

        let actual_crc = crate::crc::crc32(&data);
        if actual_crc != entry.crc32() {
            return Err(Error::from(ErrorKind::InvalidChecksum {
                expected: entry.crc32(),
                actual: actual_crc,
            }));
        }

        Ok(data)
    }

    /// Decompresses a deflated entry's full contents. Unlike
    /// `read_entry_fully`, this does not dispatch on method: calling it on
    /// a stored entry is a caller error, not silently serviced.
    pub fn inflate_fully(&self, entry: &mut MaterializedEntry) -> Result<Vec<u8>, Error> {
        if !entry.is_deflated() {
            return Err(Error::misuse("inflateFully: entry not compressed"));
        }
        self.inflate_entry(entry)
    }

    fn read_stored(&self, entry: &mut MaterializedEntry) -> Result<Vec<u8>, Error> {
        let data_start = self.resolve(entry)?;
        let mut buf = vec![0u8; entry.uncompressed_size() as usize];
        self.reader
            .read_exact_at(&mut buf, data_start)
            .map_err(Error::io)?;
        Ok(buf)
    }

    /// Streams an entry's compressed bytes through a raw-deflate decoder
    /// in small chunks, rather than reading the whole compressed region
    /// up front. This keeps peak memory bounded by the chunk size rather
    /// than the compressed size, and means the archive's reader is only
    /// ever touched for small, sequential reads even for very large
    /// entries.
    fn inflate_entry(&self, entry: &mut MaterializedEntry) -> Result<Vec<u8>, Error> {
        const CHUNK: usize = 4096;

        let data_start = self.resolve(entry)?;
        let mut decompressor = flate2::Decompress::new(false);
        let mut input = [0u8; CHUNK];
        let mut output = Vec::with_capacity(entry.uncompressed_size() as usize);
        let mut read_pos = 0u64;
        let compressed_len = entry.data_len();

        while decompressor.total_out() < entry.uncompressed_size() {
            if read_pos >= compressed_len {
                return Err(Error::from(ErrorKind::Eof));
            }

            let want = (compressed_len - read_pos).min(CHUNK as u64) as usize;
            self.reader
                .read_exact_at(&mut input[..want], data_start + read_pos)
                .map_err(Error::io)?;
            read_pos += want as u64;

            decompressor
                .decompress_vec(&input[..want], &mut output, flate2::FlushDecompress::None)
                .map_err(|_| Error::format("invalid deflate stream"))?;
        }

        if decompressor.total_out() != entry.uncompressed_size() {
            return Err(Error::from(ErrorKind::InvalidSize {
                expected: entry.uncompressed_size(),
                actual: decompressor.total_out(),
            }));
        }

        Ok(output)
    }
}

impl Archive<FileReader> {
    /// Opens a file, loading the full central directory into a heap
    /// buffer.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = std::fs::File::open(path).map_err(Error::io)?;
        let len = file.metadata().map_err(Error::io)?.len();
        Archive::from_reader(FileReader::from(file), len)
    }

    /// Opens a file, mapping the central directory into memory instead of
    /// copying it. Worth it for archives with very large directories
    /// opened once and queried many times; for small archives the extra
    /// `mmap` syscall and page-fault overhead usually loses to a single
    /// `pread`.
    pub fn open_mapped(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = std::fs::File::open(path).map_err(Error::io)?;
        let len = file.metadata().map_err(Error::io)?.len();
        let reader = FileReader::from(file.try_clone().map_err(Error::io)?);

        let eocd = locator::locate_end(&reader, len)?;
        let cen_size = eocd.cen_size as u64;
        let cen_start_observed = eocd
            .end_pos
            .checked_sub(cen_size)
            .ok_or_else(|| Error::format("central directory size exceeds end position"))?;
        let base_offset = cen_start_observed
            .checked_sub(eocd.cen_offset as u64)
            .ok_or_else(|| Error::format("central directory offset precedes archive start"))?;

        let directory = DirectoryBuffer::load_mapped(&file, cen_start_observed, cen_size as usize)?;
        let index = index::build(directory.as_bytes(), eocd.total_entries)?;

        Ok(Archive {
            reader,
            directory,
            index,
            base_offset,
            len,
            state: Mutex::new(ArchiveMut { mru: None }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_test_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cen = Vec::new();

        for (name, data) in entries {
            let local_offset = out.len() as u32;
            let crc = crate::crc::crc32(data);

            out.extend_from_slice(&LOC_SIGNATURE.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // version
            out.extend_from_slice(&0u16.to_le_bytes()); // flags
            out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
            out.extend_from_slice(&0u32.to_le_bytes()); // time+date
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // extra len
            out.extend_from_slice(name.as_bytes());
            out.write_all(data).unwrap();

            cen.extend_from_slice(&crate::index::CEN_SIGNATURE.to_le_bytes());
            cen.extend_from_slice(&0u16.to_le_bytes());
            cen.extend_from_slice(&0u16.to_le_bytes());
            cen.extend_from_slice(&0u16.to_le_bytes());
            cen.extend_from_slice(&0u16.to_le_bytes()); // method: stored
            cen.extend_from_slice(&0u32.to_le_bytes());
            cen.extend_from_slice(&crc.to_le_bytes());
            cen.extend_from_slice(&(data.len() as u32).to_le_bytes());
            cen.extend_from_slice(&(data.len() as u32).to_le_bytes());
            cen.extend_from_slice(&(name.len() as u16).to_le_bytes());
            cen.extend_from_slice(&0u16.to_le_bytes());
            cen.extend_from_slice(&0u16.to_le_bytes());
            cen.extend_from_slice(&0u16.to_le_bytes());
            cen.extend_from_slice(&0u16.to_le_bytes());
            cen.extend_from_slice(&0u32.to_le_bytes());
            cen.extend_from_slice(&local_offset.to_le_bytes());
            cen.extend_from_slice(name.as_bytes());
        }

        let cen_offset = out.len() as u32;
        let cen_size = cen.len() as u32;
        out.extend_from_slice(&cen);

        out.extend_from_slice(&locator::END_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&cen_size.to_le_bytes());
        out.extend_from_slice(&cen_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        out
    }

    #[test]
    fn finds_entry_by_name() {
        let bytes = build_test_archive(&[("hello.txt", b"hello world")]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        let mut entry = archive.get_entry(b"hello.txt").expect("entry present");
        let data = archive.read_entry_fully(&mut entry).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn missing_entry_is_none() {
        let bytes = build_test_archive(&[("hello.txt", b"hello world")]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        assert!(archive.get_entry(b"missing.txt").is_none());
    }

    #[test]
    fn slash_retry_resolves_directory_entries() {
        let bytes = build_test_archive(&[("a/dir/", b"")]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        assert!(archive.get_entry(b"a/dir").is_some());
    }

    #[test]
    fn stub_prefix_is_skipped() {
        let mut bytes = vec![0x4du8, 0x5a, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00];
        bytes.extend(build_test_archive(&[("hello.txt", b"hello world")]));
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        let mut entry = archive.get_entry(b"hello.txt").expect("entry present");
        let data = archive.read_entry_fully(&mut entry).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn nth_entry_iterates_in_directory_order() {
        let bytes = build_test_archive(&[("a.txt", b"a"), ("b.txt", b"bb")]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.nth_entry(0).unwrap().name(), b"a.txt");
        assert_eq!(archive.nth_entry(1).unwrap().name(), b"b.txt");
        assert!(archive.nth_entry(2).is_none());
    }

    #[test]
    fn meta_names_collects_manifest_entries_case_insensitively() {
        let bytes = build_test_archive(&[
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
            ("meta-inf/services/x", b""),
            ("com/example/Main.class", b""),
        ]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        let names: Vec<&[u8]> = archive.meta_names().collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&b"META-INF/MANIFEST.MF".as_slice()));
        assert!(names.contains(&b"meta-inf/services/x".as_slice()));
    }

    #[test]
    fn mru_cache_returns_equivalent_entry_on_repeat_lookup() {
        let bytes = build_test_archive(&[("hello.txt", b"hello world")]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        let first = archive.get_entry(b"hello.txt").unwrap();
        let second = archive.get_entry(b"hello.txt").unwrap();
        assert_eq!(first.name(), second.name());
        assert_eq!(first.crc32(), second.crc32());
    }

    #[test]
    fn read_entry_at_rejects_out_of_range_offset() {
        let bytes = build_test_archive(&[("hello.txt", b"hello world")]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        let mut entry = archive.get_entry(b"hello.txt").expect("entry present");
        let mut buf = [0u8; 4];

        assert_eq!(archive.read_entry_at(&mut entry, 0, &mut buf).unwrap(), 4);

        let err = archive.read_entry_at(&mut entry, entry.data_len(), &mut buf).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Misuse(_)));
    }

    #[test]
    fn inflate_fully_rejects_stored_entries() {
        let bytes = build_test_archive(&[("hello.txt", b"hello world")]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        let mut entry = archive.get_entry(b"hello.txt").expect("entry present");
        let err = archive.inflate_fully(&mut entry).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Misuse(_)));
        assert_eq!(err.to_string(), "inflateFully: entry not compressed");
    }

    #[test]
    fn entry_position_resolves_once_and_stays_resolved() {
        let bytes = build_test_archive(&[("hello.txt", b"hello world")]);
        let archive = Archive::from_reader(bytes.clone(), bytes.len() as u64).unwrap();
        let mut entry = archive.get_entry(b"hello.txt").expect("entry present");
        assert!(matches!(entry.pos, EntryPos::Unresolved(_)));

        let first = archive.resolve(&mut entry).unwrap();
        assert!(matches!(entry.pos, EntryPos::Resolved(pos) if pos == first));

        let second = archive.resolve(&mut entry).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn open_mapped_reads_entries_from_a_real_file() {
        let dir = std::env::temp_dir().join(format!("zipdex-archive-mapped-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mapped.zip");
        std::fs::write(&path, build_test_archive(&[("hello.txt", b"hello world")])).unwrap();

        let archive = Archive::open_mapped(&path).unwrap();
        let mut entry = archive.get_entry(b"hello.txt").expect("entry present");
        let data = archive.read_entry_fully(&mut entry).unwrap();
        assert_eq!(data, b"hello world");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
