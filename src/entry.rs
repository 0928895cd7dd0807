//! Materializes a central directory header into an owned, self-contained
//! `MaterializedEntry`, and tracks whether its data offset has been
//! resolved against the entry's local header yet.

use crate::index;
use crate::time::DosDateTime;

/// An entry's position within the archive's data region.
///
/// The central directory only records the offset of an entry's *local*
/// header; the actual compressed data begins after that header plus its
/// own (possibly different) name/extra field lengths, which are only
/// knowable by reading the local header. Resolving it is deferred until
/// the entry is actually read, since most callers that merely list or
/// look up entries never touch their bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryPos {
    /// Offset of the entry's local header, not yet resolved.
    Unresolved(u64),
    /// Absolute offset of the entry's compressed data.
    Resolved(u64),
}

/// A fully-parsed directory entry, independent of the archive's
/// underlying directory buffer.
#[derive(Debug, Clone)]
pub struct MaterializedEntry {
    pub(crate) cenpos: u32,
    name: Box<[u8]>,
    extra: Box<[u8]>,
    comment: Box<[u8]>,
    method: u16,
    crc32: u32,
    /// Actual on-disk byte count of this entry's data region, as recorded
    /// in the central directory header regardless of method. Used
    /// internally to bound reads; the public `compressed_size()` hides
    /// this for stored entries to match the historical "0 means stored"
    /// convention callers expect to see.
    raw_size: u64,
    uncompressed_size: u64,
    external_attrs: u32,
    dos_time: (u16, u16),
    pub(crate) pos: EntryPos,
}

impl MaterializedEntry {
    pub(crate) fn from_directory(buf: &[u8], cenpos: u32) -> Self {
        let local_header_offset = index::local_header_offset(buf, cenpos) as u64;
        MaterializedEntry {
            cenpos,
            name: index::name(buf, cenpos).to_vec().into_boxed_slice(),
            extra: index::extra(buf, cenpos).to_vec().into_boxed_slice(),
            comment: index::comment(buf, cenpos).to_vec().into_boxed_slice(),
            method: index::method(buf, cenpos),
            crc32: index::crc32_field(buf, cenpos),
            raw_size: index::compressed_size(buf, cenpos) as u64,
            uncompressed_size: index::uncompressed_size(buf, cenpos) as u64,
            external_attrs: index::external_attrs(buf, cenpos),
            dos_time: index::dos_time(buf, cenpos),
            pos: EntryPos::Unresolved(local_header_offset),
        }
    }

    /// The entry's name, exactly as stored (not normalized, may contain
    /// any byte sequence the archive's author chose).
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// The entry's name as UTF-8, if it is valid UTF-8.
    pub fn name_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.name)
    }

    pub fn extra_field(&self) -> &[u8] {
        &self.extra
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// `true` if the name ends in `/`, the convention this format uses to
    /// mark directory entries (there is no separate type tag).
    pub fn is_dir(&self) -> bool {
        self.name.last() == Some(&b'/')
    }

    /// Compression method: `0` for stored, `8` for deflate. Any other
    /// value is rejected before an entry with it can be read.
    pub fn method(&self) -> u16 {
        self.method
    }

    pub fn is_stored(&self) -> bool {
        self.method == 0
    }

    pub fn is_deflated(&self) -> bool {
        self.method == 8
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Compressed size of the entry, or `0` for a stored entry - `csize ==
    /// 0` is this format's historical signal that an entry is stored
    /// rather than compressed, independent of whatever byte count its
    /// header happens to carry.
    pub fn compressed_size(&self) -> u64 {
        if self.is_stored() {
            0
        } else {
            self.raw_size
        }
    }

    /// Actual number of bytes occupied by this entry's data on disk,
    /// regardless of method. Unlike `compressed_size`, never reports `0`
    /// for a stored entry with data.
    pub(crate) fn data_len(&self) -> u64 {
        self.raw_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn external_attrs(&self) -> u32 {
        self.external_attrs
    }

    pub fn modified(&self) -> DosDateTime {
        DosDateTime::new(self.dos_time.0, self.dos_time.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CEN_HDR;

    fn cen_header(name: &[u8], method: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&crate::index::CEN_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&method.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0xdead_beefu32.to_le_bytes());
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(&20u32.to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(name);
        assert_eq!(buf.len(), CEN_HDR + name.len());
        buf
    }

    #[test]
    fn materializes_basic_fields() {
        let buf = cen_header(b"hello.txt", 8);
        let entry = MaterializedEntry::from_directory(&buf, 0);
        assert_eq!(entry.name(), b"hello.txt");
        assert_eq!(entry.crc32(), 0xdead_beef);
        assert_eq!(entry.compressed_size(), 10);
        assert_eq!(entry.uncompressed_size(), 20);
        assert!(entry.is_deflated());
        assert!(!entry.is_dir());
        assert_eq!(entry.pos, EntryPos::Unresolved(100));
    }

    #[test]
    fn directory_entries_end_in_slash() {
        let buf = cen_header(b"a/dir/", 0);
        let entry = MaterializedEntry::from_directory(&buf, 0);
        assert!(entry.is_dir());
        assert!(entry.is_stored());
    }

    #[test]
    fn stored_entries_report_zero_compressed_size() {
        let buf = cen_header(b"hello.txt", 0);
        let entry = MaterializedEntry::from_directory(&buf, 0);
        assert_eq!(entry.compressed_size(), 0);
        assert_eq!(entry.data_len(), 10);
    }
}
