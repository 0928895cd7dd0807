//! Locates the end-of-central-directory (EOCD) record by scanning backward
//! from the end of the archive.
//!
//! A zip file may carry an arbitrary comment after the EOCD record (up to
//! 0xFFFF bytes), and self-extracting archives prepend an arbitrary stub
//! before the local file data, so the EOCD is found by scanning backward
//! rather than assumed to sit at a fixed offset.

use crate::errors::{Error, ErrorKind};
use crate::reader_at::ReaderAt;
use crate::utils::le_u32;

/// Size of the end-of-central-directory record, fixed fields only (i.e.
/// excluding the trailing variable-length comment).
pub(crate) const END_HDR_SIZE: usize = 22;
pub(crate) const END_SIGNATURE: u32 = 0x0605_4b50;

/// Maximum size of the trailing archive comment, per the 16-bit comment
/// length field.
const MAX_COMMENT_SIZE: u64 = 0xFFFF;

/// Backward-scan block size. Small enough to keep a single stack buffer,
/// large enough that most archives (no comment, or a short one) are found
/// in a single read.
const READ_BLOCK_SIZE: usize = 128;

/// Fields parsed out of a located EOCD record, all offsets relative to the
/// start of the underlying byte source.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EndOfCentralDirectory {
    /// Absolute offset of the EOCD signature.
    pub end_pos: u64,
    /// Number of entries in the central directory, from this record.
    pub total_entries: u16,
    /// Size in bytes of the central directory.
    pub cen_size: u32,
    /// Offset of the start of the central directory, as recorded in the
    /// EOCD. This is relative to the start of the archive's own data,
    /// which may not be byte zero of the underlying file if a stub
    /// prefix is present - the caller reconciles the two using `end_pos`.
    pub cen_offset: u32,
    /// Length of the trailing comment.
    pub comment_len: u16,
}

/// Scans backward from the end of a byte source of length `len`, looking
/// for the EOCD signature, and returns the parsed record on success.
///
/// The search is bounded to the last `0xFFFF + END_HDR_SIZE` bytes of the
/// source, since a valid comment can be no longer than 0xFFFF bytes.
pub(crate) fn locate_end<R: ReaderAt>(reader: &R, len: u64) -> Result<EndOfCentralDirectory, Error> {
    if (len as usize) < END_HDR_SIZE {
        return Err(Error::from(ErrorKind::MissingEndOfCentralDirectory));
    }

    let min_pos = len.saturating_sub(MAX_COMMENT_SIZE + END_HDR_SIZE as u64);
    let mut block = [0u8; READ_BLOCK_SIZE];

    // `pos` marks the start of the current scan window. It may go negative
    // relative to the true file start if the archive is shorter than one
    // block; in that case the leading bytes of `block` are left at zero,
    // which can never match the signature, so the scan is still correct.
    let mut window_end = len as i64;
    loop {
        let pos = window_end - READ_BLOCK_SIZE as i64 + END_HDR_SIZE as i64 - 1;
        let pos = pos.max(min_pos as i64);
        if pos >= window_end {
            break;
        }

        block.fill(0);
        let read_len = (window_end - pos) as usize;
        let read_len = read_len.min(READ_BLOCK_SIZE);
        let buf_offset = READ_BLOCK_SIZE - read_len;
        reader
            .read_exact_at(&mut block[buf_offset..], pos as u64)
            .map_err(Error::io)?;

        // Scan this block from its end toward its start so that the
        // right-most (most plausible, closest to EOF) signature wins when
        // a crafted comment contains spurious signature bytes.
        let searchable = read_len.saturating_sub(END_HDR_SIZE - 4);
        for i in (0..searchable).rev() {
            let candidate = &block[buf_offset + i..];
            if candidate.len() < END_HDR_SIZE {
                continue;
            }
            if le_u32(candidate) != END_SIGNATURE {
                continue;
            }

            let end_pos = pos as u64 + i as u64;
            let comment_len = u16::from_le_bytes([candidate[20], candidate[21]]);
            if end_pos + END_HDR_SIZE as u64 + comment_len as u64 != len {
                continue;
            }

            return Ok(EndOfCentralDirectory {
                end_pos,
                total_entries: u16::from_le_bytes([candidate[10], candidate[11]]),
                cen_size: le_u32(&candidate[12..]),
                cen_offset: le_u32(&candidate[16..]),
                comment_len,
            });
        }

        if pos as u64 <= min_pos {
            break;
        }
        window_end = pos + END_HDR_SIZE as i64 - 1;
    }

    Err(Error::from(ErrorKind::MissingEndOfCentralDirectory))
}
