//! Builds the in-memory index of a central directory: one `EntryCell` per
//! header plus a hash table for name lookups, by walking the directory
//! buffer once (or twice, if the end-of-central-directory record's entry
//! count turns out to have undercounted).

use crate::errors::{Error, ErrorKind};
use crate::utils::{le_u16, le_u32};

pub(crate) const CEN_SIGNATURE: u32 = 0x0201_4b50;
pub(crate) const CEN_HDR: usize = 46;

const CEN_FLG: usize = 8;
const CEN_HOW: usize = 10;
const CEN_TIM: usize = 12;
const CEN_CRC: usize = 16;
const CEN_SIZ: usize = 20;
const CEN_LEN: usize = 24;
const CEN_NAM: usize = 28;
const CEN_EXT: usize = 30;
const CEN_COM: usize = 32;
const CEN_ATX: usize = 38;
const CEN_OFF: usize = 42;

/// Marks the end of a hash bucket's chain, mirroring the sentinel used for
/// an entry with no predecessor/successor in its bucket.
pub(crate) const END_CHAIN: i64 = -1;

/// One parsed central directory header, enough to re-read and materialize
/// the full entry on demand without rescanning the directory buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryCell {
    /// Byte offset of this header within the directory buffer.
    pub cenpos: u32,
    /// Hash of the entry's name, computed while the header was still in
    /// hand so later lookups never need to re-derive it.
    pub hash: u32,
    /// Index of the next cell in this hash bucket's chain, or `END_CHAIN`.
    pub next: i64,
}

pub(crate) struct Index {
    pub entries: Vec<EntryCell>,
    pub table: Vec<i64>,
    /// Names of entries that case-insensitively begin with `META-INF/`,
    /// in directory order, for callers that need to enumerate a jar's
    /// manifest-adjacent entries without walking the whole archive.
    pub meta_names: Vec<Box<[u8]>>,
}

/// `true` if `name` case-insensitively begins with `META-INF/`.
fn is_meta_name(name: &[u8]) -> bool {
    const PREFIX: &[u8] = b"META-INF/";
    name.len() >= PREFIX.len() && name[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
}

/// Computes the multiplier-31 hash used to bucket entry names, treating
/// each byte as a signed value before accumulation. This reproduces the
/// historical platform-`char`-signedness behavior bit for bit, which
/// matters because the hash must agree with however a name was hashed
/// when the index was built.
pub(crate) fn hash_name(name: &[u8]) -> u32 {
    name.iter()
        .fold(0u32, |h, &b| h.wrapping_mul(31).wrapping_add((b as i8) as i32 as u32))
}

fn name_at<'a>(buf: &'a [u8], cenpos: usize) -> Result<&'a [u8], Error> {
    let name_len = le_u16(&buf[cenpos + CEN_NAM..]) as usize;
    let start = cenpos + CEN_HDR;
    let end = start
        .checked_add(name_len)
        .filter(|&e| e <= buf.len())
        .ok_or(Error::format("truncated entry name"))?;
    Ok(&buf[start..end])
}

fn header_len(buf: &[u8], pos: usize) -> Result<usize, Error> {
    if pos + CEN_HDR > buf.len() {
        return Err(Error::format("truncated central directory header"));
    }
    let header = &buf[pos..];
    if le_u32(header) != CEN_SIGNATURE {
        return Err(Error::format("bad central directory signature"));
    }
    let name_len = le_u16(&header[CEN_NAM..]) as usize;
    let extra_len = le_u16(&header[CEN_EXT..]) as usize;
    let comment_len = le_u16(&header[CEN_COM..]) as usize;
    let entry_len = CEN_HDR + name_len + extra_len + comment_len;
    if pos + entry_len > buf.len() {
        return Err(Error::format("central directory entry overruns buffer"));
    }
    Ok(entry_len)
}

/// Bounded linear walk over the directory buffer that counts headers
/// structurally, without building an index for them. Used to recover the
/// true entry count when the EOCD's 16-bit `ENDTOT` field undercounts an
/// archive with more than 65535 entries - the buffer itself, bounded by
/// `cenlen`, is the only trustworthy source of that count.
fn count_headers(buf: &[u8]) -> Result<usize, Error> {
    let mut pos = 0usize;
    let mut count = 0usize;
    while pos < buf.len() {
        pos += header_len(buf, pos)?;
        count += 1;
    }
    Ok(count)
}

/// Walks the directory buffer, validating each header against `hint_total`
/// entries declared by the end-of-central-directory record and building
/// the hash index used for lookups.
///
/// `ENDTOT` is a 16-bit field and is known to be unreliable for archives
/// with more than 65535 entries. If the walk exhausts `hint_total` headers
/// before the buffer itself is exhausted, the hint was wrong: this
/// recounts the true number of headers with a bounded structural walk
/// (`count_headers`) and restarts once with that count. A second
/// disagreement after the restart is a format error, not another retry.
pub(crate) fn build(buf: &[u8], hint_total: u16) -> Result<Index, Error> {
    build_with_total(buf, hint_total as usize, false)
}

fn build_with_total(buf: &[u8], total: usize, recounted: bool) -> Result<Index, Error> {
    let mut entries = Vec::with_capacity(total);
    let mut meta_names = Vec::with_capacity(2);
    let mut pos = 0usize;

    for _ in 0..total {
        let entry_len = header_len(buf, pos)?;
        let header = &buf[pos..];

        let flags = le_u16(&header[CEN_FLG..]);
        if flags & 0x1 != 0 {
            return Err(Error::format("encrypted entries are not supported"));
        }

        let method = le_u16(&header[CEN_HOW..]);
        if method != 0 && method != 8 {
            return Err(Error::format("unsupported compression method"));
        }

        let name = name_at(buf, pos)?;
        if is_meta_name(name) {
            meta_names.push(name.to_vec().into_boxed_slice());
        }
        entries.push(EntryCell {
            cenpos: pos as u32,
            hash: hash_name(name),
            next: END_CHAIN,
        });

        pos += entry_len;
    }

    if pos != buf.len() {
        if recounted {
            return Err(Error::format("entry count does not match directory record"));
        }
        let true_total = count_headers(buf)?;
        return build_with_total(buf, true_total, true);
    }

    let tablelen = ((total / 2) | 1).max(1);
    let mut table = vec![END_CHAIN; tablelen];
    for (i, cell) in entries.iter_mut().enumerate() {
        let bucket = (cell.hash as usize) % tablelen;
        cell.next = table[bucket];
        table[bucket] = i as i64;
    }

    Ok(Index {
        entries,
        table,
        meta_names,
    })
}

pub(crate) fn method(buf: &[u8], cenpos: u32) -> u16 {
    le_u16(&buf[cenpos as usize + CEN_HOW..])
}

pub(crate) fn dos_time(buf: &[u8], cenpos: u32) -> (u16, u16) {
    let raw = le_u32(&buf[cenpos as usize + CEN_TIM..]);
    ((raw >> 16) as u16, raw as u16)
}

pub(crate) fn crc32_field(buf: &[u8], cenpos: u32) -> u32 {
    le_u32(&buf[cenpos as usize + CEN_CRC..])
}

pub(crate) fn compressed_size(buf: &[u8], cenpos: u32) -> u32 {
    le_u32(&buf[cenpos as usize + CEN_SIZ..])
}

pub(crate) fn uncompressed_size(buf: &[u8], cenpos: u32) -> u32 {
    le_u32(&buf[cenpos as usize + CEN_LEN..])
}

pub(crate) fn external_attrs(buf: &[u8], cenpos: u32) -> u32 {
    le_u32(&buf[cenpos as usize + CEN_ATX..])
}

pub(crate) fn local_header_offset(buf: &[u8], cenpos: u32) -> u32 {
    le_u32(&buf[cenpos as usize + CEN_OFF..])
}

pub(crate) fn name<'a>(buf: &'a [u8], cenpos: u32) -> &'a [u8] {
    name_at(buf, cenpos as usize).expect("validated during build")
}

pub(crate) fn extra<'a>(buf: &'a [u8], cenpos: u32) -> &'a [u8] {
    let cenpos = cenpos as usize;
    let name_len = le_u16(&buf[cenpos + CEN_NAM..]) as usize;
    let extra_len = le_u16(&buf[cenpos + CEN_EXT..]) as usize;
    let start = cenpos + CEN_HDR + name_len;
    &buf[start..start + extra_len]
}

pub(crate) fn comment<'a>(buf: &'a [u8], cenpos: u32) -> &'a [u8] {
    let cenpos = cenpos as usize;
    let name_len = le_u16(&buf[cenpos + CEN_NAM..]) as usize;
    let extra_len = le_u16(&buf[cenpos + CEN_EXT..]) as usize;
    let comment_len = le_u16(&buf[cenpos + CEN_COM..]) as usize;
    let start = cenpos + CEN_HDR + name_len + extra_len;
    &buf[start..start + comment_len]
}
