#[derive(Debug)]
pub struct Error {
    inner: ErrorInner,
}

impl Error {
    pub(crate) fn io(err: std::io::Error) -> Error {
        Error::from(ErrorKind::Io(err))
    }

    pub(crate) fn format(msg: &'static str) -> Error {
        Error::from(ErrorKind::Format(msg))
    }

    pub(crate) fn misuse(msg: &'static str) -> Error {
        Error::from(ErrorKind::Misuse(msg))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
}

/// The taxonomy of ways opening an archive or resolving an entry can fail.
///
/// Unlike the `errno`/`zip.msg` pairing this replaces, every variant that
/// carries a message borrows a `&'static str` rather than owning an
/// allocation, so there is nothing to free on any path, successful or not.
#[derive(Debug)]
pub enum ErrorKind {
    /// No end-of-central-directory record found within the trailing 64KiB.
    MissingEndOfCentralDirectory,
    /// Central or local header failed a structural check: bad signature,
    /// inconsistent offsets, a field outside this engine's supported range
    /// (e.g. Zip64), or truncated header bytes.
    Format(&'static str),
    /// Caller error: invalid argument, used a closed handle, path too long.
    Misuse(&'static str),
    /// The path supplied to `open` exceeds the platform's path length limit.
    PathTooLong,
    /// Decompressed or stored data disagreed with its CRC-32.
    InvalidChecksum { expected: u32, actual: u32 },
    /// Decompressed size disagreed with the entry's declared uncompressed size.
    InvalidSize { expected: u64, actual: u64 },
    Io(std::io::Error),
    Eof,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.inner.kind)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::MissingEndOfCentralDirectory => {
                write!(f, "missing end of central directory")
            }
            ErrorKind::Eof => write!(f, "unexpected end of file"),
            ErrorKind::Format(msg) => write!(f, "malformed archive: {}", msg),
            ErrorKind::Misuse(msg) => write!(f, "{}", msg),
            ErrorKind::PathTooLong => write!(f, "path exceeds maximum length"),
            ErrorKind::InvalidChecksum { expected, actual } => write!(
                f,
                "invalid checksum: expected 0x{:08x}, got 0x{:08x}",
                expected, actual
            ),
            ErrorKind::InvalidSize { expected, actual } => {
                write!(f, "invalid size: expected {}, got {}", expected, actual)
            }
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: ErrorInner { kind },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::io(err)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> ErrorKind {
        ErrorKind::Io(err)
    }
}
