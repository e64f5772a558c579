//! Error taxonomy for the splicing engine and its FUSE boundary.

use std::fmt;
use std::io;

/// Result type used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the node dispatch layer and the splicing handle.
///
/// Only [`Error::NotFound`], [`Error::InvalidName`], [`Error::Stale`], and
/// [`Error::BackingIo`] ever cross the FUSE boundary as a failed reply; the
/// remaining variants are always logged and swallowed by the caller that
/// produces them (see the splicing handle's mirror and completion paths).
#[derive(Debug)]
pub enum Error {
    /// Lookup of a name absent in both SRC and DST.
    NotFound,
    /// A path component was empty, `.`/`..`, contained a separator, or
    /// exceeded the maximum name length.
    InvalidName,
    /// A FUSE inode number no longer resolves to a tracked path.
    Stale,
    /// Any I/O failure on an authoritative backing path (SRC when
    /// dual-backed, DST when single-backed). Propagated verbatim.
    BackingIo(io::Error),
    /// The opportunistic mirror write to DST during a read or write
    /// failed. Never propagated to the caller of read/write; logged and
    /// the interval set is left unchanged so the region is retried later.
    MirrorFailure(io::Error),
    /// Unlinking SRC after full coverage was observed failed. Logged; the
    /// handle remains dual-backed and retries on the next mirror event.
    CompletionUnlinkFailure(io::Error),
    /// `mkdir` succeeded against DST but failed against SRC, or vice
    /// versa, leaving the two trees asymmetric. Propagated; no rollback
    /// is attempted.
    PartialMkdirFailure(io::Error),
    /// The requested operation has no useful meaning for this filesystem
    /// (hard links, symlink/device-node creation, rename).
    NotSupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "no such file or directory"),
            Error::InvalidName => write!(f, "invalid path component"),
            Error::Stale => write!(f, "stale file handle"),
            Error::BackingIo(e) => write!(f, "backing I/O error: {e}"),
            Error::MirrorFailure(e) => write!(f, "mirror write failed: {e}"),
            Error::CompletionUnlinkFailure(e) => write!(f, "completion unlink failed: {e}"),
            Error::PartialMkdirFailure(e) => write!(f, "partial mkdir failure: {e}"),
            Error::NotSupported => write!(f, "operation not supported"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BackingIo(e)
            | Error::MirrorFailure(e)
            | Error::CompletionUnlinkFailure(e)
            | Error::PartialMkdirFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NotFound
        } else {
            Error::BackingIo(e)
        }
    }
}

impl Error {
    /// Map to the POSIX errno the FUSE adapter replies with.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::InvalidName => libc::EINVAL,
            Error::Stale => libc::ESTALE,
            Error::BackingIo(e) | Error::PartialMkdirFailure(e) => {
                e.raw_os_error().unwrap_or(libc::EIO)
            }
            Error::MirrorFailure(_) | Error::CompletionUnlinkFailure(_) => libc::EIO,
            Error::NotSupported => libc::ENOSYS,
        }
    }
}
