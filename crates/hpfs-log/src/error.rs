//! Error taxonomy shared by the audit log and the crates built on top of it.
//!
//! The reference implementation reports `-1`/`errno` from every fallible call; per the
//! target design this uses `Result` uniformly instead (see spec.md §9).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HpfsError {
    #[error("not found: {vpath}")]
    NotFound { vpath: String },

    #[error("already exists: {vpath}")]
    AlreadyExists { vpath: String },

    #[error("not a directory: {vpath}")]
    NotADirectory { vpath: String },

    #[error("directory not empty: {vpath}")]
    DirectoryNotEmpty { vpath: String },

    #[error("session is read-only")]
    ReadOnlySession,

    #[error("version mismatch: found {found:?}, expected {expected:?}")]
    VersionMismatch {
        found: (u16, u16, u16),
        expected: (u16, u16, u16),
    },

    #[error("corrupt log record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    #[error("invalid rename: {reason}")]
    InvalidRename { reason: String },

    #[error("record at offset {offset} is not the current first record")]
    NotFirstRecord { offset: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HpfsError {
    /// Renders the error as a raw negative-errno value, for the mount-adapter boundary
    /// (spec.md §1 puts the adapter itself out of scope, but it still needs an errno).
    pub fn as_errno(&self) -> i32 {
        match self {
            HpfsError::NotFound { .. } => -libc::ENOENT,
            HpfsError::AlreadyExists { .. } => -libc::EEXIST,
            HpfsError::NotADirectory { .. } => -libc::ENOTDIR,
            HpfsError::DirectoryNotEmpty { .. } => -libc::ENOTEMPTY,
            HpfsError::ReadOnlySession => -libc::EROFS,
            HpfsError::VersionMismatch { .. } => -libc::EINVAL,
            HpfsError::CorruptRecord { .. } => -libc::EIO,
            HpfsError::InvalidRename { .. } => -libc::EINVAL,
            HpfsError::NotFirstRecord { .. } => -libc::EINVAL,
            HpfsError::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<hpfs_hash::version::VersionError> for HpfsError {
    fn from(e: hpfs_hash::version::VersionError) -> Self {
        match e {
            hpfs_hash::version::VersionError::Mismatch { found, expected } => {
                HpfsError::VersionMismatch { found, expected }
            }
            hpfs_hash::version::VersionError::TooShort(_) => HpfsError::CorruptRecord {
                offset: 0,
                reason: "version prefix truncated".to_string(),
            },
        }
    }
}
