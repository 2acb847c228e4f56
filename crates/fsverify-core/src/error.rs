//! Error taxonomy for test file operations.
//!
//! Only conditions the caller must act on become a [`VerifyError`]. Soft
//! outcomes (a name collision, a full device, a failed data sync, a file of
//! unexpected length) are absorbed by the operation and surface through its
//! report value instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// How a failure should be treated by whoever drives the stress run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecoverable: misconfiguration, permissions, broken lock, unexpected I/O error.
    Fatal,
    /// Expected under concurrent load; logged and absorbed.
    Tolerated,
    /// Stored bytes differ from the pattern oracle.
    Corruption,
}

/// The storage operation an `io::Error` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Create,
    Open,
    Write,
    Read,
    Sync,
    Remove,
}

impl std::fmt::Display for IoOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IoOp::Create => "create",
            IoOp::Open => "open",
            IoOp::Write => "write",
            IoOp::Read => "read",
            IoOp::Sync => "sync",
            IoOp::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Classify a raw I/O failure.
///
/// Tolerated combinations: `EEXIST` on exclusive create, `ENOSPC`/`EDQUOT` on write,
/// `ENOENT` on remove, and any failure of the data sync or close. Everything
/// else is fatal.
pub fn classify_io(op: IoOp, err: &io::Error) -> ErrorKind {
    let tolerated = match op {
        IoOp::Create => err.kind() == io::ErrorKind::AlreadyExists,
        IoOp::Write => crate::io::is_device_full(err),
        IoOp::Remove => err.kind() == io::ErrorKind::NotFound,
        IoOp::Sync => true,
        IoOp::Open | IoOp::Read => false,
    };
    if tolerated {
        ErrorKind::Tolerated
    } else {
        ErrorKind::Fatal
    }
}

/// Errors surfaced by test file and directory operations.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("lock for {name} is poisoned")]
    LockPoisoned { name: String },

    #[error("invalid file settings: {0}")]
    InvalidConfig(#[from] fsverify_config::ConfigError),

    #[error("OS random source unavailable: {reason}")]
    Entropy { reason: String },

    #[error("corruption in {} at offset {offset} ({mismatches} bytes differ)", .path.display())]
    Corruption {
        path: PathBuf,
        offset: u64,
        mismatches: u64,
    },
}

impl VerifyError {
    pub fn io(op: IoOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        VerifyError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VerifyError::Corruption { .. } => ErrorKind::Corruption,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_corruption(&self) -> bool {
        self.kind() == ErrorKind::Corruption
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
