//! Filesystem errors and their errno mapping.

use std::io;

use blitzfs_client::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    /// The server does not know the path, or reported it with a type we
    /// cannot mount.
    #[error("no such path: {0}")]
    NotFound(String),

    /// Read or release on a handle that was never issued or already freed.
    #[error("unknown file handle {0}")]
    BadHandle(u64),

    /// The blitz protocol has no command for this.
    #[error("{0} is not supported on a blitz mount")]
    Unsupported(&'static str),

    #[error("path is not valid UTF-8 or is malformed: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn unsupported(op: &'static str) -> Self {
        Self::Unsupported(op)
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// errno handed back to the kernel.
    pub fn to_errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) => libc::ENOENT,
            VfsError::BadHandle(_) => libc::EBADF,
            VfsError::Unsupported(_) => libc::ENOTSUP,
            VfsError::InvalidPath(_) => libc::EINVAL,
            VfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            VfsError::Protocol(_) | VfsError::Other(_) => libc::EIO,
        }
    }
}

impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        let kind = match &e {
            VfsError::NotFound(_) => io::ErrorKind::NotFound,
            VfsError::BadHandle(_) | VfsError::InvalidPath(_) => io::ErrorKind::InvalidInput,
            VfsError::Unsupported(_) => io::ErrorKind::Unsupported,
            VfsError::Io(_) | VfsError::Protocol(_) | VfsError::Other(_) => io::ErrorKind::Other,
        };
        match e {
            VfsError::Io(inner) => inner,
            other => io::Error::new(kind, other),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
