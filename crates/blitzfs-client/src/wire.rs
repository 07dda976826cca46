//! Delimiter framing over the interactive channel.
//!
//! The server speaks over a PTY, so there is no length prefix or message
//! boundary to rely on. Every frame is found by scanning the byte stream
//! for a known delimiter.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of scanning for a delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delimited {
    /// The delimiter was seen; holds the bytes before it.
    Found(Vec<u8>),
    /// The stream ended first; holds everything read.
    Eof(Vec<u8>),
}

impl Delimited {
    /// Returns true if the delimiter was seen.
    pub fn is_found(&self) -> bool {
        matches!(self, Delimited::Found(_))
    }

    /// Bytes read, regardless of how the scan ended.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Delimited::Found(bytes) | Delimited::Eof(bytes) => bytes,
        }
    }

    /// Bytes read, or `None` if the stream ended before the delimiter.
    pub fn found(self) -> Option<Vec<u8>> {
        match self {
            Delimited::Found(bytes) => Some(bytes),
            Delimited::Eof(_) => None,
        }
    }
}

/// Read one byte at a time until `delimiter` has been consumed.
///
/// The delimiter itself is not part of the result. An empty delimiter
/// matches immediately without reading.
pub async fn read_until<R>(reader: &mut R, delimiter: &[u8]) -> std::io::Result<Delimited>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    if delimiter.is_empty() {
        return Ok(Delimited::Found(buf));
    }

    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte).await? == 0 {
            return Ok(Delimited::Eof(buf));
        }
        buf.push(byte[0]);
        // The tail of `buf` is the sliding window.
        if buf.ends_with(delimiter) {
            buf.truncate(buf.len() - delimiter.len());
            return Ok(Delimited::Found(buf));
        }
    }
}

/// Read a single `\n`-terminated line, without the terminator.
pub async fn read_line<R>(reader: &mut R) -> std::io::Result<Delimited>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_until(reader, b"\n").await
}
