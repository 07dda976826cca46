//! Line protocol client for the blitz command shell.
//!
//! The server exposes three commands over an interactive shell channel:
//!
//! ```text
//! list <path>\r\n   ->  OK\n[\n]<entry>\n<entry>\n...>
//! get <path>\r\n    ->  OK\n[\n]File: <name>\nSize: <n>\n<n raw bytes>...>
//! stat <path>\r\n   ->  OK\n[\n]<TYPE> <SIZE> <NAME...>\n>
//! ```
//!
//! A body starting with `ERROR` replaces the structured content on failure.
//! The trailing `>` is the shell prompt and marks the end of every response.
//!
//! There are no request identifiers on the channel. A response must be read
//! through its prompt before the next command goes out, which is why every
//! command takes `&mut self`.

use std::fmt;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::constants::{ERROR_TOKEN, OK_TOKEN, PROMPT, REQUEST_TERMINATOR};
use crate::wire;

/// A single request on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    List(&'a str),
    Get(&'a str),
    Stat(&'a str),
}

impl Command<'_> {
    /// Wire verb for this command.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::List(_) => "list",
            Command::Get(_) => "get",
            Command::Stat(_) => "stat",
        }
    }

    /// Path argument.
    pub fn path(&self) -> &str {
        match self {
            Command::List(p) | Command::Get(p) | Command::Stat(p) => p,
        }
    }

    /// The request line as written to the channel, terminator included.
    pub fn to_line(&self) -> String {
        format!("{}{}", self, REQUEST_TERMINATOR)
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb(), self.path())
    }
}

/// Entry type reported by `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    /// A tag this client does not understand, kept verbatim.
    Other(String),
}

impl EntryKind {
    /// Parse a server type tag (`DIR`, `FILE`, ...).
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "DIR" => EntryKind::Directory,
            "FILE" => EntryKind::File,
            other => EntryKind::Other(other.to_string()),
        }
    }

    /// The tag as the server spells it.
    pub fn tag(&self) -> &str {
        match self {
            EntryKind::Directory => "DIR",
            EntryKind::File => "FILE",
            EntryKind::Other(tag) => tag,
        }
    }
}

/// Parsed `stat` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatResult {
    pub kind: EntryKind,
    pub size: u64,
    pub name: String,
}

/// Parsed `get` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    pub data: Vec<u8>,
}

/// Protocol-level failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The server answered with an `ERROR` body. Holds the raw text.
    #[error("{0}")]
    Remote(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("malformed stat line: {0}")]
    MalformedStat(String),

    /// The channel ended in the middle of a response.
    #[error("response truncated while reading {0}")]
    Truncated(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if the server itself reported the failure.
    pub fn is_remote(&self) -> bool {
        matches!(self, ProtocolError::Remote(_))
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Client for the blitz line protocol over any duplex byte stream.
pub struct ProtocolClient<S> {
    stream: BufReader<S>,
    closed: bool,
}

impl<S> ProtocolClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            closed: false,
        }
    }

    /// Block until the shell prints its first prompt.
    ///
    /// Returns whatever banner text preceded the prompt.
    pub async fn wait_for_prompt(&mut self) -> ProtocolResult<Vec<u8>> {
        wire::read_until(&mut self.stream, PROMPT)
            .await?
            .found()
            .ok_or(ProtocolError::Truncated("prompt"))
    }

    /// List a directory. Entries are raw server paths in server order.
    pub async fn list(&mut self, path: &str) -> ProtocolResult<Vec<String>> {
        self.begin(Command::List(path)).await?;

        let body = self.drain_prompt().await?;
        let body = String::from_utf8_lossy(&body);
        if body.trim_start().starts_with(ERROR_TOKEN) {
            return Err(ProtocolError::Remote(body.trim().to_string()));
        }

        Ok(parse_listing(&body))
    }

    /// Fetch a whole file.
    pub async fn get(&mut self, path: &str) -> ProtocolResult<RemoteFile> {
        self.begin(Command::Get(path.trim())).await?;

        let name_line = self.body_line().await?;
        if name_line.starts_with(ERROR_TOKEN) {
            self.drain_prompt().await?;
            return Err(ProtocolError::Remote(name_line));
        }
        let Some(name) = name_line.strip_prefix("File:") else {
            self.drain_prompt().await?;
            return Err(ProtocolError::MalformedHeader(name_line));
        };
        let name = name.trim().to_string();

        let size_line = self.line("size header").await?;
        let size = match size_line.strip_prefix("Size:") {
            Some(raw) => parse_size(raw.trim()),
            None => Err(ProtocolError::MalformedHeader(size_line.clone())),
        };
        let size = match size {
            Ok(size) => size,
            Err(e) => {
                self.drain_prompt().await?;
                return Err(e);
            }
        };

        let mut data = Vec::new();
        (&mut self.stream).take(size).read_to_end(&mut data).await?;
        if (data.len() as u64) < size {
            return Err(ProtocolError::Truncated("payload"));
        }

        self.drain_prompt().await?;
        tracing::trace!(path, size, "get complete");
        Ok(RemoteFile { name, size, data })
    }

    /// Query type and size of a path.
    pub async fn stat(&mut self, path: &str) -> ProtocolResult<StatResult> {
        self.begin(Command::Stat(path)).await?;

        let line = self.body_line().await?;
        self.drain_prompt().await?;

        parse_stat(&line)
    }

    /// Close the write side of the stream. Safe to call more than once.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.get_mut().shutdown().await
    }

    /// Returns true once `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send a command and consume the `OK` envelope line.
    async fn begin(&mut self, command: Command<'_>) -> ProtocolResult<()> {
        tracing::debug!(%command, "sending");
        let inner = self.stream.get_mut();
        inner.write_all(command.to_line().as_bytes()).await?;
        inner.flush().await?;

        // Anything before OK is PTY echo of the request line, which may
        // itself contain OK.
        let echo = command.to_string();
        let mut seen = Vec::new();
        loop {
            let before = wire::read_until(&mut self.stream, OK_TOKEN)
                .await?
                .found()
                .ok_or(ProtocolError::Truncated("OK token"))?;
            seen.extend_from_slice(&before);
            if !inside_echo(&seen, echo.as_bytes()) {
                break;
            }
            seen.extend_from_slice(OK_TOKEN);
        }
        if !wire::read_line(&mut self.stream).await?.is_found() {
            return Err(ProtocolError::Truncated("OK line"));
        }
        Ok(())
    }

    /// Read through the trailing prompt, returning what came before it.
    async fn drain_prompt(&mut self) -> ProtocolResult<Vec<u8>> {
        wire::read_until(&mut self.stream, PROMPT)
            .await?
            .found()
            .ok_or(ProtocolError::Truncated("prompt"))
    }

    /// Read one trimmed line.
    async fn line(&mut self, what: &'static str) -> ProtocolResult<String> {
        let line = wire::read_line(&mut self.stream)
            .await?
            .found()
            .ok_or(ProtocolError::Truncated(what))?;
        Ok(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// First body line, skipping the optional blank separator after `OK`.
    async fn body_line(&mut self) -> ProtocolResult<String> {
        let first = self.line("body").await?;
        if !first.is_empty() {
            return Ok(first);
        }
        self.line("body").await
    }
}

/// True if an `OK` right after `seen` would still be part of the echoed
/// request line.
fn inside_echo(seen: &[u8], echo: &[u8]) -> bool {
    let seen = seen.trim_ascii_start();
    let end = seen.len() + OK_TOKEN.len();
    end <= echo.len() && echo.starts_with(seen) && &echo[seen.len()..end] == OK_TOKEN
}

/// Split a `list` body into entries.
fn parse_listing(body: &str) -> Vec<String> {
    body.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Parse a `stat` body line: `<TYPE> <SIZE> <NAME...>`.
fn parse_stat(line: &str) -> ProtocolResult<StatResult> {
    let line = line.trim();
    if line.starts_with(ERROR_TOKEN) {
        return Err(ProtocolError::Remote(line.to_string()));
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(ProtocolError::MalformedStat(line.to_string()));
    }

    Ok(StatResult {
        kind: EntryKind::from_tag(tokens[0]),
        size: parse_size(tokens[1])?,
        name: tokens[2..].join(" "),
    })
}

/// Sizes are plain ASCII digits; no sign, no whitespace.
fn parse_size(raw: &str) -> ProtocolResult<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidSize(raw.to_string()));
    }
    raw.parse()
        .map_err(|_| ProtocolError::InvalidSize(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    /// Client wired to a server end that has already written `response`.
    async fn scripted(response: &[u8]) -> (ProtocolClient<DuplexStream>, DuplexStream) {
        let (client, mut server) = duplex(64 * 1024);
        server.write_all(response).await.unwrap();
        (ProtocolClient::new(client), server)
    }

    async fn request_line(server: &mut DuplexStream, expected: &str) {
        let mut buf = vec![0u8; expected.len()];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }

    #[test]
    fn test_command_line() {
        assert_eq!(Command::List("/").to_line(), "list /\r\n");
        assert_eq!(Command::Get("/a b").to_line(), "get /a b\r\n");
        assert_eq!(Command::Stat("/x").to_string(), "stat /x");
    }

    #[test]
    fn test_entry_kind_tags() {
        assert_eq!(EntryKind::from_tag("DIR"), EntryKind::Directory);
        assert_eq!(EntryKind::from_tag("FILE"), EntryKind::File);
        assert_eq!(EntryKind::from_tag("LINK").tag(), "LINK");
    }

    #[tokio::test]
    async fn test_list() {
        let (mut client, mut server) = scripted(b"OK\ne1\ne2\n>").await;
        let entries = client.list("/").await.unwrap();
        assert_eq!(entries, vec!["e1", "e2"]);
        request_line(&mut server, "list /\r\n").await;
    }

    #[tokio::test]
    async fn test_list_drops_blank_lines_and_keeps_order() {
        let (mut client, _server) = scripted(b"OK\r\n\r\n  zeta \r\n\r\nalpha\r\n>").await;
        let entries = client.list("/dir").await.unwrap();
        assert_eq!(entries, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_list_skips_echo_before_ok() {
        let (mut client, _server) = scripted(b"list /\r\nOK\r\n\r\n/a\r\n/b\r\n>").await;
        assert_eq!(client.list("/").await.unwrap(), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_echoed_path_containing_ok() {
        let (mut client, mut server) =
            scripted(b"stat /BOOK\r\nOK\r\n\r\nFILE 3 BOOK\r\n>").await;
        let stat = client.stat("/BOOK").await.unwrap();
        assert_eq!(stat.kind, EntryKind::File);
        assert_eq!(stat.size, 3);
        assert_eq!(stat.name, "BOOK");
        request_line(&mut server, "stat /BOOK\r\n").await;

        let (mut client, _server) = scripted(b"list /OK/OKAY\r\nOK\r\n/OK/OKAY/x\r\n>").await;
        assert_eq!(client.list("/OK/OKAY").await.unwrap(), vec!["/OK/OKAY/x"]);
    }

    #[tokio::test]
    async fn test_ok_path_without_echo() {
        let (mut client, _server) = scripted(b"OK\nDIR 0 OK\n>").await;
        let stat = client.stat("/OK").await.unwrap();
        assert_eq!(stat.kind, EntryKind::Directory);
        assert_eq!(stat.name, "OK");
    }

    #[test]
    fn test_inside_echo() {
        assert!(inside_echo(b"stat /BO", b"stat /BOOK"));
        assert!(inside_echo(b"\r\nstat /BO", b"stat /BOOK"));
        assert!(!inside_echo(b"stat /BOOK\r\n", b"stat /BOOK"));
        assert!(!inside_echo(b"", b"stat /BOOK"));
        assert!(!inside_echo(b"stat /B", b"stat /BOOK"));
    }

    #[tokio::test]
    async fn test_get() {
        let (mut client, mut server) = scripted(b"OK\nFile: f\nSize: 5\nhello>").await;
        let file = client.get("/f").await.unwrap();
        assert_eq!(file.name, "f");
        assert_eq!(file.size, 5);
        assert_eq!(file.data, b"hello");
        request_line(&mut server, "get /f\r\n").await;
    }

    #[tokio::test]
    async fn test_get_with_blank_separator_and_binary_payload() {
        let mut response = b"OK\n\nFile: bin\nSize: 4\n".to_vec();
        response.extend_from_slice(&[0x00, b'>', b'\n', 0xff]);
        response.extend_from_slice(b"\n>");
        let (mut client, _server) = scripted(&response).await;

        let file = client.get("/bin").await.unwrap();
        assert_eq!(file.data, vec![0x00, b'>', b'\n', 0xff]);
    }

    #[tokio::test]
    async fn test_get_rejects_missing_headers() {
        let (mut client, _server) = scripted(b"OK\nName: f\nSize: 5\nhello>").await;
        let err = client.get("/f").await.unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));

        let (mut client, _server) = scripted(b"OK\nFile: f\nLength: 5\nhello>").await;
        let err = client.get("/f").await.unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));
    }

    #[tokio::test]
    async fn test_get_rejects_non_numeric_size() {
        let (mut client, _server) = scripted(b"OK\nFile: f\nSize: 5k\n>").await;
        let err = client.get("/f").await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSize(ref s) if s == "5k"));
    }

    #[tokio::test]
    async fn test_get_truncated_payload() {
        let (client_end, mut server) = duplex(1024);
        server.write_all(b"OK\nFile: f\nSize: 10\nshort").await.unwrap();
        server.shutdown().await.unwrap();

        let mut client = ProtocolClient::new(client_end);
        let err = client.get("/f").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated("payload")));
    }

    #[tokio::test]
    async fn test_stat() {
        let (mut client, _server) = scripted(b"OK\nFILE 123 f\n>").await;
        let stat = client.stat("/f").await.unwrap();
        assert_eq!(stat.kind.tag(), "FILE");
        assert_eq!(stat.size, 123);
        assert_eq!(stat.name, "f");

        let (mut client, _server) = scripted(b"OK\n\nDIR 36 /\n>").await;
        let stat = client.stat("/").await.unwrap();
        assert_eq!(stat, StatResult { kind: EntryKind::Directory, size: 36, name: "/".into() });
    }

    #[tokio::test]
    async fn test_stat_name_with_spaces() {
        let (mut client, _server) = scripted(b"OK\nFILE 7 my  holiday notes.txt\n>").await;
        let stat = client.stat("/my holiday notes.txt").await.unwrap();
        assert_eq!(stat.name, "my holiday notes.txt");
    }

    #[tokio::test]
    async fn test_stat_rejects_bad_lines() {
        let (mut client, _server) = scripted(b"OK\nFILE\n>").await;
        assert!(matches!(
            client.stat("/f").await.unwrap_err(),
            ProtocolError::MalformedStat(_)
        ));

        let (mut client, _server) = scripted(b"OK\nFILE big f\n>").await;
        assert!(matches!(
            client.stat("/f").await.unwrap_err(),
            ProtocolError::InvalidSize(_)
        ));
    }

    #[tokio::test]
    async fn test_error_body_for_every_command() {
        let (mut client, _server) = scripted(b"OK\nERROR no such dir\n>").await;
        let err = client.list("/nope").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Remote(ref t) if t == "ERROR no such dir"));

        let (mut client, _server) = scripted(b"OK\nERROR no such file\n>").await;
        let err = client.get("/nope").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Remote(ref t) if t == "ERROR no such file"));

        let (mut client, _server) = scripted(b"OK\n\nERROR stat failed\n>").await;
        let err = client.stat("/nope").await.unwrap_err();
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "ERROR stat failed");
    }

    #[tokio::test]
    async fn test_error_response_is_drained() {
        // The second response must parse cleanly after the first failed.
        let (mut client, _server) =
            scripted(b"OK\nERROR nope\n>OK\nFile: ok\nSize: 2\nhi>").await;
        assert!(client.get("/missing").await.is_err());
        let file = client.get("/ok").await.unwrap();
        assert_eq!(file.data, b"hi");
    }

    #[tokio::test]
    async fn test_sequential_commands_stay_in_sync() {
        let (mut client, _server) =
            scripted(b"OK\n/a\n/b\n>OK\nDIR 0 a\n>OK\nFile: b\nSize: 1\nx\r\n>").await;
        assert_eq!(client.list("/").await.unwrap(), vec!["/a", "/b"]);
        assert_eq!(client.stat("/a").await.unwrap().kind, EntryKind::Directory);
        assert_eq!(client.get("/b").await.unwrap().data, b"x");
    }

    #[tokio::test]
    async fn test_wait_for_prompt_and_shutdown() {
        let (mut client, _server) = scripted(b"Welcome to blitz\r\n>").await;
        let banner = client.wait_for_prompt().await.unwrap();
        assert_eq!(banner, b"Welcome to blitz\r\n");

        client.shutdown().await.unwrap();
        client.shutdown().await.unwrap();
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_closed_channel_before_ok() {
        let (client_end, server) = duplex(64);
        drop(server);
        let mut client = ProtocolClient::new(client_end);
        assert!(client.stat("/").await.is_err());
    }
}
