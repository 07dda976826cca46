//! blitzfs client library
//!
//! Speaks the blitz line protocol (`list`, `get`, `stat`) over an
//! interactive SSH shell channel. The protocol client is generic over any
//! duplex byte stream so it can be driven from in-memory streams in tests.

pub mod constants;
pub mod protocol;
pub mod ssh;
pub mod wire;

use russh::ChannelStream;
use russh::client::Msg;

pub use protocol::{
    Command, EntryKind, ProtocolClient, ProtocolError, ProtocolResult, RemoteFile, StatResult,
};
pub use ssh::{KeySource, PassphrasePrompt, SshClient, SshConfig, SshError};
pub use wire::{Delimited, read_until};

/// Protocol client over a live SSH shell channel.
pub type ShellClient = ProtocolClient<ChannelStream<Msg>>;

/// An established session: the transport plus the protocol client that owns
/// the shell stream.
pub struct Connection {
    pub transport: SshClient,
    pub client: ShellClient,
}

/// Connect to a blitz server and wait for its first prompt.
///
/// This is the main entry point for mounting. Any failure here is fatal;
/// nothing is retried.
pub async fn connect_ssh(
    config: SshConfig,
    prompt: &PassphrasePrompt,
) -> Result<Connection, ConnectError> {
    let mut transport = SshClient::new(config);
    let stream = transport.connect(prompt).await?;

    let mut client = ProtocolClient::new(stream);
    let banner = client.wait_for_prompt().await?;
    if !banner.is_empty() {
        tracing::debug!(banner = %String::from_utf8_lossy(&banner).trim(), "shell banner");
    }

    Ok(Connection { transport, client })
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("SSH error: {0}")]
    Ssh(#[from] SshError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
