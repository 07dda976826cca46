//! SSH transport for the blitz command shell
//!
//! Uses russh for SSH transport with public-key authentication, either from
//! an identity file or from the SSH agent. The server is reached through a
//! single interactive session channel:
//! - a PTY is requested and a shell invoked
//! - the channel is exposed as one duplex byte stream
//! - the first `>` prompt signals that the shell is ready for commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::{self, Config, Handle, Msg};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelStream, Disconnect};

use crate::constants::{
    DEFAULT_SSH_HOST, DEFAULT_SSH_PORT, DEFAULT_SSH_USER, PTY_COLUMNS, PTY_ROWS, PTY_TERM,
    SSH_INACTIVITY_TIMEOUT, SSH_KEEPALIVE_INTERVAL, SSH_KEEPALIVE_MAX,
};

/// Where the client key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// OpenSSH private key file, possibly passphrase protected.
    File(PathBuf),
    /// Keys held by the running SSH agent.
    Agent,
}

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_source: KeySource,
    /// Expected SHA-256 host key fingerprint (`SHA256:...`). Any key is
    /// accepted when unset.
    pub host_fingerprint: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SSH_HOST.into(),
            port: DEFAULT_SSH_PORT,
            username: DEFAULT_SSH_USER.into(),
            key_source: KeySource::Agent,
            host_fingerprint: None,
        }
    }
}

/// Asks the user for the passphrase of an encrypted identity file.
///
/// Returning `None` aborts authentication.
pub type PassphrasePrompt = dyn Fn(&Path) -> Option<String> + Send + Sync;

/// Client handler for russh - handles server key verification
pub struct ClientHandler {
    expected_fingerprint: Option<String>,
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        log::info!("Server key fingerprint: {}", fingerprint);

        match &self.expected_fingerprint {
            Some(expected) if expected != &fingerprint => {
                return Err(SshError::HostKeyMismatch {
                    expected: expected.clone(),
                    actual: fingerprint,
                });
            }
            Some(_) => {}
            None => {
                log::warn!("Accepting server key without verification: {}", fingerprint);
            }
        }

        Ok(true)
    }
}

/// SSH client wrapper
///
/// Owns the transport. The shell channel is handed out as a stream by
/// [`SshClient::connect`] and owned by whoever speaks the protocol on it.
pub struct SshClient {
    config: SshConfig,
    session: Option<Handle<ClientHandler>>,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Connect, authenticate, and open the interactive shell channel.
    ///
    /// `prompt` is only consulted when the identity file is encrypted.
    pub async fn connect(
        &mut self,
        prompt: &PassphrasePrompt,
    ) -> Result<ChannelStream<Msg>, SshError> {
        // Key and passphrase problems surface before any network traffic.
        let identity = match &self.config.key_source {
            KeySource::File(path) => Some(load_identity(path, prompt)?),
            KeySource::Agent => None,
        };

        let config = Config {
            inactivity_timeout: Some(SSH_INACTIVITY_TIMEOUT),
            keepalive_interval: Some(SSH_KEEPALIVE_INTERVAL),
            keepalive_max: SSH_KEEPALIVE_MAX,
            ..<_>::default()
        };

        let handler = ClientHandler {
            expected_fingerprint: self.config.host_fingerprint.clone(),
        };
        let addr = (self.config.host.as_str(), self.config.port);
        let mut session = client::connect(Arc::new(config), addr, handler)
            .await
            .map_err(|e| match e {
                SshError::HostKeyMismatch { .. } => e,
                other => SshError::ConnectionFailed(other.to_string()),
            })?;

        log::info!(
            "Connected to {}:{}, attempting authentication",
            self.config.host,
            self.config.port
        );

        match identity {
            Some(key) => self.authenticate_with_key(&mut session, key).await?,
            None => self.authenticate_with_agent(&mut session).await?,
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelFailed(format!("session: {}", e)))?;

        channel
            .request_pty(false, PTY_TERM, PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
            .await
            .map_err(|e| SshError::ChannelFailed(format!("pty: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelFailed(format!("shell: {}", e)))?;

        log::info!("Opened interactive shell channel");
        self.session = Some(session);

        Ok(channel.into_stream())
    }

    async fn authenticate_with_key(
        &self,
        session: &mut Handle<ClientHandler>,
        key: russh::keys::PrivateKey,
    ) -> Result<(), SshError> {
        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        let result = session
            .authenticate_publickey(
                &self.config.username,
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await
            .map_err(|e| SshError::AuthFailed(e.to_string()))?;

        if !result.success() {
            return Err(SshError::AuthFailed("Identity rejected by server".into()));
        }

        log::info!("Authenticated as {} with identity file", self.config.username);
        Ok(())
    }

    async fn authenticate_with_agent(
        &self,
        session: &mut Handle<ClientHandler>,
    ) -> Result<(), SshError> {
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| SshError::AgentFailed(e.to_string()))?;

        let keys = agent
            .request_identities()
            .await
            .map_err(|e| SshError::AgentFailed(e.to_string()))?;

        if keys.is_empty() {
            return Err(SshError::NoKeysAvailable);
        }

        log::info!("Found {} keys in SSH agent", keys.len());

        // Try each key until one works
        for key in &keys {
            log::debug!("Trying key: {}", key.fingerprint(HashAlg::Sha256));

            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();

            let result = session
                .authenticate_publickey_with(&self.config.username, key.clone(), hash_alg, &mut agent)
                .await;

            match result {
                Ok(auth_result) if auth_result.success() => {
                    log::info!(
                        "Authenticated as {} with key {}",
                        self.config.username,
                        key.fingerprint(HashAlg::Sha256)
                    );
                    return Ok(());
                }
                Ok(_) => {
                    log::debug!("Key rejected, trying next...");
                }
                Err(e) => {
                    log::warn!("Auth error with key: {}", e);
                }
            }
        }

        Err(SshError::AuthFailed("No keys accepted by server".into()))
    }

    /// Disconnect from the server. Does nothing if already disconnected.
    pub async fn disconnect(&mut self) -> Result<(), SshError> {
        if let Some(session) = self.session.take() {
            session
                .disconnect(Disconnect::ByApplication, "Client unmounting", "en")
                .await
                .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;
            log::info!("Disconnected from {}:{}", self.config.host, self.config.port);
        }
        Ok(())
    }
}

/// Load a private key, asking for a passphrase if it is encrypted.
fn load_identity(path: &Path, prompt: &PassphrasePrompt) -> Result<russh::keys::PrivateKey, SshError> {
    let key_load = |e: russh::keys::Error| SshError::KeyLoad(format!("{}: {}", path.display(), e));

    match russh::keys::load_secret_key(path, None) {
        Ok(key) => Ok(key),
        Err(russh::keys::Error::KeyIsEncrypted) => {
            let passphrase = prompt(path).ok_or_else(|| {
                SshError::KeyLoad(format!("{}: passphrase required", path.display()))
            })?;
            russh::keys::load_secret_key(path, Some(&passphrase)).map_err(key_load)
        }
        Err(e) => Err(key_load(e)),
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Auth failed: {0}")]
    AuthFailed(String),
    #[error("Channel failed: {0}")]
    ChannelFailed(String),
    #[error("SSH agent error: {0}")]
    AgentFailed(String),
    #[error("No SSH keys available in agent")]
    NoKeysAvailable,
    #[error("Cannot load identity {0}")]
    KeyLoad(String),
    #[error("Host key mismatch: expected {expected}, server offered {actual}")]
    HostKeyMismatch { expected: String, actual: String },
}

impl SshError {
    /// Authentication problems, as opposed to network or channel failures.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            SshError::AuthFailed(_)
                | SshError::AgentFailed(_)
                | SshError::NoKeysAvailable
                | SshError::KeyLoad(_)
        )
    }
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::ConnectionFailed(e.to_string())
    }
}
