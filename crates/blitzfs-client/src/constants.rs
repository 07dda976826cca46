//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default blitz server host.
pub const DEFAULT_SSH_HOST: &str = "localhost";

/// Default blitz server port.
pub const DEFAULT_SSH_PORT: u16 = 4444;

/// Login name when none is given. blitz servers authenticate by key only.
pub const DEFAULT_SSH_USER: &str = "dummy";

/// Default identity file, expanded by the caller.
pub const DEFAULT_IDENTITY: &str = "~/.ssh/id_rsa";

/// SSH inactivity timeout.
pub const SSH_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3600);

/// SSH keep-alive interval.
pub const SSH_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// SSH keep-alive max retries.
pub const SSH_KEEPALIVE_MAX: usize = 3;

/// Terminal type requested for the interactive channel.
pub const PTY_TERM: &str = "xterm";

/// PTY width in columns.
pub const PTY_COLUMNS: u32 = 80;

/// PTY height in rows.
pub const PTY_ROWS: u32 = 24;

/// Prompt byte the server prints when it is ready for the next command.
pub const PROMPT: &[u8] = b">";

/// Success token that opens every response.
pub const OK_TOKEN: &[u8] = b"OK";

/// Prefix marking a failed command body.
pub const ERROR_TOKEN: &str = "ERROR";

/// Line terminator appended to every request.
pub const REQUEST_TERMINATOR: &str = "\r\n";
