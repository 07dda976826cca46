//! Command line and config file.
//!
//! Every setting can come from a flag or from a TOML file. Flags win. The
//! file is read from `--config`, or from `$XDG_CONFIG_HOME/blitzfs/config.toml`
//! when that exists.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use blitzfs_client::constants::{
    DEFAULT_IDENTITY, DEFAULT_SSH_HOST, DEFAULT_SSH_PORT, DEFAULT_SSH_USER,
};
use blitzfs_client::{KeySource, SshConfig};
use blitzfs_vfs::CachePolicy;
use clap::Parser;
use serde::Deserialize;

/// Mount a blitz server's file tree read-only over SSH.
#[derive(Parser, Debug)]
#[command(name = "blitzfs")]
#[command(about = "Mount a blitz server's file tree read-only over SSH")]
pub struct Args {
    /// Directory to mount on
    pub mountpoint: PathBuf,

    /// blitz server host [default: localhost]
    #[arg(short, long)]
    pub server: Option<String>,

    /// blitz server SSH port [default: 4444]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Private key file [default: ~/.ssh/id_rsa]
    #[arg(short, long)]
    pub identity: Option<String>,

    /// Authenticate with keys from the running ssh-agent instead of a file
    #[arg(long, conflicts_with = "identity")]
    pub agent: bool,

    /// Remote user name [default: dummy]
    #[arg(short, long)]
    pub user: Option<String>,

    /// Write logs to this file as well as stderr
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,

    /// Cache listings, attributes and file contents for the life of the mount
    #[arg(short, long)]
    pub cache: bool,

    /// Refuse servers whose host key has a different SHA256 fingerprint
    #[arg(long, value_name = "SHA256:...")]
    pub known_host_fingerprint: Option<String>,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Contents of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity: Option<String>,
    pub agent: Option<bool>,
    pub logfile: Option<PathBuf>,
    /// `"disabled"` or `"stale-forever"`.
    pub cache: Option<CachePolicy>,
    pub known_host_fingerprint: Option<String>,
}

impl FileConfig {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// The file named by `--config`, else the per-user default if present.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("blitzfs").join("config.toml"))
}

/// Everything needed to mount, after merging flags over the file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mountpoint: PathBuf,
    pub ssh: SshConfig,
    pub cache: CachePolicy,
    pub logfile: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self> {
        let host = args
            .server
            .or(file.server)
            .unwrap_or_else(|| DEFAULT_SSH_HOST.to_string());
        if host.trim().is_empty() {
            bail!("server host is empty");
        }

        let key_source = if args.agent || (args.identity.is_none() && file.agent == Some(true)) {
            KeySource::Agent
        } else {
            let identity = args
                .identity
                .or(file.identity)
                .unwrap_or_else(|| DEFAULT_IDENTITY.to_string());
            KeySource::File(expand(&identity))
        };

        let ssh = SshConfig {
            host,
            port: args.port.or(file.port).unwrap_or(DEFAULT_SSH_PORT),
            username: args
                .user
                .or(file.user)
                .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            key_source,
            host_fingerprint: args.known_host_fingerprint.or(file.known_host_fingerprint),
        };

        Ok(Self {
            mountpoint: args.mountpoint,
            ssh,
            cache: if args.cache {
                CachePolicy::from_flag(true)
            } else {
                file.cache.unwrap_or_default()
            },
            logfile: args
                .logfile
                .or(file.logfile)
                .map(|p| expand(&p.to_string_lossy())),
        })
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
