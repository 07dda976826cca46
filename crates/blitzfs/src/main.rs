//! blitzfs binary.
//!
//! Mounts the file tree of a blitz server, reached over an interactive SSH
//! shell, as a read-only FUSE filesystem.
//!
//! Usage:
//!   blitzfs /mnt/blitz
//!   blitzfs /mnt/blitz --server blitz.example --port 4444 --cache
//!   blitzfs /mnt/blitz --agent --logfile ~/.cache/blitzfs.log
//!
//! Ctrl-C unmounts.

mod config;
mod logging;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use blitzfs_client::{Connection, connect_ssh};
use blitzfs_vfs::{CACHED_TTL, FuseBridge, RemoteFs, UNCACHED_TTL, VfsOps, spawn_mount};
use clap::Parser;
use dialoguer::Password;

use crate::config::{Args, FileConfig, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file = FileConfig::discover(args.config.as_deref())?;
    let settings = Settings::resolve(args, file)?;

    let _log_guard = logging::init(settings.logfile.as_deref())?;

    if let Err(e) = run(settings).await {
        tracing::error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    if !settings.mountpoint.is_dir() {
        bail!("mountpoint {} is not a directory", settings.mountpoint.display());
    }

    tracing::info!(
        host = %settings.ssh.host,
        port = settings.ssh.port,
        user = %settings.ssh.username,
        cache = settings.cache.is_enabled(),
        "Connecting via SSH"
    );

    let prompt = |path: &Path| -> Option<String> {
        Password::new()
            .with_prompt(format!("Passphrase for {}", path.display()))
            .interact()
            .ok()
    };
    let Connection { transport, client } = connect_ssh(settings.ssh.clone(), &prompt)
        .await
        .with_context(|| {
            format!(
                "cannot connect to {}:{}",
                settings.ssh.host, settings.ssh.port
            )
        })?;

    let fs = Arc::new(RemoteFs::new(client, settings.cache).with_transport(transport));
    let ttl = if settings.cache.is_enabled() {
        CACHED_TTL
    } else {
        UNCACHED_TTL
    };
    let bridge = FuseBridge::new(fs.clone(), tokio::runtime::Handle::current(), ttl);

    let session = match spawn_mount(bridge, &settings.mountpoint) {
        Ok(session) => session,
        Err(e) => {
            fs.shutdown().await.ok();
            return Err(e)
                .with_context(|| format!("cannot mount on {}", settings.mountpoint.display()));
        }
    };
    tracing::info!(mountpoint = %settings.mountpoint.display(), "mounted, Ctrl-C to unmount");

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl-C")?;
    tracing::info!("unmounting");

    // join() unmounts and waits for destroy(), which blocks on this runtime
    // to close the channel. It must run off the async workers.
    tokio::task::spawn_blocking(move || session.join())
        .await
        .context("FUSE session thread failed")?;
    fs.shutdown().await?;

    tracing::info!("blitzfs shut down");
    Ok(())
}
