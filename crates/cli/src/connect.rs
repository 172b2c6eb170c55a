// Shared connection flags and session startup for every subcommand.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, ValueEnum};
use fieldsync_client::{
    ClientConfig, CollabSession, ConnectionState, SessionSnapshot, StoreError, TransportPreference,
};
use tracing::debug;

use crate::exit_code::ConnectFailed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportArg {
    /// Socket, falling back to HTTP polling.
    #[default]
    Auto,
    /// HTTP polling only.
    Poll,
    /// Load the snapshot once; no updates in either direction.
    ReadOnly,
}

impl From<TransportArg> for TransportPreference {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Auto => Self::Auto,
            TransportArg::Poll => Self::Fallback,
            TransportArg::ReadOnly => Self::ReadOnly,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Server base URL; overrides `server_url` from the config file.
    #[arg(long, global = true, env = "FIELDSYNC_SERVER_URL")]
    pub server: Option<String>,

    /// Bearer token for the server.
    #[arg(long, global = true, env = "FIELDSYNC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Config file (default: ~/.fieldsync/config.toml).
    #[arg(long, global = true, env = "FIELDSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = TransportArg::Auto)]
    pub transport: TransportArg,

    /// Seconds to wait for the initial snapshot.
    #[arg(long, global = true, default_value_t = 15)]
    pub connect_timeout: u64,

    /// Force JSON output.
    #[arg(long, global = true)]
    pub json: bool,
}

impl GlobalArgs {
    /// The config file, with command-line overrides applied.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ClientConfig::load(),
        };
        if let Some(server) = &self.server {
            config.server_url = Some(server.clone());
        }
        if let Some(token) = &self.token {
            config.auth_token = Some(token.clone());
        }
        Ok(config)
    }
}

/// Open a session on `doc` and wait until the server's snapshot is in.
pub async fn open(global: &GlobalArgs, doc: &str) -> anyhow::Result<CollabSession> {
    let config = global.client_config()?;
    let session = CollabSession::open(&config, doc, global.transport.into())
        .with_context(|| format!("cannot reach document `{doc}`"))?;
    session.connect().await.context("session stopped while connecting")?;

    let wait = Duration::from_secs(global.connect_timeout);
    let ready = tokio::time::timeout(wait, session.wait_for(settled))
        .await
        .with_context(|| format!("timed out after {}s waiting for `{doc}`", wait.as_secs()))?
        .context("session stopped while connecting")?;

    if ready.state != ConnectionState::Open {
        let category = ready.error.context("connection closed without a snapshot")?;
        session.shutdown().await;
        return Err(ConnectFailed(category)).with_context(|| format!("cannot open `{doc}`"));
    }
    debug!(transport = ?ready.transport, version = ready.store.version, "document loaded");
    Ok(session)
}

/// Open with a snapshot, or closed with an error.
fn settled(snapshot: &SessionSnapshot) -> bool {
    snapshot.state == ConnectionState::Open
        || (snapshot.state == ConnectionState::Closed && snapshot.error.is_some())
}

pub fn require_writable(snapshot: &SessionSnapshot, doc: &str) -> anyhow::Result<()> {
    if snapshot.store.permissions.is_some_and(|permissions| !permissions.write) {
        let error = anyhow::Error::new(StoreError::ReadOnly);
        return Err(error.context(format!("cannot write to `{doc}`")));
    }
    Ok(())
}
