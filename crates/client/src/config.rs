// Client configuration: `~/.fieldsync/config.toml`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Root directory for fieldsync state: `~/.fieldsync/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".fieldsync"))
}

/// Path to the config file: `~/.fieldsync/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Client config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Server base URL (e.g. `https://reports.example.com`).
    pub server_url: Option<String>,
    /// Bearer token sent with every request, if the server wants one.
    pub auth_token: Option<String>,
    /// Server feature flag: try the socket transport before polling.
    pub websockets_enabled: bool,
    pub timings: Timings,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            auth_token: None,
            websockets_enabled: true,
            timings: Timings::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load from `~/.fieldsync/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Resolve the endpoint for the document served at `api_path`.
    pub fn endpoint(&self, api_path: &str) -> Result<Endpoint, ConfigError> {
        let server_url = self.server_url.as_deref().ok_or(ConfigError::MissingServerUrl)?;
        Endpoint::new(server_url, api_path)
    }
}

/// Intervals and timeouts, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timings {
    /// Outgoing edits are batched into one message per window.
    pub throttle_ms: u64,
    pub awareness_throttle_ms: u64,
    pub ping_interval_ms: u64,
    /// Silence after a send before the socket is declared lost.
    pub connection_loss_timeout_ms: u64,
    pub fallback_poll_interval_ms: u64,
    pub handshake_timeout_ms: u64,
    pub socket_attempts: u32,
    pub socket_retry_delay_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            throttle_ms: 1_000,
            awareness_throttle_ms: 1_000,
            ping_interval_ms: 30_000,
            connection_loss_timeout_ms: 15_000,
            fallback_poll_interval_ms: 10_000,
            handshake_timeout_ms: 10_000,
            socket_attempts: 2,
            socket_retry_delay_ms: 1_000,
        }
    }
}

impl Timings {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn awareness_throttle(&self) -> Duration {
        Duration::from_millis(self.awareness_throttle_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connection_loss_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_loss_timeout_ms)
    }

    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn socket_retry_delay(&self) -> Duration {
        Duration::from_millis(self.socket_retry_delay_ms)
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 250, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `consecutive_failures` failures.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.saturating_sub(1).min(7);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

// ── Endpoint ───────────────────────────────────────────────────────

/// Where one document is served: a server base URL plus the document's
/// API path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    api_path: String,
}

impl Endpoint {
    pub fn new(server_url: &str, api_path: &str) -> Result<Self, ConfigError> {
        let base = validate_server_url(server_url)?;
        let api_path = api_path.trim_matches('/');
        if api_path.is_empty() {
            return Err(ConfigError::InvalidApiPath(api_path.to_string()));
        }
        Ok(Self { base, api_path: api_path.to_string() })
    }

    /// `ws(s)://<host>/<api_path>/`
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.join(&format!("{}/", self.api_path))?;
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::InvalidUrl(format!("cannot use scheme {scheme} for {url}")))?;
        Ok(url)
    }

    /// `http(s)://<host>/<api_path>/fallback/`
    pub fn fallback_url(&self) -> Result<Url, ConfigError> {
        self.join(&format!("{}/fallback/", self.api_path))
    }

    fn join(&self, relative: &str) -> Result<Url, ConfigError> {
        self.base
            .join(relative)
            .map_err(|error| ConfigError::InvalidUrl(format!("{relative}: {error}")))
    }
}

fn validate_server_url(value: &str) -> Result<Url, ConfigError> {
    let mut parsed =
        Url::parse(value).map_err(|error| ConfigError::InvalidUrl(format!("{value}: {error}")))?;
    match parsed.scheme() {
        "https" => {}
        "http" if is_loopback_host(parsed.host_str()) => {}
        _ => return Err(ConfigError::InsecureUrl(value.to_string())),
    }
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|addr| addr.is_loopback())
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no server_url configured")]
    MissingServerUrl,

    #[error("invalid url {0}")]
    InvalidUrl(String),

    #[error("server_url must use https (http is allowed only for localhost testing): {0}")]
    InsecureUrl(String),

    #[error("invalid api path `{0}`")]
    InvalidApiPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ── ClientConfig ───────────────────────────────────────────────

    #[test]
    fn defaults() {
        let cfg = ClientConfig::default();
        assert!(cfg.server_url.is_none());
        assert!(cfg.websockets_enabled);
        assert_eq!(cfg.timings.throttle(), Duration::from_secs(1));
        assert_eq!(cfg.timings.socket_attempts, 2);
        assert_eq!(cfg.reconnect, ReconnectPolicy { base_delay_ms: 250, max_delay_ms: 30_000 });
    }

    #[test]
    fn roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = ClientConfig::default();
        cfg.server_url = Some("https://reports.example.com".into());
        cfg.auth_token = Some("secret".into());
        cfg.timings.fallback_poll_interval_ms = 2_500;
        cfg.save_to(&path).unwrap();

        assert_eq!(ClientConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: ClientConfig = toml::from_str(
            r#"
            server_url = "https://reports.example.com"
            websockets_enabled = false

            [timings]
            throttle_ms = 250
            "#,
        )
        .unwrap();
        assert!(!cfg.websockets_enabled);
        assert_eq!(cfg.timings.throttle_ms, 250);
        assert_eq!(cfg.timings.ping_interval_ms, 30_000);
        assert_eq!(cfg.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = ClientConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    // ── Reconnect backoff ──────────────────────────────────────────

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(2), Duration::from_millis(500));
        assert_eq!(policy.delay(4), Duration::from_millis(2_000));
        assert_eq!(policy.delay(8), Duration::from_millis(30_000));
        assert_eq!(policy.delay(50), Duration::from_millis(30_000));
    }

    // ── Endpoint ───────────────────────────────────────────────────

    #[test]
    fn endpoint_urls() {
        let endpoint = Endpoint::new("https://reports.example.com", "/api/ws/notes/").unwrap();
        assert_eq!(endpoint.socket_url().unwrap().as_str(), "wss://reports.example.com/api/ws/notes/");
        assert_eq!(
            endpoint.fallback_url().unwrap().as_str(),
            "https://reports.example.com/api/ws/notes/fallback/"
        );
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let endpoint = Endpoint::new("http://127.0.0.1:8000/sub", "doc").unwrap();
        assert_eq!(endpoint.socket_url().unwrap().as_str(), "ws://127.0.0.1:8000/sub/doc/");
    }

    #[test]
    fn rejects_plain_http_for_remote_hosts() {
        let err = Endpoint::new("http://reports.example.com", "doc").unwrap_err();
        assert!(err.to_string().contains("must use https"));
        assert!(Endpoint::new("http://localhost:8000", "doc").is_ok());
        assert!(Endpoint::new("http://[::1]:8000", "doc").is_ok());
    }

    #[test]
    fn rejects_empty_api_path() {
        assert!(matches!(
            Endpoint::new("https://reports.example.com", "//"),
            Err(ConfigError::InvalidApiPath(_))
        ));
        assert!(matches!(ClientConfig::default().endpoint("doc"), Err(ConfigError::MissingServerUrl)));
    }
}
