use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use docchat_relay::RelayConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_SESSION_COOKIE: &str = "docchat.session-token";

/// Load `.env` from the crate directory and then the working directory.
pub fn init_env() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

/// Command-line overrides. Anything not given falls back to the environment.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "docchat-server", version, about = "Streaming chat relay for document Q&A")]
pub struct Cli {
    /// Listen address, e.g. 0.0.0.0:3000.
    #[arg(long)]
    pub bind: Option<String>,
    /// Base URL of the inference backend (chat turns go to <url>/chat).
    #[arg(long)]
    pub backend_url: Option<String>,
    /// Serve chat turns from the built-in mock backend.
    #[arg(long)]
    pub mock: bool,
    /// Forward callers without a valid session as `anonymous`.
    #[arg(long)]
    pub allow_anonymous: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub backend_url: Option<String>,
    pub use_mock_backend: bool,
    pub session_secret: Option<String>,
    pub session_cookie: String,
    pub allow_anonymous: bool,
    pub first_byte_timeout: Duration,
    pub connect_timeout: Duration,
    pub stream_buffer_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            backend_url: None,
            use_mock_backend: false,
            session_secret: None,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            allow_anonymous: false,
            first_byte_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stream_buffer_capacity: 128,
        }
    }
}

impl ServerConfig {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            bind: get("DOCCHAT_BIND").unwrap_or(defaults.bind),
            backend_url: get("SERVER_URL"),
            use_mock_backend: parse_bool(get("DOCCHAT_USE_MOCK_BACKEND"), "DOCCHAT_USE_MOCK_BACKEND")?
                .unwrap_or(false),
            session_secret: get("DOCCHAT_SESSION_SECRET"),
            session_cookie: get("DOCCHAT_SESSION_COOKIE").unwrap_or(defaults.session_cookie),
            allow_anonymous: parse_bool(get("DOCCHAT_ALLOW_ANONYMOUS"), "DOCCHAT_ALLOW_ANONYMOUS")?
                .unwrap_or(false),
            first_byte_timeout: parse_value::<u64>(
                get("DOCCHAT_FIRST_BYTE_TIMEOUT_MS"),
                "DOCCHAT_FIRST_BYTE_TIMEOUT_MS",
            )?
            .map(Duration::from_millis)
            .unwrap_or(defaults.first_byte_timeout),
            connect_timeout: parse_value::<u64>(
                get("DOCCHAT_CONNECT_TIMEOUT_MS"),
                "DOCCHAT_CONNECT_TIMEOUT_MS",
            )?
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_timeout),
            stream_buffer_capacity: parse_value(get("DOCCHAT_STREAM_BUFFER"), "DOCCHAT_STREAM_BUFFER")?
                .unwrap_or(defaults.stream_buffer_capacity),
        })
    }

    /// Applies command-line overrides on top of the environment.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(bind) = &cli.bind {
            self.bind = bind.clone();
        }
        if let Some(url) = &cli.backend_url {
            self.backend_url = Some(url.clone());
        }
        self.use_mock_backend |= cli.mock;
        self.allow_anonymous |= cli.allow_anonymous;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_byte_timeout.is_zero() || self.connect_timeout.is_zero() {
            bail!("DOCCHAT_FIRST_BYTE_TIMEOUT_MS and DOCCHAT_CONNECT_TIMEOUT_MS must be > 0");
        }
        if self.stream_buffer_capacity == 0 {
            bail!("DOCCHAT_STREAM_BUFFER must be > 0");
        }
        if !self.use_mock_backend {
            let Some(url) = &self.backend_url else {
                bail!("SERVER_URL is required unless the mock backend is enabled");
            };
            self.relay_config(url).validate()?;
        }
        if self.session_secret.is_none() && !self.allow_anonymous {
            tracing::warn!(
                "DOCCHAT_SESSION_SECRET is not set; every chat request will be rejected as unauthenticated"
            );
        }
        Ok(())
    }

    /// Relay settings for the given backend base URL.
    pub fn relay_config(&self, base_url: &str) -> RelayConfig {
        RelayConfig::new(base_url)
            .connect_timeout(self.connect_timeout)
            .first_byte_timeout(self.first_byte_timeout)
            .stream_buffer_capacity(self.stream_buffer_capacity)
            .allow_anonymous(self.allow_anonymous)
    }
}

fn parse_value<T>(raw: Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|value| {
        value
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{value}'"))
    })
    .transpose()
}

pub(crate) fn parse_bool(raw: Option<String>, key: &str) -> Result<Option<bool>> {
    raw.map(|value| match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Ok(true),
        "0" | "false" | "no" | "off" | "disabled" => Ok(false),
        _ => bail!("invalid boolean for {key}: '{value}'"),
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let config = ServerConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.session_cookie, DEFAULT_SESSION_COOKIE);
        assert_eq!(config.first_byte_timeout, Duration::from_secs(30));
        assert!(!config.use_mock_backend);
        assert!(config.backend_url.is_none());
    }

    #[test]
    fn env_values_are_parsed() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_URL", "http://backend:8000"),
            ("DOCCHAT_USE_MOCK_BACKEND", "yes"),
            ("DOCCHAT_FIRST_BYTE_TIMEOUT_MS", "1500"),
            ("DOCCHAT_STREAM_BUFFER", "16"),
            ("DOCCHAT_SESSION_SECRET", "s3cret"),
        ]))
        .expect("config");
        assert_eq!(config.backend_url.as_deref(), Some("http://backend:8000"));
        assert!(config.use_mock_backend);
        assert_eq!(config.first_byte_timeout, Duration::from_millis(1500));
        assert_eq!(config.stream_buffer_capacity, 16);
        assert_eq!(config.session_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn malformed_numbers_and_booleans_are_errors() {
        assert!(ServerConfig::from_lookup(lookup(&[("DOCCHAT_STREAM_BUFFER", "lots")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("DOCCHAT_ALLOW_ANONYMOUS", "maybe")])).is_err());
    }

    #[test]
    fn backend_url_is_required_unless_mock() {
        let config = ServerConfig::default();
        assert!(config.validate().is_err());

        let mock = ServerConfig {
            use_mock_backend: true,
            ..ServerConfig::default()
        };
        assert!(mock.validate().is_ok());

        let bad_scheme = ServerConfig {
            backend_url: Some("backend:8000".into()),
            ..ServerConfig::default()
        };
        assert!(bad_scheme.validate().is_err());
    }

    #[test]
    fn cli_overrides_env() {
        let config = ServerConfig::from_lookup(lookup(&[("DOCCHAT_BIND", "0.0.0.0:80")]))
            .expect("config")
            .with_cli(&Cli {
                bind: Some("127.0.0.1:9000".into()),
                backend_url: Some("http://localhost:8000".into()),
                mock: false,
                allow_anonymous: true,
            });
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.backend_url.as_deref(), Some("http://localhost:8000"));
        assert!(config.allow_anonymous);
    }
}
