//! Process-wide logging.
//!
//! Relay logs carry the turn id through the `chat_turn` span, so the console
//! layer prints it as span context and the JSON layer records it under `span`.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool;

const DEFAULT_FILTER: &str = "info,tower_http=info";
const DEFAULT_LOG_FILE: &str = "docchat.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stdout.
    Console,
    /// JSON lines appended to this file.
    JsonFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    pub filter: String,
    pub output: LogOutput,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `DOCCHAT_OBSERVABILITY_ENABLED` toggles logging (unreadable values keep
    /// it on), `DOCCHAT_LOG_LEVEL` then `RUST_LOG` pick the filter, and
    /// `DOCCHAT_JSON_LOG_PATH` switches output to a JSON-lines file.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let enabled = parse_bool(
            get("DOCCHAT_OBSERVABILITY_ENABLED"),
            "DOCCHAT_OBSERVABILITY_ENABLED",
        )
        .ok()
        .flatten()
        .unwrap_or(true);
        let filter = get("DOCCHAT_LOG_LEVEL")
            .or_else(|| get("RUST_LOG"))
            .filter(|f| EnvFilter::try_new(f).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let output = get("DOCCHAT_JSON_LOG_PATH")
            .map(|path| LogOutput::JsonFile(PathBuf::from(path)))
            .unwrap_or(LogOutput::Console);

        Self {
            enabled,
            filter,
            output,
        }
    }

    fn install(&self) {
        if !self.enabled {
            return;
        }
        let filter = EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        match &self.output {
            LogOutput::JsonFile(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
            }
            LogOutput::Console => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
            }
        }
    }
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the global subscriber from the environment, once per process.
pub fn init_observability() {
    INIT.get_or_init(|| LogSettings::from_env().install());
}
