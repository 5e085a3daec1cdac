//! Hot reload of the configuration file.
//!
//! # Design Decisions
//! - A reload that fails to parse or validate is discarded whole; the
//!   running config is never patched field by field
//! - Validation failures are reported one line per field so an
//!   operator can fix the file without diffing it against the schema

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::GatewayConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Watches the config file and emits each reload that survives
/// validation. Dropping the watcher stops the feed.
pub struct ConfigWatcher {
    // Held for its Drop; the notify backend stops when this goes away.
    _inner: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `path`. Accepted configs arrive on the returned
    /// channel.
    pub fn start(
        path: &Path,
    ) -> Result<(Self, mpsc::UnboundedReceiver<GatewayConfig>), notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let reload_path: PathBuf = path.to_path_buf();

        let mut inner = RecommendedWatcher::new(
            move |event: notify::Result<Event>| match event {
                Ok(event) if is_content_change(&event.kind) => {
                    if let Some(config) = reload(&reload_path) {
                        let _ = tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch failed"),
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;
        inner.watch(path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Watching configuration for changes");
        Ok((Self { _inner: inner }, rx))
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}

/// Load and validate the file. Any failure keeps the running config.
fn reload(path: &Path) -> Option<GatewayConfig> {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "Configuration reloaded");
            Some(config)
        }
        Err(ConfigError::Validation(errors)) => {
            for error in &errors {
                tracing::error!(
                    field = error.field,
                    message = %error.message,
                    "Rejected config field"
                );
            }
            tracing::error!(
                problems = errors.len(),
                "Reloaded config failed validation, keeping current"
            );
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not reload config, keeping current");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.toml", name, uuid::Uuid::new_v4()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reload_accepts_valid_file() {
        let path = scratch_file("reload-ok", "[rate_limit]\ndefault_limit = 30\n");
        let config = reload(&path).unwrap();
        assert_eq!(config.rate_limit.default_limit, 30);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_reload_discards_invalid_file() {
        // Semantically broken: a zero window fails validation.
        let path = scratch_file("reload-bad", "[rate_limit]\nwindow_secs = 0\n");
        assert!(reload(&path).is_none());
        // Syntactically broken too.
        let path2 = scratch_file("reload-garbage", "not toml {{{{");
        assert!(reload(&path2).is_none());

        fs::remove_file(&path).unwrap();
        fs::remove_file(&path2).unwrap();
    }
}
