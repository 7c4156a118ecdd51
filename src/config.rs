use std::env;
use std::time::Duration;

use config::{Environment, File};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::imap::watcher::WatchOptions;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub log: LogConfig,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_user: String,
    pub imap_pass: String,
    /// Mailbox watched, read and purged.
    pub mailbox: String,
    pub poll_interval_ms: u64,
    pub since_skew_ms: u64,
    pub login_timeout_secs: u64,
}

impl Settings {
    /// Loads defaults, then the optional file, then `MAILWATCH_*` variables,
    /// then the plain `IMAP_*` variables.
    pub fn new(config_path: Option<&str>) -> Result<Self, SettingsError> {
        let mut config_builder = config::Config::builder()
            .set_default("imap_host", "localhost")?
            .set_default("imap_port", 993)?
            .set_default("imap_user", "")?
            .set_default("imap_pass", "")?
            .set_default("mailbox", "INBOX")?
            .set_default("poll_interval_ms", 2000)?
            .set_default("since_skew_ms", 1000)?
            .set_default("login_timeout_secs", 30)?
            .set_default("log.level", "info")?;

        if let Some(path) = config_path {
            config_builder = config_builder.add_source(File::with_name(path));
        }

        // e.g. `MAILWATCH_IMAP_HOST=...` overrides `imap_host`
        config_builder = config_builder.add_source(
            Environment::with_prefix("MAILWATCH")
                .prefix_separator("_")
                .ignore_empty(true),
        );

        let env_vars = [
            ("IMAP_HOST", "imap_host"),
            ("IMAP_PORT", "imap_port"),
            ("IMAP_USER", "imap_user"),
            ("IMAP_PASS", "imap_pass"),
            ("IMAP_MAILBOX", "mailbox"),
        ];

        for (env_var, key) in &env_vars {
            let Ok(value) = env::var(env_var) else {
                continue;
            };
            if *env_var == "IMAP_PORT" {
                match value.parse::<u16>() {
                    Ok(port) => config_builder = config_builder.set_override(*key, port)?,
                    Err(_) => warn!("Invalid port value in {}: {}", env_var, value),
                }
            } else {
                config_builder = config_builder.set_override(*key, value)?;
            }
        }

        Ok(config_builder.build()?.try_deserialize()?)
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            mailbox: self.mailbox.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            since_skew: Duration::from_millis(self.since_skew_ms),
        }
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            imap_host: "localhost".to_string(),
            imap_port: 993,
            imap_user: String::new(),
            imap_pass: String::new(),
            mailbox: "INBOX".to_string(),
            poll_interval_ms: 2000,
            since_skew_ms: 1000,
            login_timeout_secs: 30,
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load or parse configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}
