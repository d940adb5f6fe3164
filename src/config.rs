use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::risk::RiskRules;

pub const DEFAULT_CONFIG_FILE: &str = "dropout-guard.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    /// Directory holding the well-known `attendance.csv`, `tests.csv` and `fees.csv`.
    pub data_dir: PathBuf,
    pub rules: RiskRules,
    pub notification: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3002".to_string(),
            data_dir: PathBuf::from("public"),
            rules: RiskRules::default(),
            notification: NotificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Log,
    Outbox,
    Webhook,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub channel: ChannelKind,
    pub from: String,
    pub to: String,
    pub outbox_dir: Option<PathBuf>,
    pub webhook_url: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel: ChannelKind::Log,
            from: "\"DropoutGuard System\" <alert@dropoutguard.edu>".to_string(),
            to: "teacher@dropoutguard.edu".to_string(),
            outbox_dir: None,
            webhook_url: None,
        }
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub channel: Option<ChannelKind>,
    pub notify_to: Option<String>,
    pub outbox_dir: Option<PathBuf>,
    pub webhook_url: Option<String>,
}

impl AppConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] when it exists, or defaults.
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(bind) = overrides.bind {
            self.bind = bind;
        }
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(channel) = overrides.channel {
            self.notification.channel = channel;
        }
        if let Some(to) = overrides.notify_to {
            self.notification.to = to;
        }
        if let Some(dir) = overrides.outbox_dir {
            self.notification.outbox_dir = Some(dir);
        }
        if let Some(url) = overrides.webhook_url {
            self.notification.webhook_url = Some(url);
        }
        self
    }
}
