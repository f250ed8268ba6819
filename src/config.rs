//! Layered configuration: built-in defaults, then an optional TOML file, then
//! CLI flags and environment variables.
//!
//! ```toml
//! [server]
//! port = 3001
//! static_dir = "public"
//!
//! [metric]
//! poll_interval_secs = 5
//!
//! [participants]
//! program = "python3"
//! script = "./python/chat_fetcher_robust.py"
//! fallback_script = "./python/chat_fetcher.py"
//!
//! [rewards]
//! auto_interval = 100
//! auto_prize = "100 TL"
//! winner_policy = "exclude_previous"
//! ```

use crate::engine::EngineSettings;
use crate::metric_source::{DEFAULT_USER_AGENT, DEFAULT_WATCH_URL};
use crate::participant_process::ParticipantSourceConfig;
use crate::reward::{AutoConfig, Mode};
use crate::session::SessionDefaults;
use crate::winner::WinnerPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub metric: MetricConfig,
    pub participants: ParticipantsConfig,
    pub rewards: RewardsConfig,
}

/// The `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    /// Per-viewer backlog before a slow viewer starts losing notifications.
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 3001,
            static_dir: None,
            broadcast_capacity: 256,
        }
    }
}

/// The `[metric]` section: where and how often the counter is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    pub poll_interval_secs: u64,
    pub watch_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for MetricConfig {
    fn default() -> Self {
        MetricConfig {
            poll_interval_secs: 5,
            watch_url: DEFAULT_WATCH_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// The `[participants]` section: the external chat reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantsConfig {
    pub enabled: bool,
    pub program: String,
    pub script: String,
    pub fallback_script: String,
    /// Defaults to `http://localhost:<port>`.
    pub callback_url: Option<String>,
}

impl Default for ParticipantsConfig {
    fn default() -> Self {
        let source = ParticipantSourceConfig::default();
        ParticipantsConfig {
            enabled: true,
            program: source.program,
            script: source.script,
            fallback_script: source.fallback_script,
            callback_url: None,
        }
    }
}

/// The `[rewards]` section: operator defaults for a fresh process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    pub mode: Mode,
    pub enabled: bool,
    pub auto_interval: i64,
    pub auto_prize: String,
    pub title: String,
    pub winner_policy: WinnerPolicy,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        let defaults = SessionDefaults::default();
        RewardsConfig {
            mode: defaults.mode,
            enabled: defaults.enabled,
            auto_interval: defaults.auto_config.interval,
            auto_prize: defaults.auto_config.prize,
            title: defaults.title,
            winner_policy: defaults.winner_policy,
        }
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub static_dir: Option<PathBuf>,
    pub poll_interval_secs: Option<u64>,
    pub winner_policy: Option<WinnerPolicy>,
    pub no_participant_source: bool,
}

impl AppConfig {
    /// Resolve the final configuration from an optional file plus overrides.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<AppConfig> {
        let mut config = match path {
            Some(p) => parse_toml_file(p)?,
            None => AppConfig::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(dir) = &overrides.static_dir {
            self.server.static_dir = Some(dir.clone());
        }
        if let Some(secs) = overrides.poll_interval_secs {
            self.metric.poll_interval_secs = secs;
        }
        if let Some(policy) = overrides.winner_policy {
            self.rewards.winner_policy = policy;
        }
        if overrides.no_participant_source {
            self.participants.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric.poll_interval_secs == 0 {
            anyhow::bail!("metric.poll_interval_secs must be at least 1");
        }
        if self.metric.request_timeout_secs == 0 {
            anyhow::bail!("metric.request_timeout_secs must be at least 1");
        }
        if self.server.broadcast_capacity == 0 {
            anyhow::bail!("server.broadcast_capacity must be at least 1");
        }
        url::Url::parse(&self.metric.watch_url)
            .map_err(|e| anyhow::anyhow!("metric.watch_url is invalid: {}", e))?;
        if self.participants.enabled && self.participants.program.trim().is_empty() {
            anyhow::bail!("participants.program is required when the participant source is enabled");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn callback_url(&self) -> String {
        self.participants
            .callback_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.server.port))
    }

    pub fn participant_source(&self) -> Option<ParticipantSourceConfig> {
        if !self.participants.enabled {
            return None;
        }
        Some(ParticipantSourceConfig {
            program: self.participants.program.clone(),
            script: self.participants.script.clone(),
            fallback_script: self.participants.fallback_script.clone(),
            callback_url: self.callback_url(),
        })
    }

    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            mode: self.rewards.mode,
            auto_config: AutoConfig {
                interval: self.rewards.auto_interval,
                prize: self.rewards.auto_prize.clone(),
            },
            enabled: self.rewards.enabled,
            title: self.rewards.title.clone(),
            winner_policy: self.rewards.winner_policy,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_secs(self.metric.poll_interval_secs),
            participant_source: self.participant_source(),
            defaults: self.session_defaults(),
        }
    }
}

pub fn parse_toml(content: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_toml_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
    parse_toml(&content)
}
