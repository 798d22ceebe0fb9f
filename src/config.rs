// ABOUTME: Configuration parsing from TOML file with environment variable overrides.
// ABOUTME: Validates the module allow-list and self-test surface at load time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub selftest: SelfTestConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Channel from which self-test runs and control routines may be triggered
    pub control_channel_id: String,
    /// User ids holding the trusted-operator capability
    #[serde(default)]
    pub operator_ids: Vec<String>,
    /// Where delivery failures are surfaced, if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Allow-list of modules to register, in registration (tie-break) order
    #[serde(default = "default_enabled_modules")]
    pub enabled: Vec<String>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_modules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-module evaluation timeout; a slower evaluate counts as confidence 0
    #[serde(default = "default_evaluation_timeout_secs")]
    pub evaluation_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout_secs: default_evaluation_timeout_secs(),
        }
    }
}

impl DispatchConfig {
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfTestConfig {
    /// Settle window after the last question, letting replies round-trip
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Hard wall-clock ceiling for a whole run
    #[serde(default = "default_run_ceiling_secs")]
    pub run_ceiling_secs: u64,
}

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
            run_ceiling_secs: default_run_ceiling_secs(),
        }
    }
}

impl SelfTestConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn run_ceiling(&self) -> Duration {
        Duration::from_secs(self.run_ceiling_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address for the HTTP adapter; unset disables it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default = "default_bot_user_id")]
    pub bot_user_id: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: None,
            bot_user_id: default_bot_user_id(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Bind address for the Prometheus exporter; unset disables it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
}

fn default_enabled_modules() -> Vec<String> {
    vec!["controls".to_string(), "selftest".to_string()]
}

fn default_evaluation_timeout_secs() -> u64 {
    5
}

fn default_settle_secs() -> u64 {
    3
}

fn default_run_ceiling_secs() -> u64 {
    120
}

fn default_bot_user_id() -> String {
    "quorum".to_string()
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Config::default()
        };

        // Override with environment variables if present
        if let Ok(val) = std::env::var("QUORUM_CONTROL_CHANNEL_ID") {
            config.bot.control_channel_id = val;
        }
        if let Ok(val) = std::env::var("QUORUM_OPERATOR_IDS") {
            config.bot.operator_ids = split_list(&val);
        }
        if let Ok(val) = std::env::var("QUORUM_ERROR_CHANNEL_ID") {
            config.bot.error_channel_id = Some(val);
        }
        if let Ok(val) = std::env::var("QUORUM_MODULES") {
            config.modules.enabled = split_list(&val);
        }
        if let Ok(val) = std::env::var("QUORUM_EVALUATION_TIMEOUT_SECS") {
            config.dispatch.evaluation_timeout_secs = val.parse().with_context(|| {
                format!("QUORUM_EVALUATION_TIMEOUT_SECS must be an integer, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("QUORUM_HTTP_LISTEN") {
            config.http.listen = Some(val);
        }
        if let Ok(val) = std::env::var("QUORUM_METRICS_LISTEN") {
            config.metrics.listen = Some(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that would otherwise surface as runtime faults.
    pub fn validate(&self) -> Result<()> {
        if self.bot.control_channel_id.trim().is_empty() {
            anyhow::bail!(
                "bot.control_channel_id is required (set in config.toml or QUORUM_CONTROL_CHANNEL_ID env var)"
            );
        }
        if self.modules.enabled.is_empty() {
            anyhow::bail!("modules.enabled must list at least one module");
        }
        let mut seen = HashSet::new();
        for name in &self.modules.enabled {
            if !seen.insert(name.as_str()) {
                anyhow::bail!("modules.enabled lists '{}' more than once", name);
            }
        }
        if self.dispatch.evaluation_timeout_secs == 0 {
            anyhow::bail!("dispatch.evaluation_timeout_secs must be greater than zero");
        }
        if self.selftest.run_ceiling_secs == 0 {
            anyhow::bail!("selftest.run_ceiling_secs must be greater than zero");
        }
        Ok(())
    }

    /// Operator ids as a set for efficient lookups.
    pub fn operator_ids_set(&self) -> HashSet<String> {
        self.bot.operator_ids.iter().cloned().collect()
    }
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
