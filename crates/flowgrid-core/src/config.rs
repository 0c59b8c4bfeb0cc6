//! FlowGrid configuration system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowGridConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

impl Default for FlowGridConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            engine: EngineConfig::default(),
            delivery: DeliveryConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

impl FlowGridConfig {
    /// Load config from the default path (~/.flowgrid/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::FlowGridError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::FlowGridError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::FlowGridError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the FlowGrid home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowgrid")
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 7700 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Orchestration engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the engine database. Empty = ~/.flowgrid/flowgrid.db.
    #[serde(default)]
    pub db_path: String,
    /// Minutes after which a run still in `running` is reported as stale.
    #[serde(default = "default_stale_after")]
    pub stale_after_minutes: u32,
    /// Seconds between due-schedule polls in the server binary.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_stale_after() -> u32 { 60 }
fn default_poll_interval() -> u64 { 30 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
            stale_after_minutes: default_stale_after(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl EngineConfig {
    /// Resolve the database path, falling back to the FlowGrid home dir.
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            FlowGridConfig::home_dir().join("flowgrid.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

/// Outbound webhook delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 { 30 }
fn default_max_retries() -> u32 { 3 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Per-tier quota limits. `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub actions_per_day: i64,
    pub tasks_per_day: i64,
    pub automations_total: i64,
    pub tokens_per_month: i64,
}

impl TierLimits {
    pub const UNLIMITED: i64 = -1;
}

/// Quota configuration: the plan-tier limit table, keyed by tier name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, TierLimits>,
    /// Tier assumed for tenants with no explicit plan.
    #[serde(default = "default_tier_name")]
    pub default_tier: String,
}

fn default_tier_name() -> String { "free".into() }

fn default_tiers() -> HashMap<String, TierLimits> {
    HashMap::from([
        (
            "free".to_string(),
            TierLimits {
                actions_per_day: 25,
                tasks_per_day: 100,
                automations_total: 3,
                tokens_per_month: 50_000,
            },
        ),
        (
            "starter".to_string(),
            TierLimits {
                actions_per_day: 200,
                tasks_per_day: 1_000,
                automations_total: 20,
                tokens_per_month: 500_000,
            },
        ),
        (
            "pro".to_string(),
            TierLimits {
                actions_per_day: 2_000,
                tasks_per_day: 10_000,
                automations_total: 100,
                tokens_per_month: 5_000_000,
            },
        ),
        (
            "enterprise".to_string(),
            TierLimits {
                actions_per_day: TierLimits::UNLIMITED,
                tasks_per_day: TierLimits::UNLIMITED,
                automations_total: TierLimits::UNLIMITED,
                tokens_per_month: TierLimits::UNLIMITED,
            },
        ),
    ])
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            default_tier: default_tier_name(),
        }
    }
}

impl QuotaConfig {
    /// Look up a tier by name, falling back to the default tier.
    pub fn limits_for(&self, tier: &str) -> TierLimits {
        self.tiers
            .get(tier)
            .or_else(|| self.tiers.get(&self.default_tier))
            .copied()
            .unwrap_or(TierLimits {
                actions_per_day: 0,
                tasks_per_day: 0,
                automations_total: 0,
                tokens_per_month: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses_empty_toml() {
        let config: FlowGridConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.port, 7700);
        assert_eq!(config.delivery.timeout_secs, 30);
        assert_eq!(config.delivery.max_retries, 3);
    }

    #[test]
    fn test_tier_lookup_falls_back_to_default() {
        let quota = QuotaConfig::default();
        let free = quota.limits_for("free");
        let unknown = quota.limits_for("no-such-tier");
        assert_eq!(free, unknown);
        assert_eq!(free.automations_total, 3);
    }

    #[test]
    fn test_enterprise_is_unlimited() {
        let quota = QuotaConfig::default();
        let ent = quota.limits_for("enterprise");
        assert_eq!(ent.actions_per_day, TierLimits::UNLIMITED);
        assert_eq!(ent.tokens_per_month, TierLimits::UNLIMITED);
    }

    #[test]
    fn test_custom_tier_from_toml() {
        let toml_src = r#"
            [quota.tiers.lab]
            actions_per_day = 5
            tasks_per_day = 10
            automations_total = 1
            tokens_per_month = 1000
        "#;
        let config: FlowGridConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.quota.limits_for("lab").actions_per_day, 5);
    }
}
