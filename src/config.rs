//! Engine configuration.
//!
//! Defaults cover every tunable; an optional TOML file and `WEBPILOT_*`
//! environment variables override them via the `config` crate builder.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use webpilot_core_types::ActionKind;

/// Post-action settle delays, longest for navigation (page load), shortest
/// for passive actions. Wait steps already waited and get none.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub navigate_ms: u64,
    pub click_ms: u64,
    pub fill_ms: u64,
    pub default_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            navigate_ms: 2000,
            click_ms: 1000,
            fill_ms: 500,
            default_ms: 300,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard ceiling on executed steps per run, independent of how the
    /// remaining text shrinks.
    pub max_steps: u32,
    /// Attempts per strategy in the retry policy.
    pub max_attempts: u32,
    /// Base retry delay; the n-th retry waits n times this.
    pub base_retry_delay_ms: u64,
    pub settle: SettleConfig,
    /// Per-call timeout for action dispatches.
    pub action_timeout_ms: u64,
    /// Per-call timeout for assertion-phase dispatches (shorter).
    pub assertion_timeout_ms: u64,
    /// Progress buffer flush threshold by size.
    pub event_batch_size: usize,
    /// Progress buffer flush threshold by age of the first buffered event.
    pub event_batch_age_ms: u64,
    /// Wait-step default when no timeout can be parsed from the step.
    pub default_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_attempts: 3,
            base_retry_delay_ms: 1000,
            settle: SettleConfig::default(),
            action_timeout_ms: 30_000,
            assertion_timeout_ms: 10_000,
            event_batch_size: 20,
            event_batch_age_ms: 200,
            default_wait_ms: 3000,
        }
    }
}

impl EngineConfig {
    /// Build from defaults, then an optional TOML file, then environment
    /// overrides (`WEBPILOT_MAX_STEPS=10`, `WEBPILOT_SETTLE__CLICK_MS=0`).
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("WEBPILOT")
                .separator("__")
                .try_parsing(true),
        );
        let loaded = builder.build()?;
        let mut cfg: EngineConfig = loaded.try_deserialize()?;
        cfg.max_attempts = cfg.max_attempts.max(1);
        cfg.max_steps = cfg.max_steps.max(1);
        Ok(cfg)
    }

    pub fn settle_delay(&self, action: ActionKind) -> Duration {
        let ms = match action {
            ActionKind::Navigate => self.settle.navigate_ms,
            ActionKind::Click => self.settle.click_ms,
            ActionKind::Fill | ActionKind::SelectOption => self.settle.fill_ms,
            ActionKind::Wait => 0,
            _ => self.settle.default_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn assertion_timeout(&self) -> Duration {
        Duration::from_millis(self.assertion_timeout_ms)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn event_batch_age(&self) -> Duration {
        Duration::from_millis(self.event_batch_age_ms)
    }
}
