//! mpsched.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{MAX_REGISTERS, RegisterIndex};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: LimitsConfig,
    pub policy: PolicyConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Registers per connection (`R1..=Rn`).
    pub register_count: u8,
    /// Static cap on compiled program size, checked at load time.
    pub max_instructions: usize,
    /// Instructions a single evaluation may execute before it is aborted.
    pub step_budget: u64,
    /// Sum of every weight vector handed to the transport.
    pub weight_total: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            register_count: 6,
            max_instructions: 4096,
            step_budget: 10_000,
            weight_total: 1000,
        }
    }
}

/// What happens when a program is loaded under a name that is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Fail with a duplicate-name error; callers must remove first.
    #[default]
    Reject,
    /// Replace the program in place and bump its version. Bound connections
    /// pick up the new program at their next scheduling opportunity.
    HotSwap,
}

/// Registers with an engine-level meaning. Any of them may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub reload: ReloadPolicy,
    pub subflow_cap_register: Option<RegisterIndex>,
    pub min_bandwidth_register: Option<RegisterIndex>,
    pub max_bandwidth_register: Option<RegisterIndex>,
    pub mode_register: Option<RegisterIndex>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reload: ReloadPolicy::Reject,
            subflow_cap_register: Some(RegisterIndex(1)),
            min_bandwidth_register: Some(RegisterIndex(2)),
            max_bandwidth_register: Some(RegisterIndex(3)),
            mode_register: Some(RegisterIndex(4)),
        }
    }
}

impl PolicyConfig {
    /// A policy with no conventional registers; every register is opaque to the engine.
    pub fn opaque() -> Self {
        Self {
            reload: ReloadPolicy::Reject,
            subflow_cap_register: None,
            min_bandwidth_register: None,
            max_bandwidth_register: None,
            mode_register: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Minimum spacing between repeated decision-path warnings.
    pub min_interval_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
        }
    }
}

impl DiagnosticsConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("register_count must be within 1..={max}, got {got}")]
    RegisterCount { got: u8, max: u8 },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("policy register {field} = {index} is outside R1..=R{count}")]
    PolicyRegister {
        field: &'static str,
        index: RegisterIndex,
        count: u8,
    },
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check limits and policy registers against each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.register_count == 0 || limits.register_count > MAX_REGISTERS {
            return Err(ConfigError::RegisterCount {
                got: limits.register_count,
                max: MAX_REGISTERS,
            });
        }
        if limits.max_instructions == 0 {
            return Err(ConfigError::Zero {
                field: "max_instructions",
            });
        }
        if limits.step_budget == 0 {
            return Err(ConfigError::Zero {
                field: "step_budget",
            });
        }
        if limits.weight_total == 0 {
            return Err(ConfigError::Zero {
                field: "weight_total",
            });
        }

        let policy = [
            ("subflow_cap_register", self.policy.subflow_cap_register),
            ("min_bandwidth_register", self.policy.min_bandwidth_register),
            ("max_bandwidth_register", self.policy.max_bandwidth_register),
            ("mode_register", self.policy.mode_register),
        ];
        for (field, index) in policy {
            if let Some(index) = index {
                if index.slot(limits.register_count).is_none() {
                    return Err(ConfigError::PolicyRegister {
                        field,
                        index,
                        count: limits.register_count,
                    });
                }
            }
        }
        Ok(())
    }
}
