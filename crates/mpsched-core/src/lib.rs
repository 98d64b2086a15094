pub mod config;
pub mod types;

pub use config::{
    ConfigError, DiagnosticsConfig, EngineConfig, LimitsConfig, PolicyConfig, ReloadPolicy,
};
pub use types::*;
