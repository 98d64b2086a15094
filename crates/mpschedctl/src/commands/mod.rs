pub mod check;
pub mod simulate;

use std::path::Path;

use mpsched_core::EngineConfig;

/// Engine config from `path`, or the built-in defaults.
pub fn load_config(path: Option<&str>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(Path::new(path)),
        None => Ok(EngineConfig::default()),
    }
}
