//! Command implementations by domain.

pub mod config;
pub mod demo;
pub mod psk;

use osp_types::config::load_config;
use osp_types::AgentConfig;
use std::path::PathBuf;

/// Effective configuration: the given file, or defaults.
pub(crate) fn load(config: Option<PathBuf>) -> AgentConfig {
    match config {
        Some(path) => load_config(&path),
        None => AgentConfig::default(),
    }
}
