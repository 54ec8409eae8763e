//! # agentflow-settings
//!
//! Settings are loaded from three layers, lowest priority first:
//! 1. compiled defaults ([`AgentflowSettings::default()`])
//! 2. `~/.agentflow/settings.json`, deep-merged over the defaults
//! 3. `AGENTFLOW_*` environment variables

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{data_dir, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
