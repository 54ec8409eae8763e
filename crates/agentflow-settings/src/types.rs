use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings. Every section is `#[serde(default)]` so partial files work.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentflowSettings {
    pub api: ApiSettings,
    pub session: SessionSettings,
    pub autosave: AutosaveSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL including the API prefix, without trailing slash.
    pub base_url: String,
    /// Bearer token. Never written back by `Serialize`.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub connect_timeout_ms: u64,
    /// Applies to plain requests, not to event streams.
    pub request_timeout_ms: u64,
    /// An event stream that stays silent this long is treated as dropped.
    pub stream_idle_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".into(),
            token: None,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            stream_idle_timeout_ms: 120_000,
        }
    }
}

impl ApiSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// SQLite file holding client-persisted state. Empty means in-memory only.
    pub store_path: String,
    /// Key under which the agent session id is stored.
    pub namespace: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            store_path: crate::loader::data_dir()
                .join("state.db")
                .to_string_lossy()
                .into_owned(),
            namespace: "agentflow.agent_session_id".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutosaveSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

impl AutosaveSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-target overrides, e.g. `[["agentflow_client", "debug"]]`.
    pub module_levels: Vec<(String, String)>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            module_levels: Vec::new(),
        }
    }
}
