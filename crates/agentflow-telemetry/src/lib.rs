//! Tracing subscriber setup: an `EnvFilter` behind a reload handle plus a
//! JSON or human-readable formatting layer.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "agentflow_client" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from the string form used in settings. Unknown levels fall back
    /// to INFO for the default and are dropped for module overrides.
    pub fn from_strings(level: &str, module_levels: &[(String, String)], json: bool) -> Self {
        Self {
            log_level: parse_level(level).unwrap_or(Level::INFO),
            module_levels: module_levels
                .iter()
                .filter_map(|(m, l)| parse_level(l).map(|lvl| (m.clone(), lvl)))
                .collect(),
            json,
        }
    }

    /// `EnvFilter` directive string, e.g. `info,agentflow_client=debug`.
    pub fn filter_directive(&self) -> String {
        directive_with(&self.log_level.to_string().to_lowercase(), &self.module_levels)
    }
}

/// Parse `trace`/`debug`/`info`/`warn`/`error` (case-insensitive).
pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Returned by [`init_telemetry`]; owns the runtime-adjustable filter.
pub struct TelemetryGuard {
    base: String,
    module_levels: Arc<RwLock<Vec<(String, Level)>>>,
    handle: FilterHandle,
    installed: bool,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime. Returns false
    /// when the filter is no longer attached to a subscriber.
    pub fn set_module_level(&self, module: &str, level: Level) -> bool {
        let directive = {
            let mut levels = self.module_levels.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            directive_with(&self.base, &levels)
        };
        match self.handle.reload(EnvFilter::new(directive)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "log filter reload skipped");
                false
            }
        }
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.read().clone()
    }

    /// False when another global subscriber was already set.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

fn directive_with(base: &str, module_levels: &[(String, Level)]) -> String {
    let mut directive = base.to_string();
    for (module, level) in module_levels {
        directive.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directive
}

/// Filter layer behind a reload handle. `base` is either `RUST_LOG` or the
/// configured default level.
fn reloadable_filter(
    base: String,
    module_levels: Vec<(String, Level)>,
) -> (reload::Layer<EnvFilter, Registry>, TelemetryGuard) {
    let (layer, handle) = reload::Layer::new(EnvFilter::new(directive_with(&base, &module_levels)));
    let guard = TelemetryGuard {
        base,
        module_levels: Arc::new(RwLock::new(module_levels)),
        handle,
        installed: false,
    };
    (layer, guard)
}

/// Initialize the telemetry subsystem. Call once at startup; later calls
/// leave the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let base = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.log_level.to_string().to_lowercase());
    let (filter, mut guard) = reloadable_filter(base, config.module_levels.clone());

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    guard.installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_includes_module_overrides() {
        let config = TelemetryConfig::from_strings(
            "warn",
            &[
                ("agentflow_client".into(), "debug".into()),
                ("noisy".into(), "bogus".into()),
            ],
            false,
        );
        assert_eq!(config.log_level, Level::WARN);
        assert_eq!(config.module_levels.len(), 1);
        assert_eq!(config.filter_directive(), "warn,agentflow_client=debug");
    }

    #[test]
    fn unknown_default_level_falls_back_to_info() {
        let config = TelemetryConfig::from_strings("loud", &[], true);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.json);
    }

    #[test]
    fn set_module_level_upserts() {
        let (_filter, guard) = reloadable_filter("info".into(), vec![("a".into(), Level::INFO)]);
        guard.set_module_level("a", Level::DEBUG);
        guard.set_module_level("b", Level::ERROR);
        let levels = guard.module_levels();
        assert_eq!(levels, vec![("a".into(), Level::DEBUG), ("b".into(), Level::ERROR)]);
    }

    #[test]
    fn set_module_level_changes_filtering() {
        let (filter, guard) = reloadable_filter("warn".into(), Vec::new());
        let subscriber = tracing_subscriber::registry().with(filter);
        tracing::subscriber::with_default(subscriber, || {
            assert!(!tracing::enabled!(target: "agentflow_client::sse", Level::DEBUG));

            assert!(guard.set_module_level("agentflow_client", Level::DEBUG));
            assert!(tracing::enabled!(target: "agentflow_client::http", Level::DEBUG));
            assert!(!tracing::enabled!(target: "agentflow_store", Level::DEBUG));

            assert!(guard.set_module_level("agentflow_client", Level::ERROR));
            assert!(!tracing::enabled!(target: "agentflow_client::mock", Level::WARN));
        });
    }

    #[test]
    fn reload_after_subscriber_dropped_reports_false() {
        let (filter, guard) = reloadable_filter("info".into(), Vec::new());
        drop(filter);
        assert!(!guard.set_module_level("agentflow_client", Level::DEBUG));
        assert_eq!(guard.module_levels().len(), 1);
    }

    #[test]
    fn second_init_does_not_panic() {
        let _first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig::default());
        assert!(!second.installed());
    }
}
