//! Runtime configuration for the bridge.

use gdbridge_sys::EngineVersion;

/// Oldest engine interface this build can drive.
pub const MIN_ENGINE_VERSION: (u32, u32) = (4, 1);

/// Environment variable read for the log filter when none is configured.
pub const LOG_ENV_VAR: &str = "GDBRIDGE_LOG";

/// Settings applied by [`crate::init::initialize`].
///
/// `Default` matches the production setup. Setters consume and return the
/// config so it can be built inline:
///
/// ```
/// use gdbridge_core::BridgeConfig;
///
/// let config = BridgeConfig::default()
///     .with_log_filter("gdbridge=debug")
///     .with_report_leaks(true);
/// assert!(config.report_leaks);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Minimum `(major, minor)` engine version accepted at load.
    pub min_engine_version: (u32, u32),
    /// Forward callback failures to the engine's error console.
    pub report_callback_errors: bool,
    /// `tracing` filter directive; `None` falls back to [`LOG_ENV_VAR`].
    pub log_filter: Option<String>,
    /// Whether to install a global `tracing` subscriber at all.
    pub install_logging: bool,
    /// Log the number of live handles left at deinitialization.
    pub report_leaks: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            min_engine_version: MIN_ENGINE_VERSION,
            report_callback_errors: true,
            log_filter: None,
            install_logging: true,
            report_leaks: false,
        }
    }
}

impl BridgeConfig {
    pub fn with_min_engine_version(mut self, major: u32, minor: u32) -> Self {
        self.min_engine_version = (major, minor);
        self
    }

    pub fn with_report_callback_errors(mut self, report: bool) -> Self {
        self.report_callback_errors = report;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    pub fn with_logging(mut self, install: bool) -> Self {
        self.install_logging = install;
        self
    }

    pub fn with_report_leaks(mut self, report: bool) -> Self {
        self.report_leaks = report;
        self
    }

    /// True when `version` is at least the configured minimum.
    pub fn accepts(&self, version: &EngineVersion) -> bool {
        (version.major, version.minor) >= self.min_engine_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(major: u32, minor: u32) -> EngineVersion {
        EngineVersion {
            major,
            minor,
            patch: 0,
            abi_hash: 0,
        }
    }

    #[test]
    fn test_default_accepts_minimum() {
        let config = BridgeConfig::default();
        assert!(config.accepts(&version(4, 1)));
        assert!(config.accepts(&version(4, 3)));
        assert!(config.accepts(&version(5, 0)));
        assert!(!config.accepts(&version(4, 0)));
        assert!(!config.accepts(&version(3, 9)));
    }

    #[test]
    fn test_builder() {
        let config = BridgeConfig::default()
            .with_min_engine_version(4, 2)
            .with_report_callback_errors(false)
            .with_logging(false);
        assert!(!config.accepts(&version(4, 1)));
        assert!(!config.report_callback_errors);
        assert!(!config.install_logging);
    }
}
