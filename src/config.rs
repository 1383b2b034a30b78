//! Trace configuration.
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Environment variables**: `TASYNC_*`, see the table below
//! 2. **Config file**: a TOML file (requires the `config-file` feature)
//! 3. **Defaults**: [`Config::default()`]
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TASYNC_TRACE` | `bool` | `trace.enabled` |
//! | `TASYNC_TRACE_MAX_HOPS` | `usize` | `trace.max_hops` |
//! | `TASYNC_NATIVE_BACKTRACE` | `bool` | `trace.native_backtraces` |
//!
//! A loaded configuration takes effect once [`Config::install`] is called.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tracer::{self, DEFAULT_SEPARATOR};
use crate::tracing_compat::info;

/// Environment variable toggling trace capture.
pub const ENV_TRACE: &str = "TASYNC_TRACE";
/// Environment variable bounding the number of hops in a trace.
pub const ENV_TRACE_MAX_HOPS: &str = "TASYNC_TRACE_MAX_HOPS";
/// Environment variable toggling native backtrace capture.
pub const ENV_NATIVE_BACKTRACE: &str = "TASYNC_NATIVE_BACKTRACE";

/// Top-level configuration.
///
/// ```toml
/// [trace]
/// enabled = true
/// max_hops = 16
/// native_backtraces = false
/// separator = "*** tasync ***"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trace capture settings.
    pub trace: TraceConfig,
}

/// Trace capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Whether snapshots are captured at all.
    pub enabled: bool,
    /// Maximum number of hop sections in a reconstructed trace. `None` keeps
    /// every hop.
    pub max_hops: Option<usize>,
    /// Whether native backtraces are captured alongside snapshots. Only
    /// honored with the `native-stack-traces` feature.
    pub native_backtraces: bool,
    /// Line written between hop sections.
    pub separator: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hops: None,
            native_backtraces: false,
            separator: DEFAULT_SEPARATOR.to_owned(),
        }
    }
}

impl Config {
    /// Returns the defaults with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] when a variable is set to a value
    /// that cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies the `TASYNC_*` variables that are set in the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] on an unparseable value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(val) = lookup(ENV_TRACE) {
            self.trace.enabled = parse_bool(ENV_TRACE, &val)?;
        }
        if let Some(val) = lookup(ENV_TRACE_MAX_HOPS) {
            self.trace.max_hops = Some(parse_usize(ENV_TRACE_MAX_HOPS, &val)?);
        }
        if let Some(val) = lookup(ENV_NATIVE_BACKTRACE) {
            self.trace.native_backtraces = parse_bool(ENV_NATIVE_BACKTRACE, &val)?;
        }
        Ok(())
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or mistyped keys.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Reads and parses a TOML file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, and the errors
    /// of [`Config::from_toml_str`] and [`Config::apply_env_overrides`].
    #[cfg(feature = "config-file")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies this configuration to the whole process.
    pub fn install(&self) {
        tracer::apply(&self.trace);
        info!(
            enabled = self.trace.enabled,
            max_hops = ?self.trace.max_hops,
            native = self.trace.native_backtraces,
            "trace configuration installed"
        );
    }
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: val.to_owned(),
    })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: val.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.trace.enabled);
        assert_eq!(config.trace.max_hops, None);
        assert!(!config.trace.native_backtraces);
        assert_eq!(config.trace.separator, DEFAULT_SEPARATOR);
    }

    #[test]
    fn unset_vars_leave_defaults() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[])).expect("no overrides");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                (ENV_TRACE, "off"),
                (ENV_TRACE_MAX_HOPS, " 4 "),
                (ENV_NATIVE_BACKTRACE, "1"),
            ]))
            .expect("valid overrides");
        assert!(!config.trace.enabled);
        assert_eq!(config.trace.max_hops, Some(4));
        assert!(config.trace.native_backtraces);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_TRACE, "maybe")]))
            .expect_err("not a bool");
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_TRACE, .. }));
        assert_eq!(err.to_string(), "invalid value \"maybe\" for TASYNC_TRACE");

        let err = config
            .apply_overrides(lookup(&[(ENV_TRACE_MAX_HOPS, "-1")]))
            .expect_err("not a usize");
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_TRACE_MAX_HOPS, .. }));
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_string(&Config::default()).expect("serialize");
        let back: Config = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, Config::default());
        let partial: Config = serde_json::from_str(r#"{"trace":{"max_hops":2}}"#).expect("partial");
        assert_eq!(partial.trace.max_hops, Some(2));
        assert!(partial.trace.enabled);
    }

    #[cfg(feature = "config-file")]
    mod toml_tests {
        use super::*;
        use std::io::Write;

        #[test]
        fn parse_full_config() {
            let config = Config::from_toml_str(
                r#"
                [trace]
                enabled = false
                max_hops = 3
                native_backtraces = true
                separator = "---"
                "#,
            )
            .expect("valid toml");
            assert!(!config.trace.enabled);
            assert_eq!(config.trace.max_hops, Some(3));
            assert!(config.trace.native_backtraces);
            assert_eq!(config.trace.separator, "---");
        }

        #[test]
        fn parse_empty_config() {
            assert_eq!(Config::from_toml_str("").expect("empty"), Config::default());
        }

        #[test]
        fn parse_wrong_type() {
            let err = Config::from_toml_str("[trace]\nmax_hops = \"many\"").expect_err("wrong type");
            assert!(matches!(err, ConfigError::Parse(_)));
        }

        #[test]
        fn from_file_reads_toml() {
            let mut file = tempfile::NamedTempFile::new().expect("temp file");
            writeln!(file, "[trace]\nseparator = \"~~~\"").expect("write");
            let config = Config::from_file(file.path()).expect("load");
            assert_eq!(config.trace.separator, "~~~");
        }

        #[test]
        fn missing_file_is_io_error() {
            let dir = tempfile::tempdir().expect("temp dir");
            let err = Config::from_file(dir.path().join("absent.toml")).expect_err("missing");
            assert!(matches!(err, ConfigError::Io(_)));
        }
    }
}
