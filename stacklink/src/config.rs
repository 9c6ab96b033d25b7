//! Configuration.
//!
//! A [`Config`] travels inside every [`Linker`](crate::Linker). Handles that
//! attach without an explicit linker use the process-wide default returned by
//! [`config()`], which can be set once with [`configure()`] or is otherwise
//! read from the environment.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STACKLINK_LINKING` | Enable stack linking and cross-linking ("true"/"false") | true |
//! | `STACKLINK_MAX_LIVE_BLOCKS` | Maximum number of live shared blocks | unlimited |
//!
//! # Example
//!
//! ```rust
//! use stacklink::Config;
//!
//! // Always fall back to atomic counting, like `Arc`.
//! let counting_only = Config::default().with_linking(false);
//! assert!(!counting_only.linking);
//!
//! // Refuse to ever leave stack confinement.
//! let strict = Config::strict();
//! assert_eq!(strict.max_live_blocks, Some(0));
//! ```

use std::env;
use std::sync::OnceLock;

/// Variable enabling or disabling the linking fast paths.
pub const ENV_LINKING: &str = "STACKLINK_LINKING";

/// Variable bounding the number of live shared blocks.
pub const ENV_MAX_LIVE_BLOCKS: &str = "STACKLINK_MAX_LIVE_BLOCKS";

/// Ownership policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Link stack copies to their stack root and cross-link a stack copy of
    /// a unique heap owner. When false every copy goes through a shared block.
    /// Default: true.
    pub linking: bool,

    /// Maximum number of shared blocks alive in the process.
    /// `None` means unlimited (default). `Some(0)` forbids shared counting.
    pub max_live_blocks: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Default configuration: linking enabled, no block limit.
    pub const fn new() -> Self {
        Self {
            linking: true,
            max_live_blocks: None,
        }
    }

    /// Configuration rejecting any shared block allocation.
    pub const fn strict() -> Self {
        Self {
            linking: true,
            max_live_blocks: Some(0),
        }
    }

    /// Sets [`Config::linking`].
    pub const fn with_linking(mut self, linking: bool) -> Self {
        self.linking = linking;
        self
    }

    /// Sets [`Config::max_live_blocks`].
    pub const fn with_max_live_blocks(mut self, limit: Option<usize>) -> Self {
        self.max_live_blocks = limit;
        self
    }

    /// Loads configuration from `STACKLINK_*` environment variables.
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup(ENV_LINKING).as_deref().and_then(parse_bool) {
            config.linking = val;
        }

        if let Some(val) = lookup(ENV_MAX_LIVE_BLOCKS).and_then(|s| s.trim().parse().ok()) {
            config.max_live_blocks = Some(val);
        }

        config
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Sets the process-wide default configuration.
///
/// Only the first call wins; later calls return the rejected config.
pub fn configure(config: Config) -> Result<(), Config> {
    CONFIG.set(config)
}

/// Returns the process-wide default configuration.
///
/// Initialized from the environment on first use unless [`configure()`] ran
/// before.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.linking);
        assert_eq!(config.max_live_blocks, None);
        assert_eq!(Config::from_lookup(lookup(&[])), config);
    }

    #[test]
    fn test_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            (ENV_LINKING, "off"),
            (ENV_MAX_LIVE_BLOCKS, " 12 "),
        ]));
        assert!(!config.linking);
        assert_eq!(config.max_live_blocks, Some(12));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = Config::from_lookup(lookup(&[
            (ENV_LINKING, "maybe"),
            (ENV_MAX_LIVE_BLOCKS, "-3"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_bool() {
        for yes in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(yes), Some(true), "{yes}");
        }
        for no in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(no), Some(false), "{no}");
        }
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_builders() {
        let config = Config::new().with_linking(false).with_max_live_blocks(Some(4));
        assert!(!config.linking);
        assert_eq!(config.max_live_blocks, Some(4));
        assert_eq!(Config::strict().max_live_blocks, Some(0));
    }
}
