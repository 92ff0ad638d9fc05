//! Runtime configuration for a [`crate::Graph`].

use serde::Deserialize;
use thiserror::Error;

/// What to do when a fixed-point result does not fit its format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Keep the saturated value and carry on.
    #[default]
    Saturate,
    /// Fail the operation with [`crate::TensorError::NumericRange`].
    Trap,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Seed for `random_fill`.
    pub seed: u64,
    pub overflow: OverflowPolicy,
    /// Upper bound on live intermediate nodes between sweeps. `None` is unbounded.
    pub max_pending_nodes: Option<usize>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            overflow: OverflowPolicy::Saturate,
            max_pending_nodes: None,
        }
    }
}

/// Errors emitted when reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
    #[error("failed to read {var}: {source}")]
    Env {
        var: &'static str,
        #[source]
        source: std::env::VarError,
    },
}

impl GraphConfig {
    /// Preset for the embedded profile: a bounded node arena.
    pub fn embedded() -> Self {
        Self {
            max_pending_nodes: Some(256),
            ..Self::default()
        }
    }

    /// Builds a configuration from the defaults overridden by
    /// `FIXGRAD_SEED`, `FIXGRAD_OVERFLOW` (`saturate` | `trap`) and
    /// `FIXGRAD_MAX_PENDING`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| match std::env::var(var) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(source) => Err(ConfigError::Env { var, source }),
        })
    }

    fn from_lookup(
        lookup: impl Fn(&'static str) -> Result<Option<String>, ConfigError>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("FIXGRAD_SEED")? {
            cfg.seed = parse("FIXGRAD_SEED", &raw)?;
        }

        if let Some(raw) = lookup("FIXGRAD_OVERFLOW")? {
            cfg.overflow = match raw.trim().to_ascii_lowercase().as_str() {
                "saturate" => OverflowPolicy::Saturate,
                "trap" => OverflowPolicy::Trap,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "FIXGRAD_OVERFLOW",
                        value: raw,
                    });
                }
            };
        }

        if let Some(raw) = lookup("FIXGRAD_MAX_PENDING")? {
            cfg.max_pending_nodes = Some(parse("FIXGRAD_MAX_PENDING", &raw)?);
        }

        Ok(cfg)
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    #[must_use]
    pub fn with_max_pending_nodes(mut self, max: Option<usize>) -> Self {
        self.max_pending_nodes = max;
        self
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
    })
}
