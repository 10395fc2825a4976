//! # Config - DiscoDB build options
//!
//! Knobs recognized by the store constructor and the perfect-hash index.
//! Defaults are chosen for general workloads; every field can be overridden
//! in code or through environment variables via [`BuildOptions::from_env`].
//!
//! ## Environment
//!
//! ```text
//! DISCODB_DEDUP_VALUES  collapse identical values per key   (default: "true")
//! DISCODB_VALUE_ORDER   "insertion" or "unspecified"         (default: "insertion")
//! DISCODB_GAMMA         bins per remaining key, per level    (default: 2.0)
//! DISCODB_MAX_LEVELS    levels before an attempt gives up    (default: 32)
//! DISCODB_MAX_ATTEMPTS  reseeded construction attempts       (default: 8)
//! DISCODB_SEED          base hash seed                       (default: 0x5eed_d15c_0db0_0001)
//! ```

use std::str::FromStr;

/// Default oversizing factor for each perfect-hash level.
pub const DEFAULT_GAMMA: f64 = 2.0;
/// Smallest usable gamma: one bin per remaining key.
pub const MIN_GAMMA: f64 = 1.0;
/// Largest gamma honored; higher values only waste index space.
pub const MAX_GAMMA: f64 = 16.0;
/// Default number of levels one construction attempt may use.
pub const DEFAULT_MAX_LEVELS: usize = 32;
/// Default number of reseeded attempts before construction fails.
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;
/// Default base seed for the perfect-hash level hashes.
pub const DEFAULT_SEED: u64 = 0x5eed_d15c_0db0_0001;

/// Order of values within one key's ValueSet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueOrder {
    /// Values are stored in the order they were first added.
    #[default]
    Insertion,
    /// No order is promised. Values are stored sorted bytewise.
    Unspecified,
}

impl FromStr for ValueOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insertion" => Ok(ValueOrder::Insertion),
            "unspecified" | "unordered" => Ok(ValueOrder::Unspecified),
            other => Err(format!("unknown value order: {other}")),
        }
    }
}

/// Tuning for perfect-hash construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexConfig {
    /// Bins allocated per remaining key at each level. Read through
    /// [`effective_gamma`](IndexConfig::effective_gamma).
    pub gamma: f64,
    /// Levels one attempt may create before it is abandoned.
    pub max_levels: usize,
    /// Attempts, each with a fresh seed, before construction fails.
    pub max_attempts: usize,
    /// Base seed; attempt `i` derives its own seed from this.
    pub seed: u64,
}

impl IndexConfig {
    /// `gamma` clamped to `[MIN_GAMMA, MAX_GAMMA]`. A NaN or infinite gamma
    /// falls back to [`DEFAULT_GAMMA`].
    #[must_use]
    pub fn effective_gamma(&self) -> f64 {
        if self.gamma.is_finite() {
            self.gamma.clamp(MIN_GAMMA, MAX_GAMMA)
        } else {
            DEFAULT_GAMMA
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            gamma: DEFAULT_GAMMA,
            max_levels: DEFAULT_MAX_LEVELS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Options recognized by the store constructor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Collapse identical values added under the same key.
    pub dedup_values: bool,
    /// Order of values within each key.
    pub value_order: ValueOrder,
    /// Perfect-hash construction tuning.
    pub index: IndexConfig,
}

impl BuildOptions {
    /// Default options: deduplicated values in insertion order.
    pub fn new() -> Self {
        Self {
            dedup_values: true,
            value_order: ValueOrder::Insertion,
            index: IndexConfig::default(),
        }
    }

    pub fn with_dedup_values(mut self, dedup: bool) -> Self {
        self.dedup_values = dedup;
        self
    }

    pub fn with_value_order(mut self, order: ValueOrder) -> Self {
        self.value_order = order;
        self
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    /// Builds options from the defaults, overlaid with any `DISCODB_*`
    /// environment variables that are set.
    ///
    /// Unparsable values are ignored with a warning and the default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through
    /// `lookup`, so callers (and tests) can supply their own source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new();
        let mut gamma: f64 = env_or(&lookup, "DISCODB_GAMMA", defaults.index.gamma);
        if !gamma.is_finite() {
            tracing::warn!(key = "DISCODB_GAMMA", value = gamma, "ignoring non-finite gamma");
            gamma = defaults.index.gamma;
        }
        Self {
            dedup_values: env_or(&lookup, "DISCODB_DEDUP_VALUES", defaults.dedup_values),
            value_order: env_or(&lookup, "DISCODB_VALUE_ORDER", defaults.value_order),
            index: IndexConfig {
                gamma: gamma.clamp(MIN_GAMMA, MAX_GAMMA),
                max_levels: env_or(&lookup, "DISCODB_MAX_LEVELS", defaults.index.max_levels)
                    .max(1),
                max_attempts: env_or(&lookup, "DISCODB_MAX_ATTEMPTS", defaults.index.max_attempts)
                    .max(1),
                seed: env_or(&lookup, "DISCODB_SEED", defaults.index.seed),
            },
        }
    }

    /// Whether values are kept in insertion order.
    #[must_use]
    pub fn preserves_order(&self) -> bool {
        self.value_order == ValueOrder::Insertion
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `key` through `lookup` and parses it, falling back to `default`.
fn env_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable build option");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_dedup_in_insertion_order() {
        let opts = BuildOptions::new();
        assert!(opts.dedup_values);
        assert_eq!(opts.value_order, ValueOrder::Insertion);
        assert!(opts.preserves_order());
        assert_eq!(opts.index, IndexConfig::default());
    }

    #[test]
    fn lookup_overrides_every_field() {
        let opts = BuildOptions::from_lookup(lookup_from(&[
            ("DISCODB_DEDUP_VALUES", "false"),
            ("DISCODB_VALUE_ORDER", "Unspecified"),
            ("DISCODB_GAMMA", "1.5"),
            ("DISCODB_MAX_LEVELS", "12"),
            ("DISCODB_MAX_ATTEMPTS", "3"),
            ("DISCODB_SEED", "42"),
        ]));
        assert!(!opts.dedup_values);
        assert_eq!(opts.value_order, ValueOrder::Unspecified);
        assert_eq!(opts.index.gamma, 1.5);
        assert_eq!(opts.index.max_levels, 12);
        assert_eq!(opts.index.max_attempts, 3);
        assert_eq!(opts.index.seed, 42);
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let opts = BuildOptions::from_lookup(lookup_from(&[
            ("DISCODB_DEDUP_VALUES", "sometimes"),
            ("DISCODB_VALUE_ORDER", "random"),
            ("DISCODB_MAX_ATTEMPTS", "-1"),
        ]));
        assert_eq!(opts, BuildOptions::new());
    }

    #[test]
    fn out_of_range_tuning_is_clamped() {
        let opts = BuildOptions::from_lookup(lookup_from(&[
            ("DISCODB_GAMMA", "0.25"),
            ("DISCODB_MAX_LEVELS", "0"),
            ("DISCODB_MAX_ATTEMPTS", "0"),
        ]));
        assert_eq!(opts.index.gamma, 1.0);
        assert_eq!(opts.index.max_levels, 1);
        assert_eq!(opts.index.max_attempts, 1);
    }

    #[test]
    fn non_finite_gamma_keeps_default() {
        for raw in ["inf", "-inf", "NaN"] {
            let opts = BuildOptions::from_lookup(lookup_from(&[("DISCODB_GAMMA", raw)]));
            assert_eq!(opts.index.gamma, DEFAULT_GAMMA, "DISCODB_GAMMA={}", raw);
        }
    }

    #[test]
    fn huge_gamma_is_capped() {
        let opts = BuildOptions::from_lookup(lookup_from(&[("DISCODB_GAMMA", "1e300")]));
        assert_eq!(opts.index.gamma, MAX_GAMMA);
    }

    #[test]
    fn effective_gamma_sanitizes_code_built_config() {
        let with = |gamma| IndexConfig {
            gamma,
            ..IndexConfig::default()
        };
        assert_eq!(with(f64::INFINITY).effective_gamma(), DEFAULT_GAMMA);
        assert_eq!(with(f64::NAN).effective_gamma(), DEFAULT_GAMMA);
        assert_eq!(with(1e9).effective_gamma(), MAX_GAMMA);
        assert_eq!(with(0.1).effective_gamma(), MIN_GAMMA);
        assert_eq!(with(3.0).effective_gamma(), 3.0);
    }

    #[test]
    fn builder_methods_chain() {
        let opts = BuildOptions::new()
            .with_dedup_values(false)
            .with_value_order(ValueOrder::Unspecified);
        assert!(!opts.dedup_values);
        assert!(!opts.preserves_order());
    }
}
