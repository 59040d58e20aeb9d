//! Analysis options
//!
//! One `AnalysisOptions` value is created per run and handed to the factory, the dataflow
//! engine and the inference engine. It can be read from processor arguments
//! (`-AcacheSize=100`) or from a TOML table.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

pub const DEFAULT_CACHE_SIZE: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Bound on each factory cache
    #[serde(alias = "cacheSize", alias = "atfCacheSize")]
    pub cache_size: usize,
    /// Disable factory caches entirely
    #[serde(alias = "doNotCache", alias = "atfDoNotCache")]
    pub do_not_cache: bool,
    /// Fields, array elements and calls may change under our feet: never refine them
    #[serde(alias = "concurrentSemantics")]
    pub concurrent_semantics: bool,
    /// Treat every method as side-effect free
    #[serde(alias = "assumeSideEffectFree")]
    pub assume_side_effect_free: bool,
    /// Reporter-only option, carried through untouched
    #[serde(alias = "warnUnneededSuppressions")]
    pub warn_unneeded_suppressions: bool,
    /// Reporter-only option, carried through untouched
    #[serde(alias = "requirePrefixInWarningSuppressions")]
    pub require_prefix_in_warning_suppressions: bool,
    /// Block visits after which merges use the widened upper bound
    #[serde(alias = "maxCountBeforeWidening")]
    pub max_count_before_widening: usize,
    /// Block visits after which the block input is forced to the empty store
    #[serde(alias = "maxBlockVisits")]
    pub max_block_visits: usize,
    /// Receivers tracked per store before the store is truncated
    #[serde(alias = "maxStoreSize")]
    pub max_store_size: usize,
    /// Incorporation steps per invocation before inference gives up
    #[serde(alias = "maxInferenceSteps")]
    pub max_inference_steps: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            do_not_cache: false,
            concurrent_semantics: false,
            assume_side_effect_free: false,
            warn_unneeded_suppressions: false,
            require_prefix_in_warning_suppressions: false,
            max_count_before_widening: 20,
            max_block_visits: 200,
            max_store_size: 512,
            max_inference_steps: 10_000,
        }
    }
}

impl AnalysisOptions {
    /// Parse `-Akey` / `-Akey=value` processor arguments
    pub fn from_processor_args<S: AsRef<str>>(args: &[S]) -> Result<Self, ConfigError> {
        let mut options = Self::default();
        for raw in args {
            let raw = raw.as_ref();
            let body = raw.strip_prefix("-A").unwrap_or(raw);
            let (key, value) = match body.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (body, None),
            };
            match key {
                "cacheSize" | "atfCacheSize" => options.cache_size = parse_count(key, value)?,
                "doNotCache" | "atfDoNotCache" => options.do_not_cache = parse_flag(key, value)?,
                "concurrentSemantics" => options.concurrent_semantics = parse_flag(key, value)?,
                "assumeSideEffectFree" => options.assume_side_effect_free = parse_flag(key, value)?,
                "warnUnneededSuppressions" => options.warn_unneeded_suppressions = parse_flag(key, value)?,
                "requirePrefixInWarningSuppressions" => {
                    options.require_prefix_in_warning_suppressions = parse_flag(key, value)?
                }
                "maxCountBeforeWidening" => options.max_count_before_widening = parse_count(key, value)?,
                "maxBlockVisits" => options.max_block_visits = parse_count(key, value)?,
                "maxStoreSize" => options.max_store_size = parse_count(key, value)?,
                "maxInferenceSteps" => options.max_inference_steps = parse_count(key, value)?,
                other => tracing::debug!(option = other, "ignoring unrecognized processor option"),
            }
        }
        Ok(options.sanitized())
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(source)?;
        Ok(options.sanitized())
    }

    /// Enforce minimums so the engines always make progress
    pub fn sanitized(mut self) -> Self {
        self.max_count_before_widening = self.max_count_before_widening.max(1);
        self.max_block_visits = self.max_block_visits.max(self.max_count_before_widening + 1);
        self.max_store_size = self.max_store_size.max(1);
        self.max_inference_steps = self.max_inference_steps.max(1);
        self
    }

    /// Capacity for each factory cache; `None` when caching is off
    pub fn effective_cache_size(&self) -> Option<NonZeroUsize> {
        if self.do_not_cache {
            None
        } else {
            NonZeroUsize::new(self.cache_size)
        }
    }
}

fn parse_count(key: &str, value: Option<&str>) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidOption {
        name: key.to_string(),
        value: value.unwrap_or_default().to_string(),
    };
    value.ok_or_else(invalid)?.trim().parse().map_err(|_| invalid())
}

fn parse_flag(key: &str, value: Option<&str>) -> Result<bool, ConfigError> {
    match value.map(str::trim) {
        None | Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ConfigError::InvalidOption {
            name: key.to_string(),
            value: other.to_string(),
        }),
    }
}
