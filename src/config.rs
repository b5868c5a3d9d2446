//! Crate configuration.
//!
//! Configuration is plain serde data with defaults. It can be loaded from a
//! JSON string or file and then overridden by `HYPERIBIS_*` environment
//! variables. Call [`IbisConfig::validate`] before use; the loaders do it
//! for you.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const ENV_MAX_ITERATIONS: &str = "HYPERIBIS_MAX_ITERATIONS";
const ENV_ORACLE_TIMEOUT_MS: &str = "HYPERIBIS_ORACLE_TIMEOUT_MS";
const ENV_MAX_RETRIES: &str = "HYPERIBIS_MAX_RETRIES";
const ENV_WORKERS: &str = "HYPERIBIS_WORKERS";

/// Limits and defaults for the propagation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Upper bound on fixed-point iterations per cyclic component.
    pub max_iterations: usize,
    /// Largest per-iteration change still considered stable.
    pub tolerance: f64,
    /// Strength used for links the assessor has not assessed.
    pub default_strength: f64,
    /// Belief at or above which a position counts as true when checking
    /// mutex exclusivity.
    pub truth_threshold: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 256,
            tolerance: 1e-9,
            default_strength: 1.0,
            truth_threshold: 0.5,
        }
    }
}

impl PropagationConfig {
    /// Validate limits.
    ///
    /// # Errors
    /// `InvalidConfig` for a zero iteration bound, or a non-positive or
    /// non-finite tolerance; `NonFiniteValue` for non-finite defaults.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_iterations == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_iterations must be > 0".to_string(),
            });
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ValidationError::InvalidConfig {
                reason: "tolerance must be finite and > 0".to_string(),
            });
        }
        for (field, value) in [
            ("default_strength", self.default_strength),
            ("truth_threshold", self.truth_threshold),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue {
                    field: field.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Limits for the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent oracle calls per document.
    pub workers: usize,
    /// Per-call oracle timeout.
    pub oracle_timeout_ms: u64,
    /// Retries after the first failed oracle call.
    pub max_retries: u32,
    /// First retry delay; doubled per attempt.
    pub retry_base_delay_ms: u64,
    /// Cap on the retry delay.
    pub retry_max_delay_ms: u64,
    /// Cosine similarity at or above which two texts are the same candidate.
    pub near_duplicate_threshold: f64,
    /// Characters per chunk for the default chunker.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Known issue questions passed to the oracle as context.
    pub max_context_items: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            oracle_timeout_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            near_duplicate_threshold: 0.9,
            chunk_size: 1_000,
            chunk_overlap: 200,
            max_context_items: 32,
        }
    }
}

impl PipelineConfig {
    /// Per-call oracle timeout.
    #[must_use]
    pub const fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .retry_base_delay_ms
            .saturating_mul(factor)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Validate limits.
    ///
    /// # Errors
    /// `InvalidConfig` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| {
            Err(ValidationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.workers == 0 {
            return invalid("workers must be > 0");
        }
        if self.oracle_timeout_ms == 0 {
            return invalid("oracle_timeout_ms must be > 0");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return invalid("retry_base_delay_ms must not exceed retry_max_delay_ms");
        }
        if !(self.near_duplicate_threshold > 0.0 && self.near_duplicate_threshold <= 1.0) {
            return invalid("near_duplicate_threshold must be in (0, 1]");
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            return invalid("chunk_overlap must be smaller than chunk_size");
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IbisConfig {
    /// Propagation engine limits.
    pub propagation: PropagationConfig,
    /// Extraction pipeline limits.
    pub pipeline: PipelineConfig,
}

impl IbisConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    ///
    /// # Errors
    /// `InvalidConfig` for unparsable JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("unparsable configuration: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    /// `InvalidConfig` if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&json)
    }

    /// Applies `HYPERIBIS_*` environment overrides and validates.
    ///
    /// # Errors
    /// `InvalidConfig` for unparsable variables or invalid results.
    pub fn with_env_overrides(self) -> Result<Self, ValidationError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup and validates.
    ///
    /// # Errors
    /// `InvalidConfig` for unparsable variables or invalid results.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ValidationError> {
        if let Some(v) = parse_var(&lookup, ENV_MAX_ITERATIONS)? {
            self.propagation.max_iterations = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_ORACLE_TIMEOUT_MS)? {
            self.pipeline.oracle_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            self.pipeline.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_WORKERS)? {
            self.pipeline.workers = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate both sections.
    ///
    /// # Errors
    /// The first section error.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.propagation.validate()?;
        self.pipeline.validate()
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ValidationError> {
    lookup(name).map_or(Ok(None), |val| {
        val.trim()
            .parse()
            .map(Some)
            .map_err(|_| ValidationError::InvalidConfig {
                reason: format!("{name} must be a non-negative integer, got '{val}'"),
            })
    })
}
