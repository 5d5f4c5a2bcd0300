//! Configuration Module - Barrier Tuning Parameters
//!
//! Manages the parameters of barrier emission and of the runtime routines
//! behind the stubs.

use crate::color::EPOCH_ADDRESS;

/// Configuration for JIT barrier support
///
/// # Examples
///
/// ```rust
/// use fgc_jit::BarrierConfig;
///
/// let config = BarrierConfig {
///     atomic_retry_limit: 4,
///     trace_stubs: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct BarrierConfig {
    /// Retries the atomic and healing paths attempt before escalating
    ///
    /// An attempt is one compare-and-swap issued by a runtime routine after
    /// the compiled atomic instruction. Once `atomic_retry_limit` attempts
    /// have lost to concurrent re-coloring, the collector's slow path takes
    /// over.
    /// Default: 16
    pub atomic_retry_limit: u32,

    /// Address of the word holding the current good color
    ///
    /// Compiled fast paths read it on every color check.
    /// Default: `EPOCH_ADDRESS`
    pub epoch_address: usize,

    /// Number of blobs the code cache used for the stub routines may hold
    ///
    /// Default: 1024
    pub code_cache_capacity: usize,

    /// Log each barrier stub emitted, with its diagnostic name
    ///
    /// Default: false
    pub trace_stubs: bool,

    /// Enable verbose event output
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            atomic_retry_limit: DEFAULT_ATOMIC_RETRY_LIMIT,
            epoch_address: EPOCH_ADDRESS,
            code_cache_capacity: 1024,
            trace_stubs: false,
            verbose: false,
        }
    }
}

impl BarrierConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.atomic_retry_limit == 0 {
            return Err(ConfigError::InvalidRetryLimit(
                "atomic_retry_limit must be > 0".to_string(),
            ));
        }

        if self.atomic_retry_limit > MAX_ATOMIC_RETRY_LIMIT {
            return Err(ConfigError::InvalidRetryLimit(format!(
                "atomic_retry_limit must be <= {}",
                MAX_ATOMIC_RETRY_LIMIT
            )));
        }

        if self.epoch_address == 0 || self.epoch_address % WORD_ALIGNMENT != 0 {
            return Err(ConfigError::InvalidEpochAddress(format!(
                "epoch_address {:#x} must be non-null and word aligned",
                self.epoch_address
            )));
        }

        // Four runtime routines at minimum
        if self.code_cache_capacity < 4 {
            return Err(ConfigError::InvalidCodeCache(
                "code_cache_capacity must hold at least the 4 stub routines".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - FGC_JIT_ATOMIC_RETRY_LIMIT
    /// - FGC_JIT_CODE_CACHE_CAPACITY
    /// - FGC_JIT_TRACE_STUBS
    /// - FGC_JIT_VERBOSE
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FGC_JIT_ATOMIC_RETRY_LIMIT") {
            if let Ok(limit) = val.parse::<u32>() {
                config.atomic_retry_limit = limit;
            }
        }

        if let Ok(val) = std::env::var("FGC_JIT_CODE_CACHE_CAPACITY") {
            if let Ok(capacity) = val.parse::<usize>() {
                config.code_cache_capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var("FGC_JIT_TRACE_STUBS") {
            config.trace_stubs = is_truthy(&val);
        }

        if let Ok(val) = std::env::var("FGC_JIT_VERBOSE") {
            config.verbose = is_truthy(&val);
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid retry limit: {0}")]
    InvalidRetryLimit(String),

    #[error("Invalid epoch address: {0}")]
    InvalidEpochAddress(String),

    #[error("Invalid code cache: {0}")]
    InvalidCodeCache(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

pub const DEFAULT_ATOMIC_RETRY_LIMIT: u32 = 16;

pub const MAX_ATOMIC_RETRY_LIMIT: u32 = 1 << 16;

const WORD_ALIGNMENT: usize = 8;

fn is_truthy(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BarrierConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.atomic_retry_limit, DEFAULT_ATOMIC_RETRY_LIMIT);
    }

    #[test]
    fn test_invalid_retry_limit() {
        let config = BarrierConfig {
            atomic_retry_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryLimit(_))
        ));

        let config = BarrierConfig {
            atomic_retry_limit: MAX_ATOMIC_RETRY_LIMIT + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_epoch_address() {
        let config = BarrierConfig {
            epoch_address: EPOCH_ADDRESS + 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEpochAddress(_))
        ));
    }

    #[test]
    fn test_invalid_code_cache() {
        let config = BarrierConfig {
            code_cache_capacity: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCodeCache(_))
        ));
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(!is_truthy("yes"));
    }
}
