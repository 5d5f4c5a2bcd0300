//! Error Module - Barrier Layer Error Types
//!
//! # Error Categories
//!
//! ## Invariant Violations
//! - `InvariantViolation` - Emission asked to do something inconsistent
//! - `StubsNotGenerated` - Stub address requested before generation
//! - `UnsupportedDecorators` - Decorators inconsistent with the access kind
//!
//! ## Code Generation Errors
//! - `CodeGen` - Assembly, installation or execution of LIR failed
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid configuration
//!
//! Every error here is local to one compilation unit. Color races at run
//! time are not errors; they are resolved inside the stub routines.

use crate::config::ConfigError;
use crate::decorators::DecoratorSet;
use faxc_lir::LirError;
use thiserror::Error;

/// Main error type for barrier emission and stub generation
#[derive(Debug, Clone, Error)]
pub enum BarrierError {
    /// Internal invariant broken during emission
    ///
    /// **When returned:** An access reaches barrier emission in a shape the
    /// protocol cannot honour, e.g. a reference cmpxchg without a result.
    ///
    /// **Recovery strategy:** Abort compilation of the enclosing unit only.
    #[error("Barrier invariant violated: {0}")]
    InvariantViolation(String),

    /// Stub address table used before `generate()` completed
    ///
    /// **When returned:** Emission needs a routine address but the table is
    /// still empty.
    ///
    /// **Recovery strategy:** Abort the compilation unit; generate stubs at
    /// startup before compiling anything.
    #[error("Barrier stubs used before generation completed")]
    StubsNotGenerated,

    /// Decorators inconsistent with the access kind
    ///
    /// **When returned:** e.g. both in-heap and native, or two reference
    /// strengths at once.
    ///
    /// **Recovery strategy:** Abort the compilation unit.
    #[error("Unsupported decorators {decorators:?}: {reason}")]
    UnsupportedDecorators {
        decorators: DecoratorSet,
        reason: String,
    },

    /// LIR assembly, code installation or execution failed
    #[error("Code generation failed: {0}")]
    CodeGen(#[from] LirError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BarrierError {
    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            BarrierError::InvariantViolation(_)
                | BarrierError::StubsNotGenerated
                | BarrierError::UnsupportedDecorators { .. }
        )
    }
}

impl From<ConfigError> for BarrierError {
    fn from(err: ConfigError) -> Self {
        BarrierError::Configuration(err.to_string())
    }
}

/// Result type alias for barrier operations
pub type Result<T> = std::result::Result<T, BarrierError>;

/// Early return with a `BarrierError::InvariantViolation`
#[macro_export]
macro_rules! ensure_invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::BarrierError::InvariantViolation(format!($($arg)*)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bug_classification() {
        assert!(BarrierError::StubsNotGenerated.is_bug());
        assert!(BarrierError::InvariantViolation("x".into()).is_bug());
        assert!(!BarrierError::CodeGen(LirError::StackUnderflow).is_bug());
        assert!(!BarrierError::Configuration("x".into()).is_bug());
    }

    #[test]
    fn test_lir_errors_convert() {
        let err: BarrierError = LirError::CodeCacheFull { capacity: 1 }.into();
        assert!(matches!(err, BarrierError::CodeGen(_)));
        assert!(err.to_string().contains("capacity 1"));
    }
}
