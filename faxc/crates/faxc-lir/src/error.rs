//! LIR error types

use thiserror::Error;

/// Errors raised while assembling, installing or executing LIR
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LirError {
    /// A branch names a label that was never bound
    #[error("Unresolved label .L{0}")]
    UnresolvedLabel(u32),

    /// A label was bound twice in the same blob
    #[error("Label .L{0} bound more than once")]
    DuplicateLabel(u32),

    #[error("Code cache full: capacity {capacity} blobs")]
    CodeCacheFull { capacity: usize },

    #[error("No code installed at {0:#x}")]
    UnknownCodeAddress(usize),

    /// Register read before any write
    #[error("Undefined register {0}")]
    UndefinedRegister(String),

    #[error("Illegal operand: {0}")]
    IllegalOperand(String),

    /// Unaligned or out-of-range word access
    #[error("Memory fault at {address:#x}")]
    MemoryFault { address: usize },

    #[error("Step limit of {0} instructions exceeded")]
    StepLimitExceeded(u64),

    #[error("Pop from empty stack")]
    StackUnderflow,

    #[error("Unknown runtime entry {0:#x}")]
    UnknownRuntimeEntry(usize),

    /// Runtime entry reported a failure
    #[error("Runtime call failed: {0}")]
    RuntimeFailure(String),

    #[error("Machine is not running")]
    NotRunning,
}

/// Result type alias for LIR operations
pub type Result<T> = std::result::Result<T, LirError>;
