//! # FGC-JIT - Compiled-Code Barriers for FGC
//!
//! Barrier insertion and stub generation that lets just-in-time compiled
//! code cooperate with FGC's concurrent, relocating, colored-pointer
//! collector.
//!
//! ## Overview
//!
//! Every reference load, store and atomic update the compiler emits gets:
//!
//! - **A fast path**: a few inline instructions comparing the reference's
//!   color bits against the current epoch word
//! - **A stub**: an out-of-line fragment reached only when the color is
//!   stale, which calls a collector routine and resumes the fast path
//! - **A runtime routine**: remaps, marks and heals the reference, bounded
//!   by `atomic_retry_limit` before handing off to the collector
//!
//! ## Quick Start
//!
//! ```rust
//! use faxc_lir::{Assembler, CodeCache, LirBuilder, Operand};
//! use fgc_jit::{BarrierConfig, BarrierSetC1, BasicType, DecoratorSet, LirAccess};
//!
//! fn main() -> Result<(), fgc_jit::BarrierError> {
//!     let cache = CodeCache::new(64);
//!     let barriers = BarrierSetC1::new(BarrierConfig::default())?;
//!     barriers.generate_runtime_stubs(&cache)?;
//!
//!     let mut gen = LirBuilder::new("Node.next");
//!     let base = Operand::Reg(gen.new_reg());
//!     let value = Operand::Reg(gen.new_reg());
//!     let mut access = LirAccess::new(DecoratorSet::IN_HEAP, BasicType::Object, base, 16);
//!     barriers.store_at(&mut gen, &mut access, value)?;
//!
//!     let blob = Assembler::assemble(gen)?;
//!     cache.install(blob)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Colored Pointers
//!
//! ```text
//! ┌────────────┬─────┬─────┬─────┬─────┬──────────────────────┐
//! │  Unused    │ Fin │ Rem │ M1  │ M0  │     Address          │
//! │  63-48     │ 47  │ 46  │ 45  │ 44  │       43-0           │
//! └────────────┴─────┴─────┴─────┴─────┴──────────────────────┘
//! ```
//!
//! Exactly one of M0, M1 and Rem is "good" at a time. A reference is
//! current iff its three color bits equal the good one.
//!
//! ## Modules
//!
//! - [`barrier_set`]: Emission entry points called per access site
//! - [`stubs`]: Load and store stub descriptors
//! - [`stub_table`]: Exactly-once generation of the four routine addresses
//! - [`runtime`]: Collector-side routines behind the stubs
//! - [`decorators`]: Per-access property flags
//! - [`color`]: Colored pointer encoding and the epoch word
//! - [`inspection`]: Heap layout description for external tools
//! - [`config`], [`error`], [`logging`], [`stats`]: Tuning, errors, events, counters

// Emission
pub mod barrier_set;
pub mod stub_table;
pub mod stubs;

// Values
pub mod color;
pub mod decorators;

// Runtime side
pub mod inspection;
pub mod runtime;

// Ambient
pub mod config;
pub mod error;
pub mod logging;
pub mod stats;

pub use barrier_set::{BarrierSetC1, BasicType, LirAccess};
pub use color::{Color, ColorEpoch, ColoredPointer};
pub use config::{BarrierConfig, ConfigError};
pub use decorators::DecoratorSet;
pub use error::{BarrierError, Result};
pub use runtime::{BarrierRuntime, Collector, RuntimeEntry, StoreOp};
pub use stats::{BarrierStats, BarrierStatsSnapshot};
pub use stub_table::{StubAddressTable, StubAddresses, StubKind};
pub use stubs::{BarrierStub, LoadBarrierStub, StoreBarrierStub};

/// FGC-JIT version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Barrier set configured from `FGC_JIT_*` environment variables, with its
/// stub routines installed in `cache`
///
/// # Examples
///
/// ```rust
/// let cache = faxc_lir::CodeCache::new(16);
/// let barriers = fgc_jit::init(&cache)?;
/// assert!(barriers.stub_table().is_generated());
/// # Ok::<(), fgc_jit::BarrierError>(())
/// ```
pub fn init(cache: &faxc_lir::CodeCache) -> Result<BarrierSetC1> {
    let barriers = BarrierSetC1::new(BarrierConfig::from_env())?;
    barriers.generate_runtime_stubs(cache)?;
    Ok(barriers)
}
