//! Stub Address Table
//!
//! Entry addresses of the four out-of-line barrier routines. The table is
//! owned by the barrier set and shared by every compilation unit; the
//! routines are synthesized into the code cache exactly once.
//!
//! # Selection
//!
//! ```text
//! get(Load,  decorators)  -> weak load   if decorators.is_weak()
//!                            strong load otherwise (anonymous included)
//! get_store(self_healing) -> store with healing    if self_healing
//!                            store without healing otherwise
//! ```
//!
//! Atomic updates always use the non-healing routine. Healing the slot
//! before the hardware compare-and-swap could invalidate its expected value.

use crate::decorators::DecoratorSet;
use crate::error::{BarrierError, Result};
use crate::logging::{log_event, BarrierEvent};
use crate::runtime::RuntimeEntry;
use faxc_lir::{Assembler, CodeBlob, CodeCache, Instruction, LirBuilder, Operand, SystemVAbi};
use std::sync::OnceLock;

/// Barrier kind a routine serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubKind {
    Load,
    Store,
}

/// The four generated routine addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StubAddresses {
    pub load_strong: usize,
    pub load_weak: usize,
    pub store_with_healing: usize,
    pub store_without_healing: usize,
}

impl StubAddresses {
    fn load(&self, decorators: DecoratorSet) -> usize {
        if decorators.is_weak() {
            self.load_weak
        } else {
            self.load_strong
        }
    }

    fn store(&self, self_healing: bool) -> usize {
        if self_healing {
            self.store_with_healing
        } else {
            self.store_without_healing
        }
    }
}

/// Exactly-once table of routine addresses
///
/// Concurrent `generate` calls block until the winner finishes; all of
/// them observe the same addresses, or the same error.
#[derive(Debug, Default)]
pub struct StubAddressTable {
    addresses: OnceLock<Result<StubAddresses>>,
}

impl StubAddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesize and install the four routines on first call
    ///
    /// All four are assembled before any is installed, and installed
    /// together or not at all. The outcome is final: a failure is returned
    /// to every later caller and the barrier set can emit no stubs.
    pub fn generate(&self, cache: &CodeCache) -> Result<StubAddresses> {
        self.addresses
            .get_or_init(|| {
                let blobs = RuntimeEntry::ALL
                    .into_iter()
                    .map(assemble_routine)
                    .collect::<Result<Vec<_>>>()?;
                let installed = cache.install_all(blobs)?;
                let address = |entry: RuntimeEntry| installed[entry.index()];
                let addresses = StubAddresses {
                    load_strong: address(RuntimeEntry::LoadBarrierStrong),
                    load_weak: address(RuntimeEntry::LoadBarrierWeak),
                    store_with_healing: address(RuntimeEntry::StoreBarrierWithHealing),
                    store_without_healing: address(RuntimeEntry::StoreBarrierWithoutHealing),
                };
                log_event(BarrierEvent::StubsGenerated {
                    load_strong: addresses.load_strong,
                    load_weak: addresses.load_weak,
                    store_with_healing: addresses.store_with_healing,
                    store_without_healing: addresses.store_without_healing,
                });
                Ok(addresses)
            })
            .clone()
    }

    pub fn is_generated(&self) -> bool {
        matches!(self.addresses.get(), Some(Ok(_)))
    }

    /// All four addresses, once generated
    pub fn addresses(&self) -> Result<StubAddresses> {
        match self.addresses.get() {
            Some(result) => result.clone(),
            None => Err(BarrierError::StubsNotGenerated),
        }
    }

    /// Routine address for a barrier kind
    ///
    /// Store routines are not selected by decorators; `get(Store, _)` is
    /// the self-healing one. Use [`get_store`](Self::get_store) to choose.
    ///
    /// # Panics
    ///
    /// When called before `generate` succeeded.
    pub fn get(&self, kind: StubKind, decorators: DecoratorSet) -> usize {
        let address = match kind {
            StubKind::Load => self.try_get_load(decorators),
            StubKind::Store => self.try_get_store(true),
        };
        match address {
            Ok(address) => address,
            Err(err) => panic!("barrier stub address requested too early: {}", err),
        }
    }

    /// # Panics
    ///
    /// When called before `generate` succeeded.
    pub fn get_load(&self, decorators: DecoratorSet) -> usize {
        self.get(StubKind::Load, decorators)
    }

    /// # Panics
    ///
    /// When called before `generate` succeeded.
    pub fn get_store(&self, self_healing: bool) -> usize {
        match self.try_get_store(self_healing) {
            Ok(address) => address,
            Err(err) => panic!("barrier stub address requested too early: {}", err),
        }
    }

    pub fn try_get_load(&self, decorators: DecoratorSet) -> Result<usize> {
        self.addresses().map(|a| a.load(decorators))
    }

    pub fn try_get_store(&self, self_healing: bool) -> Result<usize> {
        self.addresses().map(|a| a.store(self_healing))
    }
}

/// One routine blob: preserve the scratch registers around the native call
fn assemble_routine(entry: RuntimeEntry) -> Result<CodeBlob> {
    let mut builder = LirBuilder::new(entry.name());
    for reg in SystemVAbi::SCRATCH_REGS {
        builder.emit(Instruction::Push {
            src: Operand::PhysReg(reg),
        });
    }
    builder.emit(Instruction::CallRuntime {
        entry: entry.address(),
    });
    for reg in SystemVAbi::SCRATCH_REGS.iter().rev() {
        builder.emit(Instruction::Pop {
            dest: Operand::PhysReg(*reg),
        });
    }
    builder.emit(Instruction::Ret);

    Ok(Assembler::assemble(builder)?)
}
