//! Barrier Set - Emission Protocol
//!
//! Entry points the compiler calls once per heap access. Reference accesses
//! get a short inline fast path and an out-of-line stub; everything else is
//! emitted as plain instructions.
//!
//! # Fast paths
//!
//! ```text
//! load:        load   result, [addr]
//!              load   tmp, [epoch]
//!              xor    tmp, result
//!              test   tmp, COLOR_MASK
//!              jne    stub
//!            continuation:
//!
//! color(v):    mov    z, v
//!              and    z, ADDRESS_MASK
//!              load   good, [epoch]
//!              or     z, good
//!
//! store:       color(value)
//!              store  [addr], z
//!              load   tmp, [epoch]          ; fresh read
//!              xor    tmp, z
//!              test   tmp, COLOR_MASK
//!              jne    stub                  ; with healing
//!            continuation:
//!
//! cmpxchg:     color(new), color(old)       ; one epoch read
//!              cmpxchg [addr], old_z, new_z -> witness
//!              jmp    stub                  ; without healing, verifies
//!            continuation:
//! ```
//!
//! Weak and seq-cst stores skip the inline store and jump straight to the
//! non-healing stub, which performs the colored store itself.

use crate::color::{ColorEpoch, ADDRESS_MASK, COLOR_MASK};
use crate::config::BarrierConfig;
use crate::decorators::DecoratorSet;
use crate::error::{BarrierError, Result};
use crate::logging::{log_event, BarrierEvent};
use crate::runtime::StoreOp;
use crate::stats::BarrierStats;
use crate::stub_table::{StubAddressTable, StubAddresses};
use crate::stubs::{AtomicOperands, BarrierStub, LoadBarrierStub, StoreBarrierStub};
use faxc_lir::{
    Address, CodeCache, CodeStub, Condition, Instruction, LirBuilder, Operand,
};
use std::sync::Arc;

/// Value type of an access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object,
    Array,
    Address,
}

impl BasicType {
    /// Managed references; the only values that carry colors
    pub fn is_reference(self) -> bool {
        matches!(self, BasicType::Object | BasicType::Array)
    }
}

/// One memory access as the compiler describes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LirAccess {
    decorators: DecoratorSet,
    ty: BasicType,
    base: Operand,
    offset: i32,
    resolved_addr: Option<Address>,
}

impl LirAccess {
    pub fn new(decorators: DecoratorSet, ty: BasicType, base: Operand, offset: i32) -> Self {
        Self {
            decorators,
            ty,
            base,
            offset,
            resolved_addr: None,
        }
    }

    pub fn decorators(&self) -> DecoratorSet {
        self.decorators
    }

    pub fn ty(&self) -> BasicType {
        self.ty
    }

    pub fn base(&self) -> Operand {
        self.base
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn resolved_addr(&self) -> Option<Address> {
        self.resolved_addr
    }

    pub fn set_resolved_addr(&mut self, addr: Address) {
        self.resolved_addr = Some(addr);
    }
}

/// Barrier emission for one collector instance
///
/// Constructed once at startup and shared by reference with every
/// compilation thread.
///
/// # Examples
///
/// ```rust
/// use faxc_lir::{CodeCache, LirBuilder, Operand};
/// use fgc_jit::{BarrierConfig, BarrierSetC1, BasicType, DecoratorSet, LirAccess};
///
/// let barriers = BarrierSetC1::new(BarrierConfig::default()).unwrap();
/// let cache = CodeCache::new(16);
/// barriers.generate_runtime_stubs(&cache).unwrap();
///
/// let mut gen = LirBuilder::new("getfield");
/// let base = Operand::Reg(gen.new_reg());
/// let result = Operand::Reg(gen.new_reg());
/// let mut access = LirAccess::new(DecoratorSet::IN_HEAP, BasicType::Object, base, 16);
/// barriers.load_at(&mut gen, &mut access, result).unwrap();
/// assert_eq!(gen.stubs().len(), 1);
/// ```
#[derive(Debug)]
pub struct BarrierSetC1 {
    config: BarrierConfig,
    epoch: ColorEpoch,
    stubs: StubAddressTable,
    stats: Arc<BarrierStats>,
}

impl BarrierSetC1 {
    pub fn new(config: BarrierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            epoch: ColorEpoch::new(config.epoch_address),
            config,
            stubs: StubAddressTable::new(),
            stats: Arc::new(BarrierStats::new()),
        })
    }

    pub fn config(&self) -> &BarrierConfig {
        &self.config
    }

    pub fn epoch(&self) -> ColorEpoch {
        self.epoch
    }

    pub fn stub_table(&self) -> &StubAddressTable {
        &self.stubs
    }

    /// Counters shared with the runtime routines
    pub fn stats(&self) -> &Arc<BarrierStats> {
        &self.stats
    }

    /// Empty code cache sized by `code_cache_capacity`
    pub fn new_code_cache(&self) -> CodeCache {
        CodeCache::new(self.config.code_cache_capacity)
    }

    /// Install the four stub routines; later calls return the same addresses
    pub fn generate_runtime_stubs(&self, cache: &CodeCache) -> Result<StubAddresses> {
        let addresses = self.stubs.generate(cache)?;
        if self.config.verbose {
            println!(
                "[Barrier] Runtime stubs ready: load {:#x}/{:#x}, store {:#x}/{:#x}",
                addresses.load_strong,
                addresses.load_weak,
                addresses.store_with_healing,
                addresses.store_without_healing
            );
        }
        Ok(addresses)
    }

    pub fn barrier_needed(&self, access: &LirAccess) -> bool {
        access.ty.is_reference() && !access.decorators.is_raw()
    }

    /// Address operand for `access`
    ///
    /// Lowered into a register when asked, or when the access needs a
    /// barrier and its field offset may be patched later.
    pub fn resolve_address(
        &self,
        gen: &mut LirBuilder,
        access: &mut LirAccess,
        resolve_in_register: bool,
    ) -> Address {
        let addr = Address::Base {
            base: access.base,
            offset: access.offset,
        };
        let patch = self.barrier_needed(access) && access.decorators.needs_patching();
        let resolved = if resolve_in_register || patch {
            let reg = Operand::Reg(gen.new_reg());
            gen.emit(Instruction::Lea { dest: reg, addr });
            Address::base(reg, 0)
        } else {
            addr
        };
        access.set_resolved_addr(resolved);
        resolved
    }

    pub fn load_at(
        &self,
        gen: &mut LirBuilder,
        access: &mut LirAccess,
        result: Operand,
    ) -> Result<()> {
        self.resolve_address(gen, access, false);
        self.load_at_resolved(gen, access, result)
    }

    pub fn store_at(
        &self,
        gen: &mut LirBuilder,
        access: &mut LirAccess,
        value: Operand,
    ) -> Result<()> {
        self.resolve_address(gen, access, false);
        self.store_at_resolved(gen, access, value)
    }

    pub fn atomic_cmpxchg_at(
        &self,
        gen: &mut LirBuilder,
        access: &mut LirAccess,
        cmp_value: Operand,
        new_value: Operand,
    ) -> Result<Operand> {
        self.resolve_address(gen, access, true);
        self.atomic_cmpxchg_at_resolved(gen, access, cmp_value, new_value)
    }

    pub fn atomic_xchg_at(
        &self,
        gen: &mut LirBuilder,
        access: &mut LirAccess,
        value: Operand,
    ) -> Result<Operand> {
        self.resolve_address(gen, access, true);
        self.atomic_xchg_at_resolved(gen, access, value)
    }

    pub fn load_at_resolved(
        &self,
        gen: &mut LirBuilder,
        access: &LirAccess,
        result: Operand,
    ) -> Result<()> {
        let addr = self.prepare(gen, access)?;
        if !self.barrier_needed(access) {
            gen.emit(Instruction::Load { dest: result, addr });
            return Ok(());
        }
        let runtime_stub = self.abort_on_error(gen, self.stubs.try_get_load(access.decorators))?;
        self.abort_on_error(gen, check_output(result))?;

        gen.emit(Instruction::Load { dest: result, addr });
        self.load_barrier(gen, access, addr, result, runtime_stub);
        Ok(())
    }

    pub fn store_at_resolved(
        &self,
        gen: &mut LirBuilder,
        access: &LirAccess,
        value: Operand,
    ) -> Result<()> {
        let addr = self.prepare(gen, access)?;
        if !self.barrier_needed(access) {
            gen.emit(Instruction::Store { addr, src: value });
            return Ok(());
        }
        let self_healing = !(access.decorators.is_weak() || access.decorators.is_atomic());
        let runtime_stub = self.abort_on_error(gen, self.stubs.try_get_store(self_healing))?;

        let good = self.load_epoch(gen);
        let new_zpointer = self.color(gen, value, good);
        if self_healing {
            gen.emit(Instruction::Store {
                addr,
                src: new_zpointer,
            });
            self.store_barrier(gen, access, addr, value, new_zpointer, runtime_stub);
        } else {
            let tmp = self.address_temp(gen, &addr);
            let stub = StoreBarrierStub::new(gen, addr, value, new_zpointer, tmp, runtime_stub);
            gen.emit(Instruction::Jmp {
                target: stub.entry(),
            });
            self.attach(gen, access, BarrierStub::Store(stub));
        }
        Ok(())
    }

    /// Returns a register holding 1 when the swap happened, 0 otherwise
    pub fn atomic_cmpxchg_at_resolved(
        &self,
        gen: &mut LirBuilder,
        access: &LirAccess,
        cmp_value: Operand,
        new_value: Operand,
    ) -> Result<Operand> {
        let addr = self.prepare(gen, access)?;
        let result = Operand::Reg(gen.new_reg());
        let witness = Operand::Reg(gen.new_reg());
        if !self.barrier_needed(access) {
            gen.emit(Instruction::CmpXchg {
                addr,
                expected: cmp_value,
                new: new_value,
                result: witness,
            });
            gen.emit(Instruction::Set {
                cond: Condition::Eq,
                dest: result,
            });
            return Ok(result);
        }
        let runtime_stub = self.abort_on_error(gen, self.stubs.try_get_store(false))?;

        let good = self.load_epoch(gen);
        let new_zpointer = self.color(gen, new_value, good);
        let expected = self.color(gen, cmp_value, good);
        gen.emit(Instruction::CmpXchg {
            addr,
            expected,
            new: new_zpointer,
            result: witness,
        });
        self.atomic_barrier(
            gen,
            access,
            addr,
            new_value,
            new_zpointer,
            StoreOp::CmpXchg,
            AtomicOperands {
                expected,
                witness,
                result,
            },
            runtime_stub,
        );
        Ok(result)
    }

    /// Returns a register holding the previous value, healed
    pub fn atomic_xchg_at_resolved(
        &self,
        gen: &mut LirBuilder,
        access: &LirAccess,
        value: Operand,
    ) -> Result<Operand> {
        let addr = self.prepare(gen, access)?;
        let result = Operand::Reg(gen.new_reg());
        if !self.barrier_needed(access) {
            gen.emit(Instruction::Xchg {
                addr,
                src: value,
                result,
            });
            return Ok(result);
        }
        let runtime_stub = self.abort_on_error(gen, self.stubs.try_get_store(false))?;

        let good = self.load_epoch(gen);
        let new_zpointer = self.color(gen, value, good);
        let witness = Operand::Reg(gen.new_reg());
        gen.emit(Instruction::Xchg {
            addr,
            src: new_zpointer,
            result: witness,
        });
        self.atomic_barrier(
            gen,
            access,
            addr,
            value,
            new_zpointer,
            StoreOp::Xchg,
            AtomicOperands {
                expected: Operand::Illegal,
                witness,
                result,
            },
            runtime_stub,
        );
        Ok(result)
    }

    // ========================================================================
    // BARRIER SEQUENCES
    // ========================================================================

    fn load_barrier(
        &self,
        gen: &mut LirBuilder,
        access: &LirAccess,
        addr: Address,
        result: Operand,
        runtime_stub: usize,
    ) {
        let tmp = self.color_check(gen, result);
        let stub_tmp = if addr.as_plain_register().is_some() {
            Operand::Illegal
        } else {
            tmp
        };
        let stub =
            LoadBarrierStub::new(gen, access.decorators, addr, result, stub_tmp, runtime_stub);
        gen.emit(Instruction::Jcc {
            cond: Condition::Ne,
            target: stub.entry(),
        });
        self.attach(gen, access, BarrierStub::Load(stub));
    }

    /// Re-check the stored value against a fresh epoch read
    fn store_barrier(
        &self,
        gen: &mut LirBuilder,
        access: &LirAccess,
        addr: Address,
        new_zaddress: Operand,
        new_zpointer: Operand,
        runtime_stub: usize,
    ) {
        let tmp = self.color_check(gen, new_zpointer);
        let stub_tmp = if addr.as_plain_register().is_some() {
            Operand::Illegal
        } else {
            tmp
        };
        let stub = StoreBarrierStub::new(
            gen,
            addr,
            new_zaddress,
            new_zpointer,
            stub_tmp,
            runtime_stub,
        );
        gen.emit(Instruction::Jcc {
            cond: Condition::Ne,
            target: stub.entry(),
        });
        self.attach(gen, access, BarrierStub::Store(stub));
    }

    #[allow(clippy::too_many_arguments)]
    fn atomic_barrier(
        &self,
        gen: &mut LirBuilder,
        access: &LirAccess,
        addr: Address,
        new_zaddress: Operand,
        new_zpointer: Operand,
        op: StoreOp,
        operands: AtomicOperands,
        runtime_stub: usize,
    ) {
        let tmp = self.address_temp(gen, &addr);
        let stub = StoreBarrierStub::atomic(
            gen,
            addr,
            new_zaddress,
            new_zpointer,
            tmp,
            op,
            operands,
            runtime_stub,
        );
        gen.emit(Instruction::Jmp {
            target: stub.entry(),
        });
        self.attach(gen, access, BarrierStub::Store(stub));
    }

    /// Flags: not-equal when `value` is not colored good
    fn color_check(&self, gen: &mut LirBuilder, value: Operand) -> Operand {
        let tmp = self.load_epoch(gen);
        gen.emit(Instruction::Xor {
            dest: tmp,
            src: value,
        });
        gen.emit(Instruction::Test {
            src1: tmp,
            src2: Operand::imm(COLOR_MASK),
        });
        tmp
    }

    fn load_epoch(&self, gen: &mut LirBuilder) -> Operand {
        let good = Operand::Reg(gen.new_reg());
        gen.emit(Instruction::Load {
            dest: good,
            addr: Address::Absolute(self.epoch.address()),
        });
        good
    }

    /// `value` with its color bits replaced by `good`
    fn color(&self, gen: &mut LirBuilder, value: Operand, good: Operand) -> Operand {
        let z = Operand::Reg(gen.new_reg());
        gen.emit(Instruction::Mov { dest: z, src: value });
        gen.emit(Instruction::And {
            dest: z,
            src: Operand::imm(ADDRESS_MASK),
        });
        gen.emit(Instruction::Or { dest: z, src: good });
        z
    }

    /// Scratch for the stub's `lea` when the address is not a plain register
    fn address_temp(&self, gen: &mut LirBuilder, addr: &Address) -> Operand {
        if addr.as_plain_register().is_some() {
            Operand::Illegal
        } else {
            Operand::Reg(gen.new_reg())
        }
    }

    /// Hand the stub to the builder and bind its continuation
    fn attach(&self, gen: &mut LirBuilder, access: &LirAccess, stub: BarrierStub) {
        match stub {
            BarrierStub::Load(_) => self.stats.record_load_stub(),
            BarrierStub::Store(_) => self.stats.record_store_stub(),
        }
        if self.config.trace_stubs {
            log_event(BarrierEvent::StubEmitted {
                unit: gen.name().to_string(),
                stub: stub.name(),
                decorators: access.decorators.bits(),
            });
        }
        gen.bind(stub.continuation());
        gen.add_stub(Box::new(stub));
    }

    /// Validate `access` and return its resolved address
    fn prepare(&self, gen: &LirBuilder, access: &LirAccess) -> Result<Address> {
        let checked = access.decorators.validate_for(access.ty).and_then(|()| {
            access.resolved_addr.ok_or_else(|| {
                BarrierError::InvariantViolation(
                    "access reached emission without a resolved address".to_string(),
                )
            })
        });
        self.abort_on_error(gen, checked)
    }

    /// Log an error as the abort of the enclosing unit and pass it on
    fn abort_on_error<T>(&self, gen: &LirBuilder, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            log_event(BarrierEvent::CompilationAborted {
                unit: gen.name().to_string(),
                reason: err.to_string(),
            });
            if self.config.verbose {
                println!("[Barrier] Aborting compilation of {}: {}", gen.name(), err);
            }
        }
        result
    }
}

fn check_output(result: Operand) -> Result<()> {
    crate::ensure_invariant!(
        result.is_register(),
        "reference load result must be a register, got {}",
        result
    );
    Ok(())
}
