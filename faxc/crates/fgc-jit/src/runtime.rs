//! Barrier Runtime Routines
//!
//! Native code behind the four stub addresses. Compiled stubs reach them
//! through a generated routine that ends in `CallRuntime`; the machine
//! dispatches that call here.
//!
//! # Routines
//!
//! ```text
//! load (strong)      ref, slot, decorators         -> healed ref
//! load (weak)        ref, slot, decorators         -> healed ref or null
//! store, healing     slot, op, zaddr, zptr, -, -   -> 0
//! store, no healing  slot, op, zaddr, zptr, exp, w -> op result
//! ```
//!
//! None of the routines block or take a lock; events go to the `log`
//! facade only and counters are atomics. Every compare-and-swap loop is
//! bounded by `atomic_retry_limit`; once exhausted the collector's slow
//! path takes over, so an update is never retried forever and never
//! dropped.

use crate::color::{ColorEpoch, ColoredPointer, ADDRESS_MASK};
use crate::config::BarrierConfig;
use crate::decorators::DecoratorSet;
use crate::logging::{log_runtime_event, BarrierEvent};
use crate::stats::BarrierStats;
use crossbeam::utils::Backoff;
use faxc_lir::{LirError, Memory, Result, RuntimeDispatch};
use std::sync::Arc;

/// Entry addresses of the native routines
pub const RUNTIME_ENTRY_BASE: usize = 0x0000_0f80_0000_0000;

const RUNTIME_ENTRY_STRIDE: usize = 0x10;

/// The four native routines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeEntry {
    LoadBarrierStrong,
    LoadBarrierWeak,
    StoreBarrierWithHealing,
    StoreBarrierWithoutHealing,
}

impl RuntimeEntry {
    pub const ALL: [RuntimeEntry; 4] = [
        RuntimeEntry::LoadBarrierStrong,
        RuntimeEntry::LoadBarrierWeak,
        RuntimeEntry::StoreBarrierWithHealing,
        RuntimeEntry::StoreBarrierWithoutHealing,
    ];

    pub fn index(self) -> usize {
        match self {
            RuntimeEntry::LoadBarrierStrong => 0,
            RuntimeEntry::LoadBarrierWeak => 1,
            RuntimeEntry::StoreBarrierWithHealing => 2,
            RuntimeEntry::StoreBarrierWithoutHealing => 3,
        }
    }

    pub fn address(self) -> usize {
        RUNTIME_ENTRY_BASE + self.index() * RUNTIME_ENTRY_STRIDE
    }

    pub fn from_address(address: usize) -> Option<RuntimeEntry> {
        Self::ALL.into_iter().find(|entry| entry.address() == address)
    }

    pub fn name(self) -> &'static str {
        match self {
            RuntimeEntry::LoadBarrierStrong => "load_barrier_on_oop_field_preloaded",
            RuntimeEntry::LoadBarrierWeak => "load_barrier_on_weak_oop_field_preloaded",
            RuntimeEntry::StoreBarrierWithHealing => "store_barrier_on_oop_field_with_healing",
            RuntimeEntry::StoreBarrierWithoutHealing => {
                "store_barrier_on_oop_field_without_healing"
            }
        }
    }
}

/// Operation a store stub asks the non-healing routine to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Perform the colored store
    Store = 0,
    /// Verify a committed or failed compare-and-swap
    CmpXchg = 1,
    /// Verify a committed exchange
    Xchg = 2,
}

impl StoreOp {
    pub fn from_raw(raw: usize) -> Option<StoreOp> {
        match raw {
            0 => Some(StoreOp::Store),
            1 => Some(StoreOp::CmpXchg),
            2 => Some(StoreOp::Xchg),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StoreOp::Store => "store",
            StoreOp::CmpXchg => "cmpxchg",
            StoreOp::Xchg => "xchg",
        }
    }
}

/// Arguments of the store routines, in argument register order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRequest {
    pub slot: usize,
    pub op: usize,
    pub new_zaddress: usize,
    pub new_zpointer: usize,
    pub expected: usize,
    pub witness: usize,
}

impl StoreRequest {
    pub fn from_args(args: [usize; 6]) -> Self {
        let [slot, op, new_zaddress, new_zpointer, expected, witness] = args;
        Self {
            slot,
            op,
            new_zaddress,
            new_zpointer,
            expected,
            witness,
        }
    }
}

/// Collector services the routines depend on
///
/// The slow paths must complete the operation with the epoch held stable;
/// they are only entered after `atomic_retry_limit` lost races.
pub trait Collector: Send + Sync {
    /// New address of a relocated object
    fn forwardee(&self, address: usize) -> Option<usize>;

    fn is_marking(&self) -> bool;

    fn mark(&self, address: usize);

    /// Weak referents found dead load as null
    fn is_alive(&self, address: usize) -> bool;

    /// Compare-and-swap on uncolored addresses
    fn cmpxchg_slow(
        &self,
        memory: &dyn Memory,
        slot: usize,
        expected_address: usize,
        new_address: usize,
    ) -> Result<bool>;

    fn store_slow(&self, memory: &dyn Memory, slot: usize, new_address: usize) -> Result<()>;

    /// Recolor `slot` if it still refers to `address`
    fn heal_slow(&self, memory: &dyn Memory, slot: usize, address: usize) -> Result<()>;
}

pub struct BarrierRuntime<C: Collector> {
    collector: C,
    epoch: ColorEpoch,
    retry_limit: u32,
    stats: Arc<BarrierStats>,
}

impl<C: Collector> BarrierRuntime<C> {
    pub fn new(collector: C, config: &BarrierConfig, stats: Arc<BarrierStats>) -> Self {
        Self {
            collector,
            epoch: ColorEpoch::new(config.epoch_address),
            retry_limit: config.atomic_retry_limit,
            stats,
        }
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }

    pub fn stats(&self) -> &BarrierStats {
        &self.stats
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn load_barrier_on_oop_field_preloaded(
        &self,
        memory: &dyn Memory,
        reference: usize,
        slot: usize,
        decorators: usize,
    ) -> Result<usize> {
        self.stats.record_load_slow_call();
        let good = self.epoch.good_mask(memory)?;
        if ColoredPointer::from_raw(reference).is_good(good) {
            return Ok(reference);
        }
        let keep_alive = !DecoratorSet::from_bits(decorators as u64).is_no_keepalive();
        let healed = self.heal_value(reference, good, keep_alive);
        self.self_heal(memory, RuntimeEntry::LoadBarrierStrong, slot, reference, healed)?;
        Ok(healed)
    }

    pub fn load_barrier_on_weak_oop_field_preloaded(
        &self,
        memory: &dyn Memory,
        reference: usize,
        slot: usize,
    ) -> Result<usize> {
        self.stats.record_load_slow_call();
        let good = self.epoch.good_mask(memory)?;
        let ptr = ColoredPointer::from_raw(reference);
        if ptr.is_good(good) {
            return Ok(reference);
        }
        // Dead referents are cleared by the collector, not here
        if !ptr.is_null() && !self.collector.is_alive(self.remap(ptr.address())) {
            self.stats.record_weak_cleared();
            return Ok(ColoredPointer::colored(0, good).raw());
        }
        let healed = self.heal_value(reference, good, false);
        self.self_heal(memory, RuntimeEntry::LoadBarrierWeak, slot, reference, healed)?;
        Ok(healed)
    }

    pub fn store_barrier_on_oop_field_with_healing(
        &self,
        memory: &dyn Memory,
        request: StoreRequest,
    ) -> Result<usize> {
        self.stats.record_store_slow_call();
        self.heal_slot(memory, request.slot, request.new_zpointer)?;
        Ok(0)
    }

    pub fn store_barrier_on_oop_field_without_healing(
        &self,
        memory: &dyn Memory,
        request: StoreRequest,
    ) -> Result<usize> {
        self.stats.record_store_slow_call();
        match StoreOp::from_raw(request.op) {
            Some(StoreOp::Store) => {
                self.colored_store(memory, request.slot, request.new_zaddress)?;
                Ok(0)
            }
            Some(StoreOp::CmpXchg) => self
                .cmpxchg_after_commit(memory, request)
                .map(usize::from),
            Some(StoreOp::Xchg) => self.xchg_after_commit(memory, request),
            None => Err(LirError::RuntimeFailure(format!(
                "unknown store operation {}",
                request.op
            ))),
        }
    }

    fn remap(&self, address: usize) -> usize {
        self.collector.forwardee(address).unwrap_or(address)
    }

    /// `value` remapped and colored good; marked while marking if kept alive
    fn heal_value(&self, value: usize, good: usize, keep_alive: bool) -> usize {
        let ptr = ColoredPointer::from_raw(value);
        if ptr.is_null() {
            return ColoredPointer::colored(0, good).raw();
        }
        let address = self.remap(ptr.address());
        if keep_alive && self.collector.is_marking() {
            self.collector.mark(address);
        }
        ColoredPointer::colored(address, good).raw()
    }

    fn same_object(&self, a: usize, b: usize) -> bool {
        self.remap(a & ADDRESS_MASK) == self.remap(b & ADDRESS_MASK)
    }

    /// Single CAS; losing means a newer value already replaced `stale`
    fn self_heal(
        &self,
        memory: &dyn Memory,
        routine: RuntimeEntry,
        slot: usize,
        stale: usize,
        healed: usize,
    ) -> Result<()> {
        if memory.compare_exchange(slot, stale, healed)? == stale {
            self.stats.record_healed();
            log_runtime_event(&BarrierEvent::Healed {
                routine: routine.name(),
                slot,
                from: stale,
                to: healed,
            });
        }
        Ok(())
    }

    /// Bring `slot` to the current color while it still refers to the
    /// object `installed` refers to
    fn heal_slot(&self, memory: &dyn Memory, slot: usize, installed: usize) -> Result<()> {
        let backoff = Backoff::new();
        let mut current = memory.load(slot)?;
        for attempt in 1..=self.retry_limit {
            if !self.same_object(current, installed) {
                return Ok(());
            }
            let good = self.epoch.good_mask(memory)?;
            if ColoredPointer::from_raw(current).is_good(good) {
                return Ok(());
            }
            let healed = self.heal_value(current, good, true);
            let witness = memory.compare_exchange(slot, current, healed)?;
            if witness == current {
                self.stats.record_healed();
                return Ok(());
            }
            self.retried(slot, attempt, &backoff);
            current = witness;
        }
        self.escalate(slot, "heal");
        self.collector
            .heal_slow(memory, slot, self.remap(installed & ADDRESS_MASK))
    }

    /// Store colored for the current epoch, verified against a re-read
    fn colored_store(&self, memory: &dyn Memory, slot: usize, new_zaddress: usize) -> Result<()> {
        let backoff = Backoff::new();
        for attempt in 1..=self.retry_limit {
            let good = self.epoch.good_mask(memory)?;
            memory.store(slot, self.heal_value(new_zaddress, good, true))?;
            if self.epoch.good_mask(memory)? == good {
                return Ok(());
            }
            self.retried(slot, attempt, &backoff);
        }
        self.escalate(slot, StoreOp::Store.name());
        self.collector
            .store_slow(memory, slot, self.remap(new_zaddress & ADDRESS_MASK))
    }

    /// Finish a compare-and-swap the compiled code already issued
    ///
    /// A witness that differs from the expected value only in color (or by
    /// relocation) is a lost race, not a failure: retry with the witness
    /// as the expected value and a freshly colored new value.
    fn cmpxchg_after_commit(&self, memory: &dyn Memory, request: StoreRequest) -> Result<bool> {
        let backoff = Backoff::new();
        let mut expected = request.expected;
        let mut installed = request.new_zpointer;
        let mut witness = request.witness;
        let mut attempts = 0;
        loop {
            if witness == expected {
                self.heal_slot(memory, request.slot, installed)?;
                return Ok(true);
            }
            if !self.same_object(witness, request.expected) {
                return Ok(false);
            }
            if attempts == self.retry_limit {
                self.escalate(request.slot, StoreOp::CmpXchg.name());
                return self.collector.cmpxchg_slow(
                    memory,
                    request.slot,
                    self.remap(request.expected & ADDRESS_MASK),
                    self.remap(request.new_zpointer & ADDRESS_MASK),
                );
            }
            attempts += 1;
            self.retried(request.slot, attempts, &backoff);
            let good = self.epoch.good_mask(memory)?;
            expected = witness;
            installed = self.heal_value(installed, good, true);
            witness = memory.compare_exchange(request.slot, expected, installed)?;
        }
    }

    /// Heal the installed value, return the previous one healed
    fn xchg_after_commit(&self, memory: &dyn Memory, request: StoreRequest) -> Result<usize> {
        self.heal_slot(memory, request.slot, request.new_zpointer)?;
        let good = self.epoch.good_mask(memory)?;
        if ColoredPointer::from_raw(request.witness).is_good(good) {
            return Ok(request.witness);
        }
        Ok(self.heal_value(request.witness, good, true))
    }

    fn retried(&self, slot: usize, attempt: u32, backoff: &Backoff) {
        self.stats.record_atomic_retry();
        log_runtime_event(&BarrierEvent::AtomicRetry { slot, attempt });
        backoff.spin();
    }

    fn escalate(&self, slot: usize, operation: &'static str) {
        self.stats.record_escalation();
        log_runtime_event(&BarrierEvent::SlowPathEscalation {
            slot,
            operation,
            attempts: self.retry_limit,
        });
    }
}

impl<C: Collector> RuntimeDispatch for BarrierRuntime<C> {
    fn call(&self, entry: usize, args: [usize; 6], memory: &dyn Memory) -> Result<usize> {
        match RuntimeEntry::from_address(entry) {
            Some(RuntimeEntry::LoadBarrierStrong) => {
                self.load_barrier_on_oop_field_preloaded(memory, args[0], args[1], args[2])
            }
            Some(RuntimeEntry::LoadBarrierWeak) => {
                self.load_barrier_on_weak_oop_field_preloaded(memory, args[0], args[1])
            }
            Some(RuntimeEntry::StoreBarrierWithHealing) => {
                self.store_barrier_on_oop_field_with_healing(memory, StoreRequest::from_args(args))
            }
            Some(RuntimeEntry::StoreBarrierWithoutHealing) => self
                .store_barrier_on_oop_field_without_healing(memory, StoreRequest::from_args(args)),
            None => Err(LirError::UnknownRuntimeEntry(entry)),
        }
    }
}
