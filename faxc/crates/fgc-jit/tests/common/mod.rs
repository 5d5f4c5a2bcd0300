//! Test Utilities for the Barrier Test Suite
//!
//! A fixture compiles single-access units through `BarrierSetC1`, installs
//! them next to the generated stub routines and runs them on the LIR
//! machine against a word memory whose first word is the epoch.

#![allow(dead_code)]

use faxc_lir::{
    Assembler, CodeCache, Instruction, LirBuilder, LirError, Machine, Memory, Operand,
    WordMemory,
};
use fgc_jit::color::{Color, ColorEpoch, ColoredPointer, ADDRESS_MASK, COLOR_MASK, EPOCH_ADDRESS};
use fgc_jit::{
    BarrierConfig, BarrierRuntime, BarrierSetC1, BasicType, Collector, DecoratorSet, LirAccess,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Words of test memory; word 0 is the epoch
pub const MEMORY_WORDS: usize = 64;

/// Field offset used by compiled accesses
pub const FIELD_OFFSET: i32 = 8;

/// ============================================================================
/// MOCK COLLECTOR
/// ============================================================================

/// Collector whose relocation, marking and liveness are set by the test
pub struct MockCollector {
    epoch: ColorEpoch,
    forwarding: Mutex<HashMap<usize, usize>>,
    dead: Mutex<HashSet<usize>>,
    marking: AtomicBool,
    marked: Mutex<Vec<usize>>,
    pub cmpxchg_slow_calls: AtomicUsize,
    pub store_slow_calls: AtomicUsize,
    pub heal_slow_calls: AtomicUsize,
}

impl MockCollector {
    pub fn new(epoch: ColorEpoch) -> Self {
        Self {
            epoch,
            forwarding: Mutex::new(HashMap::new()),
            dead: Mutex::new(HashSet::new()),
            marking: AtomicBool::new(false),
            marked: Mutex::new(Vec::new()),
            cmpxchg_slow_calls: AtomicUsize::new(0),
            store_slow_calls: AtomicUsize::new(0),
            heal_slow_calls: AtomicUsize::new(0),
        }
    }

    pub fn relocate(&self, from: usize, to: usize) {
        self.forwarding.lock().insert(from, to);
    }

    pub fn kill(&self, address: usize) {
        self.dead.lock().insert(address);
    }

    pub fn set_marking(&self, marking: bool) {
        self.marking.store(marking, Ordering::SeqCst);
    }

    pub fn marked(&self) -> Vec<usize> {
        self.marked.lock().clone()
    }

    fn good(&self, memory: &dyn Memory) -> faxc_lir::Result<usize> {
        self.epoch.good_mask(memory)
    }
}

impl Collector for MockCollector {
    fn forwardee(&self, address: usize) -> Option<usize> {
        self.forwarding.lock().get(&address).copied()
    }

    fn is_marking(&self) -> bool {
        self.marking.load(Ordering::SeqCst)
    }

    fn mark(&self, address: usize) {
        self.marked.lock().push(address);
    }

    fn is_alive(&self, address: usize) -> bool {
        !self.dead.lock().contains(&address)
    }

    fn cmpxchg_slow(
        &self,
        memory: &dyn Memory,
        slot: usize,
        expected_address: usize,
        new_address: usize,
    ) -> faxc_lir::Result<bool> {
        self.cmpxchg_slow_calls.fetch_add(1, Ordering::SeqCst);
        let current = memory.load(slot)? & ADDRESS_MASK;
        let current = self.forwardee(current).unwrap_or(current);
        if current != expected_address {
            return Ok(false);
        }
        memory.store(slot, ColoredPointer::colored(new_address, self.good(memory)?).raw())?;
        Ok(true)
    }

    fn store_slow(
        &self,
        memory: &dyn Memory,
        slot: usize,
        new_address: usize,
    ) -> faxc_lir::Result<()> {
        self.store_slow_calls.fetch_add(1, Ordering::SeqCst);
        memory.store(slot, ColoredPointer::colored(new_address, self.good(memory)?).raw())
    }

    fn heal_slow(&self, memory: &dyn Memory, slot: usize, address: usize) -> faxc_lir::Result<()> {
        self.heal_slow_calls.fetch_add(1, Ordering::SeqCst);
        let current = memory.load(slot)? & ADDRESS_MASK;
        if self.forwardee(current).unwrap_or(current) == address {
            memory.store(slot, ColoredPointer::colored(address, self.good(memory)?).raw())?;
        }
        Ok(())
    }
}

/// ============================================================================
/// INTERFERING MEMORY
/// ============================================================================

/// Memory that re-colors one slot right before each of the first N
/// compare-and-swaps on it, as a concurrently relocating collector would
///
/// With [`with_epoch_flips`](Self::with_epoch_flips) it also advances the
/// epoch right after each of the first M plain stores to the slot.
pub struct InterferingMemory<'a> {
    inner: &'a WordMemory,
    epoch: ColorEpoch,
    target: usize,
    remaining: AtomicUsize,
    interferences: AtomicUsize,
    flips_remaining: AtomicUsize,
    flips: AtomicUsize,
}

impl<'a> InterferingMemory<'a> {
    pub fn new(inner: &'a WordMemory, epoch: ColorEpoch, target: usize, count: usize) -> Self {
        Self {
            inner,
            epoch,
            target,
            remaining: AtomicUsize::new(count),
            interferences: AtomicUsize::new(0),
            flips_remaining: AtomicUsize::new(0),
            flips: AtomicUsize::new(0),
        }
    }

    pub fn with_epoch_flips(self, count: usize) -> Self {
        self.flips_remaining.store(count, Ordering::SeqCst);
        self
    }

    pub fn interferences(&self) -> usize {
        self.interferences.load(Ordering::SeqCst)
    }

    pub fn flips(&self) -> usize {
        self.flips.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Some stale color different from the slot's current one
    fn recolor(&self) -> faxc_lir::Result<()> {
        let current = ColoredPointer::from_raw(self.inner.load(self.target)?);
        let good = self.epoch.good_mask(self.inner)?;
        let stale = [Color::Marked0, Color::Marked1, Color::Remapped]
            .into_iter()
            .map(Color::mask)
            .find(|&mask| mask != good && mask != current.color_bits())
            .unwrap_or(good);
        self.inner.store(self.target, current.recolor(stale).raw())
    }
}

impl Memory for InterferingMemory<'_> {
    fn load(&self, address: usize) -> faxc_lir::Result<usize> {
        self.inner.load(address)
    }

    fn store(&self, address: usize, value: usize) -> faxc_lir::Result<()> {
        self.inner.store(address, value)?;
        if address == self.target && Self::take(&self.flips_remaining) {
            self.flips.fetch_add(1, Ordering::SeqCst);
            self.epoch.advance(self.inner)?;
        }
        Ok(())
    }

    fn compare_exchange(
        &self,
        address: usize,
        expected: usize,
        new: usize,
    ) -> faxc_lir::Result<usize> {
        if address == self.target && Self::take(&self.remaining) {
            self.interferences.fetch_add(1, Ordering::SeqCst);
            self.recolor()?;
        }
        self.inner.compare_exchange(address, expected, new)
    }

    fn swap(&self, address: usize, value: usize) -> faxc_lir::Result<usize> {
        self.inner.swap(address, value)
    }
}

/// ============================================================================
/// BARRIER FIXTURE
/// ============================================================================

/// Compiled single-access unit
#[derive(Debug, Clone, Copy)]
pub struct Unit {
    pub address: usize,
    pub base: Operand,
    pub value: Operand,
    pub compare: Operand,
    pub result: Operand,
}

pub struct BarrierFixture {
    pub memory: WordMemory,
    pub cache: CodeCache,
    pub barriers: BarrierSetC1,
    pub runtime: BarrierRuntime<MockCollector>,
}

impl BarrierFixture {
    /// Fixture with generated stubs and `good` as the current color
    ///
    /// **Bug this finds:** Stub generation or epoch publication failures
    pub fn new(config: BarrierConfig, good: Color) -> Self {
        let barriers = BarrierSetC1::new(config.clone()).expect("valid config");
        let cache = barriers.new_code_cache();
        barriers
            .generate_runtime_stubs(&cache)
            .expect("stub generation should succeed");
        let memory = WordMemory::new(EPOCH_ADDRESS, MEMORY_WORDS);
        barriers
            .epoch()
            .publish(&memory, good)
            .expect("epoch word is mapped");
        let runtime = BarrierRuntime::new(
            MockCollector::new(barriers.epoch()),
            &config,
            Arc::clone(barriers.stats()),
        );
        Self {
            memory,
            cache,
            barriers,
            runtime,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BarrierConfig::default(), Color::Marked1)
    }

    pub fn collector(&self) -> &MockCollector {
        self.runtime.collector()
    }

    pub fn good(&self) -> usize {
        self.barriers
            .epoch()
            .good_mask(&self.memory)
            .expect("epoch word is mapped")
    }

    /// Address of the `index`th object slot; word 0 holds the epoch
    pub fn slot(&self, index: usize) -> usize {
        self.memory.address_of(index + 1)
    }

    /// Base register value whose field at `FIELD_OFFSET` is `slot`
    pub fn base_for(&self, slot: usize) -> usize {
        slot - FIELD_OFFSET as usize
    }

    pub fn read(&self, slot: usize) -> usize {
        self.memory.load(slot).expect("slot is mapped")
    }

    pub fn write(&self, slot: usize, value: usize) {
        self.memory.store(slot, value).expect("slot is mapped")
    }

    pub fn colored(&self, address: usize) -> usize {
        ColoredPointer::colored(address, self.good()).raw()
    }

    pub fn is_good(&self, value: usize) -> bool {
        value & COLOR_MASK == self.good()
    }

    /// Compile one access into an installed unit ending in `ret`
    ///
    /// **Bug this finds:** Emission producing unassemblable code
    pub fn compile(
        &self,
        name: &str,
        decorators: DecoratorSet,
        emit: impl FnOnce(
            &BarrierSetC1,
            &mut LirBuilder,
            &mut LirAccess,
            Unit,
        ) -> fgc_jit::Result<Operand>,
    ) -> fgc_jit::Result<Unit> {
        let mut gen = LirBuilder::new(name);
        let mut unit = Unit {
            address: 0,
            base: Operand::Reg(gen.new_reg()),
            value: Operand::Reg(gen.new_reg()),
            compare: Operand::Reg(gen.new_reg()),
            result: Operand::Illegal,
        };
        let mut access = LirAccess::new(decorators, BasicType::Object, unit.base, FIELD_OFFSET);
        unit.result = emit(&self.barriers, &mut gen, &mut access, unit)?;
        gen.emit(Instruction::Ret);
        let blob = Assembler::assemble(gen)?;
        unit.address = self.cache.install(blob)?;
        Ok(unit)
    }

    pub fn compile_load(&self, decorators: DecoratorSet) -> Unit {
        self.compile("load", decorators, |barriers, gen, access, _unit| {
            let result = Operand::Reg(gen.new_reg());
            barriers.load_at(gen, access, result)?;
            Ok(result)
        })
        .expect("load should compile")
    }

    pub fn compile_store(&self, decorators: DecoratorSet) -> Unit {
        self.compile("store", decorators, |barriers, gen, access, unit| {
            barriers.store_at(gen, access, unit.value)?;
            Ok(Operand::Illegal)
        })
        .expect("store should compile")
    }

    pub fn compile_cmpxchg(&self, decorators: DecoratorSet) -> Unit {
        self.compile("cmpxchg", decorators, |barriers, gen, access, unit| {
            barriers.atomic_cmpxchg_at(gen, access, unit.compare, unit.value)
        })
        .expect("cmpxchg should compile")
    }

    pub fn compile_xchg(&self, decorators: DecoratorSet) -> Unit {
        self.compile("xchg", decorators, |barriers, gen, access, unit| {
            barriers.atomic_xchg_at(gen, access, unit.value)
        })
        .expect("xchg should compile")
    }

    /// Machine over `memory` with the unit's inputs loaded
    pub fn machine<'a>(
        &'a self,
        memory: &'a dyn Memory,
        unit: &Unit,
        slot: usize,
        value: usize,
        compare: usize,
    ) -> Machine<'a> {
        let mut machine = Machine::new(&self.cache, memory, &self.runtime);
        machine.set_register(unit.base, self.base_for(slot)).expect("register");
        machine.set_register(unit.value, value).expect("register");
        machine.set_register(unit.compare, compare).expect("register");
        machine
    }

    /// Run `unit` to completion; returns the result register if any
    pub fn run(
        &self,
        unit: &Unit,
        slot: usize,
        value: usize,
        compare: usize,
    ) -> Result<Option<usize>, LirError> {
        self.run_on(&self.memory, unit, slot, value, compare)
    }

    pub fn run_on(
        &self,
        memory: &dyn Memory,
        unit: &Unit,
        slot: usize,
        value: usize,
        compare: usize,
    ) -> Result<Option<usize>, LirError> {
        let mut machine = self.machine(memory, unit, slot, value, compare);
        machine.call(unit.address)?;
        assert_eq!(machine.stack_depth(), 0, "stub left the stack unbalanced");
        if unit.result.is_valid() {
            machine.register(unit.result).map(Some)
        } else {
            Ok(None)
        }
    }
}
