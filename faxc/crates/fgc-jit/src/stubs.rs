//! Barrier Stub Descriptors
//!
//! One descriptor per access site whose fast path may need the collector.
//! A descriptor binds the site's operands to a resolved routine address;
//! the register allocator may rewrite the operands, but the decorators,
//! the operation and the routine address are fixed at construction.
//!
//! # Stub code
//!
//! ```text
//! entry:
//!     push  <caller-saved registers>       ; minus the stub's result
//!     push  <arguments...>                 ; read every source first
//!     pop   <argument registers>
//!     call  routine
//!     mov   result, rax
//!     pop   <caller-saved registers>
//!     jmp   continuation
//! ```
//!
//! Arguments travel through the stack so that no argument register is
//! overwritten before every source operand has been read. Every register
//! other than the result leaves the stub with the value it entered with,
//! so the allocator does not treat a stub as a call site.

use crate::decorators::DecoratorSet;
use crate::runtime::StoreOp;
use faxc_lir::{
    Address, Assembler, CodeStub, Instruction, Label, LirBuilder, Operand, OperandVisitor,
    PhysicalRegister, SystemVAbi,
};

/// Slow path of a reference load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBarrierStub {
    entry: Label,
    continuation: Label,
    decorators: DecoratorSet,
    ref_addr: Address,
    reference: Operand,
    tmp: Operand,
    runtime_stub: usize,
}

impl LoadBarrierStub {
    pub fn new(
        gen: &mut LirBuilder,
        decorators: DecoratorSet,
        ref_addr: Address,
        reference: Operand,
        tmp: Operand,
        runtime_stub: usize,
    ) -> Self {
        debug_assert!(runtime_stub != 0, "routine address must be resolved");
        Self {
            entry: gen.new_label(),
            continuation: gen.new_label(),
            decorators,
            ref_addr,
            reference,
            tmp,
            runtime_stub,
        }
    }

    pub fn entry(&self) -> Label {
        self.entry
    }

    pub fn continuation(&self) -> Label {
        self.continuation
    }

    pub fn decorators(&self) -> DecoratorSet {
        self.decorators
    }

    pub fn ref_addr(&self) -> Address {
        self.ref_addr
    }

    pub fn reference(&self) -> Operand {
        self.reference
    }

    pub fn tmp(&self) -> Operand {
        self.tmp
    }

    pub fn runtime_stub(&self) -> usize {
        self.runtime_stub
    }

    fn emit_code(&self, asm: &mut Assembler) {
        asm.bind(self.entry);
        let saved = saved_registers(Some(self.reference));
        push_all(asm, &saved);

        asm.push(Instruction::Push {
            src: self.reference,
        });
        push_address(asm, &self.ref_addr, self.tmp);
        asm.push(Instruction::Push {
            src: Operand::Imm(self.decorators.bits() as i64),
        });
        pop_arguments(asm, 3);

        asm.push(Instruction::Call {
            target: Operand::imm(self.runtime_stub),
        });
        asm.push(Instruction::Mov {
            dest: self.reference,
            src: Operand::PhysReg(SystemVAbi::RET_REG),
        });

        pop_all(asm, &saved);
        asm.push(Instruction::Jmp {
            target: self.continuation,
        });
    }

    fn visit(&self, visitor: &mut OperandVisitor) {
        visitor.do_slow_case();
        visitor.do_input_address(&self.ref_addr);
        visitor.do_input(self.reference);
        visitor.do_output(self.reference);
        if self.tmp.is_valid() {
            visitor.do_temp(self.tmp);
        }
    }

    fn rewrite_operands(&mut self, f: &mut dyn FnMut(&mut Operand)) {
        self.ref_addr.registers_mut(f);
        f(&mut self.reference);
        f(&mut self.tmp);
    }
}

/// Operands only atomic stores carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicOperands {
    /// Colored expected value; `Operand::Illegal` for exchanges
    pub expected: Operand,
    /// Slot contents returned by the hardware instruction
    pub witness: Operand,
    pub result: Operand,
}

/// Slow path of a reference store or atomic update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreBarrierStub {
    entry: Label,
    continuation: Label,
    ref_addr: Address,
    new_zaddress: Operand,
    new_zpointer: Operand,
    tmp: Operand,
    op: StoreOp,
    atomic: Option<AtomicOperands>,
    runtime_stub: usize,
}

impl StoreBarrierStub {
    /// Plain store, healing or not depending on `runtime_stub`
    pub fn new(
        gen: &mut LirBuilder,
        ref_addr: Address,
        new_zaddress: Operand,
        new_zpointer: Operand,
        tmp: Operand,
        runtime_stub: usize,
    ) -> Self {
        Self::build(
            gen,
            ref_addr,
            new_zaddress,
            new_zpointer,
            tmp,
            StoreOp::Store,
            None,
            runtime_stub,
        )
    }

    /// Verification of an atomic update that already executed
    #[allow(clippy::too_many_arguments)]
    pub fn atomic(
        gen: &mut LirBuilder,
        ref_addr: Address,
        new_zaddress: Operand,
        new_zpointer: Operand,
        tmp: Operand,
        op: StoreOp,
        operands: AtomicOperands,
        runtime_stub: usize,
    ) -> Self {
        debug_assert!(op != StoreOp::Store);
        Self::build(
            gen,
            ref_addr,
            new_zaddress,
            new_zpointer,
            tmp,
            op,
            Some(operands),
            runtime_stub,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        gen: &mut LirBuilder,
        ref_addr: Address,
        new_zaddress: Operand,
        new_zpointer: Operand,
        tmp: Operand,
        op: StoreOp,
        atomic: Option<AtomicOperands>,
        runtime_stub: usize,
    ) -> Self {
        debug_assert!(runtime_stub != 0, "routine address must be resolved");
        Self {
            entry: gen.new_label(),
            continuation: gen.new_label(),
            ref_addr,
            new_zaddress,
            new_zpointer,
            tmp,
            op,
            atomic,
            runtime_stub,
        }
    }

    pub fn entry(&self) -> Label {
        self.entry
    }

    pub fn continuation(&self) -> Label {
        self.continuation
    }

    pub fn ref_addr(&self) -> Address {
        self.ref_addr
    }

    pub fn new_zaddress(&self) -> Operand {
        self.new_zaddress
    }

    pub fn new_zpointer(&self) -> Operand {
        self.new_zpointer
    }

    pub fn tmp(&self) -> Operand {
        self.tmp
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic.is_some()
    }

    pub fn op(&self) -> StoreOp {
        self.op
    }

    pub fn atomic_operands(&self) -> Option<AtomicOperands> {
        self.atomic
    }

    pub fn runtime_stub(&self) -> usize {
        self.runtime_stub
    }

    fn emit_code(&self, asm: &mut Assembler) {
        asm.bind(self.entry);
        let result = self.atomic.map(|a| a.result);
        let saved = saved_registers(result);
        push_all(asm, &saved);

        let (expected, witness) = match self.atomic {
            Some(a) => (a.expected, a.witness),
            None => (Operand::Illegal, Operand::Illegal),
        };
        push_address(asm, &self.ref_addr, self.tmp);
        for src in [
            Operand::Imm(self.op as i64),
            self.new_zaddress,
            self.new_zpointer,
            expected,
            witness,
        ] {
            asm.push(Instruction::Push {
                src: or_zero(src),
            });
        }
        pop_arguments(asm, 6);

        asm.push(Instruction::Call {
            target: Operand::imm(self.runtime_stub),
        });
        if let Some(result) = result {
            asm.push(Instruction::Mov {
                dest: result,
                src: Operand::PhysReg(SystemVAbi::RET_REG),
            });
        }

        pop_all(asm, &saved);
        asm.push(Instruction::Jmp {
            target: self.continuation,
        });
    }

    fn visit(&self, visitor: &mut OperandVisitor) {
        visitor.do_slow_case();
        visitor.do_input_address(&self.ref_addr);
        visitor.do_input(self.new_zaddress);
        visitor.do_input(self.new_zpointer);
        if self.tmp.is_valid() {
            visitor.do_temp(self.tmp);
        }
        if let Some(atomic) = self.atomic {
            visitor.do_input(atomic.expected);
            visitor.do_input(atomic.witness);
            visitor.do_output(atomic.result);
        }
    }

    fn rewrite_operands(&mut self, f: &mut dyn FnMut(&mut Operand)) {
        self.ref_addr.registers_mut(f);
        f(&mut self.new_zaddress);
        f(&mut self.new_zpointer);
        f(&mut self.tmp);
        if let Some(atomic) = &mut self.atomic {
            f(&mut atomic.expected);
            f(&mut atomic.witness);
            f(&mut atomic.result);
        }
    }
}

/// The two barrier stub kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierStub {
    Load(LoadBarrierStub),
    Store(StoreBarrierStub),
}

impl From<LoadBarrierStub> for BarrierStub {
    fn from(stub: LoadBarrierStub) -> Self {
        BarrierStub::Load(stub)
    }
}

impl From<StoreBarrierStub> for BarrierStub {
    fn from(stub: StoreBarrierStub) -> Self {
        BarrierStub::Store(stub)
    }
}

impl BarrierStub {
    pub fn runtime_stub(&self) -> usize {
        match self {
            BarrierStub::Load(stub) => stub.runtime_stub,
            BarrierStub::Store(stub) => stub.runtime_stub,
        }
    }
}

impl CodeStub for BarrierStub {
    fn entry(&self) -> Label {
        match self {
            BarrierStub::Load(stub) => stub.entry,
            BarrierStub::Store(stub) => stub.entry,
        }
    }

    fn continuation(&self) -> Label {
        match self {
            BarrierStub::Load(stub) => stub.continuation,
            BarrierStub::Store(stub) => stub.continuation,
        }
    }

    fn emit_code(&self, asm: &mut Assembler) {
        match self {
            BarrierStub::Load(stub) => stub.emit_code(asm),
            BarrierStub::Store(stub) => stub.emit_code(asm),
        }
    }

    fn visit(&self, visitor: &mut OperandVisitor) {
        match self {
            BarrierStub::Load(stub) => stub.visit(visitor),
            BarrierStub::Store(stub) => stub.visit(visitor),
        }
    }

    fn rewrite_operands(&mut self, f: &mut dyn FnMut(&mut Operand)) {
        match self {
            BarrierStub::Load(stub) => stub.rewrite_operands(f),
            BarrierStub::Store(stub) => stub.rewrite_operands(f),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BarrierStub::Load(_) => "LoadBarrierStub",
            BarrierStub::Store(_) => "StoreBarrierStub",
        }
    }
}

// ============================================================================
// CODE HELPERS
// ============================================================================

/// Registers the routine call may clobber, minus the stub's result
fn saved_registers(result: Option<Operand>) -> Vec<PhysicalRegister> {
    SystemVAbi::get_caller_saved_regs()
        .iter()
        .copied()
        .filter(|reg| result != Some(Operand::PhysReg(*reg)))
        .collect()
}

fn push_all(asm: &mut Assembler, regs: &[PhysicalRegister]) {
    for reg in regs {
        asm.push(Instruction::Push {
            src: Operand::PhysReg(*reg),
        });
    }
}

fn pop_all(asm: &mut Assembler, regs: &[PhysicalRegister]) {
    for reg in regs.iter().rev() {
        asm.push(Instruction::Pop {
            dest: Operand::PhysReg(*reg),
        });
    }
}

/// Push the slot address, materialized through `tmp` when it is not a
/// plain register
fn push_address(asm: &mut Assembler, addr: &Address, tmp: Operand) {
    let src = match addr.as_plain_register() {
        Some(reg) => reg,
        None => {
            // RAX is saved and overwritten by the call anyway
            let scratch = if tmp.is_valid() {
                tmp
            } else {
                Operand::PhysReg(SystemVAbi::RET_REG)
            };
            asm.push(Instruction::Lea {
                dest: scratch,
                addr: *addr,
            });
            scratch
        }
    };
    asm.push(Instruction::Push { src });
}

/// Pop the last `count` pushed values into the argument registers
fn pop_arguments(asm: &mut Assembler, count: usize) {
    for reg in SystemVAbi::ARG_REGS[..count].iter().rev() {
        asm.push(Instruction::Pop {
            dest: Operand::PhysReg(*reg),
        });
    }
}

fn or_zero(op: Operand) -> Operand {
    if op.is_valid() {
        op
    } else {
        Operand::Imm(0)
    }
}
