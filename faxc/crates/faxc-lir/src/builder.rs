//! Instruction builder
//!
//! `LirBuilder` collects the straight-line body of one compilation unit
//! together with the out-of-line stubs it branches to. Stubs are emitted
//! after the body by the `Assembler`.

use crate::assembler::Assembler;
use crate::lir::*;
use crate::visitor::OperandVisitor;
use std::fmt;

/// Out-of-line code fragment reached by a branch from the body
///
/// A stub is entered at `entry()` and must finish by jumping back to
/// `continuation()`.
pub trait CodeStub: fmt::Debug + Send {
    fn entry(&self) -> Label;

    fn continuation(&self) -> Label;

    fn emit_code(&self, asm: &mut Assembler);

    /// Enumerate the operands the stub reads, writes and clobbers
    fn visit(&self, visitor: &mut OperandVisitor);

    /// Register allocation hook; must not change the stub's identity
    fn rewrite_operands(&mut self, f: &mut dyn FnMut(&mut Operand));

    /// Diagnostic name
    fn name(&self) -> &'static str;
}

pub struct LirBuilder {
    name: String,
    instructions: Vec<Instruction>,
    stubs: Vec<Box<dyn CodeStub>>,
    register_counter: u32,
    label_counter: u32,
}

impl LirBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
            stubs: Vec::new(),
            register_counter: 0,
            label_counter: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn new_reg(&mut self) -> VirtualRegister {
        let reg = VirtualRegister::new(self.register_counter);
        self.register_counter += 1;
        reg
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.label_counter);
        self.label_counter += 1;
        label
    }

    pub fn emit(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn bind(&mut self, label: Label) {
        self.instructions.push(Instruction::Label(label));
    }

    pub fn add_stub(&mut self, stub: Box<dyn CodeStub>) {
        self.stubs.push(stub);
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn stubs(&self) -> &[Box<dyn CodeStub>] {
        &self.stubs
    }

    pub fn register_count(&self) -> u32 {
        self.register_counter
    }

    /// Rewrite every operand in the body and in all stubs
    pub fn rewrite_operands(&mut self, f: &mut dyn FnMut(&mut Operand)) {
        for inst in &mut self.instructions {
            inst.operands_mut(f);
        }
        for stub in &mut self.stubs {
            stub.rewrite_operands(f);
        }
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Instruction>, Vec<Box<dyn CodeStub>>) {
        (self.name, self.instructions, self.stubs)
    }
}

impl fmt::Debug for LirBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LirBuilder")
            .field("name", &self.name)
            .field("instructions", &self.instructions.len())
            .field("stubs", &self.stubs.len())
            .finish()
    }
}
