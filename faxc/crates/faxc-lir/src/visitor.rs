//! Operand enumeration
//!
//! The register allocator and liveness pass learn what an instruction or
//! out-of-line stub reads, writes and clobbers through `OperandVisitor`.
//! Only register operands are recorded; immediates and illegal operands
//! carry no liveness.

use crate::lir::{Address, Instruction, Operand};

/// How an operand is used at the visited site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandMode {
    Input,
    Temp,
    Output,
}

#[derive(Debug, Default, Clone)]
pub struct OperandVisitor {
    entries: Vec<(Operand, OperandMode)>,
    has_call: bool,
    has_slow_case: bool,
}

impl OperandVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.has_call = false;
        self.has_slow_case = false;
    }

    pub fn do_input(&mut self, op: Operand) {
        self.record(op, OperandMode::Input);
    }

    pub fn do_temp(&mut self, op: Operand) {
        self.record(op, OperandMode::Temp);
    }

    pub fn do_output(&mut self, op: Operand) {
        self.record(op, OperandMode::Output);
    }

    /// Registers used to form `addr` are inputs
    pub fn do_input_address(&mut self, addr: &Address) {
        for reg in addr.registers() {
            self.do_input(reg);
        }
    }

    pub fn do_call(&mut self) {
        self.has_call = true;
    }

    /// The visited code is an out-of-line slow case
    pub fn do_slow_case(&mut self) {
        self.has_slow_case = true;
    }

    fn record(&mut self, op: Operand, mode: OperandMode) {
        if op.is_register() {
            self.entries.push((op, mode));
        }
    }

    pub fn entries(&self) -> &[(Operand, OperandMode)] {
        &self.entries
    }

    pub fn operands(&self, mode: OperandMode) -> Vec<Operand> {
        self.entries
            .iter()
            .filter(|(_, m)| *m == mode)
            .map(|(op, _)| *op)
            .collect()
    }

    pub fn inputs(&self) -> Vec<Operand> {
        self.operands(OperandMode::Input)
    }

    pub fn temps(&self) -> Vec<Operand> {
        self.operands(OperandMode::Temp)
    }

    pub fn outputs(&self) -> Vec<Operand> {
        self.operands(OperandMode::Output)
    }

    pub fn modes_of(&self, op: Operand) -> Vec<OperandMode> {
        self.entries
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, m)| *m)
            .collect()
    }

    pub fn has_call(&self) -> bool {
        self.has_call
    }

    pub fn has_slow_case(&self) -> bool {
        self.has_slow_case
    }
}

impl Instruction {
    pub fn visit(&self, v: &mut OperandVisitor) {
        match self {
            Instruction::Nop
            | Instruction::Label(_)
            | Instruction::Jmp { .. }
            | Instruction::Jcc { .. }
            | Instruction::Ret => {}
            Instruction::Mov { dest, src } => {
                v.do_input(*src);
                v.do_output(*dest);
            }
            Instruction::Load { dest, addr } | Instruction::Lea { dest, addr } => {
                v.do_input_address(addr);
                v.do_output(*dest);
            }
            Instruction::Store { addr, src } => {
                v.do_input_address(addr);
                v.do_input(*src);
            }
            Instruction::Add { dest, src }
            | Instruction::Sub { dest, src }
            | Instruction::And { dest, src }
            | Instruction::Or { dest, src }
            | Instruction::Xor { dest, src } => {
                v.do_input(*dest);
                v.do_input(*src);
                v.do_output(*dest);
            }
            Instruction::Shl { dest, .. } | Instruction::Shr { dest, .. } => {
                v.do_input(*dest);
                v.do_output(*dest);
            }
            Instruction::Cmp { src1, src2 } | Instruction::Test { src1, src2 } => {
                v.do_input(*src1);
                v.do_input(*src2);
            }
            Instruction::Set { dest, .. } | Instruction::Pop { dest } => v.do_output(*dest),
            Instruction::Call { target } => {
                v.do_input(*target);
                v.do_call();
            }
            Instruction::CallRuntime { .. } => v.do_call(),
            Instruction::CmpXchg {
                addr,
                expected,
                new,
                result,
            } => {
                v.do_input_address(addr);
                v.do_input(*expected);
                v.do_input(*new);
                v.do_output(*result);
            }
            Instruction::Xchg { addr, src, result } => {
                v.do_input_address(addr);
                v.do_input(*src);
                v.do_output(*result);
            }
            Instruction::Push { src } => v.do_input(*src),
        }
    }
}
