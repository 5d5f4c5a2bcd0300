//! Final layout of a compilation unit
//!
//! The body is laid out first, then every stub in the order it was
//! added. Labels resolve to instruction indices within the blob.

use crate::builder::LirBuilder;
use crate::error::{LirError, Result};
use crate::lir::{Instruction, Label};
use rustc_hash::FxHashMap;
use std::fmt::Write;

pub struct Assembler {
    name: String,
    instructions: Vec<Instruction>,
    labels: FxHashMap<Label, usize>,
    rebound: Option<Label>,
}

impl Assembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
            labels: FxHashMap::default(),
            rebound: None,
        }
    }

    /// Lay out `builder`'s body followed by its stubs
    pub fn assemble(builder: LirBuilder) -> Result<CodeBlob> {
        let (name, body, stubs) = builder.into_parts();
        let mut asm = Assembler::new(name);
        for inst in body {
            asm.emit(inst)?;
        }
        for stub in &stubs {
            let start = asm.instructions.len();
            stub.emit_code(&mut asm);
            if !asm.labels.contains_key(&stub.entry()) {
                return Err(LirError::UnresolvedLabel(stub.entry().0));
            }
            debug_assert!(asm.instructions.len() > start, "{} emitted no code", stub.name());
        }
        asm.finish()
    }

    pub fn emit(&mut self, inst: Instruction) -> Result<()> {
        if let Instruction::Label(label) = inst {
            if self.labels.insert(label, self.instructions.len()).is_some() {
                return Err(LirError::DuplicateLabel(label.0));
            }
        }
        self.instructions.push(inst);
        Ok(())
    }

    /// Infallible emission for stub code; a rebound label is caught by `finish`
    pub fn push(&mut self, inst: Instruction) {
        if let Instruction::Label(label) = inst {
            if self.labels.insert(label, self.instructions.len()).is_some() {
                self.rebound.get_or_insert(label);
            }
        }
        self.instructions.push(inst);
    }

    pub fn bind(&mut self, label: Label) {
        self.push(Instruction::Label(label));
    }

    pub fn finish(self) -> Result<CodeBlob> {
        if let Some(label) = self.rebound {
            return Err(LirError::DuplicateLabel(label.0));
        }
        for inst in &self.instructions {
            if let Some(target) = inst.branch_target() {
                if !self.labels.contains_key(&target) {
                    return Err(LirError::UnresolvedLabel(target.0));
                }
            }
        }
        Ok(CodeBlob {
            name: self.name,
            instructions: self.instructions,
            labels: self.labels,
        })
    }
}

/// Laid-out code ready for installation
#[derive(Debug, Clone)]
pub struct CodeBlob {
    name: String,
    instructions: Vec<Instruction>,
    labels: FxHashMap<Label, usize>,
}

impl CodeBlob {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Instruction index bound to `label`
    pub fn target(&self, label: Label) -> Result<usize> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(LirError::UnresolvedLabel(label.0))
    }

    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}:", self.name);
        for inst in &self.instructions {
            let _ = writeln!(out, "{}", inst);
        }
        out
    }
}
