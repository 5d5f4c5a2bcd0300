//! LIR machine
//!
//! Executes installed code one instruction at a time against a
//! word-addressed `Memory`. Every memory instruction, including the two
//! atomics, performs exactly one memory operation, so instruction
//! boundaries are the only points at which other threads can observe or
//! change memory.

use crate::assembler::CodeBlob;
use crate::calling_convention::SystemVAbi;
use crate::code_cache::CodeCache;
use crate::error::{LirError, Result};
use crate::lir::*;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const WORD_SIZE: usize = 8;

/// Value left in caller-saved registers after a runtime call
pub const CLOBBER_PATTERN: usize = 0xbad0_bad0_bad0_bad0;

const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Word-granular memory shared by the machine and runtime entries
pub trait Memory: Sync {
    fn load(&self, address: usize) -> Result<usize>;

    fn store(&self, address: usize, value: usize) -> Result<()>;

    /// Returns the previous contents; the exchange happened iff it equals `expected`
    fn compare_exchange(&self, address: usize, expected: usize, new: usize) -> Result<usize>;

    fn swap(&self, address: usize, value: usize) -> Result<usize>;
}

/// Contiguous memory of atomic words starting at `base`
pub struct WordMemory {
    base: usize,
    words: Box<[AtomicUsize]>,
}

impl WordMemory {
    /// `base` must be word aligned
    pub fn new(base: usize, len: usize) -> Self {
        debug_assert_eq!(base % WORD_SIZE, 0);
        Self {
            base,
            words: (0..len).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn address_of(&self, index: usize) -> usize {
        self.base + index * WORD_SIZE
    }

    fn word(&self, address: usize) -> Result<&AtomicUsize> {
        address
            .checked_sub(self.base)
            .filter(|offset| offset % WORD_SIZE == 0)
            .and_then(|offset| self.words.get(offset / WORD_SIZE))
            .ok_or(LirError::MemoryFault { address })
    }
}

impl Memory for WordMemory {
    fn load(&self, address: usize) -> Result<usize> {
        Ok(self.word(address)?.load(Ordering::SeqCst))
    }

    fn store(&self, address: usize, value: usize) -> Result<()> {
        self.word(address)?.store(value, Ordering::SeqCst);
        Ok(())
    }

    fn compare_exchange(&self, address: usize, expected: usize, new: usize) -> Result<usize> {
        match self
            .word(address)?
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(previous) | Err(previous) => Ok(previous),
        }
    }

    fn swap(&self, address: usize, value: usize) -> Result<usize> {
        Ok(self.word(address)?.swap(value, Ordering::SeqCst))
    }
}

/// Native side of `Instruction::CallRuntime`
pub trait RuntimeDispatch: Sync {
    fn call(&self, entry: usize, args: [usize; 6], memory: &dyn Memory) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RegKey {
    Virtual(u32),
    Physical(PhysicalRegister),
}

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    zero: bool,
    negative: bool,
}

impl Flags {
    fn from_result(value: usize) -> Self {
        Self {
            zero: value == 0,
            negative: (value as i64) < 0,
        }
    }

    fn holds(self, cond: Condition) -> bool {
        match cond {
            Condition::Eq => self.zero,
            Condition::Ne => !self.zero,
            Condition::Lt => self.negative,
            Condition::Ge => !self.negative,
            Condition::Gt => !self.negative && !self.zero,
            Condition::Le => self.negative || self.zero,
        }
    }
}

pub struct Machine<'a> {
    cache: &'a CodeCache,
    memory: &'a dyn Memory,
    runtime: &'a dyn RuntimeDispatch,
    registers: FxHashMap<RegKey, usize>,
    stack: Vec<usize>,
    frames: Vec<(Arc<CodeBlob>, usize)>,
    current: Option<(Arc<CodeBlob>, usize)>,
    flags: Flags,
    steps: u64,
    step_limit: u64,
}

impl<'a> Machine<'a> {
    pub fn new(
        cache: &'a CodeCache,
        memory: &'a dyn Memory,
        runtime: &'a dyn RuntimeDispatch,
    ) -> Self {
        Self {
            cache,
            memory,
            runtime,
            registers: FxHashMap::default(),
            stack: Vec::new(),
            frames: Vec::new(),
            current: None,
            flags: Flags::default(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn set_register(&mut self, op: impl Into<Operand>, value: usize) -> Result<()> {
        self.write(op.into(), value)
    }

    pub fn register(&self, op: impl Into<Operand>) -> Result<usize> {
        self.read(op.into())
    }

    /// Start executing the blob installed at `address`
    pub fn enter(&mut self, address: usize) -> Result<()> {
        let blob = self.cache.lookup(address)?;
        self.frames.clear();
        self.current = Some((blob, 0));
        Ok(())
    }

    /// Enter `address` and run until it returns
    pub fn call(&mut self, address: usize) -> Result<u64> {
        self.enter(address)?;
        self.run()
    }

    pub fn run(&mut self) -> Result<u64> {
        let start = self.steps;
        while self.step()? {}
        Ok(self.steps - start)
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Instruction about to execute
    pub fn current_instruction(&self) -> Option<&Instruction> {
        self.current
            .as_ref()
            .and_then(|(blob, pc)| blob.instructions().get(*pc))
    }

    /// Execute one instruction. Returns false once the entry blob returns.
    pub fn step(&mut self) -> Result<bool> {
        let (blob, pc) = match &self.current {
            Some((blob, pc)) => (Arc::clone(blob), *pc),
            None => return Ok(false),
        };
        if self.steps >= self.step_limit {
            return Err(LirError::StepLimitExceeded(self.step_limit));
        }
        self.steps += 1;

        let Some(inst) = blob.instructions().get(pc) else {
            return Ok(self.ret());
        };
        let mut next = pc + 1;

        match *inst {
            Instruction::Nop | Instruction::Label(_) => {}
            Instruction::Mov { dest, src } => {
                let value = self.read(src)?;
                self.write(dest, value)?;
            }
            Instruction::Load { dest, addr } => {
                let address = self.effective_address(&addr)?;
                let value = self.memory.load(address)?;
                self.write(dest, value)?;
            }
            Instruction::Store { addr, src } => {
                let address = self.effective_address(&addr)?;
                let value = self.read(src)?;
                self.memory.store(address, value)?;
            }
            Instruction::Lea { dest, addr } => {
                let address = self.effective_address(&addr)?;
                self.write(dest, address)?;
            }
            Instruction::Add { dest, src } => self.binary(dest, src, usize::wrapping_add)?,
            Instruction::Sub { dest, src } => self.binary(dest, src, usize::wrapping_sub)?,
            Instruction::And { dest, src } => self.binary(dest, src, |a, b| a & b)?,
            Instruction::Or { dest, src } => self.binary(dest, src, |a, b| a | b)?,
            Instruction::Xor { dest, src } => self.binary(dest, src, |a, b| a ^ b)?,
            Instruction::Shl { dest, count } => {
                let value = self.read(dest)?.wrapping_shl(u32::from(count));
                self.flags = Flags::from_result(value);
                self.write(dest, value)?;
            }
            Instruction::Shr { dest, count } => {
                let value = self.read(dest)?.wrapping_shr(u32::from(count));
                self.flags = Flags::from_result(value);
                self.write(dest, value)?;
            }
            Instruction::Cmp { src1, src2 } => {
                let (a, b) = (self.read(src1)?, self.read(src2)?);
                self.flags = Flags {
                    zero: a == b,
                    negative: (a as i64) < (b as i64),
                };
            }
            Instruction::Test { src1, src2 } => {
                let value = self.read(src1)? & self.read(src2)?;
                self.flags = Flags::from_result(value);
            }
            Instruction::Jmp { target } => next = blob.target(target)?,
            Instruction::Jcc { cond, target } => {
                if self.flags.holds(cond) {
                    next = blob.target(target)?;
                }
            }
            Instruction::Set { cond, dest } => {
                let value = usize::from(self.flags.holds(cond));
                self.write(dest, value)?;
            }
            Instruction::Call { target } => {
                let callee = self.cache.lookup(self.read(target)?)?;
                self.frames.push((Arc::clone(&blob), next));
                self.current = Some((callee, 0));
                return Ok(true);
            }
            Instruction::CallRuntime { entry } => self.call_runtime(entry)?,
            Instruction::CmpXchg {
                addr,
                expected,
                new,
                result,
            } => {
                let address = self.effective_address(&addr)?;
                let (expected, new) = (self.read(expected)?, self.read(new)?);
                let previous = self.memory.compare_exchange(address, expected, new)?;
                self.flags.zero = previous == expected;
                self.write(result, previous)?;
            }
            Instruction::Xchg { addr, src, result } => {
                let address = self.effective_address(&addr)?;
                let value = self.read(src)?;
                let previous = self.memory.swap(address, value)?;
                self.write(result, previous)?;
            }
            Instruction::Push { src } => {
                let value = self.read(src)?;
                self.stack.push(value);
            }
            Instruction::Pop { dest } => {
                let value = self.stack.pop().ok_or(LirError::StackUnderflow)?;
                self.write(dest, value)?;
            }
            Instruction::Ret => return Ok(self.ret()),
        }

        self.current = Some((blob, next));
        Ok(true)
    }

    fn ret(&mut self) -> bool {
        self.current = self.frames.pop();
        self.current.is_some()
    }

    fn call_runtime(&mut self, entry: usize) -> Result<()> {
        let mut args = [0usize; 6];
        for (arg, reg) in args.iter_mut().zip(SystemVAbi::ARG_REGS) {
            *arg = self
                .registers
                .get(&RegKey::Physical(reg))
                .copied()
                .unwrap_or(0);
        }
        let result = self.runtime.call(entry, args, self.memory)?;
        for &reg in SystemVAbi::get_caller_saved_regs() {
            self.registers.insert(RegKey::Physical(reg), CLOBBER_PATTERN);
        }
        self.registers
            .insert(RegKey::Physical(SystemVAbi::RET_REG), result);
        Ok(())
    }

    fn binary(&mut self, dest: Operand, src: Operand, op: fn(usize, usize) -> usize) -> Result<()> {
        let value = op(self.read(dest)?, self.read(src)?);
        self.flags = Flags::from_result(value);
        self.write(dest, value)
    }

    fn effective_address(&self, addr: &Address) -> Result<usize> {
        Ok(match *addr {
            Address::Base { base, offset } => {
                self.read(base)?.wrapping_add_signed(offset as isize)
            }
            Address::Indexed {
                base,
                index,
                scale,
                offset,
            } => self
                .read(base)?
                .wrapping_add(self.read(index)?.wrapping_mul(usize::from(scale)))
                .wrapping_add_signed(offset as isize),
            Address::Absolute(address) => address,
        })
    }

    fn read(&self, op: Operand) -> Result<usize> {
        match op {
            Operand::Reg(reg) => self
                .registers
                .get(&RegKey::Virtual(reg.id))
                .copied()
                .ok_or_else(|| LirError::UndefinedRegister(op.to_string())),
            // Hardware registers always hold a value; unwritten ones read as zero
            Operand::PhysReg(reg) => Ok(self
                .registers
                .get(&RegKey::Physical(reg))
                .copied()
                .unwrap_or(0)),
            Operand::Imm(value) => Ok(value as usize),
            Operand::Illegal => Err(LirError::IllegalOperand("read of illegal operand".into())),
        }
    }

    fn write(&mut self, op: Operand, value: usize) -> Result<()> {
        let key = match op {
            Operand::Reg(reg) => RegKey::Virtual(reg.id),
            Operand::PhysReg(reg) => RegKey::Physical(reg),
            Operand::Imm(_) | Operand::Illegal => {
                return Err(LirError::IllegalOperand(format!("write to {}", op)))
            }
        };
        self.registers.insert(key, value);
        Ok(())
    }
}
