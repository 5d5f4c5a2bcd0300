//! LIR constructs
//!
//! x86-64 flavoured instructions over virtual and physical registers.
//! Virtual registers are unlimited; the register allocator (not part of
//! this crate) may rewrite them to physical registers in place.

use std::fmt;

/// Register width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterWidth {
    W8,
    W16,
    W32,
    W64,
}

/// Virtual Register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualRegister {
    pub id: u32,
    pub width: RegisterWidth,
}

impl VirtualRegister {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            width: RegisterWidth::W64,
        }
    }

    pub fn with_width(id: u32, width: RegisterWidth) -> Self {
        Self { id, width }
    }
}

/// x86-64 general purpose registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalRegister {
    RAX,
    RBX,
    RCX,
    RDX,
    RSI,
    RDI,
    RBP,
    RSP,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl PhysicalRegister {
    /// Volatile across calls under System V
    pub fn is_caller_saved(self) -> bool {
        matches!(
            self,
            PhysicalRegister::RAX
                | PhysicalRegister::RCX
                | PhysicalRegister::RDX
                | PhysicalRegister::RSI
                | PhysicalRegister::RDI
                | PhysicalRegister::R8
                | PhysicalRegister::R9
                | PhysicalRegister::R10
                | PhysicalRegister::R11
        )
    }

    pub fn is_callee_saved(self) -> bool {
        matches!(
            self,
            PhysicalRegister::RBX
                | PhysicalRegister::RBP
                | PhysicalRegister::R12
                | PhysicalRegister::R13
                | PhysicalRegister::R14
                | PhysicalRegister::R15
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PhysicalRegister::RAX => "rax",
            PhysicalRegister::RBX => "rbx",
            PhysicalRegister::RCX => "rcx",
            PhysicalRegister::RDX => "rdx",
            PhysicalRegister::RSI => "rsi",
            PhysicalRegister::RDI => "rdi",
            PhysicalRegister::RBP => "rbp",
            PhysicalRegister::RSP => "rsp",
            PhysicalRegister::R8 => "r8",
            PhysicalRegister::R9 => "r9",
            PhysicalRegister::R10 => "r10",
            PhysicalRegister::R11 => "r11",
            PhysicalRegister::R12 => "r12",
            PhysicalRegister::R13 => "r13",
            PhysicalRegister::R14 => "r14",
            PhysicalRegister::R15 => "r15",
        }
    }
}

/// Instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(VirtualRegister),
    PhysReg(PhysicalRegister),
    Imm(i64),
    /// Absent operand, e.g. a stub without a scratch register
    Illegal,
}

impl Operand {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Operand::Illegal)
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Reg(_) | Operand::PhysReg(_))
    }

    pub fn imm(value: usize) -> Self {
        Operand::Imm(value as i64)
    }
}

impl From<VirtualRegister> for Operand {
    fn from(reg: VirtualRegister) -> Self {
        Operand::Reg(reg)
    }
}

impl From<PhysicalRegister> for Operand {
    fn from(reg: PhysicalRegister) -> Self {
        Operand::PhysReg(reg)
    }
}

/// Branch target, bound by an `Instruction::Label`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// Memory addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    Base {
        base: Operand,
        offset: i32,
    },
    Indexed {
        base: Operand,
        index: Operand,
        scale: u8,
        offset: i32,
    },
    Absolute(usize),
}

impl Address {
    pub fn base(base: impl Into<Operand>, offset: i32) -> Self {
        Address::Base {
            base: base.into(),
            offset,
        }
    }

    /// Registers the address computation reads
    pub fn registers(&self) -> impl Iterator<Item = Operand> {
        let (a, b) = match *self {
            Address::Base { base, .. } => (Some(base), None),
            Address::Indexed { base, index, .. } => (Some(base), Some(index)),
            Address::Absolute(_) => (None, None),
        };
        a.into_iter().chain(b).filter(Operand::is_register)
    }

    pub fn registers_mut(&mut self, f: &mut dyn FnMut(&mut Operand)) {
        match self {
            Address::Base { base, .. } => f(base),
            Address::Indexed { base, index, .. } => {
                f(base);
                f(index);
            }
            Address::Absolute(_) => {}
        }
    }

    /// A plain register with no displacement; needs no `lea`
    pub fn as_plain_register(&self) -> Option<Operand> {
        match *self {
            Address::Base { base, offset: 0 } if base.is_register() => Some(base),
            _ => None,
        }
    }
}

/// Condition codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Condition {
    pub fn negate(self) -> Self {
        match self {
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
            Condition::Lt => Condition::Ge,
            Condition::Ge => Condition::Lt,
            Condition::Gt => Condition::Le,
            Condition::Le => Condition::Gt,
        }
    }
}

/// Instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Label(Label),
    Mov { dest: Operand, src: Operand },
    Load { dest: Operand, addr: Address },
    Store { addr: Address, src: Operand },
    Lea { dest: Operand, addr: Address },
    Add { dest: Operand, src: Operand },
    Sub { dest: Operand, src: Operand },
    And { dest: Operand, src: Operand },
    Or { dest: Operand, src: Operand },
    Xor { dest: Operand, src: Operand },
    Shl { dest: Operand, count: u8 },
    Shr { dest: Operand, count: u8 },
    Cmp { src1: Operand, src2: Operand },
    Test { src1: Operand, src2: Operand },
    Jmp { target: Label },
    Jcc { cond: Condition, target: Label },
    Set { cond: Condition, dest: Operand },
    /// Call into installed code at the address held by `target`
    Call { target: Operand },
    /// Call a native runtime entry; arguments in the System V registers,
    /// result in RAX, caller-saved registers clobbered
    CallRuntime { entry: usize },
    /// `result` receives the previous slot contents
    CmpXchg {
        addr: Address,
        expected: Operand,
        new: Operand,
        result: Operand,
    },
    Xchg {
        addr: Address,
        src: Operand,
        result: Operand,
    },
    Push { src: Operand },
    Pop { dest: Operand },
    Ret,
}

impl Instruction {
    /// Apply `f` to every operand, including address registers
    pub fn operands_mut(&mut self, f: &mut dyn FnMut(&mut Operand)) {
        match self {
            Instruction::Nop
            | Instruction::Label(_)
            | Instruction::Jmp { .. }
            | Instruction::Jcc { .. }
            | Instruction::CallRuntime { .. }
            | Instruction::Ret => {}
            Instruction::Mov { dest, src }
            | Instruction::Add { dest, src }
            | Instruction::Sub { dest, src }
            | Instruction::And { dest, src }
            | Instruction::Or { dest, src }
            | Instruction::Xor { dest, src } => {
                f(dest);
                f(src);
            }
            Instruction::Load { dest, addr } | Instruction::Lea { dest, addr } => {
                f(dest);
                addr.registers_mut(f);
            }
            Instruction::Store { addr, src } => {
                addr.registers_mut(f);
                f(src);
            }
            Instruction::Shl { dest, .. }
            | Instruction::Shr { dest, .. }
            | Instruction::Set { dest, .. }
            | Instruction::Pop { dest } => f(dest),
            Instruction::Cmp { src1, src2 } | Instruction::Test { src1, src2 } => {
                f(src1);
                f(src2);
            }
            Instruction::Call { target } => f(target),
            Instruction::CmpXchg {
                addr,
                expected,
                new,
                result,
            } => {
                addr.registers_mut(f);
                f(expected);
                f(new);
                f(result);
            }
            Instruction::Xchg { addr, src, result } => {
                addr.registers_mut(f);
                f(src);
                f(result);
            }
            Instruction::Push { src } => f(src),
        }
    }

    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Instruction::Jmp { target } | Instruction::Jcc { target, .. } => Some(*target),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "v{}", reg.id),
            Operand::PhysReg(reg) => write!(f, "{}", reg.name()),
            Operand::Imm(value) => write!(f, "{:#x}", value),
            Operand::Illegal => write!(f, "-"),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".L{}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Base { base, offset } => write!(f, "[{} + {}]", base, offset),
            Address::Indexed {
                base,
                index,
                scale,
                offset,
            } => write!(f, "[{} + {}*{} + {}]", base, index, scale, offset),
            Address::Absolute(addr) => write!(f, "[{:#x}]", addr),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Nop => write!(f, "    nop"),
            Instruction::Label(label) => write!(f, "{}:", label),
            Instruction::Mov { dest, src } => write!(f, "    mov {}, {}", dest, src),
            Instruction::Load { dest, addr } => write!(f, "    load {}, {}", dest, addr),
            Instruction::Store { addr, src } => write!(f, "    store {}, {}", addr, src),
            Instruction::Lea { dest, addr } => write!(f, "    lea {}, {}", dest, addr),
            Instruction::Add { dest, src } => write!(f, "    add {}, {}", dest, src),
            Instruction::Sub { dest, src } => write!(f, "    sub {}, {}", dest, src),
            Instruction::And { dest, src } => write!(f, "    and {}, {}", dest, src),
            Instruction::Or { dest, src } => write!(f, "    or {}, {}", dest, src),
            Instruction::Xor { dest, src } => write!(f, "    xor {}, {}", dest, src),
            Instruction::Shl { dest, count } => write!(f, "    shl {}, {}", dest, count),
            Instruction::Shr { dest, count } => write!(f, "    shr {}, {}", dest, count),
            Instruction::Cmp { src1, src2 } => write!(f, "    cmp {}, {}", src1, src2),
            Instruction::Test { src1, src2 } => write!(f, "    test {}, {}", src1, src2),
            Instruction::Jmp { target } => write!(f, "    jmp {}", target),
            Instruction::Jcc { cond, target } => write!(f, "    j{:?} {}", cond, target),
            Instruction::Set { cond, dest } => write!(f, "    set{:?} {}", cond, dest),
            Instruction::Call { target } => write!(f, "    call {}", target),
            Instruction::CallRuntime { entry } => write!(f, "    call.rt {:#x}", entry),
            Instruction::CmpXchg {
                addr,
                expected,
                new,
                result,
            } => write!(
                f,
                "    cmpxchg {}, {}, {} -> {}",
                addr, expected, new, result
            ),
            Instruction::Xchg { addr, src, result } => {
                write!(f, "    xchg {}, {} -> {}", addr, src, result)
            }
            Instruction::Push { src } => write!(f, "    push {}", src),
            Instruction::Pop { dest } => write!(f, "    pop {}", dest),
            Instruction::Ret => write!(f, "    ret"),
        }
    }
}
