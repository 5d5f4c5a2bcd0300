//! LIR Crate Tests
//!
//! Unit tests for LIR constructs, layout, the code cache and the machine.

use crate::*;

struct NoRuntime;

impl RuntimeDispatch for NoRuntime {
    fn call(&self, entry: usize, _args: [usize; 6], _memory: &dyn Memory) -> Result<usize> {
        Err(LirError::UnknownRuntimeEntry(entry))
    }
}

/// Echoes the first argument plus one
struct IncrementRuntime;

impl RuntimeDispatch for IncrementRuntime {
    fn call(&self, entry: usize, args: [usize; 6], _memory: &dyn Memory) -> Result<usize> {
        match entry {
            0x10 => Ok(args[0] + 1),
            _ => Err(LirError::UnknownRuntimeEntry(entry)),
        }
    }
}

/// Minimal stub: sets `dest` to 7 and jumps back
#[derive(Debug)]
struct SevenStub {
    entry: Label,
    continuation: Label,
    dest: Operand,
}

impl CodeStub for SevenStub {
    fn entry(&self) -> Label {
        self.entry
    }

    fn continuation(&self) -> Label {
        self.continuation
    }

    fn emit_code(&self, asm: &mut Assembler) {
        asm.bind(self.entry);
        asm.push(Instruction::Mov {
            dest: self.dest,
            src: Operand::Imm(7),
        });
        asm.push(Instruction::Jmp {
            target: self.continuation,
        });
    }

    fn visit(&self, visitor: &mut OperandVisitor) {
        visitor.do_slow_case();
        visitor.do_output(self.dest);
    }

    fn rewrite_operands(&mut self, f: &mut dyn FnMut(&mut Operand)) {
        f(&mut self.dest);
    }

    fn name(&self) -> &'static str {
        "SevenStub"
    }
}

fn install(cache: &CodeCache, builder: LirBuilder) -> usize {
    let blob = Assembler::assemble(builder).expect("assembly should succeed");
    cache.install(blob).expect("install should succeed")
}

#[test]
fn test_virtual_register_creation() {
    let reg = VirtualRegister::new(0);
    assert_eq!(reg.id, 0);
    assert_eq!(reg.width, RegisterWidth::W64);

    let reg_w32 = VirtualRegister::with_width(1, RegisterWidth::W32);
    assert_eq!(reg_w32.id, 1);
    assert_eq!(reg_w32.width, RegisterWidth::W32);
}

#[test]
fn test_physical_register_properties() {
    assert!(PhysicalRegister::RAX.is_caller_saved());
    assert!(PhysicalRegister::R10.is_caller_saved());
    assert!(PhysicalRegister::RBX.is_callee_saved());
    assert!(!PhysicalRegister::RAX.is_callee_saved());
}

#[test]
fn test_builder_allocates_fresh_registers_and_labels() {
    let mut builder = LirBuilder::new("f");
    let a = builder.new_reg();
    let b = builder.new_reg();
    assert_ne!(a, b);
    assert_ne!(builder.new_label(), builder.new_label());
    assert_eq!(builder.register_count(), 2);
}

#[test]
fn test_condition_negate() {
    for cond in [
        Condition::Eq,
        Condition::Ne,
        Condition::Lt,
        Condition::Gt,
        Condition::Le,
        Condition::Ge,
    ] {
        assert_eq!(cond.negate().negate(), cond);
        assert_ne!(cond.negate(), cond);
    }
}

#[test]
fn test_address_registers() {
    let v0 = Operand::Reg(VirtualRegister::new(0));
    let v1 = Operand::Reg(VirtualRegister::new(1));
    let indexed = Address::Indexed {
        base: v0,
        index: v1,
        scale: 8,
        offset: 16,
    };
    assert_eq!(indexed.registers().collect::<Vec<_>>(), vec![v0, v1]);
    assert_eq!(Address::Absolute(0x40).registers().count(), 0);
    assert_eq!(Address::base(v0, 0).as_plain_register(), Some(v0));
    assert_eq!(Address::base(v0, 8).as_plain_register(), None);
}

#[test]
fn test_unresolved_label_is_rejected() {
    let mut builder = LirBuilder::new("broken");
    let nowhere = builder.new_label();
    builder.emit(Instruction::Jmp { target: nowhere });
    assert_eq!(
        Assembler::assemble(builder).unwrap_err(),
        LirError::UnresolvedLabel(nowhere.0)
    );
}

#[test]
fn test_duplicate_label_is_rejected() {
    let mut builder = LirBuilder::new("twice");
    let label = builder.new_label();
    builder.bind(label);
    builder.bind(label);
    assert_eq!(
        Assembler::assemble(builder).unwrap_err(),
        LirError::DuplicateLabel(label.0)
    );
}

#[test]
fn test_stubs_are_laid_out_after_body() {
    let mut builder = LirBuilder::new("with_stub");
    let dest = Operand::Reg(builder.new_reg());
    let entry = builder.new_label();
    let continuation = builder.new_label();
    builder.emit(Instruction::Jmp { target: entry });
    builder.bind(continuation);
    builder.emit(Instruction::Ret);
    builder.add_stub(Box::new(SevenStub {
        entry,
        continuation,
        dest,
    }));

    let blob = Assembler::assemble(builder).unwrap();
    assert_eq!(blob.target(continuation).unwrap(), 1);
    assert_eq!(blob.target(entry).unwrap(), 3);
    assert!(blob.disassemble().contains("jmp .L1"));
}

#[test]
fn test_rewrite_operands_reaches_stubs() {
    let mut builder = LirBuilder::new("rewrite");
    let v = builder.new_reg();
    let entry = builder.new_label();
    let continuation = builder.new_label();
    builder.emit(Instruction::Mov {
        dest: Operand::Reg(v),
        src: Operand::Imm(1),
    });
    builder.add_stub(Box::new(SevenStub {
        entry,
        continuation,
        dest: Operand::Reg(v),
    }));

    builder.rewrite_operands(&mut |op| {
        if *op == Operand::Reg(v) {
            *op = Operand::PhysReg(PhysicalRegister::RBX);
        }
    });

    let mut visitor = OperandVisitor::new();
    builder.stubs()[0].visit(&mut visitor);
    assert_eq!(visitor.outputs(), vec![Operand::PhysReg(PhysicalRegister::RBX)]);
    assert!(visitor.has_slow_case());
    assert!(matches!(
        builder.instructions()[0],
        Instruction::Mov {
            dest: Operand::PhysReg(PhysicalRegister::RBX),
            ..
        }
    ));
}

#[test]
fn test_instruction_visit_modes() {
    let a = Operand::Reg(VirtualRegister::new(0));
    let b = Operand::Reg(VirtualRegister::new(1));
    let r = Operand::Reg(VirtualRegister::new(2));
    let mut visitor = OperandVisitor::new();
    Instruction::CmpXchg {
        addr: Address::base(a, 8),
        expected: b,
        new: Operand::Imm(3),
        result: r,
    }
    .visit(&mut visitor);
    assert_eq!(visitor.inputs(), vec![a, b]);
    assert_eq!(visitor.outputs(), vec![r]);

    visitor.reset();
    Instruction::And { dest: a, src: b }.visit(&mut visitor);
    assert_eq!(
        visitor.modes_of(a),
        vec![OperandMode::Input, OperandMode::Output]
    );
}

#[test]
fn test_code_cache_addresses_and_capacity() {
    let cache = CodeCache::new(2);
    let first = install(&cache, LirBuilder::new("a"));
    let second = install(&cache, LirBuilder::new("b"));
    assert_ne!(first, second);
    assert_eq!(cache.lookup(second).unwrap().name(), "b");
    assert!(!cache.contains(first + 1));

    let blob = Assembler::assemble(LirBuilder::new("c")).unwrap();
    assert_eq!(
        cache.install(blob).unwrap_err(),
        LirError::CodeCacheFull { capacity: 2 }
    );
}

#[test]
fn test_code_cache_install_all_is_all_or_nothing() {
    let cache = CodeCache::new(3);
    install(&cache, LirBuilder::new("a"));

    let blobs = |names: &[&str]| -> Vec<_> {
        names
            .iter()
            .map(|name| Assembler::assemble(LirBuilder::new(*name)).unwrap())
            .collect()
    };
    assert_eq!(
        cache.install_all(blobs(&["b", "c", "d"])).unwrap_err(),
        LirError::CodeCacheFull { capacity: 3 }
    );
    assert_eq!(cache.len(), 1, "partial batch left behind");

    let addresses = cache.install_all(blobs(&["b", "c"])).unwrap();
    assert_eq!(addresses.len(), 2);
    assert_eq!(cache.lookup(addresses[0]).unwrap().name(), "b");
    assert_eq!(cache.lookup(addresses[1]).unwrap().name(), "c");
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_word_memory_bounds() {
    let memory = WordMemory::new(0x1000, 4);
    memory.store(0x1018, 5).unwrap();
    assert_eq!(memory.load(0x1018).unwrap(), 5);
    assert_eq!(
        memory.load(0x1020).unwrap_err(),
        LirError::MemoryFault { address: 0x1020 }
    );
    assert!(memory.load(0x1004).is_err());
    assert_eq!(memory.compare_exchange(0x1018, 4, 9).unwrap(), 5);
    assert_eq!(memory.load(0x1018).unwrap(), 5);
    assert_eq!(memory.compare_exchange(0x1018, 5, 9).unwrap(), 5);
    assert_eq!(memory.swap(0x1018, 1).unwrap(), 9);
}

#[test]
fn test_machine_branches_and_stub() {
    let cache = CodeCache::new(4);
    let memory = WordMemory::new(0x1000, 4);

    let mut builder = LirBuilder::new("branchy");
    let x = Operand::Reg(builder.new_reg());
    let entry = builder.new_label();
    let continuation = builder.new_label();
    builder.emit(Instruction::Mov {
        dest: x,
        src: Operand::Imm(0),
    });
    builder.emit(Instruction::Cmp {
        src1: x,
        src2: Operand::Imm(0),
    });
    builder.emit(Instruction::Jcc {
        cond: Condition::Eq,
        target: entry,
    });
    builder.bind(continuation);
    builder.emit(Instruction::Store {
        addr: Address::Absolute(0x1000),
        src: x,
    });
    builder.emit(Instruction::Ret);
    builder.add_stub(Box::new(SevenStub {
        entry,
        continuation,
        dest: x,
    }));
    let address = install(&cache, builder);

    let mut machine = Machine::new(&cache, &memory, &NoRuntime);
    machine.call(address).unwrap();
    assert_eq!(memory.load(0x1000).unwrap(), 7);
    assert!(!machine.is_running());
}

#[test]
fn test_machine_call_and_runtime_clobbers() {
    let cache = CodeCache::new(4);
    let memory = WordMemory::new(0x1000, 4);

    let mut callee = LirBuilder::new("callee");
    callee.emit(Instruction::Push {
        src: Operand::PhysReg(PhysicalRegister::R10),
    });
    callee.emit(Instruction::CallRuntime { entry: 0x10 });
    callee.emit(Instruction::Pop {
        dest: Operand::PhysReg(PhysicalRegister::R10),
    });
    callee.emit(Instruction::Ret);
    let callee = install(&cache, callee);

    let mut caller = LirBuilder::new("caller");
    caller.emit(Instruction::Mov {
        dest: Operand::PhysReg(PhysicalRegister::RDI),
        src: Operand::Imm(41),
    });
    caller.emit(Instruction::Call {
        target: Operand::imm(callee),
    });
    caller.emit(Instruction::Ret);
    let caller = install(&cache, caller);

    let mut machine = Machine::new(&cache, &memory, &IncrementRuntime);
    machine
        .set_register(PhysicalRegister::R10, 0x77)
        .unwrap();
    machine.call(caller).unwrap();
    assert_eq!(machine.register(PhysicalRegister::RAX).unwrap(), 42);
    assert_eq!(machine.register(PhysicalRegister::R10).unwrap(), 0x77);
    assert_eq!(
        machine.register(PhysicalRegister::RDI).unwrap(),
        CLOBBER_PATTERN
    );
    assert_eq!(machine.stack_depth(), 0);
}

#[test]
fn test_machine_cmpxchg_and_set() {
    let cache = CodeCache::new(4);
    let memory = WordMemory::new(0x1000, 4);
    memory.store(0x1008, 3).unwrap();

    let mut builder = LirBuilder::new("cas");
    let witness = Operand::Reg(builder.new_reg());
    let ok = Operand::Reg(builder.new_reg());
    builder.emit(Instruction::CmpXchg {
        addr: Address::Absolute(0x1008),
        expected: Operand::Imm(3),
        new: Operand::Imm(4),
        result: witness,
    });
    builder.emit(Instruction::Cmp {
        src1: witness,
        src2: Operand::Imm(3),
    });
    builder.emit(Instruction::Set {
        cond: Condition::Eq,
        dest: ok,
    });
    builder.emit(Instruction::Ret);
    let address = install(&cache, builder);

    let mut machine = Machine::new(&cache, &memory, &NoRuntime);
    machine.call(address).unwrap();
    assert_eq!(machine.register(ok).unwrap(), 1);
    assert_eq!(memory.load(0x1008).unwrap(), 4);
}

#[test]
fn test_machine_reports_undefined_register_and_step_limit() {
    let cache = CodeCache::new(4);
    let memory = WordMemory::new(0x1000, 1);

    let mut builder = LirBuilder::new("undefined");
    let v = builder.new_reg();
    builder.emit(Instruction::Store {
        addr: Address::Absolute(0x1000),
        src: Operand::Reg(v),
    });
    let undefined = install(&cache, builder);

    let mut builder = LirBuilder::new("spin");
    let top = builder.new_label();
    builder.bind(top);
    builder.emit(Instruction::Jmp { target: top });
    let spin = install(&cache, builder);

    let mut machine = Machine::new(&cache, &memory, &NoRuntime);
    assert!(matches!(
        machine.call(undefined),
        Err(LirError::UndefinedRegister(_))
    ));

    let mut machine = Machine::new(&cache, &memory, &NoRuntime).with_step_limit(100);
    assert_eq!(
        machine.call(spin).unwrap_err(),
        LirError::StepLimitExceeded(100)
    );
}
