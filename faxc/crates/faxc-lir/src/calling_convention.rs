//! System V AMD64 ABI Calling Convention
//!
//! Register roles used by out-of-line stubs and runtime calls.

use crate::lir::PhysicalRegister;

/// System V AMD64 ABI calling convention handler
pub struct SystemVAbi;

impl SystemVAbi {
    /// Integer/pointer argument registers in order
    pub const ARG_REGS: [PhysicalRegister; 6] = [
        PhysicalRegister::RDI,
        PhysicalRegister::RSI,
        PhysicalRegister::RDX,
        PhysicalRegister::RCX,
        PhysicalRegister::R8,
        PhysicalRegister::R9,
    ];

    /// Return register for integer/pointer types
    pub const RET_REG: PhysicalRegister = PhysicalRegister::RAX;

    /// Caller-saved registers that never carry arguments or results
    pub const SCRATCH_REGS: [PhysicalRegister; 2] = [PhysicalRegister::R10, PhysicalRegister::R11];

    /// Get the argument register for a given argument index (0-5)
    pub fn get_arg_register(index: usize) -> Option<PhysicalRegister> {
        Self::ARG_REGS.get(index).copied()
    }

    /// Registers a native call may clobber
    pub fn get_caller_saved_regs() -> &'static [PhysicalRegister] {
        &[
            PhysicalRegister::RAX,
            PhysicalRegister::RCX,
            PhysicalRegister::RDX,
            PhysicalRegister::RSI,
            PhysicalRegister::RDI,
            PhysicalRegister::R8,
            PhysicalRegister::R9,
            PhysicalRegister::R10,
            PhysicalRegister::R11,
        ]
    }

    /// Get callee-saved registers that need to be preserved
    pub fn get_callee_saved_regs() -> &'static [PhysicalRegister] {
        &[
            PhysicalRegister::RBX,
            PhysicalRegister::RBP,
            PhysicalRegister::R12,
            PhysicalRegister::R13,
            PhysicalRegister::R14,
            PhysicalRegister::R15,
        ]
    }
}

#[cfg(test)]
mod abi_tests {
    use super::*;

    #[test]
    fn test_arg_registers() {
        assert_eq!(SystemVAbi::get_arg_register(0), Some(PhysicalRegister::RDI));
        assert_eq!(SystemVAbi::get_arg_register(5), Some(PhysicalRegister::R9));
        assert_eq!(SystemVAbi::get_arg_register(6), None);
    }

    #[test]
    fn test_caller_and_callee_saved_are_disjoint() {
        for reg in SystemVAbi::get_caller_saved_regs() {
            assert!(reg.is_caller_saved());
            assert!(!SystemVAbi::get_callee_saved_regs().contains(reg));
        }
    }

    #[test]
    fn test_scratch_regs_are_not_arguments() {
        for reg in SystemVAbi::SCRATCH_REGS {
            assert!(reg.is_caller_saved());
            assert!(!SystemVAbi::ARG_REGS.contains(&reg));
            assert_ne!(reg, SystemVAbi::RET_REG);
        }
    }
}
