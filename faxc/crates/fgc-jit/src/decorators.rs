//! Access Decorators
//!
//! A `DecoratorSet` describes one memory access: where the slot lives,
//! what strength of reference it holds and how it is ordered. It is a
//! plain value; sets are composed with `union`, never mutated in place.

use crate::barrier_set::BasicType;
use crate::error::{BarrierError, Result};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DecoratorSet(u64);

impl DecoratorSet {
    pub const NONE: DecoratorSet = DecoratorSet(0);

    /// Slot lives in the managed heap
    pub const IN_HEAP: DecoratorSet = DecoratorSet(1 << 0);
    /// Slot lives outside the heap (roots, native handles)
    pub const IN_NATIVE: DecoratorSet = DecoratorSet(1 << 1);
    /// Slot is an array element rather than a field
    pub const IS_ARRAY: DecoratorSet = DecoratorSet(1 << 2);

    pub const ON_STRONG_OOP_REF: DecoratorSet = DecoratorSet(1 << 3);
    pub const ON_WEAK_OOP_REF: DecoratorSet = DecoratorSet(1 << 4);
    pub const ON_PHANTOM_OOP_REF: DecoratorSet = DecoratorSet(1 << 5);
    /// Reference strength only known at run time
    pub const ON_UNKNOWN_OOP_REF: DecoratorSet = DecoratorSet(1 << 6);

    /// Access bypasses barriers entirely
    pub const AS_RAW: DecoratorSet = DecoratorSet(1 << 7);
    /// Loaded referent is not kept alive
    pub const AS_NO_KEEPALIVE: DecoratorSet = DecoratorSet(1 << 8);

    /// Sequentially consistent access
    pub const MO_SEQ_CST: DecoratorSet = DecoratorSet(1 << 9);

    /// Field offset is patched in after compilation
    pub const C1_NEEDS_PATCHING: DecoratorSet = DecoratorSet(1 << 10);

    const ALL: u64 = (1 << 11) - 1;

    const STRENGTHS: DecoratorSet = DecoratorSet(
        Self::ON_STRONG_OOP_REF.0
            | Self::ON_WEAK_OOP_REF.0
            | Self::ON_PHANTOM_OOP_REF.0
            | Self::ON_UNKNOWN_OOP_REF.0,
    );

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Unknown bits are dropped
    pub const fn from_bits(bits: u64) -> Self {
        DecoratorSet(bits & Self::ALL)
    }

    pub const fn union(self, other: DecoratorSet) -> Self {
        DecoratorSet(self.0 | other.0)
    }

    pub const fn contains(self, other: DecoratorSet) -> bool {
        self.0 & other.0 == other.0
    }

    const fn intersects(self, other: DecoratorSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Weak or phantom strength; selects the weak load routine
    pub fn is_weak(self) -> bool {
        self.intersects(Self::ON_WEAK_OOP_REF.union(Self::ON_PHANTOM_OOP_REF))
    }

    pub fn is_phantom(self) -> bool {
        self.intersects(Self::ON_PHANTOM_OOP_REF)
    }

    pub fn is_array(self) -> bool {
        self.intersects(Self::IS_ARRAY)
    }

    pub fn is_anonymous(self) -> bool {
        self.intersects(Self::ON_UNKNOWN_OOP_REF)
    }

    pub fn in_heap(self) -> bool {
        self.intersects(Self::IN_HEAP)
    }

    pub fn in_native(self) -> bool {
        self.intersects(Self::IN_NATIVE)
    }

    pub fn is_raw(self) -> bool {
        self.intersects(Self::AS_RAW)
    }

    pub fn is_no_keepalive(self) -> bool {
        self.intersects(Self::AS_NO_KEEPALIVE)
    }

    pub fn is_atomic(self) -> bool {
        self.intersects(Self::MO_SEQ_CST)
    }

    pub fn needs_patching(self) -> bool {
        self.intersects(Self::C1_NEEDS_PATCHING)
    }

    /// Reject sets no access could legitimately carry
    pub fn validate(self) -> Result<()> {
        if self.in_heap() && self.in_native() {
            return Err(self.unsupported("slot cannot be both in-heap and native"));
        }
        if (self.0 & Self::STRENGTHS.0).count_ones() > 1 {
            return Err(self.unsupported("more than one reference strength"));
        }
        if self.is_raw() && (self.0 & Self::STRENGTHS.0) != 0 {
            return Err(self.unsupported("raw access cannot carry a reference strength"));
        }
        Ok(())
    }

    /// `validate`, plus the check against the kind of value accessed
    ///
    /// Only references have a strength; a strength on a primitive access
    /// would otherwise compile silently to a plain access.
    pub fn validate_for(self, ty: BasicType) -> Result<()> {
        self.validate()?;
        if !ty.is_reference() && self.intersects(Self::STRENGTHS) {
            return Err(self.unsupported(&format!(
                "{:?} access cannot carry a reference strength",
                ty
            )));
        }
        Ok(())
    }

    pub(crate) fn unsupported(self, reason: &str) -> BarrierError {
        BarrierError::UnsupportedDecorators {
            decorators: self,
            reason: reason.to_string(),
        }
    }
}

impl std::ops::BitOr for DecoratorSet {
    type Output = DecoratorSet;

    fn bitor(self, rhs: DecoratorSet) -> DecoratorSet {
        self.union(rhs)
    }
}

impl fmt::Debug for DecoratorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(DecoratorSet, &str); 11] = [
            (DecoratorSet::IN_HEAP, "IN_HEAP"),
            (DecoratorSet::IN_NATIVE, "IN_NATIVE"),
            (DecoratorSet::IS_ARRAY, "IS_ARRAY"),
            (DecoratorSet::ON_STRONG_OOP_REF, "ON_STRONG_OOP_REF"),
            (DecoratorSet::ON_WEAK_OOP_REF, "ON_WEAK_OOP_REF"),
            (DecoratorSet::ON_PHANTOM_OOP_REF, "ON_PHANTOM_OOP_REF"),
            (DecoratorSet::ON_UNKNOWN_OOP_REF, "ON_UNKNOWN_OOP_REF"),
            (DecoratorSet::AS_RAW, "AS_RAW"),
            (DecoratorSet::AS_NO_KEEPALIVE, "AS_NO_KEEPALIVE"),
            (DecoratorSet::MO_SEQ_CST, "MO_SEQ_CST"),
            (DecoratorSet::C1_NEEDS_PATCHING, "C1_NEEDS_PATCHING"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "DecoratorSet(NONE)")
        } else {
            write!(f, "DecoratorSet({})", names.join(" | "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let set = DecoratorSet::IN_HEAP | DecoratorSet::IS_ARRAY | DecoratorSet::ON_WEAK_OOP_REF;
        assert!(set.in_heap());
        assert!(set.is_array());
        assert!(set.is_weak());
        assert!(!set.is_anonymous());
        assert!(!set.is_atomic());
        assert!(DecoratorSet::ON_PHANTOM_OOP_REF.is_weak());
        assert!(!DecoratorSet::ON_UNKNOWN_OOP_REF.is_weak());
    }

    #[test]
    fn test_from_bits_drops_unknown_bits() {
        let set = DecoratorSet::from_bits(u64::MAX);
        assert_eq!(set.bits(), (1 << 11) - 1);
        assert_eq!(DecoratorSet::from_bits(set.bits()), set);
    }

    #[test]
    fn test_validate_rejects_inconsistent_sets() {
        assert!((DecoratorSet::IN_HEAP | DecoratorSet::IN_NATIVE)
            .validate()
            .is_err());
        assert!((DecoratorSet::ON_STRONG_OOP_REF | DecoratorSet::ON_WEAK_OOP_REF)
            .validate()
            .is_err());
        assert!((DecoratorSet::AS_RAW | DecoratorSet::ON_WEAK_OOP_REF)
            .validate()
            .is_err());
        assert!((DecoratorSet::IN_HEAP | DecoratorSet::ON_WEAK_OOP_REF | DecoratorSet::MO_SEQ_CST)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_for_rejects_strength_on_primitives() {
        let weak = DecoratorSet::IN_HEAP | DecoratorSet::ON_WEAK_OOP_REF;
        assert!(weak.validate_for(BasicType::Object).is_ok());
        assert!(weak.validate_for(BasicType::Array).is_ok());
        for ty in [BasicType::Int, BasicType::Long, BasicType::Address] {
            assert!(matches!(
                weak.validate_for(ty),
                Err(BarrierError::UnsupportedDecorators { .. })
            ));
        }
        assert!(DecoratorSet::IN_HEAP.validate_for(BasicType::Int).is_ok());
        assert!((DecoratorSet::IN_HEAP | DecoratorSet::IN_NATIVE)
            .validate_for(BasicType::Object)
            .is_err());
    }

    #[test]
    fn test_debug_lists_flags() {
        let set = DecoratorSet::IN_HEAP | DecoratorSet::MO_SEQ_CST;
        assert_eq!(format!("{:?}", set), "DecoratorSet(IN_HEAP | MO_SEQ_CST)");
        assert_eq!(format!("{:?}", DecoratorSet::NONE), "DecoratorSet(NONE)");
    }
}
