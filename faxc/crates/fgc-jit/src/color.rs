//! Colored Pointers and the Color Epoch
//!
//! A reference value carries its color in bits 44-46 next to a 44-bit
//! address:
//!
//! ```text
//! 63        48 47  46  45  44 43                       0
//! +----------+---+---+---+---+--------------------------+
//! |  unused  | F | R | M1| M0|         address          |
//! +----------+---+---+---+---+--------------------------+
//! ```
//!
//! Exactly one of M0, M1 and R is the current good color. It lives in a
//! single word (the epoch word) that compiled fast paths load on every
//! color check, so flipping the epoch instantly makes every reference in
//! the heap stale. A word with no color bits at all, including a slot that
//! was never written, is stale too.

use faxc_lir::{Memory, Result};

pub const MARKED0_MASK: usize = 1 << 44;
pub const MARKED1_MASK: usize = 1 << 45;
pub const REMAPPED_MASK: usize = 1 << 46;
pub const FINALIZABLE_MASK: usize = 1 << 47;
pub const COLOR_MASK: usize = MARKED0_MASK | MARKED1_MASK | REMAPPED_MASK;
pub const ADDRESS_MASK: usize = (1 << 44) - 1;

/// Default location of the epoch word
pub const EPOCH_ADDRESS: usize = 0x0010_0000;

/// One of the three epoch colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Marked0,
    Marked1,
    Remapped,
}

impl Color {
    pub fn mask(self) -> usize {
        match self {
            Color::Marked0 => MARKED0_MASK,
            Color::Marked1 => MARKED1_MASK,
            Color::Remapped => REMAPPED_MASK,
        }
    }

    pub fn from_mask(mask: usize) -> Option<Color> {
        match mask {
            MARKED0_MASK => Some(Color::Marked0),
            MARKED1_MASK => Some(Color::Marked1),
            REMAPPED_MASK => Some(Color::Remapped),
            _ => None,
        }
    }

    /// Marked0 -> Marked1 -> Remapped -> Marked0
    pub fn rotate(self) -> Color {
        match self {
            Color::Marked0 => Color::Marked1,
            Color::Marked1 => Color::Remapped,
            Color::Remapped => Color::Marked0,
        }
    }

    pub fn is_mark(self) -> bool {
        !matches!(self, Color::Remapped)
    }
}

/// ColoredPointer - wrapper for a reference value with color bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColoredPointer {
    raw: usize,
}

impl ColoredPointer {
    /// `address` colored with `good`
    pub fn colored(address: usize, good: usize) -> Self {
        Self {
            raw: (address & ADDRESS_MASK) | (good & COLOR_MASK),
        }
    }

    pub fn from_raw(raw: usize) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> usize {
        self.raw
    }

    pub fn address(&self) -> usize {
        self.raw & ADDRESS_MASK
    }

    pub fn color_bits(&self) -> usize {
        self.raw & COLOR_MASK
    }

    pub fn is_null(&self) -> bool {
        self.address() == 0
    }

    /// Same check the compiled fast path performs
    pub fn is_good(&self, good: usize) -> bool {
        self.color_bits() == good
    }

    pub fn recolor(&self, good: usize) -> Self {
        Self::colored(self.address(), good)
    }
}

/// Handle to the epoch word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorEpoch {
    address: usize,
}

impl ColorEpoch {
    pub fn new(address: usize) -> Self {
        Self { address }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    /// Current good color mask
    pub fn good_mask(&self, memory: &dyn Memory) -> Result<usize> {
        Ok(memory.load(self.address)? & COLOR_MASK)
    }

    pub fn good(&self, memory: &dyn Memory) -> Result<Option<Color>> {
        Ok(Color::from_mask(self.good_mask(memory)?))
    }

    pub fn publish(&self, memory: &dyn Memory, color: Color) -> Result<()> {
        memory.store(self.address, color.mask())
    }

    /// Move to the next color, returning it
    pub fn advance(&self, memory: &dyn Memory) -> Result<Color> {
        let next = self
            .good(memory)?
            .map(Color::rotate)
            .unwrap_or(Color::Remapped);
        self.publish(memory, next)?;
        Ok(next)
    }
}
