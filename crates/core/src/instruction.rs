//! Instruction word field projections.
//!
//! Layout from the high bit down: F (6), J (4), A (4), X (4), H (1), I (1),
//! U (16). In extended mode the low 17 bits are instead IB (5, the B field
//! with its extension bit) and D (12).

use crate::word::Word36;

/// One instruction word with typed accessors for its subfields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstructionWord(Word36);

impl InstructionWord {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(Word36::new(value))
    }

    #[must_use]
    pub const fn from_word(word: Word36) -> Self {
        Self(word)
    }

    #[must_use]
    pub const fn word(self) -> Word36 {
        self.0
    }

    #[must_use]
    pub const fn w(self) -> u64 {
        self.0.w()
    }

    /// Function code.
    #[must_use]
    pub const fn f(self) -> u64 {
        self.0.w() >> 30
    }

    /// Partial-word designator or function discriminator.
    #[must_use]
    pub const fn j(self) -> u64 {
        (self.0.w() >> 26) & 0o17
    }

    /// Register selector or function discriminator.
    #[must_use]
    pub const fn a(self) -> u64 {
        (self.0.w() >> 22) & 0o17
    }

    /// Index register selector.
    #[must_use]
    pub const fn x(self) -> u64 {
        (self.0.w() >> 18) & 0o17
    }

    /// Index-increment flag.
    #[must_use]
    pub const fn h(self) -> u64 {
        (self.0.w() >> 17) & 0o1
    }

    /// Indirect-addressing flag.
    #[must_use]
    pub const fn i(self) -> u64 {
        (self.0.w() >> 16) & 0o1
    }

    /// The H, I, and U fields taken together as an 18-bit operand.
    #[must_use]
    pub const fn hiu(self) -> u64 {
        self.0.w() & 0o777777
    }

    /// 16-bit basic-mode operand.
    #[must_use]
    pub const fn u(self) -> u64 {
        self.0.w() & 0o177777
    }

    /// Extended-mode base register selector.
    #[must_use]
    pub const fn b(self) -> u64 {
        (self.0.w() >> 12) & 0o17
    }

    /// Extended-mode base register selector including the exec extension
    /// bit.
    #[must_use]
    pub const fn ib(self) -> u64 {
        (self.0.w() >> 12) & 0o37
    }

    /// 12-bit extended-mode displacement.
    #[must_use]
    pub const fn d(self) -> u64 {
        self.0.w() & 0o7777
    }

    pub fn set_w(&mut self, value: u64) {
        self.0 = Word36::new(value);
    }

    /// Replaces the X, H, I, and U fields, preserving F, J, and A.
    pub fn set_xhiu(&mut self, value: u64) {
        self.0 = Word36::new((self.0.w() & 0o777760_000000) | (value & 0o17_777777));
    }
}

impl From<Word36> for InstructionWord {
    fn from(word: Word36) -> Self {
        Self(word)
    }
}

/// Builds an instruction word from its basic-mode fields.
#[must_use]
pub const fn compose_basic(f: u64, j: u64, a: u64, x: u64, h: u64, i: u64, u: u64) -> InstructionWord {
    InstructionWord::new(
        ((f & 0o77) << 30)
            | ((j & 0o17) << 26)
            | ((a & 0o17) << 22)
            | ((x & 0o17) << 18)
            | ((h & 1) << 17)
            | ((i & 1) << 16)
            | (u & 0o177777),
    )
}

/// Builds an instruction word from its extended-mode fields.
#[must_use]
pub const fn compose_extended(f: u64, j: u64, a: u64, x: u64, h: u64, ib: u64, d: u64) -> InstructionWord {
    InstructionWord::new(
        ((f & 0o77) << 30)
            | ((j & 0o17) << 26)
            | ((a & 0o17) << 22)
            | ((x & 0o17) << 18)
            | ((h & 1) << 17)
            | ((ib & 0o37) << 12)
            | (d & 0o7777),
    )
}
