//! The general register set and index-register arithmetic.

use crate::word::{self, Word36};

pub const X0: u64 = 0;
pub const A0: u64 = 12;
pub const R0: u64 = 64;
pub const ER0: u64 = 80;
pub const EX0: u64 = 96;
pub const EA0: u64 = 108;

/// Number of words in the register set.
pub const GRS_SIZE: usize = 128;

/// Index-register view of a word: an 18-bit increment XI above an 18-bit
/// modifier XM, with 12/24-bit forms for executive indexing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexRegister(Word36);

impl IndexRegister {
    #[must_use]
    pub const fn new(word: Word36) -> Self {
        Self(word)
    }

    #[must_use]
    pub const fn word(self) -> Word36 {
        self.0
    }

    #[must_use]
    pub const fn xi(self) -> u64 {
        self.0.w() >> 18
    }

    #[must_use]
    pub const fn xi12(self) -> u64 {
        self.0.w() >> 24
    }

    #[must_use]
    pub const fn xm(self) -> u64 {
        self.0.w() & 0o777777
    }

    #[must_use]
    pub const fn xm24(self) -> u64 {
        self.0.w() & 0o77_777777
    }

    #[must_use]
    pub const fn signed_xi(self) -> u64 {
        word::sign_extend_18(self.xi())
    }

    #[must_use]
    pub const fn signed_xi12(self) -> u64 {
        word::sign_extend_12(self.xi12())
    }

    #[must_use]
    pub const fn signed_xm(self) -> u64 {
        word::sign_extend_18(self.xm())
    }

    #[must_use]
    pub const fn signed_xm24(self) -> u64 {
        word::sign_extend_24(self.xm24())
    }

    pub fn set_xi(&mut self, value: u64) {
        self.0 = Word36::new((self.0.w() & 0o777777) | ((value & 0o777777) << 18));
    }

    pub fn set_xm(&mut self, value: u64) {
        self.0 = Word36::new((self.0.w() & 0o777777_000000) | (value & 0o777777));
    }

    pub fn set_xm24(&mut self, value: u64) {
        self.0 = Word36::new((self.0.w() & 0o7777_00000000) | (value & 0o77_777777));
    }

    /// Adds XI into XM with ones-complement semantics.
    pub fn increment_modifier(&mut self) {
        self.set_xm(word::add_simple(self.signed_xm(), self.signed_xi()));
    }

    /// Subtracts XI from XM with ones-complement semantics.
    pub fn decrement_modifier(&mut self) {
        self.set_xm(word::add_simple(
            self.signed_xm(),
            word::negate(self.signed_xi()),
        ));
    }

    /// 24-bit executive-indexing form of [`Self::increment_modifier`].
    pub fn increment_modifier_24(&mut self) {
        self.set_xm24(word::add_simple(self.signed_xm24(), self.signed_xi12()));
    }

    /// 24-bit executive-indexing form of [`Self::decrement_modifier`].
    pub fn decrement_modifier_24(&mut self) {
        self.set_xm24(word::add_simple(
            self.signed_xm24(),
            word::negate(self.signed_xi12()),
        ));
    }
}

impl From<Word36> for IndexRegister {
    fn from(word: Word36) -> Self {
        Self(word)
    }
}

/// 128 words of register file: X, A, and R families plus their executive
/// counterparts.
#[derive(Clone)]
pub struct GeneralRegisterSet {
    registers: [Word36; GRS_SIZE],
}

impl Default for GeneralRegisterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneralRegisterSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registers: [Word36::new(0); GRS_SIZE],
        }
    }

    pub fn clear(&mut self) {
        self.registers = [Word36::new(0); GRS_SIZE];
    }

    #[must_use]
    pub fn get(&self, index: u64) -> Word36 {
        self.registers[index as usize]
    }

    pub fn set(&mut self, index: u64, value: Word36) {
        self.registers[index as usize] = value;
    }

    #[must_use]
    pub fn index_register(&self, index: u64) -> IndexRegister {
        IndexRegister::new(self.get(index))
    }

    pub fn set_index_register(&mut self, index: u64, value: IndexRegister) {
        self.set(index, value.word());
    }

    /// A-register address, remapped to EA when the exec register set is
    /// selected.
    #[must_use]
    pub const fn a_register_index(a_field: u64, exec_selected: bool) -> u64 {
        if exec_selected {
            EA0 + a_field
        } else {
            A0 + a_field
        }
    }

    /// X-register address, remapped to EX when the exec register set is
    /// selected.
    #[must_use]
    pub const fn x_register_index(x_field: u64, exec_selected: bool) -> u64 {
        if exec_selected {
            EX0 + x_field
        } else {
            X0 + x_field
        }
    }

    /// R-register address, remapped to ER when the exec register set is
    /// selected.
    #[must_use]
    pub const fn r_register_index(a_field: u64, exec_selected: bool) -> u64 {
        if exec_selected {
            ER0 + a_field
        } else {
            R0 + a_field
        }
    }

    /// Whether a GRS location may be referenced as a storage address at
    /// the given processor privilege.
    #[must_use]
    pub const fn is_access_allowed(index: u64, processor_privilege: u64, write: bool) -> bool {
        if index < 0o40 {
            true
        } else if index < 0o100 {
            false
        } else if index < 0o120 {
            true
        } else if write {
            processor_privilege == 0
        } else {
            processor_privilege <= 2
        }
    }
}
