//! Absolute and virtual address representations.
//!
//! An absolute address names a word of main storage directly: a 21-bit
//! segment identifier selects an allocated bank of storage, and a 33-bit
//! offset selects a word within it. Virtual addresses are the program-facing
//! form, carrying a bank level, a bank descriptor index, and an offset; the
//! basic-mode and extended-mode flavors pack these differently.

use std::fmt;

/// Hardware-facing location of one word of main storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AbsoluteAddress {
    segment: u32,
    offset: u64,
}

impl AbsoluteAddress {
    /// Significant bits of the segment identifier.
    pub const SEGMENT_MASK: u32 = 0o7_777777;
    /// Significant bits of the offset.
    pub const OFFSET_MASK: u64 = 0o77777_777777;

    #[must_use]
    pub const fn new(segment: u32, offset: u64) -> Self {
        Self {
            segment: segment & Self::SEGMENT_MASK,
            offset: offset & Self::OFFSET_MASK,
        }
    }

    #[must_use]
    pub const fn segment(&self) -> u32 {
        self.segment
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Two-word composite form: segment identifier then offset.
    #[must_use]
    pub const fn composite(&self) -> [u64; 2] {
        [self.segment as u64, self.offset]
    }

    #[must_use]
    pub const fn from_composite(composite: [u64; 2]) -> Self {
        Self::new(composite[0] as u32, composite[1])
    }

    #[must_use]
    pub const fn with_offset(&self, offset: u64) -> Self {
        Self::new(self.segment, offset)
    }
}

impl fmt::Display for AbsoluteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012o}:{:012o}", self.segment, self.offset)
    }
}

/// Basic-mode virtual address: exec and level flags, a 12-bit bank
/// descriptor index, and an 18-bit offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BasicModeVirtualAddress {
    exec_flag: bool,
    level_flag: bool,
    bank_descriptor_index: u64,
    offset: u64,
}

impl BasicModeVirtualAddress {
    const EXEC_FLAG_BIT: u64 = 0o400000_000000;
    const LEVEL_FLAG_BIT: u64 = 0o040000_000000;

    #[must_use]
    pub const fn new(exec_flag: bool, level_flag: bool, bank_descriptor_index: u64, offset: u64) -> Self {
        Self {
            exec_flag,
            level_flag,
            bank_descriptor_index: bank_descriptor_index & 0o7777,
            offset: offset & 0o777777,
        }
    }

    #[must_use]
    pub const fn exec_flag(&self) -> bool {
        self.exec_flag
    }

    #[must_use]
    pub const fn level_flag(&self) -> bool {
        self.level_flag
    }

    #[must_use]
    pub const fn bank_descriptor_index(&self) -> u64 {
        self.bank_descriptor_index
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Single-word composite form.
    #[must_use]
    pub const fn composite(&self) -> u64 {
        let mut value = (self.bank_descriptor_index << 18) | self.offset;
        if self.exec_flag {
            value |= Self::EXEC_FLAG_BIT;
        }
        if self.level_flag {
            value |= Self::LEVEL_FLAG_BIT;
        }
        value
    }

    /// Translates extended-mode level, bank descriptor index, and offset
    /// into basic-mode flag semantics. Indices beyond the basic-mode
    /// range collapse to the exec level-zero form.
    #[must_use]
    pub const fn from_extended(level: u64, bank_descriptor_index: u64, offset: u64) -> Self {
        if bank_descriptor_index <= 0o7777 {
            Self {
                exec_flag: level & 0o4 == 0,
                level_flag: (level & 0o6 == 0) || (level == 6),
                bank_descriptor_index: bank_descriptor_index & 0o7777,
                offset: offset & 0o777777,
            }
        } else {
            Self {
                exec_flag: true,
                level_flag: true,
                bank_descriptor_index: 0,
                offset: offset & 0o777777,
            }
        }
    }
}

/// Extended-mode virtual address: 3-bit level, 15-bit bank descriptor
/// index, and 18-bit offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtendedModeVirtualAddress {
    level: u64,
    bank_descriptor_index: u64,
    offset: u64,
}

impl ExtendedModeVirtualAddress {
    #[must_use]
    pub const fn new(level: u64, bank_descriptor_index: u64, offset: u64) -> Self {
        Self {
            level: level & 0o7,
            bank_descriptor_index: bank_descriptor_index & 0o77777,
            offset: offset & 0o777777,
        }
    }

    #[must_use]
    pub const fn level(&self) -> u64 {
        self.level
    }

    #[must_use]
    pub const fn bank_descriptor_index(&self) -> u64 {
        self.bank_descriptor_index
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Single-word composite form.
    #[must_use]
    pub const fn composite(&self) -> u64 {
        (self.level << 33) | (self.bank_descriptor_index << 18) | self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_address_masks_fields() {
        let addr = AbsoluteAddress::new(0xFFFF_FFFF, u64::MAX);
        assert_eq!(addr.segment(), 0o7_777777);
        assert_eq!(addr.offset(), 0o77777_777777);
    }

    #[test]
    fn absolute_address_offset_is_33_bits() {
        let addr = AbsoluteAddress::new(0, 1 << 33);
        assert_eq!(addr.offset(), 0);
        assert_eq!(AbsoluteAddress::OFFSET_MASK >> 33, 0);
    }

    #[test]
    fn absolute_address_composite_round_trip() {
        let addr = AbsoluteAddress::new(0o1234, 0o456_7012);
        assert_eq!(AbsoluteAddress::from_composite(addr.composite()), addr);
    }

    #[test]
    fn basic_mode_composite_packing() {
        let va = BasicModeVirtualAddress::new(true, false, 0o1234, 0o45670);
        assert_eq!(va.composite(), 0o400000_000000 | (0o1234 << 18) | 0o45670);

        let va = BasicModeVirtualAddress::new(false, true, 0, 0);
        assert_eq!(va.composite(), 0o040000_000000);
    }

    #[test]
    fn extended_mode_composite_packing() {
        let va = ExtendedModeVirtualAddress::new(0o5, 0o12345, 0o654321);
        assert_eq!(va.composite(), (0o5 << 33) | (0o12345 << 18) | 0o654321);
    }

    #[test]
    fn translate_to_basic_mode_flags() {
        // Level 0 is an exec level.
        let va = BasicModeVirtualAddress::from_extended(0, 0o100, 0o1000);
        assert!(va.exec_flag());
        assert!(va.level_flag());

        // Level 6 sets the level flag but not the exec flag.
        let va = BasicModeVirtualAddress::from_extended(6, 0o100, 0o1000);
        assert!(!va.exec_flag());
        assert!(va.level_flag());

        // Level 5 sets neither.
        let va = BasicModeVirtualAddress::from_extended(5, 0o100, 0o1000);
        assert!(!va.exec_flag());
        assert!(!va.level_flag());

        // Out-of-range index collapses to the exec form.
        let va = BasicModeVirtualAddress::from_extended(3, 0o10000, 0o1000);
        assert!(va.exec_flag());
        assert!(va.level_flag());
        assert_eq!(va.bank_descriptor_index(), 0);
    }
}
