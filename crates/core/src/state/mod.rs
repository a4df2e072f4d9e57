//! Processor state: program address register, indicator/key register,
//! activity state packet, active base table, and jump history.

mod designator;
mod grs;

pub use designator::DesignatorRegister;
pub use grs::{
    GeneralRegisterSet, IndexRegister, A0, EA0, ER0, EX0, GRS_SIZE, R0, X0,
};

use std::collections::VecDeque;

use crate::access::AccessKey;
use crate::word::Word36;

/// The program address register: bank level, bank descriptor index, and
/// 18-bit program counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgramAddressRegister {
    level: u64,
    bank_descriptor_index: u64,
    program_counter: u64,
}

impl ProgramAddressRegister {
    #[must_use]
    pub const fn new(level: u64, bank_descriptor_index: u64, program_counter: u64) -> Self {
        Self {
            level: level & 0o7,
            bank_descriptor_index: bank_descriptor_index & 0o77777,
            program_counter: program_counter & 0o777777,
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
    pub const fn program_counter(&self) -> u64 {
        self.program_counter
    }

    #[must_use]
    pub const fn composite(&self) -> u64 {
        (self.level << 33) | (self.bank_descriptor_index << 18) | self.program_counter
    }

    pub fn set_level(&mut self, value: u64) {
        self.level = value & 0o7;
    }

    pub fn set_bank_descriptor_index(&mut self, value: u64) {
        self.bank_descriptor_index = value & 0o77777;
    }

    pub fn set_program_counter(&mut self, value: u64) {
        self.program_counter = value & 0o777777;
    }

    pub fn set_composite(&mut self, value: u64) {
        self.level = (value >> 33) & 0o7;
        self.bank_descriptor_index = (value >> 18) & 0o77777;
        self.program_counter = value & 0o777777;
    }

    /// Advances the program counter with 18-bit wrap.
    pub fn increment_program_counter(&mut self) {
        self.program_counter = (self.program_counter + 1) & 0o777777;
    }
}

/// The indicator/key register. In an interrupt control stack frame the
/// short status and class fields describe the interrupt that caused entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndicatorKeyRegister {
    pub short_status_field: u64,
    pub instruction_in_f0: bool,
    pub execute_repeated_instruction: bool,
    pub breakpoint_register_match: bool,
    pub software_break: bool,
    pub interrupt_class_field: u64,
    pub access_key: AccessKey,
}

impl IndicatorKeyRegister {
    const INSTRUCTION_IN_F0_BIT: u64 = 0o004000_000000;
    const EXECUTE_REPEATED_BIT: u64 = 0o002000_000000;
    const BREAKPOINT_MATCH_BIT: u64 = 0o000400_000000;
    const SOFTWARE_BREAK_BIT: u64 = 0o000200_000000;

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn composite(&self) -> Word36 {
        let mut word = Word36::new(0);
        word.set_s1(self.short_status_field);
        let mut value = word.w();
        if self.instruction_in_f0 {
            value |= Self::INSTRUCTION_IN_F0_BIT;
        }
        if self.execute_repeated_instruction {
            value |= Self::EXECUTE_REPEATED_BIT;
        }
        if self.breakpoint_register_match {
            value |= Self::BREAKPOINT_MATCH_BIT;
        }
        if self.software_break {
            value |= Self::SOFTWARE_BREAK_BIT;
        }
        let mut word = Word36::new(value);
        word.set_s3(self.interrupt_class_field);
        word.set_h2(self.access_key.composite());
        word
    }

    #[must_use]
    pub fn from_composite(value: u64) -> Self {
        Self {
            short_status_field: (value >> 30) & 0o77,
            instruction_in_f0: value & Self::INSTRUCTION_IN_F0_BIT != 0,
            execute_repeated_instruction: value & Self::EXECUTE_REPEATED_BIT != 0,
            breakpoint_register_match: value & Self::BREAKPOINT_MATCH_BIT != 0,
            software_break: value & Self::SOFTWARE_BREAK_BIT != 0,
            interrupt_class_field: (value >> 18) & 0o77,
            access_key: AccessKey::from_composite(value & 0o777777),
        }
    }
}

/// One active base table entry: the bank currently based on a basic-mode
/// base register, packed as (level:3, BDI:15, subset:18).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActiveBaseTableEntry {
    pub level: u64,
    pub bank_descriptor_index: u64,
    pub subset_offset: u64,
}

impl ActiveBaseTableEntry {
    #[must_use]
    pub const fn new(level: u64, bank_descriptor_index: u64, subset_offset: u64) -> Self {
        Self {
            level: level & 0o7,
            bank_descriptor_index: bank_descriptor_index & 0o77777,
            subset_offset: subset_offset & 0o777777,
        }
    }

    #[must_use]
    pub const fn composite(&self) -> u64 {
        (self.level << 33) | (self.bank_descriptor_index << 18) | self.subset_offset
    }

    #[must_use]
    pub const fn from_composite(value: u64) -> Self {
        Self::new((value >> 33) & 0o7, (value >> 18) & 0o77777, value & 0o777777)
    }
}

/// Number of active base table entries; entry 0 is unused.
pub const ACTIVE_BASE_TABLE_SIZE: usize = 16;

/// The activity state packet: everything pushed into an interrupt control
/// stack frame on interrupt entry.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActivityStatePacket {
    pub program_address_register: ProgramAddressRegister,
    pub designator_register: DesignatorRegister,
    pub indicator_key_register: IndicatorKeyRegister,
    pub quantum_timer: Word36,
    pub current_instruction: Word36,
    pub interrupt_status_words: [Word36; 2],
}

/// Number of meaningful words in an interrupt control stack frame.
pub const ICS_FRAME_WORDS: usize = 7;

impl ActivityStatePacket {
    /// Frame image in stack order: PAR, DR, IKR, quantum timer, F0, ISW0,
    /// ISW1.
    #[must_use]
    pub fn to_frame(&self) -> [Word36; ICS_FRAME_WORDS] {
        [
            Word36::new(self.program_address_register.composite()),
            Word36::new(self.designator_register.composite()),
            self.indicator_key_register.composite(),
            self.quantum_timer,
            self.current_instruction,
            self.interrupt_status_words[0],
            self.interrupt_status_words[1],
        ]
    }
}

/// Capacity of the jump-history ring.
pub const JUMP_HISTORY_SIZE: usize = 128;

/// Fill level at which a deferred jump-history-full interrupt is armed.
pub const JUMP_HISTORY_THRESHOLD: usize = 120;

/// Ring of recent jump-target addresses.
#[derive(Clone, Debug, Default)]
pub struct JumpHistory {
    entries: VecDeque<Word36>,
    overflow: bool,
    interrupt_armed: bool,
}

impl JumpHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a jump target. The oldest entry is dropped once the ring is
    /// full; crossing the threshold arms a deferred interrupt exactly once
    /// per drain.
    pub fn record(&mut self, target: Word36) {
        if self.entries.len() == JUMP_HISTORY_SIZE {
            self.entries.pop_front();
            self.overflow = true;
        }
        self.entries.push_back(target);
        if self.entries.len() >= JUMP_HISTORY_THRESHOLD {
            self.interrupt_armed = true;
        }
    }

    /// Whether a jump-history-full interrupt should be posted; clears the
    /// armed flag.
    pub fn take_interrupt_armed(&mut self) -> bool {
        std::mem::take(&mut self.interrupt_armed)
    }

    /// Drains the recorded entries in order, oldest first.
    pub fn take_entries(&mut self) -> Vec<Word36> {
        self.overflow = false;
        self.entries.drain(..).collect()
    }

    #[must_use]
    pub const fn has_overflowed(&self) -> bool {
        self.overflow
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_counter_wraps_at_18_bits() {
        let mut par = ProgramAddressRegister::new(0, 0, 0o777777);
        par.increment_program_counter();
        assert_eq!(par.program_counter(), 0);
    }

    #[test]
    fn par_composite_round_trip() {
        let par = ProgramAddressRegister::new(0o3, 0o12345, 0o654321);
        let mut other = ProgramAddressRegister::default();
        other.set_composite(par.composite());
        assert_eq!(other, par);
        assert_eq!(par.composite(), (0o3 << 33) | (0o12345 << 18) | 0o654321);
    }

    #[test]
    fn ikr_composite_round_trip() {
        let ikr = IndicatorKeyRegister {
            short_status_field: 0o31,
            instruction_in_f0: true,
            execute_repeated_instruction: false,
            breakpoint_register_match: true,
            software_break: false,
            interrupt_class_field: 0o16,
            access_key: AccessKey::new(2, 0o1234),
        };
        let composite = ikr.composite();
        assert_eq!(composite.s1(), 0o31);
        assert_eq!(composite.s3(), 0o16);
        assert_eq!(IndicatorKeyRegister::from_composite(composite.w()), ikr);
    }

    #[test]
    fn abt_entry_packing() {
        let entry = ActiveBaseTableEntry::new(0o5, 0o12345, 0o432);
        assert_eq!(entry.composite(), (0o5 << 33) | (0o12345 << 18) | 0o432);
        assert_eq!(ActiveBaseTableEntry::from_composite(entry.composite()), entry);
    }

    #[test]
    fn ics_frame_ordering() {
        let asp = ActivityStatePacket {
            program_address_register: ProgramAddressRegister::new(1, 2, 3),
            quantum_timer: Word36::new(0o55),
            current_instruction: Word36::new(0o66),
            interrupt_status_words: [Word36::new(0o77), Word36::new(0o110)],
            ..Default::default()
        };
        let frame = asp.to_frame();
        assert_eq!(frame[0].w(), asp.program_address_register.composite());
        assert_eq!(frame[3].w(), 0o55);
        assert_eq!(frame[4].w(), 0o66);
        assert_eq!(frame[5].w(), 0o77);
    }

    #[test]
    fn jump_history_threshold_arms_interrupt_once() {
        let mut history = JumpHistory::new();
        for pc in 0..JUMP_HISTORY_THRESHOLD as u64 - 1 {
            history.record(Word36::new(pc));
        }
        assert!(!history.take_interrupt_armed());

        history.record(Word36::new(0o777));
        assert!(history.take_interrupt_armed());
        assert!(!history.take_interrupt_armed());
    }

    #[test]
    fn jump_history_overflow_drops_oldest() {
        let mut history = JumpHistory::new();
        for pc in 0..(JUMP_HISTORY_SIZE as u64 + 2) {
            history.record(Word36::new(pc));
        }
        assert!(history.has_overflowed());

        let entries = history.take_entries();
        assert_eq!(entries.len(), JUMP_HISTORY_SIZE);
        assert_eq!(entries[0].w(), 2);
        assert!(history.is_empty());
        assert!(!history.has_overflowed());
    }
}
