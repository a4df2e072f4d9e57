//! The designator register: the processor's mode and status bits.

/// Mode and status bits of a running activity, packed into one word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DesignatorRegister {
    pub activity_level_queue_monitor_enabled: bool,
    pub fault_handling_in_progress: bool,
    pub executive_24bit_indexing_enabled: bool,
    pub quantum_timer_enabled: bool,
    pub deferrable_interrupt_enabled: bool,
    pub processor_privilege: u64,
    pub basic_mode_enabled: bool,
    pub exec_register_set_selected: bool,
    pub carry: bool,
    pub overflow: bool,
    pub characteristic_underflow: bool,
    pub characteristic_overflow: bool,
    pub divide_check: bool,
    pub operation_trap_enabled: bool,
    pub arithmetic_exception_enabled: bool,
    pub basic_mode_base_register_selection: bool,
    pub quarter_word_mode_enabled: bool,
}

impl DesignatorRegister {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub const fn composite(&self) -> u64 {
        let mut value = 0u64;
        if self.activity_level_queue_monitor_enabled {
            value |= 1 << 0;
        }
        if self.fault_handling_in_progress {
            value |= 1 << 6;
        }
        if self.executive_24bit_indexing_enabled {
            value |= 1 << 11;
        }
        if self.quantum_timer_enabled {
            value |= 1 << 12;
        }
        if self.deferrable_interrupt_enabled {
            value |= 1 << 13;
        }
        value |= (self.processor_privilege & 0o3) << 14;
        if self.basic_mode_enabled {
            value |= 1 << 16;
        }
        if self.exec_register_set_selected {
            value |= 1 << 17;
        }
        if self.carry {
            value |= 1 << 18;
        }
        if self.overflow {
            value |= 1 << 19;
        }
        if self.characteristic_underflow {
            value |= 1 << 21;
        }
        if self.characteristic_overflow {
            value |= 1 << 22;
        }
        if self.divide_check {
            value |= 1 << 23;
        }
        if self.operation_trap_enabled {
            value |= 1 << 27;
        }
        if self.arithmetic_exception_enabled {
            value |= 1 << 29;
        }
        if self.basic_mode_base_register_selection {
            value |= 1 << 31;
        }
        if self.quarter_word_mode_enabled {
            value |= 1 << 32;
        }
        value
    }

    #[must_use]
    pub const fn from_composite(value: u64) -> Self {
        Self {
            activity_level_queue_monitor_enabled: value & 1 != 0,
            fault_handling_in_progress: (value >> 6) & 1 != 0,
            executive_24bit_indexing_enabled: (value >> 11) & 1 != 0,
            quantum_timer_enabled: (value >> 12) & 1 != 0,
            deferrable_interrupt_enabled: (value >> 13) & 1 != 0,
            processor_privilege: (value >> 14) & 0o3,
            basic_mode_enabled: (value >> 16) & 1 != 0,
            exec_register_set_selected: (value >> 17) & 1 != 0,
            carry: (value >> 18) & 1 != 0,
            overflow: (value >> 19) & 1 != 0,
            characteristic_underflow: (value >> 21) & 1 != 0,
            characteristic_overflow: (value >> 22) & 1 != 0,
            divide_check: (value >> 23) & 1 != 0,
            operation_trap_enabled: (value >> 27) & 1 != 0,
            arithmetic_exception_enabled: (value >> 29) & 1 != 0,
            basic_mode_base_register_selection: (value >> 31) & 1 != 0,
            quarter_word_mode_enabled: (value >> 32) & 1 != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn composite_bit_positions() {
        let mut dr = DesignatorRegister::default();
        dr.basic_mode_enabled = true;
        dr.processor_privilege = 3;
        dr.quarter_word_mode_enabled = true;
        assert_eq!(dr.composite(), (1 << 16) | (3 << 14) | (1 << 32));
    }

    proptest! {
        #[test]
        fn composite_round_trip(value in 0u64..(1 << 33)) {
            let dr = DesignatorRegister::from_composite(value);
            let again = DesignatorRegister::from_composite(dr.composite());
            prop_assert_eq!(dr, again);
        }
    }
}
