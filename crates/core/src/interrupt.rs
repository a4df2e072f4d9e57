//! Machine interrupts.
//!
//! Each interrupt carries a class, a short status field (SSF), and up to two
//! interrupt status words (ISW0 and ISW1). Lower class values take priority;
//! an engine holds at most one pending interrupt and replaces it only when a
//! newly raised interrupt has a numerically lower class.

use std::fmt;

use crate::address::AbsoluteAddress;
use crate::word::Word36;

/// Architectural interrupt classes, in priority order (lower is higher
/// priority).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u64)]
pub enum InterruptClass {
    HardwareDefault = 0,
    HardwareCheck = 1,
    ReferenceViolation = 8,
    AddressingException = 9,
    TerminalAddressingException = 10,
    RcsGenericStackUnderOverflow = 11,
    Signal = 12,
    TestAndSet = 13,
    InvalidInstruction = 14,
    ArithmeticException = 15,
    DataException = 17,
    OperationTrap = 18,
    Breakpoint = 19,
    QuantumTimer = 20,
    SoftwareBreak = 24,
    JumpHistoryFull = 25,
    DayClock = 27,
    InitialProgramLoad = 29,
    UpiInitial = 30,
    UpiNormal = 31,
}

impl InterruptClass {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::HardwareDefault => "Hardware Default",
            Self::HardwareCheck => "Hardware Check",
            Self::ReferenceViolation => "Reference Violation",
            Self::AddressingException => "Addressing Exception",
            Self::TerminalAddressingException => "Terminal Addressing Exception",
            Self::RcsGenericStackUnderOverflow => "RCS Generic Stack Under/Overflow",
            Self::Signal => "Signal",
            Self::TestAndSet => "Test And Set",
            Self::InvalidInstruction => "Invalid Instruction",
            Self::ArithmeticException => "Arithmetic Exception",
            Self::DataException => "Data Exception",
            Self::OperationTrap => "Operation Trap",
            Self::Breakpoint => "Breakpoint",
            Self::QuantumTimer => "Quantum Timer",
            Self::SoftwareBreak => "Software Break",
            Self::JumpHistoryFull => "Jump History Full",
            Self::DayClock => "DayClock",
            Self::InitialProgramLoad => "IPL",
            Self::UpiInitial => "UPI Initial",
            Self::UpiNormal => "UPI Normal",
        }
    }
}

/// Entry types for reference violation SSF bits 0-1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReferenceViolationEntry {
    GeneralRegisterSet = 0,
    StorageLimits = 1,
    ReadAccess = 2,
    WriteAccess = 3,
}

/// SSF values for addressing exceptions.
pub mod addressing_exception {
    pub const FATAL: u64 = 0o00;
    pub const GATE_G_BIT_SET: u64 = 0o01;
    pub const ENTER_ACCESS_DENIED: u64 = 0o02;
    pub const INVALID_SOURCE_LBDI: u64 = 0o03;
    pub const GATE_BANK_BOUNDARY_VIOLATION: u64 = 0o04;
    pub const INVALID_IS_VALUE: u64 = 0o05;
    pub const GOTO_INHIBIT: u64 = 0o06;
    pub const GENERAL_QUEUING_VIOLATION: u64 = 0o07;
    pub const INDIRECT_G_BIT_SET: u64 = 0o11;
    pub const BD_TYPE_INVALID: u64 = 0o16;
}

/// SSF values for RCS / generic stack faults.
pub mod rcs_stack {
    pub const OVERFLOW: u64 = 0o0;
    pub const UNDERFLOW: u64 = 0o1;
}

/// SSF values for signal interrupts.
pub mod signal {
    pub const EXECUTIVE_REQUEST: u64 = 0o0;
    pub const SIGNAL_INSTRUCTION: u64 = 0o1;
}

/// SSF values for invalid instruction interrupts.
pub mod invalid_instruction {
    pub const BAD_FUNCTION_CODE: u64 = 0o0;
    pub const INSUFFICIENT_PRIVILEGE: u64 = 0o1;
    pub const INVALID_EXECUTE_TARGET: u64 = 0o3;
    pub const COMPATIBILITY_TRAP: u64 = 0o4;
}

/// SSF values for arithmetic exceptions.
pub mod arithmetic_exception {
    pub const CHARACTERISTIC_OVERFLOW: u64 = 0o0;
    pub const CHARACTERISTIC_UNDERFLOW: u64 = 0o1;
    pub const DIVIDE_CHECK: u64 = 0o2;
}

/// SSF values for operation traps.
pub mod operation_trap {
    pub const FIXED_POINT_BINARY_OVERFLOW: u64 = 0o0;
    pub const FIXED_POINT_DECIMAL_OVERFLOW: u64 = 0o1;
    pub const MULTIPLY_SINGLE_INTEGER_OVERFLOW: u64 = 0o2;
}

/// Point within the instruction cycle at which an interrupt may be taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterruptPoint {
    BetweenInstructions,
    MidExecution,
    IndirectExecute,
}

/// Synchrony of an interrupt relative to the instruction stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterruptSync {
    Synchronous,
    Asynchronous,
    Broadcast,
    Pended,
}

/// A raised machine interrupt, carrying everything the interrupt handler
/// entry sequence needs to store into the interrupt control stack frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Interrupt {
    HardwareCheck {
        address: AbsoluteAddress,
    },
    ReferenceViolation {
        entry: ReferenceViolationEntry,
        fetch_operation: bool,
    },
    AddressingException {
        short_status: u64,
        bank_level: u64,
        bank_descriptor_index: u64,
    },
    RcsGenericStackUnderOverflow {
        short_status: u64,
        base_register: u64,
        relative_address: u64,
    },
    Signal {
        short_status: u64,
        code: u64,
    },
    TestAndSet {
        base_register: u64,
        relative_address: u64,
    },
    InvalidInstruction {
        short_status: u64,
    },
    ArithmeticException {
        short_status: u64,
    },
    OperationTrap {
        short_status: u64,
    },
    Breakpoint,
    SoftwareBreak,
    QuantumTimer,
    JumpHistoryFull,
}

impl Interrupt {
    #[must_use]
    pub const fn class(&self) -> InterruptClass {
        match self {
            Self::HardwareCheck { .. } => InterruptClass::HardwareCheck,
            Self::ReferenceViolation { .. } => InterruptClass::ReferenceViolation,
            Self::AddressingException { .. } => InterruptClass::AddressingException,
            Self::RcsGenericStackUnderOverflow { .. } => {
                InterruptClass::RcsGenericStackUnderOverflow
            }
            Self::Signal { .. } => InterruptClass::Signal,
            Self::TestAndSet { .. } => InterruptClass::TestAndSet,
            Self::InvalidInstruction { .. } => InterruptClass::InvalidInstruction,
            Self::ArithmeticException { .. } => InterruptClass::ArithmeticException,
            Self::OperationTrap { .. } => InterruptClass::OperationTrap,
            Self::Breakpoint => InterruptClass::Breakpoint,
            Self::SoftwareBreak => InterruptClass::SoftwareBreak,
            Self::QuantumTimer => InterruptClass::QuantumTimer,
            Self::JumpHistoryFull => InterruptClass::JumpHistoryFull,
        }
    }

    /// Short status field stored into the indicator/key register on entry.
    #[must_use]
    pub const fn short_status_field(&self) -> u64 {
        match self {
            Self::ReferenceViolation {
                entry,
                fetch_operation,
            } => {
                let mut ssf = ((*entry as u64) & 0o3) << 4;
                if *fetch_operation {
                    ssf |= 0o1;
                }
                ssf
            }
            Self::AddressingException { short_status, .. }
            | Self::RcsGenericStackUnderOverflow { short_status, .. }
            | Self::Signal { short_status, .. }
            | Self::InvalidInstruction { short_status }
            | Self::ArithmeticException { short_status }
            | Self::OperationTrap { short_status } => *short_status,
            _ => 0,
        }
    }

    /// Interrupt status word 0.
    #[must_use]
    pub const fn status_word_0(&self) -> Word36 {
        match self {
            Self::HardwareCheck { address } => {
                // Segment word with the reserved upper bits cleared.
                Word36::new(address.composite()[0] & 0o001777_777777)
            }
            Self::RcsGenericStackUnderOverflow {
                base_register,
                relative_address,
                ..
            } => Word36::new((*base_register << 30) | *relative_address),
            Self::Signal { code, .. } => Word36::new(*code),
            Self::TestAndSet {
                base_register,
                relative_address,
            } => Word36::new(((*base_register & 0o77) << 30) | (*relative_address & 0o77_777777)),
            _ => Word36::new(0),
        }
    }

    /// Interrupt status word 1.
    #[must_use]
    pub const fn status_word_1(&self) -> Word36 {
        match self {
            Self::HardwareCheck { address } => Word36::new(address.composite()[1]),
            Self::AddressingException {
                bank_level,
                bank_descriptor_index,
                ..
            } => Word36::new(((*bank_level & 0o7) << 33) | ((*bank_descriptor_index & 0o77777) << 18)),
            _ => Word36::new(0),
        }
    }

    #[must_use]
    pub const fn interrupt_point(&self) -> InterruptPoint {
        match self {
            Self::HardwareCheck { .. } | Self::ReferenceViolation { .. } => {
                InterruptPoint::MidExecution
            }
            Self::Signal { .. }
            | Self::Breakpoint
            | Self::SoftwareBreak
            | Self::QuantumTimer
            | Self::JumpHistoryFull => InterruptPoint::BetweenInstructions,
            _ => InterruptPoint::IndirectExecute,
        }
    }

    #[must_use]
    pub const fn synchrony(&self) -> InterruptSync {
        match self {
            Self::Breakpoint => InterruptSync::Pended,
            Self::QuantumTimer | Self::JumpHistoryFull => InterruptSync::Asynchronous,
            _ => InterruptSync::Synchronous,
        }
    }

    /// Whether handling may be deferred while the designator register's
    /// deferrable-interrupt-enable bit is clear.
    #[must_use]
    pub const fn is_deferrable(&self) -> bool {
        matches!(
            self,
            Self::RcsGenericStackUnderOverflow { .. }
                | Self::Signal { .. }
                | Self::ArithmeticException { .. }
                | Self::OperationTrap { .. }
                | Self::Breakpoint
                | Self::SoftwareBreak
                | Self::QuantumTimer
                | Self::JumpHistoryFull
        )
    }

    /// Whether the interrupt indicates a fault in the executing activity.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::HardwareCheck { .. }
                | Self::ReferenceViolation { .. }
                | Self::AddressingException { .. }
                | Self::RcsGenericStackUnderOverflow { .. }
                | Self::TestAndSet { .. }
                | Self::InvalidInstruction { .. }
                | Self::ArithmeticException { .. }
        )
    }

    /// A newly raised interrupt displaces a pending one only when its
    /// class is numerically lower.
    #[must_use]
    pub fn takes_priority_over(&self, pending: &Self) -> bool {
        self.class() < pending.class()
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({:03o}) SSF:{:03o} ISW0={:012o} ISW1={:012o}",
            self.class().name(),
            self.class() as u64,
            self.short_status_field(),
            self.status_word_0().w(),
            self.status_word_1().w(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_violation_ssf_packing() {
        let intr = Interrupt::ReferenceViolation {
            entry: ReferenceViolationEntry::WriteAccess,
            fetch_operation: true,
        };
        assert_eq!(intr.short_status_field(), (3 << 4) | 1);
        assert!(!intr.is_deferrable());
        assert!(intr.is_fault());
    }

    #[test]
    fn addressing_exception_status_word() {
        let intr = Interrupt::AddressingException {
            short_status: addressing_exception::FATAL,
            bank_level: 0o5,
            bank_descriptor_index: 0o12345,
        };
        assert_eq!(
            intr.status_word_1().w(),
            (0o5 << 33) | (0o12345 << 18),
        );
        assert_eq!(intr.status_word_0().w(), 0);
    }

    #[test]
    fn rcs_stack_status_word() {
        let intr = Interrupt::RcsGenericStackUnderOverflow {
            short_status: rcs_stack::OVERFLOW,
            base_register: 25,
            relative_address: 0o1234,
        };
        assert_eq!(intr.status_word_0().w(), (25 << 30) | 0o1234);
        assert!(intr.is_deferrable());
    }

    #[test]
    fn priority_prefers_lower_class() {
        let hardware = Interrupt::HardwareCheck {
            address: AbsoluteAddress::default(),
        };
        let arithmetic = Interrupt::ArithmeticException {
            short_status: arithmetic_exception::DIVIDE_CHECK,
        };
        assert!(hardware.takes_priority_over(&arithmetic));
        assert!(!arithmetic.takes_priority_over(&hardware));
    }

    #[test]
    fn display_includes_class_and_status() {
        let intr = Interrupt::InvalidInstruction {
            short_status: invalid_instruction::BAD_FUNCTION_CODE,
        };
        let text = intr.to_string();
        assert!(text.starts_with("Invalid Instruction(016)"));
    }
}
