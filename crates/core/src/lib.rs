//! Emulation core for a 36-bit ones-complement mainframe.

/// 36-bit word arithmetic, partial-word fields, and shifts.
pub mod word;
pub use word::{
    add_ones, add_simple, compare, count_bits, extract_partial_word, from_native,
    inject_partial_word, is_negative, left_shift_circular, left_shift_logical, magnitude, negate,
    right_shift_algebraic, right_shift_circular, right_shift_logical, sign_extend_12,
    sign_extend_18, sign_extend_24, to_native, Word36, J_U, J_W, J_XU, NEGATIVE_BIT, NEGATIVE_ONE,
    NEGATIVE_ZERO, POSITIVE_ONE, POSITIVE_ZERO, WORD_MASK,
};

/// Fieldata character code and its ASCII mapping.
pub mod fieldata;
pub use fieldata::{
    ascii_from_fieldata, ascii_str_from_word, fieldata_from_ascii, fieldata_str_from_word,
    word_from_ascii_str, word_from_fieldata_str, ASCII_FROM_FIELDATA, FIELDATA_FROM_ASCII,
};

/// Word/byte buffer conversions in packed, 8-bit, and 6-bit formats.
pub mod convert;

/// Absolute and virtual address types.
pub mod address;
pub use address::{AbsoluteAddress, BasicModeVirtualAddress, ExtendedModeVirtualAddress};

/// Machine interrupt classes, payloads, and status words.
pub mod interrupt;
pub use interrupt::{
    Interrupt, InterruptClass, InterruptPoint, InterruptSync, ReferenceViolationEntry,
};

/// Access permissions, keys, and locks.
pub mod access;
pub use access::{AccessKey, AccessLock, AccessPermissions};

/// Main storage segments and the shared per-address lock table.
pub mod storage;
pub use storage::{
    MainStorage, SegmentHandle, StorageError, StorageLockClient, StorageLocks,
};

/// Bank descriptors and base registers.
pub mod bank;
pub use bank::{BankDescriptor, BankType, BaseRegister, BANK_DESCRIPTOR_WORDS};

/// Processor state: registers, activity state packet, and jump history.
pub mod state;
pub use state::{
    ActiveBaseTableEntry, ActivityStatePacket, DesignatorRegister, GeneralRegisterSet,
    IndexRegister, IndicatorKeyRegister, JumpHistory, ProgramAddressRegister,
    ACTIVE_BASE_TABLE_SIZE, GRS_SIZE, ICS_FRAME_WORDS, JUMP_HISTORY_SIZE, JUMP_HISTORY_THRESHOLD,
};

/// Instruction word field projections.
pub mod instruction;
pub use instruction::{compose_basic, compose_extended, InstructionWord};

/// Instruction word disassembly for traces and dumps.
pub mod dasm;
pub use dasm::interpret;

/// The fetch/execute engine.
pub mod engine;
pub use engine::{
    BreakpointComparison, BreakpointRegister, ExecutionEngine, InstructionPoint, StopReason,
    ICS_BASE_REGISTER, ICS_INDEX_REGISTER, L0_BDT_BASE_REGISTER, RCS_BASE_REGISTER,
    RCS_INDEX_REGISTER,
};
