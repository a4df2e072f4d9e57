//! The instruction execution engine.
//!
//! Drives the fetch/execute cycle against main storage through the base
//! register file, posts and handles interrupts, and maintains the activity
//! state packet. The engine does not model hardware timing; it executes one
//! instruction (or one suspension slice of one) per cycle.

use std::sync::Arc;

use crate::bank::{BankDescriptor, BankType, BaseRegister, BANK_DESCRIPTOR_WORDS};
use crate::instruction::InstructionWord;
use crate::interrupt::{
    invalid_instruction, Interrupt, InterruptClass, ReferenceViolationEntry,
};
use crate::state::{
    ActiveBaseTableEntry, ActivityStatePacket, GeneralRegisterSet, IndexRegister, JumpHistory,
    ACTIVE_BASE_TABLE_SIZE, A0, EA0, ER0, EX0, ICS_FRAME_WORDS, R0, X0,
};
use crate::storage::{MainStorage, StorageLockClient, StorageLocks};
use crate::word::{self, Word36};
use crate::address::{AbsoluteAddress, BasicModeVirtualAddress, ExtendedModeVirtualAddress};

/// Base register describing the level-0 bank descriptor table. Levels 1-7
/// follow on B17 through B23.
pub const L0_BDT_BASE_REGISTER: usize = 16;

/// Base register describing the interrupt control stack.
pub const ICS_BASE_REGISTER: usize = 26;

/// Index register holding the ICS frame pointer and frame size.
pub const ICS_INDEX_REGISTER: u64 = EX0 + 1;

/// Base register describing the return control stack.
pub const RCS_BASE_REGISTER: usize = 25;

/// Index register holding the RCS frame pointer.
pub const RCS_INDEX_REGISTER: u64 = EX0;

/// Base register candidate orderings for basic-mode bank selection,
/// keyed by DB31.
const BASE_REGISTER_CANDIDATES: [[usize; 4]; 2] = [[12, 14, 13, 15], [13, 15, 12, 14]];

/// Why the engine stopped. `NotStopped` is the running state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopReason {
    #[default]
    NotStopped,
    Initial,
    Cleared,
    Debug,
    Development,
    Breakpoint,
    HaltJumpExecuted,
    IcsBaseRegisterInvalid,
    IcsOverflow,
    InitiateAutoRecovery,
    L0BaseRegisterInvalid,
    PanelHalt,
    InterruptHandlerHardwareFailure,
    InterruptHandlerOffsetOutOfRange,
    InterruptHandlerInvalidBankType,
    InterruptHandlerInvalidLevelBdi,
}

/// Where the engine is within the current instruction. Interrupt handling
/// is permitted between instructions and at mid-instruction points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstructionPoint {
    #[default]
    BetweenInstructions,
    ResolvingAddress,
    MidInstruction,
}

/// Which storage access a breakpoint comparison applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BreakpointComparison {
    Fetch,
    Read,
    Write,
}

/// The hardware breakpoint register: one absolute address plus the
/// comparisons it arms, and whether a match halts or raises an interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BreakpointRegister {
    pub address: AbsoluteAddress,
    pub fetch: bool,
    pub read: bool,
    pub write: bool,
    pub halt: bool,
}

/// Executes 36-bit code. The engine owns the full activity state (ASP,
/// GRS, base registers, active base table) and shares main storage and the
/// storage lock table with its peers.
pub struct ExecutionEngine {
    client: StorageLockClient,
    storage: Arc<MainStorage>,
    locks: Arc<StorageLocks>,

    asp: ActivityStatePacket,
    grs: GeneralRegisterSet,
    base_registers: Vec<BaseRegister>,
    active_base_table: [ActiveBaseTableEntry; ACTIVE_BASE_TABLE_SIZE],

    // Basic mode only. Zero means not yet determined.
    base_register_index_for_fetch: usize,

    pending_interrupt: Option<Interrupt>,
    jump_history: JumpHistory,
    breakpoint: Option<BreakpointRegister>,

    // Set when the current instruction has placed PAR.PC itself.
    prevent_pc_update: bool,

    stopped: bool,
    stop_reason: StopReason,
    stop_detail: Word36,
    instruction_point: InstructionPoint,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(
        client: StorageLockClient,
        storage: Arc<MainStorage>,
        locks: Arc<StorageLocks>,
    ) -> Self {
        let mut engine = Self {
            client,
            storage,
            locks,
            asp: ActivityStatePacket::default(),
            grs: GeneralRegisterSet::new(),
            base_registers: (0..32).map(|_| BaseRegister::void()).collect(),
            active_base_table: [ActiveBaseTableEntry::default(); ACTIVE_BASE_TABLE_SIZE],
            base_register_index_for_fetch: 0,
            pending_interrupt: None,
            jump_history: JumpHistory::new(),
            breakpoint: None,
            prevent_pc_update: false,
            stopped: true,
            stop_reason: StopReason::Initial,
            stop_detail: Word36::new(0),
            instruction_point: InstructionPoint::BetweenInstructions,
        };
        engine.clear();
        engine
    }

    /// Resets all activity state, leaving the engine stopped.
    pub fn clear(&mut self) {
        self.asp = ActivityStatePacket::default();
        self.grs.clear();
        for register in &mut self.base_registers {
            *register = BaseRegister::void();
        }
        self.active_base_table = [ActiveBaseTableEntry::default(); ACTIVE_BASE_TABLE_SIZE];
        self.base_register_index_for_fetch = 0;
        self.pending_interrupt = None;
        self.jump_history = JumpHistory::new();
        self.breakpoint = None;
        self.prevent_pc_update = false;
        self.stopped = true;
        self.stop_reason = StopReason::Initial;
        self.stop_detail = Word36::new(0);
        self.instruction_point = InstructionPoint::BetweenInstructions;
    }

    //  State access ---------------------------------------------------------

    #[must_use]
    pub const fn activity_state(&self) -> &ActivityStatePacket {
        &self.asp
    }

    #[must_use]
    pub fn activity_state_mut(&mut self) -> &mut ActivityStatePacket {
        &mut self.asp
    }

    #[must_use]
    pub const fn general_register_set(&self) -> &GeneralRegisterSet {
        &self.grs
    }

    #[must_use]
    pub fn general_register_set_mut(&mut self) -> &mut GeneralRegisterSet {
        &mut self.grs
    }

    #[must_use]
    pub fn base_register(&self, index: usize) -> &BaseRegister {
        &self.base_registers[index]
    }

    pub fn set_base_register(&mut self, index: usize, register: BaseRegister) {
        self.base_registers[index] = register;
    }

    #[must_use]
    pub fn active_base_table_entry(&self, index: usize) -> ActiveBaseTableEntry {
        self.active_base_table[index]
    }

    pub fn set_active_base_table_entry(&mut self, index: usize, entry: ActiveBaseTableEntry) {
        self.active_base_table[index] = entry;
    }

    #[must_use]
    pub const fn storage(&self) -> &Arc<MainStorage> {
        &self.storage
    }

    #[must_use]
    pub const fn storage_lock_client(&self) -> StorageLockClient {
        self.client
    }

    pub fn set_breakpoint(&mut self, breakpoint: Option<BreakpointRegister>) {
        self.breakpoint = breakpoint;
    }

    #[must_use]
    pub const fn pending_interrupt(&self) -> Option<&Interrupt> {
        self.pending_interrupt.as_ref()
    }

    pub fn clear_pending_interrupt(&mut self) {
        self.pending_interrupt = None;
    }

    #[must_use]
    pub const fn instruction_point(&self) -> InstructionPoint {
        self.instruction_point
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    #[must_use]
    pub const fn stop_reason(&self) -> (StopReason, Word36) {
        (self.stop_reason, self.stop_detail)
    }

    /// Posts a system stop. The run loop observes this at the top of the
    /// next cycle.
    pub fn stop(&mut self, reason: StopReason, detail: Word36) {
        self.stopped = true;
        self.stop_reason = reason;
        self.stop_detail = detail;
    }

    pub fn clear_stop(&mut self) {
        self.stopped = false;
        self.stop_reason = StopReason::NotStopped;
        self.stop_detail = Word36::new(0);
    }

    /// Sets PAR.PC, optionally suppressing the post-instruction increment.
    pub fn set_program_counter(&mut self, counter: u64, prevent_increment: bool) {
        self.asp
            .program_address_register
            .set_program_counter(counter);
        self.prevent_pc_update = prevent_increment;
    }

    pub fn drain_jump_history(&mut self) -> Vec<Word36> {
        self.jump_history.take_entries()
    }

    //  Register selection ---------------------------------------------------

    #[must_use]
    pub fn exec_or_user_a_register_index(&self, register_index: u64) -> u64 {
        if self.asp.designator_register.exec_register_set_selected {
            EA0 + register_index
        } else {
            A0 + register_index
        }
    }

    #[must_use]
    pub fn exec_or_user_r_register_index(&self, register_index: u64) -> u64 {
        if self.asp.designator_register.exec_register_set_selected {
            ER0 + register_index
        } else {
            R0 + register_index
        }
    }

    #[must_use]
    pub fn exec_or_user_x_register_index(&self, register_index: u64) -> u64 {
        if self.asp.designator_register.exec_register_set_selected {
            EX0 + register_index
        } else {
            X0 + register_index
        }
    }

    #[must_use]
    pub fn exec_or_user_a_register(&self, register_index: u64) -> Word36 {
        self.grs.get(self.exec_or_user_a_register_index(register_index))
    }

    #[must_use]
    pub fn exec_or_user_r_register(&self, register_index: u64) -> Word36 {
        self.grs.get(self.exec_or_user_r_register_index(register_index))
    }

    #[must_use]
    pub fn exec_or_user_x_register(&self, register_index: u64) -> IndexRegister {
        self.grs
            .index_register(self.exec_or_user_x_register_index(register_index))
    }

    pub fn set_exec_or_user_a_register(&mut self, register_index: u64, value: Word36) {
        let index = self.exec_or_user_a_register_index(register_index);
        self.grs.set(index, value);
    }

    pub fn set_exec_or_user_r_register(&mut self, register_index: u64, value: Word36) {
        let index = self.exec_or_user_r_register_index(register_index);
        self.grs.set(index, value);
    }

    pub fn set_exec_or_user_x_register(&mut self, register_index: u64, value: IndexRegister) {
        let index = self.exec_or_user_x_register_index(register_index);
        self.grs.set(index, value.word());
    }

    //  Interrupt posting ----------------------------------------------------

    /// Posts an interrupt into the single pending slot. An already-pending
    /// interrupt is displaced only by one of numerically lower class.
    pub fn post_interrupt(&mut self, interrupt: Interrupt) {
        let accept = match &self.pending_interrupt {
            Some(pending) => interrupt.takes_priority_over(pending),
            None => true,
        };
        if accept {
            self.pending_interrupt = Some(interrupt);
        }
        let address = self.current_virtual_address();
        self.record_jump_history(Word36::new(address));
    }

    fn record_jump_history(&mut self, target: Word36) {
        self.jump_history.record(target);
        if self.jump_history.take_interrupt_armed() {
            let accept = match &self.pending_interrupt {
                Some(pending) => Interrupt::JumpHistoryFull.takes_priority_over(pending),
                None => true,
            };
            if accept {
                self.pending_interrupt = Some(Interrupt::JumpHistoryFull);
            }
        }
    }

    /// Virtual address of the instruction bank entry currently executing,
    /// packed as a program address word.
    #[must_use]
    pub fn current_virtual_address(&self) -> u64 {
        if self.asp.designator_register.basic_mode_enabled {
            let brx = if self.base_register_index_for_fetch != 0 {
                self.base_register_index_for_fetch
            } else {
                self.find_basic_mode_bank(self.asp.program_address_register.program_counter())
            };
            let entry = self.active_base_table[brx & 0o17];
            BasicModeVirtualAddress::from_extended(
                entry.level,
                entry.bank_descriptor_index,
                entry.subset_offset,
            )
            .composite()
        } else {
            let brx = self.effective_base_register_index() & 0o17;
            let entry = self.active_base_table[brx];
            ExtendedModeVirtualAddress::new(
                entry.level,
                entry.bank_descriptor_index,
                entry.subset_offset,
            )
            .composite()
        }
    }

    //  Main loop ------------------------------------------------------------

    /// Runs cycles until something stops the engine.
    pub fn run(&mut self) {
        while !self.stopped {
            if let Some(interrupt) = self.pending_interrupt {
                if !interrupt.is_deferrable()
                    || self.asp.designator_register.deferrable_interrupt_enabled
                {
                    self.handle_interrupt();
                    continue;
                }
            }
            self.do_cycle();
        }
        self.locks.release_all(self.client);
    }

    /// Executes one engine cycle: either finishes fetching an instruction
    /// into F0, or executes the instruction already there.
    pub fn do_cycle(&mut self) {
        if self.asp.indicator_key_register.instruction_in_f0 {
            self.execute_current_instruction();
        } else if self.fetch_instruction() {
            self.instruction_point = InstructionPoint::ResolvingAddress;
        } else {
            self.instruction_point = InstructionPoint::BetweenInstructions;
        }
    }

    fn execute_current_instruction(&mut self) {
        self.prevent_pc_update = false;

        let basic_mode = self.asp.designator_register.basic_mode_enabled;
        let f0 = InstructionWord::from_word(self.asp.current_instruction);
        let outcome = match Self::dispatch(basic_mode, f0) {
            Some(handler) => handler(self),
            None => {
                self.post_interrupt(Interrupt::InvalidInstruction {
                    short_status: invalid_instruction::BAD_FUNCTION_CODE,
                });
                self.instruction_point = InstructionPoint::BetweenInstructions;
                return;
            }
        };

        match outcome {
            Err(interrupt) => {
                // F0 and PC stay put so the handler can see where we were.
                self.post_interrupt(interrupt);
            }
            Ok(true) => {
                self.instruction_point = InstructionPoint::BetweenInstructions;
                self.locks.release_all(self.client);
                self.asp.indicator_key_register.instruction_in_f0 = false;
                if !self.prevent_pc_update {
                    self.asp.program_address_register.increment_program_counter();
                }
            }
            Ok(false) => {
                // Suspended mid-address-resolution; resume next cycle.
            }
        }
    }

    fn dispatch(
        basic_mode: bool,
        f0: InstructionWord,
    ) -> Option<fn(&mut Self) -> Result<bool, Interrupt>> {
        match f0.f() {
            0o01 => Some(Self::store_accumulator),
            0o04 => Some(Self::store_register),
            0o05 => match f0.a() {
                0o00 => Some(Self::store_zero),
                0o01 => Some(Self::store_negative_zero),
                0o02 => Some(Self::store_positive_one),
                0o03 => Some(Self::store_negative_one),
                0o04 => Some(Self::store_fieldata_spaces),
                0o05 => Some(Self::store_fieldata_zeroes),
                0o06 => Some(Self::store_ascii_spaces),
                0o07 => Some(Self::store_ascii_zeroes),
                _ => None,
            },
            0o06 => Some(Self::store_index_register),
            0o10 => Some(Self::load_accumulator),
            0o23 => Some(Self::load_register),
            0o27 => Some(Self::load_index_register),
            0o74 if basic_mode && f0.j() == 0o06 => Some(Self::no_operation),
            0o73 if !basic_mode && f0.j() == 0o14 && f0.a() == 0o00 => Some(Self::no_operation),
            _ => None,
        }
    }

    //  Instruction fetch ----------------------------------------------------

    /// Loads F0 from the bank containing PAR.PC. Posts an interrupt and
    /// returns false on any failure.
    pub fn fetch_instruction(&mut self) -> bool {
        let basic_mode = self.asp.designator_register.basic_mode_enabled;
        let program_counter = self.asp.program_address_register.program_counter();

        let brx = if basic_mode {
            if self.base_register_index_for_fetch == 0 {
                let found = self.find_basic_mode_bank(program_counter);
                if found == 0 {
                    self.post_interrupt(Interrupt::ReferenceViolation {
                        entry: ReferenceViolationEntry::StorageLimits,
                        fetch_operation: false,
                    });
                    return false;
                }
                self.base_register_index_for_fetch = found;
                self.asp.designator_register.basic_mode_base_register_selection =
                    found == 13 || found == 15;
            }

            let index = self.base_register_index_for_fetch;
            let key = self.asp.indicator_key_register.access_key;
            if !self.base_registers[index].effective_permissions(&key).read {
                self.post_interrupt(Interrupt::ReferenceViolation {
                    entry: ReferenceViolationEntry::StorageLimits,
                    fetch_operation: false,
                });
                return false;
            }
            index
        } else {
            let key = self.asp.indicator_key_register.access_key;
            if let Err(interrupt) =
                self.check_access_limits_and_accessibility(false, 0, program_counter, true, false, false, &key)
            {
                self.post_interrupt(interrupt);
                return false;
            }
            0
        };

        let register = &self.base_registers[brx];
        if register.is_void() || register.is_large_bank() {
            self.post_interrupt(Interrupt::ReferenceViolation {
                entry: ReferenceViolationEntry::StorageLimits,
                fetch_operation: false,
            });
            return false;
        }

        let absolute = register.relative_to_absolute(program_counter);
        let (found, breakpoint_interrupt) = self.check_breakpoint(BreakpointComparison::Fetch, absolute);
        if let Some(interrupt) = breakpoint_interrupt {
            self.post_interrupt(interrupt);
            return false;
        }
        if found {
            return false;
        }

        let word = match self.base_registers[brx].read_word(program_counter) {
            Ok(word) => word,
            Err(interrupt) => {
                self.post_interrupt(interrupt);
                return false;
            }
        };

        self.asp.current_instruction = word;
        self.asp.indicator_key_register.instruction_in_f0 = true;
        true
    }

    /// Selects the basic-mode base register (12-15) whose bank contains
    /// `relative_address`, honoring the DB31 candidate ordering. Returns
    /// zero when no based bank contains the address.
    #[must_use]
    pub fn find_basic_mode_bank(&self, relative_address: u64) -> usize {
        let db31 = self.asp.designator_register.basic_mode_base_register_selection;
        for &candidate in &BASE_REGISTER_CANDIDATES[usize::from(db31)] {
            let register = &self.base_registers[candidate];
            if !register.is_void()
                && relative_address >= register.lower_limit_normalized()
                && relative_address <= register.upper_limit_normalized()
            {
                return candidate;
            }
        }
        0
    }

    fn find_base_register_index_basic_mode(&self, relative_address: u64) -> Result<usize, Interrupt> {
        let index = self.find_basic_mode_bank(relative_address);
        if index == 0 {
            Err(Interrupt::ReferenceViolation {
                entry: ReferenceViolationEntry::StorageLimits,
                fetch_operation: false,
            })
        } else {
            Ok(index)
        }
    }

    fn find_base_register_index(&self, relative_address: u64) -> Result<usize, Interrupt> {
        if self.asp.designator_register.basic_mode_enabled {
            self.find_base_register_index_basic_mode(relative_address)
        } else {
            Ok(self.effective_base_register_index())
        }
    }

    /// Extended-mode base register selection: B plus the exec extension
    /// bit when privileged.
    fn effective_base_register_index(&self) -> usize {
        let f0 = InstructionWord::from_word(self.asp.current_instruction);
        if self.asp.designator_register.processor_privilege < 2 {
            f0.ib() as usize
        } else {
            f0.b() as usize
        }
    }

    //  Access checking ------------------------------------------------------

    fn check_accessibility(
        &self,
        base_register_index: usize,
        fetch: bool,
        read: bool,
        write: bool,
        key: &crate::access::AccessKey,
    ) -> Result<(), Interrupt> {
        let permissions = self.base_registers[base_register_index].effective_permissions(key);
        let basic_mode = self.asp.designator_register.basic_mode_enabled;
        if basic_mode && fetch && !permissions.enter {
            Err(Interrupt::ReferenceViolation {
                entry: ReferenceViolationEntry::ReadAccess,
                fetch_operation: fetch,
            })
        } else if read && !permissions.read {
            Err(Interrupt::ReferenceViolation {
                entry: ReferenceViolationEntry::ReadAccess,
                fetch_operation: fetch,
            })
        } else if write && !permissions.write {
            Err(Interrupt::ReferenceViolation {
                entry: ReferenceViolationEntry::WriteAccess,
                fetch_operation: fetch,
            })
        } else {
            Ok(())
        }
    }

    fn check_access_limits_for_address(
        &self,
        basic_mode: bool,
        base_register_index: usize,
        relative_address: u64,
        fetch: bool,
    ) -> Result<(), Interrupt> {
        // Instruction fetch from the GRS address range is never legal.
        if fetch && relative_address < 0o200 && (basic_mode || base_register_index == 0) {
            return Err(Interrupt::ReferenceViolation {
                entry: ReferenceViolationEntry::StorageLimits,
                fetch_operation: true,
            });
        }
        self.base_registers[base_register_index].check_limits(relative_address, fetch)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_access_limits_and_accessibility(
        &self,
        basic_mode: bool,
        base_register_index: usize,
        relative_address: u64,
        fetch: bool,
        read: bool,
        write: bool,
        key: &crate::access::AccessKey,
    ) -> Result<(), Interrupt> {
        self.check_access_limits_for_address(basic_mode, base_register_index, relative_address, fetch)?;
        self.check_accessibility(base_register_index, fetch, read, write, key)
    }

    fn check_breakpoint(
        &mut self,
        comparison: BreakpointComparison,
        address: AbsoluteAddress,
    ) -> (bool, Option<Interrupt>) {
        let Some(breakpoint) = self.breakpoint else {
            return (false, None);
        };
        if breakpoint.address != address {
            return (false, None);
        }

        let armed = match comparison {
            BreakpointComparison::Fetch => breakpoint.fetch,
            BreakpointComparison::Read => breakpoint.read,
            BreakpointComparison::Write => breakpoint.write,
        };
        if !armed {
            return (false, None);
        }

        self.asp.indicator_key_register.breakpoint_register_match = true;
        if breakpoint.halt {
            self.stop(StopReason::Breakpoint, Word36::new(0));
            (true, None)
        } else {
            (true, Some(Interrupt::Breakpoint))
        }
    }

    //  Operand development --------------------------------------------------

    /// Develops the relative address from F0: the unsigned U (or D) field
    /// plus the signed modifier of the selected index register. Handles one
    /// iteration of basic-mode indirect addressing per call, returning
    /// `Ok(None)` to request another cycle.
    fn resolve_relative_address(&mut self, use_u: bool) -> Result<Option<u64>, Interrupt> {
        self.instruction_point = InstructionPoint::ResolvingAddress;

        let f0 = InstructionWord::from_word(self.asp.current_instruction);
        let dr = self.asp.designator_register;

        let base = if dr.basic_mode_enabled || use_u {
            f0.u()
        } else {
            f0.d()
        };

        let mut addend = 0;
        if f0.x() != 0 {
            let x_register = self.exec_or_user_x_register(f0.x());
            addend = if dr.executive_24bit_indexing_enabled && dr.processor_privilege < 2 {
                x_register.signed_xm24()
            } else {
                x_register.signed_xm()
            };
        }

        let relative_address = word::add_simple(base, addend);

        if f0.i() != 0 && dr.basic_mode_enabled && dr.processor_privilege > 1 {
            // One iteration of indirect addressing: replace X, H, I, and U
            // in F0 with the referenced word and come back around.
            let brx = self.find_base_register_index(relative_address)?;
            let key = self.asp.indicator_key_register.access_key;
            self.check_access_limits_and_accessibility(
                true,
                brx,
                relative_address,
                true,
                false,
                false,
                &key,
            )?;

            let absolute = self.base_registers[brx].relative_to_absolute(relative_address);
            let (found, interrupt) = self.check_breakpoint(BreakpointComparison::Read, absolute);
            if let Some(interrupt) = interrupt {
                return Err(interrupt);
            }
            if found {
                return Ok(None);
            }

            let word = self.storage.get_word(absolute)?;
            let mut f0 = InstructionWord::from_word(self.asp.current_instruction);
            f0.set_xhiu(word.w());
            self.asp.current_instruction = f0.word();
            return Ok(None);
        }

        self.instruction_point = InstructionPoint::MidInstruction;
        Ok(Some(relative_address))
    }

    /// Increments the index register named by F0.x when the increment flag
    /// is set, in 24-bit form under privileged executive indexing.
    fn increment_index_register_in_f0(&mut self) {
        let f0 = InstructionWord::from_word(self.asp.current_instruction);
        if f0.x() > 0 && f0.h() > 0 {
            let dr = self.asp.designator_register;
            let index = self.exec_or_user_x_register_index(f0.x());
            let mut x_register = self.grs.index_register(index);
            if !dr.basic_mode_enabled
                && dr.processor_privilege < 2
                && dr.executive_24bit_indexing_enabled
            {
                x_register.increment_modifier_24();
            } else {
                x_register.increment_modifier();
            }
            self.grs.set(index, x_register.word());
        }
    }

    /// Develops an immediate operand from the h, i, and u fields, adding
    /// the index modifier when F0.x is set. The result is 24 bits wide for
    /// privileged executive indexing (or unprivileged with F0.i), 18 bits
    /// otherwise; j=XU sign-extends it.
    fn immediate_operand(&mut self) -> u64 {
        let f0 = InstructionWord::from_word(self.asp.current_instruction);
        let dr = self.asp.designator_register;

        let exec_24_index = dr.executive_24bit_indexing_enabled;
        let privilege = dr.processor_privilege;
        let value_is_24_bits =
            (privilege < 2 && exec_24_index) || (privilege > 1 && f0.i() != 0);

        let mut operand;
        if f0.x() == 0 {
            operand = f0.hiu();
            if operand == 0o777777 {
                operand = 0;
            }
            if f0.j() == word::J_XU && operand & 0o400000 != 0 {
                operand |= 0o777777_000000;
            }
        } else {
            operand = f0.u();
            if operand == 0o177777 {
                operand = 0;
            }
            let x_register = self.exec_or_user_x_register(f0.x());
            operand = if !dr.basic_mode_enabled && privilege < 2 && exec_24_index {
                word::add_simple(operand, x_register.xm24())
            } else {
                word::add_simple(operand, x_register.xm())
            };
            self.increment_index_register_in_f0();
        }

        let extend = f0.j() == word::J_XU;
        if value_is_24_bits {
            operand &= 0o77_777777;
            if extend && operand & 0o40_000000 != 0 {
                operand |= 0o777700_000000;
            }
        } else {
            operand &= 0o777777;
            if extend && operand & 0o400000 != 0 {
                operand |= 0o777777_000000;
            }
        }
        operand
    }

    /// General operand retrieval: immediate, GRS, or storage source, with
    /// partial-word extraction under j-field control. `Ok(None)` means the
    /// instruction is still resolving an indirect address.
    pub fn operand(
        &mut self,
        grs_destination: bool,
        grs_check: bool,
        allow_immediate: bool,
        allow_partial: bool,
    ) -> Result<Option<u64>, Interrupt> {
        let f0 = InstructionWord::from_word(self.asp.current_instruction);
        let j_field = f0.j();
        if allow_immediate && j_field >= word::J_U {
            return Ok(Some(self.immediate_operand()));
        }

        let Some(relative_address) = self.resolve_relative_address(false)? else {
            return Ok(None);
        };

        let dr = self.asp.designator_register;
        let basic_mode = dr.basic_mode_enabled;
        let privilege = dr.processor_privilege;

        let mut brx = 0;
        if !basic_mode {
            brx = f0.b() as usize;
            if privilege < 2 && f0.i() != 0 {
                brx += 16;
            }
        }

        self.increment_index_register_in_f0();

        if grs_check && (basic_mode || brx == 0) && relative_address < 0o200 {
            if !GeneralRegisterSet::is_access_allowed(relative_address, privilege, false) {
                return Err(Interrupt::ReferenceViolation {
                    entry: ReferenceViolationEntry::ReadAccess,
                    fetch_operation: false,
                });
            }

            // GRS-to-GRS moves are always full-word.
            let raw = self.grs.get(relative_address).w();
            let operand = if grs_destination || !allow_partial {
                raw
            } else {
                word::extract_partial_word(raw, j_field, dr.quarter_word_mode_enabled)
            };
            return Ok(Some(operand));
        }

        if basic_mode {
            brx = self.find_base_register_index(relative_address)?;
        }

        let key = self.asp.indicator_key_register.access_key;
        self.check_access_limits_and_accessibility(
            basic_mode,
            brx,
            relative_address,
            false,
            true,
            false,
            &key,
        )?;

        let absolute = self.base_registers[brx].relative_to_absolute(relative_address);
        let (found, interrupt) = self.check_breakpoint(BreakpointComparison::Read, absolute);
        if let Some(interrupt) = interrupt {
            return Err(interrupt);
        }
        if found {
            return Ok(None);
        }

        let mut operand = self.base_registers[brx].read_word(relative_address)?.w();
        if allow_partial {
            operand = word::extract_partial_word(operand, j_field, dr.quarter_word_mode_enabled);
        }
        Ok(Some(operand))
    }

    /// General operand store: GRS or storage destination with partial-word
    /// injection under j-field control. Immediate j-fields consume the
    /// operand without storing when `check_immediate` is set.
    pub fn store_operand(
        &mut self,
        grs_source: bool,
        grs_check: bool,
        check_immediate: bool,
        allow_partial: bool,
        operand: u64,
    ) -> Result<bool, Interrupt> {
        let f0 = InstructionWord::from_word(self.asp.current_instruction);
        let j_field = f0.j();
        if check_immediate && j_field >= word::J_U {
            self.increment_index_register_in_f0();
            return Ok(true);
        }

        let Some(relative_address) = self.resolve_relative_address(false)? else {
            return Ok(false);
        };

        self.increment_index_register_in_f0();

        let dr = self.asp.designator_register;
        let basic_mode = dr.basic_mode_enabled;
        let privilege = dr.processor_privilege;

        let mut brx = 0;
        if !basic_mode {
            brx = f0.b() as usize;
            if privilege < 2 && f0.i() != 0 {
                brx += 16;
            }
        }

        if grs_check && (basic_mode || brx == 0) && relative_address < 0o200 {
            if !GeneralRegisterSet::is_access_allowed(relative_address, privilege, true) {
                return Err(Interrupt::ReferenceViolation {
                    entry: ReferenceViolationEntry::WriteAccess,
                    fetch_operation: false,
                });
            }

            if !grs_source && allow_partial {
                let original = self.grs.get(relative_address).w();
                let injected = word::inject_partial_word(
                    original,
                    operand,
                    j_field,
                    dr.quarter_word_mode_enabled,
                );
                self.grs.set(relative_address, Word36::new(injected));
            } else {
                self.grs.set(relative_address, Word36::new(operand));
            }
            return Ok(true);
        }

        if basic_mode {
            brx = self.find_base_register_index(relative_address)?;
        }

        let key = self.asp.indicator_key_register.access_key;
        self.check_access_limits_and_accessibility(
            basic_mode,
            brx,
            relative_address,
            false,
            false,
            true,
            &key,
        )?;

        let absolute = self.base_registers[brx].relative_to_absolute(relative_address);
        let (found, interrupt) = self.check_breakpoint(BreakpointComparison::Write, absolute);
        if let Some(interrupt) = interrupt {
            return Err(interrupt);
        }
        if found {
            return Ok(false);
        }

        if allow_partial {
            let original = self.base_registers[brx].read_word(relative_address)?.w();
            let injected =
                word::inject_partial_word(original, operand, j_field, dr.quarter_word_mode_enabled);
            self.base_registers[brx].write_word(relative_address, Word36::new(injected))?;
        } else {
            self.base_registers[brx].write_word(relative_address, Word36::new(operand))?;
        }
        Ok(true)
    }

    /// Develops U without retrieving anything. Access checks apply only to
    /// indirect address resolution and non-GRS destinations.
    fn ignore_operand(&mut self) -> Result<bool, Interrupt> {
        let Some(relative_address) = self.resolve_relative_address(false)? else {
            return Ok(false);
        };

        let f0 = InstructionWord::from_word(self.asp.current_instruction);
        let dr = self.asp.designator_register;
        let basic_mode = dr.basic_mode_enabled;

        let mut brx = 0;
        if !basic_mode {
            brx = f0.b() as usize;
            if dr.processor_privilege < 2 && f0.i() != 0 {
                brx += 16;
            }
        }

        if relative_address > 0o177 || (!basic_mode && brx > 0) {
            let brx = self.find_base_register_index(relative_address)?;
            let key = self.asp.indicator_key_register.access_key;
            self.check_access_limits_and_accessibility(
                basic_mode,
                brx,
                relative_address,
                false,
                false,
                false,
                &key,
            )?;
        }
        Ok(true)
    }

    //  Instruction handlers -------------------------------------------------

    fn load_accumulator(&mut self) -> Result<bool, Interrupt> {
        let Some(operand) = self.operand(true, true, true, true)? else {
            return Ok(false);
        };
        let a = InstructionWord::from_word(self.asp.current_instruction).a();
        self.set_exec_or_user_a_register(a, Word36::new(operand));
        Ok(true)
    }

    fn load_register(&mut self) -> Result<bool, Interrupt> {
        let Some(operand) = self.operand(true, true, true, true)? else {
            return Ok(false);
        };
        let a = InstructionWord::from_word(self.asp.current_instruction).a();
        self.set_exec_or_user_r_register(a, Word36::new(operand));
        Ok(true)
    }

    fn load_index_register(&mut self) -> Result<bool, Interrupt> {
        let Some(operand) = self.operand(true, true, true, true)? else {
            return Ok(false);
        };
        let a = InstructionWord::from_word(self.asp.current_instruction).a();
        self.set_exec_or_user_x_register(a, IndexRegister::new(Word36::new(operand)));
        Ok(true)
    }

    fn store_accumulator(&mut self) -> Result<bool, Interrupt> {
        let a = InstructionWord::from_word(self.asp.current_instruction).a();
        let value = self.exec_or_user_a_register(a).w();
        self.store_operand(true, true, true, true, value)
    }

    fn store_register(&mut self) -> Result<bool, Interrupt> {
        let a = InstructionWord::from_word(self.asp.current_instruction).a();
        let value = self.exec_or_user_r_register(a).w();
        self.store_operand(true, true, true, true, value)
    }

    fn store_index_register(&mut self) -> Result<bool, Interrupt> {
        let a = InstructionWord::from_word(self.asp.current_instruction).a();
        let value = self.exec_or_user_x_register(a).word().w();
        self.store_operand(true, true, true, true, value)
    }

    fn store_zero(&mut self) -> Result<bool, Interrupt> {
        self.store_operand(true, true, true, true, word::POSITIVE_ZERO)
    }

    fn store_negative_zero(&mut self) -> Result<bool, Interrupt> {
        self.store_operand(true, true, true, true, word::NEGATIVE_ZERO)
    }

    fn store_positive_one(&mut self) -> Result<bool, Interrupt> {
        self.store_operand(true, true, true, true, word::POSITIVE_ONE)
    }

    fn store_negative_one(&mut self) -> Result<bool, Interrupt> {
        self.store_operand(true, true, true, true, word::NEGATIVE_ONE)
    }

    fn store_fieldata_spaces(&mut self) -> Result<bool, Interrupt> {
        self.store_operand(true, true, true, true, 0o050505_050505)
    }

    fn store_fieldata_zeroes(&mut self) -> Result<bool, Interrupt> {
        self.store_operand(true, true, true, true, 0o606060_606060)
    }

    fn store_ascii_spaces(&mut self) -> Result<bool, Interrupt> {
        self.store_operand(true, true, true, true, 0o040040_040040)
    }

    fn store_ascii_zeroes(&mut self) -> Result<bool, Interrupt> {
        self.store_operand(true, true, true, true, 0o060060_060060)
    }

    fn no_operation(&mut self) -> Result<bool, Interrupt> {
        self.ignore_operand()
    }

    //  Interrupt handling ---------------------------------------------------

    /// Takes the pending interrupt and transfers control to its handler:
    /// pushes an interrupt control stack frame, records jump history, and
    /// enters the handler bank named by the Level-0 BDT vector.
    pub fn handle_interrupt(&mut self) {
        let Some(interrupt) = self.pending_interrupt.take() else {
            return;
        };

        // A hardware check while already handling one is unrecoverable.
        if interrupt.class() == InterruptClass::HardwareCheck
            && self.asp.designator_register.fault_handling_in_progress
        {
            self.stop(StopReason::InterruptHandlerHardwareFailure, Word36::new(0));
            return;
        }

        self.asp.indicator_key_register.short_status_field = interrupt.short_status_field();
        self.asp.indicator_key_register.interrupt_class_field = interrupt.class() as u64;
        self.asp.interrupt_status_words = [interrupt.status_word_0(), interrupt.status_word_1()];

        if self.base_registers[ICS_BASE_REGISTER].is_void() {
            self.stop(StopReason::IcsBaseRegisterInvalid, Word36::new(0));
            return;
        }

        let mut ics_pointer = self.grs.index_register(ICS_INDEX_REGISTER);
        ics_pointer.decrement_modifier();
        self.grs.set(ICS_INDEX_REGISTER, ics_pointer.word());
        let frame_offset = ics_pointer.xm();
        let frame_size = ics_pointer.xi();
        let frame_limit = frame_offset + frame_size;

        let ics_register = self.base_registers[ICS_BASE_REGISTER].clone();
        let Some(frame_last) = frame_limit.checked_sub(1) else {
            self.stop(StopReason::IcsOverflow, Word36::new(0));
            return;
        };
        if frame_last > ics_register.upper_limit_normalized()
            || frame_offset < ics_register.lower_limit_normalized()
        {
            self.stop(StopReason::IcsOverflow, Word36::new(0));
            return;
        }

        let frame = self.asp.to_frame();
        let Some(handle) = ics_register.storage() else {
            self.stop(StopReason::IcsBaseRegisterInvalid, Word36::new(0));
            return;
        };
        {
            let mut segment = handle
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if frame_limit as usize > segment.len() {
                self.stop(StopReason::IcsBaseRegisterInvalid, Word36::new(0));
                return;
            }
            for (index, slot) in segment[frame_offset as usize..frame_limit as usize]
                .iter_mut()
                .enumerate()
            {
                *slot = if index < ICS_FRAME_WORDS {
                    frame[index]
                } else {
                    Word36::new(0)
                };
            }
        }

        let target = Word36::new(self.asp.program_address_register.composite());
        self.record_jump_history(target);
        self.enter_interrupt_handler(&interrupt);
    }

    /// Resolves the interrupt vector through the Level-0 bank descriptor
    /// table and loads B0 with the handler bank. Every failure here is a
    /// hard stop; there is nothing to fall back to.
    fn enter_interrupt_handler(&mut self, interrupt: &Interrupt) {
        let vector_register = self.base_registers[L0_BDT_BASE_REGISTER].clone();
        if vector_register.is_void() {
            self.stop(StopReason::L0BaseRegisterInvalid, Word36::new(0));
            return;
        }
        let Some(handle) = vector_register.storage() else {
            self.stop(StopReason::L0BaseRegisterInvalid, Word36::new(0));
            return;
        };

        let vector_offset = interrupt.class() as usize;
        let vector = {
            let segment = handle
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match segment.get(vector_offset) {
                Some(word) => word.w(),
                None => {
                    self.stop(StopReason::InterruptHandlerOffsetOutOfRange, Word36::new(0));
                    return;
                }
            }
        };

        let level = vector >> 33;
        let bank_descriptor_index = (vector >> 18) & 0o77777;
        let handler_offset = vector & 0o777777;
        let detail = Word36::new((level << 15) | bank_descriptor_index);

        if level == 0 && bank_descriptor_index < 32 {
            self.stop(StopReason::InterruptHandlerInvalidLevelBdi, detail);
            return;
        }

        let Some(descriptor) = self.find_bank_descriptor(level, bank_descriptor_index) else {
            self.stop(StopReason::InterruptHandlerInvalidLevelBdi, detail);
            return;
        };

        // Interrupt processing always transfers to B0, so the handler bank
        // must be an extended-mode bank.
        if descriptor.bank_type() != BankType::ExtendedMode {
            self.stop(StopReason::InterruptHandlerInvalidBankType, detail);
            return;
        }

        let segment = match self.storage.segment(descriptor.base_address().segment()) {
            Ok(segment) => segment,
            Err(_) => {
                self.stop(StopReason::InterruptHandlerHardwareFailure, detail);
                return;
            }
        };
        let register = BaseRegister::from_descriptor(&descriptor, segment);
        if register.check_limits(handler_offset, true).is_err() {
            self.stop(StopReason::InterruptHandlerOffsetOutOfRange, detail);
            return;
        }
        self.base_registers[0] = register;

        self.asp.program_address_register.set_level(level);
        self.asp
            .program_address_register
            .set_bank_descriptor_index(bank_descriptor_index);
        self.asp
            .program_address_register
            .set_program_counter(handler_offset);

        let mut designator = crate::state::DesignatorRegister::default();
        designator.exec_register_set_selected = true;
        designator.arithmetic_exception_enabled = true;
        designator.basic_mode_base_register_selection = self
            .asp
            .designator_register
            .basic_mode_base_register_selection;
        designator.fault_handling_in_progress =
            interrupt.class() == InterruptClass::HardwareCheck;
        self.asp.designator_register = designator;

        self.asp.indicator_key_register.clear();
        self.base_register_index_for_fetch = 0;
    }

    /// Reads the bank descriptor for (level, BDI) out of the appropriate
    /// bank descriptor table. Descriptors start eight words in, eight
    /// words apiece.
    #[must_use]
    pub fn find_bank_descriptor(&self, level: u64, bank_descriptor_index: u64) -> Option<BankDescriptor> {
        let register = &self.base_registers[L0_BDT_BASE_REGISTER + (level & 0o7) as usize];
        if register.is_void() {
            return None;
        }
        let handle = register.storage()?;
        let segment = handle
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let offset = (bank_descriptor_index * 8 + 8) as usize;
        let slice = segment.get(offset..offset + BANK_DESCRIPTOR_WORDS)?;
        Some(BankDescriptor::from_storage(slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessLock, AccessPermissions};
    use crate::instruction::{compose_basic, compose_extended};
    use crate::interrupt::invalid_instruction;

    fn make_engine() -> ExecutionEngine {
        let storage = Arc::new(MainStorage::new(64));
        let locks = StorageLocks::new();
        ExecutionEngine::new(1, storage, locks)
    }

    fn code_bank_descriptor(segment: u32, words: u64) -> BankDescriptor {
        BankDescriptor::new(
            false,
            AccessLock::new(0, 0),
            AccessPermissions::all(),
            AccessPermissions::all(),
            AbsoluteAddress::new(segment, 0),
            false,
            0,
            words - 1,
            0,
        )
    }

    /// Program origin for test code. Instruction fetch below 0o200 is a
    /// storage limits violation, so code lives above the GRS window.
    const ORIGIN: u64 = 0o1000;

    /// Engine with an extended-mode bank on B0, the given code loaded at
    /// ORIGIN, and PAR.PC pointing at it.
    fn engine_with_code(words: &[u64]) -> ExecutionEngine {
        let mut engine = make_engine();
        let segment_index = engine.storage().allocate(0o2000).unwrap();
        let handle = engine.storage().segment(segment_index).unwrap();
        {
            let mut segment = handle.write().unwrap();
            for (index, &value) in words.iter().enumerate() {
                segment[ORIGIN as usize + index] = Word36::new(value);
            }
        }
        let descriptor = code_bank_descriptor(segment_index, 0o2000);
        engine.set_base_register(0, BaseRegister::from_descriptor(&descriptor, handle));
        engine.activity_state_mut().designator_register.processor_privilege = 0;
        engine
            .activity_state_mut()
            .program_address_register
            .set_program_counter(ORIGIN);
        engine
    }

    fn poke(engine: &ExecutionEngine, offset: u64, value: u64) {
        engine.base_register(0).write_word(offset, Word36::new(value)).unwrap();
    }

    #[test]
    fn extended_mode_load_immediate() {
        let la = compose_extended(0o10, word::J_U, 0o3, 0, 0, 0, 0o1234);
        let mut engine = engine_with_code(&[la.w()]);

        engine.do_cycle(); // fetch
        assert!(engine.activity_state().indicator_key_register.instruction_in_f0);
        engine.do_cycle(); // execute

        assert_eq!(engine.exec_or_user_a_register(3).w(), 0o1234);
        assert_eq!(
            engine.activity_state().program_address_register.program_counter(),
            ORIGIN + 1
        );
        assert!(!engine.activity_state().indicator_key_register.instruction_in_f0);
    }

    #[test]
    fn load_immediate_sign_extends_for_xu() {
        let la = compose_extended(0o10, word::J_XU, 0, 0, 1, 0, 0); // HIU = 0o400000
        let mut engine = engine_with_code(&[la.w()]);
        engine.activity_state_mut().designator_register.processor_privilege = 3;

        engine.do_cycle();
        engine.do_cycle();

        assert_eq!(engine.exec_or_user_a_register(0).w(), 0o777777_400000);
    }

    #[test]
    fn extended_mode_load_from_storage_partial_word() {
        // LA,H1 A1,0o300 reads the upper half of the word at offset 0o300.
        let la = compose_extended(0o10, 0o2, 0o1, 0, 0, 0, 0o300);
        let mut engine = engine_with_code(&[la.w()]);
        poke(&engine, 0o300, 0o1234_004321);

        engine.do_cycle();
        engine.do_cycle();

        assert_eq!(engine.exec_or_user_a_register(1).w(), 0o001234);
    }

    #[test]
    fn store_and_reload_through_storage() {
        let sa = compose_extended(0o01, 0, 0o2, 0, 0, 0, 0o200);
        let la = compose_extended(0o10, 0, 0o4, 0, 0, 0, 0o200);
        let mut engine = engine_with_code(&[sa.w(), la.w()]);
        engine.set_exec_or_user_a_register(2, Word36::new(0o55_443322));

        engine.do_cycle();
        engine.do_cycle();
        engine.do_cycle();
        engine.do_cycle();

        assert_eq!(engine.exec_or_user_a_register(4).w(), 0o55_443322);
        assert!(engine.pending_interrupt().is_none());
    }

    #[test]
    fn store_constant_fieldata_spaces() {
        let sfs = compose_extended(0o05, 0, 0o4, 0, 0, 0, 0o300);
        let mut engine = engine_with_code(&[sfs.w()]);

        engine.do_cycle();
        engine.do_cycle();

        let word = engine.base_register(0).read_word(0o300).unwrap();
        assert_eq!(word.w(), 0o050505_050505);
    }

    #[test]
    fn index_modifier_addressing_and_increment() {
        // LA A0,0o200,*X5 with X5 = increment 1, modifier 2.
        let la = compose_extended(0o10, 0, 0, 0o5, 1, 0, 0o200);
        let mut engine = engine_with_code(&[la.w()]);
        poke(&engine, 0o202, 0o777);
        engine.set_exec_or_user_x_register(5, IndexRegister::new(Word36::new(0o000001_000002)));

        engine.do_cycle();
        engine.do_cycle();

        assert_eq!(engine.exec_or_user_a_register(0).w(), 0o777);
        assert_eq!(engine.exec_or_user_x_register(5).xm(), 3);
    }

    #[test]
    fn grs_address_reads_register() {
        // LA A1,0o5: relative address 5 names X5 in the GRS.
        let la = compose_extended(0o10, 0, 0o1, 0, 0, 0, 0o5);
        let mut engine = engine_with_code(&[la.w()]);
        engine.general_register_set_mut().set(5, Word36::new(0o31));

        engine.do_cycle();
        engine.do_cycle();

        assert_eq!(engine.exec_or_user_a_register(1).w(), 0o31);
    }

    #[test]
    fn unknown_function_code_posts_invalid_instruction() {
        let mut engine = engine_with_code(&[0o77_0000_000000]);

        engine.do_cycle();
        engine.do_cycle();

        match engine.pending_interrupt() {
            Some(Interrupt::InvalidInstruction { short_status }) => {
                assert_eq!(*short_status, invalid_instruction::BAD_FUNCTION_CODE);
            }
            other => panic!("unexpected pending interrupt: {other:?}"),
        }
    }

    #[test]
    fn fetch_from_void_bank_posts_storage_limits() {
        let mut engine = make_engine();
        engine.do_cycle();

        match engine.pending_interrupt() {
            Some(Interrupt::ReferenceViolation { entry, .. }) => {
                assert_eq!(*entry, ReferenceViolationEntry::StorageLimits);
            }
            other => panic!("unexpected pending interrupt: {other:?}"),
        }
    }

    #[test]
    fn basic_mode_fetch_selects_candidate_bank_and_db31() {
        let nop = compose_basic(0o74, 0o06, 0, 0, 0, 0, 0);
        let mut engine = make_engine();
        let segment_index = engine.storage().allocate(0o1000).unwrap();
        let handle = engine.storage().segment(segment_index).unwrap();
        handle.write().unwrap()[0o300] = Word36::new(nop.w());

        let descriptor = BankDescriptor::new(
            true,
            AccessLock::new(0, 0),
            AccessPermissions::all(),
            AccessPermissions::all(),
            AbsoluteAddress::new(segment_index, 0),
            false,
            0,
            0o777,
            0,
        );
        engine.set_base_register(13, BaseRegister::from_descriptor(&descriptor, handle));
        {
            let dr = &mut engine.activity_state_mut().designator_register;
            dr.basic_mode_enabled = true;
            dr.processor_privilege = 3;
        }
        engine
            .activity_state_mut()
            .program_address_register
            .set_program_counter(0o300);

        engine.do_cycle();

        assert!(engine.activity_state().indicator_key_register.instruction_in_f0);
        assert!(
            engine
                .activity_state()
                .designator_register
                .basic_mode_base_register_selection
        );

        engine.do_cycle();
        assert!(engine.pending_interrupt().is_none());
        assert_eq!(
            engine.activity_state().program_address_register.program_counter(),
            0o301
        );
    }

    #[test]
    fn breakpoint_halt_on_write_stops_engine() {
        let sa = compose_extended(0o01, 0, 0, 0, 0, 0, 0o400);
        let mut engine = engine_with_code(&[sa.w()]);
        let target = engine.base_register(0).relative_to_absolute(0o400);
        engine.set_breakpoint(Some(BreakpointRegister {
            address: target,
            fetch: false,
            read: false,
            write: true,
            halt: true,
        }));

        engine.do_cycle();
        engine.do_cycle();

        assert!(engine.is_stopped());
        assert_eq!(engine.stop_reason().0, StopReason::Breakpoint);
        assert!(
            engine
                .activity_state()
                .indicator_key_register
                .breakpoint_register_match
        );
    }

    /// Full interrupt entry: ICS frame is pushed, B0 is reloaded from the
    /// handler bank named in the Level-0 BDT, and PAR/DR are reset.
    #[test]
    fn interrupt_entry_loads_handler_bank() {
        let mut engine = make_engine();
        let storage = Arc::clone(engine.storage());

        // Handler code bank.
        let handler_segment = storage.allocate(0o100).unwrap();
        let handler_descriptor = code_bank_descriptor(handler_segment, 0o100);

        // Level-0 BDT: vector word for the invalid-instruction class plus
        // the handler descriptor at BDI 0o40.
        let bdt_segment = storage.allocate(0o1000).unwrap();
        let bdt_handle = storage.segment(bdt_segment).unwrap();
        {
            let mut segment = bdt_handle.write().unwrap();
            let class = InterruptClass::InvalidInstruction as u64;
            segment[class as usize] = Word36::new((0o40 << 18) | 0o10); // L=0 BDI=0o40 offset=0o10
            let offset = (0o40 * 8 + 8) as usize;
            handler_descriptor.serialize_into(&mut segment[offset..offset + 8]);
        }
        let bdt_descriptor = code_bank_descriptor(bdt_segment, 0o1000);
        engine.set_base_register(
            L0_BDT_BASE_REGISTER,
            BaseRegister::from_descriptor(&bdt_descriptor, bdt_handle),
        );

        // Interrupt control stack: 16 frames of 8 words.
        let ics_segment = storage.allocate(0o200).unwrap();
        let ics_handle = storage.segment(ics_segment).unwrap();
        let ics_descriptor = code_bank_descriptor(ics_segment, 0o200);
        engine.set_base_register(
            ICS_BASE_REGISTER,
            BaseRegister::from_descriptor(&ics_descriptor, ics_handle),
        );
        engine.general_register_set_mut().set(
            ICS_INDEX_REGISTER,
            Word36::new((0o10 << 18) | 0o200), // XI = frame size 8, XM = stack top
        );

        engine
            .activity_state_mut()
            .program_address_register
            .set_program_counter(0o77);
        engine.clear_stop();
        engine.post_interrupt(Interrupt::InvalidInstruction {
            short_status: invalid_instruction::BAD_FUNCTION_CODE,
        });
        engine.handle_interrupt();

        assert!(!engine.is_stopped());
        assert!(engine.pending_interrupt().is_none());

        let par = engine.activity_state().program_address_register;
        assert_eq!(par.level(), 0);
        assert_eq!(par.bank_descriptor_index(), 0o40);
        assert_eq!(par.program_counter(), 0o10);

        let dr = engine.activity_state().designator_register;
        assert!(dr.exec_register_set_selected);
        assert!(dr.arithmetic_exception_enabled);
        assert!(!dr.fault_handling_in_progress);
        assert_eq!(dr.processor_privilege, 0);

        // The frame landed below the previous stack top.
        let frame_base = engine.general_register_set().index_register(ICS_INDEX_REGISTER).xm();
        assert_eq!(frame_base, 0o170);
        let frame_word = engine.base_register(ICS_BASE_REGISTER).read_word(frame_base).unwrap();
        assert_eq!(frame_word.w() & 0o777777, 0o77); // saved PAR.PC

        assert!(!engine.base_register(0).is_void());
    }

    #[test]
    fn ics_underflow_stops_engine() {
        let mut engine = make_engine();
        let storage = Arc::clone(engine.storage());
        let ics_segment = storage.allocate(0o100).unwrap();
        let ics_handle = storage.segment(ics_segment).unwrap();
        let ics_descriptor = code_bank_descriptor(ics_segment, 0o100);
        engine.set_base_register(
            ICS_BASE_REGISTER,
            BaseRegister::from_descriptor(&ics_descriptor, ics_handle),
        );
        // Frame pointer already at the bottom of the stack.
        engine
            .general_register_set_mut()
            .set(ICS_INDEX_REGISTER, Word36::new(0o10 << 18));

        engine.post_interrupt(Interrupt::SoftwareBreak);
        engine.handle_interrupt();

        assert!(engine.is_stopped());
        assert_eq!(engine.stop_reason().0, StopReason::IcsOverflow);
    }

    #[test]
    fn zeroed_ics_frame_pointer_stops_with_overflow() {
        let mut engine = make_engine();
        let storage = Arc::clone(engine.storage());
        let ics_segment = storage.allocate(0o100).unwrap();
        let ics_handle = storage.segment(ics_segment).unwrap();
        let ics_descriptor = code_bank_descriptor(ics_segment, 0o100);
        engine.set_base_register(
            ICS_BASE_REGISTER,
            BaseRegister::from_descriptor(&ics_descriptor, ics_handle),
        );
        // EX1 still holds its cleared value: frame size and pointer both
        // zero, as after a processor clear.
        engine.post_interrupt(Interrupt::SoftwareBreak);
        engine.handle_interrupt();

        assert!(engine.is_stopped());
        assert_eq!(engine.stop_reason().0, StopReason::IcsOverflow);
    }

    #[test]
    fn hardware_check_during_fault_handling_stops() {
        let mut engine = make_engine();
        engine
            .activity_state_mut()
            .designator_register
            .fault_handling_in_progress = true;
        engine.post_interrupt(Interrupt::HardwareCheck {
            address: AbsoluteAddress::new(1, 2),
        });
        engine.handle_interrupt();

        assert!(engine.is_stopped());
        assert_eq!(
            engine.stop_reason().0,
            StopReason::InterruptHandlerHardwareFailure
        );
    }

    #[test]
    fn lower_class_interrupt_displaces_pending() {
        let mut engine = make_engine();
        engine.post_interrupt(Interrupt::SoftwareBreak);
        engine.post_interrupt(Interrupt::InvalidInstruction {
            short_status: invalid_instruction::BAD_FUNCTION_CODE,
        });
        assert_eq!(
            engine.pending_interrupt().map(Interrupt::class),
            Some(InterruptClass::InvalidInstruction)
        );

        // A lower-priority arrival leaves the pending slot alone.
        engine.post_interrupt(Interrupt::QuantumTimer);
        assert_eq!(
            engine.pending_interrupt().map(Interrupt::class),
            Some(InterruptClass::InvalidInstruction)
        );
    }

    #[test]
    fn basic_mode_indirect_addressing_suspends_then_completes() {
        // LA A0,*0o300 at 0o200, where word 0o300 holds the final address
        // 0o400.
        let la = compose_basic(0o10, 0, 0, 0, 0, 1, 0o300);

        let mut engine = make_engine();
        let segment_index = engine.storage().allocate(0o1000).unwrap();
        let handle = engine.storage().segment(segment_index).unwrap();
        {
            let mut segment = handle.write().unwrap();
            segment[0o200] = Word36::new(la.w());
            segment[0o300] = Word36::new(0o400); // X=0 H=0 I=0 U=0o400
            segment[0o400] = Word36::new(0o4242);
        }
        let descriptor = BankDescriptor::new(
            true,
            AccessLock::new(0, 0),
            AccessPermissions::all(),
            AccessPermissions::all(),
            AbsoluteAddress::new(segment_index, 0),
            false,
            0,
            0o777,
            0,
        );
        engine.set_base_register(12, BaseRegister::from_descriptor(&descriptor, handle));
        {
            let dr = &mut engine.activity_state_mut().designator_register;
            dr.basic_mode_enabled = true;
            dr.processor_privilege = 3;
        }
        engine
            .activity_state_mut()
            .program_address_register
            .set_program_counter(0o200);

        engine.do_cycle(); // fetch
        engine.do_cycle(); // indirect iteration, suspends
        assert!(engine.activity_state().indicator_key_register.instruction_in_f0);
        assert_eq!(engine.exec_or_user_a_register(0).w(), 0);

        engine.do_cycle(); // resumes with the patched F0
        assert_eq!(engine.exec_or_user_a_register(0).w(), 0o4242);
        assert!(engine.pending_interrupt().is_none());
        assert_eq!(
            engine.activity_state().program_address_register.program_counter(),
            0o201
        );
    }
}
