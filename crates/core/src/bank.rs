//! Bank descriptors and base registers.
//!
//! A bank descriptor describes one memory bank as stored in a bank
//! descriptor table. A base register is the processor's normalized view of
//! an active bank: limits reduced to one-word granularity, permissions and
//! lock copied out, and a live handle on the backing storage segment.

use crate::access::{AccessKey, AccessLock, AccessPermissions};
use crate::address::AbsoluteAddress;
use crate::interrupt::{Interrupt, ReferenceViolationEntry};
use crate::storage::SegmentHandle;
use crate::word::Word36;

/// Number of words a bank descriptor occupies in a descriptor table.
pub const BANK_DESCRIPTOR_WORDS: usize = 8;

/// Architectural bank types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u64)]
pub enum BankType {
    ExtendedMode = 0,
    BasicMode = 1,
    Gate = 2,
    Indirect = 3,
    Queue = 4,
    Postern = 5,
    QueueRepository = 6,
    DataExpanse = 7,
}

impl BankType {
    #[must_use]
    pub const fn from_code(code: u64) -> Self {
        match code & 0o7 {
            0 => Self::ExtendedMode,
            1 => Self::BasicMode,
            2 => Self::Gate,
            3 => Self::Indirect,
            4 => Self::Queue,
            5 => Self::Postern,
            6 => Self::QueueRepository,
            _ => Self::DataExpanse,
        }
    }
}

/// One bank descriptor.
///
/// Limits are stored in descriptor granularity: with the large-bank flag
/// clear, the lower limit is in 512-word units and the upper limit in
/// single words; with it set, the lower limit is in 32768-word units and
/// the upper limit in 64-word units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BankDescriptor {
    general_permissions: AccessPermissions,
    special_permissions: AccessPermissions,
    bank_type: BankType,
    general_fault: bool,
    large_bank: bool,
    upper_limit_suppression: bool,
    access_lock: AccessLock,
    indirect_level_and_bdi: u64,
    lower_limit: u64,
    upper_limit: u64,
    inactive: bool,
    displacement: u64,
    base_address: AbsoluteAddress,
    inactive_qbd_next: u64,
}

impl BankDescriptor {
    /// Builds a basic- or extended-mode descriptor from actual word limits,
    /// rounding the limits up to descriptor granularity.
    #[must_use]
    pub fn new(
        basic_mode: bool,
        access_lock: AccessLock,
        general_permissions: AccessPermissions,
        special_permissions: AccessPermissions,
        base_address: AbsoluteAddress,
        large_bank: bool,
        actual_lower_limit: u64,
        actual_upper_limit: u64,
        displacement: u64,
    ) -> Self {
        let mut lower = actual_lower_limit;
        let mut upper = actual_upper_limit;
        if large_bank {
            lower >>= 15;
            if actual_lower_limit & 0o77777 != 0 {
                lower += 1;
            }
            upper >>= 6;
            if actual_upper_limit & 0o77 != 0 {
                upper += 1;
            }
        } else {
            lower >>= 9;
            if actual_lower_limit & 0o777 != 0 {
                lower += 1;
            }
        }

        Self {
            general_permissions,
            special_permissions,
            bank_type: if basic_mode {
                BankType::BasicMode
            } else {
                BankType::ExtendedMode
            },
            general_fault: false,
            large_bank,
            upper_limit_suppression: false,
            access_lock,
            indirect_level_and_bdi: 0,
            lower_limit: lower,
            upper_limit: upper,
            inactive: false,
            displacement,
            base_address,
            inactive_qbd_next: 0,
        }
    }

    #[must_use]
    pub const fn access_lock(&self) -> AccessLock {
        self.access_lock
    }

    #[must_use]
    pub const fn bank_type(&self) -> BankType {
        self.bank_type
    }

    #[must_use]
    pub const fn base_address(&self) -> AbsoluteAddress {
        self.base_address
    }

    #[must_use]
    pub const fn general_permissions(&self) -> AccessPermissions {
        self.general_permissions
    }

    #[must_use]
    pub const fn special_permissions(&self) -> AccessPermissions {
        self.special_permissions
    }

    #[must_use]
    pub const fn indirect_level_and_bdi(&self) -> u64 {
        self.indirect_level_and_bdi
    }

    #[must_use]
    pub const fn is_general_fault(&self) -> bool {
        self.general_fault
    }

    #[must_use]
    pub const fn is_large_bank(&self) -> bool {
        self.large_bank
    }

    #[must_use]
    pub const fn lower_limit(&self) -> u64 {
        self.lower_limit
    }

    #[must_use]
    pub const fn upper_limit(&self) -> u64 {
        self.upper_limit
    }

    /// Lower limit in one-word granularity.
    #[must_use]
    pub const fn lower_limit_normalized(&self) -> u64 {
        if self.large_bank {
            self.lower_limit << 15
        } else {
            self.lower_limit << 9
        }
    }

    /// Upper limit in one-word granularity.
    #[must_use]
    pub const fn upper_limit_normalized(&self) -> u64 {
        if self.large_bank {
            self.upper_limit << 6
        } else {
            self.upper_limit
        }
    }

    pub fn set_base_address(&mut self, base_address: AbsoluteAddress) {
        self.base_address = base_address;
    }

    /// Reads a descriptor out of descriptor-table storage.
    #[must_use]
    pub fn from_storage(buffer: &[Word36]) -> Self {
        let w0 = buffer[0].w();
        let general_permissions = AccessPermissions::from_composite((w0 >> 33) & 0o7);
        let special_permissions = AccessPermissions::from_composite((w0 >> 30) & 0o7);
        let bank_type = BankType::from_code((w0 >> 24) & 0o17);
        let general_fault = w0 & 0o000020_000000 != 0;
        let large_bank = w0 & 0o000004_000000 != 0;
        let upper_limit_suppression = w0 & 0o000002_000000 != 0;
        let access_lock = AccessLock::new((w0 >> 16) & 0o3, w0 & 0xFFFF);

        let w1 = buffer[1].w();
        let mut indirect_level_and_bdi = 0;
        let mut lower_limit = 0;
        let mut upper_limit = 0;
        if bank_type == BankType::Indirect {
            indirect_level_and_bdi = (w1 >> 18) & 0o777777;
        } else {
            lower_limit = (w1 >> 27) & 0o777;
            upper_limit = w1 & 0o777_777777;
        }

        let base_address = AbsoluteAddress::from_composite([buffer[2].w(), buffer[3].w()]);
        let displacement = (buffer[4].w() >> 18) & 0o77777;
        let inactive = buffer[4].is_negative();
        let inactive_qbd_next = if bank_type == BankType::Queue && inactive {
            buffer[3].w()
        } else {
            0
        };

        Self {
            general_permissions,
            special_permissions,
            bank_type,
            general_fault,
            large_bank,
            upper_limit_suppression,
            access_lock,
            indirect_level_and_bdi,
            lower_limit,
            upper_limit,
            inactive,
            displacement,
            base_address,
            inactive_qbd_next,
        }
    }

    /// Writes the descriptor into descriptor-table storage.
    pub fn serialize_into(&self, buffer: &mut [Word36]) {
        let mut w0 = 0u64;
        w0 |= self.general_permissions.composite() << 33;
        w0 |= self.special_permissions.composite() << 30;
        w0 |= (self.bank_type as u64) << 24;
        if self.general_fault {
            w0 |= 0o000020_000000;
        }
        if self.large_bank {
            w0 |= 0o000004_000000;
        }
        if self.upper_limit_suppression {
            w0 |= 0o000002_000000;
        }
        w0 |= self.access_lock.composite();

        let w1 = if self.bank_type == BankType::Indirect {
            self.indirect_level_and_bdi << 18
        } else {
            (self.lower_limit << 27) | self.upper_limit
        };

        let composite = self.base_address.composite();
        let w2 = composite[0];
        let w3 = if self.bank_type == BankType::Queue && self.inactive {
            self.inactive_qbd_next
        } else {
            composite[1]
        };

        let mut w4 = (self.displacement & 0o77777) << 18;
        if self.inactive {
            w4 |= 0o400000_000000;
        }

        buffer[0].set_w(w0);
        buffer[1].set_w(w1);
        buffer[2].set_w(w2);
        buffer[3].set_w(w3);
        buffer[4].set_w(w4);
        buffer[5].set_w(0);
        buffer[6].set_w(0);
        buffer[7].set_w(0);
    }
}

/// The processor's normalized view of one active bank.
#[derive(Clone)]
pub struct BaseRegister {
    access_lock: AccessLock,
    base_address: AbsoluteAddress,
    general_permissions: AccessPermissions,
    special_permissions: AccessPermissions,
    large_bank: bool,
    lower_limit_normalized: u64,
    upper_limit_normalized: u64,
    void_flag: bool,
    storage: Option<SegmentHandle>,
}

impl Default for BaseRegister {
    fn default() -> Self {
        Self::void()
    }
}

impl BaseRegister {
    /// A register describing no bank.
    #[must_use]
    pub fn void() -> Self {
        Self {
            access_lock: AccessLock::default(),
            base_address: AbsoluteAddress::default(),
            general_permissions: AccessPermissions::default(),
            special_permissions: AccessPermissions::default(),
            large_bank: false,
            lower_limit_normalized: 0,
            upper_limit_normalized: 0,
            void_flag: true,
            storage: None,
        }
    }

    /// Loads the register from a bank descriptor and the handle of the
    /// segment holding the bank.
    #[must_use]
    pub fn from_descriptor(descriptor: &BankDescriptor, storage: SegmentHandle) -> Self {
        Self {
            access_lock: descriptor.access_lock(),
            base_address: descriptor.base_address(),
            general_permissions: descriptor.general_permissions(),
            special_permissions: descriptor.special_permissions(),
            large_bank: descriptor.is_large_bank(),
            lower_limit_normalized: descriptor.lower_limit_normalized(),
            upper_limit_normalized: descriptor.upper_limit_normalized(),
            void_flag: false,
            storage: Some(storage),
        }
    }

    /// Loads the register from a descriptor while subsetting the bank:
    /// both limits shift down by `offset` (lower clamped to zero), the
    /// base address advances by `offset`, enter permission is dropped, and
    /// the register is voided when the shifted upper limit falls below the
    /// lower limit.
    #[must_use]
    pub fn from_descriptor_subsetting(
        descriptor: &BankDescriptor,
        offset: u64,
        storage: SegmentHandle,
    ) -> Self {
        let lower = descriptor.lower_limit_normalized().saturating_sub(offset);
        let upper_raw = descriptor.upper_limit_normalized();
        let void_flag = upper_raw < offset || upper_raw - offset < lower;
        let upper = upper_raw.saturating_sub(offset);

        let base = descriptor.base_address();
        Self {
            access_lock: descriptor.access_lock(),
            base_address: base.with_offset(base.offset() + offset),
            general_permissions: descriptor.general_permissions().without_enter(),
            special_permissions: descriptor.special_permissions().without_enter(),
            large_bank: descriptor.is_large_bank(),
            lower_limit_normalized: lower,
            upper_limit_normalized: upper,
            void_flag,
            storage: if void_flag { None } else { Some(storage) },
        }
    }

    #[must_use]
    pub const fn is_void(&self) -> bool {
        self.void_flag
    }

    #[must_use]
    pub const fn is_large_bank(&self) -> bool {
        self.large_bank
    }

    #[must_use]
    pub const fn base_address(&self) -> AbsoluteAddress {
        self.base_address
    }

    #[must_use]
    pub const fn access_lock(&self) -> AccessLock {
        self.access_lock
    }

    #[must_use]
    pub const fn lower_limit_normalized(&self) -> u64 {
        self.lower_limit_normalized
    }

    #[must_use]
    pub const fn upper_limit_normalized(&self) -> u64 {
        self.upper_limit_normalized
    }

    #[must_use]
    pub const fn storage(&self) -> Option<&SegmentHandle> {
        self.storage.as_ref()
    }

    /// Verifies that `relative_address` lies within the normalized limits.
    pub fn check_limits(&self, relative_address: u64, fetch: bool) -> Result<(), Interrupt> {
        if self.void_flag
            || relative_address < self.lower_limit_normalized
            || relative_address > self.upper_limit_normalized
        {
            Err(Interrupt::ReferenceViolation {
                entry: ReferenceViolationEntry::StorageLimits,
                fetch_operation: fetch,
            })
        } else {
            Ok(())
        }
    }

    /// Effective permissions for `key` through this register's lock.
    #[must_use]
    pub const fn effective_permissions(&self, key: &AccessKey) -> AccessPermissions {
        self.access_lock
            .effective_permissions(key, self.special_permissions, self.general_permissions)
    }

    /// Absolute address of `relative_address` within the bank.
    #[must_use]
    pub const fn relative_to_absolute(&self, relative_address: u64) -> AbsoluteAddress {
        self.base_address
            .with_offset(self.base_address.offset() + relative_address - self.lower_limit_normalized)
    }

    /// Reads one word by relative address. Callers check limits first.
    pub fn read_word(&self, relative_address: u64) -> Result<Word36, Interrupt> {
        let address = self.relative_to_absolute(relative_address);
        let handle = self.storage.as_ref().ok_or(Interrupt::HardwareCheck { address })?;
        let segment = handle.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        segment
            .get(address.offset() as usize)
            .copied()
            .ok_or(Interrupt::HardwareCheck { address })
    }

    /// Writes one word by relative address. Callers check limits first.
    pub fn write_word(&self, relative_address: u64, value: Word36) -> Result<(), Interrupt> {
        let address = self.relative_to_absolute(relative_address);
        let handle = self.storage.as_ref().ok_or(Interrupt::HardwareCheck { address })?;
        let mut segment = handle.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let offset = address.offset() as usize;
        if offset >= segment.len() {
            return Err(Interrupt::HardwareCheck { address });
        }
        segment[offset] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, RwLock};

    fn handle(len: usize) -> SegmentHandle {
        Arc::new(RwLock::new(vec![Word36::default(); len]))
    }

    fn small_descriptor(lower: u64, upper: u64) -> BankDescriptor {
        BankDescriptor::new(
            false,
            AccessLock::new(0, 0),
            AccessPermissions::all(),
            AccessPermissions::all(),
            AbsoluteAddress::new(1, 0),
            false,
            lower,
            upper,
            0,
        )
    }

    #[test]
    fn limit_normalization_small_bank() {
        let bd = small_descriptor(0o1000, 0o1777);
        assert_eq!(bd.lower_limit(), 1);
        assert_eq!(bd.lower_limit_normalized(), 0o1000);
        assert_eq!(bd.upper_limit_normalized(), 0o1777);

        // Unaligned lower limit rounds up a granule.
        let bd = small_descriptor(0o1001, 0o1777);
        assert_eq!(bd.lower_limit_normalized(), 0o2000);
    }

    #[test]
    fn limit_normalization_large_bank() {
        let bd = BankDescriptor::new(
            false,
            AccessLock::new(0, 0),
            AccessPermissions::all(),
            AccessPermissions::all(),
            AbsoluteAddress::new(1, 0),
            true,
            0o100000,
            0o100077,
            0,
        );
        assert_eq!(bd.lower_limit_normalized(), 0o100000);
        assert_eq!(bd.upper_limit_normalized(), 0o100100);
    }

    #[test]
    fn descriptor_storage_round_trip() {
        let bd = BankDescriptor::new(
            true,
            AccessLock::new(2, 0o1234),
            AccessPermissions::new(true, true, false),
            AccessPermissions::all(),
            AbsoluteAddress::new(0o42, 0o1000),
            false,
            0,
            0o777,
            0o321,
        );
        let mut buffer = [Word36::default(); BANK_DESCRIPTOR_WORDS];
        bd.serialize_into(&mut buffer);
        assert_eq!(BankDescriptor::from_storage(&buffer), bd);
    }

    #[test]
    fn base_register_limits() {
        let bd = small_descriptor(0o1000, 0o1777);
        let br = BaseRegister::from_descriptor(&bd, handle(0o2000));

        assert!(br.check_limits(0o1000, false).is_ok());
        assert!(br.check_limits(0o1777, false).is_ok());
        assert!(matches!(
            br.check_limits(0o777, true),
            Err(Interrupt::ReferenceViolation {
                entry: ReferenceViolationEntry::StorageLimits,
                fetch_operation: true,
            })
        ));
        assert!(br.check_limits(0o2000, false).is_err());
    }

    #[test]
    fn void_register_fails_limits() {
        let br = BaseRegister::void();
        assert!(br.check_limits(0, false).is_err());
    }

    #[test]
    fn subsetting_drops_enter_and_shifts_limits() {
        let bd = small_descriptor(0, 0o1777);
        let br = BaseRegister::from_descriptor_subsetting(&bd, 0o1000, handle(0o2000));
        assert!(!br.is_void());
        assert_eq!(br.lower_limit_normalized(), 0);
        assert_eq!(br.upper_limit_normalized(), 0o777);
        assert_eq!(br.base_address().offset(), 0o1000);
        let perms = br.effective_permissions(&AccessKey::master());
        assert!(!perms.enter);
        assert!(perms.read);
    }

    #[test]
    fn subsetting_past_upper_limit_voids() {
        let bd = small_descriptor(0, 0o777);
        let br = BaseRegister::from_descriptor_subsetting(&bd, 0o2000, handle(0o1000));
        assert!(br.is_void());
    }

    #[test]
    fn relative_to_absolute_accounts_for_lower_limit() {
        let bd = small_descriptor(0o1000, 0o1777);
        let br = BaseRegister::from_descriptor(&bd, handle(0o1000));
        let addr = br.relative_to_absolute(0o1005);
        assert_eq!(addr.segment(), 1);
        assert_eq!(addr.offset(), 5);
    }

    #[test]
    fn read_write_through_register() {
        let bd = small_descriptor(0, 0o77);
        let br = BaseRegister::from_descriptor(&bd, handle(0o100));
        br.write_word(0o10, Word36::new(0o1234)).unwrap();
        assert_eq!(br.read_word(0o10).unwrap().w(), 0o1234);
    }
}
