//! Main storage: segment allocation and the per-address lock table.
//!
//! Storage is a map of independently sized segments, each a `Vec<Word36>`
//! behind a shared handle so base registers can reference bank backing
//! storage while the segment map itself stays behind one mutex. Freed
//! segment indices are recycled in LIFO order.
//!
//! The lock table serializes read-modify-write instructions across engines.
//! Locks are keyed by virtual address composite and owned by a client
//! identifier; exactly one lock table is shared among all engines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::address::AbsoluteAddress;
use crate::interrupt::Interrupt;
use crate::word::Word36;

/// Shared handle to one storage segment.
pub type SegmentHandle = Arc<RwLock<Vec<Word36>>>;

/// Errors from segment management that do not surface as interrupts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("main storage segment table is full")]
    SegmentTableFull,
}

struct StorageInner {
    segments: HashMap<u32, SegmentHandle>,
    free_segment_indices: Vec<u32>,
    next_segment_index: u32,
}

/// The segment map with its recycling free list.
pub struct MainStorage {
    inner: Mutex<StorageInner>,
    max_segments: usize,
}

impl MainStorage {
    #[must_use]
    pub fn new(max_segments: usize) -> Self {
        Self {
            inner: Mutex::new(StorageInner {
                segments: HashMap::new(),
                free_segment_indices: Vec::new(),
                next_segment_index: 0,
            }),
            max_segments,
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, StorageInner> {
        // Lock table and segment map invariants hold across panics only in
        // the sense that a poisoned map is unrecoverable anyway.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Allocates a zero-filled segment of `length` words and returns its
    /// index. Freed indices are reused most-recently-freed first.
    pub fn allocate(&self, length: usize) -> Result<u32, StorageError> {
        let mut inner = self.lock_inner();
        if inner.segments.len() >= self.max_segments {
            return Err(StorageError::SegmentTableFull);
        }

        let segment = match inner.free_segment_indices.pop() {
            Some(index) => index,
            None => {
                let index = inner.next_segment_index;
                inner.next_segment_index += 1;
                index
            }
        };

        inner
            .segments
            .insert(segment, Arc::new(RwLock::new(vec![Word36::default(); length])));
        Ok(segment)
    }

    /// Drops all segments and resets the free list.
    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        inner.segments.clear();
        inner.free_segment_indices.clear();
        inner.next_segment_index = 0;
    }

    /// Shared handle to the given segment.
    pub fn segment(&self, segment_index: u32) -> Result<SegmentHandle, Interrupt> {
        let inner = self.lock_inner();
        inner.segments.get(&segment_index).cloned().ok_or_else(|| {
            Interrupt::HardwareCheck {
                address: AbsoluteAddress::new(segment_index, 0),
            }
        })
    }

    /// Shared handle to the segment of `address`, verifying that
    /// `offset + length` words fit within it.
    pub fn slice_handle(
        &self,
        address: AbsoluteAddress,
        length: u64,
    ) -> Result<SegmentHandle, Interrupt> {
        let handle = self.segment(address.segment())?;
        let within = {
            let segment = handle.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            address.offset() + length <= segment.len() as u64
        };
        if within {
            Ok(handle)
        } else {
            Err(Interrupt::HardwareCheck { address })
        }
    }

    /// Reads one word of storage.
    pub fn get_word(&self, address: AbsoluteAddress) -> Result<Word36, Interrupt> {
        let handle = self.segment(address.segment())?;
        let segment = handle.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        segment
            .get(address.offset() as usize)
            .copied()
            .ok_or(Interrupt::HardwareCheck { address })
    }

    /// Writes one word of storage.
    pub fn set_word(&self, address: AbsoluteAddress, value: Word36) -> Result<(), Interrupt> {
        let handle = self.segment(address.segment())?;
        let mut segment = handle.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let offset = address.offset() as usize;
        if offset >= segment.len() {
            return Err(Interrupt::HardwareCheck { address });
        }
        segment[offset] = value;
        Ok(())
    }

    /// Releases a segment, returning its index to the free list.
    pub fn release(&self, segment_index: u32) -> Result<(), Interrupt> {
        let mut inner = self.lock_inner();
        if inner.segments.remove(&segment_index).is_none() {
            return Err(Interrupt::HardwareCheck {
                address: AbsoluteAddress::new(segment_index, 0),
            });
        }
        inner.free_segment_indices.push(segment_index);
        Ok(())
    }

    /// Grows or shrinks a segment in place, preserving its prefix.
    pub fn resize(&self, segment_index: u32, length: usize) -> Result<(), Interrupt> {
        let inner = self.lock_inner();
        let handle = inner.segments.get(&segment_index).ok_or_else(|| {
            Interrupt::HardwareCheck {
                address: AbsoluteAddress::new(segment_index, 0),
            }
        })?;
        let mut segment = handle.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        segment.resize(length, Word36::default());
        Ok(())
    }

    /// Number of allocated segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.lock_inner().segments.len()
    }
}

/// Identifier of a lock-holding engine.
pub type StorageLockClient = u64;

/// The shared per-address lock table.
///
/// Protects the integrity of read-modify-write instructions (increments,
/// test-and-set and friends) across engines. Exactly one instance is
/// shared among all engines operating on the same storage.
#[derive(Default)]
pub struct StorageLocks {
    locks: Mutex<HashMap<u64, StorageLockClient>>,
}

const LOCK_WAIT: Duration = Duration::from_millis(1);

impl StorageLocks {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<u64, StorageLockClient>> {
        self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Attempts to take the lock for `address`; returns false if any
    /// client (including the caller) already holds it.
    pub fn lock(&self, address: u64, client: StorageLockClient) -> bool {
        let mut locks = self.lock_map();
        if locks.contains_key(&address) {
            return false;
        }
        locks.insert(address, client);
        true
    }

    /// Takes the lock for `address`, polling until it becomes free. The
    /// table mutex is released across each sleep.
    pub fn lock_wait(&self, address: u64, client: StorageLockClient) {
        loop {
            {
                let mut locks = self.lock_map();
                if !locks.contains_key(&address) {
                    locks.insert(address, client);
                    return;
                }
            }
            thread::sleep(LOCK_WAIT);
        }
    }

    /// Releases the lock for `address` if `client` holds it.
    pub fn release(&self, address: u64, client: StorageLockClient) -> bool {
        let mut locks = self.lock_map();
        match locks.get(&address) {
            Some(&holder) if holder == client => {
                locks.remove(&address);
                true
            }
            _ => false,
        }
    }

    /// Releases every lock held by `client`.
    pub fn release_all(&self, client: StorageLockClient) {
        let mut locks = self.lock_map();
        locks.retain(|_, holder| *holder != client);
    }

    /// Number of held locks.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.lock_map().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_access() {
        let storage = MainStorage::new(16);
        let seg = storage.allocate(32).unwrap();
        let addr = AbsoluteAddress::new(seg, 5);

        assert_eq!(storage.get_word(addr).unwrap(), Word36::default());
        storage.set_word(addr, Word36::new(0o123)).unwrap();
        assert_eq!(storage.get_word(addr).unwrap().w(), 0o123);
    }

    #[test]
    fn out_of_range_access_is_hardware_check() {
        let storage = MainStorage::new(16);
        let seg = storage.allocate(8).unwrap();
        let addr = AbsoluteAddress::new(seg, 8);
        assert!(matches!(
            storage.get_word(addr),
            Err(Interrupt::HardwareCheck { .. })
        ));

        let missing = AbsoluteAddress::new(seg + 1, 0);
        assert!(matches!(
            storage.get_word(missing),
            Err(Interrupt::HardwareCheck { .. })
        ));
    }

    #[test]
    fn released_index_is_recycled_lifo() {
        let storage = MainStorage::new(16);
        let s0 = storage.allocate(4).unwrap();
        let s1 = storage.allocate(4).unwrap();
        let s2 = storage.allocate(4).unwrap();

        storage.release(s1).unwrap();
        storage.release(s2).unwrap();

        assert_eq!(storage.allocate(4).unwrap(), s2);
        assert_eq!(storage.allocate(4).unwrap(), s1);
        assert_ne!(s0, s1);
    }

    #[test]
    fn allocation_respects_segment_cap() {
        let storage = MainStorage::new(2);
        storage.allocate(4).unwrap();
        storage.allocate(4).unwrap();
        assert_eq!(storage.allocate(4), Err(StorageError::SegmentTableFull));
    }

    #[test]
    fn resize_preserves_prefix() {
        let storage = MainStorage::new(16);
        let seg = storage.allocate(4).unwrap();
        storage.set_word(AbsoluteAddress::new(seg, 3), Word36::new(0o77)).unwrap();

        storage.resize(seg, 8).unwrap();
        assert_eq!(storage.get_word(AbsoluteAddress::new(seg, 3)).unwrap().w(), 0o77);
        assert_eq!(storage.get_word(AbsoluteAddress::new(seg, 7)).unwrap().w(), 0);

        storage.resize(seg, 2).unwrap();
        assert!(storage.get_word(AbsoluteAddress::new(seg, 3)).is_err());
    }

    #[test]
    fn lock_round_trip() {
        let locks = StorageLocks::new();
        assert!(locks.lock(0o1000, 1));
        assert!(!locks.lock(0o1000, 2));
        assert!(!locks.release(0o1000, 2));
        assert!(locks.release(0o1000, 1));
        assert!(locks.lock(0o1000, 2));
    }

    #[test]
    fn release_all_clears_only_own_locks() {
        let locks = StorageLocks::new();
        assert!(locks.lock(0o100, 1));
        assert!(locks.lock(0o200, 1));
        assert!(locks.lock(0o300, 2));

        locks.release_all(1);
        assert_eq!(locks.held_count(), 1);
        assert!(locks.lock(0o100, 2));
        assert!(!locks.lock(0o300, 1));
    }

    #[test]
    fn lock_wait_blocks_until_release() {
        let locks = StorageLocks::new();
        assert!(locks.lock(0o500, 1));

        let contender = Arc::clone(&locks);
        let handle = thread::spawn(move || {
            contender.lock_wait(0o500, 2);
        });

        thread::sleep(Duration::from_millis(5));
        assert!(locks.release(0o500, 1));
        handle.join().unwrap();
        assert!(!locks.lock(0o500, 1));
    }
}
