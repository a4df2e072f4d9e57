//! File-backed fixed-block disk device.
//!
//! The backing store begins with a 32-byte header describing the pack
//! geometry; user blocks are 1-indexed behind it, so block N lives at file
//! offset `bytes_per_block * (N + 1)`. A pack must be prepped before it
//! accepts reads or writes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, PoisonError};

use mainframe_core::convert::{
    deserialize_u32_be, deserialize_u64_be, serialize_u32_be, serialize_u64_be,
};
use tracing::debug;

use crate::packets::{DiskIoPacket, IoFunction, IoStatus, MountInfo, PrepInfo};

/// Identifier bytes at the front of every prepped pack.
pub const HEADER_MAGIC: &[u8; 8] = b"*FSDISK*";

/// Size of the pack header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Words per track.
pub const TRACK_WORDS: u64 = 1792;

/// Smallest pack a prep will accept.
pub const MINIMUM_TRACK_COUNT: u64 = 10_000;

/// Valid prep factors (words per block) and the packed byte size of one
/// block at each.
const PREP_FACTOR_TABLE: [(u32, u32); 7] = [
    (28, 128),
    (56, 256),
    (112, 512),
    (224, 1024),
    (448, 2048),
    (896, 4096),
    (1792, 8192),
];

/// Bytes per block for a prep factor, or None if the factor is not valid.
#[must_use]
pub fn block_size_for_prep_factor(prep_factor: u32) -> Option<u32> {
    PREP_FACTOR_TABLE
        .iter()
        .find(|(pf, _)| *pf == prep_factor)
        .map(|(_, bytes)| *bytes)
}

/// Pack names are one to six characters, the first alphabetic, the rest
/// alphanumeric, all upper case.
#[must_use]
pub fn is_valid_pack_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 6
        && first.is_ascii_uppercase()
        && chars.all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
}

/// Geometry of a prepped pack, as recorded in its header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskGeometry {
    pub bytes_per_block: u32,
    pub prep_factor: u32,
    pub block_count: u64,
    pub track_count: u64,
}

impl DiskGeometry {
    /// Builds the geometry a prep with the given parameters produces.
    /// Returns None for an invalid prep factor.
    #[must_use]
    pub fn from_prep(prep_factor: u32, track_count: u64) -> Option<Self> {
        let bytes_per_block = block_size_for_prep_factor(prep_factor)?;
        let blocks_per_track = TRACK_WORDS / u64::from(prep_factor);
        Some(Self {
            bytes_per_block,
            prep_factor,
            block_count: track_count * blocks_per_track,
            track_count,
        })
    }

    /// Header image: magic, block size, prep factor, block count, track
    /// count, all big-endian.
    #[must_use]
    pub fn to_header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0_u8; HEADER_SIZE];
        header[0..8].copy_from_slice(HEADER_MAGIC);
        serialize_u32_be(self.bytes_per_block, &mut header[8..12]);
        serialize_u32_be(self.prep_factor, &mut header[12..16]);
        serialize_u64_be(self.block_count, &mut header[16..24]);
        serialize_u64_be(self.track_count, &mut header[24..32]);
        header
    }

    /// Parses a header image, validating the magic and prep factor.
    #[must_use]
    pub fn from_header(header: &[u8; HEADER_SIZE]) -> Option<Self> {
        if &header[0..8] != HEADER_MAGIC {
            return None;
        }
        let bytes_per_block = deserialize_u32_be(&header[8..12]);
        let prep_factor = deserialize_u32_be(&header[12..16]);
        if block_size_for_prep_factor(prep_factor) != Some(bytes_per_block) {
            return None;
        }
        Some(Self {
            bytes_per_block,
            prep_factor,
            block_count: deserialize_u64_be(&header[16..24]),
            track_count: deserialize_u64_be(&header[24..32]),
        })
    }
}

#[derive(Debug, Default)]
struct DiskState {
    file: Option<File>,
    geometry: Option<DiskGeometry>,
    is_ready: bool,
    is_write_protected: bool,
}

/// A disk device backed by a file in the host filesystem. All operations
/// serialize under an internal mutex; `start_io` leaves a terminal status
/// in the packet.
#[derive(Debug, Default)]
pub struct FileSystemDiskDevice {
    state: Mutex<DiskState>,
}

impl FileSystemDiskDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.lock_state().file.is_some()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lock_state().is_ready
    }

    #[must_use]
    pub fn is_write_protected(&self) -> bool {
        self.lock_state().is_write_protected
    }

    /// Geometry of the mounted pack, if it has been prepped.
    #[must_use]
    pub fn geometry(&self) -> Option<DiskGeometry> {
        self.lock_state().geometry
    }

    /// Runs one operation to completion.
    pub fn start_io(&self, packet: &mut DiskIoPacket) {
        packet.status = IoStatus::InProgress;
        let mut state = self.lock_state();
        packet.status = match packet.function {
            IoFunction::Mount => Self::do_mount(&mut state, packet.mount_info.as_ref()),
            IoFunction::Prep => Self::do_prep(&mut state, packet.prep_info.as_ref()),
            IoFunction::Read => Self::do_read(&mut state, packet.block_id, packet.buffer.as_mut()),
            IoFunction::Reset => Self::do_reset(&state),
            IoFunction::Unmount => Self::do_unmount(&mut state),
            IoFunction::Write => {
                Self::do_write(&mut state, packet.block_id, packet.buffer.as_deref())
            }
            _ => IoStatus::InvalidFunction,
        };
        debug!(function = %packet.function, status = %packet.status, "disk io");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn do_mount(state: &mut DiskState, info: Option<&MountInfo>) -> IoStatus {
        let Some(info) = info else {
            return IoStatus::InvalidPacket;
        };
        if state.file.is_some() {
            return IoStatus::MediaAlreadyMounted;
        }

        let open = OpenOptions::new()
            .read(true)
            .write(!info.write_protect)
            .create(!info.write_protect)
            .open(&info.path);
        let mut file = match open {
            Ok(file) => file,
            Err(err) => {
                debug!(path = %info.path.display(), %err, "mount failed");
                return IoStatus::SystemError;
            }
        };

        // An unreadable header leaves the unit mounted and ready so that a
        // subsequent prep can initialize the pack.
        let mut header = [0_u8; HEADER_SIZE];
        let geometry = match read_exact_at(&mut file, 0, &mut header) {
            Ok(()) => DiskGeometry::from_header(&header),
            Err(_) => None,
        };

        state.file = Some(file);
        state.geometry = geometry;
        state.is_ready = true;
        state.is_write_protected = info.write_protect;
        if state.geometry.is_some() {
            IoStatus::Complete
        } else {
            IoStatus::PackNotPrepped
        }
    }

    fn do_prep(state: &mut DiskState, info: Option<&PrepInfo>) -> IoStatus {
        let Some(info) = info else {
            return IoStatus::InvalidPacket;
        };
        if !state.is_ready {
            return IoStatus::DeviceIsNotReady;
        }
        let Some(geometry) = DiskGeometry::from_prep(info.prep_factor, info.track_count) else {
            return IoStatus::InvalidPrepFactor;
        };
        if info.track_count < MINIMUM_TRACK_COUNT {
            return IoStatus::InvalidTrackCount;
        }
        if !is_valid_pack_name(&info.pack_name) {
            return IoStatus::InvalidPackName;
        }

        let Some(file) = state.file.as_mut() else {
            return IoStatus::MediaNotMounted;
        };
        if write_all_at(file, 0, &geometry.to_header()).is_err() {
            return IoStatus::SystemError;
        }
        state.geometry = Some(geometry);
        IoStatus::Complete
    }

    fn do_read(state: &mut DiskState, block_id: u64, buffer: Option<&mut Vec<u8>>) -> IoStatus {
        if !state.is_ready {
            return IoStatus::DeviceIsNotReady;
        }
        let Some(buffer) = buffer else {
            return IoStatus::NilBuffer;
        };
        let Some(geometry) = state.geometry else {
            return IoStatus::PackNotPrepped;
        };
        if buffer.len() != geometry.bytes_per_block as usize {
            return IoStatus::InvalidBufferSize;
        }
        if block_id >= geometry.block_count {
            return IoStatus::InvalidBlockId;
        }

        let Some(file) = state.file.as_mut() else {
            return IoStatus::MediaNotMounted;
        };
        let offset = u64::from(geometry.bytes_per_block) * (block_id + 1);
        match read_exact_at(file, offset, buffer) {
            Ok(()) => IoStatus::Complete,
            Err(_) => IoStatus::SystemError,
        }
    }

    fn do_write(state: &mut DiskState, block_id: u64, buffer: Option<&[u8]>) -> IoStatus {
        if !state.is_ready {
            return IoStatus::DeviceIsNotReady;
        }
        let Some(buffer) = buffer else {
            return IoStatus::NilBuffer;
        };
        let Some(geometry) = state.geometry else {
            return IoStatus::PackNotPrepped;
        };
        if buffer.len() != geometry.bytes_per_block as usize {
            return IoStatus::InvalidBufferSize;
        }
        if block_id >= geometry.block_count {
            return IoStatus::InvalidBlockId;
        }
        if state.is_write_protected {
            return IoStatus::WriteProtected;
        }

        let Some(file) = state.file.as_mut() else {
            return IoStatus::MediaNotMounted;
        };
        let offset = u64::from(geometry.bytes_per_block) * (block_id + 1);
        match write_all_at(file, offset, buffer) {
            Ok(()) => IoStatus::Complete,
            Err(_) => IoStatus::SystemError,
        }
    }

    fn do_reset(state: &DiskState) -> IoStatus {
        if state.is_ready {
            IoStatus::Complete
        } else {
            IoStatus::DeviceIsNotReady
        }
    }

    fn do_unmount(state: &mut DiskState) -> IoStatus {
        if state.file.take().is_none() {
            return IoStatus::MediaNotMounted;
        }
        state.geometry = None;
        state.is_ready = false;
        IoStatus::Complete
    }
}

fn read_exact_at(file: &mut File, offset: u64, buffer: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buffer)
}

fn write_all_at(file: &mut File, offset: u64, buffer: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buffer)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn scratch_pack(dir: &TempDir) -> MountInfo {
        MountInfo {
            path: dir.path().join("pack.dsk"),
            write_protect: false,
        }
    }

    fn mounted_prepped_device(dir: &TempDir) -> FileSystemDiskDevice {
        let device = FileSystemDiskDevice::new();
        let mut packet = DiskIoPacket::mount(scratch_pack(dir));
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::PackNotPrepped);

        let mut packet = DiskIoPacket::prep(PrepInfo {
            prep_factor: 28,
            track_count: 10_000,
            pack_name: "TEST01".into(),
        });
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        device
    }

    #[rstest]
    #[case(28, Some(128))]
    #[case(56, Some(256))]
    #[case(1792, Some(8192))]
    #[case(27, None)]
    #[case(0, None)]
    fn prep_factor_table(#[case] prep_factor: u32, #[case] expected: Option<u32>) {
        assert_eq!(block_size_for_prep_factor(prep_factor), expected);
    }

    #[rstest]
    #[case("A", true)]
    #[case("TEST01", true)]
    #[case("", false)]
    #[case("1TEST", false)]
    #[case("lower", false)]
    #[case("TOOLONG", false)]
    fn pack_name_validation(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(is_valid_pack_name(name), valid);
    }

    #[test]
    fn header_round_trip() {
        let geometry = DiskGeometry::from_prep(56, 12_000).unwrap();
        let header = geometry.to_header();
        assert_eq!(&header[0..8], HEADER_MAGIC);
        assert_eq!(DiskGeometry::from_header(&header), Some(geometry));
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut header = DiskGeometry::from_prep(28, 10_000).unwrap().to_header();
        header[0] = b'X';
        assert_eq!(DiskGeometry::from_header(&header), None);
    }

    #[test]
    fn prep_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let device = mounted_prepped_device(&dir);
        assert_eq!(
            device.geometry(),
            Some(DiskGeometry {
                bytes_per_block: 128,
                prep_factor: 28,
                block_count: 640_000,
                track_count: 10_000,
            })
        );

        let payload: Vec<u8> = (0..128).map(|b| b as u8).collect();
        let mut packet = DiskIoPacket::write(5, payload.clone());
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);

        let mut packet = DiskIoPacket::read(5, vec![0; 128]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        assert_eq!(packet.buffer.unwrap(), payload);
    }

    #[test]
    fn remount_recovers_geometry_from_header() {
        let dir = TempDir::new().unwrap();
        let device = mounted_prepped_device(&dir);
        let geometry = device.geometry();

        let mut packet = DiskIoPacket::new(IoFunction::Unmount);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        assert!(!device.is_ready());

        let mut packet = DiskIoPacket::mount(scratch_pack(&dir));
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        assert_eq!(device.geometry(), geometry);
    }

    #[test]
    fn last_block_writable_but_block_count_is_not() {
        let dir = TempDir::new().unwrap();
        let device = mounted_prepped_device(&dir);
        let block_count = device.geometry().unwrap().block_count;

        let mut packet = DiskIoPacket::write(block_count - 1, vec![0; 128]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);

        let mut packet = DiskIoPacket::write(block_count, vec![0; 128]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidBlockId);
    }

    #[test]
    fn wrong_buffer_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        let device = mounted_prepped_device(&dir);

        let mut packet = DiskIoPacket::write(0, vec![0; 64]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidBufferSize);
    }

    #[test]
    fn write_protected_pack_rejects_writes() {
        let dir = TempDir::new().unwrap();
        {
            let device = mounted_prepped_device(&dir);
            let mut packet = DiskIoPacket::write(0, vec![0x42; 128]);
            device.start_io(&mut packet);
            assert_eq!(packet.status, IoStatus::Complete);
            let mut packet = DiskIoPacket::new(IoFunction::Unmount);
            device.start_io(&mut packet);
        }

        let device = FileSystemDiskDevice::new();
        let mut packet = DiskIoPacket::mount(MountInfo {
            path: dir.path().join("pack.dsk"),
            write_protect: true,
        });
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);

        let mut packet = DiskIoPacket::write(0, vec![0; 128]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::WriteProtected);

        let mut packet = DiskIoPacket::read(0, vec![0; 128]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
    }

    #[test]
    fn prep_validates_parameters() {
        let dir = TempDir::new().unwrap();
        let device = FileSystemDiskDevice::new();
        let mut packet = DiskIoPacket::mount(scratch_pack(&dir));
        device.start_io(&mut packet);

        let mut packet = DiskIoPacket::prep(PrepInfo {
            prep_factor: 100,
            track_count: 10_000,
            pack_name: "TEST01".into(),
        });
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidPrepFactor);

        let mut packet = DiskIoPacket::prep(PrepInfo {
            prep_factor: 28,
            track_count: 9_999,
            pack_name: "TEST01".into(),
        });
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidTrackCount);

        let mut packet = DiskIoPacket::prep(PrepInfo {
            prep_factor: 28,
            track_count: 10_000,
            pack_name: "0BAD".into(),
        });
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidPackName);
    }

    #[test]
    fn operations_require_mount_and_prep() {
        let device = FileSystemDiskDevice::new();
        let mut packet = DiskIoPacket::read(0, vec![0; 128]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::DeviceIsNotReady);

        let dir = TempDir::new().unwrap();
        let mut packet = DiskIoPacket::mount(scratch_pack(&dir));
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::PackNotPrepped);

        let mut packet = DiskIoPacket::read(0, vec![0; 128]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::PackNotPrepped);

        let mut packet = DiskIoPacket::mount(scratch_pack(&dir));
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::MediaAlreadyMounted);
    }

    #[test]
    fn tape_functions_are_invalid_on_disk() {
        let device = FileSystemDiskDevice::new();
        let mut packet = DiskIoPacket::new(IoFunction::Rewind);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidFunction);
    }
}
