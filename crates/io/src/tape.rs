//! File-backed variable-block tape device.
//!
//! Blocks are framed as `[length][payload][length]` with big-endian u32
//! control words; a tape mark is the single control word 0xFFFFFFFF. The
//! trailing length copy lets the drive space backward without an index.
//! Any backing-store failure sets the position-lost condition, which only
//! a rewind or remount clears.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use mainframe_core::convert::{deserialize_u32_be, serialize_u32_be};
use tracing::debug;

use crate::packets::{IoFunction, IoStatus, MountInfo, TapeIoPacket};

/// Control word marking an end-of-file boundary.
pub const TAPE_MARK: u32 = 0xFFFF_FFFF;

const CONTROL_WORD_SIZE: u64 = 4;

#[derive(Debug, Default)]
struct TapeState {
    file: Option<File>,
    is_ready: bool,
    is_write_protected: bool,
    /// False after any write until the next rewind or mount.
    can_read: bool,
    at_load_point: bool,
    at_end_of_tape: bool,
    position_lost: bool,
    offset: u64,
    blocks_extended: i64,
    files_extended: i64,
}

/// A tape drive backed by a file in the host filesystem. Operations
/// serialize under an internal mutex; `start_io` leaves a terminal status
/// in the packet.
#[derive(Debug, Default)]
pub struct FileSystemTapeDevice {
    state: Mutex<TapeState>,
}

impl FileSystemTapeDevice {
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
    pub fn is_at_load_point(&self) -> bool {
        self.lock_state().at_load_point
    }

    /// Blocks and files traversed since the load point, negative when the
    /// position is behind a boundary the drive has backed over.
    #[must_use]
    pub fn extension_counts(&self) -> (i64, i64) {
        let state = self.lock_state();
        (state.blocks_extended, state.files_extended)
    }

    /// Runs one operation to completion.
    pub fn start_io(&self, packet: &mut TapeIoPacket) {
        packet.status = IoStatus::InProgress;
        let mut state = self.lock_state();
        packet.status = match packet.function {
            IoFunction::Mount => Self::do_mount(&mut state, packet.mount_info.as_ref()),
            IoFunction::MoveBackward => Self::do_move_backward(&mut state),
            IoFunction::MoveForward => Self::do_move_forward(&mut state),
            IoFunction::Read => Self::do_read(&mut state, packet),
            IoFunction::ReadBackward => Self::do_read_backward(&mut state, packet),
            IoFunction::Reset | IoFunction::Unmount => Self::do_unmount(&mut state),
            IoFunction::Rewind => Self::do_rewind(&mut state),
            IoFunction::RewindAndUnload => {
                Self::do_rewind(&mut state);
                Self::do_unmount(&mut state)
            }
            IoFunction::Write => Self::do_write(&mut state, packet.buffer.as_deref()),
            IoFunction::WriteTapeMark => Self::do_write_tape_mark(&mut state),
            IoFunction::Prep => IoStatus::InvalidFunction,
        };
        debug!(function = %packet.function, status = %packet.status, "tape io");
    }

    fn lock_state(&self) -> MutexGuard<'_, TapeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn do_mount(state: &mut TapeState, info: Option<&MountInfo>) -> IoStatus {
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
        let file = match open {
            Ok(file) => file,
            Err(err) => {
                debug!(path = %info.path.display(), %err, "mount failed");
                return IoStatus::SystemError;
            }
        };

        *state = TapeState {
            file: Some(file),
            is_ready: true,
            is_write_protected: info.write_protect,
            can_read: true,
            at_load_point: true,
            ..TapeState::default()
        };
        IoStatus::Complete
    }

    fn do_unmount(state: &mut TapeState) -> IoStatus {
        if state.file.take().is_none() {
            return IoStatus::MediaNotMounted;
        }
        state.is_ready = false;
        IoStatus::Complete
    }

    fn do_rewind(state: &mut TapeState) -> IoStatus {
        if !state.is_ready {
            return IoStatus::DeviceIsNotReady;
        }
        state.offset = 0;
        state.can_read = true;
        state.at_load_point = true;
        state.position_lost = false;
        state.blocks_extended = 0;
        state.files_extended = 0;
        IoStatus::AtLoadPoint
    }

    fn do_move_forward(state: &mut TapeState) -> IoStatus {
        if let Err(status) = Self::check_readable(state) {
            return status;
        }
        loop {
            let control_word = match Self::read_control_word(state) {
                Ok(cw) => cw,
                Err(status) => return status,
            };
            state.offset += CONTROL_WORD_SIZE;
            state.at_load_point = false;
            if control_word == TAPE_MARK {
                state.files_extended += 1;
                state.blocks_extended = 0;
                return IoStatus::EndOfFile;
            }
            state.offset += u64::from(control_word) + CONTROL_WORD_SIZE;
            state.blocks_extended += 1;
        }
    }

    fn do_move_backward(state: &mut TapeState) -> IoStatus {
        if let Err(status) = Self::check_readable(state) {
            return status;
        }
        if state.at_load_point {
            return IoStatus::AtLoadPoint;
        }
        loop {
            if state.offset == 0 {
                state.at_load_point = true;
                return IoStatus::AtLoadPoint;
            }
            if let Err(status) = Self::retreat(state, CONTROL_WORD_SIZE) {
                return status;
            }
            let control_word = match Self::read_control_word(state) {
                Ok(cw) => cw,
                Err(status) => return status,
            };
            if control_word == TAPE_MARK {
                state.files_extended -= 1;
                state.blocks_extended = 0;
                return IoStatus::EndOfFile;
            }
            if let Err(status) =
                Self::retreat(state, u64::from(control_word) + CONTROL_WORD_SIZE)
            {
                return status;
            }
            state.blocks_extended -= 1;
        }
    }

    fn do_read(state: &mut TapeState, packet: &mut TapeIoPacket) -> IoStatus {
        if let Err(status) = Self::check_readable(state) {
            return status;
        }
        let Some(mut buffer) = packet.buffer.take() else {
            return IoStatus::NilBuffer;
        };

        let control_word = match Self::read_control_word(state) {
            Ok(cw) => cw,
            Err(status) => {
                packet.buffer = Some(buffer);
                return status;
            }
        };
        if control_word == TAPE_MARK {
            state.offset += CONTROL_WORD_SIZE;
            state.at_load_point = false;
            state.files_extended += 1;
            state.blocks_extended = 0;
            packet.buffer = Some(buffer);
            return IoStatus::EndOfFile;
        }

        buffer.resize(control_word as usize, 0);
        if let Err(status) = Self::read_payload(state, &mut buffer) {
            packet.buffer = Some(buffer);
            return status;
        }
        state.offset += 2 * CONTROL_WORD_SIZE + u64::from(control_word);
        state.at_load_point = false;
        state.blocks_extended += 1;
        packet.data_length = control_word;
        packet.buffer = Some(buffer);
        if state.at_end_of_tape {
            IoStatus::EndOfTape
        } else {
            IoStatus::Complete
        }
    }

    fn do_read_backward(state: &mut TapeState, packet: &mut TapeIoPacket) -> IoStatus {
        if let Err(status) = Self::check_readable(state) {
            return status;
        }
        if packet.buffer.is_none() {
            return IoStatus::NilBuffer;
        }
        if state.at_load_point {
            return IoStatus::AtLoadPoint;
        }

        if let Err(status) = Self::retreat(state, CONTROL_WORD_SIZE) {
            return status;
        }
        let control_word = match Self::read_control_word(state) {
            Ok(cw) => cw,
            Err(status) => return status,
        };
        if control_word == TAPE_MARK {
            state.files_extended -= 1;
            state.blocks_extended = 0;
            if state.offset == 0 {
                state.at_load_point = true;
            }
            return IoStatus::EndOfFile;
        }

        if let Err(status) = Self::retreat(state, u64::from(control_word)) {
            return status;
        }
        let mut buffer = packet.buffer.take().unwrap_or_default();
        buffer.resize(control_word as usize, 0);
        if let Err(status) = Self::read_at_position(state, &mut buffer) {
            packet.buffer = Some(buffer);
            return status;
        }
        if let Err(status) = Self::retreat(state, CONTROL_WORD_SIZE) {
            packet.buffer = Some(buffer);
            return status;
        }
        if state.offset == 0 {
            state.at_load_point = true;
        }
        state.blocks_extended -= 1;
        packet.data_length = control_word;
        packet.buffer = Some(buffer);
        if state.at_end_of_tape {
            IoStatus::EndOfTape
        } else if state.at_load_point {
            IoStatus::AtLoadPoint
        } else {
            IoStatus::Complete
        }
    }

    fn do_write(state: &mut TapeState, buffer: Option<&[u8]>) -> IoStatus {
        if let Err(status) = Self::check_writable(state) {
            return status;
        }
        let Some(buffer) = buffer else {
            return IoStatus::NilBuffer;
        };

        let length = buffer.len() as u32;
        let mut control_word = [0_u8; CONTROL_WORD_SIZE as usize];
        serialize_u32_be(length, &mut control_word);
        if Self::write_bytes(state, &control_word).is_err()
            || Self::write_bytes_advance(state, &control_word, buffer).is_err()
        {
            return IoStatus::SystemError;
        }
        state.can_read = false;
        state.at_load_point = false;
        state.blocks_extended += 1;
        IoStatus::Complete
    }

    fn do_write_tape_mark(state: &mut TapeState) -> IoStatus {
        if let Err(status) = Self::check_writable(state) {
            return status;
        }
        let mut control_word = [0_u8; CONTROL_WORD_SIZE as usize];
        serialize_u32_be(TAPE_MARK, &mut control_word);
        if Self::write_bytes(state, &control_word).is_err() {
            return IoStatus::SystemError;
        }
        state.offset += CONTROL_WORD_SIZE;
        state.can_read = false;
        state.at_load_point = false;
        state.files_extended += 1;
        state.blocks_extended = 0;
        IoStatus::Complete
    }

    fn check_readable(state: &TapeState) -> Result<(), IoStatus> {
        if !state.is_ready {
            return Err(IoStatus::DeviceIsNotReady);
        }
        if state.position_lost {
            return Err(IoStatus::LostPosition);
        }
        if !state.can_read {
            return Err(IoStatus::ReadNotAllowed);
        }
        Ok(())
    }

    fn check_writable(state: &TapeState) -> Result<(), IoStatus> {
        if !state.is_ready {
            return Err(IoStatus::DeviceIsNotReady);
        }
        if state.position_lost {
            return Err(IoStatus::LostPosition);
        }
        if state.is_write_protected {
            return Err(IoStatus::WriteProtected);
        }
        Ok(())
    }

    /// Moves the position back by `distance`; running off the front of the
    /// tape loses position.
    fn retreat(state: &mut TapeState, distance: u64) -> Result<(), IoStatus> {
        match state.offset.checked_sub(distance) {
            Some(offset) => {
                state.offset = offset;
                Ok(())
            }
            None => {
                state.position_lost = true;
                Err(IoStatus::LostPosition)
            }
        }
    }

    /// Reads the control word at the current position without moving it.
    fn read_control_word(state: &mut TapeState) -> Result<u32, IoStatus> {
        let mut bytes = [0_u8; CONTROL_WORD_SIZE as usize];
        Self::read_at_position(state, &mut bytes)?;
        Ok(deserialize_u32_be(&bytes))
    }

    /// Reads payload bytes at the current position without moving it.
    fn read_payload(state: &mut TapeState, buffer: &mut [u8]) -> Result<(), IoStatus> {
        let offset = state.offset + CONTROL_WORD_SIZE;
        Self::read_at(state, offset, buffer)
    }

    fn read_at_position(state: &mut TapeState, buffer: &mut [u8]) -> Result<(), IoStatus> {
        let offset = state.offset;
        Self::read_at(state, offset, buffer)
    }

    fn read_at(state: &mut TapeState, offset: u64, buffer: &mut [u8]) -> Result<(), IoStatus> {
        let Some(file) = state.file.as_mut() else {
            return Err(IoStatus::MediaNotMounted);
        };
        let result = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(buffer));
        match result {
            Ok(()) => Ok(()),
            Err(_) => {
                state.position_lost = true;
                Err(IoStatus::SystemError)
            }
        }
    }

    /// Writes bytes at the current position without moving it.
    fn write_bytes(state: &mut TapeState, bytes: &[u8]) -> Result<(), IoStatus> {
        let Some(file) = state.file.as_mut() else {
            return Err(IoStatus::MediaNotMounted);
        };
        let offset = state.offset;
        let result = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(bytes))
            .and_then(|()| file.flush());
        match result {
            Ok(()) => Ok(()),
            Err(_) => {
                state.position_lost = true;
                Err(IoStatus::SystemError)
            }
        }
    }

    /// Writes a full framed block and advances past it.
    fn write_bytes_advance(
        state: &mut TapeState,
        control_word: &[u8],
        payload: &[u8],
    ) -> Result<(), IoStatus> {
        let Some(file) = state.file.as_mut() else {
            return Err(IoStatus::MediaNotMounted);
        };
        let result = file
            .write_all(payload)
            .and_then(|()| file.write_all(control_word))
            .and_then(|()| file.flush());
        match result {
            Ok(()) => {
                state.offset +=
                    2 * CONTROL_WORD_SIZE + payload.len() as u64;
                Ok(())
            }
            Err(_) => {
                state.position_lost = true;
                Err(IoStatus::SystemError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mounted_device(dir: &TempDir) -> FileSystemTapeDevice {
        let device = FileSystemTapeDevice::new();
        let mut packet = TapeIoPacket::mount(MountInfo {
            path: dir.path().join("volume.tap"),
            write_protect: false,
        });
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        device
    }

    fn rewind(device: &FileSystemTapeDevice) {
        let mut packet = TapeIoPacket::new(IoFunction::Rewind);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::AtLoadPoint);
    }

    #[test]
    fn write_mark_rewind_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let device = mounted_device(&dir);

        let mut packet = TapeIoPacket::write(vec![0xAA, 0xBB, 0xCC]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);

        let mut packet = TapeIoPacket::new(IoFunction::WriteTapeMark);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);

        rewind(&device);

        let mut packet = TapeIoPacket::read();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        assert_eq!(packet.data_length, 3);
        assert_eq!(packet.buffer.unwrap(), vec![0xAA, 0xBB, 0xCC]);

        let mut packet = TapeIoPacket::read();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::EndOfFile);
    }

    #[test]
    fn read_after_write_requires_rewind() {
        let dir = TempDir::new().unwrap();
        let device = mounted_device(&dir);

        let mut packet = TapeIoPacket::write(vec![1, 2, 3]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);

        let mut packet = TapeIoPacket::read();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::ReadNotAllowed);

        rewind(&device);
        let mut packet = TapeIoPacket::read();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
    }

    #[test]
    fn move_forward_off_the_end_loses_position() {
        let dir = TempDir::new().unwrap();
        let device = mounted_device(&dir);

        let mut packet = TapeIoPacket::write(vec![7; 16]);
        device.start_io(&mut packet);
        let mut packet = TapeIoPacket::write(vec![9; 8]);
        device.start_io(&mut packet);
        rewind(&device);

        // No tape mark was written, so the move runs off the recorded data.
        let mut packet = TapeIoPacket::new(IoFunction::MoveForward);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::SystemError);

        let mut packet = TapeIoPacket::read();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::LostPosition);

        rewind(&device);
        let mut packet = TapeIoPacket::read();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        assert_eq!(packet.data_length, 16);
    }

    #[test]
    fn move_backward_counts_blocks() {
        let dir = TempDir::new().unwrap();
        let device = mounted_device(&dir);

        for _ in 0..3 {
            let mut packet = TapeIoPacket::write(vec![0x55; 10]);
            device.start_io(&mut packet);
            assert_eq!(packet.status, IoStatus::Complete);
        }
        let mut packet = TapeIoPacket::new(IoFunction::WriteTapeMark);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        assert_eq!(device.extension_counts(), (0, 1));

        let mut packet = TapeIoPacket::new(IoFunction::MoveBackward);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::ReadNotAllowed);

        rewind(&device);
        let mut packet = TapeIoPacket::new(IoFunction::MoveForward);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::EndOfFile);
        assert_eq!(device.extension_counts(), (0, 1));

        let mut packet = TapeIoPacket::new(IoFunction::MoveBackward);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::EndOfFile);

        let mut packet = TapeIoPacket::new(IoFunction::MoveBackward);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::AtLoadPoint);
        assert!(device.is_at_load_point());
    }

    #[test]
    fn read_backward_from_load_point_is_an_error() {
        let dir = TempDir::new().unwrap();
        let device = mounted_device(&dir);

        let mut packet = TapeIoPacket::read_backward();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::AtLoadPoint);
    }

    #[test]
    fn read_backward_returns_block_and_reaches_load_point() {
        let dir = TempDir::new().unwrap();
        let device = mounted_device(&dir);

        let mut packet = TapeIoPacket::write(vec![0xDE, 0xAD]);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);

        // Position is past the only block; backing over it lands on the
        // load point.
        let mut state = device.lock_state();
        state.can_read = true;
        drop(state);

        let mut packet = TapeIoPacket::read_backward();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::AtLoadPoint);
        assert_eq!(packet.data_length, 2);
        assert_eq!(packet.buffer.unwrap(), vec![0xDE, 0xAD]);
        assert_eq!(device.extension_counts().0, 0);
    }

    #[test]
    fn unmounted_device_is_not_ready() {
        let device = FileSystemTapeDevice::new();
        let mut packet = TapeIoPacket::read();
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::DeviceIsNotReady);

        let mut packet = TapeIoPacket::new(IoFunction::Unmount);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::MediaNotMounted);
    }

    #[test]
    fn rewind_and_unload_leaves_device_unmounted() {
        let dir = TempDir::new().unwrap();
        let device = mounted_device(&dir);

        let mut packet = TapeIoPacket::new(IoFunction::RewindAndUnload);
        device.start_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Complete);
        assert!(!device.is_mounted());
        assert!(!device.is_ready());
    }
}
