//! I/O packet types shared by devices and channels.
//!
//! A packet carries one operation to a device and comes back with a
//! terminal status. Packets are plain data; the channel layer owns the
//! word-to-byte translation, so device buffers are always raw bytes.

use std::fmt;
use std::path::PathBuf;

/// Operation selector for a device packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IoFunction {
    Mount,
    MoveBackward,
    MoveForward,
    Prep,
    Read,
    ReadBackward,
    Reset,
    Rewind,
    RewindAndUnload,
    Unmount,
    Write,
    WriteTapeMark,
}

impl IoFunction {
    /// Whether the function transfers data from the device to the caller.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadBackward)
    }

    /// Whether the function transfers data from the caller to the device.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

impl fmt::Display for IoFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of an I/O operation. A packet starts at `NotStarted`, moves to
/// `InProgress` when a device accepts it, and ends at `Complete` or one of
/// the error codes. `EndOfFile`, `EndOfTape`, and `AtLoadPoint` are
/// positional notifications rather than failures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IoStatus {
    #[default]
    NotStarted,
    Complete,
    InProgress,
    Canceled,
    AtLoadPoint,
    DeviceDoesNotExist,
    DeviceIsDown,
    DeviceIsNotAccessible,
    DeviceIsNotReady,
    EndOfFile,
    EndOfTape,
    InternalError,
    InvalidBlockId,
    InvalidBufferSize,
    InvalidChannelProgram,
    InvalidFunction,
    InvalidNodeType,
    InvalidPackName,
    InvalidPacket,
    InvalidPrepFactor,
    InvalidTapeBlock,
    InvalidTrackCount,
    LostPosition,
    MediaAlreadyMounted,
    MediaNotMounted,
    NilBuffer,
    NonIntegralRead,
    PackNotPrepped,
    ReadNotAllowed,
    ReadOverrun,
    SystemError,
    WriteProtected,
}

impl IoStatus {
    /// Whether the status represents a finished operation, successful or
    /// otherwise.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::NotStarted | Self::InProgress)
    }
}

impl fmt::Display for IoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parameters for a `Mount` operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountInfo {
    pub path: PathBuf,
    pub write_protect: bool,
}

/// Parameters for a disk `Prep` operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrepInfo {
    /// Words per block. Must be one of the architectural prep factors.
    pub prep_factor: u32,
    pub track_count: u64,
    pub pack_name: String,
}

/// One operation against a fixed-block disk device.
#[derive(Debug)]
pub struct DiskIoPacket {
    pub function: IoFunction,
    pub block_id: u64,
    pub buffer: Option<Vec<u8>>,
    pub mount_info: Option<MountInfo>,
    pub prep_info: Option<PrepInfo>,
    pub status: IoStatus,
}

impl DiskIoPacket {
    #[must_use]
    pub fn new(function: IoFunction) -> Self {
        Self {
            function,
            block_id: 0,
            buffer: None,
            mount_info: None,
            prep_info: None,
            status: IoStatus::NotStarted,
        }
    }

    #[must_use]
    pub fn read(block_id: u64, buffer: Vec<u8>) -> Self {
        let mut packet = Self::new(IoFunction::Read);
        packet.block_id = block_id;
        packet.buffer = Some(buffer);
        packet
    }

    #[must_use]
    pub fn write(block_id: u64, buffer: Vec<u8>) -> Self {
        let mut packet = Self::new(IoFunction::Write);
        packet.block_id = block_id;
        packet.buffer = Some(buffer);
        packet
    }

    #[must_use]
    pub fn mount(info: MountInfo) -> Self {
        let mut packet = Self::new(IoFunction::Mount);
        packet.mount_info = Some(info);
        packet
    }

    #[must_use]
    pub fn prep(info: PrepInfo) -> Self {
        let mut packet = Self::new(IoFunction::Prep);
        packet.prep_info = Some(info);
        packet
    }
}

/// One operation against a variable-block tape device. `data_length` is
/// the payload size delivered by a read.
#[derive(Debug)]
pub struct TapeIoPacket {
    pub function: IoFunction,
    pub buffer: Option<Vec<u8>>,
    pub data_length: u32,
    pub mount_info: Option<MountInfo>,
    pub status: IoStatus,
}

impl TapeIoPacket {
    #[must_use]
    pub fn new(function: IoFunction) -> Self {
        Self {
            function,
            buffer: None,
            data_length: 0,
            mount_info: None,
            status: IoStatus::NotStarted,
        }
    }

    #[must_use]
    pub fn read() -> Self {
        let mut packet = Self::new(IoFunction::Read);
        packet.buffer = Some(Vec::new());
        packet
    }

    #[must_use]
    pub fn read_backward() -> Self {
        let mut packet = Self::new(IoFunction::ReadBackward);
        packet.buffer = Some(Vec::new());
        packet
    }

    #[must_use]
    pub fn write(buffer: Vec<u8>) -> Self {
        let mut packet = Self::new(IoFunction::Write);
        packet.buffer = Some(buffer);
        packet
    }

    #[must_use]
    pub fn mount(info: MountInfo) -> Self {
        let mut packet = Self::new(IoFunction::Mount);
        packet.mount_info = Some(info);
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!IoStatus::NotStarted.is_terminal());
        assert!(!IoStatus::InProgress.is_terminal());
        assert!(IoStatus::Complete.is_terminal());
        assert!(IoStatus::InvalidBlockId.is_terminal());
        assert!(IoStatus::EndOfFile.is_terminal());
    }

    #[test]
    fn function_direction_queries() {
        assert!(IoFunction::Read.is_read());
        assert!(IoFunction::ReadBackward.is_read());
        assert!(!IoFunction::Read.is_write());
        assert!(IoFunction::Write.is_write());
        assert!(!IoFunction::Rewind.is_read());
    }
}
