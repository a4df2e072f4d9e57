//! Pseudo-device and channel subsystem for the emulation core.
//!
//! Devices are file-backed stand-ins for fixed-block disk packs and
//! variable-block tape volumes, driven by I/O packets. Channels sit above
//! them, translating caller `Word36` buffers to device bytes and running
//! each operation on a dedicated task with asynchronous completion.

/// Packet, function, and status types shared by devices and channels.
pub mod packets;
pub use packets::{DiskIoPacket, IoFunction, IoStatus, MountInfo, PrepInfo, TapeIoPacket};

/// File-backed fixed-block disk device.
pub mod disk;
pub use disk::{DiskGeometry, FileSystemDiskDevice};

/// File-backed variable-block tape device.
pub mod tape;
pub use tape::FileSystemTapeDevice;

/// Channel programs, word/byte transfer directives, and channel tasks.
pub mod channel;
pub use channel::{
    ChannelCore, ChannelError, ChannelProgram, ChannelTask, ControlWord, DiskChannel,
    NodeIdentifier, TapeChannel, TransferDirection, TransferFormat, CHANNEL_TICK,
};
