//! Channel-program layer over the devices.
//!
//! A channel owns the routing from node identifiers to devices and the
//! word-to-byte translation around each transfer. Callers describe a
//! transfer with control words over `Word36` buffers; the channel gathers
//! them into a byte buffer for the device and scatters read data back.
//! Each channel runs as one task taking start requests from a queue and
//! delivering finished programs on a completion queue.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mainframe_core::convert::{
    bytes_to_words_6bit, bytes_to_words_6bit_reversed, bytes_to_words_8bit,
    bytes_to_words_8bit_reversed, bytes_to_words_packed, bytes_to_words_packed_reversed,
    words_to_bytes_6bit, words_to_bytes_6bit_reversed, words_to_bytes_8bit,
    words_to_bytes_8bit_reversed, words_to_bytes_packed, words_to_bytes_packed_reversed,
};
use mainframe_core::Word36;
use thiserror::Error;
use tracing::{debug, trace};

use crate::disk::{block_size_for_prep_factor, FileSystemDiskDevice};
use crate::packets::{DiskIoPacket, IoFunction, IoStatus, MountInfo, PrepInfo, TapeIoPacket};
use crate::tape::FileSystemTapeDevice;

/// Routing identity of a device on its channel.
pub type NodeIdentifier = u32;

/// Interval between housekeeping ticks of a channel task. A reset issued
/// between ticks stays in force until the tick after it.
pub const CHANNEL_TICK: Duration = Duration::from_millis(100);

/// How caller words map onto device bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferFormat {
    /// Two words per nine bytes.
    Packed,
    /// Quarter-words in the low eight bits of each byte.
    EightBit,
    /// Sixth-words in the low six bits of each byte.
    SixBit,
}

impl TransferFormat {
    /// Device bytes produced or consumed by `words` caller words.
    #[must_use]
    pub const fn byte_count(self, words: usize) -> usize {
        match self {
            Self::Packed => words * 9 / 2,
            Self::EightBit => words * 4,
            Self::SixBit => words * 6,
        }
    }
}

/// Traversal order of the caller buffer during a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    Forward,
    Backward,
    /// The single word at the offset is repeated for the whole transfer;
    /// read data is discarded.
    Static,
    /// No words move; a write sends zeroes and a read discards data.
    Skip,
}

/// One scatter/gather element of a channel program.
#[derive(Debug)]
pub struct ControlWord {
    pub buffer: Vec<Word36>,
    pub offset: usize,
    /// Transfer length in words.
    pub length: usize,
    pub direction: TransferDirection,
    pub format: TransferFormat,
}

impl ControlWord {
    #[must_use]
    pub fn forward(buffer: Vec<Word36>, format: TransferFormat) -> Self {
        let length = buffer.len();
        Self {
            buffer,
            offset: 0,
            length,
            direction: TransferDirection::Forward,
            format,
        }
    }

    fn limits_are_valid(&self) -> bool {
        match self.direction {
            TransferDirection::Forward | TransferDirection::Backward => {
                self.offset + self.length <= self.buffer.len()
            }
            TransferDirection::Static => self.offset < self.buffer.len(),
            TransferDirection::Skip => true,
        }
    }
}

/// One operation submitted to a channel, with its translation directives
/// and, on completion, the transfer counts and final status.
#[derive(Debug)]
pub struct ChannelProgram {
    pub device: NodeIdentifier,
    pub function: IoFunction,
    pub block_id: u64,
    pub control_words: Vec<ControlWord>,
    pub mount_info: Option<MountInfo>,
    pub prep_info: Option<PrepInfo>,
    pub status: IoStatus,
    pub words_transferred: usize,
    pub bytes_transferred: usize,
}

impl ChannelProgram {
    #[must_use]
    pub fn new(device: NodeIdentifier, function: IoFunction) -> Self {
        Self {
            device,
            function,
            block_id: 0,
            control_words: Vec::new(),
            mount_info: None,
            prep_info: None,
            status: IoStatus::NotStarted,
            words_transferred: 0,
            bytes_transferred: 0,
        }
    }

    #[must_use]
    pub fn mount(device: NodeIdentifier, info: MountInfo) -> Self {
        let mut program = Self::new(device, IoFunction::Mount);
        program.mount_info = Some(info);
        program
    }

    #[must_use]
    pub fn prep(device: NodeIdentifier, info: PrepInfo) -> Self {
        let mut program = Self::new(device, IoFunction::Prep);
        program.prep_info = Some(info);
        program
    }
}

/// Gathers one control word's span into a byte buffer.
fn transfer_from_words(cw: &ControlWord, destination: &mut [u8]) {
    match cw.direction {
        TransferDirection::Forward => {
            let source = &cw.buffer[cw.offset..cw.offset + cw.length];
            match cw.format {
                TransferFormat::Packed => words_to_bytes_packed(source, destination),
                TransferFormat::EightBit => words_to_bytes_8bit(source, destination),
                TransferFormat::SixBit => words_to_bytes_6bit(source, destination),
            };
        }
        TransferDirection::Backward => {
            let source = &cw.buffer[cw.offset..cw.offset + cw.length];
            match cw.format {
                TransferFormat::Packed => words_to_bytes_packed_reversed(source, destination),
                TransferFormat::EightBit => words_to_bytes_8bit_reversed(source, destination),
                TransferFormat::SixBit => words_to_bytes_6bit_reversed(source, destination),
            };
        }
        TransferDirection::Static => {
            let source = vec![cw.buffer[cw.offset]; cw.length];
            match cw.format {
                TransferFormat::Packed => words_to_bytes_packed(&source, destination),
                TransferFormat::EightBit => words_to_bytes_8bit(&source, destination),
                TransferFormat::SixBit => words_to_bytes_6bit(&source, destination),
            };
        }
        TransferDirection::Skip => destination.fill(0),
    }
}

/// Scatters device bytes back into one control word's span. Returns the
/// non-integral flag and the number of words stored.
fn transfer_from_bytes(source: &[u8], cw: &mut ControlWord) -> (bool, usize) {
    let span = &mut cw.buffer[cw.offset..cw.offset + cw.length];
    match cw.direction {
        TransferDirection::Forward => match cw.format {
            TransferFormat::Packed => bytes_to_words_packed(source, span),
            TransferFormat::EightBit => bytes_to_words_8bit(source, span),
            TransferFormat::SixBit => bytes_to_words_6bit(source, span),
        },
        TransferDirection::Backward => match cw.format {
            TransferFormat::Packed => bytes_to_words_packed_reversed(source, span),
            TransferFormat::EightBit => bytes_to_words_8bit_reversed(source, span),
            TransferFormat::SixBit => bytes_to_words_6bit_reversed(source, span),
        },
        TransferDirection::Static | TransferDirection::Skip => (false, 0),
    }
}

/// The synchronous core of a channel variant: routes a program to a
/// device and translates its buffers.
pub trait ChannelCore: Send + 'static {
    fn execute(&mut self, program: &mut ChannelProgram);
}

/// Channel variant for fixed-block disk devices. Transfers are packed
/// format, one control word per program, sized to a valid prep factor.
#[derive(Default)]
pub struct DiskChannel {
    devices: HashMap<NodeIdentifier, Arc<FileSystemDiskDevice>>,
}

impl DiskChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, node: NodeIdentifier, device: Arc<FileSystemDiskDevice>) {
        self.devices.insert(node, device);
    }

    fn validate(program: &ChannelProgram) -> Result<(), IoStatus> {
        match program.function {
            IoFunction::Read | IoFunction::Write => {
                let [cw] = program.control_words.as_slice() else {
                    return Err(IoStatus::InvalidChannelProgram);
                };
                let word_count = u32::try_from(cw.length)
                    .map_err(|_| IoStatus::InvalidChannelProgram)?;
                if cw.format != TransferFormat::Packed
                    || cw.length % 2 != 0
                    || !cw.limits_are_valid()
                    || block_size_for_prep_factor(word_count).is_none()
                {
                    return Err(IoStatus::InvalidChannelProgram);
                }
                Ok(())
            }
            IoFunction::Mount => {
                if program.mount_info.is_none() || !program.control_words.is_empty() {
                    return Err(IoStatus::InvalidChannelProgram);
                }
                Ok(())
            }
            IoFunction::Prep => {
                if program.prep_info.is_none() || !program.control_words.is_empty() {
                    return Err(IoStatus::InvalidChannelProgram);
                }
                Ok(())
            }
            IoFunction::Reset | IoFunction::Unmount => {
                if program.control_words.is_empty() {
                    Ok(())
                } else {
                    Err(IoStatus::InvalidChannelProgram)
                }
            }
            _ => Err(IoStatus::InvalidChannelProgram),
        }
    }
}

impl ChannelCore for DiskChannel {
    fn execute(&mut self, program: &mut ChannelProgram) {
        program.status = IoStatus::InProgress;
        let Some(device) = self.devices.get(&program.device) else {
            program.status = IoStatus::DeviceIsNotAccessible;
            return;
        };
        if let Err(status) = Self::validate(program) {
            program.status = status;
            return;
        }

        // The device buffer is block-sized; a packed transfer occupies the
        // first words*9/2 bytes and the remainder is pad.
        let block_size = |cw: &ControlWord| {
            u32::try_from(cw.length)
                .ok()
                .and_then(block_size_for_prep_factor)
                .map_or(0, |bytes| bytes as usize)
        };
        let mut packet = match program.function {
            IoFunction::Read => {
                let cw = &program.control_words[0];
                DiskIoPacket::read(program.block_id, vec![0; block_size(cw)])
            }
            IoFunction::Write => {
                let cw = &program.control_words[0];
                let mut bytes = vec![0; block_size(cw)];
                let count = cw.format.byte_count(cw.length);
                transfer_from_words(cw, &mut bytes[..count]);
                DiskIoPacket::write(program.block_id, bytes)
            }
            IoFunction::Mount => {
                let mut packet = DiskIoPacket::new(IoFunction::Mount);
                packet.mount_info = program.mount_info.clone();
                packet
            }
            IoFunction::Prep => {
                let mut packet = DiskIoPacket::new(IoFunction::Prep);
                packet.prep_info = program.prep_info.clone();
                packet
            }
            function => DiskIoPacket::new(function),
        };
        device.start_io(&mut packet);

        if program.function == IoFunction::Read && packet.status == IoStatus::Complete {
            let bytes = packet.buffer.unwrap_or_default();
            let cw = &mut program.control_words[0];
            let count = cw.format.byte_count(cw.length).min(bytes.len());
            let (non_integral, words) = transfer_from_bytes(&bytes[..count], cw);
            program.words_transferred = words;
            program.bytes_transferred = count;
            program.status = if non_integral {
                IoStatus::NonIntegralRead
            } else {
                IoStatus::Complete
            };
        } else {
            if program.function == IoFunction::Write && packet.status == IoStatus::Complete {
                let cw = &program.control_words[0];
                program.words_transferred = cw.length;
                program.bytes_transferred = cw.format.byte_count(cw.length);
            }
            program.status = packet.status;
        }
    }
}

/// Channel variant for variable-block tape devices. A program may gather
/// from several control words in any format.
#[derive(Default)]
pub struct TapeChannel {
    devices: HashMap<NodeIdentifier, Arc<FileSystemTapeDevice>>,
}

impl TapeChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, node: NodeIdentifier, device: Arc<FileSystemTapeDevice>) {
        self.devices.insert(node, device);
    }

    fn validate(program: &ChannelProgram) -> Result<(), IoStatus> {
        if program.function == IoFunction::Prep {
            return Err(IoStatus::InvalidChannelProgram);
        }
        if program.function == IoFunction::Mount && program.mount_info.is_none() {
            return Err(IoStatus::InvalidChannelProgram);
        }
        for cw in &program.control_words {
            if cw.format == TransferFormat::Packed && cw.length % 2 != 0 {
                return Err(IoStatus::InvalidChannelProgram);
            }
            if !cw.limits_are_valid() {
                return Err(IoStatus::InvalidChannelProgram);
            }
        }
        Ok(())
    }

    fn gather(program: &ChannelProgram) -> Vec<u8> {
        let total: usize = program
            .control_words
            .iter()
            .map(|cw| cw.format.byte_count(cw.length))
            .sum();
        let mut bytes = vec![0; total];
        let mut index = 0;
        for cw in &program.control_words {
            let count = cw.format.byte_count(cw.length);
            transfer_from_words(cw, &mut bytes[index..index + count]);
            index += count;
        }
        bytes
    }

    fn scatter(program: &mut ChannelProgram, bytes: &[u8], device_status: IoStatus) {
        program.bytes_transferred = bytes.len();
        program.words_transferred = 0;
        let mut non_integral = false;
        let mut index = 0;
        for cw in &mut program.control_words {
            let count = cw.format.byte_count(cw.length).min(bytes.len() - index);
            let (ni, words) = transfer_from_bytes(&bytes[index..index + count], cw);
            program.words_transferred += words;
            non_integral |= ni;
            index += count;
            if index == bytes.len() {
                break;
            }
        }

        program.status = if non_integral {
            IoStatus::NonIntegralRead
        } else if index < bytes.len() {
            IoStatus::ReadOverrun
        } else {
            device_status
        };
    }
}

impl ChannelCore for TapeChannel {
    fn execute(&mut self, program: &mut ChannelProgram) {
        program.status = IoStatus::InProgress;
        let Some(device) = self.devices.get(&program.device) else {
            program.status = IoStatus::DeviceIsNotAccessible;
            return;
        };
        if let Err(status) = Self::validate(program) {
            program.status = status;
            return;
        }

        let mut packet = match program.function {
            IoFunction::Read => TapeIoPacket::read(),
            IoFunction::ReadBackward => TapeIoPacket::read_backward(),
            IoFunction::Write => TapeIoPacket::write(Self::gather(program)),
            IoFunction::Mount => {
                let mut packet = TapeIoPacket::new(IoFunction::Mount);
                packet.mount_info = program.mount_info.clone();
                packet
            }
            function => TapeIoPacket::new(function),
        };
        device.start_io(&mut packet);

        let readable_end = matches!(
            packet.status,
            IoStatus::Complete | IoStatus::EndOfTape | IoStatus::AtLoadPoint
        );
        if program.function.is_read() && readable_end {
            let bytes = packet.buffer.unwrap_or_default();
            Self::scatter(program, &bytes[..packet.data_length as usize], packet.status);
        } else {
            if program.function.is_write() && packet.status == IoStatus::Complete {
                program.words_transferred =
                    program.control_words.iter().map(|cw| cw.length).sum();
                program.bytes_transferred = program
                    .control_words
                    .iter()
                    .map(|cw| cw.format.byte_count(cw.length))
                    .sum();
            }
            program.status = packet.status;
        }
    }
}

/// Requests accepted by a running channel task.
enum ChannelCommand {
    Start(Box<ChannelProgram>),
    Reset,
}

/// Submission errors; completion problems surface as program statuses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel task is not running")]
    Stopped,
}

/// A channel core running on its own thread. Programs are submitted with
/// `start_io` and come back on the completion queue passed to `spawn`.
/// Dropping the task shuts the thread down after it drains its queue.
pub struct ChannelTask {
    sender: Option<Sender<ChannelCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl ChannelTask {
    #[must_use]
    pub fn spawn<C: ChannelCore>(core: C, completions: Sender<Box<ChannelProgram>>) -> Self {
        let (sender, receiver) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || run_channel(core, &receiver, &completions));
        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Queues a program for execution.
    pub fn start_io(&self, program: Box<ChannelProgram>) -> Result<(), ChannelError> {
        self.sender
            .as_ref()
            .ok_or(ChannelError::Stopped)?
            .send(ChannelCommand::Start(program))
            .map_err(|_| ChannelError::Stopped)
    }

    /// Requests cancellation of queued programs. The cancellation stays in
    /// force until the tick after the request; affected programs complete
    /// with status `Canceled`.
    pub fn reset(&self) -> Result<(), ChannelError> {
        self.sender
            .as_ref()
            .ok_or(ChannelError::Stopped)?
            .send(ChannelCommand::Reset)
            .map_err(|_| ChannelError::Stopped)
    }
}

impl Drop for ChannelTask {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_channel<C: ChannelCore>(
    mut core: C,
    receiver: &Receiver<ChannelCommand>,
    completions: &Sender<Box<ChannelProgram>>,
) {
    let mut reset_in_force = false;
    loop {
        match receiver.recv_timeout(CHANNEL_TICK) {
            Ok(ChannelCommand::Start(mut program)) => {
                if reset_in_force {
                    program.status = IoStatus::Canceled;
                } else {
                    core.execute(&mut program);
                }
                if completions.send(program).is_err() {
                    return;
                }
            }
            Ok(ChannelCommand::Reset) => {
                debug!("channel reset requested");
                reset_in_force = true;
            }
            Err(RecvTimeoutError::Timeout) => {
                trace!("channel tick");
                reset_in_force = false;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
