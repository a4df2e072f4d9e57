//! End-to-end device scenarios over real backing files.

use mainframe_io::{
    DiskIoPacket, FileSystemDiskDevice, FileSystemTapeDevice, IoFunction, IoStatus, MountInfo,
    PrepInfo, TapeIoPacket,
};
use tempfile::TempDir;

#[test]
fn disk_prep_write_read_and_geometry() {
    let dir = TempDir::new().unwrap();
    let device = FileSystemDiskDevice::new();

    let mut packet = DiskIoPacket::mount(MountInfo {
        path: dir.path().join("pack.dsk"),
        write_protect: false,
    });
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::PackNotPrepped);

    let mut packet = DiskIoPacket::prep(PrepInfo {
        prep_factor: 28,
        track_count: 10_000,
        pack_name: "SCEN01".into(),
    });
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::Complete);

    let geometry = device.geometry().unwrap();
    assert_eq!(
        (geometry.bytes_per_block, geometry.block_count, geometry.track_count),
        (128, 640_000, 10_000)
    );

    let mut packet = DiskIoPacket::write(5, vec![0; 128]);
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::Complete);

    let mut packet = DiskIoPacket::read(5, vec![0xFF; 128]);
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::Complete);
    assert_eq!(packet.buffer.unwrap(), vec![0; 128]);
}

#[test]
fn tape_write_mark_rewind_read() {
    let dir = TempDir::new().unwrap();
    let device = FileSystemTapeDevice::new();

    let mut packet = TapeIoPacket::mount(MountInfo {
        path: dir.path().join("volume.tap"),
        write_protect: false,
    });
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::Complete);

    let mut packet = TapeIoPacket::write(vec![0xAA, 0xBB, 0xCC]);
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::Complete);

    let mut packet = TapeIoPacket::new(IoFunction::WriteTapeMark);
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::Complete);

    let mut packet = TapeIoPacket::new(IoFunction::Rewind);
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::AtLoadPoint);

    let mut packet = TapeIoPacket::read();
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::Complete);
    assert_eq!(packet.data_length, 3);
    assert_eq!(packet.buffer.unwrap(), vec![0xAA, 0xBB, 0xCC]);

    let mut packet = TapeIoPacket::read();
    device.start_io(&mut packet);
    assert_eq!(packet.status, IoStatus::EndOfFile);
}
