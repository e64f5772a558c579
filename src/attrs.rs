//! Conversion from host `std::fs::Metadata` to the FUSE `FileAttr` wire
//! shape, and the attribute-change request the node dispatch layer passes
//! down to [`crate::pathops::do_to_path`].

use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use fuser::{FileAttr, FileType};

/// Translate host metadata into the attribute record FUSE expects,
/// stamping in the kernel-visible inode number (which is unrelated to
/// the host's own inode number).
pub fn metadata_to_attr(meta: &std::fs::Metadata, ino: u64) -> FileAttr {
    let kind = if meta.is_dir() {
        FileType::Directory
    } else if meta.file_type().is_symlink() {
        FileType::Symlink
    } else if meta.file_type().is_char_device() {
        FileType::CharDevice
    } else if meta.file_type().is_block_device() {
        FileType::BlockDevice
    } else if meta.file_type().is_fifo() {
        FileType::NamedPipe
    } else if meta.file_type().is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    };

    FileAttr {
        ino,
        size: meta.size(),
        blocks: meta.blocks(),
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        crtime: UNIX_EPOCH,
        kind,
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

fn system_time(secs: i64, nanos: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos as u32)
    } else {
        UNIX_EPOCH - Duration::new((-secs) as u64, 0)
    }
}

/// Convert a FUSE-supplied `TimeOrNow` into a concrete [`FileTime`].
pub fn to_file_time(t: fuser::TimeOrNow) -> FileTime {
    match t {
        fuser::TimeOrNow::SpecificTime(t) => FileTime::from_system_time(t),
        fuser::TimeOrNow::Now => FileTime::now(),
    }
}
