//! Command-line interface: `ldmfs SRC_ROOT DST_ROOT MOUNTPOINT`.

use std::path::PathBuf;

use clap::Parser;

/// Mount a filesystem at MOUNTPOINT that lazily migrates file data from
/// SRC_ROOT to DST_ROOT as it is read or written.
#[derive(Debug, Parser)]
#[command(name = "ldmfs", about, version)]
pub struct Args {
    /// Directory tree to migrate data out of.
    pub src_root: PathBuf,
    /// Directory tree to migrate data into.
    pub dst_root: PathBuf,
    /// Path at which to mount the filesystem.
    pub mountpoint: PathBuf,
}
