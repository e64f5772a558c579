//! Helpers that apply a single logical operation to both SRC and DST,
//! and that materialize DST ancestor directories on demand.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::context::FsContext;
use crate::error::{Error, Result};

/// A single filesystem mutation applied uniformly to SRC and/or DST by
/// [`do_to_path`].
#[derive(Debug, Clone)]
pub enum PathOp {
    Unlink,
    Rmdir,
    Chmod(u32),
    Chown { uid: Option<u32>, gid: Option<u32> },
    Truncate(u64),
    /// Both fields are already resolved by the caller (any field the
    /// request left unset is filled in from a single unified stat taken
    /// once, before either tree is touched) so SRC and DST end up with
    /// the identical pair rather than each independently falling back to
    /// its own, possibly already-diverged, current times.
    SetTimes { atime: FileTime, mtime: FileTime },
}

/// Apply `op` to DST (ignoring not-found) and, if the path existed in
/// SRC at the time of the call, also to SRC -- propagating any SRC
/// error. If the path never existed in SRC, DST is the only target.
///
/// This mirrors the original tool's rule that a file born purely in DST
/// (never migrated) is treated identically to a fully-completed migrated
/// file: SRC is simply out of the picture.
pub async fn do_to_path(ctx: &FsContext, rel: &Path, op: PathOp) -> Result<()> {
    let dst = ctx.dst_path(rel);
    let src = ctx.src_path(rel);
    let src_exists = tokio::fs::symlink_metadata(&src).await.is_ok();

    match apply_op(&dst, &op).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if src_exists {
        apply_op(&src, &op).await?;
    }

    Ok(())
}

async fn apply_op(path: &Path, op: &PathOp) -> io::Result<()> {
    match op {
        PathOp::Unlink => tokio::fs::remove_file(path).await,
        PathOp::Rmdir => tokio::fs::remove_dir(path).await,
        PathOp::Chmod(mode) => {
            let path = path.to_path_buf();
            let mode = *mode;
            tokio::task::spawn_blocking(move || {
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            })
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)))
        }
        PathOp::Chown { uid, gid } => {
            let path = path.to_path_buf();
            let uid = *uid;
            let gid = *gid;
            tokio::task::spawn_blocking(move || chown(&path, uid, gid))
                .await
                .unwrap_or_else(|e| Err(io::Error::other(e)))
        }
        PathOp::Truncate(size) => {
            let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
            file.set_len(*size).await
        }
        PathOp::SetTimes { atime, mtime } => {
            let path = path.to_path_buf();
            let atime = *atime;
            let mtime = *mtime;
            tokio::task::spawn_blocking(move || filetime::set_file_times(&path, atime, mtime))
                .await
                .unwrap_or_else(|e| Err(io::Error::other(e)))
        }
    }
}

fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let uid = uid.map(|u| u as libc::uid_t).unwrap_or(u32::MAX as libc::uid_t);
    let gid = gid.map(|g| g as libc::gid_t).unwrap_or(u32::MAX as libc::gid_t);
    // -1 (all bits set) leaves that id unchanged, matching chown(2).
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Walk down from the root through every ancestor of `rel_dir` not yet
/// present in DST, creating each one with the mode copied from the
/// corresponding SRC ancestor. Every ancestor must already exist in SRC;
/// a missing one is fatal, since by the time `mkdir` unconditionally
/// creates the SRC side of the final directory, the SRC parent chain is
/// guaranteed to be present. "Already exists" at any level in DST is
/// ignored.
pub async fn create_path_upto(ctx: &FsContext, rel_dir: &Path) -> Result<()> {
    let mut acc = PathBuf::new();
    for component in rel_dir.components() {
        acc.push(component);
        let dst = ctx.dst_path(&acc);
        if tokio::fs::symlink_metadata(&dst).await.is_ok() {
            continue;
        }
        let mode = tokio::fs::symlink_metadata(ctx.src_path(&acc)).await?.permissions().mode();
        match tokio::fs::create_dir(&dst).await {
            Ok(()) => {
                let dst2 = dst.clone();
                tokio::task::spawn_blocking(move || {
                    std::fs::set_permissions(&dst2, std::fs::Permissions::from_mode(mode))
                })
                .await
                .unwrap_or_else(|e| Err(io::Error::other(e)))
                .map_err(Error::BackingIo)?;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(Error::PartialMkdirFailure(e)),
        }
    }
    Ok(())
}
