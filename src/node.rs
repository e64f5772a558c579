//! Node dispatch: lookup, attribute fetch/set, directory enumeration,
//! and the SRC-then-DST shadowing rule that underlies all of them.

use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use fuser::FileType;

use crate::context::FsContext;
use crate::error::{Error, Result};
use crate::pathops::{create_path_upto, do_to_path, PathOp};

/// One entry produced by [`readdir`].
pub struct DirEntry {
    pub name: OsString,
    pub kind: FileType,
}

/// Requested attribute changes for [`setattr`]. `None` fields are left
/// untouched.
#[derive(Default)]
pub struct SetAttrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<FileTime>,
    pub mtime: Option<FileTime>,
}

/// Stat SRC first, then DST; the first hit wins. `NotFound` if neither
/// tree has the path.
pub async fn stat(ctx: &FsContext, rel: &Path) -> Result<std::fs::Metadata> {
    match tokio::fs::symlink_metadata(ctx.src_path(rel)).await {
        Ok(meta) => Ok(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Ok(tokio::fs::symlink_metadata(ctx.dst_path(rel)).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolve `name` under `parent_rel`, validating the name component and
/// applying the same SRC-then-DST shadowing rule as [`stat`].
pub async fn lookup(
    ctx: &FsContext,
    parent_rel: &Path,
    name: &std::ffi::OsStr,
) -> Result<(PathBuf, std::fs::Metadata)> {
    validate_name(name)?;
    let rel = join_child(parent_rel, name);
    let meta = stat(ctx, &rel).await?;
    Ok((rel, meta))
}

/// Enumerate SRC then DST, deduplicating by basename with SRC entries
/// taking precedence. A directory missing entirely from SRC is fatal; a
/// directory missing from DST is treated as empty there.
pub async fn readdir(ctx: &FsContext, rel: &Path) -> Result<Vec<DirEntry>> {
    let src_dir = ctx.src_path(rel);
    let dst_dir = ctx.dst_path(rel);

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut src_missing = false;

    match tokio::fs::read_dir(&src_dir).await {
        Ok(mut rd) => {
            while let Some(ent) = rd.next_entry().await? {
                let name = ent.file_name();
                let kind = entry_kind(&ent).await?;
                seen.insert(name.clone());
                entries.push(DirEntry { name, kind });
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => src_missing = true,
        Err(e) => return Err(e.into()),
    }

    match tokio::fs::read_dir(&dst_dir).await {
        Ok(mut rd) => {
            while let Some(ent) = rd.next_entry().await? {
                let name = ent.file_name();
                if seen.contains(&name) {
                    continue;
                }
                let kind = entry_kind(&ent).await?;
                entries.push(DirEntry { name, kind });
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if src_missing {
                return Err(Error::NotFound);
            }
        }
        Err(e) => return Err(e.into()),
    }

    Ok(entries)
}

async fn entry_kind(ent: &tokio::fs::DirEntry) -> io::Result<FileType> {
    let ft = ent.file_type().await?;
    Ok(if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    })
}

/// Materialize every missing DST ancestor of `rel`'s parent (fatal if any
/// ancestor is absent from SRC), then create the directory itself in both
/// DST and SRC.
pub async fn mkdir(ctx: &FsContext, rel: &Path, mode: u32) -> Result<()> {
    if let Some(parent) = rel.parent() {
        if !parent.as_os_str().is_empty() {
            create_path_upto(ctx, parent).await?;
        }
    }

    let dst = ctx.dst_path(rel);
    match tokio::fs::create_dir(&dst).await {
        Ok(()) => set_mode(&dst, mode).await.map_err(Error::PartialMkdirFailure)?,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(Error::PartialMkdirFailure(e)),
    }

    let src = ctx.src_path(rel);
    match tokio::fs::create_dir(&src).await {
        Ok(()) => set_mode(&src, mode).await.map_err(Error::PartialMkdirFailure)?,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(Error::PartialMkdirFailure(e)),
    }

    Ok(())
}

async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
    })
    .await
    .unwrap_or_else(|e| Err(io::Error::other(e)))
}

/// Remove a file or directory via [`do_to_path`].
pub async fn remove(ctx: &FsContext, rel: &Path, is_dir: bool) -> Result<()> {
    let op = if is_dir { PathOp::Rmdir } else { PathOp::Unlink };
    do_to_path(ctx, rel, op).await?;
    if !is_dir {
        ctx.forget_migration_state(rel);
    }
    Ok(())
}

/// Apply each requested attribute change to both trees, clamping the
/// path's migration state (if any) when the size shrinks.
pub async fn setattr(ctx: &FsContext, rel: &Path, req: SetAttrRequest) -> Result<()> {
    if let Some(mode) = req.mode {
        do_to_path(ctx, rel, PathOp::Chmod(mode)).await?;
    }
    if req.uid.is_some() || req.gid.is_some() {
        do_to_path(ctx, rel, PathOp::Chown { uid: req.uid, gid: req.gid }).await?;
    }
    if let Some(size) = req.size {
        do_to_path(ctx, rel, PathOp::Truncate(size)).await?;
        if let Some(state) = ctx.existing_migration_state(rel) {
            state.lock().await.clamp_to(size);
        }
    }
    if req.atime.is_some() || req.mtime.is_some() {
        // Resolve whichever of atime/mtime was left unset from a single
        // unified stat (the same SRC-then-DST policy `attr` uses) taken
        // once, so SRC and DST receive the identical pair instead of each
        // independently falling back to its own, possibly already
        // diverged, current times.
        let current = stat(ctx, rel).await?;
        let atime = req.atime.unwrap_or_else(|| FileTime::from_last_access_time(&current));
        let mtime = req.mtime.unwrap_or_else(|| FileTime::from_last_modification_time(&current));
        do_to_path(ctx, rel, PathOp::SetTimes { atime, mtime }).await?;
    }
    Ok(())
}

fn validate_name(name: &std::ffi::OsStr) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidName);
    }
    if name.len() > 255 {
        return Err(Error::InvalidName);
    }
    if Path::new(name).components().count() != 1 {
        return Err(Error::InvalidName);
    }
    Ok(())
}

fn join_child(base: &Path, name: &std::ffi::OsStr) -> PathBuf {
    let mut rel = base.to_path_buf();
    rel.push(name);
    rel
}
