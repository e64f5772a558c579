//! The splicing handle: the per-open-file object that enforces the
//! dual-write protocol between SRC and DST.

use std::io::{self, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::context::FsContext;
use crate::error::{Error, Result};
use crate::migration::MigrationState;
use crate::pathops::create_path_upto;

/// An open file under the splicing protocol: dual-backed while SRC is
/// still relevant, single-backed once migration is complete or the file
/// was born purely in DST.
pub struct SplicingHandle {
    rel: PathBuf,
    src: Option<File>,
    dst: File,
    state: Option<Arc<Mutex<MigrationState>>>,
}

impl SplicingHandle {
    /// Open `rel` under `flags`/`mode`, choosing single- or dual-backed
    /// mode per the SRC/DST existence check in the open protocol.
    pub async fn open(ctx: &FsContext, rel: PathBuf, flags: i32, mode: u32) -> Result<Self> {
        let src_path = ctx.src_path(&rel);
        let dst_path = ctx.dst_path(&rel);

        let src_stat = tokio::fs::symlink_metadata(&src_path).await.ok();
        let dst_exists = tokio::fs::symlink_metadata(&dst_path).await.is_ok();

        if !dst_exists {
            if let Some(parent) = rel.parent() {
                if !parent.as_os_str().is_empty() {
                    create_path_upto(ctx, parent).await?;
                }
            }
        }

        let Some(src_stat) = src_stat else {
            let dst = open_with_flags(&dst_path, flags, mode, !dst_exists).await?;
            return Ok(Self { rel, src: None, dst, state: None });
        };

        let dst_flags = derive_dst_flags(flags);
        let dst = open_with_flags(&dst_path, dst_flags, mode, !dst_exists).await?;
        let src = open_with_flags(&src_path, flags, mode, false).await?;

        let state = ctx.get_or_create_migration_state(&rel, src_stat.len());

        Ok(Self { rel, src: Some(src), dst, state: Some(state) })
    }

    /// Read up to `size` bytes at `offset`. Reads from SRC while
    /// dual-backed (SRC is authoritative until completion), opportunistically
    /// mirroring the bytes read into DST. Mirror failures are logged and
    /// swallowed; the read itself always succeeds on its own terms.
    pub async fn read(&mut self, ctx: &FsContext, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.observe_completion().await;

        let mut buf = vec![0u8; size as usize];
        let n = if let Some(src) = self.src.as_mut() {
            read_at(src, offset, &mut buf).await?
        } else {
            read_at(&mut self.dst, offset, &mut buf).await?
        };
        buf.truncate(n);

        if self.src.is_some() && !self.already_covers(offset, offset + buf.len() as u64).await {
            self.mirror_region(ctx, offset, &buf).await;
        }

        Ok(buf)
    }

    /// True if the shared migration state already claims `[s, e)` as
    /// DST-authoritative, in which case a read-triggered mirror would be
    /// redundant.
    async fn already_covers(&self, s: u64, e: u64) -> bool {
        match &self.state {
            Some(state) => state.lock().await.covered.covers(s, e),
            None => false,
        }
    }

    /// Write `data` at `offset`. While dual-backed, invalidates the
    /// region in the interval set before writing SRC (SRC is about to
    /// diverge from any prior mirror), then mirrors the write to DST.
    pub async fn write(&mut self, ctx: &FsContext, offset: u64, data: &[u8]) -> Result<u32> {
        self.observe_completion().await;

        if let Some(state) = self.state.clone() {
            if self.src.is_some() {
                let mut guard = state.lock().await;
                guard.covered.del(offset, offset + data.len() as u64);
            }
        }

        let n = if let Some(src) = self.src.as_mut() {
            write_at(src, offset, data).await?
        } else {
            write_at(&mut self.dst, offset, data).await?
        };

        if self.src.is_some() {
            self.mirror_region(ctx, offset, &data[..n as usize]).await;
        }

        Ok(n)
    }

    /// Flush and close both descriptors. A no-op for fsync durability
    /// guarantees beyond whatever the host filesystems already provide.
    pub async fn release(mut self) -> Result<()> {
        if let Some(mut src) = self.src.take() {
            src.flush().await?;
        }
        self.dst.flush().await?;
        Ok(())
    }

    /// Required by the FUSE protocol; a no-op, matching the original
    /// tool's behavior.
    pub async fn fsync(&self) -> Result<()> {
        Ok(())
    }

    /// If the shared migration state has transitioned to completed since
    /// this handle last checked, drop our own SRC descriptor. This is the
    /// lazy, per-handle half of the multi-handle completion fix: only the
    /// handle that drives coverage to completion performs the unlink, and
    /// every sibling notices the flag here instead of racing to unlink a
    /// second time.
    async fn observe_completion(&mut self) {
        if let Some(state) = &self.state {
            if self.src.is_some() && state.lock().await.completed {
                self.src = None;
            }
        }
    }

    /// Opportunistically copy `data` into DST at `offset`, update the
    /// interval set on success, and evaluate completion. Failures here
    /// are logged and otherwise ignored -- this is never a correctness
    /// path for the caller's read or write.
    async fn mirror_region(&mut self, ctx: &FsContext, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        match write_at(&mut self.dst, offset, data).await {
            Ok(n) => {
                if let Some(state) = self.state.clone() {
                    let mut guard = state.lock().await;
                    guard.covered.add(offset, offset + n as u64);
                    let fully_covered = guard.is_fully_covered();
                    drop(guard);
                    if fully_covered {
                        self.try_complete(ctx, state).await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(path = %self.rel.display(), %offset, error = %e, "mirror write failed");
            }
        }
    }

    /// Attempt to unlink SRC and flip the shared `completed` flag. Best
    /// effort and idempotent: failure leaves the state untouched so a
    /// later mirror event retries.
    async fn try_complete(&mut self, ctx: &FsContext, state: Arc<Mutex<MigrationState>>) {
        let mut guard = state.lock().await;
        if guard.completed {
            self.src = None;
            return;
        }
        match tokio::fs::remove_file(ctx.src_path(&self.rel)).await {
            Ok(()) => {
                guard.completed = true;
                drop(guard);
                ctx.forget_migration_state(&self.rel);
                self.src = None;
                tracing::info!(path = %self.rel.display(), "migration complete, src removed");
            }
            Err(e) => {
                tracing::warn!(path = %self.rel.display(), error = %e, "completion unlink failed, will retry");
            }
        }
    }
}

async fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<usize> {
    file.seek(SeekFrom::Start(offset)).await.map_err(Error::BackingIo)?;
    let mut total = 0;
    loop {
        let n = file.read(&mut buf[total..]).await.map_err(Error::BackingIo)?;
        if n == 0 {
            break;
        }
        total += n;
        if total == buf.len() {
            break;
        }
    }
    Ok(total)
}

async fn write_at(file: &mut File, offset: u64, data: &[u8]) -> Result<u32> {
    file.seek(SeekFrom::Start(offset)).await.map_err(Error::BackingIo)?;
    file.write_all(data).await.map_err(Error::BackingIo)?;
    Ok(data.len() as u32)
}

/// Compute the DST open flags from the caller's requested flags: clear
/// `O_SYNC` and force `O_RDWR` when write-only was not requested, so DST
/// is always writable while dual-backed, and add `O_CREAT` when DST does
/// not yet exist. The original tool also nominally clears the read-only
/// bit, which on POSIX is a no-op (`O_RDONLY == 0`); that clear is kept
/// here purely to keep the derivation legible against the original
/// intent, not because it changes behavior.
fn derive_dst_flags(flags: i32) -> i32 {
    let mut f = flags;
    f &= !libc::O_SYNC;
    f &= !libc::O_RDONLY;
    if f & libc::O_ACCMODE != libc::O_WRONLY {
        f &= !libc::O_ACCMODE;
        f |= libc::O_RDWR;
    }
    f
}

async fn open_with_flags(path: &Path, flags: i32, mode: u32, create: bool) -> Result<File> {
    let mut opts = tokio::fs::OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => {
            opts.write(true);
        }
        libc::O_RDWR => {
            opts.read(true).write(true);
        }
        _ => {
            opts.read(true);
        }
    }
    if create || flags & libc::O_CREAT != 0 {
        opts.create(true);
    }
    if flags & libc::O_TRUNC != 0 {
        opts.truncate(true);
    }
    if flags & libc::O_APPEND != 0 {
        opts.append(true);
    }
    let remaining = flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND | libc::O_EXCL);
    opts.custom_flags(remaining);
    opts.mode(mode);
    opts.open(path).await.map_err(|e: io::Error| e.into())
}
