//! Bridges `fuser::Filesystem`'s synchronous, inode-numbered callbacks to
//! the async core.
//!
//! Every callback clones the shared state and spawns the actual work onto
//! the Tokio runtime, completing the `Reply` from inside that task so the
//! FUSE receive loop is never blocked waiting on backing I/O.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fuser::{
    FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::attrs::{metadata_to_attr, to_file_time};
use crate::context::FsContext;
use crate::handle::SplicingHandle;
use crate::inode::InodeTable;
use crate::node::{self, SetAttrRequest};

const ATTR_TTL: Duration = Duration::from_secs(1);

/// The `fuser::Filesystem` implementation. Holds everything a spawned
/// callback needs behind `Arc`s so it can be cloned cheaply per request.
pub struct MigratingFs {
    ctx: Arc<FsContext>,
    inodes: Arc<StdMutex<InodeTable>>,
    handles: Arc<DashMap<u64, Arc<AsyncMutex<SplicingHandle>>>>,
    next_fh: AtomicU64,
    rt: tokio::runtime::Handle,
}

impl MigratingFs {
    pub fn new(ctx: FsContext, rt: tokio::runtime::Handle) -> Self {
        Self {
            ctx: Arc::new(ctx),
            inodes: Arc::new(StdMutex::new(InodeTable::new())),
            handles: Arc::new(DashMap::new()),
            next_fh: AtomicU64::new(1),
            rt,
        }
    }

    fn rel_for(&self, ino: u64) -> Option<PathBuf> {
        self.inodes.lock().unwrap().path(ino).map(|p| p.to_path_buf())
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    fn inodes_handle(&self) -> Arc<StdMutex<InodeTable>> {
        self.inodes.clone()
    }
}

impl Filesystem for MigratingFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_rel) = self.rel_for(parent) else {
            reply.error(libc::ESTALE);
            return;
        };
        let ctx = self.ctx.clone();
        let name = name.to_os_string();
        let inodes = self.inodes_handle();
        self.rt.spawn(async move {
            match node::lookup(&ctx, &parent_rel, &name).await {
                Ok((rel, meta)) => {
                    let ino = inodes.lock().unwrap().ensure(rel);
                    reply.entry(&ATTR_TTL, &metadata_to_attr(&meta, ino), 0);
                }
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(rel) = self.rel_for(ino) else {
            reply.error(libc::ESTALE);
            return;
        };
        let ctx = self.ctx.clone();
        self.rt.spawn(async move {
            match node::stat(&ctx, &rel).await {
                Ok(meta) => reply.attr(&ATTR_TTL, &metadata_to_attr(&meta, ino)),
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(rel) = self.rel_for(ino) else {
            reply.error(libc::ESTALE);
            return;
        };
        let ctx = self.ctx.clone();
        let req = SetAttrRequest {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(to_file_time),
            mtime: mtime.map(to_file_time),
        };
        self.rt.spawn(async move {
            if let Err(e) = node::setattr(&ctx, &rel, req).await {
                reply.error(e.to_errno());
                return;
            }
            match node::stat(&ctx, &rel).await {
                Ok(meta) => reply.attr(&ATTR_TTL, &metadata_to_attr(&meta, ino)),
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_rel) = self.rel_for(parent) else {
            reply.error(libc::ESTALE);
            return;
        };
        let ctx = self.ctx.clone();
        let name = name.to_os_string();
        let inodes = self.inodes_handle();
        self.rt.spawn(async move {
            let mut rel = parent_rel.clone();
            rel.push(&name);
            if let Err(e) = node::mkdir(&ctx, &rel, mode).await {
                reply.error(e.to_errno());
                return;
            }
            match node::stat(&ctx, &rel).await {
                Ok(meta) => {
                    let ino = inodes.lock().unwrap().ensure(rel);
                    reply.entry(&ATTR_TTL, &metadata_to_attr(&meta, ino), 0);
                }
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.remove_entry(parent, name, false, reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.remove_entry(parent, name, true, reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(rel) = self.rel_for(ino) else {
            reply.error(libc::ESTALE);
            return;
        };
        let ctx = self.ctx.clone();
        let handles = self.handles.clone();
        let fh = self.alloc_fh();
        self.rt.spawn(async move {
            match SplicingHandle::open(&ctx, rel, flags, 0o644).await {
                Ok(handle) => {
                    handles.insert(fh, Arc::new(AsyncMutex::new(handle)));
                    reply.opened(fh, 0);
                }
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_rel) = self.rel_for(parent) else {
            reply.error(libc::ESTALE);
            return;
        };
        let ctx = self.ctx.clone();
        let name = name.to_os_string();
        let handles = self.handles.clone();
        let inodes = self.inodes_handle();
        let fh = self.alloc_fh();
        self.rt.spawn(async move {
            let mut rel = parent_rel.clone();
            rel.push(&name);
            let open_flags = flags | libc::O_CREAT;
            match SplicingHandle::open(&ctx, rel.clone(), open_flags, mode).await {
                Ok(handle) => match node::stat(&ctx, &rel).await {
                    Ok(meta) => {
                        let ino = inodes.lock().unwrap().ensure(rel);
                        handles.insert(fh, Arc::new(AsyncMutex::new(handle)));
                        reply.created(&ATTR_TTL, &metadata_to_attr(&meta, ino), 0, fh, 0);
                    }
                    Err(e) => reply.error(e.to_errno()),
                },
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(handle) = self.handles.get(&fh).map(|e| e.value().clone()) else {
            reply.error(libc::EBADF);
            return;
        };
        let ctx = self.ctx.clone();
        self.rt.spawn(async move {
            let mut handle = handle.lock().await;
            match handle.read(&ctx, offset as u64, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(handle) = self.handles.get(&fh).map(|e| e.value().clone()) else {
            reply.error(libc::EBADF);
            return;
        };
        let ctx = self.ctx.clone();
        let data = data.to_vec();
        self.rt.spawn(async move {
            let mut handle = handle.lock().await;
            match handle.write(&ctx, offset as u64, &data).await {
                Ok(n) => reply.written(n),
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some((_, handle)) = self.handles.remove(&fh) else {
            reply.ok();
            return;
        };
        self.rt.spawn(async move {
            let handle = Arc::try_unwrap(handle)
                .unwrap_or_else(|arc| panic!("handle {fh} still referenced: {} strong refs", Arc::strong_count(&arc)))
                .into_inner();
            match handle.release().await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let Some(handle) = self.handles.get(&fh).map(|e| e.value().clone()) else {
            reply.ok();
            return;
        };
        self.rt.spawn(async move {
            let handle = handle.lock().await;
            match handle.fsync().await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(rel) = self.rel_for(ino) else {
            reply.error(libc::ESTALE);
            return;
        };
        let ctx = self.ctx.clone();
        let inodes = self.inodes_handle();
        self.rt.spawn(async move {
            match node::readdir(&ctx, &rel).await {
                Ok(entries) => {
                    let mut all = vec![(ino, FileType::Directory, ".".to_string())];
                    all.push((ino, FileType::Directory, "..".to_string()));
                    for e in entries {
                        let mut child_rel = rel.clone();
                        child_rel.push(&e.name);
                        let child_ino = inodes.lock().unwrap().ensure(child_rel);
                        all.push((child_ino, e.kind, e.name.to_string_lossy().into_owned()));
                    }
                    for (i, (child_ino, kind, name)) in
                        all.into_iter().enumerate().skip(offset as usize)
                    {
                        if reply.add(child_ino, (i + 1) as i64, kind, name) {
                            break;
                        }
                    }
                    reply.ok();
                }
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }
}

impl MigratingFs {
    fn remove_entry(&mut self, parent: u64, name: &OsStr, is_dir: bool, reply: ReplyEmpty) {
        let Some(parent_rel) = self.rel_for(parent) else {
            reply.error(libc::ESTALE);
            return;
        };
        let ctx = self.ctx.clone();
        let name = name.to_os_string();
        let inodes_mutex = self.inodes_handle();
        self.rt.spawn(async move {
            let mut rel = parent_rel.clone();
            rel.push(&name);
            match node::remove(&ctx, &rel, is_dir).await {
                Ok(()) => {
                    inodes_mutex.lock().unwrap().forget_path(&rel);
                    reply.ok();
                }
                Err(e) => reply.error(e.to_errno()),
            }
        });
    }
}
