//! End-to-end exercises of the splicing handle and node dispatch layer
//! against real temp directories, without going through a FUSE mount.

use std::path::{Path, PathBuf};

use nfs_mamont_migrate::context::FsContext;
use nfs_mamont_migrate::handle::SplicingHandle;
use nfs_mamont_migrate::node;
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    ctx: FsContext,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().expect("create tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&dst).unwrap();
        let ctx = FsContext::new(src, dst);
        Self { _tmp: tmp, ctx }
    }

    fn src_path(&self, rel: &str) -> PathBuf {
        self.ctx.src_path(Path::new(rel))
    }

    fn dst_path(&self, rel: &str) -> PathBuf {
        self.ctx.dst_path(Path::new(rel))
    }
}

#[tokio::test]
async fn read_only_drain_mirrors_and_unlinks_src() {
    let fx = Fixture::new();
    std::fs::write(fx.src_path("a"), b"abcdefghij").unwrap();

    let mut handle = SplicingHandle::open(&fx.ctx, PathBuf::from("a"), libc::O_RDONLY, 0o644)
        .await
        .unwrap();

    let data = handle.read(&fx.ctx, 0, 10).await.unwrap();
    assert_eq!(&data, b"abcdefghij");

    assert_eq!(std::fs::read(fx.dst_path("a")).unwrap(), b"abcdefghij");
    assert!(!fx.src_path("a").exists());

    handle.release().await.unwrap();

    // Reopening now sees a single-backed file served entirely from DST.
    let mut reopened = SplicingHandle::open(&fx.ctx, PathBuf::from("a"), libc::O_RDONLY, 0o644)
        .await
        .unwrap();
    let data = reopened.read(&fx.ctx, 0, 10).await.unwrap();
    assert_eq!(&data, b"abcdefghij");
}

#[tokio::test]
async fn partial_read_then_completing_read() {
    let fx = Fixture::new();
    std::fs::write(fx.src_path("a"), b"0123456789").unwrap();

    let mut handle = SplicingHandle::open(&fx.ctx, PathBuf::from("a"), libc::O_RDWR, 0o644)
        .await
        .unwrap();

    let first = handle.read(&fx.ctx, 0, 4).await.unwrap();
    assert_eq!(&first, b"0123");
    assert!(fx.src_path("a").exists());

    let second = handle.read(&fx.ctx, 4, 6).await.unwrap();
    assert_eq!(&second, b"456789");

    assert_eq!(std::fs::read(fx.dst_path("a")).unwrap(), b"0123456789");
    assert!(!fx.src_path("a").exists());
}

#[tokio::test]
async fn write_invalidates_mirrored_interval() {
    let fx = Fixture::new();
    std::fs::write(fx.src_path("a"), b"AAAAAAAAAA").unwrap();

    let mut handle = SplicingHandle::open(&fx.ctx, PathBuf::from("a"), libc::O_RDWR, 0o644)
        .await
        .unwrap();

    let first = handle.read(&fx.ctx, 0, 5).await.unwrap();
    assert_eq!(&first, b"AAAAA");

    handle.write(&fx.ctx, 2, b"BB").await.unwrap();
    assert_eq!(std::fs::read(fx.src_path("a")).unwrap(), b"AABBAAAAAA");

    // DST at [2,4) is now stale relative to the interval set; a re-read
    // of the overlapping region must re-mirror it rather than trust the
    // old bytes.
    let reread = handle.read(&fx.ctx, 0, 5).await.unwrap();
    assert_eq!(&reread, b"AABBA");

    let final_read = handle.read(&fx.ctx, 5, 5).await.unwrap();
    assert_eq!(&final_read, b"AAAAA");

    assert_eq!(std::fs::read(fx.dst_path("a")).unwrap(), b"AABBAAAAAA");
    assert!(!fx.src_path("a").exists());
}

#[tokio::test]
async fn file_born_in_dst_never_touches_src() {
    let fx = Fixture::new();

    let mut handle = SplicingHandle::open(
        &fx.ctx,
        PathBuf::from("b"),
        libc::O_RDWR | libc::O_CREAT,
        0o644,
    )
    .await
    .unwrap();
    handle.write(&fx.ctx, 0, b"hello").await.unwrap();
    handle.release().await.unwrap();

    assert_eq!(std::fs::read(fx.dst_path("b")).unwrap(), b"hello");
    assert!(!fx.src_path("b").exists());
    assert!(fx.ctx.existing_migration_state(Path::new("b")).is_none());
}

#[tokio::test]
async fn readdir_shadows_src_entries_with_dst() {
    let fx = Fixture::new();
    std::fs::write(fx.src_path("x"), b"x").unwrap();
    std::fs::write(fx.src_path("y"), b"src-y").unwrap();
    std::fs::write(fx.dst_path("y"), b"dst-y").unwrap();
    std::fs::write(fx.dst_path("z"), b"z").unwrap();

    let entries = node::readdir(&fx.ctx, Path::new("")).await.unwrap();
    let mut names: Vec<String> =
        entries.iter().map(|e| e.name.to_string_lossy().into_owned()).collect();
    names.sort();
    assert_eq!(names, vec!["x", "y", "z"]);
}

#[tokio::test]
async fn mkdir_propagates_mode_and_creates_both_trees() {
    // A kernel-driven `mkdir -p` issues one FUSE mkdir call per path
    // component, each against an already-resolved parent. By the time
    // "a/b/c/d" is created, "a/b/c" was created (in both trees) by the
    // previous call, so its SRC ancestor chain is always intact.
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.src_path("a/b")).unwrap();
    std::fs::set_permissions(
        fx.src_path("a/b"),
        std::os::unix::fs::PermissionsExt::from_mode(0o750),
    )
    .unwrap();

    node::mkdir(&fx.ctx, Path::new("a/b/c"), 0o755).await.unwrap();
    node::mkdir(&fx.ctx, Path::new("a/b/c/d"), 0o700).await.unwrap();

    assert!(fx.dst_path("a/b/c").is_dir());
    assert!(fx.src_path("a/b/c").is_dir());
    assert!(fx.dst_path("a/b/c/d").is_dir());
    assert!(fx.src_path("a/b/c/d").is_dir());

    // The ancestor "a/b", materialized in DST by create_path_upto while
    // creating "a/b/c", copies its mode from SRC's "a/b".
    let b_mode = std::fs::metadata(fx.dst_path("a/b")).unwrap().permissions();
    assert_eq!(
        std::os::unix::fs::PermissionsExt::mode(&b_mode) & 0o777,
        0o750
    );
    let d_mode = std::fs::metadata(fx.dst_path("a/b/c/d")).unwrap().permissions();
    assert_eq!(
        std::os::unix::fs::PermissionsExt::mode(&d_mode) & 0o777,
        0o700
    );
}

#[tokio::test]
async fn mkdir_fails_when_src_ancestor_chain_is_absent() {
    // Directly targeting a multi-level path whose intermediate ancestor
    // was never created in SRC is fatal, matching the original tool:
    // `create_path_upto` requires every ancestor to already exist in
    // SRC rather than silently falling back to a DST-only tree.
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.src_path("a")).unwrap();

    let err = node::mkdir(&fx.ctx, Path::new("a/b/c"), 0o755).await.unwrap_err();
    assert!(matches!(err, nfs_mamont_migrate::error::Error::NotFound));
    assert!(!fx.dst_path("a/b").exists());
}

#[tokio::test]
async fn remove_clears_both_copies_and_forgets_migration_state() {
    let fx = Fixture::new();
    std::fs::write(fx.src_path("a"), b"0123456789").unwrap();

    let mut handle = SplicingHandle::open(&fx.ctx, PathBuf::from("a"), libc::O_RDWR, 0o644)
        .await
        .unwrap();
    handle.read(&fx.ctx, 0, 4).await.unwrap();
    handle.release().await.unwrap();
    assert!(fx.ctx.existing_migration_state(Path::new("a")).is_some());

    node::remove(&fx.ctx, Path::new("a"), false).await.unwrap();

    assert!(!fx.dst_path("a").exists());
    assert!(!fx.src_path("a").exists());
    assert!(fx.ctx.existing_migration_state(Path::new("a")).is_none());
}

#[tokio::test]
async fn truncate_clamps_interval_set_to_avoid_premature_completion() {
    use nfs_mamont_migrate::node::SetAttrRequest;

    let fx = Fixture::new();
    std::fs::write(fx.src_path("a"), b"0123456789").unwrap();

    let mut handle = SplicingHandle::open(&fx.ctx, PathBuf::from("a"), libc::O_RDWR, 0o644)
        .await
        .unwrap();
    // Partial mirror only; migration stays in progress.
    handle.read(&fx.ctx, 0, 4).await.unwrap();
    assert!(fx.src_path("a").exists());

    node::setattr(&fx.ctx, Path::new("a"), SetAttrRequest { size: Some(2), ..Default::default() })
        .await
        .unwrap();

    let state = fx.ctx.existing_migration_state(Path::new("a")).expect("state retained");
    let guard = state.lock().await;
    assert!(guard.covered.covers(0, 2));
    assert!(!guard.covered.covers(0, 4));
    drop(guard);

    handle.release().await.unwrap();
}
