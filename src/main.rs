use std::process::ExitCode;

use clap::Parser;

use nfs_mamont_migrate::cli::Args;
use nfs_mamont_migrate::context::FsContext;
use nfs_mamont_migrate::fuse_fs::MigratingFs;
use nfs_mamont_migrate::logging;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let args = Args::parse();

    let src_root = match std::fs::canonicalize(&args.src_root) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(path = ?args.src_root, error = %e, "cannot resolve src root");
            return ExitCode::from(1);
        }
    };
    let dst_root = match std::fs::canonicalize(&args.dst_root) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(path = ?args.dst_root, error = %e, "cannot resolve dst root");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&args.mountpoint) {
        tracing::error!(path = ?args.mountpoint, error = %e, "cannot create mountpoint");
        return ExitCode::from(1);
    }

    let ctx = FsContext::new(src_root, dst_root);
    let rt = tokio::runtime::Handle::current();
    let fs = MigratingFs::new(ctx, rt);
    let mountpoint = args.mountpoint.clone();

    let result = tokio::task::spawn_blocking(move || {
        fuser::mount2(fs, &mountpoint, &[fuser::MountOption::FSName("ldmfs".to_string())])
    })
    .await;

    match result {
        Ok(Ok(())) => ExitCode::from(0),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "fuse session ended with an error");
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!(error = %e, "mount task panicked");
            ExitCode::from(1)
        }
    }
}
