//! Shared filesystem context: the two roots and the migration-state map.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::migration::MigrationState;

/// The two absolute roots and the map from in-migration relative paths to
/// their shared migration state.
///
/// The map is a [`DashMap`], a sharded concurrent hash map, so lookups on
/// unrelated paths never contend. Its own internal locking is always
/// acquired and released before a caller takes the per-path
/// `tokio::sync::Mutex` returned from [`FsContext::migration_state`]; a
/// per-path lock is never held while re-entering the map for a different
/// path (see the concurrency notes in the splicing handle).
#[derive(Debug)]
pub struct FsContext {
    pub src_root: PathBuf,
    pub dst_root: PathBuf,
    migrations: DashMap<PathBuf, Arc<Mutex<MigrationState>>>,
}

impl FsContext {
    pub fn new(src_root: PathBuf, dst_root: PathBuf) -> Self {
        Self { src_root, dst_root, migrations: DashMap::new() }
    }

    /// Absolute SRC path for a relative path.
    pub fn src_path(&self, rel: &Path) -> PathBuf {
        join(&self.src_root, rel)
    }

    /// Absolute DST path for a relative path.
    pub fn dst_path(&self, rel: &Path) -> PathBuf {
        join(&self.dst_root, rel)
    }

    /// Look up the migration state for `rel`, if one is tracked.
    pub fn existing_migration_state(&self, rel: &Path) -> Option<Arc<Mutex<MigrationState>>> {
        self.migrations.get(rel).map(|e| e.value().clone())
    }

    /// Look up or create the migration state for `rel`, seeding a new one
    /// with `size_at_open` if none exists yet.
    pub fn get_or_create_migration_state(
        &self,
        rel: &Path,
        size_at_open: u64,
    ) -> Arc<Mutex<MigrationState>> {
        self.migrations
            .entry(rel.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(MigrationState::new(size_at_open))))
            .clone()
    }

    /// Remove the tracked migration state for `rel`, e.g. on completion or
    /// unlink.
    pub fn forget_migration_state(&self, rel: &Path) {
        self.migrations.remove(rel);
    }
}

fn join(root: &Path, rel: &Path) -> PathBuf {
    if rel.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}
