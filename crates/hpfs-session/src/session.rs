//! Wires the audit log, VFS, and hash tree together into one filesystem session, and
//! a manager for the reserved-path protocol that starts/stops sessions over the mount
//! surface (spec.md §4.H).
//!
//! A session is started by creating a file with a reserved name, and stopped by
//! unlinking it; its presence can be probed with a plain `stat`. There is at most one
//! read-write session at a time; read-only sessions may run in parallel.
//!
//!   RW session:  `/::hpfs.rw.hmap` (hash tracking on) or `/::hpfs.rw` (off)
//!   RO session:  `/::hpfs.ro.hmap.<name>` or `/::hpfs.ro.<name>`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use hpfs_log::{AuditLog, BlockSegment, HpfsError, LogMode, Operation};
use hpfs_merkle::{HashQuery, HashTree};
use hpfs_vfs::{Applied, TruncatePayload, VfsBuilder, WritePayload};
use parking_lot::RwLock;
use tracing::info;

use crate::error::SessionError;

const RW_HMAP_FILE: &str = "/::hpfs.rw.hmap";
const RW_NOHMAP_FILE: &str = "/::hpfs.rw";
const RO_HMAP_PREFIX: &str = "/::hpfs.ro.hmap.";
const RO_NOHMAP_PREFIX: &str = "/::hpfs.ro.";
const RW_SESSION_NAME: &str = "rw";

/// Splits a mount-relative path into its leading session-name component and the
/// resource path beneath it (always starting with `/`).
pub fn split_path(path: &str) -> (String, String) {
    let rest = path.strip_prefix('/').unwrap_or(path);
    match rest.find('/') {
        Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
        None => (rest.to_string(), "/".to_string()),
    }
}

#[derive(Debug, Clone)]
struct SessionArgs {
    readonly: bool,
    name: String,
    hmap_enabled: bool,
}

fn parse_session_args(path: &str) -> Option<SessionArgs> {
    if path == RW_HMAP_FILE {
        return Some(SessionArgs { readonly: false, name: RW_SESSION_NAME.to_string(), hmap_enabled: true });
    }
    if path == RW_NOHMAP_FILE {
        return Some(SessionArgs { readonly: false, name: RW_SESSION_NAME.to_string(), hmap_enabled: false });
    }
    if let Some(rest) = path.strip_prefix(RO_HMAP_PREFIX) {
        return (!rest.is_empty()).then(|| SessionArgs { readonly: true, name: rest.to_string(), hmap_enabled: true });
    }
    if let Some(rest) = path.strip_prefix(RO_NOHMAP_PREFIX) {
        return (!rest.is_empty())
            .then(|| SessionArgs { readonly: true, name: rest.to_string(), hmap_enabled: false });
    }
    None
}

/// One live view over the filesystem: its own audit log handle, replayed VFS, and
/// (if hash tracking is enabled for it) hash tree + query surface.
pub struct Session {
    pub ino: u64,
    pub readonly: bool,
    pub log: AuditLog,
    pub vfs: VfsBuilder,
    pub hmap: Option<HashTree>,
    pub query: Option<HashQuery>,
}

impl Session {
    pub fn open(
        ino: u64,
        seed_dir: impl Into<PathBuf>,
        log_path: impl AsRef<Path>,
        readonly: bool,
        hmap_dir: Option<PathBuf>,
    ) -> Result<Self, HpfsError> {
        let log = AuditLog::open(log_path, if readonly { LogMode::Ro } else { LogMode::Rw })?;
        let mut vfs = VfsBuilder::new(seed_dir, readonly, &log)?;

        let (hmap, query) = match hmap_dir {
            Some(hmap_dir) => {
                let mut tree = HashTree::new(hmap_dir);
                tree.init(&mut vfs)?;
                (Some(tree), Some(HashQuery))
            }
            None => (None, None),
        };

        Ok(Session { ino, readonly, log, vfs, hmap, query })
    }

    /// Appends one record, applies it to the in-memory VFS, and — if hash tracking is
    /// enabled — updates the hash tree and patches the record's `root_hash` field in
    /// place. This is the full per-operation integration (spec.md §4.F): every mutating
    /// call goes through here rather than touching the log or VFS directly.
    pub fn record_and_apply(
        &mut self,
        operation: Operation,
        timestamp: i64,
        vpath: &str,
        payload: Option<&[u8]>,
        block_segments: &[BlockSegment<'_>],
    ) -> Result<Applied, HpfsError> {
        if self.readonly {
            return Err(HpfsError::ReadOnlySession);
        }

        let from_vpath = vpath.to_string();
        let was_dir = self.vfs.get_vnode(vpath)?.map(|vn| vn.stat.is_dir()).unwrap_or(false);

        let offset = self.log.append(operation, timestamp, vpath, payload, block_segments)?;
        let (record, _) = self.log.read_at(offset)?.ok_or_else(|| HpfsError::CorruptRecord {
            offset,
            reason: "record vanished immediately after its own append".to_string(),
        })?;
        let record_payload = self.log.read_payload(&record)?;
        let applied = self.vfs.apply_log_record(&record, &record_payload)?;

        if let Some(tree) = &mut self.hmap {
            match operation {
                Operation::Mkdir | Operation::Create => tree.apply_create(&mut self.vfs, &applied.vpath)?,
                Operation::Chmod => tree.apply_metadata_update(&mut self.vfs, &applied.vpath)?,
                Operation::Rmdir | Operation::Unlink => tree.apply_delete(&applied.vpath)?,
                Operation::Rename => tree.apply_rename(&from_vpath, &applied.vpath, was_dir)?,
                Operation::Write => {
                    let wh = WritePayload::decode(&record_payload).ok_or_else(|| HpfsError::CorruptRecord {
                        offset: record.offset,
                        reason: "truncated write payload".to_string(),
                    })?;
                    tree.apply_data_update(&mut self.vfs, &applied.vpath, wh.offset, wh.size)?;
                }
                Operation::Truncate => {
                    let th = TruncatePayload::decode(&record_payload).ok_or_else(|| HpfsError::CorruptRecord {
                        offset: record.offset,
                        reason: "truncated truncate payload".to_string(),
                    })?;
                    tree.apply_data_update(&mut self.vfs, &applied.vpath, 0, th.size)?;
                }
                Operation::Chown => {}
            }

            let root_hash = tree.root_hash();
            self.log.patch_root_hash(record.offset, root_hash)?;
            tree.persist().map_err(HpfsError::Io)?;
        }

        Ok(applied)
    }
}

/// Tracks every started session by name, arbitrating the reserved session-control
/// paths. Readers (path lookups) and writers (start/stop) share one lock, same as
/// the reference's single `sessions_mutex` guarding its session map.
pub struct SessionManager {
    seed_dir: PathBuf,
    log_path: PathBuf,
    hmap_dir: PathBuf,
    next_ino: AtomicU64,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(seed_dir: impl Into<PathBuf>, log_path: impl Into<PathBuf>, hmap_dir: impl Into<PathBuf>) -> Self {
        SessionManager {
            seed_dir: seed_dir.into(),
            log_path: log_path.into(),
            hmap_dir: hmap_dir.into(),
            next_ino: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// `getattr` against a reserved session-control path. `None` means `path` isn't a
    /// session path at all — the caller should fall through to the ordinary VFS.
    pub fn check_getattr(&self, path: &str) -> Option<Result<u64, SessionError>> {
        let args = parse_session_args(path)?;
        let sessions = self.sessions.read();
        Some(
            sessions
                .get(&args.name)
                .map(|s| s.ino)
                .ok_or_else(|| SessionError::NotFound(args.name.clone())),
        )
    }

    /// `create` against a reserved session-control path: starts a new session.
    pub fn check_create(&self, path: &str) -> Option<Result<(), SessionError>> {
        let args = parse_session_args(path)?;
        Some(self.start(args))
    }

    fn start(&self, args: SessionArgs) -> Result<(), SessionError> {
        if args.name.is_empty() || (args.readonly && args.name == RW_SESSION_NAME) {
            return Err(SessionError::ReservedName(args.name));
        }

        let mut sessions = self.sessions.write();
        if sessions.contains_key(&args.name) {
            return Err(SessionError::AlreadyExists(args.name));
        }

        info!(name = %args.name, readonly = args.readonly, hmap = args.hmap_enabled, "starting session");
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        let hmap_dir = args.hmap_enabled.then(|| self.hmap_dir.clone());
        let session = Session::open(ino, &self.seed_dir, &self.log_path, args.readonly, hmap_dir)?;
        sessions.insert(args.name.clone(), session);
        info!(name = %args.name, "session started");
        Ok(())
    }

    /// `unlink` against a reserved session-control path: stops a session.
    pub fn check_unlink(&self, path: &str) -> Option<Result<(), SessionError>> {
        let args = parse_session_args(path)?;
        let mut sessions = self.sessions.write();
        match sessions.get(&args.name) {
            Some(session) if session.readonly == args.readonly => {
                sessions.remove(&args.name);
                info!(name = %args.name, "session stopped");
                Some(Ok(()))
            }
            _ => Some(Err(SessionError::NotFound(args.name))),
        }
    }

    pub fn with_session_mut<R>(&self, name: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.write();
        sessions.get_mut(name).map(f)
    }

    pub fn stop_all(&self) {
        self.sessions.write().clear();
    }

    pub fn list(&self) -> Vec<(u64, String)> {
        self.sessions.read().iter().map(|(name, s)| (s.ino, name.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("seed")).unwrap();
        let mgr = SessionManager::new(
            dir.path().join("seed"),
            dir.path().join("log.hpfs"),
            dir.path().join("hmap"),
        );
        (dir, mgr)
    }

    #[test]
    fn split_path_separates_session_name_from_resource() {
        assert_eq!(split_path("/rw/a/b.txt"), ("rw".to_string(), "/a/b.txt".to_string()));
        assert_eq!(split_path("/rw"), ("rw".to_string(), "/".to_string()));
    }

    #[test]
    fn parses_all_four_reserved_path_shapes() {
        let rw = parse_session_args(RW_HMAP_FILE).unwrap();
        assert!(!rw.readonly && rw.hmap_enabled && rw.name == "rw");

        let rw_no = parse_session_args(RW_NOHMAP_FILE).unwrap();
        assert!(!rw_no.readonly && !rw_no.hmap_enabled);

        let ro = parse_session_args("/::hpfs.ro.hmap.alice").unwrap();
        assert!(ro.readonly && ro.hmap_enabled && ro.name == "alice");

        let ro_no = parse_session_args("/::hpfs.ro.bob").unwrap();
        assert!(ro_no.readonly && !ro_no.hmap_enabled && ro_no.name == "bob");

        assert!(parse_session_args("/some/other/path").is_none());
        assert!(parse_session_args("/::hpfs.ro.hmap.").is_none());
    }

    #[test]
    fn start_then_getattr_then_stop_round_trips() {
        let (_dir, mgr) = manager();

        mgr.check_create(RW_NOHMAP_FILE).unwrap().unwrap();
        let ino = mgr.check_getattr(RW_NOHMAP_FILE).unwrap().unwrap();
        assert!(ino >= 1);

        mgr.check_unlink(RW_NOHMAP_FILE).unwrap().unwrap();
        assert!(mgr.check_getattr(RW_NOHMAP_FILE).unwrap().is_err());
    }

    #[test]
    fn starting_the_same_session_twice_fails() {
        let (_dir, mgr) = manager();
        mgr.check_create("/::hpfs.ro.a").unwrap().unwrap();
        assert!(mgr.check_create("/::hpfs.ro.a").unwrap().is_err());
    }

    #[test]
    fn readonly_session_named_rw_is_rejected() {
        let (_dir, mgr) = manager();
        assert!(mgr.check_create("/::hpfs.ro.rw").unwrap().is_err());
    }

    #[test]
    fn non_session_path_falls_through_as_none() {
        let (_dir, mgr) = manager();
        assert!(mgr.check_create("/regular/file.txt").is_none());
        assert!(mgr.check_getattr("/regular/file.txt").is_none());
    }

    #[test]
    fn mkdir_through_session_updates_hash_tree_and_patches_root_hash() {
        let (_dir, mgr) = manager();
        mgr.check_create(RW_HMAP_FILE).unwrap().unwrap();

        let offset = mgr
            .with_session_mut("rw", |session| {
                session
                    .record_and_apply(Operation::Mkdir, 1, "/a", Some(&0o755u32.to_le_bytes()), &[])
                    .unwrap();
                session.log.header().last_record
            })
            .unwrap();

        mgr.with_session_mut("rw", |session| {
            let (record, _) = session.log.read_at(offset).unwrap().unwrap();
            assert_ne!(record.header.root_hash, hpfs_hash::Hash32::EMPTY);
            assert!(session.hmap.as_mut().unwrap().root_hash() != hpfs_hash::Hash32::EMPTY);
        })
        .unwrap();
    }
}
