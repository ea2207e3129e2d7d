//! Replays the audit log over the seed directory, maintaining the live
//! `vpath → vnode` map for a session (spec.md §4.D).

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use hpfs_log::{AuditLog, BlockSegment, HpfsError, LogRecord, Operation};
use tracing::debug;

use crate::payload::{layout_write_block, TruncatePayload, WritePayload};
use crate::seed_tracker::SeedPathTracker;
use crate::vnode::{Backing, DataSegment, Stat, Vnode};

fn parent_path(vpath: &str) -> &str {
    if vpath == "/" {
        return "/";
    }
    match vpath.rfind('/') {
        Some(0) => "/",
        Some(idx) => &vpath[..idx],
        None => "/",
    }
}

fn base_name(vpath: &str) -> &str {
    if vpath == "/" {
        return "/";
    }
    match vpath.rfind('/') {
        Some(idx) => &vpath[idx + 1..],
        None => vpath,
    }
}

/// Outcome of applying one record, surfaced to callers that also need to update a
/// hash tree (they need to know which vpath ended up holding the vnode, since rename
/// changes the key).
pub struct Applied {
    pub vpath: String,
    pub operation: Operation,
}

pub struct VfsBuilder {
    seed_dir: PathBuf,
    readonly: bool,
    seed_paths: SeedPathTracker,
    vnodes: HashMap<String, Vnode>,
    next_ino: u64,
    log_scanned_upto: u64,
    last_checkpoint: u64,
    log_file: Arc<File>,
}

impl VfsBuilder {
    pub fn new(seed_dir: impl Into<PathBuf>, readonly: bool, log: &AuditLog) -> Result<Self, HpfsError> {
        let seed_dir = seed_dir.into();
        let mut builder = VfsBuilder {
            seed_paths: SeedPathTracker::new(&seed_dir),
            seed_dir,
            readonly,
            vnodes: HashMap::new(),
            next_ino: 2,
            log_scanned_upto: 0,
            last_checkpoint: log.header().last_checkpoint,
            log_file: Arc::new(log.try_clone_file()?),
        };
        builder.add_vnode_from_seed("/")?;
        builder.build_vfs(log)?;
        Ok(builder)
    }

    fn alloc_ino(&mut self, vpath: &str) -> u64 {
        if vpath == "/" {
            return 1;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn add_vnode(&mut self, vpath: &str) {
        let ino = self.alloc_ino(vpath);
        self.vnodes.insert(vpath.to_string(), Vnode::new(ino, Stat::new_dir(0)));
    }

    fn add_vnode_from_seed(&mut self, vpath: &str) -> Result<(), HpfsError> {
        let resolved = self.seed_paths.resolve(vpath);
        if self.seed_paths.is_removed(&resolved) || self.seed_paths.is_renamed(&resolved) {
            return Ok(());
        }

        let seed_path = self.seed_dir.join(resolved.trim_start_matches('/'));
        let meta = match std::fs::symlink_metadata(&seed_path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let ino = self.alloc_ino(vpath);
        let mode = if meta.is_dir() {
            libc::S_IFDIR as u32 | 0o755
        } else {
            libc::S_IFREG as u32 | 0o644
        };
        let mut vnode = Vnode::new(
            ino,
            Stat { mode, size: meta.len(), mtime: 0 },
        );

        if meta.is_file() {
            let file = Arc::new(File::open(&seed_path)?);
            let size = meta.len();
            if size > 0 {
                vnode.data_segs.push(DataSegment {
                    backing: Backing::Seed(Arc::clone(&file)),
                    size,
                    source_offset: 0,
                    logical_offset: 0,
                });
            }
            vnode.seed_file = Some(file);
            vnode.max_size = size;
            vnode.update_mmap()?;
        }

        self.vnodes.insert(vpath.to_string(), vnode);
        Ok(())
    }

    /// Materializes `vpath` from the seed if it isn't already known, and returns it.
    pub fn get_vnode(&mut self, vpath: &str) -> Result<Option<&Vnode>, HpfsError> {
        let normalized = if vpath.chars().all(|c| c == '/') { "/" } else { vpath };
        if !self.vnodes.contains_key(normalized) {
            self.add_vnode_from_seed(normalized)?;
        }
        Ok(self.vnodes.get(normalized))
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn log_scanned_upto(&self) -> u64 {
        self.log_scanned_upto
    }

    /// Advances replay over unread log records, up to `last_checkpoint` for RO
    /// sessions.
    pub fn build_vfs(&mut self, log: &AuditLog) -> Result<(), HpfsError> {
        if self.readonly && self.log_scanned_upto >= self.last_checkpoint {
            return Ok(());
        }

        let mut next_offset = self.log_scanned_upto;
        loop {
            let Some((record, next)) = log.read_at(next_offset)? else {
                break;
            };

            let payload = log.read_payload(&record)?;
            self.apply_log_record(&record, &payload)?;
            self.log_scanned_upto = record.offset + record.size;
            next_offset = next;

            if next_offset == 0 || (self.readonly && self.log_scanned_upto >= self.last_checkpoint) {
                break;
            }
        }

        Ok(())
    }

    /// Applies one record's effect to the vnode map (used both by replay and,
    /// immediately after a live append, by the session layer).
    pub fn apply_log_record(&mut self, record: &LogRecord, payload: &[u8]) -> Result<Applied, HpfsError> {
        if !self.vnodes.contains_key(&record.vpath) {
            if !matches!(record.operation(), Operation::Mkdir | Operation::Create) {
                self.add_vnode_from_seed(&record.vpath)?;
                if !self.vnodes.contains_key(&record.vpath) {
                    return Err(HpfsError::CorruptRecord {
                        offset: record.offset,
                        reason: format!("no vnode and no seed backing for {}", record.vpath),
                    });
                }
            } else {
                self.add_vnode(&record.vpath);
            }
        }

        let mut final_vpath = record.vpath.clone();

        match record.operation() {
            Operation::Mkdir => {
                let mode = read_mode(payload)?;
                let vn = self.vnodes.get_mut(&record.vpath).unwrap();
                vn.stat.mode = libc::S_IFDIR as u32 | mode;
            }
            Operation::Create => {
                let mode = read_mode(payload)?;
                let vn = self.vnodes.get_mut(&record.vpath).unwrap();
                vn.stat.mode = libc::S_IFREG as u32 | mode;
            }
            Operation::Chmod => {
                let mode = read_mode(payload)?;
                let vn = self.vnodes.get_mut(&record.vpath).unwrap();
                let type_bits = if vn.stat.is_file() { libc::S_IFREG as u32 } else { libc::S_IFDIR as u32 };
                vn.stat.mode = type_bits | mode;
            }
            Operation::Rmdir => {
                self.delete_vnode(&record.vpath)?;
                self.seed_paths.remove(&record.vpath, true);
            }
            Operation::Unlink => {
                self.delete_vnode(&record.vpath)?;
                self.seed_paths.remove(&record.vpath, false);
            }
            Operation::Rename => {
                let to_vpath = std::str::from_utf8(payload)
                    .map_err(|_| HpfsError::InvalidRename { reason: "destination is not utf-8".to_string() })?
                    .to_string();

                let is_dir = self
                    .vnodes
                    .get(&record.vpath)
                    .map(|vn| vn.stat.is_dir())
                    .unwrap_or(false);
                self.seed_paths.rename(&record.vpath, &to_vpath, is_dir);

                let from_vpath = record.vpath.clone();
                let descendants: Vec<String> = self
                    .vnodes
                    .keys()
                    .filter(|vpath| vpath.len() > from_vpath.len() && vpath.starts_with(from_vpath.as_str()))
                    .cloned()
                    .collect();
                for vpath in descendants {
                    if let Some(vn) = self.vnodes.remove(&vpath) {
                        let new_vpath = format!("{to_vpath}{}", &vpath[from_vpath.len()..]);
                        self.vnodes.insert(new_vpath, vn);
                    }
                }

                if let Some(vn) = self.vnodes.remove(&from_vpath) {
                    self.vnodes.insert(to_vpath.clone(), vn);
                }
                final_vpath = to_vpath;
            }
            Operation::Write => {
                let wh = WritePayload::decode(payload).ok_or_else(|| HpfsError::CorruptRecord {
                    offset: record.offset,
                    reason: "truncated write payload".to_string(),
                })?;

                if record.header.block_data_len > 0 {
                    let vn = self.vnodes.get_mut(&record.vpath).unwrap();
                    vn.data_segs.push(DataSegment {
                        backing: Backing::Log(Arc::clone(&self.log_file)),
                        size: record.header.block_data_len,
                        source_offset: record.block_data_offset,
                        logical_offset: wh.mmap_block_offset,
                    });
                }

                let vn = self.vnodes.get_mut(&record.vpath).unwrap();
                let new_end = wh.offset + wh.size;
                if vn.stat.size < new_end {
                    vn.stat.size = new_end;
                    vn.max_size = vn.max_size.max(vn.stat.size);
                }
                vn.update_mmap()?;
            }
            Operation::Truncate => {
                let th = TruncatePayload::decode(payload).ok_or_else(|| HpfsError::CorruptRecord {
                    offset: record.offset,
                    reason: "truncated truncate payload".to_string(),
                })?;

                if record.header.block_data_len > 0 {
                    let vn = self.vnodes.get_mut(&record.vpath).unwrap();
                    vn.data_segs.push(DataSegment {
                        backing: Backing::Log(Arc::clone(&self.log_file)),
                        size: record.header.block_data_len,
                        source_offset: record.block_data_offset,
                        logical_offset: th.mmap_block_offset,
                    });
                }

                let vn = self.vnodes.get_mut(&record.vpath).unwrap();
                vn.stat.size = th.size;
                vn.max_size = vn.max_size.max(vn.stat.size);
                vn.update_mmap()?;
            }
            Operation::Chown => {
                // No-op: ownership isn't part of the data model.
            }
        }

        debug!(op = record.operation().as_str(), vpath = %final_vpath, "applied log record");
        Ok(Applied { vpath: final_vpath, operation: record.operation() })
    }

    fn delete_vnode(&mut self, vpath: &str) -> Result<(), HpfsError> {
        // Dropping the vnode drops its CompositeMap (which unmaps) and its Arc<File>
        // handles (which close once the last reference goes away).
        self.vnodes.remove(vpath);
        Ok(())
    }

    /// Union of seed-directory children (filtered by renames/removals) and vpaths
    /// whose parent is `vpath`, each force-materialized so its stat is available.
    pub fn dir_children(&mut self, vpath: &str) -> Result<Vec<(String, Stat)>, HpfsError> {
        let mut names = std::collections::HashSet::new();

        let resolved = self.seed_paths.resolve(vpath);
        let seed_path = self.seed_dir.join(resolved.trim_start_matches('/'));
        if let Ok(entries) = std::fs::read_dir(&seed_path) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                let child_seed_path = if resolved.ends_with('/') {
                    format!("{resolved}{name}")
                } else {
                    format!("{resolved}/{name}")
                };
                if !self.seed_paths.is_removed(&child_seed_path) && !self.seed_paths.is_renamed(&child_seed_path) {
                    names.insert(name);
                }
            }
        }

        for vn_path in self.vnodes.keys() {
            if vn_path == "/" {
                continue;
            }
            if parent_path(vn_path) == vpath {
                names.insert(base_name(vn_path).to_string());
            }
        }

        let mut children = Vec::new();
        let mut sorted: Vec<String> = names.into_iter().collect();
        sorted.sort();
        for name in sorted {
            let child_vpath = if vpath.ends_with('/') {
                format!("{vpath}{name}")
            } else {
                format!("{vpath}/{name}")
            };
            if let Some(vn) = self.get_vnode(&child_vpath)? {
                children.push((name, vn.stat));
            }
        }

        Ok(children)
    }

    /// Tears down every vnode and replays the log from the start.
    pub fn rebuild(&mut self, log: &AuditLog) -> Result<(), HpfsError> {
        self.vnodes.clear();
        self.log_scanned_upto = 0;
        self.next_ino = 2;
        self.seed_paths = SeedPathTracker::new(&self.seed_dir);
        self.add_vnode_from_seed("/")?;
        self.build_vfs(log)
    }

    /// Composes the block-buffer layout for a pending write against `vpath`, reading
    /// whatever existing bytes it needs from the vnode's current mmap region.
    pub fn prepare_write<'a>(
        &mut self,
        vpath: &str,
        offset: u64,
        buf: &'a [u8],
    ) -> Result<(WritePayload, u64, u64, Vec<BlockSegment<'a>>), HpfsError> {
        let vn = self.get_vnode(vpath)?.ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?;
        let file_size = vn.stat.size;
        let existing: Option<Vec<u8>> = if file_size > 0 {
            Some(vn.read(0, file_size))
        } else {
            None
        };
        let (block_start, block_end, segments) =
            layout_write_block(existing.as_deref(), file_size, offset, buf);

        let payload = WritePayload {
            size: buf.len() as u64,
            offset,
            mmap_block_size: block_end - block_start,
            mmap_block_offset: block_start,
            data_offset_in_block: offset - block_start,
        };
        Ok((payload, block_start, block_end, segments))
    }
}

fn read_mode(payload: &[u8]) -> Result<u32, HpfsError> {
    if payload.len() < 4 {
        return Err(HpfsError::CorruptRecord { offset: 0, reason: "mode payload truncated".to_string() });
    }
    Ok(u32::from_le_bytes(payload[0..4].try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpfs_log::{AuditLog, LogMode};

    fn mode_payload(mode: u32) -> Vec<u8> {
        mode.to_le_bytes().to_vec()
    }

    #[test]
    fn mkdir_then_create_materialize_vnodes() {
        let dir = tempfile::tempdir().unwrap();
        let seed_dir = dir.path().join("seed");
        std::fs::create_dir_all(&seed_dir).unwrap();

        let mut log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
        log.append(Operation::Mkdir, 1, "/a", Some(&mode_payload(0o755)), &[]).unwrap();
        log.append(Operation::Create, 2, "/a/f.txt", Some(&mode_payload(0o644)), &[]).unwrap();

        let mut builder = VfsBuilder::new(&seed_dir, false, &log).unwrap();
        let dir_vn = builder.get_vnode("/a").unwrap().unwrap();
        assert!(dir_vn.stat.is_dir());
        let file_vn = builder.get_vnode("/a/f.txt").unwrap().unwrap();
        assert!(file_vn.stat.is_file());
    }

    #[test]
    fn write_then_read_round_trips_through_the_builder() {
        let dir = tempfile::tempdir().unwrap();
        let seed_dir = dir.path().join("seed");
        std::fs::create_dir_all(&seed_dir).unwrap();

        let mut log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
        log.append(Operation::Create, 1, "/f.txt", Some(&mode_payload(0o644)), &[])
            .unwrap();

        let mut builder = VfsBuilder::new(&seed_dir, false, &log).unwrap();

        let data = b"hello, hpfs";
        let (payload, _start, _end, segments) = builder.prepare_write("/f.txt", 0, data).unwrap();
        let offset = log
            .append(Operation::Write, 2, "/f.txt", Some(&payload.encode()), &segments)
            .unwrap();

        let (record, _) = log.read_at(offset).unwrap().unwrap();
        let payload_bytes = log.read_payload(&record).unwrap();
        builder.apply_log_record(&record, &payload_bytes).unwrap();

        let vn = builder.get_vnode("/f.txt").unwrap().unwrap();
        assert_eq!(vn.stat.size, data.len() as u64);
        assert_eq!(vn.read(0, data.len() as u64), data);
    }

    #[test]
    fn rename_rekeys_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let seed_dir = dir.path().join("seed");
        std::fs::create_dir_all(&seed_dir).unwrap();

        let mut log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
        log.append(Operation::Mkdir, 1, "/a", Some(&mode_payload(0o755)), &[]).unwrap();
        log.append(Operation::Create, 2, "/a/f.txt", Some(&mode_payload(0o644)), &[])
            .unwrap();
        log.append(Operation::Rename, 3, "/a", Some(b"/b".as_slice()), &[]).unwrap();

        let mut builder = VfsBuilder::new(&seed_dir, false, &log).unwrap();
        assert!(builder.get_vnode("/a").unwrap().is_none());
        assert!(builder.get_vnode("/b").unwrap().is_some());
        assert!(builder.get_vnode("/b/f.txt").unwrap().is_some());
    }

    #[test]
    fn unlink_removes_vnode() {
        let dir = tempfile::tempdir().unwrap();
        let seed_dir = dir.path().join("seed");
        std::fs::create_dir_all(&seed_dir).unwrap();

        let mut log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
        log.append(Operation::Create, 1, "/f.txt", Some(&mode_payload(0o644)), &[])
            .unwrap();
        log.append(Operation::Unlink, 2, "/f.txt", None, &[]).unwrap();

        let mut builder = VfsBuilder::new(&seed_dir, false, &log).unwrap();
        assert!(builder.get_vnode("/f.txt").unwrap().is_none());
    }

    #[test]
    fn dir_children_lists_vnode_backed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let seed_dir = dir.path().join("seed");
        std::fs::create_dir_all(&seed_dir).unwrap();

        let mut log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
        log.append(Operation::Create, 1, "/a.txt", Some(&mode_payload(0o644)), &[])
            .unwrap();
        log.append(Operation::Create, 2, "/b.txt", Some(&mode_payload(0o644)), &[])
            .unwrap();

        let mut builder = VfsBuilder::new(&seed_dir, false, &log).unwrap();
        let children = builder.dir_children("/").unwrap();
        let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn readonly_session_does_not_advance_past_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let seed_dir = dir.path().join("seed");
        std::fs::create_dir_all(&seed_dir).unwrap();
        let log_path = dir.path().join("log.hpfs");

        {
            let mut log = AuditLog::open(&log_path, LogMode::Rw).unwrap();
            log.append(Operation::Mkdir, 1, "/a", Some(&mode_payload(0o755)), &[]).unwrap();
            // Checkpoint is committed on drop.
        }

        {
            let mut log = AuditLog::open(&log_path, LogMode::Rw).unwrap();
            log.append(Operation::Mkdir, 2, "/b", Some(&mode_payload(0o755)), &[]).unwrap();
            // No drop yet: RO session below should only see up to the earlier checkpoint.
            let log_ro = AuditLog::open(&log_path, LogMode::Ro).unwrap();
            let mut builder = VfsBuilder::new(&seed_dir, true, &log_ro).unwrap();
            assert!(builder.get_vnode("/a").unwrap().is_some());
            assert!(builder.get_vnode("/b").unwrap().is_none());
            drop(log);
        }
    }
}
