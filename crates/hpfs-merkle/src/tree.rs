//! Incremental Merkle-XOR hash maintenance over the virtual filesystem (spec.md §4.F).
//!
//! Every `node_hash` is `name_hash ⊕ meta_hash ⊕ (block hashes, for files | child
//! node hashes, for directories)`. XOR's commutativity means updating one child's
//! contribution never requires re-reading its siblings.

use hpfs_hash::Hash32;
use hpfs_log::HpfsError;
use hpfs_vfs::{Stat, VfsBuilder};
use tracing::debug;

use crate::store::{HashStore, VnodeHmap};

/// 4 MiB — much larger than the audit log's own 4 KiB block size, since this chunks
/// whole file contents for hashing rather than mmap placement.
const BLOCK_SIZE: u64 = 4 * 1024 * 1024;

fn parent_path(vpath: &str) -> String {
    if vpath == "/" {
        return "/".to_string();
    }
    match vpath.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => vpath[..idx].to_string(),
        None => "/".to_string(),
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

fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn compute_name_hash(vpath: &str) -> Hash32 {
    Hash32::of(base_name(vpath).as_bytes())
}

fn compute_meta_hash(mode: u32) -> Hash32 {
    Hash32::of(&mode.to_be_bytes())
}

pub struct HashTree {
    pub store: HashStore,
}

impl HashTree {
    pub fn new(hmap_dir: impl Into<std::path::PathBuf>) -> Self {
        HashTree { store: HashStore::new(hmap_dir) }
    }

    /// Trusts a persisted root if one exists (warm start); otherwise walks the whole
    /// VFS and computes every hash from scratch (cold start).
    pub fn init(&mut self, vfs: &mut VfsBuilder) -> Result<Hash32, HpfsError> {
        if let Some(root) = self.store.find("/") {
            return Ok(root.node_hash);
        }
        self.calculate_dir_hash(vfs, "/")
    }

    pub fn root_hash(&mut self) -> Hash32 {
        self.store.find("/").map(|h| h.node_hash).unwrap_or(Hash32::EMPTY)
    }

    pub fn persist(&mut self) -> std::io::Result<()> {
        self.store.persist()
    }

    fn calculate_dir_hash(&mut self, vfs: &mut VfsBuilder, vpath: &str) -> Result<Hash32, HpfsError> {
        let stat: Option<Stat> = if vpath == "/" {
            vfs.get_vnode(vpath)?.map(|v| v.stat)
        } else {
            Some(vfs.get_vnode(vpath)?.ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?.stat)
        };

        let mut hmap = VnodeHmap::new(false);
        hmap.name_hash = compute_name_hash(vpath);
        hmap.meta_hash = stat.map(|s| compute_meta_hash(s.mode)).unwrap_or(Hash32::EMPTY);
        hmap.node_hash = hmap.name_hash ^ hmap.meta_hash;

        let children = vfs.dir_children(vpath)?;
        for (name, child_stat) in children {
            let child_vpath = join(vpath, &name);
            let child_hash = if child_stat.is_dir() {
                self.calculate_dir_hash(vfs, &child_vpath)?
            } else {
                self.calculate_file_hash(vfs, &child_vpath)?
            };
            hmap.node_hash ^= child_hash;
        }

        let node_hash = hmap.node_hash;
        self.store.insert(vpath, hmap);
        self.store.set_dirty(vpath);
        Ok(node_hash)
    }

    fn calculate_file_hash(&mut self, vfs: &mut VfsBuilder, vpath: &str) -> Result<Hash32, HpfsError> {
        let vn = vfs.get_vnode(vpath)?.ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?;
        let size = vn.stat.size;
        let data = vn.read(0, size);

        let mut hmap = VnodeHmap::new(true);
        hmap.name_hash = compute_name_hash(vpath);
        hmap.meta_hash = compute_meta_hash(vfs.get_vnode(vpath)?.unwrap().stat.mode);
        apply_file_data_update(&mut hmap, &data, size, 0, size);

        let node_hash = hmap.node_hash;
        self.store.insert(vpath, hmap);
        self.store.set_dirty(vpath);
        Ok(node_hash)
    }

    /// XORs `old ⊕ new` into every ancestor's `node_hash`, walking up to `/`.
    /// Ancestors outside the store are silently skipped (partial view).
    fn propagate(&mut self, vpath: &str, old_hash: Hash32, new_hash: Hash32) {
        let parent = parent_path(vpath);
        let Some(parent_hmap) = self.store.find_mut(&parent) else { return };

        let parent_old_hash = parent_hmap.node_hash;
        parent_hmap.node_hash ^= old_hash;
        parent_hmap.node_hash ^= new_hash;
        let parent_new_hash = parent_hmap.node_hash;
        self.store.set_dirty(&parent);

        if parent != "/" {
            self.propagate(&parent, parent_old_hash, parent_new_hash);
        }
    }

    pub fn apply_create(&mut self, vfs: &mut VfsBuilder, vpath: &str) -> Result<(), HpfsError> {
        let vn = vfs.get_vnode(vpath)?.ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?;
        let is_file = vn.stat.is_file();
        let mode = vn.stat.mode;

        let mut hmap = VnodeHmap::new(is_file);
        hmap.name_hash = compute_name_hash(vpath);
        hmap.meta_hash = compute_meta_hash(mode);
        hmap.node_hash = hmap.name_hash ^ hmap.meta_hash;
        let new_hash = hmap.node_hash;

        self.store.insert(vpath, hmap);
        self.store.set_dirty(vpath);
        self.propagate(vpath, Hash32::EMPTY, new_hash);
        debug!(vpath, root = %self.root_hash(), "hash tree: create applied");
        Ok(())
    }

    pub fn apply_metadata_update(&mut self, vfs: &mut VfsBuilder, vpath: &str) -> Result<(), HpfsError> {
        let mode = vfs
            .get_vnode(vpath)?
            .ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?
            .stat
            .mode;

        let entry = self.store.find_mut(vpath).ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?;
        let old_hash = entry.node_hash;
        entry.node_hash ^= entry.meta_hash;
        entry.meta_hash = compute_meta_hash(mode);
        entry.node_hash ^= entry.meta_hash;
        let new_hash = entry.node_hash;
        self.store.set_dirty(vpath);

        self.propagate(vpath, old_hash, new_hash);
        Ok(())
    }

    pub fn apply_data_update(
        &mut self,
        vfs: &mut VfsBuilder,
        vpath: &str,
        update_offset: u64,
        update_size: u64,
    ) -> Result<(), HpfsError> {
        let vn = vfs.get_vnode(vpath)?.ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?;
        if !vn.stat.is_file() {
            return Ok(());
        }
        let size = vn.stat.size;
        let data = vn.read(0, size);

        let entry = self.store.find_mut(vpath).ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?;
        let old_hash = entry.node_hash;
        apply_file_data_update(entry, &data, size, update_offset, update_size);
        let new_hash = entry.node_hash;
        self.store.set_dirty(vpath);

        self.propagate(vpath, old_hash, new_hash);
        Ok(())
    }

    pub fn apply_delete(&mut self, vpath: &str) -> Result<(), HpfsError> {
        let node_hash = self
            .store
            .find(vpath)
            .ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?
            .node_hash;

        self.store.erase(vpath);
        self.store.set_dirty(vpath);
        self.propagate(vpath, node_hash, Hash32::EMPTY);
        Ok(())
    }

    pub fn apply_rename(&mut self, from_vpath: &str, to_vpath: &str, is_dir: bool) -> Result<(), HpfsError> {
        let mut hmap = self
            .store
            .find(from_vpath)
            .ok_or_else(|| HpfsError::NotFound { vpath: from_vpath.to_string() })?
            .clone();

        // Flush everything dirty so far before physically moving the cache file/dir.
        self.store.persist()?;
        self.store.move_cache(from_vpath, to_vpath, is_dir)?;

        self.store.erase(from_vpath);
        self.propagate(from_vpath, hmap.node_hash, Hash32::EMPTY);

        hmap.node_hash ^= hmap.name_hash;
        hmap.name_hash = compute_name_hash(to_vpath);
        hmap.node_hash ^= hmap.name_hash;
        let new_hash = hmap.node_hash;

        self.propagate(to_vpath, Hash32::EMPTY, new_hash);
        self.store.insert(to_vpath, hmap);
        self.store.set_dirty(to_vpath);

        Ok(())
    }

    /// Tears down the store and recomputes every hash from the current VFS state.
    pub fn rebuild(&mut self, vfs: &mut VfsBuilder) -> Result<Hash32, HpfsError> {
        self.store.clear().map_err(HpfsError::Io)?;
        let root = self.calculate_dir_hash(vfs, "/")?;
        self.store.persist().map_err(HpfsError::Io)?;
        Ok(root)
    }
}

/// Recomputes only the block hashes touched by `[update_offset, update_offset +
/// update_size)`, then rebuilds `node_hash` from `name ⊕ meta ⊕ ⊕ blocks`.
fn apply_file_data_update(hmap: &mut VnodeHmap, data: &[u8], file_size: u64, update_offset: u64, update_size: u64) {
    let required_block_count = if file_size == 0 { 0 } else { file_size.div_ceil(BLOCK_SIZE) };
    hmap.block_hashes.resize(required_block_count as usize, Hash32::EMPTY);
    hmap.node_hash = hmap.name_hash ^ hmap.meta_hash;

    let update_end = update_offset + update_size;
    let mut block_id = update_offset / BLOCK_SIZE;
    loop {
        let block_offset = block_id * BLOCK_SIZE;
        if block_offset >= update_end {
            break;
        }
        let read_len = BLOCK_SIZE.min(file_size - block_offset) as usize;
        let block_bytes = &data[block_offset as usize..block_offset as usize + read_len];
        let block_hash = Hash32::of2(&block_offset.to_be_bytes(), block_bytes);
        hmap.block_hashes[block_id as usize] = block_hash;
        block_id += 1;
    }

    for h in &hmap.block_hashes {
        hmap.node_hash ^= *h;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpfs_log::{AuditLog, LogMode, Operation};

    fn mode_payload(mode: u32) -> Vec<u8> {
        mode.to_le_bytes().to_vec()
    }

    fn setup(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let seed_dir = dir.join("seed");
        std::fs::create_dir_all(&seed_dir).unwrap();
        let hmap_dir = dir.join("hmap");
        (seed_dir, hmap_dir)
    }

    #[test]
    fn cold_start_computes_root_hash_from_empty_vfs() {
        let dir = tempfile::tempdir().unwrap();
        let (seed_dir, hmap_dir) = setup(dir.path());
        let log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
        let mut vfs = VfsBuilder::new(&seed_dir, false, &log).unwrap();

        let mut tree = HashTree::new(hmap_dir);
        let root = tree.init(&mut vfs).unwrap();
        assert!(!root.is_empty() || root == Hash32::EMPTY);
    }

    #[test]
    fn create_then_delete_restores_root_hash() {
        let dir = tempfile::tempdir().unwrap();
        let (seed_dir, hmap_dir) = setup(dir.path());
        let mut log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
        let mut vfs = VfsBuilder::new(&seed_dir, false, &log).unwrap();
        let mut tree = HashTree::new(hmap_dir);
        let empty_root = tree.init(&mut vfs).unwrap();

        let offset = log.append(Operation::Mkdir, 1, "/a", Some(&mode_payload(0o755)), &[]).unwrap();
        let (record, _) = log.read_at(offset).unwrap().unwrap();
        let payload = log.read_payload(&record).unwrap();
        vfs.apply_log_record(&record, &payload).unwrap();
        tree.apply_create(&mut vfs, "/a").unwrap();
        assert_ne!(tree.root_hash(), empty_root);

        tree.apply_delete("/a").unwrap();
        assert_eq!(tree.root_hash(), empty_root);
    }

    #[test]
    fn rename_preserves_root_hash() {
        let dir = tempfile::tempdir().unwrap();
        let (seed_dir, hmap_dir) = setup(dir.path());
        let mut log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
        let mut vfs = VfsBuilder::new(&seed_dir, false, &log).unwrap();
        let mut tree = HashTree::new(hmap_dir);
        tree.init(&mut vfs).unwrap();

        let offset = log.append(Operation::Mkdir, 1, "/a", Some(&mode_payload(0o755)), &[]).unwrap();
        let (record, _) = log.read_at(offset).unwrap().unwrap();
        let payload = log.read_payload(&record).unwrap();
        vfs.apply_log_record(&record, &payload).unwrap();
        tree.apply_create(&mut vfs, "/a").unwrap();
        let root_after_create = tree.root_hash();

        let offset = log.append(Operation::Rename, 2, "/a", Some(b"/b".as_slice()), &[]).unwrap();
        let (record, _) = log.read_at(offset).unwrap().unwrap();
        let payload = log.read_payload(&record).unwrap();
        vfs.apply_log_record(&record, &payload).unwrap();
        tree.apply_rename("/a", "/b", true).unwrap();

        // The name changed, so the root hash must differ (it XORs in the new name).
        assert_ne!(tree.root_hash(), root_after_create);
    }

    #[test]
    fn file_data_update_changes_only_touched_block_hashes() {
        let mut hmap = VnodeHmap::new(true);
        hmap.name_hash = Hash32::of(b"f");
        let data = vec![0u8; (BLOCK_SIZE * 2) as usize];
        apply_file_data_update(&mut hmap, &data, BLOCK_SIZE * 2, 0, BLOCK_SIZE * 2);
        let first_pass = hmap.block_hashes.clone();

        let mut data2 = data.clone();
        data2[BLOCK_SIZE as usize] = 0xFF;
        apply_file_data_update(&mut hmap, &data2, BLOCK_SIZE * 2, BLOCK_SIZE, 1);

        assert_eq!(hmap.block_hashes[0], first_pass[0]);
        assert_ne!(hmap.block_hashes[1], first_pass[1]);
    }
}
