//! Per-vpath hash entries, cached on disk under `hmap_dir` mirroring the seed
//! directory's own layout (spec.md §4.E).

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use hpfs_hash::version::VERSION_BYTES_LEN;
use hpfs_hash::{version, Hash32, HASH_LEN};

const CACHE_FILE_EXT: &str = ".hcache";
const FIXED_FIELDS_LEN: usize = 1 + HASH_LEN * 3; // is_file + node_hash + name_hash + meta_hash

/// A vnode's full hash entry: enough to reconstruct `node_hash` incrementally
/// without re-walking the tree (spec.md §3).
#[derive(Debug, Clone)]
pub struct VnodeHmap {
    pub is_file: bool,
    pub node_hash: Hash32,
    pub name_hash: Hash32,
    pub meta_hash: Hash32,
    pub block_hashes: Vec<Hash32>,
}

impl VnodeHmap {
    pub fn new(is_file: bool) -> Self {
        VnodeHmap {
            is_file,
            node_hash: Hash32::EMPTY,
            name_hash: Hash32::EMPTY,
            meta_hash: Hash32::EMPTY,
            block_hashes: Vec::new(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            VERSION_BYTES_LEN + FIXED_FIELDS_LEN + self.block_hashes.len() * HASH_LEN,
        );
        buf.extend_from_slice(&version::encode(version::CURRENT_VERSION));
        buf.push(self.is_file as u8);
        buf.extend_from_slice(self.node_hash.as_bytes());
        buf.extend_from_slice(self.name_hash.as_bytes());
        buf.extend_from_slice(self.meta_hash.as_bytes());
        for h in &self.block_hashes {
            buf.extend_from_slice(h.as_bytes());
        }
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < VERSION_BYTES_LEN + FIXED_FIELDS_LEN {
            return None;
        }
        let rest = &bytes[VERSION_BYTES_LEN..];
        let is_file = rest[0] == 1;
        let node_hash = read_hash(&rest[1..33]);
        let name_hash = read_hash(&rest[33..65]);
        let meta_hash = read_hash(&rest[65..97]);

        let block_bytes = &rest[97..];
        if block_bytes.len() % HASH_LEN != 0 {
            return None;
        }
        let block_hashes = block_bytes.chunks_exact(HASH_LEN).map(read_hash).collect();

        Some(VnodeHmap { is_file, node_hash, name_hash, meta_hash, block_hashes })
    }
}

fn read_hash(bytes: &[u8]) -> Hash32 {
    let mut buf = [0u8; HASH_LEN];
    buf.copy_from_slice(bytes);
    Hash32(buf)
}

/// Keyed by vpath. Holds the in-memory entries plus the set of vpaths whose entry
/// differs from what's on disk (including deletions, tracked as "dirty but absent").
pub struct HashStore {
    hmap_dir: PathBuf,
    entries: HashMap<String, VnodeHmap>,
    dirty: HashSet<String>,
}

impl HashStore {
    pub fn new(hmap_dir: impl Into<PathBuf>) -> Self {
        HashStore { hmap_dir: hmap_dir.into(), entries: HashMap::new(), dirty: HashSet::new() }
    }

    pub fn set_dirty(&mut self, vpath: &str) {
        self.dirty.insert(vpath.to_string());
    }

    /// Looks up `vpath`, lazily loading it from its `.hcache` file if not already
    /// resident in memory.
    pub fn find(&mut self, vpath: &str) -> Option<&VnodeHmap> {
        if !self.entries.contains_key(vpath) {
            if let Some(loaded) = self.read_cache_file(vpath) {
                self.entries.insert(vpath.to_string(), loaded);
            }
        }
        self.entries.get(vpath)
    }

    pub fn insert(&mut self, vpath: &str, hmap: VnodeHmap) {
        self.entries.insert(vpath.to_string(), hmap);
    }

    /// Same lazy-load as [`find`](Self::find), but mutable — used by propagation to
    /// XOR an ancestor's `node_hash` in place.
    pub fn find_mut(&mut self, vpath: &str) -> Option<&mut VnodeHmap> {
        if !self.entries.contains_key(vpath) {
            if let Some(loaded) = self.read_cache_file(vpath) {
                self.entries.insert(vpath.to_string(), loaded);
            }
        }
        self.entries.get_mut(vpath)
    }

    pub fn erase(&mut self, vpath: &str) {
        self.entries.remove(vpath);
    }

    fn cache_file(&self, vpath: &str) -> PathBuf {
        let mut p = self.hmap_dir.clone();
        p.push(format!("{}{CACHE_FILE_EXT}", vpath.trim_start_matches('/')));
        p
    }

    fn cache_dir(&self, vpath: &str) -> PathBuf {
        let mut p = self.hmap_dir.clone();
        p.push(vpath.trim_start_matches('/'));
        p
    }

    fn read_cache_file(&self, vpath: &str) -> Option<VnodeHmap> {
        let path = self.cache_file(vpath);
        let mut file = File::open(path).ok()?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).ok()?;
        VnodeHmap::decode(&buf)
    }

    fn write_cache_file(&self, vpath: &str, hmap: &VnodeHmap) -> io::Result<()> {
        let path = self.cache_file(vpath);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(&hmap.encode())
    }

    /// Renames both the `.hcache` file and (for directories) the cache's sidecar
    /// directory of descendant `.hcache` files.
    pub fn move_cache(&self, from_vpath: &str, to_vpath: &str, is_dir: bool) -> io::Result<()> {
        let from_file = self.cache_file(from_vpath);
        let to_file = self.cache_file(to_vpath);
        if let Some(parent) = to_file.parent() {
            fs::create_dir_all(parent)?;
        }
        if from_file.exists() {
            fs::rename(&from_file, &to_file)?;
        }

        if is_dir {
            let from_dir = self.cache_dir(from_vpath);
            let to_dir = self.cache_dir(to_vpath);
            if from_dir.exists() {
                if let Some(parent) = to_dir.parent() {
                    fs::create_dir_all(parent)?;
                }
                // Best-effort: an entry with no files underneath may have no sidecar
                // directory at all.
                let _ = fs::rename(&from_dir, &to_dir);
            }
        }
        Ok(())
    }

    /// Writes every dirty entry to its cache file, unlinking cache files for dirty
    /// vpaths that have since been erased from memory.
    pub fn persist(&mut self) -> io::Result<()> {
        for vpath in self.dirty.drain() {
            match self.entries.get(&vpath) {
                Some(hmap) => {
                    let path = self.cache_file(&vpath);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let mut file = File::create(path)?;
                    file.write_all(&hmap.encode())?;
                }
                None => {
                    let path = self.cache_file(&vpath);
                    let _ = fs::remove_file(path);
                }
            }
        }
        Ok(())
    }

    /// Removes the entire hmap directory tree and empties memory.
    pub fn clear(&mut self) -> io::Result<()> {
        if self.hmap_dir.exists() {
            fs::remove_dir_all(&self.hmap_dir)?;
        }
        self.entries.clear();
        self.dirty.clear();
        Ok(())
    }
}
