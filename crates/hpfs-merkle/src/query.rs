//! Reserved-path hash queries layered over ordinary FUSE-style `getattr`/`read`
//! (spec.md §4.G): a path ending in `::hpfs.hmap.hash` or `::hpfs.hmap.children`
//! addresses the hash metadata of the vpath with that suffix stripped, rather than
//! a real file.

use hpfs_hash::HASH_LEN;
use hpfs_log::HpfsError;
use hpfs_vfs::VfsBuilder;

use crate::tree::HashTree;

const HASH_SUFFIX: &str = "::hpfs.hmap.hash";
const CHILDREN_SUFFIX: &str = "::hpfs.hmap.children";

/// One child entry in a `::hpfs.hmap.children` read: `is_file` + a fixed 256-byte
/// name field + the child's `node_hash`.
const CHILD_NAME_LEN: usize = 256;
const CHILD_RECORD_LEN: usize = 1 + CHILD_NAME_LEN + HASH_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Hash,
    Children,
}

#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub mode: QueryMode,
    pub vpath: String,
}

/// A fabricated `stat` for a reserved hash path: always a regular, world-readable
/// file whose size matches what a `read` at this path would return.
#[derive(Debug, Clone, Copy)]
pub struct QueryStat {
    pub mode: u32,
    pub size: u64,
}

/// Suffix-matches `request_path` against the two reserved patterns, returning the
/// stripped vpath and which kind of query it is. `None` means this isn't a hash
/// query path at all.
pub fn parse_request_path(request_path: &str) -> Option<ParsedRequest> {
    if let Some(vpath) = request_path.strip_suffix(HASH_SUFFIX) {
        return Some(ParsedRequest { mode: QueryMode::Hash, vpath: vpath.to_string() });
    }
    if let Some(vpath) = request_path.strip_suffix(CHILDREN_SUFFIX) {
        return Some(ParsedRequest { mode: QueryMode::Children, vpath: vpath.to_string() });
    }
    None
}

pub struct HashQuery;

impl HashQuery {
    pub fn getattr(
        &self,
        tree: &mut HashTree,
        vfs: &mut VfsBuilder,
        req: &ParsedRequest,
    ) -> Result<QueryStat, HpfsError> {
        let hmap = tree
            .store
            .find(&req.vpath)
            .ok_or_else(|| HpfsError::NotFound { vpath: req.vpath.clone() })?;

        let size = match req.mode {
            QueryMode::Hash => HASH_LEN as u64,
            QueryMode::Children if hmap.is_file => (hmap.block_hashes.len() * HASH_LEN) as u64,
            QueryMode::Children => (vfs.dir_children(&req.vpath)?.len() * CHILD_RECORD_LEN) as u64,
        };

        Ok(QueryStat { mode: (libc::S_IFREG | 0o666) as u32, size })
    }

    pub fn read(
        &self,
        tree: &mut HashTree,
        vfs: &mut VfsBuilder,
        req: &ParsedRequest,
        max_len: usize,
    ) -> Result<Vec<u8>, HpfsError> {
        match req.mode {
            QueryMode::Hash => {
                let hmap = tree
                    .store
                    .find(&req.vpath)
                    .ok_or_else(|| HpfsError::NotFound { vpath: req.vpath.clone() })?;
                let mut bytes = hmap.node_hash.as_bytes().to_vec();
                bytes.truncate(max_len);
                Ok(bytes)
            }
            QueryMode::Children => {
                let is_file = tree
                    .store
                    .find(&req.vpath)
                    .ok_or_else(|| HpfsError::NotFound { vpath: req.vpath.clone() })?
                    .is_file;

                if is_file {
                    self.read_file_block_hashes(tree, &req.vpath, max_len)
                } else {
                    self.read_dir_children_hashes(tree, vfs, &req.vpath, max_len)
                }
            }
        }
    }

    fn read_file_block_hashes(&self, tree: &mut HashTree, vpath: &str, max_len: usize) -> Result<Vec<u8>, HpfsError> {
        let hmap = tree.store.find(vpath).ok_or_else(|| HpfsError::NotFound { vpath: vpath.to_string() })?;
        let mut bytes = Vec::with_capacity(hmap.block_hashes.len() * HASH_LEN);
        for h in &hmap.block_hashes {
            bytes.extend_from_slice(h.as_bytes());
        }
        bytes.truncate(max_len);
        Ok(bytes)
    }

    fn read_dir_children_hashes(
        &self,
        tree: &mut HashTree,
        vfs: &mut VfsBuilder,
        vpath: &str,
        max_len: usize,
    ) -> Result<Vec<u8>, HpfsError> {
        let children = vfs.dir_children(vpath)?;
        let mut bytes = Vec::with_capacity(children.len() * CHILD_RECORD_LEN);

        for (name, _stat) in children {
            let child_vpath = if vpath.ends_with('/') {
                format!("{vpath}{name}")
            } else {
                format!("{vpath}/{name}")
            };
            let hmap = tree
                .store
                .find(&child_vpath)
                .ok_or_else(|| HpfsError::NotFound { vpath: child_vpath.clone() })?;

            bytes.push(hmap.is_file as u8);
            let mut name_field = [0u8; CHILD_NAME_LEN];
            let name_bytes = name.as_bytes();
            let copy_len = name_bytes.len().min(CHILD_NAME_LEN - 1);
            name_field[..copy_len].copy_from_slice(&name_bytes[..copy_len]);
            bytes.extend_from_slice(&name_field);
            bytes.extend_from_slice(hmap.node_hash.as_bytes());
        }

        bytes.truncate(max_len);
        Ok(bytes)
    }
}
