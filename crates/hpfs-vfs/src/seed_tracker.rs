//! Tracks which seed paths have been renamed or removed by the log, so replay and
//! directory listing know which parts of the immutable seed directory still apply.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// `vpath → original_seed_path` for renames, plus the set of original seed paths that
/// have been removed. Both maps are keyed on the *seed-relative* path (always
/// starting with `/`), never the filesystem path on disk.
pub struct SeedPathTracker {
    seed_dir: PathBuf,
    renamed: HashMap<String, String>,
    removed: HashSet<String>,
}

impl SeedPathTracker {
    pub fn new(seed_dir: impl Into<PathBuf>) -> Self {
        SeedPathTracker {
            seed_dir: seed_dir.into(),
            renamed: HashMap::new(),
            removed: HashSet::new(),
        }
    }

    /// `full_path` is `sub_path` itself, or `sub_path` followed by `/`.
    fn is_ancestor(full_path: &str, sub_path: &str) -> bool {
        full_path.starts_with(sub_path)
            && (full_path.len() == sub_path.len() || full_path.as_bytes()[sub_path.len()] == b'/')
    }

    /// Resolves `vpath` to the seed path it should be read from, by longest
    /// rename-prefix match. Returns `vpath` unchanged if nothing above it was renamed.
    pub fn resolve(&self, vpath: &str) -> String {
        if self.renamed.is_empty() {
            return vpath.to_string();
        }

        let mut longest_match_len = 0usize;
        let mut longest_match_seed_path = "";
        for (renamed_vpath, seed_path) in &self.renamed {
            if Self::is_ancestor(vpath, renamed_vpath) && renamed_vpath.len() > longest_match_len {
                longest_match_len = renamed_vpath.len();
                longest_match_seed_path = seed_path;
            }
        }

        if longest_match_len > 0 {
            format!("{longest_match_seed_path}{}", &vpath[longest_match_len..])
        } else {
            vpath.to_string()
        }
    }

    /// Whether `seed_path` is itself the rename source of some still-live rename
    /// (i.e. no longer reachable directly — only through the renamed vpath).
    pub fn is_renamed(&self, seed_path: &str) -> bool {
        self.renamed.values().any(|v| v == seed_path)
    }

    pub fn is_removed(&self, seed_path: &str) -> bool {
        self.removed.contains(seed_path)
    }

    fn exists_on_seed(&self, seed_path: &str, is_dir: bool) -> bool {
        let full = self.seed_dir.join(seed_path.trim_start_matches('/'));
        match std::fs::metadata(&full) {
            Ok(meta) => meta.is_dir() == is_dir,
            Err(_) => false,
        }
    }

    /// Renames `from` (a vpath) to `to`, composing with any existing rename so that
    /// `to` always maps to the *original* seed path. No-ops if `from` doesn't resolve
    /// to an entry that actually exists on the seed.
    pub fn rename(&mut self, from: &str, to: &str, is_dir: bool) {
        let resolved = self.resolve(from);
        if resolved.is_empty() || !self.exists_on_seed(&resolved, is_dir) {
            return;
        }

        let to_update: Vec<(String, String)> = self
            .renamed
            .iter()
            .filter(|(vpath, _)| Self::is_ancestor(vpath, from))
            .map(|(vpath, seed_path)| (vpath.clone(), seed_path.clone()))
            .collect();

        for (vpath, seed_path) in to_update {
            self.renamed.remove(&vpath);
            let new_vpath = format!("{to}{}", &vpath[from.len()..]);
            if new_vpath != seed_path {
                self.renamed.insert(new_vpath, seed_path);
            }
        }

        if to != resolved {
            self.renamed.insert(to.to_string(), resolved);
        }
    }

    /// Marks `vpath`'s resolved seed path as removed. Removing a directory also
    /// discards any renames whose new name lies beneath it, since the subtree they
    /// named no longer exists to rename back to.
    pub fn remove(&mut self, vpath: &str, is_dir: bool) {
        let resolved = self.resolve(vpath);
        if resolved.is_empty() || !self.exists_on_seed(&resolved, is_dir) {
            return;
        }

        self.removed.insert(resolved);

        if is_dir {
            self.renamed.retain(|renamed_vpath, _| !Self::is_ancestor(renamed_vpath, vpath));
        }
    }

    pub fn seed_dir(&self) -> &Path {
        &self.seed_dir
    }
}
