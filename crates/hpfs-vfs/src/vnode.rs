//! In-memory representation of a single virtual filesystem entry.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use crate::mmap::CompositeMap;
use hpfs_log::{align_up, BLOCK_SIZE};

/// Minimal `stat`-equivalent tracked per vnode. Owner/group are deliberately absent:
/// `chown` is a no-op at this layer (ownership isn't part of the hpfs data model).
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
}

impl Stat {
    pub const DEFAULT_DIR_MODE: u32 = libc::S_IFDIR as u32 | 0o755;

    pub fn new_dir(mtime: i64) -> Self {
        Stat { mode: Self::DEFAULT_DIR_MODE, size: 0, mtime }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_file(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }

    pub fn permission_bits(mode: u32) -> u32 {
        mode & 0o7777
    }
}

/// Which physical file backs a data segment: the immutable seed file, or the audit
/// log (for bytes written after the session started). Both are kept open for the
/// vnode's lifetime so later `mmap`/`mremap` calls always have a live fd.
#[derive(Clone)]
pub enum Backing {
    Seed(Arc<File>),
    Log(Arc<File>),
}

impl Backing {
    fn as_raw_fd(&self) -> i32 {
        match self {
            Backing::Seed(f) => f.as_raw_fd(),
            Backing::Log(f) => f.as_raw_fd(),
        }
    }
}

/// One contiguous physical extent contributing to a vnode's composite file contents.
#[derive(Clone)]
pub struct DataSegment {
    pub backing: Backing,
    pub size: u64,
    pub source_offset: u64,
    pub logical_offset: u64,
}

pub struct Vnode {
    pub ino: u64,
    pub stat: Stat,
    pub seed_file: Option<Arc<File>>,
    pub data_segs: Vec<DataSegment>,
    map: Option<CompositeMap>,
    mapped_data_segs: usize,
    pub max_size: u64,
}

impl Vnode {
    pub fn new(ino: u64, stat: Stat) -> Self {
        Vnode {
            ino,
            stat,
            seed_file: None,
            data_segs: Vec::new(),
            map: None,
            mapped_data_segs: 0,
            max_size: 0,
        }
    }

    /// Brings the composite mmap in sync with `data_segs`: re-placing any segments
    /// appended since the last call, discarding and rebuilding the whole region first
    /// if it's grown too small to hold `max_size` (spec.md §4.D).
    pub fn update_mmap(&mut self) -> std::io::Result<()> {
        if self.mapped_data_segs == self.data_segs.len() {
            return Ok(());
        }

        let required = align_up(self.max_size) as usize;

        if let Some(map) = &self.map {
            if map.size() < required {
                self.map = None;
                self.mapped_data_segs = 0;
            }
        }

        for idx in self.mapped_data_segs..self.data_segs.len() {
            let seg = &self.data_segs[idx];
            let fd = seg.backing.as_raw_fd();
            if self.map.is_none() {
                self.map = Some(CompositeMap::create(fd, seg.source_offset, required)?);
            } else {
                self.map.as_mut().unwrap().place(
                    seg.logical_offset as usize,
                    fd,
                    seg.source_offset,
                    seg.size as usize,
                )?;
            }
        }

        self.mapped_data_segs = self.data_segs.len();
        Ok(())
    }

    /// Reads `[offset, offset+len)`, clamped to the current `stat.size`.
    pub fn read(&self, offset: u64, len: u64) -> Vec<u8> {
        if offset >= self.stat.size {
            return Vec::new();
        }
        let end = (offset + len).min(self.stat.size);
        let map = match &self.map {
            Some(m) => m,
            None => return Vec::new(),
        };
        let region = map.as_slice(align_up(self.max_size) as usize);
        region[offset as usize..end as usize].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn single_seed_segment_reads_back_its_bytes() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();
        let file = Arc::new(file);

        let mut vn = Vnode::new(2, Stat { mode: libc::S_IFREG as u32 | 0o644, size: 10, mtime: 0 });
        vn.max_size = 10;
        vn.data_segs.push(DataSegment {
            backing: Backing::Seed(file),
            size: 10,
            source_offset: 0,
            logical_offset: 0,
        });
        vn.update_mmap().unwrap();

        assert_eq!(vn.read(0, 10), b"0123456789");
        assert_eq!(vn.read(3, 4), b"3456");
    }

    #[test]
    fn growing_with_a_second_segment_extends_readable_range() {
        let mut seed_file = tempfile::tempfile().unwrap();
        seed_file.write_all(&[b'A'; BLOCK_SIZE as usize]).unwrap();
        let seed_file = Arc::new(seed_file);

        let mut log_file = tempfile::tempfile().unwrap();
        log_file.write_all(b"NEW-DATA").unwrap();
        let log_file = Arc::new(log_file);

        let mut vn = Vnode::new(3, Stat { mode: libc::S_IFREG as u32 | 0o644, size: BLOCK_SIZE, mtime: 0 });
        vn.max_size = BLOCK_SIZE;
        vn.data_segs.push(DataSegment {
            backing: Backing::Seed(seed_file),
            size: BLOCK_SIZE,
            source_offset: 0,
            logical_offset: 0,
        });
        vn.update_mmap().unwrap();

        vn.max_size = BLOCK_SIZE + 8;
        vn.stat.size = BLOCK_SIZE + 8;
        vn.data_segs.push(DataSegment {
            backing: Backing::Log(log_file),
            size: 8,
            source_offset: 0,
            logical_offset: BLOCK_SIZE,
        });
        vn.update_mmap().unwrap();

        let tail = vn.read(BLOCK_SIZE, 8);
        assert_eq!(tail, b"NEW-DATA");
    }
}
