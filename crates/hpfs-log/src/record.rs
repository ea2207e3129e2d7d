//! On-disk layout of a single audit log record.
//!
//! `record_header | vpath | payload | padding to block boundary | block_data`, per
//! spec.md §3. Every field is little-endian; the record header has no implicit padding
//! (mirrors the reference's `__attribute__((packed))` structs).

use crate::error::HpfsError;
use hpfs_hash::{Hash32, HASH_LEN};

/// Block alignment for record total size and block-data placement. Chosen to match
/// the host page size so block data can be mmap'd in place (spec.md §3).
pub const BLOCK_SIZE: u64 = 4096;

/// Rounds `n` up to the next multiple of `BLOCK_SIZE`.
pub fn align_up(n: u64) -> u64 {
    (n + BLOCK_SIZE - 1) / BLOCK_SIZE * BLOCK_SIZE
}

/// Filesystem mutation kinds. Numeric values match the reference's `FS_OPERATION`
/// enum so that a dump of a log file is directly comparable to reference output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Operation {
    Mkdir = 1,
    Rmdir = 2,
    Rename = 3,
    Unlink = 6,
    Chmod = 7,
    Chown = 8,
    Create = 10,
    Write = 11,
    Truncate = 12,
}

impl Operation {
    pub fn from_u32(v: u32) -> Result<Self, HpfsError> {
        Ok(match v {
            1 => Operation::Mkdir,
            2 => Operation::Rmdir,
            3 => Operation::Rename,
            6 => Operation::Unlink,
            7 => Operation::Chmod,
            8 => Operation::Chown,
            10 => Operation::Create,
            11 => Operation::Write,
            12 => Operation::Truncate,
            other => {
                return Err(HpfsError::CorruptRecord {
                    offset: 0,
                    reason: format!("unknown operation code {other}"),
                })
            }
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Mkdir => "MKDIR",
            Operation::Rmdir => "RMDIR",
            Operation::Rename => "RENAME",
            Operation::Unlink => "UNLINK",
            Operation::Chmod => "CHMOD",
            Operation::Chown => "CHOWN",
            Operation::Create => "CREATE",
            Operation::Write => "WRITE",
            Operation::Truncate => "TRUNCATE",
        }
    }
}

/// Fixed-size record header, as laid out on disk.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub timestamp: i64,
    pub operation: Operation,
    pub vpath_len: u64,
    pub payload_len: u64,
    pub block_data_len: u64,
    /// Root hash *after* this operation is applied. Empty until patched in place by
    /// the caller once the hash tree has recomputed it (spec.md §4.F).
    pub root_hash: Hash32,
}

/// `timestamp(8) + operation(4) + vpath_len(8) + payload_len(8) + block_data_len(8) + root_hash(32)`.
pub const RECORD_HEADER_LEN: u64 = 8 + 4 + 8 + 8 + 8 + HASH_LEN as u64;

/// Byte offset of `root_hash` within an encoded `RecordHeader`, needed to patch it in
/// place after append without rewriting the rest of the record.
pub const ROOT_HASH_FIELD_OFFSET: u64 = 8 + 4 + 8 + 8 + 8;

impl RecordHeader {
    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN as usize] {
        let mut buf = [0u8; RECORD_HEADER_LEN as usize];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..12].copy_from_slice(&(self.operation as u32).to_le_bytes());
        buf[12..20].copy_from_slice(&self.vpath_len.to_le_bytes());
        buf[20..28].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[28..36].copy_from_slice(&self.block_data_len.to_le_bytes());
        buf[36..68].copy_from_slice(self.root_hash.as_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HpfsError> {
        if (bytes.len() as u64) < RECORD_HEADER_LEN {
            return Err(HpfsError::CorruptRecord {
                offset: 0,
                reason: "record header truncated".to_string(),
            });
        }
        let timestamp = i64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let operation = Operation::from_u32(u32::from_le_bytes(bytes[8..12].try_into().unwrap()))?;
        let vpath_len = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
        let payload_len = u64::from_le_bytes(bytes[20..28].try_into().unwrap());
        let block_data_len = u64::from_le_bytes(bytes[28..36].try_into().unwrap());
        let mut root_hash = [0u8; HASH_LEN];
        root_hash.copy_from_slice(&bytes[36..68]);
        Ok(RecordHeader {
            timestamp,
            operation,
            vpath_len,
            payload_len,
            block_data_len,
            root_hash: Hash32(root_hash),
        })
    }

    pub fn metrics(&self) -> RecordMetrics {
        let vpath_offset = RECORD_HEADER_LEN;
        let payload_offset = vpath_offset + self.vpath_len;
        let block_data_offset = align_up(payload_offset + self.payload_len);
        let total_size = block_data_offset + self.block_data_len;
        RecordMetrics {
            vpath_offset,
            payload_offset,
            block_data_offset,
            total_size,
        }
    }
}

/// Offsets (relative to the record's start) and total size derived from a header.
#[derive(Debug, Clone, Copy)]
pub struct RecordMetrics {
    pub vpath_offset: u64,
    pub payload_offset: u64,
    pub block_data_offset: u64,
    pub total_size: u64,
}

/// A fully-read record: header plus its vpath, located within the log file.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub offset: u64,
    pub size: u64,
    pub header: RecordHeader,
    pub vpath: String,
    pub payload_offset: u64,
    pub block_data_offset: u64,
}

impl LogRecord {
    pub fn operation(&self) -> Operation {
        self.header.operation
    }
}

/// One segment of a write/truncate's block data, assembled by the VFS builder and
/// written verbatim (or as zero fill) into the record's `block_data` region.
pub enum BlockSegment<'a> {
    Data(&'a [u8]),
    Zeros(u64),
}

impl BlockSegment<'_> {
    pub fn len(&self) -> u64 {
        match self {
            BlockSegment::Data(d) => d.len() as u64,
            BlockSegment::Zeros(n) => *n,
        }
    }
}
