//! Append-only, block-aligned, byte-range-locked audit log (spec.md §4.B).
//!
//! This crate owns the on-disk record format, the header, and the locking protocol
//! that arbitrates one writer against many readers and a merger. It knows nothing
//! about paths-as-a-tree or hashing; those live in `hpfs-vfs` and `hpfs-merkle`.

mod error;
mod header;
mod lock;
mod log;
mod record;

pub use error::HpfsError;
pub use header::{LogHeader, LOG_HEADER_LEN, LOG_HEADER_OFFSET};
pub use lock::{FileLock, Range};
pub use log::{AuditLog, LogMode, RecordIter};
pub use record::{
    align_up, BlockSegment, LogRecord, Operation, RecordHeader, RecordMetrics, BLOCK_SIZE,
    RECORD_HEADER_LEN, ROOT_HASH_FIELD_OFFSET,
};
