//! Replays the audit log over an immutable seed directory into an in-memory virtual
//! filesystem, presenting each file's contents through a composite mmap stitched from
//! the seed file and log-resident data blocks (spec.md §4.C/§4.D).

mod builder;
mod mmap;
mod payload;
mod seed_tracker;
mod vnode;

pub use builder::{Applied, VfsBuilder};
pub use payload::{layout_write_block, TruncatePayload, WritePayload, TRUNCATE_PAYLOAD_LEN, WRITE_PAYLOAD_LEN};
pub use seed_tracker::SeedPathTracker;
pub use vnode::{Backing, DataSegment, Stat, Vnode};
