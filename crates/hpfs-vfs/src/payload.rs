//! Operation-specific payload encodings carried in a log record's `payload` field
//! (spec.md §3), plus the block-buffer layout helper used to prepare a write or
//! truncate's `block_data` before it's appended.

use hpfs_log::{align_up, BlockSegment, BLOCK_SIZE};

/// Payload of a `WRITE` record.
#[derive(Debug, Clone, Copy)]
pub struct WritePayload {
    pub size: u64,
    pub offset: u64,
    pub mmap_block_size: u64,
    pub mmap_block_offset: u64,
    pub data_offset_in_block: u64,
}

pub const WRITE_PAYLOAD_LEN: usize = 8 * 5;

impl WritePayload {
    pub fn encode(&self) -> [u8; WRITE_PAYLOAD_LEN] {
        let mut buf = [0u8; WRITE_PAYLOAD_LEN];
        buf[0..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.mmap_block_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.mmap_block_offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.data_offset_in_block.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < WRITE_PAYLOAD_LEN {
            return None;
        }
        Some(WritePayload {
            size: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            offset: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            mmap_block_size: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            mmap_block_offset: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            data_offset_in_block: u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
        })
    }
}

/// Payload of a `TRUNCATE` record.
#[derive(Debug, Clone, Copy)]
pub struct TruncatePayload {
    pub size: u64,
    pub mmap_block_size: u64,
    pub mmap_block_offset: u64,
}

pub const TRUNCATE_PAYLOAD_LEN: usize = 8 * 3;

impl TruncatePayload {
    pub fn encode(&self) -> [u8; TRUNCATE_PAYLOAD_LEN] {
        let mut buf = [0u8; TRUNCATE_PAYLOAD_LEN];
        buf[0..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.mmap_block_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.mmap_block_offset.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TRUNCATE_PAYLOAD_LEN {
            return None;
        }
        Some(TruncatePayload {
            size: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            mmap_block_size: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            mmap_block_offset: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        })
    }
}

/// Composes the block-aligned byte range a write should land in, and the ordered
/// segments (existing bytes / zero fill / the write buffer itself) that should make
/// up the resulting log record's `block_data`, so the record can be mmap'd in place
/// of the vnode's current tail (spec.md §4.D).
pub fn layout_write_block<'a>(
    current_region: Option<&'a [u8]>,
    file_size: u64,
    write_start: u64,
    write_buf: &'a [u8],
) -> (u64, u64, Vec<BlockSegment<'a>>) {
    let write_size = write_buf.len() as u64;
    let write_end = write_start + write_size;

    let block_start = align_down(write_start.min(file_size));
    let block_end = align_up(write_end);

    let mut segments = Vec::new();

    if block_start < write_start {
        if block_start < file_size {
            let existing_len = file_size.min(write_start) - block_start;
            let region = current_region.expect("existing bytes requested with no backing region");
            segments.push(BlockSegment::Data(
                &region[block_start as usize..(block_start + existing_len) as usize],
            ));
        }
        if file_size < write_start {
            segments.push(BlockSegment::Zeros(write_start - file_size));
        }
    }

    if write_size > 0 {
        segments.push(BlockSegment::Data(write_buf));
    }

    if write_end < block_end {
        if write_end < file_size {
            let region = current_region.expect("existing bytes requested with no backing region");
            let tail_len = file_size.min(block_end) - write_end;
            segments.push(BlockSegment::Data(
                &region[write_end as usize..(write_end + tail_len) as usize],
            ));
        }
        let zero_start = write_end.max(file_size);
        if zero_start < block_end {
            segments.push(BlockSegment::Zeros(block_end - zero_start));
        }
    }

    (block_start, block_end, segments)
}

fn align_down(n: u64) -> u64 {
    (n / BLOCK_SIZE) * BLOCK_SIZE
}
