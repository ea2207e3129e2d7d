//! The log file's fixed header: `[version_prefix: 8B][log_header]`.

use hpfs_hash::version::VERSION_BYTES_LEN;

use crate::error::HpfsError;

/// `first_record(8) + last_record(8) + last_checkpoint(8)`.
pub const LOG_HEADER_LEN: u64 = 24;

/// Offset of the log header, immediately after the version prefix.
pub const LOG_HEADER_OFFSET: u64 = VERSION_BYTES_LEN as u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogHeader {
    /// Offset of the earliest live record. 0 means the log is empty.
    pub first_record: u64,
    /// Offset of the most recently appended record. 0 means the log is empty.
    pub last_record: u64,
    /// Offset immediately after the record considered durable for RO sessions.
    pub last_checkpoint: u64,
}

impl LogHeader {
    pub fn is_empty(&self) -> bool {
        self.first_record == 0 && self.last_record == 0
    }

    pub fn encode(&self) -> [u8; LOG_HEADER_LEN as usize] {
        let mut buf = [0u8; LOG_HEADER_LEN as usize];
        buf[0..8].copy_from_slice(&self.first_record.to_le_bytes());
        buf[8..16].copy_from_slice(&self.last_record.to_le_bytes());
        buf[16..24].copy_from_slice(&self.last_checkpoint.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HpfsError> {
        if (bytes.len() as u64) < LOG_HEADER_LEN {
            return Err(HpfsError::CorruptRecord {
                offset: 0,
                reason: "log header truncated".to_string(),
            });
        }
        Ok(LogHeader {
            first_record: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            last_record: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            last_checkpoint: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        })
    }
}
