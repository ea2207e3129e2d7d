//! The append-only audit log itself: header management, append, read, purge, and
//! truncate, arbitrated by the byte-range locks in [`crate::lock`].

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use hpfs_hash::version;
use hpfs_hash::Hash32;
use tracing::{debug, error, info};

use crate::error::HpfsError;
use crate::header::{LogHeader, LOG_HEADER_LEN, LOG_HEADER_OFFSET};
use crate::lock::{FileLock, Range};
use crate::record::{
    align_up, BlockSegment, LogRecord, Operation, RecordHeader, BLOCK_SIZE, ROOT_HASH_FIELD_OFFSET,
};

/// Which kind of participant opened the log. Governs which byte-range locks are held
/// and whether appends/purges/truncation are permitted (spec.md §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Read-only session: snapshot pinned at `last_checkpoint`.
    Ro,
    /// Read-write session: the single writer, tail-following.
    Rw,
    /// Background merger: drains `first_record` into the seed, purging as it goes.
    Merge,
    /// Truncating sync utility.
    Sync,
}

const FILE_PERMS: u32 = 0o644;

pub struct AuditLog {
    mode: LogMode,
    path: PathBuf,
    file: File,
    eof: u64,
    header: LogHeader,
    /// Held for the session's lifetime when `mode` is `Ro`/`Rw` (spec.md §4.B).
    session_lock: Option<FileLock>,
    appended_any: bool,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>, mode: LogMode) -> Result<Self, HpfsError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let session_lock = if matches!(mode, LogMode::Ro | LogMode::Rw) {
            Some(FileLock::acquire(file.as_raw_fd(), Range::Session).map_err(|e| {
                error!(error = %e, "error acquiring RO/RW session lock");
                e
            })?)
        } else {
            None
        };

        let mut log = AuditLog {
            mode,
            path,
            file,
            eof: 0,
            header: LogHeader::default(),
            session_lock,
            appended_any: false,
        };
        log.init_log_header()?;

        debug!(
            first = log.header.first_record,
            last = log.header.last_record,
            last_checkpoint = log.header.last_checkpoint,
            "initialized log file"
        );
        Ok(log)
    }

    fn init_log_header(&mut self) -> Result<(), HpfsError> {
        let _update_lock = FileLock::acquire(self.file.as_raw_fd(), Range::Update)?;

        let metadata = self.file.metadata()?;
        if metadata.len() == 0 {
            let version_bytes = version::encode(version::CURRENT_VERSION);
            self.file.write_at(&version_bytes, 0)?;
            self.header = LogHeader::default();
            self.commit_header()?;

            self.eof = align_up(LOG_HEADER_OFFSET + LOG_HEADER_LEN);
            self.file.set_len(self.eof)?;
        } else {
            self.read_header()?;
            self.eof = metadata.len();
        }

        Ok(())
    }

    fn read_header(&mut self) -> Result<(), HpfsError> {
        let mut version_bytes = [0u8; version::VERSION_BYTES_LEN];
        self.file.read_at(&mut version_bytes, 0)?;
        version::decode_and_check(&version_bytes)?;

        let mut buf = [0u8; LOG_HEADER_LEN as usize];
        self.file.read_at(&mut buf, LOG_HEADER_OFFSET)?;
        self.header = LogHeader::decode(&buf)?;
        Ok(())
    }

    fn commit_header(&mut self) -> Result<(), HpfsError> {
        self.file.write_at(&self.header.encode(), LOG_HEADER_OFFSET)?;
        debug!(
            first = self.header.first_record,
            last = self.header.last_record,
            last_checkpoint = self.header.last_checkpoint,
            "header updated"
        );
        Ok(())
    }

    pub fn header(&self) -> LogHeader {
        self.header
    }

    /// Re-reads the header from disk, picking up appends or purges committed by
    /// another process sharing this log file (the RW session, or the merger) since
    /// this handle last looked.
    pub fn refresh_header(&mut self) -> Result<(), HpfsError> {
        let _lock = FileLock::acquire(self.file.as_raw_fd(), Range::Update)?;
        self.read_header()
    }

    pub fn eof(&self) -> u64 {
        self.eof
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Duplicates the underlying file descriptor so callers (the VFS builder's
    /// composite mmap) can reference log-resident data blocks independently of this
    /// handle's lifetime.
    pub fn try_clone_file(&self) -> std::io::Result<File> {
        self.file.try_clone()
    }

    /// Appends a new record. Returns the record's start offset.
    pub fn append(
        &mut self,
        operation: Operation,
        timestamp: i64,
        vpath: &str,
        payload: Option<&[u8]>,
        block_segments: &[BlockSegment<'_>],
    ) -> Result<u64, HpfsError> {
        if self.mode != LogMode::Rw {
            return Err(HpfsError::ReadOnlySession);
        }

        let payload_len = payload.map(|p| p.len()).unwrap_or(0) as u64;
        let block_data_len: u64 = block_segments.iter().map(|s| s.len()).sum();

        let header = RecordHeader {
            timestamp,
            operation,
            vpath_len: vpath.len() as u64,
            payload_len,
            block_data_len,
            root_hash: Hash32::EMPTY,
        };
        let metrics = header.metrics();
        let record_offset = self.eof;

        // Extend the file first; the padding/hole reads back as zero, so Zeros block
        // segments never need to be written at all.
        self.file.set_len(record_offset + metrics.total_size)?;

        let mut write_offset = record_offset;
        self.file.write_at(&header.encode(), write_offset)?;
        write_offset += header.encode().len() as u64;
        self.file.write_at(vpath.as_bytes(), write_offset)?;
        write_offset += vpath.len() as u64;
        if let Some(payload) = payload {
            self.file.write_at(payload, write_offset)?;
        }

        let mut block_write_offset = record_offset + metrics.block_data_offset;
        for segment in block_segments {
            match segment {
                BlockSegment::Data(bytes) => {
                    self.file.write_at(bytes, block_write_offset)?;
                }
                BlockSegment::Zeros(_) => {
                    // Already zero thanks to the extending set_len above.
                }
            }
            block_write_offset += segment.len();
        }

        {
            let _update_lock = FileLock::acquire(self.file.as_raw_fd(), Range::Update)?;
            if self.header.first_record == 0 {
                self.header.first_record = record_offset;
            }
            self.header.last_record = record_offset;
            self.commit_header()?;
        }

        self.eof = record_offset + metrics.total_size;
        self.appended_any = true;

        debug!(
            ts = timestamp,
            op = operation.as_str(),
            vpath,
            payload_len,
            block_data_len,
            "appended log record"
        );

        Ok(record_offset)
    }

    /// Rewrites only the `root_hash` field of the record at `record_offset`, in place.
    pub fn patch_root_hash(&mut self, record_offset: u64, root_hash: Hash32) -> Result<(), HpfsError> {
        if self.header.first_record == 0 || record_offset > self.header.last_record {
            return Ok(());
        }
        self.file
            .write_at(root_hash.as_bytes(), record_offset + ROOT_HASH_FIELD_OFFSET)?;
        Ok(())
    }

    /// Reads the record at `offset` (0 meaning "start at `first_record`").
    ///
    /// Returns `None` if the log is empty or `offset` is past the last live record.
    /// Otherwise returns the record plus the offset of the next record, where `0`
    /// signals that the returned record is the last one (the tail has been reached).
    pub fn read_at(&self, offset: u64) -> Result<Option<(LogRecord, u64)>, HpfsError> {
        if self.header.first_record == 0 || offset > self.header.last_record {
            return Ok(None);
        }

        let read_offset = if offset == 0 { self.header.first_record } else { offset };

        let mut header_bytes = vec![0u8; crate::record::RECORD_HEADER_LEN as usize];
        self.file.read_at(&mut header_bytes, read_offset)?;
        let header = RecordHeader::decode(&header_bytes)?;
        let metrics = header.metrics();

        let mut vpath_bytes = vec![0u8; header.vpath_len as usize];
        self.file
            .read_at(&mut vpath_bytes, read_offset + metrics.vpath_offset)?;
        let vpath = String::from_utf8(vpath_bytes).map_err(|_| HpfsError::CorruptRecord {
            offset: read_offset,
            reason: "vpath is not valid utf-8".to_string(),
        })?;

        let record = LogRecord {
            offset: read_offset,
            size: metrics.total_size,
            payload_offset: read_offset + metrics.payload_offset,
            block_data_offset: read_offset + metrics.block_data_offset,
            header,
            vpath,
        };

        let next_offset = if record.offset + record.size == self.eof {
            0
        } else {
            record.offset + record.size
        };

        Ok(Some((record, next_offset)))
    }

    pub fn read_payload(&self, record: &LogRecord) -> Result<Vec<u8>, HpfsError> {
        if record.header.payload_len == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; record.header.payload_len as usize];
        self.file.read_at(&mut buf, record.payload_offset)?;
        Ok(buf)
    }

    pub fn read_block_data(&self, record: &LogRecord) -> Result<Vec<u8>, HpfsError> {
        if record.header.block_data_len == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; record.header.block_data_len as usize];
        self.file.read_at(&mut buf, record.block_data_offset)?;
        Ok(buf)
    }

    /// Iterates all live records from `first_record` to the tail. Used by `rdlog` and
    /// by the VFS builder's replay loop.
    pub fn iter_records(&self) -> RecordIter<'_> {
        RecordIter {
            log: self,
            next_offset: 0,
            done: self.header.first_record == 0,
        }
    }

    /// Purges the record at `record_offset`, which must be the current `first_record`
    /// (merger-only operation).
    pub fn purge_record(&mut self, record_offset: u64) -> Result<(), HpfsError> {
        if record_offset != self.header.first_record {
            return Err(HpfsError::NotFirstRecord { offset: record_offset });
        }

        let (record, _) = self
            .read_at(record_offset)?
            .ok_or(HpfsError::NotFirstRecord { offset: record_offset })?;

        debug!(ts = record.header.timestamp, vpath = %record.vpath, "purging log record");

        let res = unsafe {
            libc::fallocate(
                self.file.as_raw_fd(),
                libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                record_offset as libc::off_t,
                record.size as libc::off_t,
            )
        };
        if res == -1 {
            return Err(std::io::Error::last_os_error().into());
        }

        if record_offset == self.header.last_record {
            self.header.first_record = 0;
            self.header.last_record = 0;
            self.header.last_checkpoint = 0;
        } else {
            self.header.first_record = record_offset + record.size;
        }

        self.commit_header()?;
        Ok(())
    }

    /// Truncates the log (sync mode only). `at_offset = None` drops every record;
    /// `Some(offset)` keeps the record at `offset` and drops everything after it.
    pub fn truncate_log(&mut self, at_offset: Option<u64>) -> Result<(), HpfsError> {
        if self.mode != LogMode::Sync {
            return Err(HpfsError::ReadOnlySession);
        }
        if self.header.first_record == 0 {
            return Err(HpfsError::NotFirstRecord { offset: at_offset.unwrap_or(0) });
        }

        let _merge_lock = FileLock::acquire(self.file.as_raw_fd(), Range::Merge)?;

        let truncate_offset = match at_offset {
            None => {
                let t = self.header.first_record;
                self.header.first_record = 0;
                self.header.last_record = 0;
                self.header.last_checkpoint = 0;
                t
            }
            Some(offset) => {
                let (_, next) = self
                    .read_at(offset)?
                    .ok_or(HpfsError::NotFirstRecord { offset })?;
                self.header.last_record = offset;
                if self.header.last_checkpoint > self.header.last_record {
                    self.header.last_checkpoint = self.header.last_record;
                }
                if next == 0 {
                    self.eof
                } else {
                    next
                }
            }
        };

        if truncate_offset == 0 || truncate_offset > self.eof {
            return Err(HpfsError::CorruptRecord {
                offset: truncate_offset,
                reason: "invalid truncation offset".to_string(),
            });
        }
        if truncate_offset == self.eof {
            return Ok(());
        }

        self.file.set_len(truncate_offset)?;
        self.eof = truncate_offset;
        self.commit_header()?;
        Ok(())
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        if self.mode == LogMode::Rw && self.appended_any {
            self.header.last_checkpoint = self.eof;
            if let Ok(lock) = FileLock::acquire(self.file.as_raw_fd(), Range::Update) {
                if let Err(e) = self.commit_header() {
                    error!(error = %e, "error committing checkpoint on session close");
                }
                let _ = lock.release();
            }
        }
        info!(path = %self.path.display(), "audit log session closed");
    }
}

/// Iterator over live records, from `first_record` to the tail.
pub struct RecordIter<'a> {
    log: &'a AuditLog,
    next_offset: u64,
    done: bool,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<LogRecord, HpfsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.log.read_at(self.next_offset) {
            Ok(Some((record, next))) => {
                if next == 0 {
                    self.done = true;
                } else {
                    self.next_offset = next;
                }
                Some(Ok(record))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
