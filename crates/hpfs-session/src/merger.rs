//! Background merger: drains the oldest log record, applies it to the physical seed,
//! then purges it — repeated on a fixed interval (spec.md §4.I).
//!
//! The actual seed mutation (writing files, creating directories, renaming) is
//! supplied by the caller through [`SeedApplier`]; this crate's contract is only the
//! drain/apply/purge loop against the log itself, mirroring the reference's
//! `merger_loop`/`merge_log_front`.

use std::time::Duration;

use hpfs_log::{AuditLog, LogMode, LogRecord};

use crate::error::SessionError;

pub trait SeedApplier {
    fn apply(&mut self, record: &LogRecord, payload: &[u8]) -> Result<(), SessionError>;
}

pub struct Merger {
    log: AuditLog,
    poll_interval: Duration,
}

impl Merger {
    pub fn open(log_path: impl AsRef<std::path::Path>, poll_interval: Duration) -> Result<Self, SessionError> {
        let log = AuditLog::open(log_path, LogMode::Merge)?;
        Ok(Merger { log, poll_interval })
    }

    fn has_records(&mut self) -> Result<bool, SessionError> {
        self.log.refresh_header()?;
        Ok(self.log.header().first_record > 0)
    }

    /// Drains every record currently available (apply, then purge, one at a time),
    /// returning how many were merged. Doesn't block; callers that want the
    /// reference's poll-forever behavior should use [`run_loop`](Self::run_loop).
    pub fn run_once(&mut self, applier: &mut impl SeedApplier) -> Result<usize, SessionError> {
        let mut merged = 0;
        while self.has_records()? {
            let first = self.log.header().first_record;
            let (record, _) = self
                .log
                .read_at(first)?
                .ok_or(hpfs_log::HpfsError::NotFirstRecord { offset: first })?;
            let payload = self.log.read_payload(&record)?;
            applier.apply(&record, &payload)?;
            self.log.purge_record(first)?;
            merged += 1;
        }
        Ok(merged)
    }

    /// Runs [`run_once`](Self::run_once) forever, sleeping `poll_interval` between
    /// passes. Only returns on error.
    pub fn run_loop(&mut self, applier: &mut impl SeedApplier) -> Result<(), SessionError> {
        loop {
            self.run_once(applier)?;
            std::thread::sleep(self.poll_interval);
        }
    }
}
