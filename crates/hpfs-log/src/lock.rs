//! Advisory byte-range locks on three well-known bytes of the log file.
//!
//! These bytes carry no data; they exist purely as coordination primitives (spec.md
//! §4.B). `Range::Session` (byte 0) is held shared-read for the lifetime of any RO/RW
//! session. `Range::Update` (byte 1) is held exclusive while reading/writing the
//! header or appending a record. `Range::Merge` (bytes 0-1) is held exclusive by a
//! merger or truncating sync, which blocks until no session is live.

use std::io;
use std::os::unix::io::RawFd;

#[derive(Debug, Clone, Copy)]
pub enum Range {
    Session,
    Update,
    Merge,
}

impl Range {
    fn start_len(self) -> (libc::off_t, libc::off_t) {
        match self {
            Range::Session => (0, 1),
            Range::Update => (1, 1),
            Range::Merge => (0, 2),
        }
    }

    fn lock_type(self) -> libc::c_short {
        match self {
            Range::Session => libc::F_RDLCK as libc::c_short,
            Range::Update | Range::Merge => libc::F_WRLCK as libc::c_short,
        }
    }
}

/// A held byte-range lock. Blocking acquire (`F_SETLKW`) per spec.md §5: no operation
/// in the core spin-waits.
pub struct FileLock {
    fd: RawFd,
    range: Range,
}

impl FileLock {
    pub fn acquire(fd: RawFd, range: Range) -> io::Result<FileLock> {
        set_lock(fd, range, range.lock_type())?;
        Ok(FileLock { fd, range })
    }

    pub fn release(self) -> io::Result<()> {
        let (start, len) = self.range.start_len();
        set_lock_raw(self.fd, libc::F_UNLCK as libc::c_short, start, len)?;
        std::mem::forget(self);
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let (start, len) = self.range.start_len();
        let _ = set_lock_raw(self.fd, libc::F_UNLCK as libc::c_short, start, len);
    }
}

fn set_lock(fd: RawFd, range: Range, lock_type: libc::c_short) -> io::Result<()> {
    let (start, len) = range.start_len();
    set_lock_raw(fd, lock_type, start, len)
}

fn set_lock_raw(fd: RawFd, lock_type: libc::c_short, start: libc::off_t, len: libc::off_t) -> io::Result<()> {
    let mut flock: libc::flock = unsafe { std::mem::zeroed() };
    flock.l_type = lock_type;
    flock.l_whence = libc::SEEK_SET as libc::c_short;
    flock.l_start = start;
    flock.l_len = len;
    flock.l_pid = 0;

    // F_SETLKW blocks until the lock is available; no busy-waiting in the core.
    let res = unsafe { libc::fcntl(fd, libc::F_SETLKW, &mut flock as *mut libc::flock) };
    if res == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
