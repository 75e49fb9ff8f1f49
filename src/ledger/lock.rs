//! Cross-process ledger lock
//!
//! The lock is an `flock(2)` on a marker file beside the ledger document,
//! named by appending [`LOCK_SUFFIX`] to the ledger path. Readers share it,
//! writers hold it exclusively. The lock is released when the guard drops.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

/// Suffix appended to the ledger path to name its lock file
pub const LOCK_SUFFIX: &str = ".lock";

/// Poll interval while waiting for a contended lock with a timeout
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Lock flavour requested by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers at once
    Shared,
    /// One writer, no readers
    Exclusive,
}

impl LockMode {
    const fn blocking(self) -> FlockArg {
        match self {
            Self::Shared => FlockArg::LockShared,
            Self::Exclusive => FlockArg::LockExclusive,
        }
    }

    const fn nonblocking(self) -> FlockArg {
        match self {
            Self::Shared => FlockArg::LockSharedNonblock,
            Self::Exclusive => FlockArg::LockExclusiveNonblock,
        }
    }
}

/// Named lock derived from a ledger path.
#[derive(Debug, Clone)]
pub struct LedgerLock {
    path: PathBuf,
    timeout: Option<Duration>,
}

/// A held lock. Dropping it releases the lock.
pub struct LockGuard {
    _flock: Flock<File>,
    mode: LockMode,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("mode", &self.mode).finish()
    }
}

impl LockGuard {
    /// Mode this guard holds.
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }
}

impl LedgerLock {
    /// Lock for the ledger stored at `ledger_path`.
    ///
    /// With `timeout == None` acquisition blocks until the lock is free.
    #[must_use]
    pub fn for_ledger(ledger_path: &Path, timeout: Option<Duration>) -> Self {
        let mut name = ledger_path.as_os_str().to_os_string();
        name.push(LOCK_SUFFIX);
        Self {
            path: PathBuf::from(name),
            timeout,
        }
    }

    /// Path of the lock marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquisition timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Acquire the lock in `mode`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the marker file cannot be opened, if `flock`
    /// fails, or (`ErrorKind::TimedOut`) if the timeout elapses first.
    pub fn acquire(&self, mode: LockMode) -> io::Result<LockGuard> {
        let file = self.open_marker()?;
        let flock = match self.timeout {
            None => Self::lock_blocking(file, mode)?,
            Some(timeout) => self.lock_with_deadline(file, mode, timeout)?,
        };
        Ok(LockGuard {
            _flock: flock,
            mode,
        })
    }

    fn open_marker(&self) -> io::Result<File> {
        match OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
        {
            // flock works on read-only descriptors; readers of a ledger in a
            // read-only directory still get a lock if the marker exists
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => File::open(&self.path),
            other => other,
        }
    }

    fn lock_blocking(mut file: File, mode: LockMode) -> io::Result<Flock<File>> {
        loop {
            match Flock::lock(file, mode.blocking()) {
                Ok(flock) => return Ok(flock),
                Err((returned, Errno::EINTR)) => file = returned,
                Err((_, errno)) => return Err(errno.into()),
            }
        }
    }

    fn lock_with_deadline(
        &self,
        mut file: File,
        mode: LockMode,
        timeout: Duration,
    ) -> io::Result<Flock<File>> {
        let deadline = Instant::now() + timeout;
        loop {
            match Flock::lock(file, mode.nonblocking()) {
                Ok(flock) => return Ok(flock),
                Err((returned, Errno::EWOULDBLOCK | Errno::EINTR)) => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "timed out after {timeout:?} waiting for {}",
                                self.path.display()
                            ),
                        ));
                    }
                    file = returned;
                    thread::sleep(RETRY_INTERVAL);
                }
                Err((_, errno)) => return Err(errno.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_appends_suffix() {
        let lock = LedgerLock::for_ledger(Path::new("/data/ledger.json"), None);
        assert_eq!(lock.path(), Path::new("/data/ledger.json.lock"));
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LedgerLock::for_ledger(&dir.path().join("ledger.json"), Some(Duration::ZERO));

        let first = lock.acquire(LockMode::Shared).unwrap();
        let second = lock.acquire(LockMode::Shared).unwrap();
        assert_eq!(first.mode(), LockMode::Shared);
        assert_eq!(second.mode(), LockMode::Shared);
    }

    #[test]
    fn test_exclusive_lock_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let holder = LedgerLock::for_ledger(&path, None);
        let waiter = LedgerLock::for_ledger(&path, Some(Duration::from_millis(50)));

        let guard = holder.acquire(LockMode::Exclusive).unwrap();
        let err = waiter.acquire(LockMode::Shared).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        drop(guard);
        assert!(waiter.acquire(LockMode::Exclusive).is_ok());
    }
}
