use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;

use crate::error::Error;

const LOCK_FILE_NAME: &str = ".lock-pvrd";
const STALE_TIME: Duration = Duration::from_secs(600);
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// An advisory lock on a directory.
///
/// The lock is a file created exclusively inside the directory.  Its
/// modification time tells how old the lock is, a lock older than 10 minutes
/// is assumed to be left over from a crashed process.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
}

impl LockFile {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        LockFile {
            path: dir.as_ref().join(LOCK_FILE_NAME),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    /// Polls for the lock once a second until `max_wait` has elapsed.
    ///
    /// A zero `max_wait` tries exactly once.
    pub fn acquire(&mut self, max_wait: Duration) -> Result<(), Error> {
        if self.is_locked() {
            return Ok(());
        }
        let deadline = Instant::now() + max_wait;
        loop {
            let result = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path);
            match result {
                Ok(file) => {
                    tracing::debug!(path = ?self.path, "Locked");
                    self.file = Some(file);
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if self.remove_if_stale()? {
                        continue;
                    }
                }
                Err(err) => {
                    tracing::error!(%err, path = ?self.path, "Failed to create lock file");
                    return Err(err.into());
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(RETRY_INTERVAL);
            if Instant::now() >= deadline {
                break;
            }
        }
        tracing::warn!(path = ?self.path, "Timed out waiting for lock");
        Err(Error::LockTimeout(self.path.clone()))
    }

    // Returns true if a stale lock file has been removed, or if the lock file
    // has disappeared in the meantime.
    fn remove_if_stale(&self) -> Result<bool, Error> {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => {
                tracing::error!(%err, path = ?self.path, "Failed to stat lock file");
                return Err(err.into());
            }
        };
        let now = SystemTime::now();
        // Clock jumps backwards make the lock look young, take the distance.
        let age = now
            .duration_since(modified)
            .or_else(|_| modified.duration_since(now))
            .unwrap_or_default();
        if age <= STALE_TIME {
            return Ok(false);
        }
        tracing::warn!(path = ?self.path, ?age, "Removing stale lock file");
        match std::fs::remove_file(&self.path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(err) => {
                tracing::error!(%err, path = ?self.path, "Failed to remove stale lock file");
                Err(err.into())
            }
        }
    }

    pub fn release(&mut self) {
        if self.file.take().is_none() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(_) => tracing::debug!(path = ?self.path, "Unlocked"),
            Err(err) => tracing::error!(%err, path = ?self.path, "Failed to remove lock file"),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}
