use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::DedupReadError;

/// Remembers which calendar event UIDs already produced a notification.
pub trait NotifiedLog: Send + Sync {
    /// `true` when `uid` was notified before, or when that cannot be told.
    fn has_notified(&self, uid: &str) -> bool;
    /// Record `uid`. Failures are logged, never raised.
    fn mark_notified(&self, uid: &str);
}

/// Append-only text file, one UID per line.
///
/// Every read and write holds the same mutex, so a check never sees a
/// half-written line from this process. The file is rescanned on each check;
/// it only grows by one line per notification.
pub struct FileNotifiedLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileNotifiedLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Scan for `uid`. A missing file is recreated empty.
    pub fn check(&self, uid: &str) -> Result<bool, DedupReadError> {
        let _guard = self.guard();
        let read_err = |source| DedupReadError {
            path: self.path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(read_err)?;
        for line in BufReader::new(file).lines() {
            if line.map_err(read_err)?.trim_end() == uid {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn append(&self, uid: &str) -> io::Result<()> {
        let _guard = self.guard();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{uid}")?;
        file.flush()?;
        file.sync_all()
    }
}

impl NotifiedLog for FileNotifiedLog {
    fn has_notified(&self, uid: &str) -> bool {
        match self.check(uid) {
            Ok(found) => found,
            Err(e) => {
                warn!("{e}; treating {uid} as already notified");
                true
            }
        }
    }

    fn mark_notified(&self, uid: &str) {
        if uid.is_empty() || uid.contains(['\n', '\r']) {
            warn!("refusing to record malformed UID {uid:?}");
            return;
        }
        match self.append(uid) {
            Ok(()) => debug!("recorded {uid} in {}", self.path.display()),
            Err(e) => warn!("failed to record {uid} in {}: {e}", self.path.display()),
        }
    }
}
