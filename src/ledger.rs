//! Scratch-file bookkeeping for a single pipeline run.
//!
//! Every derived file a run creates (transcoded audio, mostly) is recorded
//! here and removed by [`ResourceLedger::release_all`]. The ledger is also a
//! drop guard, so a run that unwinds still leaves nothing behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct ResourceLedger {
    entries: Vec<PathBuf>,
}

impl ResourceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path` for removal at the end of the run.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::debug!(path = %path.display(), "ledger: tracking derived file");
        self.entries.push(path);
    }

    /// Whether `path` is currently tracked.
    #[must_use]
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry == path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete every tracked file and clear the ledger. Never fails: files that
    /// are already gone are skipped and other errors are only logged.
    pub fn release_all(&mut self) {
        while let Some(path) = self.entries.pop() {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "ledger: removed derived file");
                }
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %error,
                        "ledger: could not remove derived file; continuing"
                    );
                }
            }
        }
    }
}

impl Drop for ResourceLedger {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::ResourceLedger;

    #[test]
    fn release_all_removes_tracked_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("a.wav");
        let second = dir.path().join("b.wav");
        fs::write(&first, b"a").unwrap();
        fs::write(&second, b"b").unwrap();

        let mut ledger = ResourceLedger::new();
        ledger.track(&first);
        ledger.track(&second);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.is_tracked(&first));

        ledger.release_all();
        assert!(!first.exists());
        assert!(!second.exists());
        assert!(ledger.is_empty());
    }

    #[test]
    fn release_all_twice_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scratch.wav");
        fs::write(&path, b"x").unwrap();

        let mut ledger = ResourceLedger::new();
        ledger.track(&path);
        ledger.release_all();
        ledger.release_all();
        assert!(!path.exists());
    }

    #[test]
    fn externally_removed_files_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone.wav");
        fs::write(&path, b"x").unwrap();

        let mut ledger = ResourceLedger::new();
        ledger.track(&path);
        fs::remove_file(&path).unwrap();
        ledger.track(dir.path().join("never-existed.wav"));

        ledger.release_all();
        assert!(ledger.is_empty());
    }

    #[test]
    fn deletion_errors_do_not_stop_other_removals() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory cannot be removed with remove_file.
        let stubborn = dir.path().join("subdir");
        fs::create_dir(&stubborn).unwrap();
        let plain = dir.path().join("plain.wav");
        fs::write(&plain, b"x").unwrap();

        let mut ledger = ResourceLedger::new();
        ledger.track(&plain);
        ledger.track(&stubborn);
        ledger.release_all();

        assert!(!plain.exists());
        assert!(stubborn.exists());
        assert!(ledger.is_empty());
    }

    #[test]
    fn drop_releases_tracked_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dropped.wav");
        fs::write(&path, b"x").unwrap();
        {
            let mut ledger = ResourceLedger::new();
            ledger.track(&path);
        }
        assert!(!path.exists());
    }
}
