use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, DaemonResult};

/// Repository interface over the PID file.
///
/// The file's existence is the single-instance lock and its content is the
/// last recorded process id; both live on the filesystem so a control
/// invocation and a running daemon can coordinate without sharing memory.
/// The trait exists so tests can substitute an in-memory store.
pub trait PidStore {
    /// Whether a PID record is present. Existence only, not liveness.
    fn exists(&self) -> bool;

    /// The recorded process id. `Ok(None)` when the file is absent; a file
    /// that is present but unparsable is an error, never silently `None`.
    fn read(&self) -> DaemonResult<Option<i32>>;

    /// Records `pid` as decimal text, overwriting any existing record.
    fn write(&self, pid: i32) -> DaemonResult<()>;

    /// Deletes the record. A no-op when already absent.
    fn remove(&self) -> DaemonResult<()>;
}

/// Filesystem-backed PID store at `<pid_dir>/<name>.pid`.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        PidFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PidStore for PidFile {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read(&self) -> DaemonResult<Option<i32>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match content.trim().parse::<i32>() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => Err(DaemonError::CorruptPidFile {
                path: self.path.clone(),
                content,
            }),
        }
    }

    fn write(&self, pid: i32) -> DaemonResult<()> {
        fs::write(&self.path, pid.to_string())?;
        Ok(())
    }

    fn remove(&self) -> DaemonResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> PidFile {
        PidFile::new(dir.path().join("svc.pid"))
    }

    #[test]
    fn absent_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.exists());
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn write_then_read_round_trips_decimal_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write(4321).unwrap();
        assert!(store.exists());
        assert_eq!(store.read().unwrap(), Some(4321));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "4321");
    }

    #[test]
    fn write_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write(1).unwrap();
        store.write(99999).unwrap();
        assert_eq!(store.read().unwrap(), Some(99999));
    }

    #[test]
    fn garbage_content_is_an_error_not_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "not a pid").unwrap();
        match store.read() {
            Err(DaemonError::CorruptPidFile { content, .. }) => {
                assert_eq!(content, "not a pid");
            }
            other => panic!("expected CorruptPidFile, got {:?}", other),
        }
    }

    #[test]
    fn trailing_newline_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "777\n").unwrap();
        assert_eq!(store.read().unwrap(), Some(777));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write(5).unwrap();
        store.remove().unwrap();
        assert!(!store.exists());
        store.remove().unwrap();
    }
}
