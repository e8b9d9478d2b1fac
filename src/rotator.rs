//! Rolling output file: appends cflowd bytes to a "current" file and, on a
//! configured interval, atomically hands it off to a timestamped archive
//! path before starting a fresh current file.
//!
//! Grounded on `Write`/`NewSavedFile`/`NewCurrentFile` in the reference
//! daemon. `link`+`unlink` is used instead of `rename` so a pre-existing
//! archive path (a clock anomaly, a restart within the same second) fails
//! loudly instead of silently clobbering prior output.

use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use log::info;

use crate::error::WriterError;

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_with_mode(path: &Path, mode: u32) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn create_with_mode(path: &Path, _mode: u32) -> std::io::Result<File> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[derive(Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Normal,
    Rotated,
}

pub struct Rotator {
    current_path: PathBuf,
    saved_prefix: String,
    current_mode: u32,
    saved_mode: u32,
    save_interval: Duration,

    file: Option<File>,
    opened_at: Option<Instant>,
}

impl Rotator {
    pub fn new(
        current_path: PathBuf,
        saved_prefix: String,
        current_mode: u32,
        saved_mode: u32,
        save_interval: Duration,
    ) -> Self {
        Rotator {
            current_path,
            saved_prefix,
            current_mode,
            saved_mode,
            save_interval,
            file: None,
            opened_at: None,
        }
    }

    fn archive_path(&self) -> String {
        // chrono's `%z` is a signed 5-character zone offset (e.g. -0500),
        // matching the reference layout but from the host's real offset
        // instead of a hard-coded one.
        format!(
            "{}{}",
            self.saved_prefix,
            Local::now().format("%Y%m%d_%H:%M:%S%z")
        )
    }

    fn rotate(&mut self) -> Result<(), WriterError> {
        let file = match self.file.take() {
            Some(f) => f,
            None => return Ok(()),
        };
        drop(file); // close before link/unlink

        let archive = self.archive_path();

        fs::hard_link(&self.current_path, &archive).map_err(|source| WriterError::Link {
            archive: archive.clone(),
            source,
        })?;
        fs::remove_file(&self.current_path).map_err(WriterError::Unlink)?;
        set_mode(Path::new(&archive), self.saved_mode).map_err(|source| WriterError::Chmod {
            archive: archive.clone(),
            source,
        })?;

        info!("rotated current file to {}", archive);
        self.opened_at = None;
        Ok(())
    }

    fn open_current(&mut self) -> Result<(), WriterError> {
        match fs::remove_file(&self.current_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(WriterError::CreateCurrent(e)),
        }

        let file = create_with_mode(&self.current_path, self.current_mode)
            .map_err(WriterError::CreateCurrent)?;

        self.file = Some(file);
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    /// Appends `bytes` to the current file, rotating first if the save
    /// interval has elapsed. No-op if `bytes` is empty.
    pub fn append(&mut self, bytes: &[u8]) -> Result<AppendOutcome, WriterError> {
        if bytes.is_empty() {
            return Ok(AppendOutcome::Normal);
        }

        let mut outcome = AppendOutcome::Normal;

        if self.file.is_some() {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= self.save_interval {
                    self.rotate()?;
                    outcome = AppendOutcome::Rotated;
                }
            }
        }

        if self.file.is_none() {
            self.open_current()?;
        }

        let file = self.file.as_mut().unwrap();
        file.write_all(bytes)
            .map_err(|source| WriterError::Write {
                len: bytes.len(),
                source,
            })?;

        Ok(outcome)
    }

    /// Seals the in-flight current file into the archive without starting a
    /// new one. Called once, from the writer's shutdown path.
    pub fn shutdown(&mut self) -> Result<(), WriterError> {
        self.rotate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rotator_in(dir: &Path, interval: Duration) -> Rotator {
        Rotator::new(
            dir.join("flows.current"),
            dir.join("flows.").to_string_lossy().into_owned(),
            0o660,
            0o660,
            interval,
        )
    }

    #[test]
    fn first_append_creates_current_file() {
        let dir = tempdir().unwrap();
        let mut rotator = rotator_in(dir.path(), Duration::from_secs(300));

        let outcome = rotator.append(b"hello").unwrap();
        assert_eq!(outcome, AppendOutcome::Normal);
        assert!(dir.path().join("flows.current").exists());
    }

    #[test]
    fn empty_append_is_noop() {
        let dir = tempdir().unwrap();
        let mut rotator = rotator_in(dir.path(), Duration::from_secs(300));
        let outcome = rotator.append(&[]).unwrap();
        assert_eq!(outcome, AppendOutcome::Normal);
        assert!(!dir.path().join("flows.current").exists());
    }

    #[test]
    fn scenario_s4_rotation_after_interval() {
        let dir = tempdir().unwrap();
        let mut rotator = rotator_in(dir.path(), Duration::from_millis(50));

        rotator.append(b"first").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let outcome = rotator.append(b"second").unwrap();

        assert_eq!(outcome, AppendOutcome::Rotated);
        assert!(dir.path().join("flows.current").exists());

        let archives: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("flows.2"))
            .collect();
        assert_eq!(archives.len(), 1);

        let current_contents = fs::read(dir.path().join("flows.current")).unwrap();
        assert_eq!(current_contents, b"second");
    }

    #[test]
    fn scenario_s6_shutdown_seals_current_file() {
        let dir = tempdir().unwrap();
        let mut rotator = rotator_in(dir.path(), Duration::from_secs(300));

        rotator.append(b"in flight").unwrap();
        rotator.shutdown().unwrap();

        assert!(!dir.path().join("flows.current").exists());
        let archives: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(archives.len(), 1);
    }

    #[test]
    fn shutdown_with_no_open_file_is_a_noop() {
        let dir = tempdir().unwrap();
        let mut rotator = rotator_in(dir.path(), Duration::from_secs(300));
        rotator.shutdown().unwrap();
        assert!(!dir.path().join("flows.current").exists());
    }
}
