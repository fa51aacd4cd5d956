use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};

use super::OutputSink;
use crate::config::DEFAULT_MAX_LOG_SIZE;

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// When to rotate and how many rotated files to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    /// Rotate before a write would push the file past this many bytes.
    pub max_size: u64,
    /// Backups to retain; 0 keeps all.
    pub max_backups: usize,
    /// Backups older than this are removed; `None` keeps them forever.
    pub max_age: Option<Duration>,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_LOG_SIZE,
            max_backups: 0,
            max_age: None,
        }
    }
}

/// Append-only log file that rotates itself by size.
///
/// A rotated file is renamed to `<stem>-<UTC timestamp>.log` next to the
/// live one, and old backups are pruned after every rotation. Existing
/// backups are never overwritten.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    rotation: Rotation,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    file: File,
    size: u64,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, rotation: Rotation) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            rotation,
            state: Mutex::new(State { file, size }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rotate(&self, state: &mut State) -> io::Result<()> {
        state.file.flush()?;
        let backup = self.free_backup_path(&Utc::now().format(BACKUP_TIME_FORMAT).to_string())?;
        fs::rename(&self.path, &backup)?;
        state.file = open_append(&self.path)?;
        state.size = 0;

        if let Err(e) = self.prune() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to prune log backups");
        }
        Ok(())
    }

    /// First unused backup name for `stamp`. Rotations within the same
    /// millisecond get `-1`, `-2`, ... appended to the stamp.
    fn free_backup_path(&self, stamp: &str) -> io::Result<PathBuf> {
        let stem = self.stem();
        let mut candidate = self.path.with_file_name(format!("{stem}-{stamp}.log"));
        let mut seq = 0u32;
        while candidate.try_exists()? {
            seq += 1;
            candidate = self.path.with_file_name(format!("{stem}-{stamp}-{seq}.log"));
        }
        Ok(candidate)
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Remove backups beyond `max_backups` or older than `max_age`.
    fn prune(&self) -> io::Result<()> {
        if self.rotation.max_backups == 0 && self.rotation.max_age.is_none() {
            return Ok(());
        }
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = format!("{}-", self.stem());

        let mut backups: Vec<((NaiveDateTime, u32), PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stamp) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".log"))
            else {
                continue;
            };
            if let Some(at) = parse_backup_stamp(stamp) {
                backups.push((at, entry.path()));
            }
        }
        // Newest first.
        backups.sort_by(|a, b| b.0.cmp(&a.0));

        let cutoff = self
            .rotation
            .max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .map(|age| Utc::now().naive_utc() - age);

        for (i, (at, path)) in backups.iter().enumerate() {
            let too_many = self.rotation.max_backups > 0 && i >= self.rotation.max_backups;
            let too_old = cutoff.is_some_and(|cutoff| at.0 < cutoff);
            if too_many || too_old {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

impl OutputSink for RotatingFile {
    fn write(&self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.size > 0 && state.size + buf.len() as u64 > self.rotation.max_size {
            self.rotate(&mut state)?;
        }
        state.file.write_all(buf)?;
        state.size += buf.len() as u64;
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.lock().file.flush()
    }
}

/// Time and sequence number of a backup, from the part of its name between
/// the stem and `.log`.
fn parse_backup_stamp(stamp: &str) -> Option<(NaiveDateTime, u32)> {
    if let Ok(at) = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT) {
        return Some((at, 0));
    }
    let (stamp, seq) = stamp.rsplit_once('-')?;
    let seq = seq.parse().ok()?;
    let at = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT).ok()?;
    Some((at, seq))
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
