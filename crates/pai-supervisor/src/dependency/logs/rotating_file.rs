//! Size-based rotating log file
//!
//! Rotation shifts `base -> base.1 -> base.2 ...`, dropping the oldest
//! backup, then reopens an empty `base`.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct RotatingLogFile {
    path: PathBuf,
    file: Option<File>,
    written: u64,
    max_bytes: u64,
    backups: usize,
}

impl RotatingLogFile {
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let file = open_append(path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            written,
            max_bytes: max_bytes.max(1),
            backups,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `line` plus a newline in a single write
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');
        let len = record.len() as u64;

        if self.written > 0 && self.written + len > self.max_bytes {
            self.rotate()?;
        }

        self.handle()?
            .write_all(record.as_bytes())
            .with_context(|| format!("Failed to write log file: {}", self.path.display()))?;
        self.written += len;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush().context("Failed to flush log file"),
            None => Ok(()),
        }
    }

    /// Active handle, reopened if a previous rotation failed halfway
    fn handle(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            self.file = Some(open_append(&self.path)?);
        }
        self.file.as_mut().context("Log file handle missing")
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        // Windows refuses to rename a file that is still open
        self.file = None;
        self.written = 0;

        if self.backups == 0 {
            let file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)
                .with_context(|| format!("Failed to truncate log file: {}", self.path.display()))?;
            self.file = Some(file);
            return Ok(());
        }

        let oldest = backup_path(&self.path, self.backups);
        if oldest.exists() {
            let _ = fs::remove_file(&oldest);
        }

        for i in (1..self.backups).rev() {
            let from = backup_path(&self.path, i);
            if from.exists() {
                let _ = fs::rename(&from, backup_path(&self.path, i + 1));
            }
        }

        fs::rename(&self.path, backup_path(&self.path, 1))
            .with_context(|| format!("Failed to rotate log file: {}", self.path.display()))?;

        self.file = Some(open_append(&self.path)?);
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

fn backup_path(base: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{index}", base.display()))
}

/// Read the active log and its backups, oldest content first
pub fn read_rotated_logs(base: &Path, backups: usize) -> Result<String> {
    let mut contents = String::new();

    for i in (1..=backups).rev() {
        let path = backup_path(base, i);
        if path.exists() {
            contents.push_str(&String::from_utf8_lossy(&fs::read(&path)?));
        }
    }

    if base.exists() {
        let bytes = fs::read(base)
            .with_context(|| format!("Failed to read log file: {}", base.display()))?;
        contents.push_str(&String::from_utf8_lossy(&bytes));
    }

    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotation_keeps_bounded_backups() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("pai_log.txt");
        let mut log = RotatingLogFile::open(&base, 64, 2).unwrap();

        for i in 0..40 {
            log.write_line(&format!("line {i:03} padding")).unwrap();
        }
        log.flush().unwrap();

        assert!(base.exists());
        assert!(backup_path(&base, 1).exists());
        assert!(backup_path(&base, 2).exists());
        assert!(!backup_path(&base, 3).exists());
        assert!(fs::metadata(&base).unwrap().len() <= 64);

        // Every surviving line is whole and the newest line is last
        let all = read_rotated_logs(&base, 2).unwrap();
        assert!(all.lines().all(|l| l.starts_with("line ") && l.ends_with(" padding")));
        assert!(all.ends_with("line 039 padding\n"));

        let numbers: Vec<u32> = all
            .lines()
            .map(|l| l[5..8].parse().unwrap())
            .collect();
        assert!(numbers.windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn test_zero_backups_truncates() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("pai_log.txt");
        let mut log = RotatingLogFile::open(&base, 16, 0).unwrap();

        log.write_line("0123456789").unwrap();
        log.write_line("abcdefghij").unwrap();
        log.flush().unwrap();

        assert_eq!(fs::read_to_string(&base).unwrap(), "abcdefghij\n");
        assert!(!backup_path(&base, 1).exists());
    }

    #[test]
    fn test_reopen_continues_size_accounting() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("nested").join("pai_log.txt");
        {
            let mut log = RotatingLogFile::open(&base, 1024, 1).unwrap();
            log.write_line("first session").unwrap();
        }

        let log = RotatingLogFile::open(&base, 1024, 1).unwrap();
        assert_eq!(log.written, "first session\n".len() as u64);
    }
}
