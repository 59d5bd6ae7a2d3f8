//! JSONL probe log with size-based rotation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::ping::ProbeReport;

const FILE_PREFIX: &str = "probes_";
const FILE_SUFFIX: &str = ".jsonl";

#[derive(Serialize)]
struct ProbeRecord<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    report: &'a ProbeReport,
}

/// Rotating JSONL writer for probe reports
///
/// Each line is one report tagged with the time it was logged:
///
/// ```text
/// {"timestamp":"2024-05-01T12:00:00.123Z","event":"completed","sent":1000,"echoed":1000,"delay_ms":14}
/// ```
#[derive(Debug)]
pub struct ProbeLog {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    files_opened: u64,
}

impl ProbeLog {
    /// Create a log writing into `dir` (created if missing)
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            files_opened: 0,
        })
    }

    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        Self::new(&config.log_dir, config.max_records_per_file, config.max_files_to_keep)
    }

    /// Append one report, rotating first if the current file is full
    pub fn record(&mut self, report: &ProbeReport) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }
        let line = serde_json::to_string(&ProbeRecord {
            timestamp: Utc::now(),
            report,
        })?;
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
        }
        self.records_in_file += 1;
        Ok(())
    }

    /// Log every report until the sending side closes; returns the count
    pub async fn consume(mut self, mut reports: mpsc::UnboundedReceiver<ProbeReport>) -> usize {
        let mut written = 0;
        while let Some(report) = reports.recv().await {
            match self.record(&report) {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to log probe report: {}", e),
            }
        }
        info!("Probe log closed after {} records", written);
        written
    }

    /// Log files currently on disk, oldest first
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
            })
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        let name = format!(
            "{}{}_{:04}{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.files_opened,
            FILE_SUFFIX
        );
        let path = self.dir.join(name);
        self.writer = Some(BufWriter::new(File::create(&path)?));
        self.records_in_file = 0;
        self.files_opened += 1;
        debug!("Probe log rotated to {}", path.display());
        self.prune()
    }

    fn prune(&self) -> Result<()> {
        let files = self.files()?;
        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for path in files.into_iter().take(excess) {
            fs::remove_file(&path)?;
            debug!("Removed old probe log {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_are_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut log = ProbeLog::new(dir.path(), 100, 5).unwrap();

        log.record(&ProbeReport::Completed { sent: 1000, echoed: 1000, delay_ms: 14 })
            .unwrap();
        log.record(&ProbeReport::TimedOut { sent: 2000 }).unwrap();

        let files = log.files().unwrap();
        assert_eq!(files.len(), 1);
        let contents = fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "completed");
        assert_eq!(first["delay_ms"], 14);
        assert!(first["timestamp"].is_string());
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "timed_out");
    }

    #[test]
    fn test_rotation_and_retention() {
        let dir = TempDir::new().unwrap();
        let mut log = ProbeLog::new(dir.path(), 2, 3).unwrap();

        for sent in 0..9 {
            log.record(&ProbeReport::TimedOut { sent }).unwrap();
        }

        // 9 records at 2 per file = 5 files, only the newest 3 kept
        let files = log.files().unwrap();
        assert_eq!(files.len(), 3);
        let newest = fs::read_to_string(files.last().unwrap()).unwrap();
        assert_eq!(newest.lines().count(), 1);
        assert!(newest.contains("\"sent\":8"));
    }

    #[test]
    fn test_other_files_are_left_alone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        let mut log = ProbeLog::new(dir.path(), 1, 1).unwrap();

        for sent in 0..3 {
            log.record(&ProbeReport::SendFailed { sent }).unwrap();
        }

        assert_eq!(log.files().unwrap().len(), 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_consume_until_closed() {
        let dir = TempDir::new().unwrap();
        let log = ProbeLog::new(dir.path().join("nested"), 10, 2).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(ProbeReport::Echoed { timestamp: 5 }).unwrap();
        tx.send(ProbeReport::Fault { message: "spi".into() }).unwrap();
        drop(tx);

        assert_eq!(tokio_test::block_on(log.consume(rx)), 2);
    }
}
