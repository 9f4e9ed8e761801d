//! # Telemetry
//!
//! Persists the link event stream to rotating JSONL files.
//!
//! ## Format
//!
//! One JSON object per line. Each record carries an RFC 3339 timestamp
//! plus the serialized event, so files can be replayed or fed straight
//! into line-oriented tooling:
//!
//! ```text
//! {"timestamp":"2026-08-25T12:00:00.123+00:00","type":"connection_state","connected":true,...}
//! ```
//!
//! ## Rotation
//!
//! A fresh file starts once the current one holds
//! `max_records_per_file` records. Only the newest `max_files_to_keep`
//! files are retained; older ones are deleted at rotation time. File
//! names embed the creation timestamp and a per-run sequence number, so
//! lexicographic order is age order.

use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::link::LinkEvent;

/// Shared stem of every telemetry file name
const FILE_PREFIX: &str = "rotor-events-";

/// Telemetry file suffix
const FILE_SUFFIX: &str = ".jsonl";

/// One persisted line: wall-clock timestamp plus the event fields
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a LinkEvent,
}

/// Writes link events to rotating JSONL files.
///
/// Drive it with [`run`](Self::run), which consumes events until the
/// channel closes. Individual write failures are logged and skipped; a
/// full disk must not take the control path down.
pub struct EventLogger {
    config: TelemetryConfig,
    file: Option<File>,
    records_in_file: usize,
    sequence: u32,
}

impl EventLogger {
    #[must_use]
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            file: None,
            records_in_file: 0,
            sequence: 0,
        }
    }

    /// Consume events until the channel closes
    pub async fn run(mut self, mut events: UnboundedReceiver<LinkEvent>) {
        info!("Telemetry logger writing to {}", self.config.log_dir);
        while let Some(event) = events.recv().await {
            if let Err(e) = self.append(&event) {
                warn!("Telemetry write failed: {}", e);
            }
        }
        info!("Telemetry logger stopped");
    }

    /// Serialize one event and write it out, rotating first when the
    /// record limit is reached
    fn append(&mut self, event: &LinkEvent) -> Result<()> {
        if self.file.is_none() || self.records_in_file >= self.config.max_records_per_file {
            self.rotate()?;
        }

        let record = EventRecord {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
            // Events are rare; keep the file current for live tailing
            file.flush()?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    /// Start a fresh telemetry file and drop the oldest files beyond
    /// the retention limit
    fn rotate(&mut self) -> Result<()> {
        let dir = Path::new(&self.config.log_dir);
        fs::create_dir_all(dir)?;

        self.sequence += 1;
        let name = format!(
            "{}{}-{:04}{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%d-%H%M%S%.3f"),
            self.sequence,
            FILE_SUFFIX,
        );
        let path = dir.join(name);
        self.file = Some(File::create(&path)?);
        self.records_in_file = 0;
        info!("Telemetry file started: {}", path.display());

        self.prune(dir)
    }

    /// Delete the oldest telemetry files beyond the retention limit.
    /// Only files matching this logger's naming scheme are considered.
    fn prune(&self, dir: &Path) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_telemetry_file(path))
            .collect();

        if files.len() <= self.config.max_files_to_keep {
            return Ok(());
        }
        files.sort();

        let excess = files.len() - self.config.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Pruned telemetry file: {}", path.display()),
                Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

fn is_telemetry_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::HealthSnapshot;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn test_config(dir: &Path, max_records: usize, max_files: usize) -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            log_dir: dir.to_string_lossy().into_owned(),
            max_records_per_file: max_records,
            max_files_to_keep: max_files,
            format: "jsonl".to_string(),
        }
    }

    fn sample_event(connected: bool) -> LinkEvent {
        LinkEvent::ConnectionState {
            connected,
            port: Some("/dev/ttyUSB0".to_string()),
            baud_rate: Some(9600),
        }
    }

    fn telemetry_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_telemetry_file(path))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_records_are_one_json_object_per_line() {
        let dir = tempdir().unwrap();
        let mut logger = EventLogger::new(test_config(dir.path(), 100, 5));

        logger.append(&sample_event(true)).unwrap();
        logger
            .append(&LinkEvent::Health(HealthSnapshot {
                healthy: true,
                last_seen_ms: Some(123),
            }))
            .unwrap();

        let files = telemetry_files(dir.path());
        assert_eq!(files.len(), 1);

        let content = std::fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "connection_state");
        assert_eq!(first["connected"], true);
        assert_eq!(first["port"], "/dev/ttyUSB0");
        assert!(first["timestamp"].is_string());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "health");
        assert_eq!(second["healthy"], true);
        assert_eq!(second["last_seen_ms"], 123);
    }

    #[test]
    fn test_rotation_after_record_limit() {
        let dir = tempdir().unwrap();
        let mut logger = EventLogger::new(test_config(dir.path(), 2, 10));

        for i in 0..5 {
            logger.append(&sample_event(i % 2 == 0)).unwrap();
        }

        let files = telemetry_files(dir.path());
        assert_eq!(files.len(), 3);

        let counts: Vec<usize> = files
            .iter()
            .map(|path| std::fs::read_to_string(path).unwrap().lines().count())
            .collect();
        assert_eq!(counts, vec![2, 2, 1]);
    }

    #[test]
    fn test_prune_keeps_newest_files() {
        let dir = tempdir().unwrap();
        let mut logger = EventLogger::new(test_config(dir.path(), 1, 2));

        for _ in 0..4 {
            logger.append(&sample_event(true)).unwrap();
        }

        let files = telemetry_files(dir.path());
        assert_eq!(files.len(), 2);
        for path in &files {
            assert_eq!(
                std::fs::read_to_string(path).unwrap().lines().count(),
                1,
                "survivor should hold one record: {path:?}"
            );
        }
    }

    #[test]
    fn test_prune_ignores_other_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        let mut logger = EventLogger::new(test_config(dir.path(), 1, 1));

        for _ in 0..3 {
            logger.append(&sample_event(true)).unwrap();
        }

        assert_eq!(telemetry_files(dir.path()).len(), 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_run_drains_channel_until_close() {
        let dir = tempdir().unwrap();
        let logger = EventLogger::new(test_config(dir.path(), 100, 5));
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(logger.run(rx));
        tx.send(sample_event(true)).unwrap();
        tx.send(sample_event(false)).unwrap();
        drop(tx);
        handle.await.unwrap();

        let files = telemetry_files(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(
            std::fs::read_to_string(&files[0]).unwrap().lines().count(),
            2
        );
    }
}
