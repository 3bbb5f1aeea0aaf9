// src/recorder.rs
use crate::types::{BoardKind, RowStatus};
use chrono::{DateTime, Local};
use log::info;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("cannot create data directory {}: {source}", .path.display())]
    Directory { path: PathBuf, source: io::Error },
    #[error("cannot create CSV file {}: {source}", .path.display())]
    Create { path: PathBuf, source: csv::Error },
    #[error("CSV write failed: {0}")]
    Write(#[from] csv::Error),
    #[error("CSV flush failed: {0}")]
    Flush(#[from] io::Error),
}

/// One CSV file per run: `Time,<columns>,Status`, one row per sampling cycle.
pub struct CsvLogger {
    path: PathBuf,
    writer: csv::Writer<File>,
    value_columns: usize,
    rows: u64,
}

impl CsvLogger {
    pub fn file_name(kind: BoardKind, at: DateTime<Local>) -> String {
        format!("{}_test_{}.csv", kind.tag(), at.format("%d-%m-%Y_%H-%M-%S"))
    }

    /// Creates `dir` if needed and writes the header.
    pub fn create(
        dir: &Path,
        kind: BoardKind,
        header: &[String],
        at: DateTime<Local>,
    ) -> Result<Self, RecorderError> {
        fs::create_dir_all(dir).map_err(|source| RecorderError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(Self::file_name(kind, at));
        let writer = csv::Writer::from_path(&path).map_err(|source| RecorderError::Create {
            path: path.clone(),
            source,
        })?;
        let mut logger = Self {
            path,
            writer,
            value_columns: header.len().saturating_sub(2),
            rows: 0,
        };
        logger.writer.write_record(header)?;
        logger.writer.flush()?;
        info!("logging to {}", logger.path.display());
        Ok(logger)
    }

    pub fn write_values(
        &mut self,
        at: DateTime<Local>,
        values: &[String],
        status: RowStatus,
    ) -> Result<(), RecorderError> {
        let mut record = Vec::with_capacity(self.value_columns + 2);
        record.push(at.format("%H:%M:%S").to_string());
        record.extend(values.iter().cloned());
        record.resize(self.value_columns + 1, String::new());
        record.push(status.as_str().to_owned());
        self.append(&record)
    }

    /// Row with every value field left empty.
    pub fn write_error(&mut self, at: DateTime<Local>, status: RowStatus) -> Result<(), RecorderError> {
        self.write_values(at, &[], status)
    }

    fn append(&mut self, record: &[String]) -> Result<(), RecorderError> {
        self.writer.write_record(record)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    fn header() -> Vec<String> {
        ["Time", "Ch 0", "Ch 1", "Status"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn file_name_uses_board_and_local_time() {
        assert_eq!(
            CsvLogger::file_name(BoardKind::Mcc118, at()),
            "mcc118_test_05-03-2024_14-07-09.csv"
        );
    }

    #[test]
    fn rows_keep_column_count() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data");
        let mut log = CsvLogger::create(&nested, BoardKind::Mcc128, &header(), at()).unwrap();
        log.write_values(at(), &["1.0".into(), "-2.5".into()], RowStatus::Ok)
            .unwrap();
        log.write_error(at(), RowStatus::SoftwareError).unwrap();
        log.write_values(at(), &["0.1".into(), "0.2".into()], RowStatus::TriggerError)
            .unwrap();
        assert_eq!(log.rows(), 3);

        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Time,Ch 0,Ch 1,Status",
                "14:07:09,1.0,-2.5,",
                "14:07:09,,,Software error",
                "14:07:09,0.1,0.2,Trigger error",
            ]
        );
    }

    #[test]
    fn unwritable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let err = CsvLogger::create(&blocker, BoardKind::Mcc152, &header(), at());
        assert!(matches!(err, Err(RecorderError::Directory { .. })));
    }
}
