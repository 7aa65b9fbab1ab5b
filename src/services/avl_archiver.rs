//! AVL report archive.
//!
//! Appends accepted reports to a daily CSV file (named by the report's
//! UTC date) and reads them back for replay. Archive failures are logged
//! and never abort the pipeline.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::types::AvlReport;

struct OpenArchive {
    date: String,
    writer: csv::Writer<File>,
}

pub struct AvlArchiver {
    dir: PathBuf,
    current: Mutex<Option<OpenArchive>>,
}

impl AvlArchiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    /// Append a report to the day's archive file.
    pub fn archive(&self, report: &AvlReport) {
        if let Err(e) = self.try_archive(report) {
            warn!(vehicle_id = %report.vehicle_id, error = %e, "Failed to archive AVL report");
        }
    }

    fn try_archive(&self, report: &AvlReport) -> Result<()> {
        let date = report
            .datetime()
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .context("report time out of range")?;

        let mut current = self.current.lock();

        let rotate = current.as_ref().map(|a| a.date != date).unwrap_or(true);
        if rotate {
            std::fs::create_dir_all(&self.dir)?;
            let path = self.dir.join(format!("avl-{date}.csv"));
            let existing = path.exists();
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let writer = csv::WriterBuilder::new()
                .has_headers(!existing)
                .from_writer(file);
            if !existing {
                info!(path = %path.display(), "Opened new AVL archive file");
            }
            *current = Some(OpenArchive { date, writer });
        }

        let archive = current.as_mut().expect("archive opened above");
        archive.writer.serialize(report)?;
        archive.writer.flush()?;
        Ok(())
    }
}

/// Read an archived (or hand-built) AVL CSV file, in feed order.
pub fn read_replay_file(path: impl AsRef<Path>) -> Result<Vec<AvlReport>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open replay file {}", path.display()))?;

    let mut reports = Vec::new();
    for (line, record) in reader.deserialize::<AvlReport>().enumerate() {
        match record {
            Ok(report) => reports.push(report),
            Err(e) => warn!(line = line + 2, error = %e, "Skipping malformed replay record"),
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssignmentType;

    fn report(vehicle_id: &str, time: i64) -> AvlReport {
        AvlReport {
            vehicle_id: vehicle_id.to_string(),
            time,
            lat: 50.0755,
            lon: 14.4378,
            heading: Some(90.0),
            speed: None,
            assignment_id: Some("b1".to_string()),
            assignment_type: AssignmentType::Block,
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("headway-archiver-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_archive_round_trip() {
        let dir = temp_dir("roundtrip");
        let archiver = AvlArchiver::new(&dir);

        let day_ms = 1_700_000_000_000;
        archiver.archive(&report("v1", day_ms));
        archiver.archive(&report("v2", day_ms + 30_000));

        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);

        let path = files[0].as_ref().unwrap().path();
        let reports = read_replay_file(&path).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0], report("v1", day_ms));
        assert_eq!(reports[1].vehicle_id, "v2");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_archive_rotates_by_report_date() {
        let dir = temp_dir("rotate");
        let archiver = AvlArchiver::new(&dir);

        let day_ms = 1_700_000_000_000;
        archiver.archive(&report("v1", day_ms));
        archiver.archive(&report("v1", day_ms + 86_400_000));

        let mut files: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with("avl-"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_replay_skips_malformed_lines() {
        let dir = temp_dir("malformed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("replay.csv");
        std::fs::write(
            &path,
            "vehicleId,time,lat,lon,heading,speed,assignmentId,assignmentType\n\
             v1,1700000000000,50.0,14.0,,,b1,BLOCK\n\
             not,a,valid,row,,,,\n\
             v2,1700000030000,50.1,14.1,,,,NONE\n",
        )
        .unwrap();

        let reports = read_replay_file(&path).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].vehicle_id, "v1");
        assert_eq!(reports[1].assignment_type, AssignmentType::None);

        std::fs::remove_dir_all(&dir).ok();
    }
}
