//! Analysis front-end: decode a capture, aggregate every reported dimension,
//! hand the result over as JSON and plain-text tables.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;

use super::aggregation::{aggregate, AggregationResult};
use super::decoder::TimedRecord;
use super::extractor::TrafficDimension;
use crate::data_capture::CapturedRecord;
use crate::error_handling::types::{AnalysisError, StorageError};
use crate::storage::{read_capture, resolve_dir};

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_TEXT: &str = "report.txt";

/// First and last record timestamps of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CaptureSpan {
    pub fn of(records: &[CapturedRecord]) -> Option<Self> {
        let start = records.iter().map(|r| r.timestamp).min()?;
        let end = records.iter().map(|r| r.timestamp).max()?;
        Some(Self { start, end })
    }

    pub fn duration(&self) -> chrono::TimeDelta {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionReport {
    pub dimension: String,
    pub title: String,
    pub ranked: Vec<RankedEntry>,
    /// Window counts per key.
    pub series: std::collections::BTreeMap<String, Vec<u64>>,
    /// Right edge of every window.
    pub boundaries: Vec<DateTime<Utc>>,
    pub unclassified: u64,
}

fn epoch_to_utc(seconds: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64).unwrap_or_default()
}

impl DimensionReport {
    pub fn new(dimension: TrafficDimension, result: AggregationResult) -> Self {
        let ranked = result
            .ranked()
            .into_iter()
            .map(|(key, count)| RankedEntry { key, count })
            .collect();
        let boundaries = result
            .windows
            .as_ref()
            .map(|w| w.boundaries.iter().copied().map(epoch_to_utc).collect())
            .unwrap_or_default();
        Self {
            dimension: dimension.slug(),
            title: dimension.title(),
            ranked,
            series: result.counts,
            boundaries,
            unclassified: result.unclassified,
        }
    }
}

impl fmt::Display for DimensionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .ranked
            .iter()
            .map(|e| e.key.len())
            .max()
            .unwrap_or(0)
            .max(self.title.len() + " over time".len());
        writeln!(f, "{:<width$}  {:>8}", self.title, "Count", width = width)?;
        writeln!(f, "{}", "-".repeat(width + 10))?;
        for entry in &self.ranked {
            writeln!(f, "{:<width$}  {:>8}", entry.key, entry.count, width = width)?;
        }
        if self.unclassified > 0 {
            writeln!(f, "({} record(s) without a key)", self.unclassified)?;
        }
        if !self.ranked.is_empty() {
            writeln!(f)?;
            self.write_over_time(f, width)?;
        }
        Ok(())
    }
}

impl DimensionReport {
    /// Key x window matrix, columns headed by each window's right edge.
    fn write_over_time(&self, f: &mut fmt::Formatter<'_>, width: usize) -> fmt::Result {
        let edges: Vec<String> = self
            .boundaries
            .iter()
            .map(|b| b.format("%H:%M:%S%.3f").to_string())
            .collect();
        let column = edges.iter().map(String::len).max().unwrap_or(0);

        write!(f, "{:<width$}", format!("{} over time", self.title), width = width)?;
        for edge in &edges {
            write!(f, "  {:>column$}", edge, column = column)?;
        }
        writeln!(f)?;
        writeln!(f, "{}", "-".repeat(width + edges.len() * (column + 2)))?;
        for entry in &self.ranked {
            write!(f, "{:<width$}", entry.key, width = width)?;
            for count in self.series.get(&entry.key).into_iter().flatten() {
                write!(f, "  {:>column$}", count, column = column)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub records: usize,
    pub windows: usize,
    pub span: Option<CaptureSpan>,
    pub dimensions: Vec<DimensionReport>,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => writeln!(
                f,
                "Capture Start: {}  Capture End: {}  ({} record(s))",
                span.start.format("%Y-%m-%d %H:%M:%S%.3f"),
                span.end.format("%Y-%m-%d %H:%M:%S%.3f"),
                self.records
            )?,
            None => writeln!(f, "Empty capture")?,
        }
        for dimension in &self.dimensions {
            writeln!(f)?;
            write!(f, "{}", dimension)?;
        }
        Ok(())
    }
}

/// Runs every reported dimension over `records`.
///
/// Dimensions are aggregated on scoped threads; the result is the same as a
/// sequential run.
pub fn analyze(records: &[CapturedRecord], windows: usize) -> Result<AnalysisReport, AnalysisError> {
    if windows == 0 {
        return Err(AnalysisError::InvalidWindowCount(windows));
    }
    let timed: Vec<TimedRecord> = records.iter().map(TimedRecord::from).collect();
    debug!("Decoded {} record(s)", timed.len());

    let results = thread::scope(|scope| {
        let handles: Vec<_> = TrafficDimension::REPORTED
            .iter()
            .map(|&dimension| {
                let timed = &timed;
                (
                    dimension,
                    scope.spawn(move || aggregate(timed, &dimension, windows)),
                )
            })
            .collect();

        handles
            .into_iter()
            .map(|(dimension, handle)| {
                let result = handle.join().map_err(|_| {
                    error!("Aggregation of {} panicked", dimension.slug());
                    AnalysisError::Report(format!("aggregation of {} panicked", dimension.slug()))
                })??;
                Ok(DimensionReport::new(dimension, result))
            })
            .collect::<Result<Vec<_>, AnalysisError>>()
    })?;

    Ok(AnalysisReport {
        records: records.len(),
        windows,
        span: CaptureSpan::of(records),
        dimensions: results,
    })
}

/// Reads a capture file and analyses it.
pub fn analyze_file<P: AsRef<Path>>(path: P, windows: usize) -> Result<AnalysisReport, AnalysisError> {
    let path = path.as_ref();
    info!("Analysing {}", path.display());
    let records = read_capture(path)?;
    analyze(&records, windows)
}

/// Writes `report.json` and `report.txt` into a fresh directory `name` (or
/// `name1`, `name2`, ...) under `parent`, and returns that directory.
pub fn write_report(report: &AnalysisReport, parent: &Path, name: &str) -> Result<PathBuf, AnalysisError> {
    let dir = resolve_dir(parent, name)?;
    fs::create_dir_all(&dir).map_err(StorageError::CreateFailed)?;

    let json = serde_json::to_string_pretty(report)
        .map_err(|e| AnalysisError::Report(format!("JSON serialization failed: {}", e)))?;
    fs::write(dir.join(REPORT_JSON), json).map_err(StorageError::WriteFailed)?;
    fs::write(dir.join(REPORT_TEXT), report.to_string()).map_err(StorageError::WriteFailed)?;

    info!("Report written to {}", dir.display());
    Ok(dir)
}

/// Report directory name for a capture file: `<stem>_stats`.
pub fn report_dir_name(capture: &Path) -> String {
    let stem = capture
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    format!("{}_stats", stem)
}
