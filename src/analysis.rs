//! Offline traffic statistics
//!
//! - `decoder`: best-effort decoding of captured frames.
//! - `extractor`: the `KeyExtractor` trait and the reported traffic dimensions.
//! - `aggregation`: the time-bucketed aggregation engine.
//! - `report`: runs every dimension over a capture and writes the report.

pub mod aggregation;
pub mod decoder;
pub mod extractor;
pub mod report;

pub use aggregation::{aggregate, AggregationResult, TimeWindowSet, Timestamped};
pub use decoder::{DecodedRecord, TimedRecord};
pub use extractor::{KeyExtractor, TrafficDimension};
pub use report::{analyze, analyze_file, report_dir_name, write_report, AnalysisReport, DimensionReport};
