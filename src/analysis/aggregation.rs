//! Time-bucketed aggregation engine.
//!
//! [`aggregate`] bins a finite batch of records into `N` equal-width windows
//! spanning the batch's `[min, max]` timestamps, counting every key produced
//! by a [`KeyExtractor`]. Records are processed independently, in any order,
//! and the result does not depend on the order of the input.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use super::decoder::TimedRecord;
use super::extractor::KeyExtractor;
use crate::error_handling::types::AnalysisError;

pub trait Timestamped {
    /// Seconds since the Unix epoch.
    fn timestamp(&self) -> f64;
}

impl Timestamped for TimedRecord {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// `N` equal-width windows over `[start, end]`.
///
/// `boundaries[i]` is the inclusive right edge of window `i`; the last one is
/// exactly `end`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeWindowSet {
    pub start: f64,
    pub end: f64,
    pub width: f64,
    pub boundaries: Vec<f64>,
}

impl TimeWindowSet {
    pub fn new(start: f64, end: f64, windows: usize) -> Result<Self, AnalysisError> {
        if windows == 0 {
            return Err(AnalysisError::InvalidWindowCount(windows));
        }
        let width = (end - start) / windows as f64;
        let mut boundaries: Vec<f64> = (1..=windows).map(|i| start + width * i as f64).collect();
        if let Some(last) = boundaries.last_mut() {
            *last = end;
        }
        Ok(Self {
            start,
            end,
            width,
            boundaries,
        })
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Index of the smallest window whose right edge is `>= t`.
    ///
    /// A zero-width set puts everything in the last window; timestamps past
    /// the last edge are clamped to it.
    pub fn window_of(&self, t: f64) -> usize {
        let last = self.len() - 1;
        if self.width <= 0.0 {
            return last;
        }
        self.boundaries.partition_point(|b| *b < t).min(last)
    }
}

/// Per-key window counts for one dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregationResult {
    /// `None` for an empty batch.
    pub windows: Option<TimeWindowSet>,
    pub counts: BTreeMap<String, Vec<u64>>,
    /// Records for which the extractor yielded no key.
    pub unclassified: u64,
}

impl AggregationResult {
    pub fn is_empty(&self) -> bool {
        self.windows.is_none()
    }

    pub fn total(&self, key: &str) -> u64 {
        self.counts.get(key).map(|c| c.iter().sum()).unwrap_or(0)
    }

    /// Totals per key, highest count first, ties by key.
    pub fn ranked(&self) -> Vec<(String, u64)> {
        let mut ranked: Vec<(String, u64)> = self
            .counts
            .iter()
            .map(|(key, counts)| (key.clone(), counts.iter().sum()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

/// Aggregates `records` into `windows` time windows with `extractor`.
///
/// # Errors
/// [`AnalysisError::InvalidWindowCount`] when `windows` is zero.
pub fn aggregate<R, E>(records: &[R], extractor: &E, windows: usize) -> Result<AggregationResult, AnalysisError>
where
    R: Timestamped,
    E: KeyExtractor<R> + ?Sized,
{
    if windows == 0 {
        return Err(AnalysisError::InvalidWindowCount(windows));
    }
    let Some(first) = records.first() else {
        return Ok(AggregationResult::default());
    };

    let (min, max) = records
        .iter()
        .map(Timestamped::timestamp)
        .fold((first.timestamp(), first.timestamp()), |(lo, hi), t| {
            (lo.min(t), hi.max(t))
        });
    let set = TimeWindowSet::new(min, max, windows)?;

    let mut counts: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    let mut unclassified = 0;
    for record in records {
        let keys = match extractor.extract(record) {
            Ok(keys) if !keys.is_empty() => keys,
            _ => {
                unclassified += 1;
                continue;
            }
        };
        let window = set.window_of(record.timestamp());
        for key in keys {
            counts.entry(key).or_insert_with(|| vec![0; windows])[window] += 1;
        }
    }

    debug!(
        "Aggregated {} record(s) into {} key(s), {} unclassified",
        records.len(),
        counts.len(),
        unclassified
    );

    Ok(AggregationResult {
        windows: Some(set),
        counts,
        unclassified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::ExtractionError;

    #[derive(Debug, Clone)]
    struct Sample {
        t: f64,
        keys: Vec<&'static str>,
    }

    impl Timestamped for Sample {
        fn timestamp(&self) -> f64 {
            self.t
        }
    }

    fn sample(t: f64, keys: &[&'static str]) -> Sample {
        Sample {
            t,
            keys: keys.to_vec(),
        }
    }

    fn by_keys(s: &Sample) -> Result<Vec<String>, ExtractionError> {
        Ok(s.keys.iter().map(|k| k.to_string()).collect())
    }

    #[test]
    fn test_three_points_ten_windows() {
        let records = vec![sample(0.0, &["A"]), sample(5.0, &["A"]), sample(10.0, &["A"])];
        let result = aggregate(&records, &by_keys, 10).unwrap();
        assert_eq!(result.counts["A"], vec![1, 0, 0, 0, 1, 0, 0, 0, 0, 1]);
        assert_eq!(result.unclassified, 0);
        assert_eq!(result.windows.unwrap().boundaries.last(), Some(&10.0));
    }

    #[test]
    fn test_empty_batch() {
        let result = aggregate::<Sample, _>(&[], &by_keys, 10).unwrap();
        assert!(result.is_empty());
        assert!(result.counts.is_empty());
        assert_eq!(result.unclassified, 0);
    }

    #[test]
    fn test_zero_windows_rejected() {
        let records = vec![sample(0.0, &["A"])];
        assert!(matches!(
            aggregate(&records, &by_keys, 0),
            Err(AnalysisError::InvalidWindowCount(0))
        ));
    }

    #[test]
    fn test_zero_width_goes_to_last_window() {
        let records = vec![sample(7.0, &["A"]), sample(7.0, &["B"])];
        let result = aggregate(&records, &by_keys, 4).unwrap();
        assert_eq!(result.counts["A"], vec![0, 0, 0, 1]);
        assert_eq!(result.counts["B"], vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_conservation_with_unclassified() {
        let records: Vec<Sample> = (0..37)
            .map(|i| {
                let keys: &[&'static str] = match i % 3 {
                    0 => &["x"],
                    1 => &["y"],
                    _ => &[],
                };
                sample(i as f64 * 1.7, keys)
            })
            .collect();
        let result = aggregate(&records, &by_keys, 7).unwrap();
        let counted: u64 = result.counts.values().flatten().sum();
        assert_eq!(counted + result.unclassified, records.len() as u64);
        assert_eq!(result.unclassified, 12);
    }

    #[test]
    fn test_extractor_errors_are_unclassified() {
        let records = vec![sample(0.0, &["A"]), sample(1.0, &["A"])];
        let failing = |s: &Sample| {
            if s.t > 0.5 {
                Err(ExtractionError::Malformed("bad".to_string()))
            } else {
                by_keys(s)
            }
        };
        let result = aggregate(&records, &failing, 2).unwrap();
        assert_eq!(result.counts["A"], vec![1, 0]);
        assert_eq!(result.unclassified, 1);
    }

    #[test]
    fn test_window_assignment_is_monotonic() {
        let set = TimeWindowSet::new(3.0, 17.3, 9).unwrap();
        let mut last = 0;
        for step in 0..=1000 {
            let t = 3.0 + 14.3 * step as f64 / 1000.0;
            let w = set.window_of(t);
            assert!(w >= last);
            assert!(w < 9);
            last = w;
        }
        assert_eq!(set.window_of(3.0), 0);
        assert_eq!(set.window_of(17.3), 8);
    }

    #[test]
    fn test_unordered_input_and_idempotence() {
        let records = vec![
            sample(9.0, &["b"]),
            sample(1.0, &["a"]),
            sample(4.5, &["a", "b"]),
            sample(3.0, &[]),
        ];
        let first = aggregate(&records, &by_keys, 5).unwrap();
        let second = aggregate(&records, &by_keys, 5).unwrap();
        assert_eq!(first, second);

        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(aggregate(&reversed, &by_keys, 5).unwrap(), first);

        assert_eq!(first.windows.as_ref().unwrap().start, 1.0);
        assert_eq!(first.ranked(), vec![("a".to_string(), 2), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_fan_out_lands_in_one_window() {
        let records = vec![
            sample(0.0, &[]),
            sample(3.0, &["one.example", "two.example"]),
            sample(10.0, &[]),
        ];
        let result = aggregate(&records, &by_keys, 10).unwrap();
        assert_eq!(result.counts["one.example"][2], 1);
        assert_eq!(result.counts["two.example"][2], 1);
        assert_eq!(result.total("one.example"), 1);
        assert_eq!(result.unclassified, 2);
    }

    #[test]
    fn test_ranked_order() {
        let records = vec![
            sample(0.0, &["c"]),
            sample(1.0, &["b"]),
            sample(2.0, &["b"]),
            sample(3.0, &["a"]),
        ];
        let ranked = aggregate(&records, &by_keys, 2).unwrap().ranked();
        assert_eq!(
            ranked,
            vec![
                ("b".to_string(), 2),
                ("a".to_string(), 1),
                ("c".to_string(), 1)
            ]
        );
    }
}
