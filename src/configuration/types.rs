//! Typed pieces of the capture configuration.
//!
//! The file format keeps the deadline as plain strings (`until = "06:00"`,
//! `run_for = "1d 2h"`); the types here are what those strings turn into once
//! validated, and they carry the deadline arithmetic.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;

/// Default number of time windows used by the analysis pass.
pub const DEFAULT_WINDOWS: usize = 10;

/// Default extension of the capture artifact.
pub const DEFAULT_EXTENSION: &str = "pcap";

fn time_of_day_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{2}):(\d{2})$").expect("static regex"))
}

fn run_period_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)([dhm])$").expect("static regex"))
}

/// A wall clock time of day, minute precision, at which a capture ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ConfigError> {
        if hour > 23 {
            return Err(ConfigError::NotInRange(
                "until",
                format!("hour {} is not within 0..=23", hour),
            ));
        }
        if minute > 59 {
            return Err(ConfigError::NotInRange(
                "until",
                format!("minute {} is not within 0..=59", minute),
            ));
        }
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(TimeOfDay)
            .ok_or_else(|| ConfigError::BadTimeOfDay(format!("{:02}:{:02}", hour, minute)))
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    /// First instant strictly after `now` whose local wall clock reads this
    /// time of day, with seconds zeroed.
    ///
    /// Today's occurrence is used when it is still ahead of `now`, otherwise
    /// the occurrence on the following calendar day. Local times skipped by a
    /// daylight saving transition resolve one hour later.
    pub fn next_occurrence<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();
        let candidate = resolve_local(&tz, today.and_time(self.0));
        if candidate > *now {
            return candidate;
        }
        match today.succ_opt() {
            Some(tomorrow) => resolve_local(&tz, tomorrow.and_time(self.0)),
            None => candidate + TimeDelta::days(1),
        }
    }
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt;
    }
    let shifted = naive + TimeDelta::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

impl FromStr for TimeOfDay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let caps = time_of_day_pattern()
            .captures(s)
            .ok_or_else(|| ConfigError::BadTimeOfDay(s.to_string()))?;
        let hour = caps[1]
            .parse::<u32>()
            .map_err(|e| ConfigError::BadTimeOfDay(format!("{}: {}", s, e)))?;
        let minute = caps[2]
            .parse::<u32>()
            .map_err(|e| ConfigError::BadTimeOfDay(format!("{}: {}", s, e)))?;
        TimeOfDay::new(hour, minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// A relative capture length made of days, hours and minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunPeriod {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
}

impl RunPeriod {
    pub fn new(days: u32, hours: u32, minutes: u32) -> Result<Self, ConfigError> {
        let period = RunPeriod {
            days,
            hours,
            minutes,
        };
        if period.is_zero() {
            return Err(ConfigError::NotInRange(
                "run_for",
                "at least one of days, hours or minutes must be non-zero".to_string(),
            ));
        }
        Ok(period)
    }

    pub fn is_zero(&self) -> bool {
        self.days == 0 && self.hours == 0 && self.minutes == 0
    }

    pub fn as_time_delta(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.days))
            + TimeDelta::hours(i64::from(self.hours))
            + TimeDelta::minutes(i64::from(self.minutes))
    }
}

impl FromStr for RunPeriod {
    type Err = ConfigError;

    /// Parses space separated `<int>d`, `<int>h` and `<int>m` tokens in any
    /// order. A unit may appear at most once.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut days = None;
        let mut hours = None;
        let mut minutes = None;

        for token in s.split_whitespace() {
            let caps = run_period_token_pattern()
                .captures(token)
                .ok_or_else(|| ConfigError::BadRunPeriod(format!("unknown token `{}`", token)))?;
            let value = caps[1]
                .parse::<u32>()
                .map_err(|e| ConfigError::BadRunPeriod(format!("`{}`: {}", token, e)))?;
            let slot = match &caps[2] {
                "d" => &mut days,
                "h" => &mut hours,
                _ => &mut minutes,
            };
            if slot.replace(value).is_some() {
                return Err(ConfigError::BadRunPeriod(format!(
                    "unit `{}` given more than once",
                    &caps[2]
                )));
            }
        }

        if days.is_none() && hours.is_none() && minutes.is_none() {
            return Err(ConfigError::BadRunPeriod("empty run period".to_string()));
        }
        RunPeriod::new(
            days.unwrap_or(0),
            hours.unwrap_or(0),
            minutes.unwrap_or(0),
        )
    }
}

impl fmt::Display for RunPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.days > 0 {
            parts.push(format!("{}d", self.days));
        }
        if self.hours > 0 {
            parts.push(format!("{}h", self.hours));
        }
        if self.minutes > 0 {
            parts.push(format!("{}m", self.minutes));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// When a capture session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineSpec {
    /// Run until the next occurrence of a wall clock time.
    Absolute(TimeOfDay),
    /// Run for a fixed amount of time from the start.
    Relative(RunPeriod),
}

impl DeadlineSpec {
    /// Computes the absolute stop instant for a session starting at `now`.
    pub fn deadline_from<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<DateTime<Tz>, ConfigError> {
        match self {
            DeadlineSpec::Absolute(time_of_day) => Ok(time_of_day.next_occurrence(now)),
            DeadlineSpec::Relative(period) => now
                .clone()
                .checked_add_signed(period.as_time_delta())
                .ok_or_else(|| {
                    ConfigError::NotInRange("run_for", format!("{} overflows the calendar", period))
                }),
        }
    }
}

impl fmt::Display for DeadlineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlineSpec::Absolute(t) => write!(f, "until {}", t),
            DeadlineSpec::Relative(p) => write!(f, "for {}", p),
        }
    }
}

/// Settings of the offline analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Number of equal width time windows per dimension.
    pub windows: usize,
    /// Run the analysis on the capture artifact as soon as the session stops.
    pub analyze_on_stop: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            windows: DEFAULT_WINDOWS,
            analyze_on_stop: false,
        }
    }
}

/// Validated, immutable configuration of one capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub interface: String,
    pub ssid: String,
    pub output_directory: PathBuf,
    pub base_name: String,
    pub extension: String,
    pub deadline: DeadlineSpec,
    pub analysis: AnalysisSettings,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, MappedLocalTime, NaiveDate, Utc};

    /// UTC+1 that moves to UTC+2 at 2024-03-31 01:00 UTC, so local wall
    /// clocks jump from 02:00 straight to 03:00.
    #[derive(Debug, Clone, Copy)]
    struct SpringForward;

    impl SpringForward {
        const WINTER: i32 = 3600;
        const SUMMER: i32 = 2 * 3600;

        fn switch_utc() -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap().and_hms_opt(1, 0, 0).unwrap()
        }

        fn offset(seconds: i32) -> FixedOffset {
            FixedOffset::east_opt(seconds).unwrap()
        }
    }

    impl TimeZone for SpringForward {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            SpringForward
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> MappedLocalTime<FixedOffset> {
            self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> MappedLocalTime<FixedOffset> {
            let gap_start = Self::switch_utc() + TimeDelta::seconds(Self::WINTER.into());
            let gap_end = Self::switch_utc() + TimeDelta::seconds(Self::SUMMER.into());
            if *local < gap_start {
                MappedLocalTime::Single(Self::offset(Self::WINTER))
            } else if *local >= gap_end {
                MappedLocalTime::Single(Self::offset(Self::SUMMER))
            } else {
                MappedLocalTime::None
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_time(NaiveTime::MIN))
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc < Self::switch_utc() {
                Self::offset(Self::WINTER)
            } else {
                Self::offset(Self::SUMMER)
            }
        }
    }

    fn at(date: (i32, u32, u32), time: (u32, u32, u32)) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(date.0, date.1, date.2, time.0, time.1, time.2)
            .single()
            .unwrap()
    }

    #[test]
    fn test_time_of_day_parsing() {
        let t: TimeOfDay = "06:00".parse().unwrap();
        assert_eq!((t.hour(), t.minute()), (6, 0));
        assert_eq!(t.to_string(), "06:00");

        assert!(matches!("23:59".parse::<TimeOfDay>(), Ok(_)));
        assert!(matches!(
            "24:00".parse::<TimeOfDay>(),
            Err(ConfigError::NotInRange("until", _))
        ));
        assert!(matches!(
            "12:60".parse::<TimeOfDay>(),
            Err(ConfigError::NotInRange("until", _))
        ));
        assert!(matches!(
            "6:00".parse::<TimeOfDay>(),
            Err(ConfigError::BadTimeOfDay(_))
        ));
        assert!(matches!(
            "06-00".parse::<TimeOfDay>(),
            Err(ConfigError::BadTimeOfDay(_))
        ));
    }

    #[test]
    fn test_run_period_parsing() {
        let p: RunPeriod = "2d 3h 30m".parse().unwrap();
        assert_eq!(p, RunPeriod { days: 2, hours: 3, minutes: 30 });

        let p: RunPeriod = "30m 1d".parse().unwrap();
        assert_eq!(p, RunPeriod { days: 1, hours: 0, minutes: 30 });

        let p: RunPeriod = "0d 5m".parse().unwrap();
        assert_eq!(p.as_time_delta(), TimeDelta::minutes(5));
        assert_eq!(p.to_string(), "5m");

        assert!(matches!("".parse::<RunPeriod>(), Err(ConfigError::BadRunPeriod(_))));
        assert!(matches!("1x".parse::<RunPeriod>(), Err(ConfigError::BadRunPeriod(_))));
        assert!(matches!("-1h".parse::<RunPeriod>(), Err(ConfigError::BadRunPeriod(_))));
        assert!(matches!("1h 2h".parse::<RunPeriod>(), Err(ConfigError::BadRunPeriod(_))));
        assert!(matches!(
            "0d 0h 0m".parse::<RunPeriod>(),
            Err(ConfigError::NotInRange("run_for", _))
        ));
    }

    #[test]
    fn test_absolute_deadline_rolls_to_next_day() {
        let spec = DeadlineSpec::Absolute("06:00".parse().unwrap());
        let now = at((2024, 3, 10), (22, 0, 0));
        assert_eq!(spec.deadline_from(&now).unwrap(), at((2024, 3, 11), (6, 0, 0)));
    }

    #[test]
    fn test_absolute_deadline_same_day() {
        let spec = DeadlineSpec::Absolute("06:00".parse().unwrap());
        let now = at((2024, 3, 10), (4, 0, 0));
        assert_eq!(spec.deadline_from(&now).unwrap(), at((2024, 3, 10), (6, 0, 0)));
    }

    #[test]
    fn test_absolute_deadline_equal_to_now_rolls_over() {
        let spec = DeadlineSpec::Absolute("06:00".parse().unwrap());
        let now = at((2024, 12, 31), (6, 0, 0));
        assert_eq!(spec.deadline_from(&now).unwrap(), at((2025, 1, 1), (6, 0, 0)));
    }

    #[test]
    fn test_absolute_deadline_zeroes_seconds() {
        let spec = DeadlineSpec::Absolute("06:30".parse().unwrap());
        let now = at((2024, 3, 10), (6, 29, 45));
        assert_eq!(spec.deadline_from(&now).unwrap(), at((2024, 3, 10), (6, 30, 0)));
    }

    #[test]
    fn test_absolute_deadline_in_fixed_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 6, 1, 23, 15, 0).single().unwrap();
        let spec = DeadlineSpec::Absolute("00:10".parse().unwrap());
        let deadline = spec.deadline_from(&now).unwrap();
        assert_eq!(deadline, tz.with_ymd_and_hms(2024, 6, 2, 0, 10, 0).single().unwrap());
    }

    #[test]
    fn test_relative_deadline() {
        let spec = DeadlineSpec::Relative("1d 2h 3m".parse().unwrap());
        let now = at((2024, 3, 10), (22, 0, 0));
        assert_eq!(spec.deadline_from(&now).unwrap(), at((2024, 3, 12), (0, 3, 0)));
    }

    #[test]
    fn test_absolute_deadline_in_skipped_hour_moves_one_hour_later() {
        let spec = DeadlineSpec::Absolute("02:30".parse().unwrap());
        let now = SpringForward
            .with_ymd_and_hms(2024, 3, 30, 22, 0, 0)
            .single()
            .unwrap();

        let deadline = spec.deadline_from(&now).unwrap();
        assert_eq!(deadline, at((2024, 3, 31), (1, 30, 0)));
        assert_eq!(
            deadline.naive_local(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap().and_hms_opt(3, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_absolute_deadline_outside_gap_is_unshifted() {
        let spec = DeadlineSpec::Absolute("04:00".parse().unwrap());
        let now = SpringForward
            .with_ymd_and_hms(2024, 3, 31, 0, 30, 0)
            .single()
            .unwrap();
        assert_eq!(spec.deadline_from(&now).unwrap(), at((2024, 3, 31), (2, 0, 0)));
    }
}
