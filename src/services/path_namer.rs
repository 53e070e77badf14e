//! Output keys of the form `{timeBucket}/{name}`.

use crate::models::object::basename;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::str::FromStr;

/// Granularity of the UTC folder every output lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePrecision {
    /// `YYYYMMDDTHHZ`
    #[default]
    Hour,
    /// `YYYYMMDDTHHMMZ`
    Minute,
}

impl TimePrecision {
    fn pattern(self) -> &'static str {
        match self {
            TimePrecision::Hour => "%Y%m%dT%HZ",
            TimePrecision::Minute => "%Y%m%dT%H%MZ",
        }
    }

    /// Whether `segment` is a folder name this precision would produce.
    fn matches(self, segment: &str) -> bool {
        // The minute and second fields are padded so the parser gets a full timestamp.
        let padded = match self {
            TimePrecision::Hour => segment.strip_suffix('Z').map(|s| format!("{s}0000")),
            TimePrecision::Minute => segment.strip_suffix('Z').map(|s| format!("{s}00")),
        };
        let expected_len = match self {
            TimePrecision::Hour => 12,
            TimePrecision::Minute => 14,
        };
        segment.len() == expected_len
            && padded
                .map(|p| NaiveDateTime::parse_from_str(&p, "%Y%m%dT%H%M%S").is_ok())
                .unwrap_or(false)
    }
}

impl FromStr for TimePrecision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" | "h" => Ok(TimePrecision::Hour),
            "minute" | "min" | "m" => Ok(TimePrecision::Minute),
            other => Err(format!("unknown time bucket precision `{}` (expected hour or minute)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathNamer {
    pub precision: TimePrecision,
}

impl PathNamer {
    pub fn new(precision: TimePrecision) -> Self {
        Self { precision }
    }

    pub fn time_bucket(&self, timestamp: DateTime<Utc>) -> String {
        timestamp.format(self.precision.pattern()).to_string()
    }

    /// `{timeBucket}/{name}` where name is the key relative to
    /// `preserve_subpath_of` when given, or the key's basename otherwise.
    ///
    /// Two sources with the same basename collide unless the subpath is kept.
    pub fn output_path(
        &self,
        timestamp: DateTime<Utc>,
        source_key: &str,
        preserve_subpath_of: Option<&str>,
    ) -> String {
        let name = match preserve_subpath_of {
            Some(prefix) => relative_key(source_key, prefix),
            None => basename(source_key),
        };
        format!("{}/{}", self.time_bucket(timestamp), name)
    }

    /// True when the key sits under a time bucket folder of either precision.
    pub fn is_output_key(key: &str) -> bool {
        match key.split_once('/') {
            Some((first, rest)) if !rest.is_empty() => {
                TimePrecision::Hour.matches(first) || TimePrecision::Minute.matches(first)
            }
            _ => false,
        }
    }
}

fn relative_key<'a>(key: &'a str, prefix: &str) -> &'a str {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return key;
    }
    key.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 14, 5, 42).unwrap()
    }

    #[test]
    fn hour_bucket_uses_basename() {
        let namer = PathNamer::new(TimePrecision::Hour);
        assert_eq!(namer.output_path(ts(), "in/2025/cat.jpg", None), "20261019T14Z/cat.jpg");
    }

    #[test]
    fn minute_bucket() {
        let namer = PathNamer::new(TimePrecision::Minute);
        assert_eq!(namer.output_path(ts(), "cat.jpg", None), "20261019T1405Z/cat.jpg");
    }

    #[test]
    fn preserve_subpath_keeps_relative_key() {
        let namer = PathNamer::default();
        assert_eq!(
            namer.output_path(ts(), "in/2025/cat.jpg", Some("in")),
            "20261019T14Z/2025/cat.jpg"
        );
        assert_eq!(
            namer.output_path(ts(), "in/2025/cat.jpg", Some("in/")),
            "20261019T14Z/2025/cat.jpg"
        );
        assert_eq!(
            namer.output_path(ts(), "a/b.png", Some("")),
            "20261019T14Z/a/b.png"
        );
    }

    #[test]
    fn prefix_must_end_at_a_segment_boundary() {
        let namer = PathNamer::default();
        assert_eq!(
            namer.output_path(ts(), "inbox/cat.jpg", Some("in")),
            "20261019T14Z/inbox/cat.jpg"
        );
    }

    #[test]
    fn same_inputs_same_path() {
        let namer = PathNamer::default();
        let later_same_hour = Utc.with_ymd_and_hms(2026, 10, 19, 14, 59, 0).unwrap();
        assert_eq!(
            namer.output_path(ts(), "x/y.png", None),
            namer.output_path(later_same_hour, "x/y.png", None)
        );
    }

    #[test]
    fn recognises_output_keys() {
        assert!(PathNamer::is_output_key("20261019T14Z/cat.jpg"));
        assert!(PathNamer::is_output_key("20261019T1405Z/a/b.png"));
        assert!(!PathNamer::is_output_key("cat.jpg"));
        assert!(!PathNamer::is_output_key("photos/20261019T14Z/cat.jpg"));
        assert!(!PathNamer::is_output_key("20261399T14Z/cat.jpg"));
        assert!(!PathNamer::is_output_key("20261019T14Z/"));
    }

    #[test]
    fn precision_parses_from_text() {
        assert_eq!("HOUR".parse::<TimePrecision>(), Ok(TimePrecision::Hour));
        assert_eq!("minute".parse::<TimePrecision>(), Ok(TimePrecision::Minute));
        assert!("second".parse::<TimePrecision>().is_err());
    }
}
