//! Calendar arithmetic over the date strings carried by event records.
//!
//! A date entry is either a single ISO day (`2025-03-14`) or an inclusive
//! range written `2025-03-01至2025-03-14`. `~` and ` to ` are accepted as
//! range delimiters on input; rendering always uses `至`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

pub const RANGE_DELIMITER: &str = "至";
const ALTERNATE_DELIMITERS: [&str; 2] = ["~", " to "];
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("date entry is empty")]
    Empty,
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDay(String),
    #[error("date range '{0}' ends before it starts")]
    Reversed(String),
}

/// One parsed date entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateSpec {
    Day(NaiveDate),
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateSpec {
    pub fn parse(raw: &str) -> Result<Self, DateError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DateError::Empty);
        }

        let split = std::iter::once(RANGE_DELIMITER)
            .chain(ALTERNATE_DELIMITERS)
            .find_map(|delimiter| trimmed.split_once(delimiter));
        let Some((left, right)) = split else {
            return parse_day(trimmed).map(DateSpec::Day);
        };

        let start = parse_day(left)?;
        let end = parse_day(right)?;
        if end < start {
            return Err(DateError::Reversed(trimmed.to_string()));
        }
        Ok(Self::from_bounds(start, end))
    }

    /// Builds a spec from inclusive bounds, collapsing one-day ranges to `Day`.
    pub fn from_bounds(start: NaiveDate, end: NaiveDate) -> Self {
        if start == end {
            Self::Day(start)
        } else {
            Self::Range { start, end }
        }
    }

    pub fn start(&self) -> NaiveDate {
        match self {
            Self::Day(day) => *day,
            Self::Range { start, .. } => *start,
        }
    }

    pub fn end(&self) -> NaiveDate {
        match self {
            Self::Day(day) => *day,
            Self::Range { end, .. } => *end,
        }
    }

    /// Inclusive number of days covered.
    pub fn span_days(&self) -> i64 {
        (self.end() - self.start()).num_days() + 1
    }

    pub fn is_multi_day(&self) -> bool {
        self.span_days() > 1
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start() <= day && day <= self.end()
    }

    pub fn contains(&self, other: &DateSpec) -> bool {
        self.start() <= other.start() && other.end() <= self.end()
    }

    pub fn overlaps(&self, other: &DateSpec) -> bool {
        self.start() <= other.end() && other.start() <= self.end()
    }

    /// Splits the spec at calendar-month boundaries.
    pub fn months(&self) -> Vec<DateSpec> {
        let mut pieces = Vec::new();
        let mut cursor = self.start();
        let end = self.end();
        while cursor <= end {
            let month_end = last_day_of_month(cursor.year(), cursor.month()).min(end);
            pieces.push(DateSpec::from_bounds(cursor, month_end));
            match month_end.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        pieces
    }
}

impl fmt::Display for DateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day(day) => write!(f, "{}", day.format(DATE_FORMAT)),
            Self::Range { start, end } => write!(
                f,
                "{}{RANGE_DELIMITER}{}",
                start.format(DATE_FORMAT),
                end.format(DATE_FORMAT)
            ),
        }
    }
}

impl FromStr for DateSpec {
    type Err = DateError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

/// Parses every entry, failing on the first malformed one.
pub fn parse_date_specs<S: AsRef<str>>(raw: &[S]) -> Result<Vec<DateSpec>, DateError> {
    raw.iter().map(|entry| DateSpec::parse(entry.as_ref())).collect()
}

/// Smallest single range covering every spec, or `None` for an empty slice.
pub fn bounding_span(specs: &[DateSpec]) -> Option<DateSpec> {
    let start = specs.iter().map(DateSpec::start).min()?;
    let end = specs.iter().map(DateSpec::end).max()?;
    Some(DateSpec::from_bounds(start, end))
}

/// True when `child` sits inside at least one of the `parents`.
pub fn covered_by_any(parents: &[DateSpec], child: &DateSpec) -> bool {
    parents.iter().any(|parent| parent.contains(child))
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

fn parse_day(raw: &str) -> Result<NaiveDate, DateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DateError::Empty);
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map_err(|_| DateError::InvalidDay(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{bounding_span, covered_by_any, parse_date_specs, DateError, DateSpec};

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid day")
    }

    #[test]
    fn parses_single_days_and_ranges() {
        assert_eq!(
            DateSpec::parse("2025-01-05").expect("day"),
            DateSpec::Day(day("2025-01-05"))
        );
        let range = DateSpec::parse("2025-01-01至2025-01-10").expect("range");
        assert_eq!(range.start(), day("2025-01-01"));
        assert_eq!(range.end(), day("2025-01-10"));
        assert_eq!(range.span_days(), 10);
        assert!(range.is_multi_day());
    }

    #[test]
    fn accepts_ascii_delimiters_and_renders_canonical_form() {
        let tilde = DateSpec::parse(" 2025-02-01 ~ 2025-02-03 ").expect("tilde");
        let words = DateSpec::parse("2025-02-01 to 2025-02-03").expect("words");
        assert_eq!(tilde, words);
        assert_eq!(tilde.to_string(), "2025-02-01至2025-02-03");
    }

    #[test]
    fn one_day_range_collapses_to_day() {
        let spec = DateSpec::parse("2025-03-03至2025-03-03").expect("range");
        assert_eq!(spec, DateSpec::Day(day("2025-03-03")));
        assert!(!spec.is_multi_day());
    }

    #[test]
    fn rejects_malformed_and_reversed_entries() {
        assert_eq!(DateSpec::parse("  "), Err(DateError::Empty));
        assert!(matches!(
            DateSpec::parse("2025-13-01"),
            Err(DateError::InvalidDay(_))
        ));
        assert!(matches!(
            DateSpec::parse("2025-02-10至2025-02-01"),
            Err(DateError::Reversed(_))
        ));
        assert!(parse_date_specs(&["2025-01-01", "next tuesday"]).is_err());
    }

    #[test]
    fn containment_and_overlap() {
        let parent = DateSpec::parse("2025-01-01至2025-01-10").expect("parent");
        let inside = DateSpec::parse("2025-01-03").expect("inside");
        let straddling = DateSpec::parse("2025-01-09至2025-01-12").expect("straddling");
        let outside = DateSpec::parse("2025-02-01").expect("outside");

        assert!(parent.contains(&inside));
        assert!(!parent.contains(&straddling));
        assert!(parent.overlaps(&straddling));
        assert!(!parent.overlaps(&outside));
        assert!(covered_by_any(&[outside, parent], &inside));
    }

    #[test]
    fn bounding_span_covers_all_entries() {
        let specs = parse_date_specs(&["2025-03-05", "2025-01-02至2025-01-04"]).expect("specs");
        let span = bounding_span(&specs).expect("span");
        assert_eq!(span.to_string(), "2025-01-02至2025-03-05");
        assert!(bounding_span(&[]).is_none());
    }

    #[test]
    fn months_split_at_calendar_boundaries() {
        let spec = DateSpec::parse("2024-01-30至2024-03-02").expect("spec");
        let months = spec
            .months()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        assert_eq!(
            months,
            vec![
                "2024-01-30至2024-01-31",
                "2024-02-01至2024-02-29",
                "2024-03-01至2024-03-02",
            ]
        );
    }
}
