//! Time-series expansion
//!
//! Splits a date range into consecutive windows following a periodicity
//! pattern. Each time-series computation field is then replicated once per
//! window as `{name}TS{window_end:%Y%m%d}`.

use crate::report::error::{ConfigurationError, ReportError, ReportResult};
use chrono::{Duration, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A `[start, end)` date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Suffix appended to column names replicated for this window
    pub fn column_suffix(&self) -> String {
        format!("TS{}", self.end.format("%Y%m%d"))
    }
}

/// Periodicity of a time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSeriesPattern {
    Daily,
    Weekly,
    #[serde(rename = "bi-weekly", alias = "semimonthly")]
    BiWeekly,
    Monthly,
    Quarterly,
    Semiannually,
    Annually,
    /// Caller-supplied windows
    Custom,
}

enum Step {
    Days(i64),
    Months(u32),
}

impl TimeSeriesPattern {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::BiWeekly => "bi-weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Semiannually => "semiannually",
            Self::Annually => "annually",
            Self::Custom => "custom",
        }
    }

    fn step(&self) -> Option<Step> {
        match self {
            Self::Daily => Some(Step::Days(1)),
            Self::Weekly => Some(Step::Days(7)),
            Self::BiWeekly => Some(Step::Days(14)),
            Self::Monthly => Some(Step::Months(1)),
            Self::Quarterly => Some(Step::Months(3)),
            Self::Semiannually => Some(Step::Months(6)),
            Self::Annually => Some(Step::Months(12)),
            Self::Custom => None,
        }
    }

    /// Human label of a field's value within one window
    pub fn window_label(&self, verbose_name: &str, window: &DateWindow, index: usize) -> String {
        let start = window.start.format("%Y-%m-%d");
        match self {
            Self::Monthly => format!("{} {}", verbose_name, window.start.format("%B %Y")),
            Self::Daily => format!("{} {}", verbose_name, start),
            Self::Weekly => format!("{} Week {} {}", verbose_name, index + 1, start),
            Self::Annually => format!("{} {}", verbose_name, window.start.format("%Y")),
            _ => format!(
                "{} {} - {}",
                verbose_name,
                start,
                window.end.format("%Y-%m-%d")
            ),
        }
    }
}

impl FromStr for TimeSeriesPattern {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "bi-weekly" | "biweekly" | "semimonthly" => Ok(Self::BiWeekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "semiannually" => Ok(Self::Semiannually),
            "annually" | "yearly" => Ok(Self::Annually),
            "custom" => Ok(Self::Custom),
            _ => Err(ReportError::UnsupportedPattern(s.to_string())),
        }
    }
}

impl std::fmt::Display for TimeSeriesPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Windows covering `[start, end)` for a pattern
///
/// Windows are appended until one ends at or after `end`, so the last window
/// may run past it. At least one window is always produced. `Custom` returns
/// `custom` untouched.
pub fn time_series_windows(
    pattern: TimeSeriesPattern,
    start: NaiveDateTime,
    end: NaiveDateTime,
    custom: &[DateWindow],
) -> ReportResult<Vec<DateWindow>> {
    let step = match pattern.step() {
        Some(step) => step,
        None => return Ok(custom.to_vec()),
    };

    let mut windows = Vec::new();
    let mut current = start;
    loop {
        let next = match step {
            Step::Days(days) => current.checked_add_signed(Duration::days(days)),
            Step::Months(months) => current.checked_add_months(Months::new(months)),
        }
        .ok_or_else(|| {
            ConfigurationError::Misconfigured(format!(
                "time series window after {} is out of range",
                current
            ))
        })?;

        windows.push(DateWindow::new(current, next));
        current = next;
        if next >= end {
            break;
        }
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_window_counts_for_2020() {
        let cases = [
            (TimeSeriesPattern::Monthly, 12),
            (TimeSeriesPattern::Daily, 365),
            (TimeSeriesPattern::Weekly, 53),
            (TimeSeriesPattern::BiWeekly, 27),
            (TimeSeriesPattern::Quarterly, 4),
            (TimeSeriesPattern::Semiannually, 2),
            (TimeSeriesPattern::Annually, 1),
        ];
        for (pattern, expected) in cases {
            let windows = time_series_windows(pattern, at(2020, 1, 1), at(2020, 12, 31), &[]).unwrap();
            assert_eq!(windows.len(), expected, "{}", pattern);
        }
    }

    #[test]
    fn test_windows_are_contiguous() {
        let windows =
            time_series_windows(TimeSeriesPattern::Monthly, at(2020, 1, 1), at(2020, 4, 1), &[]).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], DateWindow::new(at(2020, 1, 1), at(2020, 2, 1)));
        assert_eq!(windows[2].end, at(2020, 4, 1));
        assert_eq!(windows[1].column_suffix(), "TS20200301");
    }

    #[test]
    fn test_custom_windows_pass_through() {
        let custom = vec![
            DateWindow::new(at(2020, 1, 1), at(2020, 1, 15)),
            DateWindow::new(at(2020, 3, 1), at(2020, 4, 1)),
        ];
        let windows =
            time_series_windows(TimeSeriesPattern::Custom, at(2019, 1, 1), at(2021, 1, 1), &custom).unwrap();
        assert_eq!(windows, custom);
    }

    #[test]
    fn test_parse_patterns() {
        assert_eq!("semimonthly".parse::<TimeSeriesPattern>().unwrap(), TimeSeriesPattern::BiWeekly);
        assert_eq!("Monthly".parse::<TimeSeriesPattern>().unwrap(), TimeSeriesPattern::Monthly);
        let err = "hourly".parse::<TimeSeriesPattern>().unwrap_err();
        assert!(matches!(err, ReportError::UnsupportedPattern(p) if p == "hourly"));
    }

    #[test]
    fn test_window_labels() {
        let window = DateWindow::new(at(2024, 1, 15), at(2024, 1, 22));
        assert_eq!(
            TimeSeriesPattern::Monthly.window_label("Sales Value", &window, 0),
            "Sales Value January 2024"
        );
        assert_eq!(
            TimeSeriesPattern::Weekly.window_label("Sales Value", &window, 2),
            "Sales Value Week 3 2024-01-15"
        );
        assert_eq!(TimeSeriesPattern::Annually.window_label("Total", &window, 0), "Total 2024");
        assert_eq!(
            TimeSeriesPattern::Quarterly.window_label("Total", &window, 0),
            "Total 2024-01-15 - 2024-01-22"
        );
    }
}
