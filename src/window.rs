//! Daily activity windows.
//!
//! A window is a local time-of-day interval `[start, end)` during which
//! periodic actions may run. A window whose end is not after its start
//! crosses midnight: the end rolls into the next day.

use chrono::{Days, NaiveDateTime, NaiveTime};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ActivityWindow {
    /// Parse `HH:MM-HH:MM`.
    pub fn parse(raw: &str) -> Result<Self, WindowError> {
        let (start_raw, end_raw) = raw
            .trim()
            .split_once('-')
            .ok_or_else(|| WindowError::BadFormat(raw.to_string()))?;

        let start = NaiveTime::parse_from_str(start_raw.trim(), "%H:%M")
            .map_err(|_| WindowError::BadTime(start_raw.trim().to_string()))?;
        let end = NaiveTime::parse_from_str(end_raw.trim(), "%H:%M")
            .map_err(|_| WindowError::BadTime(end_raw.trim().to_string()))?;

        Ok(Self { start, end })
    }

    /// Window bounds anchored to `now`'s date. When the window crosses
    /// midnight the end lands on the next day.
    fn bounds(&self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let start = now.date().and_time(self.start);
        let mut end = now.date().and_time(self.end);
        if end <= start {
            end = end + Days::new(1);
        }
        (start, end)
    }

    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let (start, end) = self.bounds(now);
        start <= now && now < end
    }

    /// How long to sleep, from `now`, until the window next opens: today's
    /// start when it is still ahead, otherwise tomorrow's.
    pub fn until_next_start(&self, now: NaiveDateTime) -> Duration {
        let (start, _) = self.bounds(now);
        let target = if now < start {
            start
        } else {
            start + Days::new(1)
        };
        (target - now).to_std().unwrap_or_default()
    }
}

impl fmt::Display for ActivityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    BadFormat(String),
    BadTime(String),
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadFormat(raw) => {
                write!(f, "expected HH:MM-HH:MM (e.g. 09:00-18:00), got `{}`", raw)
            }
            Self::BadTime(raw) => write!(f, "invalid time `{}`", raw),
        }
    }
}

impl std::error::Error for WindowError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn parse_accepts_and_rejects() {
        let w = ActivityWindow::parse("09:00-18:00").unwrap();
        assert_eq!(w.to_string(), "09:00-18:00");

        assert!(ActivityWindow::parse("09:00").is_err());
        assert!(ActivityWindow::parse("9am-6pm").is_err());
        assert!(ActivityWindow::parse("25:00-18:00").is_err());
        assert!(ActivityWindow::parse("09:61-18:00").is_err());
    }

    #[test]
    fn daytime_window_bounds() {
        let w = ActivityWindow::parse("09:00-18:00").unwrap();
        assert!(!w.contains(at(8, 59)));
        assert!(w.contains(at(9, 0)));
        assert!(w.contains(at(17, 59)));
        assert!(!w.contains(at(18, 0)));
    }

    #[test]
    fn midnight_crossing_window() {
        let w = ActivityWindow::parse("22:00-06:00").unwrap();
        assert!(w.contains(at(23, 30)));
        assert!(w.contains(at(22, 0)));
        assert!(!w.contains(at(7, 0)));
        assert!(!w.contains(at(21, 59)));
    }

    #[test]
    fn wakeup_after_a_crossing_window_targets_the_next_start() {
        let w = ActivityWindow::parse("22:00-06:00").unwrap();
        // 07:00 is past the window; next start is today's 22:00, 15h away.
        assert_eq!(
            w.until_next_start(at(7, 0)),
            Duration::from_secs(15 * 60 * 60)
        );
    }

    #[test]
    fn wakeup_before_a_daytime_window_targets_todays_start() {
        let w = ActivityWindow::parse("09:00-18:00").unwrap();
        assert_eq!(
            w.until_next_start(at(7, 0)),
            Duration::from_secs(2 * 60 * 60)
        );
        // Past the end: tomorrow's start.
        assert_eq!(
            w.until_next_start(at(20, 0)),
            Duration::from_secs(13 * 60 * 60)
        );
    }

    #[test]
    fn equal_bounds_cover_the_whole_day() {
        let w = ActivityWindow::parse("00:00-00:00").unwrap();
        assert!(w.contains(at(0, 0)));
        assert!(w.contains(at(12, 0)));
        assert!(w.contains(at(23, 59)));
    }
}
