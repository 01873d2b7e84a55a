//! Semester codes, anchor rules and the concrete day grid.

mod days;
mod pairs;

pub use days::SemesterCalendar;
pub use pairs::{PairTime, PairTimes};

use crate::error::TimetableError;
use crate::model::{Parity, Weekday};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Academic semester encoded as `year * 10 + term` (term 1 = autumn, 2 = spring).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SemesterCode(u32);

impl SemesterCode {
    pub fn new(year: i32, term: u8) -> Result<Self, TimetableError> {
        if !(1..=2).contains(&term) {
            return Err(TimetableError::validation(format!(
                "semester term must be 1 or 2, got {}",
                term
            )));
        }
        if !(1900..=9999).contains(&year) {
            return Err(TimetableError::validation(format!(
                "semester year {} is out of range",
                year
            )));
        }
        Ok(Self(year as u32 * 10 + term as u32))
    }

    pub fn from_code(code: u32) -> Result<Self, TimetableError> {
        Self::new((code / 10) as i32, (code % 10) as u8)
    }

    pub fn code(self) -> u32 {
        self.0
    }

    pub fn year(self) -> i32 {
        (self.0 / 10) as i32
    }

    pub fn term(self) -> u8 {
        (self.0 % 10) as u8
    }

    /// The semester a given date falls into.
    ///
    /// February through June is the spring term, January still belongs to the
    /// previous autumn, everything else is the autumn term.
    pub fn current(today: NaiveDate) -> Self {
        let (year, term) = match today.month() {
            2..=6 => (today.year(), 2),
            1 => (today.year() - 1, 1),
            _ => (today.year(), 1),
        };
        Self(year as u32 * 10 + term)
    }

    /// First teaching Monday under the institutional calendar rule.
    ///
    /// Autumn starts on the first Monday on or after September 1. Spring starts one
    /// week after the first Monday on or after February 1.
    pub fn anchor(self) -> NaiveDate {
        if self.term() % 2 == 1 {
            first_monday_on_or_after(self.year(), 9, 1)
        } else {
            first_monday_on_or_after(self.year(), 2, 1) + Duration::days(7)
        }
    }

    /// Last day of a semester lasting `total_weeks` weeks.
    pub fn end(self, total_weeks: u8) -> NaiveDate {
        self.anchor() + Duration::weeks(total_weeks as i64) - Duration::days(1)
    }
}

impl TryFrom<u32> for SemesterCode {
    type Error = TimetableError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        SemesterCode::from_code(code)
    }
}

impl From<SemesterCode> for u32 {
    fn from(code: SemesterCode) -> Self {
        code.0
    }
}

impl fmt::Display for SemesterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SemesterCode {
    type Err = TimetableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s
            .trim()
            .parse::<u32>()
            .map_err(|_| TimetableError::validation(format!("invalid semester code: {}", s)))?;
        Self::from_code(code)
    }
}

/// How the Monday of week 1 is chosen.
///
/// The day grid always follows the institutional rule. Calendar feeds number their
/// weeks from whatever anchor the parser was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorPolicy {
    /// Monday of the week holding the earliest event in the source
    #[default]
    EarliestEvent,
    /// Fixed calendar rule of the given semester
    Institutional(SemesterCode),
}

impl AnchorPolicy {
    /// Resolves the anchor Monday. `earliest` is the first event date seen in the source.
    pub fn resolve(&self, earliest: Option<NaiveDate>) -> Option<NaiveDate> {
        match self {
            AnchorPolicy::EarliestEvent => earliest.map(monday_of),
            AnchorPolicy::Institutional(code) => Some(code.anchor()),
        }
    }
}

/// A concrete teaching day of a semester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemesterDay {
    pub id: i64,
    pub semester: SemesterCode,
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub week: u8,
}

/// Where a date sits relative to the semester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemesterStatus {
    BeforeSemester,
    InSemester,
    AfterSemester,
}

/// Week summary for a given date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekInfo {
    pub semester: SemesterCode,
    pub week_number: u8,
    pub parity: Parity,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub current_day: NaiveDate,
    pub status: SemesterStatus,
}

/// Week information for `today`. Dates before or after the semester report the
/// first or last week respectively.
pub fn week_info(semester: SemesterCode, today: NaiveDate, total_weeks: u8) -> WeekInfo {
    let anchor = semester.anchor();
    let end = semester.end(total_weeks);

    let (week, status) = if today < anchor {
        (1, SemesterStatus::BeforeSemester)
    } else if today > end {
        (total_weeks, SemesterStatus::AfterSemester)
    } else {
        let week = week_number(anchor, today).clamp(1, total_weeks as i64) as u8;
        (week, SemesterStatus::InSemester)
    };

    let week_start = anchor + Duration::weeks(week as i64 - 1);
    WeekInfo {
        semester,
        week_number: week,
        parity: Parity::of_week(week),
        week_start,
        week_end: week_start + Duration::days(6),
        current_day: today,
        status,
    }
}

/// First and last day of the semester.
pub fn semester_bounds(semester: SemesterCode, total_weeks: u8) -> (NaiveDate, NaiveDate) {
    (semester.anchor(), semester.end(total_weeks))
}

/// One-based week number of `date` counted from `anchor`. May be zero or negative.
pub fn week_number(anchor: NaiveDate, date: NaiveDate) -> i64 {
    (date - anchor).num_days().div_euclid(7) + 1
}

/// Monday of the week containing `date`.
pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Dates of the full `total_weeks` x 7 grid, as `(date, weekday, week)`.
pub fn semester_dates(semester: SemesterCode, total_weeks: u8) -> Vec<(NaiveDate, Weekday, u8)> {
    let anchor = semester.anchor();
    (1..=total_weeks)
        .flat_map(|week| {
            Weekday::ALL.into_iter().map(move |weekday| {
                let offset = (week as i64 - 1) * 7 + weekday.index() as i64;
                (anchor + Duration::days(offset), weekday, week)
            })
        })
        .collect()
}

fn first_monday_on_or_after(year: i32, month: u32, day: u32) -> NaiveDate {
    // Month/day are constants from the calendar rule and always valid.
    let start = NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN);
    let offset = (7 - start.weekday().num_days_from_monday()) % 7;
    start + Duration::days(offset as i64)
}
