//! Nominal week model shared by both parsers, the expander and the diff engine.
//!
//! A group's timetable is a `ScheduleResult`: week number -> weekday -> pair -> lesson.
//! Every level is a `BTreeMap`, so two equal schedules always serialize identically.

mod lesson;

pub use lesson::{LessonData, LessonType, LessonTypes};

use crate::error::TimetableError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Highest pair slot in a teaching day.
pub const MAX_PAIR: u8 = 7;

/// Group name -> nominal schedule, as produced by the parsers.
pub type GroupSchedules = BTreeMap<String, ScheduleResult>;

/// Lessons of one day keyed by pair slot.
pub type DaySchedule = BTreeMap<PairSlot, LessonData>;

/// Day of the week, Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    /// Zero-based index, Monday = 0.
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self::ALL[date.weekday().num_days_from_monday() as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    /// The day name used by the university's own exports.
    pub fn local_name(self) -> &'static str {
        match self {
            Weekday::Monday => "Понедельник",
            Weekday::Tuesday => "Вторник",
            Weekday::Wednesday => "Среда",
            Weekday::Thursday => "Четверг",
            Weekday::Friday => "Пятница",
            Weekday::Saturday => "Суббота",
            Weekday::Sunday => "Воскресенье",
        }
    }

    /// Accepts either the English or the local day name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        let lowered = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|day| {
            day.name() == lowered || day.local_name().to_lowercase() == lowered
        })
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lesson slot number within a day, always in `1..=MAX_PAIR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PairSlot(u8);

impl PairSlot {
    pub fn new(number: u8) -> Result<Self, TimetableError> {
        if (1..=MAX_PAIR).contains(&number) {
            Ok(Self(number))
        } else {
            Err(TimetableError::validation(format!(
                "pair number {} is outside 1..={}",
                number, MAX_PAIR
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All pair slots of a day in order.
    pub fn all() -> impl Iterator<Item = PairSlot> {
        (1..=MAX_PAIR).map(PairSlot)
    }
}

impl TryFrom<u8> for PairSlot {
    type Error = TimetableError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PairSlot::new(value)
    }
}

impl From<PairSlot> for u8 {
    fn from(slot: PairSlot) -> Self {
        slot.0
    }
}

impl fmt::Display for PairSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Odd/even week rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Odd,
    Even,
}

impl Parity {
    pub fn of_week(week: u8) -> Self {
        if week % 2 == 1 {
            Parity::Odd
        } else {
            Parity::Even
        }
    }

    /// Week number that represents this parity in a two-week cycle.
    pub fn template_week(self) -> u8 {
        match self {
            Parity::Odd => 1,
            Parity::Even => 2,
        }
    }
}

/// One week of a group's timetable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeekSchedule {
    pub week_number: u8,
    pub days: BTreeMap<Weekday, DaySchedule>,
}

impl WeekSchedule {
    pub fn new(week_number: u8) -> Self {
        Self {
            week_number,
            days: BTreeMap::new(),
        }
    }

    pub fn lesson(&self, day: Weekday, pair: PairSlot) -> Option<&LessonData> {
        self.days.get(&day).and_then(|lessons| lessons.get(&pair))
    }

    pub fn insert(&mut self, day: Weekday, pair: PairSlot, lesson: LessonData) {
        self.days.entry(day).or_default().insert(pair, lesson);
    }

    pub fn lesson_count(&self) -> usize {
        self.days.values().map(BTreeMap::len).sum()
    }
}

/// Nominal timetable of a single group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub group_name: String,
    pub weeks: BTreeMap<u8, WeekSchedule>,
    /// Monday the week numbering was counted from, when the parser derived one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<NaiveDate>,
}

impl ScheduleResult {
    pub fn new(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            weeks: BTreeMap::new(),
            anchor: None,
        }
    }

    pub fn insert(&mut self, week: u8, day: Weekday, pair: PairSlot, lesson: LessonData) {
        self.weeks
            .entry(week)
            .or_insert_with(|| WeekSchedule::new(week))
            .insert(day, pair, lesson);
    }

    pub fn lesson(&self, week: u8, day: Weekday, pair: PairSlot) -> Option<&LessonData> {
        self.weeks.get(&week).and_then(|w| w.lesson(day, pair))
    }

    /// Iterates every lesson as `(week, day, pair, lesson)` in order.
    pub fn lessons(&self) -> impl Iterator<Item = (u8, Weekday, PairSlot, &LessonData)> + '_ {
        self.weeks.iter().flat_map(|(week, schedule)| {
            schedule.days.iter().flat_map(move |(day, lessons)| {
                lessons
                    .iter()
                    .map(move |(pair, lesson)| (*week, *day, *pair, lesson))
            })
        })
    }

    pub fn lesson_count(&self) -> usize {
        self.weeks.values().map(WeekSchedule::lesson_count).sum()
    }

    /// Spreads a two-week parity template over `total_weeks`.
    ///
    /// Template week 1 fills the odd weeks and template week 2 the even ones; a missing
    /// template leaves its parity empty.
    pub fn expand_cycle(&self, total_weeks: u8) -> ScheduleResult {
        let mut expanded = ScheduleResult {
            group_name: self.group_name.clone(),
            weeks: BTreeMap::new(),
            anchor: self.anchor,
        };
        for week in 1..=total_weeks {
            let template = Parity::of_week(week).template_week();
            if let Some(source) = self.weeks.get(&template) {
                let mut copy = source.clone();
                copy.week_number = week;
                expanded.weeks.insert(week, copy);
            }
        }
        expanded
    }
}
