use crate::model::{LessonData, PairSlot, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Rendered in place of an empty value.
pub const MISSING: &str = "—";

/// Fields compared between two versions of a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffField {
    Subject,
    Teacher,
    Room,
    Campus,
    LessonType,
}

impl DiffField {
    pub const ALL: [DiffField; 5] = [
        DiffField::Subject,
        DiffField::Teacher,
        DiffField::Room,
        DiffField::Campus,
        DiffField::LessonType,
    ];
}

impl fmt::Display for DiffField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffField::Subject => "subject",
            DiffField::Teacher => "teacher",
            DiffField::Room => "room",
            DiffField::Campus => "campus",
            DiffField::LessonType => "lesson_type",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Unchanged,
    Added,
    Removed,
    Modified,
}

/// Display form of a lesson; empty values become `—`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LessonSnapshot {
    pub subject: String,
    pub teacher: String,
    pub room: String,
    pub campus: String,
    pub lesson_type: String,
}

impl LessonSnapshot {
    pub fn of(lesson: &LessonData) -> Self {
        Self {
            subject: or_missing(lesson.subject.trim().to_string()),
            teacher: or_missing(lesson.teacher_display()),
            room: or_missing(lesson.room_display()),
            campus: or_missing(lesson.campus.clone()),
            lesson_type: or_missing(lesson.lesson_type.clone()),
        }
    }

    /// A snapshot carrying only a message, used for whole-group entries.
    pub(crate) fn note(message: &str) -> Self {
        Self {
            subject: message.to_string(),
            teacher: MISSING.to_string(),
            room: MISSING.to_string(),
            campus: MISSING.to_string(),
            lesson_type: MISSING.to_string(),
        }
    }

    pub fn field(&self, field: DiffField) -> &str {
        match field {
            DiffField::Subject => &self.subject,
            DiffField::Teacher => &self.teacher,
            DiffField::Room => &self.room,
            DiffField::Campus => &self.campus,
            DiffField::LessonType => &self.lesson_type,
        }
    }

    /// Fields whose rendered values differ, in `DiffField::ALL` order.
    pub fn changed_fields(&self, other: &LessonSnapshot) -> Vec<DiffField> {
        DiffField::ALL
            .into_iter()
            .filter(|field| self.field(*field) != other.field(*field))
            .collect()
    }
}

fn or_missing(value: String) -> String {
    if value.trim().is_empty() {
        MISSING.to_string()
    } else {
        value
    }
}

/// Where a change sits: weekday, pair and the first week it shows up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LessonSlot {
    pub day: Weekday,
    pub pair: PairSlot,
    pub week: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: DiffField,
    pub from: String,
    pub to: String,
}

/// State of one week within a change's parity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekComparison {
    pub week: u8,
    pub before: Option<LessonSnapshot>,
    pub after: Option<LessonSnapshot>,
    pub change_type: ChangeType,
    pub changed_fields: Vec<DiffField>,
}

/// An added or removed lesson. `slot` is absent for whole-group entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<LessonSlot>,
    pub details: LessonSnapshot,
    pub weeks_comparison: Vec<WeekComparison>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifiedLesson {
    pub slot: LessonSlot,
    pub changes: Vec<FieldChange>,
    pub before: LessonSnapshot,
    pub after: LessonSnapshot,
    pub weeks_comparison: Vec<WeekComparison>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeDetails {
    pub added: Vec<LessonChange>,
    pub removed: Vec<LessonChange>,
    pub modified: Vec<ModifiedLesson>,
}

/// Per-field counts of every week-level difference found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub subject: usize,
    pub teacher: usize,
    pub room: usize,
    pub campus: usize,
}

impl ChangeSummary {
    pub(crate) fn record(&mut self, field: DiffField) {
        match field {
            DiffField::Subject => self.subject += 1,
            DiffField::Teacher => self.teacher += 1,
            DiffField::Room => self.room += 1,
            DiffField::Campus => self.campus += 1,
            DiffField::LessonType => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupComparison {
    pub total: usize,
    pub details: ChangeDetails,
    pub summary: ChangeSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonReport {
    pub groups: BTreeMap<String, GroupComparison>,
}

impl ComparisonReport {
    /// Total top-level entries across all groups.
    pub fn total(&self) -> usize {
        self.groups.values().map(|g| g.total).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
