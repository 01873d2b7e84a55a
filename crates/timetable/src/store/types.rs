/// Row types for the timetable store
use crate::calendar::SemesterCode;
use crate::model::{PairSlot, Weekday};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Named entity tables that support get-or-create by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Group,
    Teacher,
    Discipline,
}

impl EntityKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            EntityKind::Group => "student_groups",
            EntityKind::Teacher => "teachers",
            EntityKind::Discipline => "disciplines",
        }
    }

    pub(crate) fn id_column(self) -> &'static str {
        match self {
            EntityKind::Group => "group_id",
            EntityKind::Teacher => "teacher_id",
            EntityKind::Discipline => "discipline_id",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Group => "group",
            EntityKind::Teacher => "teacher",
            EntityKind::Discipline => "discipline",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub is_official: bool,
}

/// An occurrence about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOccurrence {
    pub semester: SemesterCode,
    pub day_id: i64,
    pub pair: PairSlot,
    pub kind: i64,
    pub work_type: u8,
    pub discipline_id: i64,
    pub time_start: String,
    pub time_end: String,
    pub campus: String,
    pub is_official: bool,
    pub group_ids: BTreeSet<i64>,
    pub teacher_ids: BTreeSet<i64>,
    pub rooms: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredOccurrence {
    pub id: i64,
    pub semester: SemesterCode,
    pub day_id: i64,
    pub pair: PairSlot,
    pub kind: i64,
    pub work_type: u8,
    pub discipline_id: i64,
    pub time_start: String,
    pub time_end: String,
    pub campus: String,
    pub is_official: bool,
    pub group_ids: BTreeSet<i64>,
    pub teacher_ids: BTreeSet<i64>,
    pub rooms: BTreeSet<String>,
}

impl StoredOccurrence {
    /// The same occurrence without its identity, for comparing rebuilds.
    pub fn content(&self) -> NewOccurrence {
        NewOccurrence {
            semester: self.semester,
            day_id: self.day_id,
            pair: self.pair,
            kind: self.kind,
            work_type: self.work_type,
            discipline_id: self.discipline_id,
            time_start: self.time_start.clone(),
            time_end: self.time_end.clone(),
            campus: self.campus.clone(),
            is_official: self.is_official,
            group_ids: self.group_ids.clone(),
            teacher_ids: self.teacher_ids.clone(),
            rooms: self.rooms.clone(),
        }
    }
}

/// Restricts occurrence lookups to one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OccurrenceFilter {
    All,
    Groups(Vec<i64>),
    Teachers(Vec<i64>),
    Room(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    pub id: i64,
    pub dest_occurrence_id: i64,
    pub src_day_id: i64,
    pub src_pair: PairSlot,
    pub reason: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Counts of a wipe-then-rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceStats {
    pub deleted: usize,
    pub inserted: usize,
}

/// A parsed source document about to be stored.
#[derive(Debug, Clone)]
pub struct NewSnapshot<'a> {
    pub semester: SemesterCode,
    pub version: i64,
    pub source_name: &'a str,
    pub format: &'a str,
    pub content_hash: &'a str,
    pub is_official: bool,
    pub group_count: usize,
    pub document: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotMeta {
    pub id: i64,
    pub semester: SemesterCode,
    pub version: i64,
    pub source_name: String,
    pub format: String,
    pub content_hash: String,
    pub is_official: bool,
    pub group_count: usize,
    pub created_at: DateTime<Utc>,
}

impl ToSql for SemesterCode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code() as i64))
    }
}

impl FromSql for SemesterCode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        let code = u32::try_from(code).map_err(|_| FromSqlError::OutOfRange(code))?;
        SemesterCode::from_code(code).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for PairSlot {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.get() as i64))
    }
}

impl FromSql for PairSlot {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let pair = i64::column_result(value)?;
        let pair = u8::try_from(pair).map_err(|_| FromSqlError::OutOfRange(pair))?;
        PairSlot::new(pair).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Weekday {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.index() as i64))
    }
}

impl FromSql for Weekday {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let index = i64::column_result(value)?;
        u8::try_from(index)
            .ok()
            .and_then(Weekday::from_index)
            .ok_or(FromSqlError::OutOfRange(index))
    }
}
