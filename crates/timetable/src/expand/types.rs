use crate::calendar::SemesterCode;
use crate::model::PairSlot;
use crate::store::ReplaceStats;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name -> id maps for everything a set of schedules references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityIds {
    pub groups: BTreeMap<String, i64>,
    pub disciplines: BTreeMap<String, i64>,
    pub teachers: BTreeMap<String, i64>,
}

/// Outcome of one wipe-then-rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub semester: SemesterCode,
    pub groups: usize,
    /// Nominal lessons read from the schedules
    pub lessons: usize,
    /// Nominal lessons with no matching semester day
    pub unplaced: usize,
    pub deleted: usize,
    pub inserted: usize,
}

impl RebuildSummary {
    pub(crate) fn new(
        semester: SemesterCode,
        groups: usize,
        lessons: usize,
        unplaced: usize,
        stats: ReplaceStats,
    ) -> Self {
        Self {
            semester,
            groups,
            lessons,
            unplaced,
            deleted: stats.deleted,
            inserted: stats.inserted,
        }
    }
}

/// A manually added lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLesson {
    pub semester: SemesterCode,
    pub date: NaiveDate,
    pub pair: u8,
    pub discipline: String,
    pub lesson_type_id: u8,
    pub groups: Vec<String>,
    #[serde(default)]
    pub teachers: Vec<String>,
    #[serde(default)]
    pub rooms: Vec<String>,
    #[serde(default)]
    pub campus: String,
    #[serde(default)]
    pub is_official: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub lesson_id: i64,
    pub target_date: NaiveDate,
    pub target_pair: u8,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub comment: String,
}

/// One end of a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRef {
    pub id: i64,
    pub date: NaiveDate,
    pub pair: PairSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub source: SlotRef,
    pub destination: SlotRef,
    pub reason: String,
    pub comment: String,
}
