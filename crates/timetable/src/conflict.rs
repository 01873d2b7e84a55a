//! Double-booking checks for a single (semester, day, pair) slot.

use crate::calendar::SemesterCode;
use crate::error::{ConflictKind, TimetableError};
use crate::model::PairSlot;
use crate::store::{EntityKind, ScheduleStore};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A lesson about to occupy a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub semester: SemesterCode,
    pub day_id: i64,
    pub pair: PairSlot,
    pub group_ids: BTreeSet<i64>,
    pub teacher_ids: BTreeSet<i64>,
    pub rooms: BTreeSet<String>,
}

/// Entity already booked in the slot, with the occurrences holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityConflict {
    pub entity_id: i64,
    pub occurrence_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomConflict {
    pub room: String,
    pub occurrence_ids: Vec<i64>,
}

/// Every clash found for a booking, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub groups: Vec<EntityConflict>,
    pub teachers: Vec<EntityConflict>,
    pub rooms: Vec<RoomConflict>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.teachers.is_empty() && self.rooms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len() + self.teachers.len() + self.rooms.len()
    }
}

pub struct ConflictDetector<'a> {
    store: &'a ScheduleStore,
    max_rooms_per_teacher: usize,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(store: &'a ScheduleStore, max_rooms_per_teacher: usize) -> Self {
        Self {
            store,
            max_rooms_per_teacher,
        }
    }

    /// All group, teacher and room clashes of `booking` with occurrences in the same slot.
    pub fn check(&self, booking: &Booking) -> Result<ConflictReport, TimetableError> {
        self.check_excluding(booking, None)
    }

    /// Like `check`, ignoring the occurrence `exclude` (the lesson being moved).
    pub fn check_excluding(
        &self,
        booking: &Booking,
        exclude: Option<i64>,
    ) -> Result<ConflictReport, TimetableError> {
        let existing =
            self.store
                .slot_occurrences(booking.semester, booking.day_id, booking.pair, exclude)?;

        let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        let mut teachers: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        let mut rooms: BTreeMap<String, Vec<i64>> = BTreeMap::new();

        for occurrence in &existing {
            for id in booking.group_ids.intersection(&occurrence.group_ids) {
                groups.entry(*id).or_default().push(occurrence.id);
            }
            for id in booking.teacher_ids.intersection(&occurrence.teacher_ids) {
                teachers.entry(*id).or_default().push(occurrence.id);
            }
            for room in booking.rooms.intersection(&occurrence.rooms) {
                rooms.entry(room.clone()).or_default().push(occurrence.id);
            }
        }

        let into_entities = |map: BTreeMap<i64, Vec<i64>>| {
            map.into_iter()
                .map(|(entity_id, occurrence_ids)| EntityConflict {
                    entity_id,
                    occurrence_ids,
                })
                .collect()
        };
        let report = ConflictReport {
            groups: into_entities(groups),
            teachers: into_entities(teachers),
            rooms: rooms
                .into_iter()
                .map(|(room, occurrence_ids)| RoomConflict {
                    room,
                    occurrence_ids,
                })
                .collect(),
        };

        debug!(
            semester = %booking.semester,
            day_id = booking.day_id,
            pair = %booking.pair,
            checked = existing.len(),
            conflicts = report.len(),
            "Checked slot"
        );
        Ok(report)
    }

    /// Fails with a `Conflict` naming the first clash: groups, then teachers, then rooms.
    ///
    /// Also rejects a booking that puts its teachers in more rooms than allowed.
    pub fn ensure_free(&self, booking: &Booking, exclude: Option<i64>) -> Result<(), TimetableError> {
        let report = self.check_excluding(booking, exclude)?;

        if let Some(clash) = report.groups.first() {
            return Err(self.entity_conflict(ConflictKind::Group, EntityKind::Group, clash.entity_id));
        }
        if let Some(clash) = report.teachers.first() {
            return Err(self.entity_conflict(
                ConflictKind::Teacher,
                EntityKind::Teacher,
                clash.entity_id,
            ));
        }
        if let Some(clash) = report.rooms.first() {
            return Err(TimetableError::Conflict {
                kind: ConflictKind::Room,
                name: clash.room.clone(),
            });
        }

        if let Some(first_teacher) = booking.teacher_ids.first() {
            if booking.rooms.len() > self.max_rooms_per_teacher {
                return Err(self.entity_conflict(
                    ConflictKind::TeacherRooms,
                    EntityKind::Teacher,
                    *first_teacher,
                ));
            }
        }
        Ok(())
    }

    fn entity_conflict(&self, kind: ConflictKind, entity: EntityKind, id: i64) -> TimetableError {
        let name = self
            .store
            .entity(entity, id)
            .map(|e| e.name)
            .unwrap_or_else(|_| id.to_string());
        TimetableError::Conflict { kind, name }
    }
}
