//! Projection of nominal schedules onto the concrete semester day grid.
//!
//! Bulk rebuilds replace a group set's occurrences atomically. Manual additions and
//! moves go through the conflict detector first. All writes to one semester are
//! serialized through `SemesterLocks`.

mod locks;
mod types;

pub use locks::SemesterLocks;
pub use types::{EntityIds, MoveOutcome, MoveRequest, NewLesson, RebuildSummary, SlotRef};

use crate::calendar::{PairTimes, SemesterCalendar, SemesterCode};
use crate::config::TimetableConfig;
use crate::conflict::{Booking, ConflictDetector};
use crate::error::TimetableError;
use crate::model::{GroupSchedules, LessonTypes, PairSlot, Weekday};
use crate::query::{describe, LessonView};
use crate::store::{EntityKind, NewOccurrence, ScheduleStore};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Occurrence created by a bulk rebuild.
pub const KIND_IMPORTED: i64 = 0;
/// Occurrence added by hand.
pub const KIND_MANUAL: i64 = 1;

pub struct SemesterExpander {
    store: Arc<ScheduleStore>,
    total_weeks: u8,
    pair_times: PairTimes,
    lesson_types: LessonTypes,
    max_rooms_per_teacher: usize,
    locks: SemesterLocks,
}

impl SemesterExpander {
    pub fn new(store: Arc<ScheduleStore>, config: &TimetableConfig) -> Self {
        Self {
            store,
            total_weeks: config.total_weeks,
            pair_times: config.pair_times.clone(),
            lesson_types: config.lesson_types.clone(),
            max_rooms_per_teacher: config.max_rooms_per_teacher,
            locks: SemesterLocks::new(),
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn calendar(&self) -> SemesterCalendar<'_> {
        SemesterCalendar::new(&self.store, self.total_weeks)
    }

    fn detector(&self) -> ConflictDetector<'_> {
        ConflictDetector::new(&self.store, self.max_rooms_per_teacher)
    }

    /// Gets or creates every group, discipline and teacher the schedules mention.
    pub fn resolve_entities(
        &self,
        groups: &GroupSchedules,
        is_official: bool,
    ) -> Result<EntityIds, TimetableError> {
        let mut group_names = BTreeSet::new();
        let mut disciplines = BTreeSet::new();
        let mut teachers = BTreeSet::new();

        for (name, schedule) in groups {
            group_names.insert(name.clone());
            for (_, _, _, lesson) in schedule.lessons() {
                if !lesson.is_real() {
                    continue;
                }
                disciplines.insert(lesson.subject.clone());
                teachers.extend(
                    lesson
                        .teachers
                        .iter()
                        .filter(|t| !t.trim().is_empty())
                        .cloned(),
                );
            }
        }

        let ids = EntityIds {
            groups: self
                .store
                .resolve_entities(EntityKind::Group, &group_names, is_official)?,
            disciplines: self
                .store
                .resolve_entities(EntityKind::Discipline, &disciplines, is_official)?,
            teachers: self
                .store
                .resolve_entities(EntityKind::Teacher, &teachers, is_official)?,
        };
        debug!(
            groups = ids.groups.len(),
            disciplines = ids.disciplines.len(),
            teachers = ids.teachers.len(),
            is_official,
            "Resolved entities"
        );
        Ok(ids)
    }

    /// Replaces every occurrence of the given groups in `semester` with the expansion
    /// of their nominal schedules.
    ///
    /// Lessons with a concrete date land on that date. The rest land on every day whose
    /// (week, weekday) matches. Entries sharing (day, pair, discipline, lesson type)
    /// become one occurrence with the union of their groups, teachers and rooms.
    pub async fn rebuild(
        &self,
        semester: SemesterCode,
        groups: &GroupSchedules,
        ids: &EntityIds,
        is_official: bool,
    ) -> Result<RebuildSummary, TimetableError> {
        let lock = self.locks.get_semester_lock(semester);
        let _guard = lock.lock().await;
        self.rebuild_locked(semester, groups, ids, is_official)
    }

    fn rebuild_locked(
        &self,
        semester: SemesterCode,
        groups: &GroupSchedules,
        ids: &EntityIds,
        is_official: bool,
    ) -> Result<RebuildSummary, TimetableError> {
        let calendar = self.calendar();
        calendar.ensure(semester)?;
        let days = calendar.days(semester)?;
        let by_slot: HashMap<(u8, Weekday), i64> =
            days.iter().map(|d| ((d.week, d.weekday), d.id)).collect();
        let by_date: HashMap<NaiveDate, i64> = days.iter().map(|d| (d.date, d.id)).collect();

        let mut group_ids = BTreeSet::new();
        let mut rows: BTreeMap<(i64, PairSlot, i64, u8), NewOccurrence> = BTreeMap::new();
        let mut lessons = 0;
        let mut unplaced = 0;

        for (group_name, schedule) in groups {
            let group_id = lookup(&ids.groups, group_name, EntityKind::Group)?;
            group_ids.insert(group_id);

            for (week, weekday, pair, lesson) in schedule.lessons() {
                if !lesson.is_real() {
                    continue;
                }
                lessons += 1;

                let day_id = match lesson.date {
                    Some(date) => by_date.get(&date),
                    None => by_slot.get(&(week, weekday)),
                };
                let Some(&day_id) = day_id else {
                    unplaced += 1;
                    continue;
                };

                let discipline_id = lookup(&ids.disciplines, &lesson.subject, EntityKind::Discipline)?;
                let teacher_ids = lesson
                    .teachers
                    .iter()
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| lookup(&ids.teachers, t, EntityKind::Teacher))
                    .collect::<Result<BTreeSet<i64>, _>>()?;

                let row = rows
                    .entry((day_id, pair, discipline_id, lesson.lesson_type_id))
                    .or_insert_with(|| {
                        let (time_start, time_end) = self.pair_times.bounds(pair);
                        NewOccurrence {
                            semester,
                            day_id,
                            pair,
                            kind: KIND_IMPORTED,
                            work_type: lesson.lesson_type_id,
                            discipline_id,
                            time_start,
                            time_end,
                            campus: String::new(),
                            is_official,
                            group_ids: BTreeSet::new(),
                            teacher_ids: BTreeSet::new(),
                            rooms: BTreeSet::new(),
                        }
                    });
                row.group_ids.insert(group_id);
                row.teacher_ids.extend(teacher_ids);
                row.rooms.extend(lesson.rooms.iter().cloned());
                merge_campus(&mut row.campus, &lesson.campus);
            }
        }

        if unplaced > 0 {
            warn!(
                semester = %semester,
                unplaced,
                "Some lessons fall outside the semester day grid"
            );
        }

        let rows: Vec<NewOccurrence> = rows.into_values().collect();
        let stats = self.store.replace_occurrences(semester, &group_ids, &rows)?;
        info!(
            semester = %semester,
            groups = group_ids.len(),
            lessons,
            deleted = stats.deleted,
            inserted = stats.inserted,
            "Rebuilt semester occurrences"
        );
        Ok(RebuildSummary::new(semester, group_ids.len(), lessons, unplaced, stats))
    }

    /// Adds a single lesson after checking its slot for double bookings.
    pub async fn create_lesson(&self, lesson: NewLesson) -> Result<LessonView, TimetableError> {
        let discipline = lesson.discipline.trim();
        if discipline.is_empty() {
            return Err(TimetableError::validation("discipline is required"));
        }
        let groups = trimmed_set(&lesson.groups);
        if groups.is_empty() {
            return Err(TimetableError::validation("at least one group is required"));
        }
        let pair = PairSlot::new(lesson.pair)?;
        let teachers = trimmed_set(&lesson.teachers);
        let rooms = trimmed_set(&lesson.rooms);

        let lock = self.locks.get_semester_lock(lesson.semester);
        let _guard = lock.lock().await;

        let calendar = self.calendar();
        calendar.ensure(lesson.semester)?;
        let day = calendar.day_for(lesson.semester, lesson.date)?;

        let group_ids: BTreeSet<i64> = self
            .store
            .resolve_entities(EntityKind::Group, &groups, lesson.is_official)?
            .into_values()
            .collect();
        let teacher_ids: BTreeSet<i64> = self
            .store
            .resolve_entities(EntityKind::Teacher, &teachers, lesson.is_official)?
            .into_values()
            .collect();

        let booking = Booking {
            semester: lesson.semester,
            day_id: day.id,
            pair,
            group_ids: self.same_name_ids(EntityKind::Group, &group_ids)?,
            teacher_ids: self.same_name_ids(EntityKind::Teacher, &teacher_ids)?,
            rooms: rooms.clone(),
        };
        self.detector().ensure_free(&booking, None)?;

        let discipline_id =
            self.store
                .get_or_create_entity(EntityKind::Discipline, discipline, lesson.is_official)?;
        let (time_start, time_end) = self.pair_times.bounds(pair);
        let id = self.store.insert_occurrence(&NewOccurrence {
            semester: lesson.semester,
            day_id: day.id,
            pair,
            kind: KIND_MANUAL,
            work_type: lesson.lesson_type_id,
            discipline_id,
            time_start,
            time_end,
            campus: lesson.campus.trim().to_string(),
            is_official: lesson.is_official,
            group_ids,
            teacher_ids,
            rooms,
        })?;

        info!(
            semester = %lesson.semester,
            lesson_id = id,
            date = %day.date,
            pair = %pair,
            discipline = %discipline,
            "Created lesson"
        );
        let occurrence = self.store.occurrence(id)?;
        describe(&self.store, &self.lesson_types, &day, &occurrence)
    }

    /// Moves a lesson to another date and pair, keeping an audit record.
    pub async fn move_lesson(&self, request: MoveRequest) -> Result<MoveOutcome, TimetableError> {
        let target_pair = PairSlot::new(request.target_pair)?;
        let semester = self.store.occurrence(request.lesson_id)?.semester;

        let lock = self.locks.get_semester_lock(semester);
        let _guard = lock.lock().await;

        let source = self.store.occurrence(request.lesson_id)?;
        let source_day = self.store.day(source.day_id)?;
        let target_day = self.calendar().day_for(semester, request.target_date)?;

        let booking = Booking {
            semester,
            day_id: target_day.id,
            pair: target_pair,
            group_ids: self.same_name_ids(EntityKind::Group, &source.group_ids)?,
            teacher_ids: self.same_name_ids(EntityKind::Teacher, &source.teacher_ids)?,
            rooms: source.rooms.clone(),
        };
        self.detector().ensure_free(&booking, Some(source.id))?;

        let new_id = self.store.move_occurrence(
            source.id,
            target_day.id,
            target_pair,
            self.pair_times.bounds(target_pair),
            &request.reason,
            &request.comment,
        )?;

        info!(
            semester = %semester,
            from_lesson = source.id,
            to_lesson = new_id,
            from = %source_day.date,
            to = %target_day.date,
            "Moved lesson"
        );
        Ok(MoveOutcome {
            source: SlotRef {
                id: source.id,
                date: source_day.date,
                pair: source.pair,
            },
            destination: SlotRef {
                id: new_id,
                date: target_day.date,
                pair: target_pair,
            },
            reason: request.reason,
            comment: request.comment,
        })
    }

    pub async fn delete_lesson(&self, id: i64) -> Result<(), TimetableError> {
        let semester = self.store.occurrence(id)?.semester;
        let lock = self.locks.get_semester_lock(semester);
        let _guard = lock.lock().await;

        self.store.delete_occurrence(id)?;
        info!(semester = %semester, lesson_id = id, "Deleted lesson");
        Ok(())
    }

    /// Widens ids to every entity sharing their names, across both trust scopes, so an
    /// official and a manual record of the same group still clash.
    fn same_name_ids(
        &self,
        kind: EntityKind,
        ids: &BTreeSet<i64>,
    ) -> Result<BTreeSet<i64>, TimetableError> {
        let mut widened = ids.clone();
        for name in self.store.entity_names(kind, ids)? {
            widened.extend(self.store.find_entities(kind, &name)?.into_iter().map(|e| e.id));
        }
        Ok(widened)
    }
}

fn lookup(ids: &BTreeMap<String, i64>, name: &str, kind: EntityKind) -> Result<i64, TimetableError> {
    ids.get(name)
        .copied()
        .ok_or_else(|| TimetableError::validation(format!("{} {:?} was not resolved", kind, name)))
}

fn trimmed_set(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Appends campuses from `incoming` ("A, B") that `campus` does not list yet.
fn merge_campus(campus: &mut String, incoming: &str) {
    for part in incoming.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if campus.split(", ").any(|existing| existing == part) {
            continue;
        }
        if !campus.is_empty() {
            campus.push_str(", ");
        }
        campus.push_str(part);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConflictKind;
    use crate::model::{LessonData, ScheduleResult};
    use crate::store::StoredOccurrence;

    fn semester() -> SemesterCode {
        SemesterCode::new(2024, 1).unwrap()
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn expander() -> SemesterExpander {
        let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
        SemesterExpander::new(store, &TimetableConfig::default())
    }

    fn lecture(subject: &str, teacher: &str, room: &str) -> LessonData {
        LessonData {
            subject: subject.to_string(),
            teachers: vec![teacher.to_string()],
            rooms: vec![room.to_string()],
            campus: "В-78".to_string(),
            lesson_type: "ЛК".to_string(),
            lesson_type_id: 1,
            date: None,
        }
    }

    fn odd_monday_schedule(group: &str) -> ScheduleResult {
        let mut schedule = ScheduleResult::new(group);
        let pair = PairSlot::new(1).unwrap();
        for week in (1..=17).step_by(2) {
            schedule.insert(week, Weekday::Monday, pair, lecture("Алгебра", "Иванов И.И.", "А-309"));
        }
        schedule
    }

    fn contents(occurrences: &[StoredOccurrence]) -> Vec<NewOccurrence> {
        let mut rows: Vec<NewOccurrence> = occurrences.iter().map(StoredOccurrence::content).collect();
        rows.sort_by_key(|r| (r.day_id, r.pair, r.discipline_id));
        rows
    }

    async fn rebuild(expander: &SemesterExpander, groups: &GroupSchedules) -> RebuildSummary {
        let ids = expander.resolve_entities(groups, true).unwrap();
        expander.rebuild(semester(), groups, &ids, true).await.unwrap()
    }

    #[tokio::test]
    async fn test_odd_monday_lesson_expands_to_nine_days() {
        let expander = expander();
        let groups = GroupSchedules::from([("КМБО-01-22".to_string(), odd_monday_schedule("КМБО-01-22"))]);
        let summary = rebuild(&expander, &groups).await;
        assert_eq!(summary.inserted, 9);
        assert_eq!(summary.unplaced, 0);

        let occurrences = expander.store().occurrences(semester()).unwrap();
        assert_eq!(occurrences.len(), 9);
        for occurrence in &occurrences {
            let day = expander.store().day(occurrence.day_id).unwrap();
            assert_eq!(day.weekday, Weekday::Monday);
            assert_eq!(day.week % 2, 1);
            assert_eq!(occurrence.time_start, "09:00");
            assert_eq!(occurrence.campus, "В-78");
        }
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let expander = expander();
        let groups = GroupSchedules::from([("КМБО-01-22".to_string(), odd_monday_schedule("КМБО-01-22"))]);

        rebuild(&expander, &groups).await;
        let first = contents(&expander.store().occurrences(semester()).unwrap());
        let summary = rebuild(&expander, &groups).await;
        let second = contents(&expander.store().occurrences(semester()).unwrap());

        assert_eq!(summary.deleted, 9);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_joint_lesson_merges_groups() {
        let expander = expander();
        let pair = PairSlot::new(2).unwrap();
        let mut first = ScheduleResult::new("КМБО-01-22");
        first.insert(1, Weekday::Tuesday, pair, lecture("Физика", "Петров П.П.", "А-1"));
        let mut second = ScheduleResult::new("КМБО-02-22");
        second.insert(1, Weekday::Tuesday, pair, lecture("Физика", "Петров П.П.", "А-2"));
        let groups = GroupSchedules::from([
            ("КМБО-01-22".to_string(), first),
            ("КМБО-02-22".to_string(), second),
        ]);

        rebuild(&expander, &groups).await;
        let occurrences = expander.store().occurrences(semester()).unwrap();
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].group_ids.len(), 2);
        assert_eq!(occurrences[0].teacher_ids.len(), 1);
        assert_eq!(occurrences[0].rooms.len(), 2);
    }

    #[tokio::test]
    async fn test_dated_lesson_placed_by_date() {
        let expander = expander();
        let mut schedule = ScheduleResult::new("КМБО-01-22");
        // Week numbering derived from a later anchor than the institutional one
        let mut lesson = lecture("Химия", "Сидоров С.С.", "Б-1");
        lesson.date = Some(date(9, 9));
        schedule.insert(1, Weekday::Monday, PairSlot::new(3).unwrap(), lesson);
        let mut early = lecture("Химия", "Сидоров С.С.", "Б-1");
        early.date = Some(date(8, 26));
        schedule.insert(1, Weekday::Monday, PairSlot::new(4).unwrap(), early);

        let groups = GroupSchedules::from([("КМБО-01-22".to_string(), schedule)]);
        let summary = rebuild(&expander, &groups).await;
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.unplaced, 1);

        let occurrence = &expander.store().occurrences(semester()).unwrap()[0];
        let day = expander.store().day(occurrence.day_id).unwrap();
        assert_eq!(day.date, date(9, 9));
        assert_eq!(day.week, 2);
    }

    fn manual(groups: &[&str], date: NaiveDate, pair: u8) -> NewLesson {
        NewLesson {
            semester: semester(),
            date,
            pair,
            discipline: "Консультация".to_string(),
            lesson_type_id: 2,
            groups: groups.iter().map(|g| g.to_string()).collect(),
            teachers: Vec::new(),
            rooms: Vec::new(),
            campus: String::new(),
            is_official: false,
        }
    }

    #[tokio::test]
    async fn test_manual_lesson_conflicts_on_same_group() {
        let expander = expander();
        let created = expander
            .create_lesson(manual(&["КМБО-01-22"], date(9, 4), 2))
            .await
            .unwrap();
        assert_eq!(created.groups, vec!["КМБО-01-22"]);
        assert_eq!(created.time_start, "10:40");
        assert_eq!(created.lesson_type, "ПР");

        let err = expander
            .create_lesson(manual(&["КМБО-01-22"], date(9, 4), 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TimetableError::Conflict { kind: ConflictKind::Group, ref name } if name == "КМБО-01-22"
        ));

        assert!(expander
            .create_lesson(manual(&["КМБО-02-22"], date(9, 4), 2))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_manual_lesson_clashes_with_official_import() {
        let expander = expander();
        let groups = GroupSchedules::from([("КМБО-01-22".to_string(), odd_monday_schedule("КМБО-01-22"))]);
        rebuild(&expander, &groups).await;

        let err = expander
            .create_lesson(manual(&["КМБО-01-22"], date(9, 2), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, TimetableError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_manual_lesson_validation() {
        let expander = expander();
        let mut lesson = manual(&["КМБО-01-22"], date(9, 4), 2);
        lesson.discipline = "  ".to_string();
        assert!(matches!(
            expander.create_lesson(lesson).await,
            Err(TimetableError::Validation { .. })
        ));

        let no_groups = manual(&[" "], date(9, 4), 2);
        assert!(expander.create_lesson(no_groups).await.is_err());

        let bad_pair = manual(&["КМБО-01-22"], date(9, 4), 9);
        assert!(expander.create_lesson(bad_pair).await.is_err());

        let outside = manual(&["КМБО-01-22"], date(8, 1), 1);
        assert!(matches!(
            expander.create_lesson(outside).await,
            Err(TimetableError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_move_lesson() {
        let expander = expander();
        let lesson = expander
            .create_lesson(manual(&["КМБО-01-22"], date(9, 4), 2))
            .await
            .unwrap();
        let blocker = expander
            .create_lesson(manual(&["КМБО-01-22"], date(9, 5), 1))
            .await
            .unwrap();

        let blocked = expander
            .move_lesson(MoveRequest {
                lesson_id: lesson.id,
                target_date: date(9, 5),
                target_pair: 1,
                reason: "перенос".to_string(),
                comment: String::new(),
            })
            .await;
        assert!(matches!(blocked, Err(TimetableError::Conflict { .. })));

        let outcome = expander
            .move_lesson(MoveRequest {
                lesson_id: lesson.id,
                target_date: date(9, 5),
                target_pair: 3,
                reason: "перенос".to_string(),
                comment: "аудитория занята".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.source.id, lesson.id);
        assert_eq!(outcome.source.date, date(9, 4));
        assert_eq!(outcome.destination.pair.get(), 3);

        let store = expander.store();
        assert!(matches!(store.occurrence(lesson.id), Err(TimetableError::NotFound { .. })));
        let moved = store.occurrence(outcome.destination.id).unwrap();
        assert_eq!(moved.time_start, "12:40");
        assert_eq!(moved.kind, KIND_MANUAL);
        assert_eq!(store.moves_to(outcome.destination.id).unwrap().len(), 1);

        // moving within its own slot is not a conflict with itself
        assert!(expander
            .move_lesson(MoveRequest {
                lesson_id: blocker.id,
                target_date: date(9, 5),
                target_pair: 1,
                reason: String::new(),
                comment: String::new(),
            })
            .await
            .is_ok());

        let missing = expander
            .move_lesson(MoveRequest {
                lesson_id: 9999,
                target_date: date(9, 5),
                target_pair: 1,
                reason: String::new(),
                comment: String::new(),
            })
            .await;
        assert!(matches!(missing, Err(TimetableError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_lesson() {
        let expander = expander();
        let lesson = expander
            .create_lesson(manual(&["КМБО-01-22"], date(9, 4), 2))
            .await
            .unwrap();
        expander.delete_lesson(lesson.id).await.unwrap();
        assert!(matches!(
            expander.delete_lesson(lesson.id).await,
            Err(TimetableError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_waits_for_semester_lock() {
        let expander = expander();
        let lesson = expander
            .create_lesson(manual(&["КМБО-01-22"], date(9, 4), 2))
            .await
            .unwrap();

        let lock = expander.locks.get_semester_lock(semester());
        let guard = lock.lock().await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            expander.delete_lesson(lesson.id),
        )
        .await;
        assert!(blocked.is_err());
        assert!(expander.store().occurrence(lesson.id).is_ok());

        drop(guard);
        expander.delete_lesson(lesson.id).await.unwrap();
        assert!(expander.store().occurrence(lesson.id).is_err());
    }

    #[test]
    fn test_merge_campus() {
        let mut campus = String::new();
        merge_campus(&mut campus, "В-78");
        merge_campus(&mut campus, "В-78, С-20");
        merge_campus(&mut campus, "");
        assert_eq!(campus, "В-78, С-20");
    }
}
