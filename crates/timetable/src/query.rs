//! Read-side views over stored occurrences.

use crate::calendar::{self, SemesterCalendar, SemesterCode, SemesterDay, WeekInfo};
use crate::error::TimetableError;
use crate::model::{LessonData, LessonTypes, PairSlot, ScheduleResult, Weekday};
use crate::store::{Entity, EntityKind, OccurrenceFilter, ScheduleStore, StoredOccurrence};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Whose timetable to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Group(String),
    Teacher(String),
    Room(String),
}

/// A stored lesson with names resolved, as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonView {
    pub id: i64,
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub week: u8,
    pub pair: PairSlot,
    pub time_start: String,
    pub time_end: String,
    pub subject: String,
    pub lesson_type: String,
    pub lesson_type_id: u8,
    pub groups: Vec<String>,
    pub teachers: Vec<String>,
    pub rooms: Vec<String>,
    pub campus: String,
    pub is_official: bool,
}

/// date -> pair -> lessons in that slot
pub type DayViews = BTreeMap<NaiveDate, BTreeMap<PairSlot, Vec<LessonView>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub groups: Vec<Entity>,
    pub teachers: Vec<Entity>,
    pub disciplines: Vec<Entity>,
    pub rooms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemesterInfo {
    pub semester: SemesterCode,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total_weeks: u8,
    pub has_days: bool,
    pub lesson_count: usize,
    pub snapshot_count: usize,
}

pub struct ScheduleQueries<'a> {
    store: &'a ScheduleStore,
    lesson_types: &'a LessonTypes,
    total_weeks: u8,
}

impl<'a> ScheduleQueries<'a> {
    pub fn new(store: &'a ScheduleStore, lesson_types: &'a LessonTypes, total_weeks: u8) -> Self {
        Self {
            store,
            lesson_types,
            total_weeks,
        }
    }

    /// Lessons of one group, teacher or room between two dates, by date and pair.
    pub fn schedule_for(
        &self,
        semester: SemesterCode,
        from: NaiveDate,
        to: NaiveDate,
        entity: &EntityRef,
    ) -> Result<DayViews, TimetableError> {
        check_range(from, to)?;
        let filter = self.filter_for(entity)?;
        let rows = self.store.occurrences_in_range(semester, from, to, &filter)?;

        let mut views = DayViews::new();
        for (day, occurrence) in &rows {
            let view = describe(self.store, self.lesson_types, day, occurrence)?;
            views
                .entry(day.date)
                .or_default()
                .entry(occurrence.pair)
                .or_default()
                .push(view);
        }
        debug!(semester = %semester, lessons = rows.len(), "Loaded schedule range");
        Ok(views)
    }

    /// For every semester day in range, the pairs the entity has no lesson in.
    pub fn free_slots(
        &self,
        semester: SemesterCode,
        from: NaiveDate,
        to: NaiveDate,
        entity: &EntityRef,
    ) -> Result<BTreeMap<NaiveDate, Vec<PairSlot>>, TimetableError> {
        let days = SemesterCalendar::new(self.store, self.total_weeks)
            .days_in_range(semester, from, to)?;
        let filter = self.filter_for(entity)?;

        let mut busy: BTreeMap<NaiveDate, BTreeSet<PairSlot>> = BTreeMap::new();
        for (day, occurrence) in self.store.occurrences_in_range(semester, from, to, &filter)? {
            busy.entry(day.date).or_default().insert(occurrence.pair);
        }

        Ok(days
            .into_iter()
            .map(|day| {
                let taken = busy.get(&day.date);
                let free = PairSlot::all()
                    .filter(|pair| !taken.is_some_and(|t| t.contains(pair)))
                    .collect();
                (day.date, free)
            })
            .collect())
    }

    /// Case-insensitive substring search over every entity kind and room.
    ///
    /// `limit` applies to each kind separately.
    pub fn search(&self, term: &str, limit: usize) -> Result<SearchResults, TimetableError> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Err(TimetableError::validation("search term must not be empty"));
        }
        let matches = |name: &str| name.to_lowercase().contains(&needle);

        let find = |kind: EntityKind| -> Result<Vec<Entity>, TimetableError> {
            Ok(self
                .store
                .list_entities(kind)?
                .into_iter()
                .filter(|e| matches(&e.name))
                .take(limit)
                .collect())
        };

        Ok(SearchResults {
            groups: find(EntityKind::Group)?,
            teachers: find(EntityKind::Teacher)?,
            disciplines: find(EntityKind::Discipline)?,
            rooms: self
                .store
                .room_names()?
                .into_iter()
                .filter(|room| matches(room))
                .take(limit)
                .collect(),
        })
    }

    pub fn semester_info(&self, semester: SemesterCode) -> Result<SemesterInfo, TimetableError> {
        let (start, end) = calendar::semester_bounds(semester, self.total_weeks);
        Ok(SemesterInfo {
            semester,
            start,
            end,
            total_weeks: self.total_weeks,
            has_days: self.store.has_days(semester)?,
            lesson_count: self.store.occurrences(semester)?.len(),
            snapshot_count: self.store.snapshots(semester)?.len(),
        })
    }

    /// Week number and parity of `today` within its semester.
    pub fn current_week(&self, today: NaiveDate) -> WeekInfo {
        calendar::week_info(SemesterCode::current(today), today, self.total_weeks)
    }

    /// Rebuilds a group's nominal schedule from stored occurrences, so stored state
    /// can be compared against a freshly parsed file.
    pub fn nominal_from_occurrences(
        &self,
        semester: SemesterCode,
        group_name: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ScheduleResult, TimetableError> {
        check_range(from, to)?;
        let filter = self.filter_for(&EntityRef::Group(group_name.to_string()))?;
        let rows = self.store.occurrences_in_range(semester, from, to, &filter)?;

        let mut schedule = ScheduleResult::new(group_name.trim());
        for (day, occurrence) in &rows {
            let view = describe(self.store, self.lesson_types, day, occurrence)?;
            let lesson = LessonData {
                subject: view.subject,
                teachers: view.teachers,
                rooms: view.rooms,
                campus: view.campus,
                lesson_type: view.lesson_type,
                lesson_type_id: view.lesson_type_id,
                date: Some(day.date),
            };
            schedule.insert(day.week, day.weekday, occurrence.pair, lesson);
        }
        Ok(schedule)
    }

    /// Resolves a name to an occurrence filter, matching both trust scopes.
    fn filter_for(&self, entity: &EntityRef) -> Result<OccurrenceFilter, TimetableError> {
        let (kind, name) = match entity {
            EntityRef::Room(room) => return Ok(OccurrenceFilter::Room(room.trim().to_string())),
            EntityRef::Group(name) => (EntityKind::Group, name),
            EntityRef::Teacher(name) => (EntityKind::Teacher, name),
        };
        let ids: Vec<i64> = self
            .store
            .find_entities(kind, name)?
            .into_iter()
            .map(|e| e.id)
            .collect();
        if ids.is_empty() {
            return Err(TimetableError::not_found(format!("{} {}", kind, name.trim())));
        }
        Ok(match kind {
            EntityKind::Teacher => OccurrenceFilter::Teachers(ids),
            _ => OccurrenceFilter::Groups(ids),
        })
    }
}

/// Resolves the names behind a stored occurrence.
pub(crate) fn describe(
    store: &ScheduleStore,
    lesson_types: &LessonTypes,
    day: &SemesterDay,
    occurrence: &StoredOccurrence,
) -> Result<LessonView, TimetableError> {
    let subject = store.entity(EntityKind::Discipline, occurrence.discipline_id)?.name;
    let lesson_type = lesson_types
        .by_id(occurrence.work_type)
        .map(|t| t.code.clone())
        .unwrap_or_default();

    Ok(LessonView {
        id: occurrence.id,
        date: day.date,
        weekday: day.weekday,
        week: day.week,
        pair: occurrence.pair,
        time_start: occurrence.time_start.clone(),
        time_end: occurrence.time_end.clone(),
        subject,
        lesson_type,
        lesson_type_id: occurrence.work_type,
        groups: store.entity_names(EntityKind::Group, &occurrence.group_ids)?,
        teachers: store.entity_names(EntityKind::Teacher, &occurrence.teacher_ids)?,
        rooms: occurrence.rooms.iter().cloned().collect(),
        campus: occurrence.campus.clone(),
        is_official: occurrence.is_official,
    })
}

fn check_range(from: NaiveDate, to: NaiveDate) -> Result<(), TimetableError> {
    if from > to {
        return Err(TimetableError::validation(format!(
            "date range {} .. {} is reversed",
            from, to
        )));
    }
    Ok(())
}
