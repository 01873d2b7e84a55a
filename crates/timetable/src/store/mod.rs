/// SQLite storage for entities, semester days, lesson occurrences and parsed snapshots

mod types;

pub use types::{
    Entity, EntityKind, MoveRecord, NewOccurrence, NewSnapshot, OccurrenceFilter, ReplaceStats,
    SnapshotMeta, StoredOccurrence,
};

use crate::calendar::{SemesterCode, SemesterDay};
use crate::error::TimetableError;
use crate::model::{PairSlot, Weekday};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SCHEMA_SQL: &str = include_str!("../../sql/init_schedule.sql");

const OCCURRENCE_COLUMNS: &str = "o.occurrence_id, o.semcode, o.day_id, o.pair, o.kind, \
     o.work_type, o.discipline_id, o.time_start, o.time_end, o.is_official, o.campus";

const SNAPSHOT_COLUMNS: &str = "snapshot_id, semcode, version, source_name, format, \
     content_hash, is_official, group_count, created_at";

pub struct ScheduleStore {
    db: Mutex<Connection>,
}

impl ScheduleStore {
    /// Opens (or creates) the database file and applies the schema
    pub fn open(path: &Path) -> Result<Self, TimetableError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, TimetableError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, TimetableError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Returns the id of the entity with this name in the given trust scope, creating it if needed
    pub fn get_or_create_entity(
        &self,
        kind: EntityKind,
        name: &str,
        is_official: bool,
    ) -> Result<i64, TimetableError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TimetableError::validation(format!(
                "{} name must not be empty",
                kind
            )));
        }
        let db = self.conn();
        get_or_create_in(&db, kind, name, is_official)
    }

    /// Resolves many names at once inside one transaction
    pub fn resolve_entities(
        &self,
        kind: EntityKind,
        names: &BTreeSet<String>,
        is_official: bool,
    ) -> Result<BTreeMap<String, i64>, TimetableError> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let mut ids = BTreeMap::new();
        for name in names {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                continue;
            }
            ids.insert(name.clone(), get_or_create_in(&tx, kind, trimmed, is_official)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    pub fn entity(&self, kind: EntityKind, id: i64) -> Result<Entity, TimetableError> {
        let db = self.conn();
        let sql = format!(
            "SELECT {}, name, is_official FROM {} WHERE {} = ?1",
            kind.id_column(),
            kind.table(),
            kind.id_column()
        );
        db.query_row(&sql, [id], |row| entity_from_row(kind, row))
            .optional()?
            .ok_or_else(|| TimetableError::not_found(format!("{} {}", kind, id)))
    }

    /// Display names for a set of ids, in id order
    pub fn entity_names(
        &self,
        kind: EntityKind,
        ids: &BTreeSet<i64>,
    ) -> Result<Vec<String>, TimetableError> {
        ids.iter()
            .map(|id| self.entity(kind, *id).map(|e| e.name))
            .collect()
    }

    /// All entities of a kind whose name matches exactly, in either trust scope
    pub fn find_entities(&self, kind: EntityKind, name: &str) -> Result<Vec<Entity>, TimetableError> {
        let db = self.conn();
        let sql = format!(
            "SELECT {}, name, is_official FROM {} WHERE name = ?1 ORDER BY is_official DESC",
            kind.id_column(),
            kind.table()
        );
        let mut stmt = db.prepare(&sql)?;
        let entities = stmt
            .query_map([name.trim()], |row| entity_from_row(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    pub fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>, TimetableError> {
        let db = self.conn();
        let sql = format!(
            "SELECT {}, name, is_official FROM {} ORDER BY name",
            kind.id_column(),
            kind.table()
        );
        let mut stmt = db.prepare(&sql)?;
        let entities = stmt
            .query_map([], |row| entity_from_row(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    /// Every distinct room referenced by an occurrence
    pub fn room_names(&self) -> Result<Vec<String>, TimetableError> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT DISTINCT room FROM occurrence_rooms ORDER BY room")?;
        let rooms = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rooms)
    }

    // ------------------------------------------------------------------
    // Semester days
    // ------------------------------------------------------------------

    pub fn has_days(&self, semester: SemesterCode) -> Result<bool, TimetableError> {
        let db = self.conn();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM semester_days WHERE semcode = ?1",
            [semester],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Inserts day rows, skipping dates that already exist. Returns the number inserted.
    pub fn insert_days(
        &self,
        semester: SemesterCode,
        days: &[(NaiveDate, Weekday, u8)],
    ) -> Result<usize, TimetableError> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO semester_days (semcode, day, weekday, week)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (date, weekday, week) in days {
                inserted += stmt.execute(params![semester, date, weekday, week])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn semester_days(&self, semester: SemesterCode) -> Result<Vec<SemesterDay>, TimetableError> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT day_id, semcode, day, weekday, week FROM semester_days
             WHERE semcode = ?1 ORDER BY day",
        )?;
        let days = stmt
            .query_map([semester], day_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(days)
    }

    pub fn days_in_range(
        &self,
        semester: SemesterCode,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SemesterDay>, TimetableError> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT day_id, semcode, day, weekday, week FROM semester_days
             WHERE semcode = ?1 AND day BETWEEN ?2 AND ?3 ORDER BY day",
        )?;
        let days = stmt
            .query_map(params![semester, from, to], day_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(days)
    }

    pub fn day_by_date(
        &self,
        semester: SemesterCode,
        date: NaiveDate,
    ) -> Result<Option<SemesterDay>, TimetableError> {
        let db = self.conn();
        let day = db
            .query_row(
                "SELECT day_id, semcode, day, weekday, week FROM semester_days
                 WHERE semcode = ?1 AND day = ?2",
                params![semester, date],
                day_from_row,
            )
            .optional()?;
        Ok(day)
    }

    pub fn day(&self, day_id: i64) -> Result<SemesterDay, TimetableError> {
        let db = self.conn();
        db.query_row(
            "SELECT day_id, semcode, day, weekday, week FROM semester_days WHERE day_id = ?1",
            [day_id],
            day_from_row,
        )
        .optional()?
        .ok_or_else(|| TimetableError::not_found(format!("day {}", day_id)))
    }

    // ------------------------------------------------------------------
    // Occurrences
    // ------------------------------------------------------------------

    /// Atomically replaces every occurrence of `group_ids` in the semester with `rows`.
    ///
    /// The delete and the inserts share one transaction, so readers see either the old
    /// set or the new one.
    pub fn replace_occurrences(
        &self,
        semester: SemesterCode,
        group_ids: &BTreeSet<i64>,
        rows: &[NewOccurrence],
    ) -> Result<ReplaceStats, TimetableError> {
        let mut db = self.conn();
        let tx = db.transaction()?;

        let mut deleted = 0;
        for group_id in group_ids {
            deleted += tx.execute(
                "DELETE FROM occurrences WHERE semcode = ?1 AND occurrence_id IN (
                     SELECT occurrence_id FROM occurrence_groups WHERE group_id = ?2
                 )",
                params![semester, group_id],
            )?;
        }
        for row in rows {
            insert_occurrence_in(&tx, row)?;
        }

        tx.commit()?;
        Ok(ReplaceStats {
            deleted,
            inserted: rows.len(),
        })
    }

    pub fn insert_occurrence(&self, occurrence: &NewOccurrence) -> Result<i64, TimetableError> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let id = insert_occurrence_in(&tx, occurrence)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn occurrence(&self, id: i64) -> Result<StoredOccurrence, TimetableError> {
        let db = self.conn();
        load_occurrence(&db, id)?
            .ok_or_else(|| TimetableError::not_found(format!("lesson {}", id)))
    }

    pub fn delete_occurrence(&self, id: i64) -> Result<(), TimetableError> {
        let db = self.conn();
        let removed = db.execute("DELETE FROM occurrences WHERE occurrence_id = ?1", [id])?;
        if removed == 0 {
            return Err(TimetableError::not_found(format!("lesson {}", id)));
        }
        Ok(())
    }

    /// Moves an occurrence to another slot, leaving an audit record.
    ///
    /// A new row is created with the source's relations, the move is recorded and the
    /// source is deleted, all in one transaction. Returns the new occurrence id.
    pub fn move_occurrence(
        &self,
        source_id: i64,
        target_day_id: i64,
        target_pair: PairSlot,
        (time_start, time_end): (String, String),
        reason: &str,
        comment: &str,
    ) -> Result<i64, TimetableError> {
        let mut db = self.conn();
        let tx = db.transaction()?;

        let source = load_occurrence(&tx, source_id)?
            .ok_or_else(|| TimetableError::not_found(format!("lesson {}", source_id)))?;
        let moved = NewOccurrence {
            day_id: target_day_id,
            pair: target_pair,
            time_start,
            time_end,
            ..source.content()
        };
        let new_id = insert_occurrence_in(&tx, &moved)?;

        tx.execute(
            "INSERT INTO occurrence_moves (dest_occurrence_id, src_day_id, src_pair, reason, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![new_id, source.day_id, source.pair, reason, comment],
        )?;
        tx.execute("DELETE FROM occurrences WHERE occurrence_id = ?1", [source_id])?;

        tx.commit()?;
        Ok(new_id)
    }

    pub fn moves_to(&self, dest_occurrence_id: i64) -> Result<Vec<MoveRecord>, TimetableError> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT move_id, dest_occurrence_id, src_day_id, src_pair, reason, comment, created_at
             FROM occurrence_moves WHERE dest_occurrence_id = ?1 ORDER BY move_id",
        )?;
        let moves = stmt
            .query_map([dest_occurrence_id], |row| {
                Ok(MoveRecord {
                    id: row.get(0)?,
                    dest_occurrence_id: row.get(1)?,
                    src_day_id: row.get(2)?,
                    src_pair: row.get(3)?,
                    reason: row.get(4)?,
                    comment: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(moves)
    }

    /// Occurrences booked in exactly this (semester, day, pair) slot
    pub fn slot_occurrences(
        &self,
        semester: SemesterCode,
        day_id: i64,
        pair: PairSlot,
        exclude: Option<i64>,
    ) -> Result<Vec<StoredOccurrence>, TimetableError> {
        let db = self.conn();
        let sql = format!(
            "SELECT {} FROM occurrences o
             WHERE o.semcode = ?1 AND o.day_id = ?2 AND o.pair = ?3 AND o.occurrence_id != ?4
             ORDER BY o.occurrence_id",
            OCCURRENCE_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let mut occurrences = stmt
            .query_map(
                params![semester, day_id, pair, exclude.unwrap_or(-1)],
                occurrence_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for occurrence in &mut occurrences {
            attach_relations(&db, occurrence)?;
        }
        Ok(occurrences)
    }

    /// Occurrences between two dates (inclusive) matching `filter`, ordered by day and pair
    pub fn occurrences_in_range(
        &self,
        semester: SemesterCode,
        from: NaiveDate,
        to: NaiveDate,
        filter: &OccurrenceFilter,
    ) -> Result<Vec<(SemesterDay, StoredOccurrence)>, TimetableError> {
        let db = self.conn();
        let sql = format!(
            "SELECT {}, d.day_id, d.semcode, d.day, d.weekday, d.week
             FROM occurrences o JOIN semester_days d ON d.day_id = o.day_id
             WHERE o.semcode = ?1 AND d.day BETWEEN ?2 AND ?3
             ORDER BY d.day, o.pair, o.occurrence_id",
            OCCURRENCE_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(params![semester, from, to], |row| {
                let occurrence = occurrence_from_row(row)?;
                let day = SemesterDay {
                    id: row.get(11)?,
                    semester: row.get(12)?,
                    date: row.get(13)?,
                    weekday: row.get(14)?,
                    week: row.get(15)?,
                };
                Ok((day, occurrence))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut matching = Vec::with_capacity(rows.len());
        for (day, mut occurrence) in rows {
            attach_relations(&db, &mut occurrence)?;
            let keep = match filter {
                OccurrenceFilter::All => true,
                OccurrenceFilter::Groups(ids) => ids.iter().any(|id| occurrence.group_ids.contains(id)),
                OccurrenceFilter::Teachers(ids) => {
                    ids.iter().any(|id| occurrence.teacher_ids.contains(id))
                }
                OccurrenceFilter::Room(room) => occurrence.rooms.contains(room),
            };
            if keep {
                matching.push((day, occurrence));
            }
        }
        Ok(matching)
    }

    /// Every occurrence of a semester, ordered by id
    pub fn occurrences(&self, semester: SemesterCode) -> Result<Vec<StoredOccurrence>, TimetableError> {
        let db = self.conn();
        let sql = format!(
            "SELECT {} FROM occurrences o WHERE o.semcode = ?1 ORDER BY o.occurrence_id",
            OCCURRENCE_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let mut occurrences = stmt
            .query_map([semester], occurrence_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for occurrence in &mut occurrences {
            attach_relations(&db, occurrence)?;
        }
        Ok(occurrences)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn save_snapshot(&self, snapshot: &NewSnapshot<'_>) -> Result<i64, TimetableError> {
        let db = self.conn();
        db.execute(
            "INSERT INTO schedule_snapshots (
                semcode, version, source_name, format, content_hash,
                is_official, group_count, document, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))",
            params![
                snapshot.semester,
                snapshot.version,
                snapshot.source_name,
                snapshot.format,
                snapshot.content_hash,
                snapshot.is_official,
                snapshot.group_count,
                snapshot.document,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Snapshot metadata and its JSON document
    pub fn snapshot(&self, id: i64) -> Result<(SnapshotMeta, String), TimetableError> {
        let db = self.conn();
        let sql = format!(
            "SELECT {}, document FROM schedule_snapshots WHERE snapshot_id = ?1",
            SNAPSHOT_COLUMNS
        );
        db.query_row(&sql, [id], |row| Ok((snapshot_from_row(row)?, row.get(9)?)))
            .optional()?
            .ok_or_else(|| TimetableError::not_found(format!("snapshot {}", id)))
    }

    pub fn snapshots(&self, semester: SemesterCode) -> Result<Vec<SnapshotMeta>, TimetableError> {
        let db = self.conn();
        let sql = format!(
            "SELECT {} FROM schedule_snapshots WHERE semcode = ?1 ORDER BY snapshot_id",
            SNAPSHOT_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let snapshots = stmt
            .query_map([semester], snapshot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }
}

fn get_or_create_in(
    conn: &Connection,
    kind: EntityKind,
    name: &str,
    is_official: bool,
) -> Result<i64, TimetableError> {
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} (name, is_official, created_at) VALUES (?1, ?2, datetime('now'))",
            kind.table()
        ),
        params![name, is_official],
    )?;
    let id = conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE name = ?1 AND is_official = ?2",
            kind.id_column(),
            kind.table()
        ),
        params![name, is_official],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_occurrence_in(conn: &Connection, occurrence: &NewOccurrence) -> Result<i64, TimetableError> {
    conn.execute(
        "INSERT INTO occurrences (
            semcode, day_id, pair, kind, work_type, discipline_id,
            time_start, time_end, campus, is_official, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))",
        params![
            occurrence.semester,
            occurrence.day_id,
            occurrence.pair,
            occurrence.kind,
            occurrence.work_type,
            occurrence.discipline_id,
            occurrence.time_start,
            occurrence.time_end,
            occurrence.campus,
            occurrence.is_official,
        ],
    )?;
    let id = conn.last_insert_rowid();

    for group_id in &occurrence.group_ids {
        conn.execute(
            "INSERT INTO occurrence_groups (occurrence_id, group_id) VALUES (?1, ?2)",
            params![id, group_id],
        )?;
    }
    for teacher_id in &occurrence.teacher_ids {
        conn.execute(
            "INSERT INTO occurrence_teachers (occurrence_id, teacher_id) VALUES (?1, ?2)",
            params![id, teacher_id],
        )?;
    }
    for room in &occurrence.rooms {
        conn.execute(
            "INSERT INTO occurrence_rooms (occurrence_id, room) VALUES (?1, ?2)",
            params![id, room],
        )?;
    }
    Ok(id)
}

fn load_occurrence(conn: &Connection, id: i64) -> Result<Option<StoredOccurrence>, TimetableError> {
    let sql = format!(
        "SELECT {} FROM occurrences o WHERE o.occurrence_id = ?1",
        OCCURRENCE_COLUMNS
    );
    let occurrence = conn.query_row(&sql, [id], occurrence_from_row).optional()?;
    match occurrence {
        Some(mut occurrence) => {
            attach_relations(conn, &mut occurrence)?;
            Ok(Some(occurrence))
        }
        None => Ok(None),
    }
}

fn attach_relations(conn: &Connection, occurrence: &mut StoredOccurrence) -> rusqlite::Result<()> {
    let id = occurrence.id;
    occurrence.group_ids = conn
        .prepare_cached("SELECT group_id FROM occurrence_groups WHERE occurrence_id = ?1")?
        .query_map([id], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<i64>>>()?;
    occurrence.teacher_ids = conn
        .prepare_cached("SELECT teacher_id FROM occurrence_teachers WHERE occurrence_id = ?1")?
        .query_map([id], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<i64>>>()?;
    occurrence.rooms = conn
        .prepare_cached("SELECT room FROM occurrence_rooms WHERE occurrence_id = ?1")?
        .query_map([id], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;
    Ok(())
}

fn occurrence_from_row(row: &Row<'_>) -> rusqlite::Result<StoredOccurrence> {
    Ok(StoredOccurrence {
        id: row.get(0)?,
        semester: row.get(1)?,
        day_id: row.get(2)?,
        pair: row.get(3)?,
        kind: row.get(4)?,
        work_type: row.get(5)?,
        discipline_id: row.get(6)?,
        time_start: row.get(7)?,
        time_end: row.get(8)?,
        is_official: row.get(9)?,
        campus: row.get(10)?,
        group_ids: BTreeSet::new(),
        teacher_ids: BTreeSet::new(),
        rooms: BTreeSet::new(),
    })
}

fn day_from_row(row: &Row<'_>) -> rusqlite::Result<SemesterDay> {
    Ok(SemesterDay {
        id: row.get(0)?,
        semester: row.get(1)?,
        date: row.get(2)?,
        weekday: row.get(3)?,
        week: row.get(4)?,
    })
}

fn entity_from_row(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        kind,
        name: row.get(1)?,
        is_official: row.get(2)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotMeta> {
    Ok(SnapshotMeta {
        id: row.get(0)?,
        semester: row.get(1)?,
        version: row.get(2)?,
        source_name: row.get(3)?,
        format: row.get(4)?,
        content_hash: row.get(5)?,
        is_official: row.get(6)?,
        group_count: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semester() -> SemesterCode {
        SemesterCode::new(2024, 1).unwrap()
    }

    fn seed_day(store: &ScheduleStore) -> SemesterDay {
        let date = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        store
            .insert_days(semester(), &[(date, Weekday::Monday, 1)])
            .unwrap();
        store.day_by_date(semester(), date).unwrap().unwrap()
    }

    fn occurrence(day_id: i64, discipline_id: i64, group_id: i64) -> NewOccurrence {
        NewOccurrence {
            semester: semester(),
            day_id,
            pair: PairSlot::new(1).unwrap(),
            kind: 0,
            work_type: 1,
            discipline_id,
            time_start: "09:00".to_string(),
            time_end: "10:30".to_string(),
            campus: String::new(),
            is_official: true,
            group_ids: BTreeSet::from([group_id]),
            teacher_ids: BTreeSet::new(),
            rooms: BTreeSet::from(["А-309".to_string()]),
        }
    }

    #[test]
    fn test_entity_trust_scopes_are_separate() {
        let store = ScheduleStore::open_in_memory().unwrap();
        let official = store
            .get_or_create_entity(EntityKind::Group, "КМБО-01-22", true)
            .unwrap();
        let again = store
            .get_or_create_entity(EntityKind::Group, " КМБО-01-22 ", true)
            .unwrap();
        let manual = store
            .get_or_create_entity(EntityKind::Group, "КМБО-01-22", false)
            .unwrap();

        assert_eq!(official, again);
        assert_ne!(official, manual);
        assert_eq!(store.find_entities(EntityKind::Group, "КМБО-01-22").unwrap().len(), 2);
        assert!(store.get_or_create_entity(EntityKind::Teacher, "  ", false).is_err());
    }

    #[test]
    fn test_insert_days_is_idempotent() {
        let store = ScheduleStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        assert_eq!(store.insert_days(semester(), &[(date, Weekday::Monday, 1)]).unwrap(), 1);
        assert_eq!(store.insert_days(semester(), &[(date, Weekday::Monday, 1)]).unwrap(), 0);
        assert!(store.has_days(semester()).unwrap());

        let day = store.day_by_date(semester(), date).unwrap().unwrap();
        assert_eq!(day.weekday, Weekday::Monday);
        assert_eq!(store.day(day.id).unwrap(), day);
        assert!(matches!(store.day(9999), Err(TimetableError::NotFound { .. })));
    }

    #[test]
    fn test_replace_occurrences_scoped_to_groups() {
        let store = ScheduleStore::open_in_memory().unwrap();
        let day = seed_day(&store);
        let disc = store
            .get_or_create_entity(EntityKind::Discipline, "Алгебра", true)
            .unwrap();
        let g1 = store.get_or_create_entity(EntityKind::Group, "G1", true).unwrap();
        let g2 = store.get_or_create_entity(EntityKind::Group, "G2", true).unwrap();

        store.insert_occurrence(&occurrence(day.id, disc, g2)).unwrap();
        let stats = store
            .replace_occurrences(semester(), &BTreeSet::from([g1]), &[occurrence(day.id, disc, g1)])
            .unwrap();
        assert_eq!(stats, ReplaceStats { deleted: 0, inserted: 1 });

        let stats = store
            .replace_occurrences(semester(), &BTreeSet::from([g1]), &[occurrence(day.id, disc, g1)])
            .unwrap();
        assert_eq!(stats.deleted, 1);
        assert_eq!(store.occurrences(semester()).unwrap().len(), 2);
    }

    #[test]
    fn test_move_records_audit_and_deletes_source() {
        let store = ScheduleStore::open_in_memory().unwrap();
        let day = seed_day(&store);
        let disc = store
            .get_or_create_entity(EntityKind::Discipline, "Алгебра", true)
            .unwrap();
        let group = store.get_or_create_entity(EntityKind::Group, "G1", true).unwrap();
        let source = store.insert_occurrence(&occurrence(day.id, disc, group)).unwrap();

        let pair = PairSlot::new(3).unwrap();
        let moved = store
            .move_occurrence(
                source,
                day.id,
                pair,
                ("12:40".to_string(), "14:10".to_string()),
                "holiday",
                "",
            )
            .unwrap();

        assert!(matches!(store.occurrence(source), Err(TimetableError::NotFound { .. })));
        let new = store.occurrence(moved).unwrap();
        assert_eq!(new.pair, pair);
        assert_eq!(new.group_ids, BTreeSet::from([group]));
        assert_eq!(new.rooms, BTreeSet::from(["А-309".to_string()]));

        let moves = store.moves_to(moved).unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].src_pair.get(), 1);
        assert_eq!(moves[0].reason, "holiday");
    }

    #[test]
    fn test_delete_missing_occurrence() {
        let store = ScheduleStore::open_in_memory().unwrap();
        assert!(matches!(
            store.delete_occurrence(42),
            Err(TimetableError::NotFound { .. })
        ));
    }
}
