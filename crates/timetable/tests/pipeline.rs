mod common;

use chrono::NaiveDate;
use std::sync::Arc;
use timetable::calendar::SemesterCode;
use timetable::diff::DiffField;
use timetable::expand::{MoveRequest, NewLesson};
use timetable::model::{GroupSchedules, PairSlot, Weekday};
use timetable::parser::{self, ParseOptions};
use timetable::query::{EntityRef, ScheduleQueries};
use timetable::{ConflictKind, Importer, ScheduleDiffEngine, ScheduleStore, TimetableConfig, TimetableError};

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

fn pair(n: u8) -> PairSlot {
    PairSlot::new(n).unwrap()
}

fn autumn() -> SemesterCode {
    SemesterCode::new(2024, 1).unwrap()
}

async fn imported() -> (Importer, TimetableConfig) {
    let config = TimetableConfig::default();
    let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
    let importer = Importer::new(store, &config);
    importer
        .import_bytes(&common::timetable_workbook("А-419"), "xlsx", autumn(), 1, true)
        .await
        .unwrap();
    (importer, config)
}

#[test]
fn test_workbook_expands_to_full_semester() {
    let parsed = parser::convert(
        &common::timetable_workbook("А-419"),
        "xlsx",
        &ParseOptions::default(),
    )
    .unwrap();
    assert_eq!(parsed.group_count, 2);

    let first = &parsed.groups["КМБО-01-22"];
    assert_eq!(first.weeks.len(), 18);
    let odd = first.lesson(17, Weekday::Monday, pair(1)).unwrap();
    assert_eq!(odd.subject, "Математический анализ");
    assert_eq!(odd.rooms, vec!["А-419"]);
    assert_eq!(odd.campus, "В-78");
    let even = first.lesson(18, Weekday::Monday, pair(1)).unwrap();
    assert_eq!(even.subject, "Физика");
    assert_eq!(even.lesson_type_id, 3);

    let second = &parsed.groups["КМБО-02-22"];
    assert!(second.lesson(2, Weekday::Monday, pair(1)).is_none());
    assert_eq!(second.lesson_count(), 9);

    // same bytes, same output
    let again = parser::convert(
        &common::timetable_workbook("А-419"),
        "xlsx",
        &ParseOptions::default(),
    )
    .unwrap();
    assert_eq!(
        serde_json::to_string(&parsed.groups).unwrap(),
        serde_json::to_string(&again.groups).unwrap()
    );
}

#[tokio::test]
async fn test_import_and_query() {
    let (importer, config) = imported().await;
    let queries = ScheduleQueries::new(importer.store(), &config.lesson_types, config.total_weeks);

    let views = queries
        .schedule_for(
            autumn(),
            date(9, 2),
            date(9, 15),
            &EntityRef::Group("КМБО-01-22".to_string()),
        )
        .unwrap();
    let first_monday = &views[&date(9, 2)][&pair(1)];
    assert_eq!(first_monday.len(), 1);
    assert_eq!(first_monday[0].subject, "Математический анализ");
    assert_eq!(first_monday[0].week, 1);
    assert_eq!(first_monday[0].time_start, "09:00");
    assert!(first_monday[0].is_official);
    assert_eq!(views[&date(9, 9)][&pair(1)][0].subject, "Физика");

    let by_room = queries
        .schedule_for(
            autumn(),
            date(9, 2),
            date(9, 2),
            &EntityRef::Room("В-200".to_string()),
        )
        .unwrap();
    assert_eq!(by_room[&date(9, 2)][&pair(1)][0].groups, vec!["КМБО-02-22"]);

    let free = queries
        .free_slots(
            autumn(),
            date(9, 2),
            date(9, 3),
            &EntityRef::Teacher("Иванов И.И.".to_string()),
        )
        .unwrap();
    assert_eq!(free[&date(9, 2)], (2..=7).map(pair).collect::<Vec<_>>());
    assert_eq!(free[&date(9, 3)].len(), 7);

    let found = queries.search("кмбо", 10).unwrap();
    assert_eq!(found.groups.len(), 2);
    let found = queries.search("а-4", 10).unwrap();
    assert_eq!(found.rooms, vec!["А-419"]);

    let info = queries.semester_info(autumn()).unwrap();
    assert!(info.has_days);
    assert_eq!(info.lesson_count, 27);
    assert_eq!(info.start, date(9, 2));
}

#[tokio::test]
async fn test_stored_schedule_diffs_against_new_file() {
    let (importer, config) = imported().await;
    let queries = ScheduleQueries::new(importer.store(), &config.lesson_types, config.total_weeks);
    let (start, end) = (autumn().anchor(), autumn().end(config.total_weeks));

    let mut stored = GroupSchedules::new();
    for group in ["КМБО-01-22", "КМБО-02-22"] {
        stored.insert(
            group.to_string(),
            queries
                .nominal_from_occurrences(autumn(), group, start, end)
                .unwrap(),
        );
    }

    let unchanged = parser::convert(&common::timetable_workbook("А-419"), "xlsx", &ParseOptions::default())
        .unwrap()
        .groups;
    assert!(ScheduleDiffEngine::new().compare(&stored, &unchanged).is_empty());

    let moved = parser::convert(&common::timetable_workbook("А-420"), "xlsx", &ParseOptions::default())
        .unwrap()
        .groups;
    let report = ScheduleDiffEngine::new().compare(&stored, &moved);

    let first = &report.groups["КМБО-01-22"];
    assert_eq!(first.total, 1);
    assert_eq!(first.summary.room, 9);
    let entry = &first.details.modified[0];
    assert_eq!(entry.slot.week, 1);
    assert_eq!(entry.changes.len(), 1);
    assert_eq!(entry.changes[0].field, DiffField::Room);
    assert_eq!(entry.changes[0].from, "А-419");
    assert_eq!(entry.changes[0].to, "А-420");
    assert_eq!(entry.weeks_comparison.len(), 9);

    assert_eq!(report.groups["КМБО-02-22"].total, 0);
}

#[tokio::test]
async fn test_manual_lessons_respect_bookings() {
    let (importer, config) = imported().await;
    let expander = importer.expander();

    let lecture = expander
        .store()
        .slot_occurrences(autumn(), expander.calendar().day_for(autumn(), date(9, 2)).unwrap().id, pair(1), None)
        .unwrap()
        .into_iter()
        .find(|o| o.rooms.contains("А-419"))
        .unwrap();

    let outcome = expander
        .move_lesson(MoveRequest {
            lesson_id: lecture.id,
            target_date: date(9, 2),
            target_pair: 3,
            reason: "room swap".to_string(),
            comment: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(outcome.source.pair, pair(1));
    assert_eq!(outcome.destination.pair, pair(3));
    assert_eq!(expander.store().moves_to(outcome.destination.id).unwrap().len(), 1);

    let clash = |teachers: Vec<&str>, rooms: Vec<&str>| NewLesson {
        semester: autumn(),
        date: date(9, 2),
        pair: 3,
        discipline: "Консультация".to_string(),
        lesson_type_id: 2,
        groups: vec!["КМБО-02-22".to_string()],
        teachers: teachers.into_iter().map(String::from).collect(),
        rooms: rooms.into_iter().map(String::from).collect(),
        campus: String::new(),
        is_official: false,
    };

    let err = expander
        .create_lesson(clash(vec!["Иванов И.И."], vec!["Д-1"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TimetableError::Conflict { kind: ConflictKind::Teacher, ref name } if name == "Иванов И.И."
    ));

    let err = expander
        .create_lesson(clash(vec![], vec!["А-419"]))
        .await
        .unwrap_err();
    assert!(matches!(err, TimetableError::Conflict { kind: ConflictKind::Room, .. }));

    let created = expander
        .create_lesson(clash(vec!["Сидоров С.С."], vec!["Д-1"]))
        .await
        .unwrap();
    assert_eq!(created.groups, vec!["КМБО-02-22"]);
    assert_eq!(created.time_start, config.pair_times.bounds(pair(3)).0);
}
