//! Field-level comparison of two versions of a timetable.
//!
//! Changes are tracked per (weekday, pair, parity). The first week of a parity that
//! shows a given change becomes the visible entry; later weeks with the same change are
//! only listed in that entry's `weeks_comparison`.

mod types;

pub use types::{
    ChangeDetails, ChangeSummary, ChangeType, ComparisonReport, DiffField, FieldChange,
    GroupComparison, LessonChange, LessonSlot, LessonSnapshot, ModifiedLesson,
    WeekComparison, MISSING,
};

use crate::model::{GroupSchedules, LessonData, PairSlot, Parity, ScheduleResult, Weekday};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

const GROUP_ADDED_NOTE: &str = "Group appears only in the newer version";
const GROUP_REMOVED_NOTE: &str = "Group appears only in the older version";

/// What happened in one slot of one week, used to fold repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Signature {
    Added(LessonSnapshot),
    Removed(LessonSnapshot),
    Modified(LessonSnapshot, LessonSnapshot),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleDiffEngine;

impl ScheduleDiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compares every group present in either version.
    pub fn compare(&self, before: &GroupSchedules, after: &GroupSchedules) -> ComparisonReport {
        let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        let mut report = ComparisonReport::default();

        for name in names {
            let comparison = match (before.get(name), after.get(name)) {
                (Some(old), Some(new)) => self.compare_group(old, new),
                (None, _) => group_sentinel(true),
                (_, None) => group_sentinel(false),
            };
            debug!(
                group = %name,
                total = comparison.total,
                added = comparison.details.added.len(),
                removed = comparison.details.removed.len(),
                modified = comparison.details.modified.len(),
                "Compared group"
            );
            report.groups.insert(name.clone(), comparison);
        }

        info!(
            groups = report.groups.len(),
            changes = report.total(),
            "Compared schedules"
        );
        report
    }

    /// Compares two versions of one group's schedule.
    pub fn compare_group(&self, before: &ScheduleResult, after: &ScheduleResult) -> GroupComparison {
        let weeks: BTreeSet<u8> = before.weeks.keys().chain(after.weeks.keys()).copied().collect();
        let mut result = GroupComparison::default();
        let mut seen: HashMap<(Weekday, PairSlot, Parity), Vec<Signature>> = HashMap::new();

        for &week in &weeks {
            let parity = Parity::of_week(week);
            for (day, pair) in slots_in_week(before, after, week) {
                let old = snapshot(before.lesson(week, day, pair));
                let new = snapshot(after.lesson(week, day, pair));

                let signature = match (old, new) {
                    (None, None) => continue,
                    (None, Some(new)) => Signature::Added(new),
                    (Some(old), None) => Signature::Removed(old),
                    (Some(old), Some(new)) => {
                        let changed = old.changed_fields(&new);
                        if changed.is_empty() {
                            continue;
                        }
                        for field in changed {
                            result.summary.record(field);
                        }
                        Signature::Modified(old, new)
                    }
                };

                let known = seen.entry((day, pair, parity)).or_default();
                if known.contains(&signature) {
                    continue;
                }
                known.push(signature.clone());

                let slot = LessonSlot { day, pair, week };
                let weeks_comparison = week_breakdown(before, after, &weeks, day, pair, parity);
                match signature {
                    Signature::Added(details) => result.details.added.push(LessonChange {
                        slot: Some(slot),
                        details,
                        weeks_comparison,
                    }),
                    Signature::Removed(details) => result.details.removed.push(LessonChange {
                        slot: Some(slot),
                        details,
                        weeks_comparison,
                    }),
                    Signature::Modified(old, new) => {
                        let changes = old
                            .changed_fields(&new)
                            .into_iter()
                            .map(|field| FieldChange {
                                field,
                                from: old.field(field).to_string(),
                                to: new.field(field).to_string(),
                            })
                            .collect();
                        result.details.modified.push(ModifiedLesson {
                            slot,
                            changes,
                            before: old,
                            after: new,
                            weeks_comparison,
                        });
                    }
                }
            }
        }

        result.total = result.details.added.len()
            + result.details.removed.len()
            + result.details.modified.len();
        result
    }
}

fn group_sentinel(added: bool) -> GroupComparison {
    let entry = LessonChange {
        slot: None,
        details: LessonSnapshot::note(if added { GROUP_ADDED_NOTE } else { GROUP_REMOVED_NOTE }),
        weeks_comparison: Vec::new(),
    };
    let mut comparison = GroupComparison {
        total: 1,
        ..Default::default()
    };
    if added {
        comparison.details.added.push(entry);
    } else {
        comparison.details.removed.push(entry);
    }
    comparison
}

/// Only lessons with a subject count.
fn snapshot(lesson: Option<&LessonData>) -> Option<LessonSnapshot> {
    lesson.filter(|l| l.is_real()).map(LessonSnapshot::of)
}

/// Every (weekday, pair) filled in either version of `week`, in order.
fn slots_in_week(before: &ScheduleResult, after: &ScheduleResult, week: u8) -> BTreeSet<(Weekday, PairSlot)> {
    [before, after]
        .into_iter()
        .filter_map(|schedule| schedule.weeks.get(&week))
        .flat_map(|week| {
            week.days
                .iter()
                .flat_map(|(day, lessons)| lessons.keys().map(move |pair| (*day, *pair)))
        })
        .collect()
}

/// State of the slot in every week of the given parity.
fn week_breakdown(
    before: &ScheduleResult,
    after: &ScheduleResult,
    weeks: &BTreeSet<u8>,
    day: Weekday,
    pair: PairSlot,
    parity: Parity,
) -> Vec<WeekComparison> {
    weeks
        .iter()
        .copied()
        .filter(|week| Parity::of_week(*week) == parity)
        .map(|week| {
            let old = snapshot(before.lesson(week, day, pair));
            let new = snapshot(after.lesson(week, day, pair));
            let (change_type, changed_fields) = match (&old, &new) {
                (None, None) => (ChangeType::Unchanged, Vec::new()),
                (None, Some(_)) => (ChangeType::Added, Vec::new()),
                (Some(_), None) => (ChangeType::Removed, Vec::new()),
                (Some(old), Some(new)) => {
                    let changed = old.changed_fields(new);
                    if changed.is_empty() {
                        (ChangeType::Unchanged, changed)
                    } else {
                        (ChangeType::Modified, changed)
                    }
                }
            };
            WeekComparison {
                week,
                before: old,
                after: new,
                change_type,
                changed_fields,
            }
        })
        .collect()
}
