use super::{semester_dates, SemesterCode, SemesterDay};
use crate::error::TimetableError;
use crate::store::ScheduleStore;
use chrono::NaiveDate;
use tracing::{debug, info};

/// The concrete day grid of each semester, backed by the store.
pub struct SemesterCalendar<'a> {
    store: &'a ScheduleStore,
    total_weeks: u8,
}

impl<'a> SemesterCalendar<'a> {
    pub fn new(store: &'a ScheduleStore, total_weeks: u8) -> Self {
        Self { store, total_weeks }
    }

    pub fn total_weeks(&self) -> u8 {
        self.total_weeks
    }

    /// Creates the `total_weeks` x 7 day grid unless the semester already has days.
    ///
    /// Returns the number of days created.
    pub fn ensure(&self, semester: SemesterCode) -> Result<usize, TimetableError> {
        if self.store.has_days(semester)? {
            debug!(semester = %semester, "Semester days already present");
            return Ok(0);
        }

        let days = semester_dates(semester, self.total_weeks);
        let created = self.store.insert_days(semester, &days)?;
        info!(
            semester = %semester,
            anchor = %semester.anchor(),
            days = created,
            "Generated semester day grid"
        );
        Ok(created)
    }

    /// Days between `from` and `to` inclusive, in date order.
    pub fn days_in_range(
        &self,
        semester: SemesterCode,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SemesterDay>, TimetableError> {
        if from > to {
            return Err(TimetableError::validation(format!(
                "date range {} .. {} is reversed",
                from, to
            )));
        }
        self.store.days_in_range(semester, from, to)
    }

    /// The day row for `date`, or NotFound when the date is outside the semester.
    pub fn day_for(
        &self,
        semester: SemesterCode,
        date: NaiveDate,
    ) -> Result<SemesterDay, TimetableError> {
        self.store
            .day_by_date(semester, date)?
            .ok_or_else(|| {
                TimetableError::not_found(format!("day {} in semester {}", date, semester))
            })
    }

    /// All days of the semester.
    pub fn days(&self, semester: SemesterCode) -> Result<Vec<SemesterDay>, TimetableError> {
        self.store.semester_days(semester)
    }
}
