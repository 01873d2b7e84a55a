//! Timetable normalization, semester expansion and schedule comparison.
//!
//! Spreadsheet grids (`.xlsx`) and calendar feeds (`.ics`) are decoded into one nominal
//! week model ([`model::ScheduleResult`]). From there a schedule can be projected onto
//! the concrete days of a semester ([`expand::SemesterExpander`]), queried
//! ([`query::ScheduleQueries`]) or compared with another version
//! ([`diff::ScheduleDiffEngine`]).

pub mod calendar;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod download;
pub mod error;
pub mod expand;
pub mod import;
pub mod model;
pub mod parser;
pub mod query;
pub mod store;

pub use calendar::{AnchorPolicy, SemesterCalendar, SemesterCode};
pub use config::TimetableConfig;
pub use conflict::ConflictDetector;
pub use diff::{ComparisonReport, ScheduleDiffEngine};
pub use download::{DownloadConfig, ScheduleDownloader};
pub use error::{ConflictKind, TimetableError};
pub use expand::SemesterExpander;
pub use import::{ImportResult, Importer};
pub use model::{GroupSchedules, LessonData, PairSlot, ScheduleResult, Weekday};
pub use parser::{convert, ParseOptions, ParsedSource, SourceFormat};
pub use query::{EntityRef, ScheduleQueries};
pub use store::ScheduleStore;
