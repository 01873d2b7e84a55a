//! Remote calendar acquisition for lists of groups.

mod client;
mod types;

pub use client::{DownloadConfig, ScheduleDownloader};
pub use types::BulkReport;
