//! Parse -> snapshot -> resolve -> rebuild pipeline for uploaded files and downloaded feeds.

use crate::calendar::SemesterCode;
use crate::config::TimetableConfig;
use crate::download::{BulkReport, ScheduleDownloader};
use crate::error::TimetableError;
use crate::expand::{RebuildSummary, SemesterExpander};
use crate::model::{GroupSchedules, ScheduleResult};
use crate::parser::{self, content_hash, ParseOptions, SourceFormat};
use crate::store::{NewSnapshot, ScheduleStore};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Outcome of one import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub semester: SemesterCode,
    pub version: i64,
    /// Names of the groups whose occurrences were rebuilt
    pub imported_groups: Vec<String>,
    pub total_groups: usize,
    pub is_official: bool,
    pub snapshot_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuild: Option<RebuildSummary>,
}

pub struct Importer {
    expander: SemesterExpander,
    options: ParseOptions,
}

impl Importer {
    pub fn new(store: Arc<ScheduleStore>, config: &TimetableConfig) -> Self {
        Self {
            expander: SemesterExpander::new(store, config),
            options: ParseOptions::from_config(config),
        }
    }

    /// Replaces the parser settings, e.g. to switch the anchor policy.
    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn expander(&self) -> &SemesterExpander {
        &self.expander
    }

    pub fn store(&self) -> &ScheduleStore {
        self.expander.store()
    }

    /// Imports a file from disk, picking the parser from its extension.
    pub async fn import_file(
        &self,
        path: &Path,
        semester: SemesterCode,
        version: i64,
        is_official: bool,
    ) -> Result<ImportResult, TimetableError> {
        let format = SourceFormat::from_path(path)?;
        let bytes = tokio::fs::read(path).await?;
        let source_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("upload.{}", format));
        self.import_named(&bytes, format.as_str(), &source_name, semester, version, is_official)
            .await
    }

    /// Parses `bytes`, stores the parsed document and rebuilds the occurrences of
    /// every group it contains.
    ///
    /// # Arguments
    /// * `bytes` - Raw file contents
    /// * `extension` - File-extension hint (`xlsx` or `ics`)
    /// * `semester` - Semester the file belongs to
    /// * `version` - Caller-assigned document version
    /// * `is_official` - Trust scope for the entities and occurrences created
    ///
    /// # Returns
    /// * `Ok(ImportResult)` - Import summary; `imported_groups` is empty for a file
    ///   without groups
    /// * `Err(TimetableError)` - Parse errors abort before anything is written; a failed
    ///   rebuild leaves the previous occurrences and no snapshot
    pub async fn import_bytes(
        &self,
        bytes: &[u8],
        extension: &str,
        semester: SemesterCode,
        version: i64,
        is_official: bool,
    ) -> Result<ImportResult, TimetableError> {
        let source_name = format!("upload.{}", extension.trim().trim_start_matches('.'));
        self.import_named(bytes, extension, &source_name, semester, version, is_official)
            .await
    }

    async fn import_named(
        &self,
        bytes: &[u8],
        extension: &str,
        source_name: &str,
        semester: SemesterCode,
        version: i64,
        is_official: bool,
    ) -> Result<ImportResult, TimetableError> {
        let parsed = parser::convert(bytes, extension, &self.options)?;
        self.import_schedules(
            parsed.groups,
            parsed.format,
            source_name,
            &parsed.content_hash,
            semester,
            version,
            is_official,
        )
        .await
    }

    /// Downloads the calendars of `groups` and imports each one as it arrives.
    ///
    /// Each group is committed on its own. Cancelling through `cancel` keeps the groups
    /// already committed; the ones not fetched yet are listed as cancelled. Downloaded
    /// feeds are stored as unofficial.
    pub async fn bulk_import(
        &self,
        downloader: &ScheduleDownloader,
        groups: &[String],
        semester: SemesterCode,
        version: i64,
        cancel: watch::Receiver<bool>,
    ) -> Result<BulkReport<ImportResult>, TimetableError> {
        let parser = self.options.calendar_parser();
        let report = downloader
            .download_each(groups, &parser, cancel, |schedule| {
                self.import_downloaded(schedule, semester, version)
            })
            .await?;

        info!(
            semester = %semester,
            correlation_id = %report.correlation_id,
            imported = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            "Bulk import finished"
        );
        Ok(report)
    }

    async fn import_downloaded(
        &self,
        schedule: ScheduleResult,
        semester: SemesterCode,
        version: i64,
    ) -> Result<ImportResult, TimetableError> {
        let source_name = format!("{}.ics", schedule.group_name);
        let groups = GroupSchedules::from([(schedule.group_name.clone(), schedule)]);
        let document = serde_json::to_string(&groups)?;
        let hash = content_hash(document.as_bytes());
        self.import_schedules(groups, SourceFormat::Ics, &source_name, &hash, semester, version, false)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn import_schedules(
        &self,
        groups: GroupSchedules,
        format: SourceFormat,
        source_name: &str,
        hash: &str,
        semester: SemesterCode,
        version: i64,
        is_official: bool,
    ) -> Result<ImportResult, TimetableError> {
        let institutional = semester.anchor();
        for (name, schedule) in &groups {
            if let Some(anchor) = schedule.anchor.filter(|a| *a != institutional) {
                warn!(
                    group = %name,
                    anchor = %anchor,
                    institutional = %institutional,
                    "Calendar week numbering differs from the institutional calendar"
                );
            }
        }

        let document = serde_json::to_string(&groups)?;
        let snapshot = NewSnapshot {
            semester,
            version,
            source_name,
            format: format.as_str(),
            content_hash: hash,
            is_official,
            group_count: groups.len(),
            document: &document,
        };

        if groups.is_empty() {
            warn!(source = %source_name, semester = %semester, "Source holds no groups");
            let snapshot_id = self.store().save_snapshot(&snapshot)?;
            return Ok(ImportResult {
                semester,
                version,
                imported_groups: Vec::new(),
                total_groups: 0,
                is_official,
                snapshot_id,
                rebuild: None,
            });
        }

        // the snapshot is only recorded once its occurrences are in place
        let ids = self.expander.resolve_entities(&groups, is_official)?;
        let summary = self
            .expander
            .rebuild(semester, &groups, &ids, is_official)
            .await?;
        let snapshot_id = self.store().save_snapshot(&snapshot)?;

        let result = ImportResult {
            semester,
            version,
            total_groups: groups.len(),
            imported_groups: groups.into_keys().collect(),
            is_official,
            snapshot_id,
            rebuild: Some(summary),
        };
        info!(
            semester = %semester,
            version,
            snapshot_id,
            groups = result.imported_groups.len(),
            is_official,
            "Imported schedule"
        );
        Ok(result)
    }
}
