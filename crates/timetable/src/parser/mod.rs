//! Source decoding: picks a parser from the file extension and produces the
//! group -> nominal schedule map.

pub mod grid;
pub mod ics;
pub mod text;
pub mod xlsx;

pub use grid::{CellGrid, GridParser};
pub use ics::CalendarParser;

use crate::calendar::{AnchorPolicy, PairTimes};
use crate::config::TimetableConfig;
use crate::error::TimetableError;
use crate::model::{GroupSchedules, LessonTypes};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Supported source encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Xlsx,
    Ics,
}

impl SourceFormat {
    /// Case-insensitive extension lookup; a leading dot is accepted.
    pub fn from_extension(extension: &str) -> Result<Self, TimetableError> {
        let normalized = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "xlsx" => Ok(SourceFormat::Xlsx),
            "ics" => Ok(SourceFormat::Ics),
            _ => Err(TimetableError::UnsupportedFormat {
                extension: extension.to_string(),
            }),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, TimetableError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        Self::from_extension(extension)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Ics => "ics",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the parsers need to know besides the bytes.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub group_marker: String,
    pub lesson_types: LessonTypes,
    pub pair_times: PairTimes,
    pub total_weeks: u8,
    pub utc_offset_minutes: i32,
    pub anchor_policy: AnchorPolicy,
    /// Name for a calendar feed that has no `X-WR-CALNAME`
    pub fallback_group_name: Option<String>,
}

impl ParseOptions {
    pub fn from_config(config: &TimetableConfig) -> Self {
        Self {
            group_marker: config.group_marker.clone(),
            lesson_types: config.lesson_types.clone(),
            pair_times: config.pair_times.clone(),
            total_weeks: config.total_weeks,
            utc_offset_minutes: config.utc_offset_minutes,
            anchor_policy: AnchorPolicy::default(),
            fallback_group_name: None,
        }
    }

    pub fn with_anchor_policy(mut self, policy: AnchorPolicy) -> Self {
        self.anchor_policy = policy;
        self
    }

    pub fn with_fallback_group_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_group_name = Some(name.into());
        self
    }

    pub fn grid_parser(&self) -> GridParser {
        GridParser::new(self.group_marker.clone(), self.lesson_types.clone())
    }

    pub fn calendar_parser(&self) -> CalendarParser {
        CalendarParser::new(
            self.lesson_types.clone(),
            self.pair_times.clone(),
            self.total_weeks,
        )
        .with_anchor_policy(self.anchor_policy)
        .with_utc_offset_minutes(self.utc_offset_minutes)
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::from_config(&TimetableConfig::default())
    }
}

/// Result of converting one source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedSource {
    pub format: SourceFormat,
    pub group_count: usize,
    /// SHA-256 of the raw bytes, lowercase hex
    pub content_hash: String,
    pub groups: GroupSchedules,
}

/// Converts raw file bytes into per-group nominal schedules spanning the semester.
///
/// # Arguments
/// * `bytes` - Raw file contents
/// * `extension` - File-extension hint (`xlsx` or `ics`, any case)
/// * `options` - Parser settings
///
/// # Returns
/// * `Ok(ParsedSource)` - Parsed groups; may be empty when the file holds no groups
/// * `Err(TimetableError::UnsupportedFormat)` - Unknown extension
/// * `Err(TimetableError::Parse)` - The file is structurally broken
pub fn convert(
    bytes: &[u8],
    extension: &str,
    options: &ParseOptions,
) -> Result<ParsedSource, TimetableError> {
    let format = SourceFormat::from_extension(extension)?;
    let groups = match format {
        SourceFormat::Xlsx => convert_workbook(bytes, options)?,
        SourceFormat::Ics => {
            let parser = options.calendar_parser();
            match options.fallback_group_name.as_deref() {
                Some(fallback) => parser.parse_or_named(bytes, fallback)?,
                None => parser.parse(bytes)?,
            }
        }
    };

    let parsed = ParsedSource {
        format,
        group_count: groups.len(),
        content_hash: content_hash(bytes),
        groups,
    };
    info!(
        format = %format,
        bytes = bytes.len(),
        groups = parsed.group_count,
        "Converted source file"
    );
    Ok(parsed)
}

fn convert_workbook(bytes: &[u8], options: &ParseOptions) -> Result<GroupSchedules, TimetableError> {
    let sheets = xlsx::read_workbook(bytes)?;
    let parser = options.grid_parser();

    let mut templates = GroupSchedules::new();
    for sheet in &sheets {
        let before = templates.len();
        parser.parse_into(&sheet.grid, &mut templates);
        debug!(
            sheet = %sheet.name,
            rows = sheet.grid.max_row(),
            columns = sheet.grid.max_col(),
            new_groups = templates.len() - before,
            "Parsed worksheet"
        );
    }

    Ok(templates
        .into_iter()
        .map(|(name, template)| (name, template.expand_cycle(options.total_weeks)))
        .collect())
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourceFormat::from_extension("XLSX").unwrap(), SourceFormat::Xlsx);
        assert_eq!(SourceFormat::from_extension(".ics").unwrap(), SourceFormat::Ics);
        assert!(matches!(
            SourceFormat::from_extension("pdf"),
            Err(TimetableError::UnsupportedFormat { .. })
        ));
        assert_eq!(
            SourceFormat::from_path(Path::new("/tmp/КМБО.Ics")).unwrap(),
            SourceFormat::Ics
        );
        assert!(SourceFormat::from_path(Path::new("schedule")).is_err());
    }

    #[test]
    fn test_unsupported_extension_is_client_error() {
        let err = convert(b"anything", "docx", &ParseOptions::default()).unwrap_err();
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_convert_calendar_with_fallback_name() {
        let feed = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nDTSTART:20240902T090000\r\n\
                    SUMMARY:ЛК Алгебра\r\nRRULE:FREQ=WEEKLY\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let options = ParseOptions::default().with_fallback_group_name("КМБО-03-22");
        let parsed = convert(feed.as_bytes(), "ics", &options).unwrap();
        assert_eq!(parsed.format, SourceFormat::Ics);
        assert_eq!(parsed.group_count, 1);
        assert_eq!(parsed.groups["КМБО-03-22"].weeks.len(), 18);
        assert_eq!(parsed.content_hash.len(), 64);
    }

    #[test]
    fn test_broken_workbook_is_parse_error() {
        let err = convert(b"not a zip", "xlsx", &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, TimetableError::Parse { .. }));
    }
}
