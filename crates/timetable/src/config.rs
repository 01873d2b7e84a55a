/// Runtime configuration for parsing, storage and downloads
use crate::calendar::PairTimes;
use crate::download::DownloadConfig;
use crate::error::TimetableError;
use crate::model::LessonTypes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Number of teaching weeks in a semester.
pub const DEFAULT_TOTAL_WEEKS: u8 = 18;

/// Substring of the header cell that marks a group column block.
pub const DEFAULT_GROUP_MARKER: &str = "КМБО";

/// Top-level configuration, loaded from a JSON file.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimetableConfig {
    pub database_path: PathBuf,
    pub total_weeks: u8,
    pub group_marker: String,
    pub lesson_types: LessonTypes,
    pub pair_times: PairTimes,
    /// Distinct rooms a single teacher may occupy in one slot
    pub max_rooms_per_teacher: usize,
    /// Offset applied to UTC (`Z`) calendar timestamps to get local wall-clock time
    pub utc_offset_minutes: i32,
    pub download: DownloadConfig,
}

impl TimetableConfig {
    /// Loads the configuration from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the JSON file
    ///
    /// # Returns
    /// * `Ok(TimetableConfig)` - Parsed and validated configuration
    /// * `Err(TimetableError::Config)` - If the file can't be read, parsed or is invalid
    pub fn load_from_file(path: &Path) -> Result<Self, TimetableError> {
        let content = fs::read_to_string(path).map_err(|e| TimetableError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let config: TimetableConfig =
            serde_json::from_str(&content).map_err(|e| TimetableError::Config {
                message: format!("cannot parse {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, TimetableError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), TimetableError> {
        let invalid = |message: &str| {
            Err(TimetableError::Config {
                message: message.to_string(),
            })
        };

        if self.total_weeks == 0 {
            return invalid("total_weeks must be positive");
        }
        if self.group_marker.trim().is_empty() {
            return invalid("group_marker must not be empty");
        }
        if self.download.max_concurrent == 0 {
            return invalid("download.max_concurrent must be positive");
        }
        if self.download.max_attempts == 0 {
            return invalid("download.max_attempts must be positive");
        }
        self.pair_times.validate()
    }
}

impl Default for TimetableConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("timetable.sqlite3"),
            total_weeks: DEFAULT_TOTAL_WEEKS,
            group_marker: DEFAULT_GROUP_MARKER.to_string(),
            lesson_types: LessonTypes::default(),
            pair_times: PairTimes::default(),
            max_rooms_per_teacher: 2,
            utc_offset_minutes: 180,
            download: DownloadConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "group_marker": "ИКБО", "download": {{ "max_concurrent": 2 }} }}"#
        )
        .unwrap();

        let config = TimetableConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.group_marker, "ИКБО");
        assert_eq!(config.download.max_concurrent, 2);
        assert_eq!(config.download.max_attempts, 3);
        assert_eq!(config.total_weeks, 18);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "total_weeks": 0 }}"#).unwrap();
        let err = TimetableConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, TimetableError::Config { .. }));
    }
}
