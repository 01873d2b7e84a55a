use crate::error::TimetableError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of the group search endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub data: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchHit {
    #[serde(rename = "iCalLink", default)]
    pub ical_link: Option<String>,
}

impl SearchResponse {
    /// First hit carrying a non-empty calendar link.
    pub fn calendar_link(&self) -> Option<&str> {
        self.data
            .iter()
            .filter_map(|hit| hit.ical_link.as_deref())
            .map(str::trim)
            .find(|link| !link.is_empty())
    }
}

/// How one group of a bulk run ended.
#[derive(Debug)]
pub(crate) enum GroupOutcome<T> {
    Completed(T),
    Failed(TimetableError),
    Cancelled,
}

/// Per-group results of a bulk download.
///
/// `completed` holds whatever the per-group handler returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReport<T> {
    pub correlation_id: String,
    pub completed: BTreeMap<String, T>,
    /// Group -> error message
    pub failed: BTreeMap<String, String>,
    pub cancelled: Vec<String>,
}

impl<T> BulkReport<T> {
    pub(crate) fn new(correlation_id: String) -> Self {
        Self {
            correlation_id,
            completed: BTreeMap::new(),
            failed: BTreeMap::new(),
            cancelled: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, group: String, outcome: GroupOutcome<T>) {
        match outcome {
            GroupOutcome::Completed(value) => {
                self.completed.insert(group, value);
            }
            GroupOutcome::Failed(err) => {
                self.failed.insert(group, err.to_string());
            }
            GroupOutcome::Cancelled => self.cancelled.push(group),
        }
    }

    /// True when every requested group completed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    pub fn requested(&self) -> usize {
        self.completed.len() + self.failed.len() + self.cancelled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_link_skips_empty_hits() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"data":[{"iCalLink":""},{"fullTitle":"x"},{"iCalLink":" /ical/1.ics "}]}"#,
        )
        .unwrap();
        assert_eq!(response.calendar_link(), Some("/ical/1.ics"));

        let empty: SearchResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.calendar_link(), None);
    }

    #[test]
    fn test_report_records_each_outcome() {
        let mut report = BulkReport::new("abc".to_string());
        report.record("A".to_string(), GroupOutcome::Completed(3));
        report.record(
            "B".to_string(),
            GroupOutcome::Failed(TimetableError::Network {
                message: "reset".to_string(),
            }),
        );
        report.record("C".to_string(), GroupOutcome::Cancelled);

        assert_eq!(report.completed["A"], 3);
        assert_eq!(report.failed["B"], "Network error: reset");
        assert_eq!(report.cancelled, vec!["C".to_string()]);
        assert_eq!(report.requested(), 3);
        assert!(!report.is_complete());
    }
}
