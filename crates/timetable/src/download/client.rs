//! HTTP client for the schedule search service.
//!
//! Each group goes through two calls:
//! 1. GET the search endpoint with `match=<group>&limit=1` to find the calendar link
//! 2. GET the calendar file and hand it to the calendar parser

use super::types::{BulkReport, GroupOutcome, SearchResponse};
use crate::error::TimetableError;
use crate::model::ScheduleResult;
use crate::parser::CalendarParser;
use futures::future::join_all;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use url::Url;

/// Group search endpoint of the university schedule service.
const SEARCH_URL: &str = "https://schedule-of.mirea.ru/schedule/api/search";

/// Configuration for the schedule downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Search endpoint; calendar links are resolved against it
    pub search_url: String,
    /// Groups fetched at the same time
    pub max_concurrent: usize,
    /// Attempts per network call, including the first
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub retry_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            search_url: SEARCH_URL.to_string(),
            max_concurrent: 5,
            max_attempts: 3,
            retry_delay_ms: 1000,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        }
    }
}

/// Fetches group calendars from the schedule service.
pub struct ScheduleDownloader {
    client: Client,
    config: DownloadConfig,
}

impl ScheduleDownloader {
    pub fn new(config: DownloadConfig) -> Result<Self, TimetableError> {
        // Fail early on a bad endpoint instead of once per group
        Url::parse(&config.search_url)?;

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TimetableError::Network {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Downloads and parses one group's calendar, retrying network failures.
    ///
    /// A feed with no timed events yields an empty schedule for the group.
    pub async fn download_group(
        &self,
        group: &str,
        parser: &CalendarParser,
        correlation_id: &str,
    ) -> Result<ScheduleResult, TimetableError> {
        let group = group.trim();
        let link = self
            .with_retry("search", group, correlation_id, || {
                self.resolve_calendar_url(group, correlation_id)
            })
            .await?;
        let bytes = self
            .with_retry("fetch", group, correlation_id, || {
                self.fetch_calendar(&link, correlation_id)
            })
            .await?;

        let mut parsed = parser.parse_as(&bytes, group)?;
        Ok(parsed
            .remove(group)
            .unwrap_or_else(|| ScheduleResult::new(group)))
    }

    /// Downloads every group and parses it, without storing anything.
    pub async fn download_all(
        &self,
        groups: &[String],
        parser: &CalendarParser,
        cancel: watch::Receiver<bool>,
    ) -> Result<BulkReport<ScheduleResult>, TimetableError> {
        self.download_each(groups, parser, cancel, |schedule| async move { Ok(schedule) })
            .await
    }

    /// Downloads every group with bounded concurrency and passes each schedule to
    /// `handle` as soon as it arrives.
    ///
    /// One group failing never stops the others. Once `cancel` turns true, groups that
    /// have not been fetched yet are reported as cancelled; a group whose schedule has
    /// already arrived still runs through `handle`.
    ///
    /// # Returns
    /// * `Ok(BulkReport)` - At least one group completed, or no groups were requested
    /// * `Err(TimetableError::NothingDownloaded)` - Every group failed
    /// * `Err(TimetableError::Cancelled)` - Cancelled before any group completed
    pub async fn download_each<T, F, Fut>(
        &self,
        groups: &[String],
        parser: &CalendarParser,
        cancel: watch::Receiver<bool>,
        handle: F,
    ) -> Result<BulkReport<T>, TimetableError>
    where
        F: Fn(ScheduleResult) -> Fut,
        Fut: Future<Output = Result<T, TimetableError>>,
    {
        let correlation_id = generate_correlation_id();
        let start = Instant::now();
        let semaphore = Semaphore::new(self.config.max_concurrent.max(1));

        info!(
            correlation_id = %correlation_id,
            groups = groups.len(),
            max_concurrent = self.config.max_concurrent,
            "Starting bulk download"
        );

        let tasks = groups.iter().map(|group| {
            let cancel = cancel.clone();
            let semaphore = &semaphore;
            let handle = &handle;
            let correlation_id = correlation_id.as_str();
            async move {
                if *cancel.borrow() {
                    return (group.clone(), GroupOutcome::Cancelled);
                }

                let permit = tokio::select! {
                    permit = semaphore.acquire() => permit,
                    _ = cancelled(cancel.clone()) => {
                        return (group.clone(), GroupOutcome::Cancelled);
                    }
                };
                let Ok(_permit) = permit else {
                    return (group.clone(), GroupOutcome::Cancelled);
                };

                let downloaded = tokio::select! {
                    result = self.download_group(group, parser, correlation_id) => result,
                    _ = cancelled(cancel.clone()) => {
                        debug!(correlation_id = %correlation_id, group = %group, "Download cancelled");
                        return (group.clone(), GroupOutcome::Cancelled);
                    }
                };

                let outcome = match downloaded {
                    Ok(schedule) => match handle(schedule).await {
                        Ok(value) => GroupOutcome::Completed(value),
                        Err(e) => GroupOutcome::Failed(e),
                    },
                    Err(e) => GroupOutcome::Failed(e),
                };
                if let GroupOutcome::Failed(e) = &outcome {
                    error!(
                        correlation_id = %correlation_id,
                        group = %group,
                        error = %e,
                        "Group download failed"
                    );
                }
                (group.clone(), outcome)
            }
        });

        let mut report = BulkReport::new(correlation_id.clone());
        for (group, outcome) in join_all(tasks).await {
            report.record(group, outcome);
        }

        info!(
            correlation_id = %correlation_id,
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Bulk download finished"
        );

        if report.completed.is_empty() {
            if !report.failed.is_empty() {
                return Err(TimetableError::NothingDownloaded {
                    failed: report.failed.len(),
                });
            }
            if !report.cancelled.is_empty() {
                return Err(TimetableError::Cancelled);
            }
        }
        Ok(report)
    }

    /// Looks the group up and returns the absolute calendar URL.
    async fn resolve_calendar_url(
        &self,
        group: &str,
        correlation_id: &str,
    ) -> Result<String, TimetableError> {
        let search = Url::parse_with_params(
            &self.config.search_url,
            &[("match", group), ("limit", "1")],
        )?;
        debug!(
            correlation_id = %correlation_id,
            url = %search,
            "Searching for group"
        );

        let response = self.client.get(search.clone()).send().await?;
        check_status(response.status(), search.as_str())?;
        let body: SearchResponse = response.json().await?;

        let link = body
            .calendar_link()
            .ok_or_else(|| TimetableError::not_found(format!("calendar link for group {}", group)))?;
        Ok(search.join(link)?.to_string())
    }

    async fn fetch_calendar(
        &self,
        url: &str,
        correlation_id: &str,
    ) -> Result<Vec<u8>, TimetableError> {
        debug!(correlation_id = %correlation_id, url = %url, "Fetching calendar");

        let response = self.client.get(url).send().await?;
        check_status(response.status(), url)?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Runs `call` up to `max_attempts` times, pausing between retryable failures.
    async fn with_retry<T, F, Fut>(
        &self,
        step: &str,
        group: &str,
        correlation_id: &str,
        call: F,
    ) -> Result<T, TimetableError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TimetableError>>,
    {
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        correlation_id = %correlation_id,
                        group = %group,
                        step = step,
                        attempt = attempt,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Server-side trouble is worth retrying; anything else means the resource is not there.
fn check_status(status: StatusCode, url: &str) -> Result<(), TimetableError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(TimetableError::UnexpectedResponse {
            message: format!("{} returned status {}", url, status),
        })
    } else {
        Err(TimetableError::not_found(format!("{} ({})", url, status)))
    }
}

/// Resolves once the flag turns true; never resolves if the sender goes away first.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        futures::future::pending::<()>().await;
    }
}

/// Generates a unique correlation ID for request tracing.
fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp & 0xFFFFFFFF, random)
}
