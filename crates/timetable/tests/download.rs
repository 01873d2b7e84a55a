mod common;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use timetable::calendar::SemesterCode;
use timetable::download::{DownloadConfig, ScheduleDownloader};
use timetable::parser::ParseOptions;
use timetable::{Importer, ScheduleStore, TimetableConfig, TimetableError};
use tokio::sync::watch;

#[derive(Clone, Default)]
struct Fake {
    flaky_calls: Arc<AtomicU32>,
    /// Failures served before the flaky feed succeeds
    flaky_failures: u32,
}

async fn search(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    let link = match params.get("match").map(String::as_str) {
        Some("КМБО-01-22") => Some("/ical/01.ics"),
        Some("FLAKY") => Some("/ical/flaky.ics"),
        _ => None,
    };
    match link {
        Some(link) => Json(json!({ "data": [{ "iCalLink": link }] })),
        None => Json(json!({ "data": [] })),
    }
}

async fn feed() -> &'static str {
    common::FEED
}

async fn flaky(State(fake): State<Fake>) -> Response {
    let call = fake.flaky_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call <= fake.flaky_failures {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else {
        common::FEED.into_response()
    }
}

/// Starts the fake schedule service and returns its search URL.
async fn serve(fake: Fake) -> String {
    let router = Router::new()
        .route("/api/search", get(search))
        .route("/ical/01.ics", get(feed))
        .route("/ical/flaky.ics", get(flaky))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/api/search", addr)
}

fn downloader(search_url: String, max_attempts: u32) -> ScheduleDownloader {
    ScheduleDownloader::new(DownloadConfig {
        search_url,
        max_attempts,
        retry_delay_ms: 10,
        ..Default::default()
    })
    .unwrap()
}

fn groups(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn not_cancelled() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn test_one_failing_group_does_not_stop_others() {
    let url = serve(Fake::default()).await;
    let parser = ParseOptions::default().calendar_parser();

    let report = downloader(url, 3)
        .download_all(&groups(&["КМБО-01-22", "НЕТ-ТАКОЙ"]), &parser, not_cancelled())
        .await
        .unwrap();

    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed["КМБО-01-22"].lesson_count(), 9);
    assert!(report.failed["НЕТ-ТАКОЙ"].contains("calendar link"));
    assert!(!report.is_complete());
}

#[tokio::test]
async fn test_all_groups_failing_is_an_error() {
    let url = serve(Fake::default()).await;
    let parser = ParseOptions::default().calendar_parser();

    let err = downloader(url, 3)
        .download_all(&groups(&["A", "B"]), &parser, not_cancelled())
        .await
        .unwrap_err();
    assert!(matches!(err, TimetableError::NothingDownloaded { failed: 2 }));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let fake = Fake {
        flaky_failures: 2,
        ..Default::default()
    };
    let calls = fake.flaky_calls.clone();
    let url = serve(fake).await;
    let parser = ParseOptions::default().calendar_parser();

    let report = downloader(url, 3)
        .download_all(&groups(&["FLAKY"]), &parser, not_cancelled())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // the requested name wins over the feed's own calendar name
    assert_eq!(report.completed["FLAKY"].group_name, "FLAKY");
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let fake = Fake {
        flaky_failures: 5,
        ..Default::default()
    };
    let calls = fake.flaky_calls.clone();
    let url = serve(fake).await;
    let parser = ParseOptions::default().calendar_parser();

    let err = downloader(url, 2)
        .download_all(&groups(&["FLAKY"]), &parser, not_cancelled())
        .await
        .unwrap_err();
    assert!(matches!(err, TimetableError::NothingDownloaded { failed: 1 }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_bulk_import_commits_each_group() {
    let url = serve(Fake::default()).await;
    let config = TimetableConfig::default();
    let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
    let importer = Importer::new(store.clone(), &config);
    let semester = SemesterCode::new(2024, 1).unwrap();

    let report = importer
        .bulk_import(
            &downloader(url, 1),
            &groups(&["КМБО-01-22", "НЕТ-ТАКОЙ"]),
            semester,
            1,
            not_cancelled(),
        )
        .await
        .unwrap();

    let imported = &report.completed["КМБО-01-22"];
    assert!(!imported.is_official);
    assert_eq!(imported.imported_groups, vec!["КМБО-01-22".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(store.occurrences(semester).unwrap().len(), 9);
    assert_eq!(store.snapshots(semester).unwrap().len(), 1);
}
