//! End-to-end traversal behavior against a scripted upstream.

use std::sync::Arc;
use std::time::Duration;

use stationsync_client::{Fault, RawResponse, RequestTemplate, ScriptedTransport};
use stationsync_common::{Error, ManualClock};
use stationsync_sync::{BackoffPolicy, FetchOptions, JobPhase, PaginatedFetcher, SyncJob};

const COLLECTION: &str = "database/rows/table/311/";

fn setup(rows: usize) -> (PaginatedFetcher<ScriptedTransport>, Arc<ScriptedTransport>, Arc<ManualClock>) {
    let transport = Arc::new(ScriptedTransport::with_row_count(rows));
    let clock = Arc::new(ManualClock::default());
    let fetcher = PaginatedFetcher::new(transport.clone(), BackoffPolicy::default(), clock.clone());
    (fetcher, transport, clock)
}

fn template() -> RequestTemplate {
    RequestTemplate::new(COLLECTION).with_param("filter__field_city__equal", "Berlin")
}

fn offsets(values: &[Option<&str>]) -> Vec<Option<String>> {
    values.iter().map(|v| v.map(String::from)).collect()
}

#[tokio::test]
async fn test_650_rows_in_pages_of_100() {
    let (fetcher, transport, clock) = setup(650);

    let result = fetcher.fetch_all(&template(), 100, 3).await.unwrap();

    assert_eq!(result.rows.len(), 650);
    assert_eq!(result.page_count, 7);
    assert_eq!(transport.requests().len(), 7);

    let ids: Vec<u64> = result
        .rows
        .iter()
        .filter_map(|row| row.id().and_then(|id| id.as_u64()))
        .collect();
    assert_eq!(ids, (1..=650).collect::<Vec<u64>>());

    // One inter-page pause before each page after the first
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(50); 6]);
}

#[tokio::test]
async fn test_every_page_request_carries_paging_params() {
    let (fetcher, transport, _clock) = setup(250);

    fetcher.fetch_all(&template(), 100, 3).await.unwrap();

    for request in transport.requests() {
        assert_eq!(request.collection_path, COLLECTION);
        assert_eq!(request.page_size(), Some(100));
        assert_eq!(request.params.get("user_field_names").map(String::as_str), Some("true"));
        assert_eq!(
            request.params.get("filter__field_city__equal").map(String::as_str),
            Some("Berlin")
        );
    }
}

#[tokio::test]
async fn test_completeness_with_short_last_page() {
    for (total, size, pages) in [(30, 10, 3), (31, 10, 4), (1, 10, 1), (199, 200, 1)] {
        let (fetcher, transport, _clock) = setup(total);

        let result = fetcher.fetch_all(&template(), size, 0).await.unwrap();

        assert_eq!(result.rows.len(), total, "total {} size {}", total, size);
        assert_eq!(result.page_count, pages);
        assert_eq!(transport.requests().len(), pages as usize);
    }
}

#[tokio::test]
async fn test_requests_follow_previous_cursor() {
    let (fetcher, transport, _clock) = setup(35);

    fetcher.fetch_all(&template(), 10, 3).await.unwrap();

    assert_eq!(
        transport.requested_offsets(),
        offsets(&[None, Some("10"), Some("20"), Some("30")])
    );
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let (fetcher, transport, clock) = setup(50);
    transport.fail_times(Some("20"), Fault::server_error(503), 2);

    let result = fetcher.fetch_all(&template(), 10, 3).await.unwrap();

    assert_eq!(result.rows.len(), 50);
    let page_three = transport
        .requested_offsets()
        .into_iter()
        .filter(|o| o.as_deref() == Some("20"))
        .count();
    assert_eq!(page_three, 3);

    // Retries reuse the same offset and never skip ahead
    assert_eq!(
        transport.requested_offsets(),
        offsets(&[
            None,
            Some("10"),
            Some("20"),
            Some("20"),
            Some("20"),
            Some("30"),
            Some("40"),
        ])
    );
    assert!(clock.sleeps().contains(&Duration::from_millis(500)));
    assert!(clock.sleeps().contains(&Duration::from_millis(1000)));
}

#[tokio::test]
async fn test_network_errors_are_retried() {
    let (fetcher, transport, _clock) = setup(15);
    transport.fail_times(None, Fault::Network("connection reset".into()), 1);

    let result = fetcher.fetch_all(&template(), 10, 1).await.unwrap();

    assert_eq!(result.rows.len(), 15);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn test_retry_exhaustion_discards_rows() {
    let (fetcher, transport, _clock) = setup(30);
    transport.fail_always(Some("10"), Fault::server_error(500));

    let err = fetcher.fetch_all(&template(), 10, 2).await.unwrap_err();

    match &err {
        Error::Sync { pages_completed, cause, .. } => {
            assert_eq!(*pages_completed, 1);
            assert!(matches!(**cause, Error::Server { status: 500, .. }));
        }
        other => panic!("expected sync failure, got {:?}", other),
    }
    // Initial attempt plus two retries, then nothing further
    assert_eq!(
        transport.requested_offsets(),
        offsets(&[None, Some("10"), Some("10"), Some("10")])
    );
    assert_eq!(err.http_status(), 502);
}

#[tokio::test]
async fn test_retry_after_is_honored() {
    let (fetcher, transport, clock) = setup(50);
    transport.fail_times(None, Fault::rate_limited(Some("2")), 1);

    let result = fetcher.fetch_all(&template(), 100, 3).await.unwrap();

    assert_eq!(result.rows.len(), 50);
    assert_eq!(transport.requested_offsets(), offsets(&[None, None]));
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    assert!(clock.total_slept() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_rate_limit_without_retry_after_uses_backoff() {
    let (fetcher, transport, clock) = setup(5);
    transport.fail_times(None, Fault::rate_limited(None), 2);

    fetcher.fetch_all(&template(), 100, 3).await.unwrap();

    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(500), Duration::from_millis(1000)]
    );
}

#[tokio::test]
async fn test_malformed_page_aborts_without_retry() {
    let (fetcher, transport, _clock) = setup(30);
    transport.fail_always(
        Some("10"),
        Fault::Respond(RawResponse::new(200, br#"{"count": 30, "next": null}"#.to_vec())),
    );

    let err = fetcher.fetch_all(&template(), 10, 3).await.unwrap_err();

    assert!(matches!(err.root_cause(), Error::MalformedResponse(_)));
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn test_malformed_next_reference_ends_traversal() {
    let body = serde_json::json!({
        "count": 99,
        "next": "not a url",
        "previous": null,
        "results": [{"id": 1}, {"id": 2}],
    });
    let (fetcher, transport, _clock) = setup(0);
    transport.fail_always(None, Fault::Respond(RawResponse::new(200, body.to_string())));

    let result = fetcher.fetch_all(&template(), 2, 3).await.unwrap();

    assert_eq!(result.rows.len(), 2);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_repeated_offset_is_rejected() {
    let body = serde_json::json!({
        "count": 4,
        "next": "https://upstream.test/api/rows?offset=2",
        "previous": null,
        "results": [{"id": 1}, {"id": 2}],
    });
    let (fetcher, transport, _clock) = setup(0);
    transport.fail_always(Some("2"), Fault::Respond(RawResponse::new(200, body.to_string())));
    transport.fail_always(None, Fault::Respond(RawResponse::new(200, body.to_string())));

    let err = fetcher.fetch_all(&template(), 2, 0).await.unwrap_err();

    assert!(matches!(err, Error::Sync { pages_completed: 2, .. }));
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn test_job_tracks_failure() {
    let (fetcher, transport, _clock) = setup(20);
    transport.fail_always(Some("10"), Fault::server_error(502));
    let mut job = SyncJob::new(COLLECTION);

    let options = FetchOptions::default().with_page_size(10).with_max_retries(1);
    let result = fetcher.run(&mut job, &template(), &options).await;

    assert!(result.is_err());
    assert!(job.is_finished());
    assert!(matches!(job.phase, JobPhase::Failed { pages_completed: 1, .. }));
    assert_eq!(job.rows_collected, 10);
}
