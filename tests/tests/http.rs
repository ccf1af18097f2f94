mod utils;
#[allow(unused)]
use utils::*;

use stampede::prelude::*;
use stampede::{HttpClient, NetworkError};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

#[tokio::test]
#[ntest::timeout(10_000)]
async fn server_sees_exact_query() {
    let mock = mock().await;
    let client = HttpClient::builder().base_url(&mock.url()).build().unwrap();

    let res = client
        .send(
            RequestSpec::get("/api/comments")
                .param("articleId", "aaa")
                .param("limit", "20"),
        )
        .await
        .unwrap();

    assert_eq!(res.status, 200);
    assert!(res.is_success());
    assert!(res.body_size() > 0);
    assert!(res.finished >= res.started);
    assert_eq!(res.label, "GET /api/comments");

    let observed = mock.log.requests();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].path_and_query, "/api/comments?articleId=aaa&limit=20");
}

#[tokio::test]
#[ntest::timeout(10_000)]
async fn encodes_query_values() {
    let mock = mock().await;
    let client = HttpClient::builder()
        .base_url(&mock.url())
        .header("Monew-Request-User-ID", "user 1")
        .build()
        .unwrap();

    let res = client
        .send(
            RequestSpec::get("/api/comments")
                .param("articleId", "a&b c")
                .optional_param("after", Some(""))
                .optional_param("cursor", None),
        )
        .await
        .unwrap();
    assert_eq!(res.status, 200);

    let observed = mock.log.requests();
    assert_eq!(
        observed[0].path_and_query,
        "/api/comments?articleId=a%26b%20c&after="
    );
    assert_eq!(observed[0].user_id.as_deref(), Some("user 1"));
}

#[tokio::test]
#[ntest::timeout(10_000)]
async fn error_statuses_are_data() {
    let mock = mock().await;
    let client = HttpClient::builder().base_url(&mock.url()).build().unwrap();

    let res = client.get("/status/503").await.unwrap();
    assert_eq!(res.status, 503);
    assert!(!res.is_success());

    let res = client.get("/api/comments").await.unwrap();
    assert_eq!(res.status, 400);
    assert_eq!(res.text(), "articleId is required");
}

#[tokio::test]
#[ntest::timeout(10_000)]
async fn connect_failure_is_a_network_error() {
    let addr = closed_port().await;
    let client = HttpClient::builder()
        .base_url(&format!("http://{addr}"))
        .build()
        .unwrap();

    let err = client.get("/api/comments").await.unwrap_err();
    assert!(matches!(err, NetworkError::Connect { .. }), "{err:?}");
}

#[tokio::test]
#[ntest::timeout(10_000)]
async fn slow_response_times_out() {
    let mock = mock().await;
    let client = HttpClient::builder()
        .base_url(&mock.url())
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let err = client.get("/delay/ms/2000").await.unwrap_err();
    assert!(matches!(err, NetworkError::Timeout { .. }), "{err:?}");

    let res = client.get("/delay/ms/1").await.unwrap();
    assert_eq!(res.status, 200);
}

#[scenario]
async fn unreachable(ctx: IterationContext) -> IterationResult {
    ctx.http().get("/api/comments").await?;
    ctx.check("reached", || true);
    Ok(())
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn network_errors_are_counted() {
    let addr = closed_port().await;

    let summary = unreachable()
        .base_url(&format!("http://{addr}"))
        .stage(Duration::ZERO, 2)
        .stage(Duration::from_millis(500), 2)
        .think_time(Duration::from_millis(50))
        .await
        .unwrap();

    // No thresholds means any failure is allowed.
    assert!(summary.passed());
    assert!(summary.network_errors > 0);
    assert_eq!(summary.network_errors, summary.failed_iterations);
    assert_eq!(summary.failed_iterations, summary.iterations);
    assert!(summary.checks.is_empty());
    assert!(summary.requests.is_empty());
}

#[scenario]
async fn fast_requests(ctx: IterationContext) -> IterationResult {
    ctx.http().get("/delay/ms/0").await?;
    Ok(())
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn request_rate_is_capped() {
    let mock = mock().await;

    let started = Instant::now();
    let summary = fast_requests()
        .base_url(&mock.url())
        .stage(Duration::ZERO, 4)
        .stage(Duration::from_secs(2), 4)
        .tick(Duration::from_millis(100))
        .max_rps(NonZeroU32::new(20).unwrap())
        .await
        .unwrap();
    let elapsed = started.elapsed().as_secs_f64();

    let sent = summary.requests["GET /delay/ms/0"].count;
    assert!(sent > 10);
    assert!(
        sent as f64 <= 20. * elapsed + 2.,
        "{sent} requests in {elapsed:.2}s"
    );
}
