mod utils;
#[allow(unused)]
use utils::*;

use mock_service::{CursorPage, USER_ID_HEADER};
use stampede::prelude::*;
use std::time::Duration;

const USER_ID: &str = "11111111-2222-3333-4444-555555555555";

#[scenario]
async fn list_comments(ctx: IterationContext) -> IterationResult {
    let res = ctx
        .http()
        .send(
            RequestSpec::get("/api/comments")
                .header(USER_ID_HEADER, USER_ID)
                .param("articleId", "aaa")
                .optional_param("after", None)
                .param("limit", "20"),
        )
        .await?;

    ctx.check("status is 200", || res.status == 200);

    let page: CursorPage = serde_json::from_slice(&res.body)?;
    ctx.check("full page", || page.size == 20 && page.has_next);
    Ok(())
}

/// Follows the cursor through every page of an article's comments.
#[scenario]
async fn page_through_comments(ctx: IterationContext) -> IterationResult {
    let mut after: Option<String> = None;
    let mut seen = 0;

    loop {
        let res = ctx
            .http()
            .send(
                RequestSpec::get("/api/comments")
                    .param("articleId", format!("article-{}", ctx.vu()))
                    .optional_param("after", after.as_deref())
                    .param("limit", "10")
                    .label("page comments"),
            )
            .await?;

        let page: CursorPage = serde_json::from_slice(&res.body)?;
        seen += page.size;
        if !page.has_next {
            break;
        }
        after = page.next_after;
    }

    ctx.check("saw every comment", || seen == 42);
    Ok(())
}

#[scenario]
async fn missing_article_id(ctx: IterationContext) -> IterationResult {
    let res = ctx.http().get("/api/comments").await?;
    ctx.check("status is 200", || res.status == 200);
    Ok(())
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn comments_round_trip() {
    let mock = mock().await;

    let summary = list_comments()
        .base_url(&mock.url())
        .stage(Duration::ZERO, 2)
        .stage(Duration::from_secs(1), 2)
        .tick(Duration::from_millis(100))
        .think_time(Duration::from_millis(50))
        .threshold(Threshold::check("status is 200", 1.))
        .await
        .unwrap();

    assert!(summary.passed(), "{summary}");
    assert_eq!(summary.peak_vus, 2);
    assert!(summary.iterations > 0);
    assert_eq!(summary.failed_iterations, 0);
    assert_eq!(summary.network_errors, 0);
    assert_eq!(summary.assertion_failures(), 0);
    assert_eq!(summary.checks["status is 200"].passes, summary.iterations);

    let requests = &summary.requests["GET /api/comments"];
    assert_eq!(requests.count, summary.iterations);
    assert_eq!(requests.statuses[&200], summary.iterations);
    assert!(requests.min <= requests.p50 && requests.p50 <= requests.max);

    let observed = mock.log.requests();
    assert_eq!(observed.len() as u64, summary.iterations);
    for req in observed {
        assert_eq!(req.path_and_query, "/api/comments?articleId=aaa&limit=20");
        assert_eq!(req.user_id.as_deref(), Some(USER_ID));
    }
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn cursor_pagination() {
    let mock = mock().await;

    let summary = page_through_comments()
        .base_url(&mock.url())
        .stage(Duration::ZERO, 3)
        .stage(Duration::from_millis(500), 3)
        .tick(Duration::from_millis(100))
        .think_time(ThinkTime::Uniform {
            min: Duration::from_millis(10),
            max: Duration::from_millis(50),
        })
        .threshold(Threshold::all_checks(1.))
        .await
        .unwrap();

    assert!(summary.passed(), "{summary}");
    assert!(summary.checks["saw every comment"].passes > 0);

    // 42 comments at 10 per page
    let pages = &summary.requests["page comments"];
    assert_eq!(pages.count, summary.iterations * 5);

    let observed = mock.log.requests();
    assert!(observed
        .iter()
        .any(|r| r.path_and_query.contains("&after=2024-01-01T00%3A00%3A09Z&")));
    assert!(observed.iter().all(|r| r.user_id.is_none()));
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn client_errors_breach_thresholds() {
    let mock = mock().await;

    let summary = missing_article_id()
        .base_url(&mock.url())
        .stage(Duration::ZERO, 1)
        .stage(Duration::from_millis(500), 1)
        .think_time(Duration::from_millis(50))
        .threshold(Threshold::check("status is 200", 0.5))
        .await
        .unwrap();

    assert!(!summary.passed());
    assert_eq!(summary.breaches[0].pass_rate, Some(0.));
    assert_eq!(summary.failed_iterations, 0);
    assert!(summary.requests["GET /api/comments"].statuses[&400] > 0);
    assert!(summary.to_string().contains("threshold breached"));
}
