use axum::{
    debug_handler,
    extract::{OriginalUri, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub const USER_ID_HEADER: &str = "Monew-Request-User-ID";

const COMMENTS_PER_ARTICLE: usize = 42;
const DEFAULT_LIMIT: usize = 50;

/// A request observed by the comments endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRequest {
    pub path_and_query: String,
    pub user_id: Option<String>,
}

#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<ObservedRequest>>>);

impl RequestLog {
    fn push(&self, req: ObservedRequest) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(req);
    }

    pub fn requests(&self) -> Vec<ObservedRequest> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A running mock service bound to `addr`.
pub struct MockService {
    pub addr: SocketAddr,
    pub log: RequestLog,
}

impl MockService {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Builds the service's routes; comment requests are recorded into `log` when one is given.
pub fn router(log: Option<RequestLog>) -> Router {
    Router::new()
        .route("/api/comments", get(comments))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/status/:code", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(log)
}

/// Binds `addr` (port 0 for an ephemeral port) and serves in the background.
pub async fn spawn(addr: SocketAddr) -> anyhow::Result<MockService> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let log = RequestLog::default();

    let app = router(Some(log.clone()));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Mock service stopped: {e}");
        }
    });

    debug!("Mock service listening on {addr}");
    Ok(MockService { addr, log })
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(None)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentQuery {
    article_id: Option<String>,
    after: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub article_id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage {
    pub content: Vec<Comment>,
    pub next_after: Option<String>,
    pub size: usize,
    pub total_elements: usize,
    pub has_next: bool,
}

#[debug_handler]
async fn comments(
    State(log): State<Option<RequestLog>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<CommentQuery>,
) -> Result<Json<CursorPage>, (StatusCode, &'static str)> {
    if let Some(log) = log {
        log.push(ObservedRequest {
            path_and_query: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default(),
            user_id: headers
                .get(USER_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
    }

    let Some(article_id) = query.article_id else {
        return Err((StatusCode::BAD_REQUEST, "articleId is required"));
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);

    // An empty cursor is the same as no cursor.
    let after = query.after.filter(|after| !after.is_empty());
    let remaining: Vec<Comment> = (0..COMMENTS_PER_ARTICLE)
        .map(|i| Comment {
            id: format!("{article_id}-{i}"),
            article_id: article_id.clone(),
            content: format!("comment {i}"),
            created_at: format!("2024-01-01T00:00:{i:02}Z"),
        })
        .filter(|c| after.as_deref().map_or(true, |after| c.created_at.as_str() > after))
        .collect();

    let has_next = remaining.len() > limit;
    let content: Vec<Comment> = remaining.into_iter().take(limit).collect();

    Ok(Json(CursorPage {
        next_after: content.last().map(|c| c.created_at.clone()),
        size: content.len(),
        total_elements: COMMENTS_PER_ARTICLE,
        has_next,
        content,
    }))
}

#[debug_handler]
async fn delay(Path(delay_ms): Path<u64>) {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

#[debug_handler]
async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Uri;

    fn query(article_id: &str) -> Query<CommentQuery> {
        Query(CommentQuery {
            article_id: Some(article_id.to_string()),
            after: None,
            limit: Some(5),
        })
    }

    #[tokio::test]
    async fn records_only_into_a_given_log() {
        let uri: Uri = "/api/comments?articleId=a&limit=5".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, "user-1".parse().unwrap());

        let page = comments(
            State(None),
            OriginalUri(uri.clone()),
            headers.clone(),
            query("a"),
        )
        .await
        .unwrap();
        assert_eq!(page.size, 5);
        assert!(page.has_next);

        let log = RequestLog::default();
        comments(State(Some(log.clone())), OriginalUri(uri), headers, query("a"))
            .await
            .unwrap();
        assert_eq!(
            log.requests(),
            vec![ObservedRequest {
                path_and_query: "/api/comments?articleId=a&limit=5".to_string(),
                user_id: Some("user-1".to_string()),
            }]
        );
    }
}
