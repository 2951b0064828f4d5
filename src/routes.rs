use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::db::{Database, Headline};
use crate::error::AppError;
use crate::fetcher::Fetcher;
use crate::service::NewsService;

const MAX_PAGE_SIZE: i64 = 50;

pub struct AppState {
    pub db: Arc<Database>,
    pub fetcher: Arc<Fetcher>,
    pub service: Arc<NewsService>,
    /// Headlines per page on the HTML feed
    pub headline_limit: i64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/feed/more", get(feed_more))
        .route("/api/headlines", get(api_headlines))
        .route("/api/headlines/:id", get(api_headline))
        .route("/api/cartoon", post(api_cartoon))
        .route("/api/explain", post(api_explain))
        .route("/api/tts", post(api_tts))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A headline flattened for the templates.
pub struct HeadlineView {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published: String,
}

impl From<Headline> for HeadlineView {
    fn from(h: Headline) -> Self {
        let published = h
            .published
            .as_deref()
            .and_then(|p| chrono::DateTime::parse_from_rfc3339(p).ok())
            .map(|p| p.format("%b %-d, %H:%M").to_string())
            .unwrap_or_default();
        Self {
            id: h.id,
            title: h.title,
            url: h.url,
            source: h.source.unwrap_or_default(),
            published,
        }
    }
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub headlines: Vec<HeadlineView>,
    pub next_offset: i64,
    pub has_more: bool,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "feed_items.html")]
pub struct FeedItemsTemplate {
    pub headlines: Vec<HeadlineView>,
    pub next_offset: i64,
    pub has_more: bool,
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

/// One page of headlines plus whether another page follows.
async fn headline_page(
    db: &Database,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Headline>, bool), AppError> {
    let headlines = db.get_latest_headlines(limit, offset).await?;
    let total = db.count_headlines().await?;
    Ok((headlines, offset.saturating_add(limit) < total))
}

// Route handlers
pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let limit = state.headline_limit;
    let (headlines, has_more) = headline_page(&state.db, limit, 0).await?;

    Ok(HtmlTemplate(IndexTemplate {
        headlines: headlines.into_iter().map(HeadlineView::from).collect(),
        next_offset: limit,
        has_more,
        refreshing: state.fetcher.is_refreshing().await,
    }))
}

#[derive(Deserialize)]
pub struct MoreQuery {
    #[serde(default)]
    pub offset: i64,
}

pub async fn feed_more(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MoreQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = state.headline_limit;
    let offset = query.offset.max(0);
    let (headlines, has_more) = headline_page(&state.db, limit, offset).await?;

    Ok(HtmlTemplate(FeedItemsTemplate {
        headlines: headlines.into_iter().map(HeadlineView::from).collect(),
        next_offset: offset.saturating_add(limit),
        has_more,
    }))
}

#[derive(Deserialize)]
pub struct HeadlinesQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Serialize)]
pub struct HeadlinesResponse {
    pub headlines: Vec<Headline>,
    pub has_more: bool,
    pub next_offset: i64,
}

pub async fn api_headlines(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HeadlinesQuery>,
) -> Result<Json<HeadlinesResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or(state.headline_limit)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.max(0);
    let (headlines, has_more) = headline_page(&state.db, limit, offset).await?;

    Ok(Json(HeadlinesResponse {
        headlines,
        has_more,
        next_offset: offset.saturating_add(limit),
    }))
}

pub async fn api_headline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Headline>, AppError> {
    state
        .db
        .get_headline(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("headline {}", id)))
}

#[derive(Deserialize)]
pub struct HeadlineRequest {
    pub headline: String,
}

#[derive(Serialize)]
pub struct CartoonResponse {
    pub image_url: String,
    pub cached: bool,
}

#[derive(Serialize)]
pub struct ExplainResponse {
    pub explanation: String,
    pub cached: bool,
}

#[derive(Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: Option<String>,
}

pub async fn api_cartoon(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HeadlineRequest>,
) -> Result<Json<CartoonResponse>, AppError> {
    let cartoon = state.service.cartoon_for(&request.headline).await?;
    Ok(Json(CartoonResponse {
        image_url: cartoon.value,
        cached: cartoon.cached,
    }))
}

pub async fn api_explain(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HeadlineRequest>,
) -> Result<Json<ExplainResponse>, AppError> {
    let explanation = state.service.explanation_for(&request.headline).await?;
    Ok(Json(ExplainResponse {
        explanation: explanation.value,
        cached: explanation.cached,
    }))
}

pub async fn api_tts(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpeechRequest>,
) -> Result<Response, AppError> {
    let speech = state
        .service
        .speech_for(&request.text, request.voice_id.as_deref())
        .await?;
    let cache = if speech.cached { "hit" } else { "miss" };

    Ok((
        [
            (header::CONTENT_TYPE, speech.value.content_type),
            (HeaderName::from_static("x-cache"), cache.to_string()),
        ],
        speech.value.audio,
    )
        .into_response())
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    // Spawn the refresh task
    let fetcher = state.fetcher.clone();
    tokio::spawn(async move {
        if let Err(e) = fetcher.refresh_all_feeds().await {
            tracing::error!("Manual refresh failed: {}", e);
        }
    });

    // Return refreshing state immediately
    Ok(HtmlTemplate(RefreshButtonTemplate { refreshing: true }))
}

pub async fn refresh_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let refreshing = state.fetcher.is_refreshing().await;
    Ok(HtmlTemplate(RefreshButtonTemplate { refreshing }))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FeedConfig, FilterConfig, Secrets};
    use crate::db::NewHeadline;
    use crate::filter::HeadlineFilter;
    use crate::retry::RetryPolicy;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn create_test_app(upstream: &str) -> (Router, Arc<Database>) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        let db = Arc::new(db);

        let config = Config::from_str(&format!(
            r#"
            headline_limit = 5
            feeds = []

            [openai]
            base_url = "{uri}"

            [replicate]
            base_url = "{uri}"
            model_version = "owner/model"

            [elevenlabs]
            base_url = "{uri}"

            [retry]
            attempts = 1
            "#,
            uri = upstream
        ))
        .unwrap();
        let secrets = Secrets {
            openai_api_key: Some("sk-test".to_string()),
            replicate_api_token: Some("r8-test".to_string()),
            elevenlabs_api_key: Some("el-test".to_string()),
        };

        let filter = HeadlineFilter::new(&FilterConfig::default(), config.max_age_hours).unwrap();
        let fetcher = Arc::new(Fetcher::new(db.clone(), filter, RetryPolicy::none()).unwrap());
        let service = Arc::new(NewsService::new(db.clone(), &config, secrets).unwrap());
        let state = Arc::new(AppState {
            db: db.clone(),
            fetcher,
            service,
            headline_limit: config.headline_limit,
        });

        (router(state), db)
    }

    async fn setup_test_data(db: &Database, count: i64) {
        db.sync_feeds(&[FeedConfig {
            name: "Top Stories".to_string(),
            url: "https://news.google.com/rss".to_string(),
        }])
        .await
        .unwrap();
        let feed_id = db.get_all_feeds().await.unwrap()[0].id;

        for i in 1..=count {
            let headline = NewHeadline {
                title: format!("Story number {}", i),
                url: format!("https://example.com/story-{}", i),
                source: Some("Reuters".to_string()),
                published: Some(chrono::Utc::now() - chrono::Duration::minutes(count - i)),
            };
            db.upsert_headline(feed_id, &headline).await.unwrap();
        }
    }

    async fn body_string(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    mod health_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_endpoint() {
            let (app, _db) = create_test_app("http://localhost:1").await;

            let response = app
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, "OK");
        }
    }

    mod index_tests {
        use super::*;

        #[tokio::test]
        async fn test_index_empty() {
            let (app, _db) = create_test_app("http://localhost:1").await;

            let response = app
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn test_index_shows_newest_page() {
            let (app, db) = create_test_app("http://localhost:1").await;
            setup_test_data(&db, 8).await;

            let response = app
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();

            let body = body_string(response).await;
            assert!(body.contains("Story number 8"));
            assert!(body.contains("Story number 4"));
            assert!(!body.contains("Story number 3"));
            assert!(body.contains("Reuters"));
            // 8 headlines with a page size of 5
            assert!(body.contains("Show More"));
        }

        #[tokio::test]
        async fn test_index_without_more() {
            let (app, db) = create_test_app("http://localhost:1").await;
            setup_test_data(&db, 3).await;

            let response = app
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();

            let body = body_string(response).await;
            assert!(!body.contains("Show More"));
        }
    }

    mod feed_more_tests {
        use super::*;

        #[tokio::test]
        async fn test_feed_more_returns_next_page() {
            let (app, db) = create_test_app("http://localhost:1").await;
            setup_test_data(&db, 8).await;

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/feed/more?offset=5")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = body_string(response).await;
            assert!(body.contains("Story number 3"));
            assert!(body.contains("Story number 1"));
            assert!(!body.contains("Story number 8"));
            assert!(!body.contains("Show More"));
        }

        #[tokio::test]
        async fn test_feed_more_past_end() {
            let (app, db) = create_test_app("http://localhost:1").await;
            setup_test_data(&db, 2).await;

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/feed/more?offset=50")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(!body_string(response).await.contains("Story number"));
        }

        #[tokio::test]
        async fn test_feed_more_huge_offset() {
            let (app, db) = create_test_app("http://localhost:1").await;
            setup_test_data(&db, 2).await;

            let response = app
                .oneshot(
                    Request::builder()
                        .uri(format!("/feed/more?offset={}", i64::MAX))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(!body_string(response).await.contains("Show More"));
        }
    }

    mod api_headlines_tests {
        use super::*;

        #[tokio::test]
        async fn test_api_headlines_paginates() {
            let (app, db) = create_test_app("http://localhost:1").await;
            setup_test_data(&db, 8).await;

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/api/headlines?limit=3&offset=0")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(json["headlines"].as_array().unwrap().len(), 3);
            assert_eq!(json["headlines"][0]["title"], "Story number 8");
            assert_eq!(json["has_more"], true);
            assert_eq!(json["next_offset"], 3);
            assert!(json["headlines"][0].get("title_key").is_none());
        }

        #[tokio::test]
        async fn test_api_headlines_clamps_limit() {
            let (app, db) = create_test_app("http://localhost:1").await;
            setup_test_data(&db, 2).await;

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/api/headlines?limit=0")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(json["headlines"].as_array().unwrap().len(), 1);
            assert_eq!(json["next_offset"], 1);
        }

        #[tokio::test]
        async fn test_api_headlines_huge_offset() {
            let (app, db) = create_test_app("http://localhost:1").await;
            setup_test_data(&db, 2).await;

            let response = app
                .oneshot(
                    Request::builder()
                        .uri(format!("/api/headlines?offset={}", i64::MAX))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert!(json["headlines"].as_array().unwrap().is_empty());
            assert_eq!(json["has_more"], false);
            assert_eq!(json["next_offset"], i64::MAX);
        }

        #[tokio::test]
        async fn test_api_headline_not_found() {
            let (app, _db) = create_test_app("http://localhost:1").await;

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/api/headlines/999")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    mod generation_tests {
        use super::*;

        #[tokio::test]
        async fn test_explain_endpoint() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/chat/completions"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "choices": [{ "message": { "content": "A big storm is coming." } }]
                })))
                .expect(1)
                .mount(&server)
                .await;

            let (app, _db) = create_test_app(&server.uri()).await;

            let first = app
                .clone()
                .oneshot(post_json("/api/explain", json!({ "headline": "Hurricane nears coast" })))
                .await
                .unwrap();
            assert_eq!(first.status(), StatusCode::OK);
            let json: Value = serde_json::from_str(&body_string(first).await).unwrap();
            assert_eq!(json["explanation"], "A big storm is coming.");
            assert_eq!(json["cached"], false);

            let second = app
                .oneshot(post_json("/api/explain", json!({ "headline": "Hurricane nears coast" })))
                .await
                .unwrap();
            let json: Value = serde_json::from_str(&body_string(second).await).unwrap();
            assert_eq!(json["cached"], true);
        }

        #[tokio::test]
        async fn test_cartoon_endpoint() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/models/owner/model/predictions"))
                .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                    "id": "p1", "status": "succeeded", "output": ["https://img/p1.png"]
                })))
                .mount(&server)
                .await;

            let (app, _db) = create_test_app(&server.uri()).await;

            let response = app
                .oneshot(post_json("/api/cartoon", json!({ "headline": "Pandas play" })))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(json["image_url"], "https://img/p1.png");
            assert_eq!(json["cached"], false);
        }

        #[tokio::test]
        async fn test_cartoon_empty_headline() {
            let (app, _db) = create_test_app("http://localhost:1").await;

            let response = app
                .oneshot(post_json("/api/cartoon", json!({ "headline": "" })))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
            assert!(json["error"].as_str().unwrap().contains("headline"));
        }

        #[tokio::test]
        async fn test_upstream_failure_is_bad_gateway() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
                .mount(&server)
                .await;

            let (app, _db) = create_test_app(&server.uri()).await;

            let response = app
                .oneshot(post_json("/api/explain", json!({ "headline": "Anything" })))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        }

        #[tokio::test]
        async fn test_tts_endpoint_sets_headers() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/text-to-speech/voice-1"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", "audio/mpeg")
                        .set_body_bytes(vec![1, 2, 3]),
                )
                .expect(1)
                .mount(&server)
                .await;

            let (app, _db) = create_test_app(&server.uri()).await;

            let request = || post_json("/api/tts", json!({ "text": "Hello", "voice_id": "voice-1" }));

            let first = app.clone().oneshot(request()).await.unwrap();
            assert_eq!(first.status(), StatusCode::OK);
            assert_eq!(first.headers()["content-type"], "audio/mpeg");
            assert_eq!(first.headers()["x-cache"], "miss");
            let body = first.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], &[1, 2, 3]);

            let second = app.oneshot(request()).await.unwrap();
            assert_eq!(second.headers()["x-cache"], "hit");
        }
    }

    mod refresh_tests {
        use super::*;

        #[tokio::test]
        async fn test_refresh_endpoint() {
            let (app, _db) = create_test_app("http://localhost:1").await;

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/refresh")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_string(response).await.contains("Refreshing"));
        }

        #[tokio::test]
        async fn test_refresh_status_idle() {
            let (app, _db) = create_test_app("http://localhost:1").await;

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/refresh/status")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(!body_string(response).await.contains("Refreshing"));
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_more_query_default_offset() {
            let query: MoreQuery = serde_urlencoded::from_str("").unwrap();
            assert_eq!(query.offset, 0);
        }

        #[test]
        fn test_headlines_query_optional_limit() {
            let query: HeadlinesQuery = serde_urlencoded::from_str("offset=10").unwrap();
            assert_eq!(query.limit, None);
            assert_eq!(query.offset, 10);
        }
    }
}
