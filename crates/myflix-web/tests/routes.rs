use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use async_trait::async_trait;
use myflix_core::cache::{CatalogCache, SnapshotFile};
use myflix_core::config::{AuthMode, ChannelRef};
use myflix_core::ratelimit::{RateLimits, SlidingWindowLimiter};
use myflix_core::source::{
    CatalogSource, ChannelClient, ChannelInfo, ChannelMessage, FileStream, Identity, MemberStatus,
    ScanPolicy, SourceError,
};
use myflix_core::testing::FakeChannel;
use myflix_web::{router, AppState, WebConfig};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn blob(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

fn channel() -> FakeChannel {
    FakeChannel::new()
        .with_piece_size(300)
        .with_video(
            10,
            "Title: Heat\nYear: 1995\nGenre: Crime, Drama\nRating: 8.3\nDescription: A heist film.",
            blob(1000),
        )
        .with_thumbnail(10, b"jpeg-bytes".to_vec())
        .with_video(11, "Title: Alien\nGenre: Sci-Fi", blob(64))
}

fn limits(default: u32, stream: u32, refresh: u32) -> RateLimits {
    RateLimits {
        enabled: true,
        default,
        stream,
        refresh,
    }
}

struct TestApp {
    router: Router,
    fake: Arc<FakeChannel>,
    dir: TempDir,
}

impl TestApp {
    fn new(fake: FakeChannel, limits: RateLimits) -> Self {
        let fake = Arc::new(fake);
        Self::with_client(fake.clone(), fake, limits)
    }

    fn with_client(client: Arc<dyn ChannelClient>, fake: Arc<FakeChannel>, limits: RateLimits) -> Self {
        let dir = TempDir::new().expect("temp dir");

        let source = CatalogSource::new(
            Arc::clone(&client),
            AuthMode::Bot,
            ChannelRef::Username("films".to_string()),
            ScanPolicy::default(),
        );
        let file = SnapshotFile::new(dir.path().join("cache/movies.json"), Duration::from_secs(3600));
        let state = AppState {
            catalog: Arc::new(CatalogCache::new(file, Arc::new(source))),
            client,
            limiter: Arc::new(SlidingWindowLimiter::default()),
            config: Arc::new(WebConfig {
                chunk_size: 128,
                temp_dir: dir.path().join("tmp"),
                max_temp_file_age: Duration::from_secs(3600),
                categories: vec!["Drama".to_string(), "Sci-Fi".to_string()],
                limits,
            }),
        };

        let router = router(state).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 7], 40000))));
        Self { router, fake, dir }
    }

    async fn get(&self, uri: &str) -> Response {
        self.get_with(uri, None).await
    }

    async fn get_with(&self, uri: &str, range: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }
        self.router
            .clone()
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec()
}

async fn json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn api_lists_and_finds_movies() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    let response = app.get("/api/movies").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["total"], 2);
    assert_eq!(body["movies"][0]["title"], "Heat");
    assert_eq!(body["movies"][0]["genre"][1], "Drama");

    let body = json(app.get("/api/movies/11").await).await;
    assert_eq!(body["movie"]["title"], "Alien");

    // Served from the cache after the first scan
    assert_eq!(app.fake.history_calls(), 1);
}

#[tokio::test]
async fn api_unknown_movie_is_404() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    for uri in ["/api/movies/999", "/api/movies/not-a-number"] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        let body = json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Movie not found");
    }
}

#[tokio::test]
async fn api_search() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    let response = app.get("/api/search?q=").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "Search query required");

    let body = json(app.get("/api/search?q=HEIST").await).await;
    assert_eq!(body["query"], "heist");
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["message_id"], 10);
}

#[tokio::test]
async fn refresh_rescans_the_channel() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    let body = json(app.get("/api/refresh").await).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Cache refreshed successfully");
    assert_eq!(body["total"], 2);

    app.get("/api/refresh").await;
    assert_eq!(app.fake.history_calls(), 2);
}

#[tokio::test]
async fn stream_serves_requested_range() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    let response = app.get_with("/stream/10", Some("bytes=100-199")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), Some("bytes 100-199/1000"));
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("100"));
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), Some("bytes"));
    assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("video/mp4"));

    assert_eq!(body_bytes(response).await, blob(1000)[100..200].to_vec());
    assert_eq!(app.fake.opened(), vec![("file-10".to_string(), 100)]);
}

#[tokio::test]
async fn stream_without_range_sends_whole_file() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    let response = app.get("/stream/11").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("64"));
    assert_eq!(body_bytes(response).await, blob(64));
}

#[tokio::test]
async fn stream_rejects_bad_ranges() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    let response = app.get_with("/stream/10", Some("bytes=5000-")).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), Some("bytes */1000"));

    let response = app.get_with("/stream/10", Some("frames=1-2")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/stream/404").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pages_render_catalog() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    let response = app.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(response).await).expect("utf-8");
    assert!(html.contains("Heat"));
    assert!(html.contains("/category/Sci-Fi"));

    let html = String::from_utf8(body_bytes(app.get("/watch/10").await).await).expect("utf-8");
    assert!(html.contains("src=\"/stream/10\""));
    assert!(html.contains("1h 30m"));

    let html = String::from_utf8(body_bytes(app.get("/category/Drama").await).await).expect("utf-8");
    assert!(html.contains("Heat"));
    assert!(!html.contains("Alien"));

    let response = app.get("/watch/999").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("text/html; charset=utf-8"));

    assert_eq!(app.get("/no/such/page").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn thumbnail_is_cached_in_temp_dir() {
    let app = TestApp::new(channel(), limits(100, 100, 100));

    let response = app.get("/thumbnail/10").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("image/jpeg"));
    assert_eq!(body_bytes(response).await, b"jpeg-bytes".to_vec());
    assert!(app.dir.path().join("tmp/thumb_10.jpg").exists());

    // Second hit comes from disk
    app.get("/thumbnail/10").await;
    let thumb_opens = app.fake.opened().iter().filter(|(id, _)| id == "thumb-10").count();
    assert_eq!(thumb_opens, 1);

    assert_eq!(app.get("/thumbnail/11").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fourth_request_over_cap_is_rejected() {
    let app = TestApp::new(channel(), limits(3, 100, 100));

    for _ in 0..3 {
        assert_eq!(app.get("/api/movies").await.status(), StatusCode::OK);
    }
    let response = app.get("/api/movies").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body = json(response).await;
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["message"], "Maximum 3 requests per minute");

    // Health checks are never limited
    assert_eq!(app.get("/health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_has_its_own_tighter_cap() {
    let app = TestApp::new(channel(), limits(30, 10, 2));

    assert_eq!(app.get("/api/refresh").await.status(), StatusCode::OK);
    assert_eq!(app.get("/api/refresh").await.status(), StatusCode::OK);
    assert_eq!(app.get("/api/refresh").await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(app.fake.history_calls(), 2);
}

#[tokio::test]
async fn disabled_limiter_lets_everything_through() {
    let mut off = limits(1, 1, 1);
    off.enabled = false;
    let app = TestApp::new(channel(), off);

    for _ in 0..5 {
        assert_eq!(app.get("/api/movies").await.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn health_reports_version() {
    let app = TestApp::new(FakeChannel::new(), limits(1, 1, 1));
    let body = json(app.get("/health").await).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

/// Lists the fake's catalog but blows up on every download.
struct BrokenDownloads(Arc<FakeChannel>);

#[async_trait]
impl ChannelClient for BrokenDownloads {
    async fn identity(&self) -> Result<Identity, SourceError> {
        self.0.identity().await
    }

    async fn channel(&self, channel: &ChannelRef) -> Result<ChannelInfo, SourceError> {
        self.0.channel(channel).await
    }

    async fn membership(&self, channel: &ChannelRef, user_id: u64) -> Result<MemberStatus, SourceError> {
        self.0.membership(channel, user_id).await
    }

    async fn history(&self, channel: &ChannelRef) -> Result<Vec<ChannelMessage>, SourceError> {
        self.0.history(channel).await
    }

    async fn open_file(&self, file_id: &str, _offset: u64) -> Result<FileStream, SourceError> {
        panic!("download of {file_id} exploded")
    }
}

#[tokio::test]
async fn handler_panic_becomes_500() {
    let fake = Arc::new(channel());
    let app = TestApp::with_client(Arc::new(BrokenDownloads(fake.clone())), fake, limits(100, 100, 100));

    let response = app.get("/stream/10").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // The server keeps answering afterwards
    assert_eq!(app.get("/api/movies/10").await.status(), StatusCode::OK);
}
