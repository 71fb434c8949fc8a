//! Axum router configuration

use axum::{
    http::{header, Method},
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{
    cache_stats, health_check, index, metrics, movie_id_required, movie_sources, not_found,
    provider_stats, tv_id_required, tv_sources,
};
use super::middleware::request_logger;
use super::proxy::{hls_proxy, m3u8_proxy, proxy_status, sub_proxy, ts_proxy};

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    // Players load manifests and segments cross-origin and send Range.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::RANGE,
            header::CONTENT_TYPE,
            header::ORIGIN,
        ])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::CONTENT_TYPE,
            header::CACHE_CONTROL,
        ])
        .allow_private_network(true)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/", get(index))
        // Source lookup
        .route("/movie/{tmdb_id}", get(movie_sources))
        .route("/tv/{tmdb_id}", get(tv_sources))
        .route("/movie", get(movie_id_required))
        .route("/movie/", get(movie_id_required))
        .route("/tv", get(tv_id_required))
        .route("/tv/", get(tv_id_required))
        // Proxies
        .route("/m3u8-proxy", get(m3u8_proxy))
        .route("/proxy/hls", get(hls_proxy))
        .route("/ts-proxy", get(ts_proxy))
        .route("/sub-proxy", get(sub_proxy))
        .route("/proxy/status", get(proxy_status))
        // Introspection
        .route("/provider-stats", get(provider_stats))
        .route("/debug/cache", get(cache_stats))
        .route("/metrics", get(metrics))
        .route("/health", get(health_check))
        .fallback(not_found)
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), request_logger))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use media_relay_lib::{
        FileSource, MediaRequest, Provider, ProviderError, ProviderResult, RegisteredProvider,
        SubtitleTrack,
    };
    use tower::util::ServiceExt;

    /// Returns a fixed file list, or nothing for tmdb id 0.
    #[derive(Debug)]
    struct FixedProvider;

    #[async_trait::async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch_sources(&self, request: &MediaRequest) -> Result<ProviderResult, ProviderError> {
            let mut result = ProviderResult::new("fixed");
            if request.tmdb_id == 0 {
                return Ok(result);
            }
            result.files.push(FileSource::new(
                "fixed",
                format!("https://cdn.example/{}/master.m3u8", request.tmdb_id),
            ));
            result.files.push(FileSource::new("fixed", "https://cdn.example/direct.mp4"));
            result
                .subtitles
                .push(SubtitleTrack::new("https://subs.example/en.vtt", "en"));
            Ok(result)
        }
    }

    fn app_with(config: ServerConfig) -> (Router, Arc<AppState>) {
        let providers = vec![RegisteredProvider::content(Arc::new(FixedProvider))];
        let state = Arc::new(AppState::with_providers(config, providers).unwrap());
        (create_router(state.clone()), state)
    }

    fn app() -> Router {
        app_with(ServerConfig::default()).0
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "relay.test")
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text_body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_index() {
        let response = app().oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["routes"]["movie"], "/movie/:tmdbId");
    }

    #[tokio::test]
    async fn test_movie_sources_are_wrapped() {
        let response = app().oneshot(get_req("/movie/155")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0]["url"]
            .as_str()
            .unwrap()
            .starts_with("http://relay.test/m3u8-proxy?url=https%3A%2F%2Fcdn.example%2F155%2Fmaster.m3u8"));
        assert!(files[1]["url"]
            .as_str()
            .unwrap()
            .starts_with("http://relay.test/ts-proxy?url="));
        assert!(body["subtitles"][0]["url"]
            .as_str()
            .unwrap()
            .starts_with("http://relay.test/sub-proxy?url="));
    }

    #[tokio::test]
    async fn test_wrapping_can_be_disabled() {
        let (app, _) = app_with(ServerConfig {
            wrap_sources: false,
            ..Default::default()
        });
        let response = app.oneshot(get_req("/movie/155")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["files"][0]["url"], "https://cdn.example/155/master.m3u8");
    }

    #[tokio::test]
    async fn test_no_sources_is_404() {
        let response = app().oneshot(get_req("/movie/0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Did not find any sources for this one :(");
        assert!(body["hint"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_ids_are_405() {
        for uri in ["/movie/abc", "/movie/", "/tv/", "/tv/1399?s=1", "/tv/1399?s=x&e=1"] {
            let response = app().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{}", uri);
            let body = json_body(response).await;
            assert!(body["error"].is_string(), "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_tv_lookup() {
        let response = app().oneshot(get_req("/tv/1399?s=1&e=2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_json() {
        let response = app().oneshot(get_req("/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Not found");
        assert_eq!(body["hint"], "Go to /");
    }

    #[tokio::test]
    async fn test_proxy_params_required() {
        let cases = [
            ("/m3u8-proxy", "URL parameter required"),
            ("/ts-proxy", "URL parameter required"),
            ("/proxy/hls", "Link parameter is required"),
            ("/sub-proxy", "url parameter required"),
        ];
        for (uri, message) in cases {
            let response = app().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            let body = json_body(response).await;
            assert_eq!(body["error"], message);
        }
    }

    #[tokio::test]
    async fn test_disabled_segment_proxy() {
        let (app, _) = app_with(ServerConfig {
            disable_segment_proxy: true,
            ..Default::default()
        });
        let response = app
            .oneshot(get_req("/ts-proxy?url=https%3A%2F%2Fcdn.example%2Fa.ts"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text_body(response).await, "TS proxying is disabled");
    }

    #[tokio::test]
    async fn test_relative_manifest_url_is_400() {
        let response = app().oneshot(get_req("/m3u8-proxy?url=index.m3u8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_proxy_status() {
        let request = Request::builder()
            .uri("/proxy/status")
            .header(header::USER_AGENT, "test-agent/1.0")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"], "Proxy server is working");
        assert_eq!(body["userAgent"], "test-agent/1.0");
    }

    #[tokio::test]
    async fn test_provider_stats_and_metrics() {
        let (app, _) = app_with(ServerConfig::default());
        app.clone().oneshot(get_req("/movie/155")).await.unwrap();

        let response = app.clone().oneshot(get_req("/provider-stats")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["providers"][0]["providerName"], "fixed");
        assert_eq!(body["providers"][0]["successCount"], 1);

        let response = app.clone().oneshot(get_req("/debug/cache")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["response"]["entry_count"], 1);

        let response = app.oneshot(get_req("/metrics")).await.unwrap();
        let text = text_body(response).await;
        assert!(text.contains("media_relay_requests_by_endpoint{endpoint=\"/movie/{tmdb_id}\"} 1"));
        assert!(text.contains("media_relay_aggregations_total 1"));
    }

    #[tokio::test]
    async fn test_segment_proxy_round_trip() {
        let upstream = Router::new().route(
            "/seg.ts",
            get(|| async { ([(header::CONTENT_TYPE, "video/mp2t")], vec![9u8; 4096]) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });

        let (app, state) = app_with(ServerConfig::default());
        let uri = format!("/ts-proxy?url=http%3A%2F%2F{}%2Fseg.ts", addr);

        let first = app.clone().oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-cache"], "MISS");
        let bytes = to_bytes(first.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), 4096);
        // the miss was streamed; its bytes still count
        assert!(state
            .metrics
            .export_prometheus()
            .contains("media_relay_bytes_served_total 4096"));

        let second = app.clone().oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(second.headers()["x-cache"], "HIT");
        assert_eq!(second.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let request = Request::builder()
            .uri(&uri)
            .header(header::RANGE, "bytes=0-99")
            .body(Body::empty())
            .unwrap();
        let partial = app.oneshot(request).await.unwrap();
        assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(partial.headers()[header::CONTENT_RANGE], "bytes 0-99/4096");

        assert_eq!(state.segment_cache.len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_status_is_propagated() {
        let upstream = Router::new().route(
            "/gone.ts",
            get(|| async { StatusCode::GONE }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });

        let uri = format!("/ts-proxy?url=http%3A%2F%2F{}%2Fgone.ts", addr);
        let response = app().oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_silent_segment_upstream_is_a_server_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let (app, state) = app_with(ServerConfig {
            segment_idle_timeout_secs: 1,
            ..Default::default()
        });
        let uri = format!("/ts-proxy?url=http%3A%2F%2F{}%2Fseg.ts", addr);
        let response = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            app.oneshot(get_req(&uri)),
        )
        .await
        .expect("segment proxy must not hang on a silent upstream")
        .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(text_body(response).await.starts_with("Proxy error:"));
        assert!(state
            .metrics
            .export_prometheus()
            .contains("media_relay_errors_total{type=\"upstream_unreachable\"} 1"));
    }

    #[tokio::test]
    async fn test_cors_options() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/ts-proxy")
            .header(header::ORIGIN, "http://localhost:8080")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "range")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
