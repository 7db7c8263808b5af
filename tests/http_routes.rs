mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{server_with, test_config, test_server, ScriptedEngine};
use webserve::create_router;

async fn get(server: &Arc<webserve::Server>, uri: &str) -> (StatusCode, String, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = create_router(server.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

fn server() -> Arc<webserve::Server> {
    test_server(Arc::new(ScriptedEngine::default()))
}

// -- Static assets --

#[tokio::test]
async fn static_routes_serve_loaded_assets() {
    let server = server();
    let cases = [
        ("/", "index.html", "text/html; charset=utf-8"),
        ("/main.css", "main.css", "text/css; charset=utf-8"),
        ("/display.js", "display.js", "application/javascript"),
        ("/stream.js", "stream.js", "application/javascript"),
    ];

    for (uri, file, expected_type) in cases {
        let (status, content_type, body) = get(&server, uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(content_type, expected_type, "{uri}");
        assert_eq!(body, server.assets().file(file), "{uri}");
    }
}

#[tokio::test]
async fn static_content_is_stable_across_requests() {
    let server = server();
    let (_, _, first) = get(&server, "/stream.js").await;
    for _ in 0..5 {
        let (_, _, again) = get(&server, "/stream.js").await;
        assert_eq!(again, first);
    }
}

// -- Generated responses --

#[tokio::test]
async fn version_is_plain_text() {
    let (status, content_type, body) = get(&server(), "/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "text/plain; charset=utf-8");
    assert_eq!(body, format!("webserve v{}", webserve::VERSION));
}

#[tokio::test]
async fn robots_disallow_everything() {
    let (status, content_type, body) = get(&server(), "/robots.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "text/plain; charset=utf-8");
    assert_eq!(body, "User-agent: *\nDisallow: /");
}

#[tokio::test]
async fn config_js_reflects_server_configuration() {
    let mut cfg = test_config();
    cfg.darkmode = true;
    cfg.latex = true;
    cfg.temperature = 1.5;
    let server = server_with(cfg, Arc::new(ScriptedEngine::default()));

    let (status, content_type, body) = get(&server, "/config.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/javascript");

    let json = body.strip_prefix("const config = ").expect("config assignment");
    let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
    assert_eq!(parsed["mode"], "dark");
    assert_eq!(parsed["model"], "acme/tiny-chat");
    assert_eq!(parsed["temperature"], 1.5);
    assert_eq!(parsed["latex"], true);
}

#[tokio::test]
async fn config_js_defaults_to_light_mode() {
    let (_, _, body) = get(&server(), "/config.js").await;
    assert!(body.contains("\"mode\": \"light\""));
    assert!(body.contains("\"latex\": false"));
}

// -- Misc --

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (status, _, _) = get(&server(), "/admin").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn relay_endpoint_requires_websocket_upgrade() {
    let (status, _, _) = get(&server(), "/v1/retrieveResponse").await;
    assert!(status.is_client_error(), "got {status}");
}

#[tokio::test]
async fn verbose_router_serves_the_same_routes() {
    let mut cfg = test_config();
    cfg.verbose = true;
    let server = server_with(cfg, Arc::new(ScriptedEngine::default()));
    let (status, _, body) = get(&server, "/robots.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "User-agent: *\nDisallow: /");
}
