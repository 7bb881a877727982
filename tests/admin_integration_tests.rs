// tests/admin_integration_tests.rs

mod common;

use axum::http::StatusCode;
use common::{body_json, test_config, TestApp};
use keypool_proxy::config::KeyEntrySpec;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_status_reports_pool_without_credentials() {
    let app = TestApp::new(test_config("http://127.0.0.1:1", &["sk-secret-a", "sk-secret-b"]));

    let (status, body) = body_json(app.get("/status").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pool"]["total"], 2);
    assert_eq!(body["pool"]["active"], 2);
    assert_eq!(body["pool"]["keys"][0]["id"], "key-1");
    assert_eq!(body["stats"]["total_requests"], 0);

    let raw = serde_json::to_string(&body).unwrap();
    assert!(!raw.contains("sk-secret"));
}

#[tokio::test]
async fn test_reset_key_restores_blacklisted_key() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&upstream)
        .await;

    let app = TestApp::new(test_config(&upstream.uri(), &["sk-only-key"]));
    app.proxy_post("/proxy/v1/x", "{}").await;
    assert_eq!(app.state.pool().await.snapshot().blacklisted, 1);

    let (status, body) = body_json(app.post("/admin/keys/key-1/reset").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "reset");
    assert_eq!(app.state.pool().await.snapshot().active, 1);
}

#[tokio::test]
async fn test_reset_unknown_key_is_404() {
    let app = TestApp::new(test_config("http://127.0.0.1:1", &["sk-a"]));

    let (status, body) = body_json(app.post("/admin/keys/no-such-key/reset").await).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "key-pool");
}

#[tokio::test]
async fn test_reload_replaces_pool_from_file() {
    let mut app = TestApp::new(test_config("http://127.0.0.1:1", &["sk-a"]));
    assert_eq!(app.state.pool().await.snapshot().total, 1);

    let mut new_config = test_config("http://127.0.0.1:1", &["sk-a", "sk-b", "sk-c"]);
    new_config.keys.push(KeyEntrySpec::Full {
        id: "billing".to_string(),
        credential: "sk-d".to_string(),
    });
    app.rewrite_config(&new_config);

    let (status, body) = body_json(app.post("/admin/reload").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "reloaded");
    assert_eq!(body["keys"], 4);
    assert_eq!(app.state.pool().await.snapshot().total, 4);
}

#[tokio::test]
async fn test_failed_reload_keeps_running_state() {
    let mut app = TestApp::new(test_config("http://127.0.0.1:1", &["sk-a"]));

    // A config with no keys fails validation.
    let empty = test_config("http://127.0.0.1:1", &[]);
    app.rewrite_config(&empty);

    let response = app.post("/admin/reload").await;
    assert_ne!(response.status(), StatusCode::OK);
    assert_eq!(app.state.pool().await.snapshot().total, 1);
}

#[tokio::test]
async fn test_run_builds_app_that_tags_responses_with_request_id() {
    use std::io::Write;
    use tower::util::ServiceExt;

    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    let yaml = serde_yaml::to_string(&test_config("http://127.0.0.1:1", &["sk-a"])).unwrap();
    config_file.write_all(yaml.as_bytes()).unwrap();
    config_file.flush().unwrap();

    let (router, _state) = keypool_proxy::run(Some(config_file.path().to_path_buf()))
        .await
        .unwrap();

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("X-Request-ID"));
}
