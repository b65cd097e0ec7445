//! Router-level tests: requests go through the full axum stack, gzip and
//! logging layers included.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tally_state::{Backend, FileBackend, MetricKey, NoopBackend, Repository};
use tally_sync::{SyncPolicy, Synchronizer};
use tower::ServiceExt;

fn test_sync(backend: Arc<dyn Backend>, interval: Duration) -> Arc<Synchronizer> {
    Arc::new(Synchronizer::new(
        Repository::default(),
        backend,
        SyncPolicy::new(interval, false),
    ))
}

fn test_router() -> (Router, Arc<Synchronizer>) {
    let sync = test_sync(Arc::new(NoopBackend), Duration::from_secs(300));
    (tally_api::build_router(sync.clone()), sync)
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    serde_json::from_str(&body_string(resp).await).unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

// ── Path routes ────────────────────────────────────────────────

#[tokio::test]
async fn counter_sums_across_path_updates() {
    let (router, _) = test_router();

    let resp = router.clone().oneshot(post("/update/counter/hits/5")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = router.clone().oneshot(post("/update/counter/hits/3")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router.oneshot(get("/value/counter/hits")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "8");
}

#[tokio::test]
async fn gauge_keeps_last_value() {
    let (router, _) = test_router();

    router.clone().oneshot(post("/update/gauge/temp/10.5")).await.unwrap();
    router.clone().oneshot(post("/update/gauge/temp/9.0")).await.unwrap();

    let resp = router.oneshot(get("/value/gauge/temp")).await.unwrap();
    assert_eq!(body_string(resp).await, "9");
}

#[tokio::test]
async fn large_and_tiny_gauges_use_exponent_form() {
    let (router, _) = test_router();

    for (name, raw, want) in [
        ("TotalMemory", "16000000000", "1.6e+10"),
        ("Alloc", "1234567", "1.234567e+06"),
        ("Tiny", "0.00001", "1e-05"),
        ("Mid", "123456.5", "123456.5"),
    ] {
        let resp = router
            .clone()
            .oneshot(post(&format!("/update/gauge/{name}/{raw}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{name}");

        let resp = router
            .clone()
            .oneshot(get(&format!("/value/gauge/{name}")))
            .await
            .unwrap();
        assert_eq!(body_string(resp).await, want, "{name}");
    }
}

#[tokio::test]
async fn path_update_status_codes() {
    let (router, sync) = test_router();

    for (uri, status) in [
        ("/update/counter/hits/-1", StatusCode::BAD_REQUEST),
        ("/update/counter/hits/abc", StatusCode::BAD_REQUEST),
        ("/update/gauge/9lives/1", StatusCode::BAD_REQUEST),
        ("/update/histogram/h/1", StatusCode::BAD_REQUEST),
        ("/update/counter/hits/", StatusCode::NOT_FOUND),
        ("/update/counter/hits", StatusCode::NOT_FOUND),
    ] {
        let resp = router.clone().oneshot(post(uri)).await.unwrap();
        assert_eq!(resp.status(), status, "{uri}");
    }
    assert!(sync.get_all().is_empty());
}

#[tokio::test]
async fn missing_value_is_404() {
    let (router, _) = test_router();
    let resp = router.clone().oneshot(get("/value/counter/missing")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = router.oneshot(get("/value/bogus/missing")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── JSON routes ────────────────────────────────────────────────

#[tokio::test]
async fn json_update_echoes_aggregate() {
    let (router, _) = test_router();

    let body = r#"{"id":"hits","type":"counter","delta":2}"#;
    router.clone().oneshot(post_json("/update/", body)).await.unwrap();
    let resp = router.oneshot(post_json("/update/", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json, serde_json::json!({"id": "hits", "type": "counter", "delta": 4}));
}

#[tokio::test]
async fn json_update_rejections() {
    let (router, sync) = test_router();

    let resp = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/update/")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(r#"{"id":"t","type":"gauge","value":1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_json(resp).await["error"], "unsupported media type");

    for body in [
        r#"{"id":"t","type":"gauge","delta":1}"#,
        r#"{"id":"t","type":"counter","delta":-4}"#,
        r#"{"id":"t","type":"counter","delta":1.5}"#,
        r#"{"id":"bad/name","type":"counter","delta":1}"#,
        r#"{"id":"t","type":"counter""#,
    ] {
        let resp = router.clone().oneshot(post_json("/update/", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body_json(resp).await["error"], "malformed request");
    }
    assert!(sync.get_all().is_empty());
}

#[tokio::test]
async fn batch_update_aggregates_duplicates() {
    let (router, _) = test_router();

    let body = r#"[
        {"id":"hits","type":"counter","delta":1},
        {"id":"hits","type":"counter","delta":2},
        {"id":"temp","type":"gauge","value":21.5}
    ]"#;
    let resp = router.clone().oneshot(post_json("/updates/", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router
        .clone()
        .oneshot(post_json("/value/", r#"{"id":"hits","type":"counter"}"#))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["delta"], 3);

    let resp = router
        .oneshot(post_json("/value/", r#"{"id":"temp","type":"gauge"}"#))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["value"], 21.5);
}

#[tokio::test]
async fn value_json_not_found_body() {
    let (router, _) = test_router();
    let resp = router
        .oneshot(post_json("/value/", r#"{"id":"nope","type":"gauge"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await, serde_json::json!({"error": "metric not found"}));
}

// ── gzip ───────────────────────────────────────────────────────

#[tokio::test]
async fn gzip_request_body_is_inflated() {
    let (router, sync) = test_router();

    let payload = gzip(br#"[{"id":"hits","type":"counter","delta":7}]"#);
    let req = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(payload))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let stored = sync.get(&MetricKey::counter("hits").unwrap()).unwrap();
    assert_eq!(stored.delta(), Some(7));
}

#[tokio::test]
async fn corrupt_gzip_body_is_400() {
    let (router, _) = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/update/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from("not gzip at all"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn json_response_is_gzipped_on_request() {
    let (router, _) = test_router();
    router.clone().oneshot(post("/update/gauge/temp/3.5")).await.unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/value/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::from(r#"{"id":"temp","type":"gauge"}"#))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_ENCODING], "gzip");

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let mut inflated = String::new();
    GzDecoder::new(bytes.as_ref()).read_to_string(&mut inflated).unwrap();
    let json: serde_json::Value = serde_json::from_str(&inflated).unwrap();
    assert_eq!(json["value"], 3.5);
}

#[tokio::test]
async fn plain_text_is_never_gzipped() {
    let (router, _) = test_router();
    router.clone().oneshot(post("/update/counter/hits/1")).await.unwrap();

    let req = Request::builder()
        .uri("/value/counter/hits")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert!(resp.headers().get(header::CONTENT_ENCODING).is_none());
    assert_eq!(body_string(resp).await, "1");
}

// ── Diagnostics ────────────────────────────────────────────────

#[tokio::test]
async fn index_page_lists_metrics() {
    let (router, _) = test_router();

    let resp = router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "Empty storage");

    router.clone().oneshot(post("/update/counter/hits/2")).await.unwrap();
    let resp = router.oneshot(get("/")).await.unwrap();
    let ct = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(ct.starts_with("text/html"));
    assert!(body_string(resp).await.contains("counter hits = 2"));
}

#[tokio::test]
async fn ping_reports_backend_health() {
    let (router, _) = test_router();
    let resp = router.oneshot(get("/ping")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Persistence through the API ────────────────────────────────

#[tokio::test]
async fn write_through_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let sync = test_sync(Arc::new(FileBackend::new(&path)), Duration::ZERO);
    let router = tally_api::build_router(sync);
    let resp = router
        .oneshot(post_json("/update/", r#"{"id":"hits","type":"counter","delta":11}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let restarted = Arc::new(Synchronizer::new(
        Repository::default(),
        Arc::new(FileBackend::new(&path)),
        SyncPolicy::new(Duration::ZERO, true),
    ));
    assert_eq!(restarted.restore().await.unwrap(), 1);

    let router = tally_api::build_router(restarted);
    let resp = router.oneshot(get("/value/counter/hits")).await.unwrap();
    assert_eq!(body_string(resp).await, "11");
}
