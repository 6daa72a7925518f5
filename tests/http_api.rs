mod util;

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpListener;
use yaml_query_dsl::server::router;

use util::{StubEmbedder, fixture_service};

async fn spawn_server() -> SocketAddr {
    let service = Arc::new(fixture_service(Arc::new(StubEmbedder::new())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(service)).await.unwrap();
    });
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn search_returns_json_hits() {
    let addr = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/search"))
        .header("content-type", "application/yaml")
        .body("query:\n  match: {field: content, value: lazy}\noptions:\n  fields: [title]\n")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total"], 2);
    let hits = body["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h["fields"]["title"].is_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_bad_requests() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    for (body, needle) in [
        ("query: [", "failed to parse YAML"),
        ("query: {}\n", "no query clause given"),
        ("query:\n  term: {field: nope, value: x}\n", "failed to build query"),
        (
            "query:\n  match: {field: content, value: fox}\noptions:\n  highlight: {fields: []}\n",
            "highlight",
        ),
        (
            "query: {bool: {}}\noptions:\n  size: 1000000000000\n",
            "result window",
        ),
    ] {
        let response = client
            .post(format!("http://{addr}/search"))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "{body}");
        let text = response.text().await.unwrap();
        assert!(text.contains(needle), "{body}: {text}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn documents_lists_the_index() {
    let addr = spawn_server().await;
    let body: Value = reqwest::get(format!("http://{addr}/documents"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 4);
    assert_eq!(body["documents"].as_array().unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn mapping_and_health() {
    let addr = spawn_server().await;

    let mapping = reqwest::get(format!("http://{addr}/mapping")).await.unwrap();
    assert_eq!(mapping.status(), 200);
    assert_eq!(
        mapping.headers()["content-type"].to_str().unwrap(),
        "application/yaml"
    );
    let text = mapping.text().await.unwrap();
    assert!(text.contains("created_at"));

    let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "ok");
}
