use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use titledex_core::{Index, SeenTitles, SledStore};
use tower::ServiceExt;

fn build_tiny_index() -> Router {
    let index = Index::new(SledStore::temporary().unwrap());
    let seen = SeenTitles::new();
    let iron_man = index.insert_media("A1").unwrap();
    let iron_fist = index.insert_media("A2").unwrap();
    index.insert_stems(&seen, iron_man, "Iron Man", true).unwrap();
    index.insert_stems(&seen, iron_man, "Homem de Ferro", false).unwrap();
    index.insert_stems(&seen, iron_fist, "Iron Fist", true).unwrap();
    titledex_server::router(Arc::new(index))
}

async fn call(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn search_intersects_terms() {
    let app = build_tiny_index();

    let (status, json) = call(app.clone(), "/search?q=iron").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_hits"], 2);
    assert_eq!(json["results"], serde_json::json!(["A1", "A2"]));

    let (_, json) = call(app.clone(), "/search?q=iron%20man").await;
    assert_eq!(json["results"], serde_json::json!(["A1"]));
    assert_eq!(json["stems"], serde_json::json!(["iron", "man"]));

    let (_, json) = call(app.clone(), "/search?q=batman").await;
    assert_eq!(json["total_hits"], 0);

    let (_, json) = call(app, "/search?q=ferro&stem=false").await;
    assert_eq!(json["results"], serde_json::json!(["A1"]));
}

#[tokio::test]
async fn search_limit_keeps_total() {
    let (status, json) = call(build_tiny_index(), "/search?q=iron&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_hits"], 2);
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn blank_query_matches_nothing() {
    let (status, json) = call(build_tiny_index(), "/search?q=%21%21").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_hits"], 0);
    assert_eq!(json["results"], serde_json::json!([]));
}

#[tokio::test]
async fn media_and_stem_lookups() {
    let app = build_tiny_index();

    let (status, json) = call(app.clone(), "/media/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["external_id"], "A2");

    let (status, _) = call(app.clone(), "/media/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = call(app.clone(), "/stem/iron").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["media_ids"], serde_json::json!([1, 2]));

    let (_, json) = call(app, "/stem/nothing").await;
    assert_eq!(json["media_ids"], serde_json::json!([]));
}
