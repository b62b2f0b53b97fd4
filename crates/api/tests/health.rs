mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use common::build_test_app;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_memory_storage() {
    let app = build_test_app();
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "memory");
    assert_eq!(json["db_healthy"], true);
    assert_eq!(json["connections"], 0);
}

#[tokio::test]
async fn ws_without_user_id_is_a_json_400() {
    let app = build_test_app();
    let response = app
        .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "user_id query parameter is required");
}

#[tokio::test]
async fn ws_with_invalid_user_id_is_rejected() {
    let app = build_test_app();
    let response = app
        .oneshot(Request::get("/ws?user_id=abc").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn plain_request_to_ws_is_not_upgraded() {
    let app = build_test_app();
    let response = app
        .oneshot(Request::get("/ws?user_id=1").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = build_test_app();
    let response = app
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
