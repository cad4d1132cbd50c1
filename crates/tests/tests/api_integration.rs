use std::path::PathBuf;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use concourse_api::{build_app, ApiConfig, DEFAULT_API_KEY};
use concourse_handlers::{RuntimeConfig, FALLBACK_REPLY};
use serde_json::{json, Value};
use tower::ServiceExt;

fn kb_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../kb")
}

fn config() -> ApiConfig {
    ApiConfig {
        runtime: RuntimeConfig {
            kb_root: kb_root(),
            ..RuntimeConfig::default()
        },
        ..ApiConfig::default()
    }
}

async fn app() -> Router {
    build_app(config()).await.expect("app should build")
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .header("x-api-key", DEFAULT_API_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let response = app()
        .await
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let parsed = json_body(response).await;
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["capabilities"]["classifier"], "rules");
    assert_eq!(parsed["capabilities"]["storage"], "memory");
    assert_eq!(parsed["capabilities"]["intent_verification"], false);
    assert!(parsed["capabilities"]["docs_loaded"].as_u64().unwrap() > 0);
    assert_eq!(parsed["metrics"]["turns_total"], 0);
}

#[tokio::test]
async fn chat_requires_api_key() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "text": "주차 요금 알려줘" }).to_string()))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let parsed = json_body(response).await;
    assert_eq!(parsed["error"], "unauthorized");
}

#[tokio::test]
async fn blank_text_is_rejected() {
    let response = app()
        .await
        .oneshot(chat_request(json!({ "text": "   " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_text");
}

#[tokio::test]
async fn confident_turn_goes_straight_to_its_handler() {
    let response = app()
        .await
        .oneshot(chat_request(json!({ "text": "주차 요금 할인 정산" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    assert!(!parsed["conversation_id"].as_str().unwrap().is_empty());
    assert_eq!(parsed["intent"], "parking_fee_info");
    assert_eq!(
        parsed["path"],
        json!(["classify_intent", "parking_fee_info_handler"])
    );
    assert!(parsed["response"]
        .as_str()
        .unwrap()
        .starts_with("주차 요금 및 할인 정책 관련 안내입니다."));
    assert_eq!(parsed["slots"][1], json!(["요금", "B-fee_topic"]));
}

#[tokio::test]
async fn unrecognized_turn_ends_at_fallback() {
    let response = app()
        .await
        .oneshot(chat_request(json!({ "text": "안녕하세요" })))
        .await
        .unwrap();

    let parsed = json_body(response).await;
    assert_eq!(parsed["intent"], Value::Null);
    assert_eq!(
        parsed["path"],
        json!(["classify_intent", "llm_verify_intent", "fallback_handler"])
    );
    assert_eq!(parsed["response"], FALLBACK_REPLY);
}

#[tokio::test]
async fn follow_up_turn_is_verified_against_history() {
    let app = app().await;

    let first = json_body(
        app.clone()
            .oneshot(chat_request(json!({
                "conversation_id": "conv-1",
                "text": "약국 편의점 환전"
            })))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(first["conversation_id"], "conv-1");
    assert_eq!(
        first["path"],
        json!(["classify_intent", "facility_guide_handler"])
    );

    let second = json_body(
        app.oneshot(chat_request(json!({
            "conversation_id": "conv-1",
            "text": "약국 편의점 환전"
        })))
        .await
        .unwrap(),
    )
    .await;
    assert_eq!(
        second["path"],
        json!(["classify_intent", "llm_verify_intent", "facility_guide_handler"])
    );
}

#[tokio::test]
async fn graph_lists_fixed_topology() {
    let request = Request::builder()
        .uri("/v1/graph")
        .header("x-api-key", DEFAULT_API_KEY)
        .body(Body::empty())
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    assert_eq!(parsed["entry"], "classify_intent");

    let edges = parsed["edges"].as_array().unwrap();
    let has_edge = |from: &str, to: &str| {
        edges
            .iter()
            .any(|edge| edge["from"] == from && edge["to"] == to)
    };
    assert!(has_edge("classify_intent", "handle_complex_intent"));
    assert!(has_edge("llm_verify_intent", "fallback_handler"));
    assert!(has_edge("fallback_handler", "END"));
    assert!(!has_edge("classify_intent", "fallback_handler"));
}

#[tokio::test]
async fn rate_limit_applies_per_client() {
    let app = build_app(ApiConfig {
        rate_limit_max: 1,
        ..config()
    })
    .await
    .unwrap();

    let graph = |ip: &str| {
        Request::builder()
            .uri("/v1/graph")
            .header("x-api-key", DEFAULT_API_KEY)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(graph("198.51.100.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(graph("198.51.100.1")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = app.oneshot(graph("198.51.100.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}
