use std::path::PathBuf;

use axum::body::{to_bytes, Body};
use axum::http::Request;
use concourse_api::{build_app, ApiConfig, DEFAULT_API_KEY};
use concourse_core::{Intent, IntentLabel, Message};
use concourse_engine::Node;
use concourse_handlers::{build_runtime, Runtime, RuntimeConfig, AVAILABILITY_UNCONFIGURED};
use concourse_observability::AppMetrics;
use concourse_storage::{record_turn, HistoryRepository, Store};
use serde_json::{json, Value};
use tower::ServiceExt;

fn runtime() -> Runtime {
    let config = RuntimeConfig {
        kb_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../kb"),
        ..RuntimeConfig::default()
    };
    build_runtime(config, AppMetrics::shared()).expect("runtime should build")
}

#[tokio::test]
async fn multi_domain_question_is_answered_section_by_section() {
    let runtime = runtime();
    let outcome = runtime
        .graph
        .run_turn("장기주차장 주차 요금 대한항공 카운터", Vec::new())
        .await;

    assert_eq!(outcome.path, vec![Node::ClassifyIntent, Node::ComplexIntent]);

    let response = outcome.response();
    let fee = response.find("[주차 요금 안내]").expect("fee section");
    let airline = response.find("[항공사 정보]").expect("airline section");
    assert!(fee < airline);
    assert!(response.contains("대한항공"));
    assert!(!response.contains("[항공편 정보]"));
    assert!(!response.contains("[주차 가능 현황]"));
    assert_eq!(runtime.graph.metrics().snapshot().complex_routes_total, 1);
}

#[tokio::test]
async fn hesitant_classification_is_verified_before_dispatch() {
    let runtime = runtime();
    let outcome = runtime.graph.run_turn("출국 절차 알려줘", Vec::new()).await;

    assert_eq!(
        outcome.path,
        vec![
            Node::ClassifyIntent,
            Node::VerifyIntent,
            Node::Handler(Intent::DeparturePolicy),
        ]
    );
    assert_eq!(
        outcome.state.intent(),
        Some(&IntentLabel::Domain(Intent::DeparturePolicy))
    );
    assert!(outcome.response().starts_with("출국"));
    assert!(!outcome.response().contains("검역"));
}

#[tokio::test]
async fn availability_without_service_key_apologizes() {
    let runtime = runtime();
    let outcome = runtime.graph.run_turn("빈자리 있어?", Vec::new()).await;

    assert_eq!(
        outcome.answered_by(),
        Some(Node::Handler(Intent::ParkingAvailabilityQuery))
    );
    assert_eq!(outcome.response(), AVAILABILITY_UNCONFIGURED);
}

#[tokio::test]
async fn history_forces_verification_even_for_confident_turns() {
    let runtime = runtime();
    let history = vec![
        Message::user("주차 요금 알려줘"),
        Message::assistant("어느 주차장을 이용하시나요?"),
    ];
    let outcome = runtime.graph.run_turn("주차 요금 할인 정산", history).await;

    assert_eq!(outcome.path[1], Node::VerifyIntent);
    assert_eq!(
        outcome.answered_by(),
        Some(Node::Handler(Intent::ParkingFeeInfo))
    );
    assert_eq!(runtime.graph.metrics().snapshot().direct_routes_total, 0);
}

#[tokio::test]
async fn turns_are_recorded_in_the_store() {
    let runtime = runtime();
    let store = Store::memory();

    let outcome = runtime.graph.run_turn("약국 편의점 환전", Vec::new()).await;
    let conversation = record_turn(&store, "c-1", "약국 편의점 환전", outcome.response(), 40)
        .await
        .unwrap();
    assert_eq!(conversation.messages.len(), 2);

    let loaded = store.load("c-1").await.unwrap().unwrap();
    assert_eq!(loaded.messages[1].content, outcome.response());
}

#[tokio::test]
async fn sqlite_backed_api_carries_history_between_requests() {
    let app = build_app(ApiConfig {
        database_url: Some("sqlite::memory:".to_string()),
        runtime: RuntimeConfig {
            kb_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../kb"),
            ..RuntimeConfig::default()
        },
        ..ApiConfig::default()
    })
    .await
    .expect("app should build");

    let send = |text: &str| {
        Request::builder()
            .method("POST")
            .uri("/v1/chat")
            .header("content-type", "application/json")
            .header("x-api-key", DEFAULT_API_KEY)
            .body(Body::from(
                json!({ "conversation_id": "sqlite-1", "text": text }).to_string(),
            ))
            .unwrap()
    };

    let first = app.clone().oneshot(send("주차 요금 할인 정산")).await.unwrap();
    let first: Value =
        serde_json::from_slice(&to_bytes(first.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(first["path"].as_array().unwrap().len(), 2);

    let second = app.oneshot(send("주차 요금 할인 정산")).await.unwrap();
    let second: Value =
        serde_json::from_slice(&to_bytes(second.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(second["path"][1], "llm_verify_intent");
}
