//! HTTP API Integration Tests
//!
//! Sends JSON-RPC and health requests through the combined router.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use price_oracle::{
    EngineSettings, HttpServer, InProcessAdapter, MockPriceSource, OracleEngine, http_app,
};

fn engine() -> Arc<OracleEngine> {
    Arc::new(
        OracleEngine::new(
            vec!["NTNUSD".to_string(), "NTNEUR".to_string()],
            EngineSettings::default(),
        )
        .unwrap(),
    )
}

async fn rpc(engine: &Arc<OracleEngine>, body: Value) -> Value {
    let request = Request::post("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = http_app(Arc::clone(engine)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn get_version() {
    let reply = rpc(&engine(), json!({"id": 1, "method": "get_version"})).await;
    assert_eq!(reply["id"], json!(1));
    assert_eq!(reply["method"], json!("get_version"));
    assert_eq!(reply["result"]["version"], json!("v0.0.1"));
}

#[tokio::test]
async fn get_prices_after_tick() {
    let engine = engine();
    let source = Arc::new(MockPriceSource::new("mock"));
    source.set_price("NTNUSD", dec!(1.0100));
    engine
        .register_adapter(Arc::new(InProcessAdapter::new(source)))
        .unwrap();
    engine.update_prices().await.unwrap();

    let reply = rpc(&engine, json!({"id": "a", "method": "get_prices"})).await;
    let result = &reply["result"];

    assert_eq!(result["symbols"], json!(["NTNUSD", "NTNEUR"]));
    assert_eq!(result["prices"]["NTNUSD"]["symbol"], json!("NTNUSD"));
    assert_eq!(result["prices"]["NTNUSD"]["price"], json!("1.0100"));
    assert!(result["prices"]["NTNUSD"]["timestamp"].is_i64());
    assert!(result["prices"].get("NTNEUR").is_none());
}

#[tokio::test]
async fn update_symbols_round_trip() {
    let engine = engine();
    let reply = rpc(
        &engine,
        json!({"id": 2, "method": "update_symbols", "params": ["A", "B"]}),
    )
    .await;
    assert_eq!(reply["result"], json!(["A", "B"]));

    let reply = rpc(&engine, json!({"id": 3, "method": "get_symbols"})).await;
    assert_eq!(reply["result"], json!(["A", "B"]));
}

#[tokio::test]
async fn invalid_symbols_are_rejected() {
    let engine = engine();
    let reply = rpc(
        &engine,
        json!({"id": 2, "method": "update_symbols", "params": ["A", "A"]}),
    )
    .await;
    assert_eq!(reply["error"]["code"], json!(-32602));
    assert!(reply.get("result").is_none());
    assert_eq!(engine.symbols(), vec!["NTNUSD", "NTNEUR"]);
}

#[tokio::test]
async fn unknown_method_and_malformed_body() {
    let engine = engine();
    let reply = rpc(&engine, json!({"id": 9, "method": "set_prices"})).await;
    assert_eq!(reply["error"]["code"], json!(-32601));

    let request = Request::post("/").body(Body::from("{not json")).unwrap();
    let response = http_app(engine).oneshot(request).await.unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let reply: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(reply["error"]["code"], json!(-32700));
}

#[tokio::test]
async fn list_plugins_starts_empty() {
    let reply = rpc(&engine(), json!({"id": 4, "method": "list_plugins"})).await;
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn health_reflects_engine_state() {
    let engine = engine();
    let source = Arc::new(MockPriceSource::new("mock"));
    source.set_price("NTNUSD", dec!(1));
    engine
        .register_adapter(Arc::new(InProcessAdapter::new(source)))
        .unwrap();
    engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = http_app(Arc::clone(&engine))
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(health["status"], json!("degraded"));
    assert_eq!(health["engine"], json!("running"));
    assert_eq!(health["adapters"], json!(1));
    assert_eq!(health["stale_symbols"], json!(["NTNEUR"]));

    let ready = http_app(Arc::clone(&engine))
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn server_stops_on_cancel() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cancel = CancellationToken::new();
    let server = HttpServer::new(0, http_app(engine()), cancel.clone());
    let handle = tokio::spawn(server.serve(listener));

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
