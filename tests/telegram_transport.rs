// tests/telegram_transport.rs
//
// TelegramTransport against a local stand-in for the Bot API, served by axum
// on an ephemeral port.
//
// Covered:
// - 200 + ok:true → message id, request shape (chat_id, HTML parse mode)
// - 429 / 5xx → transient, 400 / 403 → permanent
// - ok:false on 200 → permanent
// - slow server → transient timeout

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use impactrank_pipeline::push::{ChatTransport, TelegramTransport, TransportError};

const TOKEN: &str = "123:abc";

#[derive(Clone)]
struct Api {
    status: StatusCode,
    body: Value,
    delay: Duration,
    seen: Arc<Mutex<Vec<Value>>>,
}

async fn send_message(State(api): State<Api>, Json(req): Json<Value>) -> (StatusCode, Json<Value>) {
    api.seen.lock().unwrap().push(req);
    if !api.delay.is_zero() {
        tokio::time::sleep(api.delay).await;
    }
    (api.status, Json(api.body.clone()))
}

/// Serve one canned answer; returns the base URL and the captured requests.
async fn serve(status: StatusCode, body: Value, delay: Duration) -> (String, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(&format!("/bot{TOKEN}/sendMessage"), post(send_message))
        .with_state(Api {
            status,
            body,
            delay,
            seen: seen.clone(),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://{addr}/"), seen)
}

fn transport(base: &str) -> TelegramTransport {
    TelegramTransport::new(TOKEN.to_string(), "-100200300".to_string()).with_api_base(base)
}

#[tokio::test]
async fn success_returns_the_message_id() {
    let (base, seen) = serve(
        StatusCode::OK,
        json!({ "ok": true, "result": { "message_id": 4242 } }),
        Duration::ZERO,
    )
    .await;

    let id = transport(&base).send_message("<b>Acme</b>").await;
    assert_eq!(id, Ok(4242));

    let req = seen.lock().unwrap()[0].clone();
    assert_eq!(req["chat_id"], "-100200300");
    assert_eq!(req["text"], "<b>Acme</b>");
    assert_eq!(req["parse_mode"], "HTML");
}

#[tokio::test]
async fn rate_limits_and_server_errors_are_transient() {
    for status in [
        StatusCode::TOO_MANY_REQUESTS,
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::BAD_GATEWAY,
    ] {
        let (base, _) = serve(
            status,
            json!({ "ok": false, "description": "try later" }),
            Duration::ZERO,
        )
        .await;
        let err = transport(&base).send_message("x").await.expect_err("must fail");
        assert!(err.is_transient(), "{status} should be retryable: {err}");
        assert!(err.to_string().contains("try later"));
    }
}

#[tokio::test]
async fn client_errors_are_permanent() {
    for status in [StatusCode::BAD_REQUEST, StatusCode::FORBIDDEN] {
        let (base, _) = serve(
            status,
            json!({ "ok": false, "description": "Bad Request: can't parse entities" }),
            Duration::ZERO,
        )
        .await;
        let err = transport(&base).send_message("x").await.expect_err("must fail");
        assert!(matches!(err, TransportError::Permanent(_)), "{status}: {err}");
    }
}

#[tokio::test]
async fn ok_false_on_200_is_permanent() {
    let (base, _) = serve(
        StatusCode::OK,
        json!({ "ok": false, "description": "chat not found" }),
        Duration::ZERO,
    )
    .await;
    let err = transport(&base).send_message("x").await.expect_err("must fail");
    assert!(matches!(err, TransportError::Permanent(_)));
}

#[tokio::test]
async fn slow_server_times_out_as_transient() {
    let (base, _) = serve(
        StatusCode::OK,
        json!({ "ok": true, "result": { "message_id": 1 } }),
        Duration::from_secs(2),
    )
    .await;
    let err = transport(&base)
        .with_timeout(Duration::from_millis(200))
        .send_message("x")
        .await
        .expect_err("must time out");
    assert!(err.is_transient());
    assert!(!err.to_string().contains(TOKEN), "token must not leak: {err}");
}
