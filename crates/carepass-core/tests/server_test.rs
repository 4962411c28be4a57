// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the HTTP surface.

#![cfg(feature = "server")]

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use carepass_core::persistence;
use carepass_core::server::{AppState, router};
use common::*;

const PHONE: &str = "919876543210";

async fn app(pool_size: i64, transport: Arc<FakeTransport>) -> Router {
    let store = persistence::connect("sqlite::memory:").await.unwrap();
    let state = AppState::new(store, registry(SOURCE, pool_size), transport, 0, 3);
    router(Arc::new(state))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app(1, FakeTransport::accepting()).await;

    let (status, body) = call(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_reservation_lifecycle() {
    let app = app(1, FakeTransport::accepting()).await;
    let reserve_uri = format!("/coupons/{SOURCE}/reservations");
    let request = json!({"order_id": "order-1", "recipient_contact": PHONE});

    let (status, reservation) =
        call(&app, Method::POST, &reserve_uri, Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reservation["status"], "reserved");
    assert_eq!(reservation["coupon_number"], 700_001);
    let id = reservation["id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, Method::POST, &reserve_uri, Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "POOL_EXHAUSTED");

    let (status, body) = call(&app, Method::GET, &reserve_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let sent_uri = format!("/reservations/{id}/sent");
    let (status, body) = call(&app, Method::POST, &sent_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sent");

    let (status, body) = call(&app, Method::POST, &sent_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_RESERVATION_STATE");

    let (status, body) = call(&app, Method::DELETE, &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_RESERVATION_STATE");
}

#[tokio::test]
async fn test_release_then_reserve_again() {
    let app = app(1, FakeTransport::accepting()).await;
    let reserve_uri = format!("/coupons/{SOURCE}/reservations");
    let request = json!({"order_id": "order-1", "recipient_contact": PHONE});

    let (_, reservation) = call(&app, Method::POST, &reserve_uri, Some(request.clone())).await;
    let id = reservation["id"].as_str().unwrap().to_string();

    let (status, _) = call(&app, Method::DELETE, &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&app, Method::DELETE, &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "RESERVATION_NOT_FOUND");

    let (status, _) = call(&app, Method::POST, &reserve_uri, Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_reserve_rejects_blank_order_id() {
    let app = app(1, FakeTransport::accepting()).await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/coupons/{SOURCE}/reservations"),
        Some(json!({"order_id": " ", "recipient_contact": PHONE})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_quota_endpoints() {
    let app = app(1, FakeTransport::accepting()).await;
    let quota_uri = format!("/quota/{PHONE}");
    let sends_uri = format!("/quota/{PHONE}/sends");

    let (status, body) = call(&app, Method::GET, &quota_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"kind": "metered", "used": 0, "remaining": 3}));

    for expected in 1..=3 {
        let (status, body) = call(&app, Method::POST, &sends_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recorded"], true);
        assert_eq!(body["counter"]["count"], expected);
    }

    let (status, body) = call(&app, Method::GET, &quota_uri, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "QUOTA_EXCEEDED");

    let (status, body) = call(&app, Method::GET, &format!("{quota_uri}?metered=false"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"kind": "unlimited"}));

    let (status, body) =
        call(&app, Method::POST, &format!("{sends_uri}?metered=false"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recorded"], false);
}

#[tokio::test]
async fn test_notification_endpoint() {
    let transport = FakeTransport::accepting();
    let app = app(2, transport.clone()).await;
    let request = json!({
        "order_id": "order-1",
        "recipient": PHONE,
        "template": "Coupon {coupon}",
        "coupon_source": SOURCE,
        "require_coupon": true
    });

    let (status, body) = call(&app, Method::POST, "/notifications", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Coupon 700001");
    assert_eq!(body["reservation"]["status"], "sent");
    assert_eq!(body["quota"]["count"], 1);

    transport.set_mode(TransportMode::Reject);
    let (status, body) = call(&app, Method::POST, "/notifications", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "TRANSPORT_FAULT");

    // The failed attempt released its coupon.
    let (_, reservations) = call(
        &app,
        Method::GET,
        &format!("/coupons/{SOURCE}/reservations"),
        None,
    )
    .await;
    assert_eq!(reservations.as_array().unwrap().len(), 1);
}
