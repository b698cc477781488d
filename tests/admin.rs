//! Admin API tests.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::json;
use tower::ServiceExt;

use gateway_admission::admin::setup_admin_router;

mod common;

const KEY: &str = "test-admin-key";

fn admin() -> Router {
    let mut config = common::base_config("orders");
    config.admin.enabled = true;
    config.admin.api_key = KEY.to_string();
    setup_admin_router(common::state(config))
}

fn request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {KEY}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_rejects_missing_or_wrong_token() {
    let app = admin();

    let missing = Request::builder()
        .uri("/admin/status")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/admin/status")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(wrong).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(request(Method::GET, "/admin/status", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::json_body(response).await["status"], "operational");
}

#[tokio::test]
async fn test_register_discover_and_deregister() {
    let app = admin();

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/admin/services",
            Some(json!({
                "name": "orders",
                "address": "10.0.0.5",
                "port": 8080,
                "tags": ["blue"],
                "meta": { "zone": "eu-1" }
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let stored = common::json_body(response).await;
    let id = stored["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/admin/discovery/orders?zone=eu-1", None))
        .await
        .unwrap();
    let found = common::json_body(response).await;
    assert_eq!(found.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/admin/discovery/orders?zone=us-2", None))
        .await
        .unwrap();
    assert!(common::json_body(response).await.as_array().unwrap().is_empty());

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/admin/tags/blue", None))
        .await
        .unwrap();
    assert_eq!(common::json_body(response).await[0]["id"], id.as_str());

    let response = app
        .clone()
        .oneshot(request(
            Method::GET,
            "/admin/discovery/orders/endpoint?strategy=consistent_hash&key=user-1",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let endpoint = common::json_body(response).await;
    assert_eq!(endpoint["strategy"], "consistent_hash");
    assert_eq!(endpoint["instance"]["id"], id.as_str());

    let response = app
        .clone()
        .oneshot(request(Method::DELETE, &format!("/admin/services/{id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request(Method::GET, "/admin/discovery/orders/endpoint", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_invalid_instance_is_rejected() {
    let response = admin()
        .oneshot(request(
            Method::POST,
            "/admin/services",
            Some(json!({ "name": "orders", "address": "10.0.0.5", "port": 0 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(common::json_body(response).await["code"], "INVALID_INSTANCE");
}

#[tokio::test]
async fn test_breaker_controls() {
    let app = admin();

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/admin/breakers/orders/open", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let state = {
        let mut config = common::base_config("orders");
        config.admin.api_key = KEY.to_string();
        common::state(config)
    };
    state.breakers.get_or_create("orders");
    let app = setup_admin_router(state.clone());

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/admin/breakers/orders/open", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::json_body(response).await["state"], "open");
    assert!(state.breakers.get("orders").unwrap().admit().is_err());

    let response = app
        .oneshot(request(Method::POST, "/admin/breakers/orders/reset", None))
        .await
        .unwrap();
    let body = common::json_body(response).await;
    assert_eq!(body["state"], "closed");
    assert!(body["generation"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn test_load_factor_is_clamped() {
    let response = admin()
        .oneshot(request(
            Method::PUT,
            "/admin/rate-limits/load-factor",
            Some(json!({ "factor": 0.25 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::json_body(response).await["load_factor"], 1.0);
}
