mod common;

use http::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_METHOD, CONTENT_TYPE, ORIGIN,
};
use http::{HeaderValue, Method};
use serde_json::json;

#[tokio::test]
async fn health_reports_environment_and_backend() {
    let env = common::TestEnv::start().await;
    let server = env.server();

    let body: serde_json::Value = server.get("/api/health").await.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["backend"], "memory");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_action_describes_gateway() {
    let env = common::TestEnv::start().await;
    let server = env.server();

    let body: serde_json::Value = server
        .post("/.netlify/functions/pesapal-api")
        .json(&json!({ "action": "test" }))
        .await
        .json();

    assert_eq!(body["success"], true);
    assert_eq!(body["gateway"]["baseUrl"], "https://demo.pesapal.com");
}

#[tokio::test]
async fn unknown_action_is_bad_request() {
    let env = common::TestEnv::start().await;
    let server = env.server_permissive();

    let response = server
        .post("/.netlify/functions/pesapal-api")
        .json(&json!({ "action": "refundEverything" }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("refundEverything"));
}

#[tokio::test]
async fn payment_without_credentials_hides_details() {
    let env = common::TestEnv::start().await;
    let server = env.server_permissive();

    let response = server
        .post("/.netlify/functions/pesapal-api")
        .json(&json!({
            "action": "createPaymentRequest",
            "donationData": { "amount": 500, "email": "donor@example.org" }
        }))
        .await;

    response.assert_status(http::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Internal error");
}

#[tokio::test]
async fn ipn_always_acknowledges_with_xml() {
    let env = common::TestEnv::start().await;
    let server = env.server();

    let response = server
        .get("/.netlify/functions/pesapal-ipn")
        .add_query_param("pesapal_notification_type", "CHANGE")
        .add_query_param("pesapal_transaction_tracking_id", "abc-123")
        .add_query_param("pesapal_merchant_reference", "DON-1-ABCDEF")
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.text(),
        r#"<?xml version="1.0" encoding="UTF-8"?><response><status>OK</status></response>"#
    );
    assert_eq!(
        response.header(CONTENT_TYPE),
        HeaderValue::from_static("application/xml")
    );

    let response = server
        .post("/.netlify/functions/pesapal-ipn")
        .text("not a form at all")
        .await;
    response.assert_status_ok();
    assert!(response.text().contains("<status>OK</status>"));
}

#[tokio::test]
async fn responses_allow_any_origin() {
    let env = common::TestEnv::start().await;
    let server = env.server();

    let response = server
        .get("/api/health")
        .add_header(ORIGIN, HeaderValue::from_static("https://example.org"))
        .await;
    assert_eq!(
        response.header(ACCESS_CONTROL_ALLOW_ORIGIN),
        HeaderValue::from_static("*")
    );
}

#[tokio::test]
async fn preflight_is_answered() {
    let env = common::TestEnv::start().await;
    let server = env.server();

    let response = server
        .method(Method::OPTIONS, "/api/stories")
        .add_header(ORIGIN, HeaderValue::from_static("https://example.org"))
        .add_header(ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("POST"))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.header(ACCESS_CONTROL_ALLOW_ORIGIN),
        HeaderValue::from_static("*")
    );
    assert!(response.text().is_empty());
}
