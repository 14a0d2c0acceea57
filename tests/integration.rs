use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use delivery_tracker::api::rest::router;
use delivery_tracker::config::Config;
use delivery_tracker::state::AppState;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const PNG_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

struct TestApp {
    app: axum::Router,
    evidence_dir: TempDir,
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

fn setup() -> TestApp {
    let evidence_dir = tempfile::tempdir().unwrap();
    let config = Config {
        http_port: 0,
        log_level: "info".to_string(),
        jwt_secret: "integration-secret".to_string(),
        token_ttl_hours: 1,
        evidence_dir: evidence_dir.path().to_path_buf(),
        max_body_bytes: 16 * 1024 * 1024,
        event_buffer_size: 64,
    };
    let state = AppState::new(&config).unwrap();

    TestApp {
        app: router(Arc::new(state)),
        evidence_dir,
    }
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn bare_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Registers a driver and logs in, returning `(driver_id, token)`.
async fn register_and_login(app: &TestApp, plate: &str, license: &str) -> (String, String) {
    let response = app
        .send(json_request(
            "POST",
            "/drivers",
            None,
            json!({
                "name": "Rafa",
                "vehicle_plate": plate,
                "license_number": license,
                "phone": "11987654321"
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let driver_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .send(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "license_number": license, "vehicle_plate": plate }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    (driver_id, token)
}

async fn create_delivery(app: &TestApp, token: &str, driver_id: &str) -> Value {
    let response = app
        .send(json_request(
            "POST",
            "/deliveries",
            Some(token),
            json!({
                "driver_id": driver_id,
                "address": "Av. Paulista, 1000",
                "client_name": "Carla"
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

async fn set_status(app: &TestApp, token: &str, delivery_id: &str, body: Value) -> axum::response::Response {
    app.send(json_request(
        "PUT",
        &format!("/deliveries/{delivery_id}/status"),
        Some(token),
        body,
    ))
    .await
}

#[tokio::test]
async fn health_reports_counts() {
    let app = setup();
    let response = app.send(bare_request("GET", "/health", None)).await;

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["drivers"], 0);
    assert_eq!(body["deliveries"], 0);
    assert_eq!(body["pings"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    let response = app.send(bare_request("GET", "/metrics", None)).await;

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("order_code_exhausted_total"));
}

#[tokio::test]
async fn delivery_lifecycle_end_to_end() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "abc-1234", "12345678901").await;

    let delivery = create_delivery(&app, &token, &driver_id).await;
    let delivery_id = delivery["id"].as_str().unwrap().to_string();
    let order_code = delivery["order_code"].as_str().unwrap().to_string();
    assert_eq!(delivery["status"], "Pending");
    assert_eq!(order_code.len(), 6);
    assert!(order_code
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));

    let response = set_status(&app, &token, &delivery_id, json!({ "status": "InTransit" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "InTransit");

    let response = app
        .send(json_request(
            "POST",
            "/locations/iot",
            None,
            json!({ "driver_id": driver_id, "latitude": -23.56, "longitude": -46.64 }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let ping = body_json(response).await;
    assert_eq!(ping["delivery_id"], delivery_id.as_str());
    assert_eq!(ping["driver_id"], driver_id.as_str());

    let response = set_status(
        &app,
        &token,
        &delivery_id,
        json!({ "status": "Delivered", "recipient_name": "R", "photo_proof": PNG_DATA_URL }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let delivered = body_json(response).await;
    assert_eq!(delivered["status"], "Delivered");
    assert_eq!(delivered["recipient_name"], "R");
    let proof = delivered["proof_photo"].as_str().unwrap();
    assert_eq!(proof, format!("{delivery_id}.png"));
    assert!(app.evidence_dir.path().join(proof).is_file());

    let response = app
        .send(bare_request(
            "GET",
            &format!("/deliveries/code/{order_code}"),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], delivery_id.as_str());

    let response = app
        .send(bare_request(
            "GET",
            &format!("/locations/delivery/{delivery_id}"),
            Some(&token),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = setup();

    let response = app.send(bare_request("GET", "/deliveries", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(bare_request("GET", "/drivers", Some("not-a-token")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_with_unknown_credentials_is_unauthorized() {
    let app = setup();
    let response = app
        .send(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "license_number": "99999999999", "vehicle_plate": "ZZZ-9999" }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logged_out_token_is_rejected() {
    let app = setup();
    let (_, token) = register_and_login(&app, "LOG-0001", "10000000001").await;

    let response = app
        .send(bare_request("POST", "/auth/logout", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(bare_request("GET", "/auth/session", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_returns_driver_and_a_working_token() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "SES-0001", "20000000002").await;

    let response = app
        .send(bare_request("GET", "/auth/session", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["driver"]["id"], driver_id.as_str());

    let renewed = body["access_token"].as_str().unwrap();
    let response = app
        .send(bare_request("GET", "/drivers", Some(renewed)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn driver_registration_validates_fields() {
    let app = setup();
    let response = app
        .send(json_request(
            "POST",
            "/drivers",
            None,
            json!({
                "name": "Rafa",
                "vehicle_plate": "AB-12",
                "license_number": "12345678901",
                "phone": "11987654321"
            }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["field"], "vehicle_plate");
}

#[tokio::test]
async fn delivered_without_proof_names_the_missing_field() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "DEL-0001", "30000000003").await;
    let delivery = create_delivery(&app, &token, &driver_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = set_status(
        &app,
        &token,
        delivery_id,
        json!({ "status": "Delivered", "recipient_name": "R" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["field"], "photo_proof");

    let response = app
        .send(bare_request(
            "GET",
            &format!("/deliveries/{delivery_id}"),
            Some(&token),
        ))
        .await;
    assert_eq!(body_json(response).await["status"], "Pending");
}

#[tokio::test]
async fn status_change_without_a_status_names_the_status_field() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "STA-0001", "30000000033").await;
    let delivery = create_delivery(&app, &token, &driver_id).await;

    let response = set_status(&app, &token, delivery["id"].as_str().unwrap(), json!({})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["field"], "status");
}

#[tokio::test]
async fn unsupported_image_type_is_rejected() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "GIF-0001", "40000000004").await;
    let delivery = create_delivery(&app, &token, &driver_id).await;

    let response = set_status(
        &app,
        &token,
        delivery["id"].as_str().unwrap(),
        json!({
            "status": "Delivered",
            "recipient_name": "R",
            "photo_proof": "data:image/gif;base64,R0lGODlhAQABAAAAACw="
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["field"], "photo_proof");
}

#[tokio::test]
async fn only_the_assigned_driver_may_change_status() {
    let app = setup();
    let (owner_id, owner_token) = register_and_login(&app, "OWN-0001", "50000000005").await;
    let (_, other_token) = register_and_login(&app, "OTH-0001", "60000000006").await;
    let delivery = create_delivery(&app, &owner_token, &owner_id).await;

    let response = set_status(
        &app,
        &other_token,
        delivery["id"].as_str().unwrap(),
        json!({ "status": "InTransit" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cancelled_delivery_is_final() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "CAN-0001", "70000000007").await;
    let delivery = create_delivery(&app, &token, &driver_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = set_status(
        &app,
        &token,
        delivery_id,
        json!({ "status": "cancelled", "reason": "client gave up" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["reason"], "client gave up");

    let response = set_status(&app, &token, delivery_id, json!({ "status": "InTransit" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn not_delivered_without_photo_stores_an_empty_reference() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "NOD-0001", "80000000008").await;
    let delivery = create_delivery(&app, &token, &driver_id).await;

    let response = set_status(
        &app,
        &token,
        delivery["id"].as_str().unwrap(),
        json!({ "status": "NotDelivered", "reason": "nobody home" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "NotDelivered");
    assert_eq!(body["proof_photo"], "");
}

#[tokio::test]
async fn unknown_and_malformed_lookups() {
    let app = setup();
    let (_, token) = register_and_login(&app, "LOO-0001", "90000000009").await;

    let response = app
        .send(bare_request(
            "GET",
            "/deliveries/00000000-0000-0000-0000-000000000000",
            Some(&token),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(bare_request(
            "GET",
            "/deliveries/driver/00000000-0000-0000-0000-000000000000",
            Some(&token),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(bare_request("GET", "/deliveries/code/AB-12", None))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(bare_request("GET", "/deliveries/code/ZZZZZZ", None))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn device_ping_from_unknown_driver_is_not_found() {
    let app = setup();
    let response = app
        .send(json_request(
            "POST",
            "/locations/iot",
            None,
            json!({
                "driver_id": "00000000-0000-0000-0000-000000000000",
                "latitude": 1.0,
                "longitude": 1.0
            }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn out_of_range_ping_is_a_validation_error() {
    let app = setup();
    let (driver_id, _) = register_and_login(&app, "RNG-0001", "11111111111").await;

    let response = app
        .send(json_request(
            "POST",
            "/locations/iot",
            None,
            json!({ "driver_id": driver_id, "latitude": 95.0, "longitude": 1.0 }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["field"], "latitude");
}

#[tokio::test]
async fn deleting_a_tracked_delivery_requires_cascade() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "CAS-0001", "22222222222").await;
    let delivery = create_delivery(&app, &token, &driver_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = set_status(&app, &token, delivery_id, json!({ "status": "in_transit" })).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(json_request(
            "POST",
            "/locations/iot",
            None,
            json!({ "driver_id": driver_id, "latitude": 0.5, "longitude": 0.5 }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .send(bare_request(
            "DELETE",
            &format!("/deliveries/{delivery_id}"),
            Some(&token),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send(bare_request(
            "DELETE",
            &format!("/deliveries/{delivery_id}?cascade=true"),
            Some(&token),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let body = body_json(app.send(bare_request("GET", "/health", None)).await).await;
    assert_eq!(body["deliveries"], 0);
    assert_eq!(body["pings"], 0);
}

#[tokio::test]
async fn partial_update_requires_a_field() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "UPD-0001", "33333333333").await;
    let delivery = create_delivery(&app, &token, &driver_id).await;
    let delivery_id = delivery["id"].as_str().unwrap();

    let response = app
        .send(json_request(
            "PUT",
            &format!("/deliveries/{delivery_id}"),
            Some(&token),
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(json_request(
            "PUT",
            &format!("/deliveries/{delivery_id}"),
            Some(&token),
            json!({ "notes": "leave at the gate" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["notes"], "leave at the gate");
    assert_eq!(body["order_code"], delivery["order_code"]);
}

#[tokio::test]
async fn manual_ping_accepts_naive_timestamps() {
    let app = setup();
    let (driver_id, token) = register_and_login(&app, "MAN-0001", "44444444444").await;

    let response = app
        .send(json_request(
            "POST",
            "/locations",
            Some(&token),
            json!({
                "latitude": -22.9,
                "longitude": -43.2,
                "driver_id": driver_id,
                "observed_at": "2025-09-13T10:15:00"
            }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let ping = body_json(response).await;
    assert!(ping["observed_at"]
        .as_str()
        .unwrap()
        .starts_with("2025-09-13T10:15:00"));
    assert!(ping["delivery_id"].is_null());
}
