mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use inventory_ledger::{build_router, config::LedgerConfig, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::TestLedger;

struct TestApp {
    router: Router,
    ledger: TestLedger,
}

impl TestApp {
    async fn new() -> Self {
        let ledger = TestLedger::new().await;
        let state = AppState::new(ledger.db.clone(), LedgerConfig::default(), None);
        Self {
            router: build_router(state),
            ledger,
        }
    }

    async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

fn decimal(value: &Value) -> rust_decimal::Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["details"]["database"]["status"], "up");
}

#[tokio::test]
async fn movement_reservation_and_audit_over_http() {
    let app = TestApp::new().await;
    let (status, warehouse) = app
        .request(
            Method::POST,
            "/api/v1/entities",
            Some(json!({ "entity_type": "warehouse", "name": "North" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, part) = app
        .request(
            Method::POST,
            "/api/v1/entities",
            Some(json!({ "entity_type": "part", "name": "Brake Pad" })),
        )
        .await;
    let chain_key = json!({ "warehouse_id": warehouse["id"], "part_id": part["id"] });

    let (status, receipt) = app
        .request(
            Method::POST,
            "/api/v1/parts/movements",
            Some(json!({
                "chain_key": chain_key,
                "movement_type": "receipt",
                "quantity": "50",
                "unit_cost": "2.5",
                "reference": { "reference_type": "purchase_order", "reference_id": "PO-100" }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(decimal(&receipt["current_balance"]), rust_decimal::Decimal::from(50));

    let (status, reservation) = app
        .request(
            Method::POST,
            "/api/v1/parts/reservations",
            Some(json!({ "chain_key": chain_key, "quantity": "10" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let query = format!(
        "warehouse_id={}&part_id={}",
        warehouse["id"].as_str().unwrap(),
        part["id"].as_str().unwrap()
    );
    let (status, snapshot) = app
        .request(Method::GET, &format!("/api/v1/parts/aggregate?{}", query), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&snapshot["available_quantity"]), rust_decimal::Decimal::from(40));

    let (status, open) = app
        .request(Method::GET, &format!("/api/v1/parts/reservations?{}", query), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(open.as_array().unwrap().len(), 1);

    let (status, _) = app
        .request(
            Method::POST,
            &format!(
                "/api/v1/parts/reservations/{}/unreserve",
                reservation["id"].as_str().unwrap()
            ),
            Some(json!({ "reason": "no longer needed" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, history) = app
        .request(
            Method::GET,
            &format!("/api/v1/parts/history?{}&page=1&limit=10", query),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 3);
    assert_eq!(history["movements"][0]["movement_type"], "unreserve");

    let (status, report) = app
        .request(Method::GET, &format!("/api/v1/parts/audit?{}", query), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "healthy");
    assert_eq!(report["chain_breaks"], 0);

    let (status, outcome) = app
        .request(
            Method::POST,
            "/api/v1/parts/recalculate",
            Some(json!({ "chain_key": chain_key })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["corrections_made"], 0);
}

#[tokio::test]
async fn domain_errors_map_to_status_codes() {
    let app = TestApp::new().await;
    let key = app.ledger.part_key().await;
    let chain_key = json!({ "warehouse_id": key.warehouse_id, "part_id": key.part_id });

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/parts/movements",
            Some(json!({ "chain_key": chain_key, "movement_type": "teleport", "quantity": "1" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_movement_type");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/parts/movements",
            Some(json!({ "chain_key": chain_key, "movement_type": "issue", "quantity": "-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_available");
    assert_eq!(body["retryable"], false);

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/parts/reservations/{}/unreserve", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let unknown = json!({ "warehouse_id": Uuid::new_v4(), "part_id": Uuid::new_v4() });
    let (status, outcome) = app
        .request(
            Method::POST,
            "/api/v1/parts/recalculate",
            Some(json!({ "chain_key": unknown })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["retryable"], false);
}

#[tokio::test]
async fn fuel_routes_take_warehouse_only_keys() {
    let app = TestApp::new().await;
    let tank = app.ledger.fuel_key().await;

    let (status, movement) = app
        .request(
            Method::POST,
            "/api/v1/fuel/movements",
            Some(json!({
                "chain_key": { "warehouse_id": tank.warehouse_id },
                "movement_type": "receipt",
                "quantity": 750
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(movement["chain_kind"], "fuel_stock");

    let (status, reports) = app.request(Method::GET, "/api/v1/fuel/audit/all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reports.as_array().unwrap().len(), 1);
}
