//! Tests for the Druid SQL HTTP transport against an in-process server

use axum::extract::{Path, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use rivven_druid::prelude::*;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct RecordedRequest {
    body: serde_json::Value,
    authorization: Option<String>,
}

#[derive(Debug)]
struct ServerState {
    names: serde_json::Value,
    druid_types: serde_json::Value,
    sql_types: serde_json::Value,
    rows: Vec<serde_json::Value>,
    trailer: bool,
    health_status: u16,
    failure: Option<(u16, String)>,
    requests: Vec<RecordedRequest>,
    cancelled: Vec<String>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            names: json!(["__time", "page", "added"]),
            druid_types: json!(["LONG", "STRING", "LONG"]),
            sql_types: json!(["TIMESTAMP", "VARCHAR", "BIGINT"]),
            rows: vec![
                json!(["2016-06-27T00:00:11.080Z", "Main_Page", 31]),
                json!(["2016-06-27T00:00:17.457Z", null, 125]),
            ],
            trailer: true,
            health_status: 200,
            failure: None,
            requests: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

type Shared = Arc<Mutex<ServerState>>;

async fn health(State(state): State<Shared>) -> Response {
    let status = StatusCode::from_u16(state.lock().health_status).unwrap();
    (status, "true").into_response()
}

async fn sql(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let mut state = state.lock();
    state.requests.push(RecordedRequest {
        body: body.clone(),
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    });

    if let Some((status, ref message)) = state.failure {
        return (StatusCode::from_u16(status).unwrap(), message.clone()).into_response();
    }

    let mut out = String::new();
    if body["header"] == json!(true) {
        for line in [&state.names, &state.druid_types, &state.sql_types] {
            out.push_str(&line.to_string());
            out.push('\n');
        }
        out.push('\n');
    } else {
        for row in &state.rows {
            out.push_str(&row.to_string());
            out.push('\n');
        }
        if state.trailer {
            out.push('\n');
        }
    }
    out.into_response()
}

async fn cancel(State(state): State<Shared>, Path(id): Path<String>) -> StatusCode {
    state.lock().cancelled.push(id);
    StatusCode::ACCEPTED
}

async fn start(state: ServerState) -> (SocketAddr, Shared) {
    let shared = Arc::new(Mutex::new(state));
    let app = Router::new()
        .route("/status/health", get(health))
        .route("/druid/v2/sql", post(sql))
        .route("/druid/v2/sql/:id", delete(cancel))
        .with_state(Arc::clone(&shared));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, shared)
}

async fn druid_cursor(addr: SocketAddr, config: DruidSourceConfig) -> Result<RecordCursor> {
    let config = DruidSourceConfig {
        url: format!("http://{addr}"),
        ..config
    };
    RecordCursor::new(config, Arc::new(DruidHttpConnectionFactory::new())).await
}

fn source() -> DruidSourceConfig {
    DruidSourceConfig::new("", "wikipedia")
}

// ==================== Schema probe ====================

#[tokio::test]
async fn test_probe_requests_header_rows() {
    let (addr, state) = start(ServerState::default()).await;
    let cursor = druid_cursor(addr, source()).await.unwrap();

    assert_eq!(
        cursor.schema().field_types(),
        vec![DomainType::Timestamp, DomainType::String, DomainType::BigInt]
    );
    assert_eq!(cursor.transport(), "druid-http");

    let state = state.lock();
    assert_eq!(state.requests.len(), 1);
    let body = &state.requests[0].body;
    assert_eq!(
        body["query"],
        json!("SELECT * FROM (SELECT * FROM wikipedia WHERE 1=1) LIMIT 0")
    );
    assert_eq!(body["resultFormat"], json!("arrayLines"));
    assert_eq!(body["header"], json!(true));
    assert_eq!(body["typesHeader"], json!(true));
    assert_eq!(body["sqlTypesHeader"], json!(true));
    assert!(body["context"]["sqlQueryId"].is_string());
}

#[tokio::test]
async fn test_probe_error_is_reported() {
    let (addr, _state) = start(ServerState {
        failure: Some((
            400,
            json!({
                "error": "Plan validation failed",
                "errorMessage": "Object 'wikipedia' not found",
                "errorClass": "org.apache.calcite.runtime.CalciteContextException"
            })
            .to_string(),
        )),
        ..Default::default()
    })
    .await;

    let err = druid_cursor(addr, source()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Schema);

    let cause = std::error::Error::source(&err).unwrap().to_string();
    assert!(cause.contains("Object 'wikipedia' not found"), "{cause}");
    assert!(cause.contains("400"), "{cause}");
}

#[tokio::test]
async fn test_unmapped_column_type_fails() {
    let (addr, _state) = start(ServerState {
        names: json!(["page", "tags"]),
        druid_types: json!(["STRING", "COMPLEX<json>"]),
        sql_types: json!(["VARCHAR", "OTHER"]),
        ..Default::default()
    })
    .await;

    let err = druid_cursor(addr, source()).await.unwrap_err();
    assert!(matches!(err, Error::Schema { .. }));
    assert!(err.to_string().contains("tags"));
}

// ==================== Streaming ====================

#[tokio::test]
async fn test_streams_rows_until_trailer() {
    let (addr, state) = start(ServerState::default()).await;
    let config = source()
        .with_columns(["__time", "page", "added"])
        .with_start_timestamp("2016-06-27")
        .with_context("priority", "10");
    let mut cursor = druid_cursor(addr, config).await.unwrap();

    cursor.open().await.unwrap();
    let first = cursor.next_record().await.unwrap().unwrap();
    assert_eq!(
        first.to_json(),
        json!({"__time": "2016-06-27T00:00:11.080", "page": "Main_Page", "added": 31})
    );
    let second = cursor.next_record().await.unwrap().unwrap();
    assert!(second.get_by_name("page").unwrap().is_null());
    assert!(cursor.next_record().await.unwrap().is_none());
    cursor.close().await;

    let state = state.lock();
    let body = &state.requests[1].body;
    assert_eq!(
        body["query"],
        json!("SELECT __time,page,added FROM wikipedia WHERE 1=1 AND __time >=  '2016-06-27'")
    );
    assert_eq!(body["header"], json!(false));
    assert_eq!(body["context"]["priority"], json!("10"));
    assert!(state.cancelled.is_empty());
}

#[tokio::test]
async fn test_truncated_response_is_read_error() {
    let (addr, _state) = start(ServerState {
        trailer: false,
        ..Default::default()
    })
    .await;
    let mut cursor = druid_cursor(addr, source()).await.unwrap();

    cursor.open().await.unwrap();
    cursor.next_record().await.unwrap().unwrap();
    let err = cursor.next_record().await.unwrap_err();
    assert!(matches!(err, Error::Read { .. }));
    cursor.close().await;
}

#[tokio::test]
async fn test_close_cancels_unfinished_query() {
    let rows = (0..500)
        .map(|i| json!(["2016-06-27T00:00:00.000Z", format!("page-{i}"), i]))
        .collect();
    let (addr, state) = start(ServerState {
        rows,
        ..Default::default()
    })
    .await;
    let mut cursor = druid_cursor(addr, source()).await.unwrap();

    cursor.open().await.unwrap();
    cursor.next_record().await.unwrap().unwrap();
    cursor.close().await;

    let state = state.lock();
    let query_id = state.requests[1].body["context"]["sqlQueryId"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(state.cancelled, vec![query_id]);
}

#[tokio::test]
async fn test_execute_error_leaves_cursor_unopened() {
    let (addr, state) = start(ServerState::default()).await;
    let mut cursor = druid_cursor(addr, source()).await.unwrap();

    state.lock().failure = Some((504, json!({"error": "Query timeout"}).to_string()));
    let err = cursor.open().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert_eq!(cursor.position(), CursorPosition::Unopened);
}

#[tokio::test]
async fn test_large_error_body_is_cut_short() {
    let (addr, state) = start(ServerState::default()).await;
    let mut cursor = druid_cursor(addr, source()).await.unwrap();

    state.lock().failure = Some((500, "x".repeat(100_000)));
    let err = cursor.open().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Query);

    let message = err.to_string();
    assert!(message.contains("500"), "{message}");
    assert!(message.len() < 4096 + 128, "{} bytes", message.len());
    assert!(message.ends_with(&"x".repeat(4096)));
}

// ==================== Connection ====================

#[tokio::test]
async fn test_basic_auth_is_sent() {
    let (addr, state) = start(ServerState::default()).await;
    let config = source().with_credentials("druid", "secret");
    druid_cursor(addr, config).await.unwrap();

    assert_eq!(
        state.lock().requests[0].authorization.as_deref(),
        Some("Basic ZHJ1aWQ6c2VjcmV0")
    );
}

#[tokio::test]
async fn test_health_check_auth_failure() {
    let (addr, _state) = start(ServerState {
        health_status: 401,
        ..Default::default()
    })
    .await;

    let factory = DruidHttpConnectionFactory::new();
    let err = factory
        .connect(&ConnectionConfig::new(format!("http://{addr}")))
        .await
        .err()
        .unwrap();
    assert_eq!(err.category(), ErrorCategory::Authentication);
}

#[tokio::test]
async fn test_unreachable_broker_is_retriable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let factory = DruidHttpConnectionFactory::new();
    let err = factory
        .connect(&ConnectionConfig::new(format!("http://{addr}")).with_connect_timeout(1000))
        .await
        .err()
        .unwrap();
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_avatica_url() {
    let (addr, _state) = start(ServerState::default()).await;
    let config = DruidSourceConfig::new(
        format!("jdbc:avatica:remote:url=http://{addr}/druid/v2/sql/avatica/"),
        "wikipedia",
    );

    let cursor = RecordCursor::new(config, Arc::new(DruidHttpConnectionFactory::new()))
        .await
        .unwrap();
    assert_eq!(cursor.schema().len(), 3);
}

#[tokio::test]
async fn test_connection_lifecycle() {
    let (addr, _state) = start(ServerState::default()).await;
    let factory = DruidHttpConnectionFactory::new();
    let conn = factory
        .connect(&ConnectionConfig::new(format!("http://{addr}")))
        .await
        .unwrap();

    assert!(conn.is_valid().await);
    let statement = conn.prepare("SELECT * FROM wikipedia").await.unwrap();
    assert_eq!(statement.sql(), "SELECT * FROM wikipedia");
    let columns = statement.metadata().await.unwrap();
    assert_eq!(columns[1].native_type.as_deref(), Some("STRING"));

    conn.close().await.unwrap();
    assert!(!conn.is_valid().await);
    assert!(conn.prepare("SELECT 1").await.is_err());
}
