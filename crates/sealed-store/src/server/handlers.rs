//! Axum request handlers for all service endpoints.
//!
//! Handlers only translate between HTTP and [`RecordAdapter`] calls. Every
//! failure leaves through [`ApiError`], which maps [`ServiceError`] onto a
//! status code and a JSON [`ErrorResponse`].
//!
//! [`RecordAdapter`]: crate::adapter::RecordAdapter

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{
    ErrorResponse, FieldError, HealthResponse, ListQuery, ListResponse, RecordFailure,
    RecordResponse, RotateKeyResponse,
};
use common::ServiceError;
use serde_json::{Map, Value};
use tracing::{error, warn};

use super::state::AppState;
use crate::adapter::{AdapterError, NextCursor, OpenedRecord, PageRequest, ReEncryptReport};
use crate::record::ID_FIELD;

/// Error type returned by every handler.
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(error = %self.0, "request rejected");
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `POST /items`: Store a new record, assigning an id if absent.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<RecordResponse>)> {
    let fields = into_object(body)?;
    let record = state.adapter.create(fields).await?;
    Ok((StatusCode::CREATED, Json(plain_response(record.into_map()))))
}

/// `GET /items`: Paginated listing, or an equality search when
/// `field` and `value` are given.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    match (query.field, query.value) {
        (Some(field), Some(value)) => {
            let found = state.adapter.find_by(&field, Value::String(value)).await?;
            return Ok(Json(ListResponse {
                items: found.into_iter().map(opened_response).collect(),
                next_offset: None,
                continuation_token: None,
            }));
        }
        (None, None) => {}
        _ => {
            let msg = "field and value must be given together";
            return Err(ServiceError::BadRequest(msg.into()).into());
        }
    }

    let request = PageRequest::from_params(query.offset, query.continuation_token)?;
    let limit = query.limit.unwrap_or(state.default_page_size);
    let page = state.adapter.list(limit, request).await?;

    let (next_offset, continuation_token) = match page.next {
        Some(NextCursor::Offset(offset)) => (Some(offset), None),
        Some(NextCursor::Token(token)) => (None, Some(token)),
        None => (None, None),
    };
    Ok(Json(ListResponse {
        items: page.records.into_iter().map(opened_response).collect(),
        next_offset,
        continuation_token,
    }))
}

/// `GET /items/:id`
pub async fn read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RecordResponse>> {
    match state.adapter.read(&id).await? {
        Some(opened) => Ok(Json(opened_response(opened))),
        None => Err(ServiceError::NotFound(format!("record {id}")).into()),
    }
}

/// `PUT /items/:id`: Replace a record. The path id overrides any id in the body.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<RecordResponse>> {
    let mut fields = into_object(body)?;
    fields.insert(ID_FIELD.into(), Value::String(id));
    let record = state.adapter.update(fields).await?;
    Ok(Json(plain_response(record.into_map())))
}

/// `DELETE /items/:id`: Succeeds whether or not the record exists.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.adapter.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /rotate-key`: Mint a new key version and re-seal every record.
///
/// The pass runs on its own task and completes even if the client
/// disconnects.
pub async fn rotate_key(State(state): State<AppState>) -> ApiResult<Json<RotateKeyResponse>> {
    let adapter = Arc::clone(&state.adapter);
    let report = tokio::spawn(async move { adapter.rotate_key().await })
        .await
        .map_err(pass_aborted)??;
    Ok(Json(report_response(report)))
}

/// `POST /re-encrypt`: Re-seal every record under the active version
/// without rotating. Resumes a rotation whose pass was interrupted.
pub async fn re_encrypt(State(state): State<AppState>) -> ApiResult<Json<RotateKeyResponse>> {
    let adapter = Arc::clone(&state.adapter);
    let report = tokio::spawn(async move { adapter.re_encrypt_all().await })
        .await
        .map_err(pass_aborted)??;
    Ok(Json(report_response(report)))
}

/// `GET /health`: Liveness plus the active key version.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        key_version: state.adapter.engine().active_version().to_string(),
    })
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

fn pass_aborted(err: tokio::task::JoinError) -> ApiError {
    ServiceError::Internal(format!("re-encryption task aborted: {err}")).into()
}

fn report_response(report: ReEncryptReport) -> RotateKeyResponse {
    RotateKeyResponse {
        key_version: report.key_version.to_string(),
        scanned: report.scanned,
        re_encrypted: report.re_encrypted,
        failures: report
            .failures
            .into_iter()
            .map(|f| RecordFailure {
                id: f.id,
                error: f.error.to_string(),
            })
            .collect(),
    }
}

fn into_object(body: Value) -> Result<Map<String, Value>, ApiError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ServiceError::BadRequest("request body must be a JSON object".into()).into()),
    }
}

fn plain_response(fields: Map<String, Value>) -> RecordResponse {
    RecordResponse {
        fields,
        field_errors: BTreeMap::new(),
    }
}

fn opened_response(opened: OpenedRecord) -> RecordResponse {
    let field_errors = opened
        .field_errors
        .into_iter()
        .map(|(field, err)| {
            let error = FieldError {
                code: "decryption_failed".into(),
                message: err.to_string(),
            };
            (field, error)
        })
        .collect();
    RecordResponse {
        fields: opened.record.into_map(),
        field_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::server::middleware::REQUEST_TIMEOUT;
    use crate::server::router;
    use crate::server::state::tests::memory_state;
    use crate::store::{DocumentStore, MemoryStore};
    use axum_test::TestServer;
    use serde_json::json;

    async fn server(default_page_size: usize) -> (MemoryStore, TestServer) {
        let (store, state) = memory_state(default_page_size).await;
        let server = TestServer::new(router::build(state, REQUEST_TIMEOUT)).unwrap();
        (store, server)
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let (store, server) = server(100).await;
        let resp = server
            .post("/items")
            .json(&json!({"id": "u1", "name": "Alice", "role": "admin"}))
            .await;
        resp.assert_status(StatusCode::CREATED);
        assert_eq!(resp.json::<Value>()["name"], "Alice");

        let stored = store.read("u1").await.unwrap().unwrap();
        assert_ne!(stored.get("name"), Some(&json!("Alice")));

        let resp = server.get("/items/u1").await;
        resp.assert_status_ok();
        assert_eq!(
            resp.json::<Value>(),
            json!({"id": "u1", "name": "Alice", "role": "admin"})
        );
    }

    #[tokio::test]
    async fn create_assigns_id() {
        let (_, server) = server(100).await;
        let resp = server.post("/items").json(&json!({"name": "Bob"})).await;
        resp.assert_status(StatusCode::CREATED);
        let body = resp.json::<Value>();
        assert!(!body["id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_is_409() {
        let (_, server) = server(100).await;
        server.post("/items").json(&json!({"id": "u1"})).await;
        let resp = server.post("/items").json(&json!({"id": "u1"})).await;
        resp.assert_status(StatusCode::CONFLICT);
        assert_eq!(resp.json::<ErrorResponse>().code, "conflict");
    }

    #[tokio::test]
    async fn non_object_body_is_400() {
        let (_, server) = server(100).await;
        let resp = server.post("/items").json(&json!(["not", "a", "record"])).await;
        resp.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_record_is_404() {
        let (_, server) = server(100).await;
        let resp = server.get("/items/ghost").await;
        resp.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(resp.json::<ErrorResponse>().code, "not_found");
    }

    #[tokio::test]
    async fn update_uses_path_id() {
        let (store, server) = server(100).await;
        server.post("/items").json(&json!({"id": "u1", "name": "Alice"})).await;
        let resp = server
            .put("/items/u1")
            .json(&json!({"id": "other", "name": "Alicia"}))
            .await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>()["id"], "u1");
        assert_eq!(store.len().await, 1);

        let body = server.get("/items/u1").await.json::<Value>();
        assert_eq!(body["name"], "Alicia");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_, server) = server(100).await;
        server.post("/items").json(&json!({"id": "u1"})).await;
        server.delete("/items/u1").await.assert_status(StatusCode::NO_CONTENT);
        server.delete("/items/u1").await.assert_status(StatusCode::NO_CONTENT);
        server.get("/items/u1").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_follows_continuation_tokens() {
        let (_, server) = server(2).await;
        for id in ["a", "b", "c"] {
            server.post("/items").json(&json!({"id": id, "name": id})).await;
        }

        let first = server.get("/items").await.json::<ListResponse>();
        assert_eq!(first.items.len(), 2);
        let token = first.continuation_token.unwrap();
        assert!(first.next_offset.is_none());

        let second = server
            .get("/items")
            .add_query_param("continuation_token", token)
            .await
            .json::<ListResponse>();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].fields["name"], "c");
        assert!(second.continuation_token.is_none());
    }

    #[tokio::test]
    async fn listing_by_offset_reports_next_offset() {
        let (_, server) = server(100).await;
        for id in ["a", "b", "c"] {
            server.post("/items").json(&json!({"id": id})).await;
        }
        let page = server
            .get("/items")
            .add_query_param("limit", 2)
            .add_query_param("offset", 0)
            .await
            .json::<ListResponse>();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_offset, Some(2));
    }

    #[tokio::test]
    async fn field_errors_key_in_body_is_400() {
        let (store, server) = server(100).await;
        let body = json!({"id": "u1", "name": "Alice", "field_errors": {"name": "x"}});

        let resp = server.post("/items").json(&body).await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(resp.json::<ErrorResponse>().code, "bad_request");
        server
            .put("/items/u1")
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn mixed_pagination_is_400() {
        let (_, server) = server(100).await;
        let resp = server
            .get("/items")
            .add_query_param("offset", 1)
            .add_query_param("continuation_token", "a")
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_limit_is_400() {
        let (_, server) = server(100).await;
        let resp = server.get("/items").add_query_param("limit", 5000).await;
        resp.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_by_field() {
        let (_, server) = server(100).await;
        server
            .post("/items")
            .json(&json!({"id": "u1", "name": "Alice", "role": "admin"}))
            .await;
        server
            .post("/items")
            .json(&json!({"id": "u2", "name": "Bob", "role": "viewer"}))
            .await;

        let found = server
            .get("/items")
            .add_query_param("field", "role")
            .add_query_param("value", "admin")
            .await
            .json::<ListResponse>();
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.items[0].fields["name"], "Alice");

        server
            .get("/items")
            .add_query_param("field", "name")
            .add_query_param("value", "Alice")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn undecryptable_field_is_reported_not_replaced() {
        let (store, server) = server(100).await;
        let broken = json!({"id": "u1", "name": "garbage", "role": "admin"});
        store
            .upsert(Record::from_map(broken.as_object().cloned().unwrap()).unwrap())
            .await
            .unwrap();

        let body = server.get("/items/u1").await.json::<Value>();
        assert!(body.get("name").is_none());
        assert_eq!(body["role"], "admin");
        assert_eq!(body["field_errors"]["name"]["code"], "decryption_failed");
    }

    #[tokio::test]
    async fn rotate_key_reports_new_version() {
        let (_, server) = server(100).await;
        server.post("/items").json(&json!({"id": "u1", "name": "Alice"})).await;

        let resp = server.post("/rotate-key").await;
        resp.assert_status_ok();
        let body = resp.json::<RotateKeyResponse>();
        assert_eq!(body.key_version, "v2");
        assert_eq!(body.re_encrypted, 1);
        assert!(body.failures.is_empty());

        let health = server.get("/health").await.json::<HealthResponse>();
        assert_eq!(health.key_version, "v2");
        assert_eq!(
            server.get("/items/u1").await.json::<Value>()["name"],
            "Alice"
        );
    }

    #[tokio::test]
    async fn re_encrypt_reseals_under_active_version() {
        let (store, server) = server(100).await;
        server.post("/items").json(&json!({"id": "u1", "name": "Alice"})).await;

        let resp = server.post("/re-encrypt").await;
        resp.assert_status_ok();
        let body = resp.json::<RotateKeyResponse>();
        assert_eq!(body.key_version, "v1");
        assert_eq!(body.scanned, 1);
        assert_eq!(body.re_encrypted, 1);

        let stored = store.read("u1").await.unwrap().unwrap();
        assert!(stored.get("name").unwrap().as_str().unwrap().ends_with("|v1"));
    }
}
