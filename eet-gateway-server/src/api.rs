//! REST surface over [`GatewayCore`].
//!
//! Every handler runs under a child of the server's shutdown token, so a
//! graceful shutdown cancels pending vault and registry I/O.

use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use eet_gateway::{
    GatewayCore, GatewayError,
    sale::Sale,
    soap::Response as RegistryResponse,
    transport::AuthorityTransport,
    vault::KeyValueStore,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::observability::HealthReport;

const DEFAULT_PAGE: usize = 100;

/// Errors returned by handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A gateway operation failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The request body is unusable.
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// Stable machine-readable code.
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Gateway(err) => {
                let kind = err.kind();
                (StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), kind.as_str())
            }
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, code, "request failed");
        }

        let body = ErrorResponse { error: self.to_string(), code: code.to_owned() };
        (status, Json(body)).into_response()
    }
}

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Shared handler state.
#[derive(Debug)]
pub struct AppState<S, T> {
    gateway: GatewayCore<S, T>,
    shutdown: CancellationToken,
    started: Instant,
}

/// `POST /v1/sale`
#[derive(Deserialize)]
struct SaleRequest {
    cert_id: String,
    cert_password: String,
    sale: Sale,
}

/// `POST /v1/certs`
#[derive(Deserialize)]
struct StoreCertRequest {
    id: String,
    password: String,
    /// Base64-encoded PKCS#12 bundle.
    pkcs12: String,
    pkcs12_password: String,
}

/// `GET /v1/certs` query.
#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_page")]
    limit: usize,
}

/// `GET /v1/certs` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    /// Stored identifiers in ascending order.
    pub ids: Vec<String>,
}

/// `PUT /v1/certs/id`
#[derive(Debug, Deserialize)]
struct UpdateIdRequest {
    old_id: String,
    new_id: String,
}

/// `PUT /v1/certs/password`
#[derive(Deserialize)]
struct UpdatePasswordRequest {
    id: String,
    old_password: String,
    new_password: String,
}

/// `DELETE /v1/certs`
#[derive(Debug, Deserialize)]
struct DeleteRequest {
    id: String,
}

fn default_page() -> usize {
    DEFAULT_PAGE
}

/// Builds the `/v1` router.
pub fn router<S, T>(gateway: GatewayCore<S, T>, shutdown: CancellationToken) -> Router
where
    S: KeyValueStore + 'static,
    T: AuthorityTransport + 'static,
{
    let state = Arc::new(AppState { gateway, shutdown, started: Instant::now() });

    Router::new()
        .route("/v1/ping", get(ping::<S, T>))
        .route("/v1/sale", post(send_sale::<S, T>))
        .route("/v1/certs", post(store_cert::<S, T>).get(list_certs::<S, T>).delete(delete_cert::<S, T>))
        .route("/v1/certs/id", put(update_cert_id::<S, T>))
        .route("/v1/certs/password", put(update_cert_password::<S, T>))
        .with_state(state)
}

async fn ping<S, T>(State(state): State<Arc<AppState<S, T>>>) -> ApiResult<Response>
where
    S: KeyValueStore,
    T: AuthorityTransport,
{
    let uptime = state.started.elapsed().as_secs();
    let (status, report) = match state.gateway.ping(&state.shutdown.child_token()).await {
        Ok(()) => (StatusCode::OK, HealthReport::from_failures(&[], uptime)),
        Err(GatewayError::Ping(err)) => {
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
            (status, HealthReport::from_failures(err.errors(), uptime))
        }
        Err(err) => return Err(err.into()),
    };
    Ok((status, Json(report.to_json())).into_response())
}

async fn send_sale<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Json(request): Json<SaleRequest>,
) -> ApiResult<Json<RegistryResponse>>
where
    S: KeyValueStore,
    T: AuthorityTransport,
{
    let password = Zeroizing::new(request.cert_password);
    let response = state
        .gateway
        .send_sale(&state.shutdown.child_token(), &request.cert_id, password.as_bytes(), request.sale)
        .await?;
    Ok(Json(response))
}

async fn store_cert<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Json(request): Json<StoreCertRequest>,
) -> ApiResult<StatusCode>
where
    S: KeyValueStore,
    T: AuthorityTransport,
{
    let password = Zeroizing::new(request.password);
    let pkcs12_password = Zeroizing::new(request.pkcs12_password);
    let bundle = Zeroizing::new(
        STANDARD.decode(request.pkcs12.trim()).map_err(|e| ApiError::BadRequest(format!("pkcs12 is not base64: {e}")))?,
    );

    state
        .gateway
        .store_cert(&state.shutdown.child_token(), &request.id, password.as_bytes(), &bundle, &pkcs12_password)
        .await?;
    Ok(StatusCode::CREATED)
}

async fn list_certs<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>>
where
    S: KeyValueStore,
    T: AuthorityTransport,
{
    let ids = state.gateway.list_cert_ids(&state.shutdown.child_token(), query.offset, query.limit).await?;
    Ok(Json(ListResponse { ids }))
}

async fn update_cert_id<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Json(request): Json<UpdateIdRequest>,
) -> ApiResult<StatusCode>
where
    S: KeyValueStore,
    T: AuthorityTransport,
{
    state.gateway.update_cert_id(&state.shutdown.child_token(), &request.old_id, &request.new_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_cert_password<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Json(request): Json<UpdatePasswordRequest>,
) -> ApiResult<StatusCode>
where
    S: KeyValueStore,
    T: AuthorityTransport,
{
    let old_password = Zeroizing::new(request.old_password);
    let new_password = Zeroizing::new(request.new_password);
    state
        .gateway
        .update_cert_password(
            &state.shutdown.child_token(),
            &request.id,
            old_password.as_bytes(),
            new_password.as_bytes(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_cert<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<StatusCode>
where
    S: KeyValueStore,
    T: AuthorityTransport,
{
    state.gateway.delete_id(&state.shutdown.child_token(), &request.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
