use std::future::Future;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use onenet_core::{
    types::{ConnectRequest, ProxyResult, SendDataRequest, TokenEnvelope, TokenRequest},
    GatewayResult,
};
use tracing::{info_span, Instrument};

use crate::{
    error::{ApiResult, AppError},
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/onenet/connect", post(connect))
        .route("/api/onenet/token", post(token))
        .route("/api/onenet/send-data", post(send_data))
        .with_state(state)
}

pub async fn connect(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProxyResult>)> {
    let Json(request) = payload?;
    let gateway = state.gateway.clone();
    let span = info_span!("onenet_connect", request_id = %request_id.0);

    let result = detached(async move { gateway.connect(request).await }.instrument(span)).await?;

    Ok(mirror_status(result))
}

pub async fn send_data(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<SendDataRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProxyResult>)> {
    let Json(request) = payload?;
    let gateway = state.gateway.clone();
    let span = info_span!("onenet_send_data", request_id = %request_id.0);

    let result =
        detached(async move { gateway.derive_and_publish(request).await }.instrument(span))
            .await?;

    Ok(mirror_status(result))
}

pub async fn token(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> ApiResult<Json<TokenEnvelope>> {
    let Json(request) = payload?;
    let envelope = info_span!("onenet_token", request_id = %request_id.0)
        .in_scope(|| state.gateway.derive_token_only(request))?;

    Ok(Json(envelope))
}

/// Runs the upstream call on its own task so a client disconnect does not
/// abort a publish that is already in flight.
async fn detached<F, T>(fut: F) -> ApiResult<T>
where
    F: Future<Output = GatewayResult<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(err) => Err(AppError::Internal(err.to_string())),
    }
}

fn mirror_status(result: ProxyResult) -> (StatusCode, Json<ProxyResult>) {
    let status = StatusCode::from_u16(result.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(result))
}
