use axum::{
    extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse, Json,
};
use onenet_core::ProxyError;
use serde::Serialize;

/// Failure envelope shared by every endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    pub error: String,
}

#[derive(Debug)]
pub enum AppError {
    Proxy(ProxyError),
    BadRequest(String),
    Internal(String),
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        AppError::Proxy(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message, error) = match self {
            AppError::Proxy(err @ ProxyError::Validation { .. }) => {
                (StatusCode::BAD_REQUEST, err.to_string(), err.to_string())
            }
            AppError::Proxy(err @ ProxyError::Signing(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                err.to_string(),
            ),
            AppError::Proxy(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("proxy service error: {}", err),
                err.to_string(),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid request body".to_string(),
                msg,
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
                msg,
            ),
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                status_code: status.as_u16(),
                message,
                error,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, AppError>;
