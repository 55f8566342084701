use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

// copied in spirit from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
// (also the shape server/src/http/mod.rs in the teacher codebase uses)

/// Catch-all for handler-internal failures that have no client-facing status
/// code of their own (extraction failures, a channel unexpectedly closing).
/// Anything that needs a specific status code gets its own small enum below.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(err = %self.0, "unhandled internal error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

/// `POST /register` failures (spec §4.1, §7).
#[derive(Debug)]
pub enum RegisterError {
    EmptyFilename,
    OverSize,
}

impl IntoResponse for RegisterError {
    fn into_response(self) -> Response {
        match self {
            RegisterError::EmptyFilename => {
                error_response(StatusCode::BAD_REQUEST, "filename must not be empty")
            }
            RegisterError::OverSize => {
                error_response(StatusCode::PAYLOAD_TOO_LARGE, "declared size exceeds limit")
            }
        }
    }
}

/// `GET /status/{token}` failures (spec §4.4).
#[derive(Debug)]
pub struct UnknownToken;

impl IntoResponse for UnknownToken {
    fn into_response(self) -> Response {
        error_response(StatusCode::NOT_FOUND, "unknown token")
    }
}

/// `GET /download/{token}[/{name}]` failures (spec §4.3, §7).
#[derive(Debug)]
pub enum DownloadError {
    NotFound,
    SourceUnavailable,
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        match self {
            DownloadError::NotFound => error_response(StatusCode::NOT_FOUND, "unknown token"),
            DownloadError::SourceUnavailable => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, "source unavailable")
            }
        }
    }
}
