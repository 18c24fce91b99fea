//! Axum adapter for facade failures
//!
//! Handlers return [`HttpFailure`] (usually through `?` on a
//! [`FailedRequest`]) and the client receives the formatted envelope with the
//! classified status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dbshield_common::FailedRequest;

/// Response wrapper for a failed database request
#[derive(Debug)]
pub struct HttpFailure(pub FailedRequest);

impl From<FailedRequest> for HttpFailure {
    fn from(value: FailedRequest) -> Self {
        HttpFailure(value)
    }
}

impl IntoResponse for HttpFailure {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.into_envelope())).into_response()
    }
}
