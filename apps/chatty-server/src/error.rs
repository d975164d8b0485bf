use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

/// Closed set of client-visible failure kinds.
///
/// Anything a handler raises must be one of these; unclassified failures are
/// coerced into `InternalServerError` at the boundary (the original cause is
/// logged, never serialized).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    InternalServerError(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "Bad Request",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::NotFound(_) => "Not Found",
            ApiError::UnprocessableEntity(_) => "Unprocessable Entity",
            ApiError::InternalServerError(_) => "Internal Server Error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::UnprocessableEntity(msg)
            | ApiError::InternalServerError(msg) => msg,
        }
    }

    /// The uniform external serialization. Nothing beyond these three fields
    /// ever reaches a client.
    pub fn serialize(&self) -> Value {
        json!({
            "message": self.message(),
            "statusCode": self.status_code().as_u16(),
            "status": self.status_label(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.serialize())).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "unclassified error coerced to internal server error");
        ApiError::InternalServerError("internal server error".to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        error!(error = %err, "store error coerced to internal server error");
        ApiError::InternalServerError("internal server error".to_string())
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        error!(error = %err, "broker error coerced to internal server error");
        ApiError::InternalServerError("internal server error".to_string())
    }
}

impl From<event_bus::BusError> for ApiError {
    fn from(err: event_bus::BusError) -> Self {
        error!(error = %err, "bus error coerced to internal server error");
        ApiError::InternalServerError("internal server error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_maps_to_its_status_class() {
        let table = [
            (ApiError::BadRequest("m".into()), 400, "Bad Request"),
            (ApiError::Unauthorized("m".into()), 401, "Unauthorized"),
            (ApiError::Forbidden("m".into()), 403, "Forbidden"),
            (ApiError::NotFound("m".into()), 404, "Not Found"),
            (
                ApiError::UnprocessableEntity("m".into()),
                422,
                "Unprocessable Entity",
            ),
            (
                ApiError::InternalServerError("m".into()),
                500,
                "Internal Server Error",
            ),
        ];
        for (err, code, label) in table {
            assert_eq!(err.status_code().as_u16(), code);
            assert_eq!(err.status_label(), label);
        }
    }

    #[test]
    fn serialization_exposes_exactly_three_fields() {
        let body = ApiError::UnprocessableEntity("bad payload".into()).serialize();
        assert_eq!(
            body,
            json!({
                "message": "bad payload",
                "statusCode": 422,
                "status": "Unprocessable Entity",
            })
        );
        assert_eq!(body.as_object().unwrap().len(), 3);
    }

    #[test]
    fn unclassified_errors_coerce_to_internal() {
        let err: ApiError = anyhow::anyhow!("db exploded: password=hunter2").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        // Internal details must not leak into the client-visible message.
        assert_eq!(err.message(), "internal server error");
    }
}
