//! Map domain errors to HTTP responses.

use super::types::{ErrorResponse, ThrottledResponse};
use crate::error::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

/// Response wrapper so handlers can use `?` on service calls.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            AuthError::Throttled { .. } | AuthError::TooManyAttempts { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AuthError::NoChallenge
            | AuthError::Expired
            | AuthError::Mismatch
            | AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Unverified | AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidTransition { .. } | AuthError::Conflict => StatusCode::CONFLICT,
            AuthError::NotificationDispatch(_) => StatusCode::BAD_GATEWAY,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self.0 {
            AuthError::Throttled { .. } | AuthError::TooManyAttempts { .. } => {
                let body = ThrottledResponse {
                    allowed: false,
                    remaining_ms: self.0.remaining_ms().unwrap_or_default(),
                };
                (status, Json(body)).into_response()
            }
            AuthError::Internal(err) => {
                error!("internal error: {err:#}");
                (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
            }
            AuthError::NotificationDispatch(err) => {
                error!("notification dispatch failed: {err:#}");
                (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
            }
            _ => (status, Json(ErrorResponse { error: self.0.to_string() })).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::Duration;

    #[test]
    fn statuses() {
        let cases = [
            (
                AuthError::Throttled {
                    remaining: Duration::seconds(5),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                AuthError::TooManyAttempts {
                    remaining: Duration::minutes(15),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (AuthError::Expired, StatusCode::BAD_REQUEST),
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AuthError::Unverified, StatusCode::FORBIDDEN),
            (AuthError::Conflict, StatusCode::CONFLICT),
            (
                AuthError::NotificationDispatch(anyhow!("smtp down")),
                StatusCode::BAD_GATEWAY,
            ),
            (AuthError::Internal(anyhow!("db down")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }

    #[test]
    fn internal_detail_stays_out_of_the_body() {
        let err = ApiError(AuthError::Internal(anyhow!("connection refused on 10.0.0.5")));
        assert!(!err.0.to_string().contains("10.0.0.5"));
    }
}
