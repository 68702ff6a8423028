use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;

use parley_gateway::StreamError;
use parley_support::SupportError;
use parley_types::api::ErrorBody;

/// HTTP face of `SupportError`.
#[derive(Debug)]
pub struct ApiError(pub SupportError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<SupportError> for ApiError {
    fn from(err: SupportError) -> Self {
        Self(err)
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SupportError::Unauthorized => StatusCode::UNAUTHORIZED,
            SupportError::Forbidden => StatusCode::FORBIDDEN,
            SupportError::NotFound(_) => StatusCode::NOT_FOUND,
            SupportError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SupportError::InvalidState(_) => StatusCode::CONFLICT,
            SupportError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SupportError::Upstream(_) => StatusCode::BAD_GATEWAY,
            SupportError::EventsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            SupportError::TicketCodeExhausted | SupportError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the log
        let message = match &self.0 {
            SupportError::Storage(e) => {
                error!("storage failure: {:#}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let remaining_tokens = match &self.0 {
            SupportError::RateLimited { remaining, .. } => Some(*remaining),
            _ => None,
        };

        let mut response = (
            status,
            Json(ErrorBody {
                error: message,
                remaining_tokens,
            }),
        )
            .into_response();

        if let SupportError::RateLimited { retry_after_ms, .. } = &self.0 {
            let secs = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_its_status() {
        let cases = [
            (SupportError::Unauthorized, 401),
            (SupportError::Forbidden, 403),
            (SupportError::NotFound("conversation"), 404),
            (SupportError::invalid_input("x"), 400),
            (SupportError::invalid_state("x"), 409),
            (
                SupportError::RateLimited {
                    remaining: 0.0,
                    retry_after_ms: 10,
                },
                429,
            ),
            (SupportError::upstream("x"), 502),
            (SupportError::TicketCodeExhausted, 500),
            (SupportError::EventsUnavailable, 503),
            (SupportError::Storage(anyhow::anyhow!("disk")), 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError(err).status().as_u16(), code);
        }
    }

    #[test]
    fn rate_limit_sets_retry_after_in_whole_seconds() {
        let response = ApiError(SupportError::RateLimited {
            remaining: 0.4,
            retry_after_ms: 1500,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}
