//! Rendering and logging of [`ServiceError`]s at the HTTP boundary.

use crate::error::ServiceError;
use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts},
    http::{Method, StatusCode, Uri, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use utoipa::ToSchema;

/// Error payload returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// HTTP status code, repeated for clients that only see the body
    pub status: u16,
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status;
        let body = ErrorBody {
            status: status.as_u16(),
            error: self.0.message,
        };
        (status, Json(body)).into_response()
    }
}

/// Request details attached to error logs.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub uri: Uri,
    pub remote_addr: Option<SocketAddr>,
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            remote_addr: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        })
    }
}

impl RequestMeta {
    /// Logs `err` with the request it belongs to and converts it for the response.
    pub fn fail(&self, err: ServiceError) -> ApiError {
        let remote_addr = self
            .remote_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        if err.is_internal() {
            tracing::error!(
                error = %err,
                context = ?err.context,
                method = %self.method,
                url = %self.uri.path(),
                remote_addr = %remote_addr,
                "request failed"
            );
        } else {
            tracing::warn!(
                error = %err,
                status = err.status.as_u16(),
                context = ?err.context,
                method = %self.method,
                url = %self.uri.path(),
                remote_addr = %remote_addr,
                "request rejected"
            );
        }
        ApiError(err)
    }

    pub fn bad_request(
        &self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
        message: &str,
    ) -> ApiError {
        self.fail(ServiceError::new(source, StatusCode::BAD_REQUEST, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_uses_service_status_and_message() {
        let err = ServiceError::new("boom", StatusCode::UNAUTHORIZED, "authentication failed");
        let response = ApiError(err).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_error_hides_source() {
        let err = ServiceError::internal("db exploded", "get or create identity");
        assert_eq!(err.message, "Internal Server Error");
        let response = ApiError(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
