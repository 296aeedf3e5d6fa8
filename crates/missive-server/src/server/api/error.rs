use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use missive_core::{AllocationError, QueryInputError, StoreError};
use serde::Serialize;

/// Body of every non-2xx reply.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failure of an HTTP request, mapped onto a status code.
///
/// Infrastructure details are logged, not echoed: store and allocation
/// failures reply with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidQuery(#[from] QueryInputError),

    #[error("invalid query string: {0}")]
    InvalidQueryString(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("no id allocator configured")]
    NoAllocator,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidQuery(_) | Self::InvalidQueryString(_) | Self::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Allocation(AllocationError::NotReady { .. }) | Self::NoAllocator => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Allocation(AllocationError::AllocationFailed { .. }) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::InvalidQuery(e) => e.to_string(),
            Self::InvalidQueryString(_) | Self::InvalidBody(_) => self.to_string(),
            Self::Allocation(AllocationError::NotReady { .. }) | Self::NoAllocator => {
                "id allocator unavailable".to_string()
            }
            Self::Allocation(_) | Self::Store(_) => "server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "Request failed");
        } else {
            tracing::debug!(error = %self, %status, "Rejected request");
        }

        (
            status,
            Json(ErrorBody {
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}
