use crate::market::ProviderError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use quant_core::ApiResponse;
use tracing::{debug, error};

/// Unified error type for API responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::RateLimited(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %message, "Request rejected");
        }
        (status, Json(ApiResponse::<()>::err(message))).into_response()
    }
}

impl From<quant_core::Error> for ApiError {
    fn from(e: quant_core::Error) -> Self {
        use quant_core::Error;
        let message = e.to_string();
        match e {
            Error::InvalidInput(_) | Error::UnknownMethod(_) | Error::UnknownStrategy(_) => {
                Self::BadRequest(message)
            }
            Error::NotFound(_) => Self::NotFound(message),
            Error::InsufficientData(_) | Error::Infeasible(_) | Error::Computation(_) => {
                Self::Unprocessable(message)
            }
            Error::Io(_) | Error::Json(_) => Self::Internal(message),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        let message = e.to_string();
        match e {
            ProviderError::NotFound(_) => Self::NotFound(message),
            ProviderError::RateLimited { .. } => Self::RateLimited(message),
            ProviderError::Upstream(_) | ProviderError::Decode(_) => Self::Upstream(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("computation task failed: {e}"))
    }
}

/// JSON body extractor whose rejections use the API error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor whose rejections use the API error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);
