//! Application error taxonomy and its HTTP mapping.
//!
//! Every service returns [`AppError`]. Domain failures pass through to the
//! client with a short message; infrastructure failures are logged here and
//! surfaced as an opaque `Internal`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::auth::password::PasswordError;
use crate::domain::aggregates::{OrderError, ProductError};
use crate::domain::flow::FlowError;
use crate::domain::value_objects::PageError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("{0}")]
    Unauthenticated(String),

    #[error("access to this shop is forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("shop has expired")]
    ShopExpired,

    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: i64 },

    #[error("{0}")]
    InvalidOption(String),

    #[error("product is referenced by existing orders")]
    ProductInUse,

    #[error("order can no longer be modified")]
    OrderImmutable,

    #[error("status change from {from} to {to} is not allowed")]
    StatusNotAllowed { from: i32, to: i32 },

    #[error("temporary token has expired")]
    TempTokenExpired,

    #[error("temporary token does not match")]
    TempTokenMismatch,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_)
            | Self::InsufficientStock { .. }
            | Self::InvalidOption(_)
            | Self::ProductInUse
            | Self::OrderImmutable
            | Self::StatusNotAllowed { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials
            | Self::Unauthenticated(_)
            | Self::TempTokenExpired
            | Self::TempTokenMismatch => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::ShopExpired => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(cause) => {
                tracing::error!(error = %cause, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => {
                tracing::error!(error = %other, "store failure");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidOption(msg) => Self::InvalidOption(msg),
            OrderError::InsufficientStock { product_id } => {
                Self::InsufficientStock { product_id }
            }
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

impl From<ProductError> for AppError {
    fn from(err: ProductError) -> Self {
        match err {
            ProductError::InsufficientStock { product_id } => Self::InsufficientStock { product_id },
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

impl From<PageError> for AppError {
    fn from(err: PageError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<FlowError> for AppError {
    fn from(err: FlowError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::Hash(cause) => Self::Internal(cause),
            policy => Self::InvalidInput(policy.to_string()),
        }
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
