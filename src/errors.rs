use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard JSON error body returned by every handler.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Product 550e8400-e29b-41d4-a716-446655440000 not found",
    "details": null,
    "timestamp": "2026-08-29T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Cart line {0} not found in this cart")]
    LineNotFound(Uuid),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cart contains products from more than one bakery")]
    MultipleBakeriesInCart,

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ProductNotFound(_)
            | Self::LineNotFound(_)
            | Self::OrderNotFound(_)
            | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::EmptyCart
            | Self::MultipleBakeriesInCart
            | Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::WebhookSignatureInvalid
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// messages so implementation details do not leak.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}
