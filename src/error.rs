use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use tracing::error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Gateway unreachable, timed out or answered non-2xx.
    /// Safe to retry: nothing was moved to a terminal state.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Rejections raised while validating a payment initialization.
/// All of them happen before any external call.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {amount} outside allowed range {min}..={max}")]
    AmountOutOfRange {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid reporting window: {0}")]
    InvalidWindow(String),
}

impl AppError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::GatewayUnavailable(_) | AppError::Database(_))
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(
            self,
            AppError::Database(_) | AppError::Internal(_) | AppError::Config(_)
        ) {
            error!("Request failed: {}", self);
        }

        let (status, error_code, message, details) = match self {
            AppError::Payment(PaymentError::InvalidAmount(raw)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_AMOUNT",
                "Amount must be a positive number".to_string(),
                Some(serde_json::json!({ "amount": raw })),
            ),
            AppError::Payment(PaymentError::AmountOutOfRange { amount, min, max }) => (
                StatusCode::BAD_REQUEST,
                "AMOUNT_OUT_OF_RANGE",
                format!("Amount must be between {} and {}", min, max),
                Some(serde_json::json!({
                    "amount": amount.to_string(),
                    "min": min.to_string(),
                    "max": max.to_string(),
                })),
            ),
            AppError::Payment(PaymentError::InvalidPhoneNumber(phone)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_PHONE_NUMBER",
                "Phone number is not a valid mobile money number".to_string(),
                Some(serde_json::json!({ "phone_number": phone })),
            ),
            AppError::Payment(PaymentError::UnsupportedNetwork(network)) => (
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_NETWORK",
                format!("Mobile network '{}' is not supported", network),
                None,
            ),
            AppError::Ledger(LedgerError::InvalidWindow(reason)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_WINDOW",
                reason,
                None,
            ),
            AppError::GatewayUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "GATEWAY_UNAVAILABLE",
                "Payment service is temporarily unavailable, please try again".to_string(),
                None,
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                "Payments are not configured on this server".to_string(),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(reason) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                reason,
                None,
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many payment attempts, please wait and try again".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AppError::GatewayUnavailable("gateway request timed out".to_string())
        } else {
            AppError::GatewayUnavailable(format!("HTTP request error: {:?}", error))
        }
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
