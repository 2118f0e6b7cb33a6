use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::TransactionStatus;

/// Local record of one mobile-money charge attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub reference: String,
    pub member_id: Uuid,
    pub ledger_entry_id: Uuid,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub phone_number: String,
    pub network_code: String,
    pub status: TransactionStatus,

    // Copied verbatim from the gateway for audit
    pub gateway_charge_id: Option<String>,
    pub gateway_status: Option<String>,
    pub gateway_response_text: Option<String>,

    #[serde(with = "rust_decimal::serde::float_option")]
    pub charged_amount: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub fees: Option<Decimal>,
    pub authorization_code: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Create from database row
    pub fn from_row(row: &sqlx::postgres::PgRow) -> AppResult<Self> {
        use sqlx::Row;

        Ok(PaymentIntent {
            reference: row.try_get("reference")?,
            member_id: row.try_get("member_id")?,
            ledger_entry_id: row.try_get("ledger_entry_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            phone_number: row.try_get("phone_number")?,
            network_code: row.try_get("network_code")?,
            status: row.try_get("status")?,
            gateway_charge_id: row.try_get("gateway_charge_id")?,
            gateway_status: row.try_get("gateway_status")?,
            gateway_response_text: row.try_get("gateway_response_text")?,
            charged_amount: row.try_get("charged_amount")?,
            fees: row.try_get("fees")?,
            authorization_code: row.try_get("authorization_code")?,
            paid_at: row.try_get("paid_at")?,
            failure_reason: row.try_get("failure_reason")?,
            failed_at: row.try_get("failed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Transaction status as reported by the gateway.
///
/// Only `Success` and `Failed` are terminal. Anything the gateway may add
/// later lands in `Unknown` and keeps the payment pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
    Ongoing,
    SendOtp,
    PayOffline,
    Abandoned,
    Unknown(String),
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => GatewayStatus::Success,
            "failed" => GatewayStatus::Failed,
            "pending" => GatewayStatus::Pending,
            "ongoing" => GatewayStatus::Ongoing,
            "send_otp" => GatewayStatus::SendOtp,
            "pay_offline" => GatewayStatus::PayOffline,
            "abandoned" => GatewayStatus::Abandoned,
            _ => GatewayStatus::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayStatus::Success => "success",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Pending => "pending",
            GatewayStatus::Ongoing => "ongoing",
            GatewayStatus::SendOtp => "send_otp",
            GatewayStatus::PayOffline => "pay_offline",
            GatewayStatus::Abandoned => "abandoned",
            GatewayStatus::Unknown(raw) => raw,
        }
    }

    /// Local state this gateway status resolves to, if any
    pub fn terminal_state(&self) -> Option<TransactionStatus> {
        match self {
            GatewayStatus::Success => Some(TransactionStatus::Completed),
            GatewayStatus::Failed => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// What the gateway said about a transaction, from either a charge or a
/// verification call
#[derive(Debug, Clone)]
pub struct GatewayObservation {
    pub status: GatewayStatus,
    pub gateway_id: Option<String>,
    pub amount: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub paid_at: Option<DateTime<Utc>>,
    pub authorization_code: Option<String>,
    /// Human-readable text, the failure reason when `status` is `Failed`
    pub gateway_response: Option<String>,
    /// Instruction to show the payer, e.g. "approve the prompt on your phone"
    pub display_text: Option<String>,
}

impl GatewayObservation {
    /// Observation for a reference the gateway does not know
    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self {
            status: GatewayStatus::Unknown("not_found".to_string()),
            gateway_id: None,
            amount: None,
            fees: None,
            paid_at: None,
            authorization_code: None,
            gateway_response: Some(reason.into()),
            display_text: None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self.status {
            GatewayStatus::Failed => self.gateway_response.as_deref(),
            _ => None,
        }
    }
}

/// Outbound charge parameters
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount: Decimal,
    pub currency: String,
    pub phone_number: String,
    pub provider_code: String,
    pub reference: String,
    pub email: String,
    pub metadata: serde_json::Value,
}

/// Audit fields refreshed on every non-terminal observation
#[derive(Debug, Clone, Default)]
pub struct GatewayAudit {
    pub gateway_charge_id: Option<String>,
    pub gateway_status: Option<String>,
    pub gateway_response_text: Option<String>,
}

impl From<&GatewayObservation> for GatewayAudit {
    fn from(observation: &GatewayObservation) -> Self {
        Self {
            gateway_charge_id: observation.gateway_id.clone(),
            gateway_status: Some(observation.status.as_str().to_string()),
            gateway_response_text: observation.gateway_response.clone(),
        }
    }
}

/// Fields written when a payment completes
#[derive(Debug, Clone)]
pub struct CompletionDetails {
    pub audit: GatewayAudit,
    pub charged_amount: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub authorization_code: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// Fields written when a payment fails
#[derive(Debug, Clone)]
pub struct FailureDetails {
    pub audit: GatewayAudit,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Validated input for a new charge
#[derive(Debug, Clone)]
pub struct InitializePayment {
    pub member_id: Uuid,
    pub amount: String,
    pub phone_number: String,
    pub network_code: String,
    pub email: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializePaymentResponse {
    pub reference: String,
    pub status: TransactionStatus,
    pub display_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyPaymentResponse {
    pub reference: String,
    pub status: TransactionStatus,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub fees: Option<Decimal>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl From<PaymentIntent> for VerifyPaymentResponse {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            amount: intent.charged_amount.unwrap_or(intent.amount),
            reference: intent.reference,
            status: intent.status,
            fees: intent.fees,
            paid_at: intent.paid_at,
            failure_reason: intent.failure_reason,
        }
    }
}
