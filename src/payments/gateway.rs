use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::models::{ChargeRequest, GatewayObservation, GatewayStatus};
use crate::error::{AppError, AppResult};

/// External mobile-money provider.
///
/// Implementations make exactly one outbound call per method invocation and
/// never retry. Transport failures come back as `AppError::GatewayUnavailable`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initiate_charge(&self, request: &ChargeRequest) -> AppResult<GatewayObservation>;

    /// A reference the provider does not know yields an observation with an
    /// `Unknown` status rather than an error.
    async fn verify_transaction(&self, reference: &str) -> AppResult<GatewayObservation>;
}

// ============ PAYSTACK ============

pub struct PaystackGateway {
    base_url: String,
    secret_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct PaystackChargeRequest<'a> {
    email: &'a str,
    /// Minor units (pesewas)
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    mobile_money: PaystackMobileMoney<'a>,
    metadata: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct PaystackMobileMoney<'a> {
    phone: &'a str,
    provider: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope {
    status: bool,
    message: String,
    data: Option<PaystackTransaction>,
}

#[derive(Debug, Deserialize)]
struct PaystackTransaction {
    id: Option<serde_json::Value>,
    status: Option<String>,
    amount: Option<i64>,
    fees: Option<i64>,
    paid_at: Option<String>,
    gateway_response: Option<String>,
    display_text: Option<String>,
    authorization: Option<PaystackAuthorization>,
}

#[derive(Debug, Deserialize)]
struct PaystackAuthorization {
    authorization_code: Option<String>,
}

impl PaystackGateway {
    pub fn new(base_url: String, secret_key: String, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            client,
        })
    }

    async fn read_envelope(response: reqwest::Response) -> AppResult<PaystackEnvelope> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::GatewayUnavailable(format!(
                "Paystack answered {}: {}",
                status, error_text
            )));
        }

        response
            .json::<PaystackEnvelope>()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("Unreadable Paystack response: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn initiate_charge(&self, request: &ChargeRequest) -> AppResult<GatewayObservation> {
        let body = PaystackChargeRequest {
            email: &request.email,
            amount: to_minor_units(request.amount)?,
            currency: &request.currency,
            reference: &request.reference,
            mobile_money: PaystackMobileMoney {
                phone: &request.phone_number,
                provider: &request.provider_code,
            },
            metadata: &request.metadata,
        };

        let response = self
            .client
            .post(format!("{}/charge", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;

        let envelope = Self::read_envelope(response).await?;
        info!(
            "📲 Charge submitted for {}: {}",
            request.reference, envelope.message
        );

        match envelope.data {
            Some(data) => Ok(observation_from(data)),
            None => Err(AppError::GatewayUnavailable(format!(
                "Paystack returned no charge data: {}",
                envelope.message
            ))),
        }
    }

    async fn verify_transaction(&self, reference: &str) -> AppResult<GatewayObservation> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        // Paystack answers an unknown reference with 400/404 and a
        // "not found" message
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST) {
            let error_text = response.text().await.unwrap_or_default();
            if error_text.to_ascii_lowercase().contains("not found") {
                warn!("Paystack does not know reference {}", reference);
                return Ok(GatewayObservation::unresolved(error_text));
            }
            return Err(AppError::GatewayUnavailable(format!(
                "Paystack rejected verification: {}",
                error_text
            )));
        }

        let envelope = Self::read_envelope(response).await?;
        debug!(
            "Verification for {}: status={} message={}",
            reference, envelope.status, envelope.message
        );

        Ok(envelope
            .data
            .map(observation_from)
            .unwrap_or_else(|| GatewayObservation::unresolved(envelope.message)))
    }
}

fn observation_from(data: PaystackTransaction) -> GatewayObservation {
    let status = data
        .status
        .as_deref()
        .map(GatewayStatus::parse)
        .unwrap_or_else(|| GatewayStatus::Unknown(String::new()));

    let gateway_id = data.id.map(|id| match id {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    });

    let paid_at = data
        .paid_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    GatewayObservation {
        status,
        gateway_id,
        amount: data.amount.map(from_minor_units),
        fees: data.fees.map(from_minor_units),
        paid_at,
        authorization_code: data.authorization.and_then(|a| a.authorization_code),
        gateway_response: data.gateway_response,
        display_text: data.display_text,
    }
}

fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| AppError::InvalidInput(format!("Amount {} too large", amount)))
}

fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse(json: &str) -> GatewayObservation {
        let envelope: PaystackEnvelope = serde_json::from_str(json).unwrap();
        observation_from(envelope.data.unwrap())
    }

    #[test]
    fn test_successful_charge_maps_amounts() {
        let observation = parse(
            r#"{
                "status": true,
                "message": "Charge attempted",
                "data": {
                    "id": 4099260516,
                    "status": "success",
                    "reference": "TSA-1",
                    "amount": 5000,
                    "fees": 98,
                    "paid_at": "2024-05-01T10:15:30.000Z",
                    "gateway_response": "Approved",
                    "authorization": { "authorization_code": "AUTH_abc123" }
                }
            }"#,
        );

        assert_eq!(observation.status, GatewayStatus::Success);
        assert_eq!(observation.gateway_id.as_deref(), Some("4099260516"));
        assert_eq!(observation.amount, Some(dec!(50.00)));
        assert_eq!(observation.fees, Some(dec!(0.98)));
        assert_eq!(observation.authorization_code.as_deref(), Some("AUTH_abc123"));
        assert!(observation.paid_at.is_some());
        assert_eq!(observation.failure_reason(), None);
    }

    #[test]
    fn test_offline_charge_keeps_display_text() {
        let observation = parse(
            r#"{
                "status": true,
                "message": "Charge attempted",
                "data": {
                    "status": "pay_offline",
                    "display_text": "Please complete authorization process on your mobile phone",
                    "paid_at": null
                }
            }"#,
        );

        assert_eq!(observation.status, GatewayStatus::PayOffline);
        assert!(observation.display_text.unwrap().contains("mobile phone"));
        assert!(observation.paid_at.is_none());
    }

    #[test]
    fn test_failed_charge_exposes_reason() {
        let observation = parse(
            r#"{"status": true, "message": "Charge attempted",
                "data": {"status": "failed", "gateway_response": "Insufficient funds"}}"#,
        );
        assert_eq!(observation.failure_reason(), Some("Insufficient funds"));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(dec!(50)).unwrap(), 5000);
        assert_eq!(to_minor_units(dec!(12.345)).unwrap(), 1234);
        assert_eq!(from_minor_units(1999), dec!(19.99));
    }
}
