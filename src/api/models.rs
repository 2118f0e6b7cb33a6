use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::ledger::balance::Window;
use crate::ledger::models::{LedgerEntryWithBalance, TransactionType};
use crate::payments::models::InitializePayment;

// ========== PAYMENTS ==========

/// Amount as sent by clients, either `"50.00"` or `50`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for RawAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawAmount::Number(n) => write!(f, "{}", n),
            RawAmount::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InitializePaymentRequest {
    pub member_id: Uuid,
    pub amount: RawAmount,
    #[validate(length(min = 1, max = 20, message = "phone number is required"))]
    pub phone_number: String,
    #[validate(length(min = 1, max = 32, message = "network code is required"))]
    pub network_code: String,
    #[validate(email(message = "invalid email address"))]
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl From<InitializePaymentRequest> for InitializePayment {
    fn from(req: InitializePaymentRequest) -> Self {
        Self {
            member_id: req.member_id,
            amount: req.amount.to_string(),
            phone_number: req.phone_number,
            network_code: req.network_code,
            email: req.email,
            metadata: req.metadata,
        }
    }
}

// ========== LEDGER ==========

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub member_id: Uuid,
    pub balance: Decimal,
    pub entries: Vec<LedgerEntryWithBalance>,
}

/// `?period=month|quarter|custom&year=&index=&from=&to=&buckets=a,b`
#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub period: Option<String>,
    pub year: Option<i32>,
    /// Month (1-12) or quarter (1-4) depending on `period`
    pub index: Option<u32>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub buckets: Option<String>,
}

impl SummaryQuery {
    /// Resolve to a window, defaulting to the period containing `now`
    pub fn window(&self, now: DateTime<Utc>) -> AppResult<Window> {
        let year = self.year.unwrap_or_else(|| now.year());
        let window = match self.period.as_deref().unwrap_or("month") {
            "month" => Window::month(year, self.index.unwrap_or_else(|| now.month()))?,
            "quarter" => Window::quarter(year, self.index.unwrap_or_else(|| (now.month() - 1) / 3 + 1))?,
            "custom" => {
                let (Some(from), Some(to)) = (self.from, self.to) else {
                    return Err(AppError::InvalidInput(
                        "custom period needs both 'from' and 'to'".to_string(),
                    ));
                };
                Window::custom(from, to)?
            }
            other => {
                return Err(AppError::InvalidInput(format!(
                    "unknown period '{}', expected month, quarter or custom",
                    other
                )))
            }
        };
        Ok(window)
    }

    /// Requested bucket types; the four standard types when none are given.
    /// Only known types can be buckets.
    pub fn bucket_types(&self) -> AppResult<Vec<TransactionType>> {
        match self.buckets.as_deref().map(str::trim) {
            Some(list) if !list.is_empty() => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|tag| match TransactionType::parse(tag) {
                    TransactionType::Other(_) => Err(AppError::InvalidInput(format!(
                        "unknown bucket '{}'",
                        tag
                    ))),
                    known => Ok(known),
                })
                .collect(),
            _ => Ok(vec![
                TransactionType::ContributionMobileMoney,
                TransactionType::ContributionPayrollDeduction,
                TransactionType::Interest,
                TransactionType::Withdrawal,
            ]),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InterestQuery {
    pub year: i32,
    pub quarter: u32,
    /// Annual rate in percent, e.g. `"12.5"`
    pub rate: String,
}

impl InterestQuery {
    pub fn rate(&self) -> AppResult<Decimal> {
        let rate = Decimal::from_str(self.rate.trim())
            .map_err(|_| AppError::InvalidInput(format!("invalid rate '{}'", self.rate)))?;
        if rate.is_sign_negative() {
            return Err(AppError::InvalidInput("rate cannot be negative".to_string()));
        }
        Ok(rate)
    }
}

#[derive(Debug, Serialize)]
pub struct InterestResponse {
    pub member_id: Uuid,
    pub year: i32,
    pub quarter: u32,
    pub annual_rate_percent: Decimal,
    pub closing_balance: Decimal,
    pub interest: Decimal,
}

// ========== HEALTH ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub database: bool,
    pub payments_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_amount_accepts_string_or_number() {
        let body = r#"{"member_id":"6f1c1f5e-3b8e-4a43-9d7e-2f7a1c0d9b11","amount":50,"phone_number":"0241234567","network_code":"mtn"}"#;
        let req: InitializePaymentRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.amount.to_string(), "50");
        assert!(req.validate().is_ok());

        let body = body.replace("50", "\"12.50\"");
        let req: InitializePaymentRequest = serde_json::from_str(&body).unwrap();
        let payment: InitializePayment = req.into();
        assert_eq!(payment.amount, "12.50");
        assert!(payment.metadata.is_null());
    }

    #[test]
    fn test_invalid_email_fails_validation() {
        let body = r#"{"member_id":"6f1c1f5e-3b8e-4a43-9d7e-2f7a1c0d9b11","amount":"5","phone_number":"0241234567","network_code":"mtn","email":"nope"}"#;
        let req: InitializePaymentRequest = serde_json::from_str(body).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_summary_defaults_to_current_month() {
        let window = SummaryQuery::default().window(now()).unwrap();
        assert_eq!(window, Window::month(2024, 5).unwrap());
    }

    #[test]
    fn test_summary_quarter_and_unknown_period() {
        let query = SummaryQuery {
            period: Some("quarter".into()),
            ..Default::default()
        };
        assert_eq!(query.window(now()).unwrap(), Window::quarter(2024, 2).unwrap());

        let query = SummaryQuery {
            period: Some("fortnight".into()),
            ..Default::default()
        };
        assert!(matches!(query.window(now()), Err(AppError::InvalidInput(_))));

        let query = SummaryQuery {
            period: Some("custom".into()),
            from: Some(now()),
            ..Default::default()
        };
        assert!(matches!(query.window(now()), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_bucket_list_parsing() {
        let query = SummaryQuery {
            buckets: Some("interest, withdrawal ,".into()),
            ..Default::default()
        };
        assert_eq!(
            query.bucket_types().unwrap(),
            vec![TransactionType::Interest, TransactionType::Withdrawal]
        );
        assert_eq!(SummaryQuery::default().bucket_types().unwrap().len(), 4);
    }

    #[test]
    fn test_unknown_bucket_rejected() {
        let query = SummaryQuery {
            buckets: Some("interest,loan_repayment".into()),
            ..Default::default()
        };
        match query.bucket_types() {
            Err(AppError::InvalidInput(msg)) => assert!(msg.contains("loan_repayment")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_interest_rate_parsing() {
        let query = InterestQuery {
            year: 2024,
            quarter: 1,
            rate: "12.5".into(),
        };
        assert_eq!(query.rate().unwrap(), Decimal::new(125, 1));

        let query = InterestQuery {
            rate: "-1".into(),
            ..query
        };
        assert!(query.rate().is_err());
    }
}
