use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

use crate::error::AppResult;

/// Lifecycle status shared by ledger entries and payment intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Completed and failed admit no further transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of movement recorded against a member's account.
///
/// Stored as free text; tags this build does not know about are kept
/// verbatim in `Other` so they still count toward totals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransactionType {
    ContributionMobileMoney,
    ContributionPayrollDeduction,
    Interest,
    Withdrawal,
    Other(String),
}

impl TransactionType {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionType::ContributionMobileMoney => "contribution_mobile_money",
            TransactionType::ContributionPayrollDeduction => "contribution_payroll_deduction",
            TransactionType::Interest => "interest",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Other(tag) => tag,
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "contribution_mobile_money" => TransactionType::ContributionMobileMoney,
            "contribution_payroll_deduction" => TransactionType::ContributionPayrollDeduction,
            "interest" => TransactionType::Interest,
            "withdrawal" => TransactionType::Withdrawal,
            other => TransactionType::Other(other.to_string()),
        }
    }

    pub fn is_contribution(&self) -> bool {
        matches!(
            self,
            TransactionType::ContributionMobileMoney | TransactionType::ContributionPayrollDeduction
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TransactionType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TransactionType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(TransactionType::parse(&tag))
    }
}

/// One recorded movement against a member's account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub member_id: Uuid,

    /// Positive for contributions and interest, negative for withdrawals
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,

    /// Links a mobile-money entry to its payment intent
    pub reference: Option<String>,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount this entry adds to the running balance
    pub fn effective_amount(&self) -> Decimal {
        if self.status == TransactionStatus::Completed {
            self.amount
        } else {
            Decimal::ZERO
        }
    }

    /// Create from database row
    pub fn from_row(row: &sqlx::postgres::PgRow) -> AppResult<Self> {
        use sqlx::Row;

        let transaction_type: String = row.try_get("transaction_type")?;

        Ok(LedgerEntry {
            id: row.try_get("id")?,
            member_id: row.try_get("member_id")?,
            amount: row.try_get("amount")?,
            transaction_type: TransactionType::parse(&transaction_type),
            status: row.try_get("status")?,
            reference: row.try_get("reference")?,
            description: row.try_get("description")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

/// Ledger entry paired with the balance right after it
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntryWithBalance {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_after: Decimal,
}
