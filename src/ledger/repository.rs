use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use crate::error::AppResult;
use crate::payments::models::{CompletionDetails, FailureDetails, GatewayAudit, PaymentIntent};
use crate::payments::store::PaymentStore;

const ENTRY_COLUMNS: &str =
    "id, member_id, amount, transaction_type, status, reference, description, occurred_at";

/// Ledger repository - the source of truth for contributions and payments
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ========== LEDGER ENTRIES ==========

    /// All entries for a member in chronological order.
    /// Entries sharing a timestamp come back in a stable order.
    pub async fn entries_for_member(&self, member_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_entries WHERE member_id = $1 ORDER BY occurred_at ASC, id ASC",
            ENTRY_COLUMNS
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(LedgerEntry::from_row).collect()
    }

    async fn insert_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries
                (id, member_id, amount, transaction_type, status, reference, description, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.member_id)
        .bind(entry.amount)
        .bind(entry.transaction_type.as_str())
        .bind(entry.status)
        .bind(&entry.reference)
        .bind(&entry.description)
        .bind(entry.occurred_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Move the entry linked to `reference` out of pending
    async fn settle_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        reference: &str,
        to_status: TransactionStatus,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE ledger_entries
            SET status = $2, updated_at = NOW()
            WHERE reference = $1 AND status = 'pending'
            "#,
        )
        .bind(reference)
        .bind(to_status)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // ========== PAYMENT INTENTS ==========

    pub async fn get_payment_intent(&self, reference: &str) -> AppResult<Option<PaymentIntent>> {
        let row = sqlx::query("SELECT * FROM payment_intents WHERE reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(PaymentIntent::from_row).transpose()
    }
}

#[async_trait]
impl PaymentStore for LedgerRepository {
    async fn create_pending(&self, intent: &PaymentIntent, entry: &LedgerEntry) -> AppResult<()> {
        let mut tx = self.begin_tx().await?;

        self.insert_entry(&mut tx, entry).await?;

        sqlx::query(
            r#"
            INSERT INTO payment_intents
                (reference, member_id, ledger_entry_id, amount, currency, phone_number,
                 network_code, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&intent.reference)
        .bind(intent.member_id)
        .bind(intent.ledger_entry_id)
        .bind(intent.amount)
        .bind(&intent.currency)
        .bind(&intent.phone_number)
        .bind(&intent.network_code)
        .bind(intent.status)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Stored pending payment {}", intent.reference);
        Ok(())
    }

    async fn get_intent(&self, reference: &str) -> AppResult<Option<PaymentIntent>> {
        self.get_payment_intent(reference).await
    }

    async fn record_gateway_response(&self, reference: &str, audit: &GatewayAudit) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_intents
            SET gateway_charge_id = COALESCE($2, gateway_charge_id),
                gateway_status = $3,
                gateway_response_text = $4,
                updated_at = NOW()
            WHERE reference = $1 AND status = 'pending'
            "#,
        )
        .bind(reference)
        .bind(&audit.gateway_charge_id)
        .bind(&audit.gateway_status)
        .bind(&audit.gateway_response_text)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_completed(&self, reference: &str, details: &CompletionDetails) -> AppResult<bool> {
        let mut tx = self.begin_tx().await?;

        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'completed',
                gateway_charge_id = COALESCE($2, gateway_charge_id),
                gateway_status = $3,
                gateway_response_text = $4,
                charged_amount = $5,
                fees = $6,
                authorization_code = $7,
                paid_at = $8,
                updated_at = NOW()
            WHERE reference = $1 AND status = 'pending'
            "#,
        )
        .bind(reference)
        .bind(&details.audit.gateway_charge_id)
        .bind(&details.audit.gateway_status)
        .bind(&details.audit.gateway_response_text)
        .bind(details.charged_amount)
        .bind(details.fees)
        .bind(&details.authorization_code)
        .bind(details.paid_at)
        .execute(&mut *tx)
        .await?;

        // Someone else already resolved it
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        self.settle_entry(&mut tx, reference, TransactionStatus::Completed)
            .await?;
        tx.commit().await?;

        info!("Ledger entry for {} marked completed", reference);
        Ok(true)
    }

    async fn mark_failed(&self, reference: &str, details: &FailureDetails) -> AppResult<bool> {
        let mut tx = self.begin_tx().await?;

        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'failed',
                gateway_charge_id = COALESCE($2, gateway_charge_id),
                gateway_status = $3,
                gateway_response_text = $4,
                failure_reason = $5,
                failed_at = $6,
                updated_at = NOW()
            WHERE reference = $1 AND status = 'pending'
            "#,
        )
        .bind(reference)
        .bind(&details.audit.gateway_charge_id)
        .bind(&details.audit.gateway_status)
        .bind(&details.audit.gateway_response_text)
        .bind(&details.failure_reason)
        .bind(details.failed_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        self.settle_entry(&mut tx, reference, TransactionStatus::Failed)
            .await?;
        tx.commit().await?;

        info!("Ledger entry for {} marked failed", reference);
        Ok(true)
    }
}
