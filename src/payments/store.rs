use async_trait::async_trait;

use super::models::{CompletionDetails, FailureDetails, GatewayAudit, PaymentIntent};
use crate::error::AppResult;
use crate::ledger::models::LedgerEntry;

/// Persistence the reconciler depends on.
///
/// The two `mark_*` methods are conditional writes: they apply only while the
/// stored intent is still `pending` and report whether they did. That is the
/// only serialization between concurrent observers of one reference.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert the pending ledger entry and its intent together
    async fn create_pending(&self, intent: &PaymentIntent, entry: &LedgerEntry) -> AppResult<()>;

    async fn get_intent(&self, reference: &str) -> AppResult<Option<PaymentIntent>>;

    /// Refresh audit fields of a still-pending intent
    async fn record_gateway_response(&self, reference: &str, audit: &GatewayAudit) -> AppResult<()>;

    async fn mark_completed(&self, reference: &str, details: &CompletionDetails) -> AppResult<bool>;

    async fn mark_failed(&self, reference: &str, details: &FailureDetails) -> AppResult<bool>;
}
