// Member notifications
//
// Persistence: PostgreSQL outbox. Delivery (email/SMS/push) is handled by a
// separate worker reading the `notifications` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentReceived,
    PaymentFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentReceived => "payment_received",
            NotificationKind::PaymentFailed => "payment_failed",
        }
    }

    fn templates(&self) -> (&'static str, &'static str) {
        match self {
            NotificationKind::PaymentReceived => (
                "Contribution received",
                "Your mobile money contribution of {{currency}} {{amount}} was received. Reference: {{reference}}.",
            ),
            NotificationKind::PaymentFailed => (
                "Contribution failed",
                "Your mobile money contribution of {{currency}} {{amount}} did not go through: {{reason}}. Reference: {{reference}}.",
            ),
        }
    }

    /// Subject and body with `{{name}}` placeholders filled in.
    /// Placeholders without a value are left as they are.
    pub fn render(&self, variables: &BTreeMap<String, String>) -> (String, String) {
        let (subject, body) = self.templates();
        (fill(subject, variables), fill(body, variables))
    }
}

fn fill(template: &str, variables: &BTreeMap<String, String>) -> String {
    variables.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{{{}}}}}", name), value)
    })
}

/// Hands a notification to whatever delivers it
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        member_id: Uuid,
        kind: NotificationKind,
        variables: &BTreeMap<String, String>,
    ) -> AppResult<()>;
}

// ============ OUTBOX PATTERN (PERSISTENCE) ============

/// Notification stored in database (outbox pattern)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub member_id: Uuid,
    pub kind: String,
    pub subject: String,
    pub body: String,
    pub status: String, // "pending", "sent", "failed"
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

pub struct OutboxNotifier {
    pool: PgPool,
}

impl OutboxNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pending notifications for one member, newest first
    pub async fn pending_for_member(&self, member_id: Uuid, limit: i64) -> AppResult<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, NotificationRecord>(
            "SELECT * FROM notifications WHERE member_id = $1 AND status = 'pending'
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(member_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl NotificationDispatcher for OutboxNotifier {
    async fn notify(
        &self,
        member_id: Uuid,
        kind: NotificationKind,
        variables: &BTreeMap<String, String>,
    ) -> AppResult<()> {
        let id = Uuid::new_v4();
        let (subject, body) = kind.render(variables);

        sqlx::query(
            r#"
            INSERT INTO notifications (id, member_id, kind, subject, body, status, retry_count, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6)
            "#,
        )
        .bind(id)
        .bind(member_id)
        .bind(kind.as_str())
        .bind(&subject)
        .bind(&body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!("📬 Notification queued: {} ({}) for member {}", id, kind.as_str(), member_id);
        Ok(())
    }
}
