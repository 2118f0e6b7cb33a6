use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::*;
use crate::{
    cache::AttemptLimiter,
    error::{AppError, AppResult},
    ledger::{
        balance::{self, AnnualStatement, Window, WindowSummary},
        repository::LedgerRepository,
    },
    middleware::ValidatedJson,
    notifications::{NotificationRecord, OutboxNotifier},
    payments::{
        models::{InitializePaymentResponse, VerifyPaymentResponse},
        reconciler::PaymentReconciler,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerRepository>,
    pub reconciler: Arc<PaymentReconciler>,
    /// Per-member cap on payment initializations
    pub init_limiter: Arc<AttemptLimiter>,
    pub notifications: Arc<OutboxNotifier>,
    pub payments_configured: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.ledger.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check could not reach database: {}", e);
            false
        }
    };

    Json(HealthResponse {
        status: if database { "healthy" } else { "degraded" }.to_string(),
        timestamp: Utc::now(),
        database,
        payments_configured: state.payments_configured,
    })
}

/// Start a mobile money contribution
/// POST /api/v1/payments/initialize
pub async fn initialize_payment(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<InitializePaymentRequest>,
) -> AppResult<(StatusCode, Json<InitializePaymentResponse>)> {
    if !state
        .init_limiter
        .try_acquire(&request.member_id.to_string())
        .await
    {
        warn!("Member {} hit the payment initialization limit", request.member_id);
        return Err(AppError::RateLimited);
    }

    let response = state.reconciler.initialize_payment(request.into()).await?;
    info!("Payment {} initialized ({})", response.reference, response.status);

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/payments/verify/:reference
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> AppResult<Json<VerifyPaymentResponse>> {
    let response = state.reconciler.verify_payment(&reference).await?;
    Ok(Json(response))
}

/// Every entry for the member with the balance after it
/// GET /api/v1/members/:member_id/ledger
pub async fn get_member_ledger(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> AppResult<Json<LedgerResponse>> {
    let entries = state.ledger.entries_for_member(member_id).await?;
    let entries = balance::compute_running_balances(entries);
    let current = entries
        .last()
        .map(|e| e.balance_after)
        .unwrap_or(Decimal::ZERO);

    Ok(Json(LedgerResponse {
        member_id,
        balance: current,
        entries,
    }))
}

/// GET /api/v1/members/:member_id/summary
pub async fn get_member_summary(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Query(query): Query<SummaryQuery>,
) -> AppResult<Json<WindowSummary>> {
    let window = query.window(Utc::now())?;
    let buckets = query.bucket_types()?;

    let entries = state.ledger.entries_for_member(member_id).await?;
    Ok(Json(balance::summarize_by_window(&entries, &window, &buckets)))
}

/// GET /api/v1/members/:member_id/statement/:year
pub async fn get_annual_statement(
    State(state): State<AppState>,
    Path((member_id, year)): Path<(Uuid, i32)>,
) -> AppResult<Json<AnnualStatement>> {
    let entries = state.ledger.entries_for_member(member_id).await?;
    Ok(Json(balance::annual_statement(&entries, year)?))
}

/// Preview of the interest a quarter's closing balance earns
/// GET /api/v1/members/:member_id/interest
pub async fn get_quarterly_interest(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Query(query): Query<InterestQuery>,
) -> AppResult<Json<InterestResponse>> {
    let rate = query.rate()?;
    let window = Window::quarter(query.year, query.quarter)?;

    let entries = state.ledger.entries_for_member(member_id).await?;

    Ok(Json(InterestResponse {
        member_id,
        year: query.year,
        quarter: query.quarter,
        annual_rate_percent: rate,
        closing_balance: balance::balance_at(&entries, window.end),
        interest: balance::quarterly_interest(&entries, &window, rate),
    }))
}

/// Notifications queued for the member and not yet delivered
/// GET /api/v1/members/:member_id/notifications
pub async fn get_pending_notifications(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> AppResult<Json<Vec<NotificationRecord>>> {
    let records = state.notifications.pending_for_member(member_id, 50).await?;
    Ok(Json(records))
}
