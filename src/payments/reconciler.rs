use chrono::{DateTime, Utc};
use rand::{distr::Alphanumeric, Rng};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::gateway::PaymentGateway;
use super::models::*;
use super::phone::{parse_mobile_number, resolve_network, NetworkConfig};
use super::store::PaymentStore;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult, PaymentError};
use crate::ledger::models::{LedgerEntry, TransactionStatus, TransactionType};
use crate::notifications::{NotificationDispatcher, NotificationKind};
use crate::retry::{retry_with_policy, RetryPolicy};

/// Payment limits and defaults taken from configuration
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub charge_email_domain: String,
}

impl From<&AppConfig> for PaymentSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            min_amount: config.min_payment_amount,
            max_amount: config.max_payment_amount,
            charge_email_domain: config.charge_email_domain.clone(),
        }
    }
}

/// What one gateway observation does to a stored payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Complete,
    Fail,
    /// Gateway has no final answer yet; stay pending
    Unresolved,
    /// Already terminal and the gateway agrees
    AlreadyResolved,
    /// Already terminal and the gateway says otherwise; first answer wins
    Conflict {
        stored: TransactionStatus,
        observed: TransactionStatus,
    },
}

pub fn decide_transition(current: TransactionStatus, observed: &GatewayStatus) -> Transition {
    let observed_state = observed.terminal_state();
    if current == TransactionStatus::Pending {
        return match observed_state {
            Some(TransactionStatus::Completed) => Transition::Complete,
            Some(TransactionStatus::Failed) => Transition::Fail,
            _ => Transition::Unresolved,
        };
    }

    let observed = observed_state.unwrap_or(TransactionStatus::Pending);
    if observed == current {
        Transition::AlreadyResolved
    } else {
        Transition::Conflict {
            stored: current,
            observed,
        }
    }
}

/// Parse a caller-supplied amount and check it against the configured range
pub fn parse_amount(raw: &str, settings: &PaymentSettings) -> AppResult<Decimal> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| PaymentError::InvalidAmount(raw.to_string()))?
        .normalize();

    if amount <= Decimal::ZERO || amount.scale() > 2 {
        return Err(PaymentError::InvalidAmount(raw.to_string()).into());
    }

    if amount < settings.min_amount || amount > settings.max_amount {
        return Err(PaymentError::AmountOutOfRange {
            amount,
            min: settings.min_amount,
            max: settings.max_amount,
        }
        .into());
    }

    Ok(amount)
}

/// `TSA-<timestamp>-<10 random alphanumerics>`
pub fn generate_reference(now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("TSA-{}-{}", now.format("%Y%m%d%H%M%S"), suffix.to_ascii_uppercase())
}

fn default_display_text(status: TransactionStatus, network: &NetworkConfig) -> String {
    match status {
        TransactionStatus::Completed => "Payment received".to_string(),
        TransactionStatus::Failed => "Payment failed".to_string(),
        TransactionStatus::Pending => format!(
            "Approve the {} prompt on your phone to complete the payment",
            network.display_name
        ),
    }
}

/// Drives payment intents from `pending` to a terminal state using gateway
/// observations, and keeps the linked ledger entry in step.
pub struct PaymentReconciler {
    store: Arc<dyn PaymentStore>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    notifier: Arc<dyn NotificationDispatcher>,
    settings: PaymentSettings,
    notify_policy: RetryPolicy,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            settings,
            notify_policy: RetryPolicy::default(),
        }
    }

    pub fn with_notify_policy(mut self, policy: RetryPolicy) -> Self {
        self.notify_policy = policy;
        self
    }

    fn gateway(&self) -> AppResult<&Arc<dyn PaymentGateway>> {
        self.gateway
            .as_ref()
            .ok_or_else(|| AppError::Config("payment gateway credentials are not configured".to_string()))
    }

    /// Validate, record a pending contribution, and ask the gateway to charge.
    ///
    /// A terminal status in the charge response is applied right away.
    #[instrument(skip(self, request), fields(member_id = %request.member_id))]
    pub async fn initialize_payment(
        &self,
        request: InitializePayment,
    ) -> AppResult<InitializePaymentResponse> {
        let amount = parse_amount(&request.amount, &self.settings)?;
        let phone_number = parse_mobile_number(&request.phone_number)?;
        let network = resolve_network(&request.network_code)?;
        let gateway = self.gateway()?;

        let now = Utc::now();
        let reference = generate_reference(now);

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            member_id: request.member_id,
            amount,
            transaction_type: TransactionType::ContributionMobileMoney,
            status: TransactionStatus::Pending,
            reference: Some(reference.clone()),
            description: Some(format!("Mobile money contribution via {}", network.display_name)),
            occurred_at: now,
        };

        let intent = PaymentIntent {
            reference: reference.clone(),
            member_id: request.member_id,
            ledger_entry_id: entry.id,
            amount,
            currency: self.settings.currency.clone(),
            phone_number: phone_number.clone(),
            network_code: network.code.to_string(),
            status: TransactionStatus::Pending,
            gateway_charge_id: None,
            gateway_status: None,
            gateway_response_text: None,
            charged_amount: None,
            fees: None,
            authorization_code: None,
            paid_at: None,
            failure_reason: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store.create_pending(&intent, &entry).await?;
        info!(
            "💳 Payment {} created: {} {} from {} via {}",
            reference, amount, intent.currency, phone_number, network.display_name
        );

        let charge = ChargeRequest {
            amount,
            currency: intent.currency.clone(),
            phone_number: phone_number.clone(),
            provider_code: network.provider_code.to_string(),
            reference: reference.clone(),
            email: request
                .email
                .unwrap_or_else(|| format!("{}@{}", phone_number, self.settings.charge_email_domain)),
            metadata: serde_json::json!({
                "member_id": request.member_id,
                "network": network.code,
                "custom": request.metadata,
            }),
        };

        let observation = gateway.initiate_charge(&charge).await.map_err(|e| {
            warn!(
                "Charge initiation via {} failed for {}, left pending: {}",
                gateway.name(),
                reference,
                e
            );
            e
        })?;

        let status = self.apply_observation(&intent, &observation).await?;
        let display_text = observation
            .display_text
            .clone()
            .unwrap_or_else(|| default_display_text(status, &network));

        Ok(InitializePaymentResponse {
            reference,
            status,
            display_text,
        })
    }

    /// Ask the gateway for the current status of `reference` and apply it.
    ///
    /// Verifying an already resolved payment changes nothing.
    #[instrument(skip(self))]
    pub async fn verify_payment(&self, reference: &str) -> AppResult<VerifyPaymentResponse> {
        let gateway = self.gateway()?;
        let intent = self
            .store
            .get_intent(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {}", reference)))?;

        let observation = match gateway.verify_transaction(reference).await {
            Ok(observation) => observation,
            Err(e) if intent.is_terminal() => {
                warn!(
                    "Verification of resolved payment {} could not reach gateway: {}",
                    reference, e
                );
                return Ok(intent.into());
            }
            Err(e) => return Err(e),
        };

        self.apply_observation(&intent, &observation).await?;

        let current = self
            .store
            .get_intent(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {}", reference)))?;
        Ok(current.into())
    }

    /// Apply one observation to the stored intent, returning the status it
    /// ends up in.
    async fn apply_observation(
        &self,
        intent: &PaymentIntent,
        observation: &GatewayObservation,
    ) -> AppResult<TransactionStatus> {
        let reference = intent.reference.as_str();

        match decide_transition(intent.status, &observation.status) {
            Transition::Unresolved => {
                debug!(
                    "Payment {} still pending (gateway status {})",
                    reference,
                    observation.status.as_str()
                );
                self.store
                    .record_gateway_response(reference, &GatewayAudit::from(observation))
                    .await?;
                Ok(TransactionStatus::Pending)
            }
            Transition::Complete => {
                let details = CompletionDetails {
                    audit: GatewayAudit::from(observation),
                    charged_amount: observation.amount,
                    fees: observation.fees,
                    authorization_code: observation.authorization_code.clone(),
                    paid_at: observation.paid_at.unwrap_or_else(Utc::now),
                };

                let applied = self
                    .store
                    .mark_completed(reference, &details)
                    .await
                    .map_err(|e| {
                        error!(
                            "🚨 Gateway reported success for {} but recording it failed; \
                             manual reconciliation needed (target: completed): {}",
                            reference, e
                        );
                        e
                    })?;

                if !applied {
                    return self.current_status(reference).await;
                }

                info!("✅ Payment {} completed", reference);
                self.dispatch(intent, NotificationKind::PaymentReceived, None).await;
                Ok(TransactionStatus::Completed)
            }
            Transition::Fail => {
                let reason = observation
                    .failure_reason()
                    .unwrap_or("Payment was declined")
                    .to_string();
                let details = FailureDetails {
                    audit: GatewayAudit::from(observation),
                    failure_reason: reason.clone(),
                    failed_at: Utc::now(),
                };

                let applied = self
                    .store
                    .mark_failed(reference, &details)
                    .await
                    .map_err(|e| {
                        error!(
                            "🚨 Gateway reported failure for {} but recording it failed; \
                             manual reconciliation needed (target: failed): {}",
                            reference, e
                        );
                        e
                    })?;

                if !applied {
                    return self.current_status(reference).await;
                }

                info!("❌ Payment {} failed: {}", reference, reason);
                self.dispatch(intent, NotificationKind::PaymentFailed, Some(&reason))
                    .await;
                Ok(TransactionStatus::Failed)
            }
            Transition::AlreadyResolved => {
                debug!("Payment {} already {}", reference, intent.status);
                Ok(intent.status)
            }
            Transition::Conflict { stored, observed } => {
                warn!(
                    "Ignoring gateway status {} for payment {}: already {}",
                    observed, reference, stored
                );
                Ok(stored)
            }
        }
    }

    /// Status after another observer won the conditional write
    async fn current_status(&self, reference: &str) -> AppResult<TransactionStatus> {
        let status = self
            .store
            .get_intent(reference)
            .await?
            .map(|i| i.status)
            .unwrap_or(TransactionStatus::Pending);
        debug!("Payment {} was resolved concurrently as {}", reference, status);
        Ok(status)
    }

    /// Queue a member notification. Failures are logged, never returned.
    async fn dispatch(&self, intent: &PaymentIntent, kind: NotificationKind, reason: Option<&str>) {
        let mut variables = BTreeMap::new();
        variables.insert("amount".to_string(), format!("{:.2}", intent.amount));
        variables.insert("currency".to_string(), intent.currency.clone());
        variables.insert("reference".to_string(), intent.reference.clone());
        if let Some(reason) = reason {
            variables.insert("reason".to_string(), reason.to_string());
        }

        let result = retry_with_policy(
            &self.notify_policy,
            || true,
            |_| self.notifier.notify(intent.member_id, kind, &variables),
        )
        .await;

        if let Err(e) = result {
            error!(
                "Notification {} for payment {} was not queued: {}",
                kind.as_str(),
                intent.reference,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::store::memory::InMemoryPaymentStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    enum Script {
        Observe(GatewayStatus),
        Unavailable,
        UnknownReference,
    }

    struct ScriptedGateway {
        charge: Mutex<Script>,
        verify: Mutex<Script>,
        charge_calls: AtomicUsize,
        verify_calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(charge: Script) -> Arc<Self> {
            Arc::new(Self {
                charge: Mutex::new(charge),
                verify: Mutex::new(Script::Observe(GatewayStatus::Pending)),
                charge_calls: AtomicUsize::new(0),
                verify_calls: AtomicUsize::new(0),
            })
        }

        fn set_verify(&self, script: Script) {
            *self.verify.lock().unwrap() = script;
        }

        fn play(script: Script) -> AppResult<GatewayObservation> {
            match script {
                Script::Observe(status) => Ok(GatewayObservation {
                    gateway_response: match status {
                        GatewayStatus::Failed => Some("Insufficient funds".to_string()),
                        GatewayStatus::Success => Some("Approved".to_string()),
                        _ => None,
                    },
                    amount: Some(dec!(50)),
                    fees: Some(dec!(0.98)),
                    paid_at: None,
                    authorization_code: Some("AUTH_test".to_string()),
                    gateway_id: Some("4099".to_string()),
                    display_text: match status {
                        GatewayStatus::PayOffline => Some("Dial *170# to approve".to_string()),
                        _ => None,
                    },
                    status,
                }),
                Script::Unavailable => Err(AppError::GatewayUnavailable("connection refused".into())),
                Script::UnknownReference => Ok(GatewayObservation::unresolved("Transaction reference not found")),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn initiate_charge(&self, _request: &ChargeRequest) -> AppResult<GatewayObservation> {
            self.charge_calls.fetch_add(1, Ordering::SeqCst);
            let script = self.charge.lock().unwrap().clone();
            Self::play(script)
        }

        async fn verify_transaction(&self, _reference: &str) -> AppResult<GatewayObservation> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            let script = self.verify.lock().unwrap().clone();
            Self::play(script)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Uuid, NotificationKind, BTreeMap<String, String>)>>,
        failures_left: AtomicU32,
    }

    impl RecordingNotifier {
        fn failing(times: u32) -> Arc<Self> {
            let notifier = Self::default();
            notifier.failures_left.store(times, Ordering::SeqCst);
            Arc::new(notifier)
        }

        fn kinds(&self) -> Vec<NotificationKind> {
            self.sent.lock().unwrap().iter().map(|(_, k, _)| *k).collect()
        }
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingNotifier {
        async fn notify(
            &self,
            member_id: Uuid,
            kind: NotificationKind,
            variables: &BTreeMap<String, String>,
        ) -> AppResult<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::Internal("outbox unavailable".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((member_id, kind, variables.clone()));
            Ok(())
        }
    }

    struct Harness {
        store: Arc<InMemoryPaymentStore>,
        gateway: Arc<ScriptedGateway>,
        notifier: Arc<RecordingNotifier>,
        reconciler: PaymentReconciler,
    }

    fn settings() -> PaymentSettings {
        PaymentSettings {
            currency: "GHS".to_string(),
            min_amount: dec!(1),
            max_amount: dec!(10000),
            charge_email_domain: "members.test".to_string(),
        }
    }

    fn harness_with(charge: Script, notifier: Arc<RecordingNotifier>) -> Harness {
        let store = Arc::new(InMemoryPaymentStore::new());
        let gateway = ScriptedGateway::new(charge);
        let reconciler = PaymentReconciler::new(
            store.clone(),
            Some(gateway.clone() as Arc<dyn PaymentGateway>),
            notifier.clone(),
            settings(),
        )
        .with_notify_policy(RetryPolicy {
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(2),
            max_attempts: 3,
        });

        Harness {
            store,
            gateway,
            notifier,
            reconciler,
        }
    }

    fn harness(charge: Script) -> Harness {
        harness_with(charge, Arc::new(RecordingNotifier::default()))
    }

    fn request(amount: &str, phone: &str, network: &str) -> InitializePayment {
        InitializePayment {
            member_id: Uuid::new_v4(),
            amount: amount.to_string(),
            phone_number: phone.to_string(),
            network_code: network.to_string(),
            email: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_transition_table() {
        use TransactionStatus::*;
        assert_eq!(decide_transition(Pending, &GatewayStatus::Success), Transition::Complete);
        assert_eq!(decide_transition(Pending, &GatewayStatus::Failed), Transition::Fail);
        assert_eq!(decide_transition(Pending, &GatewayStatus::SendOtp), Transition::Unresolved);
        assert_eq!(
            decide_transition(Pending, &GatewayStatus::Unknown("weird".into())),
            Transition::Unresolved
        );
        assert_eq!(decide_transition(Completed, &GatewayStatus::Success), Transition::AlreadyResolved);
        assert_eq!(decide_transition(Failed, &GatewayStatus::Failed), Transition::AlreadyResolved);
        assert_eq!(
            decide_transition(Completed, &GatewayStatus::Failed),
            Transition::Conflict { stored: Completed, observed: Failed }
        );
        assert_eq!(
            decide_transition(Failed, &GatewayStatus::Pending),
            Transition::Conflict { stored: Failed, observed: Pending }
        );
    }

    #[test]
    fn test_parse_amount() {
        let s = settings();
        assert_eq!(parse_amount("50", &s).unwrap(), dec!(50));
        assert_eq!(parse_amount(" 12.50 ", &s).unwrap(), dec!(12.5));
        for bad in ["abc", "", "0", "-5", "NaN", "1.005"] {
            assert!(
                matches!(parse_amount(bad, &s), Err(AppError::Payment(PaymentError::InvalidAmount(_)))),
                "{} accepted",
                bad
            );
        }
        assert!(matches!(
            parse_amount("0.50", &s),
            Err(AppError::Payment(PaymentError::AmountOutOfRange { .. }))
        ));
        assert!(matches!(
            parse_amount("10000.01", &s),
            Err(AppError::Payment(PaymentError::AmountOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_reference_format() {
        let now = Utc::now();
        let a = generate_reference(now);
        let b = generate_reference(now);
        assert!(a.starts_with("TSA-"));
        assert_eq!(a.len(), "TSA-".len() + 14 + 1 + 10);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_synchronous_success_completes_and_notifies_once() {
        let h = harness(Script::Observe(GatewayStatus::Success));

        let response = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap();

        assert_eq!(response.status, TransactionStatus::Completed);
        let intent = h.store.get_intent(&response.reference).await.unwrap().unwrap();
        assert_eq!(intent.phone_number, "233241234567");
        assert_eq!(intent.status, TransactionStatus::Completed);
        assert_eq!(intent.fees, Some(dec!(0.98)));
        assert_eq!(intent.authorization_code.as_deref(), Some("AUTH_test"));
        assert!(intent.paid_at.is_some());

        let entry = h.store.entry_for(&response.reference).await.unwrap();
        assert_eq!(entry.status, TransactionStatus::Completed);
        assert_eq!(entry.transaction_type, TransactionType::ContributionMobileMoney);

        assert_eq!(h.gateway.charge_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::PaymentReceived]);

        // Re-observing the same terminal status changes nothing
        h.gateway.set_verify(Script::Observe(GatewayStatus::Success));
        let verified = h.reconciler.verify_payment(&response.reference).await.unwrap();
        assert_eq!(verified.status, TransactionStatus::Completed);
        let after = h.store.get_intent(&response.reference).await.unwrap().unwrap();
        assert_eq!(after.updated_at, intent.updated_at);
        assert_eq!(h.notifier.kinds().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_phone_rejected_before_gateway() {
        let h = harness(Script::Observe(GatewayStatus::Success));

        let err = h
            .reconciler
            .initialize_payment(request("50", "123", "mtn"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Payment(PaymentError::InvalidPhoneNumber(_))));
        assert_eq!(h.gateway.charge_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.intent_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsupported_network_and_bad_amount_rejected() {
        let h = harness(Script::Observe(GatewayStatus::Success));

        let err = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "glo"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Payment(PaymentError::UnsupportedNetwork(_))));

        let err = h
            .reconciler
            .initialize_payment(request("-1", "0241234567", "mtn"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Payment(PaymentError::InvalidAmount(_))));

        assert_eq!(h.gateway.charge_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_gateway_is_configuration_error() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let reconciler = PaymentReconciler::new(
            store.clone(),
            None,
            Arc::new(RecordingNotifier::default()),
            settings(),
        );

        let err = reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(store.intent_count().await, 0);

        let err = reconciler.verify_payment("TSA-x").await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_offline_approval_resolves_on_verification() {
        let h = harness(Script::Observe(GatewayStatus::PayOffline));

        let response = h
            .reconciler
            .initialize_payment(request("50", "0551234567", "vodafone"))
            .await
            .unwrap();
        assert_eq!(response.status, TransactionStatus::Pending);
        assert_eq!(response.display_text, "Dial *170# to approve");

        let pending = h.store.get_intent(&response.reference).await.unwrap().unwrap();
        assert_eq!(pending.gateway_status.as_deref(), Some("pay_offline"));
        assert!(h.notifier.kinds().is_empty());

        h.gateway.set_verify(Script::Observe(GatewayStatus::Success));
        for _ in 0..3 {
            let verified = h.reconciler.verify_payment(&response.reference).await.unwrap();
            assert_eq!(verified.status, TransactionStatus::Completed);
            assert_eq!(verified.amount, dec!(50));
        }

        assert_eq!(h.gateway.verify_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::PaymentReceived]);
    }

    #[tokio::test]
    async fn test_failed_payment_is_final_and_reports_reason() {
        let h = harness(Script::Observe(GatewayStatus::Failed));

        let response = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap();
        assert_eq!(response.status, TransactionStatus::Failed);

        h.gateway.set_verify(Script::Observe(GatewayStatus::Failed));
        let verified = h.reconciler.verify_payment(&response.reference).await.unwrap();
        assert_eq!(verified.status, TransactionStatus::Failed);
        assert_eq!(verified.failure_reason.as_deref(), Some("Insufficient funds"));

        let entry = h.store.entry_for(&response.reference).await.unwrap();
        assert_eq!(entry.status, TransactionStatus::Failed);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::PaymentFailed]);
        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent[0].2["reason"], "Insufficient funds");
    }

    #[tokio::test]
    async fn test_contradictory_observation_does_not_change_terminal_state() {
        let h = harness(Script::Observe(GatewayStatus::Success));
        let response = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap();

        for script in [
            Script::Observe(GatewayStatus::Failed),
            Script::Observe(GatewayStatus::Pending),
            Script::UnknownReference,
        ] {
            h.gateway.set_verify(script);
            let verified = h.reconciler.verify_payment(&response.reference).await.unwrap();
            assert_eq!(verified.status, TransactionStatus::Completed);
        }

        let entry = h.store.entry_for(&response.reference).await.unwrap();
        assert_eq!(entry.status, TransactionStatus::Completed);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::PaymentReceived]);
    }

    #[tokio::test]
    async fn test_unknown_reference_at_gateway_stays_pending() {
        let h = harness(Script::Observe(GatewayStatus::SendOtp));
        let response = h
            .reconciler
            .initialize_payment(request("20", "0201234567", "telecel"))
            .await
            .unwrap();

        h.gateway.set_verify(Script::UnknownReference);
        let verified = h.reconciler.verify_payment(&response.reference).await.unwrap();

        assert_eq!(verified.status, TransactionStatus::Pending);
        assert!(verified.failure_reason.is_none());
        assert!(h.notifier.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_outage_leaves_payment_pending() {
        let h = harness(Script::Unavailable);

        let err = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GatewayUnavailable(_)));
        assert!(err.is_transient());
        assert_eq!(h.gateway.charge_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.intent_count().await, 1);
    }

    #[tokio::test]
    async fn test_verification_outage_on_pending_payment_is_surfaced() {
        let h = harness(Script::Observe(GatewayStatus::Pending));
        let response = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap();

        h.gateway.set_verify(Script::Unavailable);
        let err = h.reconciler.verify_payment(&response.reference).await.unwrap_err();
        assert!(matches!(err, AppError::GatewayUnavailable(_)));

        let intent = h.store.get_intent(&response.reference).await.unwrap().unwrap();
        assert_eq!(intent.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_local_reference_is_not_found() {
        let h = harness(Script::Observe(GatewayStatus::Success));
        let err = h.reconciler.verify_payment("TSA-missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(h.gateway.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_after_gateway_success_is_surfaced() {
        let h = harness(Script::Observe(GatewayStatus::Pending));
        let response = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap();

        h.store.fail_writes();
        h.gateway.set_verify(Script::Observe(GatewayStatus::Success));
        assert!(h.reconciler.verify_payment(&response.reference).await.is_err());

        let intent = h.store.get_intent(&response.reference).await.unwrap().unwrap();
        assert_eq!(intent.status, TransactionStatus::Pending);
        assert!(h.notifier.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_notifier_outage_does_not_roll_back() {
        let h = harness_with(Script::Observe(GatewayStatus::Success), RecordingNotifier::failing(10));

        let response = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap();

        assert_eq!(response.status, TransactionStatus::Completed);
        assert!(h.notifier.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_notifier_retried_until_queued() {
        let h = harness_with(Script::Observe(GatewayStatus::Success), RecordingNotifier::failing(2));

        h.reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap();

        assert_eq!(h.notifier.kinds(), vec![NotificationKind::PaymentReceived]);
    }

    #[tokio::test]
    async fn test_concurrent_verifications_notify_once() {
        let h = harness(Script::Observe(GatewayStatus::Ongoing));
        let response = h
            .reconciler
            .initialize_payment(request("50", "0241234567", "mtn"))
            .await
            .unwrap();

        h.gateway.set_verify(Script::Observe(GatewayStatus::Success));
        let (a, b) = tokio::join!(
            h.reconciler.verify_payment(&response.reference),
            h.reconciler.verify_payment(&response.reference),
        );

        assert_eq!(a.unwrap().status, TransactionStatus::Completed);
        assert_eq!(b.unwrap().status, TransactionStatus::Completed);
        assert_eq!(h.notifier.kinds().len(), 1);
    }
}
