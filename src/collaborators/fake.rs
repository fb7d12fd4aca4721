//! Deterministic fake collaborators
//!
//! In-process stand-ins used by tests and `--mock` runs. Behavior is
//! scripted per reference/recipient and every call is counted.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{
    CollaboratorError, LedgerService, NotificationKind, NotificationSink, PaymentProcessor,
    PaymentVerification, PayoutGateway, PayoutReceipt, VerificationStatus,
};
use crate::core_types::{Money, UserId};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Payment processor
// ============================================================================

#[derive(Debug, Clone)]
struct FakeCharge {
    amount_minor: u64,
    status: VerificationStatus,
}

/// Fake payment processor.
///
/// `initialize` registers a successful charge for the reference; tests flip
/// individual references to failed or make the processor unreachable.
pub struct FakePaymentProcessor {
    currency: String,
    charges: Mutex<HashMap<String, FakeCharge>>,
    refunds: Mutex<Vec<(String, u64)>>,
    unavailable: AtomicBool,
    initialize_count: AtomicUsize,
    verify_count: AtomicUsize,
}

impl FakePaymentProcessor {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            charges: Mutex::new(HashMap::new()),
            refunds: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            initialize_count: AtomicUsize::new(0),
            verify_count: AtomicUsize::new(0),
        }
    }

    /// Record a charge captured outside `initialize` (e.g. crypto rails)
    pub fn capture(&self, reference: &str, amount_minor: u64) {
        lock(&self.charges).insert(
            reference.to_string(),
            FakeCharge {
                amount_minor,
                status: VerificationStatus::Success,
            },
        );
    }

    /// Make `verify(reference)` report a failed charge
    pub fn fail_reference(&self, reference: &str) {
        if let Some(charge) = lock(&self.charges).get_mut(reference) {
            charge.status = VerificationStatus::Failed;
        }
    }

    /// Override the captured amount (underpayment scenarios)
    pub fn set_captured_amount(&self, reference: &str, amount_minor: u64) {
        if let Some(charge) = lock(&self.charges).get_mut(reference) {
            charge.amount_minor = amount_minor;
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn initialize_count(&self) -> usize {
        self.initialize_count.load(Ordering::SeqCst)
    }

    pub fn verify_count(&self) -> usize {
        self.verify_count.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> Vec<(String, u64)> {
        lock(&self.refunds).clone()
    }

    fn check_available(&self) -> Result<(), CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable(self.name(), "scripted outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for FakePaymentProcessor {
    fn name(&self) -> &'static str {
        "fake-payments"
    }

    async fn initialize(
        &self,
        _email: &str,
        amount_minor: u64,
        reference: &str,
    ) -> Result<String, CollaboratorError> {
        self.check_available()?;
        self.initialize_count.fetch_add(1, Ordering::SeqCst);
        self.capture(reference, amount_minor);
        Ok(format!("https://checkout.fake/{}", reference))
    }

    async fn verify(&self, reference: &str) -> Result<PaymentVerification, CollaboratorError> {
        self.check_available()?;
        self.verify_count.fetch_add(1, Ordering::SeqCst);
        let charges = lock(&self.charges);
        let charge = charges
            .get(reference)
            .ok_or_else(|| CollaboratorError::rejected(self.name(), "unknown reference"))?;
        Ok(PaymentVerification {
            status: charge.status,
            amount_minor: charge.amount_minor,
            currency: self.currency.clone(),
        })
    }

    async fn refund(
        &self,
        reference: &str,
        amount_minor: u64,
    ) -> Result<String, CollaboratorError> {
        self.check_available()?;
        let mut refunds = lock(&self.refunds);
        if !refunds.iter().any(|(r, _)| r == reference) {
            refunds.push((reference.to_string(), amount_minor));
        }
        Ok(format!("RF-{}", reference))
    }
}

// ============================================================================
// Ledger service
// ============================================================================

/// Fake token ledger with sequential transaction IDs (`0.0.<n>`)
#[derive(Default)]
pub struct FakeLedgerService {
    failing: AtomicBool,
    sequence: AtomicU64,
    transfers: Mutex<Vec<(String, String, String, u64)>>,
    mints: Mutex<Vec<(String, u64)>>,
    audit_log: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeLedgerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn transfer_count(&self) -> usize {
        lock(&self.transfers).len()
    }

    pub fn transfers(&self) -> Vec<(String, String, String, u64)> {
        lock(&self.transfers).clone()
    }

    pub fn mints(&self) -> Vec<(String, u64)> {
        lock(&self.mints).clone()
    }

    pub fn audit_messages(&self) -> Vec<(String, serde_json::Value)> {
        lock(&self.audit_log).clone()
    }

    fn next_tx(&self) -> Result<String, CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable(self.name(), "scripted outage"));
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0.0.{}", seq))
    }
}

#[async_trait]
impl LedgerService for FakeLedgerService {
    fn name(&self) -> &'static str {
        "fake-ledger"
    }

    async fn mint(
        &self,
        token_id: &str,
        amount: u64,
        _authority: &str,
    ) -> Result<String, CollaboratorError> {
        let tx = self.next_tx()?;
        lock(&self.mints).push((token_id.to_string(), amount));
        Ok(tx)
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        token_id: &str,
        amount: u64,
    ) -> Result<String, CollaboratorError> {
        let tx = self.next_tx()?;
        lock(&self.transfers).push((from.to_string(), to.to_string(), token_id.to_string(), amount));
        Ok(tx)
    }

    async fn record_audit_message(
        &self,
        topic_id: &str,
        payload: &serde_json::Value,
    ) -> Result<u64, CollaboratorError> {
        self.next_tx()?;
        let mut log = lock(&self.audit_log);
        log.push((topic_id.to_string(), payload.clone()));
        Ok(log.len() as u64)
    }
}

// ============================================================================
// Payout gateway
// ============================================================================

/// Fake payout rail.
///
/// Recipients can be scripted to fail or to hang (to exercise timeouts).
/// Payments are deduplicated by reference.
#[derive(Default)]
pub struct FakePayoutGateway {
    failing: Mutex<HashSet<UserId>>,
    hanging: Mutex<HashSet<UserId>>,
    paid: Mutex<HashMap<String, (UserId, Money)>>,
    call_count: AtomicUsize,
}

impl FakePayoutGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_recipient(&self, recipient: &UserId) {
        lock(&self.failing).insert(recipient.clone());
    }

    pub fn heal_recipient(&self, recipient: &UserId) {
        lock(&self.failing).remove(recipient);
        lock(&self.hanging).remove(recipient);
    }

    pub fn hang_recipient(&self, recipient: &UserId) {
        lock(&self.hanging).insert(recipient.clone());
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Total paid to a recipient across distinct references
    pub fn total_paid_to(&self, recipient: &UserId) -> Money {
        lock(&self.paid)
            .values()
            .filter(|(r, _)| r == recipient)
            .map(|(_, amount)| *amount)
            .sum::<Decimal>()
    }

    pub fn payment_count(&self) -> usize {
        lock(&self.paid).len()
    }
}

#[async_trait]
impl PayoutGateway for FakePayoutGateway {
    fn name(&self) -> &'static str {
        "fake-payout"
    }

    async fn pay(
        &self,
        recipient: &UserId,
        amount: Money,
        _currency: &str,
        reference: &str,
    ) -> Result<PayoutReceipt, CollaboratorError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let hang = lock(&self.hanging).contains(recipient);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if lock(&self.failing).contains(recipient) {
            return Err(CollaboratorError::rejected(self.name(), "recipient account rejected"));
        }

        lock(&self.paid)
            .entry(reference.to_string())
            .or_insert_with(|| (recipient.clone(), amount));
        Ok(PayoutReceipt {
            reference: format!("PO-{}", reference),
            settled: true,
        })
    }
}

// ============================================================================
// Notification sink
// ============================================================================

/// Notification sink that records every notice in memory
#[derive(Default)]
pub struct RecordingNotificationSink {
    notices: Mutex<Vec<(UserId, NotificationKind, serde_json::Value)>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        lock(&self.notices).iter().filter(|(_, k, _)| *k == kind).count()
    }

    pub fn notices_for(&self, user: &UserId) -> Vec<NotificationKind> {
        lock(&self.notices)
            .iter()
            .filter(|(u, _, _)| u == user)
            .map(|(_, k, _)| *k)
            .collect()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify(&self, user: &UserId, kind: NotificationKind, payload: serde_json::Value) {
        lock(&self.notices).push((user.clone(), kind, payload));
    }
}
