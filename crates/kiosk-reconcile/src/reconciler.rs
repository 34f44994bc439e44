use std::sync::Arc;

use kiosk_events::{EventBus, StoreEvent};
use kiosk_store::{LedgerHandle, PersistOutcome};
use kiosk_types::{Clock, SystemClock};
use kiosk_verify::{Endpoint, VerificationClient, VerificationError, VerificationResult};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::merge::{expired_keys, merge, MergeReport};
use crate::source::ReceiptSource;

/// Verification parameters for a reconciliation pass.
#[derive(Clone, Debug, Default)]
pub struct ReconcileSettings {
    pub shared_secret: Option<String>,
    pub endpoint: Endpoint,
    /// Retry sandbox when production reports a test-environment receipt.
    pub sandbox_fallback: bool,
}

/// How a reconciliation pass ended.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// There was no local receipt. The expiry scan still ran.
    NoReceipt,
    /// The verification result was merged (possibly changing nothing).
    Merged(MergeReport),
    /// Verification failed; the ledger was left untouched.
    Failed(VerificationError),
    /// Shutdown was signalled before the pass could apply anything.
    Cancelled,
}

impl ReconcileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::NoReceipt | Self::Merged(_))
    }
}

/// Folds verified receipts into the ledger and reports expired subscriptions.
pub struct Reconciler {
    ledger: Arc<LedgerHandle>,
    events: Arc<EventBus>,
    client: VerificationClient,
    source: Arc<dyn ReceiptSource>,
    clock: Arc<dyn Clock>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<LedgerHandle>,
        events: Arc<EventBus>,
        client: VerificationClient,
        source: Arc<dyn ReceiptSource>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            ledger,
            events,
            client,
            source,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Run one full pass: load, verify, merge, persist, scan.
    #[instrument(skip(self), fields(endpoint = %self.settings.endpoint))]
    pub async fn reconcile(&self) -> ReconcileResult<ReconcileOutcome> {
        let receipt = self
            .source
            .load_receipt()
            .map_err(|source| ReconcileError::ReceiptUnreadable {
                path: self.source.location(),
                source,
            })?;

        let Some(receipt) = receipt else {
            debug!("no local receipt; nothing to verify");
            self.scan_expired()?;
            return Ok(ReconcileOutcome::NoReceipt);
        };

        let result = match self.verify(&receipt).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "receipt verification failed");
                self.events.emit(StoreEvent::ReceiptValidationFailed {
                    code: e.code(),
                    message: e.message(),
                    retryable: e.is_retryable(),
                });
                return Ok(ReconcileOutcome::Failed(e));
            }
        };

        let report = self.apply(&result)?;
        Ok(ReconcileOutcome::Merged(report))
    }

    /// Like [`reconcile`](Self::reconcile), but give up as soon as
    /// `shutdown` turns `true`. A cancelled pass applies nothing: the merge
    /// itself runs without yielding.
    pub async fn reconcile_until(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> ReconcileResult<ReconcileOutcome> {
        if *shutdown.borrow() {
            return Ok(ReconcileOutcome::Cancelled);
        }
        tokio::select! {
            outcome = self.reconcile() => outcome,
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("reconciliation cancelled by shutdown");
                Ok(ReconcileOutcome::Cancelled)
            }
        }
    }

    /// Merge an already verified result, persist if dirty, then scan for
    /// expiries.
    pub fn apply(&self, result: &VerificationResult) -> ReconcileResult<MergeReport> {
        let commit = self.ledger.update(|ledger| {
            let report = merge(ledger, result);
            let dirty = report.dirty;
            (report, dirty)
        })?;

        match commit.persist {
            PersistOutcome::Saved => info!(updated = commit.value.updated.len(), "ledger reconciled"),
            PersistOutcome::Clean => debug!("reconciliation changed nothing"),
            PersistOutcome::Failed(ref e) => {
                self.events.emit(StoreEvent::LedgerPersistFailed(e.to_string()));
            }
        }

        self.scan_expired()?;
        Ok(commit.value)
    }

    /// Emit `SubscriptionExpired` for every key past its expiry.
    pub fn scan_expired(&self) -> ReconcileResult<Vec<String>> {
        let now = self.clock.now_secs();
        let expired = self.ledger.read(|ledger| expired_keys(ledger, now))?;
        for key in &expired {
            debug!(product_id = %key, now, "subscription expired");
            self.events.emit(StoreEvent::SubscriptionExpired(key.clone()));
        }
        Ok(expired)
    }

    async fn verify(&self, receipt: &[u8]) -> Result<VerificationResult, VerificationError> {
        let secret = self.settings.shared_secret.as_deref();
        if self.settings.sandbox_fallback {
            self.client
                .verify_with_fallback(receipt, secret, self.settings.endpoint)
                .await
        } else {
            self.client.verify(receipt, secret, self.settings.endpoint).await
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Resolves once `shutdown` is `true`. A dropped sender can never signal,
/// so that case never resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticReceiptSource;
    use async_trait::async_trait;
    use kiosk_events::{EventEnvelope, EventKind, EventStream};
    use kiosk_store::{InMemoryLedgerStore, LedgerStore};
    use kiosk_types::{EntitlementValue, FixedClock, Ledger, ReceiptEntry, ORIGINAL_APP_VERSION_KEY};
    use kiosk_verify::{ReceiptTransport, StaticTransport};
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        ledger: Arc<LedgerHandle>,
        transport: Arc<StaticTransport>,
        source: Arc<StaticReceiptSource>,
        stream: EventStream,
        reconciler: Reconciler,
    }

    fn fixture(initial: Ledger, now: u64) -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::with_ledger(initial));
        let ledger = Arc::new(LedgerHandle::open(store.clone() as Arc<dyn LedgerStore>));
        let events = Arc::new(EventBus::default());
        let stream = events.subscribe_all();
        let transport = Arc::new(StaticTransport::new());
        let source = Arc::new(StaticReceiptSource::new(Some(b"receipt".to_vec())));
        let reconciler = Reconciler::new(
            ledger.clone(),
            events,
            VerificationClient::new(transport.clone() as Arc<dyn ReceiptTransport>),
            source.clone() as Arc<dyn ReceiptSource>,
            ReconcileSettings {
                shared_secret: Some("secret".into()),
                endpoint: Endpoint::Sandbox,
                sandbox_fallback: false,
            },
        )
        .with_clock(Arc::new(FixedClock::new(now)));
        Fixture {
            store,
            ledger,
            transport,
            source,
            stream,
            reconciler,
        }
    }

    fn drain(stream: &mut EventStream) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Ok(envelope) = stream.try_recv() {
            events.push(envelope);
        }
        events
    }

    fn subscription_result(product_id: &str, expires_ms: u64) -> VerificationResult {
        VerificationResult {
            status: 0,
            original_application_version: None,
            entries: vec![ReceiptEntry::from_expiry_ms(product_id, expires_ms)],
        }
    }

    #[test]
    fn new_subscription_is_recorded_and_persisted_once() {
        let f = fixture(Ledger::new(), 1_600_000_000);
        let report = f
            .reconciler
            .apply(&subscription_result("sub.monthly", 1_700_000_000_000))
            .unwrap();

        assert_eq!(report.updated, ["sub.monthly"]);
        assert_eq!(
            f.ledger.read(|l| l.get("sub.monthly").cloned()).unwrap(),
            Some(EntitlementValue::ExpiringAt(1_700_000_000))
        );
        assert_eq!(f.store.save_count(), 1);
    }

    #[test]
    fn older_expiry_changes_nothing_and_does_not_persist() {
        let mut initial = Ledger::new();
        initial.merge_expiry("sub.monthly", 1_600_000_000).unwrap();
        let f = fixture(initial, 1_550_000_000);

        let report = f
            .reconciler
            .apply(&subscription_result("sub.monthly", 1_500_000_000_000))
            .unwrap();

        assert!(!report.dirty);
        assert_eq!(f.ledger.read(|l| l.expiry("sub.monthly")).unwrap(), Some(1_600_000_000));
        assert_eq!(f.store.save_count(), 0);
    }

    #[test]
    fn reapplying_a_result_is_idempotent() {
        let f = fixture(Ledger::new(), 0);
        let result = subscription_result("sub.monthly", 1_700_000_000_000);

        f.reconciler.apply(&result).unwrap();
        let first = f.ledger.snapshot().unwrap();
        let second = f.reconciler.apply(&result).unwrap();

        assert!(!second.dirty);
        assert_eq!(f.ledger.snapshot().unwrap(), first);
        assert_eq!(f.store.save_count(), 1);
    }

    #[tokio::test]
    async fn full_pass_merges_verified_receipt() {
        let f = fixture(Ledger::new(), 1_600_000_000);
        f.transport.respond_json(json!({
            "status": 0,
            "receipt": {
                "original_application_version": "1.4",
                "in_app": [ { "product_id": "sub.monthly", "expires_date_ms": "1700000000000" } ]
            }
        }));

        let outcome = f.reconciler.reconcile().await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Merged(ref r) if r.dirty));

        let ledger = f.ledger.snapshot().unwrap();
        assert_eq!(ledger.expiry("sub.monthly"), Some(1_700_000_000));
        assert_eq!(ledger.metadata(ORIGINAL_APP_VERSION_KEY), Some("1.4"));
        assert_eq!(f.store.save_count(), 1);

        let requests = f.transport.requests();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].1).unwrap();
        assert_eq!(body["password"], "secret");
    }

    #[tokio::test]
    async fn status_error_emits_validation_failure_and_leaves_ledger() {
        let mut initial = Ledger::new();
        initial.mark_owned("pro.unlock").unwrap();
        let mut f = fixture(initial.clone(), 0);
        f.transport.respond_json(json!({ "status": 21007 }));

        let outcome = f.reconciler.reconcile().await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Failed(ref e) if e.code() == Some(21007)));

        let events = drain(&mut f.stream);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].event,
            StoreEvent::ReceiptValidationFailed {
                code: Some(21007),
                message: "This receipt is from the test environment.".into(),
                retryable: false,
            }
        );
        assert_eq!(f.ledger.snapshot().unwrap(), initial);
        assert_eq!(f.store.save_count(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_reported_as_retryable() {
        let mut f = fixture(Ledger::new(), 0);
        f.transport
            .fail(VerificationError::Transport("connection reset".into()));

        f.reconciler.reconcile().await.unwrap();
        let events = drain(&mut f.stream);
        assert!(matches!(
            events[0].event,
            StoreEvent::ReceiptValidationFailed { code: None, retryable: true, .. }
        ));
    }

    #[tokio::test]
    async fn expired_subscription_reported_once_per_pass() {
        let mut initial = Ledger::new();
        initial.merge_expiry("sub.monthly", 1_000).unwrap();
        initial.merge_expiry("sub.yearly", 5_000).unwrap();
        let mut f = fixture(initial, 2_000);
        f.source.set(None);

        for _ in 0..2 {
            let outcome = f.reconciler.reconcile().await.unwrap();
            assert!(matches!(outcome, ReconcileOutcome::NoReceipt));

            let expired: Vec<_> = drain(&mut f.stream)
                .into_iter()
                .filter(|e| e.event.kind() == EventKind::SubscriptionExpired)
                .collect();
            assert_eq!(expired.len(), 1);
            assert_eq!(expired[0].event, StoreEvent::SubscriptionExpired("sub.monthly".into()));
        }
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn verification_failure_skips_expiry_scan() {
        let mut initial = Ledger::new();
        initial.merge_expiry("sub.monthly", 1_000).unwrap();
        let mut f = fixture(initial, 2_000);
        f.transport.respond_json(json!({ "status": 21003 }));

        f.reconciler.reconcile().await.unwrap();
        let kinds: Vec<_> = drain(&mut f.stream).into_iter().map(|e| e.event.kind()).collect();
        assert_eq!(kinds, [EventKind::ReceiptValidationFailed]);
    }

    #[test]
    fn persist_failure_is_surfaced_and_memory_kept() {
        let mut f = fixture(Ledger::new(), 0);
        f.store.set_read_only(true);

        f.reconciler
            .apply(&subscription_result("sub.monthly", 1_700_000_000_000))
            .unwrap();

        assert_eq!(f.ledger.read(|l| l.expiry("sub.monthly")).unwrap(), Some(1_700_000_000));
        let events = drain(&mut f.stream);
        assert!(matches!(events[0].event, StoreEvent::LedgerPersistFailed(_)));
    }

    #[tokio::test]
    async fn unreadable_receipt_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(Ledger::new(), 0);
        f.reconciler.source = Arc::new(crate::source::FileReceiptSource::new(dir.path()));
        let err = f.reconciler.reconcile().await.unwrap_err();
        assert!(matches!(err, ReconcileError::ReceiptUnreadable { .. }));
    }

    struct HangingTransport;

    #[async_trait]
    impl ReceiptTransport for HangingTransport {
        async fn post_json(&self, _url: &str, _body: Vec<u8>) -> Result<Vec<u8>, VerificationError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_pass() {
        let mut f = fixture(Ledger::new(), 0);
        f.reconciler.client = VerificationClient::new(Arc::new(HangingTransport));
        let (tx, rx) = watch::channel(false);

        let pass = f.reconciler.reconcile_until(rx);
        let trigger = async {
            tokio::task::yield_now().await;
            tx.send(true).unwrap();
        };
        let (outcome, ()) = tokio::join!(pass, trigger);

        assert!(matches!(outcome.unwrap(), ReconcileOutcome::Cancelled));
        assert!(f.ledger.snapshot().unwrap().is_empty());
        assert_eq!(f.store.save_count(), 0);
    }

    #[tokio::test]
    async fn already_shut_down_does_nothing() {
        let f = fixture(Ledger::new(), 0);
        let (_tx, rx) = watch::channel(true);
        let outcome = f.reconciler.reconcile_until(rx).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Cancelled));
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_does_not_cancel() {
        let f = fixture(Ledger::new(), 0);
        f.transport.respond_json(json!({ "status": 0 }));
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let outcome = f.reconciler.reconcile_until(rx).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Merged(_)));
    }
}
