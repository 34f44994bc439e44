use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use kiosk_events::{EventBus, EventFilter, EventStream, Product, StoreEvent};
use kiosk_reconcile::{FileReceiptSource, ReceiptSource, ReconcileOutcome, ReconcileSettings, Reconciler};
use kiosk_store::{FileLedgerStore, LedgerHandle, LedgerStore, PersistOutcome};
use kiosk_txn::{PaymentQueue, QueueEvent, RecordingQueue, TransactionProcessor};
use kiosk_types::{compare_versions, Clock, EntitlementValue, Ledger, SystemClock, ORIGINAL_APP_VERSION_KEY};
use kiosk_verify::{HttpTransport, ReceiptTransport, VerificationClient};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::KioskConfig;
use crate::error::{KioskError, KioskResult};
use crate::storefront::ProductCatalog;

/// What the ledger knows about a product's expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiry {
    /// Owned, but no receipt has resolved an expiry yet.
    Unresolved,
    /// Expires at this Unix-epoch second.
    At(u64),
}

/// Assembles a [`Kiosk`]. Every collaborator not supplied is built from the
/// configuration.
pub struct KioskBuilder {
    config: KioskConfig,
    store: Option<Arc<dyn LedgerStore>>,
    transport: Option<Arc<dyn ReceiptTransport>>,
    receipt_source: Option<Arc<dyn ReceiptSource>>,
    queue: Option<Arc<dyn PaymentQueue>>,
    catalog: Option<Arc<dyn ProductCatalog>>,
    clock: Option<Arc<dyn Clock>>,
}

impl KioskBuilder {
    pub fn store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ReceiptTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn receipt_source(mut self, source: Arc<dyn ReceiptSource>) -> Self {
        self.receipt_source = Some(source);
        self
    }

    /// The platform payment queue. Without one, payments are only recorded.
    pub fn queue(mut self, queue: Arc<dyn PaymentQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ProductCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> KioskResult<Kiosk> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(FileLedgerStore::new(&config.ledger_path)),
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(config.request_timeout())?),
        };
        let source = self
            .receipt_source
            .unwrap_or_else(|| Arc::new(FileReceiptSource::new(&config.receipt_path)));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(RecordingQueue::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let ledger = Arc::new(LedgerHandle::open(store));
        let events = Arc::new(EventBus::with_clock(config.event_capacity, clock.clone()));

        let reconciler = Reconciler::new(
            ledger.clone(),
            events.clone(),
            VerificationClient::new(transport),
            source,
            ReconcileSettings {
                shared_secret: config.shared_secret().map(str::to_string),
                endpoint: config.environment,
                sandbox_fallback: config.sandbox_fallback,
            },
        )
        .with_clock(clock.clone());

        let processor = TransactionProcessor::new(
            ledger.clone(),
            events.clone(),
            queue.clone(),
            config.catalog(),
            config.contents_root.clone(),
        );

        let (shutdown, _) = watch::channel(false);
        info!(
            environment = %config.environment,
            consumables = config.consumables.len(),
            products = config.products.len(),
            "kiosk ready"
        );

        Ok(Kiosk {
            config,
            ledger,
            events,
            reconciler: Arc::new(reconciler),
            processor: Arc::new(processor),
            queue,
            catalog: self.catalog,
            products: RwLock::new(None),
            clock,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// The entitlement service.
///
/// Construct once at startup and share by `Arc`. Every ledger mutation,
/// whether from a purchase, a reconciliation pass, or a credit spend, goes
/// through the same [`LedgerHandle`].
pub struct Kiosk {
    config: KioskConfig,
    ledger: Arc<LedgerHandle>,
    events: Arc<EventBus>,
    reconciler: Arc<Reconciler>,
    processor: Arc<TransactionProcessor>,
    queue: Arc<dyn PaymentQueue>,
    catalog: Option<Arc<dyn ProductCatalog>>,
    products: RwLock<Option<BTreeMap<String, Product>>>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Kiosk {
    pub fn builder(config: KioskConfig) -> KioskBuilder {
        KioskBuilder {
            config,
            store: None,
            transport: None,
            receipt_source: None,
            queue: None,
            catalog: None,
            clock: None,
        }
    }

    /// Build with every collaborator derived from `config`.
    pub fn open(config: KioskConfig) -> KioskResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &KioskConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        self.events.subscribe(filter)
    }

    pub fn ledger(&self) -> &Arc<LedgerHandle> {
        &self.ledger
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn processor(&self) -> &Arc<TransactionProcessor> {
        &self.processor
    }

    pub fn snapshot(&self) -> KioskResult<Ledger> {
        Ok(self.ledger.snapshot()?)
    }

    // ---- Feature management ----

    /// Whether the ledger holds anything under `product_id`.
    pub fn is_purchased(&self, product_id: &str) -> KioskResult<bool> {
        Ok(self.ledger.read(|l| l.contains(product_id))?)
    }

    /// Expiry of an owned product; `None` if it is not owned or is not a
    /// time-bound entitlement.
    pub fn expiry(&self, product_id: &str) -> KioskResult<Option<Expiry>> {
        let value = self.ledger.read(|l| l.get(product_id).cloned())?;
        Ok(match value {
            Some(EntitlementValue::Owned) => Some(Expiry::Unresolved),
            Some(EntitlementValue::ExpiringAt(ts)) => Some(Expiry::At(ts)),
            Some(EntitlementValue::CreditBalance(_)) | Some(EntitlementValue::Metadata(_)) | None => None,
        })
    }

    /// Whether a subscription currently grants access. An unresolved
    /// subscription counts as active.
    pub fn is_subscription_active(&self, product_id: &str) -> KioskResult<bool> {
        Ok(match self.expiry(product_id)? {
            Some(Expiry::Unresolved) => true,
            Some(Expiry::At(ts)) => self.clock.now_secs() <= ts,
            None => false,
        })
    }

    pub fn available_credits(&self, credit_key: &str) -> KioskResult<u64> {
        Ok(self.ledger.read(|l| l.credits(credit_key))?)
    }

    /// Spend credits. Fails without touching the ledger if the balance is
    /// short. Returns the remaining balance.
    pub fn consume_credits(&self, amount: u64, credit_key: &str) -> KioskResult<u64> {
        let commit = self.ledger.update(|l| {
            let result = l.debit(credit_key, amount);
            let dirty = result.is_ok() && amount > 0;
            (result, dirty)
        })?;
        self.report_persist(&commit.persist);
        let balance = commit.value?;
        debug!(credit_key, amount, balance, "credits consumed");
        Ok(balance)
    }

    /// Seed a starting balance for `credit_key` unless it already exists.
    /// Returns whether the balance was seeded.
    pub fn set_default_credits(&self, count: u64, credit_key: &str) -> KioskResult<bool> {
        let commit = self.ledger.update(|l| {
            let seeded = l.seed_credits(credit_key, count);
            (seeded, seeded)
        })?;
        self.report_persist(&commit.persist);
        Ok(commit.value)
    }

    /// Whether the app was originally acquired before `version`. `None`
    /// until a receipt has recorded the original version.
    pub fn purchased_before_version(&self, version: &str) -> KioskResult<Option<bool>> {
        let original = self
            .ledger
            .read(|l| l.metadata(ORIGINAL_APP_VERSION_KEY).map(str::to_string))?;
        Ok(original.map(|original| compare_versions(&original, version).is_lt()))
    }

    // ---- Storefront ----

    /// Look up every configured product, cache the result, and emit
    /// `ProductsAvailable`.
    pub async fn request_products(&self) -> KioskResult<Vec<Product>> {
        let catalog = self.catalog.as_ref().ok_or(KioskError::NoCatalog)?;
        let response = catalog.fetch_products(&self.config.product_ids()).await?;
        for id in &response.invalid_ids {
            warn!(product_id = %id, "storefront does not know product");
        }

        let cache = response
            .products
            .iter()
            .map(|p| (p.product_id.clone(), p.clone()))
            .collect();
        *self.products.write().unwrap_or_else(PoisonError::into_inner) = Some(cache);

        info!(count = response.products.len(), "products available");
        self.events
            .emit(StoreEvent::ProductsAvailable(response.products.clone()));
        Ok(response.products)
    }

    /// A cached product, once [`request_products`](Self::request_products) ran.
    pub fn product(&self, product_id: &str) -> Option<Product> {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|products| products.get(product_id).cloned())
    }

    /// Start a purchase. Returns `false`, after emitting the reason, when
    /// the product is unknown or payments are disabled.
    pub fn purchase(&self, product_id: &str) -> KioskResult<bool> {
        if self.product(product_id).is_none() {
            warn!(product_id, "purchase requested for unavailable product");
            self.events.emit(StoreEvent::ProductsUnavailable {
                product_id: product_id.to_string(),
            });
            return Ok(false);
        }
        if !self.queue.can_make_payments() {
            warn!(product_id, "payments disabled");
            self.events.emit(StoreEvent::PaymentsDisabled {
                product_id: product_id.to_string(),
            });
            return Ok(false);
        }
        self.queue.add_payment(product_id)?;
        info!(product_id, "payment queued");
        Ok(true)
    }

    pub fn restore_purchases(&self) {
        info!("restoring purchases");
        self.queue.restore_completed_transactions();
    }

    // ---- Lifecycle ----

    /// Spawn the queue consumer and an initial reconciliation pass. Both
    /// stop at [`shutdown`](Self::shutdown).
    pub fn start(&self, queue_events: mpsc::Receiver<QueueEvent>) -> KioskResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| KioskError::NoRuntime)?;
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return Err(KioskError::AlreadyStarted);
        }

        let processor = self.processor.clone();
        let shutdown = self.shutdown.subscribe();
        tasks.push(runtime.spawn(async move {
            processor.run(queue_events, shutdown).await;
        }));

        let reconciler = self.reconciler.clone();
        let shutdown = self.shutdown.subscribe();
        tasks.push(runtime.spawn(async move {
            match reconciler.reconcile_until(shutdown).await {
                Ok(outcome) => debug!(?outcome, "initial reconciliation finished"),
                Err(e) => warn!(error = %e, "initial reconciliation failed"),
            }
        }));

        info!("kiosk started");
        Ok(())
    }

    /// Run one reconciliation pass, cancelled by shutdown.
    pub async fn reconcile(&self) -> KioskResult<ReconcileOutcome> {
        Ok(self
            .reconciler
            .reconcile_until(self.shutdown.subscribe())
            .await?)
    }

    /// Persist the ledger now.
    pub fn on_background(&self) -> KioskResult<()> {
        if let Err(e) = self.ledger.flush() {
            warn!(error = %e, "ledger flush failed");
            self.events.emit(StoreEvent::LedgerPersistFailed(e.to_string()));
            return Err(e.into());
        }
        Ok(())
    }

    /// Cancel background work, wait for it, then persist the ledger.
    pub async fn shutdown(&self) -> KioskResult<()> {
        self.shutdown.send_replace(true);
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        self.on_background()?;
        info!("kiosk shut down");
        Ok(())
    }

    fn report_persist(&self, persist: &PersistOutcome) {
        if let PersistOutcome::Failed(e) = persist {
            self.events.emit(StoreEvent::LedgerPersistFailed(e.to_string()));
        }
    }
}

impl std::fmt::Debug for Kiosk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kiosk")
            .field("environment", &self.config.environment)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}
