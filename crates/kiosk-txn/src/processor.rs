use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use kiosk_events::{EventBus, StoreEvent};
use kiosk_store::{LedgerHandle, PersistOutcome};
use kiosk_types::LedgerError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::ConsumableCatalog;
use crate::content::install_content;
use crate::error::{TxnError, TxnResult};
use crate::queue::{DownloadState, DownloadUpdate, PaymentQueue, QueueEvent, TransactionUpdate};
use crate::state::TransactionState;

/// A transaction the processor has seen but not yet acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTransaction {
    pub transaction_id: String,
    pub product_id: String,
    pub state: TransactionState,
    /// Downloads still running; the transaction is acknowledged when this
    /// reaches zero.
    pub outstanding_downloads: usize,
}

#[derive(Default)]
struct Book {
    pending: HashMap<String, PendingTransaction>,
    /// Acknowledged ids, kept for the processor's lifetime so redeliveries
    /// are never applied twice. Grows by one per finished transaction.
    finalized: HashSet<String>,
}

enum Grant {
    Credited { key: String, balance: u64 },
    Owned,
}

/// Applies payment queue events to the ledger.
pub struct TransactionProcessor {
    ledger: Arc<LedgerHandle>,
    events: Arc<EventBus>,
    queue: Arc<dyn PaymentQueue>,
    catalog: ConsumableCatalog,
    contents_root: PathBuf,
    book: Mutex<Book>,
}

impl TransactionProcessor {
    pub fn new(
        ledger: Arc<LedgerHandle>,
        events: Arc<EventBus>,
        queue: Arc<dyn PaymentQueue>,
        catalog: ConsumableCatalog,
        contents_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            events,
            queue,
            catalog,
            contents_root: contents_root.into(),
            book: Mutex::new(Book::default()),
        }
    }

    pub fn queue(&self) -> &Arc<dyn PaymentQueue> {
        &self.queue
    }

    pub fn catalog(&self) -> &ConsumableCatalog {
        &self.catalog
    }

    pub fn contents_root(&self) -> &Path {
        &self.contents_root
    }

    /// Snapshot of a pending transaction.
    pub fn pending(&self, transaction_id: &str) -> Option<PendingTransaction> {
        self.book().ok()?.pending.get(transaction_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.book().map(|b| b.pending.len()).unwrap_or(0)
    }

    /// Handle one event from the payment queue.
    pub fn handle(&self, event: QueueEvent) -> TxnResult<()> {
        match event {
            QueueEvent::Transactions(updates) => {
                for update in updates {
                    self.handle_transaction(update)?;
                }
            }
            QueueEvent::Downloads(updates) => {
                for update in updates {
                    self.handle_download(update)?;
                }
            }
            QueueEvent::RestoreFinished => {
                info!("restore finished");
                self.events.emit(StoreEvent::RestoredPurchases);
            }
            QueueEvent::RestoreFailed(reason) => {
                warn!(%reason, "restore failed");
                self.events.emit(StoreEvent::RestoringPurchasesFailed(reason));
            }
        }
        Ok(())
    }

    /// Consume queue events until the channel closes or `shutdown` turns
    /// `true`. Errors from individual events are logged, never fatal.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<QueueEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("transaction processor started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle(event) {
                            error!(error = %e, "failed to process queue event");
                        }
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Nobody can signal shutdown any more; drain until the queue closes.
                        while let Some(event) = events.recv().await {
                            if let Err(e) = self.handle(event) {
                                error!(error = %e, "failed to process queue event");
                            }
                        }
                        break;
                    }
                }
            }
        }
        info!("transaction processor stopped");
    }

    #[instrument(skip(self, update), fields(transaction_id = %update.transaction_id, product_id = %update.product_id, state = %update.state))]
    fn handle_transaction(&self, update: TransactionUpdate) -> TxnResult<()> {
        {
            let mut book = self.book()?;
            if book.finalized.contains(&update.transaction_id) {
                debug!("redelivered finalized transaction; acknowledging again");
                drop(book);
                self.queue.finish_transaction(&update.transaction_id);
                return Ok(());
            }
            if let Some(prior) = book.pending.get(&update.transaction_id) {
                if prior.state == update.state {
                    debug!("duplicate state report ignored");
                    return Ok(());
                }
                if !prior.state.can_advance_to(update.state) {
                    warn!(from = %prior.state, "illegal transaction transition dropped");
                    return Ok(());
                }
            }
            // Claim the new state before releasing the book so a concurrent
            // delivery of the same id sees it and backs off.
            Self::record(&mut book, &update, 0);
        }

        match update.state {
            TransactionState::Purchasing => {}
            TransactionState::Deferred => {
                self.events
                    .emit(StoreEvent::PurchaseDeferred(update.product_id.clone()));
            }
            TransactionState::Failed => {
                warn!(reason = ?update.error, "purchase failed");
                self.events.emit(StoreEvent::PurchaseFailed {
                    product_id: update.product_id.clone(),
                    reason: update.error.clone(),
                });
                self.finalize(&update.transaction_id)?;
            }
            TransactionState::Purchased | TransactionState::Restored => {
                self.complete(&update)?;
            }
        }
        Ok(())
    }

    fn complete(&self, update: &TransactionUpdate) -> TxnResult<()> {
        let product_id = update.product_id.as_str();
        let commit = self.ledger.update(|ledger| {
            let grant = match self.catalog.get(product_id) {
                Some(def) => ledger
                    .credit(&def.credit_key, def.credit_amount)
                    .map(|balance| Grant::Credited {
                        key: def.credit_key.clone(),
                        balance,
                    }),
                None => ledger.mark_owned(product_id).map(|_| Grant::Owned),
            };
            (grant, true)
        })?;

        if let PersistOutcome::Failed(ref e) = commit.persist {
            self.events.emit(StoreEvent::LedgerPersistFailed(e.to_string()));
        }

        match commit.value {
            Ok(Grant::Credited { key, balance }) => {
                info!(credit_key = %key, balance, "consumable credited");
            }
            Ok(Grant::Owned) => info!("product marked owned"),
            Err(e) => {
                self.reject(update, e)?;
                return Ok(());
            }
        }
        self.events
            .emit(StoreEvent::ProductPurchased(update.product_id.clone()));

        if update.downloads.is_empty() {
            self.finalize(&update.transaction_id)?;
        } else {
            self.track(update, update.downloads.len())?;
            debug!(count = update.downloads.len(), "starting content downloads");
            self.queue
                .start_downloads(&update.transaction_id, &update.downloads);
        }
        Ok(())
    }

    fn reject(&self, update: &TransactionUpdate, e: LedgerError) -> TxnResult<()> {
        error!(error = %e, "ledger refused purchase");
        self.events.emit(StoreEvent::PurchaseFailed {
            product_id: update.product_id.clone(),
            reason: Some(e.to_string()),
        });
        self.finalize(&update.transaction_id)
    }

    fn handle_download(&self, update: DownloadUpdate) -> TxnResult<()> {
        let DownloadUpdate {
            transaction_id,
            product_id,
            state,
        } = update;

        match state {
            DownloadState::Waiting => {
                debug!(%transaction_id, %product_id, "download waiting");
                return Ok(());
            }
            DownloadState::Paused => {
                debug!(%transaction_id, %product_id, "download paused");
                return Ok(());
            }
            DownloadState::Active { progress } => {
                self.events.emit(StoreEvent::DownloadProgress {
                    product_id,
                    fraction: progress.clamp(0.0, 1.0),
                });
                return Ok(());
            }
            DownloadState::Finished { content_path } => {
                match install_content(&self.contents_root, &product_id, &content_path) {
                    Ok(path) => {
                        info!(%product_id, path = %path.display(), "download completed");
                        self.download_done(&transaction_id)?;
                        self.events
                            .emit(StoreEvent::DownloadCompleted { product_id, path });
                        return Ok(());
                    }
                    Err(e) => {
                        error!(%product_id, error = %e, "failed to install downloaded content");
                        self.events.emit(StoreEvent::DownloadFailed {
                            product_id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            DownloadState::Failed { reason } => {
                warn!(%product_id, %reason, "download failed");
                self.events
                    .emit(StoreEvent::DownloadFailed { product_id, reason });
            }
            DownloadState::Cancelled => {
                warn!(%product_id, "download cancelled");
                self.events.emit(StoreEvent::DownloadFailed {
                    product_id,
                    reason: "cancelled".into(),
                });
            }
        }
        self.download_done(&transaction_id)
    }

    /// Count one download of `transaction_id` as done; acknowledge the
    /// transaction when none remain.
    fn download_done(&self, transaction_id: &str) -> TxnResult<()> {
        let remaining = {
            let mut book = self.book()?;
            match book.pending.get_mut(transaction_id) {
                Some(pending) => {
                    pending.outstanding_downloads = pending.outstanding_downloads.saturating_sub(1);
                    pending.outstanding_downloads
                }
                None => {
                    warn!(transaction_id, "download for unknown transaction");
                    0
                }
            }
        };
        if remaining == 0 {
            self.finalize(transaction_id)?;
        }
        Ok(())
    }

    fn track(&self, update: &TransactionUpdate, outstanding_downloads: usize) -> TxnResult<()> {
        let mut book = self.book()?;
        Self::record(&mut book, update, outstanding_downloads);
        Ok(())
    }

    fn record(book: &mut Book, update: &TransactionUpdate, outstanding_downloads: usize) {
        book.pending.insert(
            update.transaction_id.clone(),
            PendingTransaction {
                transaction_id: update.transaction_id.clone(),
                product_id: update.product_id.clone(),
                state: update.state,
                outstanding_downloads,
            },
        );
    }

    fn finalize(&self, transaction_id: &str) -> TxnResult<()> {
        {
            let mut book = self.book()?;
            book.pending.remove(transaction_id);
            book.finalized.insert(transaction_id.to_string());
        }
        self.queue.finish_transaction(transaction_id);
        debug!(transaction_id, "transaction finalized");
        Ok(())
    }

    fn book(&self) -> TxnResult<MutexGuard<'_, Book>> {
        self.book.lock().map_err(|_| TxnError::LockPoisoned)
    }
}

impl std::fmt::Debug for TransactionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionProcessor")
            .field("contents_root", &self.contents_root)
            .field("consumables", &self.catalog.len())
            .finish_non_exhaustive()
    }
}
