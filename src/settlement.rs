/// Purchase settlement.
///
/// A purchase is two steps with very different failure semantics: the
/// on-chain payment, which is irrevocable once the wallet accepts it, and
/// the marketplace record, which is best effort. Anything that stops the
/// payment fails the whole purchase; anything after the payment cannot,
/// because the buyer's funds have already moved. A record that fails to
/// persist therefore downgrades to a warning on an otherwise successful
/// outcome.
use std::sync::Arc;

use tracing::{info, warn};

use crate::amount::Amount;
use crate::errors::MarketError;
use crate::marketplace::Marketplace;
use crate::models::{TransactionDraft, TransactionRecord, TransactionStatus};
use crate::notify::Notifier;
use crate::repository::ListingRepository;
use crate::session::SessionManager;

/// What a settlement attempt produced. `success` tracks the payment, not
/// the record: a paid purchase with a lost record still reports success,
/// with the persistence error attached.
#[derive(Debug)]
pub struct PurchaseOutcome {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub record: Option<TransactionRecord>,
    pub error: Option<MarketError>,
}

impl PurchaseOutcome {
    fn failed(error: MarketError) -> Self {
        Self {
            success: false,
            tx_hash: None,
            record: None,
            error: Some(error),
        }
    }
}

pub struct SettlementCoordinator {
    session: Arc<SessionManager>,
    repository: Arc<dyn ListingRepository>,
    marketplace: Arc<Marketplace>,
    notifier: Arc<dyn Notifier>,
}

impl SettlementCoordinator {
    pub fn new(
        session: Arc<SessionManager>,
        repository: Arc<dyn ListingRepository>,
        marketplace: Arc<Marketplace>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            session,
            repository,
            marketplace,
            notifier,
        }
    }

    /// Settle a purchase of `listing_id` by `buyer_address`.
    ///
    /// The listing is resolved against the marketplace cache, the price is
    /// converted to base units, and the payment goes to the seller through
    /// the wallet session. Only after the wallet returns a transaction hash
    /// is the record written; a persistence failure at that point is
    /// reported as a warning while the outcome stays successful.
    pub async fn purchase(&self, listing_id: &str, buyer_address: &str) -> PurchaseOutcome {
        let Some(listing) = self.marketplace.cached_listing(listing_id) else {
            self.notifier.error("Listing not found");
            return PurchaseOutcome::failed(MarketError::ListingNotFound(listing_id.to_string()));
        };

        let amount = match Amount::from_tokens(listing.price) {
            Ok(amount) => amount,
            Err(err) => {
                self.notifier.error(&err.to_string());
                return PurchaseOutcome::failed(err);
            }
        };

        let tx_hash = match self
            .session
            .send_transaction(&listing.seller_address, amount)
            .await
        {
            Ok(hash) => hash,
            // The session has already notified the user; a second notice
            // for the same failure would just double up.
            Err(err) => return PurchaseOutcome::failed(err),
        };

        info!(listing_id, tx_hash, "payment submitted");

        let draft = TransactionDraft {
            buyer_address: buyer_address.to_string(),
            seller_address: listing.seller_address.clone(),
            listing_id: listing.id.clone(),
            amount: listing.price,
            status: TransactionStatus::Success,
            tx_hash: Some(tx_hash.clone()),
        };

        match self.repository.insert_transaction(draft).await {
            Ok(record) => {
                self.marketplace.record_transaction(record.clone());
                self.marketplace.refresh_purchases(buyer_address).await;
                self.notifier
                    .success("Purchase successful! You can now access the full code.");
                PurchaseOutcome {
                    success: true,
                    tx_hash: Some(tx_hash),
                    record: Some(record),
                    error: None,
                }
            }
            Err(err) => {
                warn!(error = %err, listing_id, "transaction record not persisted");
                self.notifier.warning(
                    "Payment was successful, but there was an issue recording the transaction.",
                );
                PurchaseOutcome {
                    success: true,
                    tx_hash: Some(tx_hash),
                    record: None,
                    error: Some(MarketError::RecordPersistenceFailure(err.to_string())),
                }
            }
        }
    }
}
