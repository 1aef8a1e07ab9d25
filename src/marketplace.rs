/// Marketplace view state.
///
/// Caches the listing set, the session's transaction history and the
/// owner-scoped sets (own listings, purchases) behind one lock, and answers
/// the derived ownership and entitlement queries. All writes funnel through
/// the methods here; readers get cloned snapshots and never observe
/// intermediate states.
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::errors::MarketResult;
use crate::models::{same_address, Listing, ListingDraft, TransactionRecord};
use crate::notify::Notifier;
use crate::repository::ListingRepository;
use crate::validation::InputValidator;

/// Progress of the automatic initial listing fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchLatch {
    #[default]
    NotStarted,
    InFlight,
    Done,
}

#[derive(Debug, Default)]
struct ViewState {
    listings: Vec<Listing>,
    transactions: Vec<TransactionRecord>,
    user_listings: Vec<Listing>,
    user_purchases: Vec<Listing>,
    active_address: String,
    loading: bool,
    latch: FetchLatch,
}

pub struct Marketplace {
    state: RwLock<ViewState>,
    repository: Arc<dyn ListingRepository>,
    notifier: Arc<dyn Notifier>,
}

impl Marketplace {
    pub fn new(repository: Arc<dyn ListingRepository>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            state: RwLock::new(ViewState::default()),
            repository,
            notifier,
        }
    }

    /// Cached listing set, newest first.
    pub fn listings(&self) -> Vec<Listing> {
        self.state.read().listings.clone()
    }

    /// Settlement records of this session, newest first.
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state.read().transactions.clone()
    }

    /// Listings offered by the active address.
    pub fn user_listings(&self) -> Vec<Listing> {
        self.state.read().user_listings.clone()
    }

    /// Listings the active address has purchased.
    pub fn user_purchases(&self) -> Vec<Listing> {
        self.state.read().user_purchases.clone()
    }

    pub fn active_address(&self) -> String {
        self.state.read().active_address.clone()
    }

    /// True while a full listing fetch is in flight.
    pub fn loading(&self) -> bool {
        self.state.read().loading
    }

    pub fn latch(&self) -> FetchLatch {
        self.state.read().latch
    }

    /// Automatic initial load: fetches the full listing set at most once
    /// per context lifetime, no matter how many views request it. Manual
    /// refreshes go through [`Marketplace::refresh_listings`].
    pub async fn ensure_listings_loaded(&self) {
        {
            let mut state = self.state.write();
            if state.latch != FetchLatch::NotStarted {
                return;
            }
            state.latch = FetchLatch::InFlight;
            state.loading = true;
        }

        self.fetch_listings().await;

        let mut state = self.state.write();
        state.latch = FetchLatch::Done;
        state.loading = false;
    }

    /// Caller-requested refresh; bypasses the fetched-once latch.
    pub async fn refresh_listings(&self) {
        {
            let mut state = self.state.write();
            state.loading = true;
            if state.latch == FetchLatch::NotStarted {
                state.latch = FetchLatch::InFlight;
            }
        }

        self.fetch_listings().await;

        let mut state = self.state.write();
        state.latch = FetchLatch::Done;
        state.loading = false;
    }

    async fn fetch_listings(&self) {
        match self.repository.list_listings().await {
            Ok(listings) => {
                debug!(count = listings.len(), "listing set refreshed");
                self.state.write().listings = listings;
            }
            Err(err) => {
                // Keep the last known set; a failed refresh never blanks
                // the marketplace.
                warn!(error = %err, "listing refresh failed");
                self.notifier.warning("Failed to fetch listings.");
            }
        }
    }

    /// Single listing straight from the repository, bypassing the cache so
    /// direct links resolve before the full list has loaded. Absent and
    /// failed lookups both come back as `None`.
    pub async fn get_listing_by_id(&self, id: &str) -> Option<Listing> {
        match self.repository.get_listing(id).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, id, "listing lookup failed");
                None
            }
        }
    }

    /// Listing from the local cache only. Settlement resolves against this,
    /// never against a fresh fetch.
    pub fn cached_listing(&self, id: &str) -> Option<Listing> {
        self.state
            .read()
            .listings
            .iter()
            .find(|l| l.id == id)
            .cloned()
    }

    /// Create a listing and prepend it to the cached set without waiting
    /// for the next refresh.
    pub async fn add_listing(&self, draft: ListingDraft) -> MarketResult<Listing> {
        if let Err(err) = InputValidator::shared().validate_listing_draft(&draft) {
            self.notifier.error(&err.to_string());
            return Err(err);
        }

        match self.repository.insert_listing(draft).await {
            Ok(listing) => {
                self.state.write().listings.insert(0, listing.clone());
                self.notifier
                    .success("Your code has been listed successfully!");
                Ok(listing)
            }
            Err(err) => {
                warn!(error = %err, "listing creation failed");
                self.notifier
                    .error("Failed to create listing. Please try again.");
                Err(err)
            }
        }
    }

    /// Adopt a new session address. The owner-scoped sets are cleared
    /// synchronously on every transition so a previous session's data is
    /// never visible to the next one; fetching the new owner's sets happens
    /// after, and the empty (anonymous) address fetches nothing.
    pub async fn set_active_address(&self, address: &str) {
        {
            let mut state = self.state.write();
            state.active_address = address.to_string();
            state.user_listings.clear();
            state.user_purchases.clear();
        }

        if address.is_empty() {
            return;
        }

        let listings = self.fetch_user_listings(address).await;
        let purchases = self.fetch_user_purchases(address).await;

        let mut state = self.state.write();
        // A transition that raced past this fetch wins; stale sets must not
        // resurface under a different address.
        if same_address(&state.active_address, address) {
            state.user_listings = listings;
            state.user_purchases = purchases;
        }
    }

    /// Listings offered by `address`, fetched fresh. Failures degrade to an
    /// empty set.
    pub async fn get_user_listings(&self, address: &str) -> Vec<Listing> {
        self.fetch_user_listings(address).await
    }

    /// Listings purchased by `address`, fetched fresh. Failures degrade to
    /// an empty set.
    pub async fn get_user_purchases(&self, address: &str) -> Vec<Listing> {
        self.fetch_user_purchases(address).await
    }

    /// Entitlement query: does `address` hold a successful purchase of this
    /// listing? Answered from the cached purchase set of the active
    /// session; anonymous visitors hold nothing.
    pub fn has_purchased(&self, address: &str, listing_id: &str) -> bool {
        let state = self.state.read();
        same_address(&state.active_address, address)
            && state.user_purchases.iter().any(|l| l.id == listing_id)
    }

    /// Ownership query for presentation affordances. Not a security
    /// boundary: nothing downstream blocks a seller from buying their own
    /// listing.
    pub fn is_owner(&self, address: &str, listing: &Listing) -> bool {
        listing.is_owned_by(address)
    }

    /// Prepend a freshly persisted settlement record to the local history.
    pub fn record_transaction(&self, record: TransactionRecord) {
        self.state.write().transactions.insert(0, record);
    }

    /// Read-after-write refresh of the buyer's purchase set, so entitlement
    /// queries see a settled purchase immediately.
    pub async fn refresh_purchases(&self, buyer: &str) {
        let purchases = self.fetch_user_purchases(buyer).await;
        let mut state = self.state.write();
        if same_address(&state.active_address, buyer) {
            state.user_purchases = purchases;
        }
    }

    /// Drop every cache and re-arm the fetch latch. Used when the settlement
    /// network changes under us and nothing cached can be trusted.
    pub fn reset(&self) {
        *self.state.write() = ViewState::default();
    }

    async fn fetch_user_listings(&self, address: &str) -> Vec<Listing> {
        match self.repository.listings_by_seller(address).await {
            Ok(listings) => listings,
            Err(err) => {
                warn!(error = %err, "seller listing fetch failed");
                Vec::new()
            }
        }
    }

    async fn fetch_user_purchases(&self, address: &str) -> Vec<Listing> {
        match self.repository.purchases_by_buyer(address).await {
            Ok(listings) => listings,
            Err(err) => {
                warn!(error = %err, "purchase fetch failed");
                Vec::new()
            }
        }
    }
}
