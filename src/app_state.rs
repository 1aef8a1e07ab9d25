use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigStore, MarketConfig};
use crate::errors::MarketResult;
use crate::marketplace::Marketplace;
use crate::models::Listing;
use crate::notify::{Notifier, TracingNotifier};
use crate::provider::WalletProvider;
use crate::repository::{ListingRepository, RestRepository};
use crate::session::{EventOutcome, SessionManager};
use crate::settlement::{PurchaseOutcome, SettlementCoordinator};

/// Everything a marketplace front end needs, wired together: persisted
/// configuration, the wallet session, the listing cache and the settlement
/// coordinator, all sharing one notifier and one repository client.
pub struct MarketContext {
    config_store: ConfigStore,
    config: MarketConfig,
    environment: String,
    provider: Option<Arc<dyn WalletProvider>>,
    session: Arc<SessionManager>,
    marketplace: Arc<Marketplace>,
    settlement: SettlementCoordinator,
}

impl MarketContext {
    /// Build a context from persisted configuration under `root_dir`.
    ///
    /// `provider` is the browser wallet bridge, absent when no wallet
    /// extension is installed; every wallet operation then fails with an
    /// install prompt while browsing stays fully functional.
    pub fn initialize(
        root_dir: PathBuf,
        provider: Option<Arc<dyn WalletProvider>>,
    ) -> MarketResult<Self> {
        let environment =
            std::env::var("CODEMART_ENV").unwrap_or_else(|_| "development".to_string());
        let config_store = ConfigStore::in_dir(&root_dir);
        let config = config_store.load_or_default(environment.clone())?;
        let repository: Arc<dyn ListingRepository> =
            Arc::new(RestRepository::new(&config.repository)?);
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

        Ok(Self::assemble(
            config_store,
            config,
            environment,
            provider,
            repository,
            notifier,
        ))
    }

    /// Wire a context from caller-supplied components instead of persisted
    /// configuration and a live REST client.
    pub fn with_components(
        config_store: ConfigStore,
        config: MarketConfig,
        provider: Option<Arc<dyn WalletProvider>>,
        repository: Arc<dyn ListingRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let environment = config.environment.clone();
        Self::assemble(
            config_store,
            config,
            environment,
            provider,
            repository,
            notifier,
        )
    }

    fn assemble(
        config_store: ConfigStore,
        config: MarketConfig,
        environment: String,
        provider: Option<Arc<dyn WalletProvider>>,
        repository: Arc<dyn ListingRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let session = Arc::new(SessionManager::new(
            provider.clone(),
            config.network.clone(),
            notifier.clone(),
        ));
        let marketplace = Arc::new(Marketplace::new(repository.clone(), notifier.clone()));
        let settlement = SettlementCoordinator::new(
            session.clone(),
            repository,
            marketplace.clone(),
            notifier,
        );

        Self {
            config_store,
            config,
            environment,
            provider,
            session,
            marketplace,
            settlement,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn marketplace(&self) -> &Marketplace {
        &self.marketplace
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Bring the context up: re-adopt any already-authorized account, load
    /// the listing set once and scope the owner data to whatever session
    /// came back.
    pub async fn start(&self) {
        self.session.restore_session().await;
        self.marketplace.ensure_listings_loaded().await;
        let session = self.session.snapshot();
        self.marketplace.set_active_address(&session.address).await;
    }

    /// Rebuild after the active chain changed. Cached listings, records and
    /// owner sets all refer to the previous chain, so everything is dropped
    /// and refetched.
    pub async fn reload(&self) {
        info!("chain changed, reloading market context");
        self.marketplace.reset();
        self.start().await;
    }

    /// Drive provider push events and session changes into the view state.
    /// Runs until the provider event stream closes. Contexts without a
    /// provider return immediately.
    pub async fn run_event_pump(&self) {
        let Some(provider) = &self.provider else {
            return;
        };
        let mut events = provider.subscribe();
        let mut sessions = self.session.subscribe();

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if self.session.apply_provider_event(event) == EventOutcome::ReloadRequired {
                        self.reload().await;
                    }
                }
                changed = sessions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let address = sessions.borrow_and_update().address.clone();
                    if !address.eq_ignore_ascii_case(&self.marketplace.active_address()) {
                        self.marketplace.set_active_address(&address).await;
                    }
                }
            }
        }
    }

    /// Connect the wallet and scope the marketplace to the new account.
    pub async fn connect_wallet(&self) -> MarketResult<String> {
        let address = self.session.connect_wallet().await?;
        self.marketplace.set_active_address(&address).await;
        Ok(address)
    }

    /// Drop the session and the owner-scoped view state.
    pub async fn disconnect_wallet(&self) {
        self.session.disconnect_wallet();
        self.marketplace.set_active_address("").await;
    }

    /// Purchase a listing on behalf of the connected account.
    pub async fn purchase_listing(&self, listing_id: &str) -> PurchaseOutcome {
        let buyer = self.session.snapshot().address;
        self.settlement.purchase(listing_id, &buyer).await
    }

    /// Does the connected account hold a successful purchase of this
    /// listing?
    pub fn has_purchased(&self, listing_id: &str) -> bool {
        let session = self.session.snapshot();
        self.marketplace.has_purchased(&session.address, listing_id)
    }

    /// Is the connected account the seller of this listing?
    pub fn is_owner(&self, listing: &Listing) -> bool {
        let session = self.session.snapshot();
        self.marketplace.is_owner(&session.address, listing)
    }
}
