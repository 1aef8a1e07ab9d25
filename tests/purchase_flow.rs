use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use codemart::{
    ConfigStore, FetchLatch, Listing, ListingDraft, ListingRepository, MarketConfig,
    MarketContext, MarketError, MarketResult, MemoryNotifier, NoticeLevel, Notifier,
    ProviderError, ProviderEvent, TransactionDraft, TransactionRecord, TransactionStatus,
    WalletProvider,
};

const BUYER: &str = "0x1111000000000000000000000000000000000001";
const SELLER: &str = "0x2222000000000000000000000000000000000002";
const OTHER: &str = "0x3333000000000000000000000000000000000003";
const TX_HASH: &str = "0x5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe0001";

/// Wallet double: answers provider requests like a Sepolia wallet with a
/// configured account set, and lets tests queue failures or push events.
struct ScriptedProvider {
    accounts: Vec<String>,
    authorized: AtomicBool,
    overrides: Mutex<HashMap<String, VecDeque<Result<Value, ProviderError>>>>,
    calls: Mutex<Vec<(String, Value)>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<ProviderEvent>>>,
}

impl ScriptedProvider {
    fn with_accounts(accounts: &[&str]) -> Self {
        Self {
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
            authorized: AtomicBool::new(false),
            overrides: Mutex::default(),
            calls: Mutex::default(),
            senders: Mutex::default(),
        }
    }

    fn fail_next(&self, method: &str, error: ProviderError) {
        self.overrides
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(Err(error));
    }

    fn emit(&self, event: ProviderEvent) {
        self.senders.lock().retain(|s| s.send(event.clone()).is_ok());
    }

    fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl WalletProvider for ScriptedProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.calls.lock().push((method.to_string(), params));
        if let Some(queued) = self
            .overrides
            .lock()
            .get_mut(method)
            .and_then(|queue| queue.pop_front())
        {
            return queued;
        }

        match method {
            "eth_chainId" => Ok(json!("0xaa36a7")),
            "eth_accounts" => {
                if self.authorized.load(Ordering::SeqCst) {
                    Ok(json!(self.accounts))
                } else {
                    Ok(json!([]))
                }
            }
            "eth_requestAccounts" => {
                self.authorized.store(true, Ordering::SeqCst);
                Ok(json!(self.accounts))
            }
            "eth_gasPrice" => Ok(json!("0x3b9aca00")),
            "eth_sendTransaction" => Ok(json!(TX_HASH)),
            "wallet_switchEthereumChain" | "wallet_addEthereumChain" => Ok(Value::Null),
            other => Err(ProviderError::new(
                -32601,
                format!("Method not found: {}", other),
            )),
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        rx
    }
}

/// Listing store double with the same read and write surface as the REST
/// repository, plus switches for failure injection.
#[derive(Default)]
struct InMemoryRepository {
    listings: Mutex<Vec<Listing>>,
    records: Mutex<Vec<TransactionRecord>>,
    fail_record_inserts: AtomicBool,
    list_fetches: AtomicUsize,
}

impl InMemoryRepository {
    fn with_listings(listings: Vec<Listing>) -> Self {
        Self {
            listings: Mutex::new(listings),
            ..Self::default()
        }
    }

    fn records(&self) -> Vec<TransactionRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ListingRepository for InMemoryRepository {
    async fn list_listings(&self) -> MarketResult<Vec<Listing>> {
        self.list_fetches.fetch_add(1, Ordering::SeqCst);
        let mut listings = self.listings.lock().clone();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings)
    }

    async fn get_listing(&self, id: &str) -> MarketResult<Option<Listing>> {
        Ok(self.listings.lock().iter().find(|l| l.id == id).cloned())
    }

    async fn insert_listing(&self, draft: ListingDraft) -> MarketResult<Listing> {
        let listing = Listing {
            id: format!("listing-{}", self.listings.lock().len() + 1),
            title: draft.title,
            description: draft.description,
            price: draft.price,
            language: draft.language,
            category: draft.category,
            preview_code: draft.preview_code,
            seller_address: draft.seller_address,
            created_at: 100,
            image_url: draft.image_url,
            tags: draft.tags,
        };
        self.listings.lock().push(listing.clone());
        Ok(listing)
    }

    async fn listings_by_seller(&self, address: &str) -> MarketResult<Vec<Listing>> {
        Ok(self
            .listings
            .lock()
            .iter()
            .filter(|l| l.seller_address == address)
            .cloned()
            .collect())
    }

    async fn purchases_by_buyer(&self, address: &str) -> MarketResult<Vec<Listing>> {
        let ids: Vec<String> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.buyer_address == address && r.status == TransactionStatus::Success)
            .map(|r| r.listing_id.clone())
            .collect();
        Ok(self
            .listings
            .lock()
            .iter()
            .filter(|l| ids.contains(&l.id))
            .cloned()
            .collect())
    }

    async fn insert_transaction(&self, draft: TransactionDraft) -> MarketResult<TransactionRecord> {
        if self.fail_record_inserts.load(Ordering::SeqCst) {
            return Err(MarketError::RepositoryError(
                "record store offline".to_string(),
            ));
        }
        let record = TransactionRecord {
            id: format!("tx-{}", self.records.lock().len() + 1),
            buyer_address: draft.buyer_address,
            seller_address: draft.seller_address,
            listing_id: draft.listing_id,
            amount: draft.amount,
            status: draft.status,
            timestamp: 100,
            tx_hash: draft.tx_hash,
        };
        self.records.lock().push(record.clone());
        Ok(record)
    }
}

struct Harness {
    context: Arc<MarketContext>,
    provider: Arc<ScriptedProvider>,
    repository: Arc<InMemoryRepository>,
    notifier: Arc<MemoryNotifier>,
    _dir: TempDir,
}

impl Harness {
    /// Spawn the event pump and wait until it has subscribed to the
    /// provider stream; events emitted sooner would be dropped.
    async fn spawn_pump(&self) -> tokio::task::JoinHandle<()> {
        let pump = self.context.clone();
        let handle = tokio::spawn(async move { pump.run_event_pump().await });
        let provider = self.provider.clone();
        wait_for("event pump to subscribe", move || {
            !provider.senders.lock().is_empty()
        })
        .await;
        handle
    }
}

fn market_with_listings(listings: Vec<Listing>) -> Harness {
    let dir = TempDir::new().expect("create temp dir");
    let provider = Arc::new(ScriptedProvider::with_accounts(&[BUYER]));
    let repository = Arc::new(InMemoryRepository::with_listings(listings));
    let notifier = Arc::new(MemoryNotifier::new());

    let provider_dyn: Arc<dyn WalletProvider> = provider.clone();
    let repository_dyn: Arc<dyn ListingRepository> = repository.clone();
    let notifier_dyn: Arc<dyn Notifier> = notifier.clone();
    let context = MarketContext::with_components(
        ConfigStore::in_dir(dir.path()),
        MarketConfig::new("test"),
        Some(provider_dyn),
        repository_dyn,
        notifier_dyn,
    );

    Harness {
        context: Arc::new(context),
        provider,
        repository,
        notifier,
        _dir: dir,
    }
}

fn listing_by(id: &str, seller: &str, price: f64) -> Listing {
    Listing {
        id: id.to_string(),
        title: "Rate limiter".to_string(),
        description: "Token bucket with burst control".to_string(),
        price,
        language: "rust".to_string(),
        category: "networking".to_string(),
        preview_code: "pub struct Bucket;".to_string(),
        seller_address: seller.to_string(),
        created_at: 10,
        image_url: None,
        tags: vec!["rate-limit".to_string()],
    }
}

fn listing(id: &str, price: f64) -> Listing {
    listing_by(id, SELLER, price)
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn connect_flow_establishes_scoped_session() {
    let market = market_with_listings(vec![listing("l1", 0.05)]);
    market.context.start().await;

    // Startup restores nothing when the wallet has not authorized us, but
    // browsing still works.
    assert!(!market.context.session().snapshot().connected());
    assert_eq!(market.context.marketplace().listings().len(), 1);
    assert_eq!(market.repository.list_fetches.load(Ordering::SeqCst), 1);

    let address = market.context.connect_wallet().await.expect("connect");

    assert_eq!(address, BUYER);
    assert!(market.context.session().snapshot().connected());
    assert_eq!(market.context.marketplace().active_address(), BUYER);
    assert!(market
        .notifier
        .has_notice(NoticeLevel::Success, "Wallet connected successfully"));
}

#[tokio::test]
async fn purchase_settles_payment_and_record() {
    let market = market_with_listings(vec![listing("l1", 0.05)]);
    market.context.start().await;
    market.context.connect_wallet().await.expect("connect");
    assert!(!market.context.has_purchased("l1"));

    let outcome = market.context.purchase_listing("l1").await;

    assert!(outcome.success);
    assert_eq!(outcome.tx_hash.as_deref(), Some(TX_HASH));
    assert!(outcome.error.is_none());
    let record = outcome.record.expect("record persisted");
    assert_eq!(record.listing_id, "l1");
    assert_eq!(record.buyer_address, BUYER);
    assert_eq!(record.seller_address, SELLER);
    assert_eq!(record.status, TransactionStatus::Success);
    assert_eq!(record.tx_hash.as_deref(), Some(TX_HASH));

    // 0.05 tokens go to the seller in base units, from the session account.
    let sends = market.provider.calls_to("eth_sendTransaction");
    assert_eq!(sends.len(), 1);
    let tx = &sends[0][0];
    assert_eq!(tx["from"], BUYER);
    assert_eq!(tx["to"], SELLER);
    assert_eq!(tx["value"], "0xb1a2bc2ec50000");
    assert_eq!(tx["gasPrice"], "0x3b9aca00");

    assert_eq!(market.repository.records().len(), 1);
    assert!(market.context.has_purchased("l1"));
    assert_eq!(market.context.marketplace().transactions()[0].id, record.id);
    assert!(market
        .notifier
        .has_notice(NoticeLevel::Success, "Purchase successful"));
}

#[tokio::test]
async fn rejected_payment_fails_without_a_record() {
    let market = market_with_listings(vec![listing("l1", 0.05)]);
    market.context.start().await;
    market.context.connect_wallet().await.expect("connect");
    market.provider.fail_next(
        "eth_sendTransaction",
        ProviderError::new(4001, "User rejected the request"),
    );

    let outcome = market.context.purchase_listing("l1").await;

    assert!(!outcome.success);
    assert!(outcome.tx_hash.is_none());
    assert!(outcome.record.is_none());
    assert!(matches!(outcome.error, Some(MarketError::UserRejected(_))));
    assert!(market.repository.records().is_empty());
    assert!(!market.context.has_purchased("l1"));
    assert!(market
        .notifier
        .has_notice(NoticeLevel::Error, "Transaction was rejected by user"));

    // The rejection surfaces exactly once.
    let errors = market
        .notifier
        .notices()
        .iter()
        .filter(|n| n.level == NoticeLevel::Error)
        .count();
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn lost_record_still_reports_payment_success() {
    let market = market_with_listings(vec![listing("l1", 0.05)]);
    market.context.start().await;
    market.context.connect_wallet().await.expect("connect");
    market
        .repository
        .fail_record_inserts
        .store(true, Ordering::SeqCst);

    let outcome = market.context.purchase_listing("l1").await;

    // The payment went through, so the outcome must not claim failure even
    // though the record never made it to the store.
    assert!(outcome.success);
    assert_eq!(outcome.tx_hash.as_deref(), Some(TX_HASH));
    assert!(outcome.record.is_none());
    assert!(matches!(
        outcome.error,
        Some(MarketError::RecordPersistenceFailure(_))
    ));
    assert!(market.repository.records().is_empty());
    assert!(!market.context.has_purchased("l1"));
    assert!(market.notifier.has_notice(
        NoticeLevel::Warning,
        "Payment was successful, but there was an issue recording the transaction",
    ));
    assert!(!market
        .notifier
        .has_notice(NoticeLevel::Success, "Purchase successful"));
}

#[tokio::test]
async fn unknown_listing_fails_before_any_payment() {
    let market = market_with_listings(vec![listing("l1", 0.05)]);
    market.context.start().await;
    market.context.connect_wallet().await.expect("connect");

    let outcome = market.context.purchase_listing("ghost").await;

    assert!(!outcome.success);
    assert!(matches!(outcome.error, Some(MarketError::ListingNotFound(_))));
    assert!(market.provider.calls_to("eth_sendTransaction").is_empty());
    assert!(market
        .notifier
        .has_notice(NoticeLevel::Error, "Listing not found"));
}

#[tokio::test]
async fn seller_can_buy_their_own_listing() {
    // Ownership is a presentation affordance, not a settlement guard;
    // nothing blocks a seller from purchasing their own listing.
    let market = market_with_listings(vec![listing_by("own", BUYER, 0.05)]);
    market.context.start().await;
    market.context.connect_wallet().await.expect("connect");
    let own = market
        .context
        .marketplace()
        .cached_listing("own")
        .expect("cached");
    assert!(market.context.is_owner(&own));

    let outcome = market.context.purchase_listing("own").await;

    assert!(outcome.success);
    assert_eq!(market.repository.records().len(), 1);
    assert!(market.context.has_purchased("own"));
}

#[tokio::test]
async fn revoked_accounts_clear_owner_state() {
    let market = market_with_listings(vec![listing("l1", 0.05)]);
    market.context.start().await;
    market.context.connect_wallet().await.expect("connect");
    market.context.purchase_listing("l1").await;
    assert!(market.context.has_purchased("l1"));

    let handle = market.spawn_pump().await;

    market.provider.emit(ProviderEvent::AccountsChanged(vec![]));
    let context = market.context.clone();
    wait_for("session and owner state to clear", move || {
        !context.session().snapshot().connected()
            && context.marketplace().active_address().is_empty()
    })
    .await;

    assert!(!market.context.has_purchased("l1"));
    assert!(market.context.marketplace().user_purchases().is_empty());
    handle.abort();
}

#[tokio::test]
async fn account_switch_rescopes_to_new_owner() {
    let market = market_with_listings(vec![listing("l1", 0.05), listing_by("l2", OTHER, 0.1)]);
    market.context.start().await;
    market.context.connect_wallet().await.expect("connect");
    assert!(market.context.marketplace().user_listings().is_empty());

    let handle = market.spawn_pump().await;

    market
        .provider
        .emit(ProviderEvent::AccountsChanged(vec![OTHER.to_string()]));
    let context = market.context.clone();
    wait_for("view state to rescope", move || {
        context.marketplace().user_listings().len() == 1
    })
    .await;

    assert_eq!(market.context.session().snapshot().address, OTHER);
    assert_eq!(market.context.marketplace().active_address(), OTHER);
    assert_eq!(market.context.marketplace().user_listings()[0].id, "l2");
    handle.abort();
}

#[tokio::test]
async fn chain_change_rebuilds_the_context() {
    let market = market_with_listings(vec![listing("l1", 0.05)]);
    market.context.start().await;
    market.context.connect_wallet().await.expect("connect");
    let fetches_before = market.repository.list_fetches.load(Ordering::SeqCst);

    let handle = market.spawn_pump().await;

    market
        .repository
        .listings
        .lock()
        .push(listing_by("l2", OTHER, 0.1));
    market
        .provider
        .emit(ProviderEvent::ChainChanged("0x1".to_string()));

    let context = market.context.clone();
    wait_for("context to reload", move || {
        context.marketplace().listings().len() == 2
    })
    .await;

    assert!(market.repository.list_fetches.load(Ordering::SeqCst) > fetches_before);
    // The wallet still authorizes us, so the rebuilt context comes back
    // connected and scoped to the same account.
    assert!(market.context.session().snapshot().connected());
    assert_eq!(market.context.marketplace().active_address(), BUYER);
    handle.abort();
}

#[tokio::test]
async fn initialize_builds_a_browsable_context_from_disk() {
    std::env::set_var("CODEMART_ENV", "test");
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::in_dir(dir.path());
    let mut config = MarketConfig::new("test");
    config.repository.endpoint = "http://127.0.0.1:1".into();
    store.save(&config).unwrap();

    let context = MarketContext::initialize(dir.path().to_path_buf(), None).expect("initialize");
    std::env::remove_var("CODEMART_ENV");

    assert_eq!(context.environment(), "test");
    assert_eq!(context.config().network.chain_id, "0xaa36a7");
    assert_eq!(context.config().repository.endpoint, "http://127.0.0.1:1");

    // No wallet bridge and no reachable listing store: startup still
    // settles into a browsable, disconnected state.
    context.start().await;
    assert!(!context.session().snapshot().connected());
    assert!(context.marketplace().listings().is_empty());
    assert_eq!(context.marketplace().latch(), FetchLatch::Done);

    // Wallet operations fail with an install prompt instead of panicking.
    assert!(context.connect_wallet().await.is_err());
}
