// lib.rs - Core library structure for the marketplace

pub mod amount;
pub mod app_state;
pub mod config;
pub mod errors;
pub mod marketplace;
pub mod models;
pub mod notify;
pub mod provider;
pub mod repository;
pub mod session;
pub mod settlement;
pub mod validation;

// Re-export common types
pub use amount::Amount;
pub use app_state::MarketContext;
pub use config::{ConfigStore, MarketConfig, NativeCurrency, NetworkProfile, RepositoryConfig};
pub use errors::{MarketError, MarketResult};
pub use marketplace::{FetchLatch, Marketplace};
pub use models::{
    format_address, same_address, Listing, ListingDraft, TransactionDraft, TransactionRecord,
    TransactionStatus,
};
pub use notify::{MemoryNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use provider::{
    HttpProvider, ProviderError, ProviderEvent, WalletProvider, CODE_UNRECOGNIZED_CHAIN,
    CODE_USER_REJECTED,
};
pub use repository::{ListingRepository, RestRepository};
pub use session::{EventOutcome, SessionManager, SessionPhase, WalletSession};
pub use settlement::{PurchaseOutcome, SettlementCoordinator};
pub use validation::InputValidator;
