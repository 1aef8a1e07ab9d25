/// Wallet session management.
///
/// Tracks the connection to the external signing provider as a small state
/// machine (disconnected, connecting, connected-with-address) and owns every
/// mutation of that state. Consumers observe snapshots through a watch
/// channel; only this manager writes.
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::config::NetworkProfile;
use crate::errors::{MarketError, MarketResult};
use crate::notify::Notifier;
use crate::provider::{ProviderEvent, WalletProvider};

/// Connection phase of the wallet session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Disconnected,
    /// A connect request is in flight with the provider
    Connecting,
    Connected,
}

/// Point-in-time snapshot of the wallet session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSession {
    pub phase: SessionPhase,
    /// Active account address; empty while not connected
    pub address: String,
}

impl WalletSession {
    pub fn connected(&self) -> bool {
        self.phase == SessionPhase::Connected
    }

    pub fn connecting(&self) -> bool {
        self.phase == SessionPhase::Connecting
    }
}

/// Outcome of applying one provider push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Session state was updated in place.
    Applied,
    /// The active chain changed. Chain switches are not atomic on the
    /// provider side, so downstream state cannot be reconciled in place;
    /// the embedding context must rebuild from scratch.
    ReloadRequired,
}

/// Manages the provider connection and the observable session cell.
pub struct SessionManager {
    provider: Option<Arc<dyn WalletProvider>>,
    network: NetworkProfile,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<WalletSession>,
}

impl SessionManager {
    pub fn new(
        provider: Option<Arc<dyn WalletProvider>>,
        network: NetworkProfile,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(WalletSession::default());
        Self {
            provider,
            network,
            notifier,
            state,
        }
    }

    /// Observe session changes. The receiver always holds the latest
    /// snapshot.
    pub fn subscribe(&self) -> watch::Receiver<WalletSession> {
        self.state.subscribe()
    }

    /// Current session snapshot.
    pub fn snapshot(&self) -> WalletSession {
        self.state.borrow().clone()
    }

    // Single write point for session state.
    fn set_state(&self, phase: SessionPhase, address: String) {
        self.state.send_replace(WalletSession { phase, address });
    }

    /// Connect to the signing provider and adopt the first authorized
    /// account. The network check runs before account access: a session is
    /// never established on the wrong chain.
    pub async fn connect_wallet(&self) -> MarketResult<String> {
        let provider = match &self.provider {
            Some(provider) => provider.clone(),
            None => {
                self.notifier.error(
                    "No wallet extension detected. Please install a wallet to use this marketplace.",
                );
                return Err(MarketError::ProviderUnavailable);
            }
        };

        self.set_state(SessionPhase::Connecting, String::new());

        if let Err(err) = self.ensure_network(provider.as_ref()).await {
            self.set_state(SessionPhase::Disconnected, String::new());
            self.notifier.error(&format!(
                "Please switch to the {} network",
                self.network.chain_name
            ));
            return Err(err);
        }

        match provider.request("eth_requestAccounts", json!([])).await {
            Ok(value) => match parse_accounts(&value).into_iter().next() {
                Some(account) => {
                    self.set_state(SessionPhase::Connected, account.clone());
                    info!(address = %account, "wallet connected");
                    self.notifier.success("Wallet connected successfully!");
                    Ok(account)
                }
                None => {
                    self.set_state(SessionPhase::Disconnected, String::new());
                    self.notifier.error("Failed to connect wallet");
                    Err(MarketError::TransactionError(
                        "Provider returned no accounts".to_string(),
                    ))
                }
            },
            Err(err) if err.is_user_rejection() => {
                self.set_state(SessionPhase::Disconnected, String::new());
                self.notifier.error("Connection was rejected by user");
                Err(MarketError::UserRejected(err.message))
            }
            Err(err) => {
                self.set_state(SessionPhase::Disconnected, String::new());
                self.notifier.error("Failed to connect wallet");
                Err(MarketError::TransactionError(err.message))
            }
        }
    }

    /// Clear the local session. Provider-side authorization is not revoked;
    /// the provider will still report this account on the next startup.
    pub fn disconnect_wallet(&self) {
        self.set_state(SessionPhase::Disconnected, String::new());
        info!("wallet disconnected");
        self.notifier.info("Wallet disconnected");
    }

    /// Adopt an already-authorized account on startup, if the provider
    /// remembers one. Quiet: no notices, and a failed network check leaves
    /// the restored session in place.
    pub async fn restore_session(&self) {
        let Some(provider) = self.provider.clone() else {
            return;
        };

        let accounts = match provider.request("eth_accounts", json!([])).await {
            Ok(value) => parse_accounts(&value),
            Err(err) => {
                debug!(error = %err, "session restore skipped");
                return;
            }
        };

        let Some(account) = accounts.into_iter().next() else {
            return;
        };

        self.set_state(SessionPhase::Connected, account.clone());
        info!(address = %account, "restored wallet session");

        if let Err(err) = self.ensure_network(provider.as_ref()).await {
            warn!(error = %err, "restored session is on the wrong network");
        }
    }

    /// Submit a native value transfer from the session account and return
    /// the network transaction hash. Submission is the success criterion;
    /// confirmation is never awaited.
    pub async fn send_transaction(&self, to: &str, value: Amount) -> MarketResult<String> {
        let session = self.snapshot();
        if !session.connected() {
            self.notifier.error("Please connect your wallet first");
            return Err(MarketError::NotConnected);
        }

        let provider = match &self.provider {
            Some(provider) => provider.clone(),
            None => return Err(MarketError::ProviderUnavailable),
        };

        if let Err(err) = self.ensure_network(provider.as_ref()).await {
            self.notifier.error(&format!(
                "Please switch to the {} network",
                self.network.chain_name
            ));
            return Err(err);
        }

        let gas_price = match provider.request("eth_gasPrice", json!([])).await {
            Ok(value) => value,
            Err(err) => {
                self.notifier.error("Transaction failed");
                return Err(MarketError::TransactionError(err.message));
            }
        };

        let params = json!([{
            "from": session.address,
            "to": to,
            "value": value.as_hex(),
            "gasPrice": gas_price,
        }]);

        match provider.request("eth_sendTransaction", params).await {
            Ok(value) => match value.as_str() {
                Some(hash) => {
                    info!(%hash, to, "value transfer submitted");
                    Ok(hash.to_string())
                }
                None => {
                    self.notifier.error("Transaction failed");
                    Err(MarketError::TransactionError(
                        "Provider returned a malformed transaction hash".to_string(),
                    ))
                }
            },
            Err(err) if err.is_user_rejection() => {
                self.notifier.error("Transaction was rejected by user");
                Err(MarketError::UserRejected(err.message))
            }
            Err(err) => {
                self.notifier.error("Transaction failed");
                Err(MarketError::TransactionError(err.message))
            }
        }
    }

    /// Apply one provider push event. Events funnel through here so the
    /// session keeps a single writer.
    pub fn apply_provider_event(&self, event: ProviderEvent) -> EventOutcome {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                match accounts.into_iter().find(|a| !a.is_empty()) {
                    Some(account) => {
                        info!(address = %account, "provider switched accounts");
                        self.set_state(SessionPhase::Connected, account);
                        self.notifier.info("Account changed");
                    }
                    None => {
                        info!("provider revoked account access");
                        self.set_state(SessionPhase::Disconnected, String::new());
                        self.notifier.info("Disconnected from wallet");
                    }
                }
                EventOutcome::Applied
            }
            ProviderEvent::ChainChanged(chain_id) => {
                info!(%chain_id, "provider chain changed");
                EventOutcome::ReloadRequired
            }
        }
    }

    /// Verify the provider is on the required chain, switching or
    /// registering the chain definition as needed.
    async fn ensure_network(&self, provider: &dyn WalletProvider) -> MarketResult<()> {
        let chain_id = provider
            .request("eth_chainId", json!([]))
            .await
            .map_err(|e| MarketError::WrongNetwork(e.message))?;
        let chain_id = chain_id.as_str().unwrap_or_default().to_string();

        if self.network.matches_chain(&chain_id) {
            return Ok(());
        }

        debug!(current = %chain_id, required = %self.network.chain_id, "switching provider network");
        let switch_params = json!([{ "chainId": self.network.chain_id }]);
        match provider
            .request("wallet_switchEthereumChain", switch_params)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_unrecognized_chain() => {
                // The provider has no definition for this chain yet;
                // register it and treat a successful registration as a
                // completed switch.
                provider
                    .request("wallet_addEthereumChain", json!([self.network]))
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        warn!(error = %e, "failed to register network with provider");
                        MarketError::WrongNetwork(e.message)
                    })
            }
            Err(err) => {
                warn!(error = %err, "network switch failed");
                Err(MarketError::WrongNetwork(err.message))
            }
        }
    }
}

fn parse_accounts(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|accounts| {
            accounts
                .iter()
                .filter_map(|a| a.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
