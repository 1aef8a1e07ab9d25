/// Signing provider boundary.
///
/// The marketplace never holds keys. Payments and account access go through
/// an external signing provider (a browser-extension wallet or a local
/// bridge) speaking the Ethereum provider request surface over JSON-RPC.
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Provider code for a request the user declined (EIP-1193).
pub const CODE_USER_REJECTED: i64 = 4001;
/// Provider code for a chain id the provider has no definition for; the
/// caller may register the chain and retry (EIP-3085).
pub const CODE_UNRECOGNIZED_CHAIN: i64 = 4902;
/// Code used for transport-level failures, from the JSON-RPC server error
/// range.
const CODE_TRANSPORT: i64 = -32000;

/// Error reported by the signing provider, carrying the provider's own
/// numeric code so callers can branch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        ProviderError {
            code,
            message: message.into(),
        }
    }

    fn transport(message: impl Into<String>) -> Self {
        Self::new(CODE_TRANSPORT, message)
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == CODE_USER_REJECTED
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == CODE_UNRECOGNIZED_CHAIN
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Event pushed by the provider outside the request/response cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The authorized account set changed. An empty list means access was
    /// revoked or the wallet locked.
    AccountsChanged(Vec<String>),
    /// The active chain changed; carries the new hex chain id.
    ChainChanged(String),
}

/// External signing provider.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Submit one provider request and await its result.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Subscribe to account and chain change events. Every subscriber sees
    /// every event, in emission order.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent>;
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: String,
    method: String,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
#[allow(dead_code)] // fields are populated via serde; not all are read by all call sites
struct JsonRpcResponse {
    jsonrpc: String,
    result: Option<Value>,
    error: Option<JsonRpcError>,
    id: u64,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Provider over plain HTTP JSON-RPC, for wallet bridges that expose the
/// request surface as an RPC endpoint.
///
/// An HTTP transport has no push channel, so subscribers receive no events;
/// their receivers stay open and simply never yield.
pub struct HttpProvider {
    client: Client,
    endpoint: String,
    // Held so subscriber channels stay open for the provider's lifetime
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProviderEvent>>>,
}

impl HttpProvider {
    /// Create a provider speaking to the given JSON-RPC endpoint
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpProvider {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscribers: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl WalletProvider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::transport(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transport(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ProviderError::new(error.code, error.message));
        }

        rpc_response
            .result
            .ok_or_else(|| ProviderError::transport("No result in RPC response"))
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}
