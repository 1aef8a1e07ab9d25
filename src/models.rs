/// Core marketplace data types shared across the session, settlement and
/// view-state layers.
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A code listing offered for sale.
///
/// Listings are immutable once created; there is no edit or delete path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Client-minted identifier (`listing-{millis}-{suffix}`)
    pub id: String,
    pub title: String,
    pub description: String,
    /// Asking price in whole native tokens
    pub price: f64,
    pub language: String,
    pub category: String,
    /// Publicly visible excerpt of the code
    pub preview_code: String,
    pub seller_address: String,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Listing {
    /// Ownership test against a wallet address, case-insensitive.
    pub fn is_owned_by(&self, address: &str) -> bool {
        same_address(&self.seller_address, address)
    }
}

/// Seller-submitted fields of a new listing. The repository assigns the id
/// and creation timestamp at insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub language: String,
    pub category: String,
    pub preview_code: String,
    pub seller_address: String,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
}

/// Lifecycle state of a settlement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

/// Record of one purchase settlement. Append-only; a record is written once
/// and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Client-minted identifier (`tx-{millis}-{suffix}`)
    pub id: String,
    pub buyer_address: String,
    pub seller_address: String,
    pub listing_id: String,
    /// Settled price in whole native tokens
    pub amount: f64,
    pub status: TransactionStatus,
    /// Persist time, epoch milliseconds
    pub timestamp: i64,
    /// Network transaction hash, absent when the transfer never reached
    /// the network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// Settlement fields known before the repository assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub buyer_address: String,
    pub seller_address: String,
    pub listing_id: String,
    pub amount: f64,
    pub status: TransactionStatus,
    pub tx_hash: Option<String>,
}

/// Address identity is case-insensitive: checksummed and lowercased forms
/// of the same account compare equal. The empty address is the anonymous
/// visitor and matches nothing.
pub fn same_address(a: &str, b: &str) -> bool {
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

/// Shorten an address for display: first six characters, ellipsis, last four.
pub fn format_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Current time as epoch milliseconds, the timestamp unit used by listings
/// and transaction records.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
