/// Remote listing store access.
///
/// The store speaks a REST dialect with PostgREST-style filters and flattens
/// field names to single lowercase words (`previewcode`, `selleraddress`).
/// The row structs in this module are the only place those names appear;
/// everything past this boundary uses the camelCase domain models.
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RepositoryConfig;
use crate::errors::{MarketError, MarketResult};
use crate::models::{
    now_millis, Listing, ListingDraft, TransactionDraft, TransactionRecord, TransactionStatus,
};

/// Length of the random suffix in client-minted record ids
const ID_SUFFIX_LENGTH: usize = 7;

/// Boundary to the remote listing store.
#[async_trait]
pub trait ListingRepository: Send + Sync {
    /// All listings, newest first.
    async fn list_listings(&self) -> MarketResult<Vec<Listing>>;

    /// Single listing by id, straight from the store.
    async fn get_listing(&self, id: &str) -> MarketResult<Option<Listing>>;

    /// Persist a new listing; the store echoes the inserted row back.
    async fn insert_listing(&self, draft: ListingDraft) -> MarketResult<Listing>;

    /// Listings offered by the given seller, newest first.
    async fn listings_by_seller(&self, address: &str) -> MarketResult<Vec<Listing>>;

    /// Listings the given buyer holds a successful settlement record for.
    async fn purchases_by_buyer(&self, address: &str) -> MarketResult<Vec<Listing>>;

    /// Persist a settlement record.
    async fn insert_transaction(&self, draft: TransactionDraft) -> MarketResult<TransactionRecord>;
}

/// Listing row in the store's flattened layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingRow {
    id: String,
    title: String,
    description: String,
    price: f64,
    language: String,
    category: String,
    previewcode: String,
    selleraddress: String,
    createdat: i64,
    #[serde(default)]
    imageurl: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl ListingRow {
    fn from_draft(draft: &ListingDraft, id: String, created_at: i64) -> Self {
        Self {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            price: draft.price,
            language: draft.language.clone(),
            category: draft.category.clone(),
            previewcode: draft.preview_code.clone(),
            selleraddress: draft.seller_address.clone(),
            createdat: created_at,
            imageurl: draft.image_url.clone(),
            tags: draft.tags.clone(),
        }
    }
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Listing {
            id: row.id,
            title: row.title,
            description: row.description,
            price: row.price,
            language: row.language,
            category: row.category,
            preview_code: row.previewcode,
            seller_address: row.selleraddress,
            created_at: row.createdat,
            image_url: row.imageurl,
            tags: row.tags,
        }
    }
}

/// Settlement record row in the store's flattened layout. The store has no
/// null transaction hash; a missing hash is stored as the empty string.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransactionRow {
    id: String,
    buyeraddress: String,
    selleraddress: String,
    listingid: String,
    amount: f64,
    status: TransactionStatus,
    timestamp: i64,
    #[serde(default)]
    txhash: String,
}

impl TransactionRow {
    fn from_draft(draft: &TransactionDraft, id: String, timestamp: i64) -> Self {
        Self {
            id,
            buyeraddress: draft.buyer_address.clone(),
            selleraddress: draft.seller_address.clone(),
            listingid: draft.listing_id.clone(),
            amount: draft.amount,
            status: draft.status,
            timestamp,
            txhash: draft.tx_hash.clone().unwrap_or_default(),
        }
    }
}

impl From<TransactionRow> for TransactionRecord {
    fn from(row: TransactionRow) -> Self {
        TransactionRecord {
            id: row.id,
            buyer_address: row.buyeraddress,
            seller_address: row.selleraddress,
            listing_id: row.listingid,
            amount: row.amount,
            status: row.status,
            timestamp: row.timestamp,
            tx_hash: if row.txhash.is_empty() {
                None
            } else {
                Some(row.txhash)
            },
        }
    }
}

/// Mint a client-side record id: `{prefix}-{epoch_millis}-{random suffix}`.
fn mint_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LENGTH)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}-{}", prefix, now_millis(), suffix)
}

/// HTTP client for the remote listing store.
pub struct RestRepository {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestRepository {
    pub fn new(config: &RepositoryConfig) -> MarketResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                MarketError::RepositoryError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(RestRepository {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection)
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: &[(&str, String)],
    ) -> MarketResult<Vec<T>> {
        let response = self
            .client
            .get(self.collection_url(collection))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| MarketError::RepositoryError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MarketError::RepositoryError(format!(
                "Store returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MarketError::RepositoryError(format!("Malformed store response: {}", e)))
    }

    async fn insert_row<T: Serialize, R: DeserializeOwned>(
        &self,
        collection: &str,
        row: &T,
    ) -> MarketResult<R> {
        let response = self
            .client
            .post(self.collection_url(collection))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            // Makes the store echo the inserted row in the response body.
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await
            .map_err(|e| MarketError::RepositoryError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MarketError::RepositoryError(format!(
                "Store returned {}",
                response.status()
            )));
        }

        let mut rows: Vec<R> = response
            .json()
            .await
            .map_err(|e| MarketError::RepositoryError(format!("Malformed store response: {}", e)))?;

        rows.pop()
            .ok_or_else(|| MarketError::RepositoryError("Store returned no inserted row".to_string()))
    }
}

#[async_trait]
impl ListingRepository for RestRepository {
    async fn list_listings(&self) -> MarketResult<Vec<Listing>> {
        let rows: Vec<ListingRow> = self
            .get_rows(
                "listings",
                &[
                    ("select", "*".to_string()),
                    ("order", "createdat.desc".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Listing::from).collect())
    }

    async fn get_listing(&self, id: &str) -> MarketResult<Option<Listing>> {
        let mut rows: Vec<ListingRow> = self
            .get_rows(
                "listings",
                &[
                    ("select", "*".to_string()),
                    ("id", format!("eq.{}", id)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.pop().map(Listing::from))
    }

    async fn insert_listing(&self, draft: ListingDraft) -> MarketResult<Listing> {
        let row = ListingRow::from_draft(&draft, mint_id("listing"), now_millis());
        let inserted: ListingRow = self.insert_row("listings", &row).await?;
        Ok(inserted.into())
    }

    async fn listings_by_seller(&self, address: &str) -> MarketResult<Vec<Listing>> {
        let rows: Vec<ListingRow> = self
            .get_rows(
                "listings",
                &[
                    ("select", "*".to_string()),
                    ("selleraddress", format!("eq.{}", address)),
                    ("order", "createdat.desc".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Listing::from).collect())
    }

    async fn purchases_by_buyer(&self, address: &str) -> MarketResult<Vec<Listing>> {
        // Two-step resolution: successful settlement records first, then the
        // listings they point at.
        let records: Vec<TransactionRow> = self
            .get_rows(
                "transactions",
                &[
                    ("select", "*".to_string()),
                    ("buyeraddress", format!("eq.{}", address)),
                    ("status", "eq.success".to_string()),
                ],
            )
            .await?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        let listing_ids: Vec<&str> = records.iter().map(|r| r.listingid.as_str()).collect();
        let rows: Vec<ListingRow> = self
            .get_rows(
                "listings",
                &[
                    ("select", "*".to_string()),
                    ("id", format!("in.({})", listing_ids.join(","))),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Listing::from).collect())
    }

    async fn insert_transaction(&self, draft: TransactionDraft) -> MarketResult<TransactionRecord> {
        let row = TransactionRow::from_draft(&draft, mint_id("tx"), now_millis());
        let inserted: TransactionRow = self.insert_row("transactions", &row).await?;
        Ok(inserted.into())
    }
}
