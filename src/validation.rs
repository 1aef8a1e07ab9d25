use crate::amount::Amount;
use crate::errors::{MarketError, MarketResult};
use crate::models::ListingDraft;
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest accepted listing title
const MAX_TITLE_LENGTH: usize = 100;
/// Longest accepted description or other short text field
const MAX_TEXT_LENGTH: usize = 1000;
/// Longest accepted code preview; previews are real source excerpts and run
/// much longer than the other text fields
const MAX_PREVIEW_LENGTH: usize = 10_000;
/// Longest accepted language or category label
const MAX_LABEL_LENGTH: usize = 50;
const MAX_TAG_LENGTH: usize = 30;
const MAX_TAGS: usize = 10;

static SHARED_VALIDATOR: Lazy<InputValidator> =
    Lazy::new(|| InputValidator::new().expect("Failed to create InputValidator"));

/// Input validation for listing submissions and addresses
pub struct InputValidator {
    // Compiled regex patterns for performance
    address_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> MarketResult<Self> {
        let address_pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$")
            .map_err(|e| MarketError::ValidationError(format!("Invalid address regex: {}", e)))?;

        // Common malicious patterns to block; listing text is rendered to
        // other users
        let malicious_patterns = vec![
            Regex::new(r"<script").unwrap(),
            Regex::new(r"javascript:").unwrap(),
            Regex::new(r"data:text/html").unwrap(),
            Regex::new(r"vbscript:").unwrap(),
            Regex::new(r"onload=").unwrap(),
            Regex::new(r"onerror=").unwrap(),
        ];

        Ok(InputValidator {
            address_pattern,
            malicious_patterns,
        })
    }

    /// Process-wide validator instance; the compiled patterns are shared.
    pub fn shared() -> &'static InputValidator {
        &SHARED_VALIDATOR
    }

    /// Validate a wallet address
    pub fn validate_address(&self, address: &str) -> MarketResult<()> {
        if address.is_empty() {
            return Err(MarketError::ValidationError(
                "Address cannot be empty".to_string(),
            ));
        }

        if address.len() > 100 {
            return Err(MarketError::ValidationError("Address too long".to_string()));
        }

        if !self.address_pattern.is_match(address) {
            return Err(MarketError::InvalidAddress(
                "Address format is invalid".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a listing price
    pub fn validate_price(&self, price: f64) -> MarketResult<()> {
        if !price.is_finite() {
            return Err(MarketError::InvalidAmount(
                "Invalid number format".to_string(),
            ));
        }

        if price <= 0.0 {
            return Err(MarketError::InvalidAmount(
                "Price must be positive".to_string(),
            ));
        }

        if price > Amount::MAX_TOKENS as f64 {
            return Err(MarketError::InvalidAmount("Amount too large".to_string()));
        }

        Ok(())
    }

    /// Validate a complete listing submission
    pub fn validate_listing_draft(&self, draft: &ListingDraft) -> MarketResult<()> {
        self.validate_text_field("Listing title", &draft.title, MAX_TITLE_LENGTH)?;
        self.validate_text_field("Description", &draft.description, MAX_TEXT_LENGTH)?;
        self.validate_text_field("Language", &draft.language, MAX_LABEL_LENGTH)?;
        self.validate_text_field("Category", &draft.category, MAX_LABEL_LENGTH)?;
        self.validate_text_field("Code preview", &draft.preview_code, MAX_PREVIEW_LENGTH)?;

        if draft.tags.len() > MAX_TAGS {
            return Err(MarketError::ValidationError("Too many tags".to_string()));
        }
        for tag in &draft.tags {
            self.validate_text_field("Tag", tag, MAX_TAG_LENGTH)?;
        }

        if let Some(url) = &draft.image_url {
            self.screen_content(url)?;
            if url.len() > MAX_TEXT_LENGTH {
                return Err(MarketError::ValidationError(
                    "Image URL too long".to_string(),
                ));
            }
        }

        self.validate_price(draft.price)?;
        self.validate_address(&draft.seller_address)?;

        Ok(())
    }

    fn validate_text_field(&self, field: &str, value: &str, max_len: usize) -> MarketResult<()> {
        self.screen_content(value)?;

        if value.trim().is_empty() {
            return Err(MarketError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }

        if value.len() > max_len {
            return Err(MarketError::ValidationError(format!("{} too long", field)));
        }

        Ok(())
    }

    /// Check for malicious patterns in any input
    fn screen_content(&self, input: &str) -> MarketResult<()> {
        let lowered = input.to_lowercase();
        for pattern in &self.malicious_patterns {
            if pattern.is_match(&lowered) {
                return Err(MarketError::ValidationError(
                    "Input contains potentially malicious content".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new().expect("Failed to create InputValidator")
    }
}
