use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{MarketError, MarketResult};

const CONFIG_VERSION: u16 = 1;
const CONFIG_FILENAME: &str = "market.config";

/// Native currency descriptor of a settlement network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Settlement network identity and registration payload.
///
/// Serializes camelCase because this exact shape is handed to the provider
/// when registering the chain (`wallet_addEthereumChain`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    /// Hex chain id, e.g. `0xaa36a7`
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl NetworkProfile {
    /// The Sepolia test network, the marketplace's settlement network.
    pub fn sepolia() -> Self {
        Self {
            chain_id: "0xaa36a7".to_string(),
            chain_name: "Sepolia".to_string(),
            native_currency: NativeCurrency {
                name: "Sepolia Ether".to_string(),
                symbol: "SEP".to_string(),
                decimals: 18,
            },
            rpc_urls: vec!["https://sepolia.infura.io/v3/".to_string()],
            block_explorer_urls: vec!["https://sepolia.etherscan.io/".to_string()],
        }
    }

    /// Chain id comparison; providers report ids in varying hex case.
    pub fn matches_chain(&self, chain_id: &str) -> bool {
        self.chain_id.eq_ignore_ascii_case(chain_id)
    }
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self::sepolia()
    }
}

/// Remote listing store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Store base URL; collection paths are appended under `/rest/v1`
    pub endpoint: String,
    /// Publishable API key, sent as both `apikey` and bearer token
    pub api_key: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:54321".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketConfig {
    pub repository: RepositoryConfig,
    pub network: NetworkProfile,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl MarketConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            repository: RepositoryConfig::default(),
            network: NetworkProfile::default(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: MarketConfig,
    modified_at_unix: i64,
}

/// Handles persistence of marketplace configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Store rooted in an application data directory, using the standard
    /// config file name.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CONFIG_FILENAME),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> MarketResult<MarketConfig> {
        if !self.path.exists() {
            let config = MarketConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(MarketError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        let checksum = checksum(&envelope.payload);
        if checksum != envelope.checksum {
            return Err(MarketError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &MarketConfig) -> MarketResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload),
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| MarketError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(&self, environment: impl Into<String>, updater: F) -> MarketResult<MarketConfig>
    where
        F: FnOnce(&mut MarketConfig) -> MarketResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &MarketConfig) -> [u8; 32] {
    let mut hasher = Blake3::new();
    let encoded = serde_json::to_vec(config).expect("config serialization must succeed");
    hasher.update(&encoded);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    output
}
