//! Configuration management for the Fusion resolver
//!
//! Loads configuration from TOML files with environment variable substitution.
//! `Settings` is also the registry the coordinator asks for chain descriptors,
//! factories and tokens; a missing entry is a configuration error raised before
//! any chain is touched.

use crate::chain::Role;
use crate::error::{ResolverError, ResolverResult};
use crate::swap::{
    AddressFormat, ChainAddress, ChainCapabilities, ChainDescriptor, ChainKind, Durations,
    SwapRoute, TezosAddress, TokenRef,
};

use alloy_primitives::B256;
use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub swaps: Vec<SwapRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    pub instance_id: String,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub event_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_send_timeout() -> u64 {
    30
}

impl ResolverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub kind: ChainKind,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    /// TzKT base URL (Tezos)
    #[serde(default)]
    pub indexer_url: Option<String>,
    /// Signing and injection endpoint (Tezos)
    #[serde(default)]
    pub injector_url: Option<String>,
    /// Single factory deploying both escrow kinds (EVM)
    #[serde(default)]
    pub escrow_factory: Option<String>,
    #[serde(default)]
    pub src_escrow_factory: Option<String>,
    #[serde(default)]
    pub dst_escrow_factory: Option<String>,
    pub resolver: String,
    #[serde(default)]
    pub limit_order_protocol: Option<String>,
    #[serde(default)]
    pub src_proxy_bytecode_hash: Option<String>,
    #[serde(default = "default_confirmations")]
    pub confirmation_blocks: u64,
    #[serde(default)]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: u64,
    #[serde(default)]
    pub tokens: HashMap<String, TokenConfig>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_confirmations() -> u64 {
    1
}

fn default_max_gas_price() -> u64 {
    200
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    #[default]
    Eip1559,
    Arbitrum,
    Optimism,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    Native,
    Erc20,
    Fa12,
    Fa2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub standard: TokenStandard,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub token_id: Option<u64>,
}

impl ChainConfig {
    fn missing(&self, what: &str) -> ResolverError {
        ResolverError::Configuration(format!("chain {} has no {} configured", self.name, what))
    }

    fn address_format(&self) -> AddressFormat {
        match self.kind {
            ChainKind::Evm => AddressFormat::Evm,
            ChainKind::Tezos => AddressFormat::Tezos,
        }
    }

    fn parse_address(&self, what: &str, raw: &str) -> ResolverResult<ChainAddress> {
        self.address_format().parse(raw).map_err(|e| {
            ResolverError::Configuration(format!("chain {}: invalid {}: {}", self.name, what, e))
        })
    }

    /// Resolve addresses and capabilities into the descriptor the swap domain uses
    pub fn descriptor(&self) -> ResolverResult<ChainDescriptor> {
        let shared = self.escrow_factory.as_deref();
        let src_factory = self
            .src_escrow_factory
            .as_deref()
            .or(shared)
            .ok_or_else(|| self.missing("source escrow factory"))?;
        let dst_factory = self
            .dst_escrow_factory
            .as_deref()
            .or(shared)
            .ok_or_else(|| self.missing("destination escrow factory"))?;

        let src_factory = self.parse_address("source escrow factory", src_factory)?;
        let dst_factory = self.parse_address("destination escrow factory", dst_factory)?;
        let resolver = self.parse_address("resolver", &self.resolver)?;
        let limit_order_protocol = self
            .limit_order_protocol
            .as_deref()
            .map(|raw| self.parse_address("limit order protocol", raw))
            .transpose()?;

        // The limit order protocol pulls maker funds on EVM; Tezos factories pull them directly
        let src_spender = match self.kind {
            ChainKind::Evm => limit_order_protocol
                .clone()
                .ok_or_else(|| self.missing("limit order protocol"))?,
            ChainKind::Tezos => src_factory.clone(),
        };

        Ok(ChainDescriptor {
            chain_id: self.chain_id,
            name: self.name.clone(),
            kind: self.kind,
            capabilities: ChainCapabilities::for_kind(self.kind),
            resolver,
            src_factory,
            dst_factory,
            src_spender,
            limit_order_protocol,
            confirmation_blocks: self.confirmation_blocks,
        })
    }

    /// Token registered under `symbol` on this chain
    pub fn token(&self, symbol: &str) -> ResolverResult<TokenRef> {
        let config = self
            .tokens
            .get(symbol)
            .ok_or_else(|| self.missing(&format!("token {}", symbol)))?;
        let address = || {
            config
                .address
                .as_deref()
                .ok_or_else(|| self.missing(&format!("address for token {}", symbol)))
        };

        let token = match (config.standard, self.kind) {
            (TokenStandard::Native, _) => TokenRef::Native,
            (TokenStandard::Erc20, ChainKind::Evm) => TokenRef::Erc20 {
                address: self.parse_address(symbol, address()?)?.as_evm()?,
            },
            (TokenStandard::Fa12, ChainKind::Tezos) => TokenRef::Fa12 {
                address: address()?.parse()?,
            },
            (TokenStandard::Fa2, ChainKind::Tezos) => TokenRef::Fa2 {
                address: address()?.parse()?,
                token_id: config.token_id.unwrap_or_default(),
            },
            (standard, kind) => {
                return Err(ResolverError::Configuration(format!(
                    "token {} uses {:?}, which {} chain {} cannot hold",
                    symbol, standard, kind, self.name
                )))
            }
        };
        Ok(token)
    }

    /// Proxy init-code hash used to derive source escrow addresses (EVM)
    pub fn src_proxy_bytecode_hash(&self) -> ResolverResult<Option<B256>> {
        self.src_proxy_bytecode_hash
            .as_deref()
            .map(|raw| {
                raw.parse::<B256>().map_err(|e| {
                    ResolverError::Configuration(format!(
                        "chain {}: invalid src_proxy_bytecode_hash: {}",
                        self.name, e
                    ))
                })
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_maker_key_env")]
    pub maker_key_env: String,
    #[serde(default = "default_resolver_key_env")]
    pub resolver_key_env: String,
    /// Maker's implicit account on Tezos chains
    #[serde(default)]
    pub maker_tezos_address: Option<String>,
}

fn default_maker_key_env() -> String {
    "MAKER_PRIVATE_KEY".to_string()
}

fn default_resolver_key_env() -> String {
    "RESOLVER_PRIVATE_KEY".to_string()
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            maker_key_env: default_maker_key_env(),
            resolver_key_env: default_resolver_key_env(),
            maker_tezos_address: None,
        }
    }
}

impl WalletConfig {
    fn key_env(&self, role: Role) -> &str {
        match role {
            Role::Maker => &self.maker_key_env,
            Role::Resolver => &self.resolver_key_env,
        }
    }

    /// EVM signing key for `role`, read from the configured environment variable
    pub fn evm_wallet(&self, role: Role) -> ResolverResult<LocalWallet> {
        let var = self.key_env(role);
        let key = env::var(var).map_err(|_| {
            ResolverError::Wallet(format!("No {} key configured. Set {}", role, var))
        })?;
        key.parse::<LocalWallet>()
            .map_err(|e| ResolverError::Wallet(format!("Invalid private key in {}: {}", var, e)))
    }

    /// Tezos account `role` submits from on `chain`
    pub fn tezos_source(&self, role: Role, chain: &ChainConfig) -> ResolverResult<TezosAddress> {
        let raw = match role {
            Role::Maker => self.maker_tezos_address.as_deref().ok_or_else(|| {
                ResolverError::Wallet("maker_tezos_address is not configured".to_string())
            })?,
            Role::Resolver => chain.resolver.as_str(),
        };
        raw.parse()
    }
}

/// One swap the binary drives at start-up
#[derive(Debug, Clone, Deserialize)]
pub struct SwapRequest {
    pub src_chain: String,
    pub dst_chain: String,
    /// Token symbol on the source chain
    pub maker_asset: String,
    /// Token symbol on the destination chain
    pub taker_asset: String,
    pub making_amount: String,
    pub taking_amount: String,
    /// Source-chain maker address; defaults to the maker wallet
    #[serde(default)]
    pub maker: Option<String>,
    /// Destination-chain receiver; defaults to the maker wallet
    #[serde(default)]
    pub receiver: Option<String>,
    pub src_safety_deposit: String,
    pub dst_safety_deposit: String,
    pub src_timelocks: Durations,
    pub dst_timelocks: Durations,
    #[serde(default = "default_auction_duration")]
    pub auction_duration: u32,
    #[serde(default)]
    pub initial_rate_bump: u32,
}

fn default_auction_duration() -> u32 {
    120
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("RESOLVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        Self::from_toml_str(&config_str)
    }

    /// Parse and validate a TOML document, substituting `${VAR}` placeholders first
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // At least one chain must be enabled
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in self.enabled_chains() {
            match chain.kind {
                ChainKind::Evm if chain.rpc_urls.is_empty() => {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name)
                }
                ChainKind::Tezos if chain.indexer_url.is_none() => {
                    anyhow::bail!("Chain {} has no indexer URL configured", name)
                }
                ChainKind::Tezos if chain.injector_url.is_none() => {
                    tracing::warn!("Chain {} has no injector URL - submissions will fail", name);
                }
                _ => {}
            }
            chain
                .descriptor()
                .with_context(|| format!("Invalid configuration for chain {}", name))?;
        }

        for (i, swap) in self.swaps.iter().enumerate() {
            self.route(&swap.src_chain, &swap.dst_chain)
                .with_context(|| format!("Invalid route for swap #{}", i))?;
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        let mut chains: Vec<_> = self.chains.iter().filter(|(_, c)| c.enabled).collect();
        chains.sort_by(|a, b| a.0.cmp(b.0));
        chains
    }

    /// Enabled chain by configuration key
    pub fn chain(&self, name: &str) -> ResolverResult<&ChainConfig> {
        self.chains
            .get(name)
            .filter(|c| c.enabled)
            .ok_or_else(|| ResolverError::Configuration(format!("chain {} is not configured", name)))
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }

    pub fn route(&self, src: &str, dst: &str) -> ResolverResult<SwapRoute> {
        SwapRoute::new(self.chain(src)?.descriptor()?, self.chain(dst)?.descriptor()?)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid placeholder pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[resolver]
instance_id = "resolver-test"
poll_interval_ms = 10
max_retries = 3
retry_delay_ms = 0
confirmation_timeout_secs = 5
event_timeout_secs = 5
health_check_interval_secs = 30

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[chains.sepolia]
chain_id = 11155111
name = "sepolia"
kind = "evm"
rpc_urls = ["${FR_TEST_RPC}"]
escrow_factory = "0xfafafafafafafafafafafafafafafafafafafafa"
resolver = "0x3333333333333333333333333333333333333333"
limit_order_protocol = "0x1111111111111111111111111111111111111111"
src_proxy_bytecode_hash = "0x0101010101010101010101010101010101010101010101010101010101010101"

[chains.sepolia.tokens.USDC]
standard = "erc20"
address = "0x2222222222222222222222222222222222222222"

[chains.sepolia.tokens.ETH]
standard = "native"

[chains.ghostnet]
chain_id = 1729
name = "ghostnet"
kind = "tezos"
indexer_url = "https://api.ghostnet.tzkt.io"
injector_url = "http://localhost:8732"
src_escrow_factory = "KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz"
dst_escrow_factory = "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn"
resolver = "tz1aSkwEot3L2kmUvcoxzjMomb9mvBNuzFK6"

[chains.ghostnet.tokens.TZBTC]
standard = "fa12"
address = "KT1HmyazXfKDbo8XjwtWPXcoyHcmNPDCvZyb"

[[swaps]]
src_chain = "sepolia"
dst_chain = "ghostnet"
maker_asset = "USDC"
taker_asset = "TZBTC"
making_amount = "100"
taking_amount = "99"
src_safety_deposit = "1000000000000000"
dst_safety_deposit = "2000000"
src_timelocks = { withdrawal = 10, public_withdrawal = 480, cancellation = 600, public_cancellation = 1200 }
dst_timelocks = { withdrawal = 5, public_withdrawal = 100, cancellation = 500 }
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("FR_TEST_RPC", "http://localhost:8545");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.enabled_chains().len(), 2);
        assert_eq!(settings.chains["sepolia"].rpc_urls, vec!["http://localhost:8545"]);
        assert_eq!(settings.swaps.len(), 1);
        assert_eq!(settings.resolver.poll_interval(), Duration::from_millis(10));
        assert!(!settings.database.enabled);
        assert_eq!(settings.wallet.maker_key_env, "MAKER_PRIVATE_KEY");
    }

    #[test]
    fn test_descriptors_resolve() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let route = settings.route("sepolia", "ghostnet").unwrap();

        assert_eq!(route.src.src_factory, route.src.dst_factory);
        assert_eq!(
            route.src.src_spender,
            route.src.limit_order_protocol.clone().unwrap()
        );
        assert_eq!(route.dst.src_spender, route.dst.src_factory);
        assert!(!route.supports_partial_fill());

        let sepolia = settings.chain("sepolia").unwrap();
        assert!(matches!(sepolia.token("USDC").unwrap(), TokenRef::Erc20 { .. }));
        assert_eq!(sepolia.token("ETH").unwrap(), TokenRef::Native);
        assert!(sepolia.src_proxy_bytecode_hash().unwrap().is_some());

        let ghostnet = settings.chain("ghostnet").unwrap();
        assert!(matches!(ghostnet.token("TZBTC").unwrap(), TokenRef::Fa12 { .. }));
    }

    #[test]
    fn test_missing_token_is_configuration_error() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let err = settings.chain("ghostnet").unwrap().token("USDT").unwrap_err();
        assert!(matches!(err, ResolverError::Configuration(_)));
        assert!(settings.chain("mainnet").is_err());
    }

    #[test]
    fn test_evm_chain_requires_limit_order_protocol() {
        let raw = SAMPLE.replace(
            "limit_order_protocol = \"0x1111111111111111111111111111111111111111\"\n",
            "",
        );
        assert!(Settings::from_toml_str(&raw).is_err());
    }

    #[test]
    fn test_unknown_swap_chain_rejected() {
        let raw = SAMPLE.replace("dst_chain = \"ghostnet\"", "dst_chain = \"mainnet\"");
        assert!(Settings::from_toml_str(&raw).is_err());
    }
}
