//! The canonical, read-mostly catalog of chains and their deployed tokens,
//! native-gas metadata, and bridge capability flags.
//!
//! Built as a static table behind a `Lazy` lookup, keyed by short chain
//! name, and enriched with the bridge/disperse flags the router and
//! distributor need.

use alloy_primitives::Address;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// A token deployed on a given chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: &'static str,
    pub address: Address,
    pub decimals: u8,
    pub name: &'static str,
}

/// A chain entry in the registry, keyed by its short name (see [`ChainRegistry::get`]).
#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub name: &'static str,
    pub chain_id: u64,
    pub human_name: &'static str,
    rpc_url: String,
    pub native_symbol: &'static str,
    pub native_decimals: u8,
    pub tokens: Vec<TokenInfo>,
    pub disperse_available: bool,
    pub debridge_chain_id: Option<&'static str>,
    pub squid_supported: bool,
}

impl ChainInfo {
    /// RPC URL for this chain, resolved once at registry construction time.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn token(&self, symbol: &str) -> Option<&TokenInfo> {
        self.tokens.iter().find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn non_usdc_tokens(&self) -> impl Iterator<Item = &TokenInfo> {
        self.tokens.iter().filter(|t| t.symbol != "USDC")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown chain {0}")]
    UnknownChain(String),
    #[error("unknown token {1} on chain {0}")]
    UnknownToken(String, String),
}

fn addr(s: &str) -> Address {
    Address::from_str(s).expect("registry seed addresses are valid checksummed literals")
}

// Addresses below are the real, publicly known USDC/WETH deployments for
// each mainnet; Monad is a pre-mainnet testnet deployment and is illustrative.
static ETHEREUM_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo { symbol: "USDC", address: addr("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), decimals: 6, name: "USD Coin" },
        TokenInfo { symbol: "WETH", address: addr("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"), decimals: 18, name: "Wrapped Ether" },
    ]
});
static BASE_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo { symbol: "USDC", address: addr("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"), decimals: 6, name: "USD Coin" },
        TokenInfo { symbol: "WETH", address: addr("0x4200000000000000000000000000000000000006"), decimals: 18, name: "Wrapped Ether" },
    ]
});
static POLYGON_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo { symbol: "USDC", address: addr("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"), decimals: 6, name: "USD Coin" },
        TokenInfo { symbol: "WMATIC", address: addr("0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"), decimals: 18, name: "Wrapped Matic" },
    ]
});
static AVALANCHE_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo { symbol: "USDC", address: addr("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"), decimals: 6, name: "USD Coin" },
        TokenInfo { symbol: "WAVAX", address: addr("0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7"), decimals: 18, name: "Wrapped AVAX" },
    ]
});
static CELO_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo { symbol: "USDC", address: addr("0xcebA9300f2b948710d2653dD7B07f33A8B32118C"), decimals: 6, name: "USD Coin" },
    ]
});
static MONAD_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo { symbol: "USDC", address: addr("0xf817257fed379853cDe0fa4F97AB987181B1E5Ea"), decimals: 6, name: "USD Coin" },
    ]
});
static BSC_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo { symbol: "USDC", address: addr("0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d"), decimals: 18, name: "USD Coin" },
        TokenInfo { symbol: "WBNB", address: addr("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"), decimals: 18, name: "Wrapped BNB" },
    ]
});
static ARBITRUM_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo { symbol: "USDC", address: addr("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"), decimals: 6, name: "USD Coin" },
        TokenInfo { symbol: "WETH", address: addr("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1"), decimals: 18, name: "Wrapped Ether" },
    ]
});

/// Read-mostly lookup surface over the registered chains.
///
/// Constructed explicitly from an already-loaded environment, never at
/// module-load time: `ChainRegistry::new` resolves every `<CHAIN>_RPC_URL`
/// override right here, once.
pub struct ChainRegistry {
    by_name: HashMap<&'static str, ChainInfo>,
    order: Vec<&'static str>,
}

fn env_rpc_override(name: &str) -> Option<String> {
    let var = format!("{}_RPC_URL", name.to_uppercase().replace('-', "_"));
    env::var(var).ok()
}

impl ChainRegistry {
    /// Builds the registry, resolving RPC URL overrides from the environment.
    ///
    /// Environment must already be loaded (dotenv, secret store, etc.) before
    /// this is called; the registry never reads `env` again after construction.
    pub fn new() -> Self {
        let seeds: Vec<(&'static str, u64, &'static str, &'static str, &'static Vec<TokenInfo>, bool, Option<&'static str>, bool)> = vec![
            ("ethereum", 1, "Ethereum", "https://eth.llamarpc.com", &ETHEREUM_TOKENS, true, Some("1"), true),
            ("base", 8453, "Base", "https://mainnet.base.org", &BASE_TOKENS, true, Some("8453"), true),
            ("polygon", 137, "Polygon", "https://polygon-rpc.com", &POLYGON_TOKENS, true, Some("137"), true),
            ("avalanche", 43114, "Avalanche C-Chain", "https://api.avax.network/ext/bc/C/rpc", &AVALANCHE_TOKENS, true, Some("43114"), true),
            ("celo", 42220, "Celo", "https://forno.celo.org", &CELO_TOKENS, false, None, true),
            ("monad", 143, "Monad", "https://rpc.monad.xyz", &MONAD_TOKENS, false, Some("100000030"), false),
            ("bsc", 56, "BNB Smart Chain", "https://bsc-dataseed.binance.org", &BSC_TOKENS, true, Some("56"), true),
            ("arbitrum", 42161, "Arbitrum One", "https://arb1.arbitrum.io/rpc", &ARBITRUM_TOKENS, true, Some("42161"), true),
        ];

        let mut by_name = HashMap::with_capacity(seeds.len());
        let mut order = Vec::with_capacity(seeds.len());
        for (name, chain_id, human_name, default_rpc, tokens, disperse_available, debridge_chain_id, squid_supported) in seeds {
            debug_assert!(
                tokens.iter().any(|t| t.symbol == "USDC"),
                "registry invariant: tokens[\"USDC\"] must exist for all chains"
            );
            let rpc_url = env_rpc_override(name).unwrap_or_else(|| default_rpc.to_string());
            by_name.insert(
                name,
                ChainInfo {
                    name,
                    chain_id,
                    human_name,
                    rpc_url,
                    native_symbol: native_symbol_for(name),
                    native_decimals: 18,
                    tokens: tokens.clone(),
                    disperse_available,
                    debridge_chain_id,
                    squid_supported,
                },
            );
            order.push(name);
        }
        Self { by_name, order }
    }

    pub fn get(&self, name: &str) -> Result<&ChainInfo, RegistryError> {
        self.by_name
            .get(name)
            .ok_or_else(|| RegistryError::UnknownChain(name.to_string()))
    }

    /// Stable iteration order over all registered chain names.
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    pub fn tokens(&self, name: &str) -> Result<&[TokenInfo], RegistryError> {
        self.get(name).map(|c| c.tokens.as_slice())
    }

    pub fn token(&self, name: &str, symbol: &str) -> Result<&TokenInfo, RegistryError> {
        let chain = self.get(name)?;
        chain
            .token(symbol)
            .ok_or_else(|| RegistryError::UnknownToken(name.to_string(), symbol.to_string()))
    }

    pub fn all_token_symbols(&self) -> Vec<&'static str> {
        let mut symbols: Vec<&'static str> = self
            .by_name
            .values()
            .flat_map(|c| c.tokens.iter().map(|t| t.symbol))
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn native_symbol_for(name: &str) -> &'static str {
    match name {
        "polygon" => "MATIC",
        "avalanche" => "AVAX",
        "bsc" => "BNB",
        "celo" => "CELO",
        "monad" => "MON",
        _ => "ETH",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_eight_chains() {
        let registry = ChainRegistry::new();
        assert_eq!(registry.names().len(), 8);
    }

    #[test]
    fn every_chain_has_usdc() {
        let registry = ChainRegistry::new();
        for name in registry.names() {
            let chain = registry.get(name).unwrap();
            assert!(chain.token("USDC").is_some(), "{name} missing USDC");
        }
    }

    #[test]
    fn unknown_chain_errors() {
        let registry = ChainRegistry::new();
        assert!(matches!(registry.get("nope"), Err(RegistryError::UnknownChain(_))));
    }

    #[test]
    fn monad_uses_synthetic_debridge_id() {
        let registry = ChainRegistry::new();
        let monad = registry.get("monad").unwrap();
        assert_eq!(monad.debridge_chain_id, Some("100000030"));
        assert!(!monad.squid_supported);
    }

    #[test]
    fn celo_has_no_debridge_id() {
        let registry = ChainRegistry::new();
        let celo = registry.get("celo").unwrap();
        assert_eq!(celo.debridge_chain_id, None);
        assert!(celo.squid_supported);
    }

    #[test]
    fn rpc_url_env_override_wins() {
        // SAFETY: test-local mutation of a process env var to validate the
        // override lookup, no concurrent access from other tests to this var.
        unsafe { env::set_var("BASE_RPC_URL", "http://localhost:9545") };
        let registry = ChainRegistry::new();
        assert_eq!(registry.get("base").unwrap().rpc_url(), "http://localhost:9545");
        unsafe { env::remove_var("BASE_RPC_URL") };
    }
}
