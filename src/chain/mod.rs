//! The EVM provider, nonce manager, and meta-transaction sender.
//!
//! This core only ever targets the `eip155` chain family, so a single
//! concrete provider type is enough — no multi-family dispatch. The filler
//! stack, round-robin multi-signer selection, and nonce-reset-on-failure
//! behavior live here.

pub mod pending_nonce_manager;

use alloy_network::{Ethereum as AlloyEthereum, EthereumWallet, NetworkWallet, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{Identity, PendingTransactionError, Provider, ProviderBuilder, RootProvider, WalletProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockId, TransactionReceipt, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::TransportError;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::ServiceBuilder;
use tracing::Instrument;

pub use pending_nonce_manager::PendingNonceManager;

/// Combined filler type for gas, blob gas, nonce, and chain ID.
pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// The fully composed EVM provider type used throughout this crate.
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// One configured RPC endpoint, with an optional per-endpoint rate limit.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub url: url::Url,
    pub rate_limit: Option<u32>,
}

/// Configuration needed to stand up an [`EvmProvider`] for one chain.
pub struct EvmProviderConfig {
    pub chain_id: u64,
    /// Raw signer keys (never the mnemonic itself) — callers re-derive these
    /// transiently from the HD wallet ledger (`wallet::signer_for_index`) or
    /// read them from `LiteralOrEnv` config.
    pub signer_keys: Vec<B256>,
    pub rpc: Vec<RpcEndpoint>,
    pub eip1559: bool,
    pub receipt_timeout_secs: u64,
}

/// Provider for interacting with one EVM chain: transaction signing with
/// multiple round-robin signers, nonce management with automatic reset on
/// failure, gas pricing, and timeout-bounded receipt fetching.
pub struct EvmProvider {
    chain_id: u64,
    eip1559: bool,
    receipt_timeout_secs: u64,
    inner: InnerProvider,
    signer_addresses: Arc<Vec<Address>>,
    signer_cursor: Arc<AtomicUsize>,
    nonce_manager: PendingNonceManager,
}

#[derive(Debug, thiserror::Error)]
pub enum EvmProviderError {
    #[error("at least one signer must be configured")]
    NoSigners,
    #[error("at least one RPC endpoint must be configured")]
    NoRpcEndpoints,
    #[error(transparent)]
    Signer(#[from] alloy_signer_local::LocalSignerError),
}

impl EvmProvider {
    #[tracing::instrument(skip_all, fields(chain_id = config.chain_id), err)]
    pub async fn connect(config: EvmProviderConfig) -> Result<Self, EvmProviderError> {
        if config.signer_keys.is_empty() {
            return Err(EvmProviderError::NoSigners);
        }
        if config.rpc.is_empty() {
            return Err(EvmProviderError::NoRpcEndpoints);
        }

        let signers = config
            .signer_keys
            .iter()
            .map(|b| PrivateKeySigner::from_bytes(b).map(|s| s.with_chain_id(Some(config.chain_id))))
            .collect::<Result<Vec<_>, _>>()?;

        let wallet = {
            let mut iter = signers.into_iter();
            let first = iter.next().expect("checked non-empty above");
            let mut wallet = EthereumWallet::from(first);
            for signer in iter {
                wallet.register_signer(signer);
            }
            wallet
        };
        let signer_addresses =
            Arc::new(NetworkWallet::<AlloyEthereum>::signer_addresses(&wallet).collect::<Vec<_>>());
        let signer_cursor = Arc::new(AtomicUsize::new(0));

        let transports: Vec<_> = config
            .rpc
            .iter()
            .map(|endpoint| {
                let rate_limit = endpoint.rate_limit.unwrap_or(u32::MAX);
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit))
                    .service(Http::new(endpoint.url.clone()))
            })
            .collect();
        let fallback = ServiceBuilder::new()
            .layer(
                FallbackLayer::default().with_active_transport_count(
                    NonZeroUsize::new(transports.len()).expect("checked non-empty above"),
                ),
            )
            .service(transports);
        let client = RpcClient::new(fallback, false);

        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(NonceFiller::new(nonce_manager.clone()), ChainIdFiller::default()),
            ),
        );
        let inner: InnerProvider = ProviderBuilder::default().filler(filler).wallet(wallet).connect_client(client);

        tracing::info!(chain_id = config.chain_id, signers = ?signer_addresses, "initialized EVM provider");

        Ok(Self {
            chain_id: config.chain_id,
            eip1559: config.eip1559,
            receipt_timeout_secs: config.receipt_timeout_secs,
            inner,
            signer_addresses,
            signer_cursor,
            nonce_manager,
        })
    }

    pub fn inner(&self) -> &InnerProvider {
        &self.inner
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn signer_addresses(&self) -> &[Address] {
        &self.signer_addresses
    }

    fn next_signer_address(&self) -> Address {
        debug_assert!(!self.signer_addresses.is_empty());
        if self.signer_addresses.len() == 1 {
            self.signer_addresses[0]
        } else {
            let next = self.signer_cursor.fetch_add(1, Ordering::Relaxed) % self.signer_addresses.len();
            self.signer_addresses[next]
        }
    }

    /// Sends a meta-transaction with an automatically selected round-robin
    /// signer; on any failure the nonce cache for that signer is reset so
    /// the next attempt re-queries the mempool state.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain_id, to = %tx.to), err)]
    pub async fn send_transaction(&self, tx: MetaTransaction) -> Result<TransactionReceipt, MetaTransactionSendError> {
        let from_address = self.next_signer_address();
        let mut txr = TransactionRequest::default()
            .with_to(tx.to)
            .with_from(from_address)
            .with_input(tx.calldata)
            .with_value(tx.value);

        if !self.eip1559 {
            let gas: u128 = self
                .inner
                .get_gas_price()
                .instrument(tracing::info_span!("get_gas_price"))
                .await?;
            txr.set_gas_price(gas);
        }

        if txr.gas.is_none() {
            let gas_limit = self.inner.estimate_gas(txr.clone()).block(BlockId::pending()).await?;
            txr.set_gas_limit(gas_limit);
        }

        let pending_tx = match self.inner.send_transaction(txr).await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonce_manager.reset_nonce(from_address).await;
                return Err(MetaTransactionSendError::Transport(e));
            }
        };

        let timeout = std::time::Duration::from_secs(self.receipt_timeout_secs);
        let watcher = pending_tx.with_required_confirmations(tx.confirmations).with_timeout(Some(timeout));

        match watcher.get_receipt().await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.nonce_manager.reset_nonce(from_address).await;
                Err(MetaTransactionSendError::PendingTransaction(e))
            }
        }
    }

    /// Nonce hygiene: when `pending > confirmed`, a mempool-dropped
    /// transaction is blocking all higher nonces. This overwrites every
    /// stuck nonce with a 0-value self-transfer at an aggressively higher
    /// priority fee before the caller's intended transaction proceeds.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain_id, %address), err)]
    pub async fn clear_stuck_nonces(&self, address: Address) -> Result<u64, MetaTransactionSendError> {
        let confirmed = self.inner.get_transaction_count(address).latest().await?;
        let pending = self.inner.get_transaction_count(address).pending().await?;

        if pending <= confirmed {
            return Ok(0);
        }

        let base_fee = self.inner.get_gas_price().await?;
        let overwrite_fee = base_fee.saturating_mul(10);
        let mut cleared = 0u64;

        for nonce in confirmed..pending {
            let txr = TransactionRequest::default()
                .with_to(address)
                .with_from(address)
                .with_value(U256::ZERO)
                .with_nonce(nonce)
                .with_gas_price(overwrite_fee);
            tracing::warn!(nonce, "overwriting stuck nonce with higher-fee self-transfer");
            let pending_tx = self.inner.send_transaction(txr).await?;
            pending_tx
                .with_timeout(Some(std::time::Duration::from_secs(self.receipt_timeout_secs)))
                .get_receipt()
                .await?;
            cleared += 1;
        }

        self.nonce_manager.reset_nonce(address).await;
        Ok(cleared)
    }

    /// Runs [`Self::clear_stuck_nonces`] for every configured signer. Callers
    /// invoke this once per chain connection before any send-heavy command
    /// (distribute/sweep/bridge) so a mempool-dropped transaction from a
    /// prior run never blocks this run's nonces.
    pub async fn clear_stuck_nonces_all_signers(&self) -> Result<u64, MetaTransactionSendError> {
        let mut total = 0u64;
        for address in self.signer_addresses.iter().copied() {
            total += self.clear_stuck_nonces(address).await?;
        }
        Ok(total)
    }
}

/// Meta-transaction parameters: target address, calldata, native value, and
/// required confirmations.
pub struct MetaTransaction {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub confirmations: u64,
}

impl MetaTransaction {
    pub fn call(to: Address, calldata: Bytes) -> Self {
        Self { to, calldata, value: U256::ZERO, confirmations: 1 }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetaTransactionSendError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    PendingTransaction(#[from] PendingTransactionError),
}
