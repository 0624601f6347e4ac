//! Treasury engine: inventory, allocation planner, distribution,
//! sweep/recovery, and nonce hygiene.
//!
//! The planner runs a seeded PRNG draw through a clamp/normalize/round/
//! fix-residual pipeline to land every agent's allocation on an exact
//! budget total to the cent. Balance reads and transaction sending go
//! through [`crate::chain::EvmProvider`].

pub mod mulberry32;

use crate::chain::{EvmProvider, MetaTransaction, MetaTransactionSendError};
use crate::contracts::{IDisperse, IERC20};
use crate::registry::{ChainRegistry, RegistryError};
use crate::util::money_amount::MoneyAmount;
use crate::wallet::WalletManifest;
use alloy_primitives::{Address, U256};
use mulberry32::Mulberry32;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum TreasuryError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Transaction(#[from] MetaTransactionSendError),
    #[error(transparent)]
    Contract(#[from] alloy_contract::Error),
    #[error("batch-disperse contract has no bytecode on chain {0}; falling back to sequential transfers")]
    BytecodeMissing(String),
    #[error("empty wallet manifest")]
    EmptyManifest,
}

// ---------------------------------------------------------------------
// 4.4.1 Inventory
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct BalanceRow {
    pub name: String,
    pub address: Address,
    pub chain: String,
    pub tokens: BTreeMap<String, U256>,
    pub native: U256,
    pub funded: bool,
}

/// Reads one wallet's balances on one chain: native balance plus every
/// registered token's `balanceOf`. The registry's multicall facility is not
/// modeled here (no multicall contract is part of this pack's grounding
/// material); each call is issued independently over the already
/// rate-limited/fallback-wrapped transport.
pub async fn read_balance_row(
    provider: &EvmProvider,
    registry: &ChainRegistry,
    chain: &str,
    name: &str,
    address: Address,
) -> Result<BalanceRow, TreasuryError> {
    use alloy_provider::Provider;

    let chain_info = registry.get(chain)?;
    let native = provider.inner().get_balance(address).await.map_err(|e| {
        TreasuryError::Transaction(MetaTransactionSendError::Transport(e))
    })?;

    let mut tokens = BTreeMap::new();
    for token in &chain_info.tokens {
        let erc20 = IERC20::new(token.address, provider.inner());
        let balance = erc20.balanceOf(address).call().await?;
        tokens.insert(token.symbol.to_string(), balance);
    }

    let funded = native > U256::ZERO || tokens.values().any(|v| *v > U256::ZERO);
    Ok(BalanceRow { name: name.to_string(), address, chain: chain.to_string(), tokens, native, funded })
}

// ---------------------------------------------------------------------
// 4.4.2 Allocation planner
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerAgentAllocation {
    pub amount: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainAllocation {
    pub total_usd: String,
    pub per_agent: BTreeMap<Address, PerAgentAllocation>,
    pub gas: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgePlan {
    pub source: String,
    pub targets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub budget_usd: String,
    pub source_chain: String,
    pub chains: BTreeMap<String, ChainAllocation>,
    pub bridge_plan: BridgePlan,
}

pub struct PlannerInput<'a> {
    pub manifest: &'a WalletManifest,
    pub source_chain: String,
    /// Target chain → budget in USD for that chain.
    pub chain_budgets: BTreeMap<String, Decimal>,
    pub multiplier_range: (f64, f64),
    pub min_per_agent: Decimal,
    pub seed: u32,
    /// Native gas to seed into each target chain, per agent, expressed
    /// as the chain's native token amount in full-precision decimal.
    pub gas_per_agent: Decimal,
}

/// Deterministic per-chain allocation.
///
/// Given the same inputs — including `seed` — the output is bit-identical
/// across runs, and every agent's share always sums exactly to the chain
/// budget to the cent.
pub fn plan_allocation(input: &PlannerInput, registry: &ChainRegistry) -> Result<AllocationPlan, TreasuryError> {
    if input.manifest.wallets.is_empty() {
        return Err(TreasuryError::EmptyManifest);
    }
    let n = input.manifest.wallets.len();
    let mut rng = Mulberry32::new(input.seed);
    let mut chains = BTreeMap::new();

    for (chain_name, budget) in &input.chain_budgets {
        let chain_info = registry.get(chain_name)?;
        let mu = budget / Decimal::from(n);
        let (lo, hi) = input.multiplier_range;

        let mut raw: Vec<Decimal> = Vec::with_capacity(n);
        for _ in 0..n {
            let multiplier = lo + rng.next_f64() * (hi - lo);
            let multiplier = Decimal::from_f64_retain(multiplier).unwrap_or(Decimal::ONE);
            let x = (mu * multiplier).max(input.min_per_agent);
            raw.push(x);
        }

        let sum: Decimal = raw.iter().sum();
        let normalized: Vec<Decimal> = if sum.is_zero() {
            raw
        } else {
            raw.iter().map(|x| (x * budget / sum).max(input.min_per_agent)).collect()
        };

        let mut rounded: Vec<Decimal> = normalized.iter().map(|x| x.round_dp(2)).collect();
        let rounded_sum: Decimal = rounded.iter().sum();
        let residual = *budget - rounded_sum;
        if residual != Decimal::ZERO {
            if let Some((max_idx, _)) = rounded
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            {
                rounded[max_idx] += residual;
            }
        }

        let mut per_agent = BTreeMap::new();
        for (i, wallet) in input.manifest.wallets.iter().enumerate() {
            let token = pick_token(&mut rng, chain_info);
            per_agent.insert(
                wallet.address,
                PerAgentAllocation { amount: format!("{:.2}", rounded[i]), token },
            );
        }

        let total: Decimal = rounded.iter().sum();
        let gas_total = input.gas_per_agent * Decimal::from(n);
        chains.insert(
            chain_name.clone(),
            ChainAllocation {
                total_usd: format!("{:.2}", total),
                per_agent,
                gas: format!("{:.6}", gas_total),
            },
        );
    }

    let bridge_plan = BridgePlan {
        source: input.source_chain.clone(),
        targets: input
            .chain_budgets
            .iter()
            .filter(|(chain, _)| **chain != input.source_chain)
            .map(|(chain, budget)| (chain.clone(), format!("{:.2}", budget)))
            .collect(),
    };

    Ok(AllocationPlan {
        budget_usd: format!("{:.2}", input.chain_budgets.values().sum::<Decimal>()),
        source_chain: input.source_chain.clone(),
        chains,
        bridge_plan,
    })
}

/// Picks a token for one allocation entry: 40% chance of a non-USDC token
/// (if the chain has any), USDC otherwise.
fn pick_token(rng: &mut Mulberry32, chain_info: &crate::registry::ChainInfo) -> String {
    let non_usdc: Vec<&str> = chain_info.non_usdc_tokens().map(|t| t.symbol).collect();
    if non_usdc.is_empty() {
        return "USDC".to_string();
    }
    if rng.next_f64() < 0.4 {
        let idx = (rng.next_f64() * non_usdc.len() as f64) as usize;
        non_usdc[idx.min(non_usdc.len() - 1)].to_string()
    } else {
        "USDC".to_string()
    }
}

fn money_to_u256(amount: &MoneyAmount, decimals: u8) -> U256 {
    let scaled = amount.0 * Decimal::from(10u64.pow(decimals as u32));
    let as_u128 = scaled.round().to_u128().unwrap_or(0);
    U256::from(as_u128)
}

// ---------------------------------------------------------------------
// 4.4.3 Distribution
// ---------------------------------------------------------------------

pub struct DistributionTarget {
    pub address: Address,
    pub amount: MoneyAmount,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionFailure {
    pub address: Address,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionReport {
    pub chain: String,
    pub token: String,
    pub mode: &'static str,
    pub succeeded: Vec<Address>,
    pub failed: Vec<DistributionFailure>,
}

/// Checks whether an address has non-empty bytecode. A successful receipt
/// alone never proves a batch call actually moved funds, so the engine
/// verifies the disperse contract's bytecode before ever trusting its
/// batch path.
pub async fn has_bytecode(provider: &EvmProvider, address: Address) -> Result<bool, TreasuryError> {
    use alloy_provider::Provider;
    let code = provider
        .inner()
        .get_code_at(address)
        .await
        .map_err(|e| TreasuryError::Transaction(MetaTransactionSendError::Transport(e)))?;
    Ok(!code.is_empty())
}

/// Distributes `token` to every target on `chain`, preferring the
/// batch-disperse contract when available and bytecode-verified, falling
/// back to sequential transfers otherwise.
#[tracing::instrument(skip(provider, targets), fields(chain, token_symbol = %token_symbol))]
pub async fn distribute(
    provider: &EvmProvider,
    registry: &ChainRegistry,
    chain: &str,
    token_symbol: &str,
    disperse_address: Option<Address>,
    targets: &[DistributionTarget],
) -> Result<DistributionReport, TreasuryError> {
    let chain_info = registry.get(chain)?;
    let token = chain_info
        .token(token_symbol)
        .ok_or_else(|| TreasuryError::Registry(RegistryError::UnknownToken(chain.to_string(), token_symbol.to_string())))?;

    let batch_eligible = match disperse_address {
        Some(addr) if chain_info.disperse_available => has_bytecode(provider, addr).await?,
        _ => false,
    };

    if batch_eligible {
        let disperse_address = disperse_address.expect("checked Some above");
        distribute_batch(provider, disperse_address, token.address, token.decimals, chain, token_symbol, targets).await
    } else {
        distribute_sequential(provider, token.address, token.decimals, chain, token_symbol, targets).await
    }
}

async fn distribute_batch(
    provider: &EvmProvider,
    disperse_address: Address,
    token_address: Address,
    decimals: u8,
    chain: &str,
    token_symbol: &str,
    targets: &[DistributionTarget],
) -> Result<DistributionReport, TreasuryError> {
    let total: U256 = targets
        .iter()
        .fold(U256::ZERO, |acc, t| acc + money_to_u256(&t.amount, decimals));
    let buffered_total = total.saturating_mul(U256::from(110)) / U256::from(100);

    let erc20 = IERC20::new(token_address, provider.inner());
    let approve_call = erc20.approve(disperse_address, buffered_total);
    let approve_receipt = provider
        .send_transaction(MetaTransaction::call(token_address, approve_call.calldata().clone()))
        .await?;
    tracing::info!(tx = %approve_receipt.transaction_hash, "disperse approve confirmed");

    let recipients: Vec<Address> = targets.iter().map(|t| t.address).collect();
    let amounts: Vec<U256> = targets.iter().map(|t| money_to_u256(&t.amount, decimals)).collect();

    let disperse = IDisperse::new(disperse_address, provider.inner());
    let call = disperse.disperseToken(token_address, recipients.clone(), amounts);
    let receipt = provider
        .send_transaction(MetaTransaction::call(disperse_address, call.calldata().clone()))
        .await?;

    let succeeded = if receipt.status() { recipients } else { Vec::new() };
    let failed = if receipt.status() {
        Vec::new()
    } else {
        targets
            .iter()
            .map(|t| DistributionFailure { address: t.address, reason: "disperse receipt status=failed".to_string() })
            .collect()
    };

    Ok(DistributionReport {
        chain: chain.to_string(),
        token: token_symbol.to_string(),
        mode: "batch",
        succeeded,
        failed,
    })
}

async fn distribute_sequential(
    provider: &EvmProvider,
    token_address: Address,
    decimals: u8,
    chain: &str,
    token_symbol: &str,
    targets: &[DistributionTarget],
) -> Result<DistributionReport, TreasuryError> {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    for target in targets {
        let erc20 = IERC20::new(token_address, provider.inner());
        let amount = money_to_u256(&target.amount, decimals);
        let call = erc20.transfer(target.address, amount);
        match provider
            .send_transaction(MetaTransaction::call(token_address, call.calldata().clone()))
            .await
        {
            Ok(receipt) if receipt.status() => succeeded.push(target.address),
            Ok(_) => failed.push(DistributionFailure {
                address: target.address,
                reason: "transfer receipt status=failed".to_string(),
            }),
            Err(e) => failed.push(DistributionFailure { address: target.address, reason: e.to_string() }),
        }
    }

    Ok(DistributionReport {
        chain: chain.to_string(),
        token: token_symbol.to_string(),
        mode: "sequential",
        succeeded,
        failed,
    })
}

/// Distributes native gas to every target on `chain`, preferring
/// `IDisperse::disperseEther` when available and bytecode-verified, falling
/// back to sequential value transfers otherwise. Mirrors [`distribute`]'s
/// batch/sequential split but carries value on the call itself rather than
/// moving an ERC-20 balance.
#[tracing::instrument(skip(provider, targets), fields(chain))]
pub async fn distribute_native(
    provider: &EvmProvider,
    registry: &ChainRegistry,
    chain: &str,
    disperse_address: Option<Address>,
    targets: &[DistributionTarget],
) -> Result<DistributionReport, TreasuryError> {
    let chain_info = registry.get(chain)?;

    let batch_eligible = match disperse_address {
        Some(addr) if chain_info.disperse_available => has_bytecode(provider, addr).await?,
        _ => false,
    };

    if batch_eligible {
        let disperse_address = disperse_address.expect("checked Some above");
        distribute_native_batch(provider, disperse_address, chain_info.native_decimals, chain, targets).await
    } else {
        distribute_native_sequential(provider, chain_info.native_decimals, chain, targets).await
    }
}

async fn distribute_native_batch(
    provider: &EvmProvider,
    disperse_address: Address,
    decimals: u8,
    chain: &str,
    targets: &[DistributionTarget],
) -> Result<DistributionReport, TreasuryError> {
    let recipients: Vec<Address> = targets.iter().map(|t| t.address).collect();
    let amounts: Vec<U256> = targets.iter().map(|t| money_to_u256(&t.amount, decimals)).collect();
    let total: U256 = amounts.iter().fold(U256::ZERO, |acc, a| acc + *a);

    let disperse = IDisperse::new(disperse_address, provider.inner());
    let call = disperse.disperseEther(recipients.clone(), amounts);
    let receipt = provider
        .send_transaction(MetaTransaction::call(disperse_address, call.calldata().clone()).with_value(total))
        .await?;

    let succeeded = if receipt.status() { recipients } else { Vec::new() };
    let failed = if receipt.status() {
        Vec::new()
    } else {
        targets
            .iter()
            .map(|t| DistributionFailure { address: t.address, reason: "disperseEther receipt status=failed".to_string() })
            .collect()
    };

    Ok(DistributionReport {
        chain: chain.to_string(),
        token: "native".to_string(),
        mode: "batch",
        succeeded,
        failed,
    })
}

async fn distribute_native_sequential(
    provider: &EvmProvider,
    decimals: u8,
    chain: &str,
    targets: &[DistributionTarget],
) -> Result<DistributionReport, TreasuryError> {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    for target in targets {
        let amount = money_to_u256(&target.amount, decimals);
        match provider
            .send_transaction(MetaTransaction::call(target.address, Default::default()).with_value(amount))
            .await
        {
            Ok(receipt) if receipt.status() => succeeded.push(target.address),
            Ok(_) => failed.push(DistributionFailure {
                address: target.address,
                reason: "native transfer receipt status=failed".to_string(),
            }),
            Err(e) => failed.push(DistributionFailure { address: target.address, reason: e.to_string() }),
        }
    }

    Ok(DistributionReport {
        chain: chain.to_string(),
        token: "native".to_string(),
        mode: "sequential",
        succeeded,
        failed,
    })
}

// ---------------------------------------------------------------------
// 4.4.4 Sweep / recovery
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SweepOutcome {
    Swept,
    Skip,
    Dust,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepEntry {
    pub address: Address,
    pub asset: String,
    pub amount: U256,
    pub outcome: SweepOutcome,
}

/// Sweeps all non-dust balances from `address` to `recovery_address`.
/// `estimated_gas_cost` is the native-token cost of one transfer on this
/// chain, used to decide whether a native balance is dust.
pub async fn sweep_wallet(
    provider: &EvmProvider,
    registry: &ChainRegistry,
    chain: &str,
    address: Address,
    recovery_address: Address,
    estimated_gas_cost: U256,
) -> Result<Vec<SweepEntry>, TreasuryError> {
    let chain_info = registry.get(chain)?;
    let mut entries = Vec::new();

    for token in &chain_info.tokens {
        let erc20 = IERC20::new(token.address, provider.inner());
        let balance = erc20.balanceOf(address).call().await?;
        if balance.is_zero() {
            entries.push(SweepEntry { address, asset: token.symbol.to_string(), amount: balance, outcome: SweepOutcome::Skip });
            continue;
        }
        let call = erc20.transfer(recovery_address, balance);
        let receipt = provider
            .send_transaction(MetaTransaction::call(token.address, call.calldata().clone()))
            .await?;
        let outcome = if receipt.status() { SweepOutcome::Swept } else { SweepOutcome::Skip };
        entries.push(SweepEntry { address, asset: token.symbol.to_string(), amount: balance, outcome });
    }

    {
        use alloy_provider::Provider;
        let native_balance = provider
            .inner()
            .get_balance(address)
            .await
            .map_err(|e| TreasuryError::Transaction(MetaTransactionSendError::Transport(e)))?;
        let outcome = if native_balance.is_zero() {
            SweepOutcome::Skip
        } else if native_balance <= estimated_gas_cost {
            SweepOutcome::Dust
        } else {
            let sendable = native_balance - estimated_gas_cost;
            provider
                .send_transaction(MetaTransaction::call(recovery_address, Default::default()).with_value(sendable))
                .await?;
            SweepOutcome::Swept
        };
        entries.push(SweepEntry { address, asset: chain_info.native_symbol.to_string(), amount: native_balance, outcome });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{WalletEntry, WalletManifest, WalletType};

    fn manifest(n: usize) -> WalletManifest {
        let wallets = (0..n)
            .map(|i| WalletEntry {
                index: i as u32,
                name: format!("agent-{i}"),
                address: Address::from([i as u8 + 1; 20]),
                wallet_type: WalletType::User,
            })
            .collect();
        WalletManifest { version: "1.0".to_string(), derivation_path: "m/44'/60'/0'/0/{index}".to_string(), count: n as u32, wallets }
    }

    #[test]
    fn allocation_exactness_matches_scenario_2() {
        let registry = ChainRegistry::new();
        let m = manifest(3);
        let mut budgets = BTreeMap::new();
        budgets.insert("base".to_string(), Decimal::from_str_exact("28.00").unwrap());

        let input = PlannerInput {
            manifest: &m,
            source_chain: "base".to_string(),
            chain_budgets: budgets,
            multiplier_range: (0.3, 1.7),
            min_per_agent: Decimal::from_str_exact("0.10").unwrap(),
            seed: 42,
            gas_per_agent: Decimal::from_str_exact("0.001").unwrap(),
        };

        let plan = plan_allocation(&input, &registry).unwrap();
        let base = &plan.chains["base"];
        let sum: Decimal = base
            .per_agent
            .values()
            .map(|a| Decimal::from_str_exact(&a.amount).unwrap())
            .sum();
        assert_eq!(sum, Decimal::from_str_exact("28.00").unwrap());
        for entry in base.per_agent.values() {
            let amount = Decimal::from_str_exact(&entry.amount).unwrap();
            assert!(amount >= Decimal::from_str_exact("0.10").unwrap());
            assert!(amount <= Decimal::from_str_exact("15.87").unwrap());
        }
    }

    #[test]
    fn allocation_is_deterministic_given_same_seed() {
        let registry = ChainRegistry::new();
        let m = manifest(5);
        let mut budgets = BTreeMap::new();
        budgets.insert("base".to_string(), Decimal::from_str_exact("50.00").unwrap());

        let make_input = || PlannerInput {
            manifest: &m,
            source_chain: "base".to_string(),
            chain_budgets: budgets.clone(),
            multiplier_range: (0.3, 1.7),
            min_per_agent: Decimal::from_str_exact("0.10").unwrap(),
            seed: 7,
            gas_per_agent: Decimal::from_str_exact("0.001").unwrap(),
        };

        let a = plan_allocation(&make_input(), &registry).unwrap();
        let b = plan_allocation(&make_input(), &registry).unwrap();
        assert_eq!(
            serde_json::to_string(&a.chains).unwrap(),
            serde_json::to_string(&b.chains).unwrap()
        );
    }
}
