//! Swarm treasury core CLI entrypoint.
//!
//! Each subcommand is a thin wrapper over `swarm_core`'s library modules —
//! derivation, planning, bridging, distribution, sweep, and identity
//! registration — plus a `serve-verifier` subcommand that stands up the
//! ERC-8128 verifier as an Axum HTTP service. Startup follows the usual
//! "load env, init telemetry, load config, build registry, run" order.

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use dotenvy::dotenv;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors;

use swarm_core::bridge::{BridgeAdapter, Executor as BridgeExecutor, Router as BridgeRouter};
use swarm_core::bridge::debridge::DebridgeAdapter;
use swarm_core::bridge::squid::SquidAdapter;
use swarm_core::chain::{EvmProvider, EvmProviderConfig, RpcEndpoint};
use swarm_core::config::{Command, Config};
use swarm_core::contracts::DISPERSE_CONTRACT_ADDRESS;
use swarm_core::erc8128::{self, nonce_store::NonceStore};
use swarm_core::identity::{self, IdentityClient, IdentityJournal};
use swarm_core::registry::ChainRegistry;
use swarm_core::sig_down::SigDown;
use swarm_core::telemetry::Telemetry;
use swarm_core::treasury::{self, DistributionTarget, PlannerInput};
use rust_decimal::prelude::ToPrimitive;
use swarm_core::util::money_amount::MoneyAmount;
use swarm_core::util::timestamp::UnixTimestamp;
use swarm_core::wallet;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("failed to install rustls crypto provider");
    dotenv().ok();
    let _telemetry = Telemetry::new();

    let (config, cli_args) = Config::load()?;
    let registry = ChainRegistry::new();
    let mnemonic = config.hd_seed_mnemonic.inner().0.clone();

    match cli_args.command {
        Command::DeriveWallets { count, out } => {
            let system_names: Vec<String> = (0..count.min(6)).map(|i| format!("sys{i}")).collect();
            let manifest = wallet::derive(&mnemonic, count, &system_names, None)?;
            wallet::save_manifest(&out, &manifest)?;
            println!("derived {} wallets -> {}", manifest.wallets.len(), out.display());
        }

        Command::DeriveRelays { wallets, out } => {
            let manifest = wallet::load_manifest(&wallets)?;
            let relays = wallet::derive_relays(&mnemonic, &manifest)?;
            wallet::save_relay_manifest(&out, &relays)?;
            println!("derived {} relay wallets -> {}", relays.wallets.len(), out.display());
        }

        Command::Plan { wallets, out, source_chain, budgets, gas_per_agent, seed } => {
            let manifest = wallet::load_manifest(&wallets)?;
            let budgets_raw = std::fs::read_to_string(&budgets)?;
            let budgets_map: BTreeMap<String, String> = serde_json::from_str(&budgets_raw)?;
            let chain_budgets = budgets_map
                .into_iter()
                .map(|(chain, amount)| Ok((chain, rust_decimal::Decimal::from_str_exact(&amount)?)))
                .collect::<Result<BTreeMap<_, _>, rust_decimal::Error>>()?;

            let min_per_agent = MoneyAmount::parse(&config.min_per_agent_usd)?.0;
            let gas_per_agent = rust_decimal::Decimal::from_str_exact(&gas_per_agent)?;
            let seed = seed.unwrap_or_else(|| rand::random());

            let input = PlannerInput {
                manifest: &manifest,
                source_chain: source_chain.clone(),
                chain_budgets,
                multiplier_range: config.multiplier_range,
                min_per_agent,
                seed,
                gas_per_agent,
            };
            let plan = treasury::plan_allocation(&input, &registry)?;
            let content = serde_json::to_string_pretty(&plan)?;
            std::fs::write(&out, content)?;
            println!("allocation plan (seed={seed}) -> {}", out.display());
        }

        Command::Distribute { plan } => {
            let content = std::fs::read_to_string(&plan)?;
            let plan: treasury::AllocationPlan = serde_json::from_str(&content)?;

            for (chain_name, chain_plan) in &plan.chains {
                let chain_info = registry.get(chain_name)?;
                let provider = connect_chain(&registry, &mnemonic, chain_name, &[0]).await?;

                let mut by_token: BTreeMap<String, Vec<DistributionTarget>> = BTreeMap::new();
                for (address, per_agent) in &chain_plan.per_agent {
                    by_token.entry(per_agent.token.clone()).or_default().push(DistributionTarget {
                        address: *address,
                        amount: MoneyAmount::parse(&per_agent.amount)?,
                    });
                }

                for (token_symbol, targets) in by_token {
                    let disperse_address = chain_info.disperse_available.then_some(DISPERSE_CONTRACT_ADDRESS);
                    let report = treasury::distribute(
                        &provider,
                        &registry,
                        chain_name,
                        &token_symbol,
                        disperse_address,
                        &targets,
                    )
                    .await?;
                    println!(
                        "{chain_name}/{token_symbol}: {} succeeded, {} failed ({})",
                        report.succeeded.len(),
                        report.failed.len(),
                        report.mode
                    );
                }

                let recipients = chain_plan.per_agent.len() as u32;
                if recipients > 0 {
                    let gas_total = rust_decimal::Decimal::from_str_exact(&chain_plan.gas)?;
                    let gas_per_agent = gas_total / rust_decimal::Decimal::from(recipients);
                    let gas_targets: Vec<DistributionTarget> = chain_plan
                        .per_agent
                        .keys()
                        .map(|address| DistributionTarget {
                            address: *address,
                            amount: MoneyAmount(gas_per_agent),
                        })
                        .collect();

                    let disperse_address = chain_info.disperse_available.then_some(DISPERSE_CONTRACT_ADDRESS);
                    let report =
                        treasury::distribute_native(&provider, &registry, chain_name, disperse_address, &gas_targets)
                            .await?;
                    println!(
                        "{chain_name}/native: {} succeeded, {} failed ({})",
                        report.succeeded.len(),
                        report.failed.len(),
                        report.mode
                    );
                }
            }
        }

        Command::Sweep { wallets, recovery_address } => {
            let manifest = wallet::load_manifest(&wallets)?;
            let recovery: alloy_primitives::Address = recovery_address.parse()?;
            let mut journal = Vec::new();

            for chain_name in registry.names() {
                let provider = connect_chain(&registry, &mnemonic, chain_name, &[0]).await?;
                for entry in &manifest.wallets {
                    let entries = treasury::sweep_wallet(
                        &provider,
                        &registry,
                        chain_name,
                        entry.address,
                        recovery,
                        alloy_primitives::U256::from(100_000_000_000_000u64),
                    )
                    .await?;
                    journal.extend(entries);
                }
            }
            println!("swept {} (address, asset) entries across {} chains", journal.len(), registry.names().len());
        }

        Command::Bridge { source, target, token, amount } => {
            let route = BridgeRouter::select(&registry, &source, &target, &token)?;
            if !route.available {
                eprintln!("route unavailable: {}", route.reason.unwrap_or_default());
                std::process::exit(1);
            }

            let provider = connect_chain(&registry, &mnemonic, &source, &[0]).await?;
            let src_chain_info = registry.get(&source)?;
            let token_info = src_chain_info
                .token(&token)
                .ok_or_else(|| format!("token {token} not on chain {source}"))?;
            let amount_decimal = rust_decimal::Decimal::from_str_exact(&amount)?;
            let scale = rust_decimal::Decimal::from(10u64.pow(token_info.decimals as u32));
            let amount_u256 = alloy_primitives::U256::from((amount_decimal * scale).round().to_u128().unwrap_or(0));

            let recipient = provider.signer_addresses()[0];
            let adapter: Box<dyn BridgeAdapter> = match route.provider {
                swarm_core::bridge::BridgeProvider::Debridge => Box::new(DebridgeAdapter::new(
                    config.bridge_providers.debridge_base_url.clone().unwrap_or_else(|| "https://dln.debridge.finance/v1.0".to_string()),
                    config.bridge_providers.debridge_api_key.as_ref().map(|k| k.inner().0.clone()),
                )),
                swarm_core::bridge::BridgeProvider::Squid => Box::new(SquidAdapter::new(
                    config.bridge_providers.squid_base_url.clone().unwrap_or_else(|| "https://apiplus.squidrouter.com".to_string()),
                    config.bridge_providers.squid_integrator_id.as_ref().map(|k| k.inner().0.clone()),
                )),
                swarm_core::bridge::BridgeProvider::Direct => {
                    println!("source == destination or same-chain route: use `distribute`/`transfer` directly, no bridge needed");
                    return Ok(());
                }
            };

            let executor = BridgeExecutor {
                provider: &provider,
                adapter: adapter.as_ref(),
                poll_interval: std::time::Duration::from_secs(config.bridge_providers.poll_interval_secs),
                timeout: std::time::Duration::from_secs(config.bridge_providers.timeout_secs),
            };
            match executor.execute(&route, token_info.address, amount_u256, recipient).await {
                Ok(outcome) => println!(
                    "bridge complete: order_id={} approve_tx={:#x} bridge_tx={:#x} status={:?}",
                    outcome.order_id, outcome.approve_tx, outcome.bridge_tx, outcome.status
                ),
                Err(swarm_core::bridge::BridgeError::TimeoutUnknown(secs)) => {
                    println!("bridge status unknown after {secs}s — may still complete, check provider tracking");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Command::Register { wallets, journal, networks, report_dir, force } => {
            let manifest = wallet::load_manifest(&wallets)?;
            let mut identity_journal = IdentityJournal::load_or_default(&journal)?;
            identity_journal.seed_from_manifest(&manifest);

            let identity_config = config
                .identity_service
                .as_ref()
                .ok_or("identity_service must be configured in config.json")?;
            // `keyid.chain_id` is the registrar's signature-binding chain id;
            // registration calls are signed as if made from chain 1
            // (Ethereum) since the identity service itself is not
            // chain-scoped.
            let client = IdentityClient::new(identity_config.base_url.clone(), 1, identity_config.throttle_ms);

            let summary = identity::register_fleet(&client, &mut identity_journal, &journal, &mnemonic, &networks, force).await?;
            let now = UnixTimestamp::try_now()?.seconds_since_epoch();
            identity::write_report(&report_dir, &summary, now)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::ServeVerifier => {
            let verifier = Arc::new(erc8128::Verifier::new(1, NonceStore::new(), 5));
            let app = Router::new()
                .route("/health", get(health))
                .route("/api/v1/auth/erc8128/nonce", get(issue_nonce))
                .route("/api/v1/verify", post(verify_request))
                .with_state(verifier)
                .layer(
                    cors::CorsLayer::new()
                        .allow_origin(cors::Any)
                        .allow_methods([Method::GET, Method::POST])
                        .allow_headers(cors::Any),
                );

            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.verifier_port));
            tracing::info!("erc8128 verifier listening on http://{addr}");
            let listener = tokio::net::TcpListener::bind(addr).await?;

            let sig_down = SigDown::try_new()?;
            let cancellation = sig_down.cancellation_token();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancellation.cancelled().await })
                .await?;
        }
    }

    Ok(())
}

/// Connects an [`EvmProvider`] for `chain_name`, deriving the signer(s) at
/// `signer_indices` from the HD seed. Signer keys are re-derived transiently
/// and dropped after building the provider; they are never logged.
async fn connect_chain(
    registry: &ChainRegistry,
    mnemonic: &str,
    chain_name: &str,
    signer_indices: &[u32],
) -> Result<EvmProvider, Box<dyn std::error::Error>> {
    let chain_info = registry.get(chain_name)?;
    let signer_keys = signer_indices
        .iter()
        .map(|i| wallet::key_bytes_for_index(mnemonic, *i).map(alloy_primitives::B256::from))
        .collect::<Result<Vec<_>, _>>()?;

    let provider = EvmProvider::connect(EvmProviderConfig {
        chain_id: chain_info.chain_id,
        signer_keys,
        rpc: vec![RpcEndpoint { url: chain_info.rpc_url().parse()?, rate_limit: Some(20) }],
        eip1559: true,
        receipt_timeout_secs: 60,
    })
    .await?;
    let cleared = provider.clear_stuck_nonces_all_signers().await?;
    if cleared > 0 {
        tracing::warn!(chain = chain_name, cleared, "cleared stuck nonces before proceeding");
    }
    Ok(provider)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn issue_nonce() -> impl IntoResponse {
    let (nonce, ttl_seconds) = erc8128::issue_nonce();
    Json(serde_json::json!({ "nonce": nonce, "ttl_seconds": ttl_seconds }))
}

#[derive(serde::Deserialize)]
struct VerifyRequestBody {
    method: String,
    authority: String,
    path: String,
    #[serde(default)]
    body: Option<String>,
    signature_input: String,
    signature: String,
}

/// A generic verify endpoint: exercises the full verification pipeline over
/// a JSON-wrapped request description, so the verifier is directly drivable
/// in tests without standing up a matching protected resource route.
async fn verify_request(
    State(verifier): State<Arc<erc8128::Verifier>>,
    Json(req): Json<VerifyRequestBody>,
) -> impl IntoResponse {
    let body_bytes = req.body.as_ref().map(|b| b.as_bytes());
    let parts = erc8128::RequestParts {
        method: &req.method,
        authority: &req.authority,
        path: &req.path,
        body: body_bytes,
    };

    match verifier.verify(&parts, &req.signature_input, &req.signature) {
        Ok(address) => (StatusCode::OK, Json(serde_json::json!({ "signer": address }))).into_response(),
        Err(e) => {
            let kind = match &e {
                erc8128::Erc8128Error::MalformedHeader(_) => "MalformedHeader",
                erc8128::Erc8128Error::Expired => "Expired",
                erc8128::Erc8128Error::ReplayedNonce => "ReplayedNonce",
                erc8128::Erc8128Error::BadSignature => "BadSignature",
                erc8128::Erc8128Error::BodyDigestMismatch => "BodyDigestMismatch",
                erc8128::Erc8128Error::UnknownChain(_) => "UnknownChain",
                erc8128::Erc8128Error::Signer(_) => "BadSignature",
            };
            (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": kind, "detail": e.to_string() }))).into_response()
        }
    }
}
