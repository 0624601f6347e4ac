//! Identity registrar: idempotent bulk registration of agents with the
//! external identity service, across multiple chains, with a persistent
//! per-agent identity journal.
//!
//! Every API call is signed ERC-8128 ([`crate::erc8128::sign`]) using the
//! agent's own re-derived signer. Calls run throttled and strictly
//! sequential, never in parallel, since the external service rate-limits
//! per caller.

use crate::erc8128::{self, NonceClient, RequestParts};
use crate::wallet::{WalletManifest, WalletType};
use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("failed to read identity journal {0}: {1}")]
    JournalRead(String, std::io::Error),
    #[error("failed to parse identity journal: {0}")]
    JournalParse(#[from] serde_json::Error),
    #[error("failed to write identity journal {0}: {1}")]
    JournalWrite(String, std::io::Error),
    #[error("identity service request failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),
    #[error(transparent)]
    Wallet(#[from] crate::wallet::WalletError),
    #[error(transparent)]
    Signer(#[from] alloy_signer::Error),
    #[error(transparent)]
    Erc8128(#[from] erc8128::Erc8128Error),
}

/// Outcome of a single (agent, network) registration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Success,
    AlreadyRegistered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub agent_id: Option<String>,
    pub transaction: Option<String>,
    pub registered_at: String,
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub address: Address,
    pub name: String,
    pub index: u32,
    #[serde(rename = "type")]
    pub wallet_type: WalletType,
    pub executor_id: Option<String>,
    #[serde(default)]
    pub registrations: BTreeMap<String, Registration>,
}

/// The append-through identity journal: rewritten in full after every
/// network × agent step so a crash leaves it consistent with all
/// previously committed steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityJournal {
    pub agents: BTreeMap<Address, AgentIdentity>,
}

impl IdentityJournal {
    pub fn load_or_default(path: &Path) -> Result<Self, IdentityError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| IdentityError::JournalRead(path.display().to_string(), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| IdentityError::JournalWrite(path.display().to_string(), e))
    }

    /// Ensures every wallet in `manifest` has a journal entry, preserving
    /// any registrations already recorded for it. Idempotent: a second run
    /// over the same journal registers 0 additional agents per network
    /// unless `force`.
    pub fn seed_from_manifest(&mut self, manifest: &WalletManifest) {
        for wallet in &manifest.wallets {
            self.agents.entry(wallet.address).or_insert_with(|| AgentIdentity {
                address: wallet.address,
                name: wallet.name.clone(),
                index: wallet.index,
                wallet_type: wallet.wallet_type,
                executor_id: None,
                registrations: BTreeMap::new(),
            });
        }
    }

    fn is_settled(&self, address: Address, network: &str, force: bool) -> bool {
        if force {
            return false;
        }
        matches!(
            self.agents.get(&address).and_then(|a| a.registrations.get(network)).map(|r| r.status),
            Some(RegistrationStatus::Success) | Some(RegistrationStatus::AlreadyRegistered)
        )
    }
}

#[derive(Debug, Serialize)]
struct WorkerRegisterRequest<'a> {
    wallet_address: Address,
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct WorkerRegisterResponse {
    #[serde(default)]
    executor: Option<ExecutorRef>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecutorRef {
    id: String,
}

#[derive(Debug, Serialize)]
struct ReputationRegisterRequest<'a> {
    network: &'a str,
    agent_uri: String,
    recipient: Address,
    metadata: Vec<MetadataEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct MetadataEntry<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReputationRegisterResponse {
    success: bool,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    transaction: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Summary counters for one registration step.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StepCounts {
    pub registered: u32,
    pub existing: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrationSummary {
    pub workers: StepCounts,
    pub erc8004: StepCounts,
}

/// HTTP client for the identity service, signing every request ERC-8128
/// with the calling agent's own re-derived key.
pub struct IdentityClient {
    http: reqwest_middleware::ClientWithMiddleware,
    base_url: String,
    chain_id: u64,
    nonce_client: NonceClient,
    throttle: Duration,
}

impl IdentityClient {
    pub fn new(base_url: String, chain_id: u64, throttle_ms: u64) -> Self {
        let nonce_client = NonceClient::new(&base_url);
        let http = crate::util::retry::client_with_retry(crate::util::retry::DEFAULT_MAX_ATTEMPTS);
        Self { http, base_url, chain_id, nonce_client, throttle: Duration::from_millis(throttle_ms) }
    }

    async fn signed_post<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        signer: &PrivateKeySigner,
        path: &str,
        body: &T,
    ) -> Result<(reqwest::StatusCode, Option<R>), IdentityError> {
        let body_bytes = serde_json::to_vec(body)?;
        let (nonce, ttl) = self.nonce_client.fetch().await;
        let url = format!("{}{}", self.base_url, path);
        let authority = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        let parts = RequestParts { method: "POST", authority: &authority, path, body: Some(&body_bytes) };
        let headers = erc8128::sign(signer, self.chain_id, &parts, nonce, ttl).await?;

        let mut req = self
            .http
            .post(&url)
            .header("Signature", &headers.signature)
            .header("Signature-Input", &headers.signature_input)
            .json(body);
        if let Some(digest) = &headers.content_digest {
            req = req.header("Content-Digest", digest);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            let parsed = resp.json::<R>().await.ok();
            Ok((status, parsed))
        } else {
            Ok((status, None))
        }
    }

    /// Step 1: idempotent worker registration. HTTP 409 is treated as
    /// success (already registered).
    pub async fn register_worker(
        &self,
        signer: &PrivateKeySigner,
        wallet_address: Address,
        display_name: &str,
    ) -> Result<(RegistrationStatus, Option<String>), IdentityError> {
        let body = WorkerRegisterRequest { wallet_address, display_name };
        let (status, parsed) = self.signed_post::<_, WorkerRegisterResponse>(signer, "/api/v1/workers/register", &body).await?;

        if status == reqwest::StatusCode::CONFLICT {
            let executor_id = parsed.and_then(|r| r.executor.map(|e| e.id).or(r.id));
            return Ok((RegistrationStatus::AlreadyRegistered, executor_id));
        }
        if status.is_success() {
            let executor_id = parsed.and_then(|r| r.executor.map(|e| e.id).or(r.id));
            return Ok((RegistrationStatus::Success, executor_id));
        }
        Ok((RegistrationStatus::Failed, None))
    }

    /// Step 2: on-chain reputation-subject registration. An `error` whose
    /// text semantically indicates "already" maps to `AlreadyRegistered`,
    /// not `Failed`.
    pub async fn register_reputation(
        &self,
        signer: &PrivateKeySigner,
        network: &str,
        agent_uri: String,
        recipient: Address,
    ) -> Result<(RegistrationStatus, Option<String>, Option<String>), IdentityError> {
        let body = ReputationRegisterRequest {
            network,
            agent_uri,
            recipient,
            metadata: vec![MetadataEntry { key: "swarm", value: "agent-fleet" }],
        };
        let (status, parsed) = self
            .signed_post::<_, ReputationRegisterResponse>(signer, "/api/v1/reputation/register", &body)
            .await?;

        match parsed {
            Some(r) if r.success => Ok((RegistrationStatus::Success, r.agent_id, r.transaction)),
            Some(r) => {
                let already = r.error.as_deref().map(is_already_registered_error).unwrap_or(false);
                let reg_status = if already { RegistrationStatus::AlreadyRegistered } else { RegistrationStatus::Failed };
                Ok((reg_status, r.agent_id, r.transaction))
            }
            None if status == reqwest::StatusCode::CONFLICT => Ok((RegistrationStatus::AlreadyRegistered, None, None)),
            None => Ok((RegistrationStatus::Failed, None, None)),
        }
    }

    pub fn throttle(&self) -> Duration {
        self.throttle
    }
}

fn is_already_registered_error(error: &str) -> bool {
    let lower = error.to_ascii_lowercase();
    lower.contains("already") || lower.contains("exists") || lower.contains("duplicate")
}

/// Runs the full registration flow across every `(agent, network)` pair:
/// worker registration once per agent, then on-chain
/// reputation registration per `(agent, network)`. Re-runs skip any pair
/// already `Success`/`AlreadyRegistered` unless `force`. Throttles by
/// `client.throttle()` between every API call (no parallel fan-out).
#[tracing::instrument(skip(client, journal, mnemonic), fields(networks = ?networks, force))]
pub async fn register_fleet(
    client: &IdentityClient,
    journal: &mut IdentityJournal,
    journal_path: &Path,
    mnemonic: &str,
    networks: &[String],
    force: bool,
) -> Result<RegistrationSummary, IdentityError> {
    let mut summary = RegistrationSummary::default();
    let addresses: Vec<Address> = journal.agents.keys().copied().collect();

    for address in addresses {
        let (index, name) = {
            let agent = journal.agents.get(&address).expect("seeded above");
            (agent.index, agent.name.clone())
        };
        let signer = crate::wallet::signer_for_index(mnemonic, index, client.chain_id)?;

        if force || journal.agents[&address].executor_id.is_none() {
            let (status, executor_id) = client.register_worker(&signer, address, &name).await?;
            tokio::time::sleep(client.throttle()).await;
            record_worker_step(&mut summary, status);
            if let Some(agent) = journal.agents.get_mut(&address) {
                if executor_id.is_some() {
                    agent.executor_id = executor_id;
                }
            }
            journal.save(journal_path)?;
        }

        for network in networks {
            if journal.is_settled(address, network, force) {
                continue;
            }
            let agent_uri = format!("urn:agent:{address:#x}");
            let (status, agent_id, transaction) =
                client.register_reputation(&signer, network, agent_uri, address).await?;
            tokio::time::sleep(client.throttle()).await;
            record_erc8004_step(&mut summary, status);

            let registered_at = crate::util::timestamp::UnixTimestamp::try_now()
                .map(|t| t.to_string())
                .unwrap_or_default();
            if let Some(agent) = journal.agents.get_mut(&address) {
                agent.registrations.insert(
                    network.clone(),
                    Registration {
                        agent_id,
                        transaction,
                        registered_at,
                        status,
                        error: if status == RegistrationStatus::Failed {
                            Some("reputation registration failed".to_string())
                        } else {
                            None
                        },
                    },
                );
            }
            journal.save(journal_path)?;
        }
    }

    Ok(summary)
}

fn record_worker_step(summary: &mut RegistrationSummary, status: RegistrationStatus) {
    match status {
        RegistrationStatus::Success => summary.workers.registered += 1,
        RegistrationStatus::AlreadyRegistered => summary.workers.existing += 1,
        RegistrationStatus::Failed => summary.workers.failed += 1,
    }
}

fn record_erc8004_step(summary: &mut RegistrationSummary, status: RegistrationStatus) {
    match status {
        RegistrationStatus::Success => summary.erc8004.registered += 1,
        RegistrationStatus::AlreadyRegistered => summary.erc8004.existing += 1,
        RegistrationStatus::Failed => summary.erc8004.failed += 1,
    }
}

/// Writes a timestamped JSON report file under `report_dir`.
pub fn write_report(report_dir: &Path, summary: &RegistrationSummary, now: u64) -> Result<(), IdentityError> {
    std::fs::create_dir_all(report_dir).map_err(|e| IdentityError::JournalWrite(report_dir.display().to_string(), e))?;
    let path = report_dir.join(format!("identity-report-{now}.json"));
    let content = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, content).map_err(|e| IdentityError::JournalWrite(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{WalletEntry, WalletManifest, WalletType};

    fn manifest() -> WalletManifest {
        WalletManifest {
            version: "1.0".to_string(),
            derivation_path: "m/44'/60'/0'/0/{index}".to_string(),
            count: 2,
            wallets: vec![
                WalletEntry { index: 0, name: "sys0".to_string(), address: Address::from([1u8; 20]), wallet_type: WalletType::System },
                WalletEntry { index: 1, name: "kk-agent-001".to_string(), address: Address::from([2u8; 20]), wallet_type: WalletType::User },
            ],
        }
    }

    #[test]
    fn seeding_is_idempotent_and_preserves_existing_registrations() {
        let mut journal = IdentityJournal::default();
        journal.seed_from_manifest(&manifest());
        journal.agents.get_mut(&Address::from([1u8; 20])).unwrap().registrations.insert(
            "base".to_string(),
            Registration {
                agent_id: Some("a1".to_string()),
                transaction: Some("0xdead".to_string()),
                registered_at: "1700000000".to_string(),
                status: RegistrationStatus::Success,
                error: None,
            },
        );
        journal.seed_from_manifest(&manifest());
        assert_eq!(journal.agents.len(), 2);
        assert_eq!(journal.agents[&Address::from([1u8; 20])].registrations.len(), 1);
    }

    #[test]
    fn settled_pairs_are_skipped_unless_forced() {
        let mut journal = IdentityJournal::default();
        journal.seed_from_manifest(&manifest());
        let addr = Address::from([1u8; 20]);
        journal.agents.get_mut(&addr).unwrap().registrations.insert(
            "base".to_string(),
            Registration {
                agent_id: None,
                transaction: None,
                registered_at: "0".to_string(),
                status: RegistrationStatus::Success,
                error: None,
            },
        );
        assert!(journal.is_settled(addr, "base", false));
        assert!(!journal.is_settled(addr, "base", true));
        assert!(!journal.is_settled(addr, "polygon", false));
    }

    #[test]
    fn already_registered_error_text_is_detected() {
        assert!(is_already_registered_error("agent already registered"));
        assert!(is_already_registered_error("Duplicate entry"));
        assert!(!is_already_registered_error("internal server error"));
    }
}
