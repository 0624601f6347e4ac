//! HD wallet ledger: deterministic derivation of agent main wallets and
//! reputation-relay wallets from a single BIP-39 seed.
//!
//! The derivation pipeline goes BIP-39 mnemonic to seed, BIP-32 `XPriv` path
//! derivation, `k256` signing key extraction, then Keccak256-based Ethereum
//! address computation. The resulting 32-byte key feeds directly into
//! `alloy_signer_local::PrivateKeySigner::from_bytes` for signing.
//!
//! **Security contract**: a [`WalletEntry`]/[`RelayWalletEntry`] carries an
//! address only. Private keys are re-derived transiently at signing time
//! from the mnemonic — never logged, serialized, or returned.

use alloy_primitives::Address;
use bip39::Mnemonic;
use coins_bip32::path::DerivationPath;
use coins_bip32::prelude::XPriv;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::path::Path;
use std::str::FromStr;

pub const MANIFEST_VERSION: &str = "1.0";
/// BIP-44 path prefix for Ethereum main wallets: `m/44'/60'/0'/0/{i}`.
pub const DERIVATION_PATH_MAIN: &str = "m/44'/60'/0'/0";
/// Reputation-relay wallets live at `main_index + 100`, using the same path shape.
pub const DERIVATION_PATH_RELAY: &str = "m/44'/60'/0'/0";
pub const RELAY_INDEX_OFFSET: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEntry {
    pub index: u32,
    pub name: String,
    pub address: Address,
    #[serde(rename = "type")]
    pub wallet_type: WalletType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletManifest {
    pub version: String,
    #[serde(rename = "derivationPath")]
    pub derivation_path: String,
    pub count: u32,
    pub wallets: Vec<WalletEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayWalletEntry {
    pub index: u32,
    pub name: String,
    pub address: Address,
    #[serde(rename = "type")]
    pub wallet_type: WalletType,
    pub main_address: Address,
    pub relay_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayManifest {
    #[serde(rename = "derivationPathMain")]
    pub derivation_path_main: String,
    #[serde(rename = "derivationPathRelay")]
    pub derivation_path_relay: String,
    #[serde(rename = "relayIndexOffset")]
    pub relay_index_offset: u32,
    pub wallets: Vec<RelayWalletEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("key derivation failed at index {0}: {1}")]
    Derivation(u32, String),
    #[error("failed to read manifest {0}: {1}")]
    ManifestRead(String, std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),
    #[error("failed to write manifest {0}: {1}")]
    ManifestWrite(String, std::io::Error),
}

/// Derives the raw 32-byte secp256k1 private key and Ethereum address at
/// `m/44'/60'/0'/0/{index}` for the given mnemonic phrase.
///
/// This is the only function in the crate that ever materializes a private
/// key; callers must not persist the returned bytes.
fn derive_secp256k1(mnemonic_phrase: &str, index: u32) -> Result<([u8; 32], Address), WalletError> {
    let mnemonic = Mnemonic::parse_in(bip39::Language::English, mnemonic_phrase)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    let seed = mnemonic.to_seed("");

    let root = XPriv::root_from_seed(&seed, None)
        .map_err(|e| WalletError::Derivation(index, e.to_string()))?;
    let path = format!("{}/{}", DERIVATION_PATH_MAIN, index);
    let derivation_path = DerivationPath::from_str(&path)
        .map_err(|e| WalletError::Derivation(index, e.to_string()))?;
    let child = root
        .derive_path(&derivation_path)
        .map_err(|e| WalletError::Derivation(index, e.to_string()))?;

    let signing_key: &SigningKey = child.as_ref();
    let key_bytes: [u8; 32] = signing_key.to_bytes().into();

    let verifying_key = signing_key.verifying_key();
    let uncompressed = verifying_key.to_encoded_point(false);
    // Strip the leading 0x04 prefix before hashing, per the standard
    // Ethereum address derivation (Keccak256 of the 64-byte public point).
    let pubkey_bytes = &uncompressed.as_bytes()[1..];
    let hash = Keccak256::digest(pubkey_bytes);
    let address = Address::from_slice(&hash[12..]);

    Ok((key_bytes, address))
}

/// Derives `count` main wallets at BIP-44 indices `0..count`.
///
/// Indices `0..system_names.len()` are named "system" agents per
/// `system_names`; the rest are "user" agents named from `names` (if
/// provided, aligned after the system prefix) or `kk-agent-<000>` fallback.
pub fn derive(
    mnemonic_phrase: &str,
    count: u32,
    system_names: &[String],
    names: Option<&[String]>,
) -> Result<WalletManifest, WalletError> {
    let mut wallets = Vec::with_capacity(count as usize);
    for index in 0..count {
        let (_key, address) = derive_secp256k1(mnemonic_phrase, index)?;
        let is_system = (index as usize) < system_names.len();
        let wallet_type = if is_system {
            WalletType::System
        } else {
            WalletType::User
        };
        let name = if is_system {
            system_names[index as usize].clone()
        } else if let Some(names) = names {
            let user_idx = index as usize - system_names.len();
            names
                .get(user_idx)
                .cloned()
                .unwrap_or_else(|| format!("kk-agent-{:03}", index))
        } else {
            format!("kk-agent-{:03}", index)
        };
        wallets.push(WalletEntry {
            index,
            name,
            address,
            wallet_type,
        });
    }
    Ok(WalletManifest {
        version: MANIFEST_VERSION.to_string(),
        derivation_path: format!("{}/{{index}}", DERIVATION_PATH_MAIN),
        count,
        wallets,
    })
}

/// For each main wallet at index `i`, derives a relay wallet at `i + 100`.
///
/// Invariant: `relay_address != main_address` for every entry — this holds
/// unconditionally since the two live at disjoint BIP-44 indices.
pub fn derive_relays(mnemonic_phrase: &str, manifest: &WalletManifest) -> Result<RelayManifest, WalletError> {
    let mut wallets = Vec::with_capacity(manifest.wallets.len());
    for entry in &manifest.wallets {
        let relay_index = entry.index + RELAY_INDEX_OFFSET;
        let (_key, relay_address) = derive_secp256k1(mnemonic_phrase, relay_index)?;
        debug_assert_ne!(relay_address, entry.address, "relay address must differ from main address");
        wallets.push(RelayWalletEntry {
            index: entry.index,
            name: entry.name.clone(),
            address: relay_address,
            wallet_type: entry.wallet_type,
            main_address: entry.address,
            relay_index,
        });
    }
    Ok(RelayManifest {
        derivation_path_main: format!("{}/{{index}}", DERIVATION_PATH_MAIN),
        derivation_path_relay: format!("{}/{{index}}", DERIVATION_PATH_RELAY),
        relay_index_offset: RELAY_INDEX_OFFSET,
        wallets,
    })
}

/// Re-derives the raw 32-byte private key at `index`, for callers (the EVM
/// provider's multi-signer setup) that need key material directly rather
/// than a pre-built `PrivateKeySigner`. Never logged or persisted by the
/// caller.
pub fn key_bytes_for_index(mnemonic_phrase: &str, index: u32) -> Result<[u8; 32], WalletError> {
    let (key_bytes, _address) = derive_secp256k1(mnemonic_phrase, index)?;
    Ok(key_bytes)
}

/// Re-derives the signer for a given wallet index. The caller receives an
/// `alloy_signer_local::PrivateKeySigner` bound to an in-memory key only;
/// nothing is written back to disk.
pub fn signer_for_index(
    mnemonic_phrase: &str,
    index: u32,
    chain_id: u64,
) -> Result<alloy_signer_local::PrivateKeySigner, WalletError> {
    let (key_bytes, _address) = derive_secp256k1(mnemonic_phrase, index)?;
    let signer = alloy_signer_local::PrivateKeySigner::from_bytes((&key_bytes).into())
        .map_err(|e| WalletError::Derivation(index, e.to_string()))?
        .with_chain_id(Some(chain_id));
    Ok(signer)
}

pub fn load_manifest(path: &Path) -> Result<WalletManifest, WalletError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| WalletError::ManifestRead(path.display().to_string(), e))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_manifest(path: &Path, manifest: &WalletManifest) -> Result<(), WalletError> {
    let content = serde_json::to_string_pretty(manifest)?;
    std::fs::write(path, content).map_err(|e| WalletError::ManifestWrite(path.display().to_string(), e))
}

pub fn load_relay_manifest(path: &Path) -> Result<RelayManifest, WalletError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| WalletError::ManifestRead(path.display().to_string(), e))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_relay_manifest(path: &Path, manifest: &RelayManifest) -> Result<(), WalletError> {
    let content = serde_json::to_string_pretty(manifest)?;
    std::fs::write(path, content).map_err(|e| WalletError::ManifestWrite(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    // The well-known zero-value test mnemonic used throughout the ecosystem.
    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

    #[test]
    fn derivation_is_deterministic() {
        let names = vec!["sys0".to_string(), "sys1".to_string(), "sys2".to_string()];
        let a = derive(TEST_MNEMONIC, 3, &names, None).unwrap();
        let b = derive(TEST_MNEMONIC, 3, &names, None).unwrap();
        assert_eq!(a.wallets.len(), 3);
        for (x, y) in a.wallets.iter().zip(b.wallets.iter()) {
            assert_eq!(x.address, y.address);
        }
    }

    #[test]
    fn manifest_version_and_system_naming() {
        let names = vec!["sys0".to_string(), "sys1".to_string(), "sys2".to_string()];
        let manifest = derive(TEST_MNEMONIC, 3, &names, None).unwrap();
        assert_eq!(manifest.version, "1.0");
        assert_eq!(manifest.wallets[0].name, "sys0");
        assert_eq!(manifest.wallets[0].wallet_type, WalletType::System);
    }

    #[test]
    fn relay_indices_and_addresses_differ_from_main() {
        let names = vec!["sys0".to_string(), "sys1".to_string(), "sys2".to_string()];
        let manifest = derive(TEST_MNEMONIC, 3, &names, None).unwrap();
        let relays = derive_relays(TEST_MNEMONIC, &manifest).unwrap();
        for (main, relay) in manifest.wallets.iter().zip(relays.wallets.iter()) {
            assert_eq!(relay.relay_index, main.index + 100);
            assert_ne!(relay.address, main.address);
        }
    }

    #[test]
    fn different_indices_yield_different_addresses() {
        let (_, a0) = derive_secp256k1(TEST_MNEMONIC, 0).unwrap();
        let (_, a1) = derive_secp256k1(TEST_MNEMONIC, 1).unwrap();
        assert_ne!(a0, a1);
    }
}
