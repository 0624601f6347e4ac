//! Signed-request authenticator: the ERC-8128 profile of RFC 9421 HTTP
//! Message Signatures, using EIP-191 `personal_sign` as the underlying
//! signature scheme.
//!
//! Signing goes through `alloy_signer_local::PrivateKeySigner::sign_message`,
//! which implements EIP-191 `personal_sign` under the hood — the same
//! signer type used for on-chain transaction signing elsewhere in this
//! crate.

pub mod nonce_store;

use crate::util::b64::Base64Bytes;
use crate::util::timestamp::UnixTimestamp;
use alloy_primitives::Address;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// HTTP methods that carry a body and therefore cover `content-digest`.
fn is_body_bearing(method: &str) -> bool {
    matches!(method.to_ascii_uppercase().as_str(), "POST" | "PUT" | "PATCH")
}

#[derive(Debug, Clone)]
pub struct SignatureParams {
    pub created: UnixTimestamp,
    pub expires: UnixTimestamp,
    pub nonce: String,
    pub keyid: String,
}

/// The pieces of an HTTP request needed to construct an ERC-8128 signature
/// base — never the whole request.
#[derive(Debug, Clone)]
pub struct RequestParts<'a> {
    pub method: &'a str,
    pub authority: &'a str,
    pub path: &'a str,
    pub body: Option<&'a [u8]>,
}

/// Fixed covered-component list per method class.
pub fn covered_components(method: &str) -> &'static [&'static str] {
    if is_body_bearing(method) {
        &["@method", "@authority", "@path", "content-digest"]
    } else {
        &["@method", "@authority", "@path"]
    }
}

fn content_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    let encoded = Base64Bytes::encode(hash.as_slice());
    format!("sha-256=:{}:", encoded)
}

/// Assembles the `@signature-params` string: covered components, then
/// `created`, `expires`, `nonce`, `keyid`, in exactly this order, joined by
/// `;`.
pub fn signature_params_string(components: &[&str], params: &SignatureParams) -> String {
    let quoted = components
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "({quoted});created={};expires={};nonce=\"{}\";keyid=\"{}\"",
        params.created, params.expires, params.nonce, params.keyid
    )
}

/// Builds the RFC 9421 signature base: one line per covered component as
/// `"<name>": <value>`, plus a final `"@signature-params": <params>` line,
/// joined by `\n`, no trailing newline.
pub fn signature_base(parts: &RequestParts, params: &SignatureParams) -> Result<String, Erc8128Error> {
    let components = covered_components(parts.method);
    let params_string = signature_params_string(components, params);

    let mut base = String::new();
    for component in components {
        let value = match *component {
            "@method" => parts.method.to_ascii_uppercase(),
            "@authority" => parts.authority.to_string(),
            "@path" => parts.path.to_string(),
            "content-digest" => {
                let body = parts.body.ok_or(Erc8128Error::MalformedHeader(
                    "content-digest covered but request has no body".to_string(),
                ))?;
                content_digest(body)
            }
            other => return Err(Erc8128Error::MalformedHeader(format!("unknown covered component {other}"))),
        };
        let _ = writeln!(base, "\"{component}\": {value}");
    }
    base.pop(); // drop the trailing newline from the loop's writeln!
    let _ = write!(base, "\n\"@signature-params\": {params_string}");
    Ok(base)
}

pub fn keyid(chain_id: u64, address: Address) -> String {
    format!("erc8128:{chain_id}:{:#x}", address).to_lowercase()
}

#[derive(Debug, thiserror::Error)]
pub enum Erc8128Error {
    #[error("malformed signature header: {0}")]
    MalformedHeader(String),
    #[error("signature expired or not yet valid")]
    Expired,
    #[error("nonce already used")]
    ReplayedNonce,
    #[error("signature does not recover to the address in keyid")]
    BadSignature,
    #[error("content-digest does not match request body")]
    BodyDigestMismatch,
    #[error("keyid references an unknown chain id {0}")]
    UnknownChain(u64),
    #[error(transparent)]
    Signer(#[from] alloy_signer::Error),
}

/// Emitted headers for a signed request.
pub struct SignedHeaders {
    pub content_digest: Option<String>,
    pub signature: String,
    pub signature_input: String,
}

/// Signs `parts` with `signer`'s EIP-191 `personal_sign`, using the given
/// `chain_id` (bound into `keyid`) and nonce/ttl.
pub async fn sign(
    signer: &PrivateKeySigner,
    chain_id: u64,
    parts: &RequestParts<'_>,
    nonce: String,
    ttl_secs: u64,
) -> Result<SignedHeaders, Erc8128Error> {
    let created = UnixTimestamp::try_now().map_err(|_| Erc8128Error::MalformedHeader("clock error".to_string()))?;
    let expires = created + ttl_secs;
    let params = SignatureParams { created, expires, nonce, keyid: keyid(chain_id, signer.address()) };

    let base = signature_base(parts, &params)?;
    let signature = signer.sign_message(base.as_bytes()).await?;
    let sig_b64 = Base64Bytes::encode(signature.as_bytes());

    let components = covered_components(parts.method);
    let content_digest = if components.contains(&"content-digest") {
        parts.body.map(content_digest)
    } else {
        None
    };

    Ok(SignedHeaders {
        content_digest,
        signature: format!("eth=:{}:", sig_b64),
        signature_input: format!("eth={}", signature_params_string(components, &params)),
    })
}

/// Fetches a server-issued nonce; on any failure (network, 4xx, timeout)
/// falls back to a locally generated 16-byte random hex nonce with a
/// default 300s TTL. Server-issued nonces are preferred because only the
/// server can enforce true single-use.
pub struct NonceClient {
    client: reqwest_middleware::ClientWithMiddleware,
    nonce_url: String,
}

#[derive(Debug, serde::Deserialize)]
struct NonceResponse {
    nonce: String,
    ttl_seconds: u64,
}

pub const FALLBACK_NONCE_TTL_SECS: u64 = 300;

impl NonceClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: crate::util::retry::client_with_retry(crate::util::retry::DEFAULT_MAX_ATTEMPTS),
            nonce_url: format!("{base_url}/api/v1/auth/erc8128/nonce"),
        }
    }

    pub async fn fetch(&self) -> (String, u64) {
        match self.try_fetch_remote().await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "nonce service unreachable, falling back to local nonce");
                (Self::local_fallback_nonce(), FALLBACK_NONCE_TTL_SECS)
            }
        }
    }

    async fn try_fetch_remote(&self) -> Result<(String, u64), reqwest_middleware::Error> {
        let resp = self.client.get(&self.nonce_url).send().await?;
        let resp = resp.error_for_status().map_err(reqwest_middleware::Error::Reqwest)?;
        let parsed: NonceResponse = resp.json().await.map_err(reqwest_middleware::Error::Reqwest)?;
        Ok((parsed.nonce, parsed.ttl_seconds))
    }

    fn local_fallback_nonce() -> String {
        let bytes: [u8; 16] = rand::random();
        hex::encode(bytes)
    }
}

/// Server-side nonce issuance for the `GET /api/v1/auth/erc8128/nonce`
/// route: a fresh random token plus its TTL. Issuing does not touch the
/// [`nonce_store::NonceStore`] — a nonce only enters the store the first
/// time it is presented back for verification, so the first verify of a
/// freshly issued nonce always succeeds.
pub fn issue_nonce() -> (String, u64) {
    let bytes: [u8; 16] = rand::random();
    (hex::encode(bytes), FALLBACK_NONCE_TTL_SECS)
}

/// Verifier-side address binding for one chain: recovers the signer
/// address from the signature and compares it to the address bound in
/// `keyid`, rejecting any mismatch.
pub struct Verifier {
    pub expected_chain_id: u64,
    pub nonce_store: nonce_store::NonceStore,
    pub skew_secs: u64,
}

impl Verifier {
    pub fn new(expected_chain_id: u64, nonce_store: nonce_store::NonceStore, skew_secs: u64) -> Self {
        Self { expected_chain_id, nonce_store, skew_secs }
    }

    /// Runs the full verification pipeline. `signature_input` is the raw
    /// `Signature-Input` header value (`eth=...`), `signature` is the raw
    /// `Signature` header value (`eth=:...:`).
    pub fn verify(
        &self,
        parts: &RequestParts,
        signature_input: &str,
        signature: &str,
    ) -> Result<Address, Erc8128Error> {
        let (components, params) = parse_signature_input(signature_input)?;
        let now = UnixTimestamp::try_now().map_err(|_| Erc8128Error::MalformedHeader("clock error".to_string()))?;

        if now.0 + self.skew_secs < params.created.0 || now.0 > params.expires.0 {
            return Err(Erc8128Error::Expired);
        }

        if !self.nonce_store.try_consume(&params.nonce, params.expires.0) {
            return Err(Erc8128Error::ReplayedNonce);
        }

        let chain_id = parse_keyid_chain_id(&params.keyid)?;
        if chain_id != self.expected_chain_id {
            return Err(Erc8128Error::UnknownChain(chain_id));
        }

        if components.contains(&"content-digest") && parts.body.is_none() {
            return Err(Erc8128Error::BodyDigestMismatch);
        }

        // Recomputing the base below re-derives the content-digest line from
        // the actual received body (invariant P9: a single flipped byte
        // changes the base and therefore invalidates the signature).
        let base = signature_base(parts, &params)?;
        let sig_bytes = parse_eth_signature(signature)?;
        let sig = alloy_primitives::PrimitiveSignature::try_from(sig_bytes.as_slice())
            .map_err(|_| Erc8128Error::BadSignature)?;
        let recovered = sig
            .recover_address_from_msg(base.as_bytes())
            .map_err(|_| Erc8128Error::BadSignature)?;

        let keyid_address = parse_keyid_address(&params.keyid)?;
        if recovered != keyid_address {
            return Err(Erc8128Error::BadSignature);
        }

        Ok(recovered)
    }
}

fn parse_eth_signature(signature: &str) -> Result<Vec<u8>, Erc8128Error> {
    let inner = signature
        .strip_prefix("eth=:")
        .and_then(|s| s.strip_suffix(':'))
        .ok_or_else(|| Erc8128Error::MalformedHeader("Signature header must be eth=:<b64>:".to_string()))?;
    Base64Bytes(std::borrow::Cow::Borrowed(inner.as_bytes()))
        .decode()
        .map_err(|e| Erc8128Error::MalformedHeader(format!("invalid base64 signature: {e}")))
}

fn parse_keyid_chain_id(keyid: &str) -> Result<u64, Erc8128Error> {
    let mut parts = keyid.split(':');
    match (parts.next(), parts.next()) {
        (Some("erc8128"), Some(chain_id)) => chain_id
            .parse::<u64>()
            .map_err(|_| Erc8128Error::MalformedHeader(format!("invalid chain id in keyid {keyid}"))),
        _ => Err(Erc8128Error::MalformedHeader(format!("malformed keyid {keyid}"))),
    }
}

fn parse_keyid_address(keyid: &str) -> Result<Address, Erc8128Error> {
    let address_str = keyid
        .rsplit(':')
        .next()
        .ok_or_else(|| Erc8128Error::MalformedHeader(format!("malformed keyid {keyid}")))?;
    address_str
        .parse::<Address>()
        .map_err(|_| Erc8128Error::MalformedHeader(format!("invalid address in keyid {keyid}")))
}

/// Parses a `Signature-Input: eth=(...)...` header back into covered
/// components and [`SignatureParams`].
fn parse_signature_input(header: &str) -> Result<(Vec<&str>, SignatureParams), Erc8128Error> {
    let value = header
        .strip_prefix("eth=")
        .ok_or_else(|| Erc8128Error::MalformedHeader("Signature-Input must start with eth=".to_string()))?;

    let components_end = value
        .find(')')
        .ok_or_else(|| Erc8128Error::MalformedHeader("missing closing paren in signature-input".to_string()))?;
    let components_str = &value[1..components_end];
    let components: Vec<&str> = components_str
        .split_whitespace()
        .map(|s| s.trim_matches('"'))
        .collect();

    let rest = &value[components_end + 1..];
    let mut created = None;
    let mut expires = None;
    let mut nonce = None;
    let mut keyid = None;
    for field in rest.split(';').filter(|s| !s.is_empty()) {
        let (key, val) = field
            .split_once('=')
            .ok_or_else(|| Erc8128Error::MalformedHeader(format!("malformed field {field}")))?;
        let val = val.trim_matches('"');
        match key {
            "created" => created = val.parse::<u64>().ok().map(UnixTimestamp),
            "expires" => expires = val.parse::<u64>().ok().map(UnixTimestamp),
            "nonce" => nonce = Some(val.to_string()),
            "keyid" => keyid = Some(val.to_string()),
            _ => {}
        }
    }

    let params = SignatureParams {
        created: created.ok_or_else(|| Erc8128Error::MalformedHeader("missing created".to_string()))?,
        expires: expires.ok_or_else(|| Erc8128Error::MalformedHeader("missing expires".to_string()))?,
        nonce: nonce.ok_or_else(|| Erc8128Error::MalformedHeader("missing nonce".to_string()))?,
        keyid: keyid.ok_or_else(|| Erc8128Error::MalformedHeader("missing keyid".to_string()))?,
    };
    Ok((components, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_params_string_is_well_formed() {
        let params = SignatureParams {
            created: UnixTimestamp(1700000000),
            expires: UnixTimestamp(1700000300),
            nonce: "abc".to_string(),
            keyid: "erc8128:8453:0x857f...".to_string(),
        };
        let s = signature_params_string(&["@method", "@authority", "@path", "content-digest"], &params);
        assert_eq!(
            s,
            "(\"@method\" \"@authority\" \"@path\" \"content-digest\");created=1700000000;expires=1700000300;nonce=\"abc\";keyid=\"erc8128:8453:0x857f...\""
        );
    }

    #[test]
    fn signature_base_lines_are_well_formed() {
        let params = SignatureParams {
            created: UnixTimestamp(1700000000),
            expires: UnixTimestamp(1700000300),
            nonce: "abc".to_string(),
            keyid: "erc8128:8453:0x857f...".to_string(),
        };
        let body = br#"{"title":"test"}"#;
        let parts = RequestParts {
            method: "POST",
            authority: "api.execution.market",
            path: "/api/v1/tasks",
            body: Some(body),
        };
        let base = signature_base(&parts, &params).unwrap();
        let expected_digest = content_digest(body);
        let expected = format!(
            "\"@method\": POST\n\"@authority\": api.execution.market\n\"@path\": /api/v1/tasks\n\"content-digest\": {expected_digest}\n\"@signature-params\": {}",
            signature_params_string(&["@method", "@authority", "@path", "content-digest"], &params)
        );
        assert_eq!(base, expected);
    }

    #[test]
    fn non_body_methods_omit_content_digest() {
        assert_eq!(covered_components("GET"), &["@method", "@authority", "@path"]);
        assert_eq!(covered_components("DELETE"), &["@method", "@authority", "@path"]);
    }

    #[test]
    fn keyid_is_lowercased() {
        let addr = Address::from([0xABu8; 20]);
        let k = keyid(8453, addr);
        assert_eq!(k, k.to_lowercase());
        assert!(k.starts_with("erc8128:8453:0x"));
    }
}
