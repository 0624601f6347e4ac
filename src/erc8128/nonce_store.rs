//! The verifier-side nonce store: atomic insert, TTL expiry, memory-only
//! by default. Same `DashMap`-per-key shape as the chain nonce manager,
//! adapted from "per-signer sequential counter" to "per-nonce single-use
//! flag with an expiry".

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default)]
pub struct NonceStore {
    entries: Arc<DashMap<String, u64>>,
}

impl NonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically inserts `nonce` with the given `expires_at` (unix
    /// seconds). Returns `false` if the nonce was already present and not
    /// yet expired — the caller must reject the request as `ReplayedNonce`.
    pub fn try_consume(&self, nonce: &str, expires_at: u64) -> bool {
        let now = now_secs();
        match self.entries.entry(nonce.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if *occupied.get() <= now {
                    // Expired entry, safe to treat as a fresh nonce.
                    occupied.insert(expires_at);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(expires_at);
                true
            }
        }
    }

    /// Removes every entry whose `expires_at` has passed. Call periodically
    /// to bound memory growth; never required for correctness since
    /// `try_consume` treats expired entries as absent.
    pub fn sweep_expired(&self) {
        let now = now_secs();
        self.entries.retain(|_, expires_at| *expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_consume_succeeds_second_is_rejected() {
        let store = NonceStore::new();
        let expires = now_secs() + 300;
        assert!(store.try_consume("abc", expires));
        assert!(!store.try_consume("abc", expires));
    }

    #[test]
    fn expired_entry_can_be_reused() {
        let store = NonceStore::new();
        assert!(store.try_consume("abc", now_secs().saturating_sub(1)));
        assert!(store.try_consume("abc", now_secs() + 300));
    }

    #[test]
    fn sweep_removes_expired_entries_only() {
        let store = NonceStore::new();
        store.try_consume("expired", now_secs().saturating_sub(1));
        store.try_consume("fresh", now_secs() + 300);
        store.sweep_expired();
        assert_eq!(store.len(), 1);
    }
}
