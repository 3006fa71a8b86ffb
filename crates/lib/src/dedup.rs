//! Sliding-window duplicate suppression for stream deliveries.
//!
//! The platform redelivers a message when it does not see a timely ack, so the
//! same message id can arrive more than once, including near-simultaneously.
//! The store answers `admit` atomically: exactly one caller wins for a given
//! key within the TTL window. Entries expire lazily on lookup and a background
//! sweep reclaims memory; a capacity cap evicts oldest-first.

use crate::channels::{InboundMessage, Payload};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_CAPACITY: usize = 1000;

struct Inner {
    entries: HashMap<String, Instant>,
    /// Insertion order for eviction: (key, expiry recorded at insert).
    /// A record is stale when the map holds a newer expiry for the key.
    order: VecDeque<(String, Instant)>,
}

/// Tracks which dedup keys have been accepted for processing within the TTL.
pub struct DedupStore {
    inner: Mutex<Inner>,
    ttl: Duration,
    capacity: usize,
}

impl DedupStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Test-and-set: returns true and records the key only if no live entry
    /// exists for it. Expired entries count as absent.
    pub async fn admit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut g = self.inner.lock().await;
        if let Some(expires_at) = g.entries.get(key) {
            if *expires_at > now {
                return false;
            }
        }
        let expires_at = now + self.ttl;
        g.entries.insert(key.to_string(), expires_at);
        g.order.push_back((key.to_string(), expires_at));
        while g.entries.len() > self.capacity {
            match g.order.pop_front() {
                Some((k, recorded)) => {
                    // Skip stale order records left behind by re-admission.
                    if g.entries.get(&k) == Some(&recorded) {
                        g.entries.remove(&k);
                    }
                }
                None => break,
            }
        }
        true
    }

    /// Number of live (non-expired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let g = self.inner.lock().await;
        g.entries.values().filter(|e| **e > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries and stale order records.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut g = self.inner.lock().await;
        g.entries.retain(|_, expires_at| *expires_at > now);
        let entries = std::mem::take(&mut g.entries);
        g.order
            .retain(|(k, recorded)| entries.get(k) == Some(recorded));
        g.entries = entries;
    }

    /// Start the periodic sweep task (interval = TTL/2). Runs until the
    /// process exits; the store is shared behind an Arc.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = (store.ttl / 2).max(Duration::from_millis(50));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep().await;
                log::debug!("dedup sweep done, {} live entries", store.len().await);
            }
        })
    }
}

/// Dedup key for a delivery: the platform message id when present, otherwise a
/// SHA-256 fingerprint over payload bytes + sender + conversation so two users
/// sending identical text do not collapse into one entry.
pub fn dedup_key(message: &InboundMessage) -> String {
    if let Some(id) = &message.message_id {
        let id = id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }
    let mut hasher = Sha256::new();
    match &message.payload {
        Payload::Text(t) => hasher.update(t.trim().as_bytes()),
        Payload::Voice(v) => hasher.update(&v.data),
    }
    hasher.update(message.sender_id.as_bytes());
    hasher.update(message.conversation_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn text_message(id: Option<&str>, sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.map(|s| s.to_string()),
            conversation_id: "conv-1".to_string(),
            sender_id: sender.to_string(),
            payload: Payload::Text(text.to_string()),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_admit_within_ttl_is_rejected() {
        let store = DedupStore::new(Duration::from_secs(300), 100);
        assert!(store.admit("m1").await);
        assert!(!store.admit("m1").await);
        assert!(store.admit("m2").await);
    }

    #[tokio::test]
    async fn expired_key_is_admitted_again() {
        let store = DedupStore::new(Duration::from_millis(30), 100);
        assert!(store.admit("m1").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.admit("m1").await);
    }

    #[tokio::test]
    async fn concurrent_admits_accept_exactly_one() {
        let store = Arc::new(DedupStore::new(Duration::from_secs(300), 100));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.admit("same-key").await }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let store = DedupStore::new(Duration::from_secs(300), 3);
        assert!(store.admit("a").await);
        assert!(store.admit("b").await);
        assert!(store.admit("c").await);
        assert!(store.admit("d").await);
        // "a" was evicted, so it is fresh again; "d" is live.
        assert!(store.admit("a").await);
        assert!(!store.admit("d").await);
    }

    #[tokio::test]
    async fn sweep_reclaims_expired_entries() {
        let store = DedupStore::new(Duration::from_millis(20), 100);
        assert!(store.admit("m1").await);
        assert!(store.admit("m2").await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.sweep().await;
        assert!(store.is_empty().await);
    }

    #[test]
    fn key_prefers_platform_message_id() {
        let msg = text_message(Some("msg-42"), "u1", "hello");
        assert_eq!(dedup_key(&msg), "msg-42");
    }

    #[test]
    fn fingerprint_distinguishes_senders_with_identical_text() {
        let a = dedup_key(&text_message(None, "u1", "hello"));
        let b = dedup_key(&text_message(None, "u2", "hello"));
        assert_ne!(a, b);
        // Same sender + text is stable.
        assert_eq!(a, dedup_key(&text_message(None, "u1", "hello")));
    }
}
