//! Directed trust ledger.
//!
//! Stores the score each local DID assigns to each peer DID, clamped to
//! [0.0, 1.0]. Last-writer-wins, no history. Absent edges read 0; `seed`
//! installs the neutral 0.5 starting point when a peer is first met.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::constants::TRUST_SEED;

/// Concurrency-safe map of `(from_did, to_did) → score`.
#[derive(Debug, Default)]
pub struct TrustLedger {
    scores: RwLock<HashMap<(String, String), f32>>,
}

impl TrustLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the trust score that `from` assigns to `to`.
    pub fn set(&self, from: &str, to: &str, score: f32) {
        let mut scores = self.scores.write().expect("trust ledger lock poisoned");
        scores.insert((from.to_string(), to.to_string()), clamp(score));
    }

    /// The trust score that `from` has assigned to `to`, or 0 if unset.
    pub fn get(&self, from: &str, to: &str) -> f32 {
        let scores = self.scores.read().expect("trust ledger lock poisoned");
        scores.get(&(from.to_string(), to.to_string())).copied().unwrap_or(0.0)
    }

    /// Add `delta` to the existing score, clamped to [0, 1].
    pub fn apply(&self, from: &str, to: &str, delta: f32) {
        let mut scores = self.scores.write().expect("trust ledger lock poisoned");
        let entry = scores.entry((from.to_string(), to.to_string())).or_insert(0.0);
        *entry = clamp(*entry + delta);
    }

    /// Install the neutral starting score for a previously unseen edge.
    /// An existing score is left untouched.
    pub fn seed(&self, from: &str, to: &str) {
        let mut scores = self.scores.write().expect("trust ledger lock poisoned");
        scores.entry((from.to_string(), to.to_string())).or_insert(TRUST_SEED);
    }

    /// Number of edges currently tracked.
    pub fn len(&self) -> usize {
        self.scores.read().expect("trust ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn clamp(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_edge_reads_zero() {
        let t = TrustLedger::new();
        assert_eq!(t.get("did:synapse:a", "did:synapse:b"), 0.0);
    }

    #[test]
    fn set_get_apply() {
        let t = TrustLedger::new();
        t.set("a", "b", 0.6);
        assert_eq!(t.get("a", "b"), 0.6);
        // Directed: the reverse edge is independent.
        assert_eq!(t.get("b", "a"), 0.0);

        t.apply("a", "b", -0.1);
        assert!((t.get("a", "b") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn scores_clamp_to_unit_interval() {
        let t = TrustLedger::new();
        t.set("a", "b", 7.5);
        assert_eq!(t.get("a", "b"), 1.0);
        t.set("a", "b", -3.0);
        assert_eq!(t.get("a", "b"), 0.0);

        for _ in 0..100 {
            t.apply("a", "b", 0.2);
        }
        assert_eq!(t.get("a", "b"), 1.0);
        for _ in 0..100 {
            t.apply("a", "b", -0.3);
        }
        assert_eq!(t.get("a", "b"), 0.0);
    }

    #[test]
    fn seed_installs_neutral_score_once() {
        let t = TrustLedger::new();
        t.seed("a", "b");
        assert_eq!(t.get("a", "b"), 0.5);

        t.apply("a", "b", 0.05);
        t.seed("a", "b"); // must not reset
        assert!((t.get("a", "b") - 0.55).abs() < 1e-6);
    }
}
