//! Capability discovery registry.
//!
//! Peers announce their capabilities via [`CapabilityAnnouncement`] messages;
//! the registry indexes the resulting profiles by agent id with TTL-based
//! expiry. Reads never return an expired entry, even before the background
//! sweep has removed it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::did::Agent;
use crate::message::{now_nanos, CapabilityAnnouncement};
use crate::negotiation::AgentProfile;

/// Concurrency-safe profile index keyed by agent id.
#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    profile: AgentProfile,
    /// `None` means the entry never expires.
    expires_at: Option<Instant>,
}

impl RegistryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh an agent's profile. `ttl_seconds <= 0` means the
    /// entry never expires.
    pub fn announce(&self, profile: AgentProfile, ttl_seconds: i64) {
        let expires_at = (ttl_seconds > 0)
            .then(|| Instant::now() + Duration::from_secs(ttl_seconds as u64));
        self.insert(profile, expires_at);
    }

    /// Register the agent described by a received announcement.
    pub fn announce_from_message(&self, msg: &CapabilityAnnouncement) {
        self.announce(
            AgentProfile {
                agent_id: msg.agent_id.clone(),
                did: msg.did.clone(),
                capabilities: msg.capabilities.clone(),
                ..Default::default()
            },
            msg.ttl,
        );
    }

    fn insert(&self, profile: AgentProfile, expires_at: Option<Instant>) {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.insert(profile.agent_id.clone(), RegistryEntry { profile, expires_at });
    }

    /// Delete an agent's entry.
    pub fn remove(&self, agent_id: &str) {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.remove(agent_id);
    }

    /// All live agents declaring every one of the required capability tags.
    pub fn find_by_capability<S: AsRef<str>>(&self, required: &[S]) -> Vec<AgentProfile> {
        let now = Instant::now();
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .values()
            .filter(|e| !e.is_expired(now))
            .filter(|e| {
                required.iter().all(|r| {
                    e.profile.capabilities.iter().any(|c| c == r.as_ref())
                })
            })
            .map(|e| e.profile.clone())
            .collect()
    }

    /// The live profile registered under the given DID, if any.
    pub fn find_by_did(&self, did: &str) -> Option<AgentProfile> {
        let now = Instant::now();
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .values()
            .find(|e| !e.is_expired(now) && e.profile.did == did)
            .map(|e| e.profile.clone())
    }

    /// Snapshot of all live profiles.
    pub fn all(&self) -> Vec<AgentProfile> {
        let now = Instant::now();
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.values().filter(|e| !e.is_expired(now)).map(|e| e.profile.clone()).collect()
    }

    /// Purge expired entries, returning how many were removed.
    pub fn evict(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Spawn a background task that sweeps expired entries every `interval`
    /// until `cancel` fires (or its sender is dropped).
    pub fn start_eviction_loop(
        self: &Arc<Self>,
        interval: Duration,
        mut cancel: oneshot::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.evict();
                        if evicted > 0 {
                            tracing::debug!(evicted, "discovery registry sweep");
                        }
                    }
                    _ = &mut cancel => return,
                }
            }
        })
    }
}

/// Build a capability announcement for the given agent.
pub fn build_announcement(agent: &Agent, ttl_seconds: i64) -> CapabilityAnnouncement {
    CapabilityAnnouncement {
        agent_id: agent.id.clone(),
        did: agent.did.to_string(),
        capabilities: agent.capabilities.clone(),
        timestamp: now_nanos(),
        ttl: ttl_seconds,
    }
}
