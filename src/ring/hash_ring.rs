//! In-memory consistent-hash ring

use super::token::{generate_tokens, shuffle_shard_seed};
use super::{InstanceDesc, InstanceState, Operation, ReadRing, ReplicationSet, RingConfig};
use crate::clock::Clock;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Serialized ring membership, as loaded from a descriptor file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingDesc {
    #[serde(default)]
    pub config: RingConfig,
    pub instances: Vec<InstanceDesc>,
}

#[derive(Debug, Default)]
struct RingState {
    instances: HashMap<String, InstanceDesc>,
    /// token -> instance id
    tokens: BTreeMap<u32, String>,
}

impl RingState {
    fn insert(&mut self, mut desc: InstanceDesc, num_tokens: usize) {
        self.remove(&desc.id);
        if desc.tokens.is_empty() {
            desc.tokens = generate_tokens(&desc.id, num_tokens);
        }
        for token in &desc.tokens {
            // First owner keeps a contested token.
            self.tokens.entry(*token).or_insert_with(|| desc.id.clone());
        }
        self.instances.insert(desc.id.clone(), desc);
    }

    fn remove(&mut self, id: &str) -> Option<InstanceDesc> {
        let removed = self.instances.remove(id)?;
        self.tokens.retain(|_, owner| owner != id);
        Some(removed)
    }

    /// Token owners walking clockwise from `key`, wrapping once.
    fn walk(&self, key: u32) -> impl Iterator<Item = &String> {
        self.tokens
            .range(key..)
            .chain(self.tokens.range(..key))
            .map(|(_, id)| id)
    }
}

/// Consistent-hash ring over ingester instances
pub struct HashRing {
    config: RingConfig,
    state: RwLock<RingState>,
    clock: Arc<dyn Clock>,
}

impl HashRing {
    pub fn new(config: RingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            state: RwLock::new(RingState::default()),
            clock,
        }
    }

    pub fn from_desc(desc: RingDesc, clock: Arc<dyn Clock>) -> Self {
        let ring = Self::new(desc.config, clock);
        {
            let mut state = ring.state.write();
            for inst in desc.instances {
                state.insert(inst, ring.config.num_tokens);
            }
        }
        ring
    }

    /// Load a ring descriptor from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let desc: RingDesc = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("invalid ring descriptor {}: {}", path.display(), e))
        })?;
        if desc.config.replication_factor == 0 {
            return Err(Error::Config(
                "replication_factor must be at least 1".to_string(),
            ));
        }
        info!(
            path = %path.display(),
            instances = desc.instances.len(),
            replication_factor = desc.config.replication_factor,
            "Loaded ring descriptor"
        );
        Ok(Self::from_desc(desc, clock))
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Add or replace an instance.
    pub fn register(&self, desc: InstanceDesc) {
        info!(instance = %desc.id, addr = %desc.addr, state = ?desc.state, "Registering ring instance");
        self.state.write().insert(desc, self.config.num_tokens);
    }

    pub fn unregister(&self, id: &str) -> Option<InstanceDesc> {
        let removed = self.state.write().remove(id);
        if removed.is_some() {
            info!(instance = %id, "Removed ring instance");
        }
        removed
    }

    /// Refresh an instance's heartbeat. Returns false for unknown instances.
    pub fn heartbeat(&self, id: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.write();
        match state.instances.get_mut(id) {
            Some(inst) => {
                inst.heartbeat_at = now;
                true
            }
            None => {
                warn!(instance = %id, "Heartbeat from unknown ring instance");
                false
            }
        }
    }

    pub fn set_state(&self, id: &str, new_state: InstanceState) -> bool {
        let mut state = self.state.write();
        match state.instances.get_mut(id) {
            Some(inst) => {
                debug!(instance = %id, from = ?inst.state, to = ?new_state, "Instance state change");
                inst.state = new_state;
                true
            }
            None => false,
        }
    }

    pub fn instance(&self, id: &str) -> Option<InstanceDesc> {
        self.state.read().instances.get(id).cloned()
    }

    /// Snapshot of all instances, sorted by id.
    pub fn instances(&self) -> Vec<InstanceDesc> {
        let mut out: Vec<_> = self.state.read().instances.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn subring(&self, instances: Vec<InstanceDesc>) -> Self {
        Self::from_desc(
            RingDesc {
                config: self.config.clone(),
                instances,
            },
            self.clock.clone(),
        )
    }
}

impl ReadRing for HashRing {
    fn replication_set_for_operation(&self, op: Operation) -> Result<ReplicationSet> {
        let now = self.clock.now();
        let state = self.state.read();
        if state.instances.is_empty() {
            return Err(Error::Ring("empty ring".to_string()));
        }

        let total = state.instances.len();
        let max_unavailable = self.config.replication_factor / 2;
        let required = total.max(self.config.replication_factor) - max_unavailable;

        let mut healthy: Vec<InstanceDesc> = state
            .instances
            .values()
            .filter(|inst| inst.is_healthy(op, self.config.heartbeat_timeout, now))
            .cloned()
            .collect();
        healthy.sort_by(|a, b| a.id.cmp(&b.id));

        if healthy.len() < required {
            return Err(Error::Ring(format!(
                "too many unhealthy instances in the ring: {} healthy, {} required",
                healthy.len(),
                required
            )));
        }

        let max_errors = healthy.len() - required;
        Ok(ReplicationSet::new(healthy, max_errors))
    }

    fn get(&self, key: u32, op: Operation) -> Result<ReplicationSet> {
        let now = self.clock.now();
        let state = self.state.read();
        if state.tokens.is_empty() {
            return Err(Error::Ring("empty ring".to_string()));
        }

        let mut wanted = self.config.replication_factor.min(state.instances.len());
        let mut seen = HashSet::new();
        let mut selected = Vec::with_capacity(wanted);
        for id in state.walk(key) {
            if selected.len() >= wanted {
                break;
            }
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(inst) = state.instances.get(id) else {
                continue;
            };
            if op.extends_replica_set(inst.state) && wanted < state.instances.len() {
                wanted += 1;
            }
            selected.push(inst);
        }

        let replication_factor = self.config.replication_factor.max(selected.len());
        let min_success = replication_factor / 2 + 1;

        let healthy: Vec<InstanceDesc> = selected
            .into_iter()
            .filter(|inst| inst.is_healthy(op, self.config.heartbeat_timeout, now))
            .cloned()
            .collect();

        if healthy.len() < min_success {
            return Err(Error::Ring(format!(
                "at least {} live replicas required, could only find {}",
                min_success,
                healthy.len()
            )));
        }

        let max_errors = healthy.len() - min_success;
        Ok(ReplicationSet::new(healthy, max_errors))
    }

    fn shuffle_shard_with_lookback(
        &self,
        identifier: &str,
        size: usize,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> Arc<dyn ReadRing> {
        let state = self.state.read();
        if size == 0 || size >= state.instances.len() {
            let all = state.instances.values().cloned().collect();
            return Arc::new(self.subring(all));
        }

        let lookback_until = chrono::Duration::from_std(lookback)
            .ok()
            .filter(|d| !d.is_zero())
            .map(|d| now - d);

        let tokens: Vec<(u32, &String)> = state.tokens.iter().map(|(t, id)| (*t, id)).collect();
        let mut rng = StdRng::seed_from_u64(shuffle_shard_seed(identifier));
        let mut shard: BTreeMap<&str, &InstanceDesc> = BTreeMap::new();

        for _ in 0..size {
            let from = rng.gen::<u32>();
            let start = tokens.partition_point(|(t, _)| *t < from);
            let mut found = false;
            for i in 0..tokens.len() {
                let id = tokens[(start + i) % tokens.len()].1;
                if shard.contains_key(id.as_str()) {
                    continue;
                }
                let Some(inst) = state.instances.get(id) else {
                    continue;
                };
                shard.insert(id.as_str(), inst);

                // Recently registered instances may have taken over data
                // from one we would otherwise have picked; keep looking.
                if lookback_until.is_some_and(|until| inst.registered_at >= until) {
                    continue;
                }
                found = true;
                break;
            }
            if !found {
                break;
            }
        }

        debug!(
            identifier,
            size,
            selected = shard.len(),
            "Built shuffle shard"
        );
        let instances = shard.into_values().cloned().collect();
        Arc::new(self.subring(instances))
    }

    fn replication_factor(&self) -> usize {
        self.config.replication_factor
    }

    fn instances_count(&self) -> usize {
        self.state.read().instances.len()
    }
}
