//! Hash ring of ingester instances
//!
//! The ring decides which instances own a key and which instances are
//! currently able to serve a read. Queries never talk to the ring's
//! membership backend directly; they go through the [`ReadRing`] trait so
//! that subrings produced by shuffle sharding behave like the full ring.

mod hash_ring;
mod replication_set;
pub mod token;

pub use hash_ring::{HashRing, RingDesc};
pub use replication_set::ReplicationSet;

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What the caller intends to do with the selected instances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    /// States whose instances may serve this operation
    pub fn is_healthy_state(&self, state: InstanceState) -> bool {
        match self {
            Operation::Read => matches!(
                state,
                InstanceState::Active | InstanceState::Pending | InstanceState::Leaving
            ),
            Operation::Write => state == InstanceState::Active,
        }
    }

    /// Whether an instance in `state` makes the lookup take one more
    /// instance from the ring to compensate.
    pub fn extends_replica_set(&self, state: InstanceState) -> bool {
        match self {
            Operation::Read => false,
            Operation::Write => state != InstanceState::Active,
        }
    }
}

/// Lifecycle state of a ring member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Active,
    Joining,
    Pending,
    Leaving,
}

/// One ingester as seen by the ring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDesc {
    pub id: String,
    /// gRPC address the client pool dials
    pub addr: String,
    #[serde(default)]
    pub zone: String,
    pub state: InstanceState,
    /// Ring tokens; generated from the id when empty
    #[serde(default)]
    pub tokens: Vec<u32>,
    pub registered_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

impl InstanceDesc {
    pub fn new(id: impl Into<String>, addr: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
            zone: String::new(),
            state: InstanceState::Active,
            tokens: Vec::new(),
            registered_at: now,
            heartbeat_at: now,
        }
    }

    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    pub fn with_tokens(mut self, tokens: Vec<u32>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_registered_at(mut self, at: DateTime<Utc>) -> Self {
        self.registered_at = at;
        self
    }

    /// Fresh heartbeat and a state that can serve `op`. A zero timeout
    /// disables the heartbeat check.
    pub fn is_healthy(&self, op: Operation, heartbeat_timeout: Duration, now: DateTime<Utc>) -> bool {
        if !op.is_healthy_state(self.state) {
            return false;
        }
        if heartbeat_timeout.is_zero() {
            return true;
        }
        match chrono::Duration::from_std(heartbeat_timeout) {
            Ok(timeout) => now - self.heartbeat_at <= timeout,
            Err(_) => true,
        }
    }
}

/// Ring settings shared by a ring and its subrings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub replication_factor: usize,
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,
    /// Tokens generated for instances registered without any
    pub num_tokens: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            heartbeat_timeout: Duration::from_secs(60),
            num_tokens: 128,
        }
    }
}

/// Read side of a ring
pub trait ReadRing: Send + Sync {
    /// Every instance that can serve `op`, with the failure tolerance of
    /// the whole ring.
    fn replication_set_for_operation(&self, op: Operation) -> Result<ReplicationSet>;

    /// Instances owning `key`.
    fn get(&self, key: u32, op: Operation) -> Result<ReplicationSet>;

    /// Stable per-identifier subset of `size` instances. Instances that
    /// joined within `lookback` of `now` are added on top, since data for
    /// the identifier may still live on the instances they displaced.
    fn shuffle_shard_with_lookback(
        &self,
        identifier: &str,
        size: usize,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> Arc<dyn ReadRing>;

    fn replication_factor(&self) -> usize;

    fn instances_count(&self) -> usize;
}
