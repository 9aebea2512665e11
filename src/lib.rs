//! # ringquery
//!
//! The read path of a horizontally sharded, replicated time-series store.
//!
//! A [`distributor::Distributor`] takes one logical query, picks the set of
//! ingester replicas that may hold the tenant's series from the hash
//! [`ring`], asks all of them concurrently and merges their overlapping
//! answers into a single deduplicated result.
//!
//! ## Pieces
//!
//! - **Ring**: instance health, token ownership, shuffle sharding and the
//!   quorum-aware fan-out in [`ring::ReplicationSet::do_with`]
//! - **Merge**: sample, exemplar and streamed chunk reconciliation across
//!   replicas
//! - **Limits**: per-query series, chunk and byte limits enforced while
//!   replica streams are still being received
//! - **Clients**: gRPC ingester clients pooled per address

pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod distributor;
pub mod limiter;
pub mod model;
pub mod ring;
pub mod stats;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::client::{ClientPool, IngesterClient, IngesterClientPool, QueryStream};
    pub use crate::config::{DistributorConfig, ShardingStrategy, TenantLimits, TenantLimitsConfig};
    pub use crate::context::QueryContext;
    pub use crate::distributor::Distributor;
    pub use crate::limiter::{QueryLimiter, QueryLimits};
    pub use crate::model::{parse_selector, Label, Matcher, Matrix, SeriesKey};
    pub use crate::ring::{HashRing, InstanceDesc, InstanceState, ReadRing, RingConfig};
    pub use crate::{Error, Result};
}
