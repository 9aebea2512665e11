//! Token hashing for ring placement

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;
const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Continue an FNV-1a 32-bit hash with more bytes.
pub fn hash_add32(mut h: u32, s: &str) -> u32 {
    for b in s.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(FNV32_PRIME);
    }
    h
}

pub fn fnv32a(s: &str) -> u32 {
    hash_add32(FNV32_OFFSET, s)
}

pub fn fnv64a(s: &str) -> u64 {
    s.bytes().fold(FNV64_OFFSET, |h, b| {
        (h ^ b as u64).wrapping_mul(FNV64_PRIME)
    })
}

/// Ring key for everything a tenant owns.
pub fn shard_by_user(tenant: &str) -> u32 {
    fnv32a(tenant)
}

/// Ring key for one metric of a tenant, used when writes are sharded by
/// metric name only.
pub fn shard_by_metric_name(tenant: &str, metric_name: &str) -> u32 {
    hash_add32(shard_by_user(tenant), metric_name)
}

/// Seed for the shuffle-shard RNG of an identifier.
pub fn shuffle_shard_seed(identifier: &str) -> u64 {
    fnv64a(identifier)
}

/// `count` distinct tokens for an instance, sorted ascending. The same
/// instance id always yields the same tokens.
pub fn generate_tokens(instance_id: &str, count: usize) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(fnv64a(instance_id));
    let mut tokens = BTreeSet::new();
    while tokens.len() < count {
        tokens.insert(rng.gen::<u32>());
    }
    tokens.into_iter().collect()
}
