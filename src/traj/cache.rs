//! Plan cache keyed by the numeric content of (reward, start states).
//!
//! Keys hold the exact bit pattern of every entry after two normalisations:
//! `-0.0` maps to `0.0` and every NaN maps to one canonical NaN. Values that
//! differ numerically stay distinct keys.

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayView2};

/// Normalised numeric content of a (reward, start-state) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlanKey(Vec<u64>);

impl PlanKey {
    pub fn new(reward: ArrayView1<f64>, start_states: ArrayView2<f64>) -> Self {
        let mut bits = Vec::with_capacity(3 + reward.len() + start_states.len());
        // Shape prefix so differently split inputs never collide.
        bits.push(reward.len() as u64);
        bits.push(start_states.nrows() as u64);
        bits.push(start_states.ncols() as u64);
        bits.extend(reward.iter().map(|&v| canonical_bits(v)));
        bits.extend(start_states.iter().map(|&v| canonical_bits(v)));
        Self(bits)
    }
}

fn canonical_bits(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

/// How the cache bounds its size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Never evict.
    #[default]
    Unbounded,

    /// Keep at most `capacity` entries, evicting the least recently used.
    Lru { capacity: usize },
}

/// Cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    plan: Array2<f64>,
    loss: f64,
    last_access: u64,
}

/// Memoised optimisation results.
pub struct PlanCache {
    policy: EvictionPolicy,
    entries: HashMap<PlanKey, CacheEntry>,
    access_counter: u64,
    pub stats: CacheStats,
}

impl PlanCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            access_counter: 0,
            stats: CacheStats::default(),
        }
    }

    /// Look up a plan, counting the hit or miss.
    pub fn get(&mut self, key: &PlanKey) -> Option<(Array2<f64>, f64)> {
        self.access_counter += 1;
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.stats.hits += 1;
                entry.last_access = self.access_counter;
                Some((entry.plan.clone(), entry.loss))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: PlanKey, plan: Array2<f64>, loss: f64) {
        self.access_counter += 1;
        if let EvictionPolicy::Lru { capacity } = self.policy {
            if capacity == 0 {
                return;
            }
            while self.entries.len() >= capacity && !self.entries.contains_key(&key) {
                self.evict_lru();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                plan,
                loss,
                last_access: self.access_counter,
            },
        );
        self.stats.inserts += 1;
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }

    pub fn contains(&self, key: &PlanKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
