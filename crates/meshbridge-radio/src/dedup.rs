//! Broadcast loop suppression
//!
//! A broadcast we emit is heard again by our own radios (directly, or
//! relayed by the mesh) and would be dispatched as a fresh channel message.
//! Every emission records a hash of its normalized text; an inbound
//! broadcast whose text matches a live emission is suppressed, consuming that
//! emission. Emitting the same text twice therefore suppresses two echoes,
//! not more.
//!
//! Entries older than the window are dropped lazily on each check. The table
//! is bounded by an LRU capacity on distinct texts.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use meshbridge_core::NetworkId;

use crate::config::DedupConfig;

/// 64-bit content hash of normalized text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(u64);

impl ContentHash {
    /// Hash text after trimming and collapsing runs of whitespace
    pub fn of(text: &str) -> Self {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let digest = Sha256::digest(normalized.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(head))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Dedup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Emissions recorded
    pub recorded: u64,
    /// Inbound broadcasts checked
    pub checked: u64,
    /// Inbound broadcasts suppressed
    pub suppressed: u64,
    /// Emissions dropped after the window passed unmatched
    pub expired: u64,
}

struct Table {
    /// hash -> send instants, oldest first
    entries: LruCache<ContentHash, VecDeque<Instant>>,
    stats: DedupStats,
}

/// Suppresses echoes of our own broadcasts
pub struct BroadcastDedup {
    table: Mutex<Table>,
    window: Duration,
}

impl BroadcastDedup {
    /// Create with an explicit window and capacity
    pub fn new(window: Duration, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            table: Mutex::new(Table {
                entries: LruCache::new(cap),
                stats: DedupStats::default(),
            }),
            window,
        }
    }

    /// Create from configuration
    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.window, config.capacity)
    }

    /// Suppression window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a broadcast we are about to emit
    pub fn record(&self, network: NetworkId, text: &str) {
        self.record_at(network, text, Instant::now());
    }

    fn record_at(&self, network: NetworkId, text: &str, now: Instant) {
        let hash = ContentHash::of(text);
        let mut table = self.table.lock();
        table.stats.recorded += 1;
        if let Some(sent) = table.entries.get_mut(&hash) {
            sent.push_back(now);
        } else {
            table.entries.put(hash, VecDeque::from([now]));
        }
        trace!(network = %network, hash = %hash, "Recorded broadcast emission");
    }

    /// Whether an inbound broadcast is an echo of a live emission.
    ///
    /// A `true` result consumes the matched emission.
    pub fn should_suppress(&self, network: NetworkId, text: &str) -> bool {
        self.should_suppress_at(network, text, Instant::now())
    }

    fn should_suppress_at(&self, network: NetworkId, text: &str, now: Instant) -> bool {
        let hash = ContentHash::of(text);
        let window = self.window;
        let mut table = self.table.lock();
        table.stats.checked += 1;

        let Some(sent) = table.entries.get_mut(&hash) else {
            return false;
        };
        let before = sent.len();
        while sent
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) > window)
        {
            sent.pop_front();
        }
        let expired = (before - sent.len()) as u64;
        let hit = sent.pop_front().is_some();
        let drained = sent.is_empty();

        if drained {
            table.entries.pop(&hash);
        }
        table.stats.expired += expired;
        if hit {
            table.stats.suppressed += 1;
            debug!(network = %network, hash = %hash, "Suppressed echo of own broadcast");
        }
        hit
    }

    /// Distinct texts currently tracked
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters
    pub fn stats(&self) -> DedupStats {
        self.table.lock().stats
    }
}

impl Default for BroadcastDedup {
    fn default() -> Self {
        Self::from_config(&DedupConfig::default())
    }
}

impl std::fmt::Debug for BroadcastDedup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastDedup")
            .field("window", &self.window)
            .field("tracked", &self.len())
            .finish()
    }
}
