//! # Meridian Caches
//!
//! The two DNS-plane caches and the invalidation contract between the
//! control plane and the DNS pipeline:
//!
//! - [`ResponseCache`]: bounded TTL map from query key to a precomposed
//!   response message. Messages are stored and returned by value, so a
//!   cached entry can never be mutated by a reader.
//! - [`ZoneCache`]: snapshot of the zone-name list used for suffix
//!   matching, with a soft expiry and explicit invalidation.
//! - [`ZoneEvents`]: a broadcast "zones changed" event. The control plane
//!   publishes after every committed mutation; the DNS side subscribes
//!   and clears both caches.

use meridian_proto::Message;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// TTL applied to cached negative responses.
pub const NEGATIVE_TTL: Duration = Duration::from_secs(300);

/// Soft expiry of the zone-list snapshot.
pub const ZONE_SNAPSHOT_TTL: Duration = Duration::from_secs(300);

/// Builds the response-cache key: `<qname>|<qtype>|<client-scope>`.
/// The qname is lowercased; the scope is empty without a client IP.
pub fn response_key(qname: &str, qtype: u16, client_ip: Option<IpAddr>) -> String {
    let scope = client_ip.map(|ip| ip.to_string()).unwrap_or_default();
    format!("{}|{}|{}", qname.to_ascii_lowercase(), qtype, scope)
}

struct CacheEntry {
    message: Message,
    expires_at: Instant,
}

/// Bounded TTL cache of precomposed response messages.
///
/// Capacity 0 disables the cache entirely. When full, the oldest entry by
/// insertion order is evicted.
pub struct ResponseCache {
    capacity: usize,
    inner: Mutex<ResponseCacheInner>,
}

#[derive(Default)]
struct ResponseCacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl ResponseCache {
    /// Creates a cache bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(ResponseCacheInner::default()),
        }
    }

    /// Returns a copy of the cached message when present and unexpired.
    pub fn get(&self, key: &str) -> Option<Message> {
        if self.capacity == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.message.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores a copy of `message` under `key` for `ttl`.
    pub fn set(&self, key: &str, message: &Message, ttl: Duration) {
        if self.capacity == 0 || ttl.is_zero() {
            return;
        }
        let mut inner = self.inner.lock();

        while inner.entries.len() >= self.capacity && !inner.entries.contains_key(key) {
            // The order queue may hold keys already replaced or expired;
            // pop until one actually leaves the map.
            match inner.order.pop_front() {
                Some(old) => {
                    inner.entries.remove(&old);
                }
                None => break,
            }
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                message: message.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        inner.order.push_back(key.to_string());
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of live entries (expired ones may still be counted until
    /// touched).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One zone known to the suffix matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneEntry {
    /// Store id of the zone.
    pub id: i64,
    /// Normalized zone name (lowercase, trailing dot).
    pub name: String,
}

/// Snapshot cache of the zone-name list, ordered longest name first so a
/// linear scan finds the most specific suffix.
pub struct ZoneCache {
    ttl: Duration,
    snapshot: RwLock<Option<(Vec<ZoneEntry>, Instant)>>,
}

impl ZoneCache {
    /// Creates a zone cache with the given soft expiry.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            snapshot: RwLock::new(None),
        }
    }

    /// Returns the snapshot, or `None` when absent or expired.
    pub fn get(&self) -> Option<Vec<ZoneEntry>> {
        let guard = self.snapshot.read();
        match &*guard {
            Some((zones, loaded_at)) if loaded_at.elapsed() < self.ttl => Some(zones.clone()),
            _ => None,
        }
    }

    /// Installs a new snapshot and resets the expiry timer.
    pub fn set(&self, zones: Vec<ZoneEntry>) {
        *self.snapshot.write() = Some((zones, Instant::now()));
    }

    /// Drops the snapshot; the next `get` misses.
    pub fn invalidate(&self) {
        *self.snapshot.write() = None;
    }
}

impl Default for ZoneCache {
    fn default() -> Self {
        Self::new(ZONE_SNAPSHOT_TTL)
    }
}

/// The zones-changed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneEvent {
    /// The stored zone graph changed in some way.
    Changed,
}

/// Publish/subscribe contract between the control plane and the DNS
/// pipeline. Publishing never blocks; with no subscriber the event is
/// dropped, which is fine because a subscriber appears before serving.
#[derive(Clone)]
pub struct ZoneEvents {
    tx: broadcast::Sender<ZoneEvent>,
}

impl ZoneEvents {
    /// Creates the event channel.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Announces that the stored zone graph changed.
    pub fn publish(&self) {
        let _ = self.tx.send(ZoneEvent::Changed);
    }

    /// Subscribes to zone-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ZoneEvent> {
        self.tx.subscribe()
    }
}

impl Default for ZoneEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the DNS-plane subscriber: every zones-changed event drops the
/// zone snapshot and wipes the response cache, so the next query reloads
/// committed state. A lagged receiver clears as well, which is always
/// safe.
pub fn spawn_invalidation_listener(
    zone_cache: std::sync::Arc<ZoneCache>,
    response_cache: std::sync::Arc<ResponseCache>,
    mut rx: broadcast::Receiver<ZoneEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ZoneEvent::Changed) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    zone_cache.invalidate();
                    response_cache.clear();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
