//! Bounded in-memory rendezvous registry
//!
//! Holds at most `max_entries` published entries. Publishing into a full table
//! evicts the entry with the oldest creation time; a background sweeper drops
//! entries that have not been looked up within the stale timeout.
//!
//! All access goes through a single reader/writer lock over the whole table.
//! Lookups take the write side because they refresh `last_seen`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use sneak_core::{Entry, EntryId, PeerAddress, RegistryConfig, MAX_SWEEP_INTERVAL_SECS};

/// Capacity of the change-event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Why an entry left the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    /// Removed by id on request
    Explicit,
    /// Dropped to make room for a new entry
    Evicted,
    /// Not looked up within the stale timeout
    Stale,
}

/// Change notifications for real-time subscribers
#[derive(Clone, Debug)]
pub enum RegistryEvent {
    Published(Entry),
    Removed { id: EntryId, reason: RemovalReason },
}

/// Internal record; never handed out directly
struct Record {
    entry: Entry,
    /// Insertion order, breaks `created` ties
    seq: u64,
    created: Instant,
    last_seen: Instant,
}

impl Record {
    fn age_key(&self) -> (Instant, u64) {
        (self.created, self.seq)
    }
}

#[derive(Default)]
struct Table {
    records: BTreeMap<EntryId, Record>,
    next_seq: u64,
}

impl Table {
    /// Remove the entry with the oldest creation time
    fn evict_oldest(&mut self) -> Option<Entry> {
        let oldest = self
            .records
            .iter()
            .min_by_key(|(_, r)| r.age_key())
            .map(|(id, _)| id.clone())?;

        self.records.remove(&oldest).map(|r| r.entry)
    }
}

/// The rendezvous registry
pub struct Registry {
    table: RwLock<Table>,
    config: RegistryConfig,
    event_tx: broadcast::Sender<RegistryEvent>,
    stop_tx: watch::Sender<bool>,
}

impl Registry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, _) = watch::channel(false);

        Self {
            table: RwLock::new(Table::default()),
            config,
            event_tx,
            stop_tx,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Number of live event subscribers
    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }

    /// Publish a new entry and return its id
    ///
    /// If the table is full, the entry with the oldest creation time is
    /// evicted first. Recent lookups do not protect an entry from eviction.
    pub fn publish(&self, hash: impl Into<String>, address: PeerAddress) -> EntryId {
        let hash = hash.into();

        let (entry, evicted) = {
            let mut table = self.table.write();

            let mut id = EntryId::generate();
            while table.records.contains_key(&id) {
                id = EntryId::generate();
            }

            let evicted = if table.records.len() >= self.config.max_entries {
                table.evict_oldest()
            } else {
                None
            };

            // Timestamps are taken under the lock so creation order matches `seq`
            let now = Instant::now();
            let wall = Utc::now();
            let entry = Entry {
                id: id.clone(),
                hash,
                address,
                created_at: wall,
                last_seen: wall,
            };

            let seq = table.next_seq;
            table.next_seq += 1;
            table.records.insert(
                id,
                Record {
                    entry: entry.clone(),
                    seq,
                    created: now,
                    last_seen: now,
                },
            );

            (entry, evicted)
        };

        if let Some(old) = evicted {
            debug!("Evicted oldest entry: {} ({})", old.id, old.hash);
            self.notify(RegistryEvent::Removed {
                id: old.id,
                reason: RemovalReason::Evicted,
            });
        }

        info!(
            "Added entry {}: {} -> {}",
            entry.id, entry.hash, entry.address
        );
        let id = entry.id.clone();
        self.notify(RegistryEvent::Published(entry));
        id
    }

    /// Find an entry by hash and refresh its `last_seen`
    ///
    /// When several entries share the hash, the most recently published one
    /// is returned.
    pub fn lookup(&self, hash: &str) -> Option<Entry> {
        let mut table = self.table.write();

        let record = table
            .records
            .values_mut()
            .filter(|r| r.entry.hash == hash)
            .max_by_key(|r| r.age_key())?;

        record.last_seen = record.last_seen.max(Instant::now());
        record.entry.last_seen = record.entry.last_seen.max(Utc::now());

        Some(record.entry.clone())
    }

    /// Snapshot of all entries, oldest first
    pub fn list(&self) -> Vec<Entry> {
        let table = self.table.read();

        let mut records: Vec<&Record> = table.records.values().collect();
        records.sort_by_key(|r| r.age_key());
        records.into_iter().map(|r| r.entry.clone()).collect()
    }

    /// Remove an entry by id, returning whether it existed
    pub fn remove(&self, id: &EntryId) -> bool {
        let removed = self.table.write().records.remove(id).is_some();

        if removed {
            info!("Removed entry: {}", id);
            self.notify(RegistryEvent::Removed {
                id: id.clone(),
                reason: RemovalReason::Explicit,
            });
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.table.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().records.is_empty()
    }

    /// Drop every entry not looked up within the stale timeout
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.config.stale_timeout()) else {
            return 0;
        };

        let mut stale = Vec::new();
        self.table.write().records.retain(|id, r| {
            if r.last_seen < cutoff {
                stale.push(id.clone());
                false
            } else {
                true
            }
        });

        for id in &stale {
            debug!("Cleaned up stale entry: {}", id);
            self.notify(RegistryEvent::Removed {
                id: id.clone(),
                reason: RemovalReason::Stale,
            });
        }

        if !stale.is_empty() {
            info!("Swept {} stale entries", stale.len());
        }
        stale.len()
    }

    /// Run the periodic sweep until [`Registry::stop`] is called
    pub async fn run_sweeper(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow() {
            return;
        }

        // interval_at panics on a zero period; the start instant must not overflow
        let period = self
            .config
            .sweep_interval()
            .clamp(Duration::from_secs(1), Duration::from_secs(MAX_SWEEP_INTERVAL_SECS));
        let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut tick = interval_at(start, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("Sweeper started (every {:?})", period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sweep();
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Sweeper stopped");
    }

    /// Spawn [`Registry::run_sweeper`] on the current runtime
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.run_sweeper().await })
    }

    /// Signal the sweeper to exit. Safe to call more than once.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn notify(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_entries: usize) -> RegistryConfig {
        RegistryConfig {
            max_entries,
            sweep_interval_secs: 30,
            stale_timeout_secs: 300,
        }
    }

    fn addr(ip: &str) -> PeerAddress {
        PeerAddress::new(ip, 9)
    }

    fn ids(registry: &Registry) -> Vec<EntryId> {
        registry.list().into_iter().map(|e| e.id).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_within_capacity() {
        let registry = Registry::new(config(2));

        let id1 = registry.publish("a", addr("1.2.3.4"));
        tokio::time::advance(Duration::from_secs(1)).await;
        let id2 = registry.publish("b", addr("5.6.7.8"));

        assert_eq!(registry.len(), 2);
        assert_ne!(id1, id2);
        assert_eq!(ids(&registry), vec![id1, id2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_table_evicts_oldest() {
        let registry = Registry::new(config(2));

        let id1 = registry.publish("a", addr("1.2.3.4"));
        tokio::time::advance(Duration::from_secs(1)).await;
        let id2 = registry.publish("b", addr("5.6.7.8"));
        tokio::time::advance(Duration::from_secs(1)).await;

        // Looking up "a" refreshes last_seen but not its creation time
        assert!(registry.lookup("a").is_some());

        let id3 = registry.publish("c", addr("9.9.9.9"));

        assert_eq!(ids(&registry), vec![id2, id3]);
        assert!(!registry.remove(&id1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_tie_uses_insertion_order() {
        let registry = Registry::new(config(2));

        // Paused clock: all three share the same creation instant
        let id1 = registry.publish("a", addr("1.1.1.1"));
        let id2 = registry.publish("b", addr("2.2.2.2"));
        let id3 = registry.publish("c", addr("3.3.3.3"));

        assert_eq!(ids(&registry), vec![id2, id3]);
        assert!(registry.lookup("a").is_none());
        assert!(!registry.remove(&id1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_slot_walkthrough() {
        let registry = Registry::new(config(2));

        let id1 = registry.publish("a", addr("1.2.3.4"));
        tokio::time::advance(Duration::from_secs(1)).await;
        let id2 = registry.publish("b", addr("5.6.7.8"));
        assert_eq!(registry.len(), 2);

        // Refreshing id2 does not change which entry is oldest by creation
        assert_eq!(registry.lookup("b").unwrap().id, id2);
        tokio::time::advance(Duration::from_secs(1)).await;
        let id3 = registry.publish("c", addr("9.9.9.9"));
        assert_eq!(ids(&registry), vec![id2.clone(), id3.clone()]);
        assert!(!registry.remove(&id1));

        assert!(registry.remove(&id2));
        assert!(!registry.remove(&id2));

        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        registry.sweep();
        assert!(registry.list().is_empty());

        assert!(registry.lookup("nonexistent").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let registry = Registry::new(config(3));

        for i in 0..50 {
            registry.publish(format!("hash{}", i), addr("10.0.0.1"));
            assert!(registry.len() <= 3);
        }
        assert_eq!(registry.len(), 3);

        let hashes: Vec<String> = registry.list().into_iter().map(|e| e.hash).collect();
        assert_eq!(hashes, vec!["hash47", "hash48", "hash49"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_refreshes_last_seen_only() {
        let registry = Registry::new(config(10));
        registry.publish("b", addr("5.6.7.8"));
        let before = registry.list().remove(0);

        tokio::time::advance(Duration::from_secs(10)).await;
        let found = registry.lookup("b").unwrap();

        assert_eq!(found.id, before.id);
        assert_eq!(found.hash, before.hash);
        assert_eq!(found.address, before.address);
        assert_eq!(found.created_at, before.created_at);
        assert!(found.last_seen >= before.last_seen);

        let again = registry.lookup("b").unwrap();
        assert!(again.last_seen >= found.last_seen);
    }

    #[test]
    fn test_lookup_missing_leaves_table_unchanged() {
        let registry = Registry::new(config(2));
        registry.publish("a", addr("1.2.3.4"));
        let before = registry.list();

        assert!(registry.lookup("nonexistent").is_none());
        assert_eq!(registry.list(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_prefers_latest_publication() {
        let registry = Registry::new(config(10));
        registry.publish("shared", addr("1.1.1.1"));
        tokio::time::advance(Duration::from_secs(1)).await;
        let newer = registry.publish("shared", addr("2.2.2.2"));

        let found = registry.lookup("shared").unwrap();
        assert_eq!(found.id, newer);
        assert_eq!(found.address.ip, "2.2.2.2");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Registry::new(config(2));
        let id1 = registry.publish("a", addr("1.2.3.4"));

        assert!(registry.remove(&id1));
        assert!(!registry.remove(&id1));
        assert!(!registry.remove(&EntryId::from("ffffffffffffffff")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshots_are_isolated() {
        let registry = Registry::new(config(2));
        registry.publish("a", addr("1.2.3.4"));

        let mut listed = registry.list();
        listed[0].hash = "mutated".into();
        listed[0].address.port = 1;

        let mut found = registry.lookup("a").unwrap();
        found.address.ip = "0.0.0.0".into();

        let entry = registry.lookup("a").unwrap();
        assert_eq!(entry.hash, "a");
        assert_eq!(entry.address, addr("1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_stale_entries() {
        let registry = Registry::new(config(10));
        registry.publish("idle", addr("1.1.1.1"));
        registry.publish("busy", addr("2.2.2.2"));

        tokio::time::advance(Duration::from_secs(240)).await;
        assert!(registry.lookup("busy").is_some());
        tokio::time::advance(Duration::from_secs(120)).await;

        assert_eq!(registry.sweep(), 1);
        let hashes: Vec<String> = registry.list().into_iter().map(|e| e.hash).collect();
        assert_eq!(hashes, vec!["busy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_fresh_entries() {
        let registry = Registry::new(config(10));
        registry.publish("a", addr("1.1.1.1"));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(registry.sweep(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_idle_entries() {
        let registry = Arc::new(Registry::new(config(2)));
        let handle = registry.spawn_sweeper();

        let id1 = registry.publish("a", addr("1.2.3.4"));
        registry.publish("b", addr("5.6.7.8"));
        assert!(registry.remove(&id1));

        tokio::time::sleep(Duration::from_secs(6 * 60)).await;
        assert!(registry.list().is_empty());

        registry.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_sweeper_promptly() {
        let registry = Arc::new(Registry::new(config(2)));
        let handle = registry.spawn_sweeper();
        tokio::task::yield_now().await;

        registry.stop();
        registry.stop();
        tokio::time::timeout(Duration::from_millis(10), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
        assert!(registry.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_survives_oversized_interval() {
        let registry = Arc::new(Registry::new(RegistryConfig {
            sweep_interval_secs: u64::MAX,
            ..config(2)
        }));
        let handle = registry.spawn_sweeper();
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        registry.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let registry = Registry::new(config(2));
        registry.stop();

        tokio::time::timeout(Duration::from_secs(1), registry.run_sweeper())
            .await
            .expect("sweeper should return immediately");
    }

    #[tokio::test]
    async fn test_events_for_eviction_and_removal() {
        let registry = Registry::new(config(1));
        let mut events = registry.subscribe();
        assert_eq!(registry.subscriber_count(), 1);

        let id1 = registry.publish("a", addr("1.1.1.1"));
        let id2 = registry.publish("b", addr("2.2.2.2"));
        registry.remove(&id2);

        assert!(matches!(events.recv().await.unwrap(), RegistryEvent::Published(e) if e.id == id1));
        assert!(matches!(
            events.recv().await.unwrap(),
            RegistryEvent::Removed { id, reason: RemovalReason::Evicted } if id == id1
        ));
        assert!(matches!(events.recv().await.unwrap(), RegistryEvent::Published(e) if e.id == id2));
        assert!(matches!(
            events.recv().await.unwrap(),
            RegistryEvent::Removed { id, reason: RemovalReason::Explicit } if id == id2
        ));
    }

    #[test]
    fn test_concurrent_publishers_respect_capacity() {
        let registry = Arc::new(Registry::new(config(5)));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        registry.publish(format!("{}-{}", t, i), addr("10.0.0.1"));
                        registry.lookup(&format!("{}-{}", t, i / 2));
                        assert!(registry.len() <= 5);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 5);
    }
}
