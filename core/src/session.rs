//! Ephemeral Session Cache
//!
//! Holds a built bundle between the two calls of the deposit handshake:
//! build → the user signs the payment leg elsewhere → settle. Entries are
//! keyed by group id and consumed at most once.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::bundle::GroupId;

#[derive(Debug)]
struct SessionEntry<T> {
    value: T,
    created_at: Instant,
}

pub struct SessionCache<T> {
    /// Maps group id -> pending session
    entries: DashMap<GroupId, SessionEntry<T>>,
    ttl: Duration,
}

impl<T> SessionCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, group_id: GroupId, value: T) {
        self.insert_at(group_id, value, Instant::now());
    }

    pub fn insert_at(&self, group_id: GroupId, value: T, created_at: Instant) {
        self.entries
            .insert(group_id, SessionEntry { value, created_at });
    }

    /// Remove and return the entry. Of concurrent callers for one group id,
    /// only one gets it. Entries past their TTL are dropped, not returned.
    pub fn take(&self, group_id: &GroupId) -> Option<T> {
        self.take_at(group_id, Instant::now())
    }

    pub fn take_at(&self, group_id: &GroupId, now: Instant) -> Option<T> {
        let (_, entry) = self.entries.remove(group_id)?;
        if now.saturating_duration_since(entry.created_at) >= self.ttl {
            return None;
        }
        Some(entry.value)
    }

    pub fn contains(&self, group_id: &GroupId) -> bool {
        self.entries.contains_key(group_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let expired: Vec<GroupId> = self
            .entries
            .iter()
            .filter(|e| now.saturating_duration_since(e.value().created_at) >= self.ttl)
            .map(|e| *e.key())
            .collect();

        let mut removed = 0;
        for key in expired {
            // Recheck under the shard lock; the entry may have been replaced
            if self
                .entries
                .remove_if(&key, |_, e| {
                    now.saturating_duration_since(e.created_at) >= self.ttl
                })
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }

    /// Sweep every `interval` until `shutdown` fires
    pub async fn run_sweeper(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let removed = self.sweep_at(Instant::now());
                    if removed > 0 {
                        info!("Session cleanup: removed {} expired sessions", removed);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(600);

    fn gid(b: u8) -> GroupId {
        GroupId([b; 32])
    }

    #[test]
    fn test_take_before_ttl() {
        let cache = SessionCache::new(TTL);
        let start = Instant::now();
        cache.insert_at(gid(1), "bundle", start);

        assert_eq!(
            cache.take_at(&gid(1), start + Duration::from_secs(599)),
            Some("bundle")
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_take_after_ttl_without_sweep() {
        let cache = SessionCache::new(TTL);
        let start = Instant::now();
        cache.insert_at(gid(1), "bundle", start);

        assert_eq!(cache.take_at(&gid(1), start + TTL), None);
        assert!(!cache.contains(&gid(1)));
    }

    #[test]
    fn test_second_take_fails() {
        let cache = SessionCache::new(TTL);
        cache.insert(gid(1), 7u32);
        assert_eq!(cache.take(&gid(1)), Some(7));
        assert_eq!(cache.take(&gid(1)), None);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = SessionCache::new(TTL);
        let start = Instant::now();
        cache.insert_at(gid(1), 1, start);
        cache.insert_at(gid(2), 2, start + Duration::from_secs(300));

        assert_eq!(cache.sweep_at(start + Duration::from_secs(700)), 1);
        assert!(!cache.contains(&gid(1)));
        assert!(cache.contains(&gid(2)));
    }

    #[test]
    fn test_concurrent_take_single_winner() {
        let cache = Arc::new(SessionCache::new(TTL));
        cache.insert(gid(9), ());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.take(&gid(9)).is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
