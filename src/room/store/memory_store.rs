//! In-process shared store backed by `DashMap`, with per-key TTL.
//!
//! Expired keys are dropped lazily on access and eagerly by
//! [`InMemorySharedStore::purge_expired`], which the store sweeper calls.

use std::collections::BTreeSet;
use std::future::ready;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::room::core::errors::{RoomError, RoomResult};
use crate::room::store::shared_store::{SharedStore, StoreFuture};

/// Stored value kinds.
#[derive(Clone, Debug)]
enum StoreValue {
    Text(String),
    List(Vec<String>),
    Set(BTreeSet<String>),
}

/// Store entry with optional TTL.
#[derive(Clone, Debug)]
struct StoreEntry {
    value: StoreValue,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn new(value: StoreValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }
}

/// Thread-safe in-process implementation of [`SharedStore`].
#[derive(Debug, Default)]
pub struct InMemorySharedStore {
    entries: DashMap<String, StoreEntry>,
}

impl InMemorySharedStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired())
            .map(|entry| entry.key().clone())
            .collect();

        expired_keys
            .into_iter()
            .filter(|key| {
                self.entries
                    .remove_if(key, |_, entry| entry.is_expired())
                    .is_some()
            })
            .count()
    }

    /// Number of keys currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entry for a key, dropping it first if it has expired.
    fn live(&self, key: &str) -> Option<StoreEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove_if(key, |_, entry| entry.is_expired());
            None
        } else {
            Some(entry.clone())
        }
    }

    /// Occupied entry for a key, treating an expired entry as vacant.
    fn live_entry(&self, key: &str) -> Entry<'_, String, StoreEntry> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) if occupied.get().is_expired() => {
                let (key, _) = occupied.remove_entry();
                self.entries.entry(key)
            }
            other => other,
        }
    }

    fn get_now(&self, key: &str) -> RoomResult<Option<String>> {
        match self.live(key) {
            Some(StoreEntry {
                value: StoreValue::Text(text),
                ..
            }) => Ok(Some(text)),
            Some(_) => Err(RoomError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    fn expire_now(&self, key: &str, ttl: Duration) -> bool {
        match self.live_entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().expires_at = Some(Instant::now() + ttl);
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    fn list_push_now(&self, key: &str, value: String) -> RoomResult<usize> {
        match self.live_entry(key) {
            Entry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                StoreValue::List(items) => {
                    items.push(value);
                    Ok(items.len())
                }
                _ => Err(RoomError::WrongType(key.to_string())),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(StoreEntry::new(StoreValue::List(vec![value]), None));
                Ok(1)
            }
        }
    }

    fn list_range_now(&self, key: &str) -> RoomResult<Vec<String>> {
        match self.live(key) {
            Some(StoreEntry {
                value: StoreValue::List(items),
                ..
            }) => Ok(items),
            Some(_) => Err(RoomError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    fn set_add_now(&self, key: &str, member: String) -> RoomResult<bool> {
        match self.live_entry(key) {
            Entry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                StoreValue::Set(members) => Ok(members.insert(member)),
                _ => Err(RoomError::WrongType(key.to_string())),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(StoreEntry::new(
                    StoreValue::Set(BTreeSet::from([member])),
                    None,
                ));
                Ok(true)
            }
        }
    }

    fn set_remove_now(&self, key: &str, member: &str) -> RoomResult<bool> {
        match self.live_entry(key) {
            Entry::Occupied(mut occupied) => {
                let (removed, now_empty) = match &mut occupied.get_mut().value {
                    StoreValue::Set(members) => (members.remove(member), members.is_empty()),
                    _ => return Err(RoomError::WrongType(key.to_string())),
                };
                if now_empty {
                    occupied.remove();
                }
                Ok(removed)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    fn set_members_now(&self, key: &str) -> RoomResult<Vec<String>> {
        match self.live(key) {
            Some(StoreEntry {
                value: StoreValue::Set(members),
                ..
            }) => Ok(members.into_iter().collect()),
            Some(_) => Err(RoomError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }
}

impl SharedStore for InMemorySharedStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<Option<String>>> {
        Box::pin(ready(self.get_now(key)))
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, RoomResult<()>> {
        self.entries
            .insert(key.to_string(), StoreEntry::new(StoreValue::Text(value), ttl));
        Box::pin(ready(Ok(())))
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<bool>> {
        let existed = self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired());
        Box::pin(ready(Ok(existed)))
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, RoomResult<bool>> {
        Box::pin(ready(Ok(self.expire_now(key, ttl))))
    }

    fn ttl<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<Option<Duration>>> {
        let remaining = self.live(key).and_then(|entry| entry.remaining());
        Box::pin(ready(Ok(remaining)))
    }

    fn list_push<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, RoomResult<usize>> {
        Box::pin(ready(self.list_push_now(key, value)))
    }

    fn list_range<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<Vec<String>>> {
        Box::pin(ready(self.list_range_now(key)))
    }

    fn set_add<'a>(&'a self, key: &'a str, member: String) -> StoreFuture<'a, RoomResult<bool>> {
        Box::pin(ready(self.set_add_now(key, member)))
    }

    fn set_remove<'a>(
        &'a self,
        key: &'a str,
        member: &'a str,
    ) -> StoreFuture<'a, RoomResult<bool>> {
        Box::pin(ready(self.set_remove_now(key, member)))
    }

    fn set_members<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<Vec<String>>> {
        Box::pin(ready(self.set_members_now(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_round_trip_and_delete() -> RoomResult<()> {
        let store = InMemorySharedStore::new();
        store.set("k", "v".to_string(), None).await?;
        assert_eq!(store.get("k").await?, Some("v".to_string()));
        assert!(store.delete("k").await?);
        assert!(!store.delete("k").await?);
        assert_eq!(store.get("k").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() -> RoomResult<()> {
        let store = InMemorySharedStore::new();
        store
            .set("k", "v".to_string(), Some(Duration::from_secs(10)))
            .await?;
        tokio::time::advance(Duration::from_secs(4)).await;
        let remaining = store.ttl("k").await?.unwrap_or_default();
        assert_eq!(remaining, Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(store.get("k").await?, None);
        assert_eq!(store.ttl("k").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() -> RoomResult<()> {
        let store = InMemorySharedStore::new();
        store
            .set("short", "1".to_string(), Some(Duration::from_secs(1)))
            .await?;
        store.set("forever", "2".to_string(), None).await?;
        assert!(store.expire("forever", Duration::from_secs(100)).await?);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() -> RoomResult<()> {
        let store = InMemorySharedStore::new();
        for value in ["a", "b", "c"] {
            store.list_push("list", value.to_string()).await?;
        }
        assert_eq!(store.list_range("list").await?, vec!["a", "b", "c"]);
        assert!(store.list_range("missing").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_type_rejected() -> RoomResult<()> {
        let store = InMemorySharedStore::new();
        store.set("k", "v".to_string(), None).await?;
        assert!(matches!(
            store.list_push("k", "x".to_string()).await,
            Err(RoomError::WrongType(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_membership() -> RoomResult<()> {
        let store = InMemorySharedStore::new();
        assert!(store.set_add("rooms", "1".to_string()).await?);
        assert!(!store.set_add("rooms", "1".to_string()).await?);
        store.set_add("rooms", "2".to_string()).await?;
        assert_eq!(store.set_members("rooms").await?, vec!["1", "2"]);
        assert!(store.set_remove("rooms", "1").await?);
        assert!(store.set_remove("rooms", "2").await?);
        assert!(store.is_empty());
        Ok(())
    }
}
