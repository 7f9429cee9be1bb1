//! Shared ephemeral key-value store abstraction.
//!
//! Session mappings and chat queues live here so that every coordinator
//! instance sees the same data. The operations mirror what a networked
//! key-value server offers: string values with TTL, append-only lists and
//! unordered sets. Every call is an independent round trip; nothing here is
//! transactional.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::room::core::errors::RoomResult;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared store trait.
pub trait SharedStore: Send + Sync {
    /// Read a string value.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<Option<String>>>;

    /// Write a string value, replacing any previous value and TTL.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, RoomResult<()>>;

    /// Delete a key of any type. Returns whether it existed.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<bool>>;

    /// Set a key's TTL. Returns whether the key existed.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, RoomResult<bool>>;

    /// Remaining TTL of a key; `None` if the key is missing or never expires.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    fn ttl<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<Option<Duration>>>;

    /// Append to the tail of a list, creating it if needed. Returns the new length.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached or the key is not a list.
    fn list_push<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, RoomResult<usize>>;

    /// Read a whole list in insertion order.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached or the key is not a list.
    fn list_range<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<Vec<String>>>;

    /// Add a set member. Returns whether it was newly added.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached or the key is not a set.
    fn set_add<'a>(&'a self, key: &'a str, member: String) -> StoreFuture<'a, RoomResult<bool>>;

    /// Remove a set member. Returns whether it was present.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached or the key is not a set.
    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str)
    -> StoreFuture<'a, RoomResult<bool>>;

    /// All members of a set, in no particular order.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached or the key is not a set.
    fn set_members<'a>(&'a self, key: &'a str) -> StoreFuture<'a, RoomResult<Vec<String>>>;
}
