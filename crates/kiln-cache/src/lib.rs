//! Single-flight keyed artifact cache
//!
//! An in-process map from key to value where concurrent requests for a
//! missing key collapse into one producer. The first caller of
//! [`ArtifactCache::get_or_lock`] on an absent key receives a
//! [`ProducerLock`] and is obligated to publish; every other caller
//! blocks until the producer commits and then observes the exact
//! published value. A producer that goes away without publishing fails
//! its waiters instead of electing a replacement.
//!
//! Entries never expire; the cache lives for one build invocation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("a value is already committed for this key")]
    AlreadyCommitted,

    #[error("a producer is already in flight for this key")]
    Busy,

    #[error("the producer abandoned this key without publishing")]
    Abandoned,

    #[error("the producer was canceled")]
    Canceled,
}

pub type Result<T> = std::result::Result<T, CacheError>;

type Outcome<V> = std::result::Result<V, CacheError>;

enum Slot<V> {
    Ready(V),
    Pending(watch::Receiver<Option<Outcome<V>>>),
}

type Slots<K, V> = Arc<Mutex<HashMap<K, Slot<V>>>>;

/// Keyed single-flight cache
pub struct ArtifactCache<K, V> {
    slots: Slots<K, V>,
}

impl<K, V> Default for ArtifactCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for ArtifactCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

/// Result of [`ArtifactCache::get_or_lock`]
pub enum GetOrLock<K: Eq + Hash + Clone, V: Clone> {
    /// A committed value was found, or an in-flight producer published one
    Hit(V),
    /// The caller is now the sole producer for the key
    Miss(ProducerLock<K, V>),
}

impl<K, V> ArtifactCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Non-blocking lookup of a committed value
    pub fn get(&self, key: &K) -> Option<V> {
        let slots = self.slots.lock().expect("cache mutex poisoned");
        match slots.get(key) {
            Some(Slot::Ready(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Insert a committed value; fails if the key is already populated
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        match slots.get(&key) {
            Some(Slot::Ready(_)) => Err(CacheError::AlreadyCommitted),
            Some(Slot::Pending(_)) => Err(CacheError::Busy),
            None => {
                slots.insert(key, Slot::Ready(value));
                Ok(())
            }
        }
    }

    /// Return the committed value or register the caller as producer
    ///
    /// When another producer is in flight the call blocks until that
    /// producer publishes, then yields the published value. If the
    /// producer abandons the key, waiters get [`CacheError::Abandoned`]
    /// (or [`CacheError::Canceled`]); no waiter is promoted to producer.
    pub async fn get_or_lock(&self, key: &K) -> Result<GetOrLock<K, V>> {
        let mut rx = {
            let mut slots = self.slots.lock().expect("cache mutex poisoned");
            match slots.get(key) {
                Some(Slot::Ready(v)) => return Ok(GetOrLock::Hit(v.clone())),
                Some(Slot::Pending(rx)) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(key.clone(), Slot::Pending(rx));
                    return Ok(GetOrLock::Miss(ProducerLock {
                        key: key.clone(),
                        slots: Arc::clone(&self.slots),
                        tx: Some(tx),
                    }));
                }
            }
        };

        // Wait outside the map lock for the producer's outcome.
        let outcome = rx
            .wait_for(|o| o.is_some())
            .await
            .map(|o| o.clone().expect("guarded by wait_for"))
            .unwrap_or(Err(CacheError::Abandoned));

        outcome.map(GetOrLock::Hit)
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().expect("cache mutex poisoned");
        slots
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive obligation to populate a key
///
/// Obtained from [`ArtifactCache::get_or_lock`] on a miss. The holder
/// must call [`publish`](ProducerLock::publish); dropping the lock
/// without publishing removes the slot and fails all waiters.
pub struct ProducerLock<K: Eq + Hash + Clone, V: Clone> {
    key: K,
    slots: Slots<K, V>,
    tx: Option<watch::Sender<Option<Outcome<V>>>>,
}

impl<K, V> ProducerLock<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Commit the value and wake all waiters
    pub fn publish(mut self, value: V) {
        let tx = self.tx.take().expect("publish consumes the lock");
        {
            let mut slots = self.slots.lock().expect("cache mutex poisoned");
            slots.insert(self.key.clone(), Slot::Ready(value.clone()));
        }
        let _ = tx.send(Some(Ok(value)));
    }

    /// Release the key on cancellation; waiters observe `Canceled`
    pub fn cancel(mut self) {
        self.release(CacheError::Canceled);
    }

    fn release(&mut self, error: CacheError) {
        if let Some(tx) = self.tx.take() {
            {
                let mut slots = self.slots.lock().expect("cache mutex poisoned");
                slots.remove(&self.key);
            }
            let _ = tx.send(Some(Err(error)));
        }
    }
}

impl<K, V> Drop for ProducerLock<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        self.release(CacheError::Abandoned);
    }
}
