//! Process-scoped, TTL-bounded snapshot cache with notification semantics.
//!
//! Every `set` publishes a new snapshot reference and synchronously
//! notifies the subscribers registered under that key. Entries written
//! with a TTL expire lazily on read, so a crashed streaming task cannot
//! leak memory. The counter keys carry no TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hearth_types::{Block, Message, MessageId};

use crate::service::StreamingTask;

/// Cache key templates.
pub mod keys {
    use hearth_types::{BlockId, MessageId, TopicId};

    #[must_use]
    pub fn task(message_id: &MessageId) -> String {
        format!("message.streaming.task.{message_id}")
    }

    #[must_use]
    pub fn topic_tasks(topic_id: &TopicId) -> String {
        format!("message.streaming.topic_tasks.{topic_id}")
    }

    #[must_use]
    pub fn content(message_id: &MessageId) -> String {
        format!("message.streaming.content.{message_id}")
    }

    #[must_use]
    pub fn block(block_id: &BlockId) -> String {
        format!("message.streaming.block.{block_id}")
    }

    #[must_use]
    pub fn siblings_counter(topic_id: &TopicId) -> String {
        format!("message.streaming.siblings_counter.{topic_id}")
    }
}

/// Snapshot values the cache holds.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Task(Arc<StreamingTask>),
    Message(Arc<Message>),
    Block(Arc<Block>),
    MessageIds(Arc<Vec<MessageId>>),
    Counter(u64),
}

type Subscriber = Arc<dyn Fn(&CacheValue) + Send + Sync>;

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Entry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Entry>,
    subscribers: HashMap<String, Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: u64,
}

/// The in-process snapshot cache.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<CacheInner>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot and synchronously notify the key's subscribers
    /// (outside the cache lock, so a subscriber may re-enter the cache).
    pub fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) {
        let subscribers: Vec<Subscriber> = {
            let mut inner = self.inner.lock().expect("cache poisoned");
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: value.clone(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            inner
                .subscribers
                .get(key)
                .map(|subs| subs.iter().map(|(_, s)| Arc::clone(s)).collect())
                .unwrap_or_default()
        };
        for subscriber in subscribers {
            subscriber(&value);
        }
    }

    /// Snapshot read; expired entries are dropped on access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let mut inner = self.inner.lock().expect("cache poisoned");
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|at| at <= Instant::now()),
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn delete(&self, key: &str) {
        self.inner
            .lock()
            .expect("cache poisoned")
            .entries
            .remove(key);
    }

    /// Counter increment; counters never expire. Returns the new value
    /// (always ≥ 1).
    pub fn increment_counter(&self, key: &str) -> u64 {
        let mut inner = self.inner.lock().expect("cache poisoned");
        let next = match inner.entries.get(key) {
            Some(Entry {
                value: CacheValue::Counter(current),
                ..
            }) => current + 1,
            _ => 1,
        };
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: CacheValue::Counter(next),
                expires_at: None,
            },
        );
        next
    }

    pub fn subscribe(
        &self,
        key: &str,
        subscriber: impl Fn(&CacheValue) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock().expect("cache poisoned");
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        inner
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(subscriber)));
        id
    }

    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("cache poisoned");
        if let Some(subs) = inner.subscribers.get_mut(key) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                inner.subscribers.remove(key);
            }
        }
    }
}
