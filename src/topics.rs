// ABOUTME: The subscription index mapping topic names to their subscribed clients

use crate::broker::ClientId;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Maps topic name to the set of clients currently subscribed to it.
#[derive(Default)]
pub struct Index {
    topics: Mutex<HashMap<String, HashSet<ClientId>>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `client` to `topic`. Idempotent: returns `false` if already subscribed.
    pub fn add(&self, topic: &str, client: ClientId) -> bool {
        let mut topics = self.topics.lock().unwrap();
        topics.entry(topic.to_string()).or_default().insert(client)
    }

    /// Unsubscribe `client` from `topic`. Idempotent: returns `false` if it wasn't subscribed.
    /// Drops the topic entry entirely once its subscriber set becomes empty.
    pub fn remove(&self, topic: &str, client: ClientId) -> bool {
        let mut topics = self.topics.lock().unwrap();
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(&client);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Snapshot of every client currently subscribed to `topic`.
    pub fn snapshot(&self, topic: &str) -> Vec<ClientId> {
        let topics = self.topics.lock().unwrap();
        topics
            .get(topic)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove `client` from every topic it is subscribed to, dropping any
    /// topic whose subscriber set becomes empty as a result.
    pub fn purge(&self, client: ClientId) {
        let mut topics = self.topics.lock().unwrap();
        topics.retain(|_, subscribers| {
            subscribers.remove(&client);
            !subscribers.is_empty()
        });
    }

    #[cfg(test)]
    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap().len()
    }
}
