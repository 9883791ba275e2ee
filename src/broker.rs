// ABOUTME: The broker core: client registry, subscription index, and publish fan-out

use crate::command;
use crate::topics::Index;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Identifies a connected client session for the lifetime of its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        ClientId(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// The broker's handle to a connected client's outbound frame queue, shared
/// between the broker core and the client's writer task.
#[derive(Clone)]
pub struct ClientHandle {
    sender: mpsc::Sender<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl ClientHandle {
    pub fn new(sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue `body` for delivery, framing is left to the writer task.
    /// Under backpressure (a full queue) the frame is dropped and the
    /// per-session dropped-frame counter is incremented.
    pub fn enqueue(&self, body: Bytes) {
        if self.sender.try_send(body).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Registry {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
}

/// The broker's shared state: a monotonic client id source, the subscription
/// index, and the client registry. Cheap to clone an `Arc<Broker>` into every
/// session task.
#[derive(Default)]
pub struct Broker {
    next_id: AtomicU64,
    index: Index,
    registry: Registry,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next client id. Ids are never reused.
    pub fn next_client_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a newly accepted client's outbound handle.
    pub fn register(&self, id: ClientId, handle: ClientHandle) {
        self.registry.clients.lock().unwrap().insert(id, handle);
    }

    /// Remove a client from the registry and purge its subscriptions. Called
    /// once a session's reader loop has ended.
    pub fn drop_client(&self, id: ClientId) {
        self.index.purge(id);
        self.registry.clients.lock().unwrap().remove(&id);
    }

    /// Subscribe `id` to `topic`.
    pub fn subscribe(&self, id: ClientId, topic: &str) {
        self.index.add(topic, id);
    }

    /// Unsubscribe `id` from `topic`.
    pub fn unsubscribe(&self, id: ClientId, topic: &str) {
        self.index.remove(topic, id);
    }

    /// Deliver `data` to every current subscriber of `topic`. The subscriber
    /// snapshot is taken and the index lock released before any enqueueing
    /// happens, so a slow or full client queue never blocks publishers or
    /// other sessions. Returns the number of subscribers the frame was
    /// enqueued for (which may be fewer than were snapshotted, if a client
    /// disconnected concurrently).
    #[tracing::instrument(skip(self, data))]
    pub fn publish(&self, topic: &str, data: &[u8]) -> usize {
        let subscribers = self.index.snapshot(topic);
        if subscribers.is_empty() {
            return 0;
        }

        let body = command::format_data(data);
        let clients = self.registry.clients.lock().unwrap();
        subscribers
            .into_iter()
            .filter_map(|id| clients.get(&id))
            .map(|handle| handle.enqueue(body.clone()))
            .count()
    }

    /// Enqueue a raw reply body (a verdict) directly to one client, bypassing
    /// the subscription index.
    pub fn enqueue_to(&self, id: ClientId, body: Bytes) {
        if let Some(handle) = self.registry.clients.lock().unwrap().get(&id) {
            handle.enqueue(body);
        }
    }

    #[cfg(test)]
    pub fn dropped_frames(&self, id: ClientId) -> u64 {
        self.registry
            .clients
            .lock()
            .unwrap()
            .get(&id)
            .map(|handle| handle.dropped_frames())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ClientHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(4);
        (ClientHandle::new(tx), rx)
    }

    #[test]
    fn client_ids_are_distinct_and_increasing() {
        let broker = Broker::new();
        let a = broker.next_client_id();
        let b = broker.next_client_id();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "client-0");
        assert_eq!(b.to_string(), "client-1");
    }

    #[test]
    fn publish_delivers_to_subscribers_only() {
        let broker = Broker::new();
        let id = broker.next_client_id();
        let (h, mut rx) = handle();
        broker.register(id, h);
        broker.subscribe(id, "weather");

        let delivered = broker.publish("weather", b"sunny");
        assert_eq!(delivered, 1);

        let body = rx.try_recv().unwrap();
        assert_eq!(
            command::parse_reply(&body).unwrap(),
            command::Reply::Data {
                payload: Bytes::from_static(b"sunny")
            }
        );
    }

    #[test]
    fn publish_with_no_subscribers_delivers_to_nobody() {
        let broker = Broker::new();
        assert_eq!(broker.publish("empty-topic", b"data"), 0);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let broker = Broker::new();
        let id = broker.next_client_id();
        let (h, mut rx) = handle();
        broker.register(id, h);
        broker.subscribe(id, "weather");
        broker.unsubscribe(id, "weather");

        broker.publish("weather", b"sunny");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drop_client_purges_subscriptions() {
        let broker = Broker::new();
        let id = broker.next_client_id();
        let (h, _rx) = handle();
        broker.register(id, h);
        broker.subscribe(id, "weather");

        broker.drop_client(id);

        assert_eq!(broker.publish("weather", b"sunny"), 0);
    }

    #[test]
    fn full_queue_increments_dropped_counter() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ClientHandle::new(tx);
        handle.enqueue(Bytes::from_static(b"a"));
        handle.enqueue(Bytes::from_static(b"b"));
        assert_eq!(handle.dropped_frames(), 1);
    }
}
