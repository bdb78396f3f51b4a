//! The server's event channel, §5 "Signals to external world": every
//! committed batch is broadcast to a document's subscribers, strictly after
//! persistence and in commit order. Fan-out is keyed by `docId`, each
//! subscriber getting its own in-process mpsc channel.

use fnv::FnvHashMap;
use futures::channel::mpsc;
use futures::stream::Stream;
use parking_lot::Mutex;
use patches_core::Change;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A committed batch pushed to subscribers, per §6 "Push notifications":
/// `doc-update(docId, changes)`, delivered to everyone but the originator.
#[derive(Debug, Clone)]
pub struct DocUpdate {
    pub doc_id: String,
    pub changes: Vec<Change>,
    pub originating_client_id: Option<String>,
}

/// A subscriber's half of the channel; implements `Stream` so callers can
/// `.next().await` it.
pub struct EventStream {
    client_id: String,
    rx: mpsc::UnboundedReceiver<DocUpdate>,
}

impl EventStream {
    /// The id this stream was registered under; updates it originated are
    /// filtered out before delivery, so nothing here needs to re-check it,
    /// but callers comparing streams want it available.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Stream for EventStream {
    type Item = DocUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

struct Subscriber {
    client_id: String,
    tx: mpsc::UnboundedSender<DocUpdate>,
}

/// Fans a document's committed updates out to its subscribers. One broker is
/// shared by the whole `Engine`; subscriptions are keyed by `docId`.
#[derive(Default)]
pub struct EventBroker {
    subscribers: Mutex<FnvHashMap<String, Vec<Subscriber>>>,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `client_id` for updates on `doc_id`, returning its stream.
    pub fn subscribe(&self, doc_id: &str, client_id: impl Into<String>) -> EventStream {
        let client_id = client_id.into();
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().entry(doc_id.to_string()).or_default().push(Subscriber { client_id: client_id.clone(), tx });
        EventStream { client_id, rx }
    }

    /// Drops every subscription `client_id` holds on `doc_id`.
    pub fn unsubscribe(&self, doc_id: &str, client_id: &str) {
        if let Some(subs) = self.subscribers.lock().get_mut(doc_id) {
            subs.retain(|s| s.client_id != client_id);
        }
    }

    /// Broadcasts `changes` to every subscriber of `doc_id` except
    /// `originating_client_id`, pruning senders whose receiver has dropped.
    /// Must be called only after `changes` are durably persisted and in
    /// commit order (§5).
    pub fn publish(&self, doc_id: &str, changes: Vec<Change>, originating_client_id: Option<&str>) {
        if changes.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        let Some(subs) = subscribers.get_mut(doc_id) else { return };
        subs.retain(|sub| {
            if Some(sub.client_id.as_str()) == originating_client_id {
                return true;
            }
            let update = DocUpdate { doc_id: doc_id.to_string(), changes: changes.clone(), originating_client_id: originating_client_id.map(str::to_string) };
            sub.tx.unbounded_send(update).is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use patches_core::{Operation, PointerBuf};
    use serde_json::json;

    fn change() -> Change {
        Change::new("c1", 0, vec![Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(1), ts: None, soft: None }], 0.0)
    }

    #[async_std::test]
    async fn subscriber_receives_published_update_but_not_its_own() {
        let broker = EventBroker::new();
        let mut alice = broker.subscribe("doc1", "alice");
        let mut bob = broker.subscribe("doc1", "bob");

        broker.publish("doc1", vec![change()], Some("alice"));

        let bob_update = bob.next().await.unwrap();
        assert_eq!(bob_update.doc_id, "doc1");
        // alice is the originator; nothing was queued for her stream.
        assert!(alice.rx.try_next().is_err());
    }

    #[async_std::test]
    async fn unsubscribe_stops_further_delivery() {
        let broker = EventBroker::new();
        let mut bob = broker.subscribe("doc1", "bob");
        broker.unsubscribe("doc1", "bob");
        broker.publish("doc1", vec![change()], None);
        assert!(bob.rx.try_next().is_err());
    }
}
