use crate::host::SearchResponse;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::debug;

pub type SubscriptionId = u64;

/// Live subscription to search result batches
///
/// Dropping the receiver ends the subscription on the next publish; `unsubscribe`
/// ends it immediately.
pub struct Subscription {
    pub id: SubscriptionId,
    pub rx: tokio_mpsc::UnboundedReceiver<SearchResponse>,
}

/// Bus on which the host publishes search result batches
#[derive(Clone, Default)]
pub struct SearchEvents {
    subscribers: Arc<Mutex<HashMap<SubscriptionId, tokio_mpsc::UnboundedSender<SearchResponse>>>>,
    next_id: Arc<AtomicU64>,
}

impl SearchEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every result batch published from now on
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock().insert(id, tx);
        debug!("SearchEvents: subscription {} added", id);
        Subscription { id, rx }
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!("SearchEvents: subscription {} removed", id);
        }
        removed
    }

    /// Deliver a result batch to every subscriber
    pub fn publish(&self, response: SearchResponse) {
        let mut subscribers = self.lock();
        let mut to_remove = Vec::new();

        for (id, tx) in subscribers.iter() {
            // If send fails, receiver was dropped
            if tx.send(response.clone()).is_err() {
                to_remove.push(*id);
            }
        }

        for id in to_remove {
            debug!("SearchEvents: pruning closed subscription {}", id);
            subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(
        &self,
    ) -> MutexGuard<'_, HashMap<SubscriptionId, tokio_mpsc::UnboundedSender<SearchResponse>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SearchToken;

    fn response(token: u32) -> SearchResponse {
        SearchResponse {
            token: SearchToken(token),
            peer: "peer".to_string(),
            results: vec![],
        }
    }

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let events = SearchEvents::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();
        assert_ne!(a.id, b.id);

        events.publish(response(7));

        assert_eq!(a.rx.try_recv().unwrap().token, SearchToken(7));
        assert_eq!(b.rx.try_recv().unwrap().token, SearchToken(7));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let events = SearchEvents::new();
        let mut sub = events.subscribe();
        assert!(events.unsubscribe(sub.id));
        assert!(!events.unsubscribe(sub.id));

        events.publish(response(1));
        assert!(sub.rx.try_recv().is_err());
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let events = SearchEvents::new();
        let sub = events.subscribe();
        let _keep = events.subscribe();
        drop(sub);

        events.publish(response(1));
        assert_eq!(events.subscriber_count(), 1);
    }
}
