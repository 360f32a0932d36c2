//! Multicast of qualified-network-list updates to registered consumers.

use dashmap::DashMap;
use qnsd_events::{QualifiedNetworksInfo, SessionType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Handle identifying one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fans qualified-network updates out to subscribers. Publication is ordered
/// per subscriber; consecutive identical lists for a session are published
/// once.
#[derive(Default)]
pub struct ResultChannel {
    subscribers: DashMap<u64, flume::Sender<QualifiedNetworksInfo>>,
    last_published: DashMap<SessionType, QualifiedNetworksInfo>,
    next_id: AtomicU64,
}

impl ResultChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(
        &self,
    ) -> (SubscriptionId, flume::Receiver<QualifiedNetworksInfo>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::unbounded();
        self.subscribers.insert(id, tx);
        (SubscriptionId(id), rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(&id.0);
    }

    /// Publish unless the list equals the last one published for the
    /// session. Returns whether anything went out.
    pub fn publish(&self, info: QualifiedNetworksInfo) -> bool {
        let duplicate = self
            .last_published
            .get(&info.session)
            .map(|last| *last == info)
            .unwrap_or(false);
        if duplicate {
            return false;
        }

        debug!(session = %info.session, networks = ?info.access_networks, "publishing qualified networks");
        self.last_published.insert(info.session, info.clone());

        // drop subscribers that went away
        self.subscribers
            .retain(|_, tx| tx.send(info.clone()).is_ok());

        true
    }
}
