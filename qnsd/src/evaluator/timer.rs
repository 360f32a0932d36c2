use crate::evaluator::EngineEvent;
use crate::restriction::RestrictionKind;
use qnsd_events::Transport;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Identity of a logical timer. Re-arming a key cancels its previous timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Restriction(Transport, RestrictionKind),
    PdnRetry(Transport),
}

/// Logical timers for one evaluator: each expiry enqueues a `TimerFired`
/// event on the inbox instead of calling back into engine state.
pub struct TimerTower {
    inbox: flume::Sender<EngineEvent>,
    armed: HashMap<TimerKey, JoinHandle<()>>,
}

impl TimerTower {
    pub fn new(inbox: flume::Sender<EngineEvent>) -> Self {
        Self {
            inbox,
            armed: HashMap::new(),
        }
    }

    pub fn arm(&mut self, key: TimerKey, deadline: Instant) {
        if let Some(previous) = self.armed.remove(&key) {
            previous.abort();
        }

        let inbox = self.inbox.clone();
        let handle = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            // the evaluator may already be closed; a dead inbox is fine
            inbox.send(EngineEvent::TimerFired(key)).ok();
        });

        self.armed.insert(key, handle);
    }

    pub fn cancel(&mut self, key: TimerKey) {
        if let Some(handle) = self.armed.remove(&key) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.armed.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerTower {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
