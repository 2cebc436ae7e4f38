//! Per-instance fan-out of throttled events.
//!
//! Every subscriber owns an unbounded channel, so a slow consumer never makes
//! another one (or the worker) wait, and no subscriber misses an event.
//! Subscribers that have gone away are pruned on the next publish.

use super::progress::SearchEvent;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Default)]
pub struct ProgressBroadcaster {
    subscribers: Mutex<Vec<UnboundedSender<SearchEvent>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> SearchSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        SearchSubscription { rx }
    }

    /// Deliver `event` to every live subscriber, in call order.
    pub fn publish(&self, event: &SearchEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        let pruned = before - subscribers.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Dropped detached progress subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

/// Receiving end handed to a UI surface. Dropping it detaches.
#[derive(Debug)]
pub struct SearchSubscription {
    rx: UnboundedReceiver<SearchEvent>,
}

impl SearchSubscription {
    /// Next event, or `None` once the instance itself is gone.
    pub async fn recv(&mut self) -> Option<SearchEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<SearchEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking receive for plain threads. Must not be called from async code.
    pub fn blocking_recv(&mut self) -> Option<SearchEvent> {
        self.rx.blocking_recv()
    }

    /// Drain events until the terminal one and return it.
    pub async fn wait_for_finish(&mut self) -> Option<SearchEvent> {
        while let Some(event) = self.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }
}
