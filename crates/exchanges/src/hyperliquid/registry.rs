//! Subscription registry
//!
//! Source of truth for what should be subscribed, independent of the
//! connection. Entries keep registration order so routing and replay visit
//! them in the order callers created them.

use crate::errors::{Result, StreamError};
use crate::hyperliquid::connection::SupervisorHandle;
use crate::hyperliquid::types::{
    subscribe_message, unsubscribe_message, MessageCallback, SubscriptionId, SubscriptionInfo,
    SubscriptionKind, SubscriptionParams,
};
use hyperstream_core::{log_subscription, Timestamp};

use flume::Sender;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

struct SubscriptionEntry {
    id: SubscriptionId,
    kind: SubscriptionKind,
    params: SubscriptionParams,
    wire_message: String,
    callbacks: Vec<MessageCallback>,
    messages_received: u64,
    subscribed_at: Timestamp,
    /// Set once the subscribe frame has been sent
    confirmed: bool,
    /// Callers that attached while the subscribe frame was in flight
    waiters: Vec<Sender<Result<()>>>,
}

/// Outcome of [`SubscriptionRegistry::register`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: SubscriptionId,
    /// False when an identical subscription already existed
    pub created: bool,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<SubscriptionEntry>,
}

impl RegistryState {
    fn position(&self, id: &SubscriptionId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.id == id)
    }

    fn remove(&mut self, id: &SubscriptionId) -> Option<SubscriptionEntry> {
        self.position(id).map(|index| self.entries.remove(index))
    }
}

/// Shared registry handle; clones see the same entries
#[derive(Clone)]
pub struct SubscriptionRegistry {
    state: Rc<RefCell<RegistryState>>,
    sender: SupervisorHandle,
}

impl SubscriptionRegistry {
    pub fn new(sender: SupervisorHandle) -> Self {
        Self {
            state: Rc::new(RefCell::new(RegistryState::default())),
            sender,
        }
    }

    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().entries.is_empty()
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.state.borrow().position(id).is_some()
    }

    /// Register interest in `(kind, params)`.
    ///
    /// A new identity is stored as pending, its subscribe frame is sent, and
    /// it is confirmed on success or dropped on failure. An existing identity
    /// only gains the callback; nothing is sent. Attaching to a pending
    /// identity waits for its frame and shares its outcome.
    pub async fn register(
        &self,
        kind: SubscriptionKind,
        params: SubscriptionParams,
        callback: Option<MessageCallback>,
    ) -> Result<Registration> {
        let id = SubscriptionId::derive(kind, &params);
        let wire_message = subscribe_message(kind, &params)?;

        let in_flight = {
            let mut state = self.state.borrow_mut();
            match state.position(&id) {
                Some(index) => {
                    let entry = &mut state.entries[index];
                    if let Some(callback) = callback {
                        entry.callbacks.push(callback);
                    }
                    if entry.confirmed {
                        debug!("Subscription {} already active", id);
                        return Ok(Registration { id, created: false });
                    }
                    let (waiter, outcome) = flume::bounded(1);
                    entry.waiters.push(waiter);
                    Some(outcome)
                }
                None => {
                    state.entries.push(SubscriptionEntry {
                        id: id.clone(),
                        kind,
                        params,
                        wire_message: wire_message.clone(),
                        callbacks: callback.into_iter().collect(),
                        messages_received: 0,
                        subscribed_at: Timestamp::now(),
                        confirmed: false,
                        waiters: Vec::new(),
                    });
                    None
                }
            }
        };

        if let Some(outcome) = in_flight {
            debug!("Subscription {} pending, waiting for its subscribe frame", id);
            return match outcome.recv_async().await {
                Ok(Ok(())) => Ok(Registration { id, created: false }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(StreamError::Subscription(format!("{id} was removed before it was confirmed"))),
            };
        }

        match self.sender.send(wire_message).await {
            Ok(()) => {
                let waiters = {
                    let mut state = self.state.borrow_mut();
                    match state.position(&id) {
                        Some(index) => {
                            let entry = &mut state.entries[index];
                            entry.confirmed = true;
                            std::mem::take(&mut entry.waiters)
                        }
                        None => Vec::new(),
                    }
                };
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
                log_subscription!("subscribed", id, kind);
                Ok(Registration { id, created: true })
            }
            Err(e) => {
                let removed = self.state.borrow_mut().remove(&id);
                warn!("Failed to subscribe {}: {}", id, e);
                let error = StreamError::Subscription(e.to_string());
                for waiter in removed.into_iter().flat_map(|entry| entry.waiters) {
                    let _ = waiter.send(Err(error.clone()));
                }
                Err(error)
            }
        }
    }

    /// Remove an entry and best-effort unsubscribe on the wire
    pub async fn deregister(&self, id: &SubscriptionId) -> Result<()> {
        let entry = self
            .state
            .borrow_mut()
            .remove(id)
            .ok_or_else(|| StreamError::NotFound(id.to_string()))?;

        let message = unsubscribe_message(entry.kind, &entry.params)?;
        if let Err(e) = self.sender.send(message).await {
            warn!("Unsubscribe frame for {} not sent: {}", id, e);
        }

        log_subscription!("unsubscribed", id);
        Ok(())
    }

    /// Deregister every entry; returns how many were removed
    pub async fn deregister_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self
            .state
            .borrow()
            .entries
            .iter()
            .map(|entry| entry.id.clone())
            .collect();

        let mut removed = 0;
        for id in ids {
            match self.deregister(&id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to unsubscribe {}: {}", id, e),
            }
        }
        removed
    }

    /// Stored wire messages of confirmed entries, in registration order.
    /// Pending entries are skipped: their own queued send covers them.
    pub fn replay_messages(&self) -> Vec<(SubscriptionId, String)> {
        self.state
            .borrow()
            .entries
            .iter()
            .filter(|entry| entry.confirmed)
            .map(|entry| (entry.id.clone(), entry.wire_message.clone()))
            .collect()
    }

    /// Count one message against every entry whose kind matches `channel`
    /// and collect their callbacks in registration order.
    pub fn record_match(&self, channel: &str) -> (usize, Vec<MessageCallback>) {
        let mut state = self.state.borrow_mut();
        let mut matched = 0;
        let mut callbacks = Vec::new();

        for entry in state.entries.iter_mut().filter(|entry| entry.kind.matches_channel(channel)) {
            entry.messages_received += 1;
            matched += 1;
            callbacks.extend(entry.callbacks.iter().cloned());
        }

        (matched, callbacks)
    }

    /// Read-only projection of every entry
    pub fn snapshot(&self, connected: bool) -> Vec<SubscriptionInfo> {
        self.state
            .borrow()
            .entries
            .iter()
            .map(|entry| SubscriptionInfo {
                subscription_id: entry.id.clone(),
                subscription_type: entry.kind,
                params: entry.params.clone(),
                connected,
                messages_received: entry.messages_received,
                subscribed_at: entry.subscribed_at,
            })
            .collect()
    }
}
