//! Inbound message router
//!
//! Fans each message out to the callbacks of every matching subscription,
//! then to the poll queue.

use crate::hyperliquid::registry::SubscriptionRegistry;
use crate::hyperliquid::types::{CallbackResult, InboundMessage, MessageCallback, QueuedMessage};
use hyperstream_core::PerfTimer;

use flume::Sender;
use std::future::Future;
use std::task::Poll;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MessageRouter {
    registry: SubscriptionRegistry,
    queue: Sender<QueuedMessage>,
}

impl MessageRouter {
    pub fn new(registry: SubscriptionRegistry, queue: Sender<QueuedMessage>) -> Self {
        Self { registry, queue }
    }

    /// Route one parsed message; returns the number of matched subscriptions
    pub async fn route(&self, message: InboundMessage) -> usize {
        let timer = PerfTimer::start("hyperliquid_dispatch");
        let (matched, callbacks) = self.registry.record_match(&message.channel);
        if !callbacks.is_empty() {
            dispatch(&callbacks, &message).await;
        }
        drop(timer);

        if self.queue.send(QueuedMessage::from(&message)).is_err() {
            debug!("Poll queue closed, message not queued");
        }
        matched
    }
}

fn report(result: CallbackResult, message: &InboundMessage) {
    if let Err(e) = result {
        warn!("Callback error on {}: {:#}", message.channel, e);
    }
}

/// Invoke callbacks in registration order. Sync callbacks run inline. An
/// async callback is polled once where it is reached, so it starts before
/// any later callback; if it suspends it continues as a spawned task and is
/// awaited with the others before returning.
async fn dispatch(callbacks: &[MessageCallback], message: &InboundMessage) {
    let mut pending = Vec::new();

    for callback in callbacks {
        match callback {
            MessageCallback::Sync(f) => report(f(message), message),
            MessageCallback::Async(f) => {
                let mut future = f(message.clone());
                let first_poll = std::future::poll_fn(|cx| Poll::Ready(future.as_mut().poll(cx))).await;
                match first_poll {
                    Poll::Ready(result) => report(result, message),
                    Poll::Pending => pending.push(monoio::spawn(future)),
                }
            }
        }
    }

    for task in pending {
        report(task.await, message);
    }
}
