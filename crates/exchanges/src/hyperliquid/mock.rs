//! Scripted in-memory transport for tests
//!
//! Every channel opened by a [`MockTransport`] shares one state block, so a
//! test can push inbound frames, drop the live connection, and inspect every
//! frame sent across reconnects.

use crate::errors::{Result, StreamError};
use crate::traits::{Channel, Transport};

use async_trait::async_trait;
use flume::{Receiver, Sender};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use url::Url;

enum MockFrame {
    Text(String),
    Undecodable,
    Close,
}

#[derive(Default)]
struct MockState {
    sent: Vec<String>,
    open_count: u32,
    failing_opens: u32,
    fail_sends_after: Option<usize>,
    open_delay: Option<Duration>,
    inbound: Option<Sender<MockFrame>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a text frame on the live channel; false when none is open
    pub fn push_inbound(&self, text: impl Into<String>) -> bool {
        match &self.state.borrow().inbound {
            Some(tx) => tx.send(MockFrame::Text(text.into())).is_ok(),
            None => false,
        }
    }

    /// Deliver a frame whose payload is not valid UTF-8
    pub fn push_undecodable(&self) -> bool {
        match &self.state.borrow().inbound {
            Some(tx) => tx.send(MockFrame::Undecodable).is_ok(),
            None => false,
        }
    }

    /// Make the live channel report a peer close
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state.borrow_mut().inbound.take() {
            let _ = tx.send(MockFrame::Close);
        }
    }

    /// Make every open wait `delay` before it resolves
    pub fn delay_opens(&self, delay: Duration) {
        self.state.borrow_mut().open_delay = Some(delay);
    }

    pub fn fail_next_opens(&self, count: u32) {
        self.state.borrow_mut().failing_opens = count;
    }

    /// Fail every send once `count` frames have been sent in total
    pub fn fail_sends_after(&self, count: usize) {
        self.state.borrow_mut().fail_sends_after = Some(count);
    }

    pub fn clear_send_failures(&self) {
        self.state.borrow_mut().fail_sends_after = None;
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.borrow().sent.clone()
    }

    pub fn open_count(&self) -> u32 {
        self.state.borrow().open_count
    }
}

#[async_trait(?Send)]
impl Transport for MockTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn Channel>> {
        let delay = self.state.borrow().open_delay;
        if let Some(delay) = delay {
            monoio::time::sleep(delay).await;
        }

        let mut state = self.state.borrow_mut();
        state.open_count += 1;

        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(StreamError::Connection(format!("mock refused {url}")));
        }

        let (tx, rx) = flume::unbounded();
        state.inbound = Some(tx);

        Ok(Box::new(MockChannel {
            state: self.state.clone(),
            inbound: rx,
            closed: false,
        }))
    }
}

struct MockChannel {
    state: Rc<RefCell<MockState>>,
    inbound: Receiver<MockFrame>,
    closed: bool,
}

#[async_trait(?Send)]
impl Channel for MockChannel {
    async fn send(&mut self, text: &str) -> Result<()> {
        if self.closed {
            return Err(StreamError::Closed("mock channel closed".to_string()));
        }

        let mut state = self.state.borrow_mut();
        if state.fail_sends_after.is_some_and(|limit| state.sent.len() >= limit) {
            return Err(StreamError::Network("mock send failure".to_string()));
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String> {
        if self.closed {
            return Err(StreamError::Closed("mock channel closed".to_string()));
        }

        match monoio::time::timeout(timeout, self.inbound.recv_async()).await {
            Err(_) => Err(StreamError::Timeout(format!("no frame within {}ms", timeout.as_millis()))),
            Ok(Ok(MockFrame::Text(text))) => Ok(text),
            Ok(Ok(MockFrame::Undecodable)) => Err(StreamError::Serialization("mock frame is not UTF-8".to_string())),
            Ok(Ok(MockFrame::Close)) | Ok(Err(_)) => {
                self.closed = true;
                Err(StreamError::Closed("mock peer closed".to_string()))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Poll `condition` every millisecond until it holds or `within` elapses
pub async fn wait_for<F>(mut condition: F, within: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        monoio::time::sleep(Duration::from_millis(1)).await;
    }
}
