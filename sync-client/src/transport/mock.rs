//! Mock transport for testing.
//!
//! Allows queueing server frames and capturing sent frames for
//! verification. `recv()` parks until a frame is queued, so a connection
//! driven by the client task stays open like a real one would.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use sync_types::Frame;
use tokio::sync::Notify;

/// Mock transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<MockState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connected_url: Option<String>,
    sent: Vec<Frame>,
    queue: VecDeque<Frame>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame to be returned by a later `recv()` call.
    pub fn queue_frame(&self, frame: Frame) {
        let mut state = self.inner.state.lock().unwrap();
        state.queue.push_back(frame);
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// All frames sent so far.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.inner.state.lock().unwrap().sent.clone()
    }

    /// The URL passed to the last successful `connect()`.
    pub fn connected_url(&self) -> Option<String> {
        self.inner.state.lock().unwrap().connected_url.clone()
    }

    /// Cause the next `connect()` to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.state.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.state.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Cause the next `recv()` to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        let mut state = self.inner.state.lock().unwrap();
        state.fail_next_recv = Some(error.to_string());
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(error) = state.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        state.connected = true;
        state.connected_url = Some(url.to_string());
        Ok(())
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = state.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        state.sent.push(frame.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        loop {
            // Register for wakeup before inspecting the queue, otherwise a
            // frame queued between the check and the await is missed.
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock().unwrap();
                if let Some(error) = state.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }
                if let Some(frame) = state.queue.pop_front() {
                    return Ok(frame);
                }
                if !state.connected {
                    return Err(TransportError::ConnectionClosed);
                }
            }
            notified.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.state.lock().unwrap().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().unwrap();
        state.connected = false;
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}
