//! Worker-side client asking the owner for the session secret.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::channel::{Channel, ChannelError};
use crate::control::protocol::{ControlRequest, SecretReply};
use crate::event::EventKind;
use crate::observer::Observer;

/// Default time to wait for the owner's reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for secret client operations
#[derive(Debug)]
pub enum SecretClientError {
    /// Failed to send the request
    SendFailed(ChannelError),
    /// No reply arrived in time
    Timeout,
    /// The client stopped listening before a reply arrived
    Disconnected,
}

impl std::fmt::Display for SecretClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretClientError::SendFailed(e) => write!(f, "Failed to send request: {}", e),
            SecretClientError::Timeout => write!(f, "Timed out waiting for secret"),
            SecretClientError::Disconnected => write!(f, "Stopped listening before a reply arrived"),
        }
    }
}

impl std::error::Error for SecretClientError {}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<SecretReply>>>>;

/// Sends secret requests over a channel and matches replies by `request_id`.
///
/// The client registers one message observer on the channel for as long as it
/// lives. Replies whose `request_id` is unknown (already timed out, or meant
/// for someone else) are ignored.
pub struct SecretClient<C: Channel> {
    channel: Arc<C>,
    pending: Pending,
    next_id: AtomicU64,
    observer: Observer,
    timeout: Duration,
}

impl<C: Channel> SecretClient<C> {
    pub fn new(channel: Arc<C>) -> Self {
        Self::with_timeout(channel, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(channel: Arc<C>, timeout: Duration) -> Self {
        let pending: Pending = Arc::default();
        let observer = {
            let pending = pending.clone();
            Observer::infallible(move |event| {
                if let Some(reply) = SecretReply::from_message(&event.data) {
                    resolve(&pending, reply);
                }
            })
        };
        channel.subscribe(EventKind::Message, observer.clone());

        Self {
            channel,
            pending,
            next_id: AtomicU64::new(1),
            observer,
            timeout,
        }
    }

    /// Ask for the secret; `Ok(None)` means the owner has none
    pub async fn request_secret(&self) -> Result<Option<String>, SecretClientError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_table().insert(request_id, tx);
        // Removes the entry on every exit path, including a dropped future
        let _entry = PendingEntry {
            pending: &self.pending,
            request_id,
        };

        let request = ControlRequest::Secret {
            request_id: Some(Value::from(request_id)),
        };
        log::debug!("Requesting secret (request_id {})", request_id);
        self.channel
            .send(request.to_message())
            .map_err(SecretClientError::SendFailed)?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply.value),
            Ok(Err(_)) => Err(SecretClientError::Disconnected),
            Err(_) => Err(SecretClientError::Timeout),
        }
    }

    fn pending_table(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<SecretReply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Channel> Drop for SecretClient<C> {
    fn drop(&mut self) {
        self.channel.unsubscribe(&EventKind::Message, &self.observer);
    }
}

/// Pending table entry of one in-flight request
struct PendingEntry<'a> {
    pending: &'a Pending,
    request_id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
    }
}

fn resolve(pending: &Pending, reply: SecretReply) {
    let Some(request_id) = reply.request_id.as_u64() else {
        log::debug!("Ignoring secret reply with request_id {}", reply.request_id);
        return;
    };
    let waiter = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&request_id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => log::debug!("No pending request for request_id {}", request_id),
    }
}
