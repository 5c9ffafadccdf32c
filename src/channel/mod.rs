//! Bidirectional message channels and the factories that open them.
//!
//! A channel carries JSON values between an owner and a background worker.
//! Transports provided here:
//! - [`LineChannel`]: newline-delimited JSON over any async reader/writer pair,
//!   including the process's own stdin/stdout and in-memory pairs
//! - [`ProcessFactory`]: spawns a worker process and talks to it over its stdio

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use serde_json::Value;

use crate::event::{Event, EventKind};
use crate::observer::Observer;
use crate::registry::{DispatchOutcome, ListenerRegistry};
use crate::slot::SingleSlot;

pub mod line;
pub mod process;

pub use line::LineChannel;
pub use process::ProcessFactory;

/// Error type for channel operations
#[derive(Debug)]
pub enum ChannelError {
    /// Channel construction needs a running Tokio runtime
    NoRuntime,
    /// Failed to spawn the worker process
    Spawn(std::io::Error),
    /// Worker process did not expose a piped stdin/stdout
    MissingPipe(&'static str),
    /// Failed to serialize an outbound message
    Serialize(serde_json::Error),
    /// The outbound side of the channel is closed
    Closed,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::NoRuntime => write!(f, "No Tokio runtime available to drive the channel"),
            ChannelError::Spawn(e) => write!(f, "Failed to spawn worker: {}", e),
            ChannelError::MissingPipe(which) => write!(f, "Worker {} is not piped", which),
            ChannelError::Serialize(e) => write!(f, "Failed to serialize message: {}", e),
            ChannelError::Closed => write!(f, "Channel is closed"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Spawn(e) => Some(e),
            ChannelError::Serialize(e) => Some(e),
            _ => None,
        }
    }
}

/// Surface shared by raw channels and their proxies
pub trait Channel: Send + Sync + 'static {
    /// Queue a message for the other end
    fn send(&self, message: Value) -> Result<(), ChannelError>;

    /// Register an observer for events of `kind`
    fn subscribe(&self, kind: EventKind, observer: Observer);

    /// Deregister an observer; no-op if it is not registered for `kind`
    fn unsubscribe(&self, kind: &EventKind, observer: &Observer);

    /// Handler currently assigned to the message slot
    fn handler(&self) -> Option<Observer>;

    /// Assign (or clear, with `None`) the message slot
    fn set_handler(&self, handler: Option<Observer>);
}

/// Options for opening a channel
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Label used in log lines
    pub name: Option<String>,
    /// Extra arguments for the worker
    pub args: Vec<String>,
    /// Extra environment for the worker
    pub env: Vec<(String, String)>,
    /// Working directory for the worker
    pub current_dir: Option<PathBuf>,
}

/// Opens channels from a locator and optional configuration
pub trait ChannelFactory {
    type Channel: Channel;

    fn create(
        &self,
        locator: &str,
        config: Option<&ChannelConfig>,
    ) -> Result<Self::Channel, ChannelError>;
}

/// Native listener table of a raw channel: one registry per event kind plus
/// the message slot.
#[derive(Debug)]
pub(crate) struct Listeners {
    by_kind: Mutex<HashMap<EventKind, Arc<ListenerRegistry>>>,
    slot: SingleSlot,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        let messages = Arc::new(ListenerRegistry::new());
        let mut by_kind = HashMap::new();
        by_kind.insert(EventKind::Message, messages.clone());
        Self {
            by_kind: Mutex::new(by_kind),
            slot: SingleSlot::new(messages),
        }
    }

    fn registry(&self, kind: &EventKind) -> Option<Arc<ListenerRegistry>> {
        self.by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    pub(crate) fn subscribe(&self, kind: EventKind, observer: Observer) {
        let registry = self
            .by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .clone();
        registry.add(observer);
    }

    pub(crate) fn unsubscribe(&self, kind: &EventKind, observer: &Observer) {
        if let Some(registry) = self.registry(kind) {
            registry.remove(observer);
        }
    }

    pub(crate) fn handler(&self) -> Option<Observer> {
        self.slot.get()
    }

    pub(crate) fn set_handler(&self, handler: Option<Observer>) {
        self.slot.set(handler);
    }

    pub(crate) fn dispatch(&self, event: &Event) -> DispatchOutcome {
        match self.registry(&event.kind) {
            Some(registry) => registry.dispatch(event),
            None => DispatchOutcome::default(),
        }
    }
}
