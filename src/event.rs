//! Events delivered by a channel to its observers.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

/// Kind of event a channel delivers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An inbound message from the other end
    Message,
    /// The transport reported an error (payload is the error text)
    Error,
    /// The inbound side reached end of stream
    Close,
    /// The worker process exited (payload is `{"code": <i32|null>}`)
    Exit,
    /// Any other kind, passed through untouched
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Message => "message",
            EventKind::Error => "error",
            EventKind::Close => "close",
            EventKind::Exit => "exit",
            EventKind::Other(kind) => kind,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "message" => EventKind::Message,
            "error" => EventKind::Error,
            "close" => EventKind::Close,
            "exit" => EventKind::Exit,
            other => EventKind::Other(other.to_string()),
        })
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

/// A single delivery from a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub data: Value,
}

impl Event {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self { kind, data }
    }

    /// Shorthand for an inbound message event
    pub fn message(data: Value) -> Self {
        Self::new(EventKind::Message, data)
    }

    /// Value of the `type` discriminant, if the payload is an object carrying one
    pub fn discriminant(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }
}
