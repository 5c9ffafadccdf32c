//! Identity-comparable event callbacks.

use std::fmt;
use std::sync::Arc;

use crate::event::Event;

/// Error returned by a failing observer
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

type Callback = dyn Fn(&Event) -> Result<(), ObserverError> + Send + Sync;

/// Application callback registered on a channel.
///
/// Clones share the same callback and compare equal; two observers built from
/// separate closures never do, even if the closures are identical. Keep a clone
/// around to unsubscribe later.
#[derive(Clone)]
pub struct Observer {
    callback: Arc<Callback>,
}

impl Observer {
    /// Wrap a callback that may fail
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Event) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Wrap a callback that never fails
    pub fn infallible<F>(callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self::new(move |event| {
            callback(event);
            Ok(())
        })
    }

    pub(crate) fn call(&self, event: &Event) -> Result<(), ObserverError> {
        (self.callback)(event)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.callback) as *const ()
    }
}

impl PartialEq for Observer {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Observer {}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observer({:p})", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_identity() {
        let a = Observer::infallible(|_| {});
        let b = Observer::infallible(|_| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_call_propagates_error() {
        let failing = Observer::new(|_| Err("nope".into()));
        let err = failing.call(&Event::message(Value::Null)).unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
