//! Single assignable handler backed by a listener registry.

use std::sync::{Arc, Mutex, PoisonError};

use crate::observer::Observer;
use crate::registry::ListenerRegistry;

/// Holds at most one handler, mirrored as one registry membership.
///
/// Assigning replaces the previous handler instead of adding a second one, and
/// assigning `None` clears it.
#[derive(Debug)]
pub struct SingleSlot {
    registry: Arc<ListenerRegistry>,
    current: Mutex<Option<Observer>>,
}

impl SingleSlot {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self {
            registry,
            current: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Option<Observer> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, handler: Option<Observer>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            self.registry.remove(&previous);
        }
        if let Some(handler) = handler {
            self.registry.add(handler.clone());
            *current = Some(handler);
        }
    }
}
