//! Multiplexing proxy over a raw channel.

use std::sync::Arc;

use serde_json::Value;

use crate::channel::{Channel, ChannelConfig, ChannelError, ChannelFactory};
use crate::control::ControlInterceptor;
use crate::event::EventKind;
use crate::observer::Observer;
use crate::registry::ListenerRegistry;
use crate::slot::SingleSlot;
use crate::store::SecretStore;

/// Wraps a raw channel, owning its only native message subscription.
///
/// Message observers and the handler slot live in the proxy's own registry and
/// never see control requests; those are answered from the secret store. Other
/// event kinds go straight to the raw channel.
pub struct ChannelProxy<C: Channel> {
    inner: Arc<C>,
    observers: Arc<ListenerRegistry>,
    slot: SingleSlot,
    interceptor: Observer,
}

impl<C: Channel> ChannelProxy<C> {
    /// Wrap a freshly opened channel. Any handler already assigned on `inner`
    /// is cleared so that the interceptor is its only message subscriber.
    /// Outside this crate, proxies are opened through [`ProxyFactory`].
    pub(crate) fn new(inner: C, store: Arc<dyn SecretStore>) -> Self {
        inner.set_handler(None);
        let inner = Arc::new(inner);
        let observers = Arc::new(ListenerRegistry::new());
        let interceptor =
            ControlInterceptor::new(Arc::downgrade(&inner), store, observers.clone()).into_observer();
        inner.subscribe(EventKind::Message, interceptor.clone());

        Self {
            inner,
            slot: SingleSlot::new(observers.clone()),
            observers,
            interceptor,
        }
    }

    /// Number of message observers, handler included
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl<C: Channel> Channel for ChannelProxy<C> {
    fn send(&self, message: Value) -> Result<(), ChannelError> {
        self.inner.send(message)
    }

    fn subscribe(&self, kind: EventKind, observer: Observer) {
        match kind {
            EventKind::Message => self.observers.add(observer),
            other => self.inner.subscribe(other, observer),
        }
    }

    fn unsubscribe(&self, kind: &EventKind, observer: &Observer) {
        match kind {
            EventKind::Message => {
                self.observers.remove(observer);
            }
            other => self.inner.unsubscribe(other, observer),
        }
    }

    fn handler(&self) -> Option<Observer> {
        self.slot.get()
    }

    fn set_handler(&self, handler: Option<Observer>) {
        self.slot.set(handler);
    }
}

impl<C: Channel> Drop for ChannelProxy<C> {
    fn drop(&mut self) {
        self.inner.unsubscribe(&EventKind::Message, &self.interceptor);
    }
}

/// Factory that proxies every channel its inner factory opens
pub struct ProxyFactory<F> {
    inner: F,
    store: Arc<dyn SecretStore>,
}

impl<F: ChannelFactory> ProxyFactory<F> {
    pub fn new(inner: F, store: Arc<dyn SecretStore>) -> Self {
        Self { inner, store }
    }
}

impl<F: ChannelFactory> ChannelFactory for ProxyFactory<F> {
    type Channel = ChannelProxy<F::Channel>;

    fn create(
        &self,
        locator: &str,
        config: Option<&ChannelConfig>,
    ) -> Result<Self::Channel, ChannelError> {
        let channel = self.inner.create(locator, config)?;
        log::debug!("Proxying channel for {}", locator);
        Ok(ChannelProxy::new(channel, self.store.clone()))
    }
}
