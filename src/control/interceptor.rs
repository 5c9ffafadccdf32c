//! The single native message subscription of a proxied channel.

use std::sync::{Arc, Weak};

use crate::channel::Channel;
use crate::control::protocol::{self, ControlRequest, Inbound, SecretReply, SECRET_KEY};
use crate::event::Event;
use crate::observer::Observer;
use crate::registry::ListenerRegistry;
use crate::store::SecretStore;

/// Answers control requests from the secret store and forwards everything else
/// to the application's observers.
pub struct ControlInterceptor<C> {
    channel: Weak<C>,
    store: Arc<dyn SecretStore>,
    observers: Arc<ListenerRegistry>,
}

impl<C: Channel> ControlInterceptor<C> {
    pub fn new(
        channel: Weak<C>,
        store: Arc<dyn SecretStore>,
        observers: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            channel,
            store,
            observers,
        }
    }

    /// Handle one inbound message to completion
    pub fn handle(&self, event: &Event) {
        match protocol::classify(&event.data) {
            Inbound::Control(request) => self.answer(&request),
            Inbound::Ordinary => {
                self.observers.dispatch(event);
            }
        }
    }

    fn answer(&self, request: &ControlRequest) {
        log::debug!("Control request {} ({})", request.discriminant(), request.correlation());

        let value = match self.store.get(SECRET_KEY) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Secret lookup failed, replying without a value: {}", e);
                None
            }
        };
        if value.is_none() {
            log::debug!("No secret stored under {}", SECRET_KEY);
        }

        let reply = SecretReply::answering(request, value);
        let Some(channel) = self.channel.upgrade() else {
            log::debug!("Channel gone, dropping {} reply", reply.kind);
            return;
        };
        if let Err(e) = channel.send(reply.to_message()) {
            log::debug!("Dropping {} reply: {}", reply.kind, e);
        }
    }

    /// Observer that routes events into this interceptor
    pub fn into_observer(self) -> Observer {
        Observer::infallible(move |event| self.handle(event))
    }
}
