//! Multiplexing proxy for worker message channels.
//!
//! A worker channel natively hands inbound messages to a single subscription.
//! [`ChannelProxy`] takes that subscription for itself and:
//! - fans ordinary messages out to any number of application observers,
//!   including a single assignable handler slot
//! - answers in-band secret requests from a [`SecretStore`] without the
//!   application ever seeing them
//!
//! ```text
//! raw channel ──► ControlInterceptor ──┬─► control request ──► reply on channel
//!                                      └─► ordinary ──► ListenerRegistry ──► observers
//! ```
//!
//! Channels are opened through a [`ChannelFactory`]; wrapping the factory in a
//! [`ProxyFactory`] proxies every channel it opens.

pub mod capture;
pub mod channel;
pub mod control;
pub mod event;
pub mod observer;
pub mod proxy;
pub mod registry;
pub mod slot;
pub mod store;

pub use capture::{CredentialCapture, RequestHeaders};
pub use channel::{Channel, ChannelConfig, ChannelError, ChannelFactory, LineChannel, ProcessFactory};
pub use event::{Event, EventKind};
pub use observer::{Observer, ObserverError};
pub use proxy::{ChannelProxy, ProxyFactory};
pub use registry::{DispatchOutcome, ListenerRegistry};
pub use slot::SingleSlot;
pub use store::{SecretStore, SecretStoreError, Session, SessionStore};
