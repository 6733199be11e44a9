//! Local event bus
//!
//! A [`Bus`] lets any number of listeners observe the events of one session
//! without each owning a connection. It is constructed per session and
//! cloned into whatever needs it; clones share the same listeners and the
//! same attached [`Tunnel`].
//!
//! [`Bus::emit`] is used for events produced locally: it sends them through
//! the tunnel and echoes them to the local listeners right away.
//! [`Bus::deliver`] is used for events received from the network and only
//! fans them out. A panicking listener is logged and skipped; the remaining
//! listeners still see the event.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, PoisonError, RwLock, Weak},
};

use tracing::{debug, warn};

use crate::{event::Event, session::Tunnel};

/// A listener callback
///
/// Identity is the `Arc` allocation: registering clones of the same `Arc`
/// twice keeps a single entry.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Tunnel shared by every clone of a bus
pub type SharedTunnel = Arc<dyn Tunnel + Send + Sync>;

#[derive(Default)]
struct Registry {
    handlers: Mutex<Vec<Handler>>,
    tunnel: RwLock<Option<SharedTunnel>>,
}

impl Registry {
    fn handlers(&self) -> std::sync::MutexGuard<'_, Vec<Handler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, handler: &Handler) {
        self.handlers().retain(|h| !Arc::ptr_eq(h, handler));
    }
}

/// Publish/subscribe hub for the events of one session
#[derive(Clone, Default)]
pub struct Bus {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("listeners", &self.listener_count())
            .field("online", &self.is_online())
            .finish()
    }
}

/// Registration of a listener on a [`Bus`]
///
/// Dropping a subscription leaves the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Clone)]
pub struct Subscription {
    registry: Weak<Registry>,
    handler: Handler,
}

impl Subscription {
    /// Removes the listener from the bus
    ///
    /// Does nothing when the bus is already gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.handler);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl Bus {
    /// Creates an offline bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus sending through `tunnel`
    pub fn with_tunnel(tunnel: SharedTunnel) -> Self {
        let bus = Self::new();
        bus.attach(tunnel);
        bus
    }

    /// Sends future emitted events through `tunnel`
    pub fn attach(&self, tunnel: SharedTunnel) {
        *self
            .registry
            .tunnel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tunnel);
    }

    /// Switches the bus to local-only operation
    pub fn detach(&self) {
        *self
            .registry
            .tunnel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn tunnel(&self) -> Option<SharedTunnel> {
        self.registry
            .tunnel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a tunnel is attached and open
    pub fn is_online(&self) -> bool {
        self.tunnel().is_some_and(|t| t.is_ready())
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.registry.handlers().len()
    }

    /// Registers a listener
    ///
    /// Registering the same handler again keeps one registration, so it is
    /// still called once per event.
    pub fn on(&self, handler: Handler) -> Subscription {
        let mut handlers = self.registry.handlers();
        if !handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            handlers.push(handler.clone());
        }

        Subscription {
            registry: Arc::downgrade(&self.registry),
            handler,
        }
    }

    /// Sends a locally produced event and echoes it to the local listeners
    ///
    /// # Returns
    ///
    /// Whether the tunnel accepted the event; always `false` offline
    pub fn emit(&self, event: &Event) -> bool {
        let sent = match self.tunnel() {
            Some(tunnel) => {
                let sent = tunnel.send(event);
                if !sent {
                    debug!(kind = event.kind(), "tunnel not ready, event not sent");
                }
                sent
            }
            None => false,
        };

        self.fan_out(event);
        sent
    }

    /// Fans an event received from the network out to the local listeners
    pub fn deliver(&self, event: &Event) {
        self.fan_out(event);
    }

    fn fan_out(&self, event: &Event) {
        // Listeners may subscribe or unsubscribe while being called.
        let handlers = self.registry.handlers().clone();

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                warn!(
                    kind = event.kind(),
                    reason = panic_message(panic.as_ref()),
                    "event listener panicked"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}
