//! Named-event router.
//!
//! Maps event keys to ordered handler lists. One `Emitter` is owned per
//! dialed pipe; a listener shares a single `Emitter` across every
//! connection it accepts, so handlers disambiguate origin via the sender
//! argument. Handlers are removed by the id handle returned at
//! registration, never by closure equality.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::pipe::Pipe;
use crate::sync::lock;

/// Identity handle for a registered event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type EventHandler = Arc<dyn Fn(&Pipe, &[Value]) + Send + Sync>;

struct Registration {
    id: ListenerId,
    handler: EventHandler,
}

/// Event key → ordered handler list.
#[derive(Default)]
pub struct Emitter {
    listeners: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`. Returns the handle used to remove
    /// it again.
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Pipe, &[Value]) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners)
            .entry(event.to_owned())
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove the handler registered under `id` for `event`. Returns true
    /// if a handler was removed.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(registrations) = listeners.get_mut(event) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        let removed = registrations.len() < before;
        if registrations.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Deliver `args` to every handler currently registered for `event`,
    /// in registration order.
    ///
    /// The handler list is snapshotted under the lock and invoked outside
    /// it, so handlers may re-enter `on`/`off` (and emission from several
    /// connections may run concurrently).
    pub fn emit(&self, event: &str, sender: &Pipe, args: &[Value]) {
        let snapshot: Vec<EventHandler> = {
            let listeners = lock(&self.listeners);
            match listeners.get(event) {
                Some(registrations) => registrations
                    .iter()
                    .map(|registration| Arc::clone(&registration.handler))
                    .collect(),
                None => return,
            }
        };
        for handler in snapshot {
            handler(sender, args);
        }
    }

    /// Number of handlers currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.listeners)
            .get(event)
            .map_or(0, |registrations| registrations.len())
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = lock(&self.listeners);
        f.debug_struct("Emitter")
            .field("events", &listeners.len())
            .finish()
    }
}
