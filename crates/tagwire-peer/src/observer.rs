use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tagwire_codec::{Serializable, Tag, TypeRegistry};
use tracing::warn;

use crate::connection::Connection;
use crate::error::PeerError;
use crate::sync::{read, write};

/// Lifecycle and traffic notifications for one connection.
///
/// All callbacks run synchronously on the thread that caused the event:
/// the caller of `connect`/`write_sync`/`close`, or the background reader.
pub trait ConnectionObserver: Send + Sync {
    fn on_connected(&self, _connection: &Connection) {}

    /// Fired exactly once per connection, with the condition that ended it.
    fn on_disconnected(&self, _connection: &Connection, _reason: &PeerError) {}

    fn on_payload_sent(&self, _connection: &Connection, _payload: &dyn Serializable, _size: usize) {
    }

    fn on_payload_received(
        &self,
        _connection: &Connection,
        _payload: &Arc<dyn Serializable>,
        _size: usize,
    ) {
    }
}

type Handler = Arc<dyn Fn(&Connection, &dyn Serializable) + Send + Sync>;

/// Routes decoded payloads to typed handlers by exact tag.
///
/// Handlers for a tag run in registration order. A payload whose tag has
/// no handlers is ignored.
pub struct Dispatcher {
    registry: Arc<TypeRegistry>,
    handlers: RwLock<HashMap<Tag, Vec<Handler>>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for payloads of type `T`. Returns `T`'s tag.
    pub fn add_handler<T, F>(&self, handler: F) -> Tag
    where
        T: Serializable + Default + 'static,
        F: Fn(&Connection, &T) + Send + Sync + 'static,
    {
        let tag = self.registry.resolve_tag::<T>();
        let erased: Handler = Arc::new(
            move |connection: &Connection, payload: &dyn Serializable| match payload
                .downcast_ref::<T>()
            {
                Some(typed) => handler(connection, typed),
                None => warn!(
                    tag = %payload.tag(),
                    expected = std::any::type_name::<T>(),
                    "payload type does not match its handler"
                ),
            },
        );
        write(&self.handlers).entry(tag).or_default().push(erased);
        tag
    }

    /// Drop every handler registered for `T`. Returns how many were removed.
    pub fn remove_handlers<T>(&self) -> usize
    where
        T: Serializable + Default + 'static,
    {
        let tag = self.registry.resolve_tag::<T>();
        write(&self.handlers)
            .remove(&tag)
            .map_or(0, |removed| removed.len())
    }

    pub fn handler_count(&self, tag: Tag) -> usize {
        read(&self.handlers).get(&tag).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        write(&self.handlers).clear();
    }

    /// Invoke the handlers registered for the payload's own tag.
    /// Returns how many ran.
    pub fn dispatch(&self, connection: &Connection, payload: &dyn Serializable) -> usize {
        // Snapshot so handlers may register further handlers.
        let handlers = match read(&self.handlers).get(&payload.tag()) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };
        for handler in &handlers {
            handler(connection, payload);
        }
        handlers.len()
    }
}

impl ConnectionObserver for Dispatcher {
    fn on_payload_received(
        &self,
        connection: &Connection,
        payload: &Arc<dyn Serializable>,
        _size: usize,
    ) {
        self.dispatch(connection, payload.as_ref());
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<Tag> = read(&self.handlers).keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("Dispatcher").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tagwire_codec::{Ping, PingReply};

    use super::*;
    use crate::connection::ConnectionConfig;

    fn idle_connection() -> Arc<Connection> {
        Connection::new(ConnectionConfig::default().with_heartbeat(None))
    }

    #[test]
    fn dispatches_by_exact_tag_in_order() {
        let dispatcher = Dispatcher::new(Arc::new(tagwire_codec::TypeRegistry::with_builtins()));
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let order = Arc::clone(&order);
            dispatcher.add_handler::<Ping, _>(move |_, _| order.lock().unwrap().push(label));
        }
        {
            let order = Arc::clone(&order);
            dispatcher.add_handler::<PingReply, _>(move |_, _| order.lock().unwrap().push("reply"));
        }

        let connection = idle_connection();
        assert_eq!(dispatcher.dispatch(&connection, &Ping), 2);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

        assert_eq!(dispatcher.dispatch(&connection, &PingReply), 1);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "reply"]);
    }

    #[test]
    fn unhandled_tag_is_ignored() {
        let dispatcher = Dispatcher::new(Arc::new(tagwire_codec::TypeRegistry::with_builtins()));
        let connection = idle_connection();
        assert_eq!(dispatcher.dispatch(&connection, &Ping), 0);
    }

    #[test]
    fn remove_handlers_by_type() {
        let dispatcher = Dispatcher::new(Arc::new(tagwire_codec::TypeRegistry::with_builtins()));
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            dispatcher.add_handler::<Ping, _>(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(dispatcher.handler_count(Tag::PING), 3);

        assert_eq!(dispatcher.remove_handlers::<Ping>(), 3);
        assert_eq!(dispatcher.remove_handlers::<Ping>(), 0);

        let connection = idle_connection();
        dispatcher.dispatch(&connection, &Ping);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_may_register_more_handlers() {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(
            tagwire_codec::TypeRegistry::with_builtins(),
        )));
        {
            let inner = Arc::clone(&dispatcher);
            dispatcher.add_handler::<Ping, _>(move |_, _| {
                inner.add_handler::<PingReply, _>(|_, _| {});
            });
        }

        let connection = idle_connection();
        dispatcher.dispatch(&connection, &Ping);
        assert_eq!(dispatcher.handler_count(Tag::PING_REPLY), 1);
    }

    #[test]
    fn observer_entry_point_dispatches() {
        let dispatcher = Dispatcher::new(Arc::new(tagwire_codec::TypeRegistry::with_builtins()));
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            dispatcher.add_handler::<PingReply, _>(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let connection = idle_connection();
        let payload: Arc<dyn Serializable> = Arc::new(PingReply);
        dispatcher.on_payload_received(&connection, &payload, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
