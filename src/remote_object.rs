//! Proxy for an object living in another process.

use std::{
    fmt,
    future::Future,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::Notify;
use tracing::debug;

use crate::{
    error::{Error, Result},
    registry::ObjectRegistry,
};

type DeathHandler = Box<dyn FnOnce(&RemoteObject) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeathHandlerId(u64);

/// The local side of a remote handle.
///
/// At most one live instance exists per handle and [`ObjectRegistry`]; once
/// dead an instance stays dead and the registry hands out a fresh one for the
/// same handle value.
pub struct RemoteObject {
    registry: Arc<ObjectRegistry>,
    handle: u32,
    dead: Arc<AtomicBool>,
    death_notify: Arc<Notify>,
    death_handlers: Mutex<Vec<(DeathHandlerId, DeathHandler)>>,
    handler_counter: AtomicU64,
}

impl RemoteObject {
    /// Only the registry creates proxies, see [`ObjectRegistry::resolve`].
    pub(crate) fn new(registry: Arc<ObjectRegistry>, handle: u32) -> Arc<Self> {
        debug!("new remote object for handle {handle} on {}", registry.dev());
        Arc::new(Self {
            registry,
            handle,
            dead: Arc::new(AtomicBool::new(false)),
            death_notify: Arc::new(Notify::new()),
            death_handlers: Mutex::new(Vec::new()),
            handler_counter: AtomicU64::new(1),
        })
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }
    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }
    /// The handle, if it may still be used for a transaction.
    pub fn ensure_alive(&self) -> Result<u32> {
        if self.is_dead() {
            Err(Error::DeadBinder(self.handle))
        } else {
            Ok(self.handle)
        }
    }

    /// Runs `handler` once when the remote dies. Never runs if the object is
    /// already dead.
    pub fn add_death_handler(
        &self,
        handler: impl FnOnce(&RemoteObject) + Send + 'static,
    ) -> DeathHandlerId {
        let id = DeathHandlerId(self.handler_counter.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.lock_handlers();
        if !self.is_dead() {
            handlers.push((id, Box::new(handler)));
        }
        id
    }
    /// Returns whether the handler was still pending.
    pub fn remove_death_handler(&self, id: DeathHandlerId) -> bool {
        let mut handlers = self.lock_handlers();
        let len = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != len
    }

    /// future returns when the remote object died
    pub fn death_notification(&self) -> impl Future<Output = ()> + Send + 'static {
        let notify = self.death_notify.clone();
        let dead = self.dead.clone();
        async move {
            let notified = notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            if !dead.load(Ordering::Acquire) {
                notified.await
            }
        }
    }

    /// Flips the object to dead and fires the subscribers. Only the first
    /// call has any effect.
    pub(crate) fn handle_death_notification(&self) -> bool {
        if self.dead.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("remote object {} on {} died", self.handle, self.registry.dev());
        self.death_notify.notify_waiters();
        let handlers = std::mem::take(&mut *self.lock_handlers());
        for (_, handler) in handlers {
            handler(self);
        }
        true
    }

    fn lock_handlers(&self) -> MutexGuard<'_, Vec<(DeathHandlerId, DeathHandler)>> {
        self.death_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("dev", &self.registry.dev())
            .field("handle", &self.handle)
            .field("dead", &self.is_dead())
            .finish()
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        self.registry.forget(self.handle, self as *const Self);
    }
}

/// Accessors usable on an optional proxy; an absent proxy reads as dead.
pub trait RemoteObjectExt {
    fn handle(&self) -> Option<u32>;
    fn registry(&self) -> Option<&Arc<ObjectRegistry>>;
    fn is_dead(&self) -> bool;
}

impl<T: Deref<Target = RemoteObject>> RemoteObjectExt for Option<T> {
    fn handle(&self) -> Option<u32> {
        self.as_deref().map(RemoteObject::handle)
    }
    fn registry(&self) -> Option<&Arc<ObjectRegistry>> {
        self.as_deref().map(RemoteObject::registry)
    }
    fn is_dead(&self) -> bool {
        self.as_deref().is_none_or(RemoteObject::is_dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn death_is_terminal_and_fires_once() {
        let registry = ObjectRegistry::new("/dev/binder");
        let obj = registry.resolve(11);
        let fired = Arc::new(AtomicUsize::new(0));
        let removed = obj.add_death_handler(|_| panic!("removed handler ran"));
        obj.add_death_handler({
            let fired = fired.clone();
            move |obj| {
                assert!(obj.is_dead());
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(obj.remove_death_handler(removed));
        assert!(!obj.remove_death_handler(removed));
        assert_eq!(obj.ensure_alive().unwrap(), 11);

        assert!(registry.handle_death_notification(11));
        assert!(!obj.handle_death_notification());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(obj.is_dead());
        assert!(matches!(obj.ensure_alive(), Err(Error::DeadBinder(11))));

        obj.add_death_handler(|_| panic!("handler added after death ran"));
        assert!(!obj.handle_death_notification());
    }

    #[test]
    fn optional_proxy_accessors() {
        let none: Option<&RemoteObject> = None;
        assert!(none.is_dead());
        assert_eq!(none.handle(), None);
        assert!(none.registry().is_none());

        let registry = ObjectRegistry::new("/dev/binder");
        let some = Some(registry.resolve(4));
        assert!(!some.is_dead());
        assert_eq!(some.handle(), Some(4));
        assert_eq!(some.registry().map(|r| r.dev()), Some("/dev/binder"));
    }

    #[tokio::test]
    async fn death_notification_future() {
        let registry = ObjectRegistry::new("/dev/binder");
        let obj = registry.resolve(12);
        let waiter = tokio::spawn(obj.death_notification());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        registry.handle_death_notification(12);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("death notification did not fire")
            .unwrap();

        // already dead: resolves immediately
        tokio::time::timeout(Duration::from_secs(5), obj.death_notification())
            .await
            .unwrap();
    }
}
