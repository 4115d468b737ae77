//! Per IPC context table of remote object proxies.
//!
//! The table only holds weak references; a proxy removes its own entry when
//! the last strong reference goes away, and a death notification removes the
//! entry immediately so the dead instance is never handed out again.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use dashmap::{mapref::entry::Entry, DashMap};
use libc::{pid_t, uid_t};
use tracing::debug;

use crate::{
    config::Config,
    protocol::{self, RpcProtocol},
    remote_object::RemoteObject,
    remote_request::RemoteRequest,
};

pub struct ObjectRegistry {
    dev: String,
    protocol: &'static dyn RpcProtocol,
    remote_objects: DashMap<u32, Weak<RemoteObject>>,
}

impl ObjectRegistry {
    /// Context for `dev` using the built-in protocol choice for that device.
    pub fn new(dev: impl Into<String>) -> Arc<Self> {
        let dev = dev.into();
        let protocol = protocol::for_device(&dev);
        Self::with_protocol(dev, protocol)
    }
    pub fn with_config(dev: impl Into<String>, config: &Config) -> Arc<Self> {
        let dev = dev.into();
        let protocol = config.protocol_for_device(&dev);
        Self::with_protocol(dev, protocol)
    }
    pub fn with_protocol(dev: impl Into<String>, protocol: &'static dyn RpcProtocol) -> Arc<Self> {
        Arc::new(Self {
            dev: dev.into(),
            protocol,
            remote_objects: DashMap::new(),
        })
    }

    pub fn dev(&self) -> &str {
        &self.dev
    }
    pub fn protocol(&self) -> &'static dyn RpcProtocol {
        self.protocol
    }

    /// Request for an incoming transaction on this context, data still to be
    /// attached with [`RemoteRequest::set_data`].
    pub fn new_request(self: &Arc<Self>, pid: pid_t, euid: uid_t) -> RemoteRequest {
        RemoteRequest::new(self.clone(), self.protocol, pid, euid)
    }

    /// The live proxy for `handle`, created if there is none.
    ///
    /// Lookup and creation happen under the entry lock, so concurrent callers
    /// always end up with the same instance.
    pub fn resolve(self: &Arc<Self>, handle: u32) -> Arc<RemoteObject> {
        // a stale strong ref must not be dropped while the entry is locked,
        // its Drop removes the entry
        let mut stale = None;
        let obj = match self.remote_objects.entry(handle) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                Some(obj) if !obj.is_dead() => obj,
                other => {
                    stale = other;
                    let obj = RemoteObject::new(self.clone(), handle);
                    entry.insert(Arc::downgrade(&obj));
                    obj
                }
            },
            Entry::Vacant(entry) => {
                let obj = RemoteObject::new(self.clone(), handle);
                entry.insert(Arc::downgrade(&obj));
                obj
            }
        };
        drop(stale);
        obj
    }

    /// Existing live proxy for `handle`, never creates one.
    pub fn get(&self, handle: u32) -> Option<Arc<RemoteObject>> {
        self.remote_objects
            .get(&handle)
            .and_then(|v| v.upgrade())
            .filter(|obj| !obj.is_dead())
    }

    /// Delivers a death notification for `handle`. Returns whether a live
    /// proxy was found and marked dead.
    pub fn handle_death_notification(&self, handle: u32) -> bool {
        let Some(obj) = self
            .remote_objects
            .remove(&handle)
            .and_then(|(_, v)| v.upgrade())
        else {
            debug!("death notification for unknown handle {handle}");
            return false;
        };
        obj.handle_death_notification()
    }

    /// Number of handles with a proxy still registered.
    pub fn live_objects(&self) -> usize {
        self.remote_objects.len()
    }

    pub(crate) fn forget(&self, handle: u32, obj: *const RemoteObject) {
        self.remote_objects
            .remove_if(&handle, |_, v| std::ptr::eq(v.as_ptr(), obj));
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("dev", &self.dev)
            .field("protocol", &self.protocol.name())
            .field("remote_objects", &self.remote_objects.len())
            .finish()
    }
}
