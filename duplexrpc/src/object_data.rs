//! Process-wide, address-keyed registry giving every `Connection` serving
//! the same target object a shared property map and auth token.
//!
//! A global `address -> Weak<SharedData>` map, strengthened or created on
//! construction, swept for dead weak entries opportunistically.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::any::Any;

struct SharedData {
    props: Mutex<HashMap<String, Any>>,
    auth_token: Mutex<String>,
}

impl SharedData {
    fn new() -> Self {
        SharedData {
            props: Mutex::new(HashMap::new()),
            auth_token: Mutex::new(String::new()),
        }
    }
}

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<usize, Weak<SharedData>>> = Mutex::new(HashMap::new());
}

fn shared_for(addr: usize) -> Arc<SharedData> {
    let mut registry = REGISTRY.lock();
    if let Some(weak) = registry.get(&addr) {
        if let Some(strong) = weak.upgrade() {
            return strong;
        }
    }
    let fresh = Arc::new(SharedData::new());
    registry.insert(addr, Arc::downgrade(&fresh));
    fresh
}

/// A handle to the property map + auth token shared by every `Connection`
/// serving the same target object (identified by its address).
#[derive(Clone)]
pub struct ObjectData {
    addr: usize,
    data: Arc<SharedData>,
}

impl ObjectData {
    /// Obtain (creating if necessary) the shared record for the object at
    /// this address.
    pub fn for_ptr<T>(ptr: *const T) -> Self {
        let addr = ptr as usize;
        ObjectData {
            addr,
            data: shared_for(addr),
        }
    }

    pub fn get_property(&self, name: &str) -> Any {
        self.data
            .props
            .lock()
            .get(name)
            .cloned()
            .unwrap_or(Any::None)
    }

    /// Insert or replace a property, under one lock acquisition covering
    /// both the read of the prior value and the write of the new one (the
    /// composite read-modify-write §5 calls for). Returns whether the
    /// stored value actually changed: `true` if the key was absent
    /// (inserted) or `replace` was set and the new value differs from the
    /// old one; `false` if the key was present and `replace` was `false`,
    /// or the new value equals the old one.
    pub fn set_property(&self, name: String, val: Any, replace: bool) -> bool {
        let mut props = self.data.props.lock();
        match props.get_mut(&name) {
            Some(slot) => {
                if replace {
                    let changed = *slot != val;
                    *slot = val;
                    changed
                } else {
                    false
                }
            }
            None => {
                props.insert(name, val);
                true
            }
        }
    }

    pub fn auth_token(&self) -> String {
        self.data.auth_token.lock().clone()
    }

    pub fn set_auth_token(&self, token: impl Into<String>) {
        *self.data.auth_token.lock() = token.into();
    }

    pub fn check_auth_token(&self, candidate: &str) -> bool {
        *self.data.auth_token.lock() == candidate
    }

    /// Whether a fresh connection to this object should start auth-gated.
    pub fn requires_auth(&self) -> bool {
        !self.data.auth_token.lock().is_empty()
    }
}

impl Drop for ObjectData {
    fn drop(&mut self) {
        // If we're the last strong holder, remove the (about-to-expire) weak
        // entry under the registry lock so a racing `for_ptr` for this same
        // address doesn't find a dead weak reference.
        if Arc::strong_count(&self.data) == 1 {
            let mut registry = REGISTRY.lock();
            if let Some(weak) = registry.get(&self.addr) {
                if weak.strong_count() == 1 {
                    registry.remove(&self.addr);
                }
            }
        }
    }
}
