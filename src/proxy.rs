//! Move-only host-side handles to remote values.
//!
//! Grounded on the teacher's `vcl/backend.rs` `Backend<S, T>`, whose `Drop`
//! impl unregisters the wrapped C object — generalized here from a
//! long-lived service object into a plain data handle, with a `Weak`
//! back-reference (instead of the teacher's always-valid C pointer) since a
//! `Proxy` must tolerate its `Bridge` already being gone.

use std::fmt;
use std::rc::Weak;

use crate::bridge::{BridgeId, BridgeInner};
use crate::error::{Error, Result};

/// A host reference to a single remote value. Move-only: there is no
/// `Clone` impl, since cloning would double-drop the remote index. Use
/// [`Proxy::dup`] to ask the remote side for an independently-owned copy.
pub struct Proxy {
    remote_index: Option<i64>,
    bridge: Weak<std::cell::RefCell<BridgeInner>>,
    bridge_id: BridgeId,
}

impl Proxy {
    pub(crate) fn new(
        remote_index: i64,
        bridge: &std::rc::Rc<std::cell::RefCell<BridgeInner>>,
        bridge_id: BridgeId,
    ) -> Self {
        Proxy {
            remote_index: Some(remote_index),
            bridge: std::rc::Rc::downgrade(bridge),
            bridge_id,
        }
    }

    /// `true` once the handle has been transferred out (e.g. returned from a
    /// host callable) and no longer owns a remote index.
    pub fn is_null(&self) -> bool {
        self.remote_index.is_none()
    }

    pub(crate) fn bridge_id(&self) -> BridgeId {
        self.bridge_id
    }

    pub(crate) fn remote_index(&self) -> Result<i64> {
        self.remote_index
            .ok_or(Error::Misuse("use of a consumed proxy"))
    }

    pub(crate) fn upgrade(&self) -> Option<std::rc::Rc<std::cell::RefCell<BridgeInner>>> {
        self.bridge.upgrade()
    }

    /// Consume the proxy and hand back its raw RemoteIndex without running
    /// the drop-triggered `~` — used when ownership is being transferred to
    /// the remote side (e.g. returning a value from a host callable).
    pub(crate) fn into_raw(mut self) -> Result<i64> {
        self.remote_index.take().ok_or(Error::Misuse("use of a consumed proxy"))
    }

    /// Assert this proxy belongs to `bridge_id`, failing synchronously
    /// without touching the transport.
    pub(crate) fn check_bridge(&self, bridge_id: BridgeId) -> Result<()> {
        if self.bridge_id != bridge_id {
            return Err(Error::Misuse(
                "proxy belongs to a different bridge instance",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("remote_index", &self.remote_index)
            .field("bridge_id", &self.bridge_id)
            .finish()
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        let Some(ri) = self.remote_index.take() else {
            return;
        };
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };
        let mut inner = bridge.borrow_mut();
        if inner.terminated() {
            return;
        }
        // Best effort: a destructor cannot propagate an I/O error, and a
        // dying transport will drop the subprocess's own table anyway.
        let _ = inner.send_drop(ri);
    }
}

/// A [`Proxy`] to a remote exception, permitted to outlive its `Bridge`.
/// The description is captured eagerly at construction so it remains valid
/// after termination.
pub struct ExceptionProxy {
    proxy: Proxy,
    description: String,
}

impl ExceptionProxy {
    pub(crate) fn new(proxy: Proxy, description: String) -> Self {
        ExceptionProxy { proxy, description }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub(crate) fn into_proxy(self) -> Proxy {
        self.proxy
    }
}

impl fmt::Debug for ExceptionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionProxy")
            .field("description", &self.description)
            .finish()
    }
}

impl fmt::Display for ExceptionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
