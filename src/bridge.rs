//! Bridge construction, teardown, and the shared mutable state a reentrant
//! dispatcher operates over.
//!
//! Grounded on the teacher's `TestCtx` construction/teardown pattern (spin up
//! the foreign side, hand back a handle, tear it down exactly once) combined
//! with `wasmerio-wasmer`'s `Store` — shared, interior-mutable state reached
//! through `Rc<RefCell<_>>` so a host callable invoked mid-dispatch can drive
//! further commands against the same bridge.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, info_span};

use crate::codec::{frame_header, pack_int, unpack_int, Opcode};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::ops;
use crate::remote_table::RemoteTable;
use crate::transport::{ChildTransport, Transport};

/// Opaque identity for a single `Bridge` instance, used to reject a [`crate::proxy::Proxy`]
/// that has wandered into the wrong bridge.
pub type BridgeId = u64;

fn next_bridge_id() -> BridgeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Globals resolved once at construction and reused for the bridge's entire
/// lifetime. `operator_cache` additionally memoizes arbitrary
/// `operator` module lookups the first time an overload needs them;
/// `misc_cache` does the same for other qualified-name globals looked up
/// lazily (e.g. `struct.pack`, `bool`, `list`, `hasattr`) the first time a
/// constructor or accessor needs them.
pub(crate) struct CachedGlobals {
    pub builtins: i64,
    pub operator_module: i64,
    pub getattr_fn: i64,
    pub type_fn: i64,
    pub is_fn: i64,
    pub getitem_fn: i64,
    pub wrapper_class: i64,
    pub stop_iteration_class: i64,
    pub operator_cache: HashMap<&'static str, i64>,
    pub misc_cache: HashMap<&'static str, i64>,
}

/// The state a dispatch step needs, shared via [`BridgeHandle`]. Never held
/// borrowed across a call into user code or a nested dispatch step — see
/// `dispatcher::service_inbound_call`.
pub(crate) struct BridgeInner {
    id: BridgeId,
    transport: Box<dyn Transport>,
    width: usize,
    table: RemoteTable,
    terminated: bool,
    globals: CachedGlobals,
}

/// Shared handle a `Bridge`, its `Proxy`s, and the dispatcher all hold a
/// reference (or weak reference) to.
pub type BridgeHandle = Rc<RefCell<BridgeInner>>;

impl BridgeInner {
    pub(crate) fn id(&self) -> BridgeId {
        self.id
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn table(&self) -> &RemoteTable {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut RemoteTable {
        &mut self.table
    }

    pub(crate) fn globals(&self) -> &CachedGlobals {
        &self.globals
    }

    pub(crate) fn globals_mut(&mut self) -> &mut CachedGlobals {
        &mut self.globals
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.send(bytes)
    }

    pub(crate) fn flush_transport(&mut self) -> Result<()> {
        self.transport.flush()
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        let buf = self.transport.recv(1)?;
        Ok(buf[0])
    }

    pub(crate) fn read_int(&mut self) -> Result<i64> {
        let width = self.width;
        let buf = self.transport.recv(width)?;
        unpack_int(width, &buf)
    }

    pub(crate) fn read_payload(&mut self, len: usize) -> Result<Vec<u8>> {
        self.transport.recv(len)
    }

    /// Fire-and-forget `~` frame: coalesced into the outbound buffer and
    /// flushed opportunistically with the next real request.
    pub(crate) fn send_drop(&mut self, remote_index: i64) -> Result<()> {
        let header = frame_header(self.width, Opcode::DropRef, remote_index);
        self.write_raw(&header)
    }
}

/// A live connection to one interpreter subprocess.
///
/// Values obtained through a `Bridge` ([`crate::proxy::Proxy`] handles) are
/// only valid against the bridge that produced them; using one against a
/// different `Bridge` returns [`Error::Misuse`] without touching the
/// transport.
pub struct Bridge {
    handle: BridgeHandle,
}

impl Bridge {
    /// Spawn the interpreter subprocess described by `config` and perform the
    /// liveness handshake plus global bootstrap.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let _span = info_span!("bridge_construct").entered();
        let interpreter = config.resolve_interpreter();
        let transport = ChildTransport::spawn(&interpreter, config.integer_width, &config.extra_args)?;
        Self::with_transport(Box::new(transport), config.integer_width)
    }

    /// Construct directly over an arbitrary [`Transport`] — used by tests to
    /// substitute [`crate::transport::mock::MockTransport`] for a real
    /// subprocess.
    pub(crate) fn with_transport(transport: Box<dyn Transport>, width: usize) -> Result<Self> {
        let id = next_bridge_id();
        let placeholder = CachedGlobals {
            builtins: 0,
            operator_module: 0,
            getattr_fn: 0,
            type_fn: 0,
            is_fn: 0,
            getitem_fn: 0,
            wrapper_class: 0,
            stop_iteration_class: 0,
            operator_cache: HashMap::new(),
            misc_cache: HashMap::new(),
        };
        let inner = BridgeInner {
            id,
            transport,
            width,
            table: RemoteTable::new(),
            terminated: false,
            globals: placeholder,
        };
        let handle: BridgeHandle = Rc::new(RefCell::new(inner));
        let globals = ops::bootstrap_globals(&handle)?;
        handle.borrow_mut().globals = globals;
        info!(bridge_id = id, "bridge ready");
        Ok(Bridge { handle })
    }

    pub(crate) fn handle(&self) -> &BridgeHandle {
        &self.handle
    }

    pub fn id(&self) -> BridgeId {
        self.handle.borrow().id()
    }

    pub fn is_terminated(&self) -> bool {
        self.handle.borrow().terminated()
    }

    /// Cleanly shut down the subprocess. Idempotent: calling this more than
    /// once, or letting `Drop` run afterwards, is a no-op. Sends the
    /// designated termination sentinel (a `Return` frame carrying the magic
    /// value `0xD1E_A112_EAD1`) before closing the write half, per the
    /// termination handshake the companion script expects.
    pub fn terminate(&self) -> Result<()> {
        let mut inner = self.handle.borrow_mut();
        if inner.terminated {
            return Ok(());
        }
        inner.terminated = true;
        info!(bridge_id = inner.id, "terminating bridge");
        let width = inner.width;
        let sentinel = frame_header(width, Opcode::Return, crate::codec::TERMINATION_SENTINEL);
        if let Err(e) = inner.transport.send(&sentinel) {
            let _ = inner.transport.quit();
            return Err(e);
        }
        if let Err(e) = inner.transport.flush() {
            let _ = inner.transport.quit();
            return Err(e);
        }
        inner.table.clear();
        inner.transport.quit()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Best effort: a destructor cannot propagate an I/O error, and
        // `terminate` is idempotent.
        let _ = self.terminate();
    }
}

/// Build an outbound `Call` payload: arg-count followed by that many packed
/// `RemoteIndex` words.
pub(crate) fn call_payload(width: usize, args: &[i64]) -> Vec<u8> {
    let mut out = pack_int(width, args.len() as i64);
    for &a in args {
        out.extend(pack_int(width, a));
    }
    out
}
