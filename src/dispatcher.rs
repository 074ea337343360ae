//! The reentrant request/reply engine.
//!
//! No teacher counterpart — the teacher's VMODs never call back into C mid
//! request. Patterned after `wasmerio-wasmer`'s `Store`, whose interior
//! mutability lets a host function invoked from inside a running module call
//! straight back into the same store. Here, a single outbound request may be
//! answered by zero or more `InboundCall` frames (the remote side calling a
//! host callable) before the matching `Return`/`Exception` frame arrives, and
//! servicing one of those calls may itself issue further outbound requests —
//! the recursion is plain Rust call-stack recursion, single-threaded.

use std::panic::{self, AssertUnwindSafe};

use tracing::debug;

use crate::bridge::{call_payload, BridgeHandle};
use crate::codec::{frame_header, Opcode};
use crate::error::{Error, Result};
use crate::exception;
use crate::proxy::Proxy;
use crate::remote_table::{CallError, CallOutcome};

/// Send one outbound frame and wait for its matching reply, servicing any
/// reentrant `InboundCall`s that arrive first.
///
/// `expects_payload` tells the reply reader whether a successful `Return`
/// carries a trailing byte payload (true only for `GetBytes`): the int-arg
/// of that `Return` is then the payload's length rather than a value.
pub(crate) fn request(
    handle: &BridgeHandle,
    op: Opcode,
    arg: i64,
    payload: &[u8],
    expects_payload: bool,
) -> Result<(i64, Vec<u8>)> {
    {
        let mut inner = handle.borrow_mut();
        let width = inner.width();
        let header = frame_header(width, op, arg);
        inner.write_raw(&header)?;
        if !payload.is_empty() {
            inner.write_raw(payload)?;
        }
        inner.flush_transport()?;
    }
    wait_for_reply(handle, expects_payload)
}

/// Convenience wrapper for `Call`: look up `callee` and invoke it with
/// `args`, all already-owned `RemoteIndex`es.
pub(crate) fn call(handle: &BridgeHandle, callee: i64, args: &[i64]) -> Result<i64> {
    let width = handle.borrow().width();
    let payload = call_payload(width, args);
    let (ri, _) = request(handle, Opcode::Call, callee, &payload, false)?;
    Ok(ri)
}

fn wait_for_reply(handle: &BridgeHandle, expects_payload: bool) -> Result<(i64, Vec<u8>)> {
    loop {
        let opbyte = handle.borrow_mut().read_byte()?;
        let op = Opcode::from_byte(opbyte)?;
        match op {
            Opcode::Return => {
                let arg = handle.borrow_mut().read_int()?;
                let payload = if expects_payload {
                    let len = usize::try_from(arg)
                        .map_err(|_| Error::protocol("negative payload length in reply"))?;
                    handle.borrow_mut().read_payload(len)?
                } else {
                    Vec::new()
                };
                return Ok((arg, payload));
            }
            Opcode::Exception => {
                let remote_index = handle.borrow_mut().read_int()?;
                return Err(exception::raise_remote(handle, remote_index)?);
            }
            Opcode::InboundCall => {
                service_inbound_call(handle)?;
                continue;
            }
            Opcode::DropRef => {
                let host_index = handle.borrow_mut().read_int()?;
                release_host_index(handle, host_index)?;
                continue;
            }
            other => {
                return Err(Error::protocol(format!(
                    "opcode {other:?} is not valid while awaiting a reply"
                )))
            }
        }
    }
}

/// Release a host-exposed `Callable`/`ForwardedException` slot the remote
/// side has finished with: the remote wrapper that referenced it has been
/// garbage-collected, so the slot is spliced back onto the free list.
fn release_host_index(handle: &BridgeHandle, host_index: i64) -> Result<()> {
    let idx = usize::try_from(host_index)
        .map_err(|_| Error::protocol("negative HostIndex in inbound drop"))?;
    debug!(host_index = idx, "releasing host-exposed slot");
    handle.borrow_mut().table_mut().release(idx);
    Ok(())
}

/// Service one reentrant call from the remote side into a host callable.
/// The callable may itself call back into the bridge — nothing here holds a
/// borrow across `callable(...)`.
fn service_inbound_call(handle: &BridgeHandle) -> Result<()> {
    let host_index = handle.borrow_mut().read_int()?;
    let argc = handle.borrow_mut().read_int()?;
    let argc = usize::try_from(argc)
        .map_err(|_| Error::protocol("negative argument count in inbound call"))?;

    let bridge_id = handle.borrow().id();
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        let ri = handle.borrow_mut().read_int()?;
        args.push(Proxy::new(ri, handle, bridge_id));
    }

    let callable = {
        let inner = handle.borrow();
        let idx = usize::try_from(host_index)
            .map_err(|_| Error::protocol("negative HostIndex in inbound call"))?;
        inner.table().get_callable(idx)
    };
    let callable = callable.ok_or_else(|| {
        Error::protocol("InboundCall referenced a HostIndex with no live callable")
    })?;

    debug!(host_index, argc, "servicing inbound call");
    let outcome = invoke_catching_panics(&callable, handle, args);

    let width = handle.borrow().width();
    match outcome {
        Ok(result) => {
            let ri = result.into_raw()?;
            let mut inner = handle.borrow_mut();
            inner.write_raw(&frame_header(width, Opcode::Return, ri))?;
            inner.flush_transport()
        }
        Err(CallError::Remote(exc)) => {
            let ri = exc.into_proxy().into_raw()?;
            let mut inner = handle.borrow_mut();
            inner.write_raw(&frame_header(width, Opcode::Exception, ri))?;
            inner.flush_transport()
        }
        Err(CallError::Native(native)) => {
            let ri = exception::wrap_native_for_remote(handle, native)?;
            let mut inner = handle.borrow_mut();
            inner.write_raw(&frame_header(width, Opcode::Exception, ri))?;
            inner.flush_transport()
        }
    }
}

/// Run a host callable, converting a Rust panic into a tunneled host
/// exception instead of unwinding through the reentrant dispatcher: a
/// panic part-way through `callable` would otherwise unwind across the
/// recursive `wait_for_reply`/`service_inbound_call` stack that is also
/// doing blocking pipe I/O on behalf of the remote side, which is unsound to
/// unwind through. The panic message is captured and tunneled the same way
/// any other host-raised value would be; it is not identity-preserving
/// (a fresh `String` is boxed, not the original panic payload) since a panic
/// carries no value worth round-tripping by identity.
fn invoke_catching_panics(
    callable: &crate::remote_table::Callable,
    handle: &BridgeHandle,
    args: Vec<Proxy>,
) -> CallOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| callable(handle, args))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(&payload);
            tracing::error!(panic = %message, "host callable panicked; tunneling as an exception");
            Err(CallError::Native(std::rc::Rc::new(message) as std::rc::Rc<dyn std::any::Any>))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "host callable panicked with a non-string payload".to_string()
    }
}
