//! Bidirectional, identity-preserving exception tunneling.
//!
//! Grounded on the teacher's `vcl/ctx.rs` `Ctx::fail`, which carries a
//! failure from Rust back across the VCL boundary — generalized here from
//! one-directional (Rust fails VCL) to two-directional, and from a plain
//! string message to preserving the original Rust value by identity when it
//! makes a round trip through remote code and comes back.

use std::any::Any;
use std::rc::Rc;

use crate::bridge::BridgeHandle;
use crate::codec::Opcode;
use crate::dispatcher;
use crate::error::{Error, Result};
use crate::ops::{to_utf8_string_raw, type_is};
use crate::proxy::{ExceptionProxy, Proxy};
use crate::remote_table::RemoteSlot;

/// Register `native` as a host-forwarded exception and ask the remote side
/// to wrap its `HostIndex` in an instance of the designated wrapper class.
/// Returns the new instance's `RemoteIndex`.
pub(crate) fn wrap_native_for_remote(handle: &BridgeHandle, native: Rc<dyn Any>) -> Result<i64> {
    let host_index = handle
        .borrow_mut()
        .table_mut()
        .register(RemoteSlot::ForwardedException(native));
    match dispatcher::request(handle, Opcode::Wrap, host_index as i64, &[], false) {
        Ok((remote_index, _)) => Ok(remote_index),
        Err(e) => {
            handle.borrow_mut().table_mut().release(host_index);
            Err(e)
        }
    }
}

/// Turn a remote-raised exception instance into the [`Error`] a host-facing
/// call should return. If the exception is one of our own wrapper instances
/// (tunneling a native host value back), recover the original value by
/// identity; otherwise capture a description and hand back a plain
/// [`ExceptionProxy`].
pub(crate) fn raise_remote(handle: &BridgeHandle, remote_index: i64) -> Result<Error> {
    let bridge_id = handle.borrow().id();
    match host_index_of_wrapper(handle, remote_index)? {
        Some(host_index) => {
            let native = {
                let inner = handle.borrow();
                inner.table().get_forwarded_exception(host_index)
            };
            // Drop our reference to the wrapper instance regardless: the
            // tunneled value survives by Rc, not by the remote instance.
            drop(Proxy::new(remote_index, handle, bridge_id));
            match native {
                Some(value) => Ok(Error::HostException(value)),
                None => Ok(Error::Remote(ExceptionProxy::new(
                    Proxy::new(remote_index, handle, bridge_id),
                    "a previously-released host exception wrapper".to_string(),
                ))),
            }
        }
        None => {
            let description = to_utf8_string_raw(handle, remote_index).unwrap_or_else(|_| {
                "<remote exception with no readable description>".to_string()
            });
            Ok(Error::Remote(ExceptionProxy::new(
                Proxy::new(remote_index, handle, bridge_id),
                description,
            )))
        }
    }
}

/// `type(exc) is __bridge_wrapper_class__` ⇒ `int(exc.args[0])`, using only
/// already-established opcodes: no dedicated wire message exists for this
/// check.
fn host_index_of_wrapper(handle: &BridgeHandle, exc_ri: i64) -> Result<Option<usize>> {
    let wrapper_class = handle.borrow().globals().wrapper_class;
    if !type_is(handle, exc_ri, wrapper_class)? {
        return Ok(None);
    }

    let getitem_fn = handle.borrow().globals().getitem_fn;
    let args_ri = attr_args(handle, exc_ri)?;
    let zero = handle_make_int(handle, 0)?;
    let wrapper_value = dispatcher::call(handle, getitem_fn, &[args_ri, zero])?;
    handle.borrow_mut().send_drop(zero)?;
    handle.borrow_mut().send_drop(args_ri)?;

    let (host_index, _) = dispatcher::request(handle, Opcode::GetInt, wrapper_value, &[], false)?;
    handle.borrow_mut().send_drop(wrapper_value)?;
    Ok(Some(host_index as usize))
}

fn attr_args(handle: &BridgeHandle, obj_ri: i64) -> Result<i64> {
    let getattr_fn = handle.borrow().globals().getattr_fn;
    let (name_ri, _) = dispatcher::request(handle, Opcode::MakeStr, 4, b"args", false)?;
    let result = dispatcher::call(handle, getattr_fn, &[obj_ri, name_ri]);
    handle.borrow_mut().send_drop(name_ri)?;
    result
}

fn handle_make_int(handle: &BridgeHandle, value: i64) -> Result<i64> {
    let (ri, _) = dispatcher::request(handle, Opcode::MakeInt, value, &[], false)?;
    Ok(ri)
}
