//! Primitive wire operations and the ergonomic Rust-facing surface built on
//! top of them.
//!
//! Grounded on the teacher's `vcl/convert.rs` `IntoVCL`/`IntoRust` traits,
//! generalized from a fixed set of VCL scalar conversions to this protocol's
//! full primitive surface. Operator overloading and the iteration protocol
//! have no teacher counterpart; they follow ordinary Rust wrapper-type
//! convention instead.

use std::collections::HashMap;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};
use std::rc::Rc;

use crate::bridge::{call_payload, Bridge, BridgeHandle, CachedGlobals};
use crate::codec::Opcode;
use crate::dispatcher;
use crate::error::{Error, Result};
use crate::proxy::Proxy;
use crate::remote_table::{Callable, RemoteSlot};

pub(crate) fn global_lookup(handle: &BridgeHandle, name: &str) -> Result<i64> {
    let (ri, _) = dispatcher::request(
        handle,
        Opcode::Global,
        name.len() as i64,
        name.as_bytes(),
        false,
    )?;
    Ok(ri)
}

fn make_str_raw(handle: &BridgeHandle, s: &str) -> Result<i64> {
    let (ri, _) = dispatcher::request(handle, Opcode::MakeStr, s.len() as i64, s.as_bytes(), false)?;
    Ok(ri)
}

/// Resolve the fixed bootstrap globals every bridge needs: the `builtins`
/// and `operator` modules, `getattr`/`type`, the `operator.is_` and
/// `operator.getitem` functions used to unwrap tunneled exceptions, and the
/// designated wrapper exception class the interpreter side publishes for
/// host-exception tunneling.
pub(crate) fn bootstrap_globals(handle: &BridgeHandle) -> Result<CachedGlobals> {
    let builtins = global_lookup(handle, "builtins")?;
    let operator_module = global_lookup(handle, "operator")?;
    let getattr_fn = global_lookup(handle, "getattr")?;
    let type_fn = global_lookup(handle, "type")?;
    let wrapper_class = global_lookup(handle, "__bridge_wrapper_class__")?;
    let stop_iteration_class = global_lookup(handle, "builtins.StopIteration")?;

    let is_name = make_str_raw(handle, "is_")?;
    let is_fn = dispatcher::call(handle, getattr_fn, &[operator_module, is_name])?;
    handle.borrow_mut().send_drop(is_name)?;

    let getitem_name = make_str_raw(handle, "getitem")?;
    let getitem_fn = dispatcher::call(handle, getattr_fn, &[operator_module, getitem_name])?;
    handle.borrow_mut().send_drop(getitem_name)?;

    Ok(CachedGlobals {
        builtins,
        operator_module,
        getattr_fn,
        type_fn,
        is_fn,
        getitem_fn,
        wrapper_class,
        stop_iteration_class,
        operator_cache: HashMap::new(),
        misc_cache: HashMap::new(),
    })
}

/// `type(obj_ri) is class_ri`, the same type-identity check used to
/// recognize our own tunneled-exception wrapper instances — reused here to
/// recognize a remote `StopIteration` instance without relying on its
/// (often empty) string representation.
pub(crate) fn type_is(handle: &BridgeHandle, obj_ri: i64, class_ri: i64) -> Result<bool> {
    let (type_fn, is_fn) = {
        let inner = handle.borrow();
        (inner.globals().type_fn, inner.globals().is_fn)
    };
    let obj_type = dispatcher::call(handle, type_fn, &[obj_ri])?;
    let is_match = dispatcher::call(handle, is_fn, &[obj_type, class_ri]);
    handle.borrow_mut().send_drop(obj_type)?;
    let is_match = is_match?;
    let (truthy, _) = dispatcher::request(handle, Opcode::GetInt, is_match, &[], false)?;
    handle.borrow_mut().send_drop(is_match)?;
    Ok(truthy != 0)
}

/// `getattr(operator, name)`, memoized for the bridge's lifetime.
pub(crate) fn operator_fn(handle: &BridgeHandle, name: &'static str) -> Result<i64> {
    if let Some(&ri) = handle.borrow().globals().operator_cache.get(name) {
        return Ok(ri);
    }
    let (operator_module, getattr_fn) = {
        let inner = handle.borrow();
        (inner.globals().operator_module, inner.globals().getattr_fn)
    };
    let name_ri = make_str_raw(handle, name)?;
    let fn_ri = dispatcher::call(handle, getattr_fn, &[operator_module, name_ri])?;
    handle.borrow_mut().send_drop(name_ri)?;
    handle
        .borrow_mut()
        .globals_mut()
        .operator_cache
        .insert(name, fn_ri);
    Ok(fn_ri)
}

/// Look up a qualified-name global (e.g. `"struct.pack"`, `"bool"`,
/// `"hasattr"`) and memoize it in [`CachedGlobals::misc_cache`] for the
/// bridge's lifetime — the `G` opcode already resolves dotted names
/// directly, so no `getattr` round trip is needed here.
fn cached_global(handle: &BridgeHandle, name: &'static str) -> Result<i64> {
    if let Some(&ri) = handle.borrow().globals().misc_cache.get(name) {
        return Ok(ri);
    }
    let ri = global_lookup(handle, name)?;
    handle.borrow_mut().globals_mut().misc_cache.insert(name, ri);
    Ok(ri)
}

/// `getattr(obj_ri, attr)`.
fn getattr_raw(handle: &BridgeHandle, obj_ri: i64, attr: &str) -> Result<i64> {
    let getattr_fn = handle.borrow().globals().getattr_fn;
    let name_ri = make_str_raw(handle, attr)?;
    let result = dispatcher::call(handle, getattr_fn, &[obj_ri, name_ri]);
    handle.borrow_mut().send_drop(name_ri)?;
    result
}

/// `str(obj_ri).encode("utf-8")`, read back as bytes, decoded on the host
/// side. There is no dedicated "read a string" opcode in this protocol — a
/// string is read by round-tripping it through `str`/`encode`/`GetBytes`.
pub(crate) fn to_utf8_string_raw(handle: &BridgeHandle, obj_ri: i64) -> Result<String> {
    let str_fn = global_lookup(handle, "str")?;
    let text_ri = dispatcher::call(handle, str_fn, &[obj_ri])?;
    handle.borrow_mut().send_drop(str_fn)?;
    let encoded_ri = getattr_raw(handle, text_ri, "encode")?;
    let utf8_name = make_str_raw(handle, "utf-8")?;
    let bytes_ri = dispatcher::call(handle, encoded_ri, &[utf8_name])?;
    handle.borrow_mut().send_drop(utf8_name)?;
    handle.borrow_mut().send_drop(encoded_ri)?;
    handle.borrow_mut().send_drop(text_ri)?;
    let (len, payload) = dispatcher::request(handle, Opcode::GetBytes, bytes_ri, &[], true)?;
    handle.borrow_mut().send_drop(bytes_ri)?;
    debug_assert_eq!(len as usize, payload.len());
    String::from_utf8(payload).map_err(|e| Error::protocol(format!("non-utf8 string: {e}")))
}

impl Bridge {
    pub fn make_int(&self, value: i64) -> Result<Proxy> {
        let (ri, _) = dispatcher::request(self.handle(), Opcode::MakeInt, value, &[], false)?;
        Ok(Proxy::new(ri, self.handle(), self.id()))
    }

    pub fn make_bytes(&self, bytes: &[u8]) -> Result<Proxy> {
        let (ri, _) = dispatcher::request(
            self.handle(),
            Opcode::MakeBytes,
            bytes.len() as i64,
            bytes,
            false,
        )?;
        Ok(Proxy::new(ri, self.handle(), self.id()))
    }

    pub fn make_str(&self, s: &str) -> Result<Proxy> {
        let ri = make_str_raw(self.handle(), s)?;
        Ok(Proxy::new(ri, self.handle(), self.id()))
    }

    /// Build a remote tuple from `elements`, transferring ownership of each
    /// element into the new tuple — the tuple is now what keeps them alive
    /// remotely, so their `Proxy`s must not also send `~`.
    pub fn make_tuple(&self, elements: Vec<Proxy>) -> Result<Proxy> {
        for el in &elements {
            el.check_bridge(self.id())?;
        }
        let mut ris = Vec::with_capacity(elements.len());
        for el in elements {
            ris.push(el.into_raw()?);
        }
        let width = self.handle().borrow().width();
        let payload = call_payload(width, &ris);
        let (ri, _) = dispatcher::request(
            self.handle(),
            Opcode::MakeTuple,
            ris.len() as i64,
            &payload,
            false,
        )?;
        Ok(Proxy::new(ri, self.handle(), self.id()))
    }

    /// Look up a name in the interpreter's global namespace.
    pub fn global(&self, name: &str) -> Result<Proxy> {
        let ri = global_lookup(self.handle(), name)?;
        Ok(Proxy::new(ri, self.handle(), self.id()))
    }

    /// Construct a remote float preserving `value`'s exact bit pattern
    /// (signed zeros, both infinities, and NaN all round trip). There is no
    /// dedicated wire opcode for floats; the 8-byte
    /// little-endian bit pattern is sent as `MakeBytes` and reassembled
    /// remotely via `struct.unpack("<d", ...)`.
    pub fn make_float(&self, value: f64) -> Result<Proxy> {
        let handle = self.handle();
        let bits = value.to_bits().to_le_bytes();
        let (bytes_ri, _) =
            dispatcher::request(handle, Opcode::MakeBytes, bits.len() as i64, &bits, false)?;
        let fmt_ri = make_str_raw(handle, "<d")?;
        let unpack_fn = cached_global(handle, "struct.unpack")?;
        let tuple_ri = dispatcher::call(handle, unpack_fn, &[fmt_ri, bytes_ri])?;
        handle.borrow_mut().send_drop(fmt_ri)?;
        handle.borrow_mut().send_drop(bytes_ri)?;
        let getitem_fn = handle.borrow().globals().getitem_fn;
        let zero = dispatcher::request(handle, Opcode::MakeInt, 0, &[], false)?.0;
        let value_ri = dispatcher::call(handle, getitem_fn, &[tuple_ri, zero])?;
        handle.borrow_mut().send_drop(zero)?;
        handle.borrow_mut().send_drop(tuple_ri)?;
        Ok(Proxy::new(value_ri, handle, self.id()))
    }

    /// Construct a remote `bool` from a host `bool` (`bool(int(value))`,
    /// there being no dedicated opcode for booleans either).
    pub fn make_bool(&self, value: bool) -> Result<Proxy> {
        let handle = self.handle();
        let (int_ri, _) =
            dispatcher::request(handle, Opcode::MakeInt, value as i64, &[], false)?;
        let bool_ctor = cached_global(handle, "bool")?;
        let ri = dispatcher::call(handle, bool_ctor, &[int_ri])?;
        handle.borrow_mut().send_drop(int_ri)?;
        Ok(Proxy::new(ri, handle, self.id()))
    }

    /// Build a remote `list` from `elements`: built as a tuple first (the
    /// only wire-level sequence constructor, `T`) and converted with the
    /// `list` constructor, since no dedicated list opcode exists.
    pub fn make_list(&self, elements: Vec<Proxy>) -> Result<Proxy> {
        let tuple = self.make_tuple(elements)?;
        let handle = self.handle();
        let list_ctor = cached_global(handle, "list")?;
        let ri = dispatcher::call(handle, list_ctor, &[tuple.remote_index()?])?;
        Ok(Proxy::new(ri, handle, self.id()))
    }

    /// Expose a host closure as a remote callable object. The closure
    /// receives the live bridge handle (so it can itself drive further
    /// commands) and the consumed argument proxies.
    ///
    /// Two wire round trips are needed: `R` allocates a remote wrapper
    /// object around the `HostIndex`, then `L` turns that wrapper into a
    /// first-class remote function. The function keeps its own remote-side
    /// reference to the wrapper (its `HostIndex`'s lifetime is now tied to
    /// the function's), so the host's own handle to the wrapper is dropped
    /// immediately after `L` succeeds.
    pub fn expose<F>(&self, f: F) -> Result<Proxy>
    where
        F: Fn(&BridgeHandle, Vec<Proxy>) -> crate::remote_table::CallOutcome + 'static,
    {
        let callable: Callable = Rc::new(f);
        let host_index = self
            .handle()
            .borrow_mut()
            .table_mut()
            .register(RemoteSlot::Callable(callable));

        let wrapper_ri = match dispatcher::request(
            self.handle(),
            Opcode::Wrap,
            host_index as i64,
            &[],
            false,
        ) {
            Ok((ri, _)) => ri,
            Err(e) => {
                self.handle().borrow_mut().table_mut().release(host_index);
                return Err(e);
            }
        };

        let function_ri = match dispatcher::request(
            self.handle(),
            Opcode::ExposeLambda,
            wrapper_ri,
            &[],
            false,
        ) {
            Ok((ri, _)) => ri,
            Err(e) => {
                let _ = self.handle().borrow_mut().send_drop(wrapper_ri);
                self.handle().borrow_mut().table_mut().release(host_index);
                return Err(e);
            }
        };
        self.handle().borrow_mut().send_drop(wrapper_ri)?;
        Ok(Proxy::new(function_ri, self.handle(), self.id()))
    }
}

impl Proxy {
    fn live_handle(&self) -> Result<BridgeHandle> {
        self.upgrade().ok_or(Error::Misuse("bridge has been terminated"))
    }

    /// Call this proxy as a callable with positional arguments (wire
    /// opcode `C`). Arguments are borrowed: the call does not consume them, and the
    /// caller is still responsible for dropping them when done.
    pub fn call(&self, args: &[Proxy]) -> Result<Proxy> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        let callee = self.remote_index()?;
        let mut ris = Vec::with_capacity(args.len());
        for a in args {
            a.check_bridge(bridge_id)?;
            ris.push(a.remote_index()?);
        }
        let ri = dispatcher::call(&handle, callee, &ris)?;
        Ok(Proxy::new(ri, &handle, bridge_id))
    }

    /// `*args, **kwargs` call spreading (wire opcode `X`): `args_iterable`
    /// and `kwargs` (a mapping, or `None`) are themselves remote objects.
    pub fn starcall(&self, args_iterable: &Proxy, kwargs: Option<&Proxy>) -> Result<Proxy> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        args_iterable.check_bridge(bridge_id)?;
        let kwargs_ri = match kwargs {
            Some(k) => {
                k.check_bridge(bridge_id)?;
                k.remote_index()?
            }
            None => crate::codec::STARCALL_IGNORED_ARG,
        };
        let width = handle.borrow().width();
        let payload = call_payload(
            width,
            &[self.remote_index()?, args_iterable.remote_index()?, kwargs_ri],
        );
        let (ri, _) = dispatcher::request(
            &handle,
            Opcode::StarCall,
            crate::codec::STARCALL_IGNORED_ARG,
            &payload,
            false,
        )?;
        Ok(Proxy::new(ri, &handle, bridge_id))
    }

    /// Ask the remote side for an independently-owned reference to the same
    /// object (wire opcode `D`).
    pub fn dup(&self) -> Result<Proxy> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        let (ri, _) = dispatcher::request(&handle, Opcode::Dup, self.remote_index()?, &[], false)?;
        Ok(Proxy::new(ri, &handle, bridge_id))
    }

    pub fn get_int(&self) -> Result<i64> {
        let handle = self.live_handle()?;
        let (value, _) = dispatcher::request(&handle, Opcode::GetInt, self.remote_index()?, &[], false)?;
        Ok(value)
    }

    pub fn get_bytes(&self) -> Result<Vec<u8>> {
        let handle = self.live_handle()?;
        let (_, payload) =
            dispatcher::request(&handle, Opcode::GetBytes, self.remote_index()?, &[], true)?;
        Ok(payload)
    }

    /// Read a remote float's exact bit pattern back: the mirror image of
    /// [`Bridge::make_float`], via `struct.pack("<d", self)`.
    pub fn get_float(&self) -> Result<f64> {
        let handle = self.live_handle()?;
        let pack_fn = cached_global(&handle, "struct.pack")?;
        let fmt_ri = make_str_raw(&handle, "<d")?;
        let bytes_ri = dispatcher::call(&handle, pack_fn, &[fmt_ri, self.remote_index()?])?;
        handle.borrow_mut().send_drop(fmt_ri)?;
        let (_, payload) = dispatcher::request(&handle, Opcode::GetBytes, bytes_ri, &[], true)?;
        handle.borrow_mut().send_drop(bytes_ri)?;
        if payload.len() != 8 {
            return Err(Error::protocol("struct.pack('<d', ...) did not return 8 bytes"));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&payload);
        Ok(f64::from_le_bytes(buf))
    }

    /// `str(self).encode("utf-8")`, decoded back to a Rust `String` — the
    /// two-hop convention this protocol uses for reading strings.
    pub fn to_utf8_string(&self) -> Result<String> {
        let handle = self.live_handle()?;
        to_utf8_string_raw(&handle, self.remote_index()?)
    }

    pub fn getattr(&self, attr: &str) -> Result<Proxy> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        let ri = getattr_raw(&handle, self.remote_index()?, attr)?;
        Ok(Proxy::new(ri, &handle, bridge_id))
    }

    /// `setattr(self, attr, value)`. `value` is borrowed, not consumed.
    pub fn setattr(&self, attr: &str, value: &Proxy) -> Result<()> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        value.check_bridge(bridge_id)?;
        let setattr_fn = cached_global(&handle, "setattr")?;
        let name_ri = make_str_raw(&handle, attr)?;
        let result_ri = dispatcher::call(
            &handle,
            setattr_fn,
            &[self.remote_index()?, name_ri, value.remote_index()?],
        );
        handle.borrow_mut().send_drop(name_ri)?;
        handle.borrow_mut().send_drop(result_ri?)?;
        Ok(())
    }

    /// `delattr(self, attr)`.
    pub fn delattr(&self, attr: &str) -> Result<()> {
        let handle = self.live_handle()?;
        let delattr_fn = cached_global(&handle, "delattr")?;
        let name_ri = make_str_raw(&handle, attr)?;
        let result_ri = dispatcher::call(&handle, delattr_fn, &[self.remote_index()?, name_ri]);
        handle.borrow_mut().send_drop(name_ri)?;
        handle.borrow_mut().send_drop(result_ri?)?;
        Ok(())
    }

    /// `hasattr(self, attr)`.
    pub fn hasattr(&self, attr: &str) -> Result<bool> {
        let handle = self.live_handle()?;
        let hasattr_fn = cached_global(&handle, "hasattr")?;
        let name_ri = make_str_raw(&handle, attr)?;
        let result_ri = dispatcher::call(&handle, hasattr_fn, &[self.remote_index()?, name_ri]);
        handle.borrow_mut().send_drop(name_ri)?;
        let result_ri = result_ri?;
        let (truthy, _) = dispatcher::request(&handle, Opcode::GetInt, result_ri, &[], false)?;
        handle.borrow_mut().send_drop(result_ri)?;
        Ok(truthy != 0)
    }

    /// `operator.getitem(self, key)`.
    pub fn getitem(&self, key: &Proxy) -> Result<Proxy> {
        self.binary_operator("getitem", key)
    }

    /// `operator.setitem(self, key, value)`.
    pub fn setitem(&self, key: &Proxy, value: &Proxy) -> Result<()> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        key.check_bridge(bridge_id)?;
        value.check_bridge(bridge_id)?;
        let setitem_fn = operator_fn(&handle, "setitem")?;
        let result_ri = dispatcher::call(
            &handle,
            setitem_fn,
            &[self.remote_index()?, key.remote_index()?, value.remote_index()?],
        )?;
        handle.borrow_mut().send_drop(result_ri)?;
        Ok(())
    }

    /// `operator.delitem(self, key)`.
    pub fn delitem(&self, key: &Proxy) -> Result<()> {
        let handle = self.live_handle()?;
        key.check_bridge(self.bridge_id())?;
        let delitem_fn = operator_fn(&handle, "delitem")?;
        let result_ri = dispatcher::call(&handle, delitem_fn, &[self.remote_index()?, key.remote_index()?])?;
        handle.borrow_mut().send_drop(result_ri)?;
        Ok(())
    }

    /// Exponentiation, expressed as an explicit method rather than an
    /// operator overload since Rust has no `**` to implement.
    pub fn pow(&self, exponent: &Proxy) -> Result<Proxy> {
        self.binary_operator("pow", exponent)
    }

    fn binary_operator(&self, name: &'static str, other: &Proxy) -> Result<Proxy> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        other.check_bridge(bridge_id)?;
        let op_fn = operator_fn(&handle, name)?;
        let ri = dispatcher::call(&handle, op_fn, &[self.remote_index()?, other.remote_index()?])?;
        Ok(Proxy::new(ri, &handle, bridge_id))
    }

    fn comparison_operator(&self, name: &'static str, other: &Proxy) -> Result<bool> {
        let result = self.binary_operator(name, other)?;
        Ok(result.get_int()? != 0)
    }

    pub fn eq(&self, other: &Proxy) -> Result<bool> {
        self.comparison_operator("eq", other)
    }

    pub fn lt(&self, other: &Proxy) -> Result<bool> {
        self.comparison_operator("lt", other)
    }

    /// The interpreter's own `iter(self)`, wrapped for idiomatic Rust
    /// iteration via [`RemoteIter`].
    pub fn iter(&self) -> Result<RemoteIter> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        let iter_fn = global_lookup(&handle, "iter")?;
        let next_fn = global_lookup(&handle, "next")?;
        let ri = dispatcher::call(&handle, iter_fn, &[self.remote_index()?])?;
        handle.borrow_mut().send_drop(iter_fn)?;
        Ok(RemoteIter {
            proxy: Proxy::new(ri, &handle, bridge_id),
            next_fn,
            done: false,
        })
    }
}

impl Neg for &Proxy {
    type Output = Result<Proxy>;
    fn neg(self) -> Result<Proxy> {
        let handle = self.live_handle()?;
        let bridge_id = self.bridge_id();
        let op_fn = operator_fn(&handle, "neg")?;
        let ri = dispatcher::call(&handle, op_fn, &[self.remote_index()?])?;
        Ok(Proxy::new(ri, &handle, bridge_id))
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $operator_name:literal) => {
        impl $trait<&Proxy> for &Proxy {
            type Output = Result<Proxy>;
            fn $method(self, rhs: &Proxy) -> Result<Proxy> {
                self.binary_operator($operator_name, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, "add");
impl_binary_op!(Sub, sub, "sub");
impl_binary_op!(Mul, mul, "mul");
impl_binary_op!(Div, div, "truediv");
impl_binary_op!(Rem, rem, "mod");

/// Iterator over a remote iterable, obtained via [`Proxy::iter`]. Each step
/// calls `next()` on the remote iterator object and translates a remote
/// `StopIteration` into Rust's `None` rather than propagating it as an
/// error.
pub struct RemoteIter {
    proxy: Proxy,
    next_fn: i64,
    done: bool,
}

impl Iterator for RemoteIter {
    type Item = Result<Proxy>;

    fn next(&mut self) -> Option<Result<Proxy>> {
        if self.done {
            return None;
        }
        let handle = match self.proxy.upgrade() {
            Some(h) => h,
            None => {
                self.done = true;
                return Some(Err(Error::Misuse("bridge has been terminated")));
            }
        };
        let bridge_id = self.proxy.bridge_id();
        let iterator_ri = match self.proxy.remote_index() {
            Ok(ri) => ri,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        match dispatcher::call(&handle, self.next_fn, &[iterator_ri]) {
            Ok(ri) => Some(Ok(Proxy::new(ri, &handle, bridge_id))),
            Err(Error::Remote(exc)) => {
                self.done = true;
                // `StopIteration()`'s `str()` is typically empty, so the
                // exception's eagerly-captured description can't be used to
                // recognize it — check the remote exception's type identity
                // instead, the same way `host_index_of_wrapper` recognizes a
                // tunneled-exception wrapper.
                let stop_iteration_class = handle.borrow().globals().stop_iteration_class;
                match exc
                    .proxy()
                    .remote_index()
                    .and_then(|ri| type_is(&handle, ri, stop_iteration_class))
                {
                    Ok(true) => None,
                    Ok(false) => Some(Err(Error::Remote(exc))),
                    Err(e) => Some(Err(e)),
                }
            }
            Err(other) => {
                self.done = true;
                Some(Err(other))
            }
        }
    }
}

impl Drop for RemoteIter {
    fn drop(&mut self) {
        if let Some(handle) = self.proxy.upgrade() {
            let _ = handle.borrow_mut().send_drop(self.next_fn);
        }
    }
}
