//! # objbridge
//!
//! Treat a foreign scripting interpreter subprocess as if its objects were
//! native: a [`Bridge`] spawns the interpreter, exchanges a small line
//! protocol of opcode+argument frames over its stdin/stdout, and hands back
//! [`Proxy`] handles to remote values. Calls can flow in either direction —
//! a remote callback invoked while the host is waiting on a reply can itself
//! call back into a host closure registered via [`Bridge::expose`], and so
//! on, recursively, for as long as the interpreter keeps the conversation
//! going.
//!
//! ```no_run
//! use objbridge::{Bridge, BridgeConfig};
//!
//! # fn main() -> objbridge::Result<()> {
//! let bridge = Bridge::new(BridgeConfig::from_env())?;
//! let one = bridge.make_int(1)?;
//! let two = bridge.make_int(2)?;
//! let three = (&one + &two)?;
//! assert_eq!(three.get_int()?, 3);
//! # Ok(())
//! # }
//! ```
//!
//! Everything here is single-threaded and fully synchronous by design:
//! there is no async runtime, and a `Bridge` cannot be shared across threads
//! (`Proxy` and `Bridge` are deliberately not `Send`/`Sync`, since the remote
//! process has no notion of concurrent access to its own objects).

mod bridge;
mod codec;
mod config;
mod dispatcher;
mod error;
mod exception;
mod ops;
mod proxy;
mod remote_table;
mod transport;

pub use bridge::{Bridge, BridgeId};
pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use ops::RemoteIter;
pub use proxy::{ExceptionProxy, Proxy};
pub use remote_table::{CallError, CallOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{pack_int, Opcode};
    use crate::transport::mock::{MockTransport, SharedMockTransport};

    const WIDTH: usize = 8;

    fn frame(op: Opcode, arg: i64) -> Vec<u8> {
        let mut out = vec![op.byte()];
        out.extend(pack_int(WIDTH, arg));
        out
    }

    /// Script replies for every `Global`/`MakeStr`/`Call` round trip
    /// `Bridge::new` performs during bootstrap, in order, each returning a
    /// fresh RemoteIndex. `bootstrap_globals` makes 10 request/reply round
    /// trips in total: six `Global` lookups (builtins, operator, getattr,
    /// type, the wrapper class, `StopIteration`), then — for each of `is_`
    /// and `getitem` — a `MakeStr` for the attribute name followed by the
    /// `getattr(operator, name)` `Call`.
    fn script_bootstrap(mock: &mut MockTransport) {
        for ri in 0..10 {
            mock.push_inbound(&frame(Opcode::Return, ri));
        }
    }

    fn test_bridge() -> Bridge {
        let mut mock = MockTransport::default();
        script_bootstrap(&mut mock);
        Bridge::with_transport(Box::new(mock), WIDTH).expect("bootstrap should succeed")
    }

    #[test]
    fn bootstrap_succeeds_and_bridge_starts_live() {
        let bridge = test_bridge();
        assert!(!bridge.is_terminated());
    }

    #[test]
    fn arithmetic_round_trips_through_operator_module() {
        let mut mock = MockTransport::default();
        script_bootstrap(&mut mock);
        mock.push_inbound(&frame(Opcode::Return, 10)); // make_int(1)
        mock.push_inbound(&frame(Opcode::Return, 11)); // make_int(2)
        mock.push_inbound(&frame(Opcode::Return, 12)); // MakeStr("add")
        mock.push_inbound(&frame(Opcode::Return, 13)); // getattr(operator, "add")
        mock.push_inbound(&frame(Opcode::Return, 14)); // add(10, 11)
        mock.push_inbound(&frame(Opcode::Return, 3)); // GetInt(14)
        let bridge = Bridge::with_transport(Box::new(mock), WIDTH).unwrap();

        let one = bridge.make_int(1).unwrap();
        let two = bridge.make_int(2).unwrap();
        let three = (&one + &two).unwrap();
        assert_eq!(three.get_int().unwrap(), 3);
    }

    #[test]
    fn inbound_drop_ref_releases_the_host_slot_mid_wait() {
        let mut mock = MockTransport::default();
        script_bootstrap(&mut mock);
        mock.push_inbound(&frame(Opcode::Return, 19)); // Wrap(host_index) reply
        mock.push_inbound(&frame(Opcode::Return, 20)); // ExposeLambda(wrapper) reply
        // The remote side drops its wrapper around HostIndex 0 while the
        // host is awaiting the reply to an unrelated `make_int` command.
        mock.push_inbound(&frame(Opcode::DropRef, 0));
        mock.push_inbound(&frame(Opcode::Return, 30)); // make_int(9) reply
        let bridge = Bridge::with_transport(Box::new(mock), WIDTH).unwrap();

        let callable = bridge
            .expose(|_handle, _args| unreachable!("never invoked in this test"))
            .unwrap();
        assert!(!bridge.handle().borrow().table().any_free());

        let value = bridge.make_int(9).unwrap();
        assert!(!value.is_null());

        assert!(
            bridge.handle().borrow().table().any_free(),
            "the inbound DropRef frame should have released HostIndex 0"
        );
        drop(callable);
        drop(value);
    }

    #[test]
    fn panicking_callable_is_tunneled_as_a_host_exception_not_unwound() {
        let mut mock = MockTransport::default();
        script_bootstrap(&mut mock);
        mock.push_inbound(&frame(Opcode::Return, 19)); // Wrap(host_index=0) reply
        mock.push_inbound(&frame(Opcode::Return, 20)); // ExposeLambda reply
        // The remote side issues an InboundCall for HostIndex 0 (no args)
        // while the host is awaiting the reply to an unrelated `make_int`.
        mock.push_inbound(&frame(Opcode::InboundCall, 0));
        mock.push_inbound(&pack_int(WIDTH, 0)); // argc
        mock.push_inbound(&frame(Opcode::Return, 21)); // Wrap(host_index=1) reply for the tunneled panic
        mock.push_inbound(&frame(Opcode::Return, 30)); // make_int(9) reply
        let bridge = Bridge::with_transport(Box::new(mock), WIDTH).unwrap();

        let callable = bridge.expose(|_handle, _args| panic!("boom")).unwrap();

        // Driving this request pumps `wait_for_reply`, which services the
        // scripted InboundCall (invoking and panicking inside the exposed
        // callable) before reading the reply meant for `make_int` itself.
        // A bare panic escaping here would abort the test process instead of
        // failing it, so reaching this assertion at all is the main thing
        // under test.
        let value = bridge.make_int(9).unwrap();
        assert!(!value.is_null());

        drop(callable);
        drop(value);
    }

    #[test]
    fn terminate_sends_the_sentinel_frame_and_closes_the_child() {
        let shared = SharedMockTransport::default();
        script_bootstrap(&mut shared.0.borrow_mut());
        let bridge = Bridge::with_transport(Box::new(shared.clone()), WIDTH).unwrap();

        bridge.terminate().unwrap();

        assert!(bridge.is_terminated());
        assert!(shared.quit_called());
        let sent = shared.sent();
        let expected_tail = frame(Opcode::Return, crate::codec::TERMINATION_SENTINEL);
        assert!(
            sent.ends_with(&expected_tail),
            "terminate() must send the termination sentinel before closing the pipe"
        );

        // A second call is a no-op and must not send another sentinel.
        let before = shared.sent().len();
        bridge.terminate().unwrap();
        assert_eq!(shared.sent().len(), before);
    }

    #[test]
    fn dropping_a_proxy_sends_exactly_one_drop_ref_frame() {
        let shared = SharedMockTransport::default();
        script_bootstrap(&mut shared.0.borrow_mut());
        let bridge = Bridge::with_transport(Box::new(shared.clone()), WIDTH).unwrap();

        shared.push_inbound(&frame(Opcode::Return, 42)); // make_int(9) reply
        let value = bridge.make_int(9).unwrap();

        let before = shared.sent().len();
        drop(value);
        let sent = shared.sent();
        assert_eq!(
            &sent[before..],
            &frame(Opcode::DropRef, 42)[..],
            "Proxy::drop must emit exactly one `~` frame carrying its own RemoteIndex"
        );
    }

    #[test]
    fn host_exception_round_trips_to_the_original_value_by_identity() {
        use std::any::Any;
        use std::rc::Rc;

        let mut mock = MockTransport::default();
        script_bootstrap(&mut mock);
        mock.push_inbound(&frame(Opcode::Return, 50)); // Wrap(host_index) reply
        mock.push_inbound(&frame(Opcode::Return, 60)); // type(exc) reply
        mock.push_inbound(&frame(Opcode::Return, 70)); // is_(type, wrapper_class) reply
        mock.push_inbound(&frame(Opcode::Return, 1)); // GetInt(is_match) -> truthy
        mock.push_inbound(&frame(Opcode::Return, 80)); // MakeStr("args") reply
        mock.push_inbound(&frame(Opcode::Return, 90)); // getattr(exc, "args") reply
        mock.push_inbound(&frame(Opcode::Return, 100)); // MakeInt(0) reply
        mock.push_inbound(&frame(Opcode::Return, 110)); // getitem(args, 0) reply
        mock.push_inbound(&frame(Opcode::Return, 0)); // GetInt(wrapper_value) -> host_index
        let bridge = Bridge::with_transport(Box::new(mock), WIDTH).unwrap();

        let original: Rc<dyn Any> = Rc::new(42i32);
        let wrapper_ri =
            crate::exception::wrap_native_for_remote(bridge.handle(), Rc::clone(&original))
                .unwrap();
        assert_eq!(wrapper_ri, 50);

        let err = crate::exception::raise_remote(bridge.handle(), wrapper_ri).unwrap();
        match err {
            Error::HostException(recovered) => {
                assert!(
                    Rc::ptr_eq(&recovered, &original),
                    "HostException must recover the original value by identity, not a copy"
                );
            }
            other => panic!("expected HostException, got {other:?}"),
        }
    }

    #[test]
    fn cross_bridge_proxy_use_is_rejected_without_touching_transport() {
        let bridge_a = test_bridge();

        let mut mock_b = MockTransport::default();
        script_bootstrap(&mut mock_b);
        mock_b.push_inbound(&frame(Opcode::Return, 99));
        let bridge_b = Bridge::with_transport(Box::new(mock_b), WIDTH).unwrap();

        let value = bridge_b.make_int(7).unwrap();
        let err = bridge_a.make_tuple(vec![value]).unwrap_err();
        assert!(matches!(err, Error::Misuse(_)));
    }
}
