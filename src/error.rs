//! Crate-wide error taxonomy.
//!
//! The five variants mirror the bridge's error model: transport and protocol
//! failures are fatal and latch the bridge shut, remote/host exceptions carry
//! the tunneled value across the boundary, and misuse is caught synchronously
//! before any bytes are sent.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::proxy::ExceptionProxy;

/// Shorthand for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong talking to the interpreter subprocess.
///
/// `Debug` is implemented by hand below rather than derived: `HostException`
/// carries an `Rc<dyn Any>`, and `dyn Any` has no `Debug` bound.
#[derive(thiserror::Error)]
pub enum Error {
    /// Pipe I/O failed, or the subprocess exited unexpectedly. Fatal: every
    /// subsequent operation on the bridge will fail with the same message.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A frame from the subprocess used an opcode we don't recognize, or had
    /// an impossible payload size. Treated exactly like a transport failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote side raised an exception that did not originate from a
    /// tunneled host value.
    #[error("remote exception: {0}")]
    Remote(ExceptionProxy),

    /// A host exception that was tunneled through the remote side (raised
    /// from inside a host callable, caught and re-raised by remote code) has
    /// come back. The original value is preserved by identity.
    #[error("tunneled host exception")]
    HostException(Rc<dyn Any>),

    /// The API was used incorrectly — e.g. a proxy from another bridge, or an
    /// operation attempted after termination. Raised without touching the
    /// transport.
    #[error("misuse: {0}")]
    Misuse(&'static str),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(msg) => f.debug_tuple("Transport").field(msg).finish(),
            Error::Protocol(msg) => f.debug_tuple("Protocol").field(msg).finish(),
            Error::Remote(proxy) => f.debug_tuple("Remote").field(proxy).finish(),
            Error::HostException(_) => f
                .debug_tuple("HostException")
                .field(&"<tunneled host value>")
                .finish(),
            Error::Misuse(msg) => f.debug_tuple("Misuse").field(msg).finish(),
        }
    }
}

impl Error {
    pub(crate) fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}
