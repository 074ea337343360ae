//! Framed byte pipe to/from the interpreter subprocess.
//!
//! `send` is buffered, `recv` blocks for exactly the requested number of
//! bytes, and any I/O failure latches a sticky error: once a `Transport` has
//! failed, every later call returns the same cached message instead of
//! touching the (possibly half-dead) pipes again.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// The blocking transport contract the dispatcher is built on. Split out as a
/// trait so tests can substitute an in-memory pair of queues instead of a
/// real subprocess — the interpreter-side companion script is an external
/// collaborator we don't ship.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn recv(&mut self, len: usize) -> Result<Vec<u8>>;
    /// Clean shutdown: close the write side, wait for the child, and report
    /// whether it exited with status 0.
    fn quit(&mut self) -> Result<()>;
}

/// Real subprocess-backed transport: the child's stdin/stdout are the two
/// halves of the pipe (fd numbers `0`/`1` from the child's point of view),
/// stderr is inherited so interpreter diagnostics aren't swallowed.
pub struct ChildTransport {
    child: Child,
    writer: Option<BufWriter<ChildStdin>>,
    reader: BufReader<ChildStdout>,
    failed: Option<String>,
}

impl ChildTransport {
    /// Spawn `interpreter` with `extra_args` appended after the mandatory
    /// `read-fd write-fd integer-width-bytes` triple, and wait for the `+`
    /// liveness handshake.
    pub fn spawn(interpreter: &str, width: usize, extra_args: &[String]) -> Result<Self> {
        info!(interpreter, width, "spawning interpreter subprocess");
        let mut command = Command::new(interpreter);
        command
            .arg("0")
            .arg("1")
            .arg(width.to_string())
            .args(extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command
            .spawn()
            .map_err(|e| Error::transport(format!("failed to spawn {interpreter}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transport("child stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport("child stdout was not piped"))?;

        let mut transport = ChildTransport {
            child,
            writer: Some(BufWriter::new(stdin)),
            reader: BufReader::new(stdout),
            failed: None,
        };

        let mut handshake = [0u8; 1];
        transport
            .reader
            .read_exact(&mut handshake)
            .map_err(|e| Error::transport(format!("handshake read failed: {e}")))?;
        if handshake[0] != b'+' {
            return Err(Error::transport(format!(
                "unexpected handshake byte {:#04x}",
                handshake[0]
            )));
        }
        debug!("handshake ok");
        Ok(transport)
    }

    fn latch(&mut self, err: io::Error) -> Error {
        let msg = err.to_string();
        error!(error = %msg, "transport I/O failure, latching");
        self.failed = Some(msg.clone());
        Error::transport(msg)
    }

    fn check_latched(&self) -> Result<()> {
        if let Some(msg) = &self.failed {
            return Err(Error::transport(msg.clone()));
        }
        Ok(())
    }
}

impl Transport for ChildTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_latched()?;
        let result = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::transport("write side already closed"))?
            .write_all(bytes);
        result.map_err(|e| self.latch(e))
    }

    fn flush(&mut self) -> Result<()> {
        self.check_latched()?;
        let result = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::transport("write side already closed"))?
            .flush();
        result.map_err(|e| self.latch(e))
    }

    fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
        self.check_latched()?;
        let mut buf = vec![0u8; len];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) => Err(self.latch(e)),
        }
    }

    fn quit(&mut self) -> Result<()> {
        if self.failed.is_some() {
            // Already dead; best-effort reap and report the original cause.
            let _ = self.child.kill();
            let _ = self.child.wait();
            return self.check_latched();
        }
        // Closing the write half signals EOF to the interpreter, which it
        // interprets as part of the termination handshake.
        self.writer.take();
        match self.child.wait() {
            Ok(status) if status.success() => {
                info!("interpreter subprocess exited cleanly");
                Ok(())
            }
            Ok(status) => {
                warn!(?status, "interpreter subprocess exited non-zero");
                Err(Error::transport(format!(
                    "subprocess exited with {status}"
                )))
            }
            Err(e) => Err(self.latch(e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// An in-process stand-in for the subprocess pipe: outbound bytes are
    /// appended to `sent` for assertions, inbound bytes are drained from a
    /// pre-scripted queue of reply frames.
    #[derive(Default)]
    pub struct MockTransport {
        pub sent: Vec<u8>,
        pub inbound: VecDeque<u8>,
        pub quit_called: bool,
    }

    impl MockTransport {
        pub fn push_inbound(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes);
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, bytes: &[u8]) -> Result<()> {
            self.sent.extend_from_slice(bytes);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
            if self.inbound.len() < len {
                return Err(Error::transport("mock transport starved of input"));
            }
            Ok(self.inbound.drain(..len).collect())
        }

        fn quit(&mut self) -> Result<()> {
            self.quit_called = true;
            Ok(())
        }
    }

    /// A handle to a [`MockTransport`] that can still be inspected after it
    /// has been boxed up and handed to a `Bridge`, by sharing ownership
    /// instead of moving it outright.
    #[derive(Clone, Default)]
    pub struct SharedMockTransport(pub std::rc::Rc<std::cell::RefCell<MockTransport>>);

    impl SharedMockTransport {
        pub fn push_inbound(&self, bytes: &[u8]) {
            self.0.borrow_mut().push_inbound(bytes);
        }

        pub fn sent(&self) -> Vec<u8> {
            self.0.borrow().sent.clone()
        }

        pub fn quit_called(&self) -> bool {
            self.0.borrow().quit_called
        }
    }

    impl Transport for SharedMockTransport {
        fn send(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.borrow_mut().send(bytes)
        }

        fn flush(&mut self) -> Result<()> {
            self.0.borrow_mut().flush()
        }

        fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
            self.0.borrow_mut().recv(len)
        }

        fn quit(&mut self) -> Result<()> {
            self.0.borrow_mut().quit()
        }
    }
}
