//! Pluggable secure-session layer.
//!
//! A backend builds one [`SecureSession`] per socket. The engine never
//! looks inside a session: it hands the session a [`RawTransport`] on
//! every call and the session moves ciphertext through it.
//!
//! Every session call is non-blocking. `Err(IoError::Timeout)` means the
//! transport would block; the engine waits for the direction the
//! transport last blocked on and calls again.

use crate::addr::PeerAddr;
use crate::error::IoResult;
use crate::socket::Shutdown;

/// Role of the local end in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

/// Byte-level access to the socket underneath a session.
///
/// `pull` returns `Ok(0)` at end of stream; both return
/// `Err(IoError::Timeout)` when the operation would block.
pub trait RawTransport {
    fn pull(&mut self, buf: &mut [u8]) -> IoResult<usize>;
    fn push(&mut self, data: &[u8]) -> IoResult<usize>;
}

/// Information a backend may use when building a session.
#[derive(Debug, Clone)]
pub struct SessionContext<'a> {
    pub side: Side,
    pub peer: Option<&'a PeerAddr>,
    pub socket_id: u64,
}

/// A secure-session implementation, installed once per [`Context`](crate::Context).
pub trait SecureBackend: Send + Sync {
    /// Sets up backend-global state. Called once, under the context lock.
    fn init(&self) -> IoResult<()> {
        Ok(())
    }

    /// Builds a session bound to one socket.
    fn create(&self, ctx: &SessionContext<'_>) -> IoResult<Box<dyn SecureSession>>;

    /// Tears down backend-global state.
    fn exit(&self) {}
}

/// Per-socket session state. Dropping it frees backend resources.
pub trait SecureSession: Send {
    /// Drives the handshake. Resumable while it returns `Err(Timeout)`.
    fn open(&mut self, io: &mut dyn RawTransport) -> IoResult<()>;

    /// Decrypts into `buf`; `Ok(0)` once the peer has closed the session.
    fn read(&mut self, io: &mut dyn RawTransport, buf: &mut [u8]) -> IoResult<usize>;

    /// Encrypts and sends a prefix of `data`, returning how much was taken.
    fn write(&mut self, io: &mut dyn RawTransport, data: &[u8]) -> IoResult<usize>;

    /// Sends a close notification for the given direction.
    fn close(&mut self, io: &mut dyn RawTransport, how: Shutdown) -> IoResult<()>;

    /// Describes a backend-specific error code.
    fn describe_error(&self, code: i32) -> String {
        format!("secure session error {}", code)
    }
}
