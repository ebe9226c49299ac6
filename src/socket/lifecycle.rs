use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::addr::PeerAddr;
use crate::context::Context;
use crate::error::{IoError, IoResult, Status};
use crate::secure::Side;

use super::raw::{self, FdTransport, RawSocket, SockType};
use super::{Kind, Shutdown, Socket, SocketOptions, options};

/// Descriptor slot shared between a socket and its [`AbortHandle`]s.
///
/// The slot is cleared under the lock before the descriptor is closed, so
/// a handle never shuts down a number the OS has already reused.
#[derive(Debug, Default)]
pub(crate) struct AbortState {
	fd: Mutex<Option<RawFd>>,
	aborted: AtomicBool,
}

impl AbortState {
	pub(crate) fn attach(&self, fd: RawFd) {
		*self.fd.lock() = Some(fd);
		self.aborted.store(false, Ordering::SeqCst);
	}

	pub(crate) fn is_aborted(&self) -> bool {
		self.aborted.load(Ordering::SeqCst)
	}

	fn release(&self, fd: OwnedFd, keep: bool) {
		let mut slot = self.fd.lock();
		*slot = None;
		if keep {
			raw::leak(fd);
		} else {
			drop(fd);
		}
	}
}

/// Forces a socket's transport down from any thread.
///
/// A call blocked on the owning thread wakes up and fails with
/// [`IoError::Closed`]; the socket then closes itself without lingering.
#[derive(Debug, Clone)]
pub struct AbortHandle {
	state: Arc<AbortState>,
}

impl AbortHandle {
	pub fn abort(&self) {
		let slot = self.state.fd.lock();
		self.state.aborted.store(true, Ordering::SeqCst);
		if let Some(fd) = *slot {
			unsafe { libc::shutdown(fd, libc::SHUT_RDWR) };
		}
	}
}

impl Socket {
	/// Creates a stream socket and starts connecting it to `peer`.
	///
	/// With a zero `timeout` the socket is returned still pending;
	/// otherwise a failed or timed-out connect aborts it.
	pub(crate) fn open_client(
		ctx: &Arc<Context>,
		peer: PeerAddr,
		options: &SocketOptions,
		prepare: impl FnOnce(&RawSocket) -> Result<(), crate::error::SocketError>,
		initial: &[u8],
	) -> IoResult<Socket> {
		let socket = RawSocket::new(peer.family(), SockType::Stream).map_err(|err| {
			tracing::warn!(peer = %peer, error = %err, "cannot create stream socket");
			err.classify()
		})?;
		prepare(&socket).map_err(|err| {
			tracing::warn!(peer = %peer, error = %err, "cannot configure stream socket");
			err.classify()
		})?;
		let mut sock = Socket::assemble(ctx.clone(), socket.into_fd(), Kind::Client, Some(peer), options);
		sock.w_buf.write(initial);
		sock.establish(options.timeouts.open)?;
		Ok(sock)
	}

	/// Wraps a connection produced by accept.
	pub(crate) fn from_accepted(
		ctx: &Arc<Context>,
		fd: OwnedFd,
		peer: Option<PeerAddr>,
		options: &SocketOptions,
	) -> IoResult<Socket> {
		let mut sock = Socket::assemble(ctx.clone(), fd, Kind::Server, peer, options);
		sock.connected = true;
		if sock.secure {
			sock.begin_session()?;
		}
		if sock.logging() {
			tracing::debug!(sock = %sock.description(), peer = ?sock.peer, "accepted");
		}
		Ok(sock)
	}

	/// Wraps an existing OS socket handle.
	///
	/// The handle is switched to non-blocking mode. Stream handles must be
	/// connected; `secure` starts a handshake in the given role. With
	/// [`SocketOptions::keep_on_close`] the handle outlives the socket.
	pub fn on_top(
		ctx: &Arc<Context>,
		fd: OwnedFd,
		secure: Option<Side>,
		options: &SocketOptions,
	) -> IoResult<Socket> {
		let ty = options::sock_type(&fd).map_err(|err| {
			tracing::warn!(error = %err, "handle is not a socket");
			err.classify()
		})?;
		let kind = match (ty, secure) {
			(libc::SOCK_STREAM, Some(Side::Client)) => Kind::Client,
			(libc::SOCK_STREAM, _) => Kind::Server,
			(libc::SOCK_DGRAM, None) => Kind::Datagram,
			_ => return Err(IoError::NotSupported),
		};
		let peer = match raw::peer_name(fd.as_raw_fd()) {
			Ok(peer) => peer,
			Err(err) if kind == Kind::Datagram && err.errno() == libc::ENOTCONN => None,
			Err(err) => {
				tracing::warn!(error = %err, "handle is not connected");
				return Err(err.classify());
			}
		};
		raw::set_nonblocking(fd.as_raw_fd(), true).map_err(|err| err.classify())?;
		let mut options = options.clone();
		options.secure = secure.is_some();
		let mut sock = Socket::assemble(ctx.clone(), fd, kind, peer, &options);
		sock.connected = kind.is_stream();
		if sock.secure {
			sock.begin_session()?;
		}
		if sock.logging() {
			tracing::debug!(sock = %sock.description(), kind = ?kind, "wrapped existing handle");
		}
		Ok(sock)
	}

	/// Returns a handle that can abort this socket from another thread.
	pub fn abort_handle(&self) -> AbortHandle {
		AbortHandle { state: self.abort.clone() }
	}

	/// Shuts down one or both directions of a stream socket.
	///
	/// Shutting down writing first tries to send queued output within the
	/// close timeout (a failure there is only logged) and sends the secure
	/// close notification.
	pub fn shutdown(&mut self, how: Shutdown) -> IoResult<()> {
		let fd = self.live_fd()?;
		if self.kind == Kind::Datagram {
			return Err(IoError::InvalidArgument);
		}
		if self.pending {
			self.resolve_pending(self.timeouts.close)?;
		}
		if how.includes_write() && self.w_status != Status::Closed {
			if let Err(err) = self.flush_output(self.timeouts.close) {
				tracing::warn!(
					sock = %self.description(),
					error = %err,
					unsent = self.w_buf.len(),
					"output not flushed before shutdown"
				);
			}
			if let Some(session) = self.session.as_mut() {
				let mut io = FdTransport::new(fd);
				if let Err(err) = session.close(&mut io, Shutdown::Write) {
					tracing::debug!(sock = %self.description(), error = %err, "secure close notification failed");
				}
			}
			self.os_shutdown(fd, libc::SHUT_WR);
			self.w_status = Status::Closed;
		}
		if how.includes_read() && self.r_status != Status::Closed {
			// Past end of stream the read side is already finished.
			if !self.eof {
				self.os_shutdown(fd, libc::SHUT_RD);
			}
			self.r_status = Status::Closed;
		}
		if self.logging() {
			tracing::debug!(sock = %self.description(), how = ?how, "shut down");
		}
		Ok(())
	}

	/// Closes the socket gracefully. Closing again is a no-op.
	pub fn close(&mut self) -> IoResult<()> {
		self.close_with(false);
		Ok(())
	}

	/// Closes the socket at once, discarding queued output and resetting the connection.
	pub fn abort(&mut self) -> IoResult<()> {
		self.close_with(true);
		Ok(())
	}

	/// Closes and reconnects a stream socket.
	///
	/// `peer` replaces the recorded peer and makes the socket a client.
	/// Timeouts and flags carry over; the id changes and live counters restart.
	pub fn reconnect(&mut self, peer: Option<PeerAddr>, timeout: Option<Duration>) -> IoResult<()> {
		if self.kind == Kind::Datagram {
			return Err(IoError::InvalidArgument);
		}
		let target = match peer {
			Some(peer) => {
				self.kind = Kind::Client;
				peer
			}
			None => self.peer.clone().ok_or(IoError::InvalidArgument)?,
		};
		self.close_with(false);

		let socket = RawSocket::new(target.family(), SockType::Stream).map_err(|err| self.fail(err))?;
		let fd = socket.into_fd();
		self.abort.attach(fd.as_raw_fd());
		self.fd = Some(fd);
		self.id = self.ctx.next_id();
		self.peer = Some(target);
		self.counters.restart();
		self.r_status = Status::Success;
		self.w_status = Status::Success;
		self.eof = false;
		self.pending = false;
		self.connected = false;
		if self.logging() {
			tracing::debug!(sock = %self.description(), "reconnecting");
		}
		self.establish(timeout)
	}

	fn establish(&mut self, timeout: Option<Duration>) -> IoResult<()> {
		if let Err(err) = self.start_connect() {
			self.close_with(true);
			return Err(err);
		}
		if timeout == Some(Duration::ZERO) {
			return Ok(());
		}
		if let Err(err) = self.resolve_pending(timeout) {
			self.close_with(true);
			return Err(err);
		}
		Ok(())
	}

	fn os_shutdown(&self, fd: RawFd, how: libc::c_int) {
		if let Err(err) = raw::shutdown(fd, how) {
			if err.errno() != libc::ENOTCONN {
				tracing::warn!(sock = %self.description(), error = %err, "shutdown failed");
			}
		}
	}

	/// Shared tail of close, abort and drop.
	pub(crate) fn close_with(&mut self, abort: bool) {
		let Some(handle) = self.fd.as_ref() else {
			return;
		};
		let fd = handle.as_raw_fd();
		// A connect or handshake that never finished is owed no close notification.
		let abort = abort || self.abort.is_aborted() || self.pending;
		let description = self.description();

		if self.kind.is_stream() {
			if abort {
				self.w_buf.clear();
			} else if self.connected {
				let result = if self.keep {
					self.flush_output(self.timeouts.close)
				} else {
					self.shutdown(Shutdown::ReadWrite)
				};
				if let Err(err) = result {
					tracing::debug!(sock = %description, error = %err, keep = self.keep, "connection not wound down cleanly");
				}
			}
			self.session = None;
			if !self.keep {
				let linger = if abort {
					Some(0)
				} else if let Some(linger) = self.linger {
					linger
				} else {
					match self.timeouts.close {
						None => Some(whole_seconds(self.ctx.config().linger)),
						Some(close) if close.is_zero() => None,
						Some(close) => Some(whole_seconds(close)),
					}
				};
				if let Some(handle) = self.fd.as_ref() {
					if let Err(err) = options::set_linger(handle, linger) {
						tracing::debug!(sock = %description, error = %err, "linger not applied");
					}
				}
			}
		}

		if let Some(handle) = self.fd.take() {
			self.abort.release(handle, self.keep);
		}
		self.r_buf.clear();
		self.w_buf.clear();
		self.r_status = Status::Closed;
		self.w_status = Status::Closed;
		self.pending = false;
		self.connected = false;
		if self.logging() {
			tracing::debug!(
				sock = %description,
				fd,
				aborted = abort,
				read = self.counters.read,
				written = self.counters.written,
				"closed"
			);
		}
	}

	/// Replaces the close-time SO_LINGER policy for this socket.
	pub(crate) fn set_linger_override(&mut self, linger: Option<Option<u32>>) {
		self.linger = linger;
	}
}

pub(crate) fn whole_seconds(duration: Duration) -> u32 {
	let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
	secs.min(u64::from(u32::MAX)) as u32
}
