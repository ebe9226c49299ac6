use std::time::Duration;

use crate::error::{IoError, IoResult, Status};
use crate::poll::{self, Deadline, Event};
use crate::secure::SessionContext;

use super::raw::{self, ConnectState, FdTransport};
use super::{Socket, options};

/*
`pending` covers two phases: the transport connect (`connected == false`)
and, for secure sockets, the handshake (`connected == true`). Both are
resumable: a timeout leaves the socket pending and the next call picks up
where the last one stopped.
 */

impl Socket {
	/// Issues the non-blocking `connect()` to the recorded peer.
	pub(crate) fn start_connect(&mut self) -> IoResult<()> {
		let fd = self.live_fd()?;
		let peer = self.peer.clone().ok_or(IoError::InvalidArgument)?;
		match raw::connect(fd, &peer) {
			Ok(ConnectState::Connected) => {
				self.connected = true;
				self.pending = false;
			}
			Ok(ConnectState::InProgress) => {
				self.connected = false;
				self.pending = true;
			}
			Err(err) => {
				let class = self.fail(err);
				self.set_status(super::Direction::ReadWrite, IoError::Closed);
				return Err(class);
			}
		}
		if self.secure {
			self.begin_session()?;
		}
		if self.logging() {
			tracing::debug!(sock = %self.description(), peer = %peer, pending = self.pending, "connecting");
		}
		if !self.pending {
			self.flush_initial();
		}
		Ok(())
	}

	/// Creates the secure session and marks the handshake as outstanding.
	pub(crate) fn begin_session(&mut self) -> IoResult<()> {
		let backend = self.ctx.secure_backend().inspect_err(|_| {
			tracing::warn!(sock = %self.description(), "secure session requested but no backend installed");
		})?;
		let side = self.side().ok_or(IoError::NotSupported)?;
		let session = {
			let info = SessionContext { side, peer: self.peer.as_ref(), socket_id: self.id };
			backend.create(&info)
		};
		match session {
			Ok(session) => {
				self.session = Some(session);
				self.pending = true;
				self.handshake_wants = match side {
					crate::secure::Side::Client => Event::Write,
					crate::secure::Side::Server => Event::Read,
				};
				Ok(())
			}
			Err(err) => {
				tracing::warn!(sock = %self.description(), error = %err, "secure session creation failed");
				self.set_status(super::Direction::ReadWrite, err);
				Err(err)
			}
		}
	}

	/// Drives a pending connect and handshake to completion within `timeout`.
	///
	/// A timeout keeps the socket pending; any other failure is terminal.
	pub(crate) fn resolve_pending(&mut self, timeout: Option<Duration>) -> IoResult<()> {
		if !self.pending {
			return Ok(());
		}
		let fd = self.live_fd()?;
		let deadline = Deadline::after(timeout);
		let interruptible = self.interrupts_on_signal();

		if !self.connected {
			poll::wait_fd(fd, libc::POLLOUT, &deadline, interruptible, self.ctx.config())?;
			let error = match self.fd.as_ref() {
				Some(handle) => options::take_error(handle).map_err(|err| self.fail(err))?,
				None => return Err(IoError::Closed),
			};
			if let Some(errno) = error {
				let addr = self.peer.as_ref().map(|p| p.to_string()).unwrap_or_default();
				let class = self.fail(crate::error::SocketError::Connect { errno, addr });
				return Err(self.fail_pending(class));
			}
			self.connected = true;
			if self.session.is_none() {
				self.pending = false;
			}
			if self.logging() {
				tracing::debug!(sock = %self.description(), "connected");
			}
		}

		while self.pending {
			let Some(session) = self.session.as_mut() else {
				self.pending = false;
				break;
			};
			let mut io = FdTransport::new(fd);
			match session.open(&mut io) {
				Ok(()) => {
					self.pending = false;
					if self.logging() {
						tracing::debug!(sock = %self.description(), "secure session established");
					}
				}
				Err(IoError::Timeout) => {
					self.handshake_wants = io.blocked.unwrap_or(Event::Read);
					poll::wait_fd(fd, self.handshake_wants.os_events(), &deadline, interruptible, self.ctx.config())?;
				}
				Err(err) => {
					tracing::warn!(sock = %self.description(), error = %err, "secure handshake failed");
					return Err(self.fail_pending(err));
				}
			}
		}

		self.flush_initial();
		Ok(())
	}

	/// Initial data goes out as soon as the connection is up; what does not fit stays queued.
	fn flush_initial(&mut self) {
		if self.w_buf.is_empty() {
			return;
		}
		match self.flush_output(Some(Duration::ZERO)) {
			Ok(()) | Err(IoError::Timeout) => {}
			Err(err) => self.w_status = err.into(),
		}
	}

	/// OS events a pending socket waits on.
	pub(crate) fn pending_events(&self) -> libc::c_short {
		if self.connected {
			self.handshake_wants.os_events()
		} else {
			libc::POLLOUT
		}
	}

	/// Resolves a pending socket within the timeout of `direction`, recording a timeout there.
	pub(crate) fn settle(&mut self, direction: super::Direction) -> IoResult<()> {
		if !self.pending {
			return Ok(());
		}
		let timeout = self.timeout(direction);
		self.resolve_pending(timeout).inspect_err(|err| {
			if *err == IoError::Timeout {
				self.set_status(direction, *err);
			}
		})
	}

	fn fail_pending(&mut self, err: IoError) -> IoError {
		// A refused or reset connection reads as closed, not as an opaque failure.
		let err = if err == IoError::Timeout { IoError::Closed } else { err };
		self.pending = false;
		self.session = None;
		self.r_status = Status::Closed;
		self.w_status = Status::Closed;
		err
	}
}
