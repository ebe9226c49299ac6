use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use crate::addr::PeerAddr;
use crate::context::Context;
use crate::error::{IoError, IoResult};
use crate::poll::{self, Deadline, Event, PollEntry};

use super::builder::TcpConfig;
use super::{Socket, SocketOptions, raw};

/// Per-accept overrides of what a listener hands its connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptOptions {
	pub log: Option<bool>,
	pub keepalive: Option<bool>,
}

impl AcceptOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn log(mut self, enable: bool) -> Self {
		self.log = Some(enable);
		self
	}

	pub fn keepalive(mut self, enable: bool) -> Self {
		self.keepalive = Some(enable);
		self
	}
}

/// A listening stream socket.
///
/// Accepted connections are [`Kind::Server`](super::Kind::Server) sockets
/// configured from the listener's template.
pub struct Listener {
	ctx: Arc<Context>,
	fd: Option<OwnedFd>,
	id: u64,
	addr: Option<PeerAddr>,
	backlog: i32,
	accepted: u64,
	keep: bool,
	tcp: TcpConfig,
	template: SocketOptions,
}

impl Listener {
	pub(crate) fn from_parts(
		ctx: Arc<Context>,
		fd: OwnedFd,
		backlog: i32,
		keep: bool,
		tcp: TcpConfig,
		template: SocketOptions,
	) -> Self {
		let addr = raw::local_name(fd.as_raw_fd()).ok().flatten();
		let id = ctx.next_id();
		let listener = Self { ctx, fd: Some(fd), id, addr, backlog, accepted: 0, keep, tcp, template };
		if listener.logging() {
			tracing::debug!(
				sock = %listener.description(),
				addr = ?listener.addr,
				backlog,
				"listening"
			);
		}
		listener
	}

	/// Accepts one connection, waiting at most `timeout`.
	pub fn accept(&mut self, timeout: Option<Duration>) -> IoResult<Socket> {
		self.accept_with(timeout, AcceptOptions::default())
	}

	/// Like [`Listener::accept`], overriding the inherited logging and keep-alive flags.
	pub fn accept_with(&mut self, timeout: Option<Duration>, overrides: AcceptOptions) -> IoResult<Socket> {
		let ctx = self.ctx.clone();
		let deadline = Deadline::after(timeout);
		loop {
			let fd = self.raw_fd().ok_or(IoError::Closed)?;
			match raw::accept(fd) {
				Ok((client, peer)) => return self.admit(client, peer, overrides),
				Err(err) if err.errno() == libc::EAGAIN || err.errno() == libc::ECONNABORTED => {
					let mut set = [PollEntry::listener(self), PollEntry::none(Event::Read)];
					poll::select(&mut set, deadline.remaining(), ctx.config())?;
				}
				Err(err) if err.errno() == libc::EINTR => {
					if self.template.interrupt_on_signal.unwrap_or(ctx.config().interrupt_on_signal) {
						return Err(IoError::Interrupted);
					}
				}
				Err(err) => {
					tracing::warn!(sock = %self.description(), error = %err, "accept failed");
					return Err(err.classify());
				}
			}
		}
	}

	fn admit(&mut self, client: OwnedFd, peer: Option<PeerAddr>, overrides: AcceptOptions) -> IoResult<Socket> {
		let mut tcp = self.tcp;
		match overrides.keepalive {
			Some(true) if tcp.keepalive.is_none() => tcp.keepalive = Some(Default::default()),
			Some(false) => tcp.keepalive = None,
			_ => {}
		}
		let is_unix = peer.as_ref().is_none_or(PeerAddr::is_unix);
		if let Err(err) = tcp.apply(&client, is_unix) {
			tracing::warn!(sock = %self.description(), error = %err, "cannot configure accepted socket");
		}
		let mut options = self.template.clone();
		if overrides.log.is_some() {
			options.log = overrides.log;
		}
		let mut sock = Socket::from_accepted(&self.ctx, client, peer, &options)?;
		sock.set_linger_override(tcp.linger);
		self.accepted += 1;
		Ok(sock)
	}

	/// Bound address; with port 0 this reports the port the OS picked.
	pub fn local_addr(&self) -> Option<&PeerAddr> {
		self.addr.as_ref()
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn backlog(&self) -> i32 {
		self.backlog
	}

	/// Connections accepted so far.
	pub fn accepted(&self) -> u64 {
		self.accepted
	}

	pub fn is_closed(&self) -> bool {
		self.fd.is_none()
	}

	pub fn description(&self) -> String {
		match &self.fd {
			Some(fd) => format!("LSOCK#{}[{}]", self.id, fd.as_raw_fd()),
			None => format!("LSOCK#{}[closed]", self.id),
		}
	}

	/// Stops listening. Closing again is a no-op.
	pub fn close(&mut self) -> IoResult<()> {
		let Some(fd) = self.fd.take() else {
			return Ok(());
		};
		if self.logging() {
			tracing::debug!(sock = %format!("LSOCK#{}[{}]", self.id, fd.as_raw_fd()), accepted = self.accepted, "closed");
		}
		if self.keep {
			raw::leak(fd);
		} else if let Some(PeerAddr::Unix(path)) = &self.addr {
			drop(fd);
			if !path.is_abstract() && !path.path().is_empty() {
				use std::os::unix::ffi::OsStrExt;
				let _ = std::fs::remove_file(std::ffi::OsStr::from_bytes(path.path()));
			}
		}
		Ok(())
	}

	pub(crate) fn raw_fd(&self) -> Option<RawFd> {
		self.fd.as_ref().map(|fd| fd.as_raw_fd())
	}

	fn logging(&self) -> bool {
		self.template.log.unwrap_or(self.ctx.config().log)
	}
}

impl std::fmt::Debug for Listener {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Listener")
			.field("id", &self.id)
			.field("addr", &self.addr)
			.field("accepted", &self.accepted)
			.finish_non_exhaustive()
	}
}

impl Drop for Listener {
	fn drop(&mut self) {
		let _ = self.close();
	}
}
