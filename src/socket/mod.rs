mod builder;
mod datagram;
mod lifecycle;
mod listener;
mod options;
mod pending;
mod raw;
mod stream;
mod trigger;

pub use self::builder::{
	BufferConfig, ConnectorBuilder, DatagramBuilder, KeepaliveConfig, ListenerBuilder, ReuseConfig,
	TcpConfig,
};
pub use self::datagram::MsgResult;
pub use self::lifecycle::AbortHandle;
pub use self::listener::{AcceptOptions, Listener};
pub use self::options::{
	set_broadcast, set_keepalive, set_keepalive_count, set_keepalive_idle, set_keepalive_interval,
	set_linger, set_recv_buffer_size, set_reuse_addr, set_reuse_port, set_send_buffer_size,
	set_tcp_nodelay, sock_type, take_error,
};
pub use self::trigger::Trigger;

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use crate::addr::PeerAddr;
use crate::context::Context;
use crate::error::{IoError, IoResult, Status};
use crate::queue::ByteQueue;
use crate::secure::{SecureSession, Side};

use self::lifecycle::AbortState;

/// Role of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
	/// Stream socket that initiated its connection.
	Client,
	/// Stream socket produced by accept (or wrapped on top of a connected handle).
	Server,
	/// Message-oriented socket.
	Datagram,
}

impl Kind {
	pub fn is_stream(self) -> bool {
		!matches!(self, Kind::Datagram)
	}
}

/// Direction(s) to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shutdown {
	Read,
	Write,
	ReadWrite,
}

impl Shutdown {
	pub(crate) fn includes_read(self) -> bool {
		matches!(self, Shutdown::Read | Shutdown::ReadWrite)
	}

	pub(crate) fn includes_write(self) -> bool {
		matches!(self, Shutdown::Write | Shutdown::ReadWrite)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadMode {
	/// Return as soon as at least one byte is available.
	Plain,
	/// Like `Plain`, but the bytes stay queued for the next read.
	Peek,
	/// Keep reading until the buffer is full or the stream fails.
	Persist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
	/// Send what the transport accepts now (waiting for at least one byte).
	Plain,
	/// Urgent data; sent at once or not at all. Stream sockets only.
	OutOfBand,
	/// Keep writing until everything is sent or the stream fails.
	Persist,
}

/// Selects a timeout or a status slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
	/// Connection establishment, including the secure handshake.
	Open,
	Read,
	Write,
	/// Read and write together. Reading it returns the shorter of the two.
	ReadWrite,
	Close,
}

/// Per-socket timeouts. `None` waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeouts {
	pub open: Option<Duration>,
	pub read: Option<Duration>,
	pub write: Option<Duration>,
	pub close: Option<Duration>,
}

/// Engine flags shared by sockets made by any builder.
///
/// `None` toggles follow the context [`Config`](crate::Config).
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
	pub timeouts: Timeouts,
	pub secure: bool,
	pub log: Option<bool>,
	pub read_on_write: Option<bool>,
	pub interrupt_on_signal: Option<bool>,
	pub keep_on_close: bool,
}

/// Byte and message counters.
///
/// `read`/`written` restart at zero on reconnect; the totals never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
	pub read: u64,
	pub written: u64,
	pub total_read: u64,
	pub total_written: u64,
	pub messages_in: u64,
	pub messages_out: u64,
}

impl Counters {
	pub(crate) fn add_read(&mut self, n: usize) {
		self.read += n as u64;
		self.total_read += n as u64;
	}

	pub(crate) fn add_written(&mut self, n: usize) {
		self.written += n as u64;
		self.total_written += n as u64;
	}

	pub(crate) fn restart(&mut self) {
		self.read = 0;
		self.written = 0;
	}
}

/// A non-blocking stream or datagram socket driven with blocking-style calls.
///
/// Every call blocks at most for the matching timeout. Inbound bytes pass
/// through a queue that supports peeking and push-back; outbound bytes left
/// over from a previous call (or supplied as initial data) are sent before
/// anything new. A socket is owned by one thread at a time; use an
/// [`AbortHandle`] to force it down from elsewhere.
pub struct Socket {
	ctx: Arc<Context>,
	fd: Option<OwnedFd>,
	kind: Kind,
	id: u64,
	peer: Option<PeerAddr>,
	r_status: Status,
	w_status: Status,
	eof: bool,
	pending: bool,
	connected: bool,
	/// Readiness the in-flight handshake is waiting for.
	handshake_wants: crate::poll::Event,
	secure: bool,
	session: Option<Box<dyn SecureSession>>,
	timeouts: Timeouts,
	log: Option<bool>,
	read_on_write: Option<bool>,
	interrupt_on_signal: Option<bool>,
	keep: bool,
	/// SO_LINGER seconds replacing the close-time policy.
	linger: Option<Option<u32>>,
	r_buf: ByteQueue,
	w_buf: ByteQueue,
	counters: Counters,
	abort: Arc<AbortState>,
}

impl Socket {
	pub(crate) fn assemble(
		ctx: Arc<Context>,
		fd: OwnedFd,
		kind: Kind,
		peer: Option<PeerAddr>,
		options: &SocketOptions,
	) -> Self {
		let abort = Arc::new(AbortState::default());
		abort.attach(fd.as_raw_fd());
		let id = ctx.next_id();
		Self {
			ctx,
			fd: Some(fd),
			kind,
			id,
			peer,
			r_status: Status::Success,
			w_status: Status::Success,
			eof: false,
			pending: false,
			connected: false,
			handshake_wants: crate::poll::Event::Read,
			secure: options.secure,
			session: None,
			timeouts: options.timeouts,
			log: options.log,
			read_on_write: options.read_on_write,
			interrupt_on_signal: options.interrupt_on_signal,
			keep: options.keep_on_close,
			linger: None,
			r_buf: ByteQueue::new(),
			w_buf: ByteQueue::new(),
			counters: Counters::default(),
			abort,
		}
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn kind(&self) -> Kind {
		self.kind
	}

	/// Handshake role of a stream socket.
	pub fn side(&self) -> Option<Side> {
		match self.kind {
			Kind::Client => Some(Side::Client),
			Kind::Server => Some(Side::Server),
			Kind::Datagram => None,
		}
	}

	/// Connected peer (streams) or default peer (datagrams).
	pub fn peer_addr(&self) -> Option<&PeerAddr> {
		self.peer.as_ref()
	}

	pub fn local_addr(&self) -> Option<PeerAddr> {
		let fd = self.fd.as_ref()?.as_raw_fd();
		raw::local_name(fd).ok().flatten()
	}

	pub fn is_pending(&self) -> bool {
		self.pending
	}

	pub fn is_connected(&self) -> bool {
		self.connected
	}

	pub fn is_eof(&self) -> bool {
		self.eof
	}

	pub fn is_secure(&self) -> bool {
		self.session.is_some()
	}

	pub fn is_closed(&self) -> bool {
		self.fd.is_none()
	}

	/// Last outcome of the given direction.
	///
	/// `ReadWrite` reports the read side unless it succeeded; `Open` and
	/// `Close` report closed once the handle is gone.
	pub fn status(&self, direction: Direction) -> Status {
		match direction {
			Direction::Read => self.r_status,
			Direction::Write => self.w_status,
			Direction::ReadWrite if !self.r_status.is_success() => self.r_status,
			Direction::ReadWrite => self.w_status,
			Direction::Open | Direction::Close if self.fd.is_none() => Status::Closed,
			Direction::Open | Direction::Close => Status::Success,
		}
	}

	pub fn counters(&self) -> Counters {
		self.counters
	}

	/// Bytes queued for reading.
	pub fn pending_input(&self) -> usize {
		self.r_buf.len()
	}

	/// Bytes queued for sending.
	pub fn pending_output(&self) -> usize {
		self.w_buf.len()
	}

	pub fn description(&self) -> String {
		match &self.fd {
			Some(fd) => format!("SOCK#{}[{}]", self.id, fd.as_raw_fd()),
			None => format!("SOCK#{}[closed]", self.id),
		}
	}

	pub fn context(&self) -> &Arc<Context> {
		&self.ctx
	}

	pub fn timeout(&self, direction: Direction) -> Option<Duration> {
		match direction {
			Direction::Open => self.timeouts.open,
			Direction::Read => self.timeouts.read,
			Direction::Write => self.timeouts.write,
			Direction::Close => self.timeouts.close,
			Direction::ReadWrite => match (self.timeouts.read, self.timeouts.write) {
				(Some(r), Some(w)) => Some(r.min(w)),
				(r, w) => r.or(w),
			},
		}
	}

	pub fn set_timeout(&mut self, direction: Direction, timeout: Option<Duration>) {
		match direction {
			Direction::Open => self.timeouts.open = timeout,
			Direction::Read => self.timeouts.read = timeout,
			Direction::Write => self.timeouts.write = timeout,
			Direction::ReadWrite => {
				self.timeouts.read = timeout;
				self.timeouts.write = timeout;
			}
			Direction::Close => self.timeouts.close = timeout,
		}
	}

	pub fn set_logging(&mut self, log: Option<bool>) {
		self.log = log;
	}

	pub fn set_read_on_write(&mut self, enable: Option<bool>) {
		self.read_on_write = enable;
	}

	pub fn set_interrupt_on_signal(&mut self, enable: Option<bool>) {
		self.interrupt_on_signal = enable;
	}

	/// Leaves the OS handle open when the socket is closed or dropped.
	pub fn set_keep_on_close(&mut self, keep: bool) {
		self.keep = keep;
	}

	pub fn set_reuse_address(&mut self, enable: bool) -> IoResult<()> {
		let fd = self.fd.as_ref().ok_or(IoError::Closed)?;
		set_reuse_addr(fd, enable).map_err(|err| self.fail(err))
	}

	/// Describes a secure-session error code.
	pub fn secure_error_text(&self, code: i32) -> Option<String> {
		self.session.as_ref().map(|session| session.describe_error(code))
	}

	pub(crate) fn logging(&self) -> bool {
		self.log.unwrap_or(self.ctx.config().log)
	}

	pub(crate) fn reads_on_write(&self) -> bool {
		self.read_on_write.unwrap_or(self.ctx.config().read_on_write)
	}

	pub(crate) fn interrupts_on_signal(&self) -> bool {
		self.interrupt_on_signal.unwrap_or(self.ctx.config().interrupt_on_signal)
	}

	/// Returns the live descriptor, finishing an abort requested from another thread.
	pub(crate) fn live_fd(&mut self) -> IoResult<RawFd> {
		if self.abort.is_aborted() && self.fd.is_some() {
			self.close_with(true);
		}
		self.fd.as_ref().map(|fd| fd.as_raw_fd()).ok_or(IoError::Closed)
	}

	/// Logs a syscall failure and returns its coarse class.
	pub(crate) fn fail(&self, err: crate::error::SocketError) -> IoError {
		tracing::warn!(sock = %self.description(), error = %err, "socket call failed");
		err.classify()
	}

	pub(crate) fn set_status(&mut self, direction: Direction, err: IoError) {
		match direction {
			Direction::Read => self.r_status = err.into(),
			Direction::Write => self.w_status = err.into(),
			_ => {
				self.r_status = err.into();
				self.w_status = err.into();
			}
		}
	}
}

impl std::fmt::Debug for Socket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Socket")
			.field("id", &self.id)
			.field("kind", &self.kind)
			.field("fd", &self.fd.as_ref().map(|fd| fd.as_raw_fd()))
			.field("peer", &self.peer)
			.field("pending", &self.pending)
			.field("r_status", &self.r_status)
			.field("w_status", &self.w_status)
			.field("eof", &self.eof)
			.finish_non_exhaustive()
	}
}

impl Drop for Socket {
	fn drop(&mut self) {
		self.close_with(false);
	}
}
