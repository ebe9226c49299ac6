use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::addr::PeerAddr;
use crate::context::Context;
use crate::error::{IoError, IoResult, SocketError};

use super::lifecycle::whole_seconds;
use super::raw::{RawSocket, SockType};
use super::{
	Kind, Listener, Socket, SocketOptions, Timeouts,
	set_keepalive, set_keepalive_count, set_keepalive_idle, set_keepalive_interval,
	set_recv_buffer_size, set_reuse_addr, set_reuse_port, set_send_buffer_size, set_tcp_nodelay,
};

/// Kernel buffer sizes. Unset sizes keep the system default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferConfig {
	pub recv: Option<usize>,
	pub send: Option<usize>,
}

impl BufferConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn recv(self, size: usize) -> Self {
		Self { recv: Some(size), ..self }
	}

	pub fn send(self, size: usize) -> Self {
		Self { send: Some(size), ..self }
	}

	pub fn both(self, size: usize) -> Self {
		self.recv(size).send(size)
	}

	pub(crate) fn apply<S: AsRawFd>(&self, socket: &S) -> Result<(), SocketError> {
		self.recv.map_or(Ok(()), |size| set_recv_buffer_size(socket, size))?;
		self.send.map_or(Ok(()), |size| set_send_buffer_size(socket, size))
	}
}

/// Address reuse on bind. Listeners reuse the address by default; datagram
/// sockets reuse nothing unless asked.
#[derive(Debug, Clone, Copy)]
pub struct ReuseConfig {
	pub addr: bool,
	pub port: bool,
}

impl Default for ReuseConfig {
	fn default() -> Self {
		Self { addr: true, port: false }
	}
}

impl ReuseConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn none() -> Self {
		Self { addr: false, port: false }
	}

	pub fn addr(self, enable: bool) -> Self {
		Self { addr: enable, ..self }
	}

	/// SO_REUSEPORT: several sockets share one port and the kernel spreads connections across them.
	pub fn port(self, enable: bool) -> Self {
		Self { port: enable, ..self }
	}

	pub(crate) fn apply<S: AsRawFd>(&self, socket: &S) -> Result<(), SocketError> {
		if self.addr {
			set_reuse_addr(socket, true)?;
		}
		if self.port {
			set_reuse_port(socket, true)?;
		}
		Ok(())
	}
}

/// Options applied to TCP connections; Unix-domain streams skip them.
///
/// `linger` replaces the close-time SO_LINGER policy (`Some(None)` turns
/// lingering off); an abort still resets the connection.
#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
	pub nodelay: bool,
	pub keepalive: Option<KeepaliveConfig>,
	pub linger: Option<Option<u32>>,
}

impl Default for TcpConfig {
	fn default() -> Self {
		Self { nodelay: true, keepalive: None, linger: None }
	}
}

impl TcpConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn nodelay(self, enable: bool) -> Self {
		Self { nodelay: enable, ..self }
	}

	pub fn keepalive(self, config: KeepaliveConfig) -> Self {
		Self { keepalive: Some(config), ..self }
	}

	pub fn linger(self, seconds: Option<u32>) -> Self {
		Self { linger: Some(seconds), ..self }
	}

	pub(crate) fn apply<S: AsRawFd>(&self, socket: &S, is_unix: bool) -> Result<(), SocketError> {
		if is_unix {
			return Ok(());
		}
		if self.nodelay {
			set_tcp_nodelay(socket, true)?;
		}
		match self.keepalive {
			Some(config) => config.apply(socket),
			None => Ok(()),
		}
	}
}

/// Keep-alive probing. The kernel counts in whole seconds, so durations round up.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
	pub idle: Duration,
	pub interval: Duration,
	pub count: u32,
}

impl Default for KeepaliveConfig {
	fn default() -> Self {
		Self { idle: Duration::from_secs(60), interval: Duration::from_secs(10), count: 5 }
	}
}

impl KeepaliveConfig {
	pub fn new() -> Self {
		Self::default()
	}

	/// Quiet time before the first probe.
	pub fn idle(self, idle: Duration) -> Self {
		Self { idle, ..self }
	}

	pub fn interval(self, interval: Duration) -> Self {
		Self { interval, ..self }
	}

	/// Unanswered probes before the connection is dropped.
	pub fn count(self, count: u32) -> Self {
		Self { count, ..self }
	}

	fn apply<S: AsRawFd>(&self, socket: &S) -> Result<(), SocketError> {
		set_keepalive(socket, true)?;
		set_keepalive_idle(socket, whole_seconds(self.idle).max(1))?;
		set_keepalive_interval(socket, whole_seconds(self.interval).max(1))?;
		set_keepalive_count(socket, self.count)
	}
}

fn setup_failed(what: &'static str, err: SocketError) -> IoError {
	tracing::warn!(error = %err, "{}", what);
	err.classify()
}

/// Engine flags every builder offers.
macro_rules! socket_flags {
	() => {
		pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
			self.options.timeouts.read = timeout;
			self
		}

		pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
			self.options.timeouts.write = timeout;
			self
		}

		pub fn close_timeout(mut self, timeout: Option<Duration>) -> Self {
			self.options.timeouts.close = timeout;
			self
		}

		pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
			self.options.timeouts = timeouts;
			self
		}

		pub fn log(mut self, enable: bool) -> Self {
			self.options.log = Some(enable);
			self
		}

		pub fn read_on_write(mut self, enable: bool) -> Self {
			self.options.read_on_write = Some(enable);
			self
		}

		pub fn interrupt_on_signal(mut self, enable: bool) -> Self {
			self.options.interrupt_on_signal = Some(enable);
			self
		}

		pub fn keep_on_close(mut self, enable: bool) -> Self {
			self.options.keep_on_close = enable;
			self
		}
	};
}

// ============================================================================
// Connector Builder
// ============================================================================

/// Builder for client stream connections (TCP or Unix).
///
/// # Example
/// ```ignore
/// use wirelink::{Config, ConnectorBuilder, Context, SocketAddrV4, TcpConfig};
///
/// let ctx = Context::new(Config::default());
/// let sock = ConnectorBuilder::new(&ctx)
///     .tcp(TcpConfig::new().nodelay(true))
///     .timeout(Some(Duration::from_secs(5)))
///     .initial_data(b"HELLO\n")
///     .connect(SocketAddrV4::localhost(8080))?;
/// ```
pub struct ConnectorBuilder {
	ctx: Arc<Context>,
	tcp: TcpConfig,
	buffers: BufferConfig,
	options: SocketOptions,
	initial: Vec<u8>,
}

impl ConnectorBuilder {
	pub fn new(ctx: &Arc<Context>) -> Self {
		Self {
			ctx: ctx.clone(),
			tcp: TcpConfig::default(),
			buffers: BufferConfig::default(),
			options: SocketOptions::default(),
			initial: Vec::new(),
		}
	}

	/// TCP options for the connection; Unix peers skip them.
	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	/// Connect (and handshake) timeout. `Some(Duration::ZERO)` returns a pending socket.
	pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
		self.options.timeouts.open = timeout;
		self
	}

	/// Runs the installed secure backend over the connection.
	pub fn secure(mut self, enable: bool) -> Self {
		self.options.secure = enable;
		self
	}

	/// Bytes sent as soon as the connection is established.
	pub fn initial_data(mut self, data: impl AsRef<[u8]>) -> Self {
		self.initial = data.as_ref().to_vec();
		self
	}

	socket_flags!();

	/// Connects to `peer`.
	pub fn connect(self, peer: impl Into<PeerAddr>) -> IoResult<Socket> {
		let peer = peer.into();
		let is_unix = peer.is_unix();
		let tcp = self.tcp;
		let buffers = self.buffers;
		let mut sock = Socket::open_client(
			&self.ctx,
			peer,
			&self.options,
			|socket| {
				tcp.apply(socket, is_unix)?;
				buffers.apply(socket)
			},
			&self.initial,
		)?;
		sock.set_linger_override(tcp.linger);
		Ok(sock)
	}

	/// Resolves `host` and connects to it.
	pub fn connect_host(self, host: &str, port: u16) -> IoResult<Socket> {
		let peer = PeerAddr::resolve(host, port)?;
		self.connect(peer)
	}
}

// ============================================================================
// Listener Builder
// ============================================================================

/// Opens passive stream sockets (TCP or Unix) that hand out connected [`Socket`]s.
///
/// The TCP options, timeouts and flags set here apply to every accepted socket.
///
/// # Example
/// ```ignore
/// use wirelink::{Context, Config, SocketAddrV4, ListenerBuilder, ReuseConfig, TcpConfig, KeepaliveConfig};
///
/// let ctx = Context::new(Config::default());
/// let mut listener = ListenerBuilder::new(&ctx)
///     .reuse(ReuseConfig::new().port(true))
///     .tcp(TcpConfig::new().keepalive(KeepaliveConfig::new().idle(Duration::from_secs(60))))
///     .backlog(1024)
///     .bind(SocketAddrV4::any(8080))?;
/// let conn = listener.accept(None)?;
/// ```
pub struct ListenerBuilder {
	ctx: Arc<Context>,
	reuse: ReuseConfig,
	tcp: TcpConfig,
	buffers: BufferConfig,
	backlog: i32,
	options: SocketOptions,
}

impl ListenerBuilder {
	pub fn new(ctx: &Arc<Context>) -> Self {
		Self {
			ctx: ctx.clone(),
			reuse: ReuseConfig::default(),
			tcp: TcpConfig::default(),
			buffers: BufferConfig::default(),
			backlog: 128,
			options: SocketOptions::default(),
		}
	}

	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	/// TCP options for accepted sockets (ignored for Unix sockets).
	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	/// Pending-connection queue length handed to `listen()`; 128 unless set.
	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = backlog;
		self
	}

	/// Runs the installed secure backend (server side) over accepted sockets.
	pub fn secure(mut self, enable: bool) -> Self {
		self.options.secure = enable;
		self
	}

	socket_flags!();

	/// Binds `addr` and starts listening. A Unix path is removed again on close.
	pub fn bind(self, addr: impl Into<PeerAddr>) -> IoResult<Listener> {
		let addr = addr.into();
		let socket = RawSocket::new(addr.family(), SockType::Stream)
			.map_err(|err| setup_failed("cannot create listening socket", err))?;
		if !addr.is_unix() {
			self.reuse.apply(&socket).map_err(|err| setup_failed("cannot set address reuse", err))?;
		}
		self.buffers.apply(&socket).map_err(|err| setup_failed("cannot size socket buffers", err))?;
		socket.bind(&addr).map_err(|err| setup_failed("cannot bind listening socket", err))?;
		socket.listen(self.backlog).map_err(|err| setup_failed("cannot listen", err))?;
		let keep = self.options.keep_on_close;
		let mut template = self.options;
		template.keep_on_close = false;
		Ok(Listener::from_parts(self.ctx, socket.into_fd(), self.backlog, keep, self.tcp, template))
	}
}

// ============================================================================
// Datagram Builder
// ============================================================================

/// Opens message-framed sockets (UDP or Unix datagram).
///
/// # Example
/// ```ignore
/// use wirelink::{Context, Config, SocketAddrV4, DatagramBuilder, BufferConfig};
///
/// let ctx = Context::new(Config::default());
/// let mut sock = DatagramBuilder::new(&ctx)
///     .buffers(BufferConfig::new().recv(1 << 20))
///     .bind(SocketAddrV4::any(5353))?;
/// ```
pub struct DatagramBuilder {
	ctx: Arc<Context>,
	reuse: ReuseConfig,
	buffers: BufferConfig,
	broadcast: bool,
	options: SocketOptions,
}

impl DatagramBuilder {
	pub fn new(ctx: &Arc<Context>) -> Self {
		Self {
			ctx: ctx.clone(),
			reuse: ReuseConfig::none(),
			buffers: BufferConfig::default(),
			broadcast: false,
			options: SocketOptions::default(),
		}
	}

	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	pub fn broadcast(mut self, enable: bool) -> Self {
		self.broadcast = enable;
		self
	}

	socket_flags!();

	/// Binds to `addr`. Port 0 picks an ephemeral port.
	pub fn bind(self, addr: impl Into<PeerAddr>) -> IoResult<Socket> {
		let addr = addr.into();
		let socket = RawSocket::new(addr.family(), SockType::Datagram)
			.map_err(|err| setup_failed("cannot create datagram socket", err))?;
		self.reuse.apply(&socket).map_err(|err| setup_failed("cannot set address reuse", err))?;
		self.buffers.apply(&socket).map_err(|err| setup_failed("cannot size socket buffers", err))?;
		socket.bind(&addr).map_err(|err| setup_failed("cannot bind datagram socket", err))?;
		let mut sock = Socket::assemble(self.ctx, socket.into_fd(), Kind::Datagram, None, &self.options);
		if self.broadcast {
			sock.set_broadcast(true)?;
		}
		if sock.logging() {
			tracing::debug!(sock = %sock.description(), addr = %addr, "datagram socket bound");
		}
		Ok(sock)
	}
}
