mod common;

use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use wirelink::{
	AcceptOptions, Direction, IoError, IoResult, Kind, RawTransport, ReadMode, SecureBackend, SecureSession,
	SessionContext, Shutdown, Socket, SocketAddrV4, SocketOptions, Status, Timeouts, WriteMode,
};

use common::{WAIT, connector, context, pair, port_of};

#[test]
fn close_is_idempotent_and_final() {
	let ctx = context();
	let (mut c, _s) = pair(&ctx);
	c.close().unwrap();
	c.close().unwrap();
	c.abort().unwrap();
	assert!(c.is_closed());

	let mut buf = [0u8; 4];
	assert_eq!(c.read(&mut buf, ReadMode::Plain), Err(IoError::Closed));
	assert_eq!(c.write(b"x", WriteMode::Plain), Err(IoError::Closed));
	assert_eq!(c.push_back(b"x"), Err(IoError::Closed));
	assert_eq!(c.shutdown(Shutdown::Read), Err(IoError::Closed));
	assert_eq!(c.status(Direction::Open), Status::Closed);
	assert!(c.local_addr().is_none());
}

#[test]
fn refused_connect_reads_as_closed() {
	let ctx = context();
	let port = port_of(&common::listener(&ctx));
	let result = connector(&ctx).connect(SocketAddrV4::localhost(port));
	assert_eq!(result.err(), Some(IoError::Closed));
}

#[test]
fn reconnect_starts_a_fresh_connection() {
	let ctx = context();
	let mut listener = common::listener(&ctx);
	let mut c = connector(&ctx).connect(SocketAddrV4::localhost(port_of(&listener))).unwrap();
	let _first = listener.accept(WAIT).unwrap();
	let first_id = c.id();
	c.write(b"first", WriteMode::Persist).unwrap();

	c.reconnect(None, WAIT).unwrap();
	assert_ne!(c.id(), first_id);
	assert_eq!(c.counters().written, 0);
	assert_eq!(c.counters().total_written, 5);
	assert!(c.is_connected());

	let mut second = listener.accept(WAIT).unwrap();
	c.write(b"again", WriteMode::Persist).unwrap();
	let mut buf = [0u8; 5];
	assert_eq!(second.read(&mut buf, ReadMode::Persist).unwrap(), 5);
	assert_eq!(&buf, b"again");
	assert_eq!(listener.accepted(), 2);
}

#[test]
fn server_socket_reconnecting_to_a_new_peer_becomes_a_client() {
	let ctx = context();
	let (_c, mut s) = pair(&ctx);
	let mut other = common::listener(&ctx);
	let target = SocketAddrV4::localhost(port_of(&other));
	s.reconnect(Some(target.into()), WAIT).unwrap();
	assert_eq!(s.kind(), Kind::Client);
	other.accept(WAIT).unwrap();
}

#[test]
fn abort_handle_unblocks_a_reader() {
	let ctx = context();
	let (mut c, _s) = pair(&ctx);
	let handle = c.abort_handle();
	let aborter = std::thread::spawn(move || {
		std::thread::sleep(Duration::from_millis(20));
		handle.abort();
	});

	let mut buf = [0u8; 4];
	assert_eq!(c.read(&mut buf, ReadMode::Plain), Err(IoError::Closed));
	aborter.join().unwrap();
	assert_eq!(c.write(b"x", WriteMode::Plain), Err(IoError::Closed));
	assert!(c.is_closed());
}

#[test]
fn write_shutdown_leaves_reading_open() {
	let ctx = context();
	let (mut c, mut s) = pair(&ctx);
	c.write(b"last", WriteMode::Persist).unwrap();
	c.shutdown(Shutdown::Write).unwrap();
	assert_eq!(c.status(Direction::Write), Status::Closed);
	assert_eq!(c.write(b"more", WriteMode::Plain), Err(IoError::Closed));

	let mut buf = [0u8; 8];
	assert_eq!(s.read(&mut buf, ReadMode::Persist).unwrap(), 4);
	assert!(s.is_eof());

	s.write(b"reply", WriteMode::Persist).unwrap();
	assert_eq!(c.read(&mut buf, ReadMode::Plain).unwrap(), 5);
	assert_eq!(&buf[..5], b"reply");
}

#[test]
fn accept_times_out_and_honours_overrides() {
	let ctx = context();
	let mut listener = common::listener(&ctx);
	assert_eq!(listener.accept(Some(Duration::from_millis(20))).err(), Some(IoError::Timeout));

	let _c = connector(&ctx).connect(SocketAddrV4::localhost(port_of(&listener))).unwrap();
	let s = listener.accept_with(WAIT, AcceptOptions::new().log(false).keepalive(true)).unwrap();
	assert_eq!(s.kind(), Kind::Server);
	assert!(s.is_connected());
	assert_eq!(s.timeout(Direction::Read), WAIT);
	assert_eq!(listener.accepted(), 1);

	listener.close().unwrap();
	assert!(listener.is_closed());
	assert_eq!(listener.accept(Some(Duration::ZERO)).err(), Some(IoError::Closed));
}

#[test]
fn timeouts_per_direction() {
	let ctx = context();
	let (mut c, _s) = pair(&ctx);
	c.set_timeout(Direction::Read, Some(Duration::from_secs(1)));
	c.set_timeout(Direction::Write, Some(Duration::from_secs(3)));
	assert_eq!(c.timeout(Direction::ReadWrite), Some(Duration::from_secs(1)));
	c.set_timeout(Direction::ReadWrite, None);
	assert_eq!(c.timeout(Direction::Read), None);
	assert_eq!(c.timeout(Direction::Write), None);
}

#[test]
fn wraps_an_existing_connection() {
	let ctx = context();
	let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	let std_client = std::net::TcpStream::connect(std_listener.local_addr().unwrap()).unwrap();
	let (mut std_server, _) = std_listener.accept().unwrap();

	let options = SocketOptions {
		timeouts: Timeouts { read: WAIT, write: WAIT, ..Timeouts::default() },
		..SocketOptions::default()
	};
	let mut sock = Socket::on_top(&ctx, OwnedFd::from(std_client), None, &options).unwrap();
	assert!(sock.is_connected());
	assert!(sock.peer_addr().is_some());

	sock.write(b"wrapped", WriteMode::Persist).unwrap();
	let mut buf = [0u8; 7];
	std_server.read_exact(&mut buf).unwrap();
	assert_eq!(&buf, b"wrapped");

	std_server.write_all(b"back").unwrap();
	let mut back = [0u8; 4];
	assert_eq!(sock.read(&mut back, ReadMode::Persist).unwrap(), 4);
	assert_eq!(&back, b"back");
}

#[test]
fn wraps_an_unconnected_datagram_handle() {
	let ctx = context();
	let udp = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
	let sock = Socket::on_top(&ctx, OwnedFd::from(udp), None, &SocketOptions::default()).unwrap();
	assert_eq!(sock.kind(), Kind::Datagram);
	assert!(sock.peer_addr().is_none());
}

/// A session whose handshake never completes.
struct Stalled;

impl SecureSession for Stalled {
	fn open(&mut self, _io: &mut dyn RawTransport) -> IoResult<()> {
		Err(IoError::Timeout)
	}

	fn read(&mut self, _io: &mut dyn RawTransport, _buf: &mut [u8]) -> IoResult<usize> {
		Err(IoError::Timeout)
	}

	fn write(&mut self, _io: &mut dyn RawTransport, _data: &[u8]) -> IoResult<usize> {
		Err(IoError::Timeout)
	}

	fn close(&mut self, _io: &mut dyn RawTransport, _how: Shutdown) -> IoResult<()> {
		Ok(())
	}
}

struct StalledBackend;

impl SecureBackend for StalledBackend {
	fn create(&self, _ctx: &SessionContext<'_>) -> IoResult<Box<dyn SecureSession>> {
		Ok(Box::new(Stalled))
	}
}

#[test]
fn dropping_mid_handshake_does_not_wait_for_it() {
	let ctx = context();
	ctx.install_secure(Arc::new(StalledBackend)).unwrap();
	let listener = common::listener(&ctx);
	let sock = connector(&ctx)
		.secure(true)
		.timeout(Some(Duration::ZERO))
		.connect(SocketAddrV4::localhost(port_of(&listener)))
		.unwrap();
	assert!(sock.is_pending());

	let (done, finished) = mpsc::channel();
	std::thread::spawn(move || {
		drop(sock);
		done.send(()).unwrap();
	});
	finished.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn closing_mid_handshake_tears_down_at_once() {
	let ctx = context();
	ctx.install_secure(Arc::new(StalledBackend)).unwrap();
	let listener = common::listener(&ctx);
	let mut sock = connector(&ctx)
		.secure(true)
		.timeout(Some(Duration::ZERO))
		.close_timeout(None)
		.connect(SocketAddrV4::localhost(port_of(&listener)))
		.unwrap();

	let (done, finished) = mpsc::channel();
	std::thread::spawn(move || {
		sock.close().unwrap();
		done.send((sock.is_closed(), sock.is_pending(), sock.is_secure())).unwrap();
	});
	let (closed, pending, secure) = finished.recv_timeout(Duration::from_secs(5)).unwrap();
	assert!(closed && !pending && !secure);
}
