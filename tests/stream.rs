mod common;

use std::time::{Duration, Instant};

use proptest::prelude::*;
use wirelink::{Direction, IoError, Kind, ListenerBuilder, ReadMode, Side, Status, UnixAddr, WriteMode};

use common::{WAIT, connector, context, pair};

#[test]
fn ping_pong() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	assert_eq!(client.kind(), Kind::Client);
	assert_eq!(server.kind(), Kind::Server);
	assert_eq!(client.side(), Some(Side::Client));

	client.write(b"PING\n", WriteMode::Persist).unwrap();
	let mut line = Vec::new();
	server.read_line(&mut line).unwrap();
	assert_eq!(line, b"PING");

	server.write(b"PONG\n", WriteMode::Persist).unwrap();
	let mut reply = [0u8; 5];
	assert_eq!(client.read(&mut reply, ReadMode::Persist).unwrap(), 5);
	assert_eq!(&reply, b"PONG\n");

	assert_eq!(client.counters().written, 5);
	assert_eq!(client.counters().read, 5);
	assert_eq!(server.counters().read, 5);
}

#[test]
fn exchange_then_close_both_ends() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	assert_eq!(client.write(b"PING", WriteMode::Persist).unwrap(), 4);
	let mut buf = [0u8; 16];
	let n = server.read(&mut buf, ReadMode::Plain).unwrap();
	assert_eq!(&buf[..n], b"PING");

	server.write(b"PONG", WriteMode::Plain).unwrap();
	let mut reply = [0u8; 4];
	assert_eq!(client.read(&mut reply, ReadMode::Persist).unwrap(), 4);
	assert_eq!(&reply, b"PONG");

	client.close().unwrap();
	server.close().unwrap();
	for sock in [&client, &server] {
		assert_eq!(sock.status(Direction::Read), Status::Closed);
		assert_eq!(sock.status(Direction::Write), Status::Closed);
		assert!(sock.is_closed());
	}
}

#[test]
fn peek_leaves_data_for_the_next_read() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	client.write(b"abc", WriteMode::Persist).unwrap();

	let mut buf = [0u8; 8];
	let n = server.read(&mut buf, ReadMode::Peek).unwrap();
	assert_eq!(&buf[..n], b"abc");
	assert_eq!(server.pending_input(), 3);
	assert_eq!(server.counters().read, 0);

	let n = server.read(&mut buf, ReadMode::Plain).unwrap();
	assert_eq!(&buf[..n], b"abc");
	assert_eq!(server.pending_input(), 0);
}

#[test]
fn pushed_back_bytes_come_first() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	client.write(b"!", WriteMode::Persist).unwrap();

	server.push_back(b"world").unwrap();
	server.push_back(b"hello ").unwrap();
	let mut buf = [0u8; 12];
	assert_eq!(server.read(&mut buf, ReadMode::Persist).unwrap(), 12);
	assert_eq!(&buf, b"hello world!");
}

#[test]
fn end_of_stream_is_sticky() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	client.write(b"bye", WriteMode::Persist).unwrap();
	client.close().unwrap();

	let mut buf = [0u8; 16];
	assert_eq!(server.read(&mut buf, ReadMode::Persist).unwrap(), 3);
	assert_eq!(server.read(&mut buf, ReadMode::Plain), Err(IoError::Closed));
	assert_eq!(server.read(&mut buf, ReadMode::Plain), Err(IoError::Closed));
	assert!(server.is_eof());
	assert_eq!(server.status(Direction::Read), Status::Closed);
	assert_eq!(server.wait(wirelink::Event::Read, WAIT), Err(IoError::Closed));
}

#[test]
fn lines_split_on_newline_and_drop_carriage_return() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	client.write(b"one\r\ntwo\nthree", WriteMode::Persist).unwrap();
	client.close().unwrap();

	let mut lines = Vec::new();
	loop {
		let mut line = Vec::new();
		match server.read_line(&mut line) {
			Ok(_) => lines.push(String::from_utf8(line).unwrap()),
			Err(err) => {
				assert_eq!(err, IoError::Closed);
				break;
			}
		}
	}
	assert_eq!(lines, ["one", "two", "three"]);
}

#[test]
fn line_timeout_keeps_partial_input() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	server.set_timeout(Direction::Read, Some(Duration::from_millis(50)));

	client.write(b"hal", WriteMode::Persist).unwrap();
	let mut line = Vec::new();
	assert_eq!(server.read_line(&mut line), Err(IoError::Timeout));
	assert!(line.is_empty());
	assert_eq!(server.status(Direction::Read), Status::Timeout);

	client.write(b"f\n", WriteMode::Persist).unwrap();
	server.set_timeout(Direction::Read, WAIT);
	server.read_line(&mut line).unwrap();
	assert_eq!(line, b"half");
}

#[test]
fn read_times_out_without_closing() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	server.set_timeout(Direction::Read, Some(Duration::from_millis(30)));

	let started = Instant::now();
	let mut buf = [0u8; 4];
	assert_eq!(server.read(&mut buf, ReadMode::Plain), Err(IoError::Timeout));
	assert!(started.elapsed() >= Duration::from_millis(30));

	client.write(b"late", WriteMode::Persist).unwrap();
	server.set_timeout(Direction::Read, WAIT);
	assert_eq!(server.read(&mut buf, ReadMode::Persist).unwrap(), 4);
}

#[test]
fn zero_length_transfers_are_no_ops() {
	let ctx = context();
	let (mut client, mut server) = pair(&ctx);
	assert_eq!(client.write(b"", WriteMode::Plain).unwrap(), 0);
	assert_eq!(server.read(&mut [], ReadMode::Plain).unwrap(), 0);
}

#[test]
fn initial_data_is_sent_on_connect() {
	let ctx = context();
	let mut listener = common::listener(&ctx);
	let _client = connector(&ctx)
		.initial_data(b"HELLO\n")
		.connect(wirelink::SocketAddrV4::localhost(common::port_of(&listener)))
		.unwrap();
	let mut server = listener.accept(WAIT).unwrap();
	let mut line = Vec::new();
	server.read_line(&mut line).unwrap();
	assert_eq!(line, b"HELLO");
}

#[test]
fn zero_timeout_connect_resolves_on_first_write() {
	let ctx = context();
	let mut listener = common::listener(&ctx);
	let mut client = connector(&ctx)
		.timeout(Some(Duration::ZERO))
		.connect(wirelink::SocketAddrV4::localhost(common::port_of(&listener)))
		.unwrap();
	client.write(b"x", WriteMode::Persist).unwrap();
	assert!(!client.is_pending());
	assert!(client.is_connected());

	let mut server = listener.accept(WAIT).unwrap();
	let mut buf = [0u8; 1];
	assert_eq!(server.read(&mut buf, ReadMode::Plain).unwrap(), 1);
}

#[test]
fn unix_stream_round_trip() {
	use std::os::unix::ffi::OsStrExt;

	let ctx = context();
	let path = std::env::temp_dir().join(format!("wirelink-stream-{}.sock", std::process::id()));
	let _ = std::fs::remove_file(&path);
	let addr = UnixAddr::new(path.as_os_str().as_bytes());

	let mut listener = ListenerBuilder::new(&ctx).bind(addr.clone()).unwrap();
	let mut client = connector(&ctx).connect(addr).unwrap();
	let mut server = listener.accept(WAIT).unwrap();

	client.write(b"local", WriteMode::Persist).unwrap();
	let mut buf = [0u8; 5];
	assert_eq!(server.read(&mut buf, ReadMode::Persist).unwrap(), 5);
	assert_eq!(&buf, b"local");

	listener.close().unwrap();
	assert!(!path.exists());
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(16))]

	#[test]
	fn stream_preserves_bytes(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..2048), 1..8)) {
		let ctx = context();
		let (mut client, mut server) = pair(&ctx);
		let expected: Vec<u8> = chunks.concat();
		for chunk in &chunks {
			prop_assert_eq!(client.write(chunk, WriteMode::Persist).unwrap(), chunk.len());
		}
		let mut got = vec![0u8; expected.len()];
		prop_assert_eq!(server.read(&mut got, ReadMode::Persist).unwrap(), expected.len());
		prop_assert_eq!(got, expected);
	}
}

fn send_then_receive(sock: &mut wirelink::Socket, fill: u8, size: usize) -> Vec<u8> {
	assert_eq!(sock.write(&vec![fill; size], WriteMode::Persist).unwrap(), size);
	let mut buf = vec![0u8; size];
	assert_eq!(sock.read(&mut buf, ReadMode::Persist).unwrap(), size);
	buf
}

#[test]
fn simultaneous_bulk_writes_drain_each_other() {
	// Far more than both kernel buffers hold, so each writer depends on the other end draining.
	const SIZE: usize = 4 << 20;
	let ctx = context();
	let mut listener = ListenerBuilder::new(&ctx)
		.read_timeout(WAIT)
		.write_timeout(WAIT)
		.read_on_write(true)
		.bind(wirelink::SocketAddrV4::localhost(0))
		.unwrap();
	let port = common::port_of(&listener);

	let client_ctx = ctx.clone();
	let client = std::thread::spawn(move || {
		let mut sock = connector(&client_ctx)
			.read_on_write(true)
			.connect(wirelink::SocketAddrV4::localhost(port))
			.unwrap();
		send_then_receive(&mut sock, 1, SIZE)
	});
	let mut server = listener.accept(WAIT).unwrap();
	let from_client = send_then_receive(&mut server, 2, SIZE);
	let from_server = client.join().unwrap();

	assert!(from_client.iter().all(|&b| b == 1));
	assert!(from_server.iter().all(|&b| b == 2));
	assert_eq!(server.counters().written, SIZE as u64);
}

#[test]
fn urgent_byte_goes_out_at_once() {
	let ctx = context();
	let (mut c, _s) = pair(&ctx);
	assert_eq!(c.write(b"!", WriteMode::OutOfBand), Ok(1));
	assert_eq!(c.write(b"", WriteMode::OutOfBand), Ok(0));
	assert_eq!(c.status(Direction::Write), Status::Success);
	assert_eq!(c.counters().written, 1);
}
