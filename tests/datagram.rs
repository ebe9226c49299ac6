mod common;

use std::sync::Arc;
use std::time::Duration;

use wirelink::{Context, DatagramBuilder, IoError, Kind, PeerAddr, ReadMode, Shutdown, Socket, SocketAddrV4, WriteMode};

use common::{WAIT, context};

fn bound(ctx: &Arc<Context>) -> (Socket, PeerAddr) {
	let sock = DatagramBuilder::new(ctx).read_timeout(WAIT).write_timeout(WAIT).bind(SocketAddrV4::localhost(0)).unwrap();
	let addr = sock.local_addr().unwrap();
	(sock, addr)
}

#[test]
fn messages_keep_their_boundaries() {
	let ctx = context();
	let (mut a, a_addr) = bound(&ctx);
	let (mut b, b_addr) = bound(&ctx);
	assert_eq!(a.kind(), Kind::Datagram);

	a.send_msg(Some(&b_addr), &[1u8; 10]).unwrap();
	a.send_msg(Some(&b_addr), &[2u8; 20]).unwrap();

	let mut buf = [0u8; 64];
	let first = b.recv_msg(&mut buf).unwrap();
	assert_eq!((first.len, first.msg_len), (10, 10));
	assert_eq!(first.from.as_ref(), Some(&a_addr));
	assert!(buf[..10].iter().all(|&x| x == 1));

	let second = b.recv_msg(&mut buf).unwrap();
	assert_eq!((second.len, second.msg_len), (20, 20));
	assert!(buf[..20].iter().all(|&x| x == 2));

	assert_eq!(a.counters().messages_out, 2);
	assert_eq!(b.counters().messages_in, 2);
}

#[test]
fn oversized_message_remainder_is_readable() {
	let ctx = context();
	let (mut a, _) = bound(&ctx);
	let (mut b, b_addr) = bound(&ctx);
	let payload: Vec<u8> = (0..20).collect();
	a.send_msg(Some(&b_addr), &payload).unwrap();

	let mut head = [0u8; 8];
	let msg = b.recv_msg(&mut head).unwrap();
	assert_eq!((msg.len, msg.msg_len), (8, 20));
	assert_eq!(&head, &payload[..8]);

	let mut rest = [0u8; 32];
	let n = b.read(&mut rest, ReadMode::Plain).unwrap();
	assert_eq!(&rest[..n], &payload[8..]);
	assert_eq!(b.read(&mut rest, ReadMode::Plain), Err(IoError::Closed));
}

#[test]
fn written_bytes_lead_the_next_message() {
	let ctx = context();
	let (mut a, _) = bound(&ctx);
	let (mut b, b_addr) = bound(&ctx);

	assert_eq!(a.write(b"head", WriteMode::Plain).unwrap(), 4);
	assert_eq!(a.pending_output(), 4);
	a.send_msg(Some(&b_addr), b"tail").unwrap();
	assert_eq!(a.pending_output(), 0);

	let mut buf = [0u8; 16];
	let msg = b.recv_msg(&mut buf).unwrap();
	assert_eq!(&buf[..msg.len], b"headtail");
}

#[test]
fn wipe_discards_partial_messages() {
	let ctx = context();
	let (mut a, _) = bound(&ctx);
	let (mut b, b_addr) = bound(&ctx);

	a.write(b"junk", WriteMode::Plain).unwrap();
	a.wipe_msg(Shutdown::Write).unwrap();
	a.send_msg(Some(&b_addr), b"ok-message").unwrap();

	let mut buf = [0u8; 2];
	let msg = b.recv_msg(&mut buf).unwrap();
	assert_eq!(&buf, b"ok");
	assert_eq!(msg.msg_len, 10);
	assert_eq!(b.pending_input(), 8);

	b.wipe_msg(Shutdown::Read).unwrap();
	assert_eq!(b.pending_input(), 0);
	assert_eq!(b.read(&mut buf, ReadMode::Plain), Err(IoError::Closed));
}

#[test]
fn default_peer_is_used_without_explicit_address() {
	let ctx = context();
	let (mut a, _) = bound(&ctx);
	let (mut b, b_addr) = bound(&ctx);

	a.connect_peer(Some(&b_addr)).unwrap();
	assert_eq!(a.peer_addr(), Some(&b_addr));
	a.send_msg(None, b"hi").unwrap();

	let mut buf = [0u8; 4];
	assert_eq!(b.recv_msg(&mut buf).unwrap().len, 2);

	a.connect_peer(None).unwrap();
	assert!(a.peer_addr().is_none());
}

#[test]
fn receive_times_out() {
	let ctx = context();
	let (mut b, _) = bound(&ctx);
	b.set_timeout(wirelink::Direction::Read, Some(Duration::from_millis(20)));
	let mut buf = [0u8; 4];
	assert_eq!(b.recv_msg(&mut buf).err(), Some(IoError::Timeout));
}

#[test]
fn stream_only_operations_are_rejected() {
	let ctx = context();
	let (mut a, _) = bound(&ctx);
	assert_eq!(a.shutdown(Shutdown::Write), Err(IoError::InvalidArgument));
	assert_eq!(a.reconnect(None, WAIT), Err(IoError::InvalidArgument));
	assert_eq!(a.write(b"x", WriteMode::OutOfBand), Err(IoError::NotSupported));

	let (mut client, _server) = common::pair(&ctx);
	let mut buf = [0u8; 4];
	assert_eq!(client.recv_msg(&mut buf).err(), Some(IoError::InvalidArgument));
	assert_eq!(client.send_msg(None, b"x"), Err(IoError::InvalidArgument));
}

#[test]
fn closed_datagram_socket_reports_closed() {
	let ctx = context();
	let (mut a, _) = bound(&ctx);
	a.close().unwrap();
	assert_eq!(a.shutdown(Shutdown::ReadWrite), Err(IoError::Closed));
	assert_eq!(a.send_msg(None, b"x"), Err(IoError::Closed));
}
