use std::os::fd::AsRawFd;

use crate::error::{SocketError, errno};

fn set_int<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	name: libc::c_int,
	val: libc::c_int,
	option: &'static str,
) -> Result<(), SocketError> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			level,
			name,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option })
	} else {
		Ok(())
	}
}

fn get_int<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	name: libc::c_int,
	option: &'static str,
) -> Result<libc::c_int, SocketError> {
	let mut val: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockopt(
			socket.as_raw_fd(),
			level,
			name,
			&mut val as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};
	if result == -1 {
		Err(SocketError::GetOption { errno: errno(), option })
	} else {
		Ok(val)
	}
}

/// Sets SO_REUSEADDR on a socket.
///
/// Allows binding to an address that's in TIME_WAIT state.
pub fn set_reuse_addr<S: AsRawFd>(socket: &S, enable: bool) -> Result<(), SocketError> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, enable.into(), "SO_REUSEADDR")
}

/// Sets SO_REUSEPORT on a socket.
///
/// Allows multiple sockets to bind the same port.
pub fn set_reuse_port<S: AsRawFd>(socket: &S, enable: bool) -> Result<(), SocketError> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_REUSEPORT, enable.into(), "SO_REUSEPORT")
}

/// Sets SO_BROADCAST, allowing datagrams to broadcast addresses.
pub fn set_broadcast<S: AsRawFd>(socket: &S, enable: bool) -> Result<(), SocketError> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_BROADCAST, enable.into(), "SO_BROADCAST")
}

/// Sets TCP_NODELAY on a socket.
///
/// Disables Nagle's algorithm, sending small segments immediately.
pub fn set_tcp_nodelay<S: AsRawFd>(socket: &S, enable: bool) -> Result<(), SocketError> {
	set_int(socket, libc::IPPROTO_TCP, libc::TCP_NODELAY, enable.into(), "TCP_NODELAY")
}

/// Sets receive buffer size (SO_RCVBUF).
///
/// The kernel typically doubles this value internally.
pub fn set_recv_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<(), SocketError> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_RCVBUF, size as libc::c_int, "SO_RCVBUF")
}

/// Sets send buffer size (SO_SNDBUF).
pub fn set_send_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<(), SocketError> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_SNDBUF, size as libc::c_int, "SO_SNDBUF")
}

/// Enables TCP keep-alive (SO_KEEPALIVE).
///
/// Tune timing with [`set_keepalive_idle`], [`set_keepalive_interval`]
/// and [`set_keepalive_count`].
pub fn set_keepalive<S: AsRawFd>(socket: &S, enable: bool) -> Result<(), SocketError> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_KEEPALIVE, enable.into(), "SO_KEEPALIVE")
}

/// Seconds of idle time before the first keep-alive probe (TCP_KEEPIDLE).
pub fn set_keepalive_idle<S: AsRawFd>(socket: &S, seconds: u32) -> Result<(), SocketError> {
	set_int(socket, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, seconds as libc::c_int, "TCP_KEEPIDLE")
}

/// Seconds between unanswered keep-alive probes (TCP_KEEPINTVL).
pub fn set_keepalive_interval<S: AsRawFd>(socket: &S, seconds: u32) -> Result<(), SocketError> {
	set_int(socket, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, seconds as libc::c_int, "TCP_KEEPINTVL")
}

/// Unanswered probes before the peer is considered dead (TCP_KEEPCNT).
///
/// Total detection time = KEEPIDLE + (KEEPINTVL × KEEPCNT).
pub fn set_keepalive_count<S: AsRawFd>(socket: &S, count: u32) -> Result<(), SocketError> {
	set_int(socket, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, count as libc::c_int, "TCP_KEEPCNT")
}

/// Sets socket linger behavior (SO_LINGER).
///
/// - `None`: close returns immediately, the kernel sends queued data in background
/// - `Some(0)`: hard reset (RST), unsent data is discarded
/// - `Some(n)`: close blocks up to n seconds waiting for data to send
pub fn set_linger<S: AsRawFd>(socket: &S, linger: Option<u32>) -> Result<(), SocketError> {
	let val = match linger {
		None => libc::linger { l_onoff: 0, l_linger: 0 },
		Some(seconds) => libc::linger {
			l_onoff: 1,
			l_linger: seconds.min(libc::c_int::MAX as u32) as libc::c_int,
		},
	};
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::SOL_SOCKET,
			libc::SO_LINGER,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::linger>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: "SO_LINGER" })
	} else {
		Ok(())
	}
}

/// Reads and clears the pending socket error (SO_ERROR).
///
/// Returns `None` when a non-blocking connect succeeded.
pub fn take_error<S: AsRawFd>(socket: &S) -> Result<Option<i32>, SocketError> {
	let error = get_int(socket, libc::SOL_SOCKET, libc::SO_ERROR, "SO_ERROR")?;
	Ok((error != 0).then_some(error))
}

/// Returns SO_TYPE (`SOCK_STREAM`, `SOCK_DGRAM`, ...).
pub fn sock_type<S: AsRawFd>(socket: &S) -> Result<libc::c_int, SocketError> {
	get_int(socket, libc::SOL_SOCKET, libc::SO_TYPE, "SO_TYPE")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::socket::raw::{RawSocket, SockType};

	#[test]
	fn fresh_socket_has_no_error() {
		let socket = RawSocket::new(libc::AF_INET, SockType::Stream).unwrap();
		assert_eq!(take_error(&socket).unwrap(), None);
		assert_eq!(sock_type(&socket).unwrap(), libc::SOCK_STREAM);
	}

	#[test]
	fn options_apply_to_datagrams() {
		let socket = RawSocket::new(libc::AF_INET, SockType::Datagram).unwrap();
		set_broadcast(&socket, true).unwrap();
		set_reuse_addr(&socket, true).unwrap();
		assert_eq!(sock_type(&socket).unwrap(), libc::SOCK_DGRAM);
		// TCP-level options are rejected on UDP sockets.
		assert!(set_tcp_nodelay(&socket, true).is_err());
	}
}
