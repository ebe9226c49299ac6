use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::addr::{PeerAddr, ToSockAddr};
use crate::error::{IoError, IoResult, SocketError, errno};
use crate::poll::Event;
use crate::secure::RawTransport;

/// Transport type passed to `socket()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SockType {
	Stream,
	Datagram,
}

impl SockType {
	#[inline]
	pub(crate) fn raw(self) -> libc::c_int {
		match self {
			SockType::Stream => libc::SOCK_STREAM,
			SockType::Datagram => libc::SOCK_DGRAM,
		}
	}
}

/// A freshly created, non-blocking socket that is not yet bound or connected.
pub(crate) struct RawSocket {
	fd: OwnedFd,
}

impl RawSocket {
	/// Calls `socket()` with `SOCK_NONBLOCK | SOCK_CLOEXEC`.
	pub(crate) fn new(family: libc::c_int, ty: SockType) -> Result<Self, SocketError> {
		let fd = unsafe {
			libc::socket(family, ty.raw() | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0)
		};
		if fd == -1 {
			return Err(SocketError::Create { errno: errno() });
		}
		Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
	}

	pub(crate) fn bind(&self, addr: &PeerAddr) -> Result<(), SocketError> {
		let result = addr.with_raw(|ptr, len| unsafe {
			libc::bind(self.fd.as_raw_fd(), ptr, len)
		});
		match result {
			Some(-1) => Err(SocketError::Bind { errno: errno(), addr: addr.to_string() }),
			Some(_) => Ok(()),
			None => Err(SocketError::InvalidAddress { reason: "address too long" }),
		}
	}

	pub(crate) fn listen(&self, backlog: i32) -> Result<(), SocketError> {
		if unsafe { libc::listen(self.fd.as_raw_fd(), backlog) } == -1 {
			return Err(SocketError::Listen { errno: errno(), backlog });
		}
		Ok(())
	}

	pub(crate) fn into_fd(self) -> OwnedFd {
		self.fd
	}
}

impl AsRawFd for RawSocket {
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}
}

/// Outcome of a non-blocking `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectState {
	Connected,
	InProgress,
}

pub(crate) fn connect(fd: RawFd, addr: &PeerAddr) -> Result<ConnectState, SocketError> {
	let result = addr.with_raw(|ptr, len| unsafe { libc::connect(fd, ptr, len) });
	match result {
		Some(0) => Ok(ConnectState::Connected),
		Some(_) => match errno() {
			libc::EINPROGRESS | libc::EAGAIN => Ok(ConnectState::InProgress),
			e => Err(SocketError::Connect { errno: e, addr: addr.to_string() }),
		},
		None => Err(SocketError::InvalidAddress { reason: "address too long" }),
	}
}

/// Dissolves a datagram socket's default peer.
pub(crate) fn disconnect(fd: RawFd) -> Result<(), SocketError> {
	let mut unspec: libc::sockaddr = unsafe { std::mem::zeroed() };
	unspec.sa_family = libc::AF_UNSPEC as libc::sa_family_t;
	let len = std::mem::size_of::<libc::sockaddr>() as libc::socklen_t;
	if unsafe { libc::connect(fd, &unspec, len) } == -1 {
		return Err(SocketError::Connect { errno: errno(), addr: "unspecified".into() });
	}
	Ok(())
}

pub(crate) fn accept(fd: RawFd) -> Result<(OwnedFd, Option<PeerAddr>), SocketError> {
	let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
	let client = unsafe {
		libc::accept4(
			fd,
			&mut storage as *mut _ as *mut libc::sockaddr,
			&mut len,
			libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
		)
	};
	if client == -1 {
		return Err(SocketError::Accept { errno: errno() });
	}
	let client = unsafe { OwnedFd::from_raw_fd(client) };
	Ok((client, PeerAddr::from_storage(&storage, len)))
}

pub(crate) fn recv(fd: RawFd, buf: &mut [u8], flags: libc::c_int) -> Result<usize, SocketError> {
	let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags) };
	if n == -1 {
		return Err(SocketError::Read { errno: errno() });
	}
	Ok(n as usize)
}

/// Sends with `MSG_NOSIGNAL`, so a closed peer yields `EPIPE` instead of a signal.
pub(crate) fn send(fd: RawFd, data: &[u8], flags: libc::c_int) -> Result<usize, SocketError> {
	let n = unsafe {
		libc::send(
			fd,
			data.as_ptr() as *const libc::c_void,
			data.len(),
			flags | libc::MSG_NOSIGNAL,
		)
	};
	if n == -1 {
		return Err(SocketError::Write { errno: errno() });
	}
	Ok(n as usize)
}

pub(crate) fn send_to(fd: RawFd, data: &[u8], addr: &PeerAddr) -> Result<usize, SocketError> {
	let result = addr.with_raw(|ptr, len| unsafe {
		libc::sendto(
			fd,
			data.as_ptr() as *const libc::c_void,
			data.len(),
			libc::MSG_NOSIGNAL,
			ptr,
			len,
		)
	});
	match result {
		Some(-1) => Err(SocketError::Write { errno: errno() }),
		Some(n) => Ok(n as usize),
		None => Err(SocketError::InvalidAddress { reason: "address too long" }),
	}
}

pub(crate) fn recv_from(fd: RawFd, buf: &mut [u8]) -> Result<(usize, Option<PeerAddr>), SocketError> {
	let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
	let n = unsafe {
		libc::recvfrom(
			fd,
			buf.as_mut_ptr() as *mut libc::c_void,
			buf.len(),
			0,
			&mut storage as *mut _ as *mut libc::sockaddr,
			&mut len,
		)
	};
	if n == -1 {
		return Err(SocketError::Read { errno: errno() });
	}
	Ok((n as usize, PeerAddr::from_storage(&storage, len)))
}

pub(crate) fn shutdown(fd: RawFd, how: libc::c_int) -> Result<(), SocketError> {
	if unsafe { libc::shutdown(fd, how) } == -1 {
		let name = match how {
			libc::SHUT_RD => "read",
			libc::SHUT_WR => "write",
			_ => "read-write",
		};
		return Err(SocketError::Shutdown { errno: errno(), how: name });
	}
	Ok(())
}

pub(crate) fn peer_name(fd: RawFd) -> Result<Option<PeerAddr>, SocketError> {
	let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
	let rc = unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
	if rc == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "getpeername" });
	}
	Ok(PeerAddr::from_storage(&storage, len))
}

pub(crate) fn local_name(fd: RawFd) -> Result<Option<PeerAddr>, SocketError> {
	let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
	let rc = unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
	if rc == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "getsockname" });
	}
	Ok(PeerAddr::from_storage(&storage, len))
}

pub(crate) fn set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<(), SocketError> {
	let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
	if flags == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "F_GETFL" });
	}
	let new_flags = if nonblocking {
		flags | libc::O_NONBLOCK
	} else {
		flags & !libc::O_NONBLOCK
	};
	if unsafe { libc::fcntl(fd, libc::F_SETFL, new_flags) } == -1 {
		return Err(SocketError::SetOption { errno: errno(), option: "O_NONBLOCK" });
	}
	Ok(())
}

/// Releases an OS handle without closing it.
pub(crate) fn leak(fd: OwnedFd) -> RawFd {
	fd.into_raw_fd()
}

/// [`RawTransport`] over a non-blocking descriptor.
///
/// Remembers which direction last would have blocked, so the engine can
/// wait for the readiness the session actually needs.
pub(crate) struct FdTransport {
	fd: RawFd,
	pub(crate) blocked: Option<Event>,
}

impl FdTransport {
	pub(crate) fn new(fd: RawFd) -> Self {
		Self { fd, blocked: None }
	}
}

impl RawTransport for FdTransport {
	fn pull(&mut self, buf: &mut [u8]) -> IoResult<usize> {
		match recv(self.fd, buf, 0) {
			Ok(n) => Ok(n),
			Err(err) if err.errno() == libc::EAGAIN => {
				self.blocked = Some(Event::Read);
				Err(IoError::Timeout)
			}
			Err(err) => {
				tracing::warn!(fd = self.fd, error = %err, "secure transport pull failed");
				Err(err.classify())
			}
		}
	}

	fn push(&mut self, data: &[u8]) -> IoResult<usize> {
		match send(self.fd, data, 0) {
			Ok(n) => Ok(n),
			Err(err) if err.errno() == libc::EAGAIN => {
				self.blocked = Some(Event::Write);
				Err(IoError::Timeout)
			}
			Err(err) => {
				tracing::warn!(fd = self.fd, error = %err, "secure transport push failed");
				Err(err.classify())
			}
		}
	}
}
