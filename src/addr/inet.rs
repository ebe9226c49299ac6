use std::net::{Ipv4Addr, Ipv6Addr};

use crate::addr::ToSockAddr;

/// IPv4 endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV4(std::net::SocketAddrV4);

impl SocketAddrV4 {
	pub fn new(ip: [u8; 4], port: u16) -> Self {
		Self(std::net::SocketAddrV4::new(Ipv4Addr::from(ip), port))
	}

	/// `127.0.0.1:port`
	pub fn localhost(port: u16) -> Self {
		Self(std::net::SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
	}

	/// `0.0.0.0:port`, for binding on every interface.
	pub fn any(port: u16) -> Self {
		Self(std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
	}

	/// `255.255.255.255:port`; sending there needs the broadcast option.
	pub fn broadcast(port: u16) -> Self {
		Self(std::net::SocketAddrV4::new(Ipv4Addr::BROADCAST, port))
	}

	pub fn ip(&self) -> [u8; 4] {
		self.0.ip().octets()
	}

	pub fn port(&self) -> u16 {
		self.0.port()
	}

	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port().to_be(),
			// Octets are already in network order.
			sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(self.ip()) },
			sin_zero: [0; 8],
		}
	}

	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self::new(raw.sin_addr.s_addr.to_ne_bytes(), u16::from_be(raw.sin_port))
	}
}

/// IPv6 endpoint. The scope id selects the interface for link-local peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV6(std::net::SocketAddrV6);

impl SocketAddrV6 {
	pub fn new(ip: [u8; 16], port: u16) -> Self {
		Self::with_scope(ip, port, 0)
	}

	pub fn with_scope(ip: [u8; 16], port: u16, scope_id: u32) -> Self {
		Self(std::net::SocketAddrV6::new(Ipv6Addr::from(ip), port, 0, scope_id))
	}

	/// `[::1]:port`
	pub fn localhost(port: u16) -> Self {
		Self(std::net::SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0))
	}

	pub fn ip(&self) -> [u8; 16] {
		self.0.ip().octets()
	}

	pub fn port(&self) -> u16 {
		self.0.port()
	}

	pub fn scope_id(&self) -> u32 {
		self.0.scope_id()
	}

	pub(crate) fn to_raw(&self) -> libc::sockaddr_in6 {
		libc::sockaddr_in6 {
			sin6_family: libc::AF_INET6 as libc::sa_family_t,
			sin6_port: self.port().to_be(),
			sin6_flowinfo: 0,
			sin6_addr: libc::in6_addr { s6_addr: self.ip() },
			sin6_scope_id: self.scope_id(),
		}
	}

	pub(crate) fn from_raw(raw: &libc::sockaddr_in6) -> Self {
		Self::with_scope(raw.sin6_addr.s6_addr, u16::from_be(raw.sin6_port), raw.sin6_scope_id)
	}
}

/// Hands `f` a pointer to `raw`; the pointer dies with this frame.
fn lend<T, F, R>(raw: &T, f: F) -> R
where
	F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
{
	f(raw as *const T as *const libc::sockaddr, std::mem::size_of::<T>() as libc::socklen_t)
}

impl ToSockAddr for SocketAddrV4 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		Some(lend(&self.to_raw(), f))
	}
}

impl ToSockAddr for SocketAddrV6 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		Some(lend(&self.to_raw(), f))
	}
}

impl From<std::net::SocketAddrV4> for SocketAddrV4 {
	fn from(addr: std::net::SocketAddrV4) -> Self {
		Self(addr)
	}
}

impl From<SocketAddrV4> for std::net::SocketAddrV4 {
	fn from(addr: SocketAddrV4) -> Self {
		addr.0
	}
}

impl From<std::net::SocketAddrV6> for SocketAddrV6 {
	fn from(addr: std::net::SocketAddrV6) -> Self {
		// Flow labels are not carried.
		Self(std::net::SocketAddrV6::new(*addr.ip(), addr.port(), 0, addr.scope_id()))
	}
}

impl From<SocketAddrV6> for std::net::SocketAddrV6 {
	fn from(addr: SocketAddrV6) -> Self {
		addr.0
	}
}

impl std::fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl std::fmt::Display for SocketAddrV6 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn raw_v4_keeps_network_order() {
		let addr = SocketAddrV4::new([192, 168, 7, 1], 8080);
		let raw = addr.to_raw();
		assert_eq!(raw.sin_port, 8080u16.to_be());
		assert_eq!(raw.sin_addr.s_addr.to_ne_bytes(), [192, 168, 7, 1]);
		assert_eq!(SocketAddrV4::from_raw(&raw), addr);
	}

	#[test]
	fn raw_v6_keeps_scope() {
		let mut ip = [0u8; 16];
		ip[0] = 0xfe;
		ip[1] = 0x80;
		ip[15] = 9;
		let addr = SocketAddrV6::with_scope(ip, 53, 3);
		assert_eq!(SocketAddrV6::from_raw(&addr.to_raw()), addr);
		assert_eq!(addr.to_string(), "[fe80::9%3]:53");
	}
}
