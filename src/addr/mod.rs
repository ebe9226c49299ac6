//! Address families and related types.
//!
//! Three families are supported:
//! - `SocketAddrV4`: IPv4 endpoints
//! - `SocketAddrV6`: IPv6 endpoints
//! - `UnixAddr`: Unix domain paths, including abstract names
//!
//! The engine carries peers as a [`PeerAddr`], one variant per family.

mod inet;
mod unix;
pub use self::inet::{SocketAddrV4, SocketAddrV6};
pub use self::unix::UnixAddr;

use crate::error::{IoError, IoResult};

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub trait ToSockAddr {
	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	/// Returns None if the address is invalid (e.g., path too long for Unix).
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}
/*
The closure pattern exists because sockaddr_in, sockaddr_in6 and sockaddr_un
have different sizes. The raw struct lives on the callee's stack frame and
is only valid while the closure runs.
 */

/// Trait for address types that can be created from raw sockaddr.
pub trait FromSockAddr: Sized {
	/// Creates address from raw sockaddr storage.
	///
	/// # Safety
	/// The sockaddr must be of the correct family for this type.
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self>;
}

impl FromSockAddr for SocketAddrV4 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for SocketAddrV6 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in6) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for UnixAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_un) };
		Some(Self::from_raw(raw, len))
	}
}

/// A peer or local address of any supported family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
	V4(SocketAddrV4),
	V6(SocketAddrV6),
	Unix(UnixAddr),
}

impl PeerAddr {
	/// Returns the libc address family constant.
	pub fn family(&self) -> libc::c_int {
		match self {
			PeerAddr::V4(_) => libc::AF_INET,
			PeerAddr::V6(_) => libc::AF_INET6,
			PeerAddr::Unix(_) => libc::AF_UNIX,
		}
	}

	/// Returns the port, if the family has one.
	pub fn port(&self) -> Option<u16> {
		match self {
			PeerAddr::V4(addr) => Some(addr.port()),
			PeerAddr::V6(addr) => Some(addr.port()),
			PeerAddr::Unix(_) => None,
		}
	}

	pub fn is_unix(&self) -> bool {
		matches!(self, PeerAddr::Unix(_))
	}

	/// Resolves `host` through the platform resolver.
	///
	/// IPv4 results are preferred when the name maps to both families.
	pub fn resolve(host: &str, port: u16) -> IoResult<PeerAddr> {
		use std::net::ToSocketAddrs;

		let addrs: Vec<std::net::SocketAddr> = match (host, port).to_socket_addrs() {
			Ok(iter) => iter.collect(),
			Err(err) => {
				tracing::warn!(host, port, error = %err, "cannot resolve host");
				return Err(IoError::Unknown);
			}
		};
		addrs
			.iter()
			.find(|addr| addr.is_ipv4())
			.or_else(|| addrs.first())
			.map(|addr| PeerAddr::from(*addr))
			.ok_or(IoError::Unknown)
	}

	/// Decodes a `sockaddr_storage` filled in by the kernel.
	pub(crate) fn from_storage(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<Self> {
		let ptr = storage as *const _ as *const libc::sockaddr;
		// SAFETY: the family tag selects the matching layout; the length is checked per family.
		unsafe {
			match storage.ss_family as libc::c_int {
				libc::AF_INET => SocketAddrV4::from_sockaddr(ptr, len).map(PeerAddr::V4),
				libc::AF_INET6 => SocketAddrV6::from_sockaddr(ptr, len).map(PeerAddr::V6),
				libc::AF_UNIX => UnixAddr::from_sockaddr(ptr, len).map(PeerAddr::Unix),
				_ => None,
			}
		}
	}
}

impl ToSockAddr for PeerAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		match self {
			PeerAddr::V4(addr) => addr.with_raw(f),
			PeerAddr::V6(addr) => addr.with_raw(f),
			PeerAddr::Unix(addr) => addr.with_raw(f),
		}
	}
}

impl From<std::net::SocketAddr> for PeerAddr {
	fn from(addr: std::net::SocketAddr) -> Self {
		match addr {
			std::net::SocketAddr::V4(v4) => PeerAddr::V4(v4.into()),
			std::net::SocketAddr::V6(v6) => PeerAddr::V6(v6.into()),
		}
	}
}

impl From<SocketAddrV4> for PeerAddr {
	fn from(addr: SocketAddrV4) -> Self {
		PeerAddr::V4(addr)
	}
}

impl From<SocketAddrV6> for PeerAddr {
	fn from(addr: SocketAddrV6) -> Self {
		PeerAddr::V6(addr)
	}
}

impl From<UnixAddr> for PeerAddr {
	fn from(addr: UnixAddr) -> Self {
		PeerAddr::Unix(addr)
	}
}

impl std::fmt::Display for PeerAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			PeerAddr::V4(addr) => addr.fmt(f),
			PeerAddr::V6(addr) => addr.fmt(f),
			PeerAddr::Unix(addr) => addr.fmt(f),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn v4_survives_storage_round_trip() {
		let addr = PeerAddr::V4(SocketAddrV4::new([10, 1, 2, 3], 8080));
		let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let len = addr
			.with_raw(|ptr, len| {
				unsafe {
					std::ptr::copy_nonoverlapping(
						ptr as *const u8,
						&mut storage as *mut _ as *mut u8,
						len as usize,
					);
				}
				len
			})
			.unwrap();
		assert_eq!(PeerAddr::from_storage(&storage, len), Some(addr));
	}

	#[test]
	fn std_addresses_convert() {
		let std_addr: std::net::SocketAddr = "127.0.0.1:4242".parse().unwrap();
		let addr = PeerAddr::from(std_addr);
		assert_eq!(addr.port(), Some(4242));
		assert_eq!(addr.family(), libc::AF_INET);
		assert_eq!(addr.to_string(), "127.0.0.1:4242");
	}

	#[test]
	fn unix_path_too_long_is_rejected() {
		let addr = PeerAddr::Unix(UnixAddr::new(vec![b'a'; 200]));
		assert!(addr.with_raw(|_, len| len).is_none());
	}

	#[test]
	fn abstract_names_use_the_whole_path_field() {
		let family = std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
		let longest = PeerAddr::Unix(UnixAddr::abstract_socket(vec![b'n'; 107]));
		assert_eq!(longest.with_raw(|_, len| len), Some(family + 108));
		let over = PeerAddr::Unix(UnixAddr::abstract_socket(vec![b'n'; 108]));
		assert!(over.with_raw(|_, len| len).is_none());
		let path = PeerAddr::Unix(UnixAddr::new(vec![b'p'; 107]));
		assert!(path.with_raw(|_, len| len).is_some());
		let path = PeerAddr::Unix(UnixAddr::new(vec![b'p'; 108]));
		assert!(path.with_raw(|_, len| len).is_none());
	}
}
