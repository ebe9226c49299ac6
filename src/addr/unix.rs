use crate::addr::ToSockAddr;

/// Unix domain socket address (file path or abstract).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnixAddr {
	path: Vec<u8>,
	/// True if this is an abstract socket (Linux-only, no filesystem entry).
	is_abstract: bool,
}

impl UnixAddr {
	/// Creates a new Unix address from a filesystem path.
	pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
		Self {
			path: path.as_ref().to_vec(),
			is_abstract: false,
		}
	}

	/// Creates an abstract socket address (Linux-only).
	///
	/// Abstract sockets exist only in memory, with no filesystem entry.
	pub fn abstract_socket<P: AsRef<[u8]>>(name: P) -> Self {
		Self {
			path: name.as_ref().to_vec(),
			is_abstract: true,
		}
	}

	/// Returns true if this is an abstract socket.
	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	/// Returns the path bytes.
	pub fn path(&self) -> &[u8] {
		&self.path
	}

	/// Converts to the raw sockaddr_un and its effective length.
	pub(crate) fn to_raw(&self) -> Option<(libc::sockaddr_un, libc::socklen_t)> {
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
		let base = std::mem::size_of::<libc::sa_family_t>();

		let offset = usize::from(self.is_abstract);
		// Filesystem paths keep one byte for the terminator; abstract names need none.
		let limit = addr.sun_path.len() - usize::from(!self.is_abstract);
		if self.path.len() + offset > limit {
			return None;
		}
		for (i, &byte) in self.path.iter().enumerate() {
			addr.sun_path[i + offset] = byte as libc::c_char;
		}
		let len = if self.is_abstract {
			base + 1 + self.path.len()
		} else {
			std::mem::size_of::<libc::sockaddr_un>()
		};
		Some((addr, len as libc::socklen_t))
	}

	/// Creates from raw sockaddr_un, as filled in with `len` bytes.
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Self {
		let base = std::mem::size_of::<libc::sa_family_t>();
		let used = (len as usize).saturating_sub(base).min(raw.sun_path.len());
		if used > 0 && raw.sun_path[0] == 0 {
			let path = raw.sun_path[1..used].iter().map(|&c| c as u8).collect();
			Self { path, is_abstract: true }
		} else {
			let end = raw.sun_path[..used]
				.iter()
				.position(|&c| c == 0)
				.unwrap_or(used);
			let path = raw.sun_path[..end].iter().map(|&c| c as u8).collect();
			Self { path, is_abstract: false }
		}
	}
}

impl ToSockAddr for UnixAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let (raw, len) = self.to_raw()?;
		let ptr = &raw as *const _ as *const libc::sockaddr;
		Some(f(ptr, len))
	}
}

impl std::fmt::Display for UnixAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.is_abstract {
			f.write_str("@")?;
		}
		f.write_str(&String::from_utf8_lossy(&self.path))
	}
}
