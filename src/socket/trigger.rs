use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::{IoError, IoResult, SocketError, errno};
use crate::poll;

/// A resettable wake-up flag that can be polled alongside sockets.
///
/// Backed by an `eventfd`. Any thread may [`set`](Trigger::set) it (share
/// it through an `Arc`); it stays set until [`reset`](Trigger::reset).
#[derive(Debug)]
pub struct Trigger {
	fd: OwnedFd,
}

impl Trigger {
	pub fn new() -> IoResult<Self> {
		let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
		if fd == -1 {
			let err = SocketError::Create { errno: errno() };
			tracing::warn!(error = %err, "cannot create trigger");
			return Err(err.classify());
		}
		Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
	}

	/// Signals the trigger. Setting an already set trigger is a no-op.
	pub fn set(&self) -> IoResult<()> {
		let one: u64 = 1;
		let n = unsafe {
			libc::write(
				self.raw_fd(),
				&one as *const u64 as *const libc::c_void,
				std::mem::size_of::<u64>(),
			)
		};
		if n == -1 && errno() != libc::EAGAIN {
			return Err(self.fail(SocketError::Write { errno: errno() }));
		}
		Ok(())
	}

	/// Clears the trigger.
	pub fn reset(&self) -> IoResult<()> {
		let mut value: u64 = 0;
		let n = unsafe {
			libc::read(
				self.raw_fd(),
				&mut value as *mut u64 as *mut libc::c_void,
				std::mem::size_of::<u64>(),
			)
		};
		if n == -1 && errno() != libc::EAGAIN {
			return Err(self.fail(SocketError::Read { errno: errno() }));
		}
		Ok(())
	}

	/// True while the trigger is set.
	pub fn is_set(&self) -> IoResult<bool> {
		let mut pfd = [libc::pollfd { fd: self.raw_fd(), events: libc::POLLIN, revents: 0 }];
		match poll::os_poll(&mut pfd, Some(std::time::Duration::ZERO)) {
			Ok(n) => Ok(n > 0 && pfd[0].revents & libc::POLLIN != 0),
			Err(err) if err.errno() == libc::EINTR => Err(IoError::Interrupted),
			Err(err) => Err(self.fail(err)),
		}
	}

	pub fn description(&self) -> String {
		format!("TRIGGER[{}]", self.raw_fd())
	}

	pub(crate) fn raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}

	fn fail(&self, err: SocketError) -> IoError {
		tracing::warn!(sock = %self.description(), error = %err, "trigger call failed");
		err.classify()
	}
}
