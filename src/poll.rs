//! Multiplexed readiness waiting.
//!
//! [`poll`] waits on any mix of sockets, listeners and triggers. Before
//! touching the OS it checks what each socket can already answer from its
//! own state (queued input, end of stream, closed directions, a pending
//! connect that has since completed). While a stream socket waits to
//! write, inbound data may be drained into its queue so that a peer
//! blocked on writing back is never starved ("read on write").

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::context::{Config, Context};
use crate::error::{IoError, IoResult, SocketError, errno};
use crate::socket::{Listener, Socket, Trigger};

/// Readiness requested from a poll entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
	Read,
	Write,
	ReadWrite,
}

impl Event {
	pub fn wants_read(self) -> bool {
		matches!(self, Event::Read | Event::ReadWrite)
	}

	pub fn wants_write(self) -> bool {
		matches!(self, Event::Write | Event::ReadWrite)
	}

	pub(crate) fn os_events(self) -> libc::c_short {
		let mut events = 0;
		if self.wants_read() {
			events |= libc::POLLIN;
		}
		if self.wants_write() {
			events |= libc::POLLOUT;
		}
		events
	}
}

/// Readiness observed on a poll entry.
///
/// `close` is the catch-all for failure or hang-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ready {
	pub read: bool,
	pub write: bool,
	pub close: bool,
}

impl Ready {
	pub const NONE: Ready = Ready { read: false, write: false, close: false };
	pub const CLOSE: Ready = Ready { read: false, write: false, close: true };

	pub fn is_empty(&self) -> bool {
		!(self.read || self.write || self.close)
	}

	/// True if this readiness answers `event`.
	pub fn satisfies(&self, event: Event) -> bool {
		(event.wants_read() && self.read) || (event.wants_write() && self.write)
	}

	pub(crate) fn of(event: Event) -> Ready {
		Ready {
			read: event.wants_read(),
			write: event.wants_write(),
			close: false,
		}
	}

	pub(crate) fn from_revents(revents: libc::c_short) -> Ready {
		Ready {
			read: revents & (libc::POLLIN | libc::POLLPRI | libc::POLLHUP) != 0,
			write: revents & libc::POLLOUT != 0,
			close: revents & (libc::POLLERR | libc::POLLNVAL | libc::POLLHUP) != 0,
		}
	}

	fn counts_for(&self, event: Event) -> bool {
		self.satisfies(event) || self.close
	}
}

/// What a poll entry points at.
pub enum Target<'a> {
	Socket(&'a mut Socket),
	Listener(&'a mut Listener),
	Trigger(&'a Trigger),
}

/// One `{target, requested event, observed readiness}` slot of a wait.
///
/// An entry without a target is inert: it reports its event as satisfied
/// but never ends a wait by itself.
pub struct PollEntry<'a> {
	target: Option<Target<'a>>,
	event: Event,
	ready: Ready,
}

impl<'a> PollEntry<'a> {
	pub fn new(target: Target<'a>, event: Event) -> Self {
		Self { target: Some(target), event, ready: Ready::NONE }
	}

	pub fn socket(socket: &'a mut Socket, event: Event) -> Self {
		Self::new(Target::Socket(socket), event)
	}

	/// Waits for an incoming connection.
	pub fn listener(listener: &'a mut Listener) -> Self {
		Self::new(Target::Listener(listener), Event::Read)
	}

	/// Waits for the trigger to be signaled.
	pub fn trigger(trigger: &'a Trigger) -> Self {
		Self::new(Target::Trigger(trigger), Event::Read)
	}

	pub fn none(event: Event) -> Self {
		Self { target: None, event, ready: Ready::NONE }
	}

	pub fn event(&self) -> Event {
		self.event
	}

	pub fn ready(&self) -> Ready {
		self.ready
	}

	/// True if the observed readiness answers the requested event.
	pub fn is_ready(&self) -> bool {
		self.ready.satisfies(self.event)
	}

	fn validate(&self) -> IoResult<()> {
		let valid = match self.target {
			Some(Target::Listener(_)) | Some(Target::Trigger(_)) => self.event == Event::Read,
			_ => true,
		};
		debug_assert!(valid, "listeners and triggers can only be polled for Event::Read");
		if valid { Ok(()) } else { Err(IoError::InvalidArgument) }
	}
}

/// Waits until at least one entry is ready, the timeout passes, or a
/// failure occurs. Returns the number of entries whose readiness answers
/// their request (entries reporting `close` count as answered).
///
/// `None` waits forever; `Some(Duration::ZERO)` never blocks.
pub fn poll(ctx: &Context, entries: &mut [PollEntry<'_>], timeout: Option<Duration>) -> IoResult<usize> {
	select(entries, timeout, ctx.config())
}

/// Per-socket wait instruction produced before each OS wait.
pub(crate) enum Plan {
	/// Already answered without the OS.
	Ready(Ready),
	/// Needs the OS; `stall` marks a write wait that also listens for input to drain.
	Os {
		fd: RawFd,
		events: libc::c_short,
		stall: bool,
		datagram: bool,
	},
}

pub(crate) fn select(
	entries: &mut [PollEntry<'_>],
	timeout: Option<Duration>,
	cfg: &Config,
) -> IoResult<usize> {
	let deadline = Deadline::after(timeout);
	for entry in entries.iter() {
		entry.validate()?;
	}
	// A set of more than one entry is eligible for draining on write waits.
	let multi = entries.len() > 1;
	let handles = entries.iter().filter(|e| e.target.is_some()).count();
	let interruptible = entries.iter().any(|e| match &e.target {
		Some(Target::Socket(socket)) => socket.interrupts_on_signal(),
		_ => false,
	}) || (cfg.interrupt_on_signal
		&& !entries.iter().any(|e| matches!(e.target, Some(Target::Socket(_)))));

	if handles == 0 {
		for entry in entries.iter_mut() {
			entry.ready = Ready::of(entry.event);
		}
		return match deadline.remaining() {
			Some(wait) => {
				std::thread::sleep(wait);
				Err(IoError::Timeout)
			}
			None => Err(IoError::InvalidArgument),
		};
	}

	loop {
		let mut found = 0usize;
		let mut fds: Vec<libc::pollfd> = Vec::with_capacity(handles);
		let mut slots: Vec<(usize, bool)> = Vec::with_capacity(handles);
		let mut probes: Vec<(usize, libc::pollfd)> = Vec::new();

		for (i, entry) in entries.iter_mut().enumerate() {
			entry.ready = Ready::NONE;
			let event = entry.event;
			let plan = match &mut entry.target {
				None => {
					entry.ready = Ready::of(event);
					continue;
				}
				Some(Target::Socket(socket)) => socket.poll_plan(event, multi),
				Some(Target::Listener(listener)) => match listener.raw_fd() {
					Some(fd) => Plan::Os { fd, events: libc::POLLIN, stall: false, datagram: false },
					None => Plan::Ready(Ready::CLOSE),
				},
				Some(Target::Trigger(trigger)) => Plan::Os {
					fd: trigger.raw_fd(),
					events: libc::POLLIN,
					stall: false,
					datagram: false,
				},
			};
			match plan {
				Plan::Ready(ready) => {
					entry.ready = ready;
					if ready.counts_for(event) {
						found += 1;
					}
				}
				Plan::Os { fd, events, stall, datagram } => {
					let pfd = libc::pollfd { fd, events, revents: 0 };
					if datagram && handles > 1 {
						probes.push((i, pfd));
					} else {
						fds.push(pfd);
						slots.push((i, stall));
					}
				}
			}
		}

		// Datagram sockets are probed one by one when other handles share the wait.
		for (i, pfd) in probes.iter_mut() {
			match os_poll(std::slice::from_mut(pfd), Some(Duration::ZERO)) {
				Ok(0) => {}
				Ok(_) => {
					let entry = &mut entries[*i];
					entry.ready = Ready::from_revents(pfd.revents);
					if entry.ready.counts_for(entry.event) {
						found += 1;
					}
				}
				Err(err) if err.errno() == libc::EINTR => {}
				Err(err) => {
					tracing::warn!(error = %err, "datagram probe failed");
					entries[*i].ready = Ready::CLOSE;
					found += 1;
				}
			}
		}

		let wait = if found > 0 {
			Some(Duration::ZERO)
		} else {
			let cap = if probes.is_empty() { None } else { Some(cfg.datagram_slice) };
			deadline.slice(cfg.restart_slice, cap)
		};

		match os_poll(&mut fds, wait) {
			Ok(_) => {}
			Err(err) if err.errno() == libc::EINTR => {
				if interruptible {
					return Err(IoError::Interrupted);
				}
				if found == 0 {
					continue;
				}
			}
			Err(err) => {
				tracing::warn!(error = %err, "multiplexed wait failed");
				return Err(err.classify());
			}
		}

		for (pfd, &(i, stall)) in fds.iter().zip(slots.iter()) {
			if pfd.revents == 0 {
				continue;
			}
			let entry = &mut entries[i];
			let event = entry.event;
			entry.ready = match &mut entry.target {
				Some(Target::Socket(socket)) => socket.absorb(event, pfd.revents, stall),
				Some(_) => {
					let mut ready = Ready::from_revents(pfd.revents);
					ready.write = false;
					ready
				}
				None => Ready::of(event),
			};
			if entry.ready.counts_for(event) {
				found += 1;
			}
		}

		if found > 0 {
			for entry in entries.iter_mut() {
				if let Some(Target::Socket(socket)) = &entry.target {
					if entry.event == Event::Write && socket.has_buffered_input() {
						entry.ready.read = true;
					}
				}
			}
			return Ok(found);
		}
		if deadline.expired() {
			return Err(IoError::Timeout);
		}
	}
}

/// Waits on a single descriptor, honoring the restart slice and signal policy.
pub(crate) fn wait_fd(
	fd: RawFd,
	events: libc::c_short,
	deadline: &Deadline,
	interruptible: bool,
	cfg: &Config,
) -> IoResult<libc::c_short> {
	loop {
		let mut pfd = [libc::pollfd { fd, events, revents: 0 }];
		match os_poll(&mut pfd, deadline.slice(cfg.restart_slice, None)) {
			Ok(0) => {
				if deadline.expired() {
					return Err(IoError::Timeout);
				}
			}
			Ok(_) => return Ok(pfd[0].revents),
			Err(err) if err.errno() == libc::EINTR => {
				if interruptible {
					return Err(IoError::Interrupted);
				}
			}
			Err(err) => {
				tracing::warn!(fd, error = %err, "wait failed");
				return Err(err.classify());
			}
		}
	}
}

/// Thin wrapper over `poll(2)`. `None` blocks indefinitely.
pub(crate) fn os_poll(fds: &mut [libc::pollfd], wait: Option<Duration>) -> Result<usize, SocketError> {
	let timeout_ms = match wait {
		None => -1,
		// Round up so a sub-millisecond remainder does not spin.
		Some(wait) => wait.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as libc::c_int,
	};
	let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
	if n == -1 {
		Err(SocketError::Poll { errno: errno() })
	} else {
		Ok(n as usize)
	}
}

/// Absolute expiry of a wait. `None` never expires.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
	at: Option<Instant>,
}

impl Deadline {
	pub(crate) fn after(timeout: Option<Duration>) -> Self {
		Self { at: timeout.and_then(|t| Instant::now().checked_add(t)) }
	}

	pub(crate) fn remaining(&self) -> Option<Duration> {
		self.at.map(|at| at.saturating_duration_since(Instant::now()))
	}

	pub(crate) fn expired(&self) -> bool {
		self.at.is_some_and(|at| Instant::now() >= at)
	}

	/// Length of the next OS wait: the remaining time, capped by `slice` and `cap`.
	pub(crate) fn slice(&self, slice: Option<Duration>, cap: Option<Duration>) -> Option<Duration> {
		[self.remaining(), slice, cap].into_iter().flatten().min()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deadline_slicing() {
		let forever = Deadline::after(None);
		assert_eq!(forever.slice(None, None), None);
		assert_eq!(
			forever.slice(Some(Duration::from_millis(50)), None),
			Some(Duration::from_millis(50))
		);
		assert!(!forever.expired());

		let now = Deadline::after(Some(Duration::ZERO));
		assert!(now.expired());
		assert_eq!(now.slice(Some(Duration::from_secs(1)), None), Some(Duration::ZERO));
	}

	#[test]
	fn readiness_answers_requests() {
		let ready = Ready::from_revents(libc::POLLOUT);
		assert!(ready.satisfies(Event::Write));
		assert!(ready.satisfies(Event::ReadWrite));
		assert!(!ready.satisfies(Event::Read));
		assert!(Ready::from_revents(libc::POLLHUP).close);
	}

	#[test]
	fn inert_entries_time_out() {
		let mut entries = [PollEntry::none(Event::Read)];
		let started = Instant::now();
		let result = select(&mut entries, Some(Duration::from_millis(20)), &Config::default());
		assert_eq!(result, Err(IoError::Timeout));
		assert!(started.elapsed() >= Duration::from_millis(20));
		assert!(entries[0].is_ready());
	}
}
