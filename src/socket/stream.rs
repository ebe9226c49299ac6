use std::time::Duration;

use crate::error::{IoError, IoResult, Status};
use crate::poll::{self, Deadline, Event, Plan, PollEntry, Ready};

use super::raw::{self, FdTransport};
use super::{Direction, Kind, ReadMode, Socket, WriteMode};

/// Outcome of one non-blocking transfer attempt.
pub(crate) enum Attempt {
	Done(usize),
	Eof,
	/// Would block until the given readiness.
	Blocked(Event),
}

impl Socket {
	/// Reads into `buf` according to `mode`.
	///
	/// Queued input is served first. Returns `Err(Closed)` once the peer
	/// has finished sending and the queue is empty; `Persist` returns a
	/// short count if the stream ends after some progress.
	pub fn read(&mut self, buf: &mut [u8], mode: ReadMode) -> IoResult<usize> {
		if self.kind == Kind::Datagram {
			return self.read_message(buf, mode);
		}
		if buf.is_empty() {
			self.live_fd()?;
			return Ok(0);
		}
		match mode {
			ReadMode::Plain => self.read_some(buf, false),
			ReadMode::Peek => self.read_some(buf, true),
			ReadMode::Persist => {
				let mut done = 0;
				while done < buf.len() {
					match self.read_some(&mut buf[done..], false) {
						Ok(n) => done += n,
						Err(err) if done == 0 => return Err(err),
						Err(_) => break,
					}
				}
				Ok(done)
			}
		}
	}

	/// Reads one `\n`-terminated line into `line`, without the terminator
	/// (a preceding `\r` is dropped too). Returns the length appended.
	///
	/// Bytes past the terminator stay queued. A final unterminated line is
	/// returned as is; on a timeout the partial line is queued again so the
	/// next call sees it.
	pub fn read_line(&mut self, line: &mut Vec<u8>) -> IoResult<usize> {
		let start = line.len();
		let mut chunk = [0u8; 512];
		loop {
			let n = match self.read(&mut chunk, ReadMode::Plain) {
				Ok(n) => n,
				Err(IoError::Closed) if line.len() > start => return Ok(line.len() - start),
				Err(err) => {
					let partial = line.split_off(start);
					self.requeue(&partial);
					return Err(err);
				}
			};
			if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
				line.extend_from_slice(&chunk[..pos]);
				self.requeue(&chunk[pos + 1..n]);
				if line.len() > start && line.last() == Some(&b'\r') {
					line.pop();
				}
				return Ok(line.len() - start);
			}
			line.extend_from_slice(&chunk[..n]);
		}
	}

	/// Returns bytes already counted as read to the front of the queue.
	fn requeue(&mut self, data: &[u8]) {
		if data.is_empty() {
			return;
		}
		self.r_buf.unread(data);
		self.counters.read = self.counters.read.saturating_sub(data.len() as u64);
		self.counters.total_read = self.counters.total_read.saturating_sub(data.len() as u64);
	}

	/// Queues `data` in front of any pending input; the next read returns it first.
	pub fn push_back(&mut self, data: &[u8]) -> IoResult<()> {
		self.live_fd()?;
		self.r_buf.unread(data);
		Ok(())
	}

	/// Writes `data` according to `mode`.
	///
	/// Leftover output from earlier calls is sent first. Datagram sockets
	/// only queue the bytes; [`Socket::send_msg`] sends them.
	pub fn write(&mut self, data: &[u8], mode: WriteMode) -> IoResult<usize> {
		if self.kind == Kind::Datagram {
			return self.write_message(data, mode);
		}
		match mode {
			WriteMode::Plain => self.write_some(data, 0),
			WriteMode::OutOfBand => {
				if self.session.is_some() {
					return Err(IoError::NotSupported);
				}
				self.write_urgent(data)
			}
			WriteMode::Persist => {
				if data.is_empty() {
					return self.write_some(data, 0);
				}
				let mut done = 0;
				while done < data.len() {
					match self.write_some(&data[done..], 0) {
						Ok(n) => done += n,
						Err(err) if done == 0 => return Err(err),
						Err(_) => break,
					}
				}
				Ok(done)
			}
		}
	}

	/// Waits until `event` can proceed without blocking.
	pub fn wait(&mut self, event: Event, timeout: Option<Duration>) -> IoResult<()> {
		self.live_fd()?;
		let read_done = self.kind.is_stream()
			&& self.r_buf.is_empty()
			&& (self.eof || self.r_status == Status::Closed);
		let write_done = self.w_status == Status::Closed;
		let event = match event {
			Event::Read if read_done => return Err(IoError::Closed),
			Event::Write if write_done => return Err(IoError::Closed),
			Event::ReadWrite => match (read_done, write_done) {
				(true, true) => return Err(IoError::Closed),
				(true, false) => Event::Write,
				(false, true) => Event::Read,
				(false, false) => Event::ReadWrite,
			},
			event => event,
		};
		let ready = self.wait_ready(event, timeout)?;
		if ready.satisfies(event) { Ok(()) } else { Err(IoError::Closed) }
	}

	fn read_some(&mut self, buf: &mut [u8], peek: bool) -> IoResult<usize> {
		self.live_fd()?;
		self.settle(Direction::Read)?;
		let chunk_size = self.ctx.config().read_chunk.max(1);
		loop {
			if !self.r_buf.is_empty() {
				let n = if peek { self.r_buf.peek(buf) } else { self.r_buf.read(buf) };
				if !peek {
					self.counters.add_read(n);
				}
				self.r_status = Status::Success;
				return Ok(n);
			}
			if self.eof || self.r_status == Status::Closed {
				return Err(IoError::Closed);
			}
			let direct = !peek && buf.len() >= chunk_size;
			let attempt = if direct {
				self.try_recv(buf)
			} else {
				let mut chunk = vec![0u8; chunk_size.max(buf.len())];
				let attempt = self.try_recv(&mut chunk);
				if let Ok(Attempt::Done(n)) = attempt {
					self.r_buf.write(&chunk[..n]);
				}
				attempt
			};
			match attempt {
				Ok(Attempt::Done(n)) if direct => {
					self.counters.add_read(n);
					self.r_status = Status::Success;
					return Ok(n);
				}
				Ok(Attempt::Done(_)) => {}
				Ok(Attempt::Eof) => {
					self.mark_eof();
					return Err(IoError::Closed);
				}
				Ok(Attempt::Blocked(event)) => self.wait_io(event, self.timeouts.read, Direction::Read)?,
				Err(IoError::Interrupted) if !self.interrupts_on_signal() => {}
				Err(err) => {
					self.r_status = err.into();
					return Err(err);
				}
			}
		}
	}

	fn write_some(&mut self, data: &[u8], flags: libc::c_int) -> IoResult<usize> {
		self.live_fd()?;
		if self.w_status == Status::Closed {
			return Err(IoError::Closed);
		}
		self.settle(Direction::Write)?;
		if let Err(err) = self.flush_output(self.timeouts.write) {
			self.w_status = err.into();
			return Err(err);
		}
		if data.is_empty() {
			return Ok(0);
		}
		loop {
			match self.try_send(data, flags) {
				Ok(Attempt::Done(n)) => {
					self.counters.add_written(n);
					self.w_status = Status::Success;
					return Ok(n);
				}
				Ok(Attempt::Blocked(event)) => self.wait_io(event, self.timeouts.write, Direction::Write)?,
				Ok(Attempt::Eof) => {
					self.w_status = Status::Closed;
					return Err(IoError::Closed);
				}
				Err(IoError::Interrupted) if !self.interrupts_on_signal() => {}
				Err(err) => {
					self.w_status = err.into();
					return Err(err);
				}
			}
		}
	}

	/// Sends out-of-band data in one attempt. Nothing is queued or retried.
	fn write_urgent(&mut self, data: &[u8]) -> IoResult<usize> {
		self.live_fd()?;
		if self.w_status == Status::Closed {
			return Err(IoError::Closed);
		}
		self.settle(Direction::Write)?;
		if let Err(err) = self.flush_output(self.timeouts.write) {
			self.w_status = err.into();
			return Err(err);
		}
		if data.is_empty() {
			return Ok(0);
		}
		let result = match self.try_send(data, libc::MSG_OOB) {
			Ok(Attempt::Done(n)) => {
				self.counters.add_written(n);
				if n == data.len() { Ok(n) } else { Err(IoError::Timeout) }
			}
			Ok(Attempt::Blocked(_)) => Err(IoError::Timeout),
			Ok(Attempt::Eof) => Err(IoError::Closed),
			Err(err) => Err(err),
		};
		self.w_status = match result {
			Ok(_) => Status::Success,
			Err(err) => err.into(),
		};
		if let Err(IoError::Timeout) = result {
			tracing::warn!(sock = %self.description(), bytes = data.len(), "urgent data did not go out at once");
		}
		result
	}

	/// Sends queued output, waiting at most `timeout` in total.
	pub(crate) fn flush_output(&mut self, timeout: Option<Duration>) -> IoResult<()> {
		let deadline = Deadline::after(timeout);
		while !self.w_buf.is_empty() {
			let head = self.w_buf.head().to_vec();
			match self.try_send(&head, 0) {
				Ok(Attempt::Done(n)) => {
					self.w_buf.discard(n);
					self.counters.add_written(n);
				}
				Ok(Attempt::Blocked(event)) => {
					let ready = self.wait_ready(event, deadline.remaining())?;
					if !ready.satisfies(event) && ready.close {
						return Err(IoError::Closed);
					}
				}
				Ok(Attempt::Eof) => return Err(IoError::Closed),
				Err(IoError::Interrupted) if !self.interrupts_on_signal() => {}
				Err(err) => return Err(err),
			}
		}
		Ok(())
	}

	pub(crate) fn try_recv(&mut self, buf: &mut [u8]) -> IoResult<Attempt> {
		let fd = self.live_fd()?;
		let attempt = if let Some(session) = self.session.as_mut() {
			let mut io = FdTransport::new(fd);
			match session.read(&mut io, buf) {
				Ok(0) => Attempt::Eof,
				Ok(n) => Attempt::Done(n),
				Err(IoError::Timeout) => Attempt::Blocked(io.blocked.unwrap_or(Event::Read)),
				Err(err) => return Err(err),
			}
		} else {
			match raw::recv(fd, buf, 0) {
				Ok(0) => Attempt::Eof,
				Ok(n) => Attempt::Done(n),
				Err(err) if err.errno() == libc::EAGAIN => Attempt::Blocked(Event::Read),
				Err(err) if err.errno() == libc::EINTR => return Err(IoError::Interrupted),
				Err(err) => return Err(self.fail(err)),
			}
		};
		if let Attempt::Done(n) = attempt {
			if self.logging() {
				tracing::trace!(sock = %self.description(), bytes = n, "received");
			}
		}
		Ok(attempt)
	}

	fn try_send(&mut self, data: &[u8], flags: libc::c_int) -> IoResult<Attempt> {
		let fd = self.live_fd()?;
		let attempt = if let Some(session) = self.session.as_mut() {
			let mut io = FdTransport::new(fd);
			match session.write(&mut io, data) {
				Ok(0) => Attempt::Blocked(io.blocked.unwrap_or(Event::Write)),
				Ok(n) => Attempt::Done(n),
				Err(IoError::Timeout) => Attempt::Blocked(io.blocked.unwrap_or(Event::Write)),
				Err(err) => return Err(err),
			}
		} else {
			match raw::send(fd, data, flags) {
				Ok(0) => Attempt::Blocked(Event::Write),
				Ok(n) => Attempt::Done(n),
				Err(err) if err.errno() == libc::EAGAIN => Attempt::Blocked(Event::Write),
				Err(err) if err.errno() == libc::EINTR => return Err(IoError::Interrupted),
				Err(err) => return Err(self.fail(err)),
			}
		};
		if let Attempt::Done(n) = attempt {
			if self.logging() {
				tracing::trace!(sock = %self.description(), bytes = n, "sent");
			}
		}
		Ok(attempt)
	}

	/// Waits for `event` and records a failure in `direction`.
	pub(crate) fn wait_io(&mut self, event: Event, timeout: Option<Duration>, direction: Direction) -> IoResult<()> {
		let result = match self.wait_ready(event, timeout) {
			Ok(ready) if !ready.satisfies(event) && ready.close => Err(IoError::Closed),
			Ok(_) => Ok(()),
			Err(err) => Err(err),
		};
		if let Err(err) = result {
			self.set_status(direction, err);
		}
		result
	}

	/// Single-socket wait, run as a two-entry set through the multiplexer.
	pub(crate) fn wait_ready(&mut self, event: Event, timeout: Option<Duration>) -> IoResult<Ready> {
		let ctx = self.ctx.clone();
		let mut set = [PollEntry::socket(self, event), PollEntry::none(event)];
		poll::select(&mut set, timeout, ctx.config())?;
		Ok(set[0].ready())
	}

	/// Pulls whatever is readable into the input queue without waiting.
	pub(crate) fn upread(&mut self) -> IoResult<usize> {
		let mut chunk = vec![0u8; self.ctx.config().read_chunk.max(1)];
		match self.try_recv(&mut chunk) {
			Ok(Attempt::Done(n)) => {
				self.r_buf.write(&chunk[..n]);
				Ok(n)
			}
			Ok(Attempt::Eof) => {
				self.mark_eof();
				Ok(0)
			}
			Ok(Attempt::Blocked(_)) | Err(IoError::Interrupted) => Ok(0),
			Err(err) => {
				self.r_status = err.into();
				Err(err)
			}
		}
	}

	pub(crate) fn mark_eof(&mut self) {
		self.eof = true;
		self.r_status = Status::Closed;
		if self.logging() {
			tracing::debug!(sock = %self.description(), "end of stream");
		}
	}

	/// Decides how the multiplexer handles this socket for `event`.
	pub(crate) fn poll_plan(&mut self, event: Event, multi: bool) -> Plan {
		let Ok(fd) = self.live_fd() else {
			return Plan::Ready(Ready::CLOSE);
		};
		let datagram = self.kind == Kind::Datagram;
		if self.pending {
			match self.resolve_pending(Some(Duration::ZERO)) {
				Ok(()) => {}
				Err(IoError::Timeout | IoError::Interrupted) => {
					return Plan::Os { fd, events: self.pending_events(), stall: false, datagram };
				}
				Err(_) => return Plan::Ready(Ready::CLOSE),
			}
		}
		let mut ready = Ready::NONE;
		if event.wants_read()
			&& !datagram
			&& (!self.r_buf.is_empty() || self.eof || self.r_status == Status::Closed)
		{
			ready.read = true;
		}
		if event.wants_write() && self.w_status == Status::Closed {
			ready.close = true;
		}
		if !ready.is_empty() {
			return Plan::Ready(ready);
		}
		let stall = multi
			&& !datagram
			&& event == Event::Write
			&& self.reads_on_write()
			&& !self.eof
			&& self.r_status != Status::Closed;
		let mut events = event.os_events();
		if stall {
			events |= libc::POLLIN;
		}
		Plan::Os { fd, events, stall, datagram }
	}

	/// Turns OS readiness into reported readiness, draining input on stalled writes.
	pub(crate) fn absorb(&mut self, event: Event, revents: libc::c_short, stall: bool) -> Ready {
		let mut ready = Ready::from_revents(revents);
		if self.pending {
			return match self.resolve_pending(Some(Duration::ZERO)) {
				// Readiness was spent on the connect/handshake; only writability carries over.
				Ok(()) => Ready { read: false, write: ready.write && event.wants_write(), close: false },
				Err(IoError::Timeout | IoError::Interrupted) => Ready::NONE,
				Err(_) => Ready::CLOSE,
			};
		}
		if stall && ready.read && !ready.write && self.upread().is_err() {
			ready.close = true;
		}
		ready
	}

	pub(crate) fn has_buffered_input(&self) -> bool {
		!self.r_buf.is_empty()
	}
}
