use crate::addr::PeerAddr;
use crate::error::{IoError, IoResult, Status};
use crate::poll::Event;

use super::{Direction, Kind, ReadMode, Shutdown, Socket, WriteMode, options, raw};

/// Largest message a single receive takes in.
const MAX_DATAGRAM: usize = 64 * 1024;

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgResult {
	/// Bytes copied into the caller's buffer.
	pub len: usize,
	/// Full message size; the excess stays queued for [`Socket::read`].
	pub msg_len: usize,
	/// Sender, when the family reports one.
	pub from: Option<PeerAddr>,
}

impl Socket {
	/// Fixes (or with `None`, clears) the default peer. Nothing is sent.
	pub fn connect_peer(&mut self, peer: Option<&PeerAddr>) -> IoResult<()> {
		if self.kind != Kind::Datagram {
			return Err(IoError::InvalidArgument);
		}
		let fd = self.live_fd()?;
		match peer {
			Some(peer) => {
				raw::connect(fd, peer).map_err(|err| self.fail(err))?;
				self.peer = Some(peer.clone());
			}
			None => {
				raw::disconnect(fd).map_err(|err| self.fail(err))?;
				self.peer = None;
			}
		}
		if self.logging() {
			tracing::debug!(sock = %self.description(), peer = ?self.peer, "default peer set");
		}
		Ok(())
	}

	/// Sends everything queued by [`Socket::write`] plus `data` as one message.
	///
	/// With `peer == None` the default peer is used. The queue is cleared
	/// only when the whole message went out; a short send is a failure.
	pub fn send_msg(&mut self, peer: Option<&PeerAddr>, data: &[u8]) -> IoResult<()> {
		if self.kind != Kind::Datagram {
			return Err(IoError::InvalidArgument);
		}
		let fd = self.live_fd()?;
		self.w_buf.write(data);
		let mut payload = vec![0u8; self.w_buf.len()];
		self.w_buf.peek(&mut payload);
		let target = peer.cloned();
		loop {
			let sent = match &target {
				Some(addr) => raw::send_to(fd, &payload, addr),
				None => raw::send(fd, &payload, 0),
			};
			match sent {
				Ok(n) if n == payload.len() => {
					self.w_buf.clear();
					self.counters.add_written(n);
					self.counters.messages_out += 1;
					self.w_status = Status::Success;
					if self.logging() {
						tracing::trace!(sock = %self.description(), bytes = n, "message sent");
					}
					return Ok(());
				}
				Ok(n) => {
					tracing::warn!(
						sock = %self.description(),
						sent = n,
						size = payload.len(),
						"datagram truncated on send"
					);
					self.w_status = Status::Unknown;
					return Err(IoError::Unknown);
				}
				Err(err) if err.errno() == libc::EAGAIN => {
					self.wait_io(Event::Write, self.timeouts.write, Direction::Write)?;
				}
				Err(err) if err.errno() == libc::EINTR && !self.interrupts_on_signal() => {}
				Err(err) => {
					let class = self.fail(err);
					self.w_status = class.into();
					return Err(class);
				}
			}
		}
	}

	/// Receives one message into `buf`, queueing what does not fit.
	///
	/// Any unread remainder of the previous message is discarded first.
	pub fn recv_msg(&mut self, buf: &mut [u8]) -> IoResult<MsgResult> {
		if self.kind != Kind::Datagram {
			return Err(IoError::InvalidArgument);
		}
		let fd = self.live_fd()?;
		self.r_buf.clear();
		let mut msg = vec![0u8; MAX_DATAGRAM.max(buf.len())];
		loop {
			match raw::recv_from(fd, &mut msg) {
				Ok((n, from)) => {
					let len = n.min(buf.len());
					buf[..len].copy_from_slice(&msg[..len]);
					self.r_buf.write(&msg[len..n]);
					self.counters.add_read(len);
					self.counters.messages_in += 1;
					self.r_status = Status::Success;
					if self.logging() {
						tracing::trace!(sock = %self.description(), bytes = n, from = ?from, "message received");
					}
					return Ok(MsgResult { len, msg_len: n, from });
				}
				Err(err) if err.errno() == libc::EAGAIN => {
					self.wait_io(Event::Read, self.timeouts.read, Direction::Read)?;
				}
				Err(err) if err.errno() == libc::EINTR && !self.interrupts_on_signal() => {}
				Err(err) => {
					let class = self.fail(err);
					self.r_status = class.into();
					return Err(class);
				}
			}
		}
	}

	/// Discards the rest of the received message and/or the message being built.
	pub fn wipe_msg(&mut self, how: Shutdown) -> IoResult<()> {
		if self.kind != Kind::Datagram {
			return Err(IoError::InvalidArgument);
		}
		self.live_fd()?;
		if how.includes_read() {
			self.r_buf.clear();
		}
		if how.includes_write() {
			self.w_buf.clear();
		}
		Ok(())
	}

	pub fn set_broadcast(&mut self, enable: bool) -> IoResult<()> {
		if self.kind != Kind::Datagram {
			return Err(IoError::InvalidArgument);
		}
		self.live_fd()?;
		let fd = self.fd.as_ref().ok_or(IoError::Closed)?;
		options::set_broadcast(fd, enable).map_err(|err| self.fail(err))
	}

	/// Reads the rest of the current message.
	pub(crate) fn read_message(&mut self, buf: &mut [u8], mode: ReadMode) -> IoResult<usize> {
		self.live_fd()?;
		if self.r_buf.is_empty() {
			return Err(IoError::Closed);
		}
		let n = match mode {
			ReadMode::Peek => self.r_buf.peek(buf),
			ReadMode::Plain | ReadMode::Persist => self.r_buf.read(buf),
		};
		if mode != ReadMode::Peek {
			self.counters.add_read(n);
		}
		Ok(n)
	}

	/// Appends to the message being built.
	pub(crate) fn write_message(&mut self, data: &[u8], mode: WriteMode) -> IoResult<usize> {
		self.live_fd()?;
		if mode == WriteMode::OutOfBand {
			return Err(IoError::NotSupported);
		}
		self.w_buf.write(data);
		Ok(data.len())
	}
}
