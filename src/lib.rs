pub mod socket;
mod addr;
mod context;
mod error;
mod poll;
mod queue;
mod secure;

pub use self::error::{IoError, IoResult, SocketError, Status, classify_errno, errno};
pub use self::addr::{FromSockAddr, PeerAddr, SocketAddrV4, SocketAddrV6, ToSockAddr, UnixAddr};
pub use self::context::{Config, Context};
pub use self::poll::{Event, PollEntry, Ready, Target, poll};
pub use self::queue::ByteQueue;
pub use self::secure::{RawTransport, SecureBackend, SecureSession, SessionContext, Side};
pub use self::socket::{AbortHandle, AcceptOptions, Counters, Direction, Kind, Listener, MsgResult,
					   ReadMode, Shutdown, Socket, SocketOptions, Timeouts, Trigger, WriteMode};
pub use self::socket::{ConnectorBuilder, DatagramBuilder, ListenerBuilder,
					   BufferConfig, KeepaliveConfig, ReuseConfig, TcpConfig};
