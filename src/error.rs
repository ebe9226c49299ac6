/// Syscall-level failure detail.
///
/// Logged at the point of failure; callers only ever see the coarse
/// [`IoError`] produced by [`SocketError::classify`].
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket() failed: {}", errno_to_str(*.errno))]
    Create { errno: i32 },

    #[error("bind({addr}) failed: {}", errno_to_str(*.errno))]
    Bind { errno: i32, addr: String },

    #[error("listen(backlog={backlog}) failed: {}", errno_to_str(*.errno))]
    Listen { errno: i32, backlog: i32 },

    #[error("connect({addr}) failed: {}", errno_to_str(*.errno))]
    Connect { errno: i32, addr: String },

    #[error("accept() failed: {}", errno_to_str(*.errno))]
    Accept { errno: i32 },

    #[error("setsockopt({option}) failed: {}", errno_to_str(*.errno))]
    SetOption { errno: i32, option: &'static str },

    #[error("getsockopt({option}) failed: {}", errno_to_str(*.errno))]
    GetOption { errno: i32, option: &'static str },

    #[error("read() failed: {}", errno_to_str(*.errno))]
    Read { errno: i32 },

    #[error("write() failed: {}", errno_to_str(*.errno))]
    Write { errno: i32 },

    #[error("poll() failed: {}", errno_to_str(*.errno))]
    Poll { errno: i32 },

    #[error("shutdown({how}) failed: {}", errno_to_str(*.errno))]
    Shutdown { errno: i32, how: &'static str },

    #[error("invalid address: {reason}")]
    InvalidAddress { reason: &'static str },
}

impl SocketError {
    /// Returns the errno carried by this failure.
    pub fn errno(&self) -> i32 {
        match self {
            SocketError::Create { errno }
            | SocketError::Bind { errno, .. }
            | SocketError::Listen { errno, .. }
            | SocketError::Connect { errno, .. }
            | SocketError::Accept { errno }
            | SocketError::SetOption { errno, .. }
            | SocketError::GetOption { errno, .. }
            | SocketError::Read { errno }
            | SocketError::Write { errno }
            | SocketError::Poll { errno }
            | SocketError::Shutdown { errno, .. } => *errno,
            SocketError::InvalidAddress { .. } => libc::EINVAL,
        }
    }

    /// Maps the failure onto the engine's status vocabulary.
    pub fn classify(&self) -> IoError {
        classify_errno(self.errno())
    }
}

/// Coarse failure status returned by every engine operation.
///
/// `Timeout` and `Interrupted` are transient: the same call may be
/// retried as-is. `Closed` is terminal for the direction it was reported
/// on. `InvalidArgument` and `NotSupported` are caller errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum IoError {
    #[error("operation timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("interrupted by signal")]
    Interrupted,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("operation not supported")]
    NotSupported,

    #[error("unknown failure")]
    Unknown,
}

impl IoError {
    /// True for failures that may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, IoError::Timeout | IoError::Interrupted)
    }
}

pub type IoResult<T> = Result<T, IoError>;

/// Last known outcome of one I/O direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Success,
    Timeout,
    Closed,
    Interrupted,
    InvalidArgument,
    NotSupported,
    Unknown,
}

impl Status {
    pub fn of<T>(result: &IoResult<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(err) => Status::from(*err),
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

impl From<IoError> for Status {
    fn from(err: IoError) -> Self {
        match err {
            IoError::Timeout => Status::Timeout,
            IoError::Closed => Status::Closed,
            IoError::Interrupted => Status::Interrupted,
            IoError::InvalidArgument => Status::InvalidArgument,
            IoError::NotSupported => Status::NotSupported,
            IoError::Unknown => Status::Unknown,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Status::Success => "success",
            Status::Timeout => "timeout",
            Status::Closed => "closed",
            Status::Interrupted => "interrupted",
            Status::InvalidArgument => "invalid argument",
            Status::NotSupported => "not supported",
            Status::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Maps an errno onto the engine's status vocabulary.
pub fn classify_errno(errno: i32) -> IoError {
    match errno {
        libc::EAGAIN | libc::EINPROGRESS | libc::EALREADY | libc::ETIMEDOUT => IoError::Timeout,
        libc::EINTR => IoError::Interrupted,
        libc::ECONNREFUSED
        | libc::ECONNRESET
        | libc::ECONNABORTED
        | libc::EPIPE
        | libc::ENOTCONN
        | libc::ESHUTDOWN
        | libc::ENETRESET
        | libc::EBADF => IoError::Closed,
        libc::EINVAL | libc::EAFNOSUPPORT | libc::ENOTSOCK | libc::EDESTADDRREQ => {
            IoError::InvalidArgument
        }
        libc::EOPNOTSUPP | libc::EPROTONOSUPPORT | libc::ESOCKTNOSUPPORT => IoError::NotSupported,
        _ => IoError::Unknown,
    }
}

/// Converts errno to human-readable string.
pub(crate) fn errno_to_str(errno: i32) -> String {
    match errno {
        libc::EACCES => "permission denied".into(),
        libc::EADDRINUSE => "address already in use".into(),
        libc::EADDRNOTAVAIL => "address not available".into(),
        libc::EAFNOSUPPORT => "address family not supported".into(),
        libc::EAGAIN => "resource temporarily unavailable".into(),
        libc::EBADF => "bad file descriptor".into(),
        libc::ECONNABORTED => "connection aborted".into(),
        libc::ECONNREFUSED => "connection refused".into(),
        libc::ECONNRESET => "connection reset by peer".into(),
        libc::EINPROGRESS => "operation in progress".into(),
        libc::EINTR => "interrupted by signal".into(),
        libc::EINVAL => "invalid argument".into(),
        libc::EMFILE => "too many open files".into(),
        libc::EMSGSIZE => "message too long".into(),
        libc::ENETUNREACH => "network unreachable".into(),
        libc::ENOBUFS => "no buffer space available".into(),
        libc::ENOTCONN => "not connected".into(),
        libc::EOPNOTSUPP => "operation not supported".into(),
        libc::EPIPE => "broken pipe".into(),
        libc::ETIMEDOUT => "connection timed out".into(),
        _ => format!("errno {}", errno),
    }
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
    match errno {
        libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
        libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
        libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
        libc::EAGAIN => std::io::ErrorKind::WouldBlock,
        libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
        libc::ECONNRESET => std::io::ErrorKind::ConnectionReset,
        libc::EINTR => std::io::ErrorKind::Interrupted,
        libc::EINVAL => std::io::ErrorKind::InvalidInput,
        libc::ENOTCONN => std::io::ErrorKind::NotConnected,
        libc::EPIPE => std::io::ErrorKind::BrokenPipe,
        libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
        _ => std::io::ErrorKind::Other,
    }
}

impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        std::io::Error::new(errno_to_kind(err.errno()), err)
    }
}

impl From<IoError> for std::io::Error {
    fn from(err: IoError) -> Self {
        let kind = match err {
            IoError::Timeout => std::io::ErrorKind::TimedOut,
            IoError::Closed => std::io::ErrorKind::ConnectionReset,
            IoError::Interrupted => std::io::ErrorKind::Interrupted,
            IoError::InvalidArgument => std::io::ErrorKind::InvalidInput,
            IoError::NotSupported => std::io::ErrorKind::Unsupported,
            IoError::Unknown => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_and_reset_are_terminal() {
        assert_eq!(classify_errno(libc::ECONNREFUSED), IoError::Closed);
        assert_eq!(classify_errno(libc::ECONNRESET), IoError::Closed);
        assert_eq!(classify_errno(libc::EPIPE), IoError::Closed);
    }

    #[test]
    fn would_block_reads_as_timeout() {
        assert_eq!(classify_errno(libc::EAGAIN), IoError::Timeout);
        assert!(classify_errno(libc::EAGAIN).is_transient());
        assert!(!IoError::Closed.is_transient());
    }

    #[test]
    fn unclassified_errno_is_unknown() {
        assert_eq!(classify_errno(libc::EMFILE), IoError::Unknown);
        let err = SocketError::Accept { errno: libc::EMFILE };
        assert_eq!(err.classify(), IoError::Unknown);
        assert!(err.to_string().contains("too many open files"));
    }

    #[test]
    fn status_tracks_results() {
        let ok: IoResult<usize> = Ok(3);
        let closed: IoResult<usize> = Err(IoError::Closed);
        assert_eq!(Status::of(&ok), Status::Success);
        assert_eq!(Status::of(&closed), Status::Closed);
        assert_eq!(Status::Closed.to_string(), "closed");
    }
}
