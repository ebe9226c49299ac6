use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{IoError, IoResult};
use crate::secure::SecureBackend;

/// Engine-wide tuning and defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// Longest single OS wait before the deadline is re-checked. `None` waits the full remaining time.
    pub restart_slice: Option<Duration>,
    /// Linger applied on graceful close when the socket has no close timeout.
    pub linger: Duration,
    /// Wait slice used while datagram sockets are probed one by one in a multi-handle wait.
    pub datagram_slice: Duration,
    /// Default for draining inbound data while waiting to write.
    pub read_on_write: bool,
    /// Default for surfacing signal interruption instead of restarting waits.
    pub interrupt_on_signal: bool,
    /// Default for per-socket lifecycle and data logging.
    pub log: bool,
    /// Upper bound on one transport pull.
    pub read_chunk: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            restart_slice: None,
            linger: Duration::from_secs(10),
            datagram_slice: Duration::from_millis(10),
            read_on_write: false,
            interrupt_on_signal: false,
            log: false,
            read_chunk: 16 * 1024,
        }
    }
}

/// Process-lifetime engine state, shared by every socket built from it.
///
/// Holds the configuration, the installed secure backend, the cached local
/// host address and the socket id counter. The backend and the address
/// cache sit behind the only locks the engine takes; per-socket I/O never
/// touches them.
pub struct Context {
    config: Config,
    secure: Mutex<Option<Arc<dyn SecureBackend>>>,
    local_host: Mutex<Option<IpAddr>>,
    next_id: AtomicU64,
}

impl Context {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            secure: Mutex::new(None),
            local_host: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Installs `backend`, calling its `init` under the lock.
    ///
    /// A previously installed backend gets its `exit` called first.
    pub fn install_secure(&self, backend: Arc<dyn SecureBackend>) -> IoResult<()> {
        let mut slot = self.secure.lock();
        if let Some(old) = slot.take() {
            old.exit();
        }
        backend.init().inspect_err(|err| {
            tracing::warn!(error = %err, "secure backend failed to initialize");
        })?;
        *slot = Some(backend);
        Ok(())
    }

    /// Uninstalls the current backend, if any.
    pub fn remove_secure(&self) {
        if let Some(old) = self.secure.lock().take() {
            old.exit();
        }
    }

    pub fn has_secure(&self) -> bool {
        self.secure.lock().is_some()
    }

    pub(crate) fn secure_backend(&self) -> IoResult<Arc<dyn SecureBackend>> {
        self.secure.lock().clone().ok_or(IoError::NotSupported)
    }

    /// Returns the host's primary address, resolving it on first use.
    ///
    /// Falls back to loopback when the host name does not resolve.
    pub fn local_host_address(&self, refresh: bool) -> IpAddr {
        let mut cached = self.local_host.lock();
        if !refresh {
            if let Some(addr) = *cached {
                return addr;
            }
        }
        let addr = resolve_host_name().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        *cached = Some(addr);
        addr
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(backend) = self.secure.get_mut().take() {
            backend.exit();
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("secure", &self.has_secure())
            .finish_non_exhaustive()
    }
}

fn resolve_host_name() -> Option<IpAddr> {
    use std::net::ToSocketAddrs;

    let mut name = [0u8; 256];
    let rc = unsafe { libc::gethostname(name.as_mut_ptr() as *mut libc::c_char, name.len()) };
    if rc == -1 {
        return None;
    }
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    let host = std::str::from_utf8(&name[..end]).ok()?;
    let addrs: Vec<_> = (host, 0).to_socket_addrs().ok()?.map(|a| a.ip()).collect();
    addrs
        .iter()
        .copied()
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .or_else(|| addrs.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure::{SecureSession, SessionContext};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        inits: AtomicUsize,
        exits: AtomicUsize,
    }

    impl SecureBackend for Counting {
        fn init(&self) -> IoResult<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn create(&self, _ctx: &SessionContext<'_>) -> IoResult<Box<dyn SecureSession>> {
            Err(IoError::NotSupported)
        }

        fn exit(&self) {
            self.exits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn backend_lifecycle() {
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());
        let ctx = Context::new(Config::default());
        assert!(ctx.secure_backend().is_err());

        ctx.install_secure(first.clone()).unwrap();
        ctx.install_secure(second.clone()).unwrap();
        assert_eq!(first.inits.load(Ordering::SeqCst), 1);
        assert_eq!(first.exits.load(Ordering::SeqCst), 1);

        drop(ctx);
        assert_eq!(second.inits.load(Ordering::SeqCst), 1);
        assert_eq!(second.exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ids_increase() {
        let ctx = Context::new(Config::default());
        let a = ctx.next_id();
        let b = ctx.next_id();
        assert!(b > a);
    }

    #[test]
    fn local_host_is_cached() {
        let ctx = Context::new(Config::default());
        let first = ctx.local_host_address(false);
        assert_eq!(ctx.local_host_address(false), first);
    }
}
