#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use wirelink::{Config, ConnectorBuilder, Context, Listener, ListenerBuilder, PeerAddr, Socket, SocketAddrV4};

/// Generous bound for waits that should finish almost at once.
pub const WAIT: Option<Duration> = Some(Duration::from_secs(5));

/// Routes engine logs through the test harness. `RUST_LOG=wirelink=trace` shows them.
pub fn init_logging() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub fn context() -> Arc<Context> {
	init_logging();
	Context::new(Config { log: true, ..Config::default() })
}

/// Listener on an ephemeral loopback port.
pub fn listener(ctx: &Arc<Context>) -> Listener {
	ListenerBuilder::new(ctx)
		.read_timeout(WAIT)
		.write_timeout(WAIT)
		.bind(SocketAddrV4::localhost(0))
		.unwrap()
}

pub fn port_of(listener: &Listener) -> u16 {
	listener.local_addr().and_then(PeerAddr::port).unwrap()
}

pub fn connector(ctx: &Arc<Context>) -> ConnectorBuilder {
	ConnectorBuilder::new(ctx).timeout(WAIT).read_timeout(WAIT).write_timeout(WAIT)
}

/// A connected (client, server) pair over loopback.
pub fn pair(ctx: &Arc<Context>) -> (Socket, Socket) {
	let mut listener = listener(ctx);
	let client = connector(ctx).connect(SocketAddrV4::localhost(port_of(&listener))).unwrap();
	let server = listener.accept(WAIT).unwrap();
	(client, server)
}
