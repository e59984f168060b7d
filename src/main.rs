//! Credential broker service binary.
//!
//! Usage: `credential-broker [--config <path>]`.

// std
use std::env;
// crates.io
use color_eyre::eyre::{Result, WrapErr};
use time::UtcOffset;
use tokio::{net::TcpListener, runtime::Builder};
// self
use credential_broker::service::{self, Config, ServiceState};

fn main() -> Result<()> {
	color_eyre::install()?;

	// The local offset can only be determined while the process is single-threaded.
	let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

	Builder::new_multi_thread().enable_all().build()?.block_on(run(offset))
}

async fn run(offset: UtcOffset) -> Result<()> {
	service::init_tracing().wrap_err("failed to install tracing subscriber")?;

	let args = env::args().collect::<Vec<_>>();
	let cli_path =
		args.iter().position(|a| a == "--config").and_then(|i| args.get(i + 1)).map(String::as_str);
	let path = Config::resolve_path(cli_path);
	let config = Config::load(&path)
		.wrap_err_with(|| format!("failed to load configuration from {}", path.display()))?;
	let broker = config.build_broker().wrap_err("failed to build broker")?;
	let listener = TcpListener::bind(config.listen_addr)
		.await
		.wrap_err_with(|| format!("failed to bind {}", config.listen_addr))?;

	tracing::info!(
		addr = %listener.local_addr()?,
		identities = broker.identity_count(),
		"credential broker listening"
	);

	service::serve(listener, ServiceState::new(broker, offset), service::shutdown_signal())
		.await
		.wrap_err("server terminated abnormally")?;

	tracing::info!("shutdown complete");

	Ok(())
}
