use std::path::Path;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
	fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

const DEBUG_LOG_FILTER: &str = "wb_core=debug,wb_relist=debug,warn";

/// Filter in use until the config is loaded, in release builds.
const STARTUP_LOG_FILTER: &str = "info";

/// Installed logging. Keep it alive, dropping it flushes and stops the file writer.
pub struct Logging {
	_guard: WorkerGuard,
	filter: reload::Handle<EnvFilter, Registry>,
	/// Neither `RUST_LOG` nor a debug build picked the filter, so the config does
	follows_config: bool,
}

impl Logging {
	/// Switches to `log_level` from the config, unless the filter came from
	/// `RUST_LOG` or a debug build.
	pub fn apply_log_level(&self, log_level: &str) -> Result<()> {
		if !self.follows_config {
			return Ok(());
		}

		let filter = EnvFilter::try_new(log_level)
			.with_context(|| format!("Invalid log level in config: {log_level}"))?;

		self.filter
			.reload(filter)
			.context("Failed to apply log level from config")
	}
}

/// Logs to stderr and to a daily rotated file under `<data_dir>/logs`.
///
/// Installed before the config is read so loading it gets logged too. `RUST_LOG` wins
/// over everything; otherwise debug builds are verbose for our crates and release
/// builds start at info until [`Logging::apply_log_level`] is called.
pub fn init(data_dir: &Path) -> Result<Logging> {
	let (subscriber, logging) = build(data_dir)?;

	subscriber
		.try_init()
		.context("Failed to initialize tracing")?;

	Ok(logging)
}

fn build(data_dir: &Path) -> Result<(impl Subscriber + Send + Sync + 'static, Logging)> {
	let logs_dir = data_dir.join("logs");
	std::fs::create_dir_all(&logs_dir)
		.with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;

	let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(logs_dir, "relist.log"));

	let (filter, follows_config) = match EnvFilter::try_from_default_env() {
		Ok(filter) => (filter, false),
		Err(_) if cfg!(debug_assertions) => (EnvFilter::try_new(DEBUG_LOG_FILTER)?, false),
		Err(_) => (EnvFilter::try_new(STARTUP_LOG_FILTER)?, true),
	};
	let (filter, handle) = reload::Layer::new(filter);

	let subscriber = tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_target(true).with_writer(std::io::stderr))
		.with(
			fmt::layer()
				.with_target(true)
				.with_ansi(false)
				.with_writer(file_writer),
		);

	Ok((
		subscriber,
		Logging {
			_guard: guard,
			filter: handle,
			follows_config,
		},
	))
}
