use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Maps `-v` occurrences to a default filter. `RUST_LOG` wins when set.
pub fn filter_for(verbosity: u8) -> &'static str {
	// 0 = warnings only, reconnect chatter stays hidden
	// 1 (-v) = lifecycle and per-request info
	// 2+ (-vv) = every protocol message
	match verbosity {
		0 => "warn",
		1 => "info,cdptun_runtime=info,cdptun_cli=info",
		_ => "debug",
	}
}

pub fn init_logging(verbosity: u8) {
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(verbosity > 1)
		.compact()
		.init();
}
