use std::net::SocketAddr;
use std::path::PathBuf;

use cdptun_runtime::TunnelConfig;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::error::{CliError, Result};

#[derive(Parser, Debug)]
#[command(name = "cdptun")]
#[command(about = "Tunnel HTTP requests through a remote browser's debugging protocol")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Attach to a browser page and serve tunnel requests from the operator relay
	Tunnel(TunnelArgs),

	/// Run the operator relay that tunnels connect to
	Operator(OperatorArgs),
}

#[derive(Args, Debug, Default)]
pub struct TunnelArgs {
	/// DevTools WebSocket URL, or an http://host:port address to discover it from
	#[arg(long, value_name = "URL")]
	pub debugger: Option<String>,

	/// Operator relay WebSocket URL
	#[arg(long, value_name = "URL")]
	pub operator: Option<String>,

	/// JSON config file; flags override its values
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Title of the page to attach to
	#[arg(long, value_name = "TITLE")]
	pub target_title: Option<String>,

	/// Delay between reconnect attempts
	#[arg(long, value_name = "MS")]
	pub reconnect_delay_ms: Option<u64>,
}

impl TunnelArgs {
	/// Loads the config file, if any, and applies flag overrides.
	pub fn resolve_config(&self) -> Result<TunnelConfig> {
		let mut config = match &self.config {
			Some(path) => TunnelConfig::from_file(path).map_err(|source| CliError::Config {
				path: path.display().to_string(),
				source,
			})?,
			None => TunnelConfig::default(),
		};

		if let Some(debugger) = &self.debugger {
			config.debugger_url = debugger.clone();
		}
		if let Some(operator) = &self.operator {
			config.operator_url = operator.clone();
		}
		if let Some(title) = &self.target_title {
			config.target_title = title.clone();
		}
		if let Some(delay) = self.reconnect_delay_ms {
			config.reconnect_delay_ms = delay;
		}
		Ok(config)
	}
}

#[derive(Args, Debug)]
pub struct OperatorArgs {
	/// Address to accept the tunnel and relay requests on
	#[arg(long, value_name = "ADDR", default_value = "0.0.0.0:9000")]
	pub listen: SocketAddr,

	/// How long to wait for a tunneled response
	#[arg(long, value_name = "MS", default_value_t = 5000)]
	pub timeout_ms: u64,
}
