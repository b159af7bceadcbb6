use cdptun_runtime::{Supervisor, TunnelConfig};
use tracing::info;

use crate::cli::TunnelArgs;
use crate::discover::{DebuggerAddress, DiscoveringDialer};
use crate::error::Result;

pub async fn execute(args: TunnelArgs) -> Result<()> {
	let config = args.resolve_config()?;
	run(config).await
}

async fn run(config: TunnelConfig) -> Result<()> {
	let address = DebuggerAddress::parse(&config.debugger_url)?;
	let dialer = DiscoveringDialer::new(address, config.operator_url.clone())?;

	info!(
		target = "cdptun",
		debugger = %config.debugger_url,
		operator = %config.operator_url,
		title = %config.target_title,
		"starting tunnel"
	);

	let supervisor = Supervisor::new(dialer, &config);
	supervisor
		.run_until(async {
			let _ = tokio::signal::ctrl_c().await;
		})
		.await;

	info!(target = "cdptun", "tunnel stopped");
	Ok(())
}
