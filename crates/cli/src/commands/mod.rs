mod operator;
mod tunnel;

use crate::cli::{Cli, Commands};
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Tunnel(args) => tunnel::execute(args).await,
		Commands::Operator(args) => operator::execute(args).await,
	}
}
