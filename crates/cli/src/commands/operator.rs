use std::time::Duration;

use crate::cli::OperatorArgs;
use crate::error::Result;
use crate::operator::run_operator;

pub async fn execute(args: OperatorArgs) -> Result<()> {
	run_operator(args.listen, Duration::from_millis(args.timeout_ms)).await?;
	Ok(())
}
