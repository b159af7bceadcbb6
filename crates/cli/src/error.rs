use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("invalid debugger address {address}: {reason}")]
	InvalidAddress { address: String, reason: String },

	#[error("debugger discovery failed at {url}: {reason}")]
	Discovery { url: String, reason: String },

	#[error("failed to load config {path}: {source}")]
	Config {
		path: String,
		#[source]
		source: cdptun_runtime::Error,
	},

	#[error(transparent)]
	Runtime(#[from] cdptun_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Http(#[from] reqwest::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	/// Process exit code for this error.
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::InvalidAddress { .. } | CliError::Config { .. } => 2,
			_ => 1,
		}
	}
}
