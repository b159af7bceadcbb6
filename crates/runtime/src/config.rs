//! Tunnel configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for one tunnel process. Every field has a default, so a config
/// file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
	/// DevTools WebSocket endpoint, or an `http://host:port` DevTools address.
	#[serde(default = "default_debugger_url")]
	pub debugger_url: String,
	/// Operator relay WebSocket endpoint.
	#[serde(default = "default_operator_url")]
	pub operator_url: String,
	/// Title of the page target to attach to.
	#[serde(default = "default_target_title")]
	pub target_title: String,
	#[serde(default = "default_command_timeout_ms")]
	pub command_timeout_ms: u64,
	/// Deadline for the response-stage pause of a tunneled request.
	#[serde(default = "default_response_timeout_ms")]
	pub response_timeout_ms: u64,
	#[serde(default = "default_reconnect_delay_ms")]
	pub reconnect_delay_ms: u64,
}

fn default_debugger_url() -> String {
	"http://127.0.0.1:9222".into()
}
fn default_operator_url() -> String {
	"ws://127.0.0.1:9000".into()
}
fn default_target_title() -> String {
	"smarthome demo".into()
}
fn default_command_timeout_ms() -> u64 {
	4000
}
fn default_response_timeout_ms() -> u64 {
	2000
}
fn default_reconnect_delay_ms() -> u64 {
	5000
}

impl Default for TunnelConfig {
	fn default() -> Self {
		Self {
			debugger_url: default_debugger_url(),
			operator_url: default_operator_url(),
			target_title: default_target_title(),
			command_timeout_ms: default_command_timeout_ms(),
			response_timeout_ms: default_response_timeout_ms(),
			reconnect_delay_ms: default_reconnect_delay_ms(),
		}
	}
}

impl TunnelConfig {
	/// Loads a JSON config file. Missing keys take their defaults.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let text = std::fs::read_to_string(path.as_ref())?;
		let config = serde_json::from_str(&text)?;
		Ok(config)
	}

	pub fn command_timeout(&self) -> Duration {
		Duration::from_millis(self.command_timeout_ms)
	}

	pub fn response_timeout(&self) -> Duration {
		Duration::from_millis(self.response_timeout_ms)
	}

	pub fn reconnect_delay(&self) -> Duration {
		Duration::from_millis(self.reconnect_delay_ms)
	}
}
