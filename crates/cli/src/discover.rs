//! Debugger endpoint discovery.
//!
//! A browser started with `--remote-debugging-port` publishes its WebSocket
//! endpoint at `/json/version`. The endpoint embeds a browser id that changes
//! on every restart, so the tunnel resolves it again before each connect.

use std::time::Duration;

use async_trait::async_trait;
use cdptun_runtime::{Dialer, TransportParts, WebSocketTransport};
use serde::Deserialize;
use url::Url;

use crate::error::{CliError, Result};

/// `/json/version` response subset.
#[derive(Debug, Deserialize)]
pub struct VersionInfo {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser", default)]
	pub browser: Option<String>,
}

/// Where to find the debugging socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerAddress {
	/// A `ws://` or `wss://` endpoint, used as is.
	WebSocket(Url),
	/// An `http://` or `https://` DevTools address to query.
	DevTools(Url),
}

impl DebuggerAddress {
	pub fn parse(address: &str) -> Result<Self> {
		let url = Url::parse(address).map_err(|e| CliError::InvalidAddress {
			address: address.to_string(),
			reason: e.to_string(),
		})?;
		match url.scheme() {
			"ws" | "wss" => Ok(DebuggerAddress::WebSocket(url)),
			"http" | "https" => Ok(DebuggerAddress::DevTools(url)),
			other => Err(CliError::InvalidAddress {
				address: address.to_string(),
				reason: format!("unsupported scheme {other}"),
			}),
		}
	}

	/// Returns the WebSocket endpoint, querying the browser if needed.
	pub async fn resolve(&self, client: &reqwest::Client) -> Result<String> {
		match self {
			DebuggerAddress::WebSocket(url) => Ok(url.to_string()),
			DebuggerAddress::DevTools(base) => fetch_version(client, base)
				.await
				.map(|info| info.web_socket_debugger_url),
		}
	}
}

/// Queries `/json/version` under `base`.
pub async fn fetch_version(client: &reqwest::Client, base: &Url) -> Result<VersionInfo> {
	let url = base.join("/json/version").map_err(|e| CliError::InvalidAddress {
		address: base.to_string(),
		reason: e.to_string(),
	})?;
	let discovery = |reason: String| CliError::Discovery {
		url: url.to_string(),
		reason,
	};

	let response = client
		.get(url.clone())
		.send()
		.await
		.map_err(|e| discovery(e.to_string()))?;
	if !response.status().is_success() {
		return Err(discovery(format!("unexpected status {}", response.status())));
	}

	let info: VersionInfo = response
		.json()
		.await
		.map_err(|e| discovery(format!("invalid response: {e}")))?;
	tracing::debug!(
		browser = info.browser.as_deref().unwrap_or("unknown"),
		endpoint = %info.web_socket_debugger_url,
		"discovered debugger"
	);
	Ok(info)
}

/// Dials the debugger (with discovery) and the operator relay.
pub struct DiscoveringDialer {
	debugger: DebuggerAddress,
	operator_url: String,
	client: reqwest::Client,
}

impl DiscoveringDialer {
	pub fn new(debugger: DebuggerAddress, operator_url: impl Into<String>) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(2))
			.build()?;
		Ok(Self {
			debugger,
			operator_url: operator_url.into(),
			client,
		})
	}
}

#[async_trait]
impl Dialer for DiscoveringDialer {
	async fn dial_debugger(&self) -> cdptun_runtime::Result<TransportParts<String>> {
		let endpoint = self.debugger.resolve(&self.client).await.map_err(|e| {
			cdptun_runtime::Error::ConnectionFailed {
				url: match &self.debugger {
					DebuggerAddress::WebSocket(url) | DebuggerAddress::DevTools(url) => url.to_string(),
				},
				reason: e.to_string(),
			}
		})?;
		WebSocketTransport::connect(&endpoint).await
	}

	async fn dial_operator(&self) -> cdptun_runtime::Result<TransportParts<Vec<u8>>> {
		WebSocketTransport::connect(&self.operator_url).await
	}
}
