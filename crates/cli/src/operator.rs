//! Operator relay.
//!
//! The tunnel dials in over a WebSocket at `/`; operators submit requests as
//! JSON to `POST /relay` and get the tunneled response back as plain HTTP.
//! One tunnel is served at a time and requests go through it one by one.


use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use cdptun_protocol::{HeaderMap, TunnelRequest, TunnelResponse, ascii_text};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Default wait for a tunneled response.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(5);

/// Request headers the relay never forwards.
const STRIPPED_HEADERS: &[&str] = &["proxy-connection", "content-encoding", "content-length"];

/// Why a relayed request got no tunneled response.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RelayError {
	#[error("request body must be text")]
	NonTextBody,
	#[error("no tunnel connected")]
	NotConnected,
	#[error("tunnel disconnected")]
	Disconnected,
	#[error("timed out while waiting for response")]
	TimedOut,
	#[error("received invalid response")]
	InvalidResponse,
}

impl IntoResponse for RelayError {
	fn into_response(self) -> Response {
		error!(target = "cdptun", reason = %self, "relay failed");
		(
			StatusCode::BAD_REQUEST,
			[(CONTENT_TYPE, "text/plain")],
			format!("c2: {self}\n"),
		)
			.into_response()
	}
}

/// Body of `POST /relay`.
#[derive(Debug, Deserialize)]
pub struct RelayRequest {
	pub method: String,
	pub url: String,
	#[serde(default)]
	pub headers: HeaderMap,
	#[serde(default)]
	pub body: Option<String>,
}

impl RelayRequest {
	/// Builds the tunnel request, dropping headers the relay never forwards.
	pub fn into_tunnel_request(self) -> std::result::Result<TunnelRequest, RelayError> {
		let headers = self
			.headers
			.into_iter()
			.filter(|(name, _)| {
				let keep = !STRIPPED_HEADERS.iter().any(|s| name.eq_ignore_ascii_case(s));
				if !keep && name.eq_ignore_ascii_case("content-encoding") {
					warn!(target = "cdptun", "stripping content encoding from request");
				}
				keep
			})
			.collect();

		let body = match self.body {
			Some(body) => {
				ascii_text(body.as_bytes()).ok_or(RelayError::NonTextBody)?;
				Some(body.into_bytes())
			}
			None => None,
		};

		let mut request = TunnelRequest::new(self.method, self.url);
		request.head.headers = headers;
		if let Some(body) = body {
			request = request.body(body);
		}
		Ok(request)
	}
}

/// The connected tunnel: frames to it, frames from it.
struct TunnelLink {
	sender: mpsc::UnboundedSender<Vec<u8>>,
	receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

pub struct RelayState {
	tunnel_connected: AtomicBool,
	/// Held for the whole exchange so requests go through one at a time.
	tunnel: Mutex<Option<TunnelLink>>,
	timeout: Duration,
}

type SharedState = Arc<RelayState>;

impl RelayState {
	pub fn new(timeout: Duration) -> Self {
		Self {
			tunnel_connected: AtomicBool::new(false),
			tunnel: Mutex::new(None),
			timeout,
		}
	}

	pub fn is_tunnel_connected(&self) -> bool {
		self.tunnel_connected.load(Ordering::SeqCst)
	}

	/// Sends one request through the tunnel and waits for its reply.
	pub async fn relay(&self, request: TunnelRequest) -> std::result::Result<TunnelResponse, RelayError> {
		let frame = request.to_frame().map_err(|_| RelayError::InvalidResponse)?;

		let mut guard = self.tunnel.lock().await;
		let Some(link) = guard.as_mut() else {
			return Err(RelayError::NotConnected);
		};

		// replies that arrived after an earlier timeout
		while let Ok(stale) = link.receiver.try_recv() {
			debug!(target = "cdptun", len = stale.len(), "discarding stale reply");
		}

		info!(target = "cdptun", method = %request.head.method, url = %request.head.url, "relaying request");
		if link.sender.send(frame).is_err() {
			*guard = None;
			return Err(RelayError::Disconnected);
		}

		match tokio::time::timeout(self.timeout, link.receiver.recv()).await {
			Ok(Some(reply)) => TunnelResponse::from_frame(&reply).map_err(|e| {
				warn!(target = "cdptun", error = %e, "undecodable reply");
				RelayError::InvalidResponse
			}),
			Ok(None) => {
				*guard = None;
				Err(RelayError::Disconnected)
			}
			Err(_) => Err(RelayError::TimedOut),
		}
	}
}

/// Converts a tunneled response into the relay's HTTP answer.
pub fn into_http(response: TunnelResponse) -> Response {
	let Ok(status) = StatusCode::from_u16(response.head.code) else {
		return RelayError::InvalidResponse.into_response();
	};

	let cookies = response.set_cookie_values();
	let mut http_response = Response::new(Body::from(response.body.unwrap_or_default()));
	*http_response.status_mut() = status;

	let headers = http_response.headers_mut();
	for (name, value) in &response.head.headers {
		match (
			HeaderName::from_bytes(name.as_bytes()),
			HeaderValue::from_str(value),
		) {
			(Ok(name), Ok(value)) => {
				headers.insert(name, value);
			}
			_ => warn!(target = "cdptun", header = %name, "dropping unrepresentable header"),
		}
	}
	for cookie in cookies {
		match HeaderValue::from_str(&cookie) {
			Ok(value) => {
				headers.append(SET_COOKIE, value);
			}
			Err(_) => warn!(target = "cdptun", "dropping unrepresentable cookie"),
		}
	}
	http_response
}

pub fn router(state: SharedState) -> Router {
	Router::new()
		.route(
			"/",
			get(
				|ws: WebSocketUpgrade, State(state): State<SharedState>| async move {
					ws.on_upgrade(|socket| handle_tunnel_socket(socket, state))
				},
			),
		)
		.route("/relay", post(relay_handler))
		.route(
			"/status",
			get(|State(state): State<SharedState>| async move {
				Json(serde_json::json!({ "tunnel_connected": state.is_tunnel_connected() }))
			}),
		)
		.with_state(state)
}

async fn relay_handler(
	State(state): State<SharedState>,
	Json(request): Json<RelayRequest>,
) -> std::result::Result<Response, RelayError> {
	let request = request.into_tunnel_request()?;
	let response = state.relay(request).await?;
	Ok(into_http(response))
}

/// Serves the relay on an already bound listener.
pub async fn serve(listener: TcpListener, timeout: Duration) -> Result<()> {
	let state = Arc::new(RelayState::new(timeout));
	axum::serve(listener, router(state).into_make_service())
		.await
		.context("Operator relay error")
}

pub async fn run_operator(listen: SocketAddr, timeout: Duration) -> Result<()> {
	info!(target = "cdptun", %listen, "starting operator relay");

	let listener = TcpListener::bind(listen)
		.await
		.with_context(|| format!("Failed to bind operator relay to {listen}"))?;

	serve(listener, timeout).await
}

async fn handle_tunnel_socket(socket: WebSocket, state: SharedState) {
	if state.tunnel_connected.swap(true, Ordering::SeqCst) {
		warn!(target = "cdptun", "rejecting second tunnel connection");
		return;
	}
	info!(target = "cdptun", "tunnel connected");

	let (to_tunnel_tx, to_tunnel_rx) = mpsc::unbounded_channel();
	let (from_tunnel_tx, from_tunnel_rx) = mpsc::unbounded_channel();
	*state.tunnel.lock().await = Some(TunnelLink {
		sender: to_tunnel_tx,
		receiver: from_tunnel_rx,
	});

	let mut outgoing = UnboundedReceiverStream::new(to_tunnel_rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(frame) = outgoing.next().await {
			if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		let frame = match msg {
			Ok(Message::Binary(bytes)) => bytes.to_vec(),
			Ok(Message::Text(text)) => text.as_str().as_bytes().to_vec(),
			Ok(Message::Close(_)) => break,
			Ok(_) => continue,
			Err(err) => {
				warn!(target = "cdptun", error = %err, "tunnel websocket error");
				break;
			}
		};
		if from_tunnel_tx.send(frame).is_err() {
			break;
		}
	}

	send_task.abort();
	// an in-flight relay sees the link end and releases the lock
	drop(from_tunnel_tx);
	*state.tunnel.lock().await = None;
	state.tunnel_connected.store(false, Ordering::SeqCst);
	info!(target = "cdptun", "tunnel disconnected");
}
