//! Fabricates HTTP requests inside the attached page.
//!
//! The page cannot issue arbitrary cross-origin requests itself, so each
//! tunnel request is driven through a throwaway `<iframe>`:
//!
//! 1. An iframe pointed at the target URL is inserted with `Runtime.evaluate`.
//! 2. The navigation is paused at the request stage by `Fetch` interception.
//! 3. The paused request is continued with the operator's method, headers and
//!    body, which pauses it again at the response stage.
//! 4. Status, headers and body are read, the navigation is failed so the page
//!    never renders it, and the iframe is removed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cdptun_protocol::cdp::{RequestPaused, ResponseBody, methods};
use cdptun_protocol::{
	ResponseHead, TunnelRequest, TunnelResponse, ascii_text, extract_cookies,
	normalize_request_headers, normalize_response_headers, to_header_entries,
};
use serde_json::{Value, json};

use crate::connection::Connection;
use crate::error::{Error, Result};

/// Default deadline for the response-stage pause.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Something that can turn a [`TunnelRequest`] into a [`TunnelResponse`].
#[async_trait]
pub trait RequestExecutor: Send + Sync {
	async fn execute(&self, request: TunnelRequest) -> Result<TunnelResponse>;
}

/// Executes requests through an attached browser page.
pub struct BrowserExecutor {
	connection: Arc<Connection>,
	session_id: String,
	response_timeout: Duration,
	frame_seq: AtomicU64,
}

/// Response-stage pause plus the body fetched for it.
struct Captured {
	paused: RequestPaused,
	body: ResponseBody,
}

impl BrowserExecutor {
	pub fn new(connection: Arc<Connection>, session_id: impl Into<String>) -> Self {
		Self {
			connection,
			session_id: session_id.into(),
			response_timeout: DEFAULT_RESPONSE_TIMEOUT,
			frame_seq: AtomicU64::new(0),
		}
	}

	pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
		self.response_timeout = timeout;
		self
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	fn next_frame_id(&self) -> String {
		let n = self.frame_seq.fetch_add(1, Ordering::Relaxed) + 1;
		format!("tunnel-frame-{n}")
	}

	async fn evaluate(&self, expression: String) -> Result<Value> {
		let result = self
			.connection
			.send_command(
				methods::RUNTIME_EVALUATE,
				json!({ "expression": expression, "returnByValue": true }),
				Some(&self.session_id),
			)
			.await?;

		if let Some(details) = result.get("exceptionDetails") {
			let text = details
				.pointer("/exception/description")
				.or_else(|| details.get("text"))
				.and_then(Value::as_str)
				.unwrap_or("exception");
			return Err(Error::ProtocolError(format!(
				"{} error: {text}",
				methods::RUNTIME_EVALUATE
			)));
		}
		Ok(result)
	}

	/// Inserts a hidden iframe whose navigation targets `url`.
	async fn open_frame(&self, frame_id: &str, url: &str) -> Result<()> {
		let id = serde_json::to_string(frame_id)?;
		let src = serde_json::to_string(url)?;
		let expression = format!(
			"(() => {{ const f = document.createElement('iframe'); f.id = {id}; \
			 f.style.display = 'none'; document.body.appendChild(f); f.src = {src}; \
			 return f.id; }})()"
		);
		self.evaluate(expression).await?;
		tracing::debug!(frame = frame_id, url, "navigating iframe");
		Ok(())
	}

	/// Removes the iframe. Failures are logged only.
	async fn close_frame(&self, frame_id: &str) {
		let id = match serde_json::to_string(frame_id) {
			Ok(id) => id,
			Err(e) => {
				tracing::warn!(frame = frame_id, error = %e, "could not quote frame id");
				return;
			}
		};
		let expression =
			format!("(() => {{ const f = document.getElementById({id}); if (f) f.remove(); }})()");
		if let Err(e) = self.evaluate(expression).await {
			tracing::warn!(frame = frame_id, error = %e, "failed to remove iframe");
		}
	}

	/// Runs the interception round trip up to and including `Fetch.failRequest`.
	async fn intercept(&self, frame_id: &str, request: &TunnelRequest) -> Result<Captured> {
		let session = Some(self.session_id.as_str());

		let request_paused =
			self.connection
				.subscribe_matching(methods::FETCH_REQUEST_PAUSED, None, is_request_stage);
		self.open_frame(frame_id, &request.head.url).await?;

		tracing::debug!("waiting for request");
		let paused: RequestPaused = serde_json::from_value(request_paused.wait().await?)?;
		tracing::debug!(request_id = %paused.request_id, "intercepted request");

		let headers = normalize_request_headers(&request.head.headers);
		let mut params = json!({
			"requestId": paused.request_id,
			"method": request.head.method,
			"url": request.head.url,
			"headers": to_header_entries(&headers),
		});
		if let Some(body) = request.body.as_deref() {
			let text = ascii_text(body).ok_or_else(|| Error::NonTextBody {
				offset: body.iter().position(|b| !b.is_ascii()).unwrap_or_default(),
			})?;
			params["postData"] = Value::String(text.to_string());
		}

		let response_paused = self.connection.subscribe_matching(
			methods::FETCH_REQUEST_PAUSED,
			Some(self.response_timeout),
			|params| !is_request_stage(params),
		);
		self.connection
			.send_and_forget(methods::FETCH_CONTINUE_REQUEST, params, session)?;

		tracing::debug!("waiting for response");
		let paused: RequestPaused = serde_json::from_value(response_paused.wait().await?)?;
		check_response_stage(&paused)?;
		tracing::debug!(
			request_id = %paused.request_id,
			status = paused.response_status_code.unwrap_or_default(),
			"got response"
		);

		let body = self
			.connection
			.send_command(
				methods::FETCH_GET_RESPONSE_BODY,
				json!({ "requestId": paused.request_id }),
				session,
			)
			.await?;
		let body: ResponseBody = serde_json::from_value(body)?;

		self.connection.send_and_forget(
			methods::FETCH_FAIL_REQUEST,
			json!({ "requestId": paused.request_id, "errorReason": "Failed" }),
			session,
		)?;

		Ok(Captured { paused, body })
	}
}

#[async_trait]
impl RequestExecutor for BrowserExecutor {
	async fn execute(&self, request: TunnelRequest) -> Result<TunnelResponse> {
		tracing::info!(method = %request.head.method, url = %request.head.url, "tunnel request");

		let frame_id = self.next_frame_id();
		let outcome = self.intercept(&frame_id, &request).await;
		self.close_frame(&frame_id).await;

		let response = outcome?.into_response()?;
		tracing::info!(
			url = %request.head.url,
			code = response.head.code,
			body_len = response.body.as_ref().map_or(0, Vec::len),
			"tunnel response"
		);
		Ok(response)
	}
}

/// Request-stage pauses carry none of the `response*` fields. A response-stage
/// pause that outlived its own wait must not be taken for the next request.
fn is_request_stage(params: &Value) -> bool {
	RESPONSE_FIELDS.iter().all(|field| params.get(field).is_none())
}

const RESPONSE_FIELDS: [&str; 3] = ["responseStatusCode", "responseHeaders", "responseErrorReason"];

/// Rejects response-stage pauses that carry no usable response.
fn check_response_stage(paused: &RequestPaused) -> Result<()> {
	if let Some(reason) = paused.response_error_reason.as_deref().filter(|r| !r.is_empty()) {
		return Err(Error::Network(reason.to_string()));
	}
	match (paused.response_status_code, &paused.response_headers) {
		(Some(code), Some(_)) if code != 0 => Ok(()),
		_ => Err(Error::Network("unknown".to_string())),
	}
}

impl Captured {
	fn into_response(self) -> Result<TunnelResponse> {
		let body = decode_body(self.body)?;
		let headers = self
			.paused
			.response_headers
			.as_deref()
			.map(normalize_response_headers)
			.unwrap_or_default();

		Ok(TunnelResponse {
			head: ResponseHead {
				code: self.paused.response_status_code.unwrap_or_default(),
				headers,
				cookies: extract_cookies(&self.paused.request.headers),
			},
			body,
		})
	}
}

/// Empty bodies become `None`; base64-flagged bodies are decoded.
fn decode_body(body: ResponseBody) -> Result<Option<Vec<u8>>> {
	if body.body.is_empty() {
		return Ok(None);
	}
	if body.base64_encoded {
		return Ok(Some(STANDARD.decode(body.body.as_bytes())?));
	}
	Ok(Some(body.body.into_bytes()))
}

#[cfg(test)]
mod tests {
	use cdptun_protocol::HeaderEntry;

	use super::*;

	fn paused(value: Value) -> RequestPaused {
		serde_json::from_value(value).unwrap()
	}

	#[test]
	fn response_stage_requires_status_and_headers() {
		let ok = paused(json!({
			"requestId": "R",
			"request": {"url": "http://a/", "method": "GET", "headers": {}},
			"responseStatusCode": 204,
			"responseHeaders": []
		}));
		assert!(check_response_stage(&ok).is_ok());

		let failed = paused(json!({
			"requestId": "R",
			"request": {"url": "http://a/", "method": "GET", "headers": {}},
			"responseErrorReason": "NameNotResolved"
		}));
		assert_eq!(
			check_response_stage(&failed).unwrap_err().to_string(),
			"network error: NameNotResolved"
		);

		let missing = paused(json!({
			"requestId": "R",
			"request": {"url": "http://a/", "method": "GET", "headers": {}},
			"responseStatusCode": 200
		}));
		assert_eq!(
			check_response_stage(&missing).unwrap_err().to_string(),
			"network error: unknown"
		);
	}

	#[test]
	fn stage_is_told_apart_by_response_fields() {
		assert!(is_request_stage(&json!({"requestId": "R", "request": {}})));
		assert!(!is_request_stage(&json!({"requestId": "R", "responseStatusCode": 200})));
		assert!(!is_request_stage(&json!({"requestId": "R", "responseErrorReason": "Aborted"})));
	}

	#[tokio::test]
	async fn late_response_pause_does_not_satisfy_next_request() {
		let (ours, theirs) = crate::transport::memory_pair::<String>();
		let connection = Arc::new(Connection::new(ours));
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });
		let (browser_tx, _browser_rx) = theirs.into_parts();

		let request_paused =
			connection.subscribe_matching(methods::FETCH_REQUEST_PAUSED, None, is_request_stage);
		for params in [
			json!({"requestId": "job-1.0", "responseStatusCode": 200, "responseHeaders": []}),
			json!({"requestId": "job-2.0", "request": {"url": "http://a/", "method": "GET", "headers": {}}}),
		] {
			browser_tx
				.send(json!({"method": methods::FETCH_REQUEST_PAUSED, "params": params}).to_string())
				.unwrap();
		}

		let paused: RequestPaused = serde_json::from_value(request_paused.wait().await.unwrap()).unwrap();
		assert_eq!(paused.request_id, "job-2.0");
	}

	#[test]
	fn body_decoding() {
		let empty = ResponseBody {
			body: String::new(),
			base64_encoded: true,
		};
		assert_eq!(decode_body(empty).unwrap(), None);

		let encoded = ResponseBody {
			body: "AP8=".into(),
			base64_encoded: true,
		};
		assert_eq!(decode_body(encoded).unwrap(), Some(vec![0x00, 0xff]));

		let text = ResponseBody {
			body: "héllo".into(),
			base64_encoded: false,
		};
		assert_eq!(decode_body(text).unwrap(), Some("héllo".as_bytes().to_vec()));

		let bad = ResponseBody {
			body: "***".into(),
			base64_encoded: true,
		};
		assert!(matches!(decode_body(bad), Err(Error::BodyDecode(_))));
	}

	#[test]
	fn captured_response_is_normalized() {
		let captured = Captured {
			paused: paused(json!({
				"requestId": "R",
				"request": {
					"url": "http://a/",
					"method": "GET",
					"headers": {"Cookie": "sid=abc; theme=dark"}
				},
				"responseStatusCode": 200,
				"responseHeaders": [
					HeaderEntry::new("Content-Type", "text/html"),
					HeaderEntry::new("Content-Length", "5"),
				]
			})),
			body: ResponseBody {
				body: "hello".into(),
				base64_encoded: false,
			},
		};

		let response = captured.into_response().unwrap();
		assert_eq!(response.head.code, 200);
		assert_eq!(response.head.headers.len(), 1);
		assert_eq!(response.head.headers["content-type"], "text/html");
		assert_eq!(response.head.cookies["sid"], "abc");
		assert_eq!(response.head.cookies["theme"], "dark");
		assert_eq!(response.body.as_deref(), Some(&b"hello"[..]));
	}
}
