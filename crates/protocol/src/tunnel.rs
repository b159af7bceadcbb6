//! Tunnel request/response messages carried in operator frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::frame::{self, FrameError};

/// Header names to values. Keys are lowercase once normalized.
pub type HeaderMap = BTreeMap<String, String>;

/// Cookie names to values.
pub type CookieMap = BTreeMap<String, String>;

/// Status code of the response sent in place of a failed tunnel request.
pub const ERROR_STATUS: u16 = 400;

/// JSON head of a request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHead {
	pub method: String,
	pub url: String,
	#[serde(default)]
	pub headers: HeaderMap,
}

/// An HTTP request to fabricate inside the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
	pub head: RequestHead,
	/// Text-only; `None` when the frame carried no payload.
	pub body: Option<Vec<u8>>,
}

impl TunnelRequest {
	pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			head: RequestHead {
				method: method.into(),
				url: url.into(),
				headers: HeaderMap::new(),
			},
			body: None,
		}
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.head.headers.insert(name.into(), value.into());
		self
	}

	pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
		let body = body.into();
		self.body = (!body.is_empty()).then_some(body);
		self
	}

	pub fn from_frame(bytes: &[u8]) -> Result<Self, FrameError> {
		let (head, body) = frame::decode_as(bytes)?;
		Ok(Self { head, body })
	}

	pub fn to_frame(&self) -> Result<Vec<u8>, FrameError> {
		frame::encode_as(&self.head, self.body.as_deref())
	}
}

/// JSON head of a response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHead {
	pub code: u16,
	#[serde(default)]
	pub headers: HeaderMap,
	#[serde(default)]
	pub cookies: CookieMap,
}

/// The captured result of a tunneled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelResponse {
	pub head: ResponseHead,
	/// `None` when the browser returned an empty body.
	pub body: Option<Vec<u8>>,
}

impl TunnelResponse {
	/// Response reported to the operator when a tunnel request fails.
	pub fn error(message: impl std::fmt::Display) -> Self {
		Self {
			head: ResponseHead {
				code: ERROR_STATUS,
				headers: HeaderMap::from([("content-type".to_string(), "text/plain".to_string())]),
				cookies: CookieMap::new(),
			},
			body: Some(format!("{message}\n").into_bytes()),
		}
	}

	pub fn from_frame(bytes: &[u8]) -> Result<Self, FrameError> {
		let (head, body) = frame::decode_as(bytes)?;
		Ok(Self { head, body })
	}

	pub fn to_frame(&self) -> Result<Vec<u8>, FrameError> {
		frame::encode_as(&self.head, self.body.as_deref())
	}

	/// Infallible encoding used on the error path.
	pub fn to_frame_lossy(&self) -> Vec<u8> {
		let head = json!({
			"code": self.head.code,
			"headers": self.head.headers,
			"cookies": self.head.cookies,
		});
		frame::encode(&head, self.body.as_deref())
	}

	/// Cookies rendered as `name=value` strings, one per `set-cookie` line.
	pub fn set_cookie_values(&self) -> Vec<String> {
		self.head
			.cookies
			.iter()
			.map(|(name, value)| format!("{name}={value}"))
			.collect()
	}
}

/// Returns the body as text when every byte is 7-bit ASCII.
pub fn ascii_text(body: &[u8]) -> Option<&str> {
	if body.is_ascii() {
		std::str::from_utf8(body).ok()
	} else {
		None
	}
}
