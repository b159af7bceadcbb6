//! Debugging-protocol (Chrome DevTools Protocol) message types.
//!
//! Only the subset of the protocol the tunnel drives is modelled with typed
//! payloads; everything else travels as [`serde_json::Value`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method names used by the tunnel.
pub mod methods {
	pub const SET_IGNORE_CERTIFICATE_ERRORS: &str = "Security.setIgnoreCertificateErrors";
	pub const GET_TARGETS: &str = "Target.getTargets";
	pub const ATTACH_TO_TARGET: &str = "Target.attachToTarget";
	pub const FETCH_ENABLE: &str = "Fetch.enable";
	pub const FETCH_DISABLE: &str = "Fetch.disable";
	pub const FETCH_CONTINUE_REQUEST: &str = "Fetch.continueRequest";
	pub const FETCH_FAIL_REQUEST: &str = "Fetch.failRequest";
	pub const FETCH_GET_RESPONSE_BODY: &str = "Fetch.getResponseBody";
	pub const FETCH_REQUEST_PAUSED: &str = "Fetch.requestPaused";
	pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
}

/// Outbound command: `{id, method, params, sessionId?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
	pub id: u64,
	pub method: String,
	pub params: Value,
	#[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Reply correlated to a [`Command`] by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Explicit protocol error returned in place of a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	#[serde(default)]
	pub code: i64,
	#[serde(default)]
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// Unsolicited notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Any inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Has an `id` field.
	Response(Response),
	/// Has a `method` field and no `id`.
	Event(Event),
	/// Anything else; logged and dropped.
	Unknown(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
	#[serde(rename = "targetId")]
	pub target_id: String,
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub attached: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetTargetsResult {
	#[serde(rename = "targetInfos")]
	pub target_infos: Vec<TargetInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
	#[serde(rename = "sessionId")]
	pub session_id: String,
}

/// Stage at which `Fetch` pauses a network exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStage {
	Request,
	Response,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPattern {
	#[serde(rename = "requestStage")]
	pub request_stage: RequestStage,
	#[serde(rename = "resourceType")]
	pub resource_type: String,
}

impl RequestPattern {
	pub fn document(request_stage: RequestStage) -> Self {
		Self {
			request_stage,
			resource_type: "Document".to_string(),
		}
	}
}

/// Header in the list form `Fetch` uses for overrides and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
	pub name: String,
	pub value: String,
}

impl HeaderEntry {
	pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
		}
	}
}

/// The request as the browser sees it at interception time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PausedRequest {
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub method: String,
	/// Header object keyed by the browser's own capitalization.
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
}

/// Params of `Fetch.requestPaused`.
///
/// At the request stage none of the `response*` fields are set; at the response
/// stage either a status code and headers or an error reason is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPaused {
	#[serde(rename = "requestId")]
	pub request_id: String,
	#[serde(default)]
	pub request: PausedRequest,
	#[serde(rename = "resourceType", default, skip_serializing_if = "Option::is_none")]
	pub resource_type: Option<String>,
	#[serde(rename = "responseErrorReason", default, skip_serializing_if = "Option::is_none")]
	pub response_error_reason: Option<String>,
	#[serde(rename = "responseStatusCode", default, skip_serializing_if = "Option::is_none")]
	pub response_status_code: Option<u16>,
	#[serde(rename = "responseHeaders", default, skip_serializing_if = "Option::is_none")]
	pub response_headers: Option<Vec<HeaderEntry>>,
}

/// Result of `Fetch.getResponseBody`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBody {
	#[serde(default)]
	pub body: String,
	#[serde(rename = "base64Encoded", default)]
	pub base64_encoded: bool,
}
