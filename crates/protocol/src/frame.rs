//! Operator frame codec.
//!
//! A frame is `<JSON object> 0x00 <raw payload>`. The payload may be empty, in
//! which case it decodes as "no body". The codec is agnostic to whether the head
//! describes a request or a response.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Separates the JSON head from the payload.
pub const TERMINATOR: u8 = 0x00;

#[derive(Debug, Error)]
pub enum FrameError {
	#[error("invalid frame (no terminator)")]
	NoTerminator,

	#[error("invalid frame (invalid JSON): {0}")]
	InvalidJson(#[source] serde_json::Error),

	#[error("invalid frame head: {0}")]
	InvalidHead(#[source] serde_json::Error),
}

/// Splits a frame into its JSON head and optional payload.
pub fn decode(frame: &[u8]) -> Result<(Value, Option<&[u8]>), FrameError> {
	let split = frame
		.iter()
		.position(|&byte| byte == TERMINATOR)
		.ok_or(FrameError::NoTerminator)?;

	let head = serde_json::from_slice(&frame[..split]).map_err(FrameError::InvalidJson)?;
	let payload = &frame[split + 1..];

	Ok((head, (!payload.is_empty()).then_some(payload)))
}

/// Decodes a frame whose head deserializes into `T`.
pub fn decode_as<T: DeserializeOwned>(frame: &[u8]) -> Result<(T, Option<Vec<u8>>), FrameError> {
	let (head, payload) = decode(frame)?;
	let head = serde_json::from_value(head).map_err(FrameError::InvalidHead)?;
	Ok((head, payload.map(<[u8]>::to_vec)))
}

/// Builds a single contiguous frame.
pub fn encode(head: &Value, payload: Option<&[u8]>) -> Vec<u8> {
	let head = head.to_string();
	let payload = payload.unwrap_or_default();

	let mut frame = Vec::with_capacity(head.len() + 1 + payload.len());
	frame.extend_from_slice(head.as_bytes());
	frame.push(TERMINATOR);
	frame.extend_from_slice(payload);
	frame
}

/// Encodes a serializable head and optional payload.
pub fn encode_as<T: Serialize>(head: &T, payload: Option<&[u8]>) -> Result<Vec<u8>, FrameError> {
	let head = serde_json::to_value(head).map_err(FrameError::InvalidHead)?;
	Ok(encode(&head, payload))
}
