//! Error types for the tunnel runtime.

use cdptun_protocol::FrameError;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification used for logging and by callers that react to a
/// failure category rather than a specific error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// The channel was closed or could not be opened.
	Transport,
	/// No matching reply or event arrived before the deadline.
	Timeout,
	/// The browser answered with an explicit error, or with a malformed result.
	Protocol,
	/// The fabricated request itself failed.
	Network,
	/// A body or frame could not be represented.
	Encoding,
}

/// Errors that can occur while bridging the two channels.
#[derive(Debug, Error)]
pub enum Error {
	/// Command issued on a closed debugging channel.
	#[error("debugging channel is closed")]
	ChannelClosed,

	/// Failed to open a socket.
	#[error("failed to connect to {url}: {reason}")]
	ConnectionFailed { url: String, reason: String },

	/// No reply or event for `method` before its deadline.
	#[error("{method} error: timed out")]
	Timeout { method: String },

	/// Browser replied with an `error` object.
	#[error("{method} error: {code}: {message}")]
	Remote {
		method: String,
		code: i64,
		message: String,
	},

	/// Browser replied with a result carrying `errorText`.
	#[error("{method} error: {error_text}")]
	ErrorText { method: String, error_text: String },

	/// Result was missing or had an unexpected shape.
	#[error("protocol error: {0}")]
	ProtocolError(String),

	/// No debuggable target matched the configured title.
	#[error("target not found: {0}")]
	TargetNotFound(String),

	/// The fabricated request did not produce a usable response.
	#[error("network error: {0}")]
	Network(String),

	/// Request bodies must be 7-bit text.
	#[error("request body must be text (got a byte >= 0x80 at offset {offset})")]
	NonTextBody { offset: usize },

	/// Response body flagged base64 failed to decode.
	#[error("response body is not valid base64: {0}")]
	BodyDecode(#[from] base64::DecodeError),

	/// Operator frame could not be decoded or encoded.
	#[error(transparent)]
	Frame(#[from] FrameError),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Maps the error onto the failure category it belongs to.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::ChannelClosed | Error::ConnectionFailed { .. } | Error::Io(_) => {
				ErrorKind::Transport
			}
			Error::Timeout { .. } => ErrorKind::Timeout,
			Error::Remote { .. }
			| Error::ErrorText { .. }
			| Error::ProtocolError(_)
			| Error::TargetNotFound(_)
			| Error::Json(_) => ErrorKind::Protocol,
			Error::Network(_) => ErrorKind::Network,
			Error::NonTextBody { .. } | Error::BodyDecode(_) | Error::Frame(_) => {
				ErrorKind::Encoding
			}
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		self.kind() == ErrorKind::Timeout
	}

	/// Returns true if the debugging channel is gone.
	pub fn is_channel_closed(&self) -> bool {
		matches!(self, Error::ChannelClosed)
	}
}
