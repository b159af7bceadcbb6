//! Message transports for the two channels.
//!
//! Both channels are exposed as a pair of unbounded queues ([`TransportParts`]):
//! pushing onto `sender` transmits a message, `receiver` yields inbound
//! messages and ends when the peer goes away. Dropping `sender` closes the
//! channel from our side.
//!
//! - [`WebSocketTransport`] backs the queues with a real WebSocket.
//! - [`memory_pair`] connects two in-process ends, used by tests.


use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};

/// Sending and receiving halves of one channel.
pub struct TransportParts<T> {
	pub sender: mpsc::UnboundedSender<T>,
	pub receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> TransportParts<T> {
	pub fn into_parts(self) -> (mpsc::UnboundedSender<T>, mpsc::UnboundedReceiver<T>) {
		(self.sender, self.receiver)
	}
}

/// Creates two connected in-memory ends.
pub fn memory_pair<T>() -> (TransportParts<T>, TransportParts<T>) {
	let (a_tx, b_rx) = mpsc::unbounded_channel();
	let (b_tx, a_rx) = mpsc::unbounded_channel();
	(
		TransportParts {
			sender: a_tx,
			receiver: a_rx,
		},
		TransportParts {
			sender: b_tx,
			receiver: b_rx,
		},
	)
}

/// Conversion between queue items and WebSocket frames.
///
/// The debugging protocol speaks text frames (`String`); the operator channel
/// speaks binary frames (`Vec<u8>`).
pub trait Payload: Sized + Send + 'static {
	fn into_message(self) -> Message;
	fn from_message(message: Message) -> Option<Self>;
}

impl Payload for String {
	fn into_message(self) -> Message {
		Message::Text(self)
	}

	fn from_message(message: Message) -> Option<Self> {
		match message {
			Message::Text(text) => Some(text),
			Message::Binary(bytes) => String::from_utf8(bytes).ok(),
			_ => None,
		}
	}
}

impl Payload for Vec<u8> {
	fn into_message(self) -> Message {
		Message::Binary(self)
	}

	fn from_message(message: Message) -> Option<Self> {
		match message {
			Message::Binary(bytes) => Some(bytes),
			Message::Text(text) => Some(text.into_bytes()),
			_ => None,
		}
	}
}

/// WebSocket client transport.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Connects to `url` and spawns the reader and writer tasks.
	///
	/// The writer sends a close frame once every sender clone is dropped. The
	/// reader forwards data frames until the socket closes or errors.
	pub async fn connect<T: Payload>(url: &str) -> Result<TransportParts<T>> {
		let (stream, _) = connect_async(url)
			.await
			.map_err(|e| Error::ConnectionFailed {
				url: url.to_string(),
				reason: e.to_string(),
			})?;

		let (mut sink, mut source) = stream.split();
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<T>();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<T>();

		let url_owned = url.to_string();
		tokio::spawn(async move {
			while let Some(payload) = outbound_rx.recv().await {
				if let Err(e) = sink.send(payload.into_message()).await {
					tracing::warn!(url = %url_owned, error = %e, "WebSocket write error");
					return;
				}
			}
			let _ = sink.close().await;
		});

		let url_owned = url.to_string();
		tokio::spawn(async move {
			while let Some(frame) = source.next().await {
				match frame {
					Ok(Message::Close(_)) => break,
					Ok(message) => {
						if let Some(payload) = T::from_message(message) {
							if inbound_tx.send(payload).is_err() {
								break;
							}
						}
					}
					Err(e) => {
						tracing::warn!(url = %url_owned, error = %e, "WebSocket read error");
						break;
					}
				}
			}
			tracing::debug!(url = %url_owned, "WebSocket reader finished");
		});

		Ok(TransportParts {
			sender: outbound_tx,
			receiver: inbound_rx,
		})
	}
}
