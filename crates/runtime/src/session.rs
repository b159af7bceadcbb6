//! Operator-facing session.
//!
//! Each inbound binary frame is one tunnel request. It is decoded, executed
//! and answered with exactly one frame; failures are answered with an error
//! frame instead of tearing down the link.

use std::future::Future;
use std::sync::Arc;

use cdptun_protocol::{TunnelRequest, TunnelResponse};

use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::transport::TransportParts;

/// Prefix on error bodies sent back to the operator.
pub const ERROR_PREFIX: &str = "tunnel";

/// Why [`C2Session::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
	/// The operator link closed.
	Closed,
	/// The shutdown future resolved.
	Shutdown,
}

pub struct C2Session {
	executor: Arc<dyn RequestExecutor>,
}

impl C2Session {
	pub fn new(executor: Arc<dyn RequestExecutor>) -> Self {
		Self { executor }
	}

	/// Turns one inbound frame into exactly one outbound frame.
	pub async fn handle_frame(&self, frame: &[u8]) -> Vec<u8> {
		match self.process(frame).await {
			Ok(reply) => reply,
			Err(e) => {
				tracing::error!(error = %e, kind = ?e.kind(), "tunnel request failed");
				TunnelResponse::error(format!("{ERROR_PREFIX}: {e}")).to_frame_lossy()
			}
		}
	}

	async fn process(&self, frame: &[u8]) -> Result<Vec<u8>> {
		let request = TunnelRequest::from_frame(frame)?;
		let response = self.executor.execute(request).await?;
		Ok(response.to_frame()?)
	}

	/// Answers frames one at a time until the link closes or `shutdown`
	/// resolves. Returning drops the sender, which closes the link.
	pub async fn serve<F>(&self, link: TransportParts<Vec<u8>>, shutdown: F) -> ServeExit
	where
		F: Future<Output = ()>,
	{
		let (sender, mut receiver) = link.into_parts();
		tokio::pin!(shutdown);

		loop {
			tokio::select! {
				_ = &mut shutdown => {
					tracing::debug!("operator session shutting down");
					return ServeExit::Shutdown;
				}
				frame = receiver.recv() => {
					let Some(frame) = frame else {
						tracing::info!("operator link closed");
						return ServeExit::Closed;
					};
					let reply = self.handle_frame(&frame).await;
					if sender.send(reply).is_err() {
						tracing::info!("operator link closed before reply");
						return ServeExit::Closed;
					}
				}
			}
		}
	}
}
