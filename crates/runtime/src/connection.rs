//! Command/event channel over the debugging-protocol socket.
//!
//! This module correlates outbound commands with their replies and hands
//! unsolicited events to whoever is waiting for them:
//!
//! - Every command gets a fresh id from a per-connection counter starting at 1.
//! - Replies are matched strictly by id through a pending-command table, never
//!   by arrival order.
//! - Event waits are registered per method name and resolved by the first
//!   matching event after registration.
//! - Messages nobody is waiting for are logged and dropped.
//!
//! # Ordering
//!
//! [`Connection::subscribe_once`] registers synchronously and returns an
//! [`EventWait`]. Registering before issuing the command that triggers the
//! event makes it impossible to miss that event:
//!
//! ```ignore
//! let paused = conn.subscribe_once("Fetch.requestPaused", None);
//! conn.send_command("Runtime.evaluate", params, Some(session)).await?;
//! let params = paused.wait().await?;
//! ```
//!
//! # Shutdown
//!
//! When the transport ends or [`Connection::close`] is called, the connection
//! refuses new commands and fails every outstanding command and event wait
//! with [`Error::ChannelClosed`].


use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use cdptun_protocol::cdp::{Command, ErrorPayload, Message, Response};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::transport::TransportParts;

/// Default deadline for command replies and event waits.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(4000);

/// A command awaiting its reply.
struct PendingCommand {
	method: String,
	reply: oneshot::Sender<Result<Value>>,
}

type EventFilter = Box<dyn Fn(&Value) -> bool + Send>;

/// A registered event wait.
struct EventWaiter {
	tx: oneshot::Sender<Value>,
	/// `None` accepts any params.
	filter: Option<EventFilter>,
}

impl EventWaiter {
	fn accepts(&self, params: &Value) -> bool {
		self.filter.as_ref().is_none_or(|filter| filter(params))
	}
}

/// Removes a pending entry if the awaiting future is dropped or times out.
struct PendingGuard<'a> {
	id: u64,
	pending: &'a DashMap<u64, PendingCommand>,
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		if self.pending.remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "dropped pending command");
		}
	}
}

/// Registration for the next event with a given method name.
///
/// The deadline is fixed when the wait is registered, not when it is awaited.
#[must_use = "an event wait does nothing unless awaited"]
pub struct EventWait {
	method: String,
	deadline: Instant,
	rx: oneshot::Receiver<Value>,
}

impl EventWait {
	/// Resolves with the event's params.
	pub async fn wait(self) -> Result<Value> {
		match tokio::time::timeout_at(self.deadline, self.rx).await {
			Ok(Ok(params)) => Ok(params),
			Ok(Err(_)) => Err(Error::ChannelClosed),
			Err(_) => Err(Error::Timeout {
				method: self.method,
			}),
		}
	}

	pub fn method(&self) -> &str {
		&self.method
	}
}

/// Debugging-protocol connection.
pub struct Connection {
	/// Last allocated command id.
	last_id: AtomicU64,
	/// Commands awaiting a reply, keyed by id.
	pending: DashMap<u64, PendingCommand>,
	/// Event waits keyed by method, oldest first.
	waiters: Mutex<HashMap<String, VecDeque<EventWaiter>>>,
	/// Outbound queue; `None` once the connection is closed.
	outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
	/// Inbound queue, taken by [`Connection::run`].
	inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
	open: AtomicBool,
	close_requested: Notify,
	default_timeout: Duration,
}

impl Connection {
	pub fn new(parts: TransportParts<String>) -> Self {
		Self::with_timeout(parts, DEFAULT_COMMAND_TIMEOUT)
	}

	pub fn with_timeout(parts: TransportParts<String>, default_timeout: Duration) -> Self {
		let (sender, receiver) = parts.into_parts();
		Self {
			last_id: AtomicU64::new(0),
			pending: DashMap::new(),
			waiters: Mutex::new(HashMap::new()),
			outbound: Mutex::new(Some(sender)),
			inbound: Mutex::new(Some(receiver)),
			open: AtomicBool::new(true),
			close_requested: Notify::new(),
			default_timeout,
		}
	}

	pub fn is_open(&self) -> bool {
		self.open.load(Ordering::SeqCst)
	}

	pub fn default_timeout(&self) -> Duration {
		self.default_timeout
	}

	fn next_id(&self) -> u64 {
		self.last_id.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// Serializes and queues a command. Fails without retry when closed.
	fn transmit(&self, id: u64, method: &str, params: Value, session_id: Option<&str>) -> Result<()> {
		let command = Command {
			id,
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_owned),
		};
		let text = serde_json::to_string(&command)?;

		let outbound = self.outbound.lock();
		let sender = outbound.as_ref().ok_or(Error::ChannelClosed)?;
		sender.send(text).map_err(|_| Error::ChannelClosed)?;

		tracing::debug!(id, method, session = session_id.unwrap_or("-"), "sent command");
		Ok(())
	}

	/// Sends a command and waits for its reply with the default deadline.
	pub async fn send_command(
		&self,
		method: &str,
		params: Value,
		session_id: Option<&str>,
	) -> Result<Value> {
		self.send_command_with_timeout(method, params, session_id, self.default_timeout)
			.await
	}

	/// Sends a command and waits for its reply.
	///
	/// An `error` reply fails with [`Error::Remote`]; a result carrying
	/// `errorText` fails with [`Error::ErrorText`].
	pub async fn send_command_with_timeout(
		&self,
		method: &str,
		params: Value,
		session_id: Option<&str>,
		timeout: Duration,
	) -> Result<Value> {
		if !self.is_open() {
			return Err(Error::ChannelClosed);
		}

		let id = self.next_id();
		let (tx, rx) = oneshot::channel();
		self.pending.insert(
			id,
			PendingCommand {
				method: method.to_string(),
				reply: tx,
			},
		);
		let _guard = PendingGuard {
			id,
			pending: &self.pending,
		};

		self.transmit(id, method, params, session_id)?;

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(Error::ChannelClosed),
			Err(_) => {
				tracing::warn!(id, method, timeout_ms = timeout.as_millis() as u64, "command timed out");
				Err(Error::Timeout {
					method: method.to_string(),
				})
			}
		}
	}

	/// Sends a command without waiting for a reply. Returns its id.
	///
	/// The reply, if any, is dropped as unhandled.
	pub fn send_and_forget(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<u64> {
		if !self.is_open() {
			return Err(Error::ChannelClosed);
		}
		let id = self.next_id();
		self.transmit(id, method, params, session_id)?;
		Ok(id)
	}

	/// Registers a wait for the next `method` event.
	///
	/// `timeout` defaults to the connection's command timeout.
	pub fn subscribe_once(&self, method: &str, timeout: Option<Duration>) -> EventWait {
		self.register(method, timeout, None)
	}

	/// Like [`Connection::subscribe_once`], but only events whose params pass
	/// `filter` resolve the wait. Rejected events go to later waiters.
	pub fn subscribe_matching<F>(&self, method: &str, timeout: Option<Duration>, filter: F) -> EventWait
	where
		F: Fn(&Value) -> bool + Send + 'static,
	{
		self.register(method, timeout, Some(Box::new(filter)))
	}

	fn register(&self, method: &str, timeout: Option<Duration>, filter: Option<EventFilter>) -> EventWait {
		let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);
		let (tx, rx) = oneshot::channel();

		// open is checked under the lock that shutdown clears the waiters with
		let mut waiters = self.waiters.lock();
		if self.is_open() {
			let queue = waiters.entry(method.to_string()).or_default();
			queue.retain(|waiter| !waiter.tx.is_closed());
			queue.push_back(EventWaiter { tx, filter });
		}
		drop(waiters);

		tracing::debug!(method, "waiting for event");
		EventWait {
			method: method.to_string(),
			deadline,
			rx,
		}
	}

	/// Waits for the next `method` event.
	pub async fn wait_for_event(&self, method: &str, timeout: Option<Duration>) -> Result<Value> {
		self.subscribe_once(method, timeout).wait().await
	}

	/// Requests shutdown; [`Connection::run`] returns shortly after.
	pub fn close(&self) {
		self.open.store(false, Ordering::SeqCst);
		self.outbound.lock().take();
		self.close_requested.notify_one();
	}

	/// Dispatch loop. Returns when the transport ends or [`Connection::close`]
	/// is called; every outstanding operation is failed on the way out.
	pub async fn run(&self) {
		let inbound = self.inbound.lock().take();
		let Some(mut inbound) = inbound else {
			tracing::warn!("Connection::run called more than once");
			return;
		};

		loop {
			tokio::select! {
				message = inbound.recv() => match message {
					Some(text) => self.dispatch_text(&text),
					None => {
						tracing::debug!("debugging socket closed by peer");
						break;
					}
				},
				_ = self.close_requested.notified() => {
					tracing::debug!("debugging socket closed locally");
					break;
				}
			}
		}

		self.shutdown();
	}

	fn shutdown(&self) {
		self.open.store(false, Ordering::SeqCst);
		self.outbound.lock().take();

		let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
		for id in ids {
			if let Some((_, pending)) = self.pending.remove(&id) {
				let _ = pending.reply.send(Err(Error::ChannelClosed));
			}
		}
		self.waiters.lock().clear();
	}

	fn dispatch_text(&self, text: &str) {
		match serde_json::from_str::<Message>(text) {
			Ok(message) => self.dispatch(message),
			Err(e) => tracing::debug!(error = %e, "unparsable message ignored"),
		}
	}

	/// Routes one inbound message.
	pub(crate) fn dispatch(&self, message: Message) {
		match message {
			Message::Response(response) => self.resolve(response),
			Message::Event(event) => {
				if !self.deliver(&event.method, event.params) {
					tracing::debug!(method = %event.method, "unhandled event");
				}
			}
			Message::Unknown(value) => {
				tracing::debug!(message = %value, "unhandled message");
			}
		}
	}

	/// Hands `params` to the oldest live waiter for `method` that accepts them.
	fn deliver(&self, method: &str, params: Value) -> bool {
		let mut waiters = self.waiters.lock();
		let Some(queue) = waiters.get_mut(method) else {
			return false;
		};

		let mut params = params;
		let mut index = 0;
		while index < queue.len() {
			if !queue[index].accepts(&params) {
				index += 1;
				continue;
			}
			let Some(waiter) = queue.remove(index) else {
				break;
			};
			match waiter.tx.send(params) {
				Ok(()) => return true,
				// receiver timed out or was dropped
				Err(returned) => params = returned,
			}
		}
		false
	}

	fn resolve(&self, response: Response) {
		let Some((_, pending)) = self.pending.remove(&response.id) else {
			tracing::debug!(id = response.id, "reply for no pending command");
			return;
		};

		let result = reply_result(&pending.method, response.result, response.error);
		let _ = pending.reply.send(result);
	}
}

/// Converts a reply into the command's outcome.
fn reply_result(method: &str, result: Option<Value>, error: Option<ErrorPayload>) -> Result<Value> {
	if let Some(error) = error {
		return Err(Error::Remote {
			method: method.to_string(),
			code: error.code,
			message: error.message,
		});
	}

	let result = result.unwrap_or(Value::Null);
	match result.get("errorText").and_then(Value::as_str) {
		Some(text) if !text.is_empty() => Err(Error::ErrorText {
			method: method.to_string(),
			error_text: text.to_string(),
		}),
		_ => Ok(result),
	}
}
