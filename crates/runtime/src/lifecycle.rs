//! Connection lifecycle as a pure state machine.
//!
//! [`Lifecycle`] tracks the debugging link and the operator link and decides
//! what to do next. It performs no I/O: the supervisor feeds it
//! [`LifecycleEvent`]s and carries out the returned [`Action`]s.
//!
//! ```text
//! debug:  Disconnected -> Connecting -> Connected{session}
//! c2:     Disconnected -> Connecting -> Connected{interception_enabled}
//! ```
//!
//! The operator link only exists while the debugging link is attached.
//! Reconnects use a fixed delay with no attempt limit.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugState {
	Disconnected,
	/// Socket being opened, or open and attaching to the target.
	Connecting,
	Connected { session_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum C2State {
	Disconnected,
	Connecting,
	Connected { interception_enabled: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
	Start,
	/// Debugging socket opened.
	DebugConnected,
	/// Target attached.
	DebugAttached { session_id: String },
	/// Certificate setup, discovery or attach failed.
	DebugSetupFailed,
	/// Debugging socket closed, or failed to open.
	DebugClosed,
	DebugRetryDue,
	/// Operator socket opened.
	C2Connected,
	InterceptionEnabled,
	InterceptionFailed,
	/// Operator socket closed, or failed to open.
	C2Closed,
	C2RetryDue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	ConnectDebug,
	/// Disable certificate errors, find the target and attach.
	SetupDebug,
	CloseDebug,
	ConnectC2,
	EnableInterception,
	/// Start answering tunnel requests on the operator link.
	ServeC2,
	/// Best effort; failures are logged.
	DisableInterception,
	CloseC2,
	ScheduleDebugRetry(Duration),
	ScheduleC2Retry(Duration),
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
	debug: DebugState,
	c2: C2State,
	retry_delay: Duration,
}

impl Lifecycle {
	pub fn new(retry_delay: Duration) -> Self {
		Self {
			debug: DebugState::Disconnected,
			c2: C2State::Disconnected,
			retry_delay,
		}
	}

	pub fn debug_state(&self) -> &DebugState {
		&self.debug
	}

	pub fn c2_state(&self) -> &C2State {
		&self.c2
	}

	pub fn session_id(&self) -> Option<&str> {
		match &self.debug {
			DebugState::Connected { session_id } => Some(session_id),
			_ => None,
		}
	}

	/// True once interception is on and tunnel requests may be served.
	pub fn is_ready(&self) -> bool {
		matches!(
			self.c2,
			C2State::Connected {
				interception_enabled: true
			}
		)
	}

	fn debug_attached(&self) -> bool {
		matches!(self.debug, DebugState::Connected { .. })
	}

	/// Applies one event and returns the actions it requires, in order.
	pub fn handle(&mut self, event: LifecycleEvent) -> Vec<Action> {
		use LifecycleEvent as E;

		match event {
			E::Start | E::DebugRetryDue => {
				if self.debug != DebugState::Disconnected {
					return Vec::new();
				}
				self.debug = DebugState::Connecting;
				vec![Action::ConnectDebug]
			}
			E::DebugConnected => {
				if self.debug != DebugState::Connecting {
					return Vec::new();
				}
				vec![Action::SetupDebug]
			}
			E::DebugAttached { session_id } => {
				if self.debug != DebugState::Connecting {
					return Vec::new();
				}
				self.debug = DebugState::Connected { session_id };
				self.c2 = C2State::Connecting;
				vec![Action::ConnectC2]
			}
			E::DebugSetupFailed => {
				if self.debug == DebugState::Disconnected {
					return Vec::new();
				}
				vec![Action::CloseDebug]
			}
			E::DebugClosed => {
				if self.debug == DebugState::Disconnected {
					return Vec::new();
				}
				self.debug = DebugState::Disconnected;

				let mut actions = Vec::new();
				if self.c2 != C2State::Disconnected {
					self.c2 = C2State::Disconnected;
					actions.push(Action::CloseC2);
				}
				actions.push(Action::ScheduleDebugRetry(self.retry_delay));
				actions
			}
			E::C2Connected => {
				if self.c2 != C2State::Connecting {
					return Vec::new();
				}
				if !self.debug_attached() {
					self.c2 = C2State::Disconnected;
					return vec![Action::CloseC2];
				}
				self.c2 = C2State::Connected {
					interception_enabled: false,
				};
				vec![Action::EnableInterception]
			}
			E::InterceptionEnabled => {
				if self.c2
					!= (C2State::Connected {
						interception_enabled: false,
					}) {
					return Vec::new();
				}
				self.c2 = C2State::Connected {
					interception_enabled: true,
				};
				vec![Action::ServeC2]
			}
			E::InterceptionFailed => {
				if !matches!(self.c2, C2State::Connected { .. }) {
					return Vec::new();
				}
				vec![Action::CloseC2]
			}
			E::C2Closed => {
				let previous = std::mem::replace(&mut self.c2, C2State::Disconnected);
				if previous == C2State::Disconnected || !self.debug_attached() {
					return Vec::new();
				}

				let mut actions = Vec::new();
				if previous
					== (C2State::Connected {
						interception_enabled: true,
					}) {
					actions.push(Action::DisableInterception);
				}
				actions.push(Action::ScheduleC2Retry(self.retry_delay));
				actions
			}
			E::C2RetryDue => {
				if self.c2 != C2State::Disconnected || !self.debug_attached() {
					return Vec::new();
				}
				self.c2 = C2State::Connecting;
				vec![Action::ConnectC2]
			}
		}
	}
}
