//! Scripted browser and in-memory dialer for supervisor tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cdptun_protocol::{TunnelRequest, TunnelResponse};
use cdptun_runtime::{Dialer, Error, Result, TransportParts, TunnelConfig, memory_pair};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

pub const SESSION_ID: &str = "SESSION-1";

/// How the fake network answers a URL.
#[derive(Debug, Clone)]
pub enum Route {
	Respond {
		status: u16,
		headers: Vec<(String, String)>,
		body: String,
		/// Reported back under the echoed `Cookie` request header.
		cookie: Option<String>,
	},
	Fail(&'static str),
}

impl Route {
	pub fn text(status: u16, body: &str) -> Self {
		Route::Respond {
			status,
			headers: vec![
				("Content-Type".into(), "text/plain".into()),
				("Content-Length".into(), body.len().to_string()),
			],
			body: body.into(),
			cookie: None,
		}
	}
}

struct Inner {
	title: String,
	routes: Mutex<HashMap<String, Route>>,
	log: Mutex<Vec<Value>>,
	/// Methods answered with an error reply.
	failing: Mutex<HashSet<String>>,
	kill: watch::Sender<u64>,
}

/// Answers debugging-protocol commands the way a page with `Fetch`
/// interception would.
#[derive(Clone)]
pub struct FakeBrowser {
	inner: Arc<Inner>,
}

impl FakeBrowser {
	pub fn new() -> Self {
		Self::with_title("smarthome demo")
	}

	pub fn with_title(title: &str) -> Self {
		let (kill, _) = watch::channel(0);
		Self {
			inner: Arc::new(Inner {
				title: title.into(),
				routes: Mutex::new(HashMap::new()),
				log: Mutex::new(Vec::new()),
				failing: Mutex::new(HashSet::new()),
				kill,
			}),
		}
	}

	pub fn route(&self, url: &str, route: Route) {
		self.inner.routes.lock().unwrap().insert(url.into(), route);
	}

	/// Answers every later `method` command with an error.
	pub fn fail_method(&self, method: &str) {
		self.inner.failing.lock().unwrap().insert(method.into());
	}

	pub fn commands(&self) -> Vec<Value> {
		self.inner.log.lock().unwrap().clone()
	}

	pub fn methods(&self) -> Vec<String> {
		self.commands()
			.iter()
			.map(|c| c["method"].as_str().unwrap_or_default().to_string())
			.collect()
	}

	pub fn count(&self, method: &str) -> usize {
		self.methods().iter().filter(|m| *m == method).count()
	}

	/// Last command sent with `method`.
	pub fn last(&self, method: &str) -> Option<Value> {
		self.commands().into_iter().rev().find(|c| c["method"] == method)
	}

	/// Polls until `method` has been seen `count` times.
	pub async fn wait_for(&self, method: &str, count: usize) {
		let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
		while self.count(method) < count {
			assert!(
				tokio::time::Instant::now() < deadline,
				"timed out waiting for {count}x {method}, saw {:?}",
				self.methods()
			);
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}

	/// Drops every open debugging link.
	pub fn disconnect(&self) {
		self.inner.kill.send_modify(|n| *n += 1);
	}

	/// Serves one debugging link until either side closes it.
	pub fn serve(&self, link: TransportParts<String>) {
		let inner = Arc::clone(&self.inner);
		let mut kill = inner.kill.subscribe();
		tokio::spawn(async move {
			let (tx, mut rx) = link.into_parts();
			let mut paused = 0u32;
			let mut last_body = String::new();

			loop {
				let text = tokio::select! {
					_ = kill.changed() => break,
					text = rx.recv() => match text {
						Some(text) => text,
						None => break,
					},
				};
				let command: Value = serde_json::from_str(&text).unwrap();
				inner.log.lock().unwrap().push(command.clone());

				let method = command["method"].as_str().unwrap_or_default();
				if inner.failing.lock().unwrap().contains(method) {
					let reply = json!({
						"id": command["id"],
						"error": {"code": -32000, "message": format!("{method} failed")}
					});
					if tx.send(reply.to_string()).is_err() {
						break;
					}
					continue;
				}

				let params = &command["params"];
				let mut events = Vec::new();
				let result = match method {
					"Target.getTargets" => json!({"targetInfos": [
						{"targetId": "T-blank", "type": "page", "title": "about:blank", "url": "about:blank", "attached": false},
						{"targetId": "T-app", "type": "page", "title": inner.title, "url": "http://192.168.1.20:8008/app", "attached": false}
					]}),
					"Target.attachToTarget" => json!({"sessionId": SESSION_ID}),
					"Runtime.evaluate" => {
						let expression = params["expression"].as_str().unwrap_or_default();
						if let Some(url) = iframe_src(expression) {
							paused += 1;
							events.push(json!({
								"method": "Fetch.requestPaused",
								"sessionId": SESSION_ID,
								"params": {
									"requestId": format!("interception-job-{paused}.0"),
									"request": {"url": url, "method": "GET", "headers": {"Upgrade-Insecure-Requests": "1"}},
									"resourceType": "Document"
								}
							}));
						}
						json!({"result": {"type": "string", "value": "ok"}})
					}
					"Fetch.continueRequest" => {
						let url = params["url"].as_str().unwrap_or_default();
						let route = inner.routes.lock().unwrap().get(url).cloned();
						let mut echoed: serde_json::Map<String, Value> = params["headers"]
							.as_array()
							.into_iter()
							.flatten()
							.map(|h| (h["name"].as_str().unwrap_or_default().to_string(), h["value"].clone()))
							.collect();
						let mut event = json!({
							"requestId": params["requestId"],
							"resourceType": "Document",
						});
						match route.unwrap_or(Route::Fail("NameNotResolved")) {
							Route::Respond {
								status,
								headers,
								body,
								cookie,
							} => {
								if let Some(cookie) = cookie {
									echoed.insert("Cookie".into(), Value::String(cookie));
								}
								event["responseStatusCode"] = json!(status);
								event["responseHeaders"] = headers
									.iter()
									.map(|(name, value)| json!({"name": name, "value": value}))
									.collect();
								last_body = body;
							}
							Route::Fail(reason) => {
								event["responseErrorReason"] = json!(reason);
							}
						}
						event["request"] = json!({
							"url": url,
							"method": params["method"],
							"headers": echoed,
						});
						events.push(json!({
							"method": "Fetch.requestPaused",
							"sessionId": SESSION_ID,
							"params": event
						}));
						json!({})
					}
					"Fetch.getResponseBody" => json!({"body": last_body, "base64Encoded": false}),
					_ => json!({}),
				};

				let mut reply = json!({"id": command["id"], "result": result});
				if let Some(session) = command.get("sessionId") {
					reply["sessionId"] = session.clone();
				}
				if tx.send(reply.to_string()).is_err() {
					break;
				}
				for event in events {
					if tx.send(event.to_string()).is_err() {
						break;
					}
				}
			}
		});
	}
}

/// Pulls the quoted `f.src = "..."` value out of an iframe expression.
fn iframe_src(expression: &str) -> Option<String> {
	let (_, rest) = expression.split_once("f.src = ")?;
	serde_json::Deserializer::from_str(rest)
		.into_iter::<String>()
		.next()?
		.ok()
}

/// Hands debugging links to a [`FakeBrowser`] and operator links to the test.
pub struct TestDialer {
	browser: FakeBrowser,
	operator_links: mpsc::UnboundedSender<TransportParts<Vec<u8>>>,
}

impl TestDialer {
	pub fn new(browser: FakeBrowser) -> (Self, mpsc::UnboundedReceiver<TransportParts<Vec<u8>>>) {
		let (operator_links, rx) = mpsc::unbounded_channel();
		(
			Self {
				browser,
				operator_links,
			},
			rx,
		)
	}
}

#[async_trait]
impl Dialer for TestDialer {
	async fn dial_debugger(&self) -> Result<TransportParts<String>> {
		let (ours, theirs) = memory_pair();
		self.browser.serve(theirs);
		Ok(ours)
	}

	async fn dial_operator(&self) -> Result<TransportParts<Vec<u8>>> {
		let (ours, theirs) = memory_pair();
		self.operator_links
			.send(theirs)
			.map_err(|_| Error::ConnectionFailed {
				url: "memory://operator".into(),
				reason: "operator gone".into(),
			})?;
		Ok(ours)
	}
}

/// Short timings so reconnects happen quickly.
pub fn fast_config() -> TunnelConfig {
	TunnelConfig {
		command_timeout_ms: 1000,
		response_timeout_ms: 1000,
		reconnect_delay_ms: 50,
		..TunnelConfig::default()
	}
}

pub async fn next_link(
	links: &mut mpsc::UnboundedReceiver<TransportParts<Vec<u8>>>,
) -> TransportParts<Vec<u8>> {
	tokio::time::timeout(Duration::from_secs(5), links.recv())
		.await
		.expect("operator dial")
		.expect("dialer alive")
}

/// Sends one request frame and waits for the reply frame.
pub async fn round_trip(link: &mut TransportParts<Vec<u8>>, request: TunnelRequest) -> TunnelResponse {
	link.sender.send(request.to_frame().unwrap()).unwrap();
	let frame = tokio::time::timeout(Duration::from_secs(5), link.receiver.recv())
		.await
		.expect("reply frame")
		.expect("link open");
	TunnelResponse::from_frame(&frame).unwrap()
}
