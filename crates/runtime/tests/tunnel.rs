mod common;

use std::time::Duration;

use cdptun_protocol::TunnelRequest;
use cdptun_runtime::Supervisor;
use common::{FakeBrowser, Route, TestDialer, fast_config, next_link, round_trip};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn start(browser: &FakeBrowser) -> (
	oneshot::Sender<()>,
	JoinHandle<()>,
	tokio::sync::mpsc::UnboundedReceiver<cdptun_runtime::TransportParts<Vec<u8>>>,
) {
	let (dialer, links) = TestDialer::new(browser.clone());
	let supervisor = Supervisor::new(dialer, &fast_config());
	let (stop_tx, stop_rx) = oneshot::channel::<()>();
	let handle = tokio::spawn(supervisor.run_until(async move {
		let _ = stop_rx.await;
	}));
	(stop_tx, handle, links)
}

async fn stop(stop_tx: oneshot::Sender<()>, handle: JoinHandle<()>) {
	let _ = stop_tx.send(());
	tokio::time::timeout(Duration::from_secs(5), handle)
		.await
		.expect("supervisor stops")
		.unwrap();
}

/// The iframe opened for the only request so far was removed again.
fn assert_frame_removed(browser: &FakeBrowser) {
	assert_eq!(browser.count("Runtime.evaluate"), 2);
	let cleanup = browser.last("Runtime.evaluate").unwrap();
	let expression = cleanup["params"]["expression"].as_str().unwrap();
	assert!(expression.contains("getElementById(\"tunnel-frame-1\")"), "{expression}");
	assert!(expression.contains(".remove()"), "{expression}");
}

#[tokio::test]
async fn get_request_is_tunneled() {
	let browser = FakeBrowser::new();
	browser.route("http://example.local/health", Route::text(200, "ok"));
	let (stop_tx, handle, mut links) = start(&browser);

	let mut link = next_link(&mut links).await;
	let response = round_trip(&mut link, TunnelRequest::new("GET", "http://example.local/health")).await;

	assert_eq!(response.head.code, 200);
	assert_eq!(response.head.headers.len(), 1);
	assert_eq!(response.head.headers["content-type"], "text/plain");
	assert!(response.head.cookies.is_empty());
	assert_eq!(response.body.as_deref(), Some(&b"ok"[..]));

	// interception was on before the first request was driven
	let methods = browser.methods();
	let enable = methods.iter().position(|m| m == "Fetch.enable").unwrap();
	let evaluate = methods.iter().position(|m| m == "Runtime.evaluate").unwrap();
	assert!(enable < evaluate);

	let enable = browser.last("Fetch.enable").unwrap();
	assert_eq!(enable["sessionId"], common::SESSION_ID);
	assert_eq!(
		enable["params"]["patterns"],
		serde_json::json!([
			{"requestStage": "Request", "resourceType": "Document"},
			{"requestStage": "Response", "resourceType": "Document"}
		])
	);

	let failed = browser.last("Fetch.failRequest").unwrap();
	assert_eq!(failed["params"]["errorReason"], "Failed");
	assert_eq!(browser.count("Runtime.evaluate"), 2);

	stop(stop_tx, handle).await;
}

#[tokio::test]
async fn request_overrides_reach_the_browser() {
	let browser = FakeBrowser::new();
	browser.route(
		"http://192.168.1.1/login",
		Route::Respond {
			status: 302,
			headers: vec![
				("Location".into(), "/home".into()),
				("Content-Encoding".into(), "gzip".into()),
			],
			body: String::new(),
			cookie: Some("sid=abc123; lang=en".into()),
		},
	);
	let (stop_tx, handle, mut links) = start(&browser);

	let mut link = next_link(&mut links).await;
	let request = TunnelRequest::new("POST", "http://192.168.1.1/login")
		.header("Content-Type", "application/x-www-form-urlencoded")
		.header("Host", "192.168.1.1")
		.header("Content-Length", "17")
		.body("user=admin&pw=pw");
	let response = round_trip(&mut link, request).await;

	assert_eq!(response.head.code, 302);
	assert_eq!(response.head.headers["location"], "/home");
	assert!(!response.head.headers.contains_key("content-encoding"));
	assert_eq!(response.head.cookies["sid"], "abc123");
	assert_eq!(response.head.cookies["lang"], "en");
	assert_eq!(response.body, None);

	let continued = browser.last("Fetch.continueRequest").unwrap();
	let params = &continued["params"];
	assert_eq!(params["requestId"], "interception-job-1.0");
	assert_eq!(params["method"], "POST");
	assert_eq!(params["postData"], "user=admin&pw=pw");
	assert_eq!(
		params["headers"],
		serde_json::json!([
			{"name": "content-type", "value": "application/x-www-form-urlencoded"},
			{"name": "referer", "value": ""}
		])
	);

	stop(stop_tx, handle).await;
}

#[tokio::test]
async fn unreachable_host_returns_error_frame() {
	let browser = FakeBrowser::new();
	let (stop_tx, handle, mut links) = start(&browser);

	let mut link = next_link(&mut links).await;
	let response = round_trip(&mut link, TunnelRequest::new("GET", "http://nowhere.invalid/")).await;

	assert_eq!(response.head.code, 400);
	assert_eq!(response.head.headers["content-type"], "text/plain");
	assert!(response.head.cookies.is_empty());
	assert_eq!(
		response.body.as_deref(),
		Some(&b"tunnel: network error: NameNotResolved\n"[..])
	);
	assert_frame_removed(&browser);

	// the link stays usable
	browser.route("http://example.local/health", Route::text(200, "ok"));
	let response = round_trip(&mut link, TunnelRequest::new("GET", "http://example.local/health")).await;
	assert_eq!(response.head.code, 200);

	stop(stop_tx, handle).await;
}

#[tokio::test]
async fn binary_body_is_rejected() {
	let browser = FakeBrowser::new();
	browser.route("http://example.local/upload", Route::text(200, "stored"));
	let (stop_tx, handle, mut links) = start(&browser);

	let mut link = next_link(&mut links).await;
	let request = TunnelRequest::new("POST", "http://example.local/upload").body(vec![b'a', 0xc3, 0xa9]);
	let response = round_trip(&mut link, request).await;

	assert_eq!(response.head.code, 400);
	let body = String::from_utf8(response.body.unwrap()).unwrap();
	assert!(body.starts_with("tunnel: request body must be text"), "{body}");
	assert_eq!(browser.count("Fetch.continueRequest"), 0);
	assert_frame_removed(&browser);

	stop(stop_tx, handle).await;
}

#[tokio::test]
async fn operator_reconnect_reenables_interception() {
	let browser = FakeBrowser::new();
	browser.route("http://example.local/health", Route::text(200, "ok"));
	let (stop_tx, handle, mut links) = start(&browser);

	let mut first = next_link(&mut links).await;
	assert_eq!(
		round_trip(&mut first, TunnelRequest::new("GET", "http://example.local/health"))
			.await
			.head
			.code,
		200
	);
	drop(first);

	browser.wait_for("Fetch.disable", 1).await;
	let mut second = next_link(&mut links).await;
	browser.wait_for("Fetch.enable", 2).await;

	let response = round_trip(&mut second, TunnelRequest::new("GET", "http://example.local/health")).await;
	assert_eq!(response.head.code, 200);

	// no new target discovery for an operator-only reconnect
	assert_eq!(browser.count("Target.attachToTarget"), 1);
	let methods = browser.methods();
	let disable = methods.iter().position(|m| m == "Fetch.disable").unwrap();
	let second_enable = methods.iter().rposition(|m| m == "Fetch.enable").unwrap();
	assert!(disable < second_enable);

	stop(stop_tx, handle).await;
}

#[tokio::test]
async fn failed_disable_still_redials_and_reenables() {
	let browser = FakeBrowser::new();
	browser.route("http://example.local/health", Route::text(200, "ok"));
	browser.fail_method("Fetch.disable");
	let (stop_tx, handle, mut links) = start(&browser);

	let first = next_link(&mut links).await;
	browser.wait_for("Fetch.enable", 1).await;
	drop(first);

	browser.wait_for("Fetch.disable", 1).await;
	let mut second = next_link(&mut links).await;
	browser.wait_for("Fetch.enable", 2).await;

	let response = round_trip(&mut second, TunnelRequest::new("GET", "http://example.local/health")).await;
	assert_eq!(response.head.code, 200);
	// the debugging link survived the failed teardown
	assert_eq!(browser.count("Target.attachToTarget"), 1);

	stop(stop_tx, handle).await;
}

#[tokio::test]
async fn debugger_reconnect_reattaches_and_redials_operator() {
	let browser = FakeBrowser::new();
	browser.route("http://example.local/health", Route::text(200, "ok"));
	let (stop_tx, handle, mut links) = start(&browser);

	let mut first = next_link(&mut links).await;
	browser.wait_for("Fetch.enable", 1).await;

	browser.disconnect();

	// the operator link is torn down along with the debugging link
	let closed = tokio::time::timeout(Duration::from_secs(5), first.receiver.recv())
		.await
		.expect("operator link closes");
	assert!(closed.is_none());

	browser.wait_for("Target.attachToTarget", 2).await;
	let mut second = next_link(&mut links).await;
	let response = round_trip(&mut second, TunnelRequest::new("GET", "http://example.local/health")).await;
	assert_eq!(response.head.code, 200);

	stop(stop_tx, handle).await;
}

#[tokio::test]
async fn missing_target_keeps_retrying_without_operator() {
	let browser = FakeBrowser::with_title("some other page");
	let (stop_tx, handle, mut links) = start(&browser);

	browser.wait_for("Target.getTargets", 3).await;
	assert_eq!(browser.count("Target.attachToTarget"), 0);
	assert!(links.try_recv().is_err());

	stop(stop_tx, handle).await;
}
