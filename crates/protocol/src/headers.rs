//! Header and cookie normalization.
//!
//! Pure functions applied on the way into the browser (request overrides) and
//! on the way back to the operator (captured response).

use crate::cdp::HeaderEntry;
use crate::tunnel::{CookieMap, HeaderMap};

/// Headers the browser fills in unless explicitly overridden. A blank value
/// suppresses the default; for `referer` it removes the header entirely.
pub const DEFAULT_REQUEST_HEADERS: &[&str] = &["referer"];

/// Request headers the transport recomputes.
pub const STRIPPED_REQUEST_HEADERS: &[&str] =
	&["content-length", "content-encoding", "accept-encoding", "host"];

/// Response headers dropped before relaying. `status` is a pseudo-header some
/// browsers report alongside real ones.
pub const STRIPPED_RESPONSE_HEADERS: &[&str] = &["content-length", "content-encoding", "status"];

/// Key under which the browser reports the cookies it attached, with this
/// exact capitalization.
pub const ECHOED_COOKIE_HEADER: &str = "Cookie";

/// Lowercases names, blanks default headers and strips hop-specific ones.
pub fn normalize_request_headers(headers: &HeaderMap) -> HeaderMap {
	let mut normalized: HeaderMap = headers
		.iter()
		.map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
		.collect();

	for name in DEFAULT_REQUEST_HEADERS {
		normalized.entry((*name).to_string()).or_default();
	}
	for name in STRIPPED_REQUEST_HEADERS {
		normalized.remove(*name);
	}

	normalized
}

/// Converts captured response headers into a lowercase map without the
/// stripped entries. Later duplicates win.
pub fn normalize_response_headers(entries: &[HeaderEntry]) -> HeaderMap {
	let mut headers: HeaderMap = entries
		.iter()
		.map(|entry| (entry.name.to_ascii_lowercase(), entry.value.clone()))
		.collect();

	for name in STRIPPED_RESPONSE_HEADERS {
		headers.remove(*name);
	}

	headers
}

/// Parses the echoed `Cookie` header into a name/value map.
///
/// Pairs split at the first `=`; a segment without `=` maps to an empty value
/// and blank segments are skipped.
pub fn extract_cookies(echoed_request_headers: &HeaderMap) -> CookieMap {
	let Some(raw) = echoed_request_headers.get(ECHOED_COOKIE_HEADER) else {
		return CookieMap::new();
	};

	raw.split(';')
		.filter_map(|pair| {
			let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
			let name = name.trim();
			(!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
		})
		.collect()
}

/// Header list in the shape `Fetch.continueRequest` expects.
pub fn to_header_entries(headers: &HeaderMap) -> Vec<HeaderEntry> {
	headers
		.iter()
		.map(|(name, value)| HeaderEntry::new(name.clone(), value.clone()))
		.collect()
}
