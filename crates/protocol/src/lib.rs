//! Wire types for cdptun.
//!
//! Two protocols meet in this crate:
//!
//! - **Debugging protocol** ([`cdp`]): the JSON command/response/event messages
//!   exchanged with the remote browser's DevTools socket. Shapes are fixed by the
//!   browser and reproduced field for field.
//! - **Operator frames** ([`frame`], [`tunnel`]): the binary messages exchanged
//!   with the operator, each a JSON head followed by a `0x00` byte and a raw body.
//!
//! [`headers`] holds the pure normalization rules applied between the two.

pub mod cdp;
pub mod frame;
pub mod headers;
pub mod tunnel;

pub use cdp::{Command, ErrorPayload, Event, HeaderEntry, Message, RequestPaused, Response};
pub use frame::FrameError;
pub use headers::{
	extract_cookies, normalize_request_headers, normalize_response_headers, to_header_entries,
};
pub use tunnel::{
	CookieMap, ERROR_STATUS, HeaderMap, RequestHead, ResponseHead, TunnelRequest, TunnelResponse,
	ascii_text,
};
