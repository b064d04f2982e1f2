//! Cross-Origin Resource Sharing headers for gateway responses.
//!
//! The balance endpoint is called straight from browsers on arbitrary
//! origins, so every response the gateway writes carries the same permissive
//! `Access-Control-*` set regardless of the request's `Origin`.

use crate::Response;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET,OPTIONS,POST";
pub const ALLOW_HEADERS: &str = "Content-Type";

/// Sets the CORS headers on `response`, replacing any already present.
///
/// # Examples
///
/// ```rust
/// use virtusim_gateway::security::apply_cors;
/// use virtusim_gateway::{Response, StatusCode};
///
/// let response = apply_cors(Response::new(StatusCode::Ok));
/// assert_eq!(response.headers().get("access-control-allow-origin"), Some("*"));
/// ```
pub fn apply_cors(mut response: Response) -> Response {
    response.set_header("Access-Control-Allow-Origin", ALLOW_ORIGIN);
    response.set_header("Access-Control-Allow-Methods", ALLOW_METHODS);
    response.set_header("Access-Control-Allow-Headers", ALLOW_HEADERS);
    response
}
