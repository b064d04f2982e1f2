//! The balance proxy endpoint.
//!
//! [`BalanceHandler`] validates the request, serves a cached balance when one
//! is fresh, otherwise asks its [`BalanceSource`] and reshapes the upstream
//! JSON with gateway metadata. Every failure is a [`GatewayError`], turned
//! into a status code and JSON body in exactly one place.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::cache::{BalanceCache, CachedBalance, cache_key};
use crate::http::{Method, Request, Response, StatusCode};
use crate::router::Router;
use crate::security::apply_cors;
use crate::upstream::{Balance, BalanceSource, UpstreamError};

/// Path the balance endpoint is mounted on.
pub const BALANCE_PATH: &str = "/api/balance";

pub const GATEWAY_NAME: &str = "virtusim-gateway";
pub const GATEWAY_VERSION: &str = "1.0.0";

const FETCH_FAILED_DETAILS: &str = "Failed to fetch from Virtusim API";

/// Request-level failures of the balance endpoint.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Method not allowed. Use GET.")]
    MethodNotAllowed,

    #[error("Missing apikey parameter")]
    MissingApiKey { example: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::MethodNotAllowed,
            Self::MissingApiKey { .. } => StatusCode::BadRequest,
            Self::Upstream(_) => StatusCode::InternalServerError,
        }
    }

    pub fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ErrorBody {
            success: false,
            error: self.to_string(),
            example: None,
            details: None,
            gateway: None,
            timestamp: None,
        };
        match self {
            Self::MethodNotAllowed => {}
            Self::MissingApiKey { example } => body.example = Some(example),
            Self::Upstream(_) => {
                body.details = Some(FETCH_FAILED_DETAILS);
                body.gateway = Some(GATEWAY_NAME);
                body.timestamp = Some(iso_timestamp(Utc::now()));
            }
        }
        Response::new(status).json(&body)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    example: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// Deployment-specific values that show up in response bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Base URL callers reach this gateway on, used in the usage example.
    pub public_url: String,
    /// Reported as `gateway.server`.
    pub server_name: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:3000".to_string(),
            server_name: "rust-gateway".to_string(),
        }
    }
}

/// Handles `/api/balance`.
///
/// Caching is optional: without a cache every `GET` goes upstream.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use virtusim_gateway::cache::MemoryCache;
/// use virtusim_gateway::gateway::{BalanceHandler, GatewaySettings};
/// use virtusim_gateway::upstream::{UpstreamConfig, VirtusimClient};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = VirtusimClient::new(UpstreamConfig::default())?;
/// let handler = BalanceHandler::new(Arc::new(client), GatewaySettings::default())
///     .with_cache(Arc::new(MemoryCache::default()));
/// # Ok(())
/// # }
/// ```
pub struct BalanceHandler {
    source: Arc<dyn BalanceSource>,
    cache: Option<Arc<dyn BalanceCache>>,
    settings: GatewaySettings,
}

impl BalanceHandler {
    pub fn new(source: Arc<dyn BalanceSource>, settings: GatewaySettings) -> Self {
        Self {
            source,
            cache: None,
            settings,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn BalanceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Answers one request. CORS headers are set on every outcome.
    pub async fn handle(&self, request: &Request) -> Response {
        let response = match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        };
        apply_cors(response)
    }

    async fn dispatch(&self, request: &Request) -> Result<Response, GatewayError> {
        match request.method() {
            Method::Options => return Ok(Response::new(StatusCode::Ok)),
            Method::Get => {}
            _ => return Err(GatewayError::MethodNotAllowed),
        }

        let api_key = request
            .query_param("apikey")
            .filter(|key| !key.is_empty())
            .ok_or_else(|| GatewayError::MissingApiKey {
                example: format!(
                    "{}{BALANCE_PATH}?apikey=YOUR_KEY",
                    self.settings.public_url.trim_end_matches('/')
                ),
            })?;

        info!(api_key = %mask_api_key(api_key), "balance request");

        let key = cache_key(api_key);
        if let Some(hit) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            debug!(api_key = %mask_api_key(api_key), "serving cached balance");
            return Ok(Response::new(StatusCode::Ok).json(&cached_body(hit)));
        }

        let Balance {
            payload: data,
            response_time,
        } = self.source.fetch_balance(api_key).await.inspect_err(|err| {
            error!(api_key = %mask_api_key(api_key), error = %err, "proxy error");
        })?;
        let response_time = u64::try_from(response_time.as_millis()).unwrap_or(u64::MAX);

        if let Some(cache) = &self.cache {
            cache.put(&key, data.clone());
        }

        let mut gateway = Map::new();
        gateway.insert("name".into(), GATEWAY_NAME.into());
        gateway.insert("version".into(), GATEWAY_VERSION.into());
        gateway.insert("response_time".into(), response_time.into());
        gateway.insert("cached".into(), false.into());
        gateway.insert("server".into(), self.settings.server_name.clone().into());
        gateway.insert("timestamp".into(), iso_timestamp(Utc::now()).into());

        let mut trailer = Map::new();
        trailer.insert("gateway".into(), Value::Object(gateway));

        info!(response_time_ms = response_time, "balance fetched");
        Ok(Response::new(StatusCode::Ok).json(&merge(data, trailer)))
    }
}

/// Mounts `handler` on [`BALANCE_PATH`].
pub fn router(handler: Arc<BalanceHandler>) -> Router {
    let mut router = Router::new();
    router.route_path(BALANCE_PATH, move |request: Request| {
        let handler = Arc::clone(&handler);
        async move { handler.handle(&request).await }
    });
    router
}

fn cached_body(hit: CachedBalance) -> Value {
    let mut trailer = Map::new();
    trailer.insert("cached".into(), true.into());
    trailer.insert("cached_at".into(), iso_timestamp(hit.stored_at).into());
    trailer.insert("gateway".into(), GATEWAY_NAME.into());
    merge(hit.payload, trailer)
}

/// `{success: true, ...data, ...trailer}`, later keys overriding earlier ones.
///
/// A non-object `data` is kept whole under `data`.
fn merge(data: Value, trailer: Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert("success".into(), true.into());
    match data {
        Value::Object(fields) => body.extend(fields),
        other => {
            body.insert("data".into(), other);
        }
    }
    body.extend(trailer);
    Value::Object(body)
}

fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn mask_api_key(api_key: &str) -> String {
    let prefix: String = api_key.chars().take(8).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::cache::MemoryCache;

    enum Reply {
        Json(Value),
        Status(u16, &'static str),
        BadJson,
    }

    const MOCK_RESPONSE_TIME: Duration = Duration::from_millis(42);

    struct MockSource {
        reply: Mutex<Reply>,
        calls: AtomicUsize,
    }

    impl MockSource {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(reply),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BalanceSource for MockSource {
        async fn fetch_balance(&self, _api_key: &str) -> Result<Balance, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &*self.reply.lock().unwrap() {
                Reply::Json(value) => Ok(Balance {
                    payload: value.clone(),
                    response_time: MOCK_RESPONSE_TIME,
                }),
                Reply::Status(status, reason) => Err(UpstreamError::Status {
                    status: *status,
                    reason: (*reason).to_string(),
                }),
                Reply::BadJson => Err(UpstreamError::Decode(
                    "expected value at line 1 column 1".to_string(),
                )),
            }
        }
    }

    fn request(method: &str, target: &str) -> Request {
        let raw = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn handler(source: &Arc<MockSource>) -> BalanceHandler {
        BalanceHandler::new(source.clone(), GatewaySettings::default())
    }

    fn cached_handler(source: &Arc<MockSource>) -> BalanceHandler {
        handler(source).with_cache(Arc::new(MemoryCache::default()))
    }

    fn assert_cors(response: &Response) {
        let h = response.headers();
        assert_eq!(h.get("access-control-allow-origin"), Some("*"));
        assert_eq!(h.get("access-control-allow-methods"), Some("GET,OPTIONS,POST"));
        assert_eq!(h.get("access-control-allow-headers"), Some("Content-Type"));
    }

    fn body(response: &Response) -> Value {
        response.json_payload().expect("JSON body")
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(GatewayError::MethodNotAllowed.status(), StatusCode::MethodNotAllowed);
        assert_eq!(
            GatewayError::MissingApiKey { example: String::new() }.status(),
            StatusCode::BadRequest
        );
        assert_eq!(
            GatewayError::Upstream(UpstreamError::Timeout).status(),
            StatusCode::InternalServerError
        );
    }

    #[test]
    fn api_key_is_masked_to_eight_chars() {
        assert_eq!(mask_api_key("0123456789abcdef"), "01234567...");
        assert_eq!(mask_api_key("abc"), "abc...");
    }

    #[test]
    fn timestamps_are_iso_with_millis() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:20:30.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(iso_timestamp(at), "2024-05-01T10:20:30.123Z");
    }

    #[tokio::test]
    async fn options_is_empty_200_with_cors() {
        let source = MockSource::new(Reply::Json(json!({})));
        let res = handler(&source).handle(&request("OPTIONS", "/api/balance")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.payload().is_empty());
        assert_cors(&res);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn other_methods_are_405() {
        let source = MockSource::new(Reply::Json(json!({})));
        let h = handler(&source);
        for method in ["POST", "PUT", "DELETE", "PATCH", "HEAD"] {
            let res = h.handle(&request(method, "/api/balance?apikey=k")).await;
            assert_eq!(res.status(), StatusCode::MethodNotAllowed, "{method}");
            assert_eq!(
                body(&res),
                json!({"success": false, "error": "Method not allowed. Use GET."})
            );
            assert_cors(&res);
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn missing_or_empty_apikey_is_400() {
        let source = MockSource::new(Reply::Json(json!({})));
        let h = handler(&source);
        for target in ["/api/balance", "/api/balance?apikey=", "/api/balance?key=x"] {
            let res = h.handle(&request("GET", target)).await;
            assert_eq!(res.status(), StatusCode::BadRequest, "{target}");
            let b = body(&res);
            assert_eq!(b["success"], false);
            assert_eq!(b["error"], "Missing apikey parameter");
            assert_eq!(
                b["example"],
                "http://localhost:3000/api/balance?apikey=YOUR_KEY"
            );
            assert_cors(&res);
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn success_spreads_upstream_fields_and_adds_gateway() {
        let source = MockSource::new(Reply::Json(json!({"pulsa": "1000"})));
        let res = handler(&source)
            .handle(&request("GET", "/api/balance?apikey=secret-key"))
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_cors(&res);

        let b = body(&res);
        assert_eq!(b["success"], true);
        assert_eq!(b["pulsa"], "1000");
        let gateway = &b["gateway"];
        assert_eq!(gateway["name"], "virtusim-gateway");
        assert_eq!(gateway["version"], "1.0.0");
        assert_eq!(gateway["cached"], false);
        assert_eq!(gateway["server"], "rust-gateway");
        assert_eq!(gateway["response_time"], 42);
        assert!(gateway["timestamp"].as_str().unwrap().ends_with('Z'));

        let keys: Vec<_> = b.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["success", "pulsa", "gateway"]);
    }

    #[tokio::test]
    async fn upstream_fields_override_success_but_not_gateway() {
        let source = MockSource::new(Reply::Json(json!({
            "success": false,
            "gateway": "spoofed",
            "data": {"msg": "Invalid API key"}
        })));
        let b = body(
            &handler(&source)
                .handle(&request("GET", "/api/balance?apikey=k"))
                .await,
        );
        assert_eq!(b["success"], false);
        assert_eq!(b["data"]["msg"], "Invalid API key");
        assert_eq!(b["gateway"]["name"], "virtusim-gateway");
    }

    #[tokio::test]
    async fn non_object_upstream_body_lands_under_data() {
        let source = MockSource::new(Reply::Json(json!([1, 2])));
        let b = body(
            &handler(&source)
                .handle(&request("GET", "/api/balance?apikey=k"))
                .await,
        );
        assert_eq!(b["success"], true);
        assert_eq!(b["data"], json!([1, 2]));
    }

    #[tokio::test]
    async fn upstream_status_error_is_500() {
        let source = MockSource::new(Reply::Status(500, "Internal Server Error"));
        let res = handler(&source)
            .handle(&request("GET", "/api/balance?apikey=k"))
            .await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_cors(&res);
        let b = body(&res);
        assert_eq!(b["success"], false);
        assert_eq!(b["error"], "Virtusim returned 500: Internal Server Error");
        assert_eq!(b["details"], "Failed to fetch from Virtusim API");
        assert_eq!(b["gateway"], "virtusim-gateway");
        assert!(b["timestamp"].is_string());
    }

    #[tokio::test]
    async fn invalid_json_is_500_and_not_cached() {
        let source = MockSource::new(Reply::BadJson);
        let cache = Arc::new(MemoryCache::default());
        let h = handler(&source).with_cache(cache.clone());
        let res = h.handle(&request("GET", "/api/balance?apikey=k")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(body(&res)["details"], "Failed to fetch from Virtusim API");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn second_request_within_ttl_is_served_from_cache() {
        let source = MockSource::new(Reply::Json(json!({"pulsa": "1000"})));
        let h = cached_handler(&source);
        assert!(h.caching_enabled());

        let first = body(&h.handle(&request("GET", "/api/balance?apikey=k")).await);
        assert_eq!(first["gateway"]["cached"], false);

        let res = h.handle(&request("GET", "/api/balance?apikey=k")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_cors(&res);
        let second = body(&res);
        assert_eq!(second["success"], true);
        assert_eq!(second["pulsa"], "1000");
        assert_eq!(second["cached"], true);
        assert_eq!(second["gateway"], "virtusim-gateway");
        assert!(second["cached_at"].as_str().unwrap().ends_with('Z'));

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_goes_upstream_again() {
        let source = MockSource::new(Reply::Json(json!({"pulsa": "1000"})));
        let h = cached_handler(&source);

        h.handle(&request("GET", "/api/balance?apikey=k")).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let b = body(&h.handle(&request("GET", "/api/balance?apikey=k")).await);

        assert_eq!(b["gateway"]["cached"], false);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn cache_is_keyed_per_api_key() {
        let source = MockSource::new(Reply::Json(json!({"pulsa": "1000"})));
        let h = cached_handler(&source);
        h.handle(&request("GET", "/api/balance?apikey=a")).await;
        h.handle(&request("GET", "/api/balance?apikey=b")).await;
        h.handle(&request("GET", "/api/balance?apikey=a")).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn without_cache_every_request_goes_upstream() {
        let source = MockSource::new(Reply::Json(json!({"pulsa": "1000"})));
        let h = handler(&source);
        assert!(!h.caching_enabled());
        for _ in 0..3 {
            let b = body(&h.handle(&request("GET", "/api/balance?apikey=k")).await);
            assert_eq!(b["gateway"]["cached"], false);
        }
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn failures_are_not_retried() {
        let source = MockSource::new(Reply::Status(502, "Bad Gateway"));
        let h = cached_handler(&source);
        h.handle(&request("GET", "/api/balance?apikey=k")).await;
        assert_eq!(source.calls(), 1);

        *source.reply.lock().unwrap() = Reply::Json(json!({"pulsa": "5"}));
        let b = body(&h.handle(&request("GET", "/api/balance?apikey=k")).await);
        assert_eq!(b["pulsa"], "5");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn router_mounts_handler_on_balance_path() {
        let source = MockSource::new(Reply::Json(json!({"pulsa": "1"})));
        let router = router(Arc::new(handler(&source)));
        let ok = router
            .route(request("GET", "/api/balance?apikey=k"))
            .await;
        assert_eq!(ok.status(), StatusCode::Ok);
        let missing = router.route(request("GET", "/api/other")).await;
        assert_eq!(missing.status(), StatusCode::NotFound);
    }
}
