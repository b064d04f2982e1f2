//! Path routing for the gateway.
//!
//! [`Router`] maps exact URL paths to handlers. Method checks are left to the
//! handler itself, since the balance endpoint answers `OPTIONS` and rejects
//! unsupported methods with its own JSON body. Trailing slashes are normalized
//! on both patterns and incoming paths.

use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::security::apply_cors;
use crate::{Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler.
pub type Handler =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(request))
    }
}

fn normalize(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

struct Route {
    path: String,
    handler: Handler,
}

/// Dispatches requests to the first route registered for their path.
///
/// Unmatched paths get a `404` JSON body with the gateway's CORS headers.
///
/// # Examples
///
/// ```rust,no_run
/// use virtusim_gateway::{Router, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.route_path("/ping", |_req| async { Response::new(StatusCode::Ok) });
/// ```
pub struct Router {
    routes: Vec<Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `handler` for every method on `path`.
    pub fn route_path(&mut self, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |req| handler.call(req));
        self.routes.push(Route {
            path: normalize(path).to_owned(),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` to the first matching route.
    pub async fn route(&self, request: Request) -> Response {
        let path = normalize(request.path());

        if let Some(route) = self.routes.iter().find(|r| r.path == path) {
            return (route.handler)(request).await;
        }

        apply_cors(Response::new(StatusCode::NotFound).json(&json!({
            "success": false,
            "error": "Not found",
        })))
    }
}
