use crate::config::ServerConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::fanout::{RequestParts, SubRequest};
use crate::protocol::message::Response;
use crate::utils::metrics::Timer;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// External executor for sub-requests.
///
/// Implementations may complete sub-requests in any order, on any task, and must
/// not block the caller. Every `SubRequest` is answered exactly once, either with
/// `SubRequest::complete` or, if dropped, with a 500 response.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, request: SubRequest);
}

impl<F> Dispatch for F
where
    F: Fn(SubRequest) + Send + Sync,
{
    fn dispatch(&self, request: SubRequest) {
        self(request)
    }
}

type HandlerFn = dyn Fn(RequestParts) -> BoxFuture<'static, Result<Response>> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: String,
    path: String,
}

impl RouteKey {
    fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
        }
    }
}

/// Route-table dispatcher running each sub-request on its own Tokio task.
///
/// Unknown routes answer `404`, handler errors `500`, and handlers exceeding the
/// sub-request timeout `504`. `dispatch` must be called from within a Tokio runtime.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<RouteKey, Arc<HandlerFn>>>>,
    fallback: Arc<RwLock<Option<Arc<HandlerFn>>>>,
    timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SUB_REQUEST_TIMEOUT)
    }
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            fallback: Arc::new(RwLock::new(None)),
            timeout,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.sub_request_timeout)
    }

    pub fn register<F, Fut>(&self, method: &str, path: &str, handler: F) -> Result<()>
    where
        F: Fn(RequestParts) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;

        handlers.insert(RouteKey::new(method, path), boxed(handler));
        Ok(())
    }

    /// Handler for any request no route matches
    pub fn register_fallback<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(RequestParts) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let mut fallback = self
            .fallback
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;

        *fallback = Some(boxed(handler));
        Ok(())
    }

    fn resolve(&self, method: &str, path: &str) -> Result<Option<Arc<HandlerFn>>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;

        if let Some(handler) = handlers.get(&RouteKey::new(method, path)) {
            return Ok(Some(Arc::clone(handler)));
        }

        let fallback = self
            .fallback
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;
        Ok(fallback.clone())
    }
}

impl Dispatch for Dispatcher {
    fn dispatch(&self, request: SubRequest) {
        let (parts, completion) = request.into_parts();
        let handler = match self.resolve(&parts.method, parts.route_path()) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(error = %e, "Route lookup failed");
                None
            }
        };
        let timeout = self.timeout;

        tokio::spawn(async move {
            let _timer = Timer::start("sub_request");
            let uuid = parts.uuid.clone();

            let response = match handler {
                None => {
                    debug!(%uuid, method = %parts.method, path = %parts.path, "No route");
                    Response::not_found()
                }
                Some(handler) => match tokio::time::timeout(timeout, handler(parts)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        warn!(%uuid, error = %e, "Handler failed");
                        Response::internal_error()
                    }
                    Err(_) => {
                        warn!(%uuid, timeout_ms = timeout.as_millis() as u64, "Handler timed out");
                        Response::gateway_timeout()
                    }
                },
            };

            if let Err(e) = completion.complete(response) {
                debug!(%uuid, error = %e, "Sub-response not recorded");
            }
        });
    }
}

fn boxed<F, Fut>(handler: F) -> Arc<HandlerFn>
where
    F: Fn(RequestParts) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(move |parts| handler(parts).boxed())
}
