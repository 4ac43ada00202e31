//! # Dispatch Fan-out
//!
//! Turns a validated batch into independent sub-requests, each carrying a
//! completion handle into the batch's aggregation context.
//!
//! The context is registered before the first sub-request reaches the dispatcher,
//! so even a dispatcher that answers synchronously on the calling thread finds it
//! in place. Fan-out never waits on a sub-request.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::aggregator::{BatchSlot, Completion};
use crate::protocol::dispatcher::Dispatch;
use crate::protocol::message::{Header, QueryParams, Request, Response};
use crate::protocol::session::Identity;
use crate::transport::Outlet;
use crate::utils::metrics::global_metrics;

/// Everything a resource handler needs to serve one logical request
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub uuid: String,
    pub method: String,
    /// Request path with whitespace percent-encoded
    pub path: String,
    /// `base_path` joined with `path`
    pub request_uri: String,
    pub content_type: Option<String>,
    pub headers: Vec<Header>,
    pub query: QueryParams,
    pub body: Option<Bytes>,
    /// Identity of the session that sent the batch
    pub identity: Identity,
}

impl RequestParts {
    /// Path without any inline query string, as used for routing
    pub fn route_path(&self) -> &str {
        self.path
            .split_once('?')
            .map_or(self.path.as_str(), |(path, _)| path)
    }

    /// All values of header `name`, compared case-insensitively
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// One dispatchable unit of a batch
pub struct SubRequest {
    parts: RequestParts,
    completion: Completion,
}

impl SubRequest {
    pub fn parts(&self) -> &RequestParts {
        &self.parts
    }

    pub fn uuid(&self) -> &str {
        &self.parts.uuid
    }

    /// Separate the request from its completion handle
    pub fn into_parts(self) -> (RequestParts, Completion) {
        (self.parts, self.completion)
    }

    /// Answer this sub-request
    pub fn complete(self, response: Response) -> Result<()> {
        self.completion.complete(response)
    }

    /// Keep the request but answer it later by uuid, through
    /// `Connection::on_sub_response_ready`. Dropping a `SubRequest` without
    /// completing or deferring it answers `500`.
    pub fn defer(self) -> RequestParts {
        let _ = self.completion.defer();
        self.parts
    }
}

/// Percent-encode whitespace runs inside a path. Surrounding whitespace is dropped.
pub fn encode_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    let mut in_whitespace = false;
    for c in path.trim().chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                encoded.push_str("%20");
                in_whitespace = true;
            }
        } else {
            encoded.push(c);
            in_whitespace = false;
        }
    }
    encoded
}

/// Join a mount path and a request path without doubling the separator
pub fn join_uri(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.strip_prefix('/')) {
        (true, Some(rest)) => format!("{base}{rest}"),
        _ => format!("{base}{path}"),
    }
}

fn to_parts(request: Request, identity: &Identity, config: &ServerConfig) -> RequestParts {
    let path = encode_path(&request.path);
    let request_uri = join_uri(&config.base_path, &path);
    let content_type = request.content_type().map(str::to_string);

    RequestParts {
        uuid: request.uuid,
        method: request.method,
        path,
        request_uri,
        content_type,
        headers: request.headers,
        query: request.query,
        body: request.body,
        identity: identity.clone(),
    }
}

/// Open one aggregation context for `requests` and hand every sub-request to
/// `dispatcher`. Returns the number dispatched.
#[instrument(skip_all, fields(identity = %identity, size = requests.len()))]
pub(crate) fn fan_out(
    identity: &Identity,
    requests: Vec<Request>,
    config: &ServerConfig,
    slot: &BatchSlot,
    outlet: Arc<dyn Outlet>,
    dispatcher: &dyn Dispatch,
) -> Result<usize> {
    let (_context, completions) = slot.open(identity.clone(), &requests, outlet)?;
    let size = requests.len();
    global_metrics().batch_dispatched(size);

    for (request, completion) in requests.into_iter().zip(completions) {
        let parts = to_parts(request, identity, config);
        debug!(uuid = %parts.uuid, method = %parts.method, path = %parts.path, "Dispatching sub-request");
        dispatcher.dispatch(SubRequest { parts, completion });
    }
    Ok(size)
}
