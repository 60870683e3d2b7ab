//! Per-request maintenance gate
//!
//! For every request the gate takes a snapshot of the policy store, asks the
//! matcher whether the request is blocked, and either hands the request to the
//! downstream handler untouched or answers with a synthesized 503.

use crate::config::Strategy;
use crate::error::UpstreamError;
use crate::intercept::InterceptedResponse;
use crate::matcher;
use crate::store::SharedPolicyStore;
use crate::synth::{self, negotiate_accept, negotiate_content_type};
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, ACCEPT};
use hyper::{Request, Response};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long an intercepted downstream body is drained before it is dropped
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Response body type produced by the gate and its downstream handlers
pub type GateBody = BoxBody<Bytes, hyper::Error>;

/// The handler behind the gate
pub trait Downstream<B>: Send + Sync {
    fn call(
        &self,
        req: Request<B>,
    ) -> impl Future<Output = Result<Response<GateBody>, UpstreamError>> + Send;
}

impl<B, D: Downstream<B>> Downstream<B> for Arc<D> {
    fn call(
        &self,
        req: Request<B>,
    ) -> impl Future<Output = Result<Response<GateBody>, UpstreamError>> + Send {
        (**self).call(req)
    }
}

/// Allows or blocks requests according to the current policy set.
///
/// Holds only shared references and no per-request state, so one instance can
/// serve any number of concurrent requests.
pub struct Gate<D> {
    store: SharedPolicyStore,
    downstream: D,
    strategy: Strategy,
    drain_timeout: Duration,
}

impl<D> Gate<D> {
    pub fn new(store: SharedPolicyStore, downstream: D, strategy: Strategy) -> Self {
        Self {
            store,
            downstream,
            strategy,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn store(&self) -> &SharedPolicyStore {
        &self.store
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<GateBody>
    where
        D: Downstream<B>,
        B: Send,
    {
        let policies = self.store.current();
        let Some(policy) = matcher::evaluate(&req, &policies) else {
            return self.pass_through(req).await;
        };

        debug!(
            host = matcher::request_host(&req).unwrap_or_default(),
            pattern = %policy.host_pattern,
            strategy = ?self.strategy,
            "Request blocked by maintenance policy"
        );

        let accept = req
            .headers()
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let (representation, headers) = match self.strategy {
            Strategy::ShortCircuit => (negotiate_accept(accept.as_deref()), HeaderMap::new()),
            Strategy::Intercept => match self.downstream.call(req).await {
                Ok(response) => {
                    let intercepted = InterceptedResponse::capture(response, self.drain_timeout).await;
                    debug!(
                        status = %intercepted.status(),
                        content_type = intercepted.content_type().unwrap_or_default(),
                        discarded_bytes = intercepted.discarded_bytes(),
                        "Intercepted downstream response"
                    );
                    (
                        negotiate_content_type(intercepted.content_type()),
                        intercepted.into_headers(),
                    )
                }
                Err(e) => {
                    warn!(error = %e, "Downstream failed during interception, negotiating from Accept");
                    (negotiate_accept(accept.as_deref()), HeaderMap::new())
                }
            },
        };

        synth::synthesize(representation, policy).into_response(headers)
    }

    async fn pass_through<B>(&self, req: Request<B>) -> Response<GateBody>
    where
        D: Downstream<B>,
    {
        match self.downstream.call(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Downstream request failed");
                e.to_response()
            }
        }
    }
}
