//! Capture of a downstream response whose body is going to be replaced

use crate::gate::GateBody;
use http::response::Parts;
use http_body_util::BodyExt;
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Stop draining after this many bytes and drop the rest of the body
const MAX_DRAIN_BYTES: u64 = 1024 * 1024;

/// Head of a downstream response whose body bytes were read and thrown away.
///
/// Draining (rather than dropping) a short body lets the pooled upstream
/// connection be reused. Only the head is needed for negotiation, so a body
/// that is still streaming when `drain_timeout` expires is dropped.
#[derive(Debug)]
pub struct InterceptedResponse {
    parts: Parts,
    discarded: u64,
}

impl InterceptedResponse {
    pub async fn capture(response: Response<GateBody>, drain_timeout: Duration) -> Self {
        let (parts, body) = response.into_parts();
        let mut discarded = 0u64;

        if tokio::time::timeout(drain_timeout, drain(body, &mut discarded))
            .await
            .is_err()
        {
            debug!(
                discarded_bytes = discarded,
                timeout_ms = drain_timeout.as_millis() as u64,
                "Downstream body still streaming, dropping it"
            );
        }

        Self { parts, discarded }
    }

    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    /// The Content-Type the downstream handler set, if any
    pub fn content_type(&self) -> Option<&str> {
        self.parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    pub fn into_headers(self) -> HeaderMap {
        self.parts.headers
    }
}

async fn drain(mut body: GateBody, discarded: &mut u64) {
    while *discarded < MAX_DRAIN_BYTES {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    *discarded += data.len() as u64;
                }
            }
            Some(Err(e)) => {
                debug!(error = %e, "Downstream body failed while discarding");
                break;
            }
            None => break,
        }
    }
}
