//! Content negotiation and the substitute 503 response

use crate::gate::GateBody;
use crate::policy::Policy;
use crate::template;
use futures::stream;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

/// Headers describing the original resource; they must not survive substitution
const REPRESENTATION_HEADERS: [HeaderName; 6] = [
    header::LAST_MODIFIED,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::CONTENT_RANGE,
    header::TRANSFER_ENCODING,
    header::ETAG,
];

/// Body representation of a blocked response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Json,
    Text,
    Html,
}

impl Representation {
    pub fn content_type(&self) -> &'static str {
        match self {
            Representation::Json => "application/json; charset=utf-8",
            Representation::Text => "text/plain; charset=utf-8",
            Representation::Html => "text/html; charset=utf-8",
        }
    }

    fn from_media_type(media_type: &str) -> Option<Self> {
        let media_type = media_type.trim().to_ascii_lowercase();
        match media_type.as_str() {
            "application/json" => Some(Representation::Json),
            "text/plain" => Some(Representation::Text),
            "text/html" | "application/xhtml+xml" | "text/*" | "*/*" => Some(Representation::Html),
            _ if media_type.starts_with("application/") && media_type.ends_with("+json") => {
                Some(Representation::Json)
            }
            _ => None,
        }
    }
}

/// Pick a representation from an inbound `Accept` header.
///
/// The highest q-value among the supported media ranges wins, ties go to the
/// earlier entry. Anything unusable falls back to HTML.
pub fn negotiate_accept(accept: Option<&str>) -> Representation {
    let Some(accept) = accept else {
        return Representation::Html;
    };

    let mut best: Option<(Representation, f32)> = None;
    for range in accept.split(',') {
        let mut parts = range.split(';');
        let Some(representation) = parts.next().and_then(Representation::from_media_type) else {
            continue;
        };

        let quality = parts
            .filter_map(|param| param.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        // q=0 means not acceptable; NaN and out-of-range weights are not qvalues
        if !(quality > 0.0 && quality <= 1.0) {
            continue;
        }

        if best.map_or(true, |(_, q)| quality > q) {
            best = Some((representation, quality));
        }
    }

    best.map(|(r, _)| r).unwrap_or(Representation::Html)
}

/// Pick a representation from the `Content-Type` the downstream handler produced
pub fn negotiate_content_type(content_type: Option<&str>) -> Representation {
    content_type
        .and_then(|ct| ct.split(';').next())
        .and_then(Representation::from_media_type)
        .unwrap_or(Representation::Html)
}

#[derive(Serialize)]
struct JsonBody<'a> {
    heading: &'a str,
    message: &'a str,
}

/// The substitute response for a blocked request
#[derive(Debug, Clone)]
pub struct SynthesizedResponse {
    pub status: StatusCode,
    pub representation: Representation,
    pub body: Bytes,
}

impl SynthesizedResponse {
    pub fn content_type(&self) -> &'static str {
        self.representation.content_type()
    }

    /// Build the HTTP response on top of `headers` (empty, or the intercepted
    /// downstream headers), dropping headers that described the original body.
    ///
    /// The body carries no size hint, so HTTP/1.1 sends it chunked and the
    /// terminating chunk ends the exchange without a `Content-Length`.
    pub fn into_response(self, mut headers: HeaderMap) -> Response<GateBody> {
        for name in REPRESENTATION_HEADERS.iter() {
            headers.remove(name);
        }
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.representation.content_type()),
        );

        let frames = stream::iter([Ok::<_, hyper::Error>(Frame::data(self.body))]);
        let mut response = Response::new(StreamBody::new(frames).boxed());
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

/// Build the 503 body. The HTML page was loaded when the policy was refreshed,
/// so this never touches the disk.
pub fn synthesize(representation: Representation, policy: &Policy) -> SynthesizedResponse {
    let body = match representation {
        Representation::Json => {
            let body = JsonBody {
                heading: &policy.heading,
                message: &policy.message,
            };
            match serde_json::to_vec(&body) {
                Ok(json) => Bytes::from(json),
                Err(e) => {
                    warn!(error = %e, "Failed to encode JSON maintenance body");
                    Bytes::from_static(b"{}")
                }
            }
        }
        Representation::Text => Bytes::from(format!("{}\n{}", policy.heading, policy.message)),
        Representation::Html => Bytes::from(template::render(&policy.page, &policy.heading, &policy.message)),
    };

    SynthesizedResponse {
        status: StatusCode::SERVICE_UNAVAILABLE,
        representation,
        body,
    }
}
