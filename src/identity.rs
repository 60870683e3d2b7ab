//! Client identity resolution
//!
//! The candidates are the transport peer first, then every `X-Forwarded-For`
//! token in header order. No trust model is applied: a policy allows the
//! request when any candidate is on its allow-list.

use hyper::header::HeaderMap;
use hyper::Request;
use std::net::SocketAddr;

/// Header name for forwarded-for
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Transport peer address, attached to each request by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        RemoteAddr(addr.to_string())
    }
}

/// Ordered candidate IPs attributable to a requester
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    ips: Vec<String>,
}

impl ClientIdentity {
    pub fn resolve<B>(req: &Request<B>) -> Self {
        let peer = req.extensions().get::<RemoteAddr>().map(|r| r.0.as_str());
        Self::from_parts(peer, req.headers())
    }

    pub fn from_parts(peer: Option<&str>, headers: &HeaderMap) -> Self {
        let mut ips = Vec::new();

        if let Some(peer) = peer.filter(|p| !p.is_empty()) {
            ips.push(strip_port(peer));
        }

        for value in headers.get_all(X_FORWARDED_FOR) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            ips.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(String::from),
            );
        }

        Self { ips }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ips.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }
}

fn strip_port(peer: &str) -> String {
    match peer.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => peer.to_string(),
    }
}
