//! First-match policy resolution and the block/allow decision

use crate::identity::ClientIdentity;
use crate::policy::{Policy, PolicySet};
use hyper::Request;

/// Host used for matching: the Host header as sent, or the URI authority (HTTP/2)
pub fn request_host<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
}

/// The first policy whose pattern matches `host`. Later policies are never consulted.
pub fn find_policy<'a>(host: &str, policies: &'a PolicySet) -> Option<&'a Policy> {
    policies.iter().find(|policy| policy.matches_host(host))
}

/// The policy that blocks this request, if any
pub fn evaluate<'a, B>(req: &Request<B>, policies: &'a PolicySet) -> Option<&'a Policy> {
    let host = request_host(req)?;
    let policy = find_policy(host, policies)?;

    let identity = ClientIdentity::resolve(req);
    if policy.allows(identity.iter()) {
        None
    } else {
        Some(policy)
    }
}

pub fn is_blocked<B>(req: &Request<B>, policies: &PolicySet) -> bool {
    evaluate(req, policies).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{RemoteAddr, X_FORWARDED_FOR};

    fn request(host: &str, peer: &str, forwarded: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri("/").header(hyper::header::HOST, host);
        if let Some(xff) = forwarded {
            builder = builder.header(X_FORWARDED_FOR, xff);
        }
        let mut req = builder.body(()).unwrap();
        req.extensions_mut().insert(RemoteAddr(peer.to_string()));
        req
    }

    fn maint_policies() -> PolicySet {
        PolicySet::new(vec![Policy::new(r"^maint\.example\.com$", &["10.0.0.1"])])
    }

    #[test]
    fn test_allow_listed_peer_passes() {
        let req = request("maint.example.com", "10.0.0.1:5000", None);
        assert!(!is_blocked(&req, &maint_policies()));
    }

    #[test]
    fn test_other_peer_is_blocked() {
        let req = request("maint.example.com", "10.0.0.2:5000", None);
        assert!(is_blocked(&req, &maint_policies()));
    }

    #[test]
    fn test_any_forwarded_token_allows() {
        let req = request("maint.example.com", "192.168.1.1:4000", Some("1.1.1.1, 10.0.0.1"));
        assert!(!is_blocked(&req, &maint_policies()));
    }

    #[test]
    fn test_unmatched_host_never_blocked() {
        let policies = maint_policies();
        for host in ["example.com", "other.example.com", "maint.example.com.evil", ""] {
            let req = request(host, "10.0.0.2:5000", None);
            assert!(!is_blocked(&req, &policies), "host {:?} should pass", host);
        }
    }

    #[test]
    fn test_empty_set_never_blocks() {
        let req = request("maint.example.com", "10.0.0.2:5000", None);
        assert!(!is_blocked(&req, &PolicySet::default()));
    }

    #[test]
    fn test_missing_host_never_blocked() {
        let mut req = Request::builder().uri("/").body(()).unwrap();
        req.extensions_mut().insert(RemoteAddr("10.0.0.2:1".to_string()));
        assert!(!is_blocked(&req, &PolicySet::new(vec![Policy::new(".*", &[])])));
    }

    #[test]
    fn test_uri_authority_used_without_host_header() {
        let req = Request::builder()
            .uri("https://maint.example.com/path")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req), Some("maint.example.com"));
        assert!(is_blocked(&req, &maint_policies()));
    }

    #[test]
    fn test_first_match_wins() {
        // The earlier, stricter policy decides even though the later one would allow
        let policies = PolicySet::new(vec![
            Policy::new(r"example\.com", &["10.0.0.9"]).with_text("first", "first"),
            Policy::new(r"^maint\.example\.com$", &["10.0.0.2"]).with_text("second", "second"),
        ]);

        let found = find_policy("maint.example.com", &policies).unwrap();
        assert_eq!(found.heading, "first");

        let req = request("maint.example.com", "10.0.0.2:5000", None);
        let blocking = evaluate(&req, &policies).unwrap();
        assert_eq!(blocking.heading, "first");
    }

    #[test]
    fn test_first_match_allows_even_if_later_would_block() {
        let policies = PolicySet::new(vec![
            Policy::new(r"^maint\.", &["10.0.0.2"]),
            Policy::new(r".*", &[]),
        ]);
        let req = request("maint.example.com", "10.0.0.2:5000", None);
        assert!(!is_blocked(&req, &policies));
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let policies = PolicySet::new(vec![
            Policy::new("(", &[]),
            Policy::new(r"^maint\.example\.com$", &["10.0.0.1"]).with_text("valid", ""),
        ]);
        let found = find_policy("maint.example.com", &policies).unwrap();
        assert_eq!(found.heading, "valid");
        assert!(find_policy("(", &policies).is_none());
    }

    #[test]
    fn test_blocked_iff_identity_misses_allow_list() {
        let policies = PolicySet::new(vec![Policy::new(".*", &["10.0.0.1", "10.0.0.3"])]);
        let cases = [
            ("10.0.0.1:1", None, false),
            ("10.0.0.2:1", None, true),
            ("10.0.0.2:1", Some("10.0.0.3"), false),
            ("10.0.0.2:1", Some("10.0.0.4, 10.0.0.5"), true),
            ("10.0.0.2:1", Some("10.0.0.0/8"), true),
        ];
        for (peer, xff, blocked) in cases {
            let req = request("any.host", peer, xff);
            assert_eq!(is_blocked(&req, &policies), blocked, "peer={} xff={:?}", peer, xff);
        }
    }
}
