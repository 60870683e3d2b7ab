use crate::error::UpstreamError;
use crate::gate::{Downstream, Gate, GateBody};
use crate::identity::{RemoteAddr, X_FORWARDED_FOR};
use crate::pool::{ConnectionPool, PoolConfig};
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// The upstream application behind the gate, reached through a connection pool
pub struct Upstream {
    address: String,
    request_timeout: Duration,
    pool: ConnectionPool,
}

impl Upstream {
    pub fn new(address: impl Into<String>, request_timeout: Duration, pool_config: PoolConfig) -> Self {
        Self {
            address: address.into(),
            request_timeout,
            pool: ConnectionPool::new(pool_config),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl Downstream<Incoming> for Upstream {
    async fn call(&self, mut req: Request<Incoming>) -> Result<Response<GateBody>, UpstreamError> {
        add_forwarding_headers(&mut req);

        match tokio::time::timeout(self.request_timeout, self.pool.send_request(req, &self.address)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(UpstreamError::Timeout(self.request_timeout)),
        }
    }
}

/// Proxy headers for the upstream. The peer is appended to X-Forwarded-For so
/// the chain the gate evaluated is preserved.
fn add_forwarding_headers<B>(req: &mut Request<B>) {
    let peer_ip = req
        .extensions()
        .get::<RemoteAddr>()
        .map(|peer| match peer.0.parse::<SocketAddr>() {
            Ok(addr) => addr.ip().to_string(),
            Err(_) => peer.0.clone(),
        });

    let headers = req.headers_mut();

    if !headers.contains_key(X_REQUEST_ID) {
        if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            headers.insert(X_REQUEST_ID, value);
        }
    }

    if let Some(ip) = peer_ip {
        let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
            _ => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if !headers.contains_key(X_FORWARDED_HOST) {
        if let Some(host) = headers.get(hyper::header::HOST).cloned() {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }

    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}

/// HTTP server running the maintenance gate in front of the upstream
pub struct GateServer {
    bind_addr: SocketAddr,
    gate: Arc<Gate<Upstream>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GateServer {
    pub fn new(bind_addr: SocketAddr, gate: Arc<Gate<Upstream>>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            bind_addr,
            gate,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, strategy = ?self.gate.strategy(), "Gate listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gate = Arc::clone(&self.gate);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, gate).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Gate server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(stream: S, addr: SocketAddr, gate: Arc<Gate<Upstream>>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |mut req: Request<Incoming>| {
        let gate = Arc::clone(&gate);
        req.extensions_mut().insert(RemoteAddr::from(addr));
        async move {
            debug!(client = %addr, method = %req.method(), uri = %req.uri(), "Incoming request");
            Ok::<_, Infallible>(gate.handle(req).await)
        }
    });

    // A failed write leaves a half-sent response that cannot be repaired; the
    // connection error is reported to the caller and the request ends.
    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(peer: Option<&str>, xff: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri("/").header(hyper::header::HOST, "app.example.com");
        if let Some(xff) = xff {
            builder = builder.header(X_FORWARDED_FOR, xff);
        }
        let mut req = builder.body(()).unwrap();
        if let Some(peer) = peer {
            req.extensions_mut().insert(RemoteAddr(peer.to_string()));
        }
        req
    }

    #[test]
    fn test_forwarding_headers_set() {
        let mut req = request(Some("10.1.2.3:4567"), None);
        add_forwarding_headers(&mut req);

        let headers = req.headers();
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "10.1.2.3");
        assert_eq!(headers.get(X_FORWARDED_HOST).unwrap(), "app.example.com");
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "http");
        assert!(headers.get(X_REQUEST_ID).is_some());
    }

    #[test]
    fn test_forwarded_for_is_appended() {
        let mut req = request(Some("10.1.2.3:4567"), Some("1.1.1.1, 2.2.2.2"));
        add_forwarding_headers(&mut req);
        assert_eq!(
            req.headers().get(X_FORWARDED_FOR).unwrap(),
            "1.1.1.1, 2.2.2.2, 10.1.2.3"
        );
    }

    #[test]
    fn test_existing_request_id_kept() {
        let mut req = request(None, None);
        req.headers_mut()
            .insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        add_forwarding_headers(&mut req);

        assert_eq!(req.headers().get(X_REQUEST_ID).unwrap(), "abc-123");
        assert!(req.headers().get(X_FORWARDED_FOR).is_none());
    }

    #[test]
    fn test_upstream_accessors() {
        let upstream = Upstream::new("127.0.0.1:3000", Duration::from_secs(5), PoolConfig::default());
        assert_eq!(upstream.address(), "127.0.0.1:3000");
        assert_eq!(upstream.pool().stats().get_total_requests(), 0);
    }
}
