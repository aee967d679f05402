//! Round-Robin Connection Balancer
//!
//! Resilient dialer over the equivalent endpoints of one vendor cluster.
//! Each dial starts at a rotating index and tries every endpoint once. The
//! per-endpoint counters are diagnostics only and never bias selection.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

// =============================================================================
// Dialer
// =============================================================================

/// Opens a raw connection to one address
#[async_trait]
pub trait Dialer: Send + Sync {
    type Stream: Send;

    async fn dial(&self, address: &str) -> io::Result<Self::Stream>;
}

/// TCP dialer with a connect timeout
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, address: &str) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// One dialable endpoint and its diagnostics
#[derive(Debug)]
pub struct Endpoint {
    address: String,
    /// Connections currently open through this endpoint
    active: AtomicI64,
    /// Cumulative dial failures
    errors: AtomicU64,
}

impl Endpoint {
    fn new(address: String) -> Self {
        Self {
            address,
            active: AtomicI64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn active_connections(&self) -> i64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of an endpoint's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStats {
    pub address: String,
    pub active_connections: i64,
    pub errors: u64,
}

// =============================================================================
// Balanced Connection
// =============================================================================

/// Live connection that releases its endpoint slot when closed or dropped
pub struct BalancedConnection<S> {
    stream: S,
    endpoint: Arc<Endpoint>,
}

impl<S> BalancedConnection<S> {
    fn new(stream: S, endpoint: Arc<Endpoint>) -> Self {
        endpoint.active.fetch_add(1, Ordering::AcqRel);
        Self { stream, endpoint }
    }

    /// Address this connection was dialed to
    pub fn address(&self) -> &str {
        &self.endpoint.address
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Close the connection; consuming `self` makes a second close impossible
    pub fn close(self) {
        drop(self);
    }
}

impl<S> Drop for BalancedConnection<S> {
    fn drop(&mut self) {
        self.endpoint.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<S> std::fmt::Debug for BalancedConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancedConnection")
            .field("address", &self.endpoint.address)
            .finish()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for BalancedConnection<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for BalancedConnection<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

// =============================================================================
// Round-Robin Balancer
// =============================================================================

/// Round-robin dialer over a fixed endpoint set
pub struct RoundRobinBalancer<D: Dialer = TcpDialer> {
    endpoints: Vec<Arc<Endpoint>>,
    dialer: D,
    /// Monotonic dial counter; start index is `counter % endpoints`
    counter: AtomicU64,
}

impl RoundRobinBalancer<TcpDialer> {
    /// TCP balancer with the given connect timeout
    pub fn tcp(addresses: Vec<String>, connect_timeout: Duration) -> Result<Self> {
        Self::new(addresses, TcpDialer::new(connect_timeout))
    }
}

impl<D: Dialer> std::fmt::Debug for RoundRobinBalancer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinBalancer")
            .field("endpoints", &self.endpoints)
            .field("dials", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}

impl<D: Dialer> RoundRobinBalancer<D> {
    pub fn new(addresses: Vec<String>, dialer: D) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::Configuration(
                "balancer needs at least one endpoint".into(),
            ));
        }

        Ok(Self {
            endpoints: addresses
                .into_iter()
                .map(|address| Arc::new(Endpoint::new(address)))
                .collect(),
            dialer,
            counter: AtomicU64::new(0),
        })
    }

    /// Dial the next endpoint in rotation, falling through to the others
    pub async fn dial(&self) -> Result<BalancedConnection<D::Stream>> {
        let n = self.endpoints.len();
        let start = (self.counter.fetch_add(1, Ordering::Relaxed) % n as u64) as usize;
        let mut last_error = String::new();

        for offset in 0..n {
            let endpoint = &self.endpoints[(start + offset) % n];

            match self.dialer.dial(&endpoint.address).await {
                Ok(stream) => {
                    debug!("Dialed {}", endpoint.address);
                    return Ok(BalancedConnection::new(stream, endpoint.clone()));
                }
                Err(e) => {
                    endpoint.errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Dial to {} failed: {}", endpoint.address, e);
                    last_error = format!("{}: {}", endpoint.address, e);
                }
            }
        }

        Err(Error::AllEndpointsFailed {
            endpoints: n,
            last_error,
        })
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Snapshot the per-endpoint counters
    pub fn endpoint_stats(&self) -> Vec<EndpointStats> {
        self.endpoints
            .iter()
            .map(|endpoint| EndpointStats {
                address: endpoint.address.clone(),
                active_connections: endpoint.active_connections(),
                errors: endpoint.error_count(),
            })
            .collect()
    }
}
