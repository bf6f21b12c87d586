//! # Meridian DNS Server
//!
//! UDP and TCP listeners and the authoritative query pipeline.
//!
//! Each inbound query is handled on its own task: parse, cache check,
//! zone suffix match, RRSet lookup with CNAME fallback, Geo selection,
//! and forwarder fallback with negative caching. Listeners run under a
//! broadcast shutdown signal and stop within the shutdown bound.

use async_trait::async_trait;
use meridian_proto::Message;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

pub mod authority;
pub mod forwarder;
pub mod tcp;
pub mod udp;

pub use authority::AuthorityHandler;
pub use forwarder::Forwarder;
pub use tcp::TcpServer;
pub use udp::UdpServer;

/// Bound on listener shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// DNS transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain UDP.
    Udp,
    /// Plain TCP.
    Tcp,
}

impl Protocol {
    /// Returns the protocol name.
    pub const fn name(&self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Context for a DNS query.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Transport peer address.
    pub client: SocketAddr,
    /// Protocol used.
    pub protocol: Protocol,
    /// When the query was received.
    pub received_at: Instant,
}

impl QueryContext {
    /// Creates a new query context.
    pub fn new(client: SocketAddr, protocol: Protocol) -> Self {
        Self {
            client,
            protocol,
            received_at: Instant::now(),
        }
    }

    /// Maximum response size for this transport.
    pub fn max_response_size(&self) -> usize {
        match self.protocol {
            Protocol::Udp => meridian_proto::MAX_UDP_MESSAGE_SIZE,
            Protocol::Tcp => 65535,
        }
    }

    /// Elapsed time since the query was received.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Query handler trait.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Handles a DNS query and returns the response to send back.
    async fn handle(&self, query: Message, context: QueryContext) -> Message;
}

/// A handler that answers REFUSED to everything. Useful for tests.
pub struct RefusedHandler;

#[async_trait]
impl QueryHandler for RefusedHandler {
    async fn handle(&self, query: Message, _context: QueryContext) -> Message {
        let mut response = Message::response_from(&query);
        response.set_rcode(meridian_proto::ResponseCode::Refused);
        response
    }
}

/// Bounds the inner handler to the configured per-query timeout; an
/// overrun answers SERVFAIL instead of leaving the client hanging.
pub struct TimeoutHandler {
    inner: std::sync::Arc<dyn QueryHandler>,
    timeout: Duration,
}

impl TimeoutHandler {
    /// Wraps `inner` with a per-query deadline.
    pub fn new(inner: std::sync::Arc<dyn QueryHandler>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl QueryHandler for TimeoutHandler {
    async fn handle(&self, query: Message, context: QueryContext) -> Message {
        let fallback = Message::response_from(&query);
        match tokio::time::timeout(self.timeout, self.inner.handle(query, context)).await {
            Ok(response) => response,
            Err(_) => {
                let mut response = fallback;
                response.set_rcode(meridian_proto::ResponseCode::ServFail);
                response
            }
        }
    }
}
