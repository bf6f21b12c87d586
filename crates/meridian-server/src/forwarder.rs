//! Upstream forwarder.
//!
//! Strictly stub delegation: one configured upstream, one UDP exchange
//! with the configured timeout, TCP retry when the answer is truncated.
//! The response is forwarded as-is apart from the transaction ID.

use super::{Result, ServerError};
use meridian_proto::{Message, Question};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::trace;

/// Forwarder to a single upstream resolver on port 53.
pub struct Forwarder {
    host: String,
    port: u16,
    timeout: Duration,
}

impl Forwarder {
    /// Creates a forwarder for the configured host (IP or hostname).
    /// Returns `None` for an empty or malformed host.
    pub fn new(host: &str, timeout: Duration) -> Option<Self> {
        let host = host.trim();
        if host.is_empty() || host.contains(' ') {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            port: 53,
            timeout,
        })
    }

    /// The upstream `host:port` pair.
    pub fn upstream(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Sends one query for `question` and returns the upstream response.
    pub async fn exchange(&self, question: &Question) -> Result<Message> {
        let query = Message::query(question.clone());
        let response = self.query_udp(&query).await?;

        if response.is_truncated() {
            trace!(upstream = %self.upstream(), "upstream response truncated, retrying over TCP");
            return self.query_tcp(&query).await;
        }
        Ok(response)
    }

    async fn query_udp(&self, query: &Message) -> Result<Message> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        timeout(
            self.timeout,
            socket.connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ServerError::Timeout)??;
        socket.send(&query.to_wire()).await?;

        let mut buf = vec![0u8; 65535];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ServerError::Timeout)??;

        let response =
            Message::parse(&buf[..len]).map_err(|e| ServerError::Protocol(e.to_string()))?;
        if response.id() != query.id() {
            return Err(ServerError::Protocol("response ID mismatch".to_string()));
        }
        Ok(response)
    }

    async fn query_tcp(&self, query: &Message) -> Result<Message> {
        let mut stream = timeout(
            self.timeout,
            tokio::net::TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ServerError::Timeout)??;

        let wire = query.to_wire();
        stream.write_all(&(wire.len() as u16).to_be_bytes()).await?;
        stream.write_all(&wire).await?;

        let mut len_buf = [0u8; 2];
        timeout(self.timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| ServerError::Timeout)??;
        let resp_len = u16::from_be_bytes(len_buf) as usize;

        let mut resp_buf = vec![0u8; resp_len];
        timeout(self.timeout, stream.read_exact(&mut resp_buf))
            .await
            .map_err(|_| ServerError::Timeout)??;

        let response =
            Message::parse(&resp_buf).map_err(|e| ServerError::Protocol(e.to_string()))?;
        if response.id() != query.id() {
            return Err(ServerError::Protocol("response ID mismatch".to_string()));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarder_host_parsing() {
        let fwd = Forwarder::new("9.9.9.9", Duration::from_secs(2)).unwrap();
        assert_eq!(fwd.upstream(), "9.9.9.9:53");

        assert!(Forwarder::new("", Duration::from_secs(2)).is_none());
        assert!(Forwarder::new("not a host", Duration::from_secs(2)).is_none());
    }

    #[tokio::test]
    async fn test_exchange_timeout() {
        use meridian_proto::{Name, RecordType};
        use std::str::FromStr;

        // A blackhole upstream: bound socket that never answers.
        let blackhole = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = blackhole.local_addr().unwrap();

        let fwd = Forwarder {
            host: addr.ip().to_string(),
            port: addr.port(),
            timeout: Duration::from_millis(50),
        };
        let question = Question::new(Name::from_str("example.com.").unwrap(), RecordType::A);
        let err = fwd.exchange(&question).await.unwrap_err();
        assert!(matches!(err, ServerError::Timeout));
    }
}
