//! TCP listener with 2-byte length framing.

use super::{Protocol, QueryContext, QueryHandler, Result};
use bytes::{Bytes, BytesMut};
use meridian_proto::Message;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, trace};

/// TCP DNS server.
pub struct TcpServer {
    listener: TcpListener,
    handler: Arc<dyn QueryHandler>,
    local_addr: SocketAddr,
    idle_timeout: Duration,
}

impl TcpServer {
    /// Binds a new TCP server to the given address.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn QueryHandler>) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "TCP server listening");

        Ok(Self {
            listener,
            handler,
            local_addr,
            idle_timeout: Duration::from_secs(10),
        })
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let handler = self.handler.clone();
                            let idle_timeout = self.idle_timeout;

                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, peer, handler, idle_timeout).await
                                {
                                    debug!(error = %e, client = %peer, "TCP connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "error accepting TCP connection");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(addr = %self.local_addr, "TCP server stopping");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn QueryHandler>,
    idle_timeout: Duration,
) -> Result<()> {
    trace!(client = %peer, "new TCP connection");
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        match timeout(idle_timeout, read_message(&mut stream, &mut buf)).await {
            Ok(Ok(query_bytes)) => {
                let query = match Message::parse(&query_bytes) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(error = %e, client = %peer, "failed to parse TCP query");
                        continue;
                    }
                };

                let ctx = QueryContext::new(peer, Protocol::Tcp);
                let response = handler.handle(query, ctx).await;
                write_message(&mut stream, &response.to_wire()).await?;
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    trace!(client = %peer, "TCP connection closed by client");
                } else {
                    debug!(error = %e, client = %peer, "TCP read error");
                }
                break;
            }
            Err(_) => {
                trace!(client = %peer, "TCP connection idle timeout");
                break;
            }
        }
    }

    Ok(())
}

/// Reads a length-prefixed DNS message from the stream.
async fn read_message(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Bytes> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "zero-length TCP message",
        ));
    }

    buf.clear();
    buf.resize(len, 0);
    stream.read_exact(buf).await?;
    Ok(buf.clone().freeze())
}

/// Writes a length-prefixed DNS message to the stream.
async fn write_message(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    let len = data.len() as u16;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(data).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RefusedHandler;

    #[tokio::test]
    async fn test_tcp_server_bind() {
        let handler = Arc::new(RefusedHandler);
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), handler)
            .await
            .unwrap();
        assert!(server.local_addr().port() > 0);
    }

    #[tokio::test]
    async fn test_tcp_query_response() {
        use meridian_proto::{Name, Question, RecordType, ResponseCode};
        use std::str::FromStr;

        let handler = Arc::new(RefusedHandler);
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), handler)
            .await
            .unwrap();
        let addr = server.local_addr();

        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();
        let server = Arc::new(server);
        let run = server.clone();
        tokio::spawn(async move { run.run(shutdown_rx).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let query = Message::query(Question::new(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
        ));
        write_message(&mut stream, &query.to_wire()).await.unwrap();

        let mut buf = BytesMut::new();
        let bytes = tokio::time::timeout(
            Duration::from_secs(2),
            read_message(&mut stream, &mut buf),
        )
        .await
        .unwrap()
        .unwrap();

        let response = Message::parse(&bytes).unwrap();
        assert_eq!(response.id(), query.id());
        assert_eq!(response.rcode(), ResponseCode::Refused);

        let _ = shutdown_tx.send(());
    }
}
