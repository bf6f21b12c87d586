//! UDP listener.

use super::{Protocol, QueryContext, QueryHandler, Result};
use bytes::Bytes;
use meridian_proto::Message;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

/// UDP DNS server.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn QueryHandler>,
    local_addr: SocketAddr,
}

impl UdpServer {
    /// Binds a new UDP server to the given address.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn QueryHandler>) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;

        info!(addr = %local_addr, "UDP server listening");

        Ok(Self {
            socket: Arc::new(socket),
            handler,
            local_addr,
        })
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the receive loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut buf = vec![0u8; 65535];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            let data = Bytes::copy_from_slice(&buf[..len]);
                            let socket = self.socket.clone();
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                if let Err(e) = process_query(socket, handler, data, src).await {
                                    debug!(error = %e, client = %src, "error processing UDP query");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "error receiving UDP packet");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(addr = %self.local_addr, "UDP server stopping");
                    return Ok(());
                }
            }
        }
    }
}

async fn process_query(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn QueryHandler>,
    data: Bytes,
    src: SocketAddr,
) -> Result<()> {
    let query = match Message::parse(&data) {
        Ok(msg) => msg,
        Err(e) => {
            trace!(error = %e, client = %src, "dropping malformed UDP query");
            return Ok(());
        }
    };

    let ctx = QueryContext::new(src, Protocol::Udp);
    let max_size = ctx.max_response_size();
    let mut response = handler.handle(query, ctx).await;

    let mut wire = response.to_wire();
    if wire.len() > max_size {
        response.truncate_to(max_size);
        wire = response.to_wire();
    }

    socket.send_to(&wire, src).await?;
    Ok(())
}
