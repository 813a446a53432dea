//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Directory, DnsHandler, ZoneResolver};
use crate::client::ApiClient;
use crate::config::DnsConfig;
use crate::error::Error;

/// Idle timeout for DNS-over-TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// DNS server answering for the registry zone.
pub struct DnsServer {
    config: DnsConfig,
    handler: DnsHandler,
}

impl DnsServer {
    /// Create a server that asks the registry API at `config.api_endpoint`.
    pub fn new(config: DnsConfig) -> Result<Self, Error> {
        config.validate()?;
        let client = ApiClient::new(&config.api_endpoint, config.request_timeout())?;
        Ok(Self::with_directory(config, Arc::new(client)))
    }

    /// Create a server over any directory.
    pub fn with_directory(config: DnsConfig, directory: Arc<dyn Directory>) -> Self {
        let handler = DnsHandler::new(ZoneResolver::new(&config, directory));
        Self { config, handler }
    }

    /// Bind UDP and TCP on the configured address and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(udp_socket, Some(tcp_listener), cancel).await
    }

    /// Serve on already bound sockets until `cancel` fires.
    pub async fn serve(
        self,
        udp_socket: UdpSocket,
        tcp_listener: Option<TcpListener>,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        info!(
            zone = %self.config.zone,
            api_endpoint = %self.config.api_endpoint,
            ttl = self.config.ttl,
            max_answers = self.config.max_answers,
            "Starting DNS server"
        );

        let mut server = ServerFuture::new(self.handler);

        let addr: SocketAddr = udp_socket.local_addr()?;
        server.register_socket(udp_socket);
        info!(%addr, "DNS UDP listening");

        if let Some(listener) = tcp_listener {
            let addr = listener.local_addr()?;
            server.register_listener(listener, TCP_TIMEOUT);
            info!(%addr, "DNS TCP listening");
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                result?;
                info!("DNS server stopped");
                return Ok(());
            }
        }

        server.shutdown_gracefully().await?;
        info!("DNS server stopped");
        Ok(())
    }
}
