//! Server bind options (spec §6): a plain HTTP server — no TLS, since the
//! noVNC/WebSocket consumers and namespace-scoped RBAC are already the full
//! extent of the transport-security surface called for here.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const DEFAULT_SOCKET_ADDRESS: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080);

#[derive(Debug, Clone)]
pub struct ApiOptions {
    pub socket_addr: SocketAddr,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            socket_addr: DEFAULT_SOCKET_ADDRESS,
        }
    }
}

impl ApiOptions {
    pub fn builder() -> ApiOptionsBuilder {
        ApiOptionsBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ApiOptionsBuilder {
    socket_addr: Option<SocketAddr>,
}

impl ApiOptionsBuilder {
    pub fn bind_address(mut self, bind_ip: impl Into<IpAddr>, bind_port: u16) -> Self {
        self.socket_addr = Some(SocketAddr::new(bind_ip.into(), bind_port));
        self
    }

    pub fn build(self) -> ApiOptions {
        ApiOptions {
            socket_addr: self.socket_addr.unwrap_or(DEFAULT_SOCKET_ADDRESS),
        }
    }
}
