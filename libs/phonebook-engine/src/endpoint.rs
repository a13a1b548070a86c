//! Endpoint addressing for engine peers

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

const TCP_SCHEME: &str = "tcp://";

/// Represents an address where an engine can be reached
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub uri: String,
}

/// Typed view of an endpoint for parsing and matching
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    /// TCP endpoint with a literal socket address
    Tcp(SocketAddr),
    /// TCP endpoint whose host still needs name resolution
    TcpHost(String),
    /// Other/unparsed endpoint URI
    Other(String),
}

impl Endpoint {
    pub fn from_uri<S: Into<String>>(s: S) -> Self {
        Self { uri: s.into() }
    }

    pub fn tcp(host: &str, port: u16) -> Self {
        Self {
            uri: format!("{TCP_SCHEME}{host}:{port}"),
        }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            uri: format!("{TCP_SCHEME}{addr}"),
        }
    }

    /// Parse a user-supplied address. A bare `host:port` is read as tcp.
    pub fn parse(address: &str) -> EngineResult<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(EngineError::MalformedAddress(address.to_string()));
        }

        let endpoint = if address.contains("://") {
            Self::from_uri(address)
        } else {
            Self::from_uri(format!("{TCP_SCHEME}{address}"))
        };

        match endpoint.kind() {
            EndpointKind::Other(uri) if uri.starts_with(TCP_SCHEME) => {
                Err(EngineError::MalformedAddress(address.to_string()))
            }
            EndpointKind::Other(_) => Err(EngineError::UnsupportedScheme(address.to_string())),
            _ => Ok(endpoint),
        }
    }

    /// Parse the endpoint URI into a typed view
    pub fn kind(&self) -> EndpointKind {
        let Some(rest) = self.uri.strip_prefix(TCP_SCHEME) else {
            return EndpointKind::Other(self.uri.clone());
        };
        if let Ok(addr) = rest.parse::<SocketAddr>() {
            return EndpointKind::Tcp(addr);
        }
        match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                EndpointKind::TcpHost(rest.to_string())
            }
            _ => EndpointKind::Other(self.uri.clone()),
        }
    }

    /// Resolve to a socket address, going through DNS for host names.
    pub async fn resolve(&self) -> EngineResult<SocketAddr> {
        match self.kind() {
            EndpointKind::Tcp(addr) => Ok(addr),
            EndpointKind::TcpHost(host_port) => {
                let mut addrs = tokio::net::lookup_host(host_port.as_str())
                    .await
                    .map_err(|source| EngineError::Resolve {
                        address: self.uri.clone(),
                        source,
                    })?;
                addrs.next().ok_or_else(|| EngineError::Resolve {
                    address: self.uri.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "host name resolved to no addresses",
                    ),
                })
            }
            EndpointKind::Other(uri) => Err(EngineError::UnsupportedScheme(uri)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}
