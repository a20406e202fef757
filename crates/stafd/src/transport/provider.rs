//! Pluggable transports that accept and originate connections.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;

use stafd_config::{InterfaceSpec, LOCAL_INTERFACE, SocketEndpoint};

use crate::endpoint::Endpoint;
use crate::identity::LOCAL_MACHINE;

use super::{ConnectError, Connection, ConnectionStream, ListenerError, SocketListener};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A transport the daemon listens on and connects through.
pub(crate) trait ConnectionProvider: Send + Sync + fmt::Debug {
    /// Interface name, lowercased.
    fn name(&self) -> &str;

    /// Transport family shown in listings.
    fn kind(&self) -> &'static str;

    /// Whether credentials may travel over this transport.
    fn is_secure(&self) -> bool;

    /// Name this machine is known by on the interface.
    fn logical_id(&self) -> &str;

    /// Address this machine is known by on the interface.
    fn physical_id(&self) -> &str;

    /// Port peers reach this interface on, once known.
    fn port(&self) -> Option<u16>;

    /// Address the interface listens on.
    fn listen_endpoint(&self) -> &SocketEndpoint;

    /// Opens an outbound connection.
    fn connect(&self, endpoint: &Endpoint) -> Result<Connection, ConnectError>;

    /// Binds the inbound listener.
    fn bind(&self) -> Result<SocketListener, ListenerError>;
}

/// Provider backed by a TCP or Unix socket.
#[derive(Debug)]
pub(crate) struct SocketProvider {
    name: String,
    listen: SocketEndpoint,
    secure: bool,
    logical_id: String,
    physical_id: String,
    bound_port: AtomicU16,
}

impl SocketProvider {
    /// Network interface reachable from other machines.
    pub(crate) fn network(spec: &InterfaceSpec, machine: &str) -> Self {
        Self {
            name: spec.name().to_owned(),
            listen: spec.endpoint().clone(),
            secure: spec.is_secure(),
            logical_id: machine.to_owned(),
            physical_id: primary_address(machine),
            bound_port: AtomicU16::new(spec.endpoint().port().unwrap_or(0)),
        }
    }

    /// The reserved interface for processes on this machine.
    pub(crate) fn local(socket: &SocketEndpoint) -> Self {
        Self {
            name: LOCAL_INTERFACE.to_owned(),
            listen: socket.clone(),
            secure: true,
            logical_id: LOCAL_MACHINE.to_owned(),
            physical_id: LOCAL_MACHINE.to_owned(),
            bound_port: AtomicU16::new(socket.port().unwrap_or(0)),
        }
    }

    fn connect_tcp(&self, endpoint: &Endpoint) -> Result<Connection, ConnectError> {
        let port = endpoint.port.or_else(|| self.port()).unwrap_or_default();
        let host = endpoint.host.as_str();
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| ConnectError::Resolve {
                host: host.to_owned(),
                port,
                source,
            })?
            .collect::<Vec<_>>();
        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(|source| ConnectError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                    return Ok(Connection::new(
                        ConnectionStream::Tcp(stream),
                        host,
                        addr.ip().to_string(),
                    ));
                }
                Err(error) => last_error = Some(error),
            }
        }
        match last_error {
            Some(source) => Err(ConnectError::Connect {
                endpoint: endpoint.to_string(),
                source,
            }),
            None => Err(ConnectError::ResolveEmpty {
                host: host.to_owned(),
                port,
            }),
        }
    }

    #[cfg(unix)]
    fn connect_unix(&self, path: &Path) -> Result<Connection, ConnectError> {
        let stream = UnixStream::connect(path).map_err(|source| ConnectError::Connect {
            endpoint: self.listen.to_string(),
            source,
        })?;
        Ok(Connection::new(
            ConnectionStream::Unix(stream),
            LOCAL_MACHINE,
            LOCAL_MACHINE,
        ))
    }
}

impl ConnectionProvider for SocketProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        match self.listen {
            SocketEndpoint::Tcp { .. } => "tcp",
            SocketEndpoint::Unix { .. } => "unix",
        }
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn logical_id(&self) -> &str {
        &self.logical_id
    }

    fn physical_id(&self) -> &str {
        &self.physical_id
    }

    fn port(&self) -> Option<u16> {
        match self.bound_port.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }

    fn listen_endpoint(&self) -> &SocketEndpoint {
        &self.listen
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<Connection, ConnectError> {
        match &self.listen {
            SocketEndpoint::Tcp { .. } => self.connect_tcp(endpoint),
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    self.connect_unix(path.as_std_path())
                }

                #[cfg(not(unix))]
                {
                    Err(ConnectError::UnsupportedUnix {
                        endpoint: path.to_string(),
                    })
                }
            }
        }
    }

    fn bind(&self) -> Result<SocketListener, ListenerError> {
        let listener = SocketListener::bind(&self.listen)?;
        if let Some(addr) = listener.local_addr() {
            self.bound_port.store(addr.port(), Ordering::SeqCst);
        }
        Ok(listener)
    }
}

/// Peer identifiers of an accepted TCP connection.
pub(crate) fn peer_ids(addr: &SocketAddr) -> (String, String) {
    let ip = addr.ip().to_string();
    (ip.clone(), ip)
}

fn primary_address(machine: &str) -> String {
    let resolved: io::Result<Vec<IpAddr>> = (machine, 0)
        .to_socket_addrs()
        .map(|addrs| addrs.map(|addr| addr.ip()).collect());
    resolved
        .ok()
        .and_then(|ips| {
            ips.iter()
                .find(|ip| ip.is_ipv4() && !ip.is_loopback())
                .or_else(|| ips.first())
                .copied()
        })
        .map_or_else(|| "127.0.0.1".to_owned(), |ip| ip.to_string())
}
