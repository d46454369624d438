use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::NetStream;

const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// TCP listening transport.
///
/// Provides bind/accept/connect over IPv4 and IPv6 socket addresses. A blocked
/// [`TcpTransport::accept`] is released by [`ListenerHandle::close`] from any
/// other thread.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    closed: Arc<AtomicBool>,
}

impl TcpTransport {
    /// Bind and listen on a socket address.
    ///
    /// Port `0` picks an ephemeral port; read it back with [`Self::local_addr`].
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Accept an incoming connection (blocking).
    ///
    /// Returns `Err(TransportError::Shutdown)` once the listener was closed.
    pub fn accept(&self) -> Result<NetStream> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }

        let accepted = self.listener.accept();
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }

        let (stream, peer) = accepted.map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        Ok(NetStream::from_tcp(stream))
    }

    /// Connect to a listening TCP socket (blocking).
    pub fn connect(addr: SocketAddr) -> Result<NetStream> {
        let stream =
            TcpStream::connect(addr).map_err(|source| TransportError::Connect { addr, source })?;
        debug!(%addr, "connected to tcp socket");
        Ok(NetStream::from_tcp(stream))
    }

    /// Connect with an upper bound on the connection attempt.
    pub fn connect_timeout(addr: SocketAddr, timeout: Duration) -> Result<NetStream> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|source| TransportError::Connect { addr, source })?;
        debug!(%addr, ?timeout, "connected to tcp socket");
        Ok(NetStream::from_tcp(stream))
    }

    /// Handle that can close this listener from another thread.
    pub fn handle(&self) -> Result<ListenerHandle> {
        Ok(ListenerHandle {
            listener: self.listener.try_clone()?,
            local_addr: self.local_addr,
            closed: Arc::clone(&self.closed),
        })
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether [`ListenerHandle::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Closes a [`TcpTransport`] from outside the accepting thread.
pub struct ListenerHandle {
    listener: TcpListener,
    local_addr: SocketAddr,
    closed: Arc<AtomicBool>,
}

impl ListenerHandle {
    /// Close the listening socket and release a blocked `accept()`.
    ///
    /// Idempotent. The socket is shut down where the platform allows it, and
    /// a throwaway connection is made to the listener so that `accept()`
    /// returns on platforms where shutdown does not interrupt it.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            // SAFETY: the descriptor is owned by `self.listener` and stays open
            // for the duration of the call.
            let _ = unsafe { libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RDWR) };
        }

        let wake_addr = wake_address(self.local_addr);
        match TcpStream::connect_timeout(&wake_addr, WAKE_CONNECT_TIMEOUT) {
            Ok(stream) => drop(stream),
            Err(err) => debug!(%wake_addr, error = %err, "wake connect failed"),
        }

        info!(addr = %self.local_addr, "tcp listener closed");
    }

    /// Whether the listener was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The address of the listener this handle controls.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Parse a literal `host` and `port` into a socket address.
///
/// Host names are not resolved.
pub fn parse_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = host
        .trim_matches(|c| c == '[' || c == ']')
        .parse()
        .map_err(|_| TransportError::InvalidAddress(format!("{host}:{port}")))?;
    Ok(SocketAddr::new(ip, port))
}

fn wake_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
