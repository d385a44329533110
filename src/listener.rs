use log::warn;
use socket2::SockRef;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use url::Url;

/// Where the server listens.
///
/// A bare `host:port` is TCP. With a scheme, `unix://<path>` selects a
/// domain socket and any other scheme is TCP on the URL's host and port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

/// Errors encountered while parsing a [`ListenAddr`].
#[derive(Error, Debug)]
pub enum AddressError {
    #[error("missing host in {0:?}")]
    MissingHost(String),
    #[error("missing port in {0:?}")]
    MissingPort(String),
    #[error("missing unix socket path in {0:?}")]
    MissingUnixPath(String),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl FromStr for ListenAddr {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<ListenAddr, AddressError> {
        if !input.contains("://") {
            return Ok(ListenAddr::Tcp(input.to_string()));
        }

        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(AddressError::MissingUnixPath(input.to_string()));
                }
                Ok(ListenAddr::Unix(PathBuf::from(path)))
            }
            _ => {
                let host = url
                    .host_str()
                    .ok_or_else(|| AddressError::MissingHost(input.to_string()))?;
                let port = url
                    .port_or_known_default()
                    .ok_or_else(|| AddressError::MissingPort(input.to_string()))?;
                Ok(ListenAddr::Tcp(format!("{host}:{port}")))
            }
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => f.write_str(addr),
            ListenAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixSocket),
}

/// Domain socket listener that unlinks its path when dropped.
#[cfg(unix)]
pub(crate) struct UnixSocket {
    listener: UnixListener,
    path: PathBuf,
}

#[cfg(unix)]
impl Drop for UnixSocket {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove socket {}: {}", self.path.display(), err);
            }
        }
    }
}

impl Listener {
    pub(crate) async fn bind(addr: &ListenAddr) -> io::Result<Listener> {
        match addr {
            ListenAddr::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr.as_str()).await?)),
            #[cfg(unix)]
            ListenAddr::Unix(path) => Ok(Listener::Unix(UnixSocket {
                listener: UnixListener::bind(path)?,
                path: path.clone(),
            })),
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    /// Accepts one connection and returns it with a printable peer address.
    ///
    /// TCP connections get `TCP_NODELAY` and keep-alive.
    pub(crate) async fn accept(&self) -> io::Result<(Stream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                if let Err(err) = configure(&stream) {
                    warn!("failed to set socket options for {}: {}", peer, err);
                }
                Ok((Stream::Tcp(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(socket) => {
                let (stream, peer) = socket.listener.accept().await?;
                let peer = match peer.as_pathname() {
                    Some(path) => format!("unix://{}", path.display()),
                    None => format!("unix://{}", socket.path.display()),
                };
                Ok((Stream::Unix(stream), peer))
            }
        }
    }

    pub(crate) fn local_addr(&self) -> io::Result<ListenAddr> {
        match self {
            Listener::Tcp(listener) => Ok(ListenAddr::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            Listener::Unix(socket) => Ok(ListenAddr::Unix(socket.path.clone())),
        }
    }
}

fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)
}

/// Whether an accept failure is worth retrying.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_resource_exhaustion(err)
}

#[cfg(unix)]
fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_err: &io::Error) -> bool {
    false
}

/// An accepted connection on either transport.
pub(crate) enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_port_is_tcp() {
        let addr: ListenAddr = "127.0.0.1:11211".parse().unwrap();
        assert_eq!(addr, ListenAddr::Tcp("127.0.0.1:11211".to_string()));
    }

    #[test]
    fn test_tcp_scheme() {
        let addr: ListenAddr = "tcp://localhost:9000".parse().unwrap();
        assert_eq!(addr, ListenAddr::Tcp("localhost:9000".to_string()));
    }

    #[test]
    fn test_unix_scheme() {
        let addr: ListenAddr = "unix:///tmp/mc.sock".parse().unwrap();
        assert_eq!(addr, ListenAddr::Unix(PathBuf::from("/tmp/mc.sock")));
        assert_eq!(addr.to_string(), "unix:///tmp/mc.sock");
    }

    #[test]
    fn test_missing_parts() {
        assert!(matches!(
            "tcp://localhost".parse::<ListenAddr>(),
            Err(AddressError::MissingPort(_))
        ));
        assert!(matches!(
            "unix://sock".parse::<ListenAddr>(),
            Err(AddressError::MissingUnixPath(_))
        ));
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
        #[cfg(unix)]
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
    }

    #[tokio::test]
    async fn test_tcp_bind_reports_port() {
        let listener = Listener::bind(&ListenAddr::Tcp("127.0.0.1:0".to_string())).await.unwrap();
        match listener.local_addr().unwrap() {
            ListenAddr::Tcp(addr) => assert!(!addr.ends_with(":0")),
            other => panic!("unexpected address {other}"),
        }
    }
}
