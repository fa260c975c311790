//! Transport trait and the stream-socket implementation.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::framing::{read_frame, write_frame};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint string the transport does not understand.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Dial failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Frame exceeded the size cap.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Peer closed the connection mid-exchange.
    #[error("connection closed")]
    Closed,

    /// Request deadline exceeded.
    #[error("request timed out")]
    Timeout,

    /// Underlying IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A request-scoped framed connection.
#[async_trait]
pub trait Connection: Send {
    /// Sends one frame.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receives one frame. Returns `None` on a clean end of stream.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// An accept source bound to a local endpoint.
#[async_trait]
pub trait Listener: Send {
    /// Waits for the next inbound connection.
    async fn accept(&mut self) -> Result<Box<dyn Connection>, TransportError>;

    /// Returns the endpoint this listener is bound to.
    fn local_endpoint(&self) -> String;
}

/// Abstract endpoint factory the daemon is built against.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Binds a listener on an endpoint.
    async fn listen(&self, endpoint: &str) -> Result<Box<dyn Listener>, TransportError>;

    /// Opens a connection to an endpoint.
    async fn dial(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError>;
}

enum EndpointKind<'a> {
    Tcp(&'a str),
    #[cfg(unix)]
    Unix(&'a str),
}

fn parse_endpoint(endpoint: &str) -> Result<EndpointKind<'_>, TransportError> {
    if let Some(path) = endpoint.strip_prefix("unix:") {
        #[cfg(unix)]
        return Ok(EndpointKind::Unix(path));
        #[cfg(not(unix))]
        return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
    }
    let addr = endpoint.strip_prefix("tcp:").unwrap_or(endpoint);
    if addr.is_empty() {
        return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(EndpointKind::Tcp(addr))
}

struct FramedStream<S> {
    stream: S,
}

#[async_trait]
impl<S> Connection for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        write_frame(&mut self.stream, frame).await
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        read_frame(&mut self.stream).await
    }
}

struct TcpEndpointListener {
    inner: TcpListener,
    endpoint: String,
}

#[async_trait]
impl Listener for TcpEndpointListener {
    async fn accept(&mut self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, _) = self.inner.accept().await?;
        Ok(Box::new(FramedStream { stream }))
    }

    fn local_endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

#[cfg(unix)]
struct UnixEndpointListener {
    inner: UnixListener,
    endpoint: String,
}

#[cfg(unix)]
#[async_trait]
impl Listener for UnixEndpointListener {
    async fn accept(&mut self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, _) = self.inner.accept().await?;
        Ok(Box::new(FramedStream { stream }))
    }

    fn local_endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// Stream-socket transport over TCP and Unix sockets.
///
/// The overlay names peers with opaque endpoint strings; this
/// implementation accepts `host:port`, `tcp:host:port` and
/// `unix:/path/to/socket`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamTransport;

impl StreamTransport {
    /// Creates a new stream transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn listen(&self, endpoint: &str) -> Result<Box<dyn Listener>, TransportError> {
        match parse_endpoint(endpoint)? {
            EndpointKind::Tcp(addr) => {
                let inner = TcpListener::bind(addr).await?;
                let endpoint = inner.local_addr()?.to_string();
                Ok(Box::new(TcpEndpointListener { inner, endpoint }))
            }
            #[cfg(unix)]
            EndpointKind::Unix(path) => {
                let inner = UnixListener::bind(path)?;
                Ok(Box::new(UnixEndpointListener {
                    inner,
                    endpoint: format!("unix:{path}"),
                }))
            }
        }
    }

    async fn dial(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        match parse_endpoint(endpoint)? {
            EndpointKind::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|e| TransportError::ConnectFailed(format!("{addr}: {e}")))?;
                Ok(Box::new(FramedStream { stream }))
            }
            #[cfg(unix)]
            EndpointKind::Unix(path) => {
                let stream = UnixStream::connect(path)
                    .await
                    .map_err(|e| TransportError::ConnectFailed(format!("{path}: {e}")))?;
                Ok(Box::new(FramedStream { stream }))
            }
        }
    }
}
