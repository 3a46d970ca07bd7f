//! Transport seam between the shim and the embedder's byte streams
//!
//! The shim never opens sockets itself. A [`Connector`] supplied by the
//! embedder turns `(host, port)` into a [`Connection`]: an inbound
//! [`ByteSource`] and an outbound [`ByteSink`]. Adapters for tokio I/O types
//! are provided, along with [`TcpConnector`] for plain TCP.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Inbound half of a connection
#[async_trait]
pub trait ByteSource: Send {
    /// Read into `buf`, returning the number of bytes filled; `Ok(0)` means
    /// the stream has ended
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Outbound half of a connection
#[async_trait]
pub trait ByteSink: Send {
    /// Write all of `buf`, resolving once the transport accepted it
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}

/// Factory for connections, supplied by the embedder
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Connection>;
}

/// A connected stream pair
pub struct Connection {
    pub source: Box<dyn ByteSource>,
    pub sink: Box<dyn ByteSink>,
}

impl Connection {
    pub fn new(source: impl ByteSource + 'static, sink: impl ByteSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }

    /// Split one duplex tokio stream into a connection
    pub fn from_io<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(IoSource(reader), IoSink(writer))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// [`ByteSource`] over any tokio reader
pub struct IoSource<R>(pub R);

#[async_trait]
impl<R> ByteSource for IoSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).await
    }
}

/// [`ByteSink`] over any tokio writer
pub struct IoSink<W>(pub W);

#[async_trait]
impl<W> ByteSink for IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf).await?;
        self.0.flush().await
    }
}

/// Connector that dials plain TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Connection> {
        let stream = tokio::net::TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(host, port, "TCP connection established");
        Ok(Connection::from_io(stream))
    }
}
