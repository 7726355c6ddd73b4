//! Socket abstraction for Unix domain and TCP connections to TRC.

use crate::error::TrcError;
use pin_project_lite::pin_project;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

/// Where TRC listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    /// Dials the endpoint.
    pub async fn connect(&self) -> Result<TrcStream, TrcError> {
        match self {
            Endpoint::Unix(path) => {
                tracing::debug!(trc_socket_unix = %path.display(), "Dialing Unix socket...");
                let stream = UnixStream::connect(path).await?;
                tracing::debug!("Unix socket dial succeeded");
                Ok(TrcStream::Unix { stream })
            }
            Endpoint::Tcp(addr) => {
                tracing::debug!(trc_socket_tcp = %addr, "Dialing TCP socket...");
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true).ok();
                tracing::debug!("TCP socket dial succeeded");
                Ok(TrcStream::Tcp { stream })
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

pin_project! {
    /// A stream to TRC over either transport.
    #[project = TrcStreamProj]
    pub enum TrcStream {
        Unix { #[pin] stream: UnixStream },
        Tcp { #[pin] stream: TcpStream },
    }
}

impl AsyncRead for TrcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            TrcStreamProj::Unix { stream } => stream.poll_read(cx, buf),
            TrcStreamProj::Tcp { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TrcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            TrcStreamProj::Unix { stream } => stream.poll_write(cx, buf),
            TrcStreamProj::Tcp { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TrcStreamProj::Unix { stream } => stream.poll_flush(cx),
            TrcStreamProj::Tcp { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TrcStreamProj::Unix { stream } => stream.poll_shutdown(cx),
            TrcStreamProj::Tcp { stream } => stream.poll_shutdown(cx),
        }
    }
}
