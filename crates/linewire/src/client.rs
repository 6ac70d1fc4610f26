//! A minimal client: writes request frames, reads response frames.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::{FrameError, SendError};
use crate::framing::{FrameReader, encode_frame};
use crate::message::{Request, Response};
use crate::server::ListenAddr;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Incoming half of a client connection.
pub type ResponseReader = FrameReader<BoxedRead, Response>;

/// A connection to a linewire server.
///
/// Responses are not correlated with requests; match them on
/// [`Response::request_id`] if needed.
pub struct LineClient {
    sender: LineSender,
    responses: ResponseReader,
}

impl LineClient {
    /// Wrap an already connected stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self {
            sender: LineSender {
                writer: Box::new(write),
            },
            responses: FrameReader::new(Box::new(read) as BoxedRead),
        }
    }

    pub async fn connect(addr: &ListenAddr) -> io::Result<Self> {
        debug!(%addr, "Connecting");
        match addr {
            ListenAddr::Tcp(host) => {
                let stream = TcpStream::connect(host.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Self::new(stream))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => Ok(Self::new(UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    pub async fn send(&mut self, request: &Request) -> Result<usize, SendError> {
        self.sender.send(request).await
    }

    /// The next response, or `None` once the server has closed the connection.
    pub async fn next_response(&mut self) -> Option<Result<Response, FrameError>> {
        self.responses.next_message().await
    }

    /// Stop sending. The server finishes outstanding requests and then
    /// closes its side.
    pub async fn close(&mut self) -> io::Result<()> {
        self.sender.close().await
    }

    /// Separate the halves so requests and responses can be handled on
    /// different tasks.
    pub fn split(self) -> (LineSender, ResponseReader) {
        (self.sender, self.responses)
    }
}

/// Outgoing half of a client connection.
pub struct LineSender {
    writer: BoxedWrite,
}

impl LineSender {
    pub async fn send(&mut self, request: &Request) -> Result<usize, SendError> {
        let frame = encode_frame(request).map_err(|e| SendError::Io(io::Error::other(e)))?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(frame.len())
    }

    pub async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    #[tokio::test]
    async fn test_send_writes_one_line() {
        let (ours, theirs) = tokio::io::duplex(1024);
        let mut client = LineClient::new(ours);
        let mut server = tokio::io::BufReader::new(theirs);

        let request = Request::new("GET", "/v1/ping").with_request_id("c-1");
        let written = client.send(&request).await.unwrap();

        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        assert_eq!(line.len(), written);
        let decoded: Request = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn test_next_response_ends_with_connection() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let mut client = LineClient::new(ours);

        let response = Response::new("request", "/v1/ping", 200, serde_json::json!({}), "c-2");
        theirs.write_all(&encode_frame(&response).unwrap()).await.unwrap();
        drop(theirs);

        assert_eq!(client.next_response().await.unwrap().unwrap(), response);
        assert!(client.next_response().await.is_none());
    }
}
