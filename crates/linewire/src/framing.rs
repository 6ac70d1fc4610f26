//! Newline-delimited JSON framing.
//!
//! Every frame is one JSON object followed by exactly one `\n`. The reader
//! assembles a line from as many buffered chunks as it takes, then decodes it.

use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::marker::PhantomData;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::FrameError;
use crate::message::Request;

/// Byte appended after every encoded frame.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Serialize `message` and append the frame terminator.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes, serde_json::Error> {
    let mut buf = serde_json::to_vec(message)?;
    buf.push(FRAME_TERMINATOR);
    Ok(Bytes::from(buf))
}

/// Reads frames off a byte stream and decodes them as `T`.
///
/// Partially assembled lines live in the reader rather than in the pending
/// future, so [`next_message`](Self::next_message) is cancel safe and can sit
/// in a `select!`.
pub struct FrameReader<R, T = Request> {
    inner: BufReader<R>,
    line: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<R, T> FrameReader<R, T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Read the next raw line, without its terminator.
    ///
    /// Returns `Ok(None)` once the stream has ended and nothing is buffered.
    /// An unterminated final line is still returned as a frame.
    pub async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let chunk = self.inner.fill_buf().await?;
            if chunk.is_empty() {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            match chunk.iter().position(|b| *b == FRAME_TERMINATOR) {
                Some(end) => {
                    self.line.extend_from_slice(&chunk[..end]);
                    self.inner.consume(end + 1);
                    return Ok(Some(self.take_line()));
                }
                None => {
                    // Line continues past the buffered chunk.
                    let len = chunk.len();
                    self.line.extend_from_slice(chunk);
                    self.inner.consume(len);
                }
            }
        }
    }

    /// Read and decode the next frame.
    ///
    /// `None` means end of stream. A decode failure affects only that frame;
    /// the reader is positioned at the start of the next line.
    pub async fn next_message(&mut self) -> Option<Result<T, FrameError>> {
        match self.read_frame().await {
            Ok(Some(line)) => Some(serde_json::from_slice(&line).map_err(FrameError::from)),
            Ok(None) => None,
            Err(e) => Some(Err(FrameError::Io(e))),
        }
    }

    /// Turn the reader into a stream of decoded frames.
    ///
    /// The stream ends at end of input or after the first read error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<T, FrameError>> {
        stream! {
            while let Some(item) = self.next_message().await {
                let fatal = matches!(&item, Err(e) if e.is_fatal());
                yield item;
                if fatal {
                    break;
                }
            }
        }
    }

    fn take_line(&mut self) -> Vec<u8> {
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        std::mem::take(&mut self.line)
    }
}
