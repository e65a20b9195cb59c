// src/protocol/socket.rs

//! NUL-delimited message framing over a Unix stream control socket.

use std::io;
use std::os::fd::OwnedFd;

use socket2::SockRef;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{trace, warn};

use super::message::{Message, MessageError};
use crate::errors::Result;

/// Control sockets only carry short messages, never bulk data.
pub const CONTROL_BUFFER_SIZE: usize = 1024;

/// Longest accepted frame, terminator included. Leaves room for a
/// `PATH_MAX` feature path.
pub const MAX_FRAME_LEN: usize = 8 * CONTROL_BUFFER_SIZE;

const FRAME_TERMINATOR: u8 = b'\0';

/// A control connection to one managed process instance.
#[derive(Debug)]
pub struct ControlSocket {
    reader: MessageReader,
    writer: MessageWriter,
}

impl ControlSocket {
    /// Wrap a descriptor received over the control channel.
    ///
    /// Buffer sizing failures are logged but do not fail the wrap.
    pub fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        let stream = std::os::unix::net::UnixStream::from(fd);
        if let Err(e) = configure_buffers(&stream, CONTROL_BUFFER_SIZE) {
            warn!(error = %e, "failed to size control socket buffers");
        }
        stream.set_nonblocking(true)?;
        Ok(Self::from_stream(UnixStream::from_std(stream)?))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: MessageReader {
                inner: BufReader::new(read_half),
            },
            writer: MessageWriter {
                inner: Mutex::new(write_half),
            },
        }
    }

    /// Read and decode the next message. `Ok(None)` means the peer closed.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        self.reader.read_message().await
    }

    pub async fn send(&self, message: &Message) -> io::Result<()> {
        self.writer.send(message).await
    }

    pub fn into_split(self) -> (MessageReader, MessageWriter) {
        (self.reader, self.writer)
    }
}

fn configure_buffers(stream: &std::os::unix::net::UnixStream, size: usize) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_recv_buffer_size(size)?;
    sock.set_send_buffer_size(size)?;
    Ok(())
}

/// Read side of a control socket.
#[derive(Debug)]
pub struct MessageReader {
    inner: BufReader<OwnedReadHalf>,
}

impl MessageReader {
    /// Read one raw frame. `Ok(None)` on a clean end of stream.
    ///
    /// Frames that are too long or not UTF-8 are protocol errors; the stream
    /// stays aligned on the next frame either way.
    pub async fn read_frame(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = (&mut self.inner)
            .take(MAX_FRAME_LEN as u64)
            .read_until(FRAME_TERMINATOR, &mut buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&FRAME_TERMINATOR) {
            buf.pop();
        } else if n == MAX_FRAME_LEN {
            self.skip_to_next_frame().await?;
            return Err(MessageError::TooLong {
                limit: MAX_FRAME_LEN,
            }
            .into());
        }

        let frame = String::from_utf8(buf).map_err(|_| MessageError::InvalidUtf8)?;
        trace!(%frame, "control frame received");
        Ok(Some(frame))
    }

    /// Discard input up to and including the next terminator (or the end of
    /// the stream).
    async fn skip_to_next_frame(&mut self) -> io::Result<()> {
        loop {
            let (consumed, done) = {
                let available = self.inner.fill_buf().await?;
                match available.iter().position(|b| *b == FRAME_TERMINATOR) {
                    Some(pos) => (pos + 1, true),
                    None => (available.len(), available.is_empty()),
                }
            };
            self.inner.consume(consumed);
            if done {
                return Ok(());
            }
        }
    }

    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        match self.read_frame().await? {
            Some(frame) => Ok(Some(Message::parse(&frame)?)),
            None => Ok(None),
        }
    }
}

/// Write side of a control socket. Sends are serialized internally so it
/// can be shared behind an `Arc`.
#[derive(Debug)]
pub struct MessageWriter {
    inner: Mutex<OwnedWriteHalf>,
}

impl MessageWriter {
    pub async fn send(&self, message: &Message) -> io::Result<()> {
        let mut frame = message.encode().into_bytes();
        frame.push(FRAME_TERMINATOR);

        let mut half = self.inner.lock().await;
        half.write_all(&frame).await?;
        half.flush().await
    }
}
