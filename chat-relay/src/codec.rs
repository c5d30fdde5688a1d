use bytes::{BufMut, Bytes, BytesMut};
use clap::ValueEnum;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::ReadError;

/// Longest line accepted by [`Framing::Lines`] unless configured otherwise.
pub const DEFAULT_LINE_LIMIT: usize = 64 * 1024;

/// Largest single read taken as one message by [`Framing::Raw`].
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// How message boundaries are found on the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Framing {
    /// One message per `\n`-terminated line; the delimiter is not part of the message.
    #[default]
    Lines,
    /// One message per transport read, forwarded untouched.
    Raw,
}

impl Framing {
    pub fn default_limit(self) -> usize {
        match self {
            Framing::Lines => DEFAULT_LINE_LIMIT,
            Framing::Raw => DEFAULT_CHUNK_SIZE,
        }
    }

    /// Produces the bytes that go on the wire for `message`.
    pub fn encode(self, message: &Bytes) -> Bytes {
        match self {
            Framing::Lines => {
                let mut frame = BytesMut::with_capacity(message.len() + 1);
                frame.put_slice(message);
                frame.put_u8(b'\n');
                frame.freeze()
            }
            Framing::Raw => message.clone(),
        }
    }
}

/// Splits an inbound byte stream into messages.
pub struct MessageReader<R> {
    inner: BufReader<R>,
    framing: Framing,
    limit: usize,
    buf: Vec<u8>,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, framing: Framing, limit: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            framing,
            limit,
            buf: Vec::new(),
        }
    }

    /// Waits for the next message. `Ok(None)` means the peer closed the stream.
    pub async fn next_message(&mut self) -> Result<Option<Bytes>, ReadError> {
        match self.framing {
            Framing::Lines => self.next_line().await,
            Framing::Raw => self.next_chunk().await,
        }
    }

    async fn next_line(&mut self) -> Result<Option<Bytes>, ReadError> {
        self.buf.clear();
        // Room for the message plus a "\r\n" terminator.
        let cap = self.limit + 2;
        let read = (&mut self.inner)
            .take(cap as u64)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }

        let terminated = self.buf.last() == Some(&b'\n');
        if !terminated && read >= cap {
            return Err(ReadError::FrameTooLong { limit: self.limit });
        }

        let mut line = self.buf.as_slice();
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line.len() > self.limit {
            return Err(ReadError::FrameTooLong { limit: self.limit });
        }

        Ok(Some(Bytes::copy_from_slice(line)))
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, ReadError> {
        self.buf.resize(self.limit, 0);
        let read = self.inner.read(&mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.buf[..read])))
    }
}
