//! Length-prefixed framing over a byte stream.
//!
//! Every message on the wire is `u64_le(len) || payload`, including the data
//! blocks that follow a `DATA` header. [`FrameReader::read_exact`] pulls
//! unframed bytes from the same buffered stream.

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::LoomError;

const HEADER: usize = size_of::<u64>();
const CHUNK: usize = 64 * 1024;

/// Reassembles whole frames from arbitrarily fragmented reads.
pub struct FrameReader<R> {
    stream: R,
    buffer: BytesMut,
}

impl<R: Read> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(CHUNK),
        }
    }

    /// Blocks until one complete frame is available and returns its payload.
    /// Excess bytes stay buffered for the next call.
    pub fn receive(&mut self) -> Result<Bytes, LoomError> {
        loop {
            if self.buffer.len() >= HEADER {
                let size = (&self.buffer[..HEADER]).get_u64_le();
                let size = usize::try_from(size).map_err(|_| {
                    LoomError::Protocol(format!("frame of {size} bytes can't be addressed"))
                })?;

                if self.buffer.len() - HEADER >= size {
                    self.buffer.advance(HEADER);
                    return Ok(self.buffer.split_to(size).freeze());
                }

                // The length comes from the peer; grow with the data instead.
                let missing = HEADER.saturating_add(size).saturating_sub(self.buffer.len());
                self.buffer.reserve(missing.min(CHUNK));
            }

            self.fill()?;
        }
    }

    /// Returns exactly `n` bytes, draining the buffer before touching the
    /// stream.
    pub fn read_exact(&mut self, n: usize) -> Result<Bytes, LoomError> {
        if self.buffer.len() < n {
            self.buffer.reserve((n - self.buffer.len()).min(CHUNK));
        }

        while self.buffer.len() < n {
            self.fill()?;
        }

        Ok(self.buffer.split_to(n).freeze())
    }

    /// Bytes read from the stream but not consumed yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn fill(&mut self) -> Result<(), LoomError> {
        let mut chunk = [0u8; CHUNK];

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(LoomError::connection_closed()),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(LoomError::ConnectionLost { source }),
            }
        }
    }
}

/// Writes length-prefixed frames, each as a single logical write.
pub struct FrameWriter<W> {
    stream: W,
    buffer: BytesMut,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
        }
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), LoomError> {
        self.buffer.clear();
        self.buffer.reserve(HEADER + payload.len());
        self.buffer.put_u64_le(payload.len() as u64);
        self.buffer.put_slice(payload);

        self.stream
            .write_all(&self.buffer)
            .and_then(|_| self.stream.flush())
            .map_err(|source| LoomError::ConnectionLost { source })
    }

    pub fn send_message<M: prost::Message>(&mut self, message: &M) -> Result<(), LoomError> {
        self.send(&message.encode_to_vec())
    }

    pub fn into_inner(self) -> W {
        self.stream
    }
}
