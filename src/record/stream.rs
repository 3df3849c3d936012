//! Per-channel byte sink over pool buffers.

use std::sync::Arc;

use crate::gate::TransportError;
use crate::memory::{Buffer, BufferPool};

/// Receives each filled (or flushed) buffer, in strict write order.
pub type BufferOutput = Box<dyn FnMut(Buffer) -> Result<(), TransportError> + Send>;

/// Continuous byte stream that transparently requests fresh buffers from the
/// pool and hands full ones to its output. The pool request blocks under
/// memory pressure, which is how backpressure reaches the writer.
pub struct BufferStream {
    pool: Arc<BufferPool>,
    current: Option<Buffer>,
    output: BufferOutput,
}

impl BufferStream {
    /// Create a stream writing through `output`.
    pub fn new(pool: Arc<BufferPool>, output: BufferOutput) -> Self {
        Self {
            pool,
            current: None,
            output,
        }
    }

    /// Append bytes, rolling over to fresh buffers as they fill.
    pub fn write_bytes(&mut self, mut bytes: &[u8]) -> Result<(), TransportError> {
        while !bytes.is_empty() {
            let mut buffer = match self.current.take() {
                Some(buffer) => buffer,
                None => self.pool.alloc()?,
            };
            let written = buffer.write(bytes);
            bytes = &bytes[written..];
            if buffer.writable() == 0 {
                (self.output)(buffer)?;
            } else {
                self.current = Some(buffer);
            }
        }
        Ok(())
    }

    /// Emit the partially filled buffer, if it holds any bytes.
    pub fn flush(&mut self) -> Result<(), TransportError> {
        if let Some(buffer) = self.current.take() {
            if buffer.readable() > 0 {
                (self.output)(buffer)?;
            } else {
                self.pool.release(buffer)?;
            }
        }
        Ok(())
    }

    /// Flush and end the stream.
    pub fn close(&mut self) -> Result<(), TransportError> {
        self.flush()
    }
}

impl std::fmt::Debug for BufferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStream")
            .field("buffered", &self.current.as_ref().map(|b| b.readable()))
            .finish()
    }
}
