//! Record serialization layer.
//!
//! Records travel as a stream of self-delimiting [`WireItem`]s packed into
//! fixed-size pool buffers. Every channel's stream opens with a one-time
//! type announcement and ends with the reserved end-of-stream sentinel, so a
//! receiver detects completion independent of any transport-level close.

mod partitioner;
mod stream;
mod writer;

pub use partitioner::{HashPartitioner, Partitioner, RoundRobinPartitioner};
pub use stream::{BufferOutput, BufferStream};
pub use writer::RecordWriter;

use std::io::Read;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::memory::Buffer;

/// One logical item on a channel's byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireItem {
    /// Self-describing header sent once per channel before any record.
    TypeAnnouncement {
        /// Qualified record type name.
        type_name: String,
        /// Serialized type definition for dynamic reconstruction.
        definition: Vec<u8>,
    },
    /// One encoded record.
    Record(Vec<u8>),
    /// Reserved sentinel recognized uniformly by readers.
    EndOfStream,
}

/// Self-describing type definition carried by the announcement, as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Qualified record type name.
    pub type_name: String,
    /// Record payload encoding.
    pub encoding: String,
    /// Producing runtime version.
    pub version: String,
}

/// Pre-encoded end-of-stream marker, written as the final item per channel.
pub static END_OF_STREAM: Lazy<Vec<u8>> = Lazy::new(|| {
    rmp_serde::to_vec(&WireItem::EndOfStream).expect("end-of-stream marker must encode")
});

/// `io::Read` adapter that counts consumed bytes.
struct CountingRead<'a> {
    data: &'a [u8],
    consumed: usize,
}

impl Read for CountingRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.data.read(buf)?;
        self.consumed += n;
        Ok(n)
    }
}

/// Reassembles a channel's byte stream and yields its wire items.
///
/// Feed received payload buffers in arrival order; per-channel FIFO delivery
/// guarantees the bytes concatenate into the stream the writer produced,
/// even when a record spans buffers.
#[derive(Debug, Default)]
pub struct RecordReader {
    assembled: Vec<u8>,
    position: usize,
    finished: bool,
}

impl RecordReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one received payload buffer to the stream.
    pub fn push_buffer(&mut self, buffer: &Buffer) {
        self.assembled.extend_from_slice(buffer.as_slice());
    }

    /// Whether the end-of-stream sentinel has been read.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode the next wire item, or `None` past the end of stream.
    pub fn next_item(&mut self) -> Result<Option<WireItem>, rmp_serde::decode::Error> {
        if self.finished || self.position >= self.assembled.len() {
            return Ok(None);
        }
        let mut reader = CountingRead {
            data: &self.assembled[self.position..],
            consumed: 0,
        };
        let item: WireItem = rmp_serde::decode::from_read(&mut reader)?;
        self.position += reader.consumed;
        if item == WireItem::EndOfStream {
            self.finished = true;
        }
        Ok(Some(item))
    }

    /// Decode a record payload produced by [`RecordWriter`].
    pub fn decode_record<T>(payload: &[u8]) -> Result<T, rmp_serde::decode::Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        rmp_serde::from_slice(payload)
    }
}

#[cfg(test)]
mod tests;
