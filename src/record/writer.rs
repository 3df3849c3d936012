//! Partition-aware record writer.
//!
//! One writer drives one output gate. With a partitioner configured it keeps
//! one byte stream per destination channel; without one it keeps a single
//! broadcast stream whose buffers fan out to every channel.

use std::sync::Arc;

use serde::Serialize;

use crate::event::DataEvent;
use crate::gate::{DataProducer, TransportError};
use crate::record::{BufferOutput, BufferStream, Partitioner, TypeDefinition, WireItem, END_OF_STREAM};

/// Serializing writer for one output gate.
pub struct RecordWriter<R> {
    gate_index: usize,
    streams: Vec<BufferStream>,
    partitioner: Option<Box<dyn Partitioner<R>>>,
}

impl<R: Serialize> RecordWriter<R> {
    /// Build a writer over the gate's bound destinations.
    ///
    /// With a partitioner, channel count equals the gate's fan-out; without
    /// one, a single broadcast stream feeds every channel.
    pub fn new(
        producer: Arc<DataProducer>,
        gate_index: usize,
        partitioner: Option<Box<dyn Partitioner<R>>>,
    ) -> Self {
        let destinations = producer.binding(gate_index).to_vec();
        let pool = producer.allocator().clone();
        let src = producer.task_id();

        let channel_count = if partitioner.is_some() {
            destinations.len()
        } else {
            1
        };

        let streams = (0..channel_count)
            .map(|channel_index| {
                let producer = producer.clone();
                let output: BufferOutput = if partitioner.is_some() {
                    let dst = destinations[channel_index].task_id;
                    Box::new(move |buffer| {
                        producer.emit(
                            gate_index,
                            channel_index,
                            DataEvent::Data { src, dst, buffer },
                        )
                    })
                } else {
                    Box::new(move |buffer| producer.broadcast(gate_index, buffer))
                };
                BufferStream::new(pool.clone(), output)
            })
            .collect();

        Self {
            gate_index,
            streams,
            partitioner,
        }
    }

    /// Gate this writer feeds.
    #[inline]
    pub fn gate_index(&self) -> usize {
        self.gate_index
    }

    /// Number of per-channel streams (1 for broadcast).
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.streams.len()
    }

    /// Send the one-time type announcement on every stream.
    ///
    /// Must precede any record so the remote side can reconstruct the type.
    pub fn begin(&mut self) -> Result<(), TransportError> {
        let type_name = std::any::type_name::<R>().to_string();
        let definition = serde_json::to_vec(&TypeDefinition {
            type_name: type_name.clone(),
            encoding: "rmp".to_string(),
            version: crate::VERSION.to_string(),
        })?;
        let announcement = rmp_serde::to_vec(&WireItem::TypeAnnouncement {
            type_name,
            definition,
        })?;
        for stream in &mut self.streams {
            stream.write_bytes(&announcement)?;
        }
        Ok(())
    }

    /// Serialize one record into its destination channel's stream.
    ///
    /// The record may span buffers; the stream keeps strict buffer order.
    pub fn write_record(&mut self, record: &R) -> Result<(), TransportError> {
        let channel_index = self.route(record);
        let bytes = Self::encode(record)?;
        self.streams[channel_index].write_bytes(&bytes)
    }

    /// Serialize one standalone object and flush it immediately, so it is
    /// never split in a way that breaks decode-ability at the destination.
    pub fn write_object(&mut self, object: &R) -> Result<(), TransportError> {
        let channel_index = self.route(object);
        let bytes = Self::encode(object)?;
        self.streams[channel_index].write_bytes(&bytes)?;
        self.streams[channel_index].flush()
    }

    /// Write the end-of-stream marker on every channel, flush, and close.
    pub fn end(&mut self) -> Result<(), TransportError> {
        for stream in &mut self.streams {
            stream.write_bytes(&END_OF_STREAM)?;
            stream.close()?;
        }
        Ok(())
    }

    /// Replace the partitioner.
    ///
    /// Must not race ongoing writes; the channel topology stays as built.
    pub fn set_partitioner(&mut self, partitioner: Box<dyn Partitioner<R>>) {
        self.partitioner = Some(partitioner);
    }

    fn route(&self, record: &R) -> usize {
        match &self.partitioner {
            Some(partitioner) => partitioner.partition(record, self.streams.len()),
            None => 0,
        }
    }

    fn encode(record: &R) -> Result<Vec<u8>, TransportError> {
        let payload = rmp_serde::to_vec(record)?;
        Ok(rmp_serde::to_vec(&WireItem::Record(payload))?)
    }
}

impl<R> std::fmt::Debug for RecordWriter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriter")
            .field("gate", &self.gate_index)
            .field("channels", &self.streams.len())
            .field("partitioned", &self.partitioner.is_some())
            .finish()
    }
}
