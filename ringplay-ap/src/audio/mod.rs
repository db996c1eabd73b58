//! Audio plumbing: stream format, ring buffer, producers and output devices

pub mod decoder;
pub mod output;
pub mod producer;
pub mod resampler;
pub mod ring_buffer;
pub mod types;

pub use decoder::FileProducer;
pub use output::{CpalBackend, ManualBackend, ManualClock, OutputBackend, OutputStream};
pub use producer::{AudioProducer, MemoryProducer};
pub use resampler::StreamResampler;
pub use ring_buffer::{RingBuffer, RingBufferError, RingBufferRecord, RingConsumer, RingProducer};
pub use types::StreamDescriptor;
