//! Audio producer abstraction
//!
//! A producer is a pull-based source of interleaved 16-bit PCM. The refill
//! task owns it for the duration of a session and calls `render_into` from
//! its own thread, never from the real-time callback.

use crate::audio::types::StreamDescriptor;
use crate::error::{Error, Result};

/// Pull-based PCM source
pub trait AudioProducer: Send {
    /// Native stream format, known once the source is open
    fn descriptor(&self) -> StreamDescriptor;

    /// Configure the format `render_into` must deliver.
    ///
    /// Called once before the first render. The default accepts only the
    /// native format; producers that convert override this.
    fn set_output_format(&mut self, format: &StreamDescriptor) -> Result<()> {
        if *format == self.descriptor() {
            Ok(())
        } else {
            Err(Error::SourceOpen(format!(
                "{} cannot deliver {} (native {})",
                self.source_name(),
                format,
                self.descriptor()
            )))
        }
    }

    /// Fill the front of `buffer` with whole frames.
    ///
    /// Returns the number of frames written. `Ok(0)` means clean end of
    /// stream; an `Err` is terminal for the session. May block on I/O.
    fn render_into(&mut self, buffer: &mut [i16]) -> Result<usize>;

    /// Release the source. Called once when the session ends.
    fn close(&mut self) {}

    /// Human-readable source name for logs and events
    fn source_name(&self) -> String;
}

/// Producer that replays an in-memory buffer of interleaved samples.
///
/// Useful for tones, prompts and tests.
pub struct MemoryProducer {
    descriptor: StreamDescriptor,
    samples: Vec<i16>,
    position: usize,
    name: String,
}

impl MemoryProducer {
    /// Wrap interleaved samples; a trailing partial frame is dropped
    pub fn new(descriptor: StreamDescriptor, mut samples: Vec<i16>) -> Self {
        let whole = descriptor.align_to_frame(samples.len());
        samples.truncate(whole);
        Self {
            descriptor,
            samples,
            position: 0,
            name: "memory".to_string(),
        }
    }

    /// Set the name reported in logs and events
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Samples not yet rendered
    pub fn remaining_samples(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl AudioProducer for MemoryProducer {
    fn descriptor(&self) -> StreamDescriptor {
        self.descriptor
    }

    fn render_into(&mut self, buffer: &mut [i16]) -> Result<usize> {
        let wanted = self.descriptor.align_to_frame(buffer.len());
        let count = wanted.min(self.remaining_samples());
        buffer[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Ok(self.descriptor.frames_for_samples(count))
    }

    fn source_name(&self) -> String {
        self.name.clone()
    }
}
