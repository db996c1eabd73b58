//! File-backed producer using symphonia
//!
//! Decodes MP3, FLAC, AAC, Vorbis and WAV incrementally, one packet at a time,
//! as the refill task asks for audio. Decoded audio is mapped to the session
//! channel layout, resampled if the session rate differs from the source, and
//! converted to interleaved 16-bit PCM.
//!
//! End of stream is signalled by the container reader returning
//! `UnexpectedEof`. Any other read or decode error is terminal: audio decoded
//! before the failure is still delivered, then every later call returns
//! `Error::Decode`.

use crate::audio::producer::AudioProducer;
use crate::audio::resampler::StreamResampler;
use crate::audio::types::{f32_to_i16, StreamDescriptor};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// Producer decoding an audio file on demand
pub struct FileProducer {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    native: StreamDescriptor,
    output: StreamDescriptor,
    sample_buf: Option<SampleBuffer<f32>>,
    resampler: Option<StreamResampler>,
    mapped: Vec<f32>,
    converted: Vec<f32>,
    pending: VecDeque<i16>,
    finished: bool,
    failure: Option<String>,
    frames_rendered: u64,
}

impl FileProducer {
    /// Open and probe an audio file.
    ///
    /// # Errors
    /// `Error::SourceOpen` if the file is missing or unreadable, the container
    /// is not recognised, or no decodable audio track is present.
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening source: {}", path.display());

        let file = std::fs::File::open(path).map_err(|e| {
            Error::SourceOpen(format!("Failed to open file {}: {}", path.display(), e))
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Extension hint helps the probe pick a reader
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                Error::SourceOpen(format!("Failed to probe {}: {}", path.display(), e))
            })?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                Error::SourceOpen(format!("No audio track found in {}", path.display()))
            })?;

        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::SourceOpen("Sample rate not found".to_string()))?;

        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .filter(|&c| c > 0)
            .ok_or_else(|| Error::SourceOpen("Channel count not found".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::SourceOpen(format!("Failed to create decoder: {}", e)))?;

        let native = StreamDescriptor::pcm16(sample_rate, channels);
        info!("Opened {} ({})", path.display(), native);

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            native,
            output: native,
            sample_buf: None,
            resampler: None,
            mapped: Vec::new(),
            converted: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
            failure: None,
            frames_rendered: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format delivered by `render_into`
    pub fn output_format(&self) -> StreamDescriptor {
        self.output
    }

    /// Frames handed out so far
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Decode one packet of the selected track into `pending`.
    ///
    /// Returns `Ok(false)` at end of stream.
    fn decode_next_packet(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(e) => return Err(Error::Decode(format!("Error reading packet: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self
                .decoder
                .decode(&packet)
                .map_err(|e| Error::Decode(format!("Decode error: {}", e)))?;

            let spec = *decoded.spec();
            let source_channels = spec.channels.count();
            let needed = decoded.capacity() * source_channels;

            if self.sample_buf.as_ref().is_some_and(|b| b.capacity() < needed) {
                self.sample_buf = None;
            }
            let sample_buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
            sample_buf.copy_interleaved_ref(decoded);

            self.mapped.clear();
            map_channels(
                sample_buf.samples(),
                source_channels,
                self.output.channel_count(),
                &mut self.mapped,
            );

            match &mut self.resampler {
                Some(resampler) => {
                    resampler.push_interleaved(&self.mapped);
                    self.converted.clear();
                    resampler.drain_ready(&mut self.converted)?;
                    self.pending
                        .extend(self.converted.iter().map(|&s| f32_to_i16(s)));
                }
                None => {
                    self.pending.extend(self.mapped.iter().map(|&s| f32_to_i16(s)));
                }
            }

            return Ok(true);
        }
    }

    /// Convert the resampler tail once the container is exhausted
    fn flush_resampler(&mut self) -> Result<()> {
        if let Some(resampler) = &mut self.resampler {
            self.converted.clear();
            resampler.flush(&mut self.converted)?;
            self.pending
                .extend(self.converted.iter().map(|&s| f32_to_i16(s)));
        }
        Ok(())
    }
}

impl AudioProducer for FileProducer {
    fn descriptor(&self) -> StreamDescriptor {
        self.native
    }

    /// Accepts any interleaved 16-bit layout: channels are mapped and the
    /// sample rate converted as needed.
    fn set_output_format(&mut self, format: &StreamDescriptor) -> Result<()> {
        if format.channels == 0 || format.bits_per_sample != 16 || !format.interleaved {
            return Err(Error::SourceOpen(format!(
                "Unsupported output format: {}",
                format
            )));
        }

        self.resampler = if format.sample_rate != self.native.sample_rate {
            Some(StreamResampler::new(
                self.native.sample_rate,
                format.sample_rate,
                format.channel_count(),
            )?)
        } else {
            None
        };

        if format.channels != self.native.channels {
            debug!(
                "Mapping {} source channels to {}",
                self.native.channels, format.channels
            );
        }

        self.output = *format;
        Ok(())
    }

    fn render_into(&mut self, buffer: &mut [i16]) -> Result<usize> {
        let wanted = self.output.align_to_frame(buffer.len());

        while self.pending.len() < wanted && !self.finished && self.failure.is_none() {
            match self.decode_next_packet() {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Reached end of {}", self.path.display());
                    self.finished = true;
                    if let Err(e) = self.flush_resampler() {
                        self.failure = Some(e.to_string());
                    }
                }
                Err(e) => {
                    warn!("Decode failed for {}: {}", self.path.display(), e);
                    self.failure = Some(e.to_string());
                }
            }
        }

        let count = self.output.align_to_frame(self.pending.len()).min(wanted);
        if count == 0 {
            if let Some(message) = &self.failure {
                return Err(Error::Decode(message.clone()));
            }
            return Ok(0);
        }

        for (dst, sample) in buffer.iter_mut().zip(self.pending.drain(..count)) {
            *dst = sample;
        }

        let frames = self.output.frames_for_samples(count);
        self.frames_rendered += frames as u64;
        Ok(frames)
    }

    fn close(&mut self) {
        debug!(
            "Closing {} after {} frames",
            self.path.display(),
            self.frames_rendered
        );
        self.finished = true;
        self.pending.clear();
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Map interleaved frames between channel layouts.
///
/// Mono is duplicated to every output channel; surplus source channels are
/// dropped; missing output channels are silent.
fn map_channels(input: &[f32], source: usize, target: usize, output: &mut Vec<f32>) {
    if source == target {
        output.extend_from_slice(input);
        return;
    }

    output.reserve(input.len() / source * target);
    for frame in input.chunks_exact(source) {
        for ch in 0..target {
            let sample = if source == 1 {
                frame[0]
            } else if ch < source {
                frame[ch]
            } else {
                0.0
            };
            output.push(sample);
        }
    }
}
