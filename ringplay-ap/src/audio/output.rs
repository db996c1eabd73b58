//! Hardware output units
//!
//! An [`OutputBackend`] allocates an [`OutputStream`] (the hardware unit) on
//! `prepare`; the stream drives a [`RenderEngine`] from its callback between
//! `start` and `stop`. Stopping the stream drops the engine, which releases
//! the ring buffer's consumer role.
//!
//! - [`CpalBackend`]: a real device through cpal
//! - [`ManualBackend`]: no device; the caller pulls blocks through a
//!   [`ManualClock`] (headless rendering and tests)

use crate::audio::types::StreamDescriptor;
use crate::error::{Error, Result};
use crate::playback::render::RenderEngine;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Samples rendered per pass inside a device callback
const SCRATCH_SAMPLES: usize = 4096;

/// Allocates hardware units
pub trait OutputBackend: Send {
    /// Open a unit as close to `requested` as the device allows.
    ///
    /// The returned stream reports the format actually granted.
    fn open(&mut self, requested: &StreamDescriptor) -> Result<Box<dyn OutputStream>>;
}

/// An allocated hardware unit
pub trait OutputStream: Send {
    /// Format the unit consumes
    fn format(&self) -> StreamDescriptor;

    /// Fixed callback size in frames, if known
    fn buffer_frames(&self) -> Option<u32>;

    /// Start calling `engine` from the hardware clock
    fn start(&mut self, engine: RenderEngine) -> Result<()>;

    /// Halt callbacks and drop the engine. Idempotent.
    fn stop(&mut self) -> Result<()>;

    /// True once the device reported a stream error
    fn has_failed(&self) -> bool {
        false
    }
}

/// cpal output device
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
    buffer_frames: Option<u32>,
}

impl CpalBackend {
    /// `device_name` None selects the host default device
    pub fn new(device_name: Option<String>, buffer_frames: Option<u32>) -> Self {
        Self {
            device_name,
            buffer_frames,
        }
    }

    /// Names of the host's output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }
}

impl OutputBackend for CpalBackend {
    fn open(&mut self, requested: &StreamDescriptor) -> Result<Box<dyn OutputStream>> {
        Ok(Box::new(CpalStream::open(
            self.device_name.clone(),
            self.buffer_frames,
            *requested,
        )?))
    }
}

enum Command {
    Start(RenderEngine, mpsc::Sender<Result<()>>),
    Stop(mpsc::Sender<Result<()>>),
    Shutdown,
}

/// cpal unit owned by a control thread
///
/// `cpal::Stream` is not `Send`, so the device, config and stream live on a
/// dedicated thread that executes start/stop commands.
pub struct CpalStream {
    format: StreamDescriptor,
    buffer_frames: Option<u32>,
    commands: mpsc::Sender<Command>,
    thread: Option<JoinHandle<()>>,
    error_flag: Arc<AtomicBool>,
}

impl CpalStream {
    fn open(
        device_name: Option<String>,
        buffer_frames: Option<u32>,
        requested: StreamDescriptor,
    ) -> Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let error_flag = Arc::new(AtomicBool::new(false));
        let thread_error_flag = Arc::clone(&error_flag);

        let thread = thread::Builder::new()
            .name("ringplay-output".to_string())
            .spawn(move || {
                let opened = select_device(device_name.as_deref()).and_then(|device| {
                    let (config, sample_format) =
                        select_config(&device, &requested, buffer_frames)?;
                    Ok((device, config, sample_format))
                });

                let (device, config, sample_format) = match opened {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let format = StreamDescriptor::pcm16(config.sample_rate.0, config.channels);
                let _ = ready_tx.send(Ok(format));

                control_loop(device, config, sample_format, command_rx, thread_error_flag);
            })?;

        let format = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Output thread exited during open".to_string()))??;

        info!("Output unit ready: {}", format);

        Ok(Self {
            format,
            buffer_frames,
            commands,
            thread: Some(thread),
            error_flag,
        })
    }

    fn request(&self, make: impl FnOnce(mpsc::Sender<Result<()>>) -> Command) -> Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| Error::AudioOutput("Output thread not running".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Output thread exited".to_string()))?
    }
}

impl OutputStream for CpalStream {
    fn format(&self) -> StreamDescriptor {
        self.format
    }

    fn buffer_frames(&self) -> Option<u32> {
        self.buffer_frames
    }

    fn start(&mut self, engine: RenderEngine) -> Result<()> {
        self.request(|reply| Command::Start(engine, reply))
    }

    fn stop(&mut self) -> Result<()> {
        self.request(Command::Stop)
    }

    fn has_failed(&self) -> bool {
        self.error_flag.load(Ordering::Relaxed)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Output thread panicked");
            }
        }
    }
}

fn control_loop(
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    commands: mpsc::Receiver<Command>,
    error_flag: Arc<AtomicBool>,
) {
    let mut stream: Option<Stream> = None;

    while let Ok(command) = commands.recv() {
        match command {
            Command::Start(engine, reply) => {
                if stream.is_some() {
                    let _ = reply.send(Err(Error::AudioOutput(
                        "Output stream already running".to_string(),
                    )));
                    continue;
                }

                let started = build_stream(&device, &config, sample_format, engine, &error_flag)
                    .and_then(|s| {
                        s.play()
                            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
                        Ok(s)
                    });

                let result = started.map(|s| {
                    info!("Audio stream started");
                    stream = Some(s);
                });
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                if let Some(s) = stream.take() {
                    if let Err(e) = s.pause() {
                        warn!("Failed to pause stream: {}", e);
                    }
                    drop(s);
                    info!("Audio stream stopped");
                }
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown => break,
        }
    }

    debug!("Output control thread exiting");
}

/// Find the named device, falling back to the host default.
fn select_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Using requested audio device: {}", name);
            return Ok(device);
        }

        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;

    info!(
        "Using default audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(device)
}

/// Prefer the requested rate and channel count in a format we can convert
/// to (f32, i16, u16); otherwise take the device default.
fn select_config(
    device: &Device,
    requested: &StreamDescriptor,
    buffer_frames: Option<u32>,
) -> Result<(StreamConfig, SampleFormat)> {
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .filter(|c| {
            c.channels() == requested.channels
                && c.min_sample_rate().0 <= requested.sample_rate
                && c.max_sample_rate().0 >= requested.sample_rate
        })
        .collect::<Vec<_>>();

    let preferred = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16]
        .into_iter()
        .find_map(|format| supported.iter().find(|c| c.sample_format() == format));

    let (mut config, sample_format) = match preferred {
        Some(range) => {
            let sample_format = range.sample_format();
            let config = range
                .clone()
                .with_sample_rate(cpal::SampleRate(requested.sample_rate))
                .config();
            (config, sample_format)
        }
        None => {
            let default = device
                .default_output_config()
                .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
            warn!(
                "Device cannot play {}; using its default {}Hz {}ch",
                requested,
                default.sample_rate().0,
                default.channels()
            );
            (default.config(), default.sample_format())
        }
    };

    if let Some(frames) = buffer_frames {
        config.buffer_size = cpal::BufferSize::Fixed(frames);
        debug!("Using requested buffer size: {} frames", frames);
    }

    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
        config.sample_rate.0, config.channels, sample_format, config.buffer_size
    );

    Ok((config, sample_format))
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    engine: RenderEngine,
    error_flag: &Arc<AtomicBool>,
) -> Result<Stream> {
    match sample_format {
        SampleFormat::F32 => build_typed::<f32>(device, config, engine, error_flag),
        SampleFormat::I16 => build_typed::<i16>(device, config, engine, error_flag),
        SampleFormat::U16 => build_typed::<u16>(device, config, engine, error_flag),
        other => Err(Error::AudioOutput(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    }
}

fn build_typed<T>(
    device: &Device,
    config: &StreamConfig,
    mut engine: RenderEngine,
    error_flag: &Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let error_flag = Arc::clone(error_flag);
    let mut scratch = [0i16; SCRATCH_SAMPLES];
    let block = SCRATCH_SAMPLES - SCRATCH_SAMPLES % engine.channels();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(block) {
                    let pcm = &mut scratch[..chunk.len()];
                    engine.render(pcm);
                    for (dst, &sample) in chunk.iter_mut().zip(pcm.iter()) {
                        *dst = T::from_sample(sample);
                    }
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_flag.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

type EngineSlot = Arc<Mutex<Option<RenderEngine>>>;

fn lock_slot(slot: &EngineSlot) -> std::sync::MutexGuard<'_, Option<RenderEngine>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Device-less backend driven by the caller
///
/// Every unit it opens shares one engine slot with the clocks handed out by
/// [`ManualBackend::clock`], so a clock keeps working across sessions.
#[derive(Clone)]
pub struct ManualBackend {
    format: StreamDescriptor,
    buffer_frames: Option<u32>,
    slot: EngineSlot,
}

impl ManualBackend {
    /// Backend that always grants `sample_rate` / `channels`
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: StreamDescriptor::pcm16(sample_rate, channels),
            buffer_frames: None,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Report a fixed callback size
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = Some(frames);
        self
    }

    pub fn clock(&self) -> ManualClock {
        ManualClock {
            format: self.format,
            slot: Arc::clone(&self.slot),
        }
    }
}

impl OutputBackend for ManualBackend {
    fn open(&mut self, requested: &StreamDescriptor) -> Result<Box<dyn OutputStream>> {
        if *requested != self.format {
            debug!("Manual output grants {} (requested {})", self.format, requested);
        }
        Ok(Box::new(ManualStream {
            format: self.format,
            buffer_frames: self.buffer_frames,
            slot: Arc::clone(&self.slot),
        }))
    }
}

struct ManualStream {
    format: StreamDescriptor,
    buffer_frames: Option<u32>,
    slot: EngineSlot,
}

impl OutputStream for ManualStream {
    fn format(&self) -> StreamDescriptor {
        self.format
    }

    fn buffer_frames(&self) -> Option<u32> {
        self.buffer_frames
    }

    fn start(&mut self, engine: RenderEngine) -> Result<()> {
        let mut slot = lock_slot(&self.slot);
        if slot.is_some() {
            return Err(Error::AudioOutput(
                "Manual output already running".to_string(),
            ));
        }
        *slot = Some(engine);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        lock_slot(&self.slot).take();
        Ok(())
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        lock_slot(&self.slot).take();
    }
}

/// Caller-side clock for a [`ManualBackend`]
#[derive(Clone)]
pub struct ManualClock {
    format: StreamDescriptor,
    slot: EngineSlot,
}

impl ManualClock {
    /// True while a unit is started
    pub fn is_running(&self) -> bool {
        lock_slot(&self.slot).is_some()
    }

    /// Run one callback into `output`.
    ///
    /// Returns frames taken from the ring buffer, or None (and silence) when
    /// no unit is started.
    pub fn render_into(&self, output: &mut [i16]) -> Option<usize> {
        match lock_slot(&self.slot).as_mut() {
            Some(engine) => Some(engine.render(output)),
            None => {
                output.fill(0);
                None
            }
        }
    }

    /// Run one callback of `frames` frames and return the block
    pub fn pull(&self, frames: usize) -> Vec<i16> {
        let mut block = vec![0i16; self.format.samples_for_frames(frames)];
        self.render_into(&mut block);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ring_buffer::RingBuffer;
    use crate::effects::{LowPassEffect, LowPassPreset, MeterReading, PeakMeter};
    use crate::playback::callback_monitor::CallbackMonitor;
    use crate::playback::render::{telemetry_channel, RenderControls};

    fn engine(ring: &RingBuffer<i16>) -> (RenderEngine, crate::audio::ring_buffer::RingProducer<i16>) {
        let (producer, consumer) = ring.split().unwrap();
        let (tx, _rx) = telemetry_channel();
        let engine = RenderEngine::new(
            consumer,
            2,
            LowPassEffect::from_preset(LowPassPreset::Muffled, 2),
            PeakMeter::new(Arc::new(MeterReading::new())),
            Arc::new(RenderControls::new(false, false, false)),
            Arc::new(CallbackMonitor::new()),
            tx,
        );
        (engine, producer)
    }

    #[test]
    fn test_manual_clock_silent_when_stopped() {
        let backend = ManualBackend::new(44100, 2);
        let clock = backend.clock();
        assert!(!clock.is_running());
        assert_eq!(clock.pull(4), vec![0; 8]);
    }

    #[test]
    fn test_manual_stream_drives_engine() {
        let mut backend = ManualBackend::new(44100, 2);
        let clock = backend.clock();
        let mut stream = backend.open(&StreamDescriptor::pcm16(48000, 2)).unwrap();
        assert_eq!(stream.format(), StreamDescriptor::pcm16(44100, 2));

        let ring = RingBuffer::new(16);
        let (engine, mut producer) = engine(&ring);
        producer.write(&[1, 2, 3, 4]).unwrap();
        stream.start(engine).unwrap();
        assert!(clock.is_running());

        assert_eq!(clock.pull(3), vec![1, 2, 3, 4, 0, 0]);

        stream.stop().unwrap();
        assert!(!clock.is_running());
        drop(producer);
        // Engine dropped with the stop: roles are free again
        assert!(!ring.is_split());
    }

    #[test]
    fn test_manual_stream_rejects_double_start() {
        let mut backend = ManualBackend::new(44100, 2);
        let mut stream = backend.open(&StreamDescriptor::pcm16(44100, 2)).unwrap();

        let ring_a = RingBuffer::new(8);
        let ring_b = RingBuffer::new(8);
        let (engine_a, _pa) = engine(&ring_a);
        let (engine_b, _pb) = engine(&ring_b);

        stream.start(engine_a).unwrap();
        assert!(matches!(stream.start(engine_b), Err(Error::AudioOutput(_))));
    }
}
