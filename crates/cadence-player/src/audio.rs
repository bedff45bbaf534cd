//! CPAL audio host for the stream clock
//!
//! Plays a test tone on the default (or configured) output device. The
//! audio callback is the single realtime driver of the clock: it pops
//! transport commands from a lock-free ring, applies them, and posts the
//! media duration of every rendered buffer at the top of the callback.
//! Other threads only poll `stream_usecs()`.
//!
//! ```text
//! ┌──────────────────┐                     ┌─────────────────────┐
//! │   Main Thread    │───push()───────────►│   Command Queue     │
//! │ (transport, log) │                     │  (lock-free SPSC)   │
//! └────────┬─────────┘                     └──────────┬──────────┘
//!          │                                          │ pop()
//!          │ stream_usecs()                           ▼
//!          ▼                               ┌─────────────────────┐
//! ┌──────────────────┐    post_buffer()    │  CPAL Audio Thread  │
//! │   StreamClock    │◄────────────────────│  (renders tone)     │
//! └──────────────────┘                     └─────────────────────┘
//! ```

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, Stream, StreamConfig};
use thiserror::Error;

use cadence_core::{frames_to_usecs, StreamClock, Usecs, DEFAULT_AUDIO_LATENCY};

use crate::config::PlayerConfig;

/// Capacity of the transport command ring; commands are rare, this never
/// fills in practice
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Errors that can occur while bringing up the audio output
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to enumerate devices
    #[error("Failed to enumerate audio devices: {0}")]
    EnumerationError(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Transport commands sent from the main thread to the audio callback
///
/// The callback applies these to the clock so that all control calls come
/// from the one realtime thread.
#[derive(Debug, Clone, Copy)]
pub enum TransportCommand {
    /// Freeze playback in place (FIFO state preserved)
    Pause,
    /// Continue from the paused position
    Resume,
    /// Jump to a media position in microseconds
    Seek(Usecs),
    /// Stop and flush
    Stop,
}

/// Command sender for the main thread
///
/// Wraps the producer side of the lock-free queue; pushing never blocks.
pub struct CommandSender {
    producer: rtrb::Producer<TransportCommand>,
}

impl CommandSender {
    /// Send a command to the audio callback (non-blocking)
    ///
    /// Returns `Err(cmd)` if the queue is full (command is returned).
    pub fn send(&mut self, cmd: TransportCommand) -> Result<(), TransportCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }
}

/// Handle to the running audio output
///
/// Keeps the stream alive; drop it to stop audio.
pub struct AudioHandle {
    _stream: Stream,
    sample_rate: u32,
}

impl AudioHandle {
    /// Sample rate negotiated with the device
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Sine tone generator plus transport state owned by the callback
struct Renderer {
    clock: Arc<StreamClock>,
    commands: rtrb::Consumer<TransportCommand>,
    sample_rate: u32,
    phase: f32,
    phase_step: f32,
    playing: bool,
}

impl Renderer {
    /// Apply pending transport commands; runs at the top of every callback
    fn apply_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                TransportCommand::Pause => {
                    self.clock.pause(false);
                    self.playing = false;
                }
                TransportCommand::Resume => {
                    self.clock.resume();
                    self.playing = true;
                }
                TransportCommand::Seek(usecs) => {
                    self.clock.seek(usecs);
                }
                TransportCommand::Stop => {
                    self.clock.stop();
                    self.playing = false;
                }
            }
        }
    }

    /// Fill an interleaved output buffer
    fn render(&mut self, data: &mut [f32], channels: usize) {
        self.apply_commands();

        let n_frames = data.len() / channels;

        if !self.playing {
            data.fill(0.0);
            return;
        }

        // Announce the write before rendering it
        self.clock
            .post_buffer(frames_to_usecs(n_frames as i64, self.sample_rate as i64));

        for frame in data.chunks_mut(channels) {
            let sample = self.phase.sin() * 0.2;
            self.phase += self.phase_step;
            if self.phase > std::f32::consts::TAU {
                self.phase -= std::f32::consts::TAU;
            }
            for ch in frame.iter_mut() {
                *ch = sample;
            }
        }
    }
}

/// Find the configured output device, or the system default
fn find_output_device(name: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| AudioError::EnumerationError(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string()))
        }
        None => host.default_output_device().ok_or(AudioError::NoDevices),
    }
}

/// Start the audio output and wire it to the stream clock
///
/// Configures the clock latency (override from the config, otherwise a
/// conservative default no smaller than [`DEFAULT_AUDIO_LATENCY`]) and
/// returns the stream handle plus the command sender for the main thread.
pub fn start_audio(
    config: &PlayerConfig,
    clock: Arc<StreamClock>,
) -> AudioResult<(AudioHandle, CommandSender)> {
    let device = find_output_device(config.device.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    if supported.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            supported.sample_format()
        )));
    }

    let sample_rate = config.sample_rate.unwrap_or(supported.sample_rate().0);
    let channels = supported.channels();

    let buffer_size = match config.buffer_frames {
        Some(frames) => BufferSize::Fixed(frames),
        None => BufferSize::Default,
    };

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size,
    };

    // Latency: explicit override wins; otherwise twice the fixed buffer
    // duration, floored at the conservative default.
    let latency_usecs = config.latency_usecs.unwrap_or_else(|| {
        let buffer_usecs = config
            .buffer_frames
            .map(|frames| frames_to_usecs(frames as i64, sample_rate as i64))
            .unwrap_or(0);
        (2 * buffer_usecs).max(DEFAULT_AUDIO_LATENCY)
    });
    clock.set_latency(latency_usecs);

    log::info!(
        "Audio config: {} channels, {}Hz, clock latency {}ms",
        channels,
        sample_rate,
        latency_usecs / 1000
    );

    let (producer, consumer) = rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY);

    let mut renderer = Renderer {
        clock,
        commands: consumer,
        sample_rate,
        phase: 0.0,
        phase_step: std::f32::consts::TAU * config.tone_hz / sample_rate as f32,
        playing: true,
    };

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                renderer.render(data, channels as usize);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Audio stream started");

    Ok((
        AudioHandle {
            _stream: stream,
            sample_rate,
        },
        CommandSender { producer },
    ))
}
