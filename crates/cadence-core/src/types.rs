//! Common types for Cadence
//!
//! Time quantities throughout the crate are signed 64-bit microseconds.

/// Media/system time in microseconds
pub type Usecs = i64;

/// Default end-to-end FIFO latency in microseconds (160 ms)
///
/// The audio latency is typically 2x the total buffer depth configured in
/// the HAL. A common HAL runs 4 x 20ms buffers; doubling that gives
/// conservative headroom when the host never measured its real latency.
pub const DEFAULT_AUDIO_LATENCY: Usecs = 20_000 * 4 * 2;

/// Floor for the startup offset between the read pointer and the reported
/// position (40 ms). Applies even when `latency / 2` would be smaller;
/// very-low-latency configurations destabilize without it.
pub const INITIAL_OFFSET_FLOOR: Usecs = 40_000;

/// Lower clamp for the time factor while rolling
pub const TF_MIN: f64 = 0.5;

/// Upper clamp for the time factor; saturating here signals an overrun
pub const TF_MAX: f64 = 2.0;

/// Playback state of the stream clock
///
/// `Stopped` freezes the clock with the FIFOs conceptually flushed (also the
/// initial state). `Rolling` advances the clock under feedback control.
/// `Paused` freezes the clock while the FIFO state is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Stopped,
    Rolling,
    Paused,
}

impl StreamState {
    /// Short name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            StreamState::Stopped => "STOPPED",
            StreamState::Rolling => "ROLLING",
            StreamState::Paused => "PAUSED",
        }
    }
}

/// The reasons (inputs) for a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateInput {
    Stop,
    Seek,
    Pause,
    PostBuffer,
    Underrun,
    Overrun,
}

impl StateInput {
    /// Short name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            StateInput::Stop => "STOP",
            StateInput::Seek => "SEEK",
            StateInput::Pause => "PAUSE",
            StateInput::PostBuffer => "POST_BUFFER",
            StateInput::Underrun => "ERR_UNDERRUN",
            StateInput::Overrun => "ERR_OVERRUN",
        }
    }
}

/// Convert a byte count into media microseconds
///
/// `frame_size` is bytes per frame (channels x bytes per sample).
#[inline]
pub fn bytes_to_usecs(bytes: i64, frame_size: i64, sample_rate: i64) -> Usecs {
    (bytes / frame_size) * 1_000_000 / sample_rate
}

/// Convert a frame count into media microseconds
#[inline]
pub fn frames_to_usecs(frames: i64, sample_rate: i64) -> Usecs {
    frames * 1_000_000 / sample_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_usecs() {
        // 48kHz stereo s16: 4 bytes per frame, 4800 frames = 100ms
        assert_eq!(bytes_to_usecs(4800 * 4, 4, 48000), 100_000);
    }

    #[test]
    fn test_frames_to_usecs() {
        assert_eq!(frames_to_usecs(480, 48000), 10_000);
        assert_eq!(frames_to_usecs(441, 44100), 10_000);
    }

    #[test]
    fn test_default_latency() {
        assert_eq!(DEFAULT_AUDIO_LATENCY, 160_000);
    }
}
