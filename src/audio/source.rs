use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Volume range accepted by the passthrough output.
pub const VOLUME_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

/// Common interface for everything that can feed magnitudes to the render loop.
///
/// The render loop treats every call as a request/response round trip. An
/// empty frame means "nothing new this frame" and the loop skips rendering.
///
/// Implementations hold platform audio streams, which are not `Send`, so the
/// futures are not required to be either.
///
/// # Available Implementations
/// - `CaptureSource`: live cpal input with optional passthrough output
/// - `SignalSource`: deterministic synthetic signal
/// - `WavFileSource`: a decoded WAV file stepped at the frame rate
#[async_trait(?Send)]
pub trait AudioSource {
    /// Next frequency-magnitude frame, or an empty vector when no data is ready.
    async fn next_frame(&mut self) -> Result<Vec<f32>>;

    /// Begin producing frames. `output` enables passthrough to that device.
    async fn start_capture(&mut self, input: &str, output: Option<&str>) -> Result<()>;

    async fn stop_capture(&mut self);

    async fn set_volume(&mut self, volume: f32) -> Result<()>;

    /// Short identification string for logs ("capture", "signal", ...).
    fn source_type(&self) -> &'static str;
}

/// User-visible state of the audio collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Disconnected,
    Visualizing { source: String },
    Failed(String),
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStatus::Disconnected => f.write_str("Disconnected"),
            CaptureStatus::Visualizing { source } => write!(f, "Visualizing ({source})"),
            CaptureStatus::Failed(reason) => write!(f, "Error: {reason}"),
        }
    }
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 1.0;
    }
    volume.clamp(*VOLUME_RANGE.start(), *VOLUME_RANGE.end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(CaptureStatus::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            CaptureStatus::Failed("Input device not found".into()).to_string(),
            "Error: Input device not found"
        );
    }

    #[test]
    fn volume_is_clamped() {
        assert_eq!(clamp_volume(5.0), 2.0);
        assert_eq!(clamp_volume(-1.0), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 1.0);
        assert_eq!(clamp_volume(0.7), 0.7);
    }
}
