pub mod features;
pub mod fft;
pub mod processor;
pub mod signal;
pub mod source;
pub mod wav;

pub use features::{
    audio_energy, BandEnergies, BandLayout, FeatureExtractor, FrameAudioFeatures,
    SmoothingProfile, MAX_BINS, MAX_ENERGY,
};
pub use fft::{SpectrumAnalyzer, FFT_SIZE};
pub use processor::CaptureSource;
pub use signal::SignalSource;
pub use source::{AudioSource, CaptureStatus};
pub use wav::WavFileSource;
