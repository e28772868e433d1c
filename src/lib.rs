//! Particle 9: an audio-reactive rendering engine.
//!
//! Frequency magnitudes from an [`audio::AudioSource`] are smoothed by the
//! [`audio::FeatureExtractor`] and drawn by whichever visualizer the
//! [`visualizer::VisualizerRegistry`] has active: a WGSL fragment program on
//! the GPU, or a composited effect on the CPU raster canvas.

pub mod audio;
pub mod compositor;
pub mod config;
pub mod error;
pub mod graphics;
pub mod render_loop;
pub mod visualizer;

pub use error::{CompileError, ScriptError, VisualizerError};
pub use render_loop::{FrameOutcome, RenderLoop, VisualizerContext};
pub use visualizer::{VisualizerDefinition, VisualizerRegistry};
