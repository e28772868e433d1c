use anyhow::Result;
use async_trait::async_trait;
use std::f32::consts::TAU;

use super::fft::SpectrumAnalyzer;
use super::source::{clamp_volume, AudioSource};

/// Deterministic synthetic input for headless runs and benchmarks.
///
/// A kick drum at `bpm`, a sustained mid tone and a shimmering high partial are
/// summed and pushed through the same analyzer live capture uses, one display
/// frame of samples per `next_frame` call.
pub struct SignalSource {
    analyzer: SpectrumAnalyzer,
    sample_rate: f32,
    frame_rate: f32,
    bpm: f32,
    position: u64,
    volume: f32,
    running: bool,
    primed: bool,
    buffer: Vec<f32>,
}

impl SignalSource {
    pub fn new(sample_rate: f32, frame_rate: f32) -> Self {
        Self {
            analyzer: SpectrumAnalyzer::new(),
            sample_rate,
            frame_rate,
            bpm: 120.0,
            position: 0,
            volume: 1.0,
            running: false,
            primed: false,
            buffer: Vec::new(),
        }
    }

    pub fn with_bpm(mut self, bpm: f32) -> Self {
        self.bpm = bpm.max(1.0);
        self
    }

    fn samples_per_frame(&self) -> usize {
        (self.sample_rate / self.frame_rate.max(1.0)).round().max(1.0) as usize
    }

    fn sample_at(&self, index: u64) -> f32 {
        let t = index as f32 / self.sample_rate;
        let beat = 60.0 / self.bpm;
        let since_beat = t % beat;

        let kick = (TAU * 55.0 * t).sin() * (-since_beat * 12.0).exp();
        let pad = (TAU * 440.0 * t).sin() * 0.25;
        let shimmer = (TAU * 6000.0 * t).sin() * 0.1 * (0.5 + 0.5 * (TAU * 0.25 * t).sin());

        (kick + pad + shimmer) * self.volume
    }
}

#[async_trait(?Send)]
impl AudioSource for SignalSource {
    async fn next_frame(&mut self) -> Result<Vec<f32>> {
        if !self.running {
            return Ok(Vec::new());
        }

        let count = self.samples_per_frame();
        let start = self.position;
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        buffer.extend((0..count as u64).map(|i| self.sample_at(start + i)));
        self.position += count as u64;

        self.primed |= self.analyzer.push_samples(&buffer);
        self.buffer = buffer;

        // Nothing to report until the first full window has been transformed.
        if self.primed {
            Ok(self.analyzer.magnitudes().to_vec())
        } else {
            Ok(Vec::new())
        }
    }

    async fn start_capture(&mut self, _input: &str, _output: Option<&str>) -> Result<()> {
        self.running = true;
        Ok(())
    }

    async fn stop_capture(&mut self) {
        self.running = false;
        self.position = 0;
        self.primed = false;
        self.analyzer.reset();
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.volume = clamp_volume(volume);
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "signal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_source_yields_empty_frames() {
        let mut source = SignalSource::new(48_000.0, 60.0);
        let frame = pollster::block_on(source.next_frame()).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn running_source_produces_bass_heavy_spectrum() {
        let mut source = SignalSource::new(48_000.0, 30.0);
        pollster::block_on(source.start_capture("signal", None)).unwrap();

        let mut frame = Vec::new();
        for _ in 0..8 {
            frame = pollster::block_on(source.next_frame()).unwrap();
        }
        assert_eq!(frame.len(), 512);

        let low: f32 = frame[..10].iter().sum();
        let high: f32 = frame[400..].iter().sum();
        assert!(low > high);
    }

    #[test]
    fn output_is_deterministic() {
        let run = || {
            let mut source = SignalSource::new(44_100.0, 60.0);
            pollster::block_on(source.start_capture("signal", None)).unwrap();
            (0..5)
                .map(|_| pollster::block_on(source.next_frame()).unwrap())
                .last()
                .unwrap()
        };
        assert_eq!(run(), run());
    }
}
