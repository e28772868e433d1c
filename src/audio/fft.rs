use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::Arc;

pub const FFT_SIZE: usize = 1024;

/// How much of the previous spectrum survives each transform.
const SPECTRUM_RETENTION: f32 = 0.8;

/// Windowed FFT over a stream of mono samples.
///
/// Samples are accumulated until a full window is available; each window
/// produces `FFT_SIZE / 2` magnitudes scaled by `1 / FFT_SIZE` and blended into
/// the running spectrum. All buffers are allocated once.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    accumulator: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        Self {
            fft,
            window: Self::hann_window(FFT_SIZE),
            accumulator: Vec::with_capacity(FFT_SIZE * 2),
            scratch: vec![Complex::default(); FFT_SIZE],
            magnitudes: vec![0.0; FFT_SIZE / 2],
        }
    }

    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size as f32 - 1.0)).cos())
            })
            .collect()
    }

    /// Feed mono samples. Returns true when at least one transform ran.
    pub fn push_samples(&mut self, samples: &[f32]) -> bool {
        let mut transformed = false;
        for &sample in samples {
            self.accumulator.push(sample);
            if self.accumulator.len() >= FFT_SIZE {
                self.transform();
                transformed = true;
            }
        }
        transformed
    }

    fn transform(&mut self) {
        for (i, sample) in self.accumulator.drain(..FFT_SIZE).enumerate() {
            self.scratch[i] = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let scale = 1.0 / FFT_SIZE as f32;
        for (magnitude, c) in self.magnitudes.iter_mut().zip(&self.scratch) {
            let fresh = c.norm() * scale;
            *magnitude = *magnitude * SPECTRUM_RETENTION + fresh * (1.0 - SPECTRUM_RETENTION);
        }
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.magnitudes.iter_mut().for_each(|m| *m = 0.0);
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
