use glam::Vec2;
use std::f32::consts::TAU;

use super::canvas::{rgba, Canvas};
use super::{Effect, EffectFrame};
use crate::audio::SmoothingProfile;

pub const MAX_RING_POINTS: usize = 256;

const CORE_RADIUS: f32 = 120.0;
const RING_GAIN: f32 = 15000.0;
const CHORD_THRESHOLD: f32 = 5.0;
const MAX_CHORDS: usize = 40;

/// Glowing core with a spectrum ring around it. Loud treble throws random
/// chords across the ring.
pub struct NeuralCore {
    ring: Vec<Vec2>,
    rng: fastrand::Rng,
}

impl NeuralCore {
    pub fn new(seed: u64) -> Self {
        Self {
            ring: Vec::with_capacity(MAX_RING_POINTS / 2),
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl Effect for NeuralCore {
    fn profile(&self) -> SmoothingProfile {
        SmoothingProfile::STANDARD
    }

    fn render(&mut self, frame: &EffectFrame, canvas: &mut Canvas) {
        canvas.fade(rgba(11, 12, 16, 0.4));

        let center = canvas.center();
        let bins = frame.features.bins();
        let max_bins = bins.len().min(MAX_RING_POINTS);
        let bands = frame.features.bands();

        let core_radius = CORE_RADIUS + bands.bass * 1.5;
        canvas.radial_glow(
            center,
            core_radius,
            &[
                (0.0, rgba(102, 252, 241, 0.8 + bands.bass * 0.005)),
                (0.5, rgba(69, 162, 158, 0.4 + bands.mid * 0.005)),
                (1.0, rgba(11, 12, 16, 0.0)),
            ],
        );

        if max_bins < 2 {
            return;
        }

        self.ring.clear();
        for i in (0..max_bins).step_by(2) {
            let angle = i as f32 / max_bins as f32 * TAU;
            let radius = core_radius + bins[i].max(0.0).powf(1.2) * RING_GAIN;
            self.ring
                .push(center + Vec2::new(angle.cos(), angle.sin()) * radius);
        }
        canvas.polyline(
            &self.ring,
            true,
            2.0,
            rgba(102, 252, 241, 0.5 + bands.treble * 0.01),
        );

        if bands.treble > CHORD_THRESHOLD {
            let chords = ((bands.treble * 2.0) as usize).min(MAX_CHORDS);
            let white = rgba(255, 255, 255, 0.4);
            for _ in 0..chords {
                let a = self.ring[self.rng.usize(..self.ring.len())];
                let b = self.ring[self.rng.usize(..self.ring.len())];
                canvas.line(a, b, 1.0, white);
            }
        }
    }
}
