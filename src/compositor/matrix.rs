use glam::Vec2;
use tiny_skia::Color;

use super::canvas::{rgb, rgba, Canvas};
use super::{Effect, EffectFrame};
use crate::audio::SmoothingProfile;

pub const MAX_COLUMNS: usize = 256;
pub const GLYPHS: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ$+-*/=%\"'#&_(),.;:?!\\|{}<>[]^~";

const FONT_SIZE: f32 = 16.0;
const RESET_CHANCE: f32 = 0.025;

/// Falling glyph columns. Each column resets to the top at random once it is
/// past the bottom edge, so they never fall in step.
pub struct DigitalRain {
    drops: [f32; MAX_COLUMNS],
    glyphs: Vec<char>,
    rng: fastrand::Rng,
}

impl DigitalRain {
    pub fn new(seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut drops = [0.0; MAX_COLUMNS];
        for drop in drops.iter_mut() {
            *drop = rng.f32() * -100.0;
        }
        Self {
            drops,
            glyphs: GLYPHS.chars().collect(),
            rng,
        }
    }

    pub fn drops(&self) -> &[f32] {
        &self.drops
    }
}

impl Effect for DigitalRain {
    fn profile(&self) -> SmoothingProfile {
        SmoothingProfile::STANDARD.with_bin_count(128)
    }

    fn render(&mut self, frame: &EffectFrame, canvas: &mut Canvas) {
        let energy = frame.features.bands().mean();
        canvas.fade(rgba(0, 0, 0, 0.15));

        let columns = ((canvas.width() / FONT_SIZE) as usize).min(MAX_COLUMNS);
        let green = rgb(0, (155.0 + energy * 5.0).clamp(0.0, 255.0) as u8, 0);
        let speed = 1.0 + energy * 0.2;

        for (i, drop) in self.drops.iter_mut().take(columns).enumerate() {
            let glyph = self.glyphs[self.rng.usize(..self.glyphs.len())];
            let color = if energy > 20.0 && self.rng.f32() > 0.98 {
                Color::WHITE
            } else {
                green
            };
            // Glyphs sit on their baseline like text does.
            let origin = Vec2::new(i as f32 * FONT_SIZE, *drop * FONT_SIZE - FONT_SIZE);
            canvas.glyph(glyph, origin, FONT_SIZE, color);

            *drop += speed * (0.5 + self.rng.f32() * 0.5);
            if *drop * FONT_SIZE > canvas.height() && self.rng.f32() < RESET_CHANCE {
                *drop = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FeatureExtractor;

    #[test]
    fn columns_fall_and_eventually_reset() {
        let mut extractor = FeatureExtractor::new();
        let mut effect = DigitalRain::new(11);
        let mut canvas = Canvas::new(160, 64).unwrap();
        let mut reset_seen = false;

        for _ in 0..2000 {
            let before = effect.drops()[0];
            let features = extractor.update(&[0.01; 128], 1.0, &effect.profile()).clone();
            effect.render(&EffectFrame::new(&features, 0.0), &mut canvas);
            if effect.drops()[0] < before {
                reset_seen = true;
                assert_eq!(effect.drops()[0], 0.0);
            }
        }
        assert!(reset_seen);
    }

    #[test]
    fn columns_beyond_the_frame_are_left_alone() {
        let mut effect = DigitalRain::new(5);
        let untouched = effect.drops()[100];
        let mut canvas = Canvas::new(160, 64).unwrap();
        let mut extractor = FeatureExtractor::new();
        let features = extractor.update(&[0.0; 128], 1.0, &effect.profile()).clone();
        effect.render(&EffectFrame::new(&features, 0.0), &mut canvas);
        assert_eq!(effect.drops()[100], untouched);
    }
}
