use glam::Vec2;
use tiny_skia::Color;

use super::canvas::{hsla, Canvas};
use super::{Effect, EffectFrame};
use crate::audio::SmoothingProfile;

pub const RING_COUNT: usize = 50;
pub const FAR_PLANE: f32 = 2000.0;
const NEAR_PLANE: f32 = 1.0;
const FOCAL: f32 = 500.0;

/// Rings rushing towards the viewer. Depth shrinks by a bass-driven speed
/// each frame and wraps back to the far plane.
pub struct VortexTunnel {
    depths: [f32; RING_COUNT],
}

impl VortexTunnel {
    pub fn new() -> Self {
        let mut depths = [0.0; RING_COUNT];
        for (i, depth) in depths.iter_mut().enumerate() {
            *depth = i as f32 / RING_COUNT as f32 * FAR_PLANE;
        }
        Self { depths }
    }

    pub fn depths(&self) -> &[f32] {
        &self.depths
    }
}

impl Default for VortexTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for VortexTunnel {
    fn profile(&self) -> SmoothingProfile {
        SmoothingProfile::STANDARD
            .with_bin_count(128)
            .with_gains([10000.0, 8000.0, 12000.0])
    }

    fn render(&mut self, frame: &EffectFrame, canvas: &mut Canvas) {
        canvas.clear(Color::BLACK);

        let bass = frame.features.bands().bass;
        let center = canvas.center();
        let millis = frame.time * 1000.0;
        let speed = 4.0 + bass * 0.5;

        for (i, depth) in self.depths.iter_mut().enumerate() {
            *depth -= speed;
            if *depth <= NEAR_PLANE {
                *depth = FAR_PLANE;
            }

            let scale = FOCAL / *depth;
            let radius = 100.0 * scale;
            if radius > canvas.width() * 2.0 {
                continue;
            }

            let hue = (i as f32 * 10.0 + millis * 0.1) % 360.0;
            let color = hsla(hue, 1.0, 0.5, 1.0 - *depth / FAR_PLANE);
            let sway = (*depth * 0.01 + millis * 0.005).sin() * 50.0 * scale;
            let radius = if i % 2 == 0 { radius + bass * scale } else { radius };

            canvas.stroke_circle(center + Vec2::new(sway, 0.0), radius, 2.0 * scale, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FeatureExtractor;

    #[test]
    fn depths_stay_between_the_planes() {
        let mut extractor = FeatureExtractor::new();
        let mut effect = VortexTunnel::new();
        let mut canvas = Canvas::new(320, 240).unwrap();

        for frame in 0..500 {
            let features = extractor.update(&[0.2; 128], 1.0, &effect.profile()).clone();
            effect.render(&EffectFrame::new(&features, frame as f32 / 60.0), &mut canvas);
            assert!(effect
                .depths()
                .iter()
                .all(|&z| z > NEAR_PLANE && z <= FAR_PLANE));
        }
    }
}
