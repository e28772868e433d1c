use glam::Vec2;
use std::f32::consts::PI;

use super::canvas::{rgb, rgba, Canvas};
use super::{Effect, EffectFrame};
use crate::audio::SmoothingProfile;

const GRID_SPACING: f32 = 40.0;
const RADIAL_LINES: usize = 30;
const SUN_BANDS: usize = 6;
const SUN_SEGMENTS: usize = 48;
const MOUNTAIN_STEP: f32 = 20.0;
const MOUNTAIN_FIRST_BIN: usize = 20;

/// Synthwave horizon: a banded sun, a scrolling perspective grid and
/// spectrum mountains mirrored either side of the centre.
pub struct RetroGrid {
    offset: f32,
    outline: Vec<Vec2>,
}

impl RetroGrid {
    pub fn new() -> Self {
        Self {
            offset: 0.0,
            outline: Vec::new(),
        }
    }

    fn draw_sun(&mut self, canvas: &mut Canvas, center: Vec2, bass: f32) {
        let radius = 200.0 + bass * 0.5;

        self.outline.clear();
        for i in 0..=SUN_SEGMENTS {
            let angle = PI + PI * i as f32 / SUN_SEGMENTS as f32;
            self.outline
                .push(center + Vec2::new(angle.cos(), angle.sin()) * radius);
        }
        canvas.fill_polygon_vertical_gradient(
            &self.outline,
            center.y - radius,
            rgb(0xff, 0x00, 0x7f),
            center.y + radius,
            rgb(0xf9, 0xa8, 0x26),
        );

        let band = rgba(10, 5, 20, 1.0);
        for b in 1..=SUN_BANDS {
            let b = b as f32;
            let thickness = b * (2.0 + bass * 0.02);
            canvas.fill_rect(center.x - radius, center.y - b * 30.0, radius * 2.0, thickness, band);
        }
    }

    fn draw_grid(&mut self, canvas: &mut Canvas, center: Vec2, bass: f32) {
        let (w, h) = (canvas.width(), canvas.height());
        self.offset = (self.offset + 2.0 + bass * 0.05) % GRID_SPACING;
        let color = rgba(0, 255, 255, 0.3 + bass * 0.005);
        let floor = h - center.y;

        let mut y = center.y;
        while y < h + 100.0 {
            let relative = y - center.y + self.offset;
            let depth = (relative / floor).max(0.0).powf(1.5);
            let projected = center.y + floor * depth;
            canvas.line(Vec2::new(0.0, projected), Vec2::new(w, projected), 1.5, color);
            y += GRID_SPACING;
        }

        for i in 0..RADIAL_LINES {
            let spread = (i as f32 - RADIAL_LINES as f32 / 2.0) * 150.0;
            canvas.line(center, Vec2::new(center.x + spread * 3.0, h), 1.5, color);
        }
    }

    fn draw_mountains(&mut self, canvas: &mut Canvas, center: Vec2, bins: &[f32], left: bool) {
        let max_bins = bins.len();
        if max_bins <= MOUNTAIN_FIRST_BIN {
            return;
        }
        let edge = if left { 0.0 } else { canvas.width() };

        self.outline.clear();
        self.outline.push(Vec2::new(edge, center.y));
        let mut i = 0.0;
        while i < center.x {
            let t = i / center.x;
            let bin = (t * (max_bins - MOUNTAIN_FIRST_BIN) as f32) as usize + MOUNTAIN_FIRST_BIN;
            let amplitude = bins[bin.min(max_bins - 1)].max(0.0).powf(1.2) * 15000.0;
            let x = if left { center.x - i } else { center.x + i };
            self.outline.push(Vec2::new(x, center.y - amplitude * t));
            i += MOUNTAIN_STEP;
        }
        self.outline.push(Vec2::new(edge, center.y));

        canvas.fill_polygon(&self.outline, rgba(0, 255, 255, 0.2));
        canvas.polyline(&self.outline, true, 1.0, rgba(0, 255, 255, 0.8));
    }
}

impl Default for RetroGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for RetroGrid {
    fn profile(&self) -> SmoothingProfile {
        SmoothingProfile::STANDARD
            .with_blend(0.75)
            .with_gains([7500.0, 8000.0, 12000.0])
    }

    fn render(&mut self, frame: &EffectFrame, canvas: &mut Canvas) {
        canvas.fade(rgba(10, 5, 20, 0.4));
        let center = Vec2::new(canvas.width() / 2.0, canvas.height() * 0.6);
        let bass = frame.features.bands().bass;

        self.draw_sun(canvas, center, bass);
        self.draw_grid(canvas, center, bass);
        self.draw_mountains(canvas, center, frame.features.bins(), true);
        self.draw_mountains(canvas, center, frame.features.bins(), false);
    }
}
