use glam::Vec2;
use tiny_skia::Color;

use super::canvas::{rgb, rgba, Canvas};
use super::pool::ParticlePool;
use super::{Effect, EffectFrame};
use crate::audio::SmoothingProfile;

pub const MAX_SPARKS: usize = 200;
pub const MAX_SMOKE: usize = 100;

const SPARK_GRAVITY: f32 = 1.2;
const SPARK_DECAY: f32 = 0.03;
const SMOKE_CHANCE: f32 = 0.4;
const SMOKE_CEILING: f32 = -150.0;

struct Spark {
    position: Vec2,
    velocity: Vec2,
    life: f32,
    color: Color,
}

struct Smoke {
    position: Vec2,
    velocity: Vec2,
    size: f32,
    opacity: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Pistons {
    left_x: f32,
    right_x: f32,
    y: f32,
    width: f32,
    height: f32,
}

/// Two pistons slam together on the bass, throwing sparks; smoke drifts up
/// behind them and big hits flash the frame with a bolt of lightning.
pub struct IndustrialMachine {
    sparks: ParticlePool<Spark>,
    smoke: ParticlePool<Smoke>,
    pistons: Pistons,
    bolt: Vec<Vec2>,
    rng: fastrand::Rng,
}

impl IndustrialMachine {
    pub fn new(seed: u64) -> Self {
        Self {
            sparks: ParticlePool::new(MAX_SPARKS),
            smoke: ParticlePool::new(MAX_SMOKE),
            pistons: Pistons::default(),
            bolt: Vec::new(),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn active_sparks(&self) -> usize {
        self.sparks.active_count()
    }

    pub fn active_smoke(&self) -> usize {
        self.smoke.active_count()
    }

    fn draw_smoke(&mut self, canvas: &mut Canvas) {
        self.smoke.update(|puff| {
            puff.position += puff.velocity;
            canvas.fill_circle(puff.position, puff.size, rgba(60, 60, 60, puff.opacity));
            puff.position.y >= SMOKE_CEILING
        });
    }

    fn draw_pistons(&mut self, canvas: &mut Canvas, bass: f32, mid: f32) {
        let (w, h) = (canvas.width(), canvas.height());
        let width = (w * 0.15).max(100.0);
        let height = h * 0.6;
        let travel = w * 0.5 - width / 2.0;
        let surge = if bass > 10.0 { bass.powf(1.5) } else { 0.0 };
        let extension = (bass * 5.0 + surge).min(travel);

        let p = Pistons {
            left_x: -width + extension,
            right_x: w - extension,
            y: h / 2.0 - height / 2.0,
            width,
            height,
        };
        self.pistons = p;

        let body = rgb(0x2c, 0x20, 0x1d);
        let rim = rgb(0x8b, 0x45, 0x13);
        for x in [p.left_x, p.right_x] {
            canvas.fill_rect(x, p.y, p.width, p.height, body);
            canvas.stroke_rect(x, p.y, p.width, p.height, 6.0, rim);
        }

        let groove = rgba(0, 0, 0, 0.5);
        for i in 1..=4 {
            let y = p.y + p.height * 0.2 * i as f32;
            for x in [p.left_x, p.right_x] {
                canvas.line(Vec2::new(x, y), Vec2::new(x + p.width, y), 4.0, groove);
            }
        }

        let glow = rgba(255, 120, 0, 0.4);
        let mid_lines = ((mid / 2.0).max(0.0) as usize).min(15);
        for _ in 0..mid_lines {
            let y = p.y + self.rng.f32() * p.height;
            canvas.fill_rect(p.left_x, y, p.width, self.rng.f32() * 6.0 + 1.0, glow);
            canvas.fill_rect(p.right_x, y, p.width, self.rng.f32() * 6.0 + 1.0, glow);
        }
    }

    fn spawn(&mut self, canvas: &Canvas, bass: f32, mid: f32) {
        let (w, h) = (canvas.width(), canvas.height());
        let rng = &mut self.rng;

        if rng.f32() < SMOKE_CHANCE {
            self.smoke.spawn(Smoke {
                position: Vec2::new(rng.f32() * w, h + 50.0),
                size: rng.f32() * 150.0 + 50.0,
                opacity: rng.f32() * 0.08 + 0.02,
                velocity: Vec2::new((rng.f32() - 0.5) * 2.0, -rng.f32() * 2.0 - 1.0),
            });
        }

        if bass > 20.0 || mid > 20.0 {
            let p = self.pistons;
            let count = (rng.f32() * 20.0 * (bass / 50.0 + 0.5)).max(0.0) as usize;
            for _ in 0..count {
                if self.sparks.is_full() {
                    break;
                }
                let left = rng.f32() > 0.5;
                let direction = if left { 1.0 } else { -1.0 };
                self.sparks.spawn(Spark {
                    position: Vec2::new(
                        if left { p.left_x + p.width } else { p.right_x },
                        p.y + rng.f32() * p.height,
                    ),
                    velocity: Vec2::new(
                        direction * (rng.f32() * 20.0 + 5.0),
                        (rng.f32() - 0.5) * 30.0 - 5.0,
                    ),
                    life: 1.0,
                    color: if rng.f32() > 0.3 {
                        rgb(0xff, 0xa5, 0x00)
                    } else {
                        rgb(0xff, 0x45, 0x00)
                    },
                });
            }
        }
    }

    fn draw_sparks(&mut self, canvas: &mut Canvas) {
        self.sparks.update(|spark| {
            spark.position += spark.velocity;
            spark.velocity.y += SPARK_GRAVITY;
            spark.life -= SPARK_DECAY;

            let color = if spark.life < 0.3 {
                rgba(255, 69, 0, spark.life)
            } else {
                spark.color
            };
            let tail = spark.position - spark.velocity * 0.4;
            canvas.line(spark.position, tail, 3.0, color);
            spark.life > 0.0
        });
    }

    fn draw_lightning(&mut self, canvas: &mut Canvas, bass: f32, mid: f32, treble: f32) {
        let total = bass + mid + treble;
        if !(total > 200.0 || bass > 50.0 || treble > 100.0) {
            return;
        }

        canvas.fade(rgba(255, 255, 255, (total * 0.005).min(0.7)));

        let p = self.pistons;
        let mut x = (p.left_x + p.width).max(0.0);
        let mut y = p.y + self.rng.f32() * p.height * 0.8 + p.height * 0.1;
        self.bolt.clear();
        self.bolt.push(Vec2::new(x, y));
        while x < p.right_x {
            x = (x + self.rng.f32() * 80.0 + 20.0).min(p.right_x);
            y += (self.rng.f32() - 0.5) * 150.0;
            self.bolt.push(Vec2::new(x, y));
        }
        canvas.polyline(&self.bolt, false, 5.0 + bass * 0.05, Color::WHITE);
    }
}

impl Effect for IndustrialMachine {
    fn profile(&self) -> SmoothingProfile {
        SmoothingProfile::STANDARD.with_gains([37500.0, 20000.0, 30000.0])
    }

    fn render(&mut self, frame: &EffectFrame, canvas: &mut Canvas) {
        let bands = frame.features.bands();
        let (bass, mid, treble) = (bands.bass, bands.mid, bands.treble);

        canvas.fade(rgba(10, 10, 12, 0.5));
        self.draw_smoke(canvas);
        self.draw_pistons(canvas, bass, mid);
        self.spawn(canvas, bass, mid);
        self.draw_sparks(canvas);
        self.draw_lightning(canvas, bass, mid, treble);

        if treble > 10.0 {
            let (w, h) = (canvas.width(), canvas.height());
            let strip = rgba(255, 255, 255, 0.15);
            let strips = ((self.rng.f32() * treble) as usize).min(40);
            for _ in 0..strips {
                canvas.fill_rect(
                    self.rng.f32() * w - 50.0,
                    self.rng.f32() * h,
                    self.rng.f32() * w,
                    8.0,
                    strip,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FeatureExtractor;

    #[test]
    fn pools_stay_within_capacity_under_sustained_load() {
        let mut extractor = FeatureExtractor::new();
        let mut effect = IndustrialMachine::new(3);
        let mut canvas = Canvas::new(320, 240).unwrap();
        let profile = effect.profile();

        for frame in 0..300 {
            let features = extractor.update(&[1.0; 512], 1.0, &profile).clone();
            effect.render(&EffectFrame::new(&features, frame as f32 / 60.0), &mut canvas);
            assert!(effect.active_sparks() <= MAX_SPARKS);
            assert!(effect.active_smoke() <= MAX_SMOKE);
        }
        assert!(effect.active_sparks() > 0);
    }

    #[test]
    fn silence_spawns_no_sparks() {
        let mut extractor = FeatureExtractor::new();
        let mut effect = IndustrialMachine::new(3);
        let mut canvas = Canvas::new(320, 240).unwrap();

        for _ in 0..60 {
            let features = extractor.update(&[0.0; 512], 1.0, &effect.profile()).clone();
            effect.render(&EffectFrame::new(&features, 0.0), &mut canvas);
        }
        assert_eq!(effect.active_sparks(), 0);
    }
}
