use super::canvas::{hsl, hsla, rgba, Canvas};
use super::{Effect, EffectFrame};
use crate::audio::SmoothingProfile;

pub const BAR_COUNT: usize = 64;
const BAR_GAP: f32 = 4.0;

/// Bin index feeding bar `bar`. Quadratic spacing gives the low end most of
/// the bars.
pub fn bar_bin(bar: usize, bin_count: usize) -> usize {
    let ratio = bar as f32 / BAR_COUNT as f32;
    (ratio * ratio * bin_count as f32) as usize
}

/// Classic equaliser bars sweeping from red to violet.
pub struct SpectrumBars;

impl Effect for SpectrumBars {
    fn profile(&self) -> SmoothingProfile {
        SmoothingProfile::STANDARD.with_blend(0.85)
    }

    fn render(&mut self, frame: &EffectFrame, canvas: &mut Canvas) {
        canvas.fade(rgba(15, 15, 15, 0.3));

        let (w, h) = (canvas.width(), canvas.height());
        let bar_width = w / BAR_COUNT as f32 - BAR_GAP;
        if bar_width <= 0.0 {
            return;
        }
        let bin_count = frame.features.bins().len();

        for bar in 0..BAR_COUNT {
            let ratio = bar as f32 / BAR_COUNT as f32;
            let value = frame.features.bin(bar_bin(bar, bin_count)).max(0.0);
            let height = (value * (40000.0 + ratio * 20000.0)).min(h - 20.0);
            if height <= 0.0 {
                continue;
            }

            let x = bar as f32 * (bar_width + BAR_GAP) + 2.0;
            let hue = ratio * 280.0;
            canvas.fill_rect(x - 2.0, h - height - 2.0, bar_width + 4.0, height + 2.0, hsla(hue, 1.0, 0.5, 0.25));
            canvas.fill_rect(x, h - height, bar_width, height, hsl(hue, 1.0, 0.6));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_favour_low_bins() {
        assert_eq!(bar_bin(0, 256), 0);
        assert_eq!(bar_bin(32, 256), 64);
        assert_eq!(bar_bin(63, 256), 248);
        assert!(bar_bin(BAR_COUNT - 1, 256) < 256);
    }
}
