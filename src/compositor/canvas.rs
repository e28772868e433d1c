use anyhow::{anyhow, Result};
use glam::Vec2;
use tiny_skia::{
    Color, FillRule, GradientStop, LinearGradient, Paint, Path, PathBuilder, Pixmap, Point,
    RadialGradient, Rect, SpreadMode, Stroke, Transform,
};

/// Straight-alpha colour from 8-bit channels and a `[0, 1]` alpha.
pub fn rgba(r: u8, g: u8, b: u8, a: f32) -> Color {
    Color::from_rgba8(r, g, b, unit_to_u8(a))
}

pub fn rgb(r: u8, g: u8, b: u8) -> Color {
    Color::from_rgba8(r, g, b, 255)
}

/// `hue` in degrees, `saturation` and `lightness` in `[0, 1]`.
pub fn hsla(hue: f32, saturation: f32, lightness: f32, alpha: f32) -> Color {
    let h = hue.rem_euclid(360.0) / 360.0;
    let s = saturation.clamp(0.0, 1.0);
    let l = lightness.clamp(0.0, 1.0);

    let (r, g, b) = if s == 0.0 {
        (l, l, l)
    } else {
        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;
        (
            hue_to_channel(p, q, h + 1.0 / 3.0),
            hue_to_channel(p, q, h),
            hue_to_channel(p, q, h - 1.0 / 3.0),
        )
    };
    Color::from_rgba8(unit_to_u8(r), unit_to_u8(g), unit_to_u8(b), unit_to_u8(alpha))
}

pub fn hsl(hue: f32, saturation: f32, lightness: f32) -> Color {
    hsla(hue, saturation, lightness, 1.0)
}

fn hue_to_channel(p: f32, q: f32, t: f32) -> f32 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

fn unit_to_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Raster frame the compositor draws into. Pixels are premultiplied RGBA8,
/// rows top-down; every drawing call blends source-over.
pub struct Canvas {
    pixmap: Pixmap,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = Pixmap::new(width.max(1), height.max(1))
            .ok_or_else(|| anyhow!("failed to allocate {}x{} canvas", width, height))?;
        Ok(Self { pixmap })
    }

    /// Reallocate for a new size. Content is discarded. Returns whether the
    /// size changed.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.pixmap.width(), self.pixmap.height()) {
            return Ok(false);
        }
        *self = Self::new(width, height)?;
        Ok(true)
    }

    pub fn width(&self) -> f32 {
        self.pixmap.width() as f32
    }

    pub fn height(&self) -> f32 {
        self.pixmap.height() as f32
    }

    pub fn size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width() / 2.0, self.height() / 2.0)
    }

    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    /// Replace every pixel with `color`.
    pub fn clear(&mut self, color: Color) {
        self.pixmap.fill(color);
    }

    /// Blend a translucent full-frame rectangle over the previous frame,
    /// leaving motion trails.
    pub fn fade(&mut self, color: Color) {
        let (w, h) = (self.width(), self.height());
        self.fill_rect(0.0, 0.0, w, h, color);
    }

    pub fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Color) {
        let Some(rect) = normalized_rect(x, y, width, height) else {
            return;
        };
        self.pixmap
            .fill_rect(rect, &solid(color), Transform::identity(), None);
    }

    pub fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, line_width: f32, color: Color) {
        let Some(rect) = normalized_rect(x, y, width, height) else {
            return;
        };
        let path = PathBuilder::from_rect(rect);
        self.stroke(&path, line_width, color);
    }

    pub fn fill_circle(&mut self, center: Vec2, radius: f32, color: Color) {
        if let Some(path) = circle_path(center, radius) {
            self.fill(&path, &solid(color));
        }
    }

    pub fn stroke_circle(&mut self, center: Vec2, radius: f32, line_width: f32, color: Color) {
        if let Some(path) = circle_path(center, radius) {
            self.stroke(&path, line_width, color);
        }
    }

    /// Disc filled with a radial gradient; `stops` are `(offset, colour)`
    /// pairs from the centre outwards.
    pub fn radial_glow(&mut self, center: Vec2, radius: f32, stops: &[(f32, Color)]) {
        let Some(path) = circle_path(center, radius) else {
            return;
        };
        let point = Point::from_xy(center.x, center.y);
        let stops = stops
            .iter()
            .map(|&(offset, color)| GradientStop::new(offset, color))
            .collect();
        let Some(shader) = RadialGradient::new(
            point,
            point,
            radius,
            stops,
            SpreadMode::Pad,
            Transform::identity(),
        ) else {
            return;
        };

        let mut paint = Paint::default();
        paint.shader = shader;
        paint.anti_alias = true;
        self.fill(&path, &paint);
    }

    pub fn line(&mut self, from: Vec2, to: Vec2, line_width: f32, color: Color) {
        let mut builder = PathBuilder::new();
        builder.move_to(from.x, from.y);
        builder.line_to(to.x, to.y);
        if let Some(path) = builder.finish() {
            self.stroke(&path, line_width, color);
        }
    }

    pub fn polyline(&mut self, points: &[Vec2], closed: bool, line_width: f32, color: Color) {
        if let Some(path) = polygon_path(points, closed) {
            self.stroke(&path, line_width, color);
        }
    }

    pub fn fill_polygon(&mut self, points: &[Vec2], color: Color) {
        if let Some(path) = polygon_path(points, true) {
            self.fill(&path, &solid(color));
        }
    }

    /// Fill a polygon with a vertical gradient running from `top` at `y0` to
    /// `bottom` at `y1`.
    pub fn fill_polygon_vertical_gradient(&mut self, points: &[Vec2], y0: f32, top: Color, y1: f32, bottom: Color) {
        let Some(path) = polygon_path(points, true) else {
            return;
        };
        let Some(shader) = LinearGradient::new(
            Point::from_xy(0.0, y0),
            Point::from_xy(0.0, y1),
            vec![GradientStop::new(0.0, top), GradientStop::new(1.0, bottom)],
            SpreadMode::Pad,
            Transform::identity(),
        ) else {
            return;
        };

        let mut paint = Paint::default();
        paint.shader = shader;
        paint.anti_alias = true;
        self.fill(&path, &paint);
    }

    /// Draw `ch` from the built-in 3x5 block font in a cell `size` pixels
    /// tall whose top-left corner is `origin`.
    pub fn glyph(&mut self, ch: char, origin: Vec2, size: f32, color: Color) {
        let bits = glyph_bits(ch);
        let cell = size / 6.0;
        let left = origin.x + cell * 0.5;
        let paint = solid(color);

        for row in 0..5 {
            for col in 0..3 {
                if bits & (1 << (14 - (row * 3 + col))) == 0 {
                    continue;
                }
                if let Some(rect) = Rect::from_xywh(
                    left + col as f32 * cell,
                    origin.y + cell * 0.5 + row as f32 * cell,
                    cell,
                    cell,
                ) {
                    self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);
                }
            }
        }
    }

    /// Straight-alpha copy of the frame, for snapshots.
    pub fn to_rgba_image(&self) -> image::RgbaImage {
        let mut pixels = self.pixmap.data().to_vec();
        for pixel in pixels.chunks_exact_mut(4) {
            let alpha = pixel[3] as u16;
            if alpha == 0 {
                pixel[..3].fill(0);
                continue;
            }
            for channel in &mut pixel[..3] {
                *channel = ((*channel as u16 * 255 + alpha / 2) / alpha).min(255) as u8;
            }
        }
        image::RgbaImage::from_raw(self.pixmap.width(), self.pixmap.height(), pixels)
            .unwrap_or_else(|| image::RgbaImage::new(self.pixmap.width(), self.pixmap.height()))
    }

    fn fill(&mut self, path: &Path, paint: &Paint) {
        self.pixmap
            .fill_path(path, paint, FillRule::Winding, Transform::identity(), None);
    }

    fn stroke(&mut self, path: &Path, line_width: f32, color: Color) {
        if !(line_width > 0.0) {
            return;
        }
        let stroke = Stroke {
            width: line_width,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(path, &solid(color), &stroke, Transform::identity(), None);
    }
}

fn solid(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(color);
    paint.anti_alias = true;
    paint
}

fn normalized_rect(x: f32, y: f32, width: f32, height: f32) -> Option<Rect> {
    let (x, width) = if width < 0.0 { (x + width, -width) } else { (x, width) };
    let (y, height) = if height < 0.0 { (y + height, -height) } else { (y, height) };
    Rect::from_xywh(x, y, width, height)
}

fn circle_path(center: Vec2, radius: f32) -> Option<Path> {
    if !(radius > 0.0) || !center.is_finite() {
        return None;
    }
    PathBuilder::from_circle(center.x, center.y, radius)
}

fn polygon_path(points: &[Vec2], closed: bool) -> Option<Path> {
    let (first, rest) = points.split_first()?;
    let mut builder = PathBuilder::new();
    builder.move_to(first.x, first.y);
    for point in rest {
        builder.line_to(point.x, point.y);
    }
    if closed {
        builder.close();
    }
    builder.finish()
}

/// Rows top to bottom, three bits per row, most significant bit on the left.
const DIGITS: [u16; 10] = [
    0b111_101_101_101_111,
    0b010_110_010_010_111,
    0b111_001_111_100_111,
    0b111_001_111_001_111,
    0b101_101_111_001_001,
    0b111_100_111_001_111,
    0b111_100_111_101_111,
    0b111_001_001_001_001,
    0b111_101_111_101_111,
    0b111_101_111_001_111,
];

const LETTERS: [u16; 26] = [
    0b010_101_111_101_101,
    0b110_101_110_101_110,
    0b011_100_100_100_011,
    0b110_101_101_101_110,
    0b111_100_110_100_111,
    0b111_100_110_100_100,
    0b011_100_101_101_011,
    0b101_101_111_101_101,
    0b111_010_010_010_111,
    0b001_001_001_101_010,
    0b101_101_110_101_101,
    0b100_100_100_100_111,
    0b101_111_111_101_101,
    0b110_101_101_101_101,
    0b010_101_101_101_010,
    0b110_101_110_100_100,
    0b010_101_101_110_011,
    0b110_101_110_101_101,
    0b011_100_010_001_110,
    0b111_010_010_010_010,
    0b101_101_101_101_111,
    0b101_101_101_101_010,
    0b101_101_111_111_101,
    0b101_101_010_101_101,
    0b101_101_010_010_010,
    0b111_001_010_100_111,
];

fn glyph_bits(ch: char) -> u16 {
    match ch {
        '0'..='9' => DIGITS[ch as usize - '0' as usize],
        'A'..='Z' => LETTERS[ch as usize - 'A' as usize],
        'a'..='z' => LETTERS[ch as usize - 'a' as usize],
        ' ' => 0,
        // Symbols get a stable scrambled pattern.
        _ => {
            let bits = ((ch as u32).wrapping_mul(2_654_435_761) >> 17) as u16 & 0x7fff;
            if bits == 0 {
                0b010_010_010_000_010
            } else {
                bits
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(canvas: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * canvas.size().0 + x) * 4) as usize;
        let d = canvas.data();
        [d[i], d[i + 1], d[i + 2], d[i + 3]]
    }

    #[test]
    fn hsl_primaries() {
        assert_eq!(hsl(0.0, 1.0, 0.5).to_color_u8().red(), 255);
        assert_eq!(hsl(120.0, 1.0, 0.5).to_color_u8().green(), 255);
        assert_eq!(hsl(240.0, 1.0, 0.5).to_color_u8().blue(), 255);
        let grey = hsl(42.0, 0.0, 0.5).to_color_u8();
        assert_eq!((grey.red(), grey.green(), grey.blue()), (128, 128, 128));
    }

    #[test]
    fn fade_accumulates_towards_the_fade_colour() {
        let mut canvas = Canvas::new(4, 4).unwrap();
        canvas.clear(rgb(255, 255, 255));
        for _ in 0..30 {
            canvas.fade(rgba(0, 0, 0, 0.4));
        }
        let [r, g, b, a] = pixel(&canvas, 1, 1);
        assert!(r < 5 && g < 5 && b < 5);
        assert_eq!(a, 255);
    }

    #[test]
    fn shapes_outside_the_frame_are_ignored() {
        let mut canvas = Canvas::new(8, 8).unwrap();
        canvas.fill_circle(Vec2::new(100.0, 100.0), 0.0, rgb(255, 0, 0));
        canvas.fill_rect(-50.0, -50.0, 10.0, 10.0, rgb(255, 0, 0));
        canvas.polyline(&[], true, 1.0, rgb(255, 0, 0));
        assert!(canvas.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn glyphs_light_up_their_cell() {
        let mut canvas = Canvas::new(16, 16).unwrap();
        canvas.glyph('8', Vec2::ZERO, 16.0, rgb(0, 255, 0));
        assert!(canvas.data().chunks_exact(4).any(|p| p[1] == 255));
        assert_eq!(pixel(&canvas, 15, 15), [0, 0, 0, 0]);
    }

    #[test]
    fn snapshot_is_demultiplied() {
        let mut canvas = Canvas::new(2, 2).unwrap();
        canvas.clear(rgba(200, 100, 50, 0.5));
        let image = canvas.to_rgba_image();
        let p = image.get_pixel(0, 0);
        assert!((p[0] as i32 - 200).abs() <= 2);
        assert_eq!(p[3], 128);
    }
}
