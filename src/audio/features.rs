/// Number of smoothed bins kept across frames. Matches the width of the
/// magnitude array produced by the spectrum analyzer.
pub const MAX_BINS: usize = 512;

/// Bins folded into the scalar energy handed to shader uniforms.
pub const ENERGY_BINS: usize = 64;

/// Upper bound of the scalar energy. Shader uniforms never see more.
pub const MAX_ENERGY: f32 = 5.0;

pub fn lerp(start: f32, end: f32, amount: f32) -> f32 {
    (1.0 - amount) * start + amount * end
}

/// Aggregated magnitude over the three contiguous bin ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandEnergies {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

impl BandEnergies {
    pub fn total(&self) -> f32 {
        self.bass + self.mid + self.treble
    }

    pub fn mean(&self) -> f32 {
        self.total() / 3.0
    }
}

/// Where the bass/mid/treble ranges split and how each band mean is scaled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandLayout {
    /// First bin past the bass range.
    pub bass_end: usize,
    /// First bin past the mid range. Treble runs from here to the last bin.
    pub mid_end: usize,
    pub gains: [f32; 3],
}

/// Per-effect smoothing constants.
///
/// Percussive effects use a fast blend so peaks land on the beat; ambient ones
/// blend slowly so the picture breathes rather than flickers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingProfile {
    /// Weight of the new sample in the exponential moving average.
    pub blend: f32,
    /// How many bins the effect looks at.
    pub bin_count: usize,
    pub bands: BandLayout,
}

impl SmoothingProfile {
    /// Shared default: blend 0.4 over 256 bins, split at 10 and 100.
    pub const STANDARD: SmoothingProfile = SmoothingProfile {
        blend: 0.4,
        bin_count: 256,
        bands: BandLayout {
            bass_end: 10,
            mid_end: 100,
            gains: [5000.0, 8000.0, 12000.0],
        },
    };

    pub const fn with_blend(self, blend: f32) -> Self {
        Self { blend, ..self }
    }

    pub const fn with_bin_count(self, bin_count: usize) -> Self {
        Self { bin_count, ..self }
    }

    pub const fn with_gains(self, gains: [f32; 3]) -> Self {
        Self {
            bands: BandLayout {
                gains,
                ..self.bands
            },
            ..self
        }
    }
}

impl Default for SmoothingProfile {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Features derived for one frame. The smoothed array persists across frames.
#[derive(Debug, Clone)]
pub struct FrameAudioFeatures {
    smoothed: Vec<f32>,
    active_bins: usize,
    bands: BandEnergies,
}

impl FrameAudioFeatures {
    fn new() -> Self {
        Self {
            smoothed: vec![0.0; MAX_BINS],
            active_bins: 0,
            bands: BandEnergies::default(),
        }
    }

    /// Smoothed bins touched by the most recent update.
    pub fn bins(&self) -> &[f32] {
        &self.smoothed[..self.active_bins]
    }

    /// Smoothed value for bin `index`, zero outside the active range.
    pub fn bin(&self, index: usize) -> f32 {
        self.bins().get(index).copied().unwrap_or(0.0)
    }

    pub fn bands(&self) -> BandEnergies {
        self.bands
    }
}

/// Exponential smoothing of the raw magnitude array plus band aggregation.
pub struct FeatureExtractor {
    features: FrameAudioFeatures,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            features: FrameAudioFeatures::new(),
        }
    }

    /// Blend `raw` into the persisted smoothing state and recompute the bands.
    ///
    /// An empty `raw` leaves everything untouched and returns the previous
    /// features. Inputs longer than the profile's bin count are truncated,
    /// shorter ones only update the bins they cover.
    pub fn update(
        &mut self,
        raw: &[f32],
        sensitivity: f32,
        profile: &SmoothingProfile,
    ) -> &FrameAudioFeatures {
        if raw.is_empty() {
            return &self.features;
        }

        let bin_count = profile.bin_count.min(MAX_BINS);
        let available = raw.len().min(bin_count);
        let blend = profile.blend.clamp(0.0, 1.0);

        for (smoothed, &value) in self.features.smoothed[..available].iter_mut().zip(raw) {
            let target = if value.is_finite() { value * sensitivity } else { 0.0 };
            let next = lerp(*smoothed, target, blend);
            *smoothed = if next.is_finite() { next } else { 0.0 };
        }

        self.features.active_bins = available;
        self.features.bands = aggregate_bands(&self.features.smoothed[..available], &profile.bands);
        &self.features
    }

    pub fn features(&self) -> &FrameAudioFeatures {
        &self.features
    }

    /// Forget all smoothing history, e.g. when capture restarts.
    pub fn reset(&mut self) {
        self.features = FrameAudioFeatures::new();
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn aggregate_bands(bins: &[f32], layout: &BandLayout) -> BandEnergies {
    let len = bins.len();
    let bass_end = layout.bass_end.min(len);
    let mid_end = layout.mid_end.max(layout.bass_end).min(len);

    BandEnergies {
        bass: mean(&bins[..bass_end]) * layout.gains[0],
        mid: mean(&bins[bass_end..mid_end]) * layout.gains[1],
        treble: mean(&bins[mid_end..]) * layout.gains[2],
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Scalar loudness for shader uniforms, always within `[0, MAX_ENERGY]`.
///
/// Averages the absolute value of the first [`ENERGY_BINS`] raw bins and
/// scales by `sensitivity * 100`.
pub fn audio_energy(raw: &[f32], sensitivity: f32) -> f32 {
    let bins = raw.len().min(ENERGY_BINS);
    if bins == 0 {
        return 0.0;
    }

    let sum: f32 = raw[..bins]
        .iter()
        .map(|v| if v.is_nan() { 0.0 } else { v.abs() })
        .sum();
    let energy = (sum / bins as f32) * sensitivity * 100.0;

    if energy.is_nan() {
        0.0
    } else {
        energy.clamp(0.0, MAX_ENERGY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(blend: f32) -> SmoothingProfile {
        SmoothingProfile::STANDARD.with_blend(blend)
    }

    #[test]
    fn energy_stays_bounded() {
        assert_eq!(audio_energy(&[], 1.0), 0.0);
        assert_eq!(audio_energy(&[0.0; 512], 1.0), 0.0);
        assert_eq!(audio_energy(&[f32::MAX; 512], 1.0), MAX_ENERGY);
        assert_eq!(audio_energy(&[f32::INFINITY; 8], 1.0), MAX_ENERGY);
        assert_eq!(audio_energy(&[-3.0e30; 8], 10.0), MAX_ENERGY);
        assert_eq!(audio_energy(&[f32::NAN; 8], 1.0), 0.0);
        assert_eq!(audio_energy(&[0.5; 8], f32::NAN), 0.0);
        assert_eq!(audio_energy(&[0.5; 8], -1.0), 0.0);
    }

    #[test]
    fn energy_only_reads_first_bins() {
        let mut raw = vec![0.0; 128];
        raw[100] = 1000.0;
        assert_eq!(audio_energy(&raw, 1.0), 0.0);

        let quiet = vec![0.001; 64];
        assert!((audio_energy(&quiet, 1.0) - 0.1).abs() < 1e-5);
    }

    #[test]
    fn empty_input_returns_previous_features() {
        let mut extractor = FeatureExtractor::new();
        extractor.update(&[1.0; 32], 1.0, &profile(0.5));
        let before = extractor.features().bins().to_vec();

        let after = extractor.update(&[], 1.0, &profile(0.5)).bins().to_vec();
        assert_eq!(before, after);
    }

    #[test]
    fn smoothing_is_an_exponential_moving_average() {
        let mut extractor = FeatureExtractor::new();
        extractor.update(&[1.0], 1.0, &profile(0.5));
        assert!((extractor.features().bin(0) - 0.5).abs() < 1e-6);

        extractor.update(&[1.0], 1.0, &profile(0.5));
        assert!((extractor.features().bin(0) - 0.75).abs() < 1e-6);

        extractor.update(&[1.0], 2.0, &profile(1.0));
        assert!((extractor.features().bin(0) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn input_is_clamped_to_profile_bin_count() {
        let mut extractor = FeatureExtractor::new();
        let narrow = SmoothingProfile::STANDARD.with_bin_count(16).with_blend(1.0);
        let features = extractor.update(&[1.0; 600], 1.0, &narrow);
        assert_eq!(features.bins().len(), 16);
        assert_eq!(features.bin(16), 0.0);

        let features = extractor.update(&[1.0; 4], 1.0, &narrow);
        assert_eq!(features.bins().len(), 4);
    }

    #[test]
    fn bands_are_scaled_means_of_their_ranges() {
        let mut extractor = FeatureExtractor::new();
        let layout = SmoothingProfile {
            blend: 1.0,
            bin_count: 6,
            bands: BandLayout {
                bass_end: 2,
                mid_end: 4,
                gains: [1.0, 10.0, 100.0],
            },
        };
        let bands = extractor
            .update(&[1.0, 3.0, 0.5, 0.5, 0.25, 0.75], 1.0, &layout)
            .bands();
        assert!((bands.bass - 2.0).abs() < 1e-6);
        assert!((bands.mid - 5.0).abs() < 1e-6);
        assert!((bands.treble - 50.0).abs() < 1e-6);
    }

    #[test]
    fn short_input_leaves_empty_bands_at_zero() {
        let mut extractor = FeatureExtractor::new();
        let bands = extractor.update(&[1.0; 5], 1.0, &profile(1.0)).bands();
        assert!(bands.bass > 0.0);
        assert_eq!(bands.mid, 0.0);
        assert_eq!(bands.treble, 0.0);
    }

    #[test]
    fn non_finite_samples_do_not_poison_state() {
        let mut extractor = FeatureExtractor::new();
        extractor.update(&[f32::NAN, f32::INFINITY, 1.0], 1.0, &profile(0.5));
        let bins = extractor.features().bins();
        assert!(bins.iter().all(|v| v.is_finite()));
    }
}
