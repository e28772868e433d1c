use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};

use super::fft::SpectrumAnalyzer;
use super::source::{clamp_volume, AudioSource};

/// A WAV file decoded up front and replayed one display frame at a time.
pub struct WavFileSource {
    path: PathBuf,
    samples: Vec<f32>,
    sample_rate: u32,
    frame_rate: f32,
    position: usize,
    volume: f32,
    looping: bool,
    running: bool,
    primed: bool,
    analyzer: SpectrumAnalyzer,
}

impl WavFileSource {
    pub fn open<P: AsRef<Path>>(path: P, frame_rate: f32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = hound::WavReader::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let spec = reader.spec();
        let samples = decode_mono(reader)?;

        info!(
            "Loaded {} ({} Hz, {} channel(s), {:.1}s)",
            path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len() as f32 / spec.sample_rate as f32
        );

        Ok(Self {
            path,
            samples,
            sample_rate: spec.sample_rate,
            frame_rate,
            position: 0,
            volume: 1.0,
            looping: false,
            running: false,
            primed: false,
            analyzer: SpectrumAnalyzer::new(),
        })
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }

    pub fn is_finished(&self) -> bool {
        !self.looping && self.position >= self.samples.len()
    }

    fn samples_per_frame(&self) -> usize {
        (self.sample_rate as f32 / self.frame_rate.max(1.0)).round().max(1.0) as usize
    }
}

fn decode_mono<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    if interleaved.is_empty() {
        return Err(anyhow!("WAV file contains no samples"));
    }

    Ok(interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect())
}

#[async_trait(?Send)]
impl AudioSource for WavFileSource {
    async fn next_frame(&mut self) -> Result<Vec<f32>> {
        if !self.running {
            return Ok(Vec::new());
        }
        if self.position >= self.samples.len() {
            if !self.looping {
                return Ok(Vec::new());
            }
            self.position = 0;
        }

        let end = (self.position + self.samples_per_frame()).min(self.samples.len());
        let volume = self.volume;
        let chunk: Vec<f32> = self.samples[self.position..end]
            .iter()
            .map(|s| s * volume)
            .collect();
        self.position = end;

        self.primed |= self.analyzer.push_samples(&chunk);
        if self.primed {
            Ok(self.analyzer.magnitudes().to_vec())
        } else {
            Ok(Vec::new())
        }
    }

    async fn start_capture(&mut self, _input: &str, _output: Option<&str>) -> Result<()> {
        info!("Replaying {}", self.path.display());
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
        "wav"
    }
}
