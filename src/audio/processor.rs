use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::fft::{SpectrumAnalyzer, FFT_SIZE};
use super::source::{clamp_volume, AudioSource};

/// Live capture from a cpal input device.
///
/// The input callback downmixes to mono, runs the spectrum analyzer and copies
/// the magnitudes into a shared buffer. When an output device is given the mono
/// samples are also forwarded to it, scaled by the current volume.
pub struct CaptureSource {
    input_stream: Option<Stream>,
    output_stream: Option<Stream>,
    spectrum: Arc<Mutex<Vec<f32>>>,
    has_data: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
}

impl CaptureSource {
    pub fn new() -> Self {
        Self {
            input_stream: None,
            output_stream: None,
            spectrum: Arc::new(Mutex::new(vec![0.0; FFT_SIZE / 2])),
            has_data: Arc::new(AtomicBool::new(false)),
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    pub fn input_devices() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                warn!("Failed to enumerate input devices: {}", e);
                Vec::new()
            }
        }
    }

    pub fn output_devices() -> Vec<String> {
        let host = cpal::default_host();
        match host.output_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                warn!("Failed to enumerate output devices: {}", e);
                Vec::new()
            }
        }
    }

    fn is_capturing(&self) -> bool {
        self.input_stream.is_some()
    }

    fn find_device(host: &cpal::Host, name: &str, input: bool) -> Result<Device> {
        let mut devices: Box<dyn Iterator<Item = Device>> = if input {
            Box::new(host.input_devices()?)
        } else {
            Box::new(host.output_devices()?)
        };
        devices
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                let kind = if input { "Input" } else { "Output" };
                anyhow!("{kind} device not found: {name}")
            })
    }

    fn start_output(&mut self, host: &cpal::Host, name: &str) -> Result<Sender<f32>> {
        let device = Self::find_device(host, name, false)?;
        let supported = device
            .default_output_config()
            .context("Failed to get default output config")?;

        info!("Passthrough to {} ({:?})", name, supported);

        let (sender, receiver) = crossbeam_channel::bounded::<f32>(supported.sample_rate().0 as usize * 2);
        let config: StreamConfig = supported.config();

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => self.build_output_stream::<f32>(&device, &config, receiver)?,
            cpal::SampleFormat::I16 => self.build_output_stream::<i16>(&device, &config, receiver)?,
            cpal::SampleFormat::U16 => self.build_output_stream::<u16>(&device, &config, receiver)?,
            other => return Err(anyhow!("Unsupported output format {other:?}")),
        };
        stream.play()?;
        self.output_stream = Some(stream);

        Ok(sender)
    }

    fn build_output_stream<T>(
        &self,
        device: &Device,
        config: &StreamConfig,
        receiver: Receiver<f32>,
    ) -> Result<Stream>
    where
        T: SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let volume = Arc::clone(&self.volume);

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let gain = f32::from_bits(volume.load(Ordering::Relaxed));
                for frame in data.chunks_mut(channels.max(1)) {
                    let value = receiver.try_recv().unwrap_or(0.0) * gain;
                    for sample in frame.iter_mut() {
                        *sample = T::from_sample(value);
                    }
                }
            },
            |err| warn!("Audio output stream error: {}", err),
            None,
        )?;

        Ok(stream)
    }

    fn build_input_stream<T>(
        &self,
        device: &Device,
        config: &StreamConfig,
        passthrough: Option<Sender<f32>>,
    ) -> Result<Stream>
    where
        T: SizedSample,
        f32: cpal::FromSample<T>,
    {
        let channels = (config.channels as usize).max(1);
        let spectrum = Arc::clone(&self.spectrum);
        let has_data = Arc::clone(&self.has_data);
        let mut analyzer = SpectrumAnalyzer::new();
        let mut mono = Vec::with_capacity(FFT_SIZE);

        info!(
            "Creating input stream with {} channels at {} Hz",
            channels, config.sample_rate.0
        );

        let stream = device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                mono.extend(data.chunks(channels).map(|frame| {
                    frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
                }));

                if let Some(sender) = &passthrough {
                    for &sample in &mono {
                        // Dropping samples is fine when the output falls behind.
                        let _ = sender.try_send(sample);
                    }
                }

                if analyzer.push_samples(&mono) {
                    if let Ok(mut shared) = spectrum.lock() {
                        shared.copy_from_slice(analyzer.magnitudes());
                        has_data.store(true, Ordering::Release);
                    }
                }
            },
            |err| warn!("Audio input stream error: {}", err),
            None,
        )?;

        Ok(stream)
    }
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl AudioSource for CaptureSource {
    async fn next_frame(&mut self) -> Result<Vec<f32>> {
        if !self.is_capturing() || !self.has_data.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }

        let shared = self
            .spectrum
            .lock()
            .map_err(|_| anyhow!("spectrum buffer poisoned"))?;
        Ok(shared.clone())
    }

    async fn start_capture(&mut self, input: &str, output: Option<&str>) -> Result<()> {
        self.stop_capture().await;

        let host = cpal::default_host();
        let device = Self::find_device(&host, input, true)?;
        let supported = device
            .default_input_config()
            .context("Failed to get default input config")?;

        info!("Using audio device: {}", input);
        info!("Audio config: {:?}", supported);

        let passthrough = match output {
            Some(name) if name != "none" => Some(self.start_output(&host, name)?),
            _ => None,
        };

        let config: StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => self.build_input_stream::<f32>(&device, &config, passthrough)?,
            cpal::SampleFormat::I16 => self.build_input_stream::<i16>(&device, &config, passthrough)?,
            cpal::SampleFormat::U16 => self.build_input_stream::<u16>(&device, &config, passthrough)?,
            other => return Err(anyhow!("Unsupported input format {other:?}")),
        };
        stream.play()?;
        self.input_stream = Some(stream);

        Ok(())
    }

    async fn stop_capture(&mut self) {
        if self.input_stream.take().is_some() {
            info!("Audio capture stopped");
        }
        self.output_stream = None;
        self.has_data.store(false, Ordering::Release);
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        let volume = clamp_volume(volume);
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "capture"
    }
}
