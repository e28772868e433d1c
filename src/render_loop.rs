use anyhow::Result;
use log::{debug, info, warn};
use std::time::Instant;

use crate::audio::{audio_energy, AudioSource, CaptureStatus, FeatureExtractor, SmoothingProfile};
use crate::compositor::Compositor;
use crate::graphics::{DisplaySurfaces, GpuRenderer, ProgramGate, RenderDevice, SurfaceKind};
use crate::visualizer::{Renderer, VisualizerRegistry};

const DEBUG_EVERY_N_FRAMES: u64 = 300;

/// What one call to [`VisualizerContext::render`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No audio this frame; whatever is on screen stays.
    Skipped,
    Drawn(SurfaceKind),
    /// The active GPU mode has never built and there is no older program to fall back on.
    Idle,
}

/// Everything a frame touches, owned in one place and handed to the loop.
pub struct VisualizerContext<D: RenderDevice> {
    registry: VisualizerRegistry,
    extractor: FeatureExtractor,
    gpu: GpuRenderer<D>,
    compositor: Compositor,
    surfaces: DisplaySurfaces,
    sensitivity: f32,
    started: Instant,
    /// Mode and registry revision of the last failed GPU switch, so a broken
    /// program is not rebuilt every frame.
    rejected: Option<(String, u64)>,
    frames: u64,
}

impl<D: RenderDevice> VisualizerContext<D> {
    pub fn new(device: D, registry: VisualizerRegistry) -> Result<Self> {
        let (width, height) = device.surface_size();
        Ok(Self {
            registry,
            extractor: FeatureExtractor::new(),
            gpu: GpuRenderer::new(device),
            compositor: Compositor::new(width.max(1), height.max(1))?,
            surfaces: DisplaySurfaces::new(width, height),
            sensitivity: 1.0,
            started: Instant::now(),
            rejected: None,
            frames: 0,
        })
    }

    /// Swap in a compositor built elsewhere, e.g. a seeded one.
    pub fn with_compositor(mut self, compositor: Compositor) -> Self {
        self.compositor = compositor;
        self
    }

    pub fn registry(&self) -> &VisualizerRegistry {
        &self.registry
    }

    /// Run a registry edit with the live GPU renderer as the acceptance gate.
    pub fn edit<T>(&mut self, edit: impl FnOnce(&mut VisualizerRegistry, &mut dyn ProgramGate) -> T) -> T {
        edit(&mut self.registry, &mut self.gpu)
    }

    pub fn activate(&mut self, id: &str) -> crate::error::Result<()> {
        self.registry.activate(id)
    }

    pub fn gpu(&self) -> &GpuRenderer<D> {
        &self.gpu
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn surfaces(&self) -> &DisplaySurfaces {
        &self.surfaces
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = if sensitivity.is_finite() { sensitivity.max(0.0) } else { 1.0 };
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.surfaces.resize(width, height) {
            self.gpu.resize(width, height);
            self.compositor.resize(width, height)?;
            debug!("Surfaces resized to {}x{}", width, height);
        }
        Ok(())
    }

    /// Render one frame from a raw magnitude array.
    pub fn render(&mut self, raw: &[f32]) -> Result<FrameOutcome> {
        if raw.is_empty() {
            return Ok(FrameOutcome::Skipped);
        }

        let dispatch = self.registry.dispatch();
        let mode = self.registry.active_mode().to_string();
        let Some(renderer) = dispatch.get(&mode) else {
            warn!("Active mode '{}' has no renderer", mode);
            return Ok(FrameOutcome::Idle);
        };

        self.frames += 1;
        if self.frames % DEBUG_EVERY_N_FRAMES == 0 {
            debug!("Frame {} in mode '{}'", self.frames, mode);
        }

        match renderer {
            Renderer::Gpu { source, textures } => {
                self.surfaces.show(SurfaceKind::Gpu);
                self.extractor.update(raw, self.sensitivity, &SmoothingProfile::STANDARD);
                self.switch_gpu(&mode, source);
                if !self.gpu.is_ready() {
                    return Ok(FrameOutcome::Idle);
                }

                let energy = audio_energy(raw, self.sensitivity);
                self.gpu.render_frame(energy, self.surfaces.size(), textures.slots())?;
                Ok(FrameOutcome::Drawn(SurfaceKind::Gpu))
            }
            Renderer::Cpu(program) => {
                self.surfaces.show(SurfaceKind::Raster);
                let profile = self.compositor.profile(program);
                let features = self.extractor.update(raw, self.sensitivity, &profile);
                let time = self.started.elapsed().as_secs_f32();
                // A failed script leaves the canvas as it was; it is presented unchanged.
                let _ = self.compositor.render(program, features, time);

                let canvas = self.compositor.canvas();
                let (width, height) = canvas.size();
                self.gpu.device_mut().present_raster(canvas.data(), width, height)?;
                Ok(FrameOutcome::Drawn(SurfaceKind::Raster))
            }
        }
    }

    /// Blank both surfaces and forget smoothing history. Cached programs,
    /// textures and particle pools are kept for the next start.
    pub fn stop(&mut self) -> Result<()> {
        self.surfaces.hide_all();
        self.compositor.clear();
        self.extractor.reset();
        self.gpu.clear()
    }

    fn switch_gpu(&mut self, mode: &str, source: &str) {
        let revision = self.registry.revision();
        if let Some((rejected, at)) = &self.rejected {
            if rejected == mode && *at == revision {
                return;
            }
        }
        match self.gpu.switch_to(mode, source) {
            Ok(()) => self.rejected = None,
            Err(_) => self.rejected = Some((mode.to_string(), revision)),
        }
    }
}

/// Pulls audio frames from a source and feeds them through the context.
pub struct RenderLoop<S: AudioSource, D: RenderDevice> {
    source: S,
    context: VisualizerContext<D>,
    status: CaptureStatus,
}

impl<S: AudioSource, D: RenderDevice> RenderLoop<S, D> {
    pub fn new(source: S, context: VisualizerContext<D>) -> Self {
        Self {
            source,
            context,
            status: CaptureStatus::Disconnected,
        }
    }

    pub fn context(&self) -> &VisualizerContext<D> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut VisualizerContext<D> {
        &mut self.context
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn status(&self) -> &CaptureStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, CaptureStatus::Visualizing { .. })
    }

    /// Start the source. Failure is reported through the status, not returned.
    pub async fn start(&mut self, input: &str, output: Option<&str>) -> &CaptureStatus {
        self.status = match self.source.start_capture(input, output).await {
            Ok(()) => {
                info!("Capture started from {} ({})", input, self.source.source_type());
                CaptureStatus::Visualizing {
                    source: input.to_string(),
                }
            }
            Err(e) => {
                warn!("Capture failed to start: {:#}", e);
                CaptureStatus::Failed(e.to_string())
            }
        };
        &self.status
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.source.stop_capture().await;
        self.status = CaptureStatus::Disconnected;
        info!("Capture stopped");
        self.context.stop()
    }

    pub async fn set_volume(&mut self, volume: f32) {
        if let Err(e) = self.source.set_volume(volume).await {
            warn!("Failed to set volume: {}", e);
        }
    }

    /// One frame: fetch audio, then render it. Does nothing once stopped.
    pub async fn step(&mut self) -> Result<FrameOutcome> {
        if !self.is_running() {
            return Ok(FrameOutcome::Skipped);
        }

        let frame = match self.source.next_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Audio frame request failed: {}", e);
                self.status = CaptureStatus::Failed(e.to_string());
                return Ok(FrameOutcome::Skipped);
            }
        };

        // Capture may have been stopped while the request was in flight.
        if !self.is_running() {
            return Ok(FrameOutcome::Skipped);
        }
        self.context.render(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SignalSource;
    use crate::graphics::HeadlessDevice;

    fn context() -> VisualizerContext<HeadlessDevice> {
        VisualizerContext::new(HeadlessDevice::new(160, 120), VisualizerRegistry::new())
            .unwrap()
            .with_compositor(Compositor::with_seed(160, 120, 3).unwrap())
    }

    #[test]
    fn empty_frames_are_skipped() {
        let mut ctx = context();
        assert_eq!(ctx.render(&[]).unwrap(), FrameOutcome::Skipped);
        assert_eq!(ctx.gpu().device().raster_frames(), 0);
        assert_eq!(ctx.surfaces().visible(), None);
    }

    #[test]
    fn modes_pick_their_surface() {
        let mut ctx = context();
        let frame = vec![0.05; 512];
        assert_eq!(ctx.render(&frame).unwrap(), FrameOutcome::Drawn(SurfaceKind::Raster));
        assert_eq!(ctx.gpu().device().raster_frames(), 1);

        ctx.activate("acid").unwrap();
        assert_eq!(ctx.render(&frame).unwrap(), FrameOutcome::Drawn(SurfaceKind::Gpu));
        assert_eq!(ctx.surfaces().visible(), Some(SurfaceKind::Gpu));
        assert_eq!(ctx.gpu().active_mode(), Some("acid"));
        assert_eq!(ctx.gpu().device().draws().len(), 1);
    }

    #[test]
    fn resize_reaches_every_surface() {
        let mut ctx = context();
        ctx.resize(320, 200).unwrap();
        assert_eq!(ctx.surfaces().size(), (320, 200));
        assert_eq!(ctx.compositor().canvas().size(), (320, 200));
        assert_eq!(ctx.gpu().device().surface_size(), (320, 200));
    }

    #[test]
    fn stopped_loop_renders_nothing() {
        let mut render_loop = RenderLoop::new(SignalSource::new(44_100.0, 60.0), context());
        pollster::block_on(async {
            render_loop.start("signal", None).await;
            assert!(render_loop.is_running());
            for _ in 0..3 {
                render_loop.step().await.unwrap();
            }
            render_loop.stop().await.unwrap();
            assert_eq!(render_loop.step().await.unwrap(), FrameOutcome::Skipped);
        });
        assert_eq!(render_loop.context().surfaces().visible(), None);
        assert!(render_loop.context().gpu().device().clears() >= 1);
    }
}
