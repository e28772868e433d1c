use anyhow::Result;
use log::{debug, info, warn};
use std::time::Instant;

use super::device::{FrameUniforms, RenderDevice, CHANNEL_COUNT};
use super::resources::{ProgramHandle, ResourceCache};
use super::shader::{link_program, VERTEX_SOURCE};
use crate::audio::MAX_ENERGY;
use crate::error::CompileError;

/// Acceptance check a shader edit must pass before the registry stores it.
pub trait ProgramGate {
    /// Build `fragment_source` into a throwaway program and report whether it
    /// would work. Nothing is kept either way.
    fn compile_candidate(&mut self, fragment_source: &str) -> Result<(), CompileError>;

    /// Forget that `mode_id` is current so its next activation rebuilds.
    fn invalidate(&mut self, mode_id: &str);
}

/// Gate for contexts with no device: compile and link only.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceValidator;

impl ProgramGate for SourceValidator {
    fn compile_candidate(&mut self, fragment_source: &str) -> Result<(), CompileError> {
        link_program(VERTEX_SOURCE, fragment_source).map(|_| ())
    }

    fn invalidate(&mut self, _mode_id: &str) {}
}

struct ActiveProgram<D: RenderDevice> {
    /// `None` once invalidated; the program keeps rendering until the next switch.
    mode: Option<String>,
    handle: ProgramHandle<D>,
}

/// Full-screen fragment-program renderer.
///
/// Starts uninitialized; [`GpuRenderer::switch_to`] moves it to ready with a
/// bound program. A failed switch leaves the previous program bound.
pub struct GpuRenderer<D: RenderDevice> {
    device: D,
    cache: ResourceCache<D>,
    active: Option<ActiveProgram<D>>,
    started: Instant,
}

impl<D: RenderDevice> GpuRenderer<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            cache: ResourceCache::new(),
            active: None,
            started: Instant::now(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn cache(&self) -> &ResourceCache<D> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> (&mut ResourceCache<D>, &mut D) {
        (&mut self.cache, &mut self.device)
    }

    pub fn is_ready(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_mode(&self) -> Option<&str> {
        self.active.as_ref().and_then(|active| active.mode.as_deref())
    }

    pub fn active_program(&self) -> Option<ProgramHandle<D>> {
        self.active.as_ref().map(|active| active.handle)
    }

    /// Make `mode_id` the bound program. Switching to the mode that is
    /// already bound does nothing; switching to any other mode rebuilds its
    /// program even when the source matches a cached one.
    pub fn switch_to(&mut self, mode_id: &str, fragment_source: &str) -> Result<(), CompileError> {
        if self.active_mode() == Some(mode_id) {
            return Ok(());
        }

        match self
            .cache
            .recompile_program(&mut self.device, VERTEX_SOURCE, fragment_source)
        {
            Ok(handle) => {
                info!("Activated GPU mode '{}'", mode_id);
                self.active = Some(ActiveProgram {
                    mode: Some(mode_id.to_string()),
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                warn!("GPU mode '{}' failed to build: {}", mode_id, e);
                Err(e)
            }
        }
    }

    /// Draw one frame with the bound program. Does nothing before the first
    /// successful `switch_to`.
    pub fn render_frame(
        &mut self,
        energy: f32,
        resolution: (u32, u32),
        textures: &[Option<String>; CHANNEL_COUNT],
    ) -> Result<()> {
        let replaced = self.cache.poll_loaded(&mut self.device);
        if replaced > 0 {
            debug!("{} texture(s) finished loading", replaced);
        }

        let Some(active) = &self.active else {
            return Ok(());
        };

        let mut handles = [None; CHANNEL_COUNT];
        for (slot, identifier) in handles.iter_mut().zip(textures) {
            if let Some(identifier) = identifier.as_deref().filter(|id| !id.is_empty()) {
                *slot = Some(self.cache.get_texture(&mut self.device, identifier));
            }
        }

        let Some(program) = self.cache.program(active.handle) else {
            return Ok(());
        };
        let channels = handles.map(|handle| handle.and_then(|h| self.cache.texture(h)));

        let uniforms = FrameUniforms {
            resolution: [resolution.0 as f32, resolution.1 as f32],
            time: self.started.elapsed().as_secs_f32(),
            audio_energy: if energy.is_nan() { 0.0 } else { energy.clamp(0.0, MAX_ENERGY) },
        };

        self.device.draw_program(program, &uniforms, &channels)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.device.resize(width, height);
    }

    /// Blank the output. Cached programs and textures survive.
    pub fn clear(&mut self) -> Result<()> {
        self.device.clear()
    }
}

impl<D: RenderDevice> ProgramGate for GpuRenderer<D> {
    fn compile_candidate(&mut self, fragment_source: &str) -> Result<(), CompileError> {
        let linked = link_program(VERTEX_SOURCE, fragment_source)?;
        let program = self.device.build_program(&linked)?;
        drop(program);
        Ok(())
    }

    fn invalidate(&mut self, mode_id: &str) {
        if let Some(active) = &mut self.active {
            if active.mode.as_deref() == Some(mode_id) {
                active.mode = None;
            }
        }
    }
}
