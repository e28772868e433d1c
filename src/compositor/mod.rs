pub mod canvas;
pub mod industrial;
pub mod matrix;
pub mod neural;
pub mod pool;
pub mod retro;
pub mod script;
pub mod spectrum;
pub mod vortex;

use anyhow::Result;
use log::warn;
use std::sync::Arc;

pub use canvas::{hsl, hsla, rgb, rgba, Canvas};
pub use pool::ParticlePool;
pub use script::{DrawCommand, Script, ScriptInputs, ScriptRuntime};

use crate::audio::{FrameAudioFeatures, SmoothingProfile};
use crate::error::ScriptError;
use industrial::IndustrialMachine;
use matrix::DigitalRain;
use neural::NeuralCore;
use retro::RetroGrid;
use spectrum::SpectrumBars;
use vortex::VortexTunnel;

/// Prefix of a CPU source that selects a native effect instead of a script.
pub const NATIVE_PREFIX: &str = "use ";

/// What an effect sees each frame.
pub struct EffectFrame<'a> {
    pub features: &'a FrameAudioFeatures,
    /// Seconds since the compositor started.
    pub time: f32,
}

impl<'a> EffectFrame<'a> {
    pub fn new(features: &'a FrameAudioFeatures, time: f32) -> Self {
        Self { features, time }
    }
}

/// A native composited effect.
pub trait Effect {
    /// Smoothing constants the effect wants its features computed with.
    fn profile(&self) -> SmoothingProfile;

    fn render(&mut self, frame: &EffectFrame, canvas: &mut Canvas);
}

/// The closed set of native effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Neural,
    Industrial,
    Retro,
    Spectrum,
    Matrix,
    Vortex,
}

impl EffectKind {
    pub const ALL: [EffectKind; 6] = [
        EffectKind::Neural,
        EffectKind::Industrial,
        EffectKind::Retro,
        EffectKind::Spectrum,
        EffectKind::Matrix,
        EffectKind::Vortex,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Neural => "neural",
            EffectKind::Industrial => "industrial",
            EffectKind::Retro => "retro",
            EffectKind::Spectrum => "spectrum",
            EffectKind::Matrix => "matrix",
            EffectKind::Vortex => "vortex",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Source text selecting this effect.
    pub fn source(&self) -> String {
        format!("{NATIVE_PREFIX}{}", self.name())
    }
}

/// A constructed CPU effect, ready to render. Only sources that parse make
/// it this far.
#[derive(Debug, Clone)]
pub enum CpuProgram {
    Native(EffectKind),
    Script(Arc<Script>),
}

impl CpuProgram {
    /// Build the program for a CPU definition's source: `use <effect>` for a
    /// native effect, anything else is compiled as a script.
    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        let trimmed = source.trim();
        if let Some(name) = trimmed.strip_prefix(NATIVE_PREFIX) {
            let name = name.trim().trim_end_matches(';').trim();
            return EffectKind::from_name(name)
                .map(CpuProgram::Native)
                .ok_or_else(|| ScriptError::UnknownEffect(name.to_string()));
        }
        Script::compile(source).map(|script| CpuProgram::Script(Arc::new(script)))
    }
}

struct NativeEffects {
    neural: NeuralCore,
    industrial: IndustrialMachine,
    retro: RetroGrid,
    spectrum: SpectrumBars,
    matrix: DigitalRain,
    vortex: VortexTunnel,
}

impl NativeEffects {
    fn new(seed: u64) -> Self {
        Self {
            neural: NeuralCore::new(seed),
            industrial: IndustrialMachine::new(seed.wrapping_add(1)),
            retro: RetroGrid::new(),
            spectrum: SpectrumBars,
            matrix: DigitalRain::new(seed.wrapping_add(2)),
            vortex: VortexTunnel::new(),
        }
    }

    fn get(&mut self, kind: EffectKind) -> &mut dyn Effect {
        match kind {
            EffectKind::Neural => &mut self.neural,
            EffectKind::Industrial => &mut self.industrial,
            EffectKind::Retro => &mut self.retro,
            EffectKind::Spectrum => &mut self.spectrum,
            EffectKind::Matrix => &mut self.matrix,
            EffectKind::Vortex => &mut self.vortex,
        }
    }
}

/// CPU rendering backend: the raster canvas plus every effect's persistent
/// state. Pools live as long as the compositor.
pub struct Compositor {
    canvas: Canvas,
    effects: NativeEffects,
    scripts: ScriptRuntime,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_seed(width, height, fastrand::u64(..))
    }

    /// Deterministic compositor for tests and benchmarks.
    pub fn with_seed(width: u32, height: u32, seed: u64) -> Result<Self> {
        Ok(Self {
            canvas: Canvas::new(width, height)?,
            effects: NativeEffects::new(seed),
            scripts: ScriptRuntime::new(seed.wrapping_add(3)),
        })
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        self.canvas.resize(width, height)
    }

    pub fn clear(&mut self) {
        self.canvas.clear(tiny_skia::Color::TRANSPARENT);
    }

    /// Smoothing the program's features should be computed with.
    pub fn profile(&mut self, program: &CpuProgram) -> SmoothingProfile {
        match program {
            CpuProgram::Native(kind) => self.effects.get(*kind).profile(),
            CpuProgram::Script(_) => SmoothingProfile::STANDARD,
        }
    }

    /// Draw one frame of `program` onto the canvas. A script that fails at
    /// runtime leaves the canvas exactly as it was.
    pub fn render(
        &mut self,
        program: &CpuProgram,
        features: &FrameAudioFeatures,
        time: f32,
    ) -> Result<(), ScriptError> {
        match program {
            CpuProgram::Native(kind) => {
                self.effects
                    .get(*kind)
                    .render(&EffectFrame::new(features, time), &mut self.canvas);
                Ok(())
            }
            CpuProgram::Script(script) => {
                let inputs = ScriptInputs {
                    bins: features.bins(),
                    bands: features.bands(),
                    time,
                    width: self.canvas.width(),
                    height: self.canvas.height(),
                };
                match self.scripts.run(script, &inputs) {
                    Ok(commands) => {
                        for command in commands {
                            command.apply(&mut self.canvas);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        warn!("Effect script failed: {}", e);
                        Err(e)
                    }
                }
            }
        }
    }
}
