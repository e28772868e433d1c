use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::arena::{Arena, Handle};
use super::device::RenderDevice;
use super::shader::link_program;
use super::texture::{DecodedTexture, TextureImage, TextureLoader, TextureState};
use crate::error::{CompileError, TextureLoadError};

pub struct TextureSlot<T> {
    pub texture: T,
    pub state: TextureState,
    pub width: u32,
    pub height: u32,
}

pub type ProgramHandle<D> = Handle<<D as RenderDevice>::Program>;
pub type TextureHandle<D> = Handle<TextureSlot<<D as RenderDevice>::Texture>>;

/// Snapshot of what currently backs a texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub state: TextureState,
    pub width: u32,
    pub height: u32,
}

/// Owns every program and texture the GPU renderer has created.
///
/// Programs are keyed by their exact vertex and fragment source; textures by
/// identifier. Nothing is evicted. Texture handles are handed out immediately
/// with a 1x1 placeholder behind them and the slot is rewritten in one step
/// once the decode thread reports back.
pub struct ResourceCache<D: RenderDevice> {
    programs: Arena<D::Program>,
    program_index: HashMap<(String, String), ProgramHandle<D>>,
    textures: Arena<TextureSlot<D::Texture>>,
    texture_index: HashMap<String, TextureHandle<D>>,
    loader: TextureLoader,
    pending: usize,
}

impl<D: RenderDevice> ResourceCache<D> {
    pub fn new() -> Self {
        Self {
            programs: Arena::new(),
            program_index: HashMap::new(),
            textures: Arena::new(),
            texture_index: HashMap::new(),
            loader: TextureLoader::new(),
            pending: 0,
        }
    }

    /// Compiled program for this source pair, building it on first use.
    /// A failed build leaves the cache untouched.
    pub fn get_program(
        &mut self,
        device: &mut D,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle<D>, CompileError> {
        let key = (vertex_source.to_string(), fragment_source.to_string());
        if let Some(handle) = self.program_index.get(&key) {
            return Ok(*handle);
        }

        let program = Self::build(device, vertex_source, fragment_source)?;
        let handle = self.programs.insert(program);
        self.program_index.insert(key, handle);
        info!("Built program {:?} ({} cached)", handle, self.programs.len());
        Ok(handle)
    }

    /// Rebuild the program for this source pair even if it is cached. The
    /// existing handle is kept and its slot overwritten; on failure the old
    /// program stays in place.
    pub fn recompile_program(
        &mut self,
        device: &mut D,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle<D>, CompileError> {
        let key = (vertex_source.to_string(), fragment_source.to_string());
        let Some(&handle) = self.program_index.get(&key) else {
            return self.get_program(device, vertex_source, fragment_source);
        };

        let program = Self::build(device, vertex_source, fragment_source)?;
        match self.programs.replace(handle, program) {
            Ok(_) => {
                debug!("Rebuilt program {:?}", handle);
                Ok(handle)
            }
            Err(program) => {
                let handle = self.programs.insert(program);
                self.program_index.insert(key, handle);
                Ok(handle)
            }
        }
    }

    fn build(device: &mut D, vertex_source: &str, fragment_source: &str) -> Result<D::Program, CompileError> {
        let linked = link_program(vertex_source, fragment_source)?;
        device.build_program(&linked)
    }

    pub fn program(&self, handle: ProgramHandle<D>) -> Option<&D::Program> {
        self.programs.get(handle)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Handle for the texture behind `identifier`. Never blocks: the first
    /// request creates a placeholder and starts decoding in the background.
    pub fn get_texture(&mut self, device: &mut D, identifier: &str) -> TextureHandle<D> {
        if let Some(handle) = self.texture_index.get(identifier) {
            return *handle;
        }

        let placeholder = TextureImage::placeholder();
        let handle = self.textures.insert(TextureSlot {
            texture: device.create_texture(&placeholder),
            state: TextureState::Loading,
            width: placeholder.width,
            height: placeholder.height,
        });
        self.texture_index.insert(identifier.to_string(), handle);
        self.pending += 1;
        self.loader.request(identifier);
        handle
    }

    pub fn texture(&self, handle: TextureHandle<D>) -> Option<&D::Texture> {
        self.textures.get(handle).map(|slot| &slot.texture)
    }

    pub fn texture_info(&self, handle: TextureHandle<D>) -> Option<TextureInfo> {
        self.textures.get(handle).map(|slot| TextureInfo {
            state: slot.state,
            width: slot.width,
            height: slot.height,
        })
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn pending_textures(&self) -> usize {
        self.pending
    }

    /// Swap in every texture that finished decoding since the last call.
    /// Returns how many slots were replaced.
    pub fn poll_loaded(&mut self, device: &mut D) -> usize {
        let mut replaced = 0;
        while let Some(decoded) = self.loader.try_recv() {
            if self.install(device, decoded) {
                replaced += 1;
            }
        }
        replaced
    }

    /// Wait for outstanding decodes, up to `timeout`. Returns true when none
    /// are left pending.
    pub fn block_until_loaded(&mut self, device: &mut D, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.loader.recv_timeout(remaining) {
                Some(decoded) => {
                    self.install(device, decoded);
                }
                None => break,
            }
        }
        self.pending == 0
    }

    fn install(&mut self, device: &mut D, decoded: DecodedTexture) -> bool {
        let Some(&handle) = self.texture_index.get(&decoded.identifier) else {
            return false;
        };

        let decoded = fit_to_device(decoded, device.max_texture_dimension());
        let slot = TextureSlot {
            texture: device.create_texture(&decoded.image),
            state: decoded.state,
            width: decoded.image.width,
            height: decoded.image.height,
        };
        self.pending = self.pending.saturating_sub(1);
        self.textures.replace(handle, slot).is_ok()
    }
}

/// Images larger than the device can hold are unavailable like any other
/// failed load.
fn fit_to_device(decoded: DecodedTexture, max_dimension: u32) -> DecodedTexture {
    let (width, height) = (decoded.image.width, decoded.image.height);
    if width <= max_dimension && height <= max_dimension {
        return decoded;
    }

    let error = TextureLoadError::ResourceUnavailable {
        identifier: decoded.identifier.clone(),
        reason: format!("{width}x{height} exceeds the device limit of {max_dimension}"),
    };
    warn!("{}; substituting noise", error);
    DecodedTexture {
        image: TextureImage::noise(&decoded.identifier),
        state: TextureState::Fallback,
        identifier: decoded.identifier,
    }
}

impl<D: RenderDevice> Default for ResourceCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::headless::HeadlessDevice;
    use crate::graphics::shader::{DEFAULT_TEMPLATE, VERTEX_SOURCE};
    use crate::graphics::texture::NOISE_SIZE;
    use crate::error::ShaderStage;

    #[test]
    fn identical_source_reuses_program() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut cache = ResourceCache::<HeadlessDevice>::new();

        let a = cache.get_program(&mut device, VERTEX_SOURCE, DEFAULT_TEMPLATE).unwrap();
        let b = cache.get_program(&mut device, VERTEX_SOURCE, DEFAULT_TEMPLATE).unwrap();
        assert_eq!(a, b);
        assert_eq!(device.programs_built(), 1);
        assert_eq!(cache.program_count(), 1);
    }

    #[test]
    fn recompile_keeps_the_handle() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut cache = ResourceCache::<HeadlessDevice>::new();

        let a = cache.get_program(&mut device, VERTEX_SOURCE, DEFAULT_TEMPLATE).unwrap();
        let first_id = cache.program(a).unwrap().id;
        let b = cache.recompile_program(&mut device, VERTEX_SOURCE, DEFAULT_TEMPLATE).unwrap();
        assert_eq!(a, b);
        assert_ne!(cache.program(b).unwrap().id, first_id);
        assert_eq!(device.programs_built(), 2);
    }

    #[test]
    fn failed_compile_caches_nothing() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut cache = ResourceCache::<HeadlessDevice>::new();

        let err = cache
            .get_program(&mut device, VERTEX_SOURCE, "not wgsl at all")
            .unwrap_err();
        assert_eq!(err.stage, ShaderStage::Fragment);
        assert_eq!(cache.program_count(), 0);
        assert_eq!(device.programs_built(), 0);
    }

    #[test]
    fn texture_requests_are_idempotent_and_fall_back_to_noise() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut cache = ResourceCache::<HeadlessDevice>::new();

        let a = cache.get_texture(&mut device, "missing.png");
        let b = cache.get_texture(&mut device, "missing.png");
        assert_eq!(a, b);
        assert_eq!(cache.texture_count(), 1);
        assert_eq!(cache.texture_info(a).unwrap().width, 1);

        assert!(cache.block_until_loaded(&mut device, Duration::from_secs(5)));
        let info = cache.texture_info(a).unwrap();
        assert_eq!(info.state, TextureState::Fallback);
        assert_eq!((info.width, info.height), (NOISE_SIZE, NOISE_SIZE));
        assert_eq!(cache.get_texture(&mut device, "missing.png"), a);
    }

    #[test]
    fn images_over_the_device_limit_fall_back_to_noise() {
        let path = std::env::temp_dir().join(format!("particle9_wide_{}.png", std::process::id()));
        image::RgbaImage::new(300, 2).save(&path).unwrap();
        let identifier = path.to_string_lossy().into_owned();

        let mut device = HeadlessDevice::new(64, 64).with_max_texture_dimension(NOISE_SIZE);
        let mut cache = ResourceCache::<HeadlessDevice>::new();
        let handle = cache.get_texture(&mut device, &identifier);
        assert!(cache.block_until_loaded(&mut device, Duration::from_secs(5)));
        std::fs::remove_file(&path).unwrap();

        let info = cache.texture_info(handle).unwrap();
        assert_eq!(info.state, TextureState::Fallback);
        assert_eq!((info.width, info.height), (NOISE_SIZE, NOISE_SIZE));
    }

    #[test]
    fn images_within_the_limit_load() {
        let path = std::env::temp_dir().join(format!("particle9_small_{}.png", std::process::id()));
        image::RgbaImage::new(8, 4).save(&path).unwrap();
        let identifier = path.to_string_lossy().into_owned();

        let mut device = HeadlessDevice::new(64, 64).with_max_texture_dimension(NOISE_SIZE);
        let mut cache = ResourceCache::<HeadlessDevice>::new();
        let handle = cache.get_texture(&mut device, &identifier);
        assert!(cache.block_until_loaded(&mut device, Duration::from_secs(5)));
        std::fs::remove_file(&path).unwrap();

        let info = cache.texture_info(handle).unwrap();
        assert_eq!(info.state, TextureState::Loaded);
        assert_eq!((info.width, info.height), (8, 4));
    }
}
