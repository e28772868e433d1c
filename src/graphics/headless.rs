use anyhow::{anyhow, Result};

use super::device::{FrameUniforms, RenderDevice, CHANNEL_COUNT};
use super::shader::LinkedProgram;
use super::texture::TextureImage;
use crate::error::CompileError;

#[derive(Debug)]
pub struct HeadlessProgram {
    pub id: u64,
    pub fragment_source: String,
}

#[derive(Debug)]
pub struct HeadlessTexture {
    pub id: u64,
    pub image: TextureImage,
}

/// Same limit wgpu's default device limits give.
pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

/// One recorded `draw_program` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: u64,
    pub uniforms: FrameUniforms,
    pub channels: [Option<u64>; CHANNEL_COUNT],
}

/// A device with no GPU behind it. Programs and textures get sequential ids
/// and every draw is recorded, which is enough to drive the engine from tests
/// and from the `headless` command.
pub struct HeadlessDevice {
    width: u32,
    height: u32,
    next_id: u64,
    programs_built: usize,
    textures_created: usize,
    draws: Vec<DrawRecord>,
    raster_frames: usize,
    last_raster: Option<Vec<u8>>,
    clears: usize,
    max_texture_dimension: u32,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            next_id: 1,
            programs_built: 0,
            textures_created: 0,
            draws: Vec::new(),
            raster_frames: 0,
            last_raster: None,
            clears: 0,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
        }
    }

    /// Lower the texture size limit, to mimic a small device.
    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension = max.max(1);
        self
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn programs_built(&self) -> usize {
        self.programs_built
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn last_draw(&self) -> Option<&DrawRecord> {
        self.draws.last()
    }

    pub fn raster_frames(&self) -> usize {
        self.raster_frames
    }

    pub fn last_raster(&self) -> Option<&[u8]> {
        self.last_raster.as_deref()
    }

    pub fn clears(&self) -> usize {
        self.clears
    }
}

impl RenderDevice for HeadlessDevice {
    type Program = HeadlessProgram;
    type Texture = HeadlessTexture;

    fn build_program(&mut self, program: &LinkedProgram) -> Result<HeadlessProgram, CompileError> {
        self.programs_built += 1;
        Ok(HeadlessProgram {
            id: self.allocate_id(),
            fragment_source: program.fragment.source.clone(),
        })
    }

    fn create_texture(&mut self, image: &TextureImage) -> HeadlessTexture {
        debug_assert!(
            image.width <= self.max_texture_dimension && image.height <= self.max_texture_dimension,
            "{}x{} texture exceeds the device limit",
            image.width,
            image.height
        );
        self.textures_created += 1;
        HeadlessTexture {
            id: self.allocate_id(),
            image: image.clone(),
        }
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn draw_program(
        &mut self,
        program: &HeadlessProgram,
        uniforms: &FrameUniforms,
        channels: &[Option<&HeadlessTexture>; CHANNEL_COUNT],
    ) -> Result<()> {
        self.draws.push(DrawRecord {
            program: program.id,
            uniforms: *uniforms,
            channels: channels.map(|channel| channel.map(|texture| texture.id)),
        });
        Ok(())
    }

    fn present_raster(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(anyhow!(
                "raster frame is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            ));
        }

        self.raster_frames += 1;
        match &mut self.last_raster {
            Some(buffer) => {
                buffer.clear();
                buffer.extend_from_slice(pixels);
            }
            None => self.last_raster = Some(pixels.to_vec()),
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.clears += 1;
        self.last_raster = None;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
