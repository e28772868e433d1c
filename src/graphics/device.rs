use anyhow::Result;
use bytemuck::{Pod, Zeroable};

use super::shader::LinkedProgram;
use super::texture::TextureImage;
use crate::error::CompileError;

/// Number of texture/sampler channels a program can read.
pub const CHANNEL_COUNT: usize = 4;

/// Uniform block at `@group(0) @binding(0)`. Laid out to match the WGSL
/// `FrameUniforms` struct: a `vec2` followed by two scalars, 16 bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub audio_energy: f32,
}

/// The drawing backend behind the GPU renderer and the raster presenter.
///
/// `GraphicsEngine` implements it on top of wgpu; `HeadlessDevice` records
/// what would have been drawn so the engine can run without a window.
pub trait RenderDevice {
    type Program;
    type Texture;

    /// Turn a linked program into a device pipeline. Device-side rejections
    /// come back as a `CompileError` with the `Device` stage and leave nothing
    /// behind.
    fn build_program(&mut self, program: &LinkedProgram) -> Result<Self::Program, CompileError>;

    fn create_texture(&mut self, image: &TextureImage) -> Self::Texture;

    /// Largest width or height `create_texture` accepts.
    fn max_texture_dimension(&self) -> u32;

    /// Full-screen draw of `program`. Channels without a texture are bound to
    /// a blank texture, never to whatever the previous draw used.
    fn draw_program(
        &mut self,
        program: &Self::Program,
        uniforms: &FrameUniforms,
        channels: &[Option<&Self::Texture>; CHANNEL_COUNT],
    ) -> Result<()>;

    /// Show a CPU-composited frame (premultiplied RGBA8, top-down rows).
    fn present_raster(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    fn resize(&mut self, width: u32, height: u32);

    fn surface_size(&self) -> (u32, u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 16);
        let uniforms = FrameUniforms {
            resolution: [1280.0, 720.0],
            time: 2.5,
            audio_energy: 5.0,
        };
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&uniforms));
        assert_eq!(floats, &[1280.0, 720.0, 2.5, 5.0]);
    }
}
