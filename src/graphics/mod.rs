pub mod arena;
pub mod backend;
pub mod device;
pub mod engine;
pub mod headless;
pub mod resources;
pub mod shader;
pub mod surface;
pub mod texture;
pub mod vertex;

pub use arena::{Arena, Handle};
pub use backend::{GpuRenderer, ProgramGate, SourceValidator};
pub use device::{FrameUniforms, RenderDevice, CHANNEL_COUNT};
pub use engine::GraphicsEngine;
pub use headless::HeadlessDevice;
pub use resources::{ProgramHandle, ResourceCache, TextureHandle, TextureInfo};
pub use shader::{compile_stage, link_program, LinkedProgram, DEFAULT_TEMPLATE};
pub use surface::{DisplaySurfaces, SurfaceKind};
pub use texture::{TextureImage, TextureState};
pub use vertex::{Vertex, VertexBuffer};
