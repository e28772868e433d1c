use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::window::Window;

use super::device::{FrameUniforms, RenderDevice, CHANNEL_COUNT};
use super::shader::{LinkedProgram, FRAGMENT_ENTRY, VERTEX_ENTRY};
use super::texture::TextureImage;
use super::vertex::{Vertex, VertexBuffer, FULLSCREEN_QUAD};
use crate::error::{CompileError, ShaderStage};

const BLIT_SHADER: &str = include_str!("../../shaders/blit.wgsl");

/// Channel bind groups are cached by the ids of the textures they hold. Old
/// entries pin replaced textures, so the cache is dropped once it grows.
const MAX_CACHED_BIND_GROUPS: usize = 64;

const BLANK_TEXTURE_ID: u64 = 0;

pub struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
}

pub struct GpuTexture {
    id: u64,
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

struct RasterTarget {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// wgpu implementation of [`RenderDevice`] drawing into the window surface.
pub struct GraphicsEngine {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,

    channel_layout: wgpu::BindGroupLayout,
    program_layout: wgpu::PipelineLayout,

    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,

    vertex_buffer: VertexBuffer,
    channel_sampler: wgpu::Sampler,
    blank: GpuTexture,
    channel_groups: HashMap<[u64; CHANNEL_COUNT], wgpu::BindGroup>,

    blit_pipeline: wgpu::RenderPipeline,
    blit_layout: wgpu::BindGroupLayout,
    blit_sampler: wgpu::Sampler,
    raster: Option<RasterTarget>,

    next_texture_id: u64,
}

impl GraphicsEngine {
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("Failed to find an appropriate adapter"))?;
        info!("Using adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: None,
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow!("Surface reports no supported formats"))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("frame_bind_group_layout"),
        });

        let channel_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..CHANNEL_COUNT as u32)
            .flat_map(|channel| texture_sampler_entries(channel * 2))
            .collect();
        let channel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &channel_entries,
            label: Some("channel_bind_group_layout"),
        });

        let program_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Program Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &channel_layout],
            push_constant_ranges: &[],
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Uniform Buffer"),
            contents: bytemuck::cast_slice(&[FrameUniforms {
                resolution: [config.width as f32, config.height as f32],
                time: 0.0,
                audio_energy: 0.0,
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("frame_bind_group"),
        });

        let channel_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Channel Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let blank = upload_texture(
            &device,
            &queue,
            BLANK_TEXTURE_ID,
            &TextureImage {
                width: 1,
                height: 1,
                pixels: vec![0, 0, 0, 0],
            },
        );

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &texture_sampler_entries(0),
            label: Some("blit_bind_group_layout"),
        });
        let blit_pipeline = create_blit_pipeline(&device, &blit_layout, surface_format);
        let blit_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Blit Sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let vertex_buffer = VertexBuffer::new(&device, &FULLSCREEN_QUAD);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            channel_layout,
            program_layout,
            uniform_buffer,
            uniform_bind_group,
            vertex_buffer,
            channel_sampler,
            blank,
            channel_groups: HashMap::new(),
            blit_pipeline,
            blit_layout,
            blit_sampler,
            raster: None,
            next_texture_id: BLANK_TEXTURE_ID + 1,
        })
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Next swapchain image, or `None` when the frame should be skipped.
    fn acquire(&mut self) -> Result<Option<wgpu::SurfaceTexture>> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("Surface lost or outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                Ok(None)
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("Timed out acquiring surface texture");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn channel_group(&mut self, channels: &[Option<&GpuTexture>; CHANNEL_COUNT]) -> [u64; CHANNEL_COUNT] {
        let key = channels.map(|channel| channel.map_or(BLANK_TEXTURE_ID, |texture| texture.id));
        if self.channel_groups.contains_key(&key) {
            return key;
        }
        if self.channel_groups.len() >= MAX_CACHED_BIND_GROUPS {
            self.channel_groups.clear();
        }

        let views: Vec<&wgpu::TextureView> = channels
            .iter()
            .map(|channel| &channel.unwrap_or(&self.blank).view)
            .collect();
        let entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .flat_map(|(channel, view)| {
                [
                    wgpu::BindGroupEntry {
                        binding: channel as u32 * 2,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: channel as u32 * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(&self.channel_sampler),
                    },
                ]
            })
            .collect();

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.channel_layout,
            entries: &entries,
            label: Some("channel_bind_group"),
        });
        self.channel_groups.insert(key, group);
        key
    }

    fn ensure_raster_target(&mut self, width: u32, height: u32) {
        let current = self
            .raster
            .as_ref()
            .is_some_and(|target| (target.width, target.height) == (width, height));
        if current {
            return;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Raster Frame"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.blit_sampler),
                },
            ],
            label: Some("raster_bind_group"),
        });
        debug!("Allocated {}x{} raster target", width, height);
        self.raster = Some(RasterTarget {
            texture,
            bind_group,
            width,
            height,
        });
    }

    /// Clear `frame` to black, optionally draw the quad with `pipeline`, and
    /// present it.
    fn draw_fullscreen(
        &self,
        frame: wgpu::SurfaceTexture,
        label: &str,
        pipeline: Option<(&wgpu::RenderPipeline, &[&wgpu::BindGroup])>,
    ) {
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let Some((pipeline, bind_groups)) = pipeline {
                render_pass.set_pipeline(pipeline);
                for (index, bind_group) in bind_groups.iter().enumerate() {
                    render_pass.set_bind_group(index as u32, bind_group, &[]);
                }
                render_pass.set_vertex_buffer(0, self.vertex_buffer.buffer.slice(..));
                render_pass.draw(0..self.vertex_buffer.vertex_count, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
    }
}

impl RenderDevice for GraphicsEngine {
    type Program = GpuProgram;
    type Texture = GpuTexture;

    fn build_program(&mut self, program: &LinkedProgram) -> Result<GpuProgram, CompileError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Program Vertex Stage"),
            source: wgpu::ShaderSource::Wgsl(program.vertex.source.as_str().into()),
        });
        let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Program Fragment Stage"),
            source: wgpu::ShaderSource::Wgsl(program.fragment.source.as_str().into()),
        });

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Program Pipeline"),
            layout: Some(&self.program_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: VERTEX_ENTRY,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[Vertex::desc()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: FRAGMENT_ENTRY,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: fullscreen_primitive(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompileError::new(ShaderStage::Device, error.to_string()));
        }
        Ok(GpuProgram { pipeline })
    }

    fn create_texture(&mut self, image: &TextureImage) -> GpuTexture {
        let id = self.next_texture_id;
        self.next_texture_id += 1;

        let max = self.max_texture_dimension();
        if image.width > max || image.height > max {
            warn!("{}x{} texture exceeds the {} device limit; using a placeholder", image.width, image.height, max);
            return upload_texture(&self.device, &self.queue, id, &TextureImage::placeholder());
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = upload_texture(&self.device, &self.queue, id, image);
        match pollster::block_on(self.device.pop_error_scope()) {
            None => texture,
            Some(error) => {
                warn!("Texture upload rejected: {}", error);
                upload_texture(&self.device, &self.queue, id, &TextureImage::placeholder())
            }
        }
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn draw_program(
        &mut self,
        program: &GpuProgram,
        uniforms: &FrameUniforms,
        channels: &[Option<&GpuTexture>; CHANNEL_COUNT],
    ) -> Result<()> {
        let Some(frame) = self.acquire()? else {
            return Ok(());
        };

        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[*uniforms]));
        let key = self.channel_group(channels);
        let channel_group = self
            .channel_groups
            .get(&key)
            .ok_or_else(|| anyhow!("channel bind group missing for {:?}", key))?;

        let bind_groups = [&self.uniform_bind_group, channel_group];
        self.draw_fullscreen(frame, "Program Pass", Some((&program.pipeline, &bind_groups[..])));
        Ok(())
    }

    fn present_raster(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(anyhow!(
                "raster frame is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            ));
        }

        let Some(frame) = self.acquire()? else {
            return Ok(());
        };

        self.ensure_raster_target(width, height);
        let Some(target) = &self.raster else {
            return Ok(());
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let bind_groups = [&target.bind_group];
        self.draw_fullscreen(frame, "Raster Blit Pass", Some((&self.blit_pipeline, &bind_groups[..])));
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let Some(frame) = self.acquire()? else {
            return Ok(());
        };
        self.draw_fullscreen(frame, "Clear Pass", None);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }
}

fn texture_sampler_entries(first_binding: u32) -> [wgpu::BindGroupLayoutEntry; 2] {
    [
        wgpu::BindGroupLayoutEntry {
            binding: first_binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: first_binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        },
    ]
}

fn fullscreen_primitive() -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: None,
        polygon_mode: wgpu::PolygonMode::Fill,
        unclipped_depth: false,
        conservative: false,
    }
}

fn create_blit_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Blit Shader"),
        source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Blit Pipeline Layout"),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Blit Pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: "vs_main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[Vertex::desc()],
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: "fs_main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: fullscreen_primitive(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

fn upload_texture(device: &wgpu::Device, queue: &wgpu::Queue, id: u64, image: &TextureImage) -> GpuTexture {
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("Channel Texture"),
            size: wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        &image.pixels,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    GpuTexture {
        id,
        texture,
        view,
        width: image.width,
        height: image.height,
    }
}
