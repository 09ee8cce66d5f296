//! GPU presentation via wgpu
//!
//! Uploads NV12 pictures to a pair of plane textures and draws them as a
//! fullscreen quad with BT.709 conversion in the fragment shader. The
//! swapchain tracks the window; video of any size scales onto it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::frame::DecodedPicture;
use crate::pipeline::{PaintSurface, SurfaceError};

// ============================================================================
// Vertex and Shader
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    tex_coords: [f32; 2],
}

const VERTICES: &[Vertex] = &[
    Vertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
    Vertex { position: [ 1.0, -1.0], tex_coords: [1.0, 1.0] },
    Vertex { position: [ 1.0,  1.0], tex_coords: [1.0, 0.0] },
    Vertex { position: [-1.0,  1.0], tex_coords: [0.0, 0.0] },
];

const INDICES: &[u16] = &[0, 1, 2, 2, 3, 0];

const SHADER_NV12: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.tex_coords = in.tex_coords;
    return out;
}

@group(0) @binding(0) var t_y: texture_2d<f32>;
@group(0) @binding(1) var t_uv: texture_2d<f32>;
@group(0) @binding(2) var s: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let y = textureSample(t_y, s, in.tex_coords).r;
    let uv = textureSample(t_uv, s, in.tex_coords).rg;

    // BT.709 YUV to RGB
    let y_scaled = (y - 0.0625) * 1.164;
    let u = uv.r - 0.5;
    let v = uv.g - 0.5;

    let r = y_scaled + 1.793 * v;
    let g = y_scaled - 0.213 * u - 0.533 * v;
    let b = y_scaled + 2.112 * u;

    return vec4<f32>(r, g, b, 1.0);
}
"#;

// ============================================================================
// Windowed surface
// ============================================================================

struct PlaneTextures {
    y: wgpu::Texture,
    uv: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    planes: Option<PlaneTextures>,
    video_size: (u32, u32),
}

pub struct WgpuSurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    state: Mutex<SurfaceState>,
}

impl WgpuSurface {
    pub async fn new(window: Arc<winit::window::Window>) -> Result<Self, SurfaceError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| SurfaceError::Init(format!("surface creation failed: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| SurfaceError::Init("no suitable GPU adapter".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: Some("vigil_device"),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| SurfaceError::Init(format!("device request failed: {e}")))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
                label: Some("nv12_bind_group_layout"),
            });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        };

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("nv12_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_NV12.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("nv12_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("nv12_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        use wgpu::util::DeviceExt;
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vertex_buffer"),
            contents: bytemuck::cast_slice(VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("index_buffer"),
            contents: bytemuck::cast_slice(INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        tracing::info!(format = ?surface_format, "GPU surface ready");

        Ok(Self {
            device,
            queue,
            state: Mutex::new(SurfaceState {
                surface,
                config,
                pipeline,
                bind_group_layout,
                sampler,
                vertex_buffer,
                index_buffer,
                planes: None,
                video_size: (0, 0),
            }),
        })
    }

    /// The window was resized; follow it with the swapchain.
    pub fn window_resized(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.config.width = width;
        state.config.height = height;
        let state = &mut *state;
        state.surface.configure(&self.device, &state.config);
    }
}

impl SurfaceState {
    /// Upload both NV12 planes, reallocating the textures only when the
    /// picture size changes.
    fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, picture: &DecodedPicture) {
        let (width, height, stride) = (picture.width, picture.height, picture.stride);
        let y_size = (stride * height) as usize;
        let uv_size = (stride * height / 2) as usize;
        if picture.data.len() < y_size + uv_size {
            tracing::warn!(
                len = picture.data.len(),
                expected = y_size + uv_size,
                "short picture buffer, skipping upload"
            );
            return;
        }

        let recreate = self
            .planes
            .as_ref()
            .map_or(true, |p| (p.width, p.height) != (width, height));
        if recreate {
            let y = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("y_texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let uv = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("uv_texture"),
                size: wgpu::Extent3d {
                    width: width / 2,
                    height: height / 2,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rg8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });

            let y_view = y.create_view(&wgpu::TextureViewDescriptor::default());
            let uv_view = uv.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("nv12_bind_group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&y_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&uv_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });

            self.planes = Some(PlaneTextures {
                y,
                uv,
                bind_group,
                width,
                height,
            });
        }

        let Some(planes) = self.planes.as_ref() else {
            return;
        };
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &planes.y,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &picture.data[..y_size],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(stride),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &planes.uv,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &picture.data[y_size..y_size + uv_size],
            wgpu::ImageDataLayout {
                offset: 0,
                // UV is half width but two bytes per pixel.
                bytes_per_row: Some(stride),
                rows_per_image: Some(height / 2),
            },
            wgpu::Extent3d {
                width: width / 2,
                height: height / 2,
                depth_or_array_layers: 1,
            },
        );
    }

    fn present(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<(), SurfaceError> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                self.surface.configure(device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(|e| SurfaceError::SurfaceLost(e.to_string()))?
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(SurfaceError::OutOfMemory),
            Err(other) => {
                tracing::warn!(error = %other, "swapchain unavailable, skipping frame");
                return Ok(());
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("render_encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("render_pass"),
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

            if let Some(planes) = &self.planes {
                render_pass.set_pipeline(&self.pipeline);
                render_pass.set_bind_group(0, &planes.bind_group, &[]);
                render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                render_pass
                    .set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                render_pass.draw_indexed(0..6, 0, 0..1);
            }
        }

        queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

#[async_trait]
impl PaintSurface for WgpuSurface {
    async fn resize(&self, width: u32, height: u32) -> Result<(), SurfaceError> {
        // The swapchain stays window-sized; the quad scales any video onto
        // it. Only the bookkeeping changes here.
        let mut state = self.state.lock();
        if state.video_size == (width, height) {
            return Ok(());
        }
        state.video_size = (width, height);
        tracing::debug!(width, height, "video size changed");
        Ok(())
    }

    async fn paint(&self, picture: &DecodedPicture) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        state.upload(&self.device, &self.queue, picture);
        state.present(&self.device, &self.queue)
    }
}

// ============================================================================
// Headless surface
// ============================================================================

/// Swapchain-free surface for servers and tests. Accepts every paint
/// immediately and only counts them.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    painted: AtomicU64,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn painted_count(&self) -> u64 {
        self.painted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PaintSurface for HeadlessSurface {
    async fn resize(&self, _width: u32, _height: u32) -> Result<(), SurfaceError> {
        Ok(())
    }

    async fn paint(&self, _picture: &DecodedPicture) -> Result<(), SurfaceError> {
        self.painted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
