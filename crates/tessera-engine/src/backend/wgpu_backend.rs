//! Headless wgpu backend.
//!
//! Every surface is an `Rgba8Unorm` texture usable both as a render target
//! and as a sampled source. Draws are submitted one render pass per batch;
//! the batching layer above keeps that count low.

use std::collections::HashMap;

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;

use crate::backend::{Backend, GeometryCall, TextureId};
use crate::coords::CropRect;
use crate::paint::{argb_to_rgba8, rgba8_to_argb, Color};
use crate::render::{BlendMode, BlendOp, BlendWeight, DrawFlags, Vertex};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Initialization parameters for [`WgpuBackend`].
#[derive(Debug, Clone)]
pub struct WgpuInit {
    pub power_preference: wgpu::PowerPreference,

    /// Backends wgpu may pick from.
    pub backends: wgpu::Backends,

    /// Favor an empty set for portability unless a feature is strictly necessary.
    pub required_features: wgpu::Features,

    pub required_limits: wgpu::Limits,

    /// Device label, visible in graphics debuggers.
    pub label: String,
}

impl Default for WgpuInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            backends: wgpu::Backends::all(),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            label: "tessera device".to_string(),
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// Pipeline variants are keyed by blend program and whether the fragment
/// stage discards transparent texels.
type PipelineKey = (u32, bool);

pub struct WgpuBackend {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,

    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    /// Indexed by the `WRAP_S | WRAP_T` bits of [`DrawFlags`].
    samplers: [wgpu::Sampler; 4],

    /// Stand-in source for untextured draws.
    white: GpuTexture,
    textures: HashMap<TextureId, GpuTexture>,
}

impl WgpuBackend {
    /// Acquires an adapter and device. Blocks the calling thread, which is
    /// the GPU worker when created through [`crate::Engine::new_wgpu`].
    pub fn new(init: &WgpuInit) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: init.power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some(&init.label),
            required_features: init.required_features,
            required_limits: init.required_limits.clone(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .context("failed to create wgpu device/queue")?;

        let info = adapter.get_info();
        log::info!("wgpu adapter: {} ({:?})", info.name, info.backend);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("tessera blit shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tessera blit bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tessera blit pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let samplers = [
            make_sampler(&device, false, false),
            make_sampler(&device, true, false),
            make_sampler(&device, false, true),
            make_sampler(&device, true, true),
        ];

        let white = make_texture(&device, "tessera white texel", 1, 1);
        write_rgba(&queue, &white.texture, CropRect::full(1, 1), &[0xFF, 0xFF, 0xFF, 0xFF]);

        Ok(Self {
            name: format!("wgpu ({})", info.name),
            device,
            queue,
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            samplers,
            white,
            textures: HashMap::new(),
        })
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture> {
        self.textures
            .get(&id)
            .with_context(|| format!("unknown texture {id}"))
    }

    // ── lazy-init helpers ──────────────────────────────────────────────────

    fn ensure_pipeline(&mut self, blend: BlendMode) -> PipelineKey {
        let key = (blend.code(), blend.alpha_test());
        if self.pipelines.contains_key(&key) {
            return key;
        }

        let blend_state = blend.is_enabled().then(|| wgpu::BlendState {
            color: blend_component(blend.rgb()),
            alpha: blend_component(blend.alpha()),
        });

        const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
            0 => Float32x2,
            1 => Float32x2,
            2 => Float32x4,
        ];

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("tessera blit pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &ATTRS,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some(if key.1 { "fs_alpha_test" } else { "fs_main" }),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: blend_state,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        log::debug!("created blit pipeline for {blend:?}");
        self.pipelines.insert(key, pipeline);
        key
    }
}

impl Backend for WgpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_texture(&mut self, id: TextureId, width: u32, height: u32, pixels: Option<&[u32]>) -> Result<()> {
        anyhow::ensure!(!self.textures.contains_key(&id), "texture {id} already exists");
        let limit = self.device.limits().max_texture_dimension_2d;
        anyhow::ensure!(
            width <= limit && height <= limit,
            "texture {width}x{height} exceeds device limit {limit}"
        );

        let tex = make_texture(&self.device, "tessera surface", width, height);
        if let Some(pixels) = pixels {
            write_rgba(&self.queue, &tex.texture, CropRect::full(width, height), &argb_to_rgba8(pixels));
        }
        self.textures.insert(id, tex);
        Ok(())
    }

    fn upload(&mut self, id: TextureId, rect: CropRect, pixels: &[u32]) -> Result<()> {
        let tex = self.texture(id)?;
        anyhow::ensure!(
            CropRect::full(tex.width, tex.height).contains_rect(rect),
            "upload rect {rect} outside {id}"
        );
        write_rgba(&self.queue, &tex.texture, rect, &argb_to_rgba8(pixels));
        Ok(())
    }

    fn read_pixels(&mut self, id: TextureId, rect: CropRect) -> Result<Vec<u32>> {
        let tex = self.texture(id)?;
        anyhow::ensure!(
            !rect.is_empty() && CropRect::full(tex.width, tex.height).contains_rect(rect),
            "read rect {rect} outside {id}"
        );

        let width = rect.width() as u32;
        let height = rect.height() as u32;
        let row_bytes = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = row_bytes.div_ceil(align) * align;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessera readback buffer"),
            size: u64::from(padded_row_bytes) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tessera readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: rect.left as u32, y: rect.up as u32, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .context("wgpu poll failed during readback")?;
        rx.recv()
            .context("readback channel closed")?
            .context("readback map failed")?;

        let mapped = slice.get_mapped_range();
        let row_bytes = row_bytes as usize;
        let mut rgba = Vec::with_capacity(row_bytes * height as usize);
        for row in mapped.chunks_exact(padded_row_bytes as usize) {
            rgba.extend_from_slice(&row[..row_bytes]);
        }
        drop(mapped);
        readback.unmap();

        Ok(rgba8_to_argb(&rgba))
    }

    fn free_texture(&mut self, id: TextureId) -> Result<()> {
        let tex = self
            .textures
            .remove(&id)
            .with_context(|| format!("free of unknown texture {id}"))?;
        tex.texture.destroy();
        Ok(())
    }

    fn copy_region(
        &mut self,
        source: TextureId,
        src_rect: CropRect,
        target: TextureId,
        dst_x: i32,
        dst_y: i32,
    ) -> Result<()> {
        let src = self.texture(source)?;
        let dst = self.texture(target)?;
        let dst_rect = CropRect::from_size(dst_x, dst_y, src_rect.width(), src_rect.height());
        anyhow::ensure!(
            !src_rect.is_empty() && CropRect::full(src.width, src.height).contains_rect(src_rect),
            "copy rect {src_rect} outside {source}"
        );
        anyhow::ensure!(
            CropRect::full(dst.width, dst.height).contains_rect(dst_rect),
            "copy destination {dst_rect} outside {target}"
        );

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tessera copy encoder"),
        });
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &src.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: src_rect.left as u32, y: src_rect.up as u32, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: dst_x as u32, y: dst_y as u32, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: src_rect.width() as u32,
                height: src_rect.height() as u32,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn clear(&mut self, target: TextureId, scissor: CropRect, colour: Color) -> Result<()> {
        let tex = self.texture(target)?;
        let bounds = CropRect::full(tex.width, tex.height);
        let scissor = scissor.clamped_to(bounds);
        if scissor.is_empty() {
            return Ok(());
        }

        if scissor == bounds {
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tessera clear encoder"),
            });
            {
                let _rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("tessera clear pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &tex.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: f64::from(colour.r),
                                g: f64::from(colour.g),
                                b: f64::from(colour.b),
                                a: f64::from(colour.a),
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
            }
            self.queue.submit(Some(encoder.finish()));
            return Ok(());
        }

        // Partial clears overwrite through an unblended quad.
        let (w, h) = (tex.width, tex.height);
        let (l, u, r, d) = (
            scissor.left as f32,
            scissor.up as f32,
            scissor.right as f32,
            scissor.down as f32,
        );
        let positions = [l, u, r, u, r, d, l, u, r, d, l, d];
        let colours: Vec<f32> = std::iter::repeat_n(colour.to_array(), 6).flatten().collect();
        self.draw(&GeometryCall {
            target,
            target_width: w,
            target_height: h,
            scissor,
            vertex_count: 6,
            positions: &positions,
            colours: Some(&colours),
            tex_coords: None,
            texture: None,
            blend: BlendMode::NONE,
            flags: DrawFlags::EMPTY,
        })
    }

    fn draw(&mut self, call: &GeometryCall<'_>) -> Result<()> {
        let n = call.vertex_count;
        anyhow::ensure!(call.positions.len() >= n * 2, "position stream too short");
        if let Some(c) = call.colours {
            anyhow::ensure!(c.len() >= n * 4, "colour stream too short");
        }
        if let Some(t) = call.tex_coords {
            anyhow::ensure!(t.len() >= n * 2, "texcoord stream too short");
        }

        let key = self.ensure_pipeline(call.blend);

        let target = self.texture(call.target)?;
        let scissor = call.scissor.clamped_to(CropRect::full(target.width, target.height));
        if n == 0 || scissor.is_empty() {
            return Ok(());
        }
        let source = match call.texture {
            Some(id) => self.texture(id)?,
            None => &self.white,
        };

        let sx = 2.0 / target.width as f32;
        let sy = 2.0 / target.height as f32;
        let vertices: Vec<Vertex> = (0..n)
            .map(|i| {
                let pos = [
                    call.positions[i * 2] * sx - 1.0,
                    1.0 - call.positions[i * 2 + 1] * sy,
                ];
                let uv = call
                    .tex_coords
                    .map_or([0.0, 0.0], |t| [t[i * 2], t[i * 2 + 1]]);
                let colour = call
                    .colours
                    .map_or([1.0; 4], |c| [c[i * 4], c[i * 4 + 1], c[i * 4 + 2], c[i * 4 + 3]]);
                Vertex::new(pos, uv, colour)
            })
            .collect();

        let vbo = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tessera batch vbo"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let wrap = (call.flags.bits() & (DrawFlags::WRAP_S | DrawFlags::WRAP_T).bits()) as usize;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tessera blit bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.samplers[wrap]),
                },
            ],
        });

        let Some(pipeline) = self.pipelines.get(&key) else {
            anyhow::bail!("blit pipeline missing for {:?}", call.blend);
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tessera batch encoder"),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("tessera batch pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.set_vertex_buffer(0, vbo.slice(..));
            rpass.set_scissor_rect(
                scissor.left as u32,
                scissor.up as u32,
                scissor.width() as u32,
                scissor.height() as u32,
            );
            rpass.draw(0..n as u32, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

// ── helpers ────────────────────────────────────────────────────────────────

fn make_texture(device: &wgpu::Device, label: &str, width: u32, height: u32) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view, width, height }
}

fn make_sampler(device: &wgpu::Device, wrap_s: bool, wrap_t: bool) -> wgpu::Sampler {
    let mode = |wrap: bool| {
        if wrap {
            wgpu::AddressMode::Repeat
        } else {
            wgpu::AddressMode::ClampToEdge
        }
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("tessera blit sampler"),
        address_mode_u: mode(wrap_s),
        address_mode_v: mode(wrap_t),
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}

fn write_rgba(queue: &wgpu::Queue, texture: &wgpu::Texture, rect: CropRect, rgba: &[u8]) {
    let width = rect.width() as u32;
    let height = rect.height() as u32;
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: rect.left as u32, y: rect.up as u32, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
}

fn blend_component(eq: crate::render::BlendEquation) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: blend_factor(eq.src),
        dst_factor: blend_factor(eq.dst),
        operation: match eq.op {
            BlendOp::Add => wgpu::BlendOperation::Add,
            BlendOp::Sub => wgpu::BlendOperation::Subtract,
            BlendOp::ReverseSub => wgpu::BlendOperation::ReverseSubtract,
        },
    }
}

fn blend_factor(w: BlendWeight) -> wgpu::BlendFactor {
    match w {
        BlendWeight::Zero => wgpu::BlendFactor::Zero,
        BlendWeight::One => wgpu::BlendFactor::One,
        BlendWeight::Src => wgpu::BlendFactor::Src,
        BlendWeight::InvertSrc => wgpu::BlendFactor::OneMinusSrc,
        BlendWeight::Dst => wgpu::BlendFactor::Dst,
        BlendWeight::InvertDst => wgpu::BlendFactor::OneMinusDst,
        BlendWeight::SrcA => wgpu::BlendFactor::SrcAlpha,
        BlendWeight::InvertSrcA => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendWeight::DstA => wgpu::BlendFactor::DstAlpha,
        BlendWeight::InvertDstA => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendWeight::SrcAlphaSaturate => wgpu::BlendFactor::SrcAlphaSaturated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── blend lowering ─────────────────────────────────────────────────────

    #[test]
    fn normal_blend_lowers_to_src_over() {
        let c = blend_component(BlendMode::NORMAL.rgb());
        assert_eq!(c.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(c.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        assert_eq!(c.operation, wgpu::BlendOperation::Add);
    }

    #[test]
    fn sub_blend_lowers_to_reverse_subtract() {
        let c = blend_component(BlendMode::SUB.rgb());
        assert_eq!(c.operation, wgpu::BlendOperation::ReverseSubtract);
    }

    #[test]
    fn default_init_is_portable() {
        let init = WgpuInit::default();
        assert!(init.required_features.is_empty());
        assert_eq!(init.backends, wgpu::Backends::all());
    }
}
