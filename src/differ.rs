use std::{num::NonZeroU64, sync::Arc};

use tracing::debug;

use crate::{
    error::GifcapResult,
    gpu::GpuContext,
    rect::{CanvasSize, DiffRect},
};

/// Compare-and-reduce kernel. The canvas is partitioned into 2x2 pixel
/// blocks, one invocation per block; any differing pixel expands the shared
/// result rect through clamped atomic min/max on its own coordinates.
const DIFF_SHADER: &str = r#"
struct DiffRect {
  left: atomic<u32>,
  top: atomic<u32>,
  right: atomic<u32>,
  bottom: atomic<u32>,
}

@group(0) @binding(0) var current_tex: texture_2d<f32>;
@group(0) @binding(1) var previous_tex: texture_2d<f32>;
@group(0) @binding(2) var<storage, read_write> result: DiffRect;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
  let dims = textureDimensions(current_tex);
  let base = gid.xy * 2u;
  for (var dy = 0u; dy < 2u; dy = dy + 1u) {
    for (var dx = 0u; dx < 2u; dx = dx + 1u) {
      let px = base + vec2<u32>(dx, dy);
      if (px.x >= dims.x || px.y >= dims.y) {
        continue;
      }
      let cur = textureLoad(current_tex, vec2<i32>(px), 0);
      let prev = textureLoad(previous_tex, vec2<i32>(px), 0);
      if (any(cur != prev)) {
        atomicMin(&result.left, px.x);
        atomicMin(&result.top, px.y);
        atomicMax(&result.right, px.x);
        atomicMax(&result.bottom, px.y);
      }
    }
  }
}
"#;

const PIXEL_BLOCK: u32 = 2;
const WORKGROUP: u32 = 8;
const RESULT_BYTES: u64 = 16;

/// Detects the minimal changed rectangle between the current canvas and a
/// GPU-resident copy of the previous one.
///
/// The previous-canvas copy is updated unconditionally at the end of every
/// call, including calls that report no change, so it always holds the
/// canvas content as of the last diff.
pub struct TextureDiffer {
    context: Arc<GpuContext>,
    size: CanvasSize,
    previous: wgpu::Texture,
    previous_view: wgpu::TextureView,
    result_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    first_frame: bool,
}

impl TextureDiffer {
    pub fn new(context: Arc<GpuContext>, size: CanvasSize) -> Self {
        let device = &context.device;

        let previous = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gifcap_previous_canvas"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let previous_view = previous.create_view(&wgpu::TextureViewDescriptor::default());

        let result_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gifcap_diff_result"),
            size: RESULT_BYTES,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gifcap_diff_staging"),
            size: RESULT_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("gifcap_diff_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: Some(NonZeroU64::new(RESULT_BYTES).unwrap()),
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("gifcap_diff_shader"),
            source: wgpu::ShaderSource::Wgsl(DIFF_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("gifcap_diff_pl"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("gifcap_diff_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Self {
            context,
            size,
            previous,
            previous_view,
            result_buffer,
            staging_buffer,
            pipeline,
            bind_group_layout,
            first_frame: true,
        }
    }

    /// Diff `current` against the stored previous canvas.
    ///
    /// The first call stores the canvas and returns the full-canvas rect,
    /// forcing the first output frame to cover everything. Later calls
    /// return `None` when no pixel differs. The result is at block
    /// granularity: never a proper subset of the true changed region.
    pub fn process_frame(&mut self, current: &wgpu::Texture) -> GifcapResult<Option<DiffRect>> {
        if self.first_frame {
            self.first_frame = false;
            let mut encoder =
                self.context
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("gifcap_diff_first_frame"),
                    });
            self.copy_to_previous(&mut encoder, current);
            self.context.queue.submit(Some(encoder.finish()));
            return Ok(Some(self.size.full_rect()));
        }

        self.context.queue.write_buffer(
            &self.result_buffer,
            0,
            &DiffRect::sentinel(self.size).to_le_bytes(),
        );

        let current_view = current.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("gifcap_diff_bg"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&current_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&self.previous_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.result_buffer.as_entire_binding(),
                    },
                ],
            });

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("gifcap_diff_encoder"),
                });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("gifcap_diff_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                workgroups_for(self.size.width),
                workgroups_for(self.size.height),
                1,
            );
        }
        // Keep the reference current even when nothing changed.
        self.copy_to_previous(&mut encoder, current);
        encoder.copy_buffer_to_buffer(&self.result_buffer, 0, &self.staging_buffer, 0, RESULT_BYTES);
        self.context.queue.submit(Some(encoder.finish()));

        let bytes = self.context.read_buffer(&self.staging_buffer, RESULT_BYTES)?;
        let rect = DiffRect::from_le_bytes(&bytes);
        debug!(?rect, valid = rect.is_valid(), "diff readback");

        Ok(rect.is_valid().then_some(rect))
    }

    fn copy_to_previous(&self, encoder: &mut wgpu::CommandEncoder, current: &wgpu::Texture) {
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: current,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.previous,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.size.width,
                height: self.size.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

fn workgroups_for(pixels: u32) -> u32 {
    let blocks = pixels.div_ceil(PIXEL_BLOCK);
    blocks.div_ceil(WORKGROUP)
}
