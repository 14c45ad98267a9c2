use std::{sync::Arc, time::Duration};

use crate::{
    error::{GifcapError, GifcapResult},
    gpu::GpuContext,
    rect::CanvasSize,
};

/// A captured frame as delivered by the capture collaborator: a GPU surface,
/// the size of the valid content within it, and a monotonic capture-relative
/// timestamp.
pub struct SourceFrame<'a> {
    pub texture: &'a wgpu::Texture,
    pub content_size: CanvasSize,
    pub time: Duration,
}

/// The canvas after compositing, plus the timestamp of the source frame it
/// came from. The texture is a shared handle to the compositor's canvas, not
/// a pixel copy; consumers read it before the next compositor call.
#[derive(Debug)]
pub struct ComposedFrame {
    pub texture: wgpu::Texture,
    pub time: Duration,
}

/// Owns the fixed-size canvas and composites each incoming frame onto it.
///
/// To support a capture target that resizes mid-session, only the part of
/// the source covered by its reported content size is copied, clamped to
/// the canvas bounds. A mismatched size is policy (clamp), never an error.
pub struct FrameCompositor {
    context: Arc<GpuContext>,
    size: CanvasSize,
    canvas: wgpu::Texture,
    canvas_view: wgpu::TextureView,
}

const CANVAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

impl FrameCompositor {
    pub fn new(context: Arc<GpuContext>, size: CanvasSize) -> Self {
        let canvas = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gifcap_canvas"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CANVAS_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let canvas_view = canvas.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            context,
            size,
            canvas,
            canvas_view,
        }
    }

    /// Clear the canvas to opaque black, copy the clamped top-left region of
    /// the source onto it, and return the canvas with the source timestamp.
    pub fn process_frame(&mut self, frame: &SourceFrame<'_>) -> GifcapResult<ComposedFrame> {
        if frame.texture.format() != CANVAS_FORMAT {
            return Err(GifcapError::validation(format!(
                "source frame must be Bgra8Unorm, got {:?}",
                frame.texture.format()
            )));
        }

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("gifcap_compose_encoder"),
                });

        {
            // Empty pass: the clear happens through the load op.
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gifcap_canvas_clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.canvas_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        // The reported content size may exceed either the canvas or the
        // surface it arrived in (a window mid-resize). Always clamp.
        let width = frame
            .content_size
            .width
            .min(self.size.width)
            .min(frame.texture.width());
        let height = frame
            .content_size
            .height
            .min(self.size.height)
            .min(frame.texture.height());

        if width > 0 && height > 0 {
            encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: frame.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &self.canvas,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }

        self.context.queue.submit(Some(encoder.finish()));

        Ok(ComposedFrame {
            texture: self.canvas.clone(),
            time: frame.time,
        })
    }

    /// Return the canvas unmodified with a caller-supplied timestamp. Used to
    /// synthesize the final frame at stream end without a new source frame.
    pub fn repeat_frame(&self, time: Duration) -> ComposedFrame {
        ComposedFrame {
            texture: self.canvas.clone(),
            time,
        }
    }

    pub fn size(&self) -> CanvasSize {
        self.size
    }
}
