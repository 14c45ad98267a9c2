use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    compositor::SourceFrame,
    error::{GifcapError, GifcapResult},
    gpu::GpuContext,
    rect::CanvasSize,
};

pub type FrameCallback = Box<dyn for<'a> FnMut(SourceFrame<'a>) + Send>;

/// A source of captured frames.
///
/// Frames are delivered through the callback, possibly on a thread distinct
/// from the caller's. Delivery is serialized: the source must not invoke the
/// callback again before the previous invocation returns, since the encoder
/// pipeline supports at most one frame in flight.
///
/// `stop` is an acknowledged-stop handshake: it returns only once no further
/// callback will fire, so the caller may finalize the encoder immediately
/// afterwards without racing a late frame.
pub trait CaptureSource {
    fn start(&mut self, on_frame: FrameCallback) -> GifcapResult<()>;
    fn stop(&mut self) -> GifcapResult<()>;
}

/// CPU-generated animated test pattern: a static gradient backdrop with a
/// block sweeping across it, so consecutive frames differ only in a small
/// region. Stands in for a platform capture source in the demo binary and
/// in tests.
pub struct TestPatternSource {
    context: Arc<GpuContext>,
    size: CanvasSize,
    frame_interval: Duration,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TestPatternSource {
    pub fn new(context: Arc<GpuContext>, size: CanvasSize) -> Self {
        Self {
            context,
            size,
            frame_interval: Duration::from_millis(16),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl CaptureSource for TestPatternSource {
    fn start(&mut self, mut on_frame: FrameCallback) -> GifcapResult<()> {
        if self.worker.is_some() {
            return Err(GifcapError::capture("capture source already started"));
        }

        let context = self.context.clone();
        let size = self.size;
        let interval = self.frame_interval;
        let stop = self.stop.clone();

        self.worker = Some(thread::spawn(move || {
            let texture = context.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("gifcap_test_pattern"),
                size: wgpu::Extent3d {
                    width: size.width,
                    height: size.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Bgra8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });

            let mut pixels = vec![0u8; size.width as usize * size.height as usize * 4];
            let started = Instant::now();
            let mut delivered = 0u64;

            while !stop.load(Ordering::Relaxed) {
                let time = started.elapsed();
                fill_pattern(&mut pixels, size, time);
                context.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    &pixels,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(size.width * 4),
                        rows_per_image: Some(size.height),
                    },
                    wgpu::Extent3d {
                        width: size.width,
                        height: size.height,
                        depth_or_array_layers: 1,
                    },
                );

                on_frame(SourceFrame {
                    texture: &texture,
                    content_size: size,
                    time,
                });
                delivered += 1;

                thread::sleep(interval);
            }
            debug!(frames = delivered, "test pattern source stopped");
        }));
        Ok(())
    }

    fn stop(&mut self) -> GifcapResult<()> {
        let Some(worker) = self.worker.take() else {
            return Err(GifcapError::capture("capture source was not started"));
        };
        self.stop.store(true, Ordering::Relaxed);
        worker
            .join()
            .map_err(|_| GifcapError::capture("capture worker panicked"))?;
        Ok(())
    }
}

/// Paint the animated pattern into a tight BGRA buffer.
fn fill_pattern(pixels: &mut [u8], size: CanvasSize, elapsed: Duration) {
    let w = size.width as usize;
    let h = size.height as usize;

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 4;
            let shade = (x * 200 / w.max(1)) as u8;
            pixels[i] = 40 + shade / 4; // B
            pixels[i + 1] = 24; // G
            pixels[i + 2] = shade; // R
            pixels[i + 3] = 255; // A
        }
    }

    let block = (w / 8).max(1).min(h.max(1));
    let travel = (w - block).max(1);
    // Quantized to whole pixels per 20ms step so consecutive throttled
    // frames still move visibly.
    let x0 = (elapsed.as_millis() as usize / 20 * 3) % travel;
    let y0 = (h - block) / 2;
    for y in y0..y0 + block {
        for x in x0..x0 + block {
            let i = (y * w + x) * 4;
            pixels[i] = 30;
            pixels[i + 1] = 200;
            pixels[i + 2] = 240;
            pixels[i + 3] = 255;
        }
    }
}
