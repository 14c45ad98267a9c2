use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use gifcap::{
    CanvasSize, FrameSink, GifEncoder, GifcapResult, GpuContext, LoopExtension, SinkFrame,
    SourceFrame,
};

fn gpu() -> Option<Arc<GpuContext>> {
    match GpuContext::new() {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(e) if e.to_string().contains("no gpu adapter available") => None,
        Err(e) => panic!("unexpected gpu init error: {e}"),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Loop(LoopExtension),
    Advance,
    Frame {
        ticks: u16,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
        bytes: usize,
    },
    Commit,
}

#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn frames(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Frame { .. }))
            .collect()
    }
}

impl FrameSink for RecordingSink {
    fn write_loop_extension(&mut self, ext: &LoopExtension) -> GifcapResult<()> {
        self.events.lock().unwrap().push(Event::Loop(*ext));
        Ok(())
    }

    fn advance_frame(&mut self) -> GifcapResult<()> {
        self.events.lock().unwrap().push(Event::Advance);
        Ok(())
    }

    fn write_frame(&mut self, frame: &SinkFrame<'_>) -> GifcapResult<()> {
        self.events.lock().unwrap().push(Event::Frame {
            ticks: frame.duration_ticks,
            left: frame.left,
            top: frame.top,
            width: frame.width,
            height: frame.height,
            bytes: frame.bgra.len(),
        });
        Ok(())
    }

    fn commit(&mut self) -> GifcapResult<()> {
        self.events.lock().unwrap().push(Event::Commit);
        Ok(())
    }
}

struct Harness {
    ctx: Arc<GpuContext>,
    size: CanvasSize,
    texture: wgpu::Texture,
    pixels: Vec<u8>,
}

impl Harness {
    fn new(ctx: Arc<GpuContext>, size: CanvasSize) -> Self {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("test_source"),
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
        let pixels = [10u8, 20, 30, 255].repeat(size.width as usize * size.height as usize);
        let mut harness = Self {
            ctx,
            size,
            texture,
            pixels,
        };
        harness.upload();
        harness
    }

    fn paint(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, bgra: [u8; 4]) {
        for y in y0..y1 {
            for x in x0..x1 {
                let i = ((y * self.size.width + x) * 4) as usize;
                self.pixels[i..i + 4].copy_from_slice(&bgra);
            }
        }
        self.upload();
    }

    fn upload(&mut self) {
        self.ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &self.pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.size.width * 4),
                rows_per_image: Some(self.size.height),
            },
            wgpu::Extent3d {
                width: self.size.width,
                height: self.size.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn process(&self, encoder: &mut GifEncoder, at_ms: u64) -> bool {
        encoder
            .process_frame(&SourceFrame {
                texture: &self.texture,
                content_size: self.size,
                time: Duration::from_millis(at_ms),
            })
            .unwrap()
    }
}

#[test]
fn throttle_accepts_first_rejects_early_accepts_late() {
    let Some(ctx) = gpu() else { return };
    let size = CanvasSize::new(32, 32);
    let sink = RecordingSink::default();
    let mut encoder = GifEncoder::new(ctx.clone(), size, Box::new(sink)).unwrap();
    let mut harness = Harness::new(ctx, size);

    assert!(harness.process(&mut encoder, 0));
    harness.paint(2, 2, 6, 6, [250, 0, 0, 255]);
    assert!(!harness.process(&mut encoder, 10));
    assert!(harness.process(&mut encoder, 40));
}

#[test]
fn duration_pipeline_emits_one_step_late_with_correct_ticks() {
    let Some(ctx) = gpu() else { return };
    let size = CanvasSize::new(64, 48);
    let sink = RecordingSink::default();
    let mut encoder = GifEncoder::new(ctx.clone(), size, Box::new(sink.clone())).unwrap();
    let mut harness = Harness::new(ctx, size);

    // Commit 1: first frame, full canvas.
    assert!(harness.process(&mut encoder, 0));
    // Commit 2: region A.
    harness.paint(10, 10, 20, 20, [200, 0, 0, 255]);
    assert!(harness.process(&mut encoder, 100));
    // Commit 3: region B.
    harness.paint(30, 20, 40, 30, [0, 200, 0, 255]);
    assert!(harness.process(&mut encoder, 250));
    // Throttled candidate; its timestamp seeds the synthetic final frame.
    assert!(!harness.process(&mut encoder, 275));

    encoder.finalize().unwrap();

    let events = sink.events();
    assert_eq!(events[0], Event::Loop(LoopExtension::default()));
    assert_eq!(*events.last().unwrap(), Event::Commit);

    let frames = sink.frames();
    assert_eq!(frames.len(), 3);

    // Frame 1: full canvas (inflation clamps to the canvas), visible for
    // 100ms. Emitted without a preceding advance.
    assert_eq!(
        frames[0],
        Event::Frame {
            ticks: 10,
            left: 0,
            top: 0,
            width: 64,
            height: 48,
            bytes: 64 * 48 * 4,
        }
    );
    assert_eq!(events[1], frames[0]);

    // Frame 2 carries region A (not B): one-step latency. Raw rect
    // {10,10,19,19} inflated by one on every side.
    assert_eq!(
        frames[1],
        Event::Frame {
            ticks: 15,
            left: 9,
            top: 9,
            width: 11,
            height: 11,
            bytes: 11 * 11 * 4,
        }
    );
    assert_eq!(events[2], Event::Advance);

    // Frame 3 carries region B, extended past the synthetic final
    // timestamp: end = 275 + (275 - 250) = 300, so 50ms.
    assert_eq!(
        frames[2],
        Event::Frame {
            ticks: 5,
            left: 29,
            top: 19,
            width: 11,
            height: 11,
            bytes: 11 * 11 * 4,
        }
    );
}

#[test]
fn unchanged_frames_are_not_committed() {
    let Some(ctx) = gpu() else { return };
    let size = CanvasSize::new(32, 32);
    let sink = RecordingSink::default();
    let mut encoder = GifEncoder::new(ctx.clone(), size, Box::new(sink.clone())).unwrap();
    let harness = Harness::new(ctx, size);

    assert!(harness.process(&mut encoder, 0));
    // Same content, past the throttle window: admitted but no change.
    assert!(!harness.process(&mut encoder, 50));
    assert!(!harness.process(&mut encoder, 100));

    encoder.finalize().unwrap();

    // The only emitted frame is the first full-canvas one, flushed through
    // the forced minimal-rect path. Its duration runs to the synthetic end
    // time 100 + (100 - 0) = 200ms.
    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(
        frames[0],
        Event::Frame {
            ticks: 20,
            left: 0,
            top: 0,
            width: 32,
            height: 32,
            bytes: 32 * 32 * 4,
        }
    );
    assert_eq!(*sink.events().last().unwrap(), Event::Commit);
}

#[test]
fn finalize_with_no_frames_still_produces_output() {
    let Some(ctx) = gpu() else { return };
    let size = CanvasSize::new(16, 16);
    let sink = RecordingSink::default();
    let mut encoder = GifEncoder::new(ctx, size, Box::new(sink.clone())).unwrap();

    encoder.finalize().unwrap();

    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(*sink.events().last().unwrap(), Event::Commit);
}

#[test]
fn processing_after_finalize_is_an_error() {
    let Some(ctx) = gpu() else { return };
    let size = CanvasSize::new(16, 16);
    let sink = RecordingSink::default();
    let mut encoder = GifEncoder::new(ctx.clone(), size, Box::new(sink)).unwrap();
    let harness = Harness::new(ctx, size);

    encoder.finalize().unwrap();
    assert!(encoder.finalize().is_err());
    assert!(
        encoder
            .process_frame(&SourceFrame {
                texture: &harness.texture,
                content_size: size,
                time: Duration::ZERO,
            })
            .is_err()
    );
}

#[test]
fn readback_is_tightly_packed_for_unaligned_widths() {
    let Some(ctx) = gpu() else { return };
    // 61 * 4 = 244 bytes per row, well under the 256-byte copy alignment,
    // so the device stride is padded and must be stripped on repack.
    let size = CanvasSize::new(61, 33);
    let sink = RecordingSink::default();
    let mut encoder = GifEncoder::new(ctx.clone(), size, Box::new(sink.clone())).unwrap();
    let mut harness = Harness::new(ctx, size);

    assert!(harness.process(&mut encoder, 0));
    harness.paint(3, 5, 16, 12, [0, 0, 250, 255]);
    assert!(harness.process(&mut encoder, 100));

    let frames = sink.frames();
    assert_eq!(
        frames[0],
        Event::Frame {
            ticks: 10,
            left: 0,
            top: 0,
            width: 61,
            height: 33,
            bytes: 61 * 33 * 4,
        }
    );
}
