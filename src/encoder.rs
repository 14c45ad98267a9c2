use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    compositor::{ComposedFrame, FrameCompositor, SourceFrame},
    differ::TextureDiffer,
    error::{GifcapError, GifcapResult},
    gpu::{GpuContext, align_to},
    rect::{CanvasSize, DiffRect},
    sink::{FrameSink, LoopExtension, SinkFrame},
};

/// Caps the accepted-frame rate at roughly 30 fps.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Rect substituted at finalization when the detector reports no change, so
/// the commit path still runs and flushes the pending frame. Encoding a 5x5
/// patch instead of the full canvas when nothing ever changed is preserved
/// reference behavior; see DESIGN.md.
const FORCED_FLUSH_RECT: DiffRect = DiffRect {
    left: 0,
    top: 0,
    right: 5,
    bottom: 5,
};

/// Paces frame acceptance and tracks the timestamps the duration pipeline
/// needs: the last committed timestamp and the most recent timestamp seen
/// on any frame (used for the synthetic final frame).
#[derive(Debug, Default)]
pub(crate) struct FrameThrottler {
    last_processed: Option<Duration>,
    last_candidate: Duration,
}

impl FrameThrottler {
    /// Record `time` as the latest candidate and decide whether the frame
    /// may enter the pipeline. The first frame is always admitted; later
    /// frames only once [`MIN_FRAME_INTERVAL`] has elapsed since the last
    /// commit. Admission does not advance the committed timestamp.
    pub(crate) fn admit(&mut self, time: Duration) -> bool {
        self.last_candidate = time;
        match self.last_processed {
            Some(last) if time.saturating_sub(last) < MIN_FRAME_INTERVAL => false,
            _ => true,
        }
    }

    pub(crate) fn last_processed(&self) -> Option<Duration> {
        self.last_processed
    }

    pub(crate) fn mark_processed(&mut self, time: Duration) {
        self.last_processed = Some(time);
    }

    pub(crate) fn last_candidate(&self) -> Duration {
        self.last_candidate
    }
}

/// Duration between `start` and `end` in the GIF's native 10 ms units,
/// truncated, saturating at the container's u16 field width.
fn duration_ticks(start: Duration, end: Duration) -> u16 {
    let ms = end.saturating_sub(start).as_millis();
    (ms / 10).min(u128::from(u16::MAX)) as u16
}

/// A committed changed region whose on-screen duration is not yet known:
/// the tightly packed BGRA bytes of the inflated rect, the rect itself, and
/// the capture timestamp. Exactly one may be outstanding at a time.
struct PendingFrame {
    bytes: Vec<u8>,
    rect: DiffRect,
    time: Duration,
}

/// Drives the whole pipeline: throttling, compositing, change detection,
/// changed-region readback, one-frame-delayed duration accounting, and
/// emission into the output container.
///
/// A frame's duration is only known once the next accepted frame (or the
/// end of the stream) supplies a later timestamp, so every commit emits the
/// *previously* pending frame and parks the new one. The final pending
/// frame is flushed by [`GifEncoder::finalize`], never by `process_frame`.
pub struct GifEncoder {
    context: Arc<GpuContext>,
    size: CanvasSize,
    compositor: FrameCompositor,
    differ: TextureDiffer,
    sink: Box<dyn FrameSink + Send>,
    readback: wgpu::Buffer,
    throttler: FrameThrottler,
    pending: Option<PendingFrame>,
    frames_written: u64,
    finished: bool,
}

impl GifEncoder {
    /// Build the pipeline and write the loop-forever extension, which must
    /// precede the first emitted frame.
    pub fn new(
        context: Arc<GpuContext>,
        size: CanvasSize,
        mut sink: Box<dyn FrameSink + Send>,
    ) -> GifcapResult<Self> {
        if size.width == 0 || size.height == 0 {
            return Err(GifcapError::validation("canvas size must be non-zero"));
        }

        sink.write_loop_extension(&LoopExtension::default())?;

        let padded_row = align_to(size.width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gifcap_region_readback"),
            size: u64::from(padded_row) * u64::from(size.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let compositor = FrameCompositor::new(context.clone(), size);
        let differ = TextureDiffer::new(context.clone(), size);

        info!(
            width = size.width,
            height = size.height,
            "gif encoder ready"
        );

        Ok(Self {
            context,
            size,
            compositor,
            differ,
            sink,
            readback,
            throttler: FrameThrottler::default(),
            pending: None,
            frames_written: 0,
            finished: false,
        })
    }

    /// Feed one captured frame through the pipeline. Returns whether the
    /// frame was accepted (committed); throttled frames and frames with no
    /// visible change return `Ok(false)`.
    pub fn process_frame(&mut self, frame: &SourceFrame<'_>) -> GifcapResult<bool> {
        if self.finished {
            return Err(GifcapError::validation(
                "encoder already finalized, no further frames may be processed",
            ));
        }

        if !self.throttler.admit(frame.time) {
            debug!(time_ms = frame.time.as_millis() as u64, "frame throttled");
            return Ok(false);
        }

        let composed = self.compositor.process_frame(frame)?;
        let Some(rect) = self.differ.process_frame(&composed.texture)? else {
            debug!(
                time_ms = frame.time.as_millis() as u64,
                "no change detected"
            );
            return Ok(false);
        };

        self.commit(&composed, rect, false)?;
        Ok(true)
    }

    /// Flush the last pending frame and seal the container. Must be called
    /// exactly once, after the capture collaborator has acknowledged that no
    /// further frame will be delivered.
    pub fn finalize(&mut self) -> GifcapResult<()> {
        if self.finished {
            return Err(GifcapError::validation("encoder already finalized"));
        }

        // Repeat the last frame at the most recent timestamp we saw.
        let composed = self.compositor.repeat_frame(self.throttler.last_candidate());
        let rect = match self.differ.process_frame(&composed.texture)? {
            Some(rect) => rect,
            None => FORCED_FLUSH_RECT,
        };
        self.commit(&composed, rect, true)?;

        // If nothing has been written the capture never produced a change;
        // flush the frame the forced commit just parked so the output is
        // non-empty.
        if self.frames_written == 0
            && let Some(frame) = self.pending.take()
        {
            let end = frame.time;
            self.emit(frame, end)?;
        }

        self.sink.commit()?;
        self.finished = true;
        info!(frames = self.frames_written, "gif stream finalized");
        Ok(())
    }

    /// Advance the duration pipeline: read back the changed region, park it
    /// as the new pending frame, and emit the previous occupant now that its
    /// end time is known.
    fn commit(
        &mut self,
        composed: &ComposedFrame,
        rect: DiffRect,
        force: bool,
    ) -> GifcapResult<()> {
        let delta = composed
            .time
            .saturating_sub(self.throttler.last_processed().unwrap_or(composed.time));
        self.throttler.mark_processed(composed.time);

        let rect = rect.inflated(1, self.size);
        let bytes = self.read_region(&composed.texture, rect)?;

        let outgoing = self.pending.replace(PendingFrame {
            bytes,
            rect,
            time: composed.time,
        });

        if let Some(outgoing) = outgoing {
            let mut end = composed.time;
            if force {
                // Extend the last real frame's visible duration past the
                // synthetic final timestamp.
                end += delta;
            }
            self.emit(outgoing, end)?;
        }
        Ok(())
    }

    fn emit(&mut self, frame: PendingFrame, end: Duration) -> GifcapResult<()> {
        let ticks = duration_ticks(frame.time, end);
        debug!(
            ticks,
            left = frame.rect.left,
            top = frame.rect.top,
            width = frame.rect.width(),
            height = frame.rect.height(),
            "emitting frame"
        );

        // No advance before the first frame: it would leave a blank leading
        // frame in the container.
        if self.frames_written > 0 {
            self.sink.advance_frame()?;
        }
        self.sink.write_frame(&SinkFrame {
            duration_ticks: ticks,
            left: frame.rect.left as u16,
            top: frame.rect.top as u16,
            width: frame.rect.width() as u16,
            height: frame.rect.height() as u16,
            bgra: &frame.bytes,
        })?;
        self.frames_written += 1;
        Ok(())
    }

    /// Read back exactly the bytes covering `rect` from the composed canvas,
    /// repacked from the device's padded row stride into tight
    /// `width * 4`-byte rows.
    fn read_region(&self, texture: &wgpu::Texture, rect: DiffRect) -> GifcapResult<Vec<u8>> {
        let width = rect.width();
        let height = rect.height();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let padded_row = align_to(width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("gifcap_region_encoder"),
                });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.left,
                    y: rect.top,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));

        let mapped = self
            .context
            .read_buffer(&self.readback, u64::from(padded_row) * u64::from(height))?;

        let row_bytes = width as usize * 4;
        let padded_row = padded_row as usize;
        let mut out = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * padded_row;
            out.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        Ok(out)
    }
}
