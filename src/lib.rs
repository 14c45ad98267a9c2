#![forbid(unsafe_code)]

//! Incremental GIF capture encoding: composite captured frames onto a fixed
//! canvas, detect the changed rectangle on the GPU, throttle to ~30 fps, and
//! emit only the changed region of each frame with one-step-delayed duration
//! accounting.

pub mod capture;
pub mod compositor;
pub mod differ;
pub mod encoder;
pub mod error;
pub mod gpu;
pub mod rect;
pub mod sink;

pub use capture::{CaptureSource, FrameCallback, TestPatternSource};
pub use compositor::{ComposedFrame, FrameCompositor, SourceFrame};
pub use differ::TextureDiffer;
pub use encoder::GifEncoder;
pub use error::{GifcapError, GifcapResult};
pub use gpu::GpuContext;
pub use rect::{CanvasSize, DiffRect};
pub use sink::{FrameSink, GifFileSink, LoopExtension, SinkFrame};
