use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use image::codecs::gif::Repeat;

use crate::error::{GifcapError, GifcapResult};

/// GIF application extension requesting that the animation loop forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopExtension {
    /// 11-byte application identifier.
    pub application: [u8; 11],
    /// Fixed payload: block size 3, looping marker 1, loop count 0 (u16 LE,
    /// 0 = infinite), block terminator 0.
    pub data: [u8; 5],
}

impl Default for LoopExtension {
    fn default() -> Self {
        Self {
            application: *b"NETSCAPE2.0",
            data: [3, 1, 0, 0, 0],
        }
    }
}

/// One frame as handed to the output container: premultiplied BGRA pixels of
/// the changed region, its placement within the canvas, and how long it was
/// visible in the container's native 10 ms units.
pub struct SinkFrame<'a> {
    pub duration_ticks: u16,
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
    pub bgra: &'a [u8],
}

/// Interface to the output container.
///
/// Call order per stream: `write_loop_extension` once before any frame, then
/// for each frame `advance_frame` (skipped for the first frame, so the
/// container never carries a leading blank frame) followed by `write_frame`,
/// then exactly one `commit`. Nothing may be written after `commit`.
pub trait FrameSink {
    fn write_loop_extension(&mut self, ext: &LoopExtension) -> GifcapResult<()>;
    fn advance_frame(&mut self) -> GifcapResult<()>;
    fn write_frame(&mut self, frame: &SinkFrame<'_>) -> GifcapResult<()>;
    fn commit(&mut self) -> GifcapResult<()>;
}

/// [`FrameSink`] writing an animated GIF file through the `image` crate.
pub struct GifFileSink {
    encoder: Option<image::codecs::gif::GifEncoder<BufWriter<File>>>,
    file: Option<File>,
    path: PathBuf,
}

// image's default (1) is painfully slow for screen-sized frames; 10 is the
// crate's own recommended middle ground.
const QUANTIZATION_SPEED: i32 = 10;

impl GifFileSink {
    pub fn create(path: impl Into<PathBuf>) -> GifcapResult<Self> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("failed to create output file '{}'", path.display()))?;
        let handle = file
            .try_clone()
            .with_context(|| format!("failed to clone handle for '{}'", path.display()))?;
        let encoder =
            image::codecs::gif::GifEncoder::new_with_speed(BufWriter::new(file), QUANTIZATION_SPEED);
        Ok(Self {
            encoder: Some(encoder),
            file: Some(handle),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encoder_mut(
        &mut self,
    ) -> GifcapResult<&mut image::codecs::gif::GifEncoder<BufWriter<File>>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| GifcapError::encode("gif sink already committed"))
    }
}

impl FrameSink for GifFileSink {
    fn write_loop_extension(&mut self, ext: &LoopExtension) -> GifcapResult<()> {
        if *ext != LoopExtension::default() {
            return Err(GifcapError::validation(
                "only the NETSCAPE2.0 loop-forever extension is supported",
            ));
        }
        self.encoder_mut()?
            .set_repeat(Repeat::Infinite)
            .map_err(|e| GifcapError::encode(format!("failed to write loop extension: {e}")))
    }

    fn advance_frame(&mut self) -> GifcapResult<()> {
        // Frame advance is implicit in sequential GIF encoding; the call only
        // checks that the sink is still open.
        self.encoder_mut().map(|_| ())
    }

    fn write_frame(&mut self, frame: &SinkFrame<'_>) -> GifcapResult<()> {
        let width = u32::from(frame.width);
        let height = u32::from(frame.height);
        let expected = width as usize * height as usize * 4;
        if frame.bgra.len() != expected {
            return Err(GifcapError::validation(format!(
                "frame pixel buffer is {} bytes, expected {expected} for {width}x{height}",
                frame.bgra.len()
            )));
        }

        let mut rgba = frame.bgra.to_vec();
        for px in rgba.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        let buffer = image::RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| GifcapError::encode("pixel buffer does not match frame dimensions"))?;

        let delay =
            image::Delay::from_numer_denom_ms(u32::from(frame.duration_ticks) * 10, 1);
        let out = image::Frame::from_parts(
            buffer,
            u32::from(frame.left),
            u32::from(frame.top),
            delay,
        );
        self.encoder_mut()?
            .encode_frame(out)
            .map_err(|e| GifcapError::encode(format!("failed to encode gif frame: {e}")))
    }

    fn commit(&mut self) -> GifcapResult<()> {
        if self.encoder.is_none() {
            return Err(GifcapError::encode("gif sink already committed"));
        }
        // Dropping the encoder writes the trailer and flushes the writer.
        self.encoder = None;
        if let Some(file) = self.file.take() {
            file.sync_all()
                .with_context(|| format!("failed to sync '{}'", self.path.display()))?;
        }
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> GifcapResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_extension_default_is_netscape() {
        let ext = LoopExtension::default();
        assert_eq!(&ext.application, b"NETSCAPE2.0");
        assert_eq!(ext.data, [3, 1, 0, 0, 0]);
    }

    #[test]
    fn write_after_commit_fails() {
        let path = std::env::temp_dir().join(format!(
            "gifcap_sink_commit_{}.gif",
            std::process::id()
        ));
        let mut sink = GifFileSink::create(&path).unwrap();
        sink.write_loop_extension(&LoopExtension::default()).unwrap();
        sink.write_frame(&SinkFrame {
            duration_ticks: 10,
            left: 0,
            top: 0,
            width: 2,
            height: 2,
            bgra: &[0u8; 16],
        })
        .unwrap();
        sink.commit().unwrap();

        assert!(sink.advance_frame().is_err());
        assert!(sink.commit().is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let path = std::env::temp_dir().join(format!(
            "gifcap_sink_mismatch_{}.gif",
            std::process::id()
        ));
        let mut sink = GifFileSink::create(&path).unwrap();
        let err = sink
            .write_frame(&SinkFrame {
                duration_ticks: 1,
                left: 0,
                top: 0,
                width: 3,
                height: 3,
                bgra: &[0u8; 16],
            })
            .unwrap_err();
        assert!(err.to_string().contains("validation error"));
        let _ = std::fs::remove_file(&path);
    }
}
