//! Camera frame buffer, JPEG encoding, and preview resize

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, RgbImage};

/// JPEG quality for the video channel payload.
pub const JPEG_QUALITY: u8 = 75;

/// Preview dimensions handed back to the vehicle runtime each drive cycle.
pub const PREVIEW_WIDTH: u32 = 160;
pub const PREVIEW_HEIGHT: u32 = 120;

/// A single raw camera frame, 8 bits per channel, tightly packed RGB.
///
/// This is the only pixel format that crosses the crate boundary. The
/// vehicle runtime hands frames in per drive cycle; the video channel
/// encodes them to JPEG before they touch the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Packed RGB8 pixel data, `width * height * 3` bytes
    pub rgb: Vec<u8>,
}

impl CameraFrame {
    /// Create a frame from packed RGB8 data.
    ///
    /// Fails if the buffer length does not match the dimensions.
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            bail!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb8",
                rgb.len(),
                expected,
                width,
                height
            );
        }
        Ok(Self { width, height, rgb })
    }

    /// Create a frame from float pixel data, clamping each sample to 8 bits.
    ///
    /// Simulated cameras produce float arrays in the 0.0..=255.0 range;
    /// out-of-range samples are clamped rather than wrapped.
    pub fn from_float_rgb(width: u32, height: u32, samples: &[f32]) -> Result<Self> {
        let rgb = samples
            .iter()
            .map(|s| s.clamp(0.0, 255.0) as u8)
            .collect();
        Self::new(width, height, rgb)
    }

    /// Encode to a JPEG payload suitable for one binary video message.
    pub fn encode_jpeg(&self) -> Result<Bytes> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder
            .encode(&self.rgb, self.width, self.height, ExtendedColorType::Rgb8)
            .context("jpeg encode failed")?;
        Ok(Bytes::from(out))
    }

    /// Bilinear resize, used for the drive-cycle preview output.
    pub fn resize(&self, width: u32, height: u32) -> Result<CameraFrame> {
        let src = RgbImage::from_raw(self.width, self.height, self.rgb.clone())
            .context("frame buffer does not match its dimensions")?;
        let scaled = imageops::resize(&src, width, height, FilterType::Triangle);
        Ok(CameraFrame {
            width,
            height,
            rgb: scaled.into_raw(),
        })
    }
}
