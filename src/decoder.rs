use crate::error::DecodeError;
use crate::frame::{DecodedPayload, PixelBuffer, Point, Quad};
use tracing::trace;

/// QR decoder adapter.
///
/// Implementations scan one RGBA frame per call and report a hit or a miss.
/// A frame without a decodable symbol — all black, washed out, partially in
/// view — is a miss, never an error; the only error is a pixel buffer whose
/// length does not match the stated dimensions, which is a caller bug.
pub trait QrDecoder: Send {
    /// Adapter identifier for logs.
    fn name(&self) -> &'static str;

    /// Scan one frame. `pixels` must hold `width * height * 4` bytes of
    /// tightly packed RGBA.
    fn decode(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<DecodedPayload>, DecodeError>;
}

/// Validate an RGBA buffer against its stated dimensions.
pub(crate) fn check_buffer(pixels: &[u8], width: u32, height: u32) -> Result<(), DecodeError> {
    let expected = PixelBuffer::expected_len(width, height);
    if pixels.len() != expected {
        return Err(DecodeError::InvalidFrameBuffer {
            width,
            height,
            expected,
            actual: pixels.len(),
        });
    }
    Ok(())
}

/// Adapter over the `rqrr` decoder.
///
/// Feeds rqrr a greyscale view of the RGBA frame and returns the first grid
/// that decodes. Grids that are detected but fail to decode (damaged or
/// glancing symbols) count as misses for the frame.
#[derive(Debug, Default)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    pub fn new() -> Self {
        Self
    }
}

#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    // ITU-R BT.601 integer approximation
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

impl QrDecoder for RqrrDecoder {
    fn name(&self) -> &'static str {
        "rqrr"
    }

    fn decode(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<DecodedPayload>, DecodeError> {
        check_buffer(pixels, width, height)?;

        if width == 0 || height == 0 {
            return Ok(None);
        }

        let w = width as usize;
        let h = height as usize;
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| {
            let i = (y * w + x) * 4;
            luma(pixels[i], pixels[i + 1], pixels[i + 2])
        });

        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_meta, text)) => {
                    let points = grid.bounds.map(|p| Point { x: p.x, y: p.y });
                    return Ok(Some(DecodedPayload::new(text, Some(Quad { points }))));
                }
                Err(err) => {
                    trace!(error = %err, "grid candidate failed to decode");
                }
            }
        }

        Ok(None)
    }
}
