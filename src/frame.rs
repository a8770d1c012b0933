use serde::{Deserialize, Serialize};

/// Bytes per pixel for the RGBA buffers the scan loop hands to the decoder.
pub const BYTES_PER_PIXEL: usize = 4;

/// A pixel position in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Quadrilateral outlining a located QR symbol, corner order as reported by
/// the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quad {
    pub points: [Point; 4],
}

/// The immutable result of one successful decode.
///
/// `corners` is best-effort geometry; decoders that cannot locate the symbol
/// outline still produce a valid payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedPayload {
    pub text: String,
    pub corners: Option<Quad>,
}

impl DecodedPayload {
    pub fn new(text: impl Into<String>, corners: Option<Quad>) -> Self {
        Self {
            text: text.into(),
            corners,
        }
    }
}

/// Reusable RGBA scratch buffer the session copies camera frames into.
///
/// The buffer tracks the dimensions it was last sized for so a stale resize
/// is detectable as a programming error rather than a silent garbage decode.
#[derive(Debug, Clone, Default)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected byte length of an RGBA buffer for the given dimensions.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Resize the buffer for a frame of the given dimensions, zero-filling
    /// any newly grown region. Cheap when dimensions are unchanged.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            self.data.resize(Self::expected_len(width, height), 0);
            self.width = width;
            self.height = height;
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Validate the buffer length against its recorded dimensions.
    pub fn validate_size(&self) -> bool {
        self.data.len() == Self::expected_len(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_len() {
        assert_eq!(PixelBuffer::expected_len(0, 0), 0);
        assert_eq!(PixelBuffer::expected_len(640, 480), 640 * 480 * 4);
    }

    #[test]
    fn test_resize_tracks_dimensions() {
        let mut buffer = PixelBuffer::new();
        assert!(buffer.validate_size());

        buffer.resize(320, 240);
        assert_eq!(buffer.width(), 320);
        assert_eq!(buffer.height(), 240);
        assert_eq!(buffer.data().len(), 320 * 240 * 4);
        assert!(buffer.validate_size());

        // Shrinking keeps the invariant too.
        buffer.resize(16, 16);
        assert_eq!(buffer.data().len(), 16 * 16 * 4);
        assert!(buffer.validate_size());
    }

    #[test]
    fn test_payload_equality_ignores_nothing() {
        let a = DecodedPayload::new("ABC123", None);
        let b = DecodedPayload::new("ABC123", None);
        assert_eq!(a, b);

        let quad = Quad {
            points: [
                Point { x: 0, y: 0 },
                Point { x: 10, y: 0 },
                Point { x: 10, y: 10 },
                Point { x: 0, y: 10 },
            ],
        };
        let c = DecodedPayload::new("ABC123", Some(quad));
        assert_ne!(a, c);
    }
}
