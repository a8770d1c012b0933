use crate::config::CameraConfig;
use crate::error::{AcquireError, StreamError};
use crate::frame::PixelBuffer;
use crate::source::{AcquireRequest, CameraProvider, FrameSource};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Device paths with this prefix select the synthetic camera regardless of
/// platform support, mirroring how test deployments address fake hardware.
pub const STUB_DEVICE_PREFIX: &str = "stub://";

/// Camera provider producing generated frames.
///
/// Used when the `camera` feature is off, on platforms without V4L2, for
/// `stub://` device paths, and in tests. The source reports not-ready for a
/// configurable number of polls first, imitating real camera start-up.
pub struct SyntheticCamera {
    warmup_frames: u32,
}

impl SyntheticCamera {
    pub fn new(warmup_frames: u32) -> Self {
        Self { warmup_frames }
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl CameraProvider for SyntheticCamera {
    type Source = SyntheticSource;

    fn is_available(&self) -> bool {
        true
    }

    async fn acquire(&mut self, request: &AcquireRequest) -> Result<SyntheticSource, AcquireError> {
        debug!(
            facing = ?request.facing,
            width = request.ideal_width,
            height = request.ideal_height,
            "synthetic camera acquired"
        );
        Ok(SyntheticSource {
            width: request.ideal_width,
            height: request.ideal_height,
            warmup_remaining: self.warmup_frames,
            frame_counter: 0,
            released: false,
        })
    }
}

/// Generated frame stream. Produces a moving color gradient; it never
/// contains a decodable QR symbol, so scan sessions against it exercise the
/// steady-state miss path.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    warmup_remaining: u32,
    frame_counter: u64,
    released: bool,
}

impl FrameSource for SyntheticSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn has_usable_frame(&mut self) -> Result<bool, StreamError> {
        if self.released {
            return Err(StreamError::Terminated {
                details: "synthetic source already released".to_string(),
            });
        }
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn copy_into(
        &mut self,
        buffer: &mut [u8],
        width: u32,
        height: u32,
    ) -> Result<(), StreamError> {
        let expected = PixelBuffer::expected_len(width, height);
        if buffer.len() != expected {
            return Err(StreamError::Playback {
                details: format!(
                    "buffer length mismatch: expected {}, got {}",
                    expected,
                    buffer.len()
                ),
            });
        }

        // Moving gradient keyed off the frame counter, same trick the mock
        // capture loop uses to make consecutive frames distinguishable.
        let phase = (self.frame_counter % 256) as u8;
        for (i, pixel) in buffer.chunks_exact_mut(4).enumerate() {
            pixel[0] = phase.wrapping_add((i % 251) as u8);
            pixel[1] = 128;
            pixel[2] = 255u8.wrapping_sub(phase);
            pixel[3] = 255;
        }
        self.frame_counter += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
mod v4l2 {
    use super::*;
    use crate::source::CameraFacing;
    use ouroboros::self_referencing;
    use std::path::{Path, PathBuf};
    use v4l::buffer::Type;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;

    /// Pixel formats the V4L2 source can normalize to RGBA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum CaptureFormat {
        Rgb24,
        Yuyv,
        Mjpeg,
    }

    impl CaptureFormat {
        fn from_fourcc(fourcc: v4l::FourCC) -> Option<Self> {
            match fourcc.str() {
                Ok("RGB3") => Some(CaptureFormat::Rgb24),
                Ok("YUYV") => Some(CaptureFormat::Yuyv),
                Ok("MJPG") => Some(CaptureFormat::Mjpeg),
                _ => None,
            }
        }

        fn fourcc(self) -> v4l::FourCC {
            match self {
                CaptureFormat::Rgb24 => v4l::FourCC::new(b"RGB3"),
                CaptureFormat::Yuyv => v4l::FourCC::new(b"YUYV"),
                CaptureFormat::Mjpeg => v4l::FourCC::new(b"MJPG"),
            }
        }
    }

    #[self_referencing]
    struct StreamState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    /// V4L2 camera provider.
    ///
    /// Opens the configured device node, falling back to the first
    /// /dev/video* node if the configured one is absent. The facing hint is
    /// ignored: V4L2 does not expose camera orientation.
    pub struct V4l2Camera {
        device: String,
        fps: u32,
    }

    impl V4l2Camera {
        pub fn new(device: impl Into<String>, fps: u32) -> Self {
            Self {
                device: device.into(),
                fps,
            }
        }

        fn resolve_device(&self) -> Option<PathBuf> {
            let configured = Path::new(&self.device);
            if configured.exists() {
                return Some(configured.to_path_buf());
            }
            let mut nodes: Vec<PathBuf> = std::fs::read_dir("/dev")
                .ok()?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .map(|name| name.starts_with("video"))
                        .unwrap_or(false)
                })
                .collect();
            nodes.sort();
            nodes.into_iter().next()
        }
    }

    fn open_error(path: &Path, err: std::io::Error) -> AcquireError {
        let details = format!("{}: {}", path.display(), err);
        match err.kind() {
            std::io::ErrorKind::NotFound => AcquireError::DeviceNotFound { details },
            std::io::ErrorKind::PermissionDenied => AcquireError::PermissionDenied { details },
            _ => AcquireError::DeviceUnsupported { details },
        }
    }

    #[async_trait]
    impl CameraProvider for V4l2Camera {
        type Source = V4l2Source;

        fn is_available(&self) -> bool {
            self.resolve_device().is_some()
        }

        async fn acquire(&mut self, request: &AcquireRequest) -> Result<V4l2Source, AcquireError> {
            let path = self.resolve_device().ok_or_else(|| AcquireError::DeviceNotFound {
                details: format!(
                    "{} is missing and no /dev/video* node is present",
                    self.device
                ),
            })?;

            if request.facing != CameraFacing::Rear {
                debug!(facing = ?request.facing, "facing hint not supported by V4L2");
            }

            let device =
                v4l::Device::with_path(&path).map_err(|err| open_error(&path, err))?;

            let mut format = device.format().map_err(|err| AcquireError::DeviceUnsupported {
                details: format!("failed to read format on {}: {}", path.display(), err),
            })?;
            format.width = request.ideal_width;
            format.height = request.ideal_height;

            let mut negotiated = None;
            for candidate in [CaptureFormat::Rgb24, CaptureFormat::Mjpeg, CaptureFormat::Yuyv] {
                format.fourcc = candidate.fourcc();
                match device.set_format(&format) {
                    Ok(actual) => {
                        if let Some(supported) = CaptureFormat::from_fourcc(actual.fourcc) {
                            negotiated = Some((actual, supported));
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(
                            format = ?candidate,
                            error = %err,
                            "format rejected by driver"
                        );
                    }
                }
            }

            let (actual, capture_format) =
                negotiated.ok_or_else(|| AcquireError::DeviceUnsupported {
                    details: format!(
                        "{} offers none of RGB3/MJPG/YUYV",
                        path.display()
                    ),
                })?;

            if actual.width != request.ideal_width || actual.height != request.ideal_height {
                warn!(
                    "Camera resolution adjusted by driver: requested {}x{}, got {}x{}",
                    request.ideal_width, request.ideal_height, actual.width, actual.height
                );
            }

            if self.fps > 0 {
                let params = v4l::video::capture::Parameters::with_fps(self.fps);
                if let Err(err) = device.set_params(&params) {
                    warn!(fps = self.fps, error = %err, "failed to set frame rate");
                }
            }

            let mut state = StreamStateTryBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                },
            }
            .try_build()
            .map_err(|err| AcquireError::DeviceUnsupported {
                details: format!("failed to start capture stream: {}", err),
            })?;

            // Pull one frame so the caller sees a stream whose playback has
            // actually begun, the moral equivalent of waiting for play().
            let first = state
                .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
                .map_err(|err| AcquireError::DeviceUnsupported {
                    details: format!("stream delivered no frame: {}", err),
                })?;

            info!(
                device = %path.display(),
                width = actual.width,
                height = actual.height,
                format = ?capture_format,
                "camera stream acquired"
            );

            Ok(V4l2Source {
                state: Some(state),
                width: actual.width,
                height: actual.height,
                format: capture_format,
                device_path: path.display().to_string(),
                pending: Some(first),
            })
        }
    }

    /// Live V4L2 capture stream normalized to RGBA.
    pub struct V4l2Source {
        state: Option<StreamState>,
        width: u32,
        height: u32,
        format: CaptureFormat,
        device_path: String,
        pending: Option<Vec<u8>>,
    }

    impl FrameSource for V4l2Source {
        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn has_usable_frame(&mut self) -> Result<bool, StreamError> {
            let Some(state) = self.state.as_mut() else {
                return Err(StreamError::Terminated {
                    details: "capture stream already released".to_string(),
                });
            };
            match state.with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec())) {
                Ok(bytes) => {
                    self.pending = Some(bytes);
                    Ok(true)
                }
                Err(err) => Err(StreamError::Terminated {
                    details: format!("{}: {}", self.device_path, err),
                }),
            }
        }

        fn copy_into(
            &mut self,
            buffer: &mut [u8],
            width: u32,
            height: u32,
        ) -> Result<(), StreamError> {
            let Some(raw) = self.pending.take() else {
                return Err(StreamError::Playback {
                    details: "no frame pending copy".to_string(),
                });
            };
            convert_to_rgba(&raw, self.format, width, height, buffer)
        }

        fn release(&mut self) {
            if self.state.take().is_some() {
                debug!(device = %self.device_path, "camera stream released");
            }
        }
    }

    fn convert_to_rgba(
        src: &[u8],
        format: CaptureFormat,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<(), StreamError> {
        let pixels = width as usize * height as usize;
        if out.len() != pixels * 4 {
            return Err(StreamError::Playback {
                details: format!(
                    "output buffer length mismatch: expected {}, got {}",
                    pixels * 4,
                    out.len()
                ),
            });
        }

        match format {
            CaptureFormat::Rgb24 => {
                // Drivers may pad the tail of the buffer; only the packed
                // pixel region is meaningful.
                if src.len() < pixels * 3 {
                    return Err(StreamError::Playback {
                        details: format!(
                            "RGB frame too short: expected {}, got {}",
                            pixels * 3,
                            src.len()
                        ),
                    });
                }
                for i in 0..pixels {
                    out[i * 4] = src[i * 3];
                    out[i * 4 + 1] = src[i * 3 + 1];
                    out[i * 4 + 2] = src[i * 3 + 2];
                    out[i * 4 + 3] = 255;
                }
                Ok(())
            }
            CaptureFormat::Yuyv => yuyv_to_rgba(src, width, height, out),
            CaptureFormat::Mjpeg => {
                let decoded = image::load_from_memory(src).map_err(|err| {
                    StreamError::Playback {
                        details: format!("MJPEG decode failed: {}", err),
                    }
                })?;
                if decoded.width() != width || decoded.height() != height {
                    return Err(StreamError::Playback {
                        details: format!(
                            "MJPEG frame is {}x{}, stream negotiated {}x{}",
                            decoded.width(),
                            decoded.height(),
                            width,
                            height
                        ),
                    });
                }
                out.copy_from_slice(decoded.to_rgba8().as_raw());
                Ok(())
            }
        }
    }

    fn yuyv_to_rgba(src: &[u8], width: u32, height: u32, out: &mut [u8]) -> Result<(), StreamError> {
        let pixels = width as usize * height as usize;
        if src.len() < pixels * 2 {
            return Err(StreamError::Playback {
                details: format!(
                    "YUYV frame too short: expected {}, got {}",
                    pixels * 2,
                    src.len()
                ),
            });
        }

        for i in 0..pixels / 2 {
            let chunk = &src[i * 4..i * 4 + 4];
            let y0 = chunk[0] as f32;
            let u = chunk[1] as f32 - 128.0;
            let y1 = chunk[2] as f32;
            let v = chunk[3] as f32 - 128.0;

            for (slot, y) in [(i * 2, y0), (i * 2 + 1, y1)] {
                let r = y + 1.402_f32 * v;
                let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
                let b = y + 1.772_f32 * u;
                out[slot * 4] = clamp_to_u8(r);
                out[slot * 4 + 1] = clamp_to_u8(g);
                out[slot * 4 + 2] = clamp_to_u8(b);
                out[slot * 4 + 3] = 255;
            }
        }
        Ok(())
    }

    fn clamp_to_u8(value: f32) -> u8 {
        value.round().clamp(0.0, 255.0) as u8
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use v4l2::{V4l2Camera, V4l2Source};

/// Camera provider selected for this platform and configuration.
pub enum PlatformCamera {
    Synthetic(SyntheticCamera),
    #[cfg(all(feature = "camera", target_os = "linux"))]
    V4l2(V4l2Camera),
}

/// Frame source produced by `PlatformCamera`.
pub enum PlatformSource {
    Synthetic(SyntheticSource),
    #[cfg(all(feature = "camera", target_os = "linux"))]
    V4l2(V4l2Source),
}

impl PlatformCamera {
    /// Pick a provider for the configured device.
    ///
    /// `stub://` device paths always select the synthetic camera; otherwise
    /// V4L2 is used where built in, with a synthetic fallback elsewhere.
    pub fn from_config(config: &CameraConfig) -> Self {
        if config.device.starts_with(STUB_DEVICE_PREFIX) {
            info!(device = %config.device, "using synthetic camera");
            return PlatformCamera::Synthetic(SyntheticCamera::new(config.stub_warmup_frames));
        }

        #[cfg(all(feature = "camera", target_os = "linux"))]
        {
            PlatformCamera::V4l2(V4l2Camera::new(config.device.clone(), config.fps))
        }

        #[cfg(not(all(feature = "camera", target_os = "linux")))]
        {
            warn!("V4L2 capture is not available in this build, using synthetic camera");
            PlatformCamera::Synthetic(SyntheticCamera::new(config.stub_warmup_frames))
        }
    }
}

#[async_trait]
impl CameraProvider for PlatformCamera {
    type Source = PlatformSource;

    fn is_available(&self) -> bool {
        match self {
            PlatformCamera::Synthetic(camera) => camera.is_available(),
            #[cfg(all(feature = "camera", target_os = "linux"))]
            PlatformCamera::V4l2(camera) => camera.is_available(),
        }
    }

    async fn acquire(&mut self, request: &AcquireRequest) -> Result<PlatformSource, AcquireError> {
        match self {
            PlatformCamera::Synthetic(camera) => {
                camera.acquire(request).await.map(PlatformSource::Synthetic)
            }
            #[cfg(all(feature = "camera", target_os = "linux"))]
            PlatformCamera::V4l2(camera) => {
                camera.acquire(request).await.map(PlatformSource::V4l2)
            }
        }
    }
}

impl FrameSource for PlatformSource {
    fn dimensions(&self) -> (u32, u32) {
        match self {
            PlatformSource::Synthetic(source) => source.dimensions(),
            #[cfg(all(feature = "camera", target_os = "linux"))]
            PlatformSource::V4l2(source) => source.dimensions(),
        }
    }

    fn has_usable_frame(&mut self) -> Result<bool, StreamError> {
        match self {
            PlatformSource::Synthetic(source) => source.has_usable_frame(),
            #[cfg(all(feature = "camera", target_os = "linux"))]
            PlatformSource::V4l2(source) => source.has_usable_frame(),
        }
    }

    fn copy_into(
        &mut self,
        buffer: &mut [u8],
        width: u32,
        height: u32,
    ) -> Result<(), StreamError> {
        match self {
            PlatformSource::Synthetic(source) => source.copy_into(buffer, width, height),
            #[cfg(all(feature = "camera", target_os = "linux"))]
            PlatformSource::V4l2(source) => source.copy_into(buffer, width, height),
        }
    }

    fn release(&mut self) {
        match self {
            PlatformSource::Synthetic(source) => source.release(),
            #[cfg(all(feature = "camera", target_os = "linux"))]
            PlatformSource::V4l2(source) => source.release(),
        }
    }
}
