pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod source;
pub mod camera;
pub mod decoder;
pub mod session;
pub mod sink;
pub mod history;
pub mod scanner;

pub use config::QrScanConfig;
pub use error::{
    AcquireError, DecodeError, EventBusError, HistoryError, QrScanError, Result, SessionFailure,
    StreamError,
};
pub use events::{EventBus, ScannerEvent};
pub use frame::{DecodedPayload, PixelBuffer, Point, Quad};
pub use source::{AcquireRequest, CameraFacing, CameraProvider, FrameSource};
pub use camera::{PlatformCamera, PlatformSource, SyntheticCamera, SyntheticSource};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use camera::{V4l2Camera, V4l2Source};
pub use decoder::{QrDecoder, RqrrDecoder};
pub use session::{ScanSession, SessionHandle, SessionState};
pub use sink::{BusSink, Classification, CollectSink, ResultSink};
pub use history::{HistoryEntry, HistoryRecorder, ScanHistory};
pub use scanner::ScanOrchestrator;
