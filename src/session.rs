use crate::decoder::QrDecoder;
use crate::error::SessionFailure;
use crate::frame::{DecodedPayload, PixelBuffer};
use crate::sink::ResultSink;
use crate::source::{AcquireRequest, CameraProvider, FrameSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Scan session lifecycle states.
///
/// `Decoded`, `Stopped` and `Failed` are terminal: the session performs no
/// further autonomous transitions until `start()` is called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Acquiring,
    Scanning,
    Decoded,
    Stopped,
    Failed(SessionFailure),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Decoded | SessionState::Stopped | SessionState::Failed(_)
        )
    }
}

/// Cloneable stop handle for a scan session.
///
/// Setting the flag from a signal handler or another task is observed at the
/// top of the session's next tick; the session itself releases resources.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    stop: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Request cooperative cancellation of the session.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }
}

/// Outcome of polling the frame source for one tick.
enum FramePoll {
    NotReady,
    Copied { width: u32, height: u32 },
    Broken(SessionFailure),
}

/// The scan-session controller.
///
/// Owns the capture→decode→result state machine: acquires a frame source
/// from the camera provider, polls one frame per scheduling tick, runs the
/// decoder on it, and hands the first decoded payload to the result sink
/// exactly once. Single-threaded and cooperative — `tick()` is driven by an
/// external scheduler and never overlaps itself.
///
/// Invariant: a frame source is held only in `Acquiring` and `Scanning`;
/// every terminal transition releases it exactly once.
pub struct ScanSession<P, D, S>
where
    P: CameraProvider,
    D: QrDecoder,
    S: ResultSink,
{
    provider: P,
    decoder: D,
    sink: S,
    request: AcquireRequest,
    state: SessionState,
    source: Option<P::Source>,
    handle: SessionHandle,
    attempts: u64,
    last_payload: Option<DecodedPayload>,
    scratch: PixelBuffer,
}

impl<P, D, S> ScanSession<P, D, S>
where
    P: CameraProvider,
    D: QrDecoder,
    S: ResultSink,
{
    pub fn new(provider: P, decoder: D, sink: S, request: AcquireRequest) -> Self {
        Self {
            provider,
            decoder,
            sink,
            request,
            state: SessionState::Idle,
            source: None,
            handle: SessionHandle::default(),
            attempts: 0,
            last_payload: None,
            scratch: PixelBuffer::new(),
        }
    }

    /// Get a cloneable handle for stopping this session from elsewhere.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of decode attempts made by the current session. Diagnostic.
    pub fn decode_attempts(&self) -> u64 {
        self.attempts
    }

    /// The payload decoded by the current session, if it reached `Decoded`.
    pub fn payload(&self) -> Option<&DecodedPayload> {
        self.last_payload.as_ref()
    }

    /// Start scanning: acquire a frame source and enter the poll loop.
    ///
    /// Starting while a session is live implicitly stops it first (the prior
    /// source is released, no payload is emitted). Restarting from a terminal
    /// state resets the decode counter and clears the previous payload, so a
    /// stale result can never be re-delivered.
    ///
    /// On `Err` the session is in `Failed` with the returned kind.
    pub async fn start(&mut self) -> Result<(), SessionFailure> {
        if !self.state.is_terminal() && self.state != SessionState::Idle {
            debug!("start() while a session is live, stopping it first");
            self.release_source();
            self.state = SessionState::Stopped;
        }

        self.handle.clear();
        self.attempts = 0;
        self.last_payload = None;

        if !self.provider.is_available() {
            return Err(self.fail(SessionFailure::CameraUnavailable));
        }

        self.state = SessionState::Acquiring;
        debug!(
            facing = ?self.request.facing,
            ideal_width = self.request.ideal_width,
            ideal_height = self.request.ideal_height,
            "acquiring camera stream"
        );

        match self.provider.acquire(&self.request).await {
            Ok(source) => {
                if self.handle.is_stop_requested() {
                    // stop() raced the resolving acquisition: release the
                    // freshly opened stream without ever polling it.
                    self.source = Some(source);
                    self.release_source();
                    self.state = SessionState::Stopped;
                    info!("scan session stopped during acquisition");
                    return Ok(());
                }

                let (width, height) = source.dimensions();
                if width == 0 || height == 0 {
                    self.source = Some(source);
                    return Err(self.fail(SessionFailure::PlaybackFailed));
                }

                self.source = Some(source);
                self.state = SessionState::Scanning;
                info!(width, height, "scan session entering poll loop");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "camera acquisition refused");
                Err(self.fail(err.failure_kind()))
            }
        }
    }

    /// Request cancellation and release resources immediately.
    ///
    /// Safe to call from within a tick callback and in any state; stopping a
    /// terminal session is a no-op. An in-flight decode that completes after
    /// this call is discarded.
    pub fn stop(&mut self) {
        self.handle.stop();
        if matches!(
            self.state,
            SessionState::Acquiring | SessionState::Scanning
        ) {
            self.release_source();
            self.state = SessionState::Stopped;
            info!("scan session stopped");
        }
    }

    /// Run one scheduling tick of the poll loop.
    ///
    /// In `Scanning` this polls the frame source and attempts at most one
    /// decode. In every other state it is a no-op, which is what discards a
    /// late decode after a stop request. Returns the state after the tick.
    pub fn tick(&mut self) -> SessionState {
        if self.handle.is_stop_requested()
            && matches!(
                self.state,
                SessionState::Acquiring | SessionState::Scanning
            )
        {
            self.release_source();
            self.state = SessionState::Stopped;
            info!("scan session stopped");
            return self.state;
        }

        if self.state != SessionState::Scanning {
            return self.state;
        }

        let poll = match self.source.as_mut() {
            None => FramePoll::Broken(SessionFailure::StreamTerminated),
            Some(source) => match source.has_usable_frame() {
                Ok(false) => FramePoll::NotReady,
                Ok(true) => {
                    let (width, height) = source.dimensions();
                    self.scratch.resize(width, height);
                    match source.copy_into(self.scratch.data_mut(), width, height) {
                        Ok(()) => FramePoll::Copied { width, height },
                        Err(err) => {
                            warn!(error = %err, "frame copy failed");
                            FramePoll::Broken(err.failure_kind())
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "frame source lost");
                    FramePoll::Broken(err.failure_kind())
                }
            },
        };

        match poll {
            FramePoll::NotReady => {
                trace!("no usable frame yet, skipping decode");
            }
            FramePoll::Broken(kind) => {
                self.fail(kind);
            }
            FramePoll::Copied { width, height } => {
                self.attempts += 1;
                match self.decoder.decode(self.scratch.data(), width, height) {
                    Ok(None) => {
                        trace!(attempt = self.attempts, "decode miss");
                    }
                    Ok(Some(payload)) => {
                        // Release before emitting so the sink observes a
                        // session that has already let go of the camera.
                        self.release_source();
                        self.state = SessionState::Decoded;
                        info!(
                            attempts = self.attempts,
                            chars = payload.text.len(),
                            "decode hit"
                        );
                        self.last_payload = Some(payload.clone());
                        self.sink.on_result(&payload);
                    }
                    Err(err) => {
                        warn!(error = %err, decoder = self.decoder.name(), "decoder rejected frame buffer");
                        self.fail(SessionFailure::InvalidFrameBuffer);
                    }
                }
            }
        }

        self.state
    }

    /// Transition to `Failed`, releasing any held source. The kind is
    /// reported once here, not per tick.
    fn fail(&mut self, kind: SessionFailure) -> SessionFailure {
        self.release_source();
        self.state = SessionState::Failed(kind);
        error!("scan session failed: {}", kind);
        kind
    }

    fn release_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            debug!("frame source released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AcquireError, DecodeError, StreamError};
    use crate::sink::CollectSink;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedSource {
        width: u32,
        height: u32,
        /// Per-tick `has_usable_frame` results; exhausted queue means ready.
        readiness: VecDeque<Result<bool, StreamError>>,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(width: u32, height: u32, releases: Arc<AtomicUsize>) -> Self {
            Self {
                width,
                height,
                readiness: VecDeque::new(),
                releases,
            }
        }

        fn not_ready_for(mut self, ticks: usize) -> Self {
            for _ in 0..ticks {
                self.readiness.push_back(Ok(false));
            }
            self
        }

        fn then_terminated(mut self) -> Self {
            self.readiness.push_back(Err(StreamError::Terminated {
                details: "scripted".to_string(),
            }));
            self
        }
    }

    impl FrameSource for ScriptedSource {
        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn has_usable_frame(&mut self) -> Result<bool, StreamError> {
            self.readiness.pop_front().unwrap_or(Ok(true))
        }

        fn copy_into(
            &mut self,
            buffer: &mut [u8],
            _width: u32,
            _height: u32,
        ) -> Result<(), StreamError> {
            buffer.fill(0x7f);
            Ok(())
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedProvider {
        available: bool,
        sources: VecDeque<ScriptedSource>,
        refusal: Option<AcquireError>,
        /// When set, simulates a stop() arriving while acquisition is pending.
        stop_during_acquire: Option<SessionHandle>,
        acquire_calls: usize,
    }

    impl ScriptedProvider {
        fn with_source(source: ScriptedSource) -> Self {
            Self {
                available: true,
                sources: VecDeque::from([source]),
                refusal: None,
                stop_during_acquire: None,
                acquire_calls: 0,
            }
        }

        fn refusing(refusal: AcquireError) -> Self {
            Self {
                available: true,
                sources: VecDeque::new(),
                refusal: Some(refusal),
                stop_during_acquire: None,
                acquire_calls: 0,
            }
        }

        fn unavailable() -> Self {
            Self {
                available: false,
                sources: VecDeque::new(),
                refusal: None,
                stop_during_acquire: None,
                acquire_calls: 0,
            }
        }
    }

    #[async_trait]
    impl CameraProvider for ScriptedProvider {
        type Source = ScriptedSource;

        fn is_available(&self) -> bool {
            self.available
        }

        async fn acquire(
            &mut self,
            _request: &AcquireRequest,
        ) -> Result<Self::Source, AcquireError> {
            self.acquire_calls += 1;
            if let Some(handle) = self.stop_during_acquire.take() {
                handle.stop();
            }
            if let Some(refusal) = self.refusal.take() {
                return Err(refusal);
            }
            Ok(self.sources.pop_front().expect("no scripted source left"))
        }
    }

    struct ScriptedDecoder {
        /// Per-call results; exhausted queue means miss.
        results: VecDeque<Result<Option<DecodedPayload>, DecodeError>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedDecoder {
        fn missing() -> Self {
            Self {
                results: VecDeque::new(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn misses_then_hit(misses: usize, text: &str) -> Self {
            let mut results = VecDeque::new();
            for _ in 0..misses {
                results.push_back(Ok(None));
            }
            results.push_back(Ok(Some(DecodedPayload::new(text, None))));
            Self {
                results,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn hits(texts: &[&str]) -> Self {
            let results = texts
                .iter()
                .map(|t| Ok(Some(DecodedPayload::new(*t, None))))
                .collect();
            Self {
                results,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl QrDecoder for ScriptedDecoder {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn decode(
            &mut self,
            _pixels: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Option<DecodedPayload>, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.pop_front().unwrap_or(Ok(None))
        }
    }

    fn session_with(
        provider: ScriptedProvider,
        decoder: ScriptedDecoder,
    ) -> ScanSession<ScriptedProvider, ScriptedDecoder, CollectSink> {
        ScanSession::new(
            provider,
            decoder,
            CollectSink::new(),
            AcquireRequest::default(),
        )
    }

    #[tokio::test]
    async fn test_not_ready_then_misses_then_hit() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(640, 480, Arc::clone(&releases)).not_ready_for(5);
        let provider = ScriptedProvider::with_source(source);
        let decoder = ScriptedDecoder::misses_then_hit(3, "ABC123");
        let decode_calls = Arc::clone(&decoder.calls);

        let mut session = session_with(provider, decoder);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Scanning);

        // 5 not-ready ticks + 3 miss ticks: still scanning after all 8
        for tick in 1..=8 {
            assert_eq!(
                session.tick(),
                SessionState::Scanning,
                "tick {} should stay in Scanning",
                tick
            );
        }
        assert_eq!(decode_calls.load(Ordering::SeqCst), 3);

        // 9th tick decodes
        assert_eq!(session.tick(), SessionState::Decoded);
        assert_eq!(session.decode_attempts(), 4);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(session.sink.received.len(), 1);
        assert_eq!(
            session.sink.received[0],
            DecodedPayload::new("ABC123", None)
        );

        // Terminal: further ticks change nothing and never double-release.
        assert_eq!(session.tick(), SessionState::Decoded);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(session.sink.received.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_releases_source_exactly_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let provider = ScriptedProvider::with_source(source);
        let mut session = session_with(provider, ScriptedDecoder::missing());

        session.start().await.unwrap();
        session.tick();
        session.tick();
        assert_eq!(session.state(), SessionState::Scanning);

        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(session.sink.received.is_empty());

        // stop and tick in a terminal state are no-ops
        session.stop();
        session.tick();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_stop_observed_at_next_tick() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let provider = ScriptedProvider::with_source(source);
        let decoder = ScriptedDecoder::hits(&["TOO-LATE"]);
        let decode_calls = Arc::clone(&decoder.calls);

        let mut session = session_with(provider, decoder);
        session.start().await.unwrap();

        let handle = session.handle();
        handle.stop();

        // The flag is observed before any frame is polled or decoded.
        assert_eq!(session.tick(), SessionState::Stopped);
        assert_eq!(decode_calls.load(Ordering::SeqCst), 0);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(session.sink.received.is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_acquiring_never_polls() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let provider = ScriptedProvider::with_source(source);
        let decoder = ScriptedDecoder::hits(&["NEVER"]);
        let decode_calls = Arc::clone(&decoder.calls);

        let mut session = session_with(provider, decoder);
        // Wire the provider to fire stop() while acquisition is in flight.
        session.provider.stop_during_acquire = Some(session.handle());

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(decode_calls.load(Ordering::SeqCst), 0);
        assert!(session.sink.received.is_empty());
    }

    #[tokio::test]
    async fn test_acquisition_refusals_resolve_to_failure_kinds() {
        let provider = ScriptedProvider::refusing(AcquireError::PermissionDenied {
            details: "NotAllowedError".to_string(),
        });
        let decoder = ScriptedDecoder::missing();
        let decode_calls = Arc::clone(&decoder.calls);
        let mut session = session_with(provider, decoder);

        let err = session.start().await.unwrap_err();
        assert_eq!(err, SessionFailure::PermissionDenied);
        assert_eq!(
            session.state(),
            SessionState::Failed(SessionFailure::PermissionDenied)
        );
        assert_eq!(decode_calls.load(Ordering::SeqCst), 0);
        // No source was ever handed over, so nothing is retained.
        assert!(session.source.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_platform_fails_before_acquiring() {
        let provider = ScriptedProvider::unavailable();
        let mut session = session_with(provider, ScriptedDecoder::missing());

        let err = session.start().await.unwrap_err();
        assert_eq!(err, SessionFailure::CameraUnavailable);
        assert_eq!(session.provider.acquire_calls, 0);
    }

    #[tokio::test]
    async fn test_payload_emitted_exactly_once_despite_queued_hits() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let provider = ScriptedProvider::with_source(source);
        let mut session = session_with(provider, ScriptedDecoder::hits(&["first", "second"]));

        session.start().await.unwrap();
        assert_eq!(session.tick(), SessionState::Decoded);

        // A second hit is queued in the decoder, but the session left
        // Scanning; subsequent ticks must not deliver it.
        for _ in 0..3 {
            session.tick();
        }
        assert_eq!(session.sink.received.len(), 1);
        assert_eq!(session.sink.received[0].text, "first");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_clears_stale_payload() {
        let releases = Arc::new(AtomicUsize::new(0));
        let first = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let second = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let mut provider = ScriptedProvider::with_source(first);
        provider.sources.push_back(second);

        let mut session = session_with(provider, ScriptedDecoder::hits(&["stale"]));
        session.start().await.unwrap();
        assert_eq!(session.tick(), SessionState::Decoded);
        assert_eq!(session.payload().unwrap().text, "stale");
        assert_eq!(session.decode_attempts(), 1);

        // Restart: counters and payload reset before acquiring.
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Scanning);
        assert!(session.payload().is_none());
        assert_eq!(session.decode_attempts(), 0);

        // The new session misses; the stale payload is never re-delivered.
        for _ in 0..4 {
            assert_eq!(session.tick(), SessionState::Scanning);
        }
        assert_eq!(session.sink.received.len(), 1);
    }

    #[tokio::test]
    async fn test_start_while_live_stops_prior_session() {
        let releases = Arc::new(AtomicUsize::new(0));
        let first = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let second = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let mut provider = ScriptedProvider::with_source(first);
        provider.sources.push_back(second);

        let mut session = session_with(provider, ScriptedDecoder::missing());
        session.start().await.unwrap();
        session.tick();
        assert_eq!(session.state(), SessionState::Scanning);

        // Implicit stop-then-start: prior source released, no emission.
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(session.sink.received.is_empty());

        session.stop();
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stream_termination_fails_session() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(640, 480, Arc::clone(&releases))
            .not_ready_for(2)
            .then_terminated();
        let provider = ScriptedProvider::with_source(source);
        let mut session = session_with(provider, ScriptedDecoder::missing());

        session.start().await.unwrap();
        assert_eq!(session.tick(), SessionState::Scanning);
        assert_eq!(session.tick(), SessionState::Scanning);
        assert_eq!(
            session.tick(),
            SessionState::Failed(SessionFailure::StreamTerminated)
        );
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // Failure is terminal until restarted; no repeated reporting path.
        assert_eq!(
            session.tick(),
            SessionState::Failed(SessionFailure::StreamTerminated)
        );
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_buffer_from_decoder_fails_session() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(640, 480, Arc::clone(&releases));
        let provider = ScriptedProvider::with_source(source);
        let mut decoder = ScriptedDecoder::missing();
        decoder.results.push_back(Err(DecodeError::InvalidFrameBuffer {
            width: 640,
            height: 480,
            expected: 640 * 480 * 4,
            actual: 3,
        }));
        let mut session = session_with(provider, decoder);

        session.start().await.unwrap();
        assert_eq!(
            session.tick(),
            SessionState::Failed(SessionFailure::InvalidFrameBuffer)
        );
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(session.sink.received.is_empty());
    }

    #[tokio::test]
    async fn test_zero_dimension_stream_is_playback_failure() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(0, 0, Arc::clone(&releases));
        let provider = ScriptedProvider::with_source(source);
        let mut session = session_with(provider, ScriptedDecoder::missing());

        let err = session.start().await.unwrap_err();
        assert_eq!(err, SessionFailure::PlaybackFailed);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_after_failure_is_permitted() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut provider = ScriptedProvider::refusing(AcquireError::DeviceNotFound {
            details: "NotFoundError".to_string(),
        });
        provider
            .sources
            .push_back(ScriptedSource::new(640, 480, Arc::clone(&releases)));

        let mut session = session_with(provider, ScriptedDecoder::missing());
        assert!(session.start().await.is_err());
        assert_eq!(
            session.state(),
            SessionState::Failed(SessionFailure::DeviceNotFound)
        );

        // The device came back; a fresh start() re-enters the machine.
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Scanning);
    }
}
