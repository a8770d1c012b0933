use crate::camera::PlatformCamera;
use crate::config::QrScanConfig;
use crate::decoder::RqrrDecoder;
use crate::error::Result;
use crate::events::{EventBus, ScannerEvent};
use crate::frame::DecodedPayload;
use crate::history::{HistoryRecorder, ScanHistory};
use crate::session::{ScanSession, SessionState};
use crate::sink::{BusSink, Classification};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Main application coordinator: wires the camera provider, decoder, result
/// sink, event bus and history together and drives the scan session's tick
/// loop.
pub struct ScanOrchestrator {
    config: QrScanConfig,
    event_bus: Arc<EventBus>,
    history: Arc<ScanHistory>,
    cancellation_token: CancellationToken,
}

impl ScanOrchestrator {
    /// Create an orchestrator, loading persisted scan history.
    pub async fn new(config: QrScanConfig) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let history = Arc::new(
            ScanHistory::load(&config.history.path, config.history.capacity).await?,
        );

        Ok(Self {
            config,
            event_bus,
            history,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn history(&self) -> Arc<ScanHistory> {
        Arc::clone(&self.history)
    }

    /// Token that requests the same cooperative stop as Ctrl-C. Useful for
    /// embedding the orchestrator and for tests.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Run scan sessions until one terminates the process.
    ///
    /// With `continuous` set, a decoded payload is reported and a fresh
    /// session starts; otherwise the first terminal state ends the run.
    /// Ctrl-C requests a cooperative stop of the active session. Returns the
    /// process exit code.
    pub async fn run(&mut self, continuous: bool) -> Result<i32> {
        info!("Starting scan orchestrator");

        let recorder = HistoryRecorder::new(self.history(), self.event_bus());
        let recorder_task = recorder.start(self.cancellation_token.child_token());

        let provider = PlatformCamera::from_config(&self.config.camera);
        let decoder = RqrrDecoder::new();
        let sink = BusSink::new(self.event_bus());
        let mut session =
            ScanSession::new(provider, decoder, sink, self.config.acquire_request());
        let handle = session.handle();

        let tick_period = Duration::from_millis(1000 / self.config.scanner.tick_hz.max(1) as u64);
        let mut ticker = interval(tick_period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(period_ms = tick_period.as_millis() as u64, "tick loop configured");

        self.event_bus.publish_lossy(ScannerEvent::SessionStarted {
            timestamp: Utc::now(),
        });

        let exit_code = if let Err(kind) = session.start().await {
            self.event_bus.publish_lossy(ScannerEvent::SessionFailed {
                kind,
                timestamp: Utc::now(),
            });
            eprintln!("Scan failed: {}", kind);
            1
        } else {
            let shutdown = self.cancellation_token.clone();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Ctrl-C received, stopping scan session");
                        handle.stop();
                    }
                    // Guarded so a cancelled token does not starve the tick
                    // that observes the stop flag.
                    _ = shutdown.cancelled(), if !handle.is_stop_requested() => {
                        info!("Shutdown requested, stopping scan session");
                        handle.stop();
                    }
                    _ = ticker.tick() => {
                        match session.tick() {
                            SessionState::Idle
                            | SessionState::Acquiring
                            | SessionState::Scanning => {}
                            SessionState::Decoded => {
                                if let Some(payload) = session.payload().cloned() {
                                    report_payload(&payload);
                                }
                                // give the history recorder a chance to drain
                                tokio::task::yield_now().await;

                                if continuous {
                                    self.event_bus.publish_lossy(ScannerEvent::SessionStarted {
                                        timestamp: Utc::now(),
                                    });
                                    if let Err(kind) = session.start().await {
                                        self.event_bus.publish_lossy(
                                            ScannerEvent::SessionFailed {
                                                kind,
                                                timestamp: Utc::now(),
                                            },
                                        );
                                        eprintln!("Scan failed: {}", kind);
                                        break 1;
                                    }
                                } else {
                                    break 0;
                                }
                            }
                            SessionState::Stopped => {
                                self.event_bus.publish_lossy(ScannerEvent::SessionStopped {
                                    timestamp: Utc::now(),
                                });
                                break 0;
                            }
                            SessionState::Failed(kind) => {
                                self.event_bus.publish_lossy(ScannerEvent::SessionFailed {
                                    kind,
                                    timestamp: Utc::now(),
                                });
                                eprintln!("Scan failed: {}", kind);
                                break 1;
                            }
                        }
                    }
                }
            }
        };

        self.cancellation_token.cancel();
        if timeout(Duration::from_secs(2), recorder_task).await.is_err() {
            error!("History recorder did not stop in time");
        }

        info!("Scan orchestrator finished with exit code {}", exit_code);
        Ok(exit_code)
    }
}

/// Print a decoded payload the way the result view presents it: the text,
/// plus an open-link affordance when it classifies as a hyperlink.
fn report_payload(payload: &DecodedPayload) {
    println!("{}", payload.text);
    if Classification::of(&payload.text).is_hyperlink() {
        println!("(link: open it in a browser)");
    }
}
