// =============================================================================
// Telemetry — posts trades and lifecycle events to an external store
// =============================================================================
//
// Grounded in the teacher's `reqwest::Client` construction style
// (`binance::client::BinanceClient::new`), generalized from a signed REST
// client to a plain bounded-queue publisher. Persistence failures must never
// block the trading path, so every send goes through a bounded `mpsc`
// channel drained by a background task; a full queue drops the newest event
// (the one being enqueued) rather than applying backpressure to the caller.
// =============================================================================

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::paper_trader::PaperTrade;

/// One telemetry record. Real and paper trades share a wire shape
/// distinguished by `is_paper` on the trade payload; lifecycle events carry
/// a free-form message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Trade { symbol: String, direction: i8, intensity: u8, realized_pnl: f64, is_paper: bool, emitted_at: i64 },
    SessionLifecycle { session_id: String, status: String },
    RiskTrip { symbol: String, reason: String },
    Error { component: String, message: String },
}

impl TelemetryEvent {
    pub fn from_paper_trade(trade: &PaperTrade) -> Self {
        TelemetryEvent::Trade {
            symbol: trade.symbol.clone(),
            direction: trade.direction,
            intensity: trade.intensity,
            realized_pnl: trade.realized_pnl,
            is_paper: trade.is_paper,
            emitted_at: trade.emitted_at,
        }
    }
}

/// Bounded publisher: `enqueue` never blocks the trading path and never
/// panics; the background drain task owns the HTTP client and the retry
/// loop.
pub struct TelemetryPublisher {
    sender: mpsc::Sender<TelemetryEvent>,
}

impl TelemetryPublisher {
    /// Spawn the background drain task and return the handle used to enqueue
    /// events. `capacity` matches `persistence.retry_queue_capacity`.
    pub fn spawn(endpoint: String, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        tokio::spawn(drain_loop(endpoint, receiver));
        Self { sender }
    }

    /// Enqueue an event. If the queue is full, the newest event is dropped
    /// and a warning is logged — persistence must never block trading.
    pub fn enqueue(&self, event: TelemetryEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("telemetry queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("telemetry drain task gone, dropping event");
            }
        }
    }
}

async fn drain_loop(endpoint: String, mut receiver: mpsc::Receiver<TelemetryEvent>) {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build reqwest client");

    while let Some(event) = receiver.recv().await {
        if endpoint.is_empty() {
            debug!(?event, "telemetry disabled (no endpoint); dropping");
            continue;
        }
        match client.post(&endpoint).json(&event).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("telemetry event posted");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "telemetry endpoint rejected event");
            }
            Err(err) => {
                warn!(error = %err, "telemetry post failed");
            }
        }
    }
}
