//! EngineCore — single-owner event loop for all mutable sensor state.
//!
//! Every input (inbound channel frames, user toggle intents, filter changes,
//! channel lifecycle) is funneled through one mpsc queue and applied strictly
//! in arrival order; there is no reordering, coalescing, or batching of
//! merges.  EngineCore owns the registry mutation path and the transport
//! exclusively; no other task touches the socket.
//!
//! After each event that changes visible state, EngineCore broadcasts an
//! [`EngineSignal`] so out-of-loop consumers (the console, tests) know to
//! re-fetch the view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sensor_proto::config::ReconnectConfig;
use sensor_proto::protocol::{SensorRecord, SensorUpdate};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use url::Url;

use crate::orchestrator;
use crate::projector::project;
use crate::registry::SensorRegistry;
use crate::transport::ChannelTransport;

// ── EngineEvent ───────────────────────────────────────────────────────────────

/// All inputs into the EngineCore loop.
#[derive(Debug)]
pub enum EngineEvent {
    /// A decoded partial update from the channel.
    Inbound(SensorUpdate),
    /// An inbound frame the transport could not decode (reason only; the
    /// payload is discarded without touching the registry).
    FrameRejected(String),
    /// The channel dropped (remote close, read error, or EOF).
    ChannelClosed,
    /// Backoff timer fired; try to reopen the channel.
    ReconnectTick,
    /// Operator asked to flip a sensor's connection.
    Toggle(String),
    /// Operator set the "connected only" filter.
    SetFilter(bool),
    /// Shutdown requested.
    Shutdown,
}

// ── EngineSignal ──────────────────────────────────────────────────────────────

/// Broadcast notifications out of the loop.
#[derive(Debug, Clone)]
pub enum EngineSignal {
    /// Registry or filter changed; fetch a fresh view from the handle.
    ViewChanged,
    ChannelUp,
    /// Connectivity lost.  The registry keeps its last-known (now possibly
    /// stale) state; it is never cleared.
    ChannelDown,
    /// Exactly one of these per rejected inbound frame.
    FrameRejected(String),
    /// An outbound command was not delivered.  The optimistic local update
    /// still applied.
    DeliveryFailed { id: String, reason: String },
}

// ── EngineHandle ──────────────────────────────────────────────────────────────

/// Cloneable surface for the presentation layer: snapshot reads, plus
/// intents that go through the event queue like every other input.
#[derive(Clone)]
pub struct EngineHandle {
    registry: SensorRegistry,
    connected_only: Arc<AtomicBool>,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    /// The filtered, ordered list of records to display: a consistent pair
    /// of (registry snapshot, filter flag) at call time.
    pub async fn view(&self) -> Vec<SensorRecord> {
        project(&self.registry.all().await, self.connected_only())
    }

    pub fn connected_only(&self) -> bool {
        self.connected_only.load(Ordering::Relaxed)
    }

    pub async fn record(&self, id: &str) -> Option<SensorRecord> {
        self.registry.get(id).await
    }

    pub async fn toggle_sensor(&self, id: impl Into<String>) {
        let _ = self.event_tx.send(EngineEvent::Toggle(id.into())).await;
    }

    pub async fn set_filter(&self, connected_only: bool) {
        let _ = self
            .event_tx
            .send(EngineEvent::SetFilter(connected_only))
            .await;
    }

    pub async fn shutdown(&self) {
        let _ = self.event_tx.send(EngineEvent::Shutdown).await;
    }
}

// ── EngineCore ────────────────────────────────────────────────────────────────

pub struct EngineCore {
    registry: SensorRegistry,
    transport: ChannelTransport,
    connected_only: Arc<AtomicBool>,
    reconnect: ReconnectConfig,
    /// Next reconnect delay; doubles per failed attempt up to the cap.
    backoff: Duration,
    event_tx: mpsc::Sender<EngineEvent>,
    signal_tx: broadcast::Sender<EngineSignal>,
}

impl EngineCore {
    pub fn new(
        url: Url,
        reconnect: ReconnectConfig,
        signal_tx: broadcast::Sender<EngineSignal>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let backoff = initial_backoff(&reconnect);
        Self {
            registry: SensorRegistry::new(),
            transport: ChannelTransport::new(url, event_tx.clone()),
            connected_only: Arc::new(AtomicBool::new(false)),
            reconnect,
            backoff,
            event_tx,
            signal_tx,
        }
    }

    /// Presentation-layer surface.  Clone freely; all clones observe the
    /// same registry and filter.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            registry: self.registry.clone(),
            connected_only: Arc::clone(&self.connected_only),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Run the event loop.  Opens the channel first, then processes events
    /// one at a time until `Shutdown` arrives or the queue closes.  The
    /// transport is closed exactly once on the way out.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<EngineEvent>) -> anyhow::Result<()> {
        info!("EngineCore: starting event loop");
        self.try_open().await;

        loop {
            let Some(evt) = event_rx.recv().await else {
                info!("EngineCore: event queue closed, shutting down");
                break;
            };

            match evt {
                EngineEvent::Inbound(update) => {
                    self.registry.merge(&update).await;
                    let _ = self.signal_tx.send(EngineSignal::ViewChanged);
                }

                EngineEvent::FrameRejected(reason) => {
                    warn!("EngineCore: rejected frame: {}", reason);
                    let _ = self.signal_tx.send(EngineSignal::FrameRejected(reason));
                }

                EngineEvent::ChannelClosed => {
                    warn!("EngineCore: channel closed");
                    self.transport.close().await;
                    let _ = self.signal_tx.send(EngineSignal::ChannelDown);
                    self.schedule_reconnect();
                }

                EngineEvent::ReconnectTick => {
                    // Stale tick after a successful reopen is possible; skip.
                    if !self.transport.is_open() {
                        self.try_open().await;
                    }
                }

                EngineEvent::Toggle(id) => {
                    let outcome =
                        orchestrator::toggle(&self.registry, &mut self.transport, &id).await;
                    if let Err(e) = outcome.delivery {
                        warn!(
                            "EngineCore: {:?} for '{}' not delivered: {}",
                            outcome.command.command, id, e
                        );
                        let _ = self.signal_tx.send(EngineSignal::DeliveryFailed {
                            id,
                            reason: e.to_string(),
                        });
                    }
                    let _ = self.signal_tx.send(EngineSignal::ViewChanged);
                }

                EngineEvent::SetFilter(connected_only) => {
                    self.connected_only.store(connected_only, Ordering::Relaxed);
                    let _ = self.signal_tx.send(EngineSignal::ViewChanged);
                }

                EngineEvent::Shutdown => {
                    info!("EngineCore: shutdown requested");
                    break;
                }
            }
        }

        self.transport.close().await;
        Ok(())
    }

    async fn try_open(&mut self) {
        match self.transport.open().await {
            Ok(()) => {
                self.backoff = initial_backoff(&self.reconnect);
                let _ = self.signal_tx.send(EngineSignal::ChannelUp);
            }
            Err(e) => {
                warn!("EngineCore: channel open failed: {}", e);
                let _ = self.signal_tx.send(EngineSignal::ChannelDown);
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.reconnect.enabled {
            return;
        }
        let delay = self.backoff;
        // Clamp like initial_backoff: a hand-edited config with negative (or
        // NaN) delays must not panic from_secs_f64.
        let cap = Duration::from_secs_f64(
            self.reconnect
                .max_delay_secs
                .max(self.reconnect.initial_delay_secs)
                .max(0.05),
        );
        self.backoff = (self.backoff * 2).min(cap);

        info!("EngineCore: reconnecting in {:.1}s", delay.as_secs_f64());
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineEvent::ReconnectTick).await;
        });
    }
}

fn initial_backoff(reconnect: &ReconnectConfig) -> Duration {
    Duration::from_secs_f64(reconnect.initial_delay_secs.max(0.05))
}
