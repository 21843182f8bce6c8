//! sensor-simd — development stand-in for the physical sensor backend.
//!
//! Serves the same wire protocol the real backend would: pushes partial
//! sensor updates to every connected dashboard and honors
//! `{"command":"connect"|"disconnect","id":…}` frames.

mod server;
mod world;

use sensor_proto::config::Config;
use sensor_proto::protocol::Command;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use world::SensorWorld;

/// All inputs into the simulator core loop.
#[derive(Debug)]
pub enum SimEvent {
    /// Value-walk timer fired.
    Tick,
    /// A command from a connected dashboard.
    Command(Command),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tungstenite=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter.as_str())
        .init();

    info!("sensor-simd starting");

    let config = Config::load().unwrap_or_default();
    let world = SensorWorld::seeded();

    // Serialized update frames, fanned out to every client.
    let (frame_tx, _) = broadcast::channel::<String>(1024);
    let (event_tx, mut event_rx) = mpsc::channel::<SimEvent>(1024);

    server::start_server(
        config.sim.bind_address.clone(),
        config.sim.port,
        world.clone(),
        event_tx.clone(),
        frame_tx.clone(),
    );

    // Value-walk ticker.
    let tick_secs = config.sim.tick_secs.max(0.05);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs_f64(tick_secs));
        loop {
            interval.tick().await;
            if event_tx.send(SimEvent::Tick).await.is_err() {
                break;
            }
        }
    });

    // Core loop — sole mutator of the world.
    while let Some(event) = event_rx.recv().await {
        match event {
            SimEvent::Tick => {
                for update in world.walk().await {
                    broadcast_update(&frame_tx, &update);
                }
            }
            SimEvent::Command(command) => {
                match world.apply_command(&command.id, command.command).await {
                    Some(update) => broadcast_update(&frame_tx, &update),
                    None => warn!("Command for unknown sensor '{}'", command.id),
                }
            }
        }
    }

    Ok(())
}

fn broadcast_update(frame_tx: &broadcast::Sender<String>, update: &sensor_proto::protocol::SensorUpdate) {
    match serde_json::to_string(update) {
        Ok(frame) => {
            // Send error just means no dashboard is connected right now.
            let _ = frame_tx.send(frame);
        }
        Err(e) => warn!("Failed to serialize update: {}", e),
    }
}
