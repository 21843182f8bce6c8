use sensor_engine::engine::{EngineCore, EngineEvent, EngineHandle, EngineSignal};
use sensor_proto::config::Config;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = Config::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("dash.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but quiet the
    // websocket internals.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,tungstenite=warn,tokio_tungstenite=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("sensor-dash log: {}", log_path.display());

    tracing::info!("sensor-dash starting");

    let config = Config::load().unwrap_or_default();
    let url = Url::parse(&config.channel.url)?;

    // ── Signal channel (EngineCore → console) ────────────────────────────────
    let (signal_tx, signal_rx) = broadcast::channel::<EngineSignal>(1024);

    // ── Event queue (console/transport → EngineCore) ─────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(1024);

    let core = EngineCore::new(url, config.reconnect.clone(), signal_tx, event_tx);
    let handle = core.handle();

    tokio::spawn(async move {
        if let Err(e) = core.run(event_rx).await {
            tracing::error!("EngineCore exited with error: {}", e);
        }
    });

    spawn_signal_printer(handle.clone(), signal_rx);

    // ── Line console — stand-in presentation layer ───────────────────────────
    println!("commands: list | only | all | toggle <id> | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if let Some(id) = line.strip_prefix("toggle ") {
            let id = id.trim();
            if id.is_empty() {
                println!("usage: toggle <id>");
            } else {
                handle.toggle_sensor(id).await;
            }
            continue;
        }
        match line {
            "list" => print_view(&handle).await,
            "only" => handle.set_filter(true).await,
            "all" => handle.set_filter(false).await,
            "quit" | "q" => break,
            "" => {}
            other => println!("unknown command: {}", other),
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Redraw on every view change and surface channel problems inline.
fn spawn_signal_printer(handle: EngineHandle, mut signal_rx: broadcast::Receiver<EngineSignal>) {
    tokio::spawn(async move {
        loop {
            match signal_rx.recv().await {
                Ok(EngineSignal::ViewChanged) => print_view(&handle).await,
                Ok(EngineSignal::ChannelUp) => println!("* channel up"),
                Ok(EngineSignal::ChannelDown) => {
                    println!("* channel down (sensor data may be stale)")
                }
                Ok(EngineSignal::FrameRejected(reason)) => {
                    println!("* dropped bad frame: {}", reason)
                }
                Ok(EngineSignal::DeliveryFailed { id, reason }) => {
                    println!("* command for '{}' not delivered: {}", id, reason)
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("console missed {} signals", n);
                    print_view(&handle).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn print_view(handle: &EngineHandle) {
    let records = handle.view().await;
    if records.is_empty() {
        if handle.connected_only() {
            println!("(no connected sensors)");
        } else {
            println!("(no sensors yet)");
        }
        return;
    }
    for record in &records {
        let status = if record.connected { "connected" } else { "offline" };
        let reading = if record.value.is_empty() {
            "-".to_string()
        } else {
            format!("{} {}", record.value, record.unit)
        };
        println!("{:<12} {:<20} {:<10} {}", record.id, record.name, status, reading);
    }
}
