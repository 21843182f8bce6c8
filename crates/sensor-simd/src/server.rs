use crate::world::SensorWorld;
use crate::SimEvent;
use futures_util::{SinkExt, StreamExt};
use sensor_proto::protocol::Command;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    world: SensorWorld,
    event_tx: mpsc::Sender<SimEvent>,
    frame_tx: broadcast::Sender<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind {}: {}", addr, e);
                return;
            }
        };

        info!("Simulator listening at ws://{}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let world = world.clone();
                    let evt_tx = event_tx.clone();
                    let frame_rx = frame_tx.subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, world, id, evt_tx, frame_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    world: SensorWorld,
    client_id: usize,
    event_tx: mpsc::Sender<SimEvent>,
    mut frame_rx: broadcast::Receiver<String>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Client {} handshake failed: {}", client_id, e);
            return;
        }
    };
    let (mut write_half, mut read_half) = ws.split();

    // Full snapshot on connect, one frame per sensor, so a fresh dashboard
    // has every record before the first tick.
    for record in world.snapshot().await {
        match serde_json::to_string(&record) {
            Ok(frame) => {
                if write_half.send(Message::Text(frame)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!("Failed to serialize snapshot record: {}", e);
                return;
            }
        }
    }

    loop {
        tokio::select! {
            frame = read_half.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Command>(&text) {
                            Ok(command) => {
                                info!("Client {} sent command: {:?}", client_id, command);
                                if event_tx.send(SimEvent::Command(command)).await.is_err() {
                                    warn!("SimEvent channel closed");
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!("Client {} sent unparseable frame ({}): {}", client_id, e, text);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            frame = frame_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if write_half.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} frames, resending snapshot", client_id, n);
                        for record in world.snapshot().await {
                            if let Ok(frame) = serde_json::to_string(&record) {
                                if write_half.send(Message::Text(frame)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
