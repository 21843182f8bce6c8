//! ChannelTransport — sole owner of the push-socket connection.
//!
//! Inbound frames are decoded on a reader task and forwarded to the engine
//! event queue; nothing else ever reads, writes, or closes the socket.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use sensor_proto::protocol::{decode_update, Command};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::engine::EngineEvent;
use crate::error::TransportError;
use crate::orchestrator::CommandSink;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct ChannelTransport {
    url: Url,
    event_tx: mpsc::Sender<EngineEvent>,
    sink: Option<WsSink>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl ChannelTransport {
    pub fn new(url: Url, event_tx: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            url,
            event_tx,
            sink: None,
            reader_task: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Establish the connection and spawn the reader task.  Calling this on
    /// an already-open transport is a caller bug and fails with
    /// `AlreadyOpen`; calling it again after `close()` (or after the remote
    /// dropped us) opens a fresh connection.
    pub async fn open(&mut self) -> Result<(), TransportError> {
        if self.sink.is_some() {
            return Err(TransportError::AlreadyOpen);
        }

        let (ws, _) = connect_async(self.url.as_str()).await?;
        info!("channel open: {}", self.url);
        let (sink, mut stream) = ws.split();

        let event_tx = self.event_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match decode_update(&text) {
                        Ok(update) => {
                            if event_tx.send(EngineEvent::Inbound(update)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("rejected inbound frame: {}", e);
                            let rejected = EngineEvent::FrameRejected(e.to_string());
                            if event_tx.send(rejected).await.is_err() {
                                return;
                            }
                        }
                    },
                    Ok(Message::Close(_)) => {
                        debug!("server sent close frame");
                        break;
                    }
                    // Ping/pong are answered by tungstenite itself; binary
                    // frames carry nothing we can merge.
                    Ok(_) => {}
                    Err(e) => {
                        warn!("channel read error: {}", e);
                        break;
                    }
                }
            }
            let _ = event_tx.send(EngineEvent::ChannelClosed).await;
        });

        self.sink = Some(sink);
        self.reader_task = Some(reader);
        Ok(())
    }

    /// Serialize and transmit one command.  Only possible while the channel
    /// is open; a closed channel is an observable `NotOpen` failure, never a
    /// silent drop.
    pub async fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::NotOpen)?;
        let json = command.encode()?;
        match sink.send(Message::Text(json)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Write failure means the connection is gone; drop the sink
                // so later sends fail fast with NotOpen, and stop the reader
                // so a reopen never runs two of them.
                self.sink = None;
                if let Some(task) = self.reader_task.take() {
                    task.abort();
                }
                Err(TransportError::Ws(e))
            }
        }
    }

    /// Tear the connection down.  Safe to call on an already-closed
    /// transport; after this, `open()` may be called again.
    pub async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

impl CommandSink for ChannelTransport {
    async fn deliver(&mut self, command: &Command) -> Result<(), TransportError> {
        self.send(command).await
    }
}
