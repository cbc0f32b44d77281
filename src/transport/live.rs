//! Live API session over a websocket
//!
//! The connector performs the setup handshake itself, then hands the socket
//! to a writer task (microphone packets out) and a reader task (server
//! content in, posted to the session driver).

use crate::audio::codec::AudioPacket;
use crate::integration::config::RealtimeConfig;
use crate::session::events::{CommandSender, RemoteEvent, SessionCommand};
use crate::transport::wire::{RealtimeInputMessage, ServerMessage, SetupMessage};
use crate::transport::{RealtimeConnector, RemoteSession};
use crate::{Result, SolashenError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LiveConnector {
    config: RealtimeConfig,
}

impl LiveConnector {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }
}

enum Outbound {
    Audio(AudioPacket),
    Close,
}

/// Handle to a connected session
pub struct LiveSession {
    outbound: UnboundedSender<Outbound>,
    closed: bool,
}

impl RemoteSession for LiveSession {
    fn send_audio(&mut self, packet: AudioPacket) -> Result<()> {
        if self.closed {
            return Err(SolashenError::Channel("Session already closed".into()));
        }
        self.outbound
            .send(Outbound::Audio(packet))
            .map_err(|_| SolashenError::Channel("Session writer stopped".into()))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Text of a frame, whether it came as text or binary
fn frame_text(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.to_string()),
        Message::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok(),
        _ => None,
    }
}

/// A close during setup; credential problems are reported as such
fn close_error(frame: Option<&CloseFrame<'_>>) -> SolashenError {
    let reason = frame
        .map(|f| f.reason.to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "Connection closed during setup".to_string());

    if reason.to_lowercase().contains("api key") {
        SolashenError::ApiCredential(reason)
    } else {
        SolashenError::UnclassifiedStartup(reason)
    }
}

#[async_trait]
impl RealtimeConnector for LiveConnector {
    async fn connect(&self, epoch: u64, events: CommandSender) -> Result<Box<dyn RemoteSession>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SolashenError::ApiCredential("No API key configured".into()))?;

        let url = format!("{}?key={}", self.config.endpoint, api_key);
        info!("Connecting to {} (epoch {})", self.config.endpoint, epoch);

        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SolashenError::UnclassifiedStartup(format!("Failed to connect: {}", e)))?;
        let (mut sink, mut stream) = socket.split();

        let setup = SetupMessage::new(
            &self.config.model,
            &self.config.voice,
            self.config.system_instruction.as_deref(),
        );
        let setup = serde_json::to_string(&setup)
            .map_err(|e| SolashenError::UnclassifiedStartup(format!("Invalid setup: {}", e)))?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| SolashenError::UnclassifiedStartup(format!("Failed to send setup: {}", e)))?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Close(frame))) => return Err(close_error(frame.as_ref())),
                Some(Ok(message)) => {
                    let Some(text) = frame_text(&message) else {
                        continue;
                    };
                    if ServerMessage::parse(&text).is_some_and(|m| m.is_setup_complete()) {
                        break;
                    }
                    debug!("Ignoring message before setup completed");
                }
                Some(Err(e)) => {
                    return Err(SolashenError::UnclassifiedStartup(format!(
                        "Setup failed: {}",
                        e
                    )))
                }
                None => return Err(close_error(None)),
            }
        }

        info!("Live session ready (epoch {})", epoch);

        let (outbound_tx, mut outbound_rx) = unbounded_channel::<Outbound>();

        tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                match outbound {
                    Outbound::Audio(packet) => {
                        let json = match serde_json::to_string(&RealtimeInputMessage::audio(packet)) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to encode audio message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            warn!("Failed to send audio: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
            debug!("Live writer finished (epoch {})", epoch);
        });

        tokio::spawn(async move {
            let terminal = loop {
                match stream.next().await {
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Server closed session: {:?}", frame);
                        break RemoteEvent::Closed;
                    }
                    Some(Ok(message)) => {
                        let Some(text) = frame_text(&message) else {
                            continue;
                        };
                        let Some(parsed) = ServerMessage::parse(&text) else {
                            debug!("Ignoring unparsable server message");
                            continue;
                        };
                        if parsed.go_away.is_some() {
                            info!("Server announced disconnect");
                        }
                        if let Some(event) = parsed.into_event() {
                            let command = SessionCommand::Remote {
                                epoch,
                                event: RemoteEvent::Message(event),
                            };
                            if events.send(command).is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => break RemoteEvent::Error(e.to_string()),
                    None => break RemoteEvent::Closed,
                }
            };
            let _ = events.send(SessionCommand::Remote {
                epoch,
                event: terminal,
            });
        });

        Ok(Box::new(LiveSession {
            outbound: outbound_tx,
            closed: false,
        }))
    }
}
