//! Remote realtime session seam and its Live API implementation

pub mod live;
pub mod wire;

use crate::audio::codec::AudioPacket;
use crate::session::events::CommandSender;
use crate::Result;
use async_trait::async_trait;

pub use live::LiveConnector;

/// An open bidirectional session with the assistant
pub trait RemoteSession: Send {
    /// Queue one microphone packet for sending
    fn send_audio(&mut self, packet: AudioPacket) -> Result<()>;

    /// Close the connection; safe to call more than once
    fn close(&mut self);
}

/// Opens remote sessions. Inbound traffic is posted to `events` as
/// `SessionCommand::Remote` tagged with `epoch`.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self, epoch: u64, events: CommandSender) -> Result<Box<dyn RemoteSession>>;
}
