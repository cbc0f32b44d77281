pub mod driver;
pub mod events;
pub mod manager;
pub mod state;

pub use driver::{segment_ended_callback, SessionDriver};
pub use events::{
    command_channel, CommandReceiver, CommandSender, RemoteEvent, ServerEvent, SessionCommand,
    StartRequest, StartedSession,
};
pub use manager::SessionManager;
pub use state::SessionState;
