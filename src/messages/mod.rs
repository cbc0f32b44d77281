pub mod transcript;
pub mod types;

pub use transcript::TranscriptAssembler;
pub use types::{ChatMessage, Speaker};
