pub mod config;

pub use config::{AppConfig, AudioConfig, CueConfig, MarketConfig, RealtimeConfig};
