pub mod audio;
pub mod integration;
pub mod market;
pub mod messages;
pub mod session;
pub mod transport;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolashenError {
    #[error("No microphone was found: {0}")]
    DeviceAbsent(String),

    #[error("Microphone access was denied: {0}")]
    PermissionDenied(String),

    #[error("Could not activate audio playback. Please interact with the app and try again. Error: {0}")]
    AudioActivation(String),

    #[error("The live session failed. This might be due to a connection issue or invalid API permissions. Error: {0}")]
    RemoteConnection(String),

    #[error("API Key Error: {0}. Please ensure the environment is configured with a valid and enabled API key.")]
    ApiCredential(String),

    #[error("An unexpected error occurred while starting the session: {0}")]
    UnclassifiedStartup(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    #[error("Market feed error: {0}")]
    MarketFeed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl From<std::io::Error> for SolashenError {
    fn from(e: std::io::Error) -> Self {
        SolashenError::Io(e.to_string())
    }
}

impl SolashenError {
    /// Check if this error is recoverable without restarting the app
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The user must fix the device or permission outside the app and restart
            SolashenError::DeviceAbsent(_) => false,
            SolashenError::PermissionDenied(_) => false,
            // Fatal for the current run, the start control stays disabled
            SolashenError::AudioActivation(_) => false,
            SolashenError::RemoteConnection(_) => false,
            SolashenError::ApiCredential(_) => false,
            SolashenError::UnclassifiedStartup(_) => false,
            // Message-level and feed-level errors are skipped and retried
            SolashenError::Decode(_) => true,
            SolashenError::AudioDevice(_) => false,
            SolashenError::AudioProcessing(_) => true,
            SolashenError::MarketFeed(_) => true,
            SolashenError::Config(_) => false,
            SolashenError::Io(_) => false,
            SolashenError::Channel(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            SolashenError::DeviceAbsent(_) => {
                "Microphone not found. Please connect a microphone, then restart.".to_string()
            }
            SolashenError::PermissionDenied(_) => {
                "Microphone access required. Please allow microphone access, then restart."
                    .to_string()
            }
            SolashenError::AudioDevice(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            SolashenError::Decode(_) => "Received audio could not be decoded.".to_string(),
            SolashenError::AudioProcessing(_) => {
                "Audio processing failed. Please try again.".to_string()
            }
            SolashenError::MarketFeed(_) => {
                "Price feed unavailable, retrying on the next cycle.".to_string()
            }
            SolashenError::Config(_) => "Configuration error. Please check settings.".to_string(),
            SolashenError::Io(_) => "File system error occurred.".to_string(),
            SolashenError::Channel(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            // Fatal session errors are shown verbatim
            other => other.to_string(),
        }
    }

    /// Refine an unclassified startup failure that is really a credential problem
    pub fn classify_startup(self) -> Self {
        match self {
            SolashenError::UnclassifiedStartup(msg) if msg.to_lowercase().contains("api key") => {
                SolashenError::ApiCredential(msg)
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SolashenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_failures_are_reclassified() {
        let err = SolashenError::UnclassifiedStartup("API key not valid".into()).classify_startup();
        assert_eq!(err, SolashenError::ApiCredential("API key not valid".into()));

        let err = SolashenError::UnclassifiedStartup("socket reset".into()).classify_startup();
        assert_eq!(err, SolashenError::UnclassifiedStartup("socket reset".into()));
    }

    #[test]
    fn test_fatal_errors_are_shown_verbatim() {
        let err = SolashenError::RemoteConnection("handshake refused".into());
        assert_eq!(err.user_message(), err.to_string());
        assert!(err.user_message().contains("handshake refused"));
        assert!(!err.is_recoverable());
        assert!(SolashenError::MarketFeed("timeout".into()).is_recoverable());
    }
}
