use crate::SolashenError;
use std::fmt;

/// Lifecycle of the single voice session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    /// Microphone access refused; needs a restart after the user grants it
    PermissionBlocked,
    /// No microphone; needs a restart after one is connected
    NoDeviceFound,
    /// Fatal for this run
    Error(SolashenError),
}

impl SessionState {
    /// States that only a restart leaves
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::PermissionBlocked | SessionState::NoDeviceFound | SessionState::Error(_)
        )
    }

    /// Whether the stop control applies
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Active)
    }

    /// Text for the user, if the state carries a problem
    pub fn user_message(&self) -> Option<String> {
        match self {
            SessionState::PermissionBlocked => {
                Some(SolashenError::PermissionDenied(String::new()).user_message())
            }
            SessionState::NoDeviceFound => {
                Some(SolashenError::DeviceAbsent(String::new()).user_message())
            }
            SessionState::Error(e) => Some(e.user_message()),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::PermissionBlocked => write!(f, "permission blocked"),
            SessionState::NoDeviceFound => write!(f, "no device found"),
            SessionState::Error(e) => write!(f, "error: {}", e),
        }
    }
}
