//! Command channel messages between the host and the overlay surface.
//!
//! Event names are a contract with the surface's content and must not change.
//! Outbound traffic comes in two kinds:
//!
//! - **Notifications** carry at most a flag and may be dropped when the
//!   surface is not listening yet.
//! - **Deliveries** carry a payload. The host only sends them to a ready
//!   surface, so the initial session-state injection is never lost.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{SelectedResume, SessionConfig};

pub const EVENT_SESSION_DATA: &str = "session-data";
pub const EVENT_SESSION_START_TIME: &str = "session-start-time";
pub const EVENT_SESSION_RESUME: &str = "session-resume";
pub const EVENT_TOKEN_DELIVERY: &str = "token-delivery";
pub const EVENT_LISTENING_ERROR: &str = "listening-error";
pub const EVENT_TOGGLE_MINIMIZE: &str = "toggle-minimize";
pub const EVENT_TOGGLE_HIDE: &str = "toggle-hide";
pub const EVENT_GENERATE_RESPONSE: &str = "generate-response";
pub const EVENT_ANALYZE_SCREEN: &str = "analyze-screen";
pub const EVENT_STOP_AUDIO_CAPTURE: &str = "stop-audio-capture";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    ToggleMinimize(bool),
    ToggleHide,
    GenerateResponse,
    AnalyzeScreen,
    StopAudioCapture,
}

impl Notification {
    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::ToggleMinimize(_) => EVENT_TOGGLE_MINIMIZE,
            Notification::ToggleHide => EVENT_TOGGLE_HIDE,
            Notification::GenerateResponse => EVENT_GENERATE_RESPONSE,
            Notification::AnalyzeScreen => EVENT_ANALYZE_SCREEN,
            Notification::StopAudioCapture => EVENT_STOP_AUDIO_CAPTURE,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Notification::ToggleMinimize(minimized) => Value::Bool(*minimized),
            _ => Value::Null,
        }
    }
}

/// Canonical session state injected once per activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: String,
    pub config: Option<SessionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartTime {
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    pub session_start_time: i64,
}

/// Incremental update applied on top of an already delivered [`SessionData`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePatch {
    pub session_id: String,
    pub selected_resume: SelectedResume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDelivery {
    pub token: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    SessionData(SessionData),
    SessionStartTime(SessionStartTime),
    ResumePatch(ResumePatch),
    Token(TokenDelivery),
    ListeningError(String),
}

impl Delivery {
    pub fn event_name(&self) -> &'static str {
        match self {
            Delivery::SessionData(_) => EVENT_SESSION_DATA,
            Delivery::SessionStartTime(_) => EVENT_SESSION_START_TIME,
            Delivery::ResumePatch(_) => EVENT_SESSION_RESUME,
            Delivery::Token(_) => EVENT_TOKEN_DELIVERY,
            Delivery::ListeningError(_) => EVENT_LISTENING_ERROR,
        }
    }

    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Delivery::SessionData(data) => serde_json::to_value(data),
            Delivery::SessionStartTime(start) => serde_json::to_value(start),
            Delivery::ResumePatch(patch) => serde_json::to_value(patch),
            Delivery::Token(token) => serde_json::to_value(token),
            Delivery::ListeningError(message) => Ok(Value::String(message.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickThroughOptions {
    #[serde(default)]
    pub forward: bool,
}

/// Messages sent by the surface's content to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum InboundCommand {
    SetClickThrough {
        ignore: bool,
        #[serde(default)]
        options: ClickThroughOptions,
    },
    HideOverlay,
    EndSession,
    StartListening {
        #[serde(default)]
        language: Option<String>,
    },
    StopListening,
}

impl InboundCommand {
    pub fn name(&self) -> &'static str {
        match self {
            InboundCommand::SetClickThrough { .. } => "set-click-through",
            InboundCommand::HideOverlay => "hide-overlay",
            InboundCommand::EndSession => "end-session",
            InboundCommand::StartListening { .. } => "start-listening",
            InboundCommand::StopListening => "stop-listening",
        }
    }
}
