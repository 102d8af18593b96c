//! In-memory fakes for the surface and backend seams.
//!
//! Compiled for unit tests and, behind the `test-helpers` feature, for the
//! integration tests in `tests/`.

use crate::error::{OverlayError, Result};
use crate::gateway::{BackendGateway, CredentialToken, ResumeContent, SessionStart, SessionSummary};
use crate::geometry::{SurfacePosition, SurfaceSize, WorkArea};
use crate::surface::{ReadySignal, SurfaceBackend, SurfaceOptions};
use overlay_protocol::{SessionConfig, EVENT_SESSION_DATA, EVENT_SESSION_RESUME};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const FAKE_WORK_AREA: WorkArea = WorkArea {
    x: 0,
    y: 0,
    width: 1440,
    height: 900,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Fake Surface
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct FakeSurfaceState {
    created: usize,
    destroyed: usize,
    focused: usize,
    live: bool,
    size: Option<SurfaceSize>,
    position: Option<SurfacePosition>,
    ignore_cursor_events: (bool, bool),
    emitted: Vec<(String, Value)>,
    last_options: Option<SurfaceOptions>,
    ready_signal: Option<ReadySignal>,
    fail_create: Option<String>,
}

pub struct FakeSurface {
    auto_ready: bool,
    state: Mutex<FakeSurfaceState>,
}

impl FakeSurface {
    /// Content "loads" during `create`.
    pub fn auto_ready() -> Self {
        Self {
            auto_ready: true,
            state: Mutex::new(FakeSurfaceState::default()),
        }
    }

    /// The test fires the ready signal itself via [`Self::take_ready_signal`].
    pub fn manual_ready() -> Self {
        Self {
            auto_ready: false,
            state: Mutex::new(FakeSurfaceState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeSurfaceState> {
        self.state.lock().unwrap()
    }

    pub fn fail_create(&self, message: &str) {
        self.lock().fail_create = Some(message.to_string());
    }

    pub fn create_count(&self) -> usize {
        self.lock().created
    }

    pub fn destroy_count(&self) -> usize {
        self.lock().destroyed
    }

    pub fn focus_count(&self) -> usize {
        self.lock().focused
    }

    pub fn is_live(&self) -> bool {
        self.lock().live
    }

    pub fn last_options(&self) -> Option<SurfaceOptions> {
        self.lock().last_options.clone()
    }

    pub fn take_ready_signal(&self) -> Option<ReadySignal> {
        self.lock().ready_signal.take()
    }

    pub fn ignore_cursor_events(&self) -> (bool, bool) {
        self.lock().ignore_cursor_events
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.lock().emitted.clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.lock()
            .emitted
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub fn events_named(&self, name: &str) -> Vec<Value> {
        self.lock()
            .emitted
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Session state as the surface's content would hold it: `session-data`
    /// replaces, `session-resume` patches `config.selectedResume`.
    pub fn merged_session_state(&self) -> Option<Value> {
        let mut merged: Option<Value> = None;
        for (event, payload) in self.emitted() {
            if event == EVENT_SESSION_DATA {
                merged = Some(payload);
            } else if event == EVENT_SESSION_RESUME {
                let Some(state) = merged.as_mut() else {
                    continue;
                };
                if state["sessionId"] != payload["sessionId"] {
                    continue;
                }
                if let Some(config) = state.get_mut("config").and_then(Value::as_object_mut) {
                    config.insert(
                        "selectedResume".to_string(),
                        payload["selectedResume"].clone(),
                    );
                }
            }
        }
        merged
    }

    fn require_live(&self, state: &FakeSurfaceState, op: &'static str) -> Result<()> {
        if state.live {
            Ok(())
        } else {
            Err(OverlayError::surface(op, "no live window"))
        }
    }
}

impl SurfaceBackend for FakeSurface {
    fn create(&self, options: &SurfaceOptions, ready: ReadySignal) -> Result<()> {
        {
            let mut state = self.lock();
            if let Some(message) = state.fail_create.clone() {
                return Err(OverlayError::SurfaceCreationFailed(message));
            }
            state.created += 1;
            state.live = true;
            state.size = Some(SurfaceSize {
                width: options.width,
                height: options.height,
            });
            state.position = Some(SurfacePosition { x: 0, y: 0 });
            state.ignore_cursor_events =
                (options.ignore_cursor_events, options.forward_cursor_events);
            state.last_options = Some(options.clone());
            if !self.auto_ready {
                state.ready_signal = Some(ready);
                return Ok(());
            }
        }
        ready.fire();
        Ok(())
    }

    fn destroy(&self) {
        let mut state = self.lock();
        state.destroyed += 1;
        state.live = false;
        state.ready_signal = None;
    }

    fn size(&self) -> Result<SurfaceSize> {
        let state = self.lock();
        self.require_live(&state, "size")?;
        state
            .size
            .ok_or_else(|| OverlayError::surface("size", "unknown"))
    }

    fn position(&self) -> Result<SurfacePosition> {
        let state = self.lock();
        self.require_live(&state, "position")?;
        state
            .position
            .ok_or_else(|| OverlayError::surface("position", "unknown"))
    }

    fn set_size(&self, size: SurfaceSize) -> Result<()> {
        let mut state = self.lock();
        self.require_live(&state, "set_size")?;
        state.size = Some(size);
        Ok(())
    }

    fn set_position(&self, position: SurfacePosition) -> Result<()> {
        let mut state = self.lock();
        self.require_live(&state, "set_position")?;
        state.position = Some(position);
        Ok(())
    }

    fn set_ignore_cursor_events(&self, ignore: bool, forward: bool) -> Result<()> {
        let mut state = self.lock();
        self.require_live(&state, "set_ignore_cursor_events")?;
        state.ignore_cursor_events = (ignore, forward);
        Ok(())
    }

    fn work_area(&self) -> Result<WorkArea> {
        Ok(FAKE_WORK_AREA)
    }

    fn focus(&self) -> Result<()> {
        let mut state = self.lock();
        self.require_live(&state, "focus")?;
        state.focused += 1;
        Ok(())
    }

    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        let mut state = self.lock();
        self.require_live(&state, "emit")?;
        state.emitted.push((event.to_string(), payload));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fake Gateway
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    FetchToken,
    StartSession { user_id: String },
    FetchResume { resume_id: String },
    ListSessions { user_id: String },
}

/// Scripted backend. Unscripted calls fail.
#[derive(Default)]
pub struct FakeGateway {
    token: Option<String>,
    session_ids: Mutex<Vec<String>>,
    resumes: HashMap<String, String>,
    sessions: Option<Vec<SessionSummary>>,
    start_session_delay: Option<Duration>,
    resume_delay: Option<Duration>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Each `start_session` call returns the next id; once exhausted the
    /// last one repeats.
    pub fn with_session_ids(self, ids: &[&str]) -> Self {
        *self.session_ids.lock().unwrap() = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn with_resume(mut self, resume_id: &str, content: &str) -> Self {
        self.resumes
            .insert(resume_id.to_string(), content.to_string());
        self
    }

    pub fn with_sessions(mut self, sessions: Vec<SessionSummary>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_start_session_delay(mut self, delay: Duration) -> Self {
        self.start_session_delay = Some(delay);
        self
    }

    pub fn with_resume_delay(mut self, delay: Duration) -> Self {
        self.resume_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn start_session_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, GatewayCall::StartSession { .. }))
            .count()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_session_id(&self) -> Option<String> {
        let mut ids = self.session_ids.lock().unwrap();
        match ids.len() {
            0 => None,
            1 => ids.first().cloned(),
            _ => Some(ids.remove(0)),
        }
    }
}

pub fn session_summary(id: &str, duration: Option<&str>) -> SessionSummary {
    SessionSummary {
        id: id.to_string(),
        duration: duration.map(str::to_string),
        extra: Default::default(),
    }
}

impl BackendGateway for FakeGateway {
    async fn fetch_token(&self) -> Result<CredentialToken> {
        self.record(GatewayCall::FetchToken);
        self.token
            .clone()
            .map(CredentialToken::new)
            .ok_or_else(|| OverlayError::TokenUnavailable("HTTP 500".to_string()))
    }

    async fn start_session(&self, user_id: &str, _config: &SessionConfig) -> Result<SessionStart> {
        self.record(GatewayCall::StartSession {
            user_id: user_id.to_string(),
        });
        if let Some(delay) = self.start_session_delay {
            tokio::time::sleep(delay).await;
        }
        self.next_session_id()
            .map(|id| SessionStart {
                authoritative_session_id: id,
                credits_remaining: Some(3),
            })
            .ok_or_else(|| OverlayError::SessionStartFailed("HTTP 402".to_string()))
    }

    async fn fetch_resume(&self, resume_id: &str) -> Result<ResumeContent> {
        self.record(GatewayCall::FetchResume {
            resume_id: resume_id.to_string(),
        });
        if let Some(delay) = self.resume_delay {
            tokio::time::sleep(delay).await;
        }
        self.resumes
            .get(resume_id)
            .map(|content| ResumeContent {
                id: Some(Value::String(resume_id.to_string())),
                file_name: None,
                content: Some(content.clone()),
                file_type: None,
                file_size: Some(content.len() as u64),
            })
            .ok_or_else(|| OverlayError::ResumeFetchFailed {
                id: resume_id.to_string(),
                details: "HTTP 404".to_string(),
            })
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        self.record(GatewayCall::ListSessions {
            user_id: user_id.to_string(),
        });
        self.sessions
            .clone()
            .ok_or_else(|| OverlayError::SessionListFailed("HTTP 503".to_string()))
    }
}
