//! Backend gateway: the four remote calls activation depends on.
//!
//! Each operation is a single outbound request with no internal retry. Retry
//! and failure policy belong to the caller; see the activation pipeline.

use crate::error::{OverlayError, Result};
use crate::patterns::RE_SESSION_DURATION;
use overlay_protocol::{SelectedResume, SessionConfig, TokenDelivery};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::future::Future;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Gateway Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Short-lived speech credential. Never persisted, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialToken {
    value: String,
}

impl CredentialToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Hands the token over to the surface together with the session language.
    pub fn into_delivery(self, language: impl Into<String>) -> TokenDelivery {
        TokenDelivery {
            token: self.value,
            language: language.into(),
        }
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialToken")
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub authoritative_session_id: String,
    pub credits_remaining: Option<i64>,
}

/// Resume record as stored by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResumeContent {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl ResumeContent {
    /// Fills `resume` with the fetched fields, keeping whatever the web app
    /// already sent when the backend leaves a field out.
    pub fn hydrate(self, resume: &SelectedResume) -> SelectedResume {
        let mut hydrated = resume.clone();
        hydrated.content = self.content.or(hydrated.content);
        hydrated.file_name = self.file_name.or(hydrated.file_name);
        hydrated.file_type = self.file_type.or(hydrated.file_type);
        hydrated.file_size = self.file_size.or(hydrated.file_size);
        hydrated
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionSummary {
    /// Elapsed seconds from the `HH:MM:SS` duration, if well formed.
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration.as_deref().and_then(parse_duration_secs)
    }
}

pub fn parse_duration_secs(value: &str) -> Option<u64> {
    let caps = RE_SESSION_DURATION.captures(value.trim())?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {}",
            other
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Gateway Trait
// ═══════════════════════════════════════════════════════════════════════════════

pub trait BackendGateway: Send + Sync {
    /// Fails with [`OverlayError::TokenUnavailable`].
    fn fetch_token(&self) -> impl Future<Output = Result<CredentialToken>> + Send;

    /// Registers a session and deducts a credit. Not idempotent.
    ///
    /// Fails with [`OverlayError::SessionStartFailed`].
    fn start_session(
        &self,
        user_id: &str,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<SessionStart>> + Send;

    /// Fails with [`OverlayError::ResumeFetchFailed`].
    fn fetch_resume(&self, resume_id: &str) -> impl Future<Output = Result<ResumeContent>> + Send;

    /// Fails with [`OverlayError::SessionListFailed`].
    fn list_sessions(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<SessionSummary>>> + Send;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP Gateway
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct TokenResponse {
    key: String,
}

#[derive(Deserialize)]
struct StartSessionResponse {
    session: StartedSession,
    #[serde(default)]
    user: Option<SessionUser>,
}

#[derive(Deserialize)]
struct StartedSession {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

#[derive(Deserialize)]
struct SessionUser {
    #[serde(default)]
    sessions_remaining: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| OverlayError::Config {
                path: "apiBaseUrl".into(),
                details: format!("failed to build HTTP client: {}", err),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> std::result::Result<T, String> {
    let response = request
        .send()
        .await
        .map_err(|err| format!("request failed: {}", err))?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("backend returned HTTP {}", status.as_u16()));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| format!("unexpected response body: {}", err))
}

impl BackendGateway for HttpGateway {
    async fn fetch_token(&self) -> Result<CredentialToken> {
        let body: TokenResponse = read_json(self.client.post(self.url("/deepgram-token")))
            .await
            .map_err(OverlayError::TokenUnavailable)?;
        if body.key.is_empty() {
            return Err(OverlayError::TokenUnavailable(
                "backend returned an empty key".to_string(),
            ));
        }
        Ok(CredentialToken::new(body.key))
    }

    async fn start_session(&self, user_id: &str, config: &SessionConfig) -> Result<SessionStart> {
        let payload = json!({
            "userId": user_id,
            "company": config.company,
            "position": config.job_title,
            "settings": config,
        });
        let body: StartSessionResponse =
            read_json(self.client.post(self.url("/sessions/start")).json(&payload))
                .await
                .map_err(OverlayError::SessionStartFailed)?;
        Ok(SessionStart {
            authoritative_session_id: body.session.id,
            credits_remaining: body.user.and_then(|user| user.sessions_remaining),
        })
    }

    async fn fetch_resume(&self, resume_id: &str) -> Result<ResumeContent> {
        let path = format!("/resumes/{}", urlencoding::encode(resume_id));
        read_json(self.client.get(self.url(&path)))
            .await
            .map_err(|details| OverlayError::ResumeFetchFailed {
                id: resume_id.to_string(),
                details,
            })
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let path = format!("/sessions/{}", urlencoding::encode(user_id));
        read_json(self.client.get(self.url(&path)))
            .await
            .map_err(OverlayError::SessionListFailed)
    }
}
