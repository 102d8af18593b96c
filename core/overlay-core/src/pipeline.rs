//! Deep-link activation pipeline.
//!
//! One run turns an activation URL into session state on the overlay
//! surface:
//!
//! ```text
//! parse ─▶ decode config ─▶ ensure surface ─▶ wait ready ─┬─▶ (a) start time
//!                                                         ├─▶ (b) start session ─▶ (c) session-data ─┐
//!                                                         ├─▶ (d) token / listening-error            │
//!                                                         └─▶ (e) fetch resume ──────────────────────┴─▶ resume patch
//! ```
//!
//! The branches are joined inside one future, so they interleave on the
//! caller's task rather than running in parallel. The only ordering between
//! them is (b) before (c); the resume patch additionally waits for (c) so it
//! always lands on top of the full session state, never under it.
//!
//! Every delivery carries the ticket of the run that issued it. A newer run,
//! or closing the surface, makes the older run's late results drop silently.

use crate::activation::{is_provisional_session_id, parse_activation_url, ActivationRequest};
use crate::channel::deliver_token;
use crate::config::OverlayConfig;
use crate::error::{OverlayError, Result};
use crate::gateway::{BackendGateway, SessionSummary};
use crate::surface::{DeliveryTicket, OverlayController};
use overlay_protocol::{Delivery, ResumePatch, SessionConfig, SessionData, SessionStartTime};
use std::sync::Arc;
use tokio::sync::oneshot;

/// What one activation run did. Mostly useful to tests and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationOutcome {
    pub provisional_session_id: String,
    /// Authoritative id when the backend issued one, otherwise the provisional id.
    pub session_id: String,
    pub surface_created: bool,
    pub config_decoded: bool,
    /// `None` when the run carried no config.
    pub session_start_time: Option<i64>,
    pub session_delivered: bool,
    /// True when a token (not a listening error) reached the surface.
    pub token_delivered: bool,
    pub resume_hydrated: bool,
}

pub struct ActivationPipeline<G> {
    controller: Arc<OverlayController>,
    gateway: Arc<G>,
    scheme: String,
    default_language: String,
}

impl<G: BackendGateway> ActivationPipeline<G> {
    pub fn new(controller: Arc<OverlayController>, gateway: Arc<G>, config: &OverlayConfig) -> Self {
        Self {
            controller,
            gateway,
            scheme: config.scheme.clone(),
            default_language: config.default_language.clone(),
        }
    }

    pub fn controller(&self) -> &Arc<OverlayController> {
        &self.controller
    }

    /// Runs the pipeline for a raw activation string.
    ///
    /// Input that is not an activation URL is ignored: `Ok(None)`, nothing
    /// touched. Errors mean the run aborted before any delivery.
    pub async fn activate(&self, raw: &str) -> Result<Option<ActivationOutcome>> {
        let Some(request) = parse_activation_url(raw, &self.scheme) else {
            tracing::debug!(input = %raw, "Ignoring non-activation input");
            return Ok(None);
        };
        self.run(request).await.map(Some)
    }

    pub async fn run(&self, request: ActivationRequest) -> Result<ActivationOutcome> {
        tracing::info!(session_id = %request.session_id, "Activating session");

        let config = match request.decode_config() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    session_id = %request.session_id,
                    error = %err,
                    "Session settings unreadable; continuing without them"
                );
                None
            }
        };

        let surface = self.controller.ensure()?;
        if let Err(err) = self.controller.wait_ready(surface.generation).await {
            tracing::error!(
                session_id = %request.session_id,
                error = %err,
                "Overlay surface never became ready; aborting activation"
            );
            return Err(err);
        }
        let ticket = self.controller.begin_activation(surface.generation);

        let (injected_tx, injected_rx) = oneshot::channel();
        let (session_start_time, (session_id, session_delivered), token_delivered, resume_hydrated) = tokio::join!(
            self.restore_start_time(&ticket, &request.session_id, config.as_ref()),
            self.register_and_inject(&ticket, &request.session_id, config.as_ref(), injected_tx),
            self.issue_token(&ticket, config.as_ref()),
            self.hydrate_resume(&ticket, config.as_ref(), injected_rx),
        );

        tracing::info!(
            session_id = %session_id,
            provisional_session_id = %request.session_id,
            session_delivered,
            token_delivered,
            resume_hydrated,
            "Activation finished"
        );

        Ok(ActivationOutcome {
            provisional_session_id: request.session_id,
            session_id,
            surface_created: surface.created,
            config_decoded: config.is_some(),
            session_start_time,
            session_delivered,
            token_delivered,
            resume_hydrated,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Branches
    // ─────────────────────────────────────────────────────────────────────────

    async fn restore_start_time(
        &self,
        ticket: &DeliveryTicket,
        session_id: &str,
        config: Option<&SessionConfig>,
    ) -> Option<i64> {
        let config = config?;

        let sessions = match config.user_id() {
            Some(user_id) if !is_provisional_session_id(session_id) => {
                match self.gateway.list_sessions(user_id).await {
                    Ok(sessions) => sessions,
                    Err(err) => {
                        tracing::debug!(error = %err, "Session list unavailable; not restoring elapsed time");
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let start = session_start_time(now_ms, session_id, &sessions);
        let delivery = Delivery::SessionStartTime(SessionStartTime {
            session_id: session_id.to_string(),
            session_start_time: start,
        });
        log_dropped(self.controller.deliver(ticket, delivery), "session-start-time");
        Some(start)
    }

    async fn register_and_inject(
        &self,
        ticket: &DeliveryTicket,
        provisional_id: &str,
        config: Option<&SessionConfig>,
        injected: oneshot::Sender<String>,
    ) -> (String, bool) {
        let mut session_id = provisional_id.to_string();

        if let Some((user_id, config)) = config.and_then(|c| c.user_id().map(|user| (user, c))) {
            match self.gateway.start_session(user_id, config).await {
                Ok(started) => {
                    tracing::info!(
                        provisional_session_id = %provisional_id,
                        session_id = %started.authoritative_session_id,
                        credits_remaining = ?started.credits_remaining,
                        "Backend session started"
                    );
                    session_id = started.authoritative_session_id;
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %provisional_id,
                        error = %err,
                        "Session start failed; keeping provisional id"
                    );
                }
            }
        }

        let delivery = Delivery::SessionData(SessionData {
            session_id: session_id.clone(),
            config: config.cloned(),
        });
        let delivered = self.controller.deliver(ticket, delivery);
        let delivered = log_dropped(delivered, "session-data");

        // The receiver is gone only when no resume needed hydrating.
        let _ = injected.send(session_id.clone());
        (session_id, delivered)
    }

    async fn issue_token(&self, ticket: &DeliveryTicket, config: Option<&SessionConfig>) -> bool {
        let language = config
            .and_then(|c| c.language.clone())
            .filter(|language| !language.trim().is_empty())
            .unwrap_or_else(|| self.default_language.clone());
        let delivered =
            deliver_token(&self.controller, self.gateway.as_ref(), ticket, language).await;
        matches!(delivered, Ok(true))
    }

    async fn hydrate_resume(
        &self,
        ticket: &DeliveryTicket,
        config: Option<&SessionConfig>,
        injected: oneshot::Receiver<String>,
    ) -> bool {
        let Some(resume) = config.and_then(SessionConfig::resume_needing_content) else {
            return false;
        };
        let Some(resume_id) = resume.resume_id() else {
            return false;
        };

        let fetched = match self.gateway.fetch_resume(resume_id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!(resume_id, error = %err, "Resume content unavailable");
                return false;
            }
        };
        let selected_resume = fetched.hydrate(resume);

        let Ok(session_id) = injected.await else {
            return false;
        };
        let delivery = Delivery::ResumePatch(ResumePatch {
            session_id,
            selected_resume,
        });
        log_dropped(self.controller.deliver(ticket, delivery), "session-resume")
    }
}

/// Start time (epoch ms) of `session_id`, restored from its recorded
/// duration when the list has one, otherwise `now_ms`.
pub fn session_start_time(now_ms: i64, session_id: &str, sessions: &[SessionSummary]) -> i64 {
    sessions
        .iter()
        .find(|session| session.id == session_id)
        .and_then(SessionSummary::duration_secs)
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| secs.checked_mul(1000))
        .map_or(now_ms, |elapsed_ms| now_ms.saturating_sub(elapsed_ms))
}

fn log_dropped<T>(result: Result<T>, event: &'static str) -> bool {
    match result {
        Ok(_) => true,
        Err(OverlayError::SurfaceClosed) => {
            tracing::debug!(event, "Delivery target gone; result discarded");
            false
        }
        Err(err) => {
            tracing::warn!(event, error = %err, "Delivery failed");
            false
        }
    }
}
