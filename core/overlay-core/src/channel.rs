//! Routing for the command channel.
//!
//! Outbound gating (notification vs delivery) lives on the controller, which
//! owns the surface handle. This module turns inbound surface commands and
//! global keyboard commands into controller and gateway calls.

use crate::error::{OverlayError, Result};
use crate::gateway::BackendGateway;
use crate::surface::{DeliveryTicket, OverlayController};
use overlay_protocol::{Delivery, InboundCommand, Notification};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardCommand {
    GenerateResponse,
    AnalyzeScreen,
    ToggleHide,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveDown,
}

impl KeyboardCommand {
    pub const ALL: [KeyboardCommand; 7] = [
        KeyboardCommand::GenerateResponse,
        KeyboardCommand::AnalyzeScreen,
        KeyboardCommand::ToggleHide,
        KeyboardCommand::MoveLeft,
        KeyboardCommand::MoveRight,
        KeyboardCommand::MoveUp,
        KeyboardCommand::MoveDown,
    ];

    /// Unit direction for the move commands.
    fn direction(self) -> Option<(i32, i32)> {
        match self {
            KeyboardCommand::MoveLeft => Some((-1, 0)),
            KeyboardCommand::MoveRight => Some((1, 0)),
            KeyboardCommand::MoveUp => Some((0, -1)),
            KeyboardCommand::MoveDown => Some((0, 1)),
            _ => None,
        }
    }
}

/// Fetches a credential token and hands it, or the failure, to the surface.
///
/// The surface always hears back: a token on success, `listening-error`
/// otherwise, so it can offer a retry instead of waiting forever. `Ok(true)`
/// means a token was delivered, `Ok(false)` an error notice.
pub async fn deliver_token<G: BackendGateway>(
    controller: &OverlayController,
    gateway: &G,
    ticket: &DeliveryTicket,
    language: String,
) -> Result<bool> {
    match gateway.fetch_token().await {
        Ok(token) => {
            tracing::info!(language = %language, "Credential token issued");
            controller.deliver(ticket, Delivery::Token(token.into_delivery(language)))?;
            Ok(true)
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to get credential token");
            controller.deliver(ticket, Delivery::ListeningError(err.to_string()))?;
            Ok(false)
        }
    }
}

pub struct CommandRouter<G> {
    controller: Arc<OverlayController>,
    gateway: Arc<G>,
    default_language: String,
    move_step: i32,
}

impl<G: BackendGateway> CommandRouter<G> {
    pub fn new(
        controller: Arc<OverlayController>,
        gateway: Arc<G>,
        default_language: impl Into<String>,
        move_step: i32,
    ) -> Self {
        Self {
            controller,
            gateway,
            default_language: default_language.into(),
            move_step,
        }
    }

    pub async fn handle(&self, command: InboundCommand) -> Result<()> {
        tracing::debug!(command = command.name(), "Inbound overlay command");
        match command {
            InboundCommand::SetClickThrough { ignore, options } => {
                self.controller.set_click_through(ignore, options.forward)
            }
            InboundCommand::HideOverlay => self.controller.toggle_minimize().map(|_| ()),
            InboundCommand::EndSession => {
                self.controller.close();
                Ok(())
            }
            InboundCommand::StartListening { language } => {
                let ticket = self
                    .controller
                    .surface_ticket()
                    .ok_or(OverlayError::SurfaceClosed)?;
                let language = language
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| self.default_language.clone());
                deliver_token(&self.controller, self.gateway.as_ref(), &ticket, language)
                    .await
                    .map(|_| ())
            }
            InboundCommand::StopListening => {
                self.controller.notify(Notification::StopAudioCapture);
                Ok(())
            }
        }
    }

    pub fn handle_keyboard(&self, command: KeyboardCommand) {
        tracing::debug!(command = ?command, "Keyboard command");
        let notification = match command {
            KeyboardCommand::GenerateResponse => Notification::GenerateResponse,
            KeyboardCommand::AnalyzeScreen => Notification::AnalyzeScreen,
            KeyboardCommand::ToggleHide => Notification::ToggleHide,
            _ => {
                if let Some((x, y)) = command.direction() {
                    if let Err(err) = self.controller.move_by(x * self.move_step, y * self.move_step)
                    {
                        tracing::debug!(error = %err, "Overlay move skipped");
                    }
                }
                return;
            }
        };
        self.controller.notify(notification);
    }
}
