//! Tauri commands: the inbound half of the command channel.
//!
//! Each command mirrors one inbound message the overlay content can send.

use crate::OverlayApp;
use overlay_core::OverlayConfig;
use overlay_protocol::{ClickThroughOptions, InboundCommand};
use tauri::{State, WebviewWindow};

#[tauri::command]
pub async fn set_click_through(
    state: State<'_, OverlayApp>,
    ignore: bool,
    options: Option<ClickThroughOptions>,
) -> Result<(), String> {
    let options = options.unwrap_or_default();
    state
        .router
        .handle(InboundCommand::SetClickThrough { ignore, options })
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn hide_overlay(state: State<'_, OverlayApp>) -> Result<(), String> {
    state
        .router
        .handle(InboundCommand::HideOverlay)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn end_session(state: State<'_, OverlayApp>) -> Result<(), String> {
    state
        .router
        .handle(InboundCommand::EndSession)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn start_listening(
    state: State<'_, OverlayApp>,
    language: Option<String>,
) -> Result<(), String> {
    state
        .router
        .handle(InboundCommand::StartListening { language })
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn stop_listening(state: State<'_, OverlayApp>) -> Result<(), String> {
    state
        .router
        .handle(InboundCommand::StopListening)
        .await
        .map_err(|e| e.to_string())
}

/// The page calls this once its event listeners are attached; until then
/// nothing is delivered to it.
#[tauri::command]
pub async fn surface_ready(
    state: State<'_, OverlayApp>,
    window: WebviewWindow,
) -> Result<(), String> {
    state.surface.content_ready(&window);
    Ok(())
}

/// Lets the overlay content read the shell's effective settings.
#[tauri::command]
pub fn overlay_settings(state: State<'_, OverlayApp>) -> OverlayConfig {
    state.config.clone()
}
