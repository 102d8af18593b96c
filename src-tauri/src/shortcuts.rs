//! Host-global keyboard shortcuts.

use crate::OverlayApp;
use overlay_core::KeyboardCommand;
use tauri::{AppHandle, Manager};
use tauri_plugin_global_shortcut::{GlobalShortcutExt, Shortcut, ShortcutState};

const BINDINGS: [(&str, KeyboardCommand); 7] = [
    ("CommandOrControl+H", KeyboardCommand::GenerateResponse),
    ("CommandOrControl+K", KeyboardCommand::AnalyzeScreen),
    ("CommandOrControl+B", KeyboardCommand::ToggleHide),
    ("CommandOrControl+Left", KeyboardCommand::MoveLeft),
    ("CommandOrControl+Right", KeyboardCommand::MoveRight),
    ("CommandOrControl+Up", KeyboardCommand::MoveUp),
    ("CommandOrControl+Down", KeyboardCommand::MoveDown),
];

/// Registers every binding. A binding another app already owns is logged
/// and skipped; the rest still work.
pub fn register(app: &AppHandle) {
    for (accelerator, command) in BINDINGS {
        let shortcut = match accelerator.parse::<Shortcut>() {
            Ok(shortcut) => shortcut,
            Err(err) => {
                tracing::warn!(accelerator, error = %err, "Invalid shortcut");
                continue;
            }
        };
        let registered = app
            .global_shortcut()
            .on_shortcut(shortcut, move |app, _shortcut, event| {
                if event.state() != ShortcutState::Pressed {
                    return;
                }
                if let Some(state) = app.try_state::<OverlayApp>() {
                    state.router.handle_keyboard(command);
                }
            });
        if let Err(err) = registered {
            tracing::warn!(accelerator, error = %err, "Failed to register shortcut");
        }
    }
}
