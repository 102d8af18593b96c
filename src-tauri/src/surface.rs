//! `SurfaceBackend` on a Tauri webview window.

use overlay_core::{
    OverlayError, ReadySignal, Result, SurfaceBackend, SurfaceOptions, SurfacePosition,
    SurfaceSize, WorkArea,
};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tauri::{
    AppHandle, Emitter, PhysicalPosition, PhysicalSize, Runtime, WebviewUrl, WebviewWindow,
    WebviewWindowBuilder,
};

const OVERLAY_PAGE: &str = "overlay.html";
const OVERLAY_TITLE: &str = "Interview Overlay";

/// The window currently owned by the controller.
///
/// `label` is set before the window exists, so a `destroy` that races a
/// `create` can be detected once the build returns.
struct Slot<R: Runtime> {
    label: Option<String>,
    window: Option<WebviewWindow<R>>,
    ready: Option<ReadySignal>,
}

pub struct TauriSurface<R: Runtime> {
    app: AppHandle<R>,
    slot: Mutex<Slot<R>>,
}

impl<R: Runtime> TauriSurface<R> {
    pub fn new(app: AppHandle<R>) -> Self {
        Self {
            app,
            slot: Mutex::new(Slot {
                label: None,
                window: None,
                ready: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<R>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` on a clone of the live window. The slot lock is not held
    /// while `f` runs: window getters wait on the event loop, and event-loop
    /// handlers use this surface too.
    fn with_window<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&WebviewWindow<R>) -> tauri::Result<T>,
    ) -> Result<T> {
        let window = self
            .lock()
            .window
            .clone()
            .ok_or_else(|| OverlayError::surface(op, "no live overlay window"))?;
        f(&window).map_err(|err| OverlayError::surface(op, err.to_string()))
    }

    /// The page in `window` has its listeners attached. Fires the pending
    /// ready signal once; later calls (page reloads) are ignored.
    pub fn content_ready(&self, window: &WebviewWindow<R>) {
        let ready = {
            let mut slot = self.lock();
            if slot.label.as_deref() != Some(window.label()) {
                tracing::debug!(label = window.label(), "Ready from a window we no longer own");
                return;
            }
            if slot.window.is_none() {
                slot.window = Some(window.clone());
            }
            slot.ready.take()
        };
        if let Some(ready) = ready {
            ready.fire();
        }
    }

    /// Drops the handle if `label` is the live overlay window.
    ///
    /// Returns true when the window went away on its own, i.e. not through
    /// [`SurfaceBackend::destroy`].
    pub fn release_if_current(&self, label: &str) -> bool {
        let mut slot = self.lock();
        if slot.label.as_deref() != Some(label) {
            return false;
        }
        slot.label = None;
        slot.window = None;
        slot.ready = None;
        true
    }
}

impl<R: Runtime> SurfaceBackend for TauriSurface<R> {
    fn create(&self, options: &SurfaceOptions, ready: ReadySignal) -> Result<()> {
        {
            let mut slot = self.lock();
            slot.label = Some(options.label.clone());
            slot.window = None;
            slot.ready = Some(ready);
        }

        let window = WebviewWindowBuilder::new(
            &self.app,
            options.label.as_str(),
            WebviewUrl::App(OVERLAY_PAGE.into()),
        )
        .title(OVERLAY_TITLE)
        .inner_size(f64::from(options.width), f64::from(options.height))
        .decorations(!options.frameless)
        .always_on_top(options.always_on_top)
        .transparent(options.transparent)
        .skip_taskbar(options.skip_taskbar)
        .content_protected(options.content_protected)
        .resizable(false)
        .focused(false)
        .build()
        .map_err(|err| {
            self.release_if_current(&options.label);
            OverlayError::SurfaceCreationFailed(err.to_string())
        })?;

        let owned = {
            let mut slot = self.lock();
            let owned = slot.label.as_deref() == Some(options.label.as_str());
            if owned && slot.window.is_none() {
                slot.window = Some(window.clone());
            }
            owned
        };
        if !owned {
            if let Err(err) = window.destroy() {
                tracing::warn!(label = window.label(), error = %err, "Failed to destroy orphaned overlay window");
            }
            return Err(OverlayError::SurfaceCreationFailed(
                "overlay closed while its window was being built".to_string(),
            ));
        }

        if options.ignore_cursor_events {
            if let Err(err) = window.set_ignore_cursor_events(true) {
                tracing::warn!(error = %err, "Overlay created without click-through");
            }
        }
        Ok(())
    }

    fn destroy(&self) {
        let window = {
            let mut slot = self.lock();
            slot.label = None;
            slot.ready = None;
            slot.window.take()
        };
        let Some(window) = window else {
            return;
        };
        if let Err(err) = window.destroy() {
            tracing::warn!(label = window.label(), error = %err, "Failed to destroy overlay window");
        }
    }

    fn size(&self) -> Result<SurfaceSize> {
        self.with_window("size", |window| {
            window.outer_size().map(|size| SurfaceSize {
                width: size.width,
                height: size.height,
            })
        })
    }

    fn position(&self) -> Result<SurfacePosition> {
        self.with_window("position", |window| {
            window
                .outer_position()
                .map(|position| SurfacePosition {
                    x: position.x,
                    y: position.y,
                })
        })
    }

    fn set_size(&self, size: SurfaceSize) -> Result<()> {
        self.with_window("set_size", |window| {
            window.set_size(PhysicalSize::new(size.width, size.height))
        })
    }

    fn set_position(&self, position: SurfacePosition) -> Result<()> {
        self.with_window("set_position", |window| {
            window.set_position(PhysicalPosition::new(position.x, position.y))
        })
    }

    fn set_ignore_cursor_events(&self, ignore: bool, forward: bool) -> Result<()> {
        // Webview windows keep receiving hover events while ignoring clicks
        // only where the platform does so natively; `forward` is advisory.
        tracing::debug!(ignore, forward, "Overlay click-through");
        self.with_window("set_ignore_cursor_events", |window| {
            window.set_ignore_cursor_events(ignore)
        })
    }

    fn work_area(&self) -> Result<WorkArea> {
        let monitor = self
            .app
            .primary_monitor()
            .map_err(|err| OverlayError::surface("work_area", err.to_string()))?
            .ok_or_else(|| OverlayError::surface("work_area", "primary monitor not found"))?;
        let area = monitor.work_area();
        Ok(WorkArea {
            x: area.position.x,
            y: area.position.y,
            width: area.size.width,
            height: area.size.height,
        })
    }

    fn focus(&self) -> Result<()> {
        self.with_window("focus", |window| window.set_focus())
    }

    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        let label = self.with_window("emit", |window| Ok(window.label().to_string()))?;
        self.app
            .emit_to(label.as_str(), event, payload)
            .map_err(|err| OverlayError::surface("emit", err.to_string()))
    }
}
