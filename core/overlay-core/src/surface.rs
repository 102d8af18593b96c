//! Overlay surface controller.
//!
//! Owns the lifecycle of the single overlay surface and every write to its
//! geometry. The real window lives behind [`SurfaceBackend`]; the desktop
//! shell implements it on a webview window, tests use an in-memory fake.
//!
//! ```text
//! Absent ──ensure()──▶ Creating ──ready signal──▶ Ready ──close()──▶ Closed
//!                                                   ▲                   │
//!                                                   └─────ensure()──────┘
//! ```
//!
//! Every surface gets a fresh generation number. Readiness signals, waiters
//! and deliveries carry the generation they were issued for, so a closed or
//! replaced surface silently swallows anything addressed to its predecessor.

use crate::config::OverlayConfig;
use crate::error::{OverlayError, Result};
use crate::geometry::{GeometryStore, OverlayGeometry, SurfacePosition, SurfaceSize, WorkArea};
use overlay_protocol::{Delivery, Notification};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// Window labels are `overlay-<generation>`, so a late event from a
/// destroyed window can never be mistaken for its replacement.
pub const OVERLAY_LABEL: &str = "overlay";

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Seam
// ═══════════════════════════════════════════════════════════════════════════════

/// How the surface is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub frameless: bool,
    pub always_on_top: bool,
    pub transparent: bool,
    pub skip_taskbar: bool,
    pub ignore_cursor_events: bool,
    pub forward_cursor_events: bool,
    /// Honoured only where the platform supports it.
    pub content_protected: bool,
}

impl SurfaceOptions {
    pub fn overlay(generation: u64, width: u32, height: u32) -> Self {
        Self {
            label: format!("{}-{}", OVERLAY_LABEL, generation),
            width,
            height,
            frameless: true,
            always_on_top: true,
            transparent: true,
            skip_taskbar: true,
            ignore_cursor_events: true,
            forward_cursor_events: true,
            content_protected: true,
        }
    }
}

/// The platform window behind the overlay.
///
/// Implementations hold at most one live window. `destroy` must drop that
/// handle so the next `create` builds a fresh window.
///
/// The controller never holds its own lock while calling in here, so an
/// implementation may block on a UI thread that itself uses the controller.
pub trait SurfaceBackend: Send + Sync {
    /// Builds the window. `ready` is fired once its content is listening
    /// for deliveries, not merely loaded.
    fn create(&self, options: &SurfaceOptions, ready: ReadySignal) -> Result<()>;
    fn destroy(&self);
    fn size(&self) -> Result<SurfaceSize>;
    fn position(&self) -> Result<SurfacePosition>;
    fn set_size(&self, size: SurfaceSize) -> Result<()>;
    fn set_position(&self, position: SurfacePosition) -> Result<()>;
    fn set_ignore_cursor_events(&self, ignore: bool, forward: bool) -> Result<()>;
    fn work_area(&self) -> Result<WorkArea>;
    fn focus(&self) -> Result<()>;
    fn emit(&self, event: &str, payload: Value) -> Result<()>;
}

/// Handed to the backend on create; fires the `Creating -> Ready` transition.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    controller: Weak<OverlayController>,
    generation: u64,
}

impl ReadySignal {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Safe to call repeatedly and after the surface was closed.
    pub fn fire(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.mark_ready(self.generation);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Controller State
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfacePhase {
    Absent,
    Creating,
    Ready,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickThrough {
    pub ignore: bool,
    pub forward: bool,
}

/// Returned by [`OverlayController::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceTicket {
    pub generation: u64,
    /// True when this call constructed the surface.
    pub created: bool,
}

/// Identifies where a delivery may still land.
///
/// Activation tickets are superseded by the next activation; plain surface
/// tickets only by closing the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTicket {
    pub generation: u64,
    pub activation: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct SurfaceSettings {
    pub width: u32,
    pub height: u32,
    pub collapsed_height: u32,
    pub top_offset: i32,
    pub ready_timeout: Duration,
}

impl SurfaceSettings {
    pub fn from_config(config: &OverlayConfig) -> Self {
        Self {
            width: config.overlay_width.max(1),
            height: config.overlay_height.max(1),
            collapsed_height: config.collapsed_height.max(1),
            top_offset: config.top_offset,
            ready_timeout: Duration::from_secs(config.ready_timeout_secs.max(1)),
        }
    }
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self::from_config(&OverlayConfig::default())
    }
}

#[derive(Debug)]
struct ControllerState {
    phase: SurfacePhase,
    generation: u64,
    activation: u64,
    click_through: ClickThrough,
    geometry: GeometryStore,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Controller
// ═══════════════════════════════════════════════════════════════════════════════

pub struct OverlayController {
    backend: Arc<dyn SurfaceBackend>,
    settings: SurfaceSettings,
    state: Mutex<ControllerState>,
    phase_tx: watch::Sender<(u64, SurfacePhase)>,
    weak_self: Weak<OverlayController>,
}

impl OverlayController {
    pub fn new(backend: Arc<dyn SurfaceBackend>, settings: SurfaceSettings) -> Arc<Self> {
        let (phase_tx, _) = watch::channel((0, SurfacePhase::Absent));
        Arc::new_cyclic(|weak_self| Self {
            backend,
            settings,
            state: Mutex::new(ControllerState {
                phase: SurfacePhase::Absent,
                generation: 0,
                activation: 0,
                click_through: ClickThrough {
                    ignore: true,
                    forward: true,
                },
                geometry: GeometryStore::new(),
            }),
            phase_tx,
            weak_self: weak_self.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, generation: u64, phase: SurfacePhase) {
        self.phase_tx.send_replace((generation, phase));
    }

    fn is_phase(&self, generation: u64, phase: SurfacePhase) -> bool {
        let state = self.lock();
        state.generation == generation && state.phase == phase
    }

    /// Generation of the ready surface, or `SurfaceClosed`.
    fn ready_generation(&self) -> Result<u64> {
        let state = self.lock();
        if state.phase == SurfacePhase::Ready {
            Ok(state.generation)
        } else {
            Err(OverlayError::SurfaceClosed)
        }
    }

    pub fn settings(&self) -> &SurfaceSettings {
        &self.settings
    }

    pub fn phase(&self) -> SurfacePhase {
        self.lock().phase
    }

    pub fn is_minimized(&self) -> bool {
        self.lock().geometry.load().minimized
    }

    pub fn geometry(&self) -> OverlayGeometry {
        self.lock().geometry.load()
    }

    pub fn click_through(&self) -> ClickThrough {
        self.lock().click_through
    }

    /// Creates the surface unless one already exists. Idempotent.
    pub fn ensure(&self) -> Result<SurfaceTicket> {
        let generation = {
            let mut state = self.lock();
            match state.phase {
                SurfacePhase::Creating | SurfacePhase::Ready => {
                    return Ok(SurfaceTicket {
                        generation: state.generation,
                        created: false,
                    });
                }
                SurfacePhase::Absent | SurfacePhase::Closed => {
                    state.generation += 1;
                    state.phase = SurfacePhase::Creating;
                    state.click_through = ClickThrough {
                        ignore: true,
                        forward: true,
                    };
                    state.generation
                }
            }
        };
        self.publish(generation, SurfacePhase::Creating);

        let options =
            SurfaceOptions::overlay(generation, self.settings.width, self.settings.height);
        let ready = ReadySignal {
            controller: self.weak_self.clone(),
            generation,
        };

        // The lock is released here: a backend may fire `ready` synchronously.
        if let Err(err) = self.backend.create(&options, ready) {
            let mut state = self.lock();
            if state.generation == generation && state.phase == SurfacePhase::Creating {
                state.phase = SurfacePhase::Absent;
                drop(state);
                self.publish(generation, SurfacePhase::Absent);
            }
            let details = match err {
                OverlayError::SurfaceCreationFailed(details) => details,
                other => other.to_string(),
            };
            tracing::error!(error = %details, "Failed to create overlay surface");
            return Err(OverlayError::SurfaceCreationFailed(details));
        }

        tracing::info!(generation, "Overlay surface created");
        Ok(SurfaceTicket {
            generation,
            created: true,
        })
    }

    /// Positions the new surface at the top center and marks it ready.
    pub fn mark_ready(&self, generation: u64) {
        if !self.is_phase(generation, SurfacePhase::Creating) {
            tracing::debug!(generation, "Ignoring stale ready signal");
            return;
        }

        let size = self.backend.size().unwrap_or(SurfaceSize {
            width: self.settings.width,
            height: self.settings.height,
        });
        match self.backend.work_area() {
            Ok(area) => {
                let position = area.top_center(size, self.settings.top_offset);
                if let Err(err) = self.backend.set_position(position) {
                    tracing::warn!(error = %err, "Failed to position overlay surface");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "No work area; leaving overlay where it opened");
            }
        }

        {
            let mut state = self.lock();
            if state.generation != generation || state.phase != SurfacePhase::Creating {
                tracing::debug!(generation, phase = ?state.phase, "Surface closed while positioning");
                return;
            }
            state.phase = SurfacePhase::Ready;
        }
        self.publish(generation, SurfacePhase::Ready);
        tracing::info!(generation, "Overlay surface ready");
    }

    /// Resolves once surface `generation` is ready.
    ///
    /// Fails with [`OverlayError::SurfaceClosed`] if that surface is closed or
    /// replaced first, and [`OverlayError::SurfaceNotReady`] on timeout.
    pub async fn wait_ready(&self, generation: u64) -> Result<()> {
        let mut rx = self.phase_tx.subscribe();
        let wait = async {
            loop {
                let (current, phase) = *rx.borrow_and_update();
                if current != generation || phase == SurfacePhase::Closed {
                    return Err(OverlayError::SurfaceClosed);
                }
                if phase == SurfacePhase::Ready {
                    return Ok(());
                }
                if rx.changed().await.is_err() {
                    return Err(OverlayError::SurfaceClosed);
                }
            }
        };

        match tokio::time::timeout(self.settings.ready_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(OverlayError::SurfaceNotReady(
                self.settings.ready_timeout.as_secs(),
            )),
        }
    }

    /// Starts a new activation on surface `generation`, superseding any
    /// earlier activation's in-flight deliveries.
    pub fn begin_activation(&self, generation: u64) -> DeliveryTicket {
        let mut state = self.lock();
        state.activation += 1;
        DeliveryTicket {
            generation,
            activation: Some(state.activation),
        }
    }

    /// Ticket for deliveries that belong to the surface rather than to one
    /// activation. `None` unless a surface is ready.
    pub fn surface_ticket(&self) -> Option<DeliveryTicket> {
        let state = self.lock();
        (state.phase == SurfacePhase::Ready).then_some(DeliveryTicket {
            generation: state.generation,
            activation: None,
        })
    }

    fn is_current(&self, ticket: &DeliveryTicket) -> bool {
        let state = self.lock();
        let superseded = ticket
            .activation
            .is_some_and(|activation| activation != state.activation);
        state.phase == SurfacePhase::Ready && state.generation == ticket.generation && !superseded
    }

    /// Sends a delivery if its target is still current.
    pub fn deliver(&self, ticket: &DeliveryTicket, delivery: Delivery) -> Result<()> {
        let event = delivery.event_name();
        if !self.is_current(ticket) {
            tracing::debug!(
                event,
                generation = ticket.generation,
                "Dropping delivery for closed or superseded surface"
            );
            return Err(OverlayError::SurfaceClosed);
        }

        let payload = delivery.payload().map_err(|source| OverlayError::Json {
            context: format!("serializing {}", event),
            source,
        })?;
        match self.backend.emit(event, payload) {
            // The surface went away between the check and the emit.
            Err(_) if !self.is_current(ticket) => Err(OverlayError::SurfaceClosed),
            result => result,
        }
    }

    /// Fire-and-forget. Returns whether the surface was there to hear it.
    pub fn notify(&self, notification: Notification) -> bool {
        if self.ready_generation().is_err() {
            tracing::debug!(
                event = notification.event_name(),
                "No ready overlay; dropping notification"
            );
            return false;
        }
        match self
            .backend
            .emit(notification.event_name(), notification.payload())
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    event = notification.event_name(),
                    error = %err,
                    "Failed to send notification"
                );
                false
            }
        }
    }

    /// Destroys the surface. The next `ensure` builds a new one.
    pub fn close(&self) {
        self.teardown(true);
    }

    /// The window went away without us (user closed it, OS destroyed it).
    pub fn surface_destroyed(&self) {
        self.teardown(false);
    }

    fn teardown(&self, destroy_backend: bool) {
        let mut state = self.lock();
        if matches!(state.phase, SurfacePhase::Absent | SurfacePhase::Closed) {
            return;
        }
        let generation = state.generation;
        state.phase = SurfacePhase::Closed;

        // Keep the restorable size/position; a new surface starts expanded.
        let mut geometry = state.geometry.load();
        geometry.minimized = false;
        if let Err(err) = state.geometry.save(geometry) {
            tracing::warn!(error = %err, "Failed to reset minimized flag");
        }
        drop(state);

        if destroy_backend {
            self.backend.destroy();
        }
        self.publish(generation, SurfacePhase::Closed);
        tracing::info!(generation, "Overlay surface closed");
    }

    /// Collapses the surface to its header, or restores it.
    ///
    /// Returns the new minimized flag and tells the surface about it. The
    /// flag flips under the state lock; the window is read and resized
    /// outside it, so a backend that round-trips to the UI thread cannot
    /// block anyone waiting on the controller.
    pub fn toggle_minimize(&self) -> Result<bool> {
        let generation = self.ready_generation()?;
        let minimized = if self.geometry().minimized {
            self.restore(generation)?;
            false
        } else {
            self.minimize(generation)?;
            true
        };

        tracing::debug!(minimized, "Overlay minimize toggled");
        self.notify(Notification::ToggleMinimize(minimized));
        Ok(minimized)
    }

    fn minimize(&self, generation: u64) -> Result<()> {
        let size = self.backend.size()?;
        let position = self.backend.position()?;
        {
            let mut state = self.lock();
            if state.generation != generation || state.phase != SurfacePhase::Ready {
                return Err(OverlayError::SurfaceClosed);
            }
            if state.geometry.load().minimized {
                return Err(OverlayError::surface("minimize", "already minimized"));
            }
            state.geometry.save(OverlayGeometry {
                width: size.width,
                height: size.height,
                x: position.x,
                y: position.y,
                minimized: true,
            })?;
        }

        let collapsed = SurfaceSize {
            width: size.width,
            height: self.settings.collapsed_height,
        };
        self.backend
            .set_size(collapsed)
            .inspect_err(|_| self.set_minimized_flag(generation, false))
    }

    fn restore(&self, generation: u64) -> Result<()> {
        let stored = {
            let mut state = self.lock();
            if state.generation != generation || state.phase != SurfacePhase::Ready {
                return Err(OverlayError::SurfaceClosed);
            }
            let stored = state.geometry.load();
            if !stored.minimized {
                return Err(OverlayError::surface("restore", "not minimized"));
            }
            state.geometry.save(OverlayGeometry {
                minimized: false,
                ..stored
            })?;
            stored
        };

        self.backend
            .set_size(SurfaceSize {
                width: stored.width,
                height: stored.height,
            })
            .and_then(|()| {
                self.backend.set_position(SurfacePosition {
                    x: stored.x,
                    y: stored.y,
                })
            })
            .inspect_err(|_| self.set_minimized_flag(generation, true))
    }

    /// Rolls the flag back after the window refused the resize.
    fn set_minimized_flag(&self, generation: u64, minimized: bool) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        let geometry = OverlayGeometry {
            minimized,
            ..state.geometry.load()
        };
        if let Err(err) = state.geometry.save(geometry) {
            tracing::warn!(error = %err, "Failed to roll back minimized flag");
        }
    }

    /// Lets pointer input fall through to whatever is beneath the surface.
    ///
    /// With `forward_events`, move/hover events still reach the surface's
    /// content so hover affordances keep working.
    pub fn set_click_through(&self, ignore: bool, forward_events: bool) -> Result<()> {
        let generation = self.live_generation().ok_or(OverlayError::SurfaceClosed)?;
        self.backend.set_ignore_cursor_events(ignore, forward_events)?;

        let mut state = self.lock();
        if state.generation == generation {
            state.click_through = ClickThrough {
                ignore,
                forward: forward_events,
            };
        }
        Ok(())
    }

    /// Moves the surface by a delta, clamped to the primary work area.
    pub fn move_by(&self, dx: i32, dy: i32) -> Result<SurfacePosition> {
        self.ready_generation()?;
        let position = self.backend.position()?;
        let size = self.backend.size()?;
        let area = self.backend.work_area()?;
        let target = area.clamp_move(position, size, dx, dy);
        self.backend.set_position(target)?;
        Ok(target)
    }

    /// Brings an existing surface to the front. No-op without one.
    pub fn focus(&self) -> Result<()> {
        if self.live_generation().is_none() {
            return Ok(());
        }
        self.backend.focus()
    }

    /// Generation of a surface that is being created or is ready.
    fn live_generation(&self) -> Option<u64> {
        let state = self.lock();
        matches!(state.phase, SurfacePhase::Creating | SurfacePhase::Ready)
            .then_some(state.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSurface;
    use overlay_protocol::{SessionData, TokenDelivery};
    use serde_json::json;

    fn controller() -> (Arc<FakeSurface>, Arc<OverlayController>) {
        let surface = Arc::new(FakeSurface::auto_ready());
        let controller = OverlayController::new(surface.clone(), SurfaceSettings::default());
        (surface, controller)
    }

    fn session_data(id: &str) -> Delivery {
        Delivery::SessionData(SessionData {
            session_id: id.to_string(),
            config: None,
        })
    }

    #[test]
    fn ensure_is_idempotent() {
        let (surface, controller) = controller();
        let first = controller.ensure().unwrap();
        let second = controller.ensure().unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.generation, second.generation);
        assert_eq!(surface.create_count(), 1);
        assert_eq!(controller.phase(), SurfacePhase::Ready);
    }

    #[test]
    fn new_surface_is_configured_as_overlay() {
        let (surface, controller) = controller();
        controller.ensure().unwrap();

        let options = surface.last_options().unwrap();
        assert_eq!(options.label, "overlay-1");
        assert_eq!((options.width, options.height), (400, 600));
        assert!(options.frameless && options.always_on_top && options.transparent);
        assert!(options.skip_taskbar && options.content_protected);
        assert!(options.ignore_cursor_events && options.forward_cursor_events);
        assert_eq!(
            controller.click_through(),
            ClickThrough {
                ignore: true,
                forward: true
            }
        );
    }

    #[test]
    fn ready_surface_is_top_centered() {
        let (surface, controller) = controller();
        controller.ensure().unwrap();
        // 1440 wide work area, 400 wide surface.
        assert_eq!(surface.position().unwrap(), SurfacePosition { x: 520, y: 1 });
    }

    #[test]
    fn close_then_ensure_creates_fresh_surface() {
        let (surface, controller) = controller();
        let first = controller.ensure().unwrap();
        controller.close();
        assert_eq!(controller.phase(), SurfacePhase::Closed);
        assert_eq!(surface.destroy_count(), 1);

        let second = controller.ensure().unwrap();
        assert!(second.created);
        assert!(second.generation > first.generation);
        assert_eq!(surface.create_count(), 2);
    }

    #[test]
    fn close_without_surface_is_noop() {
        let (surface, controller) = controller();
        controller.close();
        assert_eq!(controller.phase(), SurfacePhase::Absent);
        assert_eq!(surface.destroy_count(), 0);
    }

    #[test]
    fn creation_failure_leaves_surface_absent() {
        let surface = Arc::new(FakeSurface::auto_ready());
        surface.fail_create("no display");
        let controller = OverlayController::new(surface.clone(), SurfaceSettings::default());

        let err = controller.ensure().unwrap_err();
        assert!(matches!(err, OverlayError::SurfaceCreationFailed(_)));
        assert_eq!(controller.phase(), SurfacePhase::Absent);
    }

    #[test]
    fn stale_ready_signal_is_ignored() {
        let surface = Arc::new(FakeSurface::manual_ready());
        let controller = OverlayController::new(surface.clone(), SurfaceSettings::default());

        controller.ensure().unwrap();
        let stale = surface.take_ready_signal().unwrap();
        controller.close();
        controller.ensure().unwrap();

        stale.fire();
        assert_eq!(controller.phase(), SurfacePhase::Creating);

        surface.take_ready_signal().unwrap().fire();
        assert_eq!(controller.phase(), SurfacePhase::Ready);
    }

    #[test]
    fn minimize_then_restore_round_trips_geometry() {
        let (surface, controller) = controller();
        controller.ensure().unwrap();

        for (width, height, x, y) in [
            (400, 600, 520, 1),
            (1, 1, 0, 0),
            (777, 333, -12, 45),
            (u32::MAX, u32::MAX, i32::MIN, i32::MAX),
        ] {
            surface.set_size(SurfaceSize { width, height }).unwrap();
            surface.set_position(SurfacePosition { x, y }).unwrap();

            assert!(controller.toggle_minimize().unwrap());
            assert_eq!(
                surface.size().unwrap(),
                SurfaceSize {
                    width,
                    height: 64
                }
            );

            assert!(!controller.toggle_minimize().unwrap());
            assert_eq!(surface.size().unwrap(), SurfaceSize { width, height });
            assert_eq!(surface.position().unwrap(), SurfacePosition { x, y });
        }
    }

    #[test]
    fn toggle_minimize_notifies_surface() {
        let (surface, controller) = controller();
        controller.ensure().unwrap();

        controller.toggle_minimize().unwrap();
        controller.toggle_minimize().unwrap();

        let toggles: Vec<Value> = surface
            .emitted()
            .into_iter()
            .filter(|(event, _)| event == "toggle-minimize")
            .map(|(_, payload)| payload)
            .collect();
        assert_eq!(toggles, vec![json!(true), json!(false)]);
    }

    #[test]
    fn toggle_minimize_requires_ready_surface() {
        let (_, controller) = controller();
        assert!(matches!(
            controller.toggle_minimize(),
            Err(OverlayError::SurfaceClosed)
        ));
    }

    #[test]
    fn reopened_surface_starts_expanded() {
        let (_, controller) = controller();
        controller.ensure().unwrap();
        controller.toggle_minimize().unwrap();
        controller.close();
        controller.ensure().unwrap();
        assert!(!controller.is_minimized());
    }

    #[test]
    fn click_through_is_recorded() {
        let (surface, controller) = controller();
        controller.ensure().unwrap();
        controller.set_click_through(false, false).unwrap();

        assert_eq!(surface.ignore_cursor_events(), (false, false));
        assert_eq!(
            controller.click_through(),
            ClickThrough {
                ignore: false,
                forward: false
            }
        );
    }

    #[test]
    fn move_is_clamped() {
        let (surface, controller) = controller();
        controller.ensure().unwrap();

        let moved = controller.move_by(-10_000, 50).unwrap();
        assert_eq!(moved, SurfacePosition { x: 0, y: 51 });
        assert_eq!(surface.position().unwrap(), moved);

        let moved = controller.move_by(10_000, 10_000).unwrap();
        assert_eq!(moved, SurfacePosition { x: 1040, y: 300 });
    }

    #[test]
    fn deliveries_require_current_surface() {
        let (surface, controller) = controller();
        let ticket = controller.ensure().unwrap();
        let delivery = controller.begin_activation(ticket.generation);

        controller.deliver(&delivery, session_data("temp-1")).unwrap();
        controller.close();
        assert!(matches!(
            controller.deliver(&delivery, session_data("temp-1")),
            Err(OverlayError::SurfaceClosed)
        ));
        assert_eq!(surface.events_named("session-data").len(), 1);
        assert_eq!(controller.phase(), SurfacePhase::Closed);
    }

    #[test]
    fn newer_activation_supersedes_older_deliveries() {
        let (surface, controller) = controller();
        let ticket = controller.ensure().unwrap();
        let older = controller.begin_activation(ticket.generation);
        let newer = controller.begin_activation(ticket.generation);

        let token = Delivery::Token(TokenDelivery {
            token: "t".to_string(),
            language: "en-US".to_string(),
        });
        assert!(controller.deliver(&older, token.clone()).is_err());
        assert!(controller.deliver(&newer, token).is_ok());
        assert_eq!(surface.events_named("token-delivery").len(), 1);
    }

    #[test]
    fn notifications_are_dropped_without_ready_surface() {
        let surface = Arc::new(FakeSurface::manual_ready());
        let controller = OverlayController::new(surface.clone(), SurfaceSettings::default());

        assert!(!controller.notify(Notification::GenerateResponse));
        controller.ensure().unwrap();
        assert!(!controller.notify(Notification::GenerateResponse));

        surface.take_ready_signal().unwrap().fire();
        assert!(controller.notify(Notification::GenerateResponse));
        assert_eq!(surface.events_named("generate-response").len(), 1);
    }

    #[tokio::test]
    async fn wait_ready_resolves_on_signal() {
        let surface = Arc::new(FakeSurface::manual_ready());
        let controller = OverlayController::new(surface.clone(), SurfaceSettings::default());
        let ticket = controller.ensure().unwrap();

        let signal = surface.take_ready_signal().unwrap();
        let (waited, ()) = tokio::join!(controller.wait_ready(ticket.generation), async {
            tokio::task::yield_now().await;
            signal.fire();
        });
        assert!(waited.is_ok());
    }

    #[tokio::test]
    async fn wait_ready_fails_when_closed() {
        let surface = Arc::new(FakeSurface::manual_ready());
        let controller = OverlayController::new(surface.clone(), SurfaceSettings::default());
        let ticket = controller.ensure().unwrap();

        let (waited, ()) = tokio::join!(controller.wait_ready(ticket.generation), async {
            tokio::task::yield_now().await;
            controller.close();
        });
        assert!(matches!(waited, Err(OverlayError::SurfaceClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_times_out() {
        let surface = Arc::new(FakeSurface::manual_ready());
        let controller = OverlayController::new(surface.clone(), SurfaceSettings::default());
        let ticket = controller.ensure().unwrap();

        let result = controller.wait_ready(ticket.generation).await;
        assert!(matches!(result, Err(OverlayError::SurfaceNotReady(15))));
    }

    #[test]
    fn surface_destroyed_skips_backend_destroy() {
        let (surface, controller) = controller();
        controller.ensure().unwrap();
        controller.surface_destroyed();

        assert_eq!(controller.phase(), SurfacePhase::Closed);
        assert_eq!(surface.destroy_count(), 0);
        assert!(controller.ensure().unwrap().created);
    }

    /// Counts backend calls made while the controller's state lock is held.
    /// A desktop backend may wait on the UI thread inside any of these, and
    /// the UI thread may itself be waiting on the controller.
    struct LockCheckingSurface {
        inner: FakeSurface,
        controller: std::sync::OnceLock<Weak<OverlayController>>,
        calls_under_lock: std::sync::atomic::AtomicUsize,
    }

    impl LockCheckingSurface {
        fn check(&self) {
            let Some(controller) = self.controller.get().and_then(Weak::upgrade) else {
                return;
            };
            if controller.state.try_lock().is_err() {
                self.calls_under_lock
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    impl SurfaceBackend for LockCheckingSurface {
        fn create(&self, options: &SurfaceOptions, ready: ReadySignal) -> Result<()> {
            self.check();
            self.inner.create(options, ready)
        }
        fn destroy(&self) {
            self.check();
            self.inner.destroy()
        }
        fn size(&self) -> Result<SurfaceSize> {
            self.check();
            self.inner.size()
        }
        fn position(&self) -> Result<SurfacePosition> {
            self.check();
            self.inner.position()
        }
        fn set_size(&self, size: SurfaceSize) -> Result<()> {
            self.check();
            self.inner.set_size(size)
        }
        fn set_position(&self, position: SurfacePosition) -> Result<()> {
            self.check();
            self.inner.set_position(position)
        }
        fn set_ignore_cursor_events(&self, ignore: bool, forward: bool) -> Result<()> {
            self.check();
            self.inner.set_ignore_cursor_events(ignore, forward)
        }
        fn work_area(&self) -> Result<WorkArea> {
            self.check();
            self.inner.work_area()
        }
        fn focus(&self) -> Result<()> {
            self.check();
            self.inner.focus()
        }
        fn emit(&self, event: &str, payload: Value) -> Result<()> {
            self.check();
            self.inner.emit(event, payload)
        }
    }

    #[test]
    fn backend_is_never_called_under_the_state_lock() {
        let surface = Arc::new(LockCheckingSurface {
            inner: FakeSurface::auto_ready(),
            controller: std::sync::OnceLock::new(),
            calls_under_lock: std::sync::atomic::AtomicUsize::new(0),
        });
        let controller = OverlayController::new(surface.clone(), SurfaceSettings::default());
        surface
            .controller
            .set(Arc::downgrade(&controller))
            .unwrap();

        let ticket = controller.ensure().unwrap();
        let delivery_ticket = controller.begin_activation(ticket.generation);
        controller.deliver(&delivery_ticket, session_data("session-1")).unwrap();
        controller.set_click_through(false, true).unwrap();
        assert!(controller.toggle_minimize().unwrap());
        assert!(!controller.toggle_minimize().unwrap());
        controller.move_by(50, 50).unwrap();
        controller.focus().unwrap();
        assert!(controller.notify(Notification::ToggleHide));
        controller.close();

        assert_eq!(surface.inner.create_count(), 1);
        assert_eq!(surface.inner.destroy_count(), 1);
        assert_eq!(
            surface
                .calls_under_lock
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn restore_after_close_is_rejected_without_touching_geometry() {
        let (surface, controller) = controller();
        controller.ensure().unwrap();
        controller.toggle_minimize().unwrap();
        let minimized = controller.geometry();
        controller.close();

        assert!(matches!(
            controller.toggle_minimize(),
            Err(OverlayError::SurfaceClosed)
        ));
        assert_eq!(controller.geometry().width, minimized.width);
        assert!(!controller.is_minimized());
        assert_eq!(surface.destroy_count(), 1);
    }
}
