//! # overlay-core
//!
//! Session activation and overlay state for the interview overlay shell.
//!
//! ## Design Principles
//!
//! - **Platform-free**: the window sits behind [`SurfaceBackend`] and the
//!   backend service behind [`BackendGateway`]. The desktop app supplies the
//!   real ones; tests use the fakes in `testing`.
//! - **Single writer**: only [`OverlayController`] touches the surface handle
//!   and the geometry store.
//! - **Graceful degradation**: backend failures never abort an activation;
//!   each one degrades to a default or a `listening-error` delivery.
//! - **Cooperative**: activation branches interleave on one task; no locks
//!   are held across an `.await`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use overlay_core::{ActivationPipeline, HttpGateway, OverlayConfig, OverlayController, SurfaceSettings};
//!
//! let config = OverlayConfig::load();
//! let controller = OverlayController::new(backend, SurfaceSettings::from_config(&config));
//! let gateway = Arc::new(HttpGateway::new(&config.api_base_url, config.request_timeout())?);
//! let pipeline = ActivationPipeline::new(controller, gateway, &config);
//! pipeline.activate("interviewsai://session/temp-1").await?;
//! ```

pub mod activation;
pub mod channel;
pub mod config;
pub mod error;
pub mod gateway;
pub mod geometry;
pub mod instance;
pub mod patterns;
pub mod pipeline;
pub mod surface;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use activation::*;
pub use channel::{deliver_token, CommandRouter, KeyboardCommand};
pub use config::*;
pub use error::{OverlayError, Result};
pub use gateway::{
    BackendGateway, CredentialToken, HttpGateway, ResumeContent, SessionStart, SessionSummary,
};
pub use geometry::*;
pub use instance::{acquire, forward_args, route_forwarded, ForwardHandler, InstanceRole, PrimaryInstance};
pub use pipeline::{session_start_time, ActivationOutcome, ActivationPipeline};
pub use surface::*;
