mod commands;
mod logging;
mod shortcuts;
mod surface;

use overlay_core::{
    acquire, find_activation_arg, forward_args, instance_lock_path, instance_socket_path,
    route_forwarded, ActivationPipeline, CommandRouter, HttpGateway, InstanceRole,
    OverlayConfig, OverlayController, PrimaryInstance, SurfaceSettings,
};
use overlay_protocol::ForwardRequest;
use std::sync::Arc;
use surface::TauriSurface;
use tauri::{AppHandle, Manager, RunEvent, WindowEvent, Wry};

/// Everything the shell shares between commands, shortcuts and activation
/// sources.
pub struct OverlayApp {
    config: OverlayConfig,
    surface: Arc<TauriSurface<Wry>>,
    controller: Arc<OverlayController>,
    pipeline: Arc<ActivationPipeline<HttpGateway>>,
    router: CommandRouter<HttpGateway>,
}

impl OverlayApp {
    fn new(app: &AppHandle, config: OverlayConfig) -> overlay_core::Result<Self> {
        let surface = Arc::new(TauriSurface::new(app.clone()));
        let controller =
            OverlayController::new(surface.clone(), SurfaceSettings::from_config(&config));
        let gateway = Arc::new(HttpGateway::new(
            &config.api_base_url,
            config.request_timeout(),
        )?);
        let pipeline = Arc::new(ActivationPipeline::new(
            controller.clone(),
            gateway.clone(),
            &config,
        ));
        let router = CommandRouter::new(
            controller.clone(),
            gateway,
            config.default_language.clone(),
            config.move_step,
        );
        Ok(Self {
            config,
            surface,
            controller,
            pipeline,
            router,
        })
    }
}

/// Runs the activation pipeline for `url` in the background.
fn activate(app: &AppHandle, url: String) {
    let Some(state) = app.try_state::<OverlayApp>() else {
        tracing::warn!("Activation before setup finished; dropped");
        return;
    };
    if let Err(err) = state.controller.focus() {
        tracing::debug!(error = %err, "Could not focus overlay");
    }
    let pipeline = Arc::clone(&state.pipeline);
    tauri::async_runtime::spawn(async move {
        match pipeline.activate(&url).await {
            Ok(Some(outcome)) => {
                tracing::debug!(session_id = %outcome.session_id, "Activation delivered")
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "Activation aborted"),
        }
    });
}

fn serve_forwarded(app: &AppHandle, primary: &mut PrimaryInstance, scheme: String) {
    let handle = app.clone();
    primary.serve(move |request: ForwardRequest| {
        route_forwarded(&request, &scheme, |url| activate(&handle, url))
    });
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let _log_guard = logging::init();
    let config = OverlayConfig::load();
    let args: Vec<String> = std::env::args().collect();

    let mut primary = match (instance_lock_path(), instance_socket_path()) {
        (Some(lock), Some(socket)) => match acquire(&lock, &socket) {
            Ok(InstanceRole::Primary(primary)) => Some(primary),
            Ok(InstanceRole::Secondary { socket_path }) => {
                match forward_args(&socket_path, args) {
                    Ok(response) if response.ok => {
                        tracing::info!("Activation forwarded to running instance")
                    }
                    Ok(response) => {
                        tracing::warn!(error = ?response.error, "Running instance rejected activation")
                    }
                    Err(err) => tracing::error!(error = %err, "Failed to forward activation"),
                }
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Single-instance routing unavailable");
                None
            }
        },
        _ => {
            tracing::warn!("No home directory; running without single-instance routing");
            None
        }
    };

    let app = tauri::Builder::default()
        .plugin(tauri_plugin_deep_link::init())
        .plugin(tauri_plugin_global_shortcut::Builder::new().build())
        .setup(move |app| {
            let handle = app.handle().clone();
            let scheme = config.scheme.clone();
            let state = OverlayApp::new(&handle, config)?;
            app.manage(state);

            if let Some(mut primary) = primary.take() {
                serve_forwarded(&handle, &mut primary, scheme.clone());
                app.manage(primary);
            }

            {
                use tauri_plugin_deep_link::DeepLinkExt;
                #[cfg(any(windows, target_os = "linux"))]
                if let Err(err) = app.deep_link().register_all() {
                    tracing::warn!(error = %err, "Failed to register deep link scheme");
                }
                let open_handle = handle.clone();
                app.deep_link().on_open_url(move |event| {
                    for url in event.urls() {
                        activate(&open_handle, url.to_string());
                    }
                });
            }

            shortcuts::register(&handle);

            if let Some(url) = find_activation_arg(&args, &scheme) {
                activate(&handle, url.to_string());
            }
            tracing::info!("Interview overlay ready");
            Ok(())
        })
        .on_window_event(|window, event| {
            if !matches!(event, WindowEvent::Destroyed) {
                return;
            }
            if let Some(state) = window.try_state::<OverlayApp>() {
                if state.surface.release_if_current(window.label()) {
                    state.controller.surface_destroyed();
                }
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::set_click_through,
            commands::hide_overlay,
            commands::end_session,
            commands::start_listening,
            commands::stop_listening,
            commands::surface_ready,
            commands::overlay_settings
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|_app, event| {
        // The overlay is the only window; closing it must not end the process.
        if let RunEvent::ExitRequested { api, code, .. } = event {
            if code.is_none() {
                api.prevent_exit();
            }
        }
    });
}
