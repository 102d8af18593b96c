//! End-to-end activation runs against the in-memory surface and backend.

use overlay_core::testing::{session_summary, FakeGateway, FakeSurface, GatewayCall};
use overlay_core::{
    ActivationPipeline, CommandRouter, KeyboardCommand, OverlayConfig, OverlayController,
    SurfacePhase, SurfaceSettings,
};
use overlay_protocol::{ClickThroughOptions, InboundCommand};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Shell {
    surface: Arc<FakeSurface>,
    gateway: Arc<FakeGateway>,
    controller: Arc<OverlayController>,
    pipeline: ActivationPipeline<FakeGateway>,
    router: CommandRouter<FakeGateway>,
}

fn shell(gateway: FakeGateway) -> Shell {
    let config = OverlayConfig::default();
    let surface = Arc::new(FakeSurface::auto_ready());
    let gateway = Arc::new(gateway);
    let controller = OverlayController::new(surface.clone(), SurfaceSettings::from_config(&config));
    let pipeline = ActivationPipeline::new(controller.clone(), gateway.clone(), &config);
    let router = CommandRouter::new(
        controller.clone(),
        gateway.clone(),
        config.default_language.clone(),
        config.move_step,
    );
    Shell {
        surface,
        gateway,
        controller,
        pipeline,
        router,
    }
}

fn activation_url(session_id: &str, settings: serde_json::Value) -> String {
    format!(
        "interviewsai://session/{}?settings={}",
        session_id,
        urlencoding::encode(&settings.to_string())
    )
}

#[tokio::test]
async fn provisional_id_is_replaced_before_session_state_is_injected() {
    let shell = shell(
        FakeGateway::new()
            .with_token("dg-token")
            .with_session_ids(&["session-abc"]),
    );

    let outcome = shell
        .pipeline
        .activate("interviewsai://session/temp-1?settings=%7B%22userId%22%3A%22u1%22%7D")
        .await
        .unwrap()
        .expect("activation URL should be recognised");

    assert_eq!(outcome.session_id, "session-abc");
    let injected = shell.surface.events_named("session-data");
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0]["sessionId"], "session-abc");
    assert!(!shell
        .surface
        .emitted()
        .iter()
        .any(|(event, payload)| event == "session-data" && payload["sessionId"] == "temp-1"));
}

#[tokio::test(start_paused = true)]
async fn slow_backend_resume_patch_keeps_other_fields() {
    let shell = shell(
        FakeGateway::new()
            .with_token("dg-token")
            .with_session_ids(&["session-abc"])
            .with_resume("r1", "Ten years of Rust")
            .with_resume_delay(Duration::from_secs(3)),
    );
    let url = activation_url(
        "temp-1",
        json!({
            "userId": "u1",
            "company": "Acme",
            "jobTitle": "Staff Engineer",
            "selectedResume": { "id": "r1", "fileName": "cv.pdf", "fileType": "application/pdf" }
        }),
    );

    let outcome = shell.pipeline.activate(&url).await.unwrap().unwrap();
    assert!(outcome.resume_hydrated);

    let patches = shell.surface.events_named("session-resume");
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0]["selectedResume"]["id"], "r1");

    let state = shell.surface.merged_session_state().unwrap();
    assert_eq!(state["sessionId"], "session-abc");
    assert_eq!(state["config"]["userId"], "u1");
    assert_eq!(state["config"]["jobTitle"], "Staff Engineer");
    assert_eq!(
        state["config"]["selectedResume"]["content"],
        "Ten years of Rust"
    );
    assert_eq!(state["config"]["selectedResume"]["fileType"], "application/pdf");
}

#[tokio::test]
async fn second_activation_reuses_surface_and_deducts_again() {
    let shell = shell(
        FakeGateway::new()
            .with_token("dg-token")
            .with_session_ids(&["session-1", "session-2"]),
    );
    let url = activation_url("temp-1", json!({ "userId": "u1" }));

    shell.pipeline.activate(&url).await.unwrap();
    shell.controller.toggle_minimize().unwrap();
    shell.pipeline.activate(&url).await.unwrap();

    assert_eq!(shell.surface.create_count(), 1);
    assert_eq!(shell.gateway.start_session_count(), 2);
    // Re-activation leaves the minimized state alone.
    assert!(shell.controller.is_minimized());

    let ids: Vec<_> = shell
        .surface
        .events_named("session-data")
        .into_iter()
        .map(|payload| payload["sessionId"].clone())
        .collect();
    assert_eq!(ids, vec![json!("session-1"), json!("session-2")]);
}

#[tokio::test]
async fn every_backend_failure_still_completes_activation() {
    let shell = shell(FakeGateway::new());
    let url = activation_url(
        "session-old",
        json!({ "userId": "u1", "selectedResume": { "id": "r1" } }),
    );

    let outcome = shell.pipeline.activate(&url).await.unwrap().unwrap();

    assert_eq!(outcome.session_id, "session-old");
    assert!(outcome.session_delivered);
    assert!(!outcome.token_delivered);
    assert!(!outcome.resume_hydrated);
    assert!(outcome.session_start_time.is_some());
    assert_eq!(shell.surface.events_named("listening-error").len(), 1);
    assert_eq!(shell.surface.events_named("session-start-time").len(), 1);

    let calls = shell.gateway.calls();
    for expected in [
        GatewayCall::FetchToken,
        GatewayCall::StartSession {
            user_id: "u1".to_string(),
        },
        GatewayCall::FetchResume {
            resume_id: "r1".to_string(),
        },
        GatewayCall::ListSessions {
            user_id: "u1".to_string(),
        },
    ] {
        assert!(calls.contains(&expected), "missing {:?}", expected);
    }
}

#[tokio::test]
async fn restored_start_time_uses_recorded_duration() {
    let shell = shell(
        FakeGateway::new()
            .with_session_ids(&["session-next"])
            .with_sessions(vec![
                session_summary("session-xyz", Some("00:00:30")),
                session_summary("session-abc", Some("01:00:00")),
            ]),
    );
    let before = chrono::Utc::now().timestamp_millis();

    let outcome = shell
        .pipeline
        .activate(&activation_url("session-abc", json!({ "userId": "u1" })))
        .await
        .unwrap()
        .unwrap();

    let start = outcome.session_start_time.unwrap();
    assert!(start <= before - 3_600_000 + 5_000);
    assert!(start >= before - 3_600_000 - 5_000);
}

#[tokio::test]
async fn surface_commands_after_activation() {
    let shell = shell(FakeGateway::new().with_token("dg-token"));
    shell
        .pipeline
        .activate("interviewsai://session/temp-1")
        .await
        .unwrap();

    shell
        .router
        .handle(InboundCommand::SetClickThrough {
            ignore: false,
            options: ClickThroughOptions { forward: true },
        })
        .await
        .unwrap();
    shell
        .router
        .handle(InboundCommand::StartListening {
            language: Some("fr-FR".to_string()),
        })
        .await
        .unwrap();
    shell.router.handle_keyboard(KeyboardCommand::MoveDown);
    shell.router.handle(InboundCommand::HideOverlay).await.unwrap();

    assert_eq!(shell.surface.ignore_cursor_events(), (false, true));
    let tokens = shell.surface.events_named("token-delivery");
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[1], json!({ "token": "dg-token", "language": "fr-FR" }));
    assert_eq!(shell.surface.events_named("toggle-minimize"), vec![json!(true)]);
    // Restorable geometry is the expanded surface after the keyboard move.
    let geometry = shell.controller.geometry();
    assert_eq!((geometry.x, geometry.y), (520, 51));
    assert_eq!((geometry.width, geometry.height), (400, 600));

    shell.router.handle(InboundCommand::EndSession).await.unwrap();
    assert_eq!(shell.controller.phase(), SurfacePhase::Closed);
}

#[tokio::test]
async fn activation_after_end_session_builds_a_fresh_surface() {
    let shell = shell(FakeGateway::new().with_token("dg-token"));

    let first = shell
        .pipeline
        .activate("interviewsai://session/temp-1")
        .await
        .unwrap()
        .unwrap();
    shell.router.handle(InboundCommand::EndSession).await.unwrap();
    let second = shell
        .pipeline
        .activate("interviewsai://session/temp-2")
        .await
        .unwrap()
        .unwrap();

    assert!(first.surface_created && second.surface_created);
    assert_eq!(shell.surface.create_count(), 2);
    assert_eq!(shell.surface.destroy_count(), 1);
    assert!(shell.surface.is_live());
}

#[tokio::test]
async fn unrelated_urls_change_nothing() {
    let shell = shell(FakeGateway::new().with_token("dg-token"));
    for raw in [
        "interviewsai://settings",
        "mailto:someone@example.com",
        "otherapp://session/temp-1",
    ] {
        assert!(shell.pipeline.activate(raw).await.unwrap().is_none());
    }
    assert_eq!(shell.controller.phase(), SurfacePhase::Absent);
    assert!(shell.gateway.calls().is_empty());
}

#[tokio::test]
async fn resume_without_id_keeps_session_metadata() {
    let shell = shell(
        FakeGateway::new()
            .with_token("dg-token")
            .with_session_ids(&["session-abc"]),
    );
    let url = activation_url(
        "temp-1",
        json!({
            "userId": "u1",
            "company": "Acme",
            "selectedResume": { "fileName": "cv.pdf" }
        }),
    );

    let outcome = shell.pipeline.activate(&url).await.unwrap().unwrap();

    assert!(outcome.config_decoded);
    assert_eq!(outcome.session_id, "session-abc");
    assert!(!outcome.resume_hydrated);
    assert_eq!(shell.gateway.start_session_count(), 1);
    assert!(!shell
        .gateway
        .calls()
        .iter()
        .any(|call| matches!(call, GatewayCall::FetchResume { .. })));

    let injected = shell.surface.events_named("session-data");
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0]["config"]["userId"], "u1");
    assert_eq!(injected[0]["config"]["company"], "Acme");
    assert_eq!(injected[0]["config"]["selectedResume"]["fileName"], "cv.pdf");
}

#[tokio::test(start_paused = true)]
async fn start_time_and_token_do_not_wait_for_session_start() {
    let shell = shell(
        FakeGateway::new()
            .with_token("dg-token")
            .with_session_ids(&["session-abc"])
            .with_start_session_delay(Duration::from_secs(10)),
    );
    let url = activation_url("temp-1", json!({ "userId": "u1" }));

    let (outcome, early) = tokio::join!(shell.pipeline.activate(&url), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        shell.surface.event_names()
    });

    assert!(early.contains(&"session-start-time".to_string()));
    assert!(early.contains(&"token-delivery".to_string()));
    assert!(!early.contains(&"session-data".to_string()));

    let outcome = outcome.unwrap().unwrap();
    assert_eq!(outcome.session_id, "session-abc");
    assert_eq!(
        shell.surface.events_named("session-data")[0]["sessionId"],
        "session-abc"
    );
}

#[tokio::test(start_paused = true)]
async fn overlapping_activation_drops_late_results_of_the_first() {
    let shell = shell(
        FakeGateway::new()
            .with_token("dg-token")
            .with_session_ids(&["session-1", "session-2"])
            .with_start_session_delay(Duration::from_secs(5))
            .with_resume("r1", "Ten years of Rust")
            .with_resume_delay(Duration::from_secs(3)),
    );
    let url = activation_url(
        "temp-1",
        json!({ "userId": "u1", "selectedResume": { "id": "r1" } }),
    );

    // Run 2 starts at t=1s; run 1's session start lands at t=5s, run 2's at t=6s.
    let (first, second) = tokio::join!(shell.pipeline.activate(&url), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        shell.pipeline.activate(&url).await
    });
    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();

    assert_eq!(first.session_id, "session-1");
    assert!(!first.session_delivered);
    assert!(!first.resume_hydrated);
    assert_eq!(second.session_id, "session-2");
    assert!(second.session_delivered);
    assert!(second.resume_hydrated);

    assert_eq!(shell.surface.create_count(), 1);
    assert_eq!(shell.gateway.start_session_count(), 2);
    let injected = shell.surface.events_named("session-data");
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0]["sessionId"], "session-2");
    let patches = shell.surface.events_named("session-resume");
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0]["sessionId"], "session-2");
}

#[tokio::test(start_paused = true)]
async fn nothing_is_delivered_before_the_surface_is_listening() {
    let config = OverlayConfig::default();
    let surface = Arc::new(FakeSurface::manual_ready());
    let gateway = Arc::new(
        FakeGateway::new()
            .with_token("dg-token")
            .with_session_ids(&["session-abc"]),
    );
    let controller = OverlayController::new(surface.clone(), SurfaceSettings::from_config(&config));
    let pipeline = ActivationPipeline::new(controller.clone(), gateway.clone(), &config);
    let url = activation_url("temp-1", json!({ "userId": "u1" }));

    let (outcome, before_ready) = tokio::join!(pipeline.activate(&url), async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let emitted = surface.event_names();
        let calls = gateway.calls();
        surface
            .take_ready_signal()
            .expect("surface should be waiting for its content")
            .fire();
        (emitted, calls)
    });

    let (emitted, calls) = before_ready;
    assert!(emitted.is_empty());
    assert!(calls.is_empty());
    assert_eq!(outcome.unwrap().unwrap().session_id, "session-abc");
    assert_eq!(surface.events_named("session-data").len(), 1);
}
