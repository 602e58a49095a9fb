//! Application entry point: voice conversation client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime.
//! 4. Build the three controllers: connection, recognition, playback.
//! 5. Spawn the session dispatcher on the runtime.
//! 6. Run [`eframe::run_native`]; blocks the main thread until the window
//!    is closed.
//! 7. Forward `Shutdown` and wait briefly for the dispatcher to tear down.

use std::sync::Arc;
use std::time::Duration;

use eframe::egui;
use voice_client::{
    app::VoiceClientApp,
    audio::{CpalSink, MicrophoneSource},
    config::{AppConfig, AppPaths},
    connection::ConnectionManager,
    playback::{synthesizer_from_config, PlaybackController},
    recognition::RecognitionController,
    session::{
        event_channel, new_shared_view, Controllers, ConversationPolicy, EventDispatcher,
        EventSender, Session, SessionEvent, SessionStateMachine,
    },
    stt::{WhisperEngine, WhisperParams},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Controller construction
// ---------------------------------------------------------------------------

/// Recognition needs both a microphone and a Whisper model.  When either is
/// missing the controller reports itself unsupported and the session control
/// is disabled at startup.
fn build_recognizer(config: &AppConfig, events: EventSender) -> RecognitionController {
    let source = MicrophoneSource::new(config.recognition.audio_device.clone());
    if let Err(e) = source.check_device() {
        log::warn!("Microphone unavailable: {e}");
        return RecognitionController::unsupported(format!("micrófono no disponible: {e}"), events);
    }

    let model_path = AppPaths::new().model_file(&config.recognition.model);
    match WhisperEngine::load(&model_path, WhisperParams::from(&config.recognition)) {
        Ok(engine) => {
            log::info!("Whisper model loaded: {}", model_path.display());
            RecognitionController::new(
                Arc::new(engine),
                Arc::new(source),
                &config.recognition,
                events,
            )
        }
        Err(e) => {
            log::warn!(
                "Could not load Whisper model ({}): {e}",
                model_path.display()
            );
            RecognitionController::unsupported(
                format!("modelo de reconocimiento no disponible: {e}"),
                events,
            )
        }
    }
}

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let mut vp = egui::ViewportBuilder::default()
        .with_title("Cliente de voz")
        .with_inner_size([360.0, 260.0])
        .with_min_inner_size([280.0, 200.0]);

    if config.ui.always_on_top {
        vp = vp.with_always_on_top();
    }

    if let Some((x, y)) = config.ui.window_position {
        vp = vp.with_position(egui::pos2(x, y));
    }

    eframe::NativeOptions {
        viewport: vp,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Voice client starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    // 4. Session and controllers
    let (events, event_rx) = event_channel();
    let session = Session::new(config.conversation.initial_conversation_id);
    log::info!(
        "Session {} (conversation {}) against {}:{}",
        session.id(),
        session.conversation_id(),
        config.server.host,
        config.server.port
    );

    let machine = SessionStateMachine::new(session, ConversationPolicy::from(&config.conversation));
    let view = new_shared_view(machine.view());

    let controllers = Controllers {
        link: Box::new(ConnectionManager::new(config.server.clone(), events.clone())),
        recognizer: Box::new(build_recognizer(&config, events.clone())),
        player: Box::new(PlaybackController::new(
            synthesizer_from_config(&config.synthesis),
            Arc::new(CpalSink::new()),
            events.clone(),
        )),
    };

    // 5. Dispatcher
    let dispatcher = EventDispatcher::new(machine, controllers, Arc::clone(&view));
    let dispatcher_task = rt.spawn(dispatcher.run(event_rx));

    // 6. UI (blocks until the window is closed)
    let app = VoiceClientApp::new(Arc::clone(&view), events.clone(), config.clone());
    let ui_result = eframe::run_native(
        "Cliente de voz",
        native_options(&config),
        Box::new(move |_cc| Ok(Box::new(app))),
    );

    // 7. Teardown.  A second Shutdown after the app's own is dropped by
    //    the closed queue or ignored by the stopped machine.
    events.emit(SessionEvent::Shutdown);
    rt.block_on(async {
        if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher_task)
            .await
            .is_err()
        {
            log::warn!("Dispatcher did not stop within {SHUTDOWN_GRACE:?}");
        }
    });
    rt.shutdown_timeout(SHUTDOWN_GRACE);

    ui_result.map_err(|e| anyhow::anyhow!("UI error: {e}"))
}
