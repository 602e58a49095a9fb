//! Speak requests: synthesis followed by blocking playback.
//!
//! Each `speak` becomes one tokio task.  Synthesis is awaited on the
//! runtime; decoding and output run under `spawn_blocking` with a shared
//! cancel flag.  Cancelling aborts the task (dropping any in-flight HTTP
//! request) and raises the flag so the blocking output loop stops too.
//! A cancelled request never emits a terminal event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::audio::AudioSink;
use crate::session::{EventSender, PlaybackId, SessionEvent};

use super::synthesis::Synthesizer;
use super::{PlaybackError, SpeechPlayer};

struct ActivePlayback {
    id: PlaybackId,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Must be used from within a tokio runtime.
pub struct PlaybackController {
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    events: EventSender,
    active: Option<ActivePlayback>,
}

impl PlaybackController {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        events: EventSender,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            events,
            active: None,
        }
    }
}

impl SpeechPlayer for PlaybackController {
    fn speak(&mut self, playback: PlaybackId, text: String) {
        if let Some(previous) = &self.active {
            if !previous.task.is_finished() {
                log::warn!(
                    "playback: speak({playback}) while {} outstanding, cancelling it",
                    previous.id
                );
            }
        }
        self.cancel();

        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(play(
            playback,
            text,
            Arc::clone(&self.synthesizer),
            Arc::clone(&self.sink),
            self.events.clone(),
            Arc::clone(&cancelled),
        ));

        self.active = Some(ActivePlayback {
            id: playback,
            cancelled,
            task,
        });
    }

    fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            if !active.task.is_finished() {
                log::info!("playback: cancelling {}", active.id);
            }
            active.cancelled.store(true, Ordering::SeqCst);
            active.task.abort();
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn play(
    playback: PlaybackId,
    text: String,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    events: EventSender,
    cancelled: Arc<AtomicBool>,
) {
    let result: Result<(), PlaybackError> = async {
        let audio = synthesizer.synthesize(&text).await?;
        if cancelled.load(Ordering::SeqCst) {
            return Ok(());
        }

        log::info!("playback: {playback} started ({} bytes)", audio.len());
        events.emit(SessionEvent::PlaybackStarted { playback });

        let flag = Arc::clone(&cancelled);
        tokio::task::spawn_blocking(move || sink.play(&audio, &flag))
            .await
            .map_err(|e| PlaybackError::Output(e.to_string()))??;
        Ok::<(), PlaybackError>(())
    }
    .await;

    if cancelled.load(Ordering::SeqCst) {
        log::debug!("playback: {playback} cancelled, terminal event suppressed");
        return;
    }

    match result {
        Ok(()) => events.emit(SessionEvent::PlaybackFinished { playback }),
        Err(error) => {
            log::warn!("playback: {playback} failed: {error}");
            events.emit(SessionEvent::PlaybackError { playback, error });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OutputError;
    use crate::playback::synthesis::SynthesisError;
    use crate::session::{event_channel, EventReceiver};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeSynthesizer {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Synthesizer for FakeSynthesizer {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(SynthesisError::Status {
                    status: 500,
                    body: "down".into(),
                });
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    /// Records what it played.  `hold` keeps playing until cancelled.
    #[derive(Default)]
    struct FakeSink {
        hold: bool,
        fail: bool,
        played: Mutex<Vec<Vec<u8>>>,
        saw_cancel: AtomicBool,
    }

    impl AudioSink for FakeSink {
        fn play(&self, mp3: &[u8], cancel: &AtomicBool) -> Result<(), OutputError> {
            if self.fail {
                return Err(OutputError::NoDevice);
            }
            self.played.lock().unwrap().push(mp3.to_vec());
            while self.hold && !cancel.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            if cancel.load(Ordering::SeqCst) {
                self.saw_cancel.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn controller(
        synth: FakeSynthesizer,
        sink: Arc<FakeSink>,
    ) -> (PlaybackController, EventReceiver) {
        let (tx, rx) = event_channel();
        (PlaybackController::new(Arc::new(synth), sink, tx), rx)
    }

    fn quick() -> FakeSynthesizer {
        FakeSynthesizer {
            delay: Duration::ZERO,
            fail: false,
        }
    }

    async fn next(rx: &mut EventReceiver) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within 5 s")
            .expect("channel open")
    }

    async fn assert_quiet(rx: &mut EventReceiver) {
        let extra = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(extra.is_err(), "unexpected event: {extra:?}");
    }

    #[tokio::test]
    async fn speak_emits_started_then_finished() {
        let sink = Arc::new(FakeSink::default());
        let (mut ctrl, mut rx) = controller(quick(), Arc::clone(&sink));
        let id = PlaybackId::from_raw(1);

        ctrl.speak(id, "Hola".into());

        assert_eq!(next(&mut rx).await, SessionEvent::PlaybackStarted { playback: id });
        assert_eq!(next(&mut rx).await, SessionEvent::PlaybackFinished { playback: id });
        assert_eq!(sink.played.lock().unwrap().as_slice(), &[b"Hola".to_vec()]);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn synthesis_failure_is_single_error() {
        let sink = Arc::new(FakeSink::default());
        let synth = FakeSynthesizer {
            delay: Duration::ZERO,
            fail: true,
        };
        let (mut ctrl, mut rx) = controller(synth, Arc::clone(&sink));
        let id = PlaybackId::from_raw(2);

        ctrl.speak(id, "Hola".into());

        match next(&mut rx).await {
            SessionEvent::PlaybackError {
                playback,
                error: PlaybackError::Synthesis(msg),
            } => {
                assert_eq!(playback, id);
                assert!(msg.contains("500"));
            }
            other => panic!("expected synthesis error, got {other:?}"),
        }
        assert!(sink.played.lock().unwrap().is_empty());
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn output_failure_after_start() {
        let sink = Arc::new(FakeSink {
            fail: true,
            ..FakeSink::default()
        });
        let (mut ctrl, mut rx) = controller(quick(), sink);
        let id = PlaybackId::from_raw(3);

        ctrl.speak(id, "Hola".into());

        assert_eq!(next(&mut rx).await, SessionEvent::PlaybackStarted { playback: id });
        assert!(matches!(
            next(&mut rx).await,
            SessionEvent::PlaybackError {
                error: PlaybackError::Output(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancel_during_synthesis_suppresses_everything() {
        let sink = Arc::new(FakeSink::default());
        let synth = FakeSynthesizer {
            delay: Duration::from_millis(200),
            fail: false,
        };
        let (mut ctrl, mut rx) = controller(synth, Arc::clone(&sink));

        ctrl.speak(PlaybackId::from_raw(4), "Hola".into());
        ctrl.cancel();
        ctrl.cancel();

        assert_quiet(&mut rx).await;
        assert!(sink.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_output_stops_sink() {
        let sink = Arc::new(FakeSink {
            hold: true,
            ..FakeSink::default()
        });
        let (mut ctrl, mut rx) = controller(quick(), Arc::clone(&sink));
        let id = PlaybackId::from_raw(5);

        ctrl.speak(id, "Hola".into());
        assert_eq!(next(&mut rx).await, SessionEvent::PlaybackStarted { playback: id });
        ctrl.cancel();

        assert_quiet(&mut rx).await;
        assert!(sink.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn new_speak_replaces_outstanding_one() {
        let sink = Arc::new(FakeSink::default());
        let synth = FakeSynthesizer {
            delay: Duration::from_millis(100),
            fail: false,
        };
        let (mut ctrl, mut rx) = controller(synth, Arc::clone(&sink));
        let first = PlaybackId::from_raw(6);
        let second = PlaybackId::from_raw(7);

        ctrl.speak(first, "uno".into());
        ctrl.speak(second, "dos".into());

        assert_eq!(
            next(&mut rx).await,
            SessionEvent::PlaybackStarted { playback: second }
        );
        assert_eq!(
            next(&mut rx).await,
            SessionEvent::PlaybackFinished { playback: second }
        );
        assert_quiet(&mut rx).await;
        assert_eq!(sink.played.lock().unwrap().as_slice(), &[b"dos".to_vec()]);
    }

    #[tokio::test]
    async fn cancel_when_idle_is_noop() {
        let (mut ctrl, mut rx) = controller(quick(), Arc::new(FakeSink::default()));
        ctrl.cancel();
        assert!(rx.try_recv().is_err());
    }
}
