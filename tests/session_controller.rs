//! Session controller scenarios against in-memory ports

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use hope_voice::adapters::HttpInferenceClient;
use hope_voice::domain::config::InferenceConfig;
use hope_voice::domain::{CaptureEvent, DomainError, ErrorKind, SpeechSkipReason};
use hope_voice::{Ack, Phase, SessionController, SessionEvent};

mod common;

use common::{
    controller, drain, phases, settings, speech_for, wait_for_phase, FakeCapture, FakeInference,
    RecordingBackend, Reply,
};

fn errors(events: &[SessionEvent]) -> Vec<ErrorKind> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

fn answers(events: &[SessionEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Answered {
                transcription,
                response,
                ..
            } => Some((transcription.clone(), response.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_full_cycle_speaks_response() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let backend = Arc::new(RecordingBackend::gated());
    let session = controller(&capture, &inference, speech_for(&backend));
    let mut events = session.subscribe();

    assert_eq!(session.start().await.unwrap(), Ack::Accepted);
    assert_eq!(session.phase(), Phase::Recording);

    assert_eq!(session.stop().await.unwrap(), Ack::Accepted);
    assert_eq!(session.phase(), Phase::Speaking);

    backend.release();
    wait_for_phase(&session, Phase::Idle).await;

    let events = drain(&mut events);
    assert_eq!(
        phases(&events),
        vec![Phase::Recording, Phase::Processing, Phase::Speaking, Phase::Idle]
    );
    assert_eq!(answers(&events), vec![("hello".to_string(), "hi there".to_string())]);
    assert_eq!(backend.spoken(), vec!["hi there".to_string()]);
    assert_eq!(inference.calls(), 1);
    assert_eq!(capture.begins(), 1);
    assert_eq!(capture.ends(), 1);
    assert!(session.current_session().is_none());
}

#[tokio::test]
async fn test_request_carries_identity_and_audio() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", ""));
    let session = controller(&capture, &inference, None);

    session.start().await.unwrap();
    let snapshot = session.current_session().unwrap();
    assert_eq!(snapshot.phase, Phase::Recording);
    assert_eq!(snapshot.user_id, "u1");
    assert_eq!(snapshot.audio_bytes, None);

    session.stop().await.unwrap();

    let requests = inference.requests();
    assert_eq!(requests.len(), 1);
    let (bytes, user_id, session_id) = &requests[0];
    // WAV header plus 1600 16-bit samples
    assert!(*bytes > 3200);
    assert_eq!(user_id, "u1");
    assert_eq!(session_id, "s1");
}

#[tokio::test]
async fn test_device_unavailable_stays_idle() {
    let capture = Arc::new(FakeCapture::new());
    capture.fail_next_begin(DomainError::DeviceUnavailable {
        message: "no microphone".to_string(),
    });
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);
    let mut events = session.subscribe();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, DomainError::DeviceUnavailable { .. }));
    assert_eq!(session.phase(), Phase::Idle);

    let events = drain(&mut events);
    assert!(phases(&events).is_empty());
    assert_eq!(errors(&events), vec![ErrorKind::DeviceUnavailable]);
    assert_eq!(inference.calls(), 0);

    // The failure does not stick
    assert_eq!(session.start().await.unwrap(), Ack::Accepted);
}

#[tokio::test]
async fn test_network_error_returns_to_idle_without_speech() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::new(Reply::Fail(DomainError::Network(
        "HTTP 500".to_string(),
    ))));
    let backend = Arc::new(RecordingBackend::instant());
    let session = controller(&capture, &inference, speech_for(&backend));
    let mut events = session.subscribe();

    session.start().await.unwrap();
    let err = session.stop().await.unwrap_err();
    assert!(matches!(err, DomainError::Network(_)));
    assert_eq!(session.phase(), Phase::Idle);

    let events = drain(&mut events);
    assert_eq!(
        phases(&events),
        vec![Phase::Recording, Phase::Processing, Phase::Idle]
    );
    assert_eq!(errors(&events), vec![ErrorKind::Network]);
    assert!(backend.spoken().is_empty());
}

#[tokio::test]
async fn test_http_500_from_service() {
    let router = Router::new().route(
        "/api/process_audio",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Speech recognition service is unavailable"})),
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let inference = HttpInferenceClient::new(&InferenceConfig {
        url: format!("http://{}/api/process_audio", addr),
        ..InferenceConfig::default()
    })
    .unwrap();
    let capture = Arc::new(FakeCapture::new());
    let backend = Arc::new(RecordingBackend::instant());
    let session = SessionController::new(
        capture.clone(),
        Arc::new(inference),
        speech_for(&backend),
        settings(Duration::from_secs(5), None),
    );
    let mut events = session.subscribe();

    session.start().await.unwrap();
    let err = session.stop().await.unwrap_err();

    match err {
        DomainError::Network(message) => {
            assert!(message.contains("Speech recognition service is unavailable"))
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(session.phase(), Phase::Idle);
    assert_eq!(errors(&drain(&mut events)), vec![ErrorKind::Network]);
    assert!(backend.spoken().is_empty());
}

#[tokio::test]
async fn test_start_ignored_unless_idle() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let backend = Arc::new(RecordingBackend::gated());
    let session = controller(&capture, &inference, speech_for(&backend));

    session.start().await.unwrap();
    assert_eq!(
        session.start().await.unwrap(),
        Ack::Ignored(Phase::Recording)
    );
    assert_eq!(capture.begins(), 1);

    session.stop().await.unwrap();
    assert_eq!(
        session.start().await.unwrap(),
        Ack::Ignored(Phase::Speaking)
    );
    assert_eq!(session.phase(), Phase::Speaking);
    assert_eq!(capture.begins(), 1);
    assert_eq!(capture.open_id(), None);
}

#[tokio::test]
async fn test_stop_ignored_unless_recording() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);

    assert_eq!(session.stop().await.unwrap(), Ack::Ignored(Phase::Idle));
    assert_eq!(session.stop_speaking(), Ack::Ignored(Phase::Idle));
    assert_eq!(inference.calls(), 0);
}

#[tokio::test]
async fn test_stop_speaking_cancels_playback() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let backend = Arc::new(RecordingBackend::gated());
    let session = controller(&capture, &inference, speech_for(&backend));

    session.start().await.unwrap();
    session.stop().await.unwrap();
    assert_eq!(session.phase(), Phase::Speaking);

    assert_eq!(session.stop_speaking(), Ack::Accepted);
    assert_eq!(session.phase(), Phase::Idle);

    tokio::time::timeout(Duration::from_secs(1), async {
        while backend.cancelled() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // A late release does not move the controller
    backend.release();
    tokio::task::yield_now().await;
    assert_eq!(session.phase(), Phase::Idle);

    // The next cycle starts cleanly
    assert_eq!(session.start().await.unwrap(), Ack::Accepted);
}

#[tokio::test(start_paused = true)]
async fn test_inference_timeout_returns_to_idle() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::new(Reply::Hang));
    let backend = Arc::new(RecordingBackend::instant());
    let session = controller(&capture, &inference, speech_for(&backend));
    let mut events = session.subscribe();

    session.start().await.unwrap();
    let err = session.stop().await.unwrap_err();

    assert!(matches!(err, DomainError::Timeout { secs: 30 }));
    assert_eq!(session.phase(), Phase::Idle);
    assert_eq!(errors(&drain(&mut events)), vec![ErrorKind::Timeout]);
    assert!(backend.spoken().is_empty());
}

#[tokio::test]
async fn test_abandon_during_processing_drops_result() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::new(Reply::Hang));
    let backend = Arc::new(RecordingBackend::instant());
    let session = controller(&capture, &inference, speech_for(&backend));
    let mut events = session.subscribe();

    session.start().await.unwrap();
    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });

    wait_for_phase(&session, Phase::Processing).await;
    tokio::time::timeout(Duration::from_secs(1), async {
        while inference.calls() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    session.abandon().await;
    assert_eq!(session.phase(), Phase::Idle);

    let result = stopping.await.unwrap();
    assert!(matches!(result, Err(DomainError::Cancelled)));

    let events = drain(&mut events);
    assert!(answers(&events).is_empty());
    assert!(errors(&events).is_empty());
    assert!(backend.spoken().is_empty());
    assert_eq!(capture.ends(), 1);
}

#[tokio::test]
async fn test_abandon_while_recording_releases_device() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);

    session.start().await.unwrap();
    assert!(capture.open_id().is_some());

    session.abandon().await;
    assert_eq!(session.phase(), Phase::Idle);
    assert_eq!(capture.open_id(), None);
    assert_eq!(inference.calls(), 0);

    // Abandoning an idle controller is a no-op
    session.abandon().await;
    assert_eq!(session.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_token_failure_still_surfaces_response() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let backend = Arc::new(RecordingBackend::failing(DomainError::TokenUnavailable(
        "token endpoint down".to_string(),
    )));
    let session = controller(&capture, &inference, speech_for(&backend));
    let mut events = session.subscribe();

    session.start().await.unwrap();
    session.stop().await.unwrap();
    wait_for_phase(&session, Phase::Idle).await;

    let events = drain(&mut events);
    assert_eq!(answers(&events), vec![("hello".to_string(), "hi there".to_string())]);
    assert_eq!(errors(&events), vec![ErrorKind::Synthesis]);
    assert_eq!(phases(&events).last(), Some(&Phase::Idle));
}

#[tokio::test]
async fn test_empty_response_is_not_spoken() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "   "));
    let backend = Arc::new(RecordingBackend::instant());
    let session = controller(&capture, &inference, speech_for(&backend));
    let mut events = session.subscribe();

    session.start().await.unwrap();
    assert_eq!(session.stop().await.unwrap(), Ack::Accepted);

    let events = drain(&mut events);
    assert_eq!(
        phases(&events),
        vec![Phase::Recording, Phase::Processing, Phase::Idle]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::SpeechSkipped {
            reason: SpeechSkipReason::EmptyResponse,
            ..
        }
    )));
    assert!(backend.spoken().is_empty());
}

#[tokio::test]
async fn test_disabled_speech_skips_playback() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);
    let mut events = session.subscribe();

    session.start().await.unwrap();
    session.stop().await.unwrap();

    assert_eq!(session.phase(), Phase::Idle);
    let events = drain(&mut events);
    assert_eq!(answers(&events).len(), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::SpeechSkipped {
            reason: SpeechSkipReason::SpeechDisabled,
            ..
        }
    )));
}

#[tokio::test]
async fn test_response_is_sanitized_before_speaking() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering(
        "hello",
        "<b>hi</b> there \u{1F600}",
    ));
    let backend = Arc::new(RecordingBackend::instant());
    let session = controller(&capture, &inference, speech_for(&backend));

    session.start().await.unwrap();
    session.stop().await.unwrap();
    wait_for_phase(&session, Phase::Idle).await;

    assert_eq!(backend.spoken(), vec!["hi there".to_string()]);
}

#[tokio::test]
async fn test_empty_capture_returns_to_idle() {
    let capture = Arc::new(FakeCapture::new());
    capture.produce_nothing();
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);
    let mut events = session.subscribe();

    session.start().await.unwrap();
    let err = session.stop().await.unwrap_err();

    assert!(matches!(err, DomainError::EmptyCapture));
    assert_eq!(session.phase(), Phase::Idle);
    assert_eq!(errors(&drain(&mut events)), vec![ErrorKind::EmptyCapture]);
    assert_eq!(inference.calls(), 0);
}

#[tokio::test]
async fn test_device_lost_while_recording() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);
    let mut events = session.subscribe();

    session.start().await.unwrap();
    let capture_id = capture.open_id().unwrap();

    session
        .handle_capture_event(CaptureEvent::DeviceLost {
            capture_id,
            message: "unplugged".to_string(),
        })
        .await;

    assert_eq!(session.phase(), Phase::Idle);
    assert_eq!(capture.open_id(), None);
    assert_eq!(inference.calls(), 0);

    let events = drain(&mut events);
    assert_eq!(phases(&events), vec![Phase::Recording, Phase::Idle]);
    assert_eq!(errors(&events), vec![ErrorKind::DeviceUnavailable]);
}

#[tokio::test]
async fn test_events_for_other_captures_ignored() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);

    session.start().await.unwrap();
    let stale = capture.open_id().unwrap() + 100;

    session
        .handle_capture_event(CaptureEvent::BufferFull { capture_id: stale })
        .await;
    session
        .handle_capture_event(CaptureEvent::DeviceLost {
            capture_id: stale,
            message: "old stream".to_string(),
        })
        .await;

    assert_eq!(session.phase(), Phase::Recording);
}

#[tokio::test]
async fn test_buffer_full_stops_recording() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);

    session.start().await.unwrap();
    let capture_id = capture.open_id().unwrap();

    session
        .handle_capture_event(CaptureEvent::BufferFull { capture_id })
        .await;

    assert_eq!(session.phase(), Phase::Idle);
    assert_eq!(inference.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_recording_duration_stops_capture() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = SessionController::new(
        capture.clone(),
        inference.clone(),
        None,
        settings(Duration::from_secs(30), Some(Duration::from_secs(5))),
    );

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(session.phase(), Phase::Recording);

    tokio::time::sleep(Duration::from_secs(2)).await;
    wait_for_phase(&session, Phase::Idle).await;
    assert_eq!(inference.calls(), 1);
    assert_eq!(capture.ends(), 1);
}

#[tokio::test]
async fn test_new_speech_supersedes_in_flight_speech() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let backend = Arc::new(RecordingBackend::gated());
    let session = controller(&capture, &inference, speech_for(&backend));

    // First cycle is abandoned while speaking, second one speaks again
    session.start().await.unwrap();
    session.stop().await.unwrap();
    session.abandon().await;

    session.start().await.unwrap();
    session.stop().await.unwrap();
    assert_eq!(session.phase(), Phase::Speaking);

    backend.release();
    wait_for_phase(&session, Phase::Idle).await;
    assert_eq!(backend.spoken().len(), 2);
    assert_eq!(backend.cancelled(), 1);
}

#[tokio::test]
async fn test_error_is_published_after_returning_to_idle() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::new(Reply::Fail(DomainError::Network(
        "connection refused".to_string(),
    ))));
    let session = controller(&capture, &inference, None);
    let mut events = session.subscribe();

    session.start().await.unwrap();
    let _ = session.stop().await;

    let events = drain(&mut events);
    let idle_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::PhaseChanged { to: Phase::Idle, .. }))
        .unwrap();
    let error_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::Error { .. }))
        .unwrap();
    assert!(idle_at < error_at);
}

#[tokio::test]
async fn test_dropped_start_does_not_block_later_starts() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let session = controller(&capture, &inference, None);

    capture.hang_next_begin();
    let pending = tokio::time::timeout(Duration::from_millis(50), session.start()).await;
    assert!(pending.is_err());
    assert_eq!(session.phase(), Phase::Idle);

    assert_eq!(session.start().await.unwrap(), Ack::Accepted);
    assert_eq!(session.phase(), Phase::Recording);
}

/// Small deterministic generator for interleaving commands.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_commands_keep_phases_consistent() {
    let capture = Arc::new(FakeCapture::new());
    let inference = Arc::new(FakeInference::answering("hello", "hi there"));
    let backend = Arc::new(RecordingBackend::gated());
    let session = controller(&capture, &inference, speech_for(&backend));

    let collected = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let collector = {
        let mut events = session.subscribe();
        let collected = collected.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => collected.lock().push(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        panic!("event collector lagged by {n}")
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    for _ in 0..200 {
        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let op = rng.next() % 5;
                let session = session.clone();
                let backend = backend.clone();
                tokio::spawn(async move {
                    match op {
                        0 => {
                            let _ = session.start().await;
                        }
                        1 => {
                            let _ = session.stop().await;
                        }
                        2 => {
                            session.stop_speaking();
                        }
                        3 => session.abandon().await,
                        _ => backend.release(),
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let open = capture.begins() - capture.ends();
        assert!(open <= 1, "{open} captures open at once");
    }

    session.abandon().await;
    wait_for_phase(&session, Phase::Idle).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    collector.abort();

    assert_eq!(capture.open_id(), None);
    assert_eq!(capture.begins(), capture.ends());

    let events = collected.lock().clone();
    let mut current = Phase::Idle;
    let mut changes = 0;
    for event in &events {
        if let SessionEvent::PhaseChanged { from, to, .. } = event {
            assert_eq!(*from, current, "phase events out of order: {events:?}");
            assert!(from.can_transition_to(*to), "illegal transition {from} -> {to}");
            current = *to;
            changes += 1;
        }
    }
    assert_eq!(current, Phase::Idle);
    assert!(changes > 0);
}
