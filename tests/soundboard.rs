//! Soundboard integration tests: phrases through coordinator and gateway together

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_stream::StreamExt;

use sayboard::cache::{Pacer, PregenEvent, PregenPlan};
use sayboard::{
    Admission, Error, RateLimitConfig, Rejection, Soundboard, SpeakOptions, Tier, VoiceIdentity,
};

mod common;

use common::{FakeDevice, FakeLocalEngine, RigBuilder};

#[tokio::test]
async fn test_phrase_served_by_remote_then_cache() {
    let rig = RigBuilder::new().build();
    let (board, clock) = rig.soundboard(RateLimitConfig::default());
    let options = SpeakOptions::default();

    let first = board.speak_phrase("btn-1", "Tubig", &options).await.unwrap();
    assert_eq!(first.admission, Admission::Played);
    assert_eq!(first.tier, Some(Tier::Remote));

    clock.advance_ms(500);
    let second = board.speak_phrase("btn-1", "Tubig", &options).await.unwrap();
    assert_eq!(second.tier, Some(Tier::Cache));
    assert_eq!(rig.remote.calls(), 1);
    assert_eq!(board.cache().stats().unwrap().entry_count, 1);
}

#[tokio::test]
async fn test_rapid_presses_are_throttled() {
    let rig = RigBuilder::new().build();
    let (board, clock) = rig.soundboard(RateLimitConfig::default());
    let options = SpeakOptions::default();

    board.speak_phrase("btn-1", "Oo", &options).await.unwrap();
    clock.advance_ms(200);
    let second = board.speak_phrase("btn-2", "Hindi", &options).await.unwrap();

    assert_eq!(
        second.admission,
        Admission::Rejected(Rejection::Queued { position: 0 })
    );
    assert_eq!(second.tier, None);
    assert_eq!(board.time_until_next_admission(), Duration::from_millis(300));
    assert_eq!(board.state().pending_queue, vec!["btn-2"]);
    // The rejected phrase was never synthesized
    assert_eq!(rig.remote.calls(), 1);
}

#[tokio::test]
async fn test_new_phrase_cuts_off_current_one() {
    let gate = Arc::new(Notify::new());
    let rig = RigBuilder::new()
        .device(FakeDevice::gated(gate.clone()))
        .build();
    let (board, _clock) = rig.soundboard(RateLimitConfig::disabled());
    let board = Arc::new(board);

    let first = {
        let board = Arc::clone(&board);
        tokio::spawn(async move {
            board
                .speak_phrase("btn-1", "Salamat po", &SpeakOptions::default())
                .await
        })
    };
    while rig.device.played().is_empty() {
        tokio::task::yield_now().await;
    }

    let second = {
        let board = Arc::clone(&board);
        tokio::spawn(async move {
            board
                .speak_phrase("btn-2", "Paalam", &SpeakOptions::default())
                .await
        })
    };
    while rig.device.played().len() < 2 {
        tokio::task::yield_now().await;
    }

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.admission, Admission::Interrupted);
    assert_eq!(first.tier, None);
    assert_eq!(board.state().active_request_id.as_deref(), Some("btn-2"));
    assert_eq!(rig.device.stops(), 1);
    assert_eq!(rig.local.cancels(), 1);

    // The interrupted phrase was still cached
    assert!(board.cache().contains("Salamat po", VoiceIdentity::Default).unwrap());

    gate.notify_one();
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.admission, Admission::Played);
    assert!(!board.state().is_playing);
}

#[tokio::test]
async fn test_stop_silences_and_goes_idle() {
    let gate = Arc::new(Notify::new());
    let rig = RigBuilder::new()
        .device(FakeDevice::gated(gate))
        .build();
    let (board, _clock) = rig.soundboard(RateLimitConfig::default());
    let board = Arc::new(board);

    let pressed = {
        let board = Arc::clone(&board);
        tokio::spawn(async move {
            board
                .speak_phrase("btn-1", "Masakit", &SpeakOptions::default())
                .await
        })
    };
    while !board.state().is_playing {
        tokio::task::yield_now().await;
    }

    board.stop();

    let outcome = pressed.await.unwrap().unwrap();
    assert_eq!(outcome.admission, Admission::Interrupted);
    assert!(!board.state().is_playing);
    assert_eq!(rig.device.stops(), 1);
}

#[tokio::test]
async fn test_speech_failure_surfaces_and_settles() {
    let rig = RigBuilder::new()
        .offline()
        .local(FakeLocalEngine::unsupported())
        .build();
    let (board, _clock) = rig.soundboard(RateLimitConfig::default());

    let err = board
        .speak_phrase("btn-1", "Tubig", &SpeakOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_speech_failure());
    assert!(!board.state().is_playing);
}

#[tokio::test]
async fn test_observers_see_one_phrase_at_a_time() {
    let rig = RigBuilder::new().build();
    let (board, clock) = rig.soundboard(RateLimitConfig::default());

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = board.subscribe(move |state| {
        sink.lock().unwrap().push(state.active_request_id.clone());
    });

    board
        .speak_phrase("btn-1", "Oo", &SpeakOptions::default())
        .await
        .unwrap();
    clock.advance_ms(600);
    board
        .speak_phrase("btn-2", "Hindi", &SpeakOptions::default())
        .await
        .unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            Some("btn-1".to_string()),
            None,
            Some("btn-2".to_string()),
            None
        ]
    );
}

#[tokio::test]
async fn test_pregenerate_fills_cache_for_offline_use() {
    let rig = RigBuilder::new().build();
    let (board, _clock) = rig.soundboard(RateLimitConfig::disabled());

    let plan = PregenPlan::new(["Oo", "Hindi"], &[VoiceIdentity::Female]);
    let events: Vec<PregenEvent> = board
        .pregenerate(plan, Pacer::none())
        .unwrap()
        .collect()
        .await;
    assert!(matches!(events.last(), Some(PregenEvent::Finished(s)) if s.generated == 2));

    rig.connectivity.set_online(false);
    let options = SpeakOptions {
        voice: VoiceIdentity::Female,
        ..SpeakOptions::default()
    };
    let outcome = board.speak_phrase("btn-1", "Hindi", &options).await.unwrap();

    assert_eq!(outcome.tier, Some(Tier::Cache));
    assert_eq!(rig.local.calls(), 0);
}

#[tokio::test]
async fn test_pregenerate_needs_remote() {
    let rig = RigBuilder::new().without_remote().build();
    let (board, _clock) = rig.soundboard(RateLimitConfig::default());

    let result = board.pregenerate(PregenPlan::new(["Oo"], &[VoiceIdentity::Male]), Pacer::none());

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_soundboard_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Soundboard>();
}
