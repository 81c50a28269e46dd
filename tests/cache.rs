//! Audio cache integration tests
//!
//! Persistence runs against real `SQLite` files in temporary directories

use std::sync::Arc;

use tokio_stream::StreamExt;

use sayboard::cache::{CacheKey, Pacer, PregenEvent, PregenPlan, PregenSummary, bulk_populate};
use sayboard::{CacheStore, VoiceIdentity};

mod common;

use common::{CountingRemote, remote_audio, seeded_store};

#[test]
fn test_stats_sum_sizes() {
    let store = seeded_store(&[
        ("Oo", VoiceIdentity::Female, &[0; 100]),
        ("Hindi", VoiceIdentity::Female, &[0; 250]),
        ("Tulong", VoiceIdentity::Male, &[0; 50]),
    ]);

    let stats = store.stats().unwrap();
    assert_eq!(stats.entry_count, 3);
    assert_eq!(stats.total_bytes, 400);
}

#[test]
fn test_empty_store_stats() {
    let stats = CacheStore::in_memory().stats().unwrap();
    assert_eq!(stats.entry_count, 0);
    assert_eq!(stats.total_bytes, 0);
}

#[test]
fn test_same_text_different_voices_are_separate() {
    let store = seeded_store(&[
        ("Salamat po", VoiceIdentity::Female, b"female"),
        ("Salamat po", VoiceIdentity::Male, b"male"),
    ]);

    assert_eq!(
        store.get("Salamat po", VoiceIdentity::Female).unwrap().unwrap(),
        b"female"
    );
    assert_eq!(
        store.get("Salamat po", VoiceIdentity::Male).unwrap().unwrap(),
        b"male"
    );
    assert!(store.get("Salamat po", VoiceIdentity::Child).unwrap().is_none());
}

#[test]
fn test_text_is_not_normalized() {
    let store = seeded_store(&[("Salamat po", VoiceIdentity::Default, b"a")]);

    assert!(store.get("salamat po", VoiceIdentity::Default).unwrap().is_none());
    assert!(store.get("Salamat po ", VoiceIdentity::Default).unwrap().is_none());
    assert_ne!(
        CacheKey::derive("Salamat po", VoiceIdentity::Default),
        CacheKey::derive("Salamat po ", VoiceIdentity::Default)
    );
}

#[test]
fn test_clear_empties_store() {
    let store = seeded_store(&[
        ("Oo", VoiceIdentity::Female, b"1"),
        ("Hindi", VoiceIdentity::Male, b"2"),
    ]);

    store.clear().unwrap();

    assert_eq!(store.stats().unwrap().entry_count, 0);
    assert!(store.get("Oo", VoiceIdentity::Female).unwrap().is_none());
    assert!(store.entries().unwrap().is_empty());
}

#[test]
fn test_entries_list_metadata_without_audio() {
    let store = seeded_store(&[("Gutom ako", VoiceIdentity::Child, &[7; 42])]);

    let entries = store.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source_text, "Gutom ako");
    assert_eq!(entries[0].voice, VoiceIdentity::Child);
    assert_eq!(entries[0].size, 42);
    assert_eq!(
        entries[0].key,
        CacheKey::derive("Gutom ako", VoiceIdentity::Child).as_str()
    );
}

#[test]
fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("audio_cache.db");

    {
        let store = CacheStore::file(&path);
        store.put("Salamat po", VoiceIdentity::Female, b"mp3").unwrap();
    }

    let reopened = CacheStore::file(&path);
    assert_eq!(
        reopened.get("Salamat po", VoiceIdentity::Female).unwrap().unwrap(),
        b"mp3"
    );
    assert_eq!(reopened.stats().unwrap().entry_count, 1);
}

#[test]
fn test_lazy_open_does_no_io() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audio_cache.db");

    let store = CacheStore::file(&path);
    assert!(!path.exists());

    store.stats().unwrap();
    assert!(path.exists());
}

#[test]
fn test_unopenable_location_is_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the database file should be
    let path = dir.path().join("occupied");
    std::fs::create_dir(&path).unwrap();

    let err = CacheStore::file(&path).stats().unwrap_err();
    assert!(err.is_storage(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_bulk_populate_skips_cached_pairs() {
    let store = seeded_store(&[("Oo", VoiceIdentity::Female, b"already")]);
    let remote = Arc::new(CountingRemote::new());

    let plan = PregenPlan::new(
        ["Oo", "Hindi"],
        &[VoiceIdentity::Female, VoiceIdentity::Male],
    );
    let events: Vec<PregenEvent> =
        bulk_populate(store.clone(), plan, remote.clone(), Pacer::none())
            .collect()
            .await;

    assert_eq!(events.len(), 5);
    assert!(matches!(&events[0], PregenEvent::Skipped(p) if p.index == 1 && p.total == 4));
    assert!(matches!(
        &events[1],
        PregenEvent::Generated { progress, bytes }
            if progress.text == "Oo" && progress.voice == VoiceIdentity::Male && *bytes == remote_audio().len()
    ));
    assert_eq!(
        events[4],
        PregenEvent::Finished(PregenSummary {
            generated: 3,
            skipped: 1,
            failed: 0,
        })
    );

    assert_eq!(remote.calls(), 3);
    assert_eq!(store.stats().unwrap().entry_count, 4);
    // The seeded entry is untouched
    assert_eq!(
        store.get("Oo", VoiceIdentity::Female).unwrap().unwrap(),
        b"already"
    );
}

#[tokio::test]
async fn test_bulk_populate_continues_after_failures() {
    let store = CacheStore::in_memory();
    let remote = Arc::new(CountingRemote::failing());

    let plan = PregenPlan::new(["Oo", "Hindi"], &[VoiceIdentity::Default]);
    let events: Vec<PregenEvent> = bulk_populate(store.clone(), plan, remote.clone(), Pacer::none())
        .collect()
        .await;

    assert_eq!(remote.calls(), 2);
    assert!(matches!(&events[0], PregenEvent::Failed { error, .. } if error.contains("503")));
    assert_eq!(
        events.last(),
        Some(&PregenEvent::Finished(PregenSummary {
            generated: 0,
            skipped: 0,
            failed: 2,
        }))
    );
    assert_eq!(store.stats().unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_bulk_populate_rejects_undecodable_audio() {
    let store = CacheStore::in_memory();
    let remote = Arc::new(CountingRemote::malformed());

    let plan = PregenPlan::new(["Oo"], &[VoiceIdentity::Child]);
    let events: Vec<PregenEvent> = bulk_populate(store.clone(), plan, remote, Pacer::none())
        .collect()
        .await;

    assert!(matches!(&events[0], PregenEvent::Failed { error, .. } if error.contains("malformed audio")));
    assert!(!store.contains("Oo", VoiceIdentity::Child).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_pacer_delays_only_between_synthesis_calls() {
    let store = seeded_store(&[("Oo", VoiceIdentity::Default, b"cached")]);
    let remote = Arc::new(CountingRemote::new());
    let delay = std::time::Duration::from_millis(500);

    let plan = PregenPlan::new(["Oo", "Hindi", "Tulong"], &[VoiceIdentity::Default]);
    let started = tokio::time::Instant::now();
    let events: Vec<PregenEvent> =
        bulk_populate(store, plan, remote.clone(), Pacer::fixed(delay))
            .collect()
            .await;

    assert_eq!(events.len(), 4);
    assert_eq!(remote.calls(), 2);
    // One skip, two synthesis calls: a single pause between them
    let elapsed = started.elapsed();
    assert!(elapsed >= delay, "elapsed {elapsed:?}");
    assert!(elapsed < delay * 2, "elapsed {elapsed:?}");
}
