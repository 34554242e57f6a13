// Tests for transcript assembly from streamed deltas

use kiosk_voice::session::{TranscriptAssembler, TranscriptSource};

#[test]
fn test_deltas_extend_open_partial_entry() {
    let mut log = TranscriptAssembler::new();

    log.append_delta(TranscriptSource::User, "Ich möchte");
    log.append_delta(TranscriptSource::User, " ein Paket");
    let entry = log.append_delta(TranscriptSource::User, " senden");

    assert_eq!(entry.text, "Ich möchte ein Paket senden");
    assert!(entry.is_partial);
    assert_eq!(log.len(), 1);
}

#[test]
fn test_sources_keep_separate_partials() {
    let mut log = TranscriptAssembler::new();

    log.append_delta(TranscriptSource::User, "Hello");
    log.append_delta(TranscriptSource::Model, "Hi,");
    log.append_delta(TranscriptSource::User, " there");
    log.append_delta(TranscriptSource::Model, " how can I help?");

    let entries = log.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].source, TranscriptSource::User);
    assert_eq!(entries[0].text, "Hello there");
    assert_eq!(entries[1].source, TranscriptSource::Model);
    assert_eq!(entries[1].text, "Hi, how can I help?");
}

#[test]
fn test_turn_complete_finalizes_partials() {
    let mut log = TranscriptAssembler::new();

    log.append_delta(TranscriptSource::User, "Priority please");
    log.append_delta(TranscriptSource::Model, "Priority selected.");

    assert_eq!(log.complete_turn(), 2);
    assert!(log.entries().iter().all(|e| !e.is_partial));
    assert!(log.partial(TranscriptSource::User).is_none());
    assert!(log.partial(TranscriptSource::Model).is_none());

    // Nothing left to finalize
    assert_eq!(log.complete_turn(), 0);
}

#[test]
fn test_delta_after_turn_starts_new_entry() {
    let mut log = TranscriptAssembler::new();

    log.append_delta(TranscriptSource::Model, "First answer.");
    log.complete_turn();
    let entry = log.append_delta(TranscriptSource::Model, "Second");

    assert_eq!(entry.text, "Second");
    assert!(entry.is_partial);
    assert_eq!(log.len(), 2);
    assert_eq!(log.entries()[0].text, "First answer.");
    assert!(!log.entries()[0].is_partial);
}

#[test]
fn test_at_most_one_partial_per_source() {
    let mut log = TranscriptAssembler::new();

    for i in 0..5 {
        log.append_delta(TranscriptSource::User, &format!("u{} ", i));
        log.append_delta(TranscriptSource::Model, &format!("m{} ", i));
        if i % 2 == 1 {
            log.complete_turn();
        }
    }

    for source in [TranscriptSource::User, TranscriptSource::Model] {
        let partials = log
            .entries()
            .iter()
            .filter(|e| e.source == source && e.is_partial)
            .count();
        assert!(partials <= 1, "{:?} has {} partial entries", source, partials);
    }
}

#[test]
fn test_entry_ids_are_monotonic() {
    let mut log = TranscriptAssembler::new();

    log.append_delta(TranscriptSource::User, "a");
    log.append_delta(TranscriptSource::Model, "b");
    log.complete_turn();
    log.append_delta(TranscriptSource::User, "c");

    let ids: Vec<u64> = log.entries().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn test_entry_serializes_lowercase_source() {
    let mut log = TranscriptAssembler::new();
    log.append_delta(TranscriptSource::Model, "Grüezi");

    let json = serde_json::to_value(&log.entries()[0]).unwrap();
    assert_eq!(json["source"], "model");
    assert_eq!(json["text"], "Grüezi");
    assert_eq!(json["is_partial"], true);
}
