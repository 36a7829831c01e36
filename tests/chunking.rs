mod common;

use std::time::Duration;

use common::{Delivered, Harness, RecordingSink, ScriptedExtractor, Step, VIDEO_URL};
use mediadrop::delivery::OutboxSink;
use mediadrop::{FetchError, Quality, SplitLimits};
use tempfile::TempDir;
use tokio::time::Instant;

const LIMITS: SplitLimits = SplitLimits {
    max_single_unit: 1_000,
    chunk_size: 900,
};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|n| (n * 7 % 256) as u8).collect()
}

fn harness_with_file(bytes: Vec<u8>) -> Harness {
    Harness::with_limits(
        ScriptedExtractor::new().on(
            "best[height<=1080]",
            Step::Write {
                name: "Big Video.mp4",
                bytes,
            },
        ),
        LIMITS,
    )
}

#[tokio::test]
async fn file_at_limit_is_sent_whole() {
    let bytes = payload(1_000);
    let harness = harness_with_file(bytes.clone());
    let id = harness.orchestrator.submit_url(VIDEO_URL).await.unwrap().id;
    let sink = RecordingSink::new();

    let report = harness
        .orchestrator
        .select_quality(&id, Quality::High, &sink)
        .await
        .unwrap();

    assert!(!report.chunked);
    assert_eq!(report.delivered, vec!["Big Video.mp4"]);
    assert_eq!(
        sink.events(),
        vec![Delivered::Artifact {
            name: "Big Video.mp4".to_string(),
            bytes,
        }]
    );
}

#[tokio::test]
async fn oversized_file_is_announced_then_split_in_order() {
    let bytes = payload(2_701);
    let harness = harness_with_file(bytes.clone());
    let id = harness.orchestrator.submit_url(VIDEO_URL).await.unwrap().id;
    let sink = RecordingSink::new();

    let report = harness
        .orchestrator
        .select_quality(&id, Quality::High, &sink)
        .await
        .unwrap();

    assert!(report.chunked);
    assert_eq!(
        report.delivered,
        vec![
            "Big Video.mp4.part000",
            "Big Video.mp4.part001",
            "Big Video.mp4.part002",
            "Big Video.mp4.part003",
        ]
    );

    let events = sink.events();
    assert_eq!(
        events[0],
        Delivered::Announce {
            name: "Big Video.mp4".to_string(),
            total_parts: 4,
        }
    );

    let mut rebuilt = Vec::new();
    for (position, event) in events[1..].iter().enumerate() {
        match event {
            Delivered::Chunk {
                index,
                bytes,
                total_parts,
                ..
            } => {
                assert_eq!(*index, position as u64);
                assert_eq!(*total_parts, 4);
                if position < 3 {
                    assert_eq!(bytes.len(), 900);
                } else {
                    assert_eq!(bytes.len(), 1);
                }
                rebuilt.extend_from_slice(bytes);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(rebuilt, bytes);
    harness.assert_scratch_removed();
}

#[tokio::test]
async fn rejected_chunk_reports_parts_already_sent() {
    let harness = harness_with_file(payload(2_000));
    let id = harness.orchestrator.submit_url(VIDEO_URL).await.unwrap().id;
    let sink = RecordingSink::rejecting_chunk(1);

    let error = harness
        .orchestrator
        .select_quality(&id, Quality::High, &sink)
        .await
        .unwrap_err();

    match error {
        FetchError::DeliveryFailure { delivered, .. } => assert_eq!(delivered, 1),
        other => panic!("unexpected error: {other:?}"),
    }
    // The first part stays delivered.
    assert_eq!(
        sink.events()
            .iter()
            .filter(|event| matches!(event, Delivered::Chunk { .. }))
            .count(),
        1
    );
    harness.assert_scratch_removed();
}

#[tokio::test]
async fn outbox_sink_receives_all_parts() {
    let bytes = payload(1_850);
    let harness = harness_with_file(bytes.clone());
    let id = harness.orchestrator.submit_url(VIDEO_URL).await.unwrap().id;
    let outbox = TempDir::new().unwrap();
    let sink = OutboxSink::new(outbox.path());

    let report = harness
        .orchestrator
        .select_quality(&id, Quality::High, &sink)
        .await
        .unwrap();

    let mut rebuilt = Vec::new();
    for name in &report.delivered {
        rebuilt.extend(tokio::fs::read(outbox.path().join(name)).await.unwrap());
    }
    assert_eq!(report.delivered.len(), 3);
    assert_eq!(rebuilt, bytes);
    harness.assert_scratch_removed();
}

#[tokio::test(start_paused = true)]
async fn parts_are_paced_only_between_sends() {
    let pacing = Duration::from_secs(1);
    let harness = Harness::with_pacing(
        ScriptedExtractor::new().on(
            "best[height<=1080]",
            Step::Write {
                name: "Big Video.mp4",
                bytes: payload(2_500),
            },
        ),
        LIMITS,
        pacing,
    );
    let id = harness.orchestrator.submit_url(VIDEO_URL).await.unwrap().id;
    let sink = RecordingSink::new();

    let started = Instant::now();
    let report = harness
        .orchestrator
        .select_quality(&id, Quality::High, &sink)
        .await
        .unwrap();
    let finished = Instant::now();

    let times = sink.chunk_times.lock().unwrap().clone();
    assert_eq!(report.delivered.len(), 3);
    assert_eq!(times.len(), 3);
    // No wait before the first part or after the last.
    assert_eq!(times[0], started);
    assert_eq!(finished, times[2]);
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= pacing && gap < pacing * 2, "gap was {gap:?}");
    }
    let elapsed = finished - started;
    assert!(elapsed >= pacing * 2 && elapsed < pacing * 3, "elapsed {elapsed:?}");
    harness.assert_scratch_removed();
}
