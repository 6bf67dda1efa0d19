//! End-to-end detector scenarios with the default configuration and the
//! deterministic local embedder.

use std::sync::Arc;

use repomem::{
    BloomFilter, CheckOptions, DetectorConfig, DetectorError, DuplicateDetector,
    LocalHashEmbedder, MemoryStorage, PrDescriptor, ResultKind,
};

fn new_detector() -> DuplicateDetector {
    DuplicateDetector::new(
        Arc::new(LocalHashEmbedder::default()),
        Some(Arc::new(MemoryStorage::new())),
        DetectorConfig::default(),
    )
    .expect("detector")
}

fn login_fix(id: i64) -> PrDescriptor {
    PrDescriptor::new(id, "Fix login bug", "Handle empty passwords").with_files(["auth/login.ts"])
}

async fn seeded_detector() -> DuplicateDetector {
    let detector = new_detector();
    detector.init().await.expect("init");
    detector
        .check(&login_fix(1), CheckOptions::default())
        .await
        .expect("seed check");
    detector
}

#[tokio::test(flavor = "current_thread")]
async fn first_descriptor_is_unique_and_indexed() {
    let detector = new_detector();
    detector.init().await.expect("init");

    let result = detector
        .check(&login_fix(1), CheckOptions::default())
        .await
        .expect("check");
    assert_eq!(result.result, ResultKind::Unique);
    assert_eq!(result.confidence, 0.0);
    assert!(result.original_id.is_none());

    let stats = detector.get_stats();
    assert_eq!(stats.total_prs, 1);
    assert_eq!(stats.storage_backend, "memory");

    // The bloom filter now carries the content fingerprint.
    let fingerprint = login_fix(1).sanitize().fingerprint();
    let mut bloom = BloomFilter::new(stats.bloom_size, 5);
    bloom
        .import(&detector.export_state().bloom)
        .expect("bloom import");
    assert!(bloom.might_contain(&fingerprint));
}

#[tokio::test(flavor = "current_thread")]
async fn exact_replay_with_a_new_id_is_a_duplicate() {
    let detector = seeded_detector().await;

    let result = detector
        .check(&login_fix(2), CheckOptions::default())
        .await
        .expect("check");
    assert_eq!(result.result, ResultKind::Duplicate);
    assert_eq!(result.original_id, Some(1));
    assert!(result.confidence >= 0.90);

    assert_eq!(detector.duplicate_root(2), 1);
    assert_eq!(detector.duplicate_descendants(1), vec![2]);
}

#[tokio::test(flavor = "current_thread")]
async fn paraphrase_lands_at_or_above_the_possible_tier() {
    let detector = seeded_detector().await;

    let paraphrase = PrDescriptor::new(
        3,
        "Resolve auth bug with empty password",
        "Validate blank passwords correctly",
    )
    .with_files(["auth/login.ts", "auth/validation.ts"]);
    let result = detector
        .check(&paraphrase, CheckOptions::default())
        .await
        .expect("check");

    assert!(matches!(
        result.result,
        ResultKind::Duplicate | ResultKind::Possible
    ));
    assert_eq!(result.original_id, Some(1));
    assert!(result.confidence >= 0.82);
}

#[tokio::test(flavor = "current_thread")]
async fn unrelated_descriptor_stays_unique() {
    let detector = seeded_detector().await;

    let unrelated = PrDescriptor::new(4, "Add dark mode to dashboard", "CSS variables and toggle")
        .with_files(["ui/theme.css", "components/Navbar.tsx"]);
    let result = detector
        .check(&unrelated, CheckOptions::default())
        .await
        .expect("check");

    assert_eq!(result.result, ResultKind::Unique);
    assert!(result.confidence < 0.82);
    assert!(result.original_id.is_none());
    assert_eq!(detector.get_stats().duplicate_pairs, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn dry_run_preserves_the_index() {
    let detector = seeded_detector().await;
    assert_eq!(detector.get_stats().total_prs, 1);

    detector
        .check(
            &PrDescriptor::new(5, "Test", "x").with_files(["a.ts"]),
            CheckOptions { dry_run: true },
        )
        .await
        .expect("dry run");
    assert_eq!(detector.get_stats().total_prs, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn snapshot_restore_preserves_decisions() {
    let detector = seeded_detector().await;
    detector
        .check(&login_fix(2), CheckOptions::default())
        .await
        .expect("check 2");
    let paraphrase = PrDescriptor::new(
        3,
        "Resolve auth bug with empty password",
        "Validate blank passwords correctly",
    )
    .with_files(["auth/login.ts", "auth/validation.ts"]);
    detector
        .check(&paraphrase, CheckOptions::default())
        .await
        .expect("check 3");
    let unrelated = PrDescriptor::new(4, "Add dark mode to dashboard", "CSS variables and toggle")
        .with_files(["ui/theme.css", "components/Navbar.tsx"]);
    detector
        .check(&unrelated, CheckOptions::default())
        .await
        .expect("check 4");

    let snapshot = detector.export_state();
    assert_eq!(snapshot.records.len(), 4);
    // Every record shares the index's fixed embedding dimension.
    let dimension = snapshot.records[0].text_embedding.len();
    for record in &snapshot.records {
        assert_eq!(record.text_embedding.len(), dimension);
        assert_eq!(record.diff_embedding.len(), dimension);
    }

    // A restored detector runs storageless off the imported mirror.
    let restored =
        DuplicateDetector::in_memory(Arc::new(LocalHashEmbedder::default())).expect("detector");
    restored.import_state(&snapshot).expect("import");
    assert_eq!(restored.get_stats().total_prs, 4);
    let ids: Vec<i64> = restored.export_state().records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let replay = restored
        .check(&login_fix(2), CheckOptions::default())
        .await
        .expect("replay");
    assert_eq!(replay.result, ResultKind::Duplicate);
    assert_eq!(replay.original_id, Some(1));
}

#[tokio::test(flavor = "current_thread")]
async fn snapshot_file_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("detector.snapshot.json");

    let detector = seeded_detector().await;
    detector.snapshot_to(&path).await.expect("snapshot");

    let restored =
        DuplicateDetector::in_memory(Arc::new(LocalHashEmbedder::default())).expect("detector");
    restored.restore_from(&path).await.expect("restore");
    assert_eq!(restored.get_stats().total_prs, 1);

    let replay = restored
        .check(&login_fix(2), CheckOptions::default())
        .await
        .expect("replay");
    assert_eq!(replay.result, ResultKind::Duplicate);
    assert_eq!(replay.original_id, Some(1));
}

#[tokio::test(flavor = "current_thread")]
async fn oversized_batches_are_rejected() {
    let detector = new_detector();
    detector.init().await.expect("init");

    let batch: Vec<PrDescriptor> = (1..=1001)
        .map(|id| PrDescriptor::new(id, format!("pr {id}"), ""))
        .collect();
    assert!(matches!(
        detector.check_many(&batch, CheckOptions::default()).await,
        Err(DetectorError::InvalidInput(_))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn batch_failures_never_abort_the_batch() {
    let detector = new_detector();
    detector.init().await.expect("init");

    let batch = vec![
        login_fix(1),
        PrDescriptor::new(-2, "broken", ""),
        login_fix(3),
    ];
    let outcomes = detector
        .check_many(&batch, CheckOptions::default())
        .await
        .expect("batch");

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].id, 1);
    assert_eq!(outcomes[0].result.result, ResultKind::Unique);

    assert_eq!(outcomes[1].id, -2);
    assert_eq!(outcomes[1].result.result, ResultKind::Unique);
    assert_eq!(outcomes[1].result.confidence, 0.0);

    assert_eq!(outcomes[2].id, 3);
    assert_eq!(outcomes[2].result.result, ResultKind::Duplicate);
    assert_eq!(outcomes[2].result.original_id, Some(1));
}

#[tokio::test(flavor = "current_thread")]
async fn sqlite_backed_index_survives_restart() {
    use repomem::SqliteStorage;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("repomem.db");

    {
        let detector = DuplicateDetector::new(
            Arc::new(LocalHashEmbedder::default()),
            Some(Arc::new(SqliteStorage::open(&path).expect("open"))),
            DetectorConfig::default(),
        )
        .expect("detector");
        detector.init().await.expect("init");
        detector
            .check(&login_fix(1), CheckOptions::default())
            .await
            .expect("check 1");
        detector
            .check(&login_fix(2), CheckOptions::default())
            .await
            .expect("check 2");
        detector.close().await.expect("close");
    }

    let detector = DuplicateDetector::new(
        Arc::new(LocalHashEmbedder::default()),
        Some(Arc::new(SqliteStorage::open(&path).expect("reopen"))),
        DetectorConfig::default(),
    )
    .expect("detector");
    detector.init().await.expect("init");

    let stats = detector.get_stats();
    assert_eq!(stats.total_prs, 2);
    assert_eq!(stats.storage_backend, "sqlite");
    // The duplicate edge 2→1 was replayed from recorded check results.
    assert_eq!(stats.duplicate_pairs, 1);
    assert_eq!(detector.duplicate_root(2), 1);

    let analytics = detector
        .analytics()
        .await
        .expect("analytics")
        .expect("capability");
    assert_eq!(analytics.summary.total_checks, 2);
    assert_eq!(analytics.summary.duplicates, 1);
}
