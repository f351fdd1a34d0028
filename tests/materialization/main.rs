#[path = "../common/mod.rs"]
mod common;

use std::{
    collections::HashMap,
    sync::{atomic::Ordering, Arc},
    time::Duration
};

use approx::assert_abs_diff_eq;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rating_materializer::{
    database::{db_structs::RawMatch, memory::InMemoryStore, CacheStore},
    materializer::{MaterializationError, MaterializationOutcome, MaterializationSummary, Materializer},
    model::{
        rating_model::OpenSkillModel,
        structures::{snapshot::CacheSnapshot, stage::Stage}
    },
    utils::test_utils::{
        generate_config, generate_config_data, generate_participants, generate_raw_config, generate_raw_match,
        generate_raw_matches, generate_timestamp
    }
};
use serde_json::json;

use common::init_test_env;
use fakes::{EditableRepository, FlakyCache, SlowRepository};

type MemoryMaterializer = Materializer<InMemoryStore, InMemoryStore, OpenSkillModel>;

/// A store holding the default configuration and `n` random matches.
async fn seeded_store(n: usize) -> (Arc<InMemoryStore>, String) {
    let store = InMemoryStore::new();
    let raw = generate_raw_config("Season 3", generate_config_data());
    let config_hash = raw.config_hash.clone();

    store.insert_config(raw, true).await.unwrap();
    store
        .insert_matches(generate_raw_matches(n, &generate_participants(12)))
        .await;

    (Arc::new(store), config_hash)
}

fn materializer(store: &Arc<InMemoryStore>) -> MemoryMaterializer {
    Materializer::new(store.clone(), store.clone(), OpenSkillModel::default())
}

fn summary(outcome: MaterializationOutcome) -> MaterializationSummary {
    match outcome {
        MaterializationOutcome::Materialized(summary) => summary,
        other => panic!("Expected a materialization, got {:?}", other)
    }
}

async fn snapshot(store: &InMemoryStore, config_hash: &str) -> CacheSnapshot {
    store
        .read_snapshot(config_hash)
        .await
        .unwrap()
        .expect("Expected a stored snapshot")
}

#[tokio::test]
async fn test_materialize_then_cache_hit() {
    init_test_env();
    let (store, config_hash) = seeded_store(50).await;
    let materializer = materializer(&store);

    let first = summary(materializer.materialize(&config_hash, false).await.unwrap());
    assert_eq!(first.match_count, 50);
    assert_eq!(first.participant_count, 12);
    assert_eq!(first.skipped_matches, 0);

    let before = snapshot(&store, &config_hash).await;

    let second = materializer.materialize(&config_hash, false).await.unwrap();
    assert_eq!(
        second,
        MaterializationOutcome::CacheHit {
            config_hash: config_hash.clone(),
            source_data_hash: first.source_data_hash.clone()
        }
    );

    // Nothing was rewritten
    assert_eq!(snapshot(&store, &config_hash).await, before);
}

#[tokio::test]
async fn test_snapshot_contents() {
    init_test_env();
    let (store, config_hash) = seeded_store(40).await;
    let config = generate_config();

    materializer(&store).materialize(&config_hash, false).await.unwrap();
    let snapshot = snapshot(&store, &config_hash).await;

    assert_eq!(snapshot.config_hash, config_hash);
    assert_eq!(snapshot.window_start, config.start_date);
    assert_eq!(snapshot.window_end, config.end_date);
    assert_eq!(snapshot.results.len(), 40 * 4);

    // Ratings are sorted by display rating, highest first
    for pair in snapshot.ratings.windows(2) {
        assert!(pair[0].display_rating >= pair[1].display_rating);
    }

    for result in &snapshot.results {
        assert!(result.rating_weight >= config.weight_min);
        assert!(result.rating_weight <= config.weight_max);
        assert!((1..=4).contains(&result.placement));
    }

    // Placements within a match are a permutation of 1..=4
    let mut placements: HashMap<&str, Vec<u8>> = HashMap::new();
    for result in &snapshot.results {
        placements.entry(&result.match_id).or_default().push(result.placement);
    }
    for (_, mut p) in placements {
        p.sort();
        assert_eq!(p, vec![1, 2, 3, 4]);
    }

    // Aggregates agree with the per-match records
    for rating in &snapshot.ratings {
        let own: Vec<_> = snapshot
            .results
            .iter()
            .filter(|r| r.participant_id == rating.participant_id)
            .collect();

        assert_eq!(rating.matches_played as usize, own.len());
        assert_eq!(rating.total_margin, own.iter().map(|r| r.plus_minus).sum::<i64>());
        assert_eq!(
            rating.best_margin,
            own.iter().map(|r| r.plus_minus).filter(|pm| *pm > 0).max()
        );
        assert_eq!(
            rating.worst_margin,
            own.iter().map(|r| r.plus_minus).filter(|pm| *pm < 0).min()
        );
        assert_abs_diff_eq!(
            rating.display_rating,
            rating.mean - config.confidence_factor * rating.uncertainty,
            epsilon = 1e-9
        );

        let last = own.last().unwrap();
        assert_abs_diff_eq!(rating.mean, last.mean_after);
        assert_abs_diff_eq!(rating.uncertainty, last.uncertainty_after);
    }
}

#[tokio::test]
async fn test_deterministic_under_shuffled_load_order() {
    init_test_env();
    let raw = generate_raw_config("Season 3", generate_config_data());
    let config_hash = raw.config_hash.clone();
    let matches = generate_raw_matches(80, &generate_participants(10));

    let mut shuffled = matches.clone();
    shuffled.shuffle(&mut ChaCha8Rng::seed_from_u64(7));

    let mut snapshots = Vec::new();
    for order in [matches, shuffled] {
        let store = Arc::new(InMemoryStore::new());
        store.insert_config(raw.clone(), true).await.unwrap();
        store.insert_matches(order).await;

        materializer(&store).materialize(&config_hash, false).await.unwrap();
        snapshots.push(snapshot(&store, &config_hash).await);
    }

    assert_eq!(snapshots[0].source_data_hash, snapshots[1].source_data_hash);
    assert_eq!(snapshots[0].ratings, snapshots[1].ratings);
    assert_eq!(snapshots[0].results, snapshots[1].results);
}

#[tokio::test]
async fn test_malformed_matches_are_excluded() {
    init_test_env();
    let (clean, config_hash) = seeded_store(30).await;
    let (dirty, _) = seeded_store(30).await;

    let seats = [("east", "x1", 40000), ("south", "x2", 30000), ("west", "x3", 20000), ("north", "x4", 10000)];

    let mut missing_seat = generate_raw_match("bad-1", generate_timestamp(90), seats);
    missing_seat.seats.pop();

    let mut missing_score = generate_raw_match("bad-2", generate_timestamp(150), seats);
    missing_score.seats[2].final_score = None;

    let duplicate_player = generate_raw_match(
        "bad-3",
        generate_timestamp(210),
        [("east", "x1", 40000), ("south", "x1", 30000), ("west", "x3", 20000), ("north", "x4", 10000)]
    );

    dirty
        .insert_matches(vec![missing_seat, missing_score, duplicate_player])
        .await;

    let clean_summary = summary(materializer(&clean).materialize(&config_hash, false).await.unwrap());
    let dirty_summary = summary(materializer(&dirty).materialize(&config_hash, false).await.unwrap());

    assert_eq!(dirty_summary.skipped_matches, 3);
    assert_eq!(dirty_summary.match_count, clean_summary.match_count);
    assert_eq!(dirty_summary.source_data_hash, clean_summary.source_data_hash);

    let clean_snapshot = snapshot(&clean, &config_hash).await;
    let dirty_snapshot = snapshot(&dirty, &config_hash).await;
    assert_eq!(clean_snapshot.ratings, dirty_snapshot.ratings);
    assert!(dirty_snapshot.ratings.iter().all(|r| !r.participant_id.starts_with('x')));
}

#[tokio::test]
async fn test_unfinished_and_out_of_window_matches_are_ignored() {
    init_test_env();
    let (store, config_hash) = seeded_store(10).await;
    let seats = [("east", "late", 40000), ("south", "b", 30000), ("west", "c", 20000), ("north", "d", 10000)];

    let mut unfinished = generate_raw_match("unfinished", generate_timestamp(30), seats);
    unfinished.status = "in_progress".to_string();
    unfinished.finished_at = None;

    let mut next_year = generate_raw_match("next-year", generate_timestamp(0), seats);
    next_year.started_at = "2025-01-01T00:00:00Z".parse().unwrap();

    store.insert_matches(vec![unfinished, next_year]).await;

    let summary = summary(materializer(&store).materialize(&config_hash, false).await.unwrap());
    assert_eq!(summary.match_count, 10);
    assert_eq!(summary.skipped_matches, 0);
}

#[tokio::test]
async fn test_match_change_invalidates_cache() {
    init_test_env();
    let (store, config_hash) = seeded_store(20).await;
    let materializer = materializer(&store);

    let first = summary(materializer.materialize(&config_hash, false).await.unwrap());

    let mut matches: Vec<RawMatch> = generate_raw_matches(20, &generate_participants(12));
    matches[5].seats[0].final_score = matches[5].seats[0].final_score.map(|s| s + 1000);
    store.set_matches(matches).await;

    let second = summary(materializer.materialize(&config_hash, false).await.unwrap());

    assert_ne!(first.source_data_hash, second.source_data_hash);
    assert_eq!(
        snapshot(&store, &config_hash).await.source_data_hash,
        second.source_data_hash
    );
}

#[tokio::test]
async fn test_new_match_invalidates_cache() {
    init_test_env();
    let (store, config_hash) = seeded_store(20).await;
    let materializer = materializer(&store);

    materializer.materialize(&config_hash, false).await.unwrap();

    store
        .insert_matches(vec![generate_raw_match(
            "extra",
            generate_timestamp(-3600),
            [("east", "a", 40000), ("south", "b", 30000), ("west", "c", 20000), ("north", "d", 10000)]
        )])
        .await;

    let outcome = summary(materializer.materialize(&config_hash, false).await.unwrap());
    assert_eq!(outcome.match_count, 21);
}

#[tokio::test]
async fn test_config_change_uses_its_own_cache() {
    init_test_env();
    let (store, config_hash) = seeded_store(20).await;

    let mut data = generate_config_data();
    data["scoring"]["oka"] = json!(25000);
    let other = generate_raw_config("Season 3 (high oka)", data);
    let other_hash = other.config_hash.clone();
    store.insert_config(other, false).await.unwrap();

    let materializer = materializer(&store);
    materializer.materialize(&config_hash, false).await.unwrap();

    // A different configuration is never served from another's cache
    let outcome = materializer.materialize(&other_hash, false).await.unwrap();
    assert!(matches!(outcome, MaterializationOutcome::Materialized(_)));

    let a = snapshot(&store, &config_hash).await;
    let b = snapshot(&store, &other_hash).await;
    assert_eq!(a.source_data_hash, b.source_data_hash);
    assert_ne!(a.results, b.results);
    assert_eq!(store.snapshot_count().await, 2);
}

#[tokio::test]
async fn test_force_refresh_recomputes() {
    init_test_env();
    let (store, config_hash) = seeded_store(20).await;
    let materializer = materializer(&store);

    materializer.materialize(&config_hash, false).await.unwrap();
    let before = snapshot(&store, &config_hash).await;

    let outcome = materializer.materialize(&config_hash, true).await.unwrap();
    assert!(matches!(outcome, MaterializationOutcome::Materialized(_)));

    let after = snapshot(&store, &config_hash).await;
    assert_eq!(before.ratings, after.ratings);
    assert_eq!(before.results, after.results);
    assert!(after.computed_at >= before.computed_at);
}

#[tokio::test]
async fn test_empty_window_materializes_empty_snapshot() {
    init_test_env();
    let (store, config_hash) = seeded_store(0).await;

    let summary = summary(materializer(&store).materialize(&config_hash, false).await.unwrap());
    assert_eq!(summary.match_count, 0);
    assert_eq!(summary.participant_count, 0);

    let snapshot = snapshot(&store, &config_hash).await;
    assert!(snapshot.ratings.is_empty());
    assert!(snapshot.results.is_empty());
}

#[tokio::test]
async fn test_config_not_found() {
    init_test_env();
    let (store, _) = seeded_store(5).await;

    let err = materializer(&store)
        .materialize(&"0".repeat(64), false)
        .await
        .unwrap_err();

    assert!(matches!(err, MaterializationError::ConfigNotFound(_)));
    assert!(!err.is_retryable());
    assert_eq!(store.snapshot_count().await, 0);
}

#[tokio::test]
async fn test_invalid_config() {
    init_test_env();
    let (store, _) = seeded_store(5).await;

    let mut data = generate_config_data();
    data["weights"]["min"] = json!(2.0);
    let raw = generate_raw_config("Broken", data);
    let hash = raw.config_hash.clone();
    store.insert_config(raw, false).await.unwrap();

    let err = materializer(&store).materialize(&hash, false).await.unwrap_err();

    assert!(matches!(err, MaterializationError::InvalidConfig { .. }));
    assert_eq!(err.kind(), "invalid_config");
    assert_eq!(store.snapshot_count().await, 0);
}

#[tokio::test]
async fn test_mismatched_key_is_kept() {
    init_test_env();
    let (store, _) = seeded_store(5).await;

    let mut raw = generate_raw_config("Legacy", generate_config_data());
    raw.config_hash = "f".repeat(64);
    store.insert_config(raw, false).await.unwrap();

    let materializer = materializer(&store);
    materializer.materialize(&"f".repeat(64), false).await.unwrap();
    assert!(store.read_snapshot(&"f".repeat(64)).await.unwrap().is_some());

    // Rules that do not hash to their key are never served from the cache
    let again = materializer.materialize(&"f".repeat(64), false).await.unwrap();
    assert!(matches!(again, MaterializationOutcome::Materialized(_)));
}

#[tokio::test]
async fn test_edited_rules_under_same_key_recompute() {
    init_test_env();
    let repository = Arc::new(EditableRepository::default());
    let cache = Arc::new(InMemoryStore::new());

    let raw = generate_raw_config("Season 3", generate_config_data());
    let config_hash = raw.config_hash.clone();
    repository.inner.insert_config(raw, true).await.unwrap();
    repository
        .inner
        .insert_matches(generate_raw_matches(20, &generate_participants(8)))
        .await;

    let materializer = Materializer::new(repository.clone(), cache.clone(), OpenSkillModel::default());
    summary(materializer.materialize(&config_hash, false).await.unwrap());
    let before = snapshot(&cache, &config_hash).await;

    let mut data = generate_config_data();
    data["scoring"]["oka"] = json!(30000);
    repository.edit_rules(data);

    let outcome = materializer.materialize(&config_hash, false).await.unwrap();
    assert!(matches!(outcome, MaterializationOutcome::Materialized(_)));

    let after = snapshot(&cache, &config_hash).await;
    assert_eq!(before.source_data_hash, after.source_data_hash);
    assert_ne!(before.results, after.results);
}

#[tokio::test]
async fn test_cache_read_failure_is_an_error() {
    init_test_env();
    let (store, config_hash) = seeded_store(5).await;
    let cache = Arc::new(FlakyCache::default());
    cache.fail_reads.store(true, Ordering::SeqCst);

    let materializer = Materializer::new(store.clone(), cache.clone(), OpenSkillModel::default());
    let err = materializer.materialize(&config_hash, false).await.unwrap_err();

    assert!(matches!(
        err,
        MaterializationError::Repository {
            stage: Stage::CacheCheck,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(cache.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_storing_failure_leaves_cache_empty() {
    init_test_env();
    let (store, config_hash) = seeded_store(10).await;
    let cache = Arc::new(FlakyCache::default());
    let materializer = Materializer::new(store.clone(), cache.clone(), OpenSkillModel::default());

    materializer.materialize(&config_hash, false).await.unwrap();
    assert!(cache.read_snapshot(&config_hash).await.unwrap().is_some());

    cache.fail_writes.store(true, Ordering::SeqCst);
    let err = materializer.materialize(&config_hash, true).await.unwrap_err();

    assert!(matches!(
        err,
        MaterializationError::Repository {
            stage: Stage::Storing,
            ..
        }
    ));
    assert!(cache.read_snapshot(&config_hash).await.unwrap().is_none());
    assert!(cache.read_source_hash(&config_hash).await.unwrap().is_none());

    // The next successful run restores it
    cache.fail_writes.store(false, Ordering::SeqCst);
    let outcome = materializer.materialize(&config_hash, false).await.unwrap();
    assert!(matches!(outcome, MaterializationOutcome::Materialized(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_key_runs_serialize() {
    init_test_env();
    let (store, config_hash) = seeded_store(60).await;
    let materializer = Arc::new(materializer(&store));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let materializer = materializer.clone();
            let config_hash = config_hash.clone();
            tokio::spawn(async move { materializer.materialize(&config_hash, false).await })
        })
        .collect();

    let mut materialized = 0;
    let mut hits = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            MaterializationOutcome::Materialized(_) => materialized += 1,
            MaterializationOutcome::CacheHit { .. } => hits += 1
        }
    }

    assert_eq!(materialized, 1);
    assert_eq!(hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_different_keys() {
    init_test_env();
    let (store, config_hash) = seeded_store(30).await;

    let mut data = generate_config_data();
    data["weights"]["divisor"] = json!(20000.0);
    let other = generate_raw_config("Season 3 (soft weights)", data);
    let other_hash = other.config_hash.clone();
    store.insert_config(other, false).await.unwrap();

    let materializer = Arc::new(materializer(&store));
    let a = {
        let materializer = materializer.clone();
        let hash = config_hash.clone();
        tokio::spawn(async move { materializer.materialize(&hash, false).await })
    };
    let b = {
        let materializer = materializer.clone();
        let hash = other_hash.clone();
        tokio::spawn(async move { materializer.materialize(&hash, false).await })
    };

    assert!(matches!(a.await.unwrap().unwrap(), MaterializationOutcome::Materialized(_)));
    assert!(matches!(b.await.unwrap().unwrap(), MaterializationOutcome::Materialized(_)));
    assert_eq!(store.snapshot_count().await, 2);
}

#[tokio::test]
async fn test_timeout() {
    init_test_env();
    let inner = InMemoryStore::new();
    let raw = generate_raw_config("Season 3", generate_config_data());
    let config_hash = raw.config_hash.clone();
    inner.insert_config(raw, true).await.unwrap();

    let repository = Arc::new(SlowRepository {
        inner,
        delay: Duration::from_secs(5)
    });
    let cache = Arc::new(InMemoryStore::new());
    let materializer = Materializer::new(repository, cache.clone(), OpenSkillModel::default());

    let err = materializer
        .materialize_within(&config_hash, false, Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(matches!(err, MaterializationError::TimedOut { .. }));
    assert_eq!(err.kind(), "timeout");
    assert!(err.is_retryable());
    assert_eq!(cache.snapshot_count().await, 0);
}

#[tokio::test]
async fn test_consistent_winner_outranks_consistent_loser() {
    init_test_env();
    let store = Arc::new(InMemoryStore::new());
    let raw = generate_raw_config("Season 3", generate_config_data());
    let config_hash = raw.config_hash.clone();
    store.insert_config(raw, true).await.unwrap();

    let config = generate_config();
    let tables = [["w", "a", "b", "l"], ["a", "w", "l", "c"], ["b", "c", "w", "l"]];
    let matches = (0..12)
        .map(|i| {
            let t = tables[i % tables.len()];
            // "w" always wins, "l" always finishes last
            let score = |p: &str| match p {
                "w" => 50000,
                "l" => 5000,
                _ if p == t[0] || p == t[1] => 25000,
                _ => 20000
            };
            generate_raw_match(
                &format!("m{:02}", i),
                generate_timestamp(i as i64 * 600),
                [
                    ("east", t[0], score(t[0])),
                    ("south", t[1], score(t[1])),
                    ("west", t[2], score(t[2])),
                    ("north", t[3], score(t[3]))
                ]
            )
        })
        .collect::<Vec<_>>();
    store.insert_matches(matches).await;

    materializer(&store).materialize(&config_hash, false).await.unwrap();
    let snapshot = snapshot(&store, &config_hash).await;

    let rating = |id: &str| snapshot.ratings.iter().find(|r| r.participant_id == id).unwrap();
    assert_eq!(snapshot.ratings.first().unwrap().participant_id, "w");
    assert_eq!(snapshot.ratings.last().unwrap().participant_id, "l");
    assert!(rating("w").mean > config.initial_mean);
    assert!(rating("l").mean < config.initial_mean);
    assert_eq!(rating("l").best_margin, None);
}
