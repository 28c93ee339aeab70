//! Store DST Integration Tests
//!
//! Multi-seed deterministic simulation of editing sessions with disk fault
//! injection and crashes.

use tl_store::dst::{run_store_dst_batch, summarize_store_dst_batch, StoreDSTConfig};
use tl_store::store::{FsyncPolicy, SimulatedBackendConfig};

fn assert_all_passed(results: &[tl_store::dst::StoreDSTResult]) {
    for r in results {
        assert!(
            r.passed,
            "Seed {} failed: {}",
            r.seed,
            r.error_message.as_deref().unwrap_or("unknown")
        );
    }
}

#[test]
fn test_store_dst_50_seeds_always_mode() {
    // INVARIANT: in Always mode every acknowledged commit survives the crash
    let results = run_store_dst_batch(0..50, StoreDSTConfig::crash_only());
    assert_all_passed(&results);
    for r in &results {
        assert_eq!(r.recovered_txid, r.acknowledged_txid, "Seed {}", r.seed);
    }
    println!("{}", summarize_store_dst_batch(&results));
}

#[test]
fn test_store_dst_50_seeds_with_faults() {
    // Operations that hit a fault are rejected and leave nothing behind
    let results = run_store_dst_batch(0..50, StoreDSTConfig::default());
    assert_all_passed(&results);
    println!("{}", summarize_store_dst_batch(&results));
}

#[test]
fn test_store_dst_high_chaos() {
    let results = run_store_dst_batch(100..130, StoreDSTConfig::chaos());
    assert_all_passed(&results);

    let faults: u64 = results
        .iter()
        .map(|r| r.backend_stats.write_failures + r.backend_stats.sync_failures)
        .sum();
    assert!(faults > 0, "chaos run injected no faults");

    let summary = summarize_store_dst_batch(&results);
    assert!(summary.contains("30/30 passed"), "{}", summary);
}

#[test]
fn test_store_dst_rotation_and_compaction_pressure() {
    let config = StoreDSTConfig {
        num_operations: 200,
        max_wal_file_size: 256, // Very small to force many rotations
        compact_after_commits: 7,
        ..StoreDSTConfig::chaos()
    };
    let results = run_store_dst_batch(0..20, config);
    assert_all_passed(&results);
}

#[test]
fn test_store_dst_everysec_recovers_a_prefix() {
    // Unsynced commits may be lost, but recovery always lands on a
    // committed state
    let config = StoreDSTConfig {
        fsync_policy: FsyncPolicy::EverySecond,
        backend_config: SimulatedBackendConfig::no_faults(),
        ..Default::default()
    };
    let results = run_store_dst_batch(0..20, config);
    assert_all_passed(&results);
    for r in &results {
        assert!(r.recovered_txid <= r.acknowledged_txid);
    }
}

#[test]
fn test_store_dst_no_fsync_recovers_a_prefix() {
    let config = StoreDSTConfig {
        fsync_policy: FsyncPolicy::No,
        ..StoreDSTConfig::chaos()
    };
    let results = run_store_dst_batch(0..20, config);
    assert_all_passed(&results);
}
