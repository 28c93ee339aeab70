//! Deterministic simulation testing for the repository
//!
//! Drives a random editing workload through the repository on a
//! [`SimulatedBackend`], crashes, reopens and checks:
//!
//! - **Always mode**: the recovered store is exactly the last acknowledged
//!   state (same txid, same content digest)
//! - **EverySecond / No**: the recovered store is some committed prefix of
//!   the run, never a state that was not committed
//! - **Integrity**: book counters and links are consistent after recovery
//!
//! ## Methodology
//!
//! 1. Open a repository on a seeded `SimulatedBackend` (fault injection on)
//! 2. Run operations, recording `(txid, digest)` after each one
//! 3. Crash at a random point (unsynced bytes are lost)
//! 4. Reopen on the same files with faults off and compare

use crate::clock::ManualClock;
use crate::repo::{Error, Filter, Limit, RepoConfig, Repository};
use crate::store::rng::DeterministicRng;
use crate::store::{
    FsyncPolicy, SimulatedBackend, SimulatedBackendConfig, SimulatedBackendStats, Store,
    StoreConfig,
};
use std::collections::HashMap;

const SETUP_ATTEMPTS: usize = 16;

const WORDS: &[&str] = &[
    "the", "river", "ran", "quietly", "past", "old", "mill", "and", "42", "...", "night", "fell",
];

/// Result of a single DST run
#[derive(Debug)]
pub struct StoreDSTResult {
    pub seed: u64,
    pub operations: usize,
    pub failed_operations: usize,
    pub acknowledged_txid: u64,
    pub recovered_txid: u64,
    pub backend_stats: SimulatedBackendStats,
    pub passed: bool,
    pub error_message: Option<String>,
}

/// Configuration for the repository DST harness
#[derive(Debug, Clone)]
pub struct StoreDSTConfig {
    /// Operations per run
    pub num_operations: usize,
    pub fsync_policy: FsyncPolicy,
    /// Maximum WAL file size (controls rotation)
    pub max_wal_file_size: usize,
    /// Automatic compaction interval
    pub compact_after_commits: u64,
    /// Fault injection config
    pub backend_config: SimulatedBackendConfig,
    /// Whether to crash at a random point of the run
    pub simulate_crash: bool,
}

impl Default for StoreDSTConfig {
    fn default() -> Self {
        StoreDSTConfig {
            num_operations: 120,
            fsync_policy: FsyncPolicy::Always,
            max_wal_file_size: 2048, // Small to force rotation
            compact_after_commits: 25,
            backend_config: SimulatedBackendConfig::default(),
            simulate_crash: true,
        }
    }
}

impl StoreDSTConfig {
    /// No faults, no crash
    pub fn baseline() -> Self {
        StoreDSTConfig {
            backend_config: SimulatedBackendConfig::no_faults(),
            simulate_crash: false,
            ..Default::default()
        }
    }

    /// Crash without faults
    pub fn crash_only() -> Self {
        StoreDSTConfig {
            backend_config: SimulatedBackendConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Faults and crash
    pub fn chaos() -> Self {
        StoreDSTConfig {
            backend_config: SimulatedBackendConfig::high_chaos(),
            ..Default::default()
        }
    }
}

/// Repository DST harness
pub struct StoreDSTHarness {
    seed: u64,
    rng: DeterministicRng,
    config: StoreDSTConfig,
}

type SimRepo = Repository<SimulatedBackend>;

impl StoreDSTHarness {
    pub fn new(seed: u64, config: StoreDSTConfig) -> Self {
        StoreDSTHarness {
            seed,
            rng: DeterministicRng::new(seed),
            config,
        }
    }

    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            fsync_policy: self.config.fsync_policy,
            max_wal_file_size: self.config.max_wal_file_size,
            compact_after_commits: self.config.compact_after_commits,
            ..StoreConfig::test()
        }
    }

    fn fail(&self, backend: &SimulatedBackend, operations: usize, failed: usize, msg: String) -> StoreDSTResult {
        StoreDSTResult {
            seed: self.seed,
            operations,
            failed_operations: failed,
            acknowledged_txid: 0,
            recovered_txid: 0,
            backend_stats: backend.stats(),
            passed: false,
            error_message: Some(msg),
        }
    }

    /// Run a single DST scenario
    pub fn run(&mut self) -> StoreDSTResult {
        let backend = SimulatedBackend::new(self.rng.next_u64(), self.config.backend_config.clone());
        let clock = ManualClock::default();

        let mut repo = None;
        let mut setup_error = String::new();
        for _ in 0..SETUP_ATTEMPTS {
            let opened = Store::open_with(backend.clone(), self.store_config())
                .map_err(Error::from)
                .and_then(|store| Repository::new(store, RepoConfig::default()));
            match opened {
                Ok(r) => {
                    repo = Some(r.with_clock(clock.clone()));
                    break;
                }
                Err(e) => setup_error = e.to_string(),
            }
        }
        let Some(repo) = repo else {
            return self.fail(&backend, 0, 0, format!("setup failed: {}", setup_error));
        };

        // txid -> digest of every state readers could have observed
        let mut history: HashMap<u64, u32> = HashMap::new();
        history.insert(repo.store().txid(), repo.store().digest());

        let crash_at = if self.config.simulate_crash {
            self.rng.gen_range(1, self.config.num_operations as u64 + 1) as usize
        } else {
            usize::MAX
        };

        let mut operations = 0;
        let mut failed = 0;
        for i in 0..self.config.num_operations {
            if i == crash_at {
                break;
            }
            clock.advance_ms(self.rng.gen_range(1, 5_000) as i64);
            operations += 1;
            match self.step(&repo) {
                Ok(()) => {}
                Err(Error::Store(_)) => failed += 1,
                Err(e) => {
                    return self.fail(&backend, operations, failed, format!("operation {} failed: {}", i, e));
                }
            }
            history.insert(repo.store().txid(), repo.store().digest());
        }
        let acknowledged_txid = repo.store().txid();

        if self.config.simulate_crash {
            backend.inner_backend().simulate_crash();
        }
        drop(repo);

        // Recovery on the same files, without fault injection
        let mut recovery_backend = backend.clone();
        recovery_backend.disable_faults();
        let recovered = match Store::open_with(recovery_backend, self.store_config())
            .map_err(Error::from)
            .and_then(|store| Repository::new(store, RepoConfig::default()))
        {
            Ok(r) => r,
            Err(e) => return self.fail(&backend, operations, failed, format!("recovery failed: {}", e)),
        };
        let recovered_txid = recovered.store().txid();
        let recovered_digest = recovered.store().digest();

        let mut problems = Vec::new();
        let exact = self.config.fsync_policy == FsyncPolicy::Always || !self.config.simulate_crash;
        if exact && recovered_txid != acknowledged_txid {
            problems.push(format!(
                "acknowledged txid {} but recovered {}",
                acknowledged_txid, recovered_txid
            ));
        }
        match history.get(&recovered_txid) {
            Some(digest) if *digest == recovered_digest => {}
            Some(digest) => problems.push(format!(
                "txid {} recovered with digest {:08x}, committed {:08x}",
                recovered_txid, recovered_digest, digest
            )),
            None => problems.push(format!("recovered txid {} was never committed", recovered_txid)),
        }
        match recovered.check_integrity() {
            Ok(report) if report.is_clean() => {}
            Ok(report) => problems.push(format!("integrity issues: {:?}", report.issues)),
            Err(e) => problems.push(format!("integrity check failed: {}", e)),
        }

        let passed = problems.is_empty();
        StoreDSTResult {
            seed: self.seed,
            operations,
            failed_operations: failed,
            acknowledged_txid,
            recovered_txid,
            backend_stats: backend.stats(),
            passed,
            error_message: (!passed).then(|| format!("INVARIANT VIOLATION: {}", problems.join("; "))),
        }
    }

    fn text(&mut self) -> String {
        let n = self.rng.gen_range(1, 6) as usize;
        (0..n)
            .filter_map(|_| self.rng.choose(WORDS).copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One random operation against live ids
    fn step(&mut self, repo: &SimRepo) -> Result<(), Error> {
        let books = repo.list_books()?;
        let roll = self.rng.gen_range(0, 100);
        let Some(book) = self.rng.choose(&books).cloned() else {
            return self.create_book(repo);
        };
        let bid = book.id;
        let fid = self.rng.choose(&book.fragments_ids).copied();

        match (roll, fid) {
            (0..=7, _) => self.create_book(repo),
            (8..=22, _) => {
                let after = if self.rng.gen_bool(0.3) { 0 } else { fid.unwrap_or(0) };
                let text = self.text();
                repo.add_fragment(bid, after, &text).map(|_| ())
            }
            (23..=37, Some(fid)) => {
                let text = self.text();
                repo.translate(bid, fid, 0, &text).map(|_| ())
            }
            (38..=45, Some(fid)) => {
                let page = repo.get_book_with_fragments(bid, 0, Limit::All, &Filter::None)?;
                let versions: Vec<u64> = page
                    .fragments
                    .iter()
                    .filter(|f| f.fragment.id == fid)
                    .flat_map(|f| f.versions.iter().map(|v| v.id))
                    .collect();
                match self.rng.choose(&versions).copied() {
                    Some(vid) if self.rng.gen_bool(0.5) => repo.remove_version(bid, fid, vid).map(|_| ()),
                    Some(vid) => {
                        let text = self.text();
                        repo.translate(bid, fid, vid, &text).map(|_| ())
                    }
                    None => Ok(()),
                }
            }
            (46..=53, Some(fid)) => {
                let text = self.text();
                repo.update_fragment(bid, fid, &text)
            }
            (54..=59, Some(fid)) => repo.remove_fragment(bid, fid).map(|_| ()),
            (60..=65, Some(fid)) => {
                if self.rng.gen_bool(0.5) {
                    repo.star_fragment(bid, fid)
                } else {
                    repo.unstar_fragment(bid, fid)
                }
            }
            (66..=70, Some(fid)) => {
                let text = if self.rng.gen_bool(0.3) { String::new() } else { self.text() };
                repo.comment_fragment(bid, fid, &text)
            }
            (71..=76, _) => {
                let text = self.text();
                repo.update_scratchpad(bid, &text)
            }
            (77..=80, _) => {
                let page = self.rng.gen_range(0, 10) as i64;
                repo.update_last_visited_page(bid, page)
            }
            (81..=83, _) => {
                let title = self.text();
                repo.rename_book(bid, &title)
            }
            (84..=86, _) => repo.delete_book(bid),
            (87..=89, _) => {
                let data = repo.export_book_json(bid)?;
                repo.import_book_json(&data).map(|_| ())
            }
            (90..=91, _) => repo.store().compact().map(|_| ()).map_err(Error::from),
            (92..=93, _) => repo.rebuild_counters(bid).map(|_| ()),
            _ => {
                let filter = match self.rng.gen_range(0, 4) {
                    0 => Filter::Untranslated,
                    1 => Filter::Starred,
                    2 => Filter::OriginalContains("the".to_string()),
                    _ => Filter::TranslationContains("river".to_string()),
                };
                repo.get_book_with_fragments(bid, 0, Limit::All, &filter).map(|_| ())
            }
        }
    }

    fn create_book(&mut self, repo: &SimRepo) -> Result<(), Error> {
        let n = self.rng.gen_range(0, 6) as usize;
        let texts: Vec<String> = (0..n).map(|_| self.text()).collect();
        let title = self.text();
        let auto = self.rng.gen_bool(0.5);
        repo.create_book(&title, &texts, auto).map(|_| ())
    }
}

/// Run a batch of DST scenarios across seeds
pub fn run_store_dst_batch(seeds: std::ops::Range<u64>, config: StoreDSTConfig) -> Vec<StoreDSTResult> {
    seeds
        .map(|seed| StoreDSTHarness::new(seed, config.clone()).run())
        .collect()
}

/// Summarize batch results
pub fn summarize_store_dst_batch(results: &[StoreDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = total - passed;

    let operations: usize = results.iter().map(|r| r.operations).sum();
    let failed_ops: usize = results.iter().map(|r| r.failed_operations).sum();
    let lost: u64 = results
        .iter()
        .map(|r| r.acknowledged_txid.saturating_sub(r.recovered_txid))
        .sum();

    let mut summary = format!(
        "Store DST Batch: {}/{} passed ({} failed)\n\
         Operations: {}, Failed by faults: {}, Commits lost to crashes: {}",
        passed, total, failed, operations, failed_ops, lost
    );

    if failed > 0 {
        summary.push_str("\n\nFailed seeds:");
        for r in results.iter().filter(|r| !r.passed) {
            summary.push_str(&format!(
                "\n  Seed {}: {}",
                r.seed,
                r.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dst_baseline() {
        let results = run_store_dst_batch(0..5, StoreDSTConfig::baseline());
        for r in &results {
            assert!(r.passed, "Seed {} failed: {:?}", r.seed, r.error_message);
            assert_eq!(r.failed_operations, 0);
            assert!(r.acknowledged_txid > 1);
        }
    }

    #[test]
    fn test_dst_crash_no_faults() {
        let results = run_store_dst_batch(0..10, StoreDSTConfig::crash_only());
        let summary = summarize_store_dst_batch(&results);
        assert!(summary.contains("10/10 passed"), "{}", summary);
    }

    #[test]
    fn test_dst_deterministic() {
        let a = StoreDSTHarness::new(42, StoreDSTConfig::chaos()).run();
        let b = StoreDSTHarness::new(42, StoreDSTConfig::chaos()).run();
        assert_eq!(a.operations, b.operations);
        assert_eq!(a.failed_operations, b.failed_operations);
        assert_eq!(a.acknowledged_txid, b.acknowledged_txid);
        assert_eq!(a.recovered_txid, b.recovered_txid);
    }
}
