//! Counter rebuild and integrity check
//!
//! Counters are normally maintained incrementally. These operations
//! recompute them from the fragment records and audit the whole
//! index/fragments/versions graph.

use super::{
    fragments_bucket, index_bucket, load, load_book, save, scratchpad_bucket, versions_bucket,
    Book, Error, Fragment, Repository, FRAGMENTS, VERSIONS,
};
use crate::store::{decode_key, decode_record, encode_key, BucketPath, FileBackend, ReadTx, TxRead};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

/// Counter values before and after a rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub bid: u64,
    pub fragments_total: (u64, u64),
    pub fragments_translated: (u64, u64),
}

impl RebuildReport {
    pub fn changed(&self) -> bool {
        self.fragments_total.0 != self.fragments_total.1
            || self.fragments_translated.0 != self.fragments_translated.1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// A stored counter disagrees with the records
    CounterMismatch {
        bid: u64,
        counter: &'static str,
        stored: u64,
        actual: u64,
    },
    MissingNamespace { bid: u64, namespace: &'static str },
    MissingFragment { bid: u64, fid: u64 },
    MissingVersion { bid: u64, fid: u64, vid: u64 },
    /// An id listed more than once
    DuplicateReference { bid: u64, id: u64 },
    OrphanFragment { bid: u64, fid: u64 },
    OrphanVersion { bid: u64, vid: u64 },
    /// Per-book namespace or scratchpad without an index record
    OrphanBook { bid: u64, namespace: &'static str },
    /// The bucket's sequence is below an id it already holds, so a later
    /// allocation would collide
    SequenceBehind { bucket: String, sequence: u64, max_id: u64 },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::CounterMismatch {
                bid,
                counter,
                stored,
                actual,
            } => write!(f, "book {}: {} is {} but records say {}", bid, counter, stored, actual),
            IntegrityIssue::MissingNamespace { bid, namespace } => {
                write!(f, "book {}: {} namespace missing", bid, namespace)
            }
            IntegrityIssue::MissingFragment { bid, fid } => {
                write!(f, "book {}: fragment {} listed but not stored", bid, fid)
            }
            IntegrityIssue::MissingVersion { bid, fid, vid } => {
                write!(f, "book {}: fragment {} links missing version {}", bid, fid, vid)
            }
            IntegrityIssue::DuplicateReference { bid, id } => {
                write!(f, "book {}: id {} referenced more than once", bid, id)
            }
            IntegrityIssue::OrphanFragment { bid, fid } => {
                write!(f, "book {}: fragment {} not listed in book", bid, fid)
            }
            IntegrityIssue::OrphanVersion { bid, vid } => {
                write!(f, "book {}: version {} not linked from any fragment", bid, vid)
            }
            IntegrityIssue::OrphanBook { bid, namespace } => {
                write!(f, "{} entry for unknown book {}", namespace, bid)
            }
            IntegrityIssue::SequenceBehind {
                bucket,
                sequence,
                max_id,
            } => write!(f, "bucket {}: sequence {} below stored id {}", bucket, sequence, max_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub books_checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl<S: FileBackend> Repository<S> {
    /// Recompute a book's counters from its records, writing only on change
    pub fn rebuild_counters(&self, bid: u64) -> Result<RebuildReport, Error> {
        let report = self.store.write(|tx| -> Result<_, Error> {
            let mut book = load_book(tx, bid)?;
            let fb = fragments_bucket(bid);
            let mut translated = 0;
            for fid in &book.fragments_ids {
                let fragment: Option<Fragment> = load(tx, &fb, *fid)?;
                if fragment.is_some_and(|f| f.is_translated()) {
                    translated += 1;
                }
            }

            let report = RebuildReport {
                bid,
                fragments_total: (book.fragments_total, book.fragments_ids.len() as u64),
                fragments_translated: (book.fragments_translated, translated),
            };
            if report.changed() {
                book.fragments_total = report.fragments_total.1;
                book.fragments_translated = report.fragments_translated.1;
                save(tx, &index_bucket(), bid, &book)?;
            }
            Ok(report)
        })?;

        if report.changed() {
            warn!(
                bid,
                total = ?report.fragments_total,
                translated = ?report.fragments_translated,
                "book counters repaired"
            );
        }
        Ok(report)
    }

    /// Rebuild every book's counters; returns only the books that changed
    pub fn rebuild_all_counters(&self) -> Result<Vec<RebuildReport>, Error> {
        let mut repaired = Vec::new();
        for book in self.list_books()? {
            let report = self.rebuild_counters(book.id)?;
            if report.changed() {
                repaired.push(report);
            }
        }
        Ok(repaired)
    }

    /// Audit the whole repository in one read view
    pub fn check_integrity(&self) -> Result<IntegrityReport, Error> {
        let report = self.store.read(|tx| -> Result<_, Error> {
            let mut report = IntegrityReport::default();
            let mut known = HashSet::new();

            let index = index_bucket();
            let mut books = Vec::new();
            for (key, value) in tx.iter(&index)? {
                let bid = decode_key(key)?;
                known.insert(bid);
                books.extend(decode_record::<Book>(Some(value))?);
            }
            check_sequence(tx, &index, &mut report.issues)?;

            for book in &books {
                check_book(tx, book, &mut report.issues)?;
            }
            report.books_checked = books.len();

            for (root, namespace) in [(FRAGMENTS, "fragments"), (VERSIONS, "versions")] {
                let root = BucketPath::root(root);
                for child in tx.state().children(&root) {
                    let bid = child
                        .segments()
                        .last()
                        .map(|s| decode_key(s))
                        .transpose()?
                        .unwrap_or_default();
                    if !known.contains(&bid) {
                        report.issues.push(IntegrityIssue::OrphanBook { bid, namespace });
                    }
                }
            }
            for (key, _) in tx.iter(&scratchpad_bucket())? {
                let bid = decode_key(key)?;
                if !known.contains(&bid) {
                    report.issues.push(IntegrityIssue::OrphanBook {
                        bid,
                        namespace: "scratchpad",
                    });
                }
            }
            Ok(report)
        })?;

        if report.is_clean() {
            info!(books = report.books_checked, "integrity check clean");
        } else {
            for issue in &report.issues {
                warn!("integrity: {}", issue);
            }
        }
        Ok(report)
    }
}

fn check_sequence(tx: &ReadTx, path: &BucketPath, issues: &mut Vec<IntegrityIssue>) -> Result<(), Error> {
    let sequence = tx.sequence(path)?;
    if let Some((key, _)) = tx.iter(path)?.next_back() {
        let max_id = decode_key(key)?;
        if max_id > sequence {
            issues.push(IntegrityIssue::SequenceBehind {
                bucket: path.to_string(),
                sequence,
                max_id,
            });
        }
    }
    Ok(())
}

fn check_book(tx: &ReadTx, book: &Book, issues: &mut Vec<IntegrityIssue>) -> Result<(), Error> {
    let bid = book.id;
    let fb = fragments_bucket(bid);
    let vb = versions_bucket(bid);
    let has_fragments = tx.bucket_exists(&fb);
    let has_versions = tx.bucket_exists(&vb);
    if !has_fragments {
        issues.push(IntegrityIssue::MissingNamespace {
            bid,
            namespace: "fragments",
        });
    }
    if !has_versions {
        issues.push(IntegrityIssue::MissingNamespace {
            bid,
            namespace: "versions",
        });
    }

    if book.fragments_total != book.fragments_ids.len() as u64 {
        issues.push(IntegrityIssue::CounterMismatch {
            bid,
            counter: "fragments_total",
            stored: book.fragments_total,
            actual: book.fragments_ids.len() as u64,
        });
    }

    let mut listed = HashSet::new();
    let mut linked = HashSet::new();
    let mut translated = 0;
    for &fid in &book.fragments_ids {
        if !listed.insert(fid) {
            issues.push(IntegrityIssue::DuplicateReference { bid, id: fid });
            continue;
        }
        let fragment: Option<Fragment> = if has_fragments { load(tx, &fb, fid)? } else { None };
        let Some(fragment) = fragment else {
            issues.push(IntegrityIssue::MissingFragment { bid, fid });
            continue;
        };
        if fragment.is_translated() {
            translated += 1;
        }
        for &vid in &fragment.versions_ids {
            if !linked.insert(vid) {
                issues.push(IntegrityIssue::DuplicateReference { bid, id: vid });
                continue;
            }
            let exists = has_versions && tx.get(&vb, &encode_key(vid))?.is_some();
            if !exists {
                issues.push(IntegrityIssue::MissingVersion { bid, fid, vid });
            }
        }
    }

    if book.fragments_translated != translated {
        issues.push(IntegrityIssue::CounterMismatch {
            bid,
            counter: "fragments_translated",
            stored: book.fragments_translated,
            actual: translated,
        });
    }

    if has_fragments {
        for (key, _) in tx.iter(&fb)? {
            let fid = decode_key(key)?;
            if !listed.contains(&fid) {
                issues.push(IntegrityIssue::OrphanFragment { bid, fid });
            }
        }
        check_sequence(tx, &fb, issues)?;
    }
    if has_versions {
        for (key, _) in tx.iter(&vb)? {
            let vid = decode_key(key)?;
            if !linked.contains(&vid) {
                issues.push(IntegrityIssue::OrphanVersion { bid, vid });
            }
        }
        check_sequence(tx, &vb, issues)?;
    }
    Ok(())
}
