//! Whole-book JSON export and import
//!
//! The document carries the records with the ids they had in the source
//! database. Import treats those ids as foreign: every book, fragment and
//! version gets a fresh id and every reference is rewritten before anything
//! is stored.

use super::{
    dangling, fragments_bucket, index_bucket, load, load_book, save, scratchpad_bucket,
    versions_bucket, Book, Error, Fragment, Repository, Scratchpad, TranslationVersion,
};
use crate::store::{encode_record, FileBackend};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

#[derive(Serialize)]
struct ExportDoc<'a> {
    book: &'a Book,
    fragments: &'a [Fragment],
    versions: &'a [TranslationVersion],
    scratchpad: Option<&'a Scratchpad>,
}

#[derive(Deserialize)]
struct ImportDoc {
    book: Book,
    #[serde(default)]
    fragments: Vec<Fragment>,
    #[serde(default)]
    versions: Vec<TranslationVersion>,
    #[serde(default)]
    scratchpad: Option<Scratchpad>,
}

/// An import document whose references all resolve, in book order
struct Resolved {
    book: Book,
    fragments: Vec<(Fragment, Vec<TranslationVersion>)>,
    scratchpad: Option<Scratchpad>,
}

fn invalid(msg: String) -> Error {
    Error::InvalidInput(msg)
}

impl ImportDoc {
    fn resolve(self) -> Result<Resolved, Error> {
        let mut fragments: HashMap<u64, Fragment> = HashMap::with_capacity(self.fragments.len());
        for fragment in self.fragments {
            let id = fragment.id;
            if fragments.insert(id, fragment).is_some() {
                return Err(invalid(format!("duplicate fragment id {}", id)));
            }
        }
        let mut versions: HashMap<u64, TranslationVersion> = HashMap::with_capacity(self.versions.len());
        for version in self.versions {
            let id = version.id;
            if versions.insert(id, version).is_some() {
                return Err(invalid(format!("duplicate version id {}", id)));
            }
        }

        let mut seen_versions = HashSet::new();
        let mut ordered = Vec::with_capacity(self.book.fragments_ids.len());
        for fid in &self.book.fragments_ids {
            let fragment = fragments
                .remove(fid)
                .ok_or_else(|| invalid(format!("book references missing fragment {}", fid)))?;
            let mut linked = Vec::with_capacity(fragment.versions_ids.len());
            for vid in &fragment.versions_ids {
                if !seen_versions.insert(*vid) {
                    return Err(invalid(format!("version {} referenced twice", vid)));
                }
                let version = versions.remove(vid).ok_or_else(|| {
                    invalid(format!("fragment {} references missing version {}", fid, vid))
                })?;
                linked.push(version);
            }
            ordered.push((fragment, linked));
        }

        if !fragments.is_empty() || !versions.is_empty() {
            debug!(
                fragments = fragments.len(),
                versions = versions.len(),
                "dropping unreferenced records from import"
            );
        }

        Ok(Resolved {
            book: self.book,
            fragments: ordered,
            scratchpad: self.scratchpad,
        })
    }
}

impl<S: FileBackend> Repository<S> {
    /// Serialize a book with its fragments (book order), versions (grouped by
    /// fragment) and scratchpad
    pub fn export_book_json(&self, bid: u64) -> Result<Vec<u8>, Error> {
        self.store.read(|tx| -> Result<_, Error> {
            let book = load_book(tx, bid)?;
            let fb = fragments_bucket(bid);
            let vb = versions_bucket(bid);

            let mut fragments = Vec::with_capacity(book.fragments_ids.len());
            let mut versions = Vec::new();
            for fid in &book.fragments_ids {
                let fragment: Fragment = load(tx, &fb, *fid)?
                    .ok_or_else(|| dangling("fragment", bid, *fid))?;
                for vid in &fragment.versions_ids {
                    let version: TranslationVersion = load(tx, &vb, *vid)?
                        .ok_or_else(|| dangling("version", bid, *vid))?;
                    versions.push(version);
                }
                fragments.push(fragment);
            }
            let scratchpad: Option<Scratchpad> = load(tx, &scratchpad_bucket(), bid)?;

            let doc = ExportDoc {
                book: &book,
                fragments: &fragments,
                versions: &versions,
                scratchpad: scratchpad.as_ref(),
            };
            Ok(encode_record(&doc)?)
        })
    }

    /// Recreate an exported book under fresh ids; returns the new book id.
    /// A document with dangling or duplicated references is rejected whole.
    pub fn import_book_json(&self, data: &[u8]) -> Result<u64, Error> {
        let doc: ImportDoc =
            serde_json::from_slice(data).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let resolved = doc.resolve()?;

        let bid = self.store.write(|tx| -> Result<_, Error> {
            let bid = tx.next_sequence(&index_bucket())?;
            let fb = fragments_bucket(bid);
            let vb = versions_bucket(bid);
            tx.create_bucket(&fb)?;
            tx.create_bucket(&vb)?;

            let mut book = Book {
                id: bid,
                fragments_ids: Vec::with_capacity(resolved.fragments.len()),
                fragments_total: 0,
                fragments_translated: 0,
                ..resolved.book.clone()
            };
            for (fragment, versions) in &resolved.fragments {
                let mut versions_ids = Vec::with_capacity(versions.len());
                for version in versions {
                    let vid = tx.next_sequence(&vb)?;
                    save(tx, &vb, vid, &TranslationVersion { id: vid, ..version.clone() })?;
                    versions_ids.push(vid);
                }

                let fid = tx.next_sequence(&fb)?;
                let fragment = Fragment {
                    id: fid,
                    versions_ids,
                    ..fragment.clone()
                };
                if fragment.is_translated() {
                    book.fragments_translated += 1;
                }
                save(tx, &fb, fid, &fragment)?;
                book.fragments_ids.push(fid);
            }
            book.fragments_total = book.fragments_ids.len() as u64;
            save(tx, &index_bucket(), bid, &book)?;

            if let Some(pad) = &resolved.scratchpad {
                save(tx, &scratchpad_bucket(), bid, &Scratchpad { id: bid, ..pad.clone() })?;
            }
            Ok(bid)
        })?;

        info!(bid, fragments = resolved.fragments.len(), "book imported");
        Ok(bid)
    }
}
