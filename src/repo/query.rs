//! Filtered, windowed book queries
//!
//! ```text
//! fragments_ids ─ filter ─→ matching_ids ─ [offset, offset+limit) ─→ load
//!                                                                     │
//!              versions (narrowed for translation-contains) ←─────────┘
//! ```
//!
//! Predicates run on decoded records. `seq_num` is always the position in
//! the unfiltered list, so it keeps pointing at the same place in the book
//! whatever the filter.

use super::{
    dangling, fragments_bucket, load, load_book, versions_bucket, BookPage, Error, Fragment,
    FragmentView, Repository, TranslationVersion,
};
use crate::store::{BucketPath, FileBackend, TxRead};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthCmp {
    Less,
    Greater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Characters,
    Words,
}

/// Fragment selection predicate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    None,
    Untranslated,
    Commented,
    Starred,
    TwoOrMoreVersions,
    OriginalContains(String),
    /// Keeps fragments with a matching version and attaches only those versions
    TranslationContains(String),
    OriginalLength {
        cmp: LengthCmp,
        n: usize,
        unit: LengthUnit,
    },
}

/// Page size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Count(usize),
    /// Everything from the offset on
    All,
}

impl Filter {
    /// Parse a filter from its form representation, e.g.
    /// `("orig-length", ["more", "20", "words"])`
    pub fn from_parts(kind: &str, args: &[&str]) -> Result<Filter, Error> {
        let arg = |i: usize| {
            args.get(i)
                .copied()
                .ok_or_else(|| Error::InvalidInput(format!("filter '{}' needs argument {}", kind, i + 1)))
        };
        let filter = match kind {
            "" | "none" => Filter::None,
            "untranslated" => Filter::Untranslated,
            "commented" => Filter::Commented,
            "starred" => Filter::Starred,
            "with-2-versions" => Filter::TwoOrMoreVersions,
            "orig-contains" => Filter::OriginalContains(arg(0)?.to_string()),
            "trans-contains" => Filter::TranslationContains(arg(0)?.to_string()),
            "orig-length" => {
                let cmp = match arg(0)? {
                    "less" => LengthCmp::Less,
                    "more" => LengthCmp::Greater,
                    other => {
                        return Err(Error::InvalidInput(format!("unknown comparison '{}'", other)))
                    }
                };
                let n = arg(1)?
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("bad length '{}'", args[1])))?;
                let unit = match arg(2)? {
                    "chars" => LengthUnit::Characters,
                    "words" => LengthUnit::Words,
                    other => return Err(Error::InvalidInput(format!("unknown unit '{}'", other))),
                };
                Filter::OriginalLength { cmp, n, unit }
            }
            other => return Err(Error::InvalidInput(format!("unknown filter '{}'", other))),
        };
        Ok(filter)
    }
}

/// Number of maximal runs of alphanumeric or `_` characters
pub fn word_count(text: &str) -> usize {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .count()
}

struct Needle {
    text: String,
    fold_case: bool,
}

impl Needle {
    fn new(text: &str, fold_case: bool) -> Self {
        let text = if fold_case { text.to_lowercase() } else { text.to_string() };
        Needle { text, fold_case }
    }

    fn found_in(&self, haystack: &str) -> bool {
        if self.fold_case {
            haystack.to_lowercase().contains(&self.text)
        } else {
            haystack.contains(&self.text)
        }
    }
}

/// A filter with its needle prepared once per query
struct Predicate<'a> {
    filter: &'a Filter,
    needle: Option<Needle>,
}

impl<'a> Predicate<'a> {
    fn new(filter: &'a Filter, fold_case: bool) -> Self {
        let needle = match filter {
            Filter::OriginalContains(s) | Filter::TranslationContains(s) => Some(Needle::new(s, fold_case)),
            _ => None,
        };
        Predicate { filter, needle }
    }

    fn version_matches(&self, version: &TranslationVersion) -> bool {
        match (&self.filter, &self.needle) {
            (Filter::TranslationContains(_), Some(needle)) => needle.found_in(&version.text),
            _ => true,
        }
    }

    fn matches<R: TxRead + ?Sized>(
        &self,
        tx: &R,
        bid: u64,
        vb: &BucketPath,
        fragment: &Fragment,
    ) -> Result<bool, Error> {
        let keep = match self.filter {
            Filter::None => true,
            Filter::Untranslated => !fragment.is_translated(),
            Filter::Commented => !fragment.comment.is_empty(),
            Filter::Starred => fragment.starred,
            Filter::TwoOrMoreVersions => fragment.versions_ids.len() >= 2,
            Filter::OriginalContains(_) => self
                .needle
                .as_ref()
                .is_some_and(|n| n.found_in(&fragment.text)),
            Filter::TranslationContains(_) => {
                for vid in &fragment.versions_ids {
                    let version: TranslationVersion =
                        load(tx, vb, *vid)?.ok_or_else(|| dangling("version", bid, *vid))?;
                    if self.version_matches(&version) {
                        return Ok(true);
                    }
                }
                false
            }
            Filter::OriginalLength { cmp, n, unit } => {
                let len = match unit {
                    LengthUnit::Characters => fragment.text.chars().count(),
                    LengthUnit::Words => word_count(&fragment.text),
                };
                match cmp {
                    LengthCmp::Less => len < *n,
                    LengthCmp::Greater => len > *n,
                }
            }
        };
        Ok(keep)
    }
}

impl<S: FileBackend> Repository<S> {
    /// Load a window of a book's fragments, optionally filtered.
    ///
    /// With [`Limit::Count`] and strict offsets, a non-zero `offset` at or past
    /// the book's fragment count is [`Error::InvalidOffset`]; otherwise an
    /// offset past the end yields an empty page.
    pub fn get_book_with_fragments(
        &self,
        bid: u64,
        offset: usize,
        limit: Limit,
        filter: &Filter,
    ) -> Result<BookPage, Error> {
        let predicate = Predicate::new(filter, self.config.case_insensitive_search);
        let strict = self.config.strict_offsets;

        self.store.read(|tx| -> Result<_, Error> {
            let book = load_book(tx, bid)?;
            if matches!(limit, Limit::Count(_))
                && strict
                && offset > 0
                && offset >= book.fragments_ids.len()
            {
                return Err(Error::InvalidOffset);
            }

            let fb = fragments_bucket(bid);
            let vb = versions_bucket(bid);

            let matching_ids = if *filter == Filter::None {
                book.fragments_ids.clone()
            } else {
                let mut ids = Vec::with_capacity(book.fragments_ids.len());
                for &fid in &book.fragments_ids {
                    let fragment: Fragment =
                        load(tx, &fb, fid)?.ok_or_else(|| dangling("fragment", bid, fid))?;
                    if predicate.matches(tx, bid, &vb, &fragment)? {
                        ids.push(fid);
                    }
                }
                ids
            };

            let end = match limit {
                Limit::All => matching_ids.len(),
                Limit::Count(n) => offset.saturating_add(n).min(matching_ids.len()),
            };
            let window = matching_ids.get(offset..end).unwrap_or(&[]);

            let positions: HashMap<u64, usize> = book
                .fragments_ids
                .iter()
                .enumerate()
                .map(|(i, &fid)| (fid, i))
                .collect();

            let mut fragments = Vec::with_capacity(window.len());
            for &fid in window {
                let fragment: Fragment =
                    load(tx, &fb, fid)?.ok_or_else(|| dangling("fragment", bid, fid))?;

                let mut versions = Vec::new();
                if *filter != Filter::Untranslated {
                    for vid in &fragment.versions_ids {
                        let version: TranslationVersion =
                            load(tx, &vb, *vid)?.ok_or_else(|| dangling("version", bid, *vid))?;
                        if predicate.version_matches(&version) {
                            versions.push(version);
                        }
                    }
                }
                if matches!(filter, Filter::TranslationContains(_)) && versions.is_empty() {
                    continue;
                }

                let seq_num = positions.get(&fid).map_or(0, |i| i + 1);
                fragments.push(FragmentView {
                    fragment,
                    versions,
                    seq_num,
                });
            }

            Ok(BookPage {
                book,
                matching_ids,
                fragments,
            })
        })
    }
}
