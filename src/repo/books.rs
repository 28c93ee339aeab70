//! Book lifecycle

use super::{
    fragments_bucket, index_bucket, load_book, save, scratchpad_bucket, versions_bucket, Book,
    Error, Fragment, Repository, TranslationVersion,
};
use crate::store::{decode_record, encode_key, FileBackend, TxRead, WriteTx};
use chrono::{DateTime, Utc};
use tracing::debug;

/// True when the text has no alphabetic character (numbers, punctuation)
fn is_trivial(text: &str) -> bool {
    !text.chars().any(char::is_alphabetic)
}

impl<S: FileBackend> Repository<S> {
    /// All books in id order
    pub fn list_books(&self) -> Result<Vec<Book>, Error> {
        self.store.read(|tx| -> Result<_, Error> {
            let mut books = Vec::new();
            for (_, value) in tx.iter(&index_bucket())? {
                books.extend(decode_record::<Book>(Some(value))?);
            }
            Ok(books)
        })
    }

    /// Most recently active first; ties (e.g. never touched) newest book first
    pub fn list_books_by_activity(&self) -> Result<Vec<Book>, Error> {
        let mut books = self.list_books()?;
        books.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(books)
    }

    pub fn get_book(&self, bid: u64) -> Result<Book, Error> {
        self.store.read(|tx| load_book(tx, bid))
    }

    /// Create a book with one fragment per text, in order. With
    /// `auto_translate_trivial`, fragments without any letter get a first
    /// version equal to their text.
    pub fn create_book(
        &self,
        title: &str,
        texts: &[String],
        auto_translate_trivial: bool,
    ) -> Result<u64, Error> {
        let now = self.now();
        let bid = self.store.write(|tx| -> Result<_, Error> {
            let items = texts.iter().map(|text| {
                let translation = (auto_translate_trivial && is_trivial(text)).then(|| text.clone());
                (text.clone(), translation)
            });
            insert_book(tx, title, items, now)
        })?;
        debug!(bid, fragments = texts.len(), "book created");
        Ok(bid)
    }

    /// Create a book from (source, translation) pairs. Both sides are
    /// trimmed; an empty translation leaves the fragment untranslated.
    pub fn create_translated_book(&self, title: &str, pairs: &[(String, String)]) -> Result<u64, Error> {
        let now = self.now();
        let bid = self.store.write(|tx| -> Result<_, Error> {
            let items = pairs.iter().map(|(source, translation)| {
                let translation = translation.trim();
                let translation = (!translation.is_empty()).then(|| translation.to_string());
                (source.trim().to_string(), translation)
            });
            insert_book(tx, title, items, now)
        })?;
        debug!(bid, fragments = pairs.len(), "translated book created");
        Ok(bid)
    }

    pub fn rename_book(&self, bid: u64, title: &str) -> Result<(), Error> {
        self.store.write(|tx| -> Result<_, Error> {
            let mut book = load_book(tx, bid)?;
            book.title = title.to_string();
            save(tx, &index_bucket(), bid, &book)
        })
    }

    /// Remove a book with all its fragments, versions and scratchpad
    pub fn delete_book(&self, bid: u64) -> Result<(), Error> {
        self.store.write(|tx| -> Result<_, Error> {
            load_book(tx, bid)?;
            tx.delete(&index_bucket(), &encode_key(bid))?;
            for path in [fragments_bucket(bid), versions_bucket(bid)] {
                if tx.bucket_exists(&path) {
                    tx.delete_bucket(&path)?;
                }
            }
            tx.delete(&scratchpad_bucket(), &encode_key(bid))?;
            Ok(())
        })?;
        debug!(bid, "book deleted");
        Ok(())
    }

    /// Remember the page the reader was last on; unchanged values write nothing
    pub fn update_last_visited_page(&self, bid: u64, page: i64) -> Result<(), Error> {
        self.store.write(|tx| -> Result<_, Error> {
            let mut book = load_book(tx, bid)?;
            if book.last_visited_page == page {
                return Ok(());
            }
            book.last_visited_page = page;
            save(tx, &index_bucket(), bid, &book)
        })
    }
}

/// Allocate a book, its sub-namespaces and one fragment (plus an optional
/// first version) per item
pub(crate) fn insert_book(
    tx: &mut WriteTx,
    title: &str,
    items: impl Iterator<Item = (String, Option<String>)>,
    now: DateTime<Utc>,
) -> Result<u64, Error> {
    let bid = tx.next_sequence(&index_bucket())?;
    let fb = fragments_bucket(bid);
    let vb = versions_bucket(bid);
    tx.create_bucket(&fb)?;
    tx.create_bucket(&vb)?;

    let mut book = Book {
        id: bid,
        title: title.to_string(),
        created: now,
        ..Book::default()
    };
    for (text, translation) in items {
        let mut versions_ids = Vec::new();
        if let Some(translation) = translation {
            let vid = tx.next_sequence(&vb)?;
            let version = TranslationVersion {
                id: vid,
                created: now,
                updated: now,
                text: translation,
            };
            save(tx, &vb, vid, &version)?;
            versions_ids.push(vid);
            book.fragments_translated += 1;
        }

        let fid = tx.next_sequence(&fb)?;
        let fragment = Fragment {
            id: fid,
            created: now,
            updated: now,
            text,
            versions_ids,
            ..Fragment::default()
        };
        save(tx, &fb, fid, &fragment)?;
        book.fragments_ids.push(fid);
    }
    book.fragments_total = book.fragments_ids.len() as u64;

    save(tx, &index_bucket(), bid, &book)?;
    Ok(bid)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{load, Scratchpad};
    use super::super::{Filter, Limit};
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_create_book_auto_translates_trivial() {
        let (repo, _) = repo();
        let bid = repo
            .create_book("Demo", &texts(&["Hello.", "42", "World."]), true)
            .unwrap();
        let book = repo.get_book(bid).unwrap();
        assert_eq!(book.fragments_total, 3);
        assert_eq!(book.fragments_ids.len(), 3);
        assert_eq!(book.fragments_translated, 1);

        let page = repo
            .get_book_with_fragments(bid, 0, Limit::All, &Filter::None)
            .unwrap();
        let versions: Vec<Vec<String>> = page
            .fragments
            .iter()
            .map(|f| f.versions.iter().map(|v| v.text.clone()).collect())
            .collect();
        assert_eq!(versions, vec![vec![], vec!["42".to_string()], vec![]]);
    }

    #[test]
    fn test_create_book_without_auto_translation() {
        let (repo, _) = repo();
        let bid = repo.create_book("Demo", &texts(&["42", "..."]), false).unwrap();
        assert_eq!(repo.get_book(bid).unwrap().fragments_translated, 0);
    }

    #[test]
    fn test_create_translated_book_trims() {
        let (repo, _) = repo();
        let pairs = vec![
            ("  One ".to_string(), " Uno ".to_string()),
            ("Two".to_string(), "   ".to_string()),
        ];
        let bid = repo.create_translated_book("Pairs", &pairs).unwrap();
        let book = repo.get_book(bid).unwrap();
        assert_eq!(book.fragments_translated, 1);

        let view = repo.store().begin_read();
        let first: Fragment = load(&view, &fragments_bucket(bid), book.fragments_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(first.text, "One");
        let version: TranslationVersion = load(&view, &versions_bucket(bid), first.versions_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(version.text, "Uno");
    }

    #[test]
    fn test_book_ids_are_never_reused() {
        let (repo, _) = repo();
        let a = repo.create_book("A", &[], false).unwrap();
        repo.delete_book(a).unwrap();
        let b = repo.create_book("B", &[], false).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_list_books_by_activity() {
        let (repo, clock) = repo();
        let a = repo.create_book("A", &texts(&["x"]), false).unwrap();
        let b = repo.create_book("B", &texts(&["x"]), false).unwrap();
        let c = repo.create_book("C", &texts(&["x"]), false).unwrap();

        let ids: Vec<u64> = repo.list_books().unwrap().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![a, b, c]);

        clock.advance(Duration::from_secs(5));
        let fid = repo.get_book(a).unwrap().fragments_ids[0];
        repo.update_fragment(a, fid, "touched").unwrap();

        let ids: Vec<u64> = repo
            .list_books_by_activity()
            .unwrap()
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![a, c, b]);
    }

    #[test]
    fn test_rename_and_missing_book() {
        let (repo, _) = repo();
        let bid = repo.create_book("Old", &[], false).unwrap();
        repo.rename_book(bid, "New").unwrap();
        assert_eq!(repo.get_book(bid).unwrap().title, "New");
        assert!(repo.rename_book(bid + 1, "x").unwrap_err().is_not_found());
        assert!(repo.get_book(bid + 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_book_removes_everything() {
        let (repo, _) = repo();
        let bid = repo.create_book("Gone", &texts(&["a", "1"]), true).unwrap();
        repo.update_scratchpad(bid, "notes").unwrap();
        repo.delete_book(bid).unwrap();

        let view = repo.store().begin_read();
        assert!(!view.bucket_exists(&fragments_bucket(bid)));
        assert!(!view.bucket_exists(&versions_bucket(bid)));
        let sp: Option<Scratchpad> = load(&view, &scratchpad_bucket(), bid).unwrap();
        assert!(sp.is_none());
        assert!(repo.get_book(bid).unwrap_err().is_not_found());
        assert!(repo.delete_book(bid).unwrap_err().is_not_found());
    }

    #[test]
    fn test_last_visited_page_noop_when_unchanged() {
        let (repo, _) = repo();
        let bid = repo.create_book("B", &[], false).unwrap();
        repo.update_last_visited_page(bid, 3).unwrap();
        let txid = repo.store().txid();
        repo.update_last_visited_page(bid, 3).unwrap();
        assert_eq!(repo.store().txid(), txid);
        assert_eq!(repo.get_book(bid).unwrap().last_visited_page, 3);
    }
}
