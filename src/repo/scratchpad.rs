//! Per-book free-form notes

use super::{load, load_book, save, scratchpad_bucket, Book, Error, Repository, Scratchpad};
use crate::store::FileBackend;

impl<S: FileBackend> Repository<S> {
    /// The book and its scratchpad. A book that never had notes gets an
    /// empty scratchpad with the book's id and zero timestamps.
    pub fn scratchpad(&self, bid: u64) -> Result<(Book, Scratchpad), Error> {
        self.store.read(|tx| -> Result<_, Error> {
            let book = load_book(tx, bid)?;
            let pad = load(tx, &scratchpad_bucket(), bid)?.unwrap_or_else(|| Scratchpad {
                id: bid,
                ..Scratchpad::default()
            });
            Ok((book, pad))
        })
    }

    pub fn update_scratchpad(&self, bid: u64, text: &str) -> Result<(), Error> {
        let now = self.now();
        self.store.write(|tx| -> Result<_, Error> {
            load_book(tx, bid)?;
            let path = scratchpad_bucket();
            let pad = match load::<Scratchpad, _>(tx, &path, bid)? {
                Some(existing) => Scratchpad {
                    updated: now,
                    text: text.to_string(),
                    ..existing
                },
                None => Scratchpad {
                    id: bid,
                    created: now,
                    updated: now,
                    text: text.to_string(),
                },
            };
            save(tx, &path, bid, &pad)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::zero_time;
    use super::super::test_support::*;
    use crate::clock::Clock;
    use std::time::Duration;

    #[test]
    fn test_empty_scratchpad_for_new_book() {
        let (repo, _) = repo();
        let bid = repo.create_book("B", &[], false).unwrap();
        let (book, pad) = repo.scratchpad(bid).unwrap();
        assert_eq!(book.id, bid);
        assert_eq!(pad.id, bid);
        assert!(pad.text.is_empty());
        assert_eq!(pad.created, zero_time());
    }

    #[test]
    fn test_update_keeps_created() {
        let (repo, clock) = repo();
        let bid = repo.create_book("B", &[], false).unwrap();
        repo.update_scratchpad(bid, "first").unwrap();
        let created = clock.now();

        clock.advance(Duration::from_secs(10));
        repo.update_scratchpad(bid, "second").unwrap();
        let (book, pad) = repo.scratchpad(bid).unwrap();
        assert_eq!(pad.text, "second");
        assert_eq!(pad.created, created);
        assert_eq!(pad.updated, clock.now());
        assert_eq!(book.last_activity, zero_time());
    }

    #[test]
    fn test_missing_book() {
        let (repo, _) = repo();
        assert!(repo.scratchpad(3).unwrap_err().is_not_found());
        let txid = repo.store().txid();
        assert!(repo.update_scratchpad(3, "x").unwrap_err().is_not_found());
        assert_eq!(repo.store().txid(), txid);
    }
}
